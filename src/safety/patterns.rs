//! Static pattern detection for requests and generated code.
//!
//! Hardcoded detection for intents and code constructs that are inherently
//! destructive, regardless of phrasing. Both scans operate on lowercased
//! text and report the first matched phrase so the refusal can cite it.

/// Destructive-intent phrases checked against `task ⧺ description` and the
/// sensitive context fields.
const DESTRUCTIVE_INTENT: &[&str] = &[
    "rm -rf",
    "rm -r /",
    "delete all files",
    "delete everything",
    "wipe the disk",
    "wipe disk",
    "format the disk",
    "format disk",
    "zero out the disk",
    "dd if=/dev/zero",
    "mkfs.",
    "drop database",
    "drop all tables",
    "truncate all tables",
    "delete the database",
    "ransomware",
    "encrypt all files and demand",
    "exfiltrate",
    "steal credentials",
    "steal data",
    "shred -",
];

/// Adult-content markers checked alongside destructive intent.
const ADULT_CONTENT: &[&str] = &[
    "porn",
    "pornographic",
    "sexually explicit",
    "explicit sexual",
    "nsfw content",
    "erotic content",
];

/// Context fields whose values are scanned with the same intent lists.
const SENSITIVE_CONTEXT_FIELDS: &[&str] = &["target", "operation", "content_type", "audience"];

/// Code constructs that are always blocked in generated programs.
const FORBIDDEN_CODE: &[&str] = &[
    "os.system(",
    "subprocess.popen",
    "subprocess.call",
    "subprocess.run",
    "exec.command",
    "child_process",
    "eval(",
    "pickle.loads",
    "marshal.loads",
    "yaml.load(",
    "objectinputstream",
    "docker run",
    "docker exec",
    "kubectl ",
    "open(\"/",
    "open('/",
    "os.open(\"/",
    "ioutil.writefile(\"/",
    "os.remove(\"/",
];

/// Network-request primitives; blocked unless requests are allowed for the
/// execution (process flag, context flag, or a tool-calling route).
const NETWORK_CODE: &[&str] = &[
    "requests.get",
    "requests.post",
    "urllib.request",
    "http.client",
    "net/http",
    "http.get(",
    "fetch(",
    "socket.socket",
    "net.dial",
];

/// First destructive or adult-content phrase found in request text, if any.
pub fn scan_request_text(task_name: &str, description: &str) -> Option<String> {
    let haystack = format!("{} {}", task_name, description).to_lowercase();
    find_first(&haystack, DESTRUCTIVE_INTENT).or_else(|| find_first(&haystack, ADULT_CONTENT))
}

/// Scan the sensitive context fields with the same intent lists.
pub fn scan_context_fields(context: &crate::context::TaskContext) -> Option<String> {
    for field in SENSITIVE_CONTEXT_FIELDS {
        if let Some(value) = context.get(field) {
            let lowered = value.to_lowercase();
            if let Some(hit) =
                find_first(&lowered, DESTRUCTIVE_INTENT).or_else(|| find_first(&lowered, ADULT_CONTENT))
            {
                return Some(format!("{} (context field '{}')", hit, field));
            }
        }
    }
    None
}

/// First forbidden construct found in generated code, if any. Network
/// primitives are checked only when `network_allowed` is false.
pub fn scan_code(code: &str, network_allowed: bool) -> Option<String> {
    let lowered = code.to_lowercase();
    if let Some(hit) = find_first(&lowered, FORBIDDEN_CODE) {
        return Some(hit);
    }
    if !network_allowed {
        if let Some(hit) = find_first(&lowered, NETWORK_CODE) {
            return Some(format!("{} (network requests not permitted)", hit));
        }
    }
    None
}

fn find_first(haystack: &str, needles: &[&str]) -> Option<String> {
    needles
        .iter()
        .find(|needle| haystack.contains(**needle))
        .map(|needle| needle.to_string())
}
