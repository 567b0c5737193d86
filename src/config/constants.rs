//! Centralized tunables for the execution engine.
//!
//! Everything time- or threshold-shaped lives here so behavior can be audited
//! in one place instead of being scattered through the orchestration code.

use std::time::Duration;

/// Default number of generate/repair attempts per request.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Default wall-clock limit for a single sandbox execution.
pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound for sandbox executions on the validation path. Heavy candidate
/// code (matrix benchmarks, large loops) gets more room than production runs.
pub const VALIDATION_SANDBOX_CEILING: Duration = Duration::from_secs(600);

/// Timeout for short classification-style model calls.
pub const CLASSIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for generation and repair model calls.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(90);

/// Timeout for individual tool invocations.
pub const TOOL_INVOKE_TIMEOUT: Duration = Duration::from_secs(15);

/// General duplicate-invocation suppression window.
pub const LOOP_WINDOW: Duration = Duration::from_secs(5);

/// Elapsed time a `force_regenerate` request must exceed before the loop
/// protector lets it through early.
pub const FORCE_REGENERATE_WINDOW: Duration = Duration::from_secs(10);

/// Suppression window for the closed set of trivial repetitive tasks.
pub const TRIVIAL_TASK_WINDOW: Duration = Duration::from_secs(60);

/// Loop-protector entries older than this are swept on entry.
pub const LOOP_SWEEP_HORIZON: Duration = Duration::from_secs(300);

/// TTL for learning-store records.
pub const LEARNING_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Exponential-moving-average weight for strategy statistics.
pub const STRATEGY_EMA_ALPHA: f64 = 0.1;

/// Minimum observations before a failure pattern feeds prompt hints.
pub const HINT_MIN_FREQUENCY: u64 = 2;

/// Strategy descriptors below this success rate are not surfaced in prompts.
pub const STRATEGY_MIN_SUCCESS_RATE: f64 = 0.7;

/// Strategy descriptors below this usage count are not surfaced in prompts.
pub const STRATEGY_MIN_USAGE: u64 = 3;

/// Key-overlap ratio required for mathematical-task cache compatibility.
pub const MATH_OVERLAP_THRESHOLD: f64 = 0.8;

/// Key-overlap ratio required for string-task cache compatibility.
pub const STRING_OVERLAP_THRESHOLD: f64 = 0.9;

/// Key-overlap ratio for the structural cache fallback.
pub const STRUCTURAL_OVERLAP_THRESHOLD: f64 = 0.7;

/// Confidence reported when only shared numeric parameter names matched.
pub const NUMERIC_FALLBACK_CONFIDENCE: f64 = 0.8;

/// Bodies fetched during web aggregation are truncated to this many bytes.
pub const WEB_BODY_LIMIT: usize = 512;

/// Descriptions shorter than this with no action verbs are acknowledged
/// without code generation.
pub const INFORMATIONAL_MAX_CHARS: usize = 200;

/// Smallest artifact the tool promoter will consider generalizable.
pub const MIN_PROMOTABLE_LEN: usize = 200;

/// Extracted algorithm timings below this are treated as noise and ignored.
pub const MIN_EXTRACTED_TIMING_NS: u128 = 100;

/// Default tool API base when `HDN_URL` is unset.
pub const DEFAULT_TOOL_API_BASE: &str = "http://localhost:8080";

/// Host generated code uses to reach the tool API from inside a container.
pub const CONTAINER_INTERNAL_HOST: &str = "host.docker.internal";

/// Context keys that carry plumbing rather than task parameters. They are
/// stripped before prompting and before schema inference.
pub const ADMIN_CONTEXT_KEYS: &[&str] = &[
    "session_id",
    "project_id",
    "artifact_names",
    "save_code_filename",
    "force_regenerate",
    "artifacts_wrapper",
];

/// Verbs whose presence in a description means the task is expected to
/// produce output; empty stdout then counts as a validation failure.
pub const OUTPUT_EXPECTING_MARKERS: &[&str] = &[
    "print",
    "output",
    "result",
    "calculate",
    "generate",
    "return",
    "prime",
    "statistic",
    "matrix",
];

/// Task-name markers that select the mathematical cache-compatibility rules.
pub const MATH_TASK_MARKERS: &[&str] = &[
    "prime",
    "matrix",
    "statistics",
    "calculate",
    "compute",
    "math",
    "number",
    "sum",
    "multiply",
    "divide",
    "add",
    "subtract",
];

/// Task-name markers that select the string cache-compatibility rules.
pub const STRING_TASK_MARKERS: &[&str] = &[
    "text", "string", "parse", "format", "replace", "split", "join", "search", "find",
];

/// Context parameters that must agree for mathematical-task cache hits.
pub const CRITICAL_MATH_PARAMS: &[&str] = &["operation", "method", "type", "mode", "algorithm"];

/// Parameter names checked by the numeric-presence cache fallback.
pub const NUMERIC_PARAM_NAMES: &[&str] = &[
    "count", "number", "size", "length", "input", "value", "n", "limit", "max", "min",
];

/// Descriptions matching any of these are suppressed for a full minute when
/// repeated; they are cheap tasks that tend to arrive in tight loops.
pub const TRIVIAL_TASK_PATTERNS: &[&str] = &[
    "create example.txt",
    "list current directory",
    "print hello world",
    "show current time",
];

/// Well-known tool identifiers the route classifier can short-circuit to.
pub mod tools {
    pub const HTTP_GET: &str = "tool_http_get";
    pub const HTML_SCRAPER: &str = "tool_html_scraper";
    pub const LIST_DIR: &str = "tool_ls";
    pub const FILE_READ: &str = "tool_file_read";
    pub const FILE_WRITE: &str = "tool_file_write";
    pub const EXEC: &str = "tool_exec";
    pub const KNOWLEDGE_QUERY: &str = "tool_knowledge_query";

    /// Identifiers eligible for the explicit-tool short circuit.
    pub const SHORT_CIRCUIT: &[&str] = &[
        HTTP_GET,
        HTML_SCRAPER,
        LIST_DIR,
        FILE_READ,
        FILE_WRITE,
        EXEC,
    ];
}
