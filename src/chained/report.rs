//! Result shaping for chained executions: the performance comparison report
//! and the JSON extractor used for inter-program data flow.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ProgramTiming;
use crate::util::{extract_json_array, extract_json_object};

static COMPARISON_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(compare|comparison|performance|faster|slower|benchmark|timing)\b").unwrap()
});

/// KEY=value lines, as produced by environment dumps in sandbox transcripts.
static ENV_DUMP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=\S*$").unwrap());

/// Whether the request wants a performance/timing comparison report.
pub fn is_comparison_request(description: &str) -> bool {
    COMPARISON_MARKERS.is_match(description)
}

/// Extract the first well-formed JSON object or array from program output,
/// after stripping environment-variable dumps and remote-shell banners that
/// SSH transports prepend.
pub fn extract_json_output(stdout: &str) -> Option<String> {
    let cleaned: String = stdout
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !ENV_DUMP_LINE.is_match(trimmed) && !is_banner_line(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n");

    extract_json_object(&cleaned)
        .or_else(|| extract_json_array(&cleaned))
        .map(|value| value.to_string())
}

fn is_banner_line(line: &str) -> bool {
    let lowered = line.to_lowercase();
    lowered.starts_with("warning:")
        || lowered.starts_with("welcome to")
        || lowered.starts_with("last login")
        || lowered.contains("pseudo-terminal")
}

/// One program's contribution to the report.
pub struct ProgramReportEntry<'a> {
    pub timing: &'a ProgramTiming,
    pub output: &'a str,
}

/// Render the plain-text comparison report: per-program durations in both
/// milliseconds and nanoseconds, a percent-faster line for the first two
/// programs, and every program's output.
pub fn synthesize_report(entries: &[ProgramReportEntry<'_>]) -> String {
    let mut report = String::from("PERFORMANCE COMPARISON REPORT\n");
    report.push_str("=============================\n\n");

    for entry in entries {
        let timing = entry.timing;
        let effective = timing.effective();
        let nanos = effective.as_nanos();
        let millis = nanos as f64 / 1_000_000.0;
        let source = if timing.using_extracted_time {
            "algorithm time reported by the program"
        } else {
            "total execution time (no timing token in output)"
        };
        report.push_str(&format!(
            "{} ({}): {:.3} ms ({} ns) [{}]{}\n",
            timing.program_name,
            timing.language,
            millis,
            nanos,
            source,
            if timing.success { "" } else { " [FAILED]" },
        ));
    }

    if entries.len() >= 2 {
        report.push('\n');
        report.push_str(&comparison_line(entries[0].timing, entries[1].timing));
        report.push('\n');
    }

    report.push_str("\nPROGRAM OUTPUT\n--------------\n");
    for entry in entries {
        report.push_str(&format!(
            "\n[{}]\n{}\n",
            entry.timing.program_name,
            if entry.output.trim().is_empty() {
                "(no output)"
            } else {
                entry.output.trim_end()
            }
        ));
    }

    report
}

/// Percent-faster comparison between the first two programs, computed in
/// nanoseconds so sub-millisecond timings keep their precision.
fn comparison_line(first: &ProgramTiming, second: &ProgramTiming) -> String {
    if !first.success || !second.success {
        return "Comparison unavailable: not all programs completed successfully.".to_string();
    }
    let first_ns = first.effective().as_nanos() as f64;
    let second_ns = second.effective().as_nanos() as f64;
    if first_ns <= 0.0 || second_ns <= 0.0 {
        return "Comparison unavailable: a measured duration was zero.".to_string();
    }
    if (first_ns - second_ns).abs() < f64::EPSILON {
        return format!(
            "{} and {} ran in the same time.",
            first.program_name, second.program_name
        );
    }
    let (faster, slower, faster_ns, slower_ns) = if first_ns < second_ns {
        (first, second, first_ns, second_ns)
    } else {
        (second, first, second_ns, first_ns)
    };
    let percent = (slower_ns - faster_ns) / slower_ns * 100.0;
    format!(
        "{} ({}) was {:.1}% faster than {} ({}).",
        faster.program_name, faster.language, percent, slower.program_name, slower.language
    )
}
