//! Timing-token extraction from program output.
//!
//! Programs in a performance comparison are asked to print how long their
//! algorithm took. This module pulls those tokens back out of stdout so the
//! report can distinguish algorithm time from total sandbox wall-clock.
//! Extraction is a pure function of the text: identical stdout always yields
//! the identical duration, and when several tokens appear the last one wins.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::constants::MIN_EXTRACTED_TIMING_NS;

/// A timing keyword followed by a duration literal. The literal may be a
/// Go-style compound ("9m30s", "1m2.5s") or a single component ("123ns",
/// "0.12s"). Unit alternation is ordered so "ms" is never read as "m".
static TIMING_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:took|execution time|elapsed|duration|algorithm time|time)[:=\s]+((?:\d+(?:\.\d+)?(?:ns|µs|us|ms|s|m|h))+)",
    )
    .unwrap()
});

static COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|µs|us|ms|s|m|h)").unwrap());

/// Extract the algorithmic duration a program reported in its own output.
///
/// Tokens below the noise floor are ignored; among the rest the last token
/// in the text wins.
pub fn extract_timing(stdout: &str) -> Option<Duration> {
    let mut result = None;
    for captures in TIMING_TOKEN.captures_iter(stdout) {
        if let Some(duration) = parse_duration_literal(&captures[1]) {
            if duration.as_nanos() >= MIN_EXTRACTED_TIMING_NS {
                result = Some(duration);
            }
        }
    }
    result
}

/// Parse a (possibly compound) duration literal into nanoseconds.
fn parse_duration_literal(literal: &str) -> Option<Duration> {
    let mut total_ns = 0.0f64;
    let mut matched = false;
    for captures in COMPONENT.captures_iter(literal) {
        let value: f64 = captures[1].parse().ok()?;
        let scale = match &captures[2] {
            "ns" => 1.0,
            "µs" | "us" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return None,
        };
        total_ns += value * scale;
        matched = true;
    }
    if !matched {
        return None;
    }
    Some(Duration::from_nanos(total_ns.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_nanosecond_token() {
        let d = extract_timing("sorting took: 12345ns").unwrap();
        assert_eq!(d, Duration::from_nanos(12_345));
    }

    #[test]
    fn fractional_seconds() {
        let d = extract_timing("Execution time: 0.12s").unwrap();
        assert_eq!(d, Duration::from_millis(120));
    }

    #[test]
    fn go_compound_duration() {
        let d = extract_timing("run finished, took 9m30s total").unwrap();
        assert_eq!(d, Duration::from_secs(570));
    }

    #[test]
    fn compound_with_fractional_tail() {
        let d = extract_timing("elapsed: 1m2.5s").unwrap();
        assert_eq!(d, Duration::from_millis(62_500));
    }

    #[test]
    fn last_token_wins() {
        let stdout = "warmup took: 5ms\nsorted 10000 items\nsort took: 2ms";
        assert_eq!(extract_timing(stdout), Some(Duration::from_millis(2)));
    }

    #[test]
    fn sub_threshold_tokens_are_noise() {
        assert_eq!(extract_timing("took: 50ns"), None);
        // A noise token after a real one does not erase it.
        let stdout = "took: 3ms\noverhead took: 10ns";
        assert_eq!(extract_timing(stdout), Some(Duration::from_millis(3)));
    }

    #[test]
    fn extraction_is_idempotent() {
        let stdout = "phase one took: 7ms\nphase two took: 9ms";
        let first = extract_timing(stdout);
        let second = extract_timing(stdout);
        assert_eq!(first, second);
        assert_eq!(first, Some(Duration::from_millis(9)));
    }

    #[test]
    fn text_without_tokens_yields_none() {
        assert_eq!(extract_timing("all done, no timing here"), None);
    }

    #[test]
    fn milliseconds_are_not_read_as_minutes() {
        let d = extract_timing("took: 250ms").unwrap();
        assert_eq!(d, Duration::from_millis(250));
    }
}
