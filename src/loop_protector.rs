//! Short-window deduplication of identical task invocations.
//!
//! Protects the traditional path from tight request loops: an identical
//! `task_name:description` pair arriving within the suppression window is
//! rejected before any model or sandbox call happens. A separate one-minute
//! filter suppresses a closed set of trivial tasks that tend to arrive in
//! bursts. The chained engine bypasses this entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::constants::{
    FORCE_REGENERATE_WINDOW, LOOP_SWEEP_HORIZON, LOOP_WINDOW, TRIVIAL_TASK_PATTERNS,
    TRIVIAL_TASK_WINDOW,
};

/// Why an invocation was suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopVerdict {
    Proceed,
    /// Identical invocation seen within the general window.
    DuplicateWithinWindow { elapsed: Duration },
    /// A known-trivial task repeated within the one-minute window.
    TrivialRepetition { pattern: String },
}

pub struct LoopProtector {
    entries: Mutex<HashMap<String, Instant>>,
}

impl LoopProtector {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record one invocation. The read-then-write update and the
    /// opportunistic sweep happen under a single lock.
    pub fn check(
        &self,
        task_name: &str,
        description: &str,
        force_regenerate: bool,
    ) -> LoopVerdict {
        let key = format!("{}:{}", task_name, description);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.retain(|_, last| now.duration_since(*last) < LOOP_SWEEP_HORIZON);

        if let Some(last) = entries.get(&key) {
            let elapsed = now.duration_since(*last);

            if let Some(pattern) = trivial_pattern(description) {
                if elapsed < TRIVIAL_TASK_WINDOW {
                    debug!(task = task_name, pattern, "trivial repetition suppressed");
                    return LoopVerdict::TrivialRepetition {
                        pattern: pattern.to_string(),
                    };
                }
            }

            let exempt = force_regenerate && elapsed > FORCE_REGENERATE_WINDOW;
            if elapsed < LOOP_WINDOW && !exempt {
                debug!(task = task_name, ?elapsed, "duplicate invocation suppressed");
                return LoopVerdict::DuplicateWithinWindow { elapsed };
            }
        }

        entries.insert(key, now);
        LoopVerdict::Proceed
    }
}

impl Default for LoopProtector {
    fn default() -> Self {
        Self::new()
    }
}

fn trivial_pattern(description: &str) -> Option<&'static str> {
    let lowered = description.to_lowercase();
    TRIVIAL_TASK_PATTERNS
        .iter()
        .find(|pattern| lowered.contains(**pattern))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_duplicate_is_suppressed() {
        let protector = LoopProtector::new();
        assert_eq!(
            protector.check("Sum", "sum the numbers", false),
            LoopVerdict::Proceed
        );
        assert!(matches!(
            protector.check("Sum", "sum the numbers", false),
            LoopVerdict::DuplicateWithinWindow { .. }
        ));
    }

    #[test]
    fn different_descriptions_do_not_collide() {
        let protector = LoopProtector::new();
        assert_eq!(
            protector.check("Sum", "sum the numbers", false),
            LoopVerdict::Proceed
        );
        assert_eq!(
            protector.check("Sum", "sum the squares", false),
            LoopVerdict::Proceed
        );
    }

    #[test]
    fn trivial_task_uses_the_long_window() {
        let protector = LoopProtector::new();
        assert_eq!(
            protector.check("fs", "create example.txt in the workspace", false),
            LoopVerdict::Proceed
        );
        assert!(matches!(
            protector.check("fs", "create example.txt in the workspace", false),
            LoopVerdict::TrivialRepetition { .. }
        ));
    }

    #[test]
    fn force_regenerate_does_not_bypass_the_short_window() {
        let protector = LoopProtector::new();
        protector.check("Sum", "sum the numbers", true);
        assert!(matches!(
            protector.check("Sum", "sum the numbers", true),
            LoopVerdict::DuplicateWithinWindow { .. }
        ));
    }

    #[test]
    fn first_sight_of_trivial_task_proceeds() {
        let protector = LoopProtector::new();
        assert_eq!(
            protector.check("fs", "list current directory", false),
            LoopVerdict::Proceed
        );
    }
}
