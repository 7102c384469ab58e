// Failure classification for agent executions

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, OnceLock};

use crate::utils::{lock_mutex_recover, now_ms};

/// Known failure patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    RateLimit,
    PlanStuck,
    Timeout,
    Auth,
    BuildFailure,
    TestFailure,
    Unknown,
}

impl ErrorPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPattern::RateLimit => "rate_limit",
            ErrorPattern::PlanStuck => "plan_stuck",
            ErrorPattern::Timeout => "timeout",
            ErrorPattern::Auth => "auth",
            ErrorPattern::BuildFailure => "build_failure",
            ErrorPattern::TestFailure => "test_failure",
            ErrorPattern::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub pattern: ErrorPattern,
    /// 0.0 - 1.0
    pub confidence: f32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            pattern: ErrorPattern::Unknown,
            confidence: 0.0,
        }
    }
}

/// What the executor should do after recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Handle the failure locally (cooldown the task, retry later)
    Retry,
    /// The failure is systemic; stop dispatching for a while
    PauseExecutor,
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, output: &str, error: Option<&str>) -> Classification;

    fn record_error(&self, task_id: &str, classification: &Classification) -> RecoveryAction;
}

struct CompiledPattern {
    regex: Regex,
    pattern: ErrorPattern,
}

static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();

// Checked in order, first match wins
fn get_patterns() -> &'static Vec<CompiledPattern> {
    PATTERNS.get_or_init(|| {
        let compile = |re: &str, pattern: ErrorPattern| CompiledPattern {
            regex: Regex::new(re).unwrap(),
            pattern,
        };
        vec![
            // Word boundary keeps ids like "ses_429f..." from matching
            compile(r"(?i)\b429\b", ErrorPattern::RateLimit),
            compile(r"(?i)rate[_\-\s]?limit(ed|ing)?", ErrorPattern::RateLimit),
            compile(r"(?i)too\s+many\s+requests", ErrorPattern::RateLimit),
            compile(r"(?i)(quota|usage)\s+(exceeded|limit|reached)", ErrorPattern::RateLimit),
            compile(r"(?i)overloaded|high\s+concurrency", ErrorPattern::RateLimit),
            compile(
                r"(?i)unauthori[sz]ed|\b401\b|invalid\s+(api\s+)?key|authentication\s+(failed|error|required)|not\s+logged\s+in|please\s+(log|sign)\s*in",
                ErrorPattern::Auth,
            ),
            compile(
                r"(?i)timed?\s*out|\btimeout\b|deadline\s+exceeded|etimedout",
                ErrorPattern::Timeout,
            ),
            compile(
                r"(?i)plan(ning)?\s+(loop|stuck)|stuck\s+in\s+(a\s+)?(plan(ning)?|loop)|exit_?plan_?mode|same\s+plan\s+again|no\s+progress\s+(was\s+)?made",
                ErrorPattern::PlanStuck,
            ),
            compile(
                r"(?i)error\[E\d{4}\]|compilation\s+failed|build\s+failed|could\s+not\s+compile|cannot\s+find\s+module|syntaxerror|error\s+TS\d+",
                ErrorPattern::BuildFailure,
            ),
            compile(
                r"(?i)tests?\s+failed|\b\d+\s+failed\b|assertion(error|\s+failed)|test\s+result:\s+failed",
                ErrorPattern::TestFailure,
            ),
        ]
    })
}

fn match_pattern(text: &str) -> Option<ErrorPattern> {
    get_patterns()
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.pattern)
}

/// Regex classifier with systemic rate-limit detection.
///
/// `record_error` asks for an executor pause once rate-limit failures have
/// been seen for `distinct_task_threshold` different tasks within `window_ms`.
pub struct PatternClassifier {
    window_ms: i64,
    distinct_task_threshold: usize,
    rate_limit_hits: Mutex<VecDeque<(String, i64)>>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::with_window(2 * 60 * 1000, 2)
    }

    pub fn with_window(window_ms: i64, distinct_task_threshold: usize) -> Self {
        Self {
            window_ms,
            distinct_task_threshold: distinct_task_threshold.max(1),
            rate_limit_hits: Mutex::new(VecDeque::new()),
        }
    }

    /// `record_error` with an explicit clock
    pub fn record_error_at(
        &self,
        task_id: &str,
        classification: &Classification,
        at_ms: i64,
    ) -> RecoveryAction {
        if classification.pattern != ErrorPattern::RateLimit {
            return RecoveryAction::Retry;
        }

        let mut hits = lock_mutex_recover(&self.rate_limit_hits);
        hits.push_back((task_id.to_string(), at_ms));
        while hits
            .front()
            .map_or(false, |(_, t)| at_ms - *t > self.window_ms)
        {
            hits.pop_front();
        }

        let distinct: HashSet<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        if distinct.len() >= self.distinct_task_threshold {
            log::warn!(
                "[ErrorClassifier] Rate limits across {} tasks within {}ms, pausing executor",
                distinct.len(),
                self.window_ms
            );
            hits.clear();
            RecoveryAction::PauseExecutor
        } else {
            RecoveryAction::Retry
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, output: &str, error: Option<&str>) -> Classification {
        if let Some(pattern) = error.and_then(match_pattern) {
            return Classification {
                pattern,
                confidence: 0.9,
            };
        }
        // Agent transcripts are noisy, so matches there count for less
        if let Some(pattern) = match_pattern(output) {
            return Classification {
                pattern,
                confidence: 0.6,
            };
        }
        Classification::unknown()
    }

    fn record_error(&self, task_id: &str, classification: &Classification) -> RecoveryAction {
        self.record_error_at(task_id, classification, now_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: &str) -> ErrorPattern {
        PatternClassifier::new().classify("", Some(error)).pattern
    }

    #[test]
    fn test_classify_patterns() {
        assert_eq!(classify("Error: 429 Too Many Requests"), ErrorPattern::RateLimit);
        assert_eq!(classify("API Error: rate-limit exceeded"), ErrorPattern::RateLimit);
        assert_eq!(classify("Usage limit reached for today"), ErrorPattern::RateLimit);
        assert_eq!(classify("401 Unauthorized"), ErrorPattern::Auth);
        assert_eq!(classify("agent timed out after 1800s"), ErrorPattern::Timeout);
        assert_eq!(classify("agent stuck in planning loop"), ErrorPattern::PlanStuck);
        assert_eq!(classify("error[E0308]: mismatched types"), ErrorPattern::BuildFailure);
        assert_eq!(classify("test result: FAILED. 3 passed; 1 failed"), ErrorPattern::TestFailure);
        assert_eq!(classify("something odd happened"), ErrorPattern::Unknown);
    }

    #[test]
    fn test_session_id_is_not_a_rate_limit() {
        assert_eq!(classify("session ses_429f18024ffe crashed"), ErrorPattern::Unknown);
    }

    #[test]
    fn test_error_text_outranks_output() {
        let classifier = PatternClassifier::new();
        let from_error = classifier.classify("", Some("rate limited"));
        let from_output = classifier.classify("rate limited", None);
        assert_eq!(from_error.pattern, ErrorPattern::RateLimit);
        assert_eq!(from_output.pattern, ErrorPattern::RateLimit);
        assert!(from_error.confidence > from_output.confidence);
        assert_eq!(classifier.classify("", None).confidence, 0.0);
    }

    #[test]
    fn test_rate_limit_pause_needs_distinct_tasks() {
        let classifier = PatternClassifier::with_window(60_000, 2);
        let rate_limit = Classification {
            pattern: ErrorPattern::RateLimit,
            confidence: 0.9,
        };

        assert_eq!(classifier.record_error_at("a", &rate_limit, 0), RecoveryAction::Retry);
        assert_eq!(classifier.record_error_at("a", &rate_limit, 1_000), RecoveryAction::Retry);
        assert_eq!(
            classifier.record_error_at("b", &rate_limit, 2_000),
            RecoveryAction::PauseExecutor
        );
        // History cleared after a pause
        assert_eq!(classifier.record_error_at("c", &rate_limit, 3_000), RecoveryAction::Retry);
    }

    #[test]
    fn test_rate_limit_window_expires() {
        let classifier = PatternClassifier::with_window(10_000, 2);
        let rate_limit = Classification {
            pattern: ErrorPattern::RateLimit,
            confidence: 0.9,
        };
        classifier.record_error_at("a", &rate_limit, 0);
        assert_eq!(classifier.record_error_at("b", &rate_limit, 20_000), RecoveryAction::Retry);
    }

    #[test]
    fn test_other_patterns_never_pause() {
        let classifier = PatternClassifier::with_window(60_000, 1);
        let build = Classification {
            pattern: ErrorPattern::BuildFailure,
            confidence: 0.9,
        };
        assert_eq!(classifier.record_error("a", &build), RecoveryAction::Retry);
    }
}
