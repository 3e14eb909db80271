//! Input size heuristics for complexity estimation
//!
//! The size of a test case is not known to the judge, so it is guessed from the
//! raw input payload. The result is an approximation and is never billed.

use serde_json::Value;

/// Strategy deriving an approximate problem size from a raw input payload
pub trait InputSizeEstimator: Send + Sync {
    fn estimate(&self, input: &str) -> u64;
}

/// Default heuristic:
/// - JSON array → element count, JSON string → character count
/// - several whitespace separated tokens → token count
/// - a single integer → number of decimal digits
/// - anything else → character count
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadSizeHeuristic;

impl InputSizeEstimator for PayloadSizeHeuristic {
    fn estimate(&self, input: &str) -> u64 {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return 0;
        }

        if trimmed.starts_with('[') || trimmed.starts_with('"') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => return items.len() as u64,
                Ok(Value::String(s)) => return s.chars().count() as u64,
                _ => {}
            }
        }

        let tokens = trimmed.split_whitespace().count();
        if tokens > 1 {
            return tokens as u64;
        }

        let digits = trimmed.trim_start_matches(['-', '+']);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return digits.len() as u64;
        }

        trimmed.chars().count() as u64
    }
}
