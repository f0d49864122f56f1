//! Job runners
//!
//! One pipeline runner and one import runner exist process-wide; each owns
//! a single in-flight background job, rejects concurrent starts, and stops
//! cooperatively between items.

pub mod import;
pub mod pipeline;

use thiserror::Error;

/// Status errors are bounded to the most recent entries
pub const ERROR_RING: usize = 10;

/// Runner start failure
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A job is already in flight (HTTP 409)
    #[error("{0}")]
    Busy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Push onto a bounded error ring, dropping the oldest entry when full
pub(crate) fn push_error(errors: &mut Vec<String>, message: String) {
    if errors.len() >= ERROR_RING {
        errors.remove(0);
    }
    errors.push(message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_ring_keeps_the_last_ten() {
        let mut errors = Vec::new();
        for i in 0..15 {
            push_error(&mut errors, format!("e{i}"));
        }
        assert_eq!(errors.len(), ERROR_RING);
        assert_eq!(errors.first().unwrap(), "e5");
        assert_eq!(errors.last().unwrap(), "e14");
    }
}
