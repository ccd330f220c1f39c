// Error types
//
// Task failures are reported only on the failing task's future, so
// `TaskError` is cheap to clone: every holder of the future gets a copy.

use thiserror::Error;

/// Error delivered through a [`TaskFuture`](crate::scheduling::TaskFuture).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task body panicked while executing.
    #[error("task {id} panicked while executing: {reason}")]
    Panicked { id: String, reason: String },

    /// The task gave up and reported a permanent failure.
    #[error("task {id} abandoned: {reason}")]
    Abandoned { id: String, reason: String },

    /// The execution unit was cancelled before the body finished
    /// (runtime shutting down).
    #[error("task {id} aborted before completion")]
    Aborted { id: String },
}

impl TaskError {
    /// Identity of the task that produced this error.
    pub fn task_id(&self) -> &str {
        match self {
            TaskError::Panicked { id, .. }
            | TaskError::Abandoned { id, .. }
            | TaskError::Aborted { id } => id,
        }
    }
}

/// Configuration parsing errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::Panicked {
            id: "task-1".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "task task-1 panicked while executing: boom");
        assert_eq!(err.task_id(), "task-1");
    }

    #[test]
    fn test_abandoned_and_aborted_carry_id() {
        let abandoned = TaskError::Abandoned {
            id: "a".to_string(),
            reason: "too many retries".to_string(),
        };
        let aborted = TaskError::Aborted { id: "b".to_string() };
        assert_eq!(abandoned.task_id(), "a");
        assert_eq!(aborted.task_id(), "b");
        assert!(abandoned.to_string().contains("too many retries"));
    }
}
