//! Error taxonomy shared by the store, executor and scheduler.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Every failure the runner can surface to a caller.
///
/// Store and setup errors propagate immediately. Per-task errors
/// (`ConnectionUnavailable`, `ExecutionFailed`, `ScriptNotFound` raced
/// by a concurrent delete) are counted by the benchmark scheduler instead
/// of aborting the run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("scripts directory unavailable: {}: {reason}", .path.display())]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("script {0}.sql not found")]
    ScriptNotFound(u32),

    #[error("store I/O error while {action}: {source}")]
    StoreIo {
        action: String,
        #[source]
        source: io::Error,
    },

    #[error("database connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("script {number}.sql failed: {message}")]
    ExecutionFailed { number: u32, message: String },

    #[error("no *.sql scripts found in {}", .0.display())]
    NoScriptsFound(PathBuf),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("worker pool error: {0}")]
    Worker(String),
}

impl RunnerError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn store_io(action: impl Into<String>, source: io::Error) -> Self {
        RunnerError::StoreIo {
            action: action.into(),
            source,
        }
    }

    /// Stable snake_case label, used in logs and per-script error samples.
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerError::StoreUnavailable { .. } => "store_unavailable",
            RunnerError::ScriptNotFound(_) => "script_not_found",
            RunnerError::StoreIo { .. } => "store_io",
            RunnerError::ConnectionUnavailable(_) => "connection_unavailable",
            RunnerError::ExecutionFailed { .. } => "execution_failed",
            RunnerError::NoScriptsFound(_) => "no_scripts_found",
            RunnerError::InvalidRequest(_) => "invalid_request",
            RunnerError::Worker(_) => "worker",
        }
    }

    /// Setup failures end a benchmark run; everything else is per task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerError::StoreUnavailable { .. }
                | RunnerError::NoScriptsFound(_)
                | RunnerError::InvalidRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_script_file() {
        assert_eq!(
            RunnerError::ScriptNotFound(99).to_string(),
            "script 99.sql not found"
        );
        let err = RunnerError::ExecutionFailed {
            number: 3,
            message: "near \"SELEC\": syntax error".to_string(),
        };
        assert!(err.to_string().starts_with("script 3.sql failed"));
    }

    #[test]
    fn store_io_keeps_source() {
        let err = RunnerError::store_io(
            "renaming 3.sql",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), "store_io");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn only_setup_errors_are_terminal() {
        assert!(RunnerError::NoScriptsFound(PathBuf::from("sql")).is_terminal());
        assert!(RunnerError::InvalidRequest("count".into()).is_terminal());
        assert!(!RunnerError::ScriptNotFound(1).is_terminal());
        assert!(!RunnerError::ConnectionUnavailable("timeout".into()).is_terminal());
    }
}
