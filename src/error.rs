//! Error types for shell execution.
//!
//! Only conditions the caller must react to are errors. Undecodable output is
//! replaced in-line and failures while tearing a process down are logged and
//! swallowed, so neither ever shows up here.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::shell::StreamOrigin;

/// Errors surfaced by [`ShellReader`](crate::ShellReader).
#[derive(Debug, Error)]
pub enum ShellError {
    /// The command string was empty or only whitespace.
    #[error("refusing to run an empty command")]
    EmptyCommand,

    /// The platform shell could not be launched.
    #[error("failed to spawn shell for `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// A pipe requested at spawn time was not handed back by the OS layer.
    #[error("child process has no {stream} pipe")]
    MissingPipe { stream: StreamOrigin },

    /// The command did not finish before its deadline. Cleanup has already
    /// run by the time this is returned.
    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl ShellError {
    /// Returns true for the timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShellError::Timeout { .. })
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_keeps_os_cause() {
        let err = ShellError::Spawn {
            command: "echo hi".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };

        let message = err.to_string();
        assert!(message.contains("echo hi"));
        assert!(message.contains("no such file"));

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "no such file");
    }

    #[test]
    fn test_timeout_classification() {
        let err = ShellError::Timeout {
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "command timed out after 1s");

        assert!(!ShellError::EmptyCommand.is_timeout());
    }

    #[test]
    fn test_missing_pipe_names_stream() {
        let err = ShellError::MissingPipe {
            stream: StreamOrigin::Stderr,
        };
        assert_eq!(err.to_string(), "child process has no stderr pipe");
    }
}
