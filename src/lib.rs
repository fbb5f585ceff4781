//! shell-reader - stream a shell command's output line by line
//!
//! This library runs a command through the host shell and hands its output
//! back as it is produced:
//! - stdout and stderr are read concurrently and merged in arrival order
//! - stderr lines are tagged with a `[stderr] ` prefix
//! - an optional timeout bounds the whole run
//! - the child process and its pipe readers are always torn down, whether
//!   the output ran out, the deadline passed or the caller stopped early
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shell_reader::ShellReader;
//!
//! #[tokio::main]
//! async fn main() -> shell_reader::Result<()> {
//!     let reader = ShellReader::new("echo hi; echo oops >&2", Some(Duration::from_secs(10)))?;
//!
//!     let lines = reader.collect_lines().await?;
//!     assert_eq!(lines, vec!["hi", "[stderr] oops"]);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod shell;
pub mod utils;

// Re-export commonly used types
pub use config::{ReaderConfig, TimeoutMode};
pub use error::{Result, ShellError};
pub use shell::{LineEvent, ReaderState, ShellReader, StreamOrigin};
