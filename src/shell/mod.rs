//! Shell execution and process management module.
//!
//! This module spawns a command through the host shell, frames the child's
//! stdout and stderr into lines, and guarantees the process and its pipe
//! readers are torn down on every exit path.

mod framing;
mod platform;
mod process;
mod reader;


pub use framing::{LineEvent, STDERR_PREFIX, StreamOrigin, strip_ansi_codes};
pub use platform::{FALLBACK_POSIX_SHELL, ShellInvocation, resolve_posix_shell};
pub use reader::{ReaderState, ShellReader};
