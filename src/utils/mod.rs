//! Utility modules for common functionality.
//!
//! Currently only the logging setup used by the `shell-reader` binary.

pub mod logger;
