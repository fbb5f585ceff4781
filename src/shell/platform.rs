//! Host shell resolution.
//!
//! The interpreter is picked from the host platform alone: `cmd /C` on
//! Windows, `$SHELL -c` (falling back to `/bin/sh`) everywhere else. The
//! caller's command string is passed through untouched.

use std::ffi::{OsStr, OsString};

/// Fallback interpreter when `$SHELL` is unset or empty.
pub const FALLBACK_POSIX_SHELL: &str = "/bin/sh";

/// A resolved program + argument vector ready to be spawned.
///
/// On Windows the command itself is kept apart from `args` and appended
/// unquoted, since cmd.exe does its own parsing and does not understand the
/// `\"` escaping std applies to ordinary arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellInvocation {
    program: OsString,
    args: Vec<OsString>,
    raw_arg: Option<OsString>,
}

impl ShellInvocation {
    /// Wraps `command` in the host platform's shell.
    pub fn for_command(command: &str) -> Self {
        if cfg!(windows) {
            let mut invocation = Self::new("cmd", ["/C"]);
            invocation.raw_arg = Some(command.into());
            invocation
        } else {
            let shell = resolve_posix_shell(std::env::var("SHELL").ok());
            Self::new(shell, ["-c", command])
        }
    }

    pub(crate) fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            raw_arg: None,
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Trailing argument passed without any quoting (Windows only).
    pub fn raw_arg(&self) -> Option<&OsStr> {
        self.raw_arg.as_deref()
    }

    /// Builds the tokio command. Stdio wiring is left to the caller.
    pub(crate) fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(raw) = &self.raw_arg {
            #[cfg(windows)]
            cmd.raw_arg(raw);
            #[cfg(not(windows))]
            cmd.arg(raw);
        }
        cmd
    }
}

/// Picks the POSIX interpreter from a `$SHELL` value.
pub fn resolve_posix_shell(env_value: Option<String>) -> String {
    match env_value {
        Some(shell) if !shell.trim().is_empty() => shell,
        _ => FALLBACK_POSIX_SHELL.to_string(),
    }
}
