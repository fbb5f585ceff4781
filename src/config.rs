//! Reader configuration.
//!
//! Everything here has a sensible default; callers normally only touch the
//! timeout.

use std::time::Duration;

/// Grace period between the polite terminate signal and the force kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Capacity of the line channel shared by the stdout and stderr readers.
pub const DEFAULT_LINE_BUFFER: usize = 1024;

/// How the configured timeout is measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutMode {
    /// One deadline measured from reader construction. Progress does not
    /// extend it.
    #[default]
    Overall,
    /// The deadline restarts every time a line is delivered.
    Idle,
}

#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// `None` waits forever. `Some(Duration::ZERO)` expires immediately.
    pub timeout: Option<Duration>,
    pub timeout_mode: TimeoutMode,
    /// Remove ANSI escape sequences and stray carriage returns from lines.
    pub strip_ansi: bool,
    /// How long cleanup waits after SIGTERM before escalating to SIGKILL.
    pub kill_grace: Duration,
    pub line_buffer: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            timeout_mode: TimeoutMode::Overall,
            strip_ansi: false,
            kill_grace: DEFAULT_KILL_GRACE,
            line_buffer: DEFAULT_LINE_BUFFER,
        }
    }
}

impl ReaderConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_mode(mut self, mode: TimeoutMode) -> Self {
        self.timeout_mode = mode;
        self
    }

    pub fn with_strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Sets the line channel capacity. Zero is bumped to one, since tokio
    /// channels cannot be unbuffered.
    pub fn with_line_buffer(mut self, capacity: usize) -> Self {
        self.line_buffer = capacity.max(1);
        self
    }
}
