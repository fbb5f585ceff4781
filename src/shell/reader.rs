//! Streaming shell command runner.
//!
//! A [`ShellReader`] owns one child process from spawn to teardown. Two
//! background tasks frame the child's stdout and stderr into lines and push
//! them into a single bounded channel, so lines come out in the order they
//! were completed across both pipes. The consumer pulls from that channel
//! until both pipes are closed or the deadline passes.
//!
//! Every exit path funnels into [`ShellReader::close`]: natural end of
//! output, timeout, an explicit call after breaking out of a loop, and
//! [`ShellReader::scope`]. `Drop` is only a synchronous backstop for readers
//! that were abandoned without being closed.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures::Stream;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, trace, warn};

use super::framing::{self, LineEvent, StreamOrigin};
use super::platform::ShellInvocation;
use super::process;
use crate::config::{ReaderConfig, TimeoutMode};
use crate::error::{Result, ShellError};

/// Observable lifecycle of a [`ShellReader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Process spawned, pipe readers not started yet.
    Created,
    /// At least one pipe reader is still running.
    Running,
    /// Both pipes hit EOF; buffered lines may remain.
    Draining,
    /// Torn down. Terminal.
    Closed,
}

/// Runs one shell command and yields its output line by line.
///
/// Stdout lines come through verbatim, stderr lines carry a `[stderr] `
/// prefix. Iteration is single pass: once the reader is closed every further
/// call returns `Ok(None)` rather than an error.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use shell_reader::ShellReader;
///
/// # async fn demo() -> shell_reader::Result<()> {
/// let mut reader = ShellReader::new("echo one && echo two >&2", Some(Duration::from_secs(5)))?;
/// while let Some(line) = reader.next_line().await? {
///     println!("{line}");
/// }
/// reader.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ShellReader {
    command: String,
    config: ReaderConfig,
    deadline: Option<Instant>,
    child: Option<Child>,
    pgid: Option<u32>,
    // handed to the reader tasks on first poll
    pipes: Option<(ChildStdout, ChildStderr)>,
    sender: Option<Sender<LineEvent>>,
    lines: Receiver<LineEvent>,
    readers: Vec<JoinHandle<()>>,
    // both pipes hit EOF, so no group member still holds them
    pipes_drained: bool,
    exit_status: Option<ExitStatus>,
    closed: bool,
}

impl ShellReader {
    /// Spawns `command` in the host shell with an optional overall timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        Self::with_config(command, ReaderConfig::default().with_timeout(timeout))
    }

    pub fn with_config(command: impl Into<String>, config: ReaderConfig) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ShellError::EmptyCommand);
        }
        let invocation = ShellInvocation::for_command(&command);
        Self::spawn_invocation(command, invocation, config)
    }

    pub(crate) fn spawn_invocation(
        command: String,
        invocation: ShellInvocation,
        config: ReaderConfig,
    ) -> Result<Self> {
        let mut cmd = invocation.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| ShellError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pgid = child.id();

        // kill_on_drop reaps the child if either pipe is missing
        let stdout = child.stdout.take().ok_or(ShellError::MissingPipe {
            stream: StreamOrigin::Stdout,
        })?;
        let stderr = child.stderr.take().ok_or(ShellError::MissingPipe {
            stream: StreamOrigin::Stderr,
        })?;

        let (sender, lines) = mpsc::channel(config.line_buffer.max(1));
        let deadline = config
            .timeout
            .and_then(|limit| Instant::now().checked_add(limit));

        debug!(
            command = %command,
            shell = ?invocation.program(),
            pid = ?pgid,
            timeout = ?config.timeout,
            "spawned shell command"
        );

        Ok(Self {
            command,
            config,
            deadline,
            child: Some(child),
            pgid,
            pipes: Some((stdout, stderr)),
            sender: Some(sender),
            lines,
            readers: Vec::with_capacity(2),
            pipes_drained: false,
            exit_status: None,
            closed: false,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// OS process id of the shell while it is still owned by this reader.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Exit status collected during cleanup, if the process could be reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn state(&self) -> ReaderState {
        if self.closed {
            ReaderState::Closed
        } else if self.pipes.is_some() {
            ReaderState::Created
        } else if self.readers.iter().all(JoinHandle::is_finished) {
            ReaderState::Draining
        } else {
            ReaderState::Running
        }
    }

    /// Next rendered line, `Ok(None)` once output is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.next_event().await?.map(LineEvent::into_rendered))
    }

    /// Next line with its origin still attached.
    ///
    /// On timeout the reader is closed before the error is returned. Lines
    /// already handed out stay valid.
    pub async fn next_event(&mut self) -> Result<Option<LineEvent>> {
        if self.closed {
            return Ok(None);
        }
        self.start_readers();

        let received = match self.deadline {
            Some(deadline) => match timeout_at(deadline, self.lines.recv()).await {
                Ok(received) => received,
                Err(_) => return Err(self.expire().await),
            },
            None => self.lines.recv().await,
        };

        match received {
            Some(event) => {
                if self.config.timeout_mode == TimeoutMode::Idle {
                    self.deadline = self
                        .config
                        .timeout
                        .and_then(|limit| Instant::now().checked_add(limit));
                }
                Ok(Some(event))
            }
            None => {
                self.pipes_drained = true;
                self.finish().await;
                Ok(None)
            }
        }
    }

    /// The output as a [`Stream`] of rendered lines.
    ///
    /// The stream ends after the first error, since the reader is closed by
    /// then.
    pub fn lines(&mut self) -> impl Stream<Item = Result<String>> + '_ {
        futures::stream::unfold(self, |reader| async move {
            match reader.next_line().await {
                Ok(Some(line)) => Some((Ok(line), reader)),
                Ok(None) => None,
                Err(err) => Some((Err(err), reader)),
            }
        })
    }

    /// Drains every remaining line, then closes.
    pub async fn collect_lines(mut self) -> Result<Vec<String>> {
        let mut collected = Vec::new();
        while let Some(line) = self.next_line().await? {
            collected.push(line);
        }
        self.close().await;
        Ok(collected)
    }

    /// Runs `body` against this reader and closes it afterwards, whatever
    /// `body` returned.
    pub async fn scope<T>(mut self, body: impl AsyncFnOnce(&mut ShellReader) -> T) -> T {
        let output = body(&mut self).await;
        self.close().await;
        output
    }

    /// Tears everything down. Safe to call any number of times.
    ///
    /// Terminates the process group (escalating to a kill after the
    /// configured grace period), then aborts and joins both pipe readers.
    /// Failures along the way are logged and otherwise ignored.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }

        self.pipes = None;
        self.sender = None;

        if let Some(mut child) = self.child.take() {
            let status = process::terminate_then_kill(
                &mut child,
                self.pgid,
                self.config.kill_grace,
                !self.pipes_drained,
            )
            .await;
            if self.exit_status.is_none() {
                self.exit_status = status;
            }
        }

        for handle in self.readers.drain(..) {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => trace!("pipe reader cancelled"),
                Err(err) => debug!(%err, "pipe reader panicked"),
            }
        }

        // lines nobody asked for are dropped with the channel
        self.lines.close();
        while self.lines.try_recv().is_ok() {}

        self.closed = true;
        debug!(command = %self.command, status = ?self.exit_status, "shell reader closed");
    }

    fn start_readers(&mut self) {
        let (Some((stdout, stderr)), Some(sender)) = (self.pipes.take(), self.sender.take()) else {
            return;
        };
        let strip = self.config.strip_ansi;

        self.readers
            .push(spawn_reader(stdout, StreamOrigin::Stdout, strip, sender.clone()));
        self.readers
            .push(spawn_reader(stderr, StreamOrigin::Stderr, strip, sender));
    }

    /// Both pipes are closed. Give the process a moment to exit on its own so
    /// the real exit status is recorded, then clean up. The wait never runs
    /// past the deadline.
    async fn finish(&mut self) {
        let settle = match self.deadline {
            Some(deadline) => self
                .config
                .kill_grace
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.config.kill_grace,
        };

        if let Some(child) = self.child.as_mut() {
            match timeout(settle, child.wait()).await {
                Ok(Ok(status)) => self.exit_status = Some(status),
                Ok(Err(err)) => trace!(%err, "wait after EOF failed"),
                Err(_) => debug!(command = %self.command, "pipes closed but process still running"),
            }
        }
        self.close().await;
    }

    async fn expire(&mut self) -> ShellError {
        let limit = self.config.timeout.unwrap_or_default();
        warn!(command = %self.command, timeout = ?limit, "command timed out, tearing down");
        self.close().await;
        ShellError::Timeout { timeout: limit }
    }
}

impl Drop for ShellReader {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            process::kill_now(child, self.pgid.filter(|_| !self.pipes_drained));
        }
        for handle in &self.readers {
            handle.abort();
        }
        debug!(command = %self.command, "shell reader dropped before close, process killed");
    }
}

impl std::fmt::Debug for ShellReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellReader")
            .field("command", &self.command)
            .field("pid", &self.pgid)
            .field("state", &self.state())
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

fn spawn_reader<R>(
    pipe: R,
    origin: StreamOrigin,
    strip_ansi: bool,
    sink: Sender<LineEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match framing::pump_lines(pipe, origin, strip_ansi, sink).await {
            Ok(lines) => trace!(%origin, lines, "pipe reader finished"),
            Err(err) => debug!(%origin, %err, "pipe read failed, ending stream"),
        }
    })
}
