//! Main entry point for the `shell-reader` command.
//!
//! Runs one command through the host shell and prints its output as it
//! arrives. The process exit code mirrors the child's where possible.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{ExitCode, ExitStatus};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};

use shell_reader::utils::logger;
use shell_reader::{ReaderConfig, ShellReader, TimeoutMode};

#[derive(Debug, Parser)]
#[command(
    name = "shell-reader",
    version,
    about = "Run a shell command and stream its stdout and stderr line by line"
)]
struct Cli {
    /// Give up after this many seconds (fractions allowed)
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Measure the timeout from the last line instead of from start
    #[arg(long, requires = "timeout")]
    idle: bool,

    /// Remove ANSI escape sequences from the output
    #[arg(long)]
    strip_ansi: bool,

    /// Print one JSON object per line: {"stream": ..., "text": ...}
    #[arg(long)]
    json: bool,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// The command, passed verbatim to the shell
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn reader_config(&self) -> Result<ReaderConfig> {
        let timeout = match self.timeout {
            Some(secs) if secs <= 0.0 => bail!("--timeout must be positive, got {secs}"),
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid --timeout value {secs}"))?,
            ),
            None => None,
        };
        let mode = if self.idle {
            TimeoutMode::Idle
        } else {
            TimeoutMode::Overall
        };

        Ok(ReaderConfig::default()
            .with_timeout(timeout)
            .with_timeout_mode(mode)
            .with_strip_ansi(self.strip_ansi))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    // Initialize logging before anything else
    let _log_guard = logger::init_logging(cli.log_dir.as_deref());

    let config = cli.reader_config()?;
    let command = cli.command.join(" ");
    info!(command = %command, timeout = ?config.timeout, "running command");

    let mut reader = ShellReader::with_config(command.as_str(), config)
        .with_context(|| format!("Failed to start `{command}`"))?;

    let outcome = print_lines(&mut reader, cli.json).await;
    reader.close().await;
    outcome?;

    Ok(exit_code(reader.exit_status()))
}

/// Copies lines to stdout until the command is done. A closed stdout (for
/// instance piping into `head`) ends the run early instead of failing it.
async fn print_lines(reader: &mut ShellReader, json: bool) -> Result<()> {
    let mut stdout = io::stdout();

    while let Some(event) = reader
        .next_event()
        .await
        .with_context(|| format!("`{}` did not complete", reader.command()))?
    {
        let written = if json {
            let encoded = serde_json::to_string(&event).context("Failed to encode line")?;
            writeln!(stdout, "{encoded}")
        } else {
            writeln!(stdout, "{event}")
        };

        match written {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("stdout closed, stopping early");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to write to stdout"),
        }
    }

    Ok(())
}

fn exit_code(status: Option<ExitStatus>) -> ExitCode {
    match status.map(|s| (s.success(), s.code())) {
        Some((true, _)) => ExitCode::SUCCESS,
        Some((false, Some(code))) => ExitCode::from(u8::try_from(code).unwrap_or(1).max(1)),
        // killed by a signal, or never reaped
        _ => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_words_are_kept_verbatim() {
        let cli = Cli::try_parse_from(["shell-reader", "echo", "-n", "a && b"]).unwrap();
        assert_eq!(cli.command.join(" "), "echo -n a && b");
        assert!(cli.timeout.is_none());
    }

    #[test]
    fn test_reader_config_from_flags() {
        let cli = Cli::try_parse_from([
            "shell-reader",
            "--timeout",
            "1.5",
            "--idle",
            "--strip-ansi",
            "ls",
        ])
        .unwrap();
        let config = cli.reader_config().unwrap();

        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.timeout_mode, TimeoutMode::Idle);
        assert!(config.strip_ansi);
    }

    #[test]
    fn test_non_positive_timeout_rejected() {
        let cli = Cli::try_parse_from(["shell-reader", "--timeout", "0", "ls"]).unwrap();
        assert!(cli.reader_config().is_err());
    }

    #[test]
    fn test_idle_requires_timeout() {
        assert!(Cli::try_parse_from(["shell-reader", "--idle", "ls"]).is_err());
    }

    #[test]
    fn test_missing_command_rejected() {
        assert!(Cli::try_parse_from(["shell-reader", "--json"]).is_err());
    }
}
