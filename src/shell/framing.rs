//! Line framing for child process pipes.
//!
//! Each pipe is read through a buffered reader that splits on `\n`. Bytes are
//! accumulated until a full line (or EOF) is seen and only then decoded, so a
//! multi-byte character split across two reads is never mangled. Anything
//! that still fails to decode is replaced with U+FFFD.

use std::fmt;
use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::Sender;
use tracing::trace;

/// Prefix prepended to every rendered stderr line.
pub const STDERR_PREFIX: &str = "[stderr] ";

// 16KB per read, same as the interactive PTY reader used to use
const PIPE_READ_BUFFER: usize = 16384;

/// Which pipe a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Stdout,
    Stderr,
}

impl StreamOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOrigin::Stdout => "stdout",
            StreamOrigin::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed line of output, tagged with the pipe it came from.
///
/// `text` never contains the line terminator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LineEvent {
    #[serde(rename = "stream")]
    pub origin: StreamOrigin,
    pub text: String,
}

impl LineEvent {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            origin: StreamOrigin::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            origin: StreamOrigin::Stderr,
            text: text.into(),
        }
    }

    /// The user-facing form: stdout verbatim, stderr behind [`STDERR_PREFIX`].
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn into_rendered(self) -> String {
        match self.origin {
            StreamOrigin::Stdout => self.text,
            StreamOrigin::Stderr => format!("{STDERR_PREFIX}{}", self.text),
        }
    }
}

impl fmt::Display for LineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.origin == StreamOrigin::Stderr {
            f.write_str(STDERR_PREFIX)?;
        }
        f.write_str(&self.text)
    }
}

/// Reads `pipe` to EOF, pushing one [`LineEvent`] per line into `sink`.
///
/// Returns the number of lines delivered. Stops early, without error, if the
/// receiving side has gone away.
pub(crate) async fn pump_lines<R>(
    pipe: R,
    origin: StreamOrigin,
    strip_ansi: bool,
    sink: Sender<LineEvent>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(PIPE_READ_BUFFER, pipe);
    let mut raw = Vec::new();
    let mut delivered = 0usize;

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            trace!(%origin, delivered, "pipe reached EOF");
            return Ok(delivered);
        }

        let event = LineEvent {
            origin,
            text: decode_line(&raw, strip_ansi),
        };
        if sink.send(event).await.is_err() {
            trace!(%origin, delivered, "line receiver dropped, stopping reader");
            return Ok(delivered);
        }
        delivered += 1;
    }
}

/// Decodes one raw line, dropping its `\n` / `\r\n` terminator.
pub(crate) fn decode_line(raw: &[u8], strip_ansi: bool) -> String {
    let body = raw.strip_suffix(b"\n").unwrap_or(raw);
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    let text = String::from_utf8_lossy(body);

    if strip_ansi {
        strip_ansi_codes(&text).replace('\r', "")
    } else {
        text.into_owned()
    }
}

/// Strip ANSI escape codes from text.
/// Removes color codes, cursor movements, OSC strings and other two-byte
/// escapes.
pub fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\x1b' {
            result.push(ch);
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // parameter and intermediate bytes until a final byte in @..~
                for next_ch in chars.by_ref() {
                    if ('@'..='~').contains(&next_ch) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                // OSC runs until BEL or ST (ESC \)
                while let Some(next_ch) = chars.next() {
                    if next_ch == '\x07' {
                        break;
                    }
                    if next_ch == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(&next_ch) if ('@'..='_').contains(&next_ch) => {
                chars.next();
            }
            _ => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    async fn frame(input: &'static [u8], strip_ansi: bool) -> Vec<LineEvent> {
        let (tx, mut rx) = mpsc::channel(16);
        let delivered = pump_lines(input, StreamOrigin::Stdout, strip_ansi, tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(delivered, events.len());
        events
    }

    fn texts(events: &[LineEvent]) -> Vec<&str> {
        events.iter().map(|e| e.text.as_str()).collect()
    }

    #[test]
    fn test_render_prefixes_stderr_only() {
        assert_eq!(LineEvent::stdout("hi").render(), "hi");
        assert_eq!(LineEvent::stderr("oops").render(), "[stderr] oops");
        assert_eq!(LineEvent::stderr("oops").into_rendered(), "[stderr] oops");
        assert_eq!(LineEvent::stdout("").into_rendered(), "");
    }

    #[test]
    fn test_event_serializes_with_stream_tag() {
        let json = serde_json::to_string(&LineEvent::stderr("boom")).unwrap();
        assert_eq!(json, r#"{"stream":"stderr","text":"boom"}"#);
    }

    #[test]
    fn test_decode_line_terminators() {
        assert_eq!(decode_line(b"plain\n", false), "plain");
        assert_eq!(decode_line(b"dos\r\n", false), "dos");
        assert_eq!(decode_line(b"fragment", false), "fragment");
        assert_eq!(decode_line(b"\n", false), "");
        // only the terminator goes, inner carriage returns stay unless stripping
        assert_eq!(decode_line(b"a\rb\n", false), "a\rb");
        assert_eq!(decode_line(b"a\rb\n", true), "ab");
    }

    #[test]
    fn test_decode_line_replaces_invalid_utf8() {
        let text = decode_line(b"\xffabc\n", false);
        assert_eq!(text, "\u{FFFD}abc");
    }

    #[tokio::test]
    async fn test_empty_input_yields_nothing() {
        assert!(frame(b"", false).await.is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_emitted() {
        let events = frame(b"one\ntwo\nthree", false).await;
        assert_eq!(texts(&events), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_blank_lines_are_kept() {
        let events = frame(b"a\n\nb\n", false).await;
        assert_eq!(texts(&events), vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn test_ansi_stripping_is_opt_in() {
        let raw = b"\x1b[31mred\x1b[0m\n";
        assert_eq!(texts(&frame(raw, false).await), vec!["\x1b[31mred\x1b[0m"]);
        assert_eq!(texts(&frame(raw, true).await), vec!["red"]);
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(16);

        let pump = tokio::spawn(pump_lines(reader, StreamOrigin::Stderr, false, tx));

        // "€" is E2 82 AC; split it across two writes
        for chunk in [&b"hel"[..], b"lo\nwo", b"\xe2\x82", b"\xac\n", b"tail"] {
            writer.write_all(chunk).await.unwrap();
            writer.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(writer);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(pump.await.unwrap().unwrap(), 3);
        assert_eq!(texts(&events), vec!["hello", "wo€", "tail"]);
        assert!(events.iter().all(|e| e.origin == StreamOrigin::Stderr));
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let delivered = pump_lines(&b"a\nb\n"[..], StreamOrigin::Stdout, false, tx)
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_strip_ansi_codes() {
        // Test basic color codes
        let input = "\x1b[31mRed text\x1b[0m Normal text";
        assert_eq!(strip_ansi_codes(input), "Red text Normal text");

        // Test cursor movement
        let input = "Line 1\x1b[2J\x1b[HCleared";
        assert_eq!(strip_ansi_codes(input), "Line 1Cleared");

        // private mode sequences end in a non-letter final byte range too
        let input = "\x1b[?25lhidden cursor\x1b[?25h";
        assert_eq!(strip_ansi_codes(input), "hidden cursor");

        // Test OSC sequences, both terminators
        let input = "Before\x1b]0;title\x07After";
        assert_eq!(strip_ansi_codes(input), "BeforeAfter");
        let input = "Before\x1b]8;;http://x\x1b\\After";
        assert_eq!(strip_ansi_codes(input), "BeforeAfter");

        // two-byte escape
        let input = "a\x1bMb";
        assert_eq!(strip_ansi_codes(input), "ab");

        // Test no escape codes
        let input = "Plain text";
        assert_eq!(strip_ansi_codes(input), input);
    }
}
