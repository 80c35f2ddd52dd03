//! Where progress and summary lines go: an operator console, a log, or both.

use std::sync::{Arc, Mutex};

/// Visual weight of a line. Renderers map it to colour or log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    /// Frames and headings.
    Banner,
    Info,
    Detail,
    Success,
    Failure,
    Warning,
}

/// One rendered line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub tone: Tone,
    pub text: String,
}

impl Line {
    pub fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }
}

/// Receives the stream of lines for one session.
///
/// Called from response handling and timer callbacks, possibly at the same
/// time, so implementations must be thread-safe.
pub trait OutputSink: Send + Sync {
    fn emit(&self, line: Line);
}

/// Forwards every line to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, line: Line) {
        match line.tone {
            Tone::Failure => tracing::warn!(target: "fleet_backup::output", "{}", line.text),
            Tone::Warning => tracing::warn!(target: "fleet_backup::output", "{}", line.text),
            _ => tracing::info!(target: "fleet_backup::output", "{}", line.text),
        }
    }
}

/// Collects lines in memory. Cheap to clone; clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<Line>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<Line> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Just the text of every line.
    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|l| l.text).collect()
    }

    /// Number of lines whose text contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|l| l.text.contains(needle))
            .count()
    }
}

impl OutputSink for BufferSink {
    fn emit(&self, line: Line) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

/// Sends every line to two sinks.
pub struct TeeSink {
    first: Arc<dyn OutputSink>,
    second: Arc<dyn OutputSink>,
}

impl TeeSink {
    pub fn new(first: Arc<dyn OutputSink>, second: Arc<dyn OutputSink>) -> Self {
        Self { first, second }
    }
}

impl OutputSink for TeeSink {
    fn emit(&self, line: Line) {
        self.first.emit(line.clone());
        self.second.emit(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_shares_across_clones() {
        let sink = BufferSink::new();
        let clone = sink.clone();
        clone.emit(Line::new(Tone::Info, "hello"));
        assert_eq!(sink.texts(), vec!["hello".to_string()]);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tracing_sink_logs_by_tone() {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            TracingSink.emit(Line::new(Tone::Success, "✓ a - Completed"));
            TracingSink.emit(Line::new(Tone::Failure, "✗ b - Server not found"));
        });

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO") && lines[0].contains("✓ a - Completed"));
        assert!(lines[1].contains("WARN") && lines[1].contains("✗ b - Server not found"));
        assert!(lines.iter().all(|l| l.contains("fleet_backup::output")));
    }

    #[test]
    fn tee_reaches_both() {
        let a = BufferSink::new();
        let b = BufferSink::new();
        let tee = TeeSink::new(Arc::new(a.clone()), Arc::new(b.clone()));
        tee.emit(Line::new(Tone::Success, "ok"));
        assert_eq!(a.count_containing("ok"), 1);
        assert_eq!(b.count_containing("ok"), 1);
    }
}
