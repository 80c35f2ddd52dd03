use fleet_protocol::{Line, OutputSink, Tone};
use tokio::sync::mpsc;

/// Prints session lines to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn emit(&self, line: Line) {
        match line.tone {
            Tone::Detail => println!("  {}", line.text),
            _ => println!("{}", line.text),
        }
    }
}

/// Forwards lines to a channel so `main` can wait on them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Line>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Line>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn emit(&self, line: Line) {
        let _ = self.tx.send(line);
    }
}
