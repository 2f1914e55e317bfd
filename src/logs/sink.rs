// ABOUTME: Line-oriented output sinks for exec output and reassembled log streams
// Sinks are the only place ordered output leaves the crate

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// A consumer of text lines.
///
/// Implementations must be cheap to call; the log stream writes to its sink
/// from inside its event loop.
#[cfg_attr(test, mockall::automock)]
pub trait OutputSink: Send + Sync {
    /// Write a single line, without its trailing newline.
    fn write_line(&self, line: &str);
}

impl<T: OutputSink + ?Sized> OutputSink for Arc<T> {
    fn write_line(&self, line: &str) {
        (**self).write_line(line);
    }
}

/// Prints lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Sends lines over an unbounded channel to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    /// Create a sink together with the receiving half of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl OutputSink for ChannelSink {
    fn write_line(&self, line: &str) {
        if self.sender.send(line.to_string()).is_err() {
            debug!("Channel sink receiver dropped, discarding line");
        }
    }
}

/// Buffers lines in memory so they can be inspected after a command ends.
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every line collected so far
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OutputSink for CollectingSink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_take_drains() {
        let sink = CollectingSink::new();
        sink.write_line("one");
        sink.write_line("two");

        assert_eq!(sink.take(), vec!["one".to_string(), "two".to_string()]);
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_lines() {
        let (sink, mut rx) = ChannelSink::new();
        sink.write_line("hello");
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        // Writing after the receiver is gone must not panic
        drop(rx);
        sink.write_line("lost");
    }

    #[test]
    fn test_arc_sink_delegates() {
        let inner = Arc::new(CollectingSink::new());
        let shared: Arc<dyn OutputSink> = inner.clone();
        shared.write_line("via arc");
        assert_eq!(inner.take(), vec!["via arc".to_string()]);
    }
}
