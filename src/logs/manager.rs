// ABOUTME: Registry of ordered log streams, one per subscribed output channel
// Starts, replaces and tears down streams on a shared message bus

use super::sink::OutputSink;
use super::stream::{LogStream, LogStreamError};
use crate::transport::{MessageBus, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct LogStreamingManager {
    bus: MessageBus,
    streams: HashMap<String, LogStream>,
}

impl LogStreamingManager {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            streams: HashMap::new(),
        }
    }

    /// Start an ordered stream for `channel`, replacing any stream already on it
    pub async fn start_streaming(
        &mut self,
        channel: &str,
        sink: Arc<dyn OutputSink>,
    ) -> Result<(), TransportError> {
        if let Err(e) = self.stop_streaming(channel).await {
            warn!("Previous stream on {} ended with error: {}", channel, e);
        }

        let subscription = self.bus.subscribe(channel)?;
        self.streams
            .insert(channel.to_string(), LogStream::spawn(subscription, sink));
        Ok(())
    }

    /// Stop the stream for `channel`, flushing what it still buffers
    pub async fn stop_streaming(&mut self, channel: &str) -> Result<(), LogStreamError> {
        match self.streams.remove(channel) {
            Some(stream) => stream.stop().await,
            None => Ok(()),
        }
    }

    pub async fn stop_all(&mut self) {
        info!("Stopping all log streams");
        for (channel, stream) in self.streams.drain() {
            if let Err(e) = stream.stop().await {
                warn!("Log stream {} ended with error: {}", channel, e);
            }
        }
    }

    pub fn active_channels(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    pub fn is_streaming(&self, channel: &str) -> bool {
        self.streams
            .get(channel)
            .is_some_and(|stream| !stream.is_finished())
    }
}

impl Drop for LogStreamingManager {
    fn drop(&mut self) {
        for (_, stream) in self.streams.drain() {
            stream.abort();
        }
    }
}
