// ABOUTME: Async driver that feeds a channel subscription through the reassembler into a sink
// Owns the flush deadline, the stop signal and teardown on transport failure

use super::message::LogMessage;
use super::reassembler::{ReassemblyState, FLUSH_TIMEOUT};
use super::sink::OutputSink;
use crate::transport::{Subscription, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum LogStreamError {
    #[error("Log stream transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Log stream task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A running, ordered log stream for one channel.
#[derive(Debug)]
pub struct LogStream {
    channel: String,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), LogStreamError>>,
}

impl LogStream {
    /// Start reassembling the subscription's messages into `sink`
    pub fn spawn(subscription: Subscription, sink: Arc<dyn OutputSink>) -> Self {
        Self::spawn_with_timeout(subscription, sink, FLUSH_TIMEOUT)
    }

    pub fn spawn_with_timeout(
        subscription: Subscription,
        sink: Arc<dyn OutputSink>,
        flush_timeout: Duration,
    ) -> Self {
        let channel = subscription.channel().to_string();
        let (stop_tx, stop_rx) = oneshot::channel();

        info!("Starting log stream on channel {}", channel);
        let task = tokio::spawn(run_stream(subscription, sink, stop_rx, flush_timeout));

        Self {
            channel,
            stop_tx,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the driver task has ended on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Flush everything still buffered and tear the stream down.
    pub async fn stop(self) -> Result<(), LogStreamError> {
        info!("Stopping log stream on channel {}", self.channel);
        if self.stop_tx.send(()).is_err() {
            debug!("Log stream {} had already finished", self.channel);
        }
        self.task.await?
    }

    /// Tear the stream down without flushing
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn flush_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn emit(sink: &dyn OutputSink, lines: Vec<String>) {
    for line in lines {
        sink.write_line(&line);
    }
}

async fn run_stream(
    mut subscription: Subscription,
    sink: Arc<dyn OutputSink>,
    mut stop_rx: oneshot::Receiver<()>,
    flush_timeout: Duration,
) -> Result<(), LogStreamError> {
    let mut state = ReassemblyState::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                // Messages already queued on the channel count as delivered
                while let Some(Ok(body)) = subscription.try_next() {
                    if let Ok(message) = LogMessage::from_value(&body) {
                        emit(sink.as_ref(), state.accept(message));
                    }
                }
                emit(sink.as_ref(), state.flush_all());
                subscription.unsubscribe();
                debug!("Log stream {} stopped at #{}", subscription.channel(), state.last_printed());
                return Ok(());
            }

            item = subscription.next() => match item {
                Some(Ok(body)) => match LogMessage::from_value(&body) {
                    Ok(message) => {
                        emit(sink.as_ref(), state.accept(message));
                        deadline = Some(Instant::now() + flush_timeout);
                    }
                    Err(e) => {
                        warn!("Dropping malformed log message on {}: {}", subscription.channel(), e);
                    }
                },
                Some(Err(e)) => {
                    error!("Log stream {} transport error: {}", subscription.channel(), e);
                    subscription.unsubscribe();
                    return Err(e.into());
                }
                None => {
                    debug!("Log stream {} source ended", subscription.channel());
                    emit(sink.as_ref(), state.flush_all());
                    return Ok(());
                }
            },

            () = flush_due(deadline) => {
                debug!(
                    "Flush timeout on {} with {} buffered message(s)",
                    subscription.channel(),
                    state.pending_len()
                );
                emit(sink.as_ref(), state.flush_all());
                deadline = None;
            }
        }
    }
}
