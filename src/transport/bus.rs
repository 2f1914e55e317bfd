// ABOUTME: Channel subscription bookkeeping on top of an open endpoint connection
// Routes inbound event frames to per-channel subscribers and queues outbound frames

use super::error::TransportError;
use super::protocol::Frame;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One item delivered on a channel: an event body, or a transport failure.
pub type ChannelItem = Result<Value, TransportError>;

/// The current subscriber of a channel; `id` tells it apart from earlier
/// subscriptions it replaced.
#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<ChannelItem>,
}

type Subscribers = HashMap<String, Subscriber>;

/// Handle to an open connection. Cheap to clone; every clone shares the
/// same subscriber table and outbound queue.
#[derive(Debug, Clone)]
pub struct MessageBus {
    outbound: mpsc::UnboundedSender<Frame>,
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

impl MessageBus {
    pub fn new(outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            outbound,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A bus that is not attached to any socket; outbound frames land on the
    /// returned receiver. Inbound frames are injected with [`MessageBus::dispatch`].
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (Self::new(outbound), receiver)
    }

    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the underlying connection still accepts outbound frames
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a frame for the endpoint
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    /// Subscribe to a channel. A previous subscription on the same channel is
    /// replaced; it stops receiving items and its later unsubscribe is a no-op.
    pub fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        let (sender, events) = mpsc::unbounded_channel();
        self.send(Frame::subscribe(channel))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber { id, sender };
        if self.subscribers().insert(channel.to_string(), subscriber).is_some() {
            debug!("Replaced existing subscription on channel {}", channel);
        }

        Ok(Subscription {
            channel: channel.to_string(),
            id,
            bus: self.clone(),
            events,
        })
    }

    /// Drop the local subscriber and tell the endpoint to stop publishing,
    /// unless a newer subscription owns the channel by now
    fn release(&self, channel: &str, id: u64) {
        {
            let mut subscribers = self.subscribers();
            match subscribers.get(channel) {
                Some(current) if current.id == id => {
                    subscribers.remove(channel);
                }
                Some(_) => {
                    debug!("Channel {} was resubscribed; keeping the newer subscriber", channel);
                    return;
                }
                None => {}
            }
        }
        if self.send(Frame::unsubscribe(channel)).is_err() {
            debug!("Connection already closed while unsubscribing from {}", channel);
        }
    }

    /// Route an inbound frame to its subscriber
    pub fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Event(event) => self.deliver(&event.channel, Ok(event.body)),
            Frame::Error(error) => match error.channel {
                Some(channel) => {
                    let failure = TransportError::Remote {
                        channel: channel.clone(),
                        message: error.error,
                    };
                    self.deliver(&channel, Err(failure));
                }
                None => warn!("Endpoint reported an error: {}", error.error),
            },
            Frame::HeartbeatResponse(_) => debug!("Heartbeat acknowledged"),
            other => debug!("Ignoring unexpected inbound frame: {:?}", other),
        }
    }

    fn deliver(&self, channel: &str, item: ChannelItem) {
        let mut subscribers = self.subscribers();
        let Some(subscriber) = subscribers.get(channel) else {
            debug!("No subscriber for channel {}", channel);
            return;
        };
        if subscriber.sender.send(item).is_err() {
            debug!("Subscriber for channel {} went away", channel);
            subscribers.remove(channel);
        }
    }

    /// Notify every subscriber of a link failure and forget them
    pub fn fail_all(&self, error: &TransportError) {
        for (_, subscriber) in self.subscribers().drain() {
            let _ = subscriber.sender.send(Err(error.clone()));
        }
    }

    /// Forget every subscriber; their streams end without an error
    pub fn clear(&self) {
        self.subscribers().clear();
    }

    /// Channels with a live local subscriber
    pub fn channels(&self) -> Vec<String> {
        self.subscribers().keys().cloned().collect()
    }
}

/// Receiving side of one channel subscription.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    id: u64,
    bus: MessageBus,
    events: mpsc::UnboundedReceiver<ChannelItem>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next item on the channel, or `None` once the connection is gone
    pub async fn next(&mut self) -> Option<ChannelItem> {
        self.events.recv().await
    }

    /// An item that has already arrived, without waiting
    pub fn try_next(&mut self) -> Option<ChannelItem> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(&mut self) {
        self.bus.release(&self.channel, self.id);
        self.events.close();
    }
}
