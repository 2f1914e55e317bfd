// ABOUTME: Lifecycle controller for the persistent event endpoint connection
// Tracks Started/Stopped state, reconnects on error with a bounded budget and hands out the bus

use super::bus::MessageBus;
use super::error::TransportError;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Reconnect attempts granted by each `initialize`.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Pause before each reconnect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Started,
}

/// Notifications emitted on state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Started,
    Stopped,
    Reconnecting { remaining: u32 },
    StoppedOnError { reason: String },
}

/// An open connection: the bus for talking over it, and a future that
/// resolves when the link goes away (`Ok` for a graceful close).
pub struct Link {
    pub bus: MessageBus,
    pub closed: BoxFuture<'static, Result<(), TransportError>>,
}

/// Opens links to an endpoint URL.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Link, TransportError>>;
}

type Waiter = oneshot::Sender<Result<MessageBus, TransportError>>;

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    retries_left: u32,
    bus: Option<MessageBus>,
    waiter: Option<Waiter>,
}

pub struct ConnectionController<C: Connector> {
    connector: Arc<C>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
    retry_delay: Duration,
}

impl<C: Connector> ConnectionController<C> {
    /// Create a controller and the receiver for its state notifications
    pub fn new(connector: C) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            connector: Arc::new(connector),
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Stopped,
                retries_left: MAX_RECONNECT_ATTEMPTS,
                bus: None,
                waiter: None,
            })),
            events,
            driver: Mutex::new(None),
            retry_delay: RECONNECT_DELAY,
        };
        (controller, receiver)
    }

    /// Reset the retry budget and start connecting to `url`
    pub async fn initialize(&self, url: impl Into<String>) {
        let url = url.into();
        info!("Initializing connection to {}", url);

        let mut driver = self.driver.lock().await;
        if let Some(previous) = driver.take() {
            previous.abort();
        }

        {
            let mut shared = self.shared.lock().await;
            shared.retries_left = MAX_RECONNECT_ATTEMPTS;
            shared.state = ConnectionState::Stopped;
            shared.bus = None;
        }

        *driver = Some(tokio::spawn(drive(
            url,
            self.connector.clone(),
            self.shared.clone(),
            self.events.clone(),
            self.retry_delay,
        )));
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.lock().await.state
    }

    pub async fn retries_left(&self) -> u32 {
        self.shared.lock().await.retries_left
    }

    /// The open connection's bus, waiting for the first successful open if needed.
    ///
    /// Only one request may wait at a time; a newer request supersedes an older one.
    pub async fn connection(&self) -> Result<MessageBus, TransportError> {
        let receiver = {
            let mut shared = self.shared.lock().await;
            if let Some(bus) = &shared.bus {
                return Ok(bus.clone());
            }
            let (sender, receiver) = oneshot::channel();
            if let Some(previous) = shared.waiter.replace(sender) {
                let _ = previous.send(Err(TransportError::Superseded));
            }
            receiver
        };

        receiver.await.map_err(|_| TransportError::Closed)?
    }

    /// Stop the connection without reconnecting
    pub async fn close(&self) {
        if let Some(driver) = self.driver.lock().await.take() {
            driver.abort();
        }

        let was_started = {
            let mut shared = self.shared.lock().await;
            let was_started = shared.state == ConnectionState::Started;
            shared.state = ConnectionState::Stopped;
            if let Some(bus) = shared.bus.take() {
                bus.clear();
            }
            was_started
        };

        if was_started {
            info!("Connection closed");
            let _ = self.events.send(ConnectionEvent::Stopped);
        }
    }
}

impl<C: Connector> Drop for ConnectionController<C> {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.driver.try_lock() {
            if let Some(handle) = driver.take() {
                handle.abort();
            }
        }
    }
}

async fn drive<C: Connector>(
    url: String,
    connector: Arc<C>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    retry_delay: Duration,
) {
    loop {
        let failure = match connector.open(&url).await {
            Ok(link) => {
                {
                    let mut guard = shared.lock().await;
                    guard.state = ConnectionState::Started;
                    guard.bus = Some(link.bus.clone());
                    if let Some(waiter) = guard.waiter.take() {
                        let _ = waiter.send(Ok(link.bus.clone()));
                    }
                }
                info!("Connection to {} started", url);
                let _ = events.send(ConnectionEvent::Started);

                match link.closed.await {
                    Ok(()) => {
                        {
                            let mut guard = shared.lock().await;
                            guard.state = ConnectionState::Stopped;
                            guard.bus = None;
                        }
                        info!("Connection to {} closed", url);
                        let _ = events.send(ConnectionEvent::Stopped);
                        return;
                    }
                    Err(e) => {
                        shared.lock().await.bus = None;
                        e
                    }
                }
            }
            Err(e) => e,
        };

        warn!("Connection to {} failed: {}", url, failure);

        let remaining = {
            let mut guard = shared.lock().await;
            if guard.retries_left == 0 {
                guard.state = ConnectionState::Stopped;
                guard.bus = None;
                if let Some(waiter) = guard.waiter.take() {
                    let _ = waiter.send(Err(TransportError::Exhausted(MAX_RECONNECT_ATTEMPTS)));
                }
                None
            } else {
                guard.retries_left -= 1;
                Some(guard.retries_left)
            }
        };

        match remaining {
            Some(remaining) => {
                debug!("Reconnecting in {:?} ({} attempt(s) left)", retry_delay, remaining);
                let _ = events.send(ConnectionEvent::Reconnecting { remaining });
                sleep(retry_delay).await;
            }
            None => {
                error!("Giving up on {} after {} reconnect attempts", url, MAX_RECONNECT_ATTEMPTS);
                let _ = events.send(ConnectionEvent::StoppedOnError {
                    reason: failure.to_string(),
                });
                return;
            }
        }
    }
}
