// ABOUTME: Transport to the machine event endpoint
// Provides the connection lifecycle controller and channel subscriptions used by log streams

pub mod bus;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod websocket;

pub use bus::{ChannelItem, MessageBus, Subscription};
pub use connection::{
    ConnectionController, ConnectionEvent, ConnectionState, Connector, Link,
    MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
};
pub use error::TransportError;
pub use protocol::Frame;
pub use websocket::WebSocketConnector;
