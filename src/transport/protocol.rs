// ABOUTME: Wire frames exchanged with the machine event endpoint over the websocket
// Channel-based pub/sub: clients subscribe by name, the endpoint pushes opaque JSON bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // Client → endpoint
    Subscribe(ChannelFrame),
    Unsubscribe(ChannelFrame),
    Heartbeat(HeartbeatFrame),

    // Endpoint → client
    Event(EventFrame),
    Error(ErrorFrame),
    HeartbeatResponse(HeartbeatFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub channel: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub channel: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    pub timestamp: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Frame {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Frame::Subscribe(ChannelFrame {
            channel: channel.into(),
            timestamp: now_millis(),
        })
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Frame::Unsubscribe(ChannelFrame {
            channel: channel.into(),
            timestamp: now_millis(),
        })
    }

    pub fn heartbeat() -> Self {
        Frame::Heartbeat(HeartbeatFrame {
            timestamp: now_millis(),
        })
    }

    pub fn event(channel: impl Into<String>, body: Value) -> Self {
        Frame::Event(EventFrame {
            channel: channel.into(),
            body,
        })
    }

    pub fn error(channel: Option<String>, error: impl Into<String>) -> Self {
        Frame::Error(ErrorFrame {
            channel,
            error: error.into(),
        })
    }
}
