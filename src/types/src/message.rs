use crate::{ChannelId, ChannelType, RequestId};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// One inbound frame after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Heartbeat,
    Pong(Pong),
    SubscriptionStatus(SubscriptionStatus),
    SystemStatus(SystemStatus),
    ChannelUpdate(ChannelUpdate),
    UnknownEvent(UnknownEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
    Error,
    Other(String),
}

impl From<&str> for SubscriptionState {
    fn from(value: &str) -> Self {
        match value {
            "subscribed" => SubscriptionState::Subscribed,
            "unsubscribed" => SubscriptionState::Unsubscribed,
            "error" => SubscriptionState::Error,
            other => SubscriptionState::Other(other.to_string()),
        }
    }
}

impl Display for SubscriptionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Subscribed => f.write_str("subscribed"),
            SubscriptionState::Unsubscribed => f.write_str("unsubscribed"),
            SubscriptionState::Error => f.write_str("error"),
            SubscriptionState::Other(s) => f.write_str(s),
        }
    }
}

/// Acknowledgment (or rejection) of a subscribe request.
///
/// Kraken acknowledges each pair separately and names it; Binance only echoes the
/// request id, in which case `symbol` and `channel_type` are filled in from the
/// tracked request before the handler sees the status.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionStatus {
    pub request_id: Option<RequestId>,
    pub channel_id: Option<ChannelId>,
    pub symbol: Option<String>,
    pub channel_type: Option<ChannelType>,
    pub channel_name: Option<String>,
    pub status: SubscriptionState,
    pub error: Option<String>,
    pub subscription: Option<Value>,
}

impl SubscriptionStatus {
    pub fn new(status: SubscriptionState) -> SubscriptionStatus {
        SubscriptionStatus {
            request_id: None,
            channel_id: None,
            symbol: None,
            channel_type: None,
            channel_name: None,
            status,
            error: None,
            subscription: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub connection_id: Option<u64>,
}

/// A market-data update for one subscribed channel, as read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub channel_id: ChannelId,
    pub symbol: String,
    pub channel_type: ChannelType,
    pub interval: Option<String>,
    pub payload: Value,
}

/// What a channel handler receives once the update has been resolved against the
/// channel registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub symbol: String,
    pub channel_type: ChannelType,
    pub interval: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEvent {
    /// Discriminator or channel name that was not recognised, if there was one.
    pub name: Option<String>,
    pub raw: Value,
}

impl UnknownEvent {
    pub fn new(name: Option<&str>, raw: Value) -> UnknownEvent {
        UnknownEvent {
            name: name.map(str::to_string),
            raw,
        }
    }
}

impl From<UnknownEvent> for DecodedMessage {
    fn from(value: UnknownEvent) -> Self {
        DecodedMessage::UnknownEvent(value)
    }
}
