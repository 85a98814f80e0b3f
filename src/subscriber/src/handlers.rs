use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{error, info, trace, warn};
use xb_types::{
    ChannelEvent, ChannelType, Pong, ProtocolError, SubscriptionState, SubscriptionStatus,
    SystemStatus,
};

pub type HeartbeatHandler = Arc<dyn Fn() + Send + Sync>;
pub type PongHandler = Arc<dyn Fn(Pong) + Send + Sync>;
pub type SubscriptionStatusHandler = Arc<dyn Fn(SubscriptionStatus) + Send + Sync>;
pub type SystemStatusHandler = Arc<dyn Fn(SystemStatus) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(ProtocolError) + Send + Sync>;
pub type ChannelHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    Heartbeat,
    Pong,
    SubscriptionStatus,
    SystemStatus,
    Error,
    Channel(ChannelType),
}

impl Display for HandlerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKey::Heartbeat => f.write_str("heartbeat"),
            HandlerKey::Pong => f.write_str("pong"),
            HandlerKey::SubscriptionStatus => f.write_str("subscriptionStatus"),
            HandlerKey::SystemStatus => f.write_str("systemStatus"),
            HandlerKey::Error => f.write_str("error"),
            HandlerKey::Channel(channel_type) => write!(f, "{channel_type}"),
        }
    }
}

#[derive(Clone)]
pub enum Handler {
    Heartbeat(HeartbeatHandler),
    Pong(PongHandler),
    SubscriptionStatus(SubscriptionStatusHandler),
    SystemStatus(SystemStatusHandler),
    Error(ErrorHandler),
    Channel(ChannelType, ChannelHandler),
}

impl Handler {
    pub fn key(&self) -> HandlerKey {
        match self {
            Handler::Heartbeat(_) => HandlerKey::Heartbeat,
            Handler::Pong(_) => HandlerKey::Pong,
            Handler::SubscriptionStatus(_) => HandlerKey::SubscriptionStatus,
            Handler::SystemStatus(_) => HandlerKey::SystemStatus,
            Handler::Error(_) => HandlerKey::Error,
            Handler::Channel(channel_type, _) => HandlerKey::Channel(*channel_type),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.key())
    }
}

/// One callback per [`HandlerKey`]. Registering a key again replaces the callback.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<HandlerKey, Handler>,
}

impl HandlerTable {
    /// A table holding the system handlers that just log what they receive.
    pub fn with_defaults() -> HandlerTable {
        let mut table = HandlerTable::default();
        table.set(Handler::Heartbeat(Arc::new(|| trace!("Heartbeat"))));
        table.set(Handler::Pong(Arc::new(log_pong)));
        table.set(Handler::SubscriptionStatus(Arc::new(log_subscription_status)));
        table.set(Handler::SystemStatus(Arc::new(|status: SystemStatus| {
            info!("server v{} status: {}", status.version, status.status)
        })));
        table.set(Handler::Error(Arc::new(|e: ProtocolError| error!("{e}"))));
        table
    }

    pub fn set(&mut self, handler: Handler) -> Option<Handler> {
        self.handlers.insert(handler.key(), handler)
    }

    pub fn get(&self, key: HandlerKey) -> Option<&Handler> {
        self.handlers.get(&key)
    }

    pub fn names(&self) -> HashSet<HandlerKey> {
        self.handlers.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

fn log_pong(pong: Pong) {
    match pong.request_id {
        Some(id) => info!(request_id = id, "Pong"),
        None => info!("Pong"),
    }
}

fn log_subscription_status(status: SubscriptionStatus) {
    let symbol = status.symbol.as_deref().unwrap_or("-");
    let channel = status
        .channel_name
        .clone()
        .or_else(|| status.channel_type.map(|c| c.to_string()))
        .unwrap_or_else(|| "-".to_string());

    match &status.status {
        SubscriptionState::Subscribed | SubscriptionState::Unsubscribed => {
            info!(symbol, %channel, "{}", status.status)
        }
        SubscriptionState::Error => error!(
            symbol,
            %channel,
            subscription = ?status.subscription,
            "Subscription failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        ),
        SubscriptionState::Other(other) => {
            warn!(symbol, %channel, "Unexpected subscription status: {other}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    #[test]
    fn defaults_cover_every_system_handler() {
        let table = HandlerTable::with_defaults();
        let expected: HashSet<_> = [
            HandlerKey::Heartbeat,
            HandlerKey::Pong,
            HandlerKey::SubscriptionStatus,
            HandlerKey::SystemStatus,
            HandlerKey::Error,
        ]
        .into_iter()
        .collect();

        assert_eq!(table.names(), expected);
    }

    #[test]
    fn set_replaces_and_returns_previous() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::with_defaults();

        let counter = calls.clone();
        let previous = table.set(Handler::Pong(Arc::new(move |_: Pong| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        assert!(matches!(previous, Some(Handler::Pong(_))));

        let Some(Handler::Pong(handler)) = table.get(HandlerKey::Pong) else {
            panic!("pong handler missing");
        };
        handler(Pong { request_id: Some(1) });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_case(ChannelType::Ticker)]
    #[test_case(ChannelType::Book)]
    #[test_case(ChannelType::Kline)]
    fn channel_handlers_are_keyed_by_type(channel_type: ChannelType) {
        let mut table = HandlerTable::default();
        assert!(table
            .set(Handler::Channel(channel_type, Arc::new(|_: ChannelEvent| {})))
            .is_none());

        assert!(table.get(HandlerKey::Channel(channel_type)).is_some());
        assert_eq!(table.names().len(), 1);
    }

    #[test]
    fn clear_releases_everything() {
        let mut table = HandlerTable::with_defaults();
        table.set(Handler::Channel(ChannelType::Trade, Arc::new(|_: ChannelEvent| {})));

        table.clear();

        assert!(table.names().is_empty());
        assert!(table.get(HandlerKey::Heartbeat).is_none());
    }
}
