use crate::handlers::{Handler, HandlerKey, HandlerTable};
use crate::registry::ChannelRegistry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, error, warn, Instrument, Span};
use xb_types::{
    ChannelEvent, DecodedMessage, ProtocolError, RequestId, SubscriptionState, SubscriptionStatus,
};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Jobs a lane holds before further messages for its handler are dropped.
pub const LANE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered {
        key: HandlerKey,
        invocations: usize,
    },
    NoHandler(HandlerKey),
    Unknown,
    /// The frame could not be parsed as JSON.
    Malformed,
    /// The connection was not open when the frame arrived.
    Ignored,
}

/// Routes decoded messages to handlers.
///
/// Every handler key owns a lane that runs the jobs queued for that key one at a time.
/// Inside a tokio runtime the lane is a task feeding the blocking pool; without one it
/// is a dedicated thread. Dispatch only enqueues, so a slow handler holds up its own
/// lane and nothing else, and a panicking handler loses that one job. A lane that
/// falls `capacity` jobs behind drops new messages for its handler.
pub struct Dispatcher {
    lanes: HashMap<HandlerKey, Sender<Job>>,
    capacity: usize,
    span: Span,
}

impl Dispatcher {
    pub fn new(span: Span) -> Dispatcher {
        Dispatcher::with_capacity(span, LANE_CAPACITY)
    }

    pub fn with_capacity(span: Span, capacity: usize) -> Dispatcher {
        Dispatcher {
            lanes: HashMap::new(),
            capacity: capacity.max(1),
            span,
        }
    }

    pub fn dispatch(
        &mut self,
        message: DecodedMessage,
        registry: &mut ChannelRegistry,
        handlers: &HandlerTable,
        last_ping: Option<RequestId>,
    ) -> DispatchOutcome {
        match message {
            DecodedMessage::Heartbeat => {
                let key = HandlerKey::Heartbeat;
                match handlers.get(key) {
                    Some(Handler::Heartbeat(handler)) => {
                        let handler = handler.clone();
                        self.submit(key, Box::new(move || handler()));
                        delivered(key, 1)
                    }
                    _ => self.no_handler(key),
                }
            }
            DecodedMessage::Pong(pong) => {
                let key = HandlerKey::Pong;
                if pong.request_id.is_none() || pong.request_id != last_ping {
                    debug!(
                        request_id = ?pong.request_id,
                        last_ping = ?last_ping,
                        "Pong does not match the latest ping"
                    );
                }
                match handlers.get(key) {
                    Some(Handler::Pong(handler)) => {
                        let handler = handler.clone();
                        self.submit(key, Box::new(move || handler(pong)));
                        delivered(key, 1)
                    }
                    _ => self.no_handler(key),
                }
            }
            DecodedMessage::SubscriptionStatus(status) => {
                let key = HandlerKey::SubscriptionStatus;
                let statuses = expand_status(status, registry);
                for status in statuses.iter() {
                    confirm_channel(status, registry);
                }
                match handlers.get(key) {
                    Some(Handler::SubscriptionStatus(handler)) => {
                        let invocations = statuses.len();
                        for status in statuses {
                            let handler = handler.clone();
                            self.submit(key, Box::new(move || handler(status)));
                        }
                        delivered(key, invocations)
                    }
                    _ => self.no_handler(key),
                }
            }
            DecodedMessage::SystemStatus(status) => {
                let key = HandlerKey::SystemStatus;
                match handlers.get(key) {
                    Some(Handler::SystemStatus(handler)) => {
                        let handler = handler.clone();
                        self.submit(key, Box::new(move || handler(status)));
                        delivered(key, 1)
                    }
                    _ => self.no_handler(key),
                }
            }
            DecodedMessage::ChannelUpdate(update) => {
                let key = HandlerKey::Channel(update.channel_type);
                let resolved = registry.resolve_positional(&update);
                match handlers.get(key) {
                    Some(Handler::Channel(_, handler)) => {
                        let handler = handler.clone();
                        let event = ChannelEvent {
                            symbol: resolved.symbol,
                            channel_type: resolved.channel_type,
                            interval: resolved.interval,
                            payload: update.payload,
                        };
                        self.submit(key, Box::new(move || handler(event)));
                        delivered(key, 1)
                    }
                    _ => self.no_handler(key),
                }
            }
            DecodedMessage::UnknownEvent(unknown) => {
                warn!(
                    name = unknown.name.as_deref().unwrap_or("-"),
                    raw = %unknown.raw,
                    "Unknown message, dropping"
                );
                DispatchOutcome::Unknown
            }
        }
    }

    pub fn dispatch_error(
        &mut self,
        protocol_error: ProtocolError,
        handlers: &HandlerTable,
    ) -> DispatchOutcome {
        let key = HandlerKey::Error;
        match handlers.get(key) {
            Some(Handler::Error(handler)) => {
                let handler = handler.clone();
                self.submit(key, Box::new(move || handler(protocol_error)));
                delivered(key, 1)
            }
            _ => self.no_handler(key),
        }
    }

    /// Drops every lane. Jobs already queued still run; nothing new is accepted.
    pub fn shutdown(&mut self) {
        self.lanes.clear();
    }

    fn submit(&mut self, key: HandlerKey, job: Job) {
        let job = match self.lanes.get(&key) {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        handler = %key,
                        capacity = self.capacity,
                        "Handler lane full, dropping message"
                    );
                    return;
                }
                Err(TrySendError::Closed(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = channel(self.capacity);
        if let Err(error) = sender.try_send(job) {
            error!(handler = %key, %error, "Failed to queue job");
            return;
        }
        if self.spawn_lane(key, receiver) {
            self.lanes.insert(key, sender);
        }
    }

    fn spawn_lane(&self, key: HandlerKey, receiver: Receiver<Job>) -> bool {
        let span = self.span.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_lane(key, receiver, span.clone()).instrument(span));
                true
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name(format!("xb-lane-{key}"))
                    .spawn(move || run_thread_lane(key, receiver, span));
                match spawned {
                    Ok(_) => true,
                    Err(error) => {
                        error!(handler = %key, %error, "Failed to start lane thread");
                        false
                    }
                }
            }
        }
    }

    fn no_handler(&self, key: HandlerKey) -> DispatchOutcome {
        warn!(handler = %key, "No handler registered, dropping message");
        DispatchOutcome::NoHandler(key)
    }
}

async fn run_lane(key: HandlerKey, mut receiver: Receiver<Job>, span: Span) {
    while let Some(job) = receiver.recv().await {
        let span = span.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || span.in_scope(job)).await {
            if error.is_panic() {
                error!(handler = %key, "Handler panicked");
            } else {
                debug!(handler = %key, "Handler job cancelled");
            }
        }
    }
    debug!(handler = %key, "Lane closed");
}

fn run_thread_lane(key: HandlerKey, mut receiver: Receiver<Job>, span: Span) {
    while let Some(job) = receiver.blocking_recv() {
        if std::panic::catch_unwind(AssertUnwindSafe(|| span.in_scope(job))).is_err() {
            let _entered = span.enter();
            error!(handler = %key, "Handler panicked");
        }
    }
    debug!(parent: &span, handler = %key, "Lane closed");
}

fn delivered(key: HandlerKey, invocations: usize) -> DispatchOutcome {
    DispatchOutcome::Delivered { key, invocations }
}

// Acknowledgments that only echo the request id are expanded into one status per
// symbol of the tracked request. A request is forgotten once all of its symbols
// have been acknowledged.
fn expand_status(
    mut status: SubscriptionStatus,
    registry: &mut ChannelRegistry,
) -> Vec<SubscriptionStatus> {
    let Some(request_id) = status.request_id else {
        return vec![status];
    };
    let Some(request) = registry.request(request_id) else {
        return vec![status];
    };

    if status.channel_type.is_none() {
        status.channel_type = Some(request.channel_type);
    }
    if let Some(symbol) = status.symbol.as_deref() {
        registry.acknowledge(request_id, symbol);
        return vec![status];
    }

    let symbols = registry
        .remove_request(request_id)
        .map(|request| request.symbols)
        .unwrap_or_default();
    symbols
        .into_iter()
        .map(|symbol| SubscriptionStatus {
            symbol: Some(symbol),
            ..status.clone()
        })
        .collect()
}

fn confirm_channel(status: &SubscriptionStatus, registry: &mut ChannelRegistry) {
    if status.status != SubscriptionState::Subscribed {
        return;
    }
    let (Some(symbol), Some(channel_type)) = (status.symbol.as_deref(), status.channel_type)
    else {
        return;
    };
    let channel_id = status.channel_id.clone().or_else(|| {
        registry
            .entry(symbol, channel_type)
            .and_then(|entry| entry.channel_id.clone())
    });
    if let Some(channel_id) = channel_id {
        registry.confirm(symbol, channel_type, channel_id);
    }
}
