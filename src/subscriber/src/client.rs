use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::handlers::{Handler, HandlerKey, HandlerTable, PongHandler};
use crate::ids::IdGenerator;
use crate::registry::ChannelRegistry;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, trace, warn, Span};
use xb_types::{
    ChannelEvent, CloseReason, ConnectionState, Exchange, ExchangeProtocol, Pong, ProtocolError,
    RequestId, StreamError, SubscriptionRequest, SubscriptionStatus, SystemStatus, Transport,
};

/// What the transport reports, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Text(String),
    Closed(CloseReason),
}

type OpenCallback = Arc<dyn Fn(&StreamClient) + Send + Sync>;
type CloseCallback = Arc<dyn Fn(CloseReason) + Send + Sync>;

pub struct StreamClientBuilder {
    protocol: Box<dyn ExchangeProtocol>,
    handlers: HandlerTable,
    on_open: Option<OpenCallback>,
    on_close: Option<CloseCallback>,
    span: Option<Span>,
}

impl StreamClientBuilder {
    /// Called once the connection is open. Subscriptions are usually made from here.
    pub fn on_open<F: Fn(&StreamClient) + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_open = Some(Arc::new(callback));
        self
    }

    /// Called exactly once, when the connection closes for any reason.
    pub fn on_close<F: Fn(CloseReason) + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    pub fn on_heartbeat<F: Fn() + Send + Sync + 'static>(mut self, handler: F) -> Self {
        self.handlers.set(Handler::Heartbeat(Arc::new(handler)));
        self
    }

    pub fn on_pong<F: Fn(Pong) + Send + Sync + 'static>(mut self, handler: F) -> Self {
        self.handlers.set(Handler::Pong(Arc::new(handler)));
        self
    }

    pub fn on_subscription_status<F: Fn(SubscriptionStatus) + Send + Sync + 'static>(
        mut self,
        handler: F,
    ) -> Self {
        self.handlers.set(Handler::SubscriptionStatus(Arc::new(handler)));
        self
    }

    pub fn on_system_status<F: Fn(SystemStatus) + Send + Sync + 'static>(
        mut self,
        handler: F,
    ) -> Self {
        self.handlers.set(Handler::SystemStatus(Arc::new(handler)));
        self
    }

    pub fn on_error<F: Fn(ProtocolError) + Send + Sync + 'static>(mut self, handler: F) -> Self {
        self.handlers.set(Handler::Error(Arc::new(handler)));
        self
    }

    /// Span entered for every log line of this client and every handler it runs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn url(&self) -> &str {
        self.protocol.url()
    }

    pub fn exchange(&self) -> Exchange {
        self.protocol.exchange()
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> StreamClient {
        let span = self
            .span
            .unwrap_or_else(|| info_span!("stream", exchange = %self.protocol.exchange()));

        StreamClient {
            shared: Arc::new(Shared {
                protocol: self.protocol,
                transport,
                on_open: self.on_open,
                state: Mutex::new(State {
                    connection: ConnectionState::Connecting,
                    ids: IdGenerator::default(),
                    registry: ChannelRegistry::default(),
                    handlers: self.handlers,
                    dispatcher: Dispatcher::new(span.clone()),
                    last_ping: None,
                    on_close: self.on_close,
                }),
                span,
            }),
        }
    }
}

/// A streaming session with one exchange.
///
/// Cloning gives another handle to the same session. All bookkeeping sits behind one
/// mutex, so inbound frames are processed strictly in arrival order and outbound
/// calls from other threads interleave with them safely. Handlers never run under
/// that lock.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
}

struct Shared {
    protocol: Box<dyn ExchangeProtocol>,
    transport: Arc<dyn Transport>,
    on_open: Option<OpenCallback>,
    state: Mutex<State>,
    span: Span,
}

struct State {
    connection: ConnectionState,
    ids: IdGenerator,
    registry: ChannelRegistry,
    handlers: HandlerTable,
    dispatcher: Dispatcher,
    last_ping: Option<RequestId>,
    on_close: Option<CloseCallback>,
}

impl StreamClient {
    pub fn builder(protocol: Box<dyn ExchangeProtocol>) -> StreamClientBuilder {
        StreamClientBuilder {
            protocol,
            handlers: HandlerTable::with_defaults(),
            on_open: None,
            on_close: None,
            span: None,
        }
    }

    pub fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.on_opened(),
            ConnectionEvent::Text(text) => {
                self.on_text(&text);
            }
            ConnectionEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    pub fn on_opened(&self) {
        {
            let _entered = self.shared.span.enter();
            let mut state = self.shared.state.lock();
            if state.connection != ConnectionState::Connecting {
                warn!(state = %state.connection, "Ignoring open event");
                return;
            }
            state.connection = ConnectionState::Open;
            info!("Connected");
        }

        if let Some(on_open) = &self.shared.on_open {
            on_open(self);
        }
    }

    pub fn on_text(&self, text: &str) -> DispatchOutcome {
        let _entered = self.shared.span.enter();
        let mut guard = self.shared.state.lock();
        if guard.connection != ConnectionState::Open {
            trace!(state = %guard.connection, "Ignoring frame");
            return DispatchOutcome::Ignored;
        }

        trace!("Received text: {text}");

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(error) => {
                warn!(%error, "Failed to parse frame: {text}");
                return DispatchOutcome::Malformed;
            }
        };

        let state = &mut *guard;
        match self.shared.protocol.decode(value) {
            Ok(message) => state.dispatcher.dispatch(
                message,
                &mut state.registry,
                &state.handlers,
                state.last_ping,
            ),
            Err(protocol_error) => {
                warn!(error = %protocol_error, "Exchange returned an error");
                state.dispatcher.dispatch_error(protocol_error, &state.handlers)
            }
        }
    }

    pub fn on_closed(&self, reason: CloseReason) {
        let _entered = self.shared.span.enter();
        let on_close = {
            let mut state = self.shared.state.lock();
            if state.connection == ConnectionState::Closed {
                debug!(%reason, "Already closed");
                return;
            }
            state.connection = ConnectionState::Closed;
            state.registry.clear();
            state.handlers.clear();
            state.dispatcher.shutdown();
            state.last_ping = None;
            state.on_close.take()
        };

        match &reason {
            CloseReason::Requested | CloseReason::Remote(_) => info!(%reason, "Disconnected"),
            CloseReason::Disconnected | CloseReason::Failed(_) => warn!(%reason, "Disconnected"),
        }

        if let Some(on_close) = on_close {
            on_close(reason);
        }
    }

    /// Subscribes to one channel type for every symbol in the request.
    ///
    /// The handler replaces any handler previously registered for the channel type.
    /// Returns the request id stamped on the outbound message. A request that fails
    /// validation sends nothing.
    pub fn subscribe<F: Fn(ChannelEvent) + Send + Sync + 'static>(
        &self,
        request: SubscriptionRequest,
        handler: F,
    ) -> Result<RequestId, StreamError> {
        let _entered = self.shared.span.enter();
        self.shared.protocol.validate(&request)?;

        let mut state = self.shared.state.lock();
        if state.connection != ConnectionState::Open {
            return Err(StreamError::NotOpen(state.connection));
        }

        let request_id = state.ids.next_id();
        let frame = self.shared.protocol.encode_subscribe(&request, request_id)?;

        let channel_type = request.channel_type();
        state
            .handlers
            .set(Handler::Channel(channel_type, Arc::new(handler)));
        for symbol in request.symbols() {
            let tentative_id = self.shared.protocol.channel_id(symbol, &request);
            state
                .registry
                .register_pending(symbol, channel_type, tentative_id);
        }
        state
            .registry
            .track_request(request_id, request.symbols(), channel_type);

        info!(
            request_id,
            symbols = ?request.symbols(),
            channel = %channel_type,
            "Subscribing"
        );
        self.send(frame);
        Ok(request_id)
    }

    /// Sends a ping. When `on_pong` is given it becomes the pong handler.
    pub fn ping(&self, on_pong: Option<PongHandler>) -> Result<RequestId, StreamError> {
        let _entered = self.shared.span.enter();
        let mut state = self.shared.state.lock();
        if state.connection != ConnectionState::Open {
            return Err(StreamError::NotOpen(state.connection));
        }

        let request_id = state.ids.next_id();
        let frame = self.shared.protocol.encode_ping(request_id)?;
        if let Some(handler) = on_pong {
            state.handlers.set(Handler::Pong(handler));
        }
        state.last_ping = Some(request_id);

        debug!(request_id, "Ping");
        self.send(frame);
        Ok(request_id)
    }

    pub fn close(&self) -> Result<(), StreamError> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        let result = self.shared.transport.close();
        self.on_closed(CloseReason::Requested);
        result.map_err(StreamError::from)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn exchange(&self) -> Exchange {
        self.shared.protocol.exchange()
    }

    pub fn span(&self) -> &Span {
        &self.shared.span
    }

    pub fn handler_names(&self) -> HashSet<HandlerKey> {
        self.shared.state.lock().handlers.names()
    }

    /// Number of `(symbol, channel type)` pairs currently tracked.
    pub fn channel_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    // Send failures are not retried; the request is lost and the caller finds out
    // through the missing acknowledgment.
    fn send(&self, frame: String) {
        trace!("Sending message: {frame}");
        match self.shared.transport.send(frame) {
            Ok(()) => debug!("Message sent"),
            Err(error) => error!(%error, "Failed to send message"),
        }
    }
}
