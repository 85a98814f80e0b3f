use crate::client::{ConnectionEvent, StreamClient, StreamClientBuilder};
use async_trait::async_trait;
use ezsockets::client::ClientCloseMode;
use ezsockets::{ClientConfig, ClientExt, CloseFrame, Error, WSError};
use std::future::Future;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, Instrument};
use xb_types::{CloseReason, Transport, TransportError};

/// Opens a websocket to the builder's exchange and drives the resulting client until
/// the connection closes or `cancellation_token` is cancelled.
///
/// The returned client is usable immediately; calls made before the connection opens
/// fail with [`xb_types::StreamError::NotOpen`].
pub async fn connect(
    builder: StreamClientBuilder,
    cancellation_token: CancellationToken,
) -> (StreamClient, JoinHandle<()>) {
    let (sender, receiver) = unbounded_channel();
    let exchange = builder.exchange();

    let (handle, future) = ezsockets::connect(
        |_| WebSocketClient { events: sender },
        ClientConfig::new(builder.url()),
    )
    .await;

    let client = builder.build(Arc::new(WebSocketTransport { handle }));
    let span = client.span().clone();
    let task = tokio::spawn(
        run_async(client.clone(), receiver, future, cancellation_token).instrument(span),
    );

    info!(%exchange, "Connecting");
    (client, task)
}

/// Feeds connection events into `client` one at a time until the connection ends.
pub async fn run_async<F>(
    client: StreamClient,
    mut events: UnboundedReceiver<ConnectionEvent>,
    future: F,
    cancellation_token: CancellationToken,
) where
    F: Future<Output = Result<(), Error>>,
{
    tokio::pin!(future);

    loop {
        select! {
            event = events.recv() => match event {
                Some(event) => client.handle_event(event),
                None => break,
            },
            result = &mut future => {
                if let Err(error) = result {
                    error!("Connection failed: {error}");
                }
                while let Ok(event) = events.try_recv() {
                    client.handle_event(event);
                }
                break;
            }
            _ = cancellation_token.cancelled() => {
                if let Err(error) = client.close() {
                    error!(%error, "Failed to close connection");
                }
                break;
            }
        }
    }

    client.on_closed(CloseReason::Disconnected);
    debug!("Connection task finished");
}

struct WebSocketClient {
    events: UnboundedSender<ConnectionEvent>,
}

impl WebSocketClient {
    fn forward(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!("Connection task gone, dropping event");
        }
    }
}

#[async_trait]
impl ClientExt for WebSocketClient {
    type Call = ();

    async fn on_text(&mut self, text: String) -> Result<(), Error> {
        self.forward(ConnectionEvent::Text(text));
        Ok(())
    }

    async fn on_binary(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        trace!(len = bytes.len(), "Ignoring binary frame");
        Ok(())
    }

    async fn on_call(&mut self, _: Self::Call) -> Result<(), Error> {
        Ok(())
    }

    async fn on_connect(&mut self) -> Result<(), Error> {
        self.forward(ConnectionEvent::Opened);
        Ok(())
    }

    async fn on_connect_fail(&mut self, error: WSError) -> Result<ClientCloseMode, Error> {
        self.forward(ConnectionEvent::Closed(CloseReason::Failed(error.to_string())));
        Ok(ClientCloseMode::Close)
    }

    async fn on_close(&mut self, frame: Option<CloseFrame>) -> Result<ClientCloseMode, Error> {
        let reason = frame
            .map(|f| format!("{:?}: {}", f.code, f.reason))
            .unwrap_or_else(|| "no close frame".to_string());
        self.forward(ConnectionEvent::Closed(CloseReason::Remote(reason)));
        Ok(ClientCloseMode::Close)
    }

    async fn on_disconnect(&mut self) -> Result<ClientCloseMode, Error> {
        self.forward(ConnectionEvent::Closed(CloseReason::Disconnected));
        Ok(ClientCloseMode::Close)
    }
}

struct WebSocketTransport {
    handle: ezsockets::Client<WebSocketClient>,
}

impl Transport for WebSocketTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.handle
            .text(text)
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn close(&self) -> Result<(), TransportError> {
        self.handle
            .close(None)
            .map(|_| ())
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
