use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

mod channel;
mod error;
mod message;

pub use channel::{
    split_channel_name, ChannelId, ChannelType, SubscriptionParams, SubscriptionRequest,
};
pub use error::{ProtocolError, StreamError, TransportError, ValidationError};
pub use message::{
    ChannelEvent, ChannelUpdate, DecodedMessage, Pong, SubscriptionState, SubscriptionStatus,
    SystemStatus, UnknownEvent,
};

/// Correlation id stamped on every outbound request that may receive a reply.
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    Kraken,
    Binance,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Kraken => "kraken",
            Exchange::Binance => "binance",
        }
    }
}

impl Display for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kraken" => Ok(Exchange::Kraken),
            "binance" => Ok(Exchange::Binance),
            other => Err(format!("unknown exchange \"{other}\"")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        })
    }
}

/// Why a connection moved to [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The application called `close` or cancelled the connection.
    Requested,
    /// The server sent a close frame.
    Remote(String),
    /// The connection dropped without a close frame.
    Disconnected,
    /// The connection could not be established.
    Failed(String),
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("requested"),
            CloseReason::Remote(frame) => write!(f, "closed by server ({frame})"),
            CloseReason::Disconnected => f.write_str("disconnected"),
            CloseReason::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// Wire format of one exchange family.
///
/// Implementations are stateless: they turn requests into frames and frames into
/// [`DecodedMessage`]s. Correlation and channel bookkeeping live in the client.
pub trait ExchangeProtocol: Send + Sync {
    fn exchange(&self) -> Exchange;

    fn url(&self) -> &str;

    fn supports(&self, channel_type: ChannelType) -> bool;

    /// Checks a request before anything is registered or sent.
    fn validate(&self, request: &SubscriptionRequest) -> Result<(), ValidationError> {
        if request.symbols().is_empty() {
            return Err(ValidationError::EmptySymbols);
        }
        if !self.supports(request.channel_type()) {
            return Err(ValidationError::UnsupportedChannel {
                exchange: self.exchange(),
                channel: request.channel_type(),
            });
        }
        Ok(())
    }

    /// Channel id the client can assign before the server confirms one.
    fn channel_id(&self, _symbol: &str, _request: &SubscriptionRequest) -> Option<ChannelId> {
        None
    }

    fn encode_subscribe(
        &self,
        request: &SubscriptionRequest,
        request_id: RequestId,
    ) -> Result<String, serde_json::Error>;

    fn encode_ping(&self, request_id: RequestId) -> Result<String, serde_json::Error>;

    /// Classifies one parsed frame. Only an explicit error object from the exchange
    /// is returned as `Err`; anything unrecognised becomes [`DecodedMessage::UnknownEvent`].
    fn decode(&self, value: Value) -> Result<DecodedMessage, ProtocolError>;
}

/// Outbound half of a connection.
pub trait Transport: Send + Sync {
    fn send(&self, text: String) -> Result<(), TransportError>;

    fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("kraken", Exchange::Kraken)]
    #[test_case("Binance", Exchange::Binance)]
    #[test_case(" KRAKEN ", Exchange::Kraken)]
    fn parse_exchange(s: &str, expected: Exchange) {
        assert_eq!(Exchange::from_str(s).unwrap(), expected);
    }

    #[test]
    fn parse_unknown_exchange() {
        assert!(Exchange::from_str("lbank").is_err());
    }
}
