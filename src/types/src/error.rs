use crate::{ChannelType, ConnectionState, Exchange, RequestId};
use thiserror::Error;

/// A subscription request that was rejected before anything was sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("channel name \"{0}\" is not a recognised channel type")]
    UnknownChannel(String),

    #[error("channel type \"{channel}\" is not supported by {exchange}")]
    UnsupportedChannel {
        exchange: Exchange,
        channel: ChannelType,
    },

    #[error("a subscription needs at least one symbol")]
    EmptySymbols,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Close failed: {0}")]
    Close(String),
}

/// An explicit error object returned by the exchange for one of our requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("exchange rejected request{}: {message}", request_suffix(.request_id, .code))]
pub struct ProtocolError {
    pub request_id: Option<RequestId>,
    pub code: Option<i64>,
    pub message: String,
}

fn request_suffix(request_id: &Option<RequestId>, code: &Option<i64>) -> String {
    let mut suffix = String::new();
    if let Some(id) = request_id {
        suffix.push_str(&format!(" {id}"));
    }
    if let Some(code) = code {
        suffix.push_str(&format!(" (code {code})"));
    }
    suffix
}

/// Errors returned synchronously to callers of the stream client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("connection is {0}, not open")]
    NotOpen(ConnectionState),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let error = ProtocolError {
            request_id: Some(7),
            code: Some(2),
            message: "Invalid request".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "exchange rejected request 7 (code 2): Invalid request"
        );

        let error = ProtocolError {
            request_id: None,
            code: None,
            message: "Unsupported event".to_string(),
        };
        assert_eq!(error.to_string(), "exchange rejected request: Unsupported event");

        let error = ProtocolError {
            request_id: None,
            code: Some(-1121),
            message: "Invalid symbol.".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "exchange rejected request (code -1121): Invalid symbol."
        );
    }

    #[test]
    fn protocol_error_is_a_std_error() {
        let error: Box<dyn std::error::Error> = Box::new(ProtocolError {
            request_id: Some(3),
            code: None,
            message: "Subscription depth not supported".to_string(),
        });
        assert!(error.source().is_none());
        assert_eq!(
            error.to_string(),
            "exchange rejected request 3: Subscription depth not supported"
        );
    }

    #[test]
    fn unsupported_channel_display() {
        let error = ValidationError::UnsupportedChannel {
            exchange: Exchange::Kraken,
            channel: ChannelType::Kline,
        };
        assert_eq!(
            error.to_string(),
            "channel type \"kline\" is not supported by kraken"
        );
    }
}
