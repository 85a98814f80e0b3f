use crate::serialize_to_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xb_types::{
    split_channel_name, ChannelId, ChannelType, ChannelUpdate, DecodedMessage, Exchange,
    ExchangeProtocol, Pong, ProtocolError, RequestId, SubscriptionRequest, SubscriptionState,
    SubscriptionStatus, SystemStatus, UnknownEvent,
};

const URL: &str = "wss://ws.kraken.com";

const SUPPORTED_CHANNELS: [ChannelType; 5] = [
    ChannelType::Ticker,
    ChannelType::Ohlc,
    ChannelType::Trade,
    ChannelType::Spread,
    ChannelType::Book,
];

/// Kraken websocket v1: channel updates arrive as positional arrays, everything else
/// as objects discriminated by `event`.
#[derive(Default)]
pub struct KrakenProtocol {}

impl ExchangeProtocol for KrakenProtocol {
    fn exchange(&self) -> Exchange {
        Exchange::Kraken
    }

    fn url(&self) -> &str {
        URL
    }

    fn supports(&self, channel_type: ChannelType) -> bool {
        SUPPORTED_CHANNELS.contains(&channel_type)
    }

    fn encode_subscribe(
        &self,
        request: &SubscriptionRequest,
        request_id: RequestId,
    ) -> Result<String, serde_json::Error> {
        let params = request.params();
        let mut subscription = Map::new();
        subscription.insert(
            "name".to_string(),
            serde_json::to_value(request.channel_type())?,
        );
        if let Some(interval) = params.interval() {
            subscription.insert("interval".to_string(), interval.clone());
        }
        if let Some(depth) = params.depth() {
            subscription.insert("depth".to_string(), Value::from(depth));
        }
        for (key, value) in params.extra() {
            subscription.insert(key.clone(), value.clone());
        }

        serialize_to_json(&Action::Subscribe(Subscribe {
            reqid: request_id,
            pair: request.symbols(),
            subscription,
        }))
    }

    fn encode_ping(&self, request_id: RequestId) -> Result<String, serde_json::Error> {
        serialize_to_json(&Action::Ping(Ping { reqid: request_id }))
    }

    fn decode(&self, value: Value) -> Result<DecodedMessage, ProtocolError> {
        match value {
            Value::Array(items) => Ok(decode_channel_update(items)),
            Value::Object(_) => decode_event(value),
            other => Ok(UnknownEvent::new(None, other).into()),
        }
    }
}

// [channel_id, payload.., "<channel>[-<interval>]", pair]
fn decode_channel_update(items: Vec<Value>) -> DecodedMessage {
    if let [id, payload @ .., name, pair] = items.as_slice() {
        if payload.is_empty() {
            return UnknownEvent::new(None, Value::Array(items)).into();
        }
        if let (Some(channel_id), Some(name), Some(symbol)) =
            (ChannelId::from_value(id), name.as_str(), pair.as_str())
        {
            let (channel, interval) = split_channel_name(name);
            let channel_type = channel
                .parse::<ChannelType>()
                .ok()
                .filter(|c| SUPPORTED_CHANNELS.contains(c));

            if let Some(channel_type) = channel_type {
                let payload = match payload {
                    [single] => single.clone(),
                    many => Value::Array(many.to_vec()),
                };
                return DecodedMessage::ChannelUpdate(ChannelUpdate {
                    channel_id,
                    symbol: symbol.to_string(),
                    channel_type,
                    interval: interval.map(str::to_string),
                    payload,
                });
            }

            let name = name.to_string();
            return UnknownEvent::new(Some(&name), Value::Array(items)).into();
        }
    }

    UnknownEvent::new(None, Value::Array(items)).into()
}

fn decode_event(value: Value) -> Result<DecodedMessage, ProtocolError> {
    let event = match Event::deserialize(&value) {
        Ok(event) => event,
        Err(_) => Event::Unknown,
    };

    let message = match event {
        Event::Heartbeat => DecodedMessage::Heartbeat,
        Event::Pong(pong) => DecodedMessage::Pong(Pong {
            request_id: pong.reqid,
        }),
        Event::SubscriptionStatus(status) => {
            DecodedMessage::SubscriptionStatus(subscription_status(status))
        }
        Event::SystemStatus(status) => DecodedMessage::SystemStatus(SystemStatus {
            version: status.version,
            status: status.status,
            connection_id: status.connection_id,
        }),
        Event::Error(error) => {
            return Err(ProtocolError {
                request_id: error.reqid,
                code: None,
                message: error
                    .error_message
                    .unwrap_or_else(|| "unspecified error".to_string()),
            })
        }
        Event::Unknown => {
            let name = value.get("event").and_then(Value::as_str).map(str::to_string);
            UnknownEvent::new(name.as_deref(), value).into()
        }
    };
    Ok(message)
}

fn subscription_status(message: SubscriptionStatusMessage) -> SubscriptionStatus {
    let channel_type = message
        .subscription
        .as_ref()
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .or_else(|| message.channel_name.as_deref().map(|n| split_channel_name(n).0))
        .and_then(|name| name.parse::<ChannelType>().ok());

    SubscriptionStatus {
        request_id: message.reqid,
        channel_id: message.channel_id.as_ref().and_then(ChannelId::from_value),
        symbol: message.pair,
        channel_type,
        channel_name: message.channel_name,
        status: SubscriptionState::from(message.status.as_str()),
        error: message.error_message,
        subscription: message.subscription,
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum Action<'a> {
    Ping(Ping),
    Subscribe(Subscribe<'a>),
}

#[derive(Serialize)]
struct Ping {
    reqid: RequestId,
}

#[derive(Serialize)]
struct Subscribe<'a> {
    reqid: RequestId,
    pair: &'a [String],
    subscription: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum Event {
    Heartbeat,
    Pong(PongMessage),
    SubscriptionStatus(SubscriptionStatusMessage),
    SystemStatus(SystemStatusMessage),
    Error(ErrorMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct PongMessage {
    reqid: Option<RequestId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatusMessage {
    #[serde(rename = "channelID")]
    channel_id: Option<Value>,
    channel_name: Option<String>,
    pair: Option<String>,
    status: String,
    reqid: Option<RequestId>,
    error_message: Option<String>,
    subscription: Option<Value>,
}

#[derive(Deserialize)]
struct SystemStatusMessage {
    #[serde(rename = "connectionID")]
    connection_id: Option<u64>,
    status: String,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorMessage {
    reqid: Option<RequestId>,
    error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;
    use xb_types::SubscriptionParams;

    fn decode(value: Value) -> Result<DecodedMessage, ProtocolError> {
        KrakenProtocol::default().decode(value)
    }

    #[test]
    fn encode_subscribe_ticker() {
        let request = SubscriptionRequest::new(["XBT/USD"], ChannelType::Ticker);
        let json = KrakenProtocol::default()
            .encode_subscribe(&request, 3)
            .unwrap();

        assert_eq!(
            serde_json::from_str::<Value>(&json).unwrap(),
            json!({
                "event": "subscribe",
                "reqid": 3,
                "pair": ["XBT/USD"],
                "subscription": { "name": "ticker" }
            })
        );
    }

    #[test]
    fn encode_subscribe_merges_params() {
        let request = SubscriptionRequest::new(["XBT/USD", "ETH/USD"], ChannelType::Book)
            .with_params(
                SubscriptionParams::new()
                    .with_depth(25)
                    .with_param("snapshot", false),
            );
        let json = KrakenProtocol::default()
            .encode_subscribe(&request, 1)
            .unwrap();

        assert_eq!(
            serde_json::from_str::<Value>(&json).unwrap(),
            json!({
                "event": "subscribe",
                "reqid": 1,
                "pair": ["XBT/USD", "ETH/USD"],
                "subscription": { "name": "book", "depth": 25, "snapshot": false }
            })
        );
    }

    #[test]
    fn encode_ping() {
        let json = KrakenProtocol::default().encode_ping(42).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&json).unwrap(),
            json!({ "event": "ping", "reqid": 42 })
        );
    }

    #[test_case(ChannelType::Ticker, true)]
    #[test_case(ChannelType::Ohlc, true)]
    #[test_case(ChannelType::Trade, true)]
    #[test_case(ChannelType::Spread, true)]
    #[test_case(ChannelType::Book, true)]
    #[test_case(ChannelType::Kline, false)]
    fn supported_channels(channel_type: ChannelType, expected: bool) {
        assert_eq!(KrakenProtocol::default().supports(channel_type), expected);
    }

    #[test]
    fn decode_ticker_update() {
        let tick = json!({ "a": ["5525.40000", 1, "1.000"], "c": ["5525.10000", "0.00398963"] });
        let message = decode(json!([340, tick.clone(), "ticker", "XBT/USD"])).unwrap();

        assert_eq!(
            message,
            DecodedMessage::ChannelUpdate(ChannelUpdate {
                channel_id: ChannelId::Numeric(340),
                symbol: "XBT/USD".to_string(),
                channel_type: ChannelType::Ticker,
                interval: None,
                payload: tick,
            })
        );
    }

    #[test]
    fn decode_ohlc_update_with_interval() {
        let candle = json!(["1542057314.748456", "1542057360.435743", "3586.70000"]);
        let message = decode(json!([42, candle.clone(), "ohlc-5", "XBT/USD"])).unwrap();

        let DecodedMessage::ChannelUpdate(update) = &message else {
            panic!("expected channel update, got {message:?}");
        };
        assert_eq!(update.channel_type, ChannelType::Ohlc);
        assert_eq!(update.interval.as_deref(), Some("5"));
        assert_eq!(update.payload, candle);
    }

    #[test]
    fn decode_book_update_with_asks_and_bids() {
        let asks = json!({ "a": [["5541.30000", "2.50700000", "1534614248.456738"]] });
        let bids = json!({ "b": [["5541.20000", "1.52900000", "1534614248.765567"]] });
        let message = decode(json!([1234, asks.clone(), bids.clone(), "book-10", "XBT/USD"])).unwrap();

        let DecodedMessage::ChannelUpdate(update) = &message else {
            panic!("expected channel update, got {message:?}");
        };
        assert_eq!(update.channel_type, ChannelType::Book);
        assert_eq!(update.interval.as_deref(), Some("10"));
        assert_eq!(update.payload, json!([asks, bids]));
    }

    #[test_case(json!([340, {}, "ownTrades", "XBT/USD"]), Some("ownTrades") ; "unknown channel")]
    #[test_case(json!([340, {}, "kline-1m", "XBT/USD"]), Some("kline-1m") ; "channel of another exchange")]
    #[test_case(json!([340, "ticker", "XBT/USD"]), None ; "too short")]
    #[test_case(json!(["", {}, "ticker", "XBT/USD"]), None ; "bad channel id")]
    #[test_case(json!([]), None ; "empty")]
    fn decode_unrecognised_array(value: Value, name: Option<&str>) {
        let message = decode(value.clone()).unwrap();
        assert_eq!(
            message,
            DecodedMessage::UnknownEvent(UnknownEvent::new(name, value))
        );
    }

    #[test]
    fn decode_heartbeat() {
        assert_eq!(
            decode(json!({ "event": "heartbeat" })).unwrap(),
            DecodedMessage::Heartbeat
        );
    }

    #[test_case(json!({ "event": "pong", "reqid": 9 }), Some(9))]
    #[test_case(json!({ "event": "pong" }), None)]
    fn decode_pong(value: Value, request_id: Option<RequestId>) {
        assert_eq!(
            decode(value).unwrap(),
            DecodedMessage::Pong(Pong { request_id })
        );
    }

    #[test]
    fn decode_system_status() {
        let message = decode(json!({
            "connectionID": 8628615390848610000u64,
            "event": "systemStatus",
            "status": "online",
            "version": "1.9.0"
        }))
        .unwrap();

        assert_eq!(
            message,
            DecodedMessage::SystemStatus(SystemStatus {
                version: "1.9.0".to_string(),
                status: "online".to_string(),
                connection_id: Some(8628615390848610000),
            })
        );
    }

    #[test]
    fn decode_subscription_ack() {
        let message = decode(json!({
            "channelID": 10001,
            "channelName": "ohlc-5",
            "event": "subscriptionStatus",
            "pair": "XBT/EUR",
            "reqid": 42,
            "status": "subscribed",
            "subscription": { "interval": 5, "name": "ohlc" }
        }))
        .unwrap();

        let DecodedMessage::SubscriptionStatus(status) = &message else {
            panic!("expected subscription status, got {message:?}");
        };
        assert_eq!(status.request_id, Some(42));
        assert_eq!(status.channel_id, Some(ChannelId::Numeric(10001)));
        assert_eq!(status.symbol.as_deref(), Some("XBT/EUR"));
        assert_eq!(status.channel_type, Some(ChannelType::Ohlc));
        assert_eq!(status.status, SubscriptionState::Subscribed);
        assert_eq!(status.error, None);
    }

    #[test]
    fn decode_subscription_error() {
        let message = decode(json!({
            "errorMessage": "Subscription depth not supported",
            "event": "subscriptionStatus",
            "pair": "XBT/USD",
            "status": "error",
            "subscription": { "depth": 42, "name": "book" }
        }))
        .unwrap();

        let DecodedMessage::SubscriptionStatus(status) = &message else {
            panic!("expected subscription status, got {message:?}");
        };
        assert_eq!(status.status, SubscriptionState::Error);
        assert_eq!(status.channel_type, Some(ChannelType::Book));
        assert_eq!(
            status.error.as_deref(),
            Some("Subscription depth not supported")
        );
    }

    #[test]
    fn decode_error_event_is_protocol_error() {
        let error = decode(json!({
            "errorMessage": "Malformed request",
            "event": "error",
            "reqid": 5
        }))
        .unwrap_err();

        assert_eq!(
            error,
            ProtocolError {
                request_id: Some(5),
                code: None,
                message: "Malformed request".to_string(),
            }
        );
    }

    #[test_case(json!({ "event": "foo" }), Some("foo") ; "unknown event")]
    #[test_case(json!({ "status": "online" }), None ; "missing discriminator")]
    #[test_case(json!({ "event": "systemStatus" }), Some("systemStatus") ; "malformed known event")]
    #[test_case(json!({ "event": 7 }), None ; "non string discriminator")]
    fn decode_unrecognised_object(value: Value, name: Option<&str>) {
        assert_eq!(
            decode(value.clone()).unwrap(),
            DecodedMessage::UnknownEvent(UnknownEvent::new(name, value))
        );
    }
}
