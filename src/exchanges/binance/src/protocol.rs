use crate::serialize_to_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xb_types::{
    ChannelId, ChannelType, ChannelUpdate, DecodedMessage, Exchange, ExchangeProtocol, Pong,
    ProtocolError, RequestId, SubscriptionRequest, SubscriptionState, SubscriptionStatus,
    UnknownEvent,
};

// Combined-stream endpoint: every update arrives wrapped as {"stream": .., "data": ..}
const URL: &str = "wss://stream.binance.com:9443/stream";

const DEFAULT_KLINE_INTERVAL: &str = "1m";

const SUPPORTED_CHANNELS: [ChannelType; 5] = [
    ChannelType::Ticker,
    ChannelType::Trade,
    ChannelType::Spread,
    ChannelType::Book,
    ChannelType::Kline,
];

/// Binance spot streams. Requests are JSON-RPC style `{method, params, id}` and every
/// reply echoes the `id`; market data is keyed by stream name.
#[derive(Default)]
pub struct BinanceProtocol {}

impl BinanceProtocol {
    /// Stream name for one symbol of a request, e.g. `btcusdt@kline_1m`.
    pub fn stream_name(symbol: &str, request: &SubscriptionRequest) -> String {
        let symbol = symbol.to_lowercase();
        let params = request.params();
        match request.channel_type() {
            ChannelType::Ticker => format!("{symbol}@ticker"),
            ChannelType::Trade => format!("{symbol}@trade"),
            ChannelType::Spread => format!("{symbol}@bookTicker"),
            ChannelType::Book => match params.depth() {
                Some(depth) => format!("{symbol}@depth{depth}"),
                None => format!("{symbol}@depth"),
            },
            ChannelType::Kline | ChannelType::Ohlc => {
                let interval = params
                    .interval_label()
                    .unwrap_or_else(|| DEFAULT_KLINE_INTERVAL.to_string());
                format!("{symbol}@kline_{interval}")
            }
        }
    }
}

impl ExchangeProtocol for BinanceProtocol {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn url(&self) -> &str {
        URL
    }

    fn supports(&self, channel_type: ChannelType) -> bool {
        SUPPORTED_CHANNELS.contains(&channel_type)
    }

    fn channel_id(&self, symbol: &str, request: &SubscriptionRequest) -> Option<ChannelId> {
        Some(ChannelId::Named(Self::stream_name(symbol, request)))
    }

    fn encode_subscribe(
        &self,
        request: &SubscriptionRequest,
        request_id: RequestId,
    ) -> Result<String, serde_json::Error> {
        let streams = request
            .symbols()
            .iter()
            .map(|symbol| Self::stream_name(symbol, request))
            .collect();

        serialize_to_json(&Request {
            method: Method::Subscribe,
            params: Some(streams),
            id: request_id,
        })
    }

    // There is no application-level ping on this API; listing subscriptions is the
    // cheapest request that gets a correlated reply.
    fn encode_ping(&self, request_id: RequestId) -> Result<String, serde_json::Error> {
        serialize_to_json(&Request {
            method: Method::ListSubscriptions,
            params: None,
            id: request_id,
        })
    }

    fn decode(&self, value: Value) -> Result<DecodedMessage, ProtocolError> {
        let Value::Object(map) = &value else {
            return Ok(UnknownEvent::new(None, value).into());
        };

        if let Some(error) = map.get("error") {
            return Err(protocol_error(map, error));
        }

        if let (Some(id), Some(result)) = (map.get("id").and_then(Value::as_u64), map.get("result"))
        {
            return Ok(match result {
                Value::Null => {
                    let mut status = SubscriptionStatus::new(SubscriptionState::Subscribed);
                    status.request_id = Some(id);
                    DecodedMessage::SubscriptionStatus(status)
                }
                Value::Array(_) => DecodedMessage::Pong(Pong {
                    request_id: Some(id),
                }),
                _ => UnknownEvent::new(Some("result"), value).into(),
            });
        }

        if let (Some(stream), Some(data)) =
            (map.get("stream").and_then(Value::as_str), map.get("data"))
        {
            return Ok(match decode_stream(stream, data) {
                Some(update) => DecodedMessage::ChannelUpdate(update),
                None => {
                    let stream = stream.to_string();
                    UnknownEvent::new(Some(&stream), value).into()
                }
            });
        }

        if let Some(event) = map.get("e").and_then(Value::as_str) {
            return Ok(match decode_raw_event(&value) {
                Some(update) => DecodedMessage::ChannelUpdate(update),
                None => {
                    let event = event.to_string();
                    UnknownEvent::new(Some(&event), value).into()
                }
            });
        }

        Ok(UnknownEvent::new(None, value).into())
    }
}

fn protocol_error(map: &Map<String, Value>, error: &Value) -> ProtocolError {
    ProtocolError {
        request_id: map.get("id").and_then(Value::as_u64),
        code: error.get("code").and_then(Value::as_i64),
        message: error
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error")
            .to_string(),
    }
}

/// Splits `<symbol>@<kind>` into symbol, channel type and interval (kline interval or
/// book depth).
fn parse_stream_name(stream: &str) -> Option<(String, ChannelType, Option<String>)> {
    let (symbol, kind) = stream.split_once('@')?;
    if symbol.is_empty() {
        return None;
    }

    let (channel_type, interval) = match kind {
        "ticker" => (ChannelType::Ticker, None),
        "trade" => (ChannelType::Trade, None),
        "bookTicker" => (ChannelType::Spread, None),
        _ => {
            if let Some(interval) = kind.strip_prefix("kline_") {
                (ChannelType::Kline, Some(interval.to_string()))
            } else if let Some(rest) = kind.strip_prefix("depth") {
                let levels = rest.split('@').next().filter(|l| !l.is_empty());
                (ChannelType::Book, levels.map(str::to_string))
            } else {
                return None;
            }
        }
    };

    Some((symbol.to_uppercase(), channel_type, interval))
}

fn decode_stream(stream: &str, data: &Value) -> Option<ChannelUpdate> {
    let (symbol, channel_type, interval) = parse_stream_name(stream)?;
    Some(ChannelUpdate {
        channel_id: ChannelId::Named(stream.to_string()),
        symbol,
        channel_type,
        interval,
        payload: data.clone(),
    })
}

fn decode_raw_event(value: &Value) -> Option<ChannelUpdate> {
    let event = RawEvent::deserialize(value).ok()?;
    let (channel_type, interval, kind) = match event.event.as_str() {
        "24hrTicker" => (ChannelType::Ticker, None, "ticker".to_string()),
        "trade" => (ChannelType::Trade, None, "trade".to_string()),
        "depthUpdate" => (ChannelType::Book, None, "depth".to_string()),
        "kline" => {
            let interval = event.kline?.interval;
            let kind = format!("kline_{interval}");
            (ChannelType::Kline, Some(interval), kind)
        }
        _ => return None,
    };

    Some(ChannelUpdate {
        channel_id: ChannelId::Named(format!("{}@{kind}", event.symbol.to_lowercase())),
        symbol: event.symbol,
        channel_type,
        interval,
        payload: value.clone(),
    })
}

#[derive(Serialize)]
struct Request {
    method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Vec<String>>,
    id: RequestId,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Method {
    Subscribe,
    ListSubscriptions,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: Option<KlineBody>,
}

#[derive(Deserialize)]
struct KlineBody {
    #[serde(rename = "i")]
    interval: String,
}
