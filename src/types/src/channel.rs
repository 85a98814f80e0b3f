use crate::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Public market-data channel kinds. This set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Ticker,
    Ohlc,
    Trade,
    Spread,
    Book,
    Kline,
}

impl ChannelType {
    pub const ALL: [ChannelType; 6] = [
        ChannelType::Ticker,
        ChannelType::Ohlc,
        ChannelType::Trade,
        ChannelType::Spread,
        ChannelType::Book,
        ChannelType::Kline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Ticker => "ticker",
            ChannelType::Ohlc => "ohlc",
            ChannelType::Trade => "trade",
            ChannelType::Spread => "spread",
            ChannelType::Book => "book",
            ChannelType::Kline => "kline",
        }
    }
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownChannel(s.to_string()))
    }
}

/// Splits a combined channel name such as `ohlc-5` or `book-10` into its channel
/// type name and optional interval.
pub fn split_channel_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('-') {
        Some((channel, interval)) if !interval.is_empty() => (channel, Some(interval)),
        Some((channel, _)) => (channel, None),
        None => (name, None),
    }
}

/// Server-side identity of a subscribed channel: a numeric id (Kraken) or a stream
/// name (Binance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Numeric(u64),
    Named(String),
}

impl ChannelId {
    pub fn from_value(value: &Value) -> Option<ChannelId> {
        match value {
            Value::Number(n) => n.as_u64().map(ChannelId::Numeric),
            Value::String(s) if !s.is_empty() => Some(ChannelId::Named(s.clone())),
            _ => None,
        }
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Numeric(id) => write!(f, "{id}"),
            ChannelId::Named(name) => f.write_str(name),
        }
    }
}

/// Type-specific parameters of a subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionParams {
    interval: Option<Value>,
    depth: Option<u32>,
    extra: Map<String, Value>,
}

impl SubscriptionParams {
    pub fn new() -> SubscriptionParams {
        SubscriptionParams::default()
    }

    /// Candle interval: minutes for Kraken (`5`), a label for Binance (`"1m"`).
    pub fn with_interval(mut self, interval: impl Into<Value>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Any other exchange-specific key, passed through verbatim.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn interval(&self) -> Option<&Value> {
        self.interval.as_ref()
    }

    pub fn interval_label(&self) -> Option<String> {
        match self.interval.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    symbols: Vec<String>,
    channel_type: ChannelType,
    params: SubscriptionParams,
}

impl SubscriptionRequest {
    pub fn new<I, S>(symbols: I, channel_type: ChannelType) -> SubscriptionRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SubscriptionRequest {
            symbols: symbols.into_iter().map(Into::into).collect(),
            channel_type,
            params: SubscriptionParams::default(),
        }
    }

    pub fn with_params(mut self, params: SubscriptionParams) -> Self {
        self.params = params;
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn params(&self) -> &SubscriptionParams {
        &self.params
    }
}
