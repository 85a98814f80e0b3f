use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use xb_subscriber::protocol_for;
use xb_types::{ChannelType, Exchange, SubscriptionParams, SubscriptionRequest, ValidationError};

const DEFAULT_EXCHANGES: &str = "kraken";
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(String),

    #[error("invalid value \"{value}\" for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub feeds: Vec<FeedConfig>,
    /// `None` disables pinging.
    pub ping_interval: Option<Duration>,
}

/// One connection: a single channel type for a list of symbols on one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub exchange: Exchange,
    pub symbols: Vec<String>,
    pub channel_type: ChannelType,
    pub interval: Option<String>,
    pub depth: Option<u32>,
}

impl FeedConfig {
    pub fn request(&self) -> SubscriptionRequest {
        let mut params = SubscriptionParams::new();
        if let Some(interval) = &self.interval {
            // Kraken takes minutes as a number, Binance takes a label such as "1m".
            params = match interval.parse::<u64>() {
                Ok(minutes) => params.with_interval(minutes),
                Err(_) => params.with_interval(Value::from(interval.as_str())),
            };
        }
        if let Some(depth) = self.depth {
            params = params.with_depth(depth);
        }
        SubscriptionRequest::new(self.symbols.iter().cloned(), self.channel_type)
            .with_params(params)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let exchanges_key = "XB_EXCHANGES";
        let exchanges = lookup(exchanges_key).unwrap_or_else(|| DEFAULT_EXCHANGES.to_string());

        let mut feeds: Vec<FeedConfig> = Vec::new();
        for name in exchanges.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let exchange = Exchange::from_str(name).map_err(|reason| ConfigError::Invalid {
                key: exchanges_key.to_string(),
                value: exchanges.clone(),
                reason,
            })?;
            if feeds.iter().any(|f| f.exchange == exchange) {
                continue;
            }
            feeds.push(feed_config(exchange, &lookup)?);
        }

        if feeds.is_empty() {
            return Err(ConfigError::Invalid {
                key: exchanges_key.to_string(),
                value: exchanges,
                reason: "no exchanges listed".to_string(),
            });
        }

        let ping_key = "XB_PING_INTERVAL_SECS";
        let ping_secs = match lookup(ping_key) {
            Some(value) => parse_number::<u64>(ping_key, &value)?,
            None => DEFAULT_PING_INTERVAL_SECS,
        };

        Ok(AppConfig {
            feeds,
            ping_interval: (ping_secs > 0).then(|| Duration::from_secs(ping_secs)),
        })
    }
}

fn feed_config<F: Fn(&str) -> Option<String>>(
    exchange: Exchange,
    lookup: &F,
) -> Result<FeedConfig, ConfigError> {
    let prefix = format!("XB_{}", exchange.as_str().to_ascii_uppercase());

    let symbols_key = format!("{prefix}_SYMBOLS");
    let symbols_value =
        lookup(symbols_key.as_str()).ok_or_else(|| ConfigError::Missing(symbols_key.clone()))?;
    let symbols: Vec<String> = symbols_value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let channel_key = format!("{prefix}_CHANNEL");
    let channel_type = match lookup(channel_key.as_str()) {
        Some(value) => ChannelType::from_str(value.trim()).map_err(|e| ConfigError::Invalid {
            key: channel_key.clone(),
            value: value.clone(),
            reason: e.to_string(),
        })?,
        None => ChannelType::Ticker,
    };

    let depth_key = format!("{prefix}_DEPTH");
    let depth = lookup(depth_key.as_str())
        .map(|value| parse_number::<u32>(&depth_key, &value))
        .transpose()?;

    let feed = FeedConfig {
        exchange,
        symbols,
        channel_type,
        interval: lookup(format!("{prefix}_INTERVAL").as_str()).map(|s| s.trim().to_string()),
        depth,
    };

    if let Err(error) = protocol_for(exchange).validate(&feed.request()) {
        let (key, value) = match error {
            ValidationError::EmptySymbols => (symbols_key, symbols_value),
            _ => (channel_key, channel_type.to_string()),
        };
        return Err(ConfigError::Invalid {
            key,
            value,
            reason: error.to_string(),
        });
    }

    Ok(feed)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_kraken_ticker() {
        let vars = [("XB_KRAKEN_SYMBOLS", "XBT/USD, ETH/USD")];
        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(
            config,
            AppConfig {
                feeds: vec![FeedConfig {
                    exchange: Exchange::Kraken,
                    symbols: vec!["XBT/USD".to_string(), "ETH/USD".to_string()],
                    channel_type: ChannelType::Ticker,
                    interval: None,
                    depth: None,
                }],
                ping_interval: Some(Duration::from_secs(30)),
            }
        );
    }

    #[test]
    fn reads_one_feed_per_exchange() {
        let config = AppConfig::from_lookup(lookup(&[
            ("XB_EXCHANGES", "kraken,binance,kraken"),
            ("XB_KRAKEN_SYMBOLS", "XBT/USD"),
            ("XB_KRAKEN_CHANNEL", "book"),
            ("XB_KRAKEN_DEPTH", "25"),
            ("XB_BINANCE_SYMBOLS", "BTCUSDT"),
            ("XB_BINANCE_CHANNEL", "kline"),
            ("XB_BINANCE_INTERVAL", "5m"),
            ("XB_PING_INTERVAL_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].channel_type, ChannelType::Book);
        assert_eq!(config.feeds[0].depth, Some(25));
        assert_eq!(config.feeds[1].exchange, Exchange::Binance);
        assert_eq!(config.feeds[1].interval.as_deref(), Some("5m"));
        assert_eq!(config.ping_interval, None);
    }

    #[test]
    fn numeric_interval_is_sent_as_a_number() {
        let feed = FeedConfig {
            exchange: Exchange::Kraken,
            symbols: vec!["XBT/USD".to_string()],
            channel_type: ChannelType::Ohlc,
            interval: Some("5".to_string()),
            depth: None,
        };

        assert_eq!(feed.request().params().interval(), Some(&Value::from(5u64)));
    }

    #[test]
    fn missing_symbols() {
        let result = AppConfig::from_lookup(lookup(&[("XB_EXCHANGES", "binance")]));
        assert_eq!(
            result,
            Err(ConfigError::Missing("XB_BINANCE_SYMBOLS".to_string()))
        );
    }

    #[test_case(&[("XB_EXCHANGES", "lbank")], "XB_EXCHANGES")]
    #[test_case(&[("XB_EXCHANGES", " , ")], "XB_EXCHANGES")]
    #[test_case(&[("XB_KRAKEN_SYMBOLS", " ")], "XB_KRAKEN_SYMBOLS")]
    #[test_case(&[("XB_KRAKEN_SYMBOLS", "XBT/USD"), ("XB_KRAKEN_CHANNEL", "candles")], "XB_KRAKEN_CHANNEL")]
    #[test_case(&[("XB_KRAKEN_SYMBOLS", "XBT/USD"), ("XB_KRAKEN_CHANNEL", "kline")], "XB_KRAKEN_CHANNEL")]
    #[test_case(&[("XB_KRAKEN_SYMBOLS", "XBT/USD"), ("XB_KRAKEN_DEPTH", "deep")], "XB_KRAKEN_DEPTH")]
    #[test_case(&[("XB_KRAKEN_SYMBOLS", "XBT/USD"), ("XB_PING_INTERVAL_SECS", "-1")], "XB_PING_INTERVAL_SECS")]
    fn invalid_values(vars: &[(&str, &str)], expected_key: &str) {
        match AppConfig::from_lookup(lookup(vars)) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, expected_key),
            other => panic!("expected invalid {expected_key}, got {other:?}"),
        }
    }
}
