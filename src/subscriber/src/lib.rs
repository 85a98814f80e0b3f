use xb_exchanges_binance::BinanceProtocol;
use xb_exchanges_kraken::KrakenProtocol;
use xb_types::{Exchange, ExchangeProtocol};

mod client;
mod connection;
mod dispatcher;
mod handlers;
mod ids;
mod registry;

pub use client::{ConnectionEvent, StreamClient, StreamClientBuilder};
pub use connection::{connect, run_async};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use handlers::{
    ChannelHandler, ErrorHandler, Handler, HandlerKey, HandlerTable, HeartbeatHandler,
    PongHandler, SubscriptionStatusHandler, SystemStatusHandler,
};
pub use ids::IdGenerator;
pub use registry::{ChannelEntry, ChannelKey, ChannelRegistry, PendingRequest, ResolvedChannel};

pub fn protocol_for(exchange: Exchange) -> Box<dyn ExchangeProtocol> {
    match exchange {
        Exchange::Kraken => Box::new(KrakenProtocol::default()),
        Exchange::Binance => Box::new(BinanceProtocol::default()),
    }
}
