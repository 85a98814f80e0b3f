use crate::config::{AppConfig, FeedConfig};
use dotenv::dotenv;
use std::io;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use xb_subscriber::{connect, protocol_for, StreamClient, StreamClientBuilder};
use xb_types::{ChannelEvent, CloseReason, ConnectionState, Exchange};

mod config;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt().with_writer(io::stdout).init();

    info!("Service started");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!("Invalid configuration: {error}");
            return;
        }
    };

    let shutdown = CancellationToken::new();
    let mut connections = Vec::new();
    for feed in config.feeds {
        let (client, task) = connect(feed_client(feed), shutdown.clone()).await;
        if let Some(interval) = config.ping_interval {
            tokio::spawn(run_pings(client, interval, shutdown.clone()));
        }
        connections.push(task);
    }

    let mut first_closed = futures::future::select_all(connections);
    let remaining = select! {
        (_, _, remaining) = &mut first_closed => {
            warn!("A feed disconnected");
            remaining
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!("Failed to listen for Ctrl-C: {error}");
            }
            first_closed.into_inner()
        }
    };

    info!("Service stopping");
    shutdown.cancel();
    futures::future::join_all(remaining).await;
    info!("Service stopped");
}

fn feed_client(feed: FeedConfig) -> StreamClientBuilder {
    let exchange = feed.exchange;
    let request = feed.request();

    StreamClient::builder(protocol_for(exchange))
        .on_open(move |client: &StreamClient| {
            let subscribed = client.subscribe(request.clone(), move |event: ChannelEvent| {
                log_event(exchange, event)
            });
            if let Err(error) = subscribed {
                error!("{exchange}: Failed to subscribe: {error}");
            }
        })
        .on_close(move |reason: CloseReason| info!("{exchange}: Feed closed ({reason})"))
}

fn log_event(exchange: Exchange, event: ChannelEvent) {
    info!(
        %exchange,
        symbol = %event.symbol,
        channel = %event.channel_type,
        interval = ?event.interval,
        "{}",
        event.payload
    );
}

async fn run_pings(client: StreamClient, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        select! {
            _ = ticker.tick() => match client.state() {
                ConnectionState::Open => {
                    if let Err(error) = client.ping(None) {
                        warn!("{}: Ping failed: {error}", client.exchange());
                    }
                }
                ConnectionState::Connecting => {}
                ConnectionState::Closed => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }
}
