use anyhow::{Context, Result};
use log::{error, info};
use scc_core::config::{self, Config, SinkKind};
use scc_core::dedupe::{DedupeAggregator, SharedAggregator};
use scc_core::messaging::{self, MessageBrokerTrait};
use scc_core::notify::{BrokerSink, LogSink, NotificationSink};
use scc_core::orchestrator::{routes_from_config, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONFIG_ENV: &str = "SCC_CONFIG";

/// Config path from the first argument, then the environment
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

fn init_logging(config: &Config) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();
}

async fn run_app() -> Result<()> {
    let path = config_path();
    let config = config::load_config(path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config);
    info!("Starting SCC event pipeline");
    match &path {
        Some(path) => info!("Configuration loaded from {:?}", path),
        None => info!("Using default configuration"),
    }

    let window_seconds = i64::try_from(config.dedupe.window_seconds)
        .context("dedupe.window_seconds is out of range")?;
    let engine = DedupeAggregator::with_window_seconds(window_seconds, config.dedupe.authoritative_source.clone())?;
    info!(
        "Dedupe window {}s, authoritative source {}",
        engine.window().num_seconds(),
        engine.authoritative_source()
    );
    let aggregator = SharedAggregator::new(engine);

    let message_broker = messaging::create_message_broker(config.transport.clone())?;
    info!(
        "Message broker configured for {}:{} (exchange {})",
        config.transport.host, config.transport.port, config.transport.exchange
    );

    let sink: Arc<dyn NotificationSink> = match config.sink.kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Broker => Arc::new(BrokerSink::new(message_broker.clone(), config.sink.routing_key.clone())),
    };

    let orchestrator = Orchestrator::new(message_broker.clone(), aggregator, sink)
        .with_routes(routes_from_config(&config));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down..."),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    let result = orchestrator.run(shutdown).await;

    message_broker.shutdown().await;
    result
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
