use ipwatch::alert::{AlertChannel, AlertDispatcher, LogChannel, SubscriberCache, TelegramChannel};
use ipwatch::chain::EndpointPool;
use ipwatch::config::Config;
use ipwatch::decode::EventDecoder;
use ipwatch::market::{HttpMarketData, MarketData};
use ipwatch::monitor::types::MonitorEvent;
use ipwatch::monitor::{MonitorController, MonitorSettings};
use ipwatch::registry::AssetRegistry;
use ipwatch::store::{MemoryStore, RedisStore, Store};
use ipwatch::whale::WhaleClassifier;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = if Path::new("ipwatch.toml").exists() {
        Config::load(Path::new("ipwatch.toml"))?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("ipwatch v{} starting", env!("CARGO_PKG_VERSION"));

    // --- State store ---
    let store: Arc<dyn Store> = match RedisStore::connect(&config.valkey.url, &config.valkey.prefix).await {
        Ok(s) => {
            if let Err(e) = s.ping().await {
                warn!(error = %e, "Valkey ping failed — falling back to in-memory store");
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(s)
            }
        }
        Err(e) => {
            warn!(
                error = %e,
                url = %config.valkey.url,
                "failed to connect to Valkey — falling back to in-memory store"
            );
            Arc::new(MemoryStore::new())
        }
    };

    // --- Alert channel ---
    let channel: Arc<dyn AlertChannel> = if config.has_bot_token() {
        Arc::new(TelegramChannel::new(
            config.alert.telegram_api_url.clone(),
            config.alert.bot_token.clone(),
        ))
    } else {
        warn!("no BOT_TOKEN configured — alerts will be logged only");
        Arc::new(LogChannel)
    };

    // --- Market data (high-cap exclusion) ---
    let market: Option<Arc<dyn MarketData>> = if config.market.api_url.is_empty() {
        info!("no market data API configured — high-cap exclusion disabled");
        None
    } else {
        Some(Arc::new(HttpMarketData::new(config.market.api_url.clone())))
    };

    // --- Caches and classifier ---
    let registry = Arc::new(AssetRegistry::new(config.whale.freshness_window_hours));
    let subscribers = Arc::new(SubscriberCache::new());
    if let Err(e) = registry.refresh(store.as_ref()).await {
        warn!(error = %e, "initial registry refresh failed");
    }
    if let Err(e) = subscribers.refresh(store.as_ref()).await {
        warn!(error = %e, "initial subscriber refresh failed");
    }

    let classifier = WhaleClassifier::new(&config.whale, registry.clone(), market);
    let decoder = EventDecoder::new(&config.decode);
    let pool = Arc::new(EndpointPool::from_config(&config.chain));

    // --- Monitor controller ---
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let controller = Arc::new(MonitorController::new(
        pool,
        decoder,
        registry,
        classifier,
        subscribers.clone(),
        store,
        event_tx,
        MonitorSettings::from_config(&config.monitor),
    ));

    if let Err(e) = controller.initialize().await {
        error!(error = %e, "all rpc endpoints failed — monitoring disabled");
        anyhow::bail!("unable to establish an rpc connection");
    }

    let _handles = controller.start()?;

    // --- Dispatch loop ---
    let dispatcher = AlertDispatcher::new(
        channel,
        subscribers,
        Duration::from_millis(config.alert.pacing_ms),
        config.chain.explorer_url.clone(),
        config.whale.freshness_discount,
    );

    let dispatch_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match &event {
                MonitorEvent::AssetCreated(_) | MonitorEvent::WhaleDetected { .. } => {
                    let sent = dispatcher.dispatch(&event).await;
                    info!(event = %event, recipients = sent, "alert dispatched");
                }
                MonitorEvent::Connected { endpoint } => {
                    info!(endpoint = %endpoint, "rpc connected");
                }
                MonitorEvent::Disconnected { reason } => {
                    warn!(reason = %reason, "rpc disconnected, failing over");
                }
            }
        }
    });

    // --- Shutdown ---
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    controller.stop();

    let stats = controller.stats();
    info!(
        last_asset_block = stats.last_asset_block,
        last_whale_block = stats.last_whale_block,
        monitored_tokens = stats.monitored_tokens,
        "final monitoring stats"
    );

    dispatch_task.abort();
    Ok(())
}
