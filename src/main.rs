use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

mod config;
mod dashboard;
mod db;
mod error;
mod ledger;
mod markets;
mod notify;
mod results;
mod settlement;
mod weights;

use config::{Command, Config};
use dashboard::AppState;
use db::Database;
use ledger::{FileLedgerStore, LedgerStore, MemoryLedgerStore, PerformanceLedger};
use notify::{LogNotifier, Notifier, WebhookNotifier};
use results::{ResultProvider, SportsDbResults};
use settlement::SettlementOrchestrator;
use weights::{WeightEngine, WeightPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open the performance ledger
    let store: Box<dyn LedgerStore> = if config.ledger_path.trim().is_empty() {
        warn!("LEDGER_PATH is empty: ledger kept in memory, nothing learned survives a restart");
        Box::new(MemoryLedgerStore::new())
    } else {
        Box::new(FileLedgerStore::new(&config.ledger_path))
    };
    let ledger_desc = store.describe();
    let ledger = Arc::new(
        PerformanceLedger::open(store).with_context(|| format!("open ledger {ledger_desc}"))?,
    );
    info!("Ledger opened: {} (version {})", ledger_desc, ledger.snapshot().version);

    let policy = WeightPolicy {
        default_odds: config.default_odds,
        ..WeightPolicy::default()
    };
    let engine = Arc::new(WeightEngine::new(ledger.clone(), policy));

    match config.command() {
        Command::Weight {
            league,
            market,
            driver,
            score,
        } => {
            let out = match score {
                Some(base) => serde_json::to_value(engine.apply_weight_to_score(
                    base,
                    Some(league.as_str()),
                    Some(market.as_str()),
                    driver.as_deref(),
                ))?,
                None => serde_json::to_value(engine.get_weight(
                    Some(league.as_str()),
                    Some(market.as_str()),
                    driver.as_deref(),
                ))?,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }
        Command::Threshold => {
            let decision = config.threshold().compute(&ledger.snapshot());
            println!("{}", serde_json::to_string_pretty(&decision)?);
            return Ok(());
        }
        Command::Ledger => {
            println!("{}", serde_json::to_string_pretty(ledger.snapshot().as_ref())?);
            return Ok(());
        }
        Command::Settle | Command::Serve => {}
    }

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let provider: Arc<dyn ResultProvider> = Arc::new(SportsDbResults::new(
        config.results_api_key.as_deref(),
        Some(config.results_api_url.as_str()),
        config.provider_timeout(),
    )?);
    let notifier: Arc<dyn Notifier> = match &config.notifier_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        db.clone(),
        provider,
        notifier,
        engine.clone(),
        config.settlement(),
    ));

    if config.command() == Command::Settle {
        let summary = orchestrator.run(Utc::now()).await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        ledger.flush()?;
        return Ok(());
    }

    let last_settlement = Arc::new(RwLock::new(None));

    // Periodic settlement loop
    {
        let orchestrator = orchestrator.clone();
        let last_settlement = last_settlement.clone();
        let every = Duration::from_secs(config.settlement_interval_secs.max(60));
        info!("Settlement loop every {:?}", every);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let summary = orchestrator.run(Utc::now()).await;
                *last_settlement.write().await = Some(summary);
            }
        });
    }

    // Start the HTTP API
    let app = dashboard::router(AppState {
        db,
        engine,
        threshold: config.threshold(),
        last_settlement,
    });
    let addr: SocketAddr = config.api_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run the server until Ctrl-C
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    if let Err(e) = ledger.flush() {
        error!("Final ledger flush failed: {}", e);
    }
    Ok(())
}
