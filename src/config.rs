use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::settlement::SettlementConfig;
use crate::weights::DynamicThresholdCalculator;

/// Bet settlement, CLV tracking and adaptive confidence weighting
#[derive(Parser, Debug, Clone)]
#[command(name = "edge-ledger", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// SQLite database path (alerts and settlements)
    #[arg(long, env = "DATABASE_PATH", default_value = "edge-ledger.db", global = true)]
    pub database_path: String,

    /// Performance ledger JSON document. Empty keeps the ledger in memory only.
    #[arg(long, env = "LEDGER_PATH", default_value = "performance_ledger.json", global = true)]
    pub ledger_path: String,

    /// Result provider base URL (TheSportsDB-compatible)
    #[arg(
        long,
        env = "RESULTS_API_URL",
        default_value = "https://www.thesportsdb.com/api/v1/json",
        global = true
    )]
    pub results_api_url: String,

    /// Result provider API key
    #[arg(long, env = "RESULTS_API_KEY", global = true)]
    pub results_api_key: Option<String>,

    /// Chat webhook for operator alerts; logged only when unset
    #[arg(long, env = "NOTIFIER_WEBHOOK_URL", global = true)]
    pub notifier_webhook_url: Option<String>,

    /// HTTP API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080", global = true)]
    pub api_addr: String,

    /// Settle matches that kicked off up to this many hours ago
    #[arg(long, env = "SETTLEMENT_LOOKBACK_HOURS", default_value = "72", global = true)]
    pub settlement_lookback_hours: i64,

    /// Minimum best-alert score for a match to be settled
    #[arg(long, env = "SETTLEMENT_MIN_SCORE", default_value = "7.0", global = true)]
    pub settlement_min_score: f64,

    /// Seconds between settlement runs in `serve`
    #[arg(long, env = "SETTLEMENT_INTERVAL_SECS", default_value = "21600", global = true)]
    pub settlement_interval_secs: u64,

    /// Odds used when an alert carries none (and for invalid odds in the ledger)
    #[arg(long, env = "DEFAULT_ODDS", default_value = "1.9", global = true)]
    pub default_odds: f64,

    /// Bookmaker margin removed from the closing line for CLV
    #[arg(long, env = "CLV_MARGIN", default_value = "0.05", global = true)]
    pub clv_margin: f64,

    /// Per-request result provider timeout in seconds
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "15", global = true)]
    pub provider_timeout_secs: u64,

    /// Max concurrent result provider lookups
    #[arg(long, env = "PROVIDER_CONCURRENCY", default_value = "4", global = true)]
    pub provider_concurrency: usize,

    /// Live alert threshold with no adjustment
    #[arg(long, env = "BASELINE_THRESHOLD", default_value = "7.5", global = true)]
    pub baseline_threshold: f64,

    #[arg(long, env = "MIN_THRESHOLD", default_value = "7.0", global = true)]
    pub min_threshold: f64,

    #[arg(long, env = "MAX_THRESHOLD", default_value = "9.0", global = true)]
    pub max_threshold: f64,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API and the periodic settlement loop (default)
    Serve,
    /// Run one settlement pass and print the summary as JSON
    Settle,
    /// Print the confidence weight for a league/market/driver
    Weight {
        #[arg(long)]
        league: String,
        #[arg(long)]
        market: String,
        #[arg(long)]
        driver: Option<String>,
        /// Also apply the weight to this base score
        #[arg(long)]
        score: Option<f64>,
    },
    /// Print the current dynamic alert threshold
    Threshold,
    /// Dump the ledger document
    Ledger,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.settlement_lookback_hours <= 2 {
            anyhow::bail!("settlement_lookback_hours must be greater than 2");
        }
        if !(self.default_odds > 1.0) {
            anyhow::bail!("default_odds must be greater than 1.0");
        }
        if !(0.0..0.5).contains(&self.clv_margin) {
            anyhow::bail!("clv_margin must be in [0.0, 0.5)");
        }
        if self.min_threshold > self.max_threshold {
            anyhow::bail!("min_threshold must not exceed max_threshold");
        }
        if !(self.min_threshold..=self.max_threshold).contains(&self.baseline_threshold) {
            anyhow::bail!(
                "baseline_threshold must be between {} and {}",
                self.min_threshold,
                self.max_threshold
            );
        }
        if self.provider_concurrency == 0 {
            anyhow::bail!("provider_concurrency must be at least 1");
        }
        url::Url::parse(&self.results_api_url)
            .map_err(|e| anyhow::anyhow!("invalid RESULTS_API_URL '{}': {}", self.results_api_url, e))?;
        if let Some(hook) = &self.notifier_webhook_url {
            url::Url::parse(hook)
                .map_err(|e| anyhow::anyhow!("invalid NOTIFIER_WEBHOOK_URL: {}", e))?;
        }
        Ok(())
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn settlement(&self) -> SettlementConfig {
        SettlementConfig {
            lookback_hours: self.settlement_lookback_hours,
            min_score: self.settlement_min_score,
            default_odds: self.default_odds,
            clv_margin: self.clv_margin,
            concurrency: self.provider_concurrency,
            provider_timeout: self.provider_timeout(),
            ..SettlementConfig::default()
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn threshold(&self) -> DynamicThresholdCalculator {
        DynamicThresholdCalculator::new(self.baseline_threshold, self.min_threshold, self.max_threshold)
    }
}
