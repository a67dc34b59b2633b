use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::markets::BetOutcome;

pub const MIN_WEIGHT: f64 = 0.2;
pub const MAX_WEIGHT: f64 = 2.0;
pub const NEUTRAL_WEIGHT: f64 = 1.0;

/// Aggregated statistics for one (league, market category) or one driver.
///
/// Every field defaults so older ledger documents keep loading after fields
/// are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyCell {
    pub bet_count: u64,
    pub win_count: u64,
    /// Unit-stake profit summed over all recorded bets
    pub cumulative_profit: f64,
    /// Per-bet unit returns, most recent last (bounded)
    pub returns: Vec<f64>,
    /// Cumulative PnL after each bet, most recent last (bounded)
    pub pnl_history: Vec<f64>,
    pub sharpe: f64,
    pub sortino: f64,
    /// Most negative peak-to-trough fraction seen in `pnl_history`
    pub max_drawdown: f64,
    /// Current confidence multiplier in [MIN_WEIGHT, MAX_WEIGHT]
    pub weight: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for StrategyCell {
    fn default() -> Self {
        StrategyCell {
            bet_count: 0,
            win_count: 0,
            cumulative_profit: 0.0,
            returns: Vec::new(),
            pnl_history: Vec::new(),
            sharpe: 0.0,
            sortino: 0.0,
            max_drawdown: 0.0,
            weight: NEUTRAL_WEIGHT,
            last_updated: None,
        }
    }
}

impl StrategyCell {
    /// Average unit-stake return per bet.
    pub fn roi(&self) -> f64 {
        if self.bet_count == 0 {
            0.0
        } else {
            self.cumulative_profit / self.bet_count as f64
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.bet_count == 0 {
            0.0
        } else {
            self.win_count as f64 / self.bet_count as f64
        }
    }
}

/// One resolved bet, handed to the weight engine exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub league: String,
    /// Raw market string as alerted; classified when recorded
    pub market: String,
    pub outcome: BetOutcome,
    pub odds: f64,
    pub driver: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalStats {
    pub total_bets: u64,
    pub total_wins: u64,
    pub total_profit: f64,
    /// total_profit / total_bets, unit stake
    pub roi: f64,
}

/// The on-disk ledger document.
///
/// `stats` is league → market category → cell; `drivers` is driver → cell.
/// BTreeMaps keep the serialized document stable between writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSnapshot {
    pub stats: BTreeMap<String, BTreeMap<String, StrategyCell>>,
    pub drivers: BTreeMap<String, StrategyCell>,
    pub global: GlobalStats,
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl LedgerSnapshot {
    pub fn cell(&self, league: &str, category: &str) -> Option<&StrategyCell> {
        self.stats.get(league).and_then(|m| m.get(category))
    }

    pub fn driver(&self, driver: &str) -> Option<&StrategyCell> {
        self.drivers.get(driver)
    }

    /// Iterate every league × market cell.
    pub fn cells(&self) -> impl Iterator<Item = (&str, &str, &StrategyCell)> {
        self.stats.iter().flat_map(|(league, markets)| {
            markets
                .iter()
                .map(move |(market, cell)| (league.as_str(), market.as_str(), cell))
        })
    }

    /// Rebuild `global` from the league × market cells.
    pub fn refresh_global(&mut self) {
        let mut global = GlobalStats::default();
        for (_, _, cell) in self.cells() {
            global.total_bets += cell.bet_count;
            global.total_wins += cell.win_count;
            global.total_profit += cell.cumulative_profit;
        }
        global.roi = if global.total_bets == 0 {
            0.0
        } else {
            global.total_profit / global.total_bets as f64
        };
        self.global = global;
    }
}
