//! Sample-size state machine and the per-state weight update policy.
//!
//! | state       | bets      | weight                                         |
//! |-------------|-----------|------------------------------------------------|
//! | FROZEN      | n < 30    | exactly 1.0, drawdown brake off                |
//! | WARMING_UP  | 30 ≤ n<50 | moves toward target by at most ±0.1 per bet    |
//! | ACTIVE      | n ≥ 50    | target: ROI + risk ratio, clamped, brake on    |
//!
//! The state is a pure function of `bet_count`, which only ever grows, so a
//! cell can never fall back to an earlier state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::ledger::metrics::{max_drawdown, push_capped, sharpe, sortino};
use crate::ledger::models::{StrategyCell, MAX_WEIGHT, MIN_WEIGHT, NEUTRAL_WEIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellState {
    Frozen,
    WarmingUp,
    Active,
}

impl CellState {
    pub fn for_bet_count(n: u64, policy: &WeightPolicy) -> Self {
        if n < policy.frozen_below {
            CellState::Frozen
        } else if n < policy.active_from {
            CellState::WarmingUp
        } else {
            CellState::Active
        }
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CellState::Frozen => "FROZEN",
            CellState::WarmingUp => "WARMING_UP",
            CellState::Active => "ACTIVE",
        })
    }
}

#[derive(Debug, Clone)]
pub struct WeightPolicy {
    /// Cells with fewer bets are FROZEN
    pub frozen_below: u64,
    /// Cells with at least this many bets are ACTIVE
    pub active_from: u64,
    /// Largest weight change per recorded bet while WARMING_UP
    pub max_step: f64,
    /// Weight added per unit of average return
    pub roi_sensitivity: f64,
    /// Weight added per unit of risk ratio (after capping)
    pub risk_sensitivity: f64,
    pub risk_ratio_cap: f64,
    /// Max drawdown at or below this trips the brake
    pub drawdown_brake: f64,
    pub drawdown_penalty: f64,
    /// Length of the bounded return and PnL series
    pub history_cap: usize,
    /// Substituted for missing or invalid odds
    pub default_odds: f64,
    pub max_odds: f64,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        WeightPolicy {
            frozen_below: 30,
            active_from: 50,
            max_step: 0.1,
            roi_sensitivity: 1.5,
            risk_sensitivity: 0.1,
            risk_ratio_cap: 3.0,
            drawdown_brake: -0.20,
            drawdown_penalty: 0.7,
            history_cap: 500,
            default_odds: 1.9,
            max_odds: 100.0,
        }
    }
}

impl WeightPolicy {
    pub fn state_of(&self, cell: &StrategyCell) -> CellState {
        CellState::for_bet_count(cell.bet_count, self)
    }

    /// Odds used in profit math always land in (1.0, max_odds].
    pub fn normalize_odds(&self, odds: f64) -> f64 {
        if !odds.is_finite() || odds <= 1.0 {
            self.default_odds
        } else {
            odds.min(self.max_odds)
        }
    }

    /// The unconstrained ACTIVE weight for a cell's current statistics.
    pub fn target_weight(&self, cell: &StrategyCell) -> f64 {
        let risk_ratio = if cell.sortino.is_finite() && cell.sortino != 0.0 {
            cell.sortino
        } else {
            cell.sharpe
        };
        let risk_term = risk_ratio.clamp(-self.risk_ratio_cap, self.risk_ratio_cap) * self.risk_sensitivity;
        let mut weight = (NEUTRAL_WEIGHT + cell.roi() * self.roi_sensitivity + risk_term)
            .clamp(MIN_WEIGHT, MAX_WEIGHT);

        if cell.max_drawdown <= self.drawdown_brake {
            // Deep drawdown overrides a positive ROI signal.
            weight = (weight.min(NEUTRAL_WEIGHT) * self.drawdown_penalty).clamp(MIN_WEIGHT, MAX_WEIGHT);
        }
        weight
    }

    fn next_weight(&self, cell: &StrategyCell, previous: f64) -> f64 {
        match self.state_of(cell) {
            CellState::Frozen => NEUTRAL_WEIGHT,
            CellState::WarmingUp => {
                let previous = previous.clamp(MIN_WEIGHT, MAX_WEIGHT);
                self.target_weight(cell)
                    .clamp(previous - self.max_step, previous + self.max_step)
                    .clamp(MIN_WEIGHT, MAX_WEIGHT)
            }
            CellState::Active => self.target_weight(cell),
        }
    }

    /// Fold one resolved bet (unit stake) into `cell`. `odds` must already
    /// be normalized.
    pub fn apply_result(&self, cell: &mut StrategyCell, won: bool, odds: f64, at: DateTime<Utc>) {
        let profit = if won { odds - 1.0 } else { -1.0 };

        cell.bet_count += 1;
        if won {
            cell.win_count += 1;
        }
        cell.cumulative_profit += profit;
        push_capped(&mut cell.returns, profit, self.history_cap);
        push_capped(&mut cell.pnl_history, cell.cumulative_profit, self.history_cap);

        cell.sharpe = sharpe(&cell.returns);
        cell.sortino = sortino(&cell.returns);
        cell.max_drawdown = max_drawdown(&cell.pnl_history);

        let previous = cell.weight;
        cell.weight = self.next_weight(cell, previous);
        cell.last_updated = Some(at);
    }
}
