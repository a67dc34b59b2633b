use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::state::{CellState, WeightPolicy};
use crate::error::EngineResult;
use crate::ledger::models::{LedgerSnapshot, SettlementRecord, StrategyCell, MAX_WEIGHT, MIN_WEIGHT, NEUTRAL_WEIGHT};
use crate::ledger::PerformanceLedger;
use crate::markets::{classify, BetOutcome};

pub const UNKNOWN_DRIVER: &str = "UNKNOWN";

/// Weight plus the reasoning behind it, for logs and alert copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightDecision {
    pub weight: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreAdjustment {
    pub score: f64,
    pub weight: f64,
    /// Empty when no adjustment was attempted
    pub justification: String,
}

/// A resolved weight and the sample size backing it.
#[derive(Debug, Clone, PartialEq)]
struct Resolved {
    weight: f64,
    samples: u64,
    source: String,
}

impl Resolved {
    fn neutral(source: impl Into<String>) -> Self {
        Resolved {
            weight: NEUTRAL_WEIGHT,
            samples: 0,
            source: source.into(),
        }
    }

    fn is_neutral(&self) -> bool {
        (self.weight - NEUTRAL_WEIGHT).abs() < f64::EPSILON
    }
}

/// Learns per-cell confidence from settled bets and serves weights to live
/// scoring.
pub struct WeightEngine {
    ledger: Arc<PerformanceLedger>,
    policy: WeightPolicy,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

impl WeightEngine {
    pub fn new(ledger: Arc<PerformanceLedger>, policy: WeightPolicy) -> Self {
        WeightEngine { ledger, policy }
    }

    pub fn ledger(&self) -> &Arc<PerformanceLedger> {
        &self.ledger
    }

    /// Record a single resolved bet. See [`WeightEngine::record_results`].
    pub fn record_result(
        &self,
        league: Option<&str>,
        market: Option<&str>,
        outcome: BetOutcome,
        odds: f64,
        driver: Option<&str>,
    ) -> EngineResult<usize> {
        let record = SettlementRecord {
            league: league.unwrap_or_default().to_string(),
            market: market.unwrap_or_default().to_string(),
            outcome,
            odds,
            driver: driver.map(str::to_string),
            timestamp: Utc::now(),
        };
        self.record_results(std::slice::from_ref(&record))
    }

    /// Fold a batch of records into the ledger under one lock hold and one
    /// persist. Each record updates its league × market cell and its driver
    /// cell; the WARMING_UP step cap is applied per record.
    ///
    /// Records with an empty league or market are skipped, as are PUSH and
    /// PENDING outcomes. Returns how many records were applied.
    pub fn record_results(&self, records: &[SettlementRecord]) -> EngineResult<usize> {
        let valid: Vec<&SettlementRecord> = records
            .iter()
            .filter(|r| {
                if r.league.trim().is_empty() || r.market.trim().is_empty() {
                    warn!(
                        "Skipping ledger record with empty league/market (league='{}', market='{}')",
                        r.league, r.market
                    );
                    return false;
                }
                if !r.outcome.is_resolved() {
                    debug!("Skipping {} record for {}/{}", r.outcome, r.league, r.market);
                    return false;
                }
                true
            })
            .collect();

        if valid.is_empty() {
            return Ok(0);
        }

        let policy = &self.policy;
        let applied = self.ledger.update(|doc| {
            for r in &valid {
                let odds = policy.normalize_odds(r.odds);
                if odds != r.odds {
                    warn!("Normalized odds {} → {} for {}/{}", r.odds, odds, r.league, r.market);
                }
                let won = r.outcome == BetOutcome::Win;
                let category = classify(Some(r.market.as_str())).as_str();
                let driver = non_empty(r.driver.as_deref()).unwrap_or(UNKNOWN_DRIVER);

                let cell = doc
                    .stats
                    .entry(r.league.trim().to_string())
                    .or_default()
                    .entry(category.to_string())
                    .or_default();
                policy.apply_result(cell, won, odds, r.timestamp);

                let driver_cell = doc.drivers.entry(driver.to_string()).or_default();
                policy.apply_result(driver_cell, won, odds, r.timestamp);
            }
            valid.len()
        })?;

        info!("Recorded {} settled bet(s) into the ledger", applied);
        Ok(applied)
    }

    /// Confidence weight for a candidate alert.
    pub fn get_weight(&self, league: Option<&str>, market: Option<&str>, driver: Option<&str>) -> WeightDecision {
        let snapshot = self.ledger.snapshot();
        self.weight_from(&snapshot, league, market, driver)
    }

    pub fn weight_from(
        &self,
        snapshot: &LedgerSnapshot,
        league: Option<&str>,
        market: Option<&str>,
        driver: Option<&str>,
    ) -> WeightDecision {
        let (Some(league), Some(market)) = (non_empty(league), non_empty(market)) else {
            return WeightDecision {
                weight: NEUTRAL_WEIGHT,
                explanation: "neutral: league or market missing".into(),
            };
        };
        let category = classify(Some(market)).as_str();

        let market_side = self.resolve_market(snapshot, league, category);
        let driver_side = match non_empty(driver) {
            Some(d) => self.resolve_driver(snapshot, d),
            None => Resolved::neutral("no driver"),
        };
        let weight = combine(&market_side, &driver_side);

        WeightDecision {
            weight,
            explanation: format!(
                "x{:.2} [{}/{}: {}; driver: {}]",
                weight, league, category, market_side.source, driver_side.source
            ),
        }
    }

    /// Multiply `base_score` by the cell weight, clamped to [0, 10].
    pub fn apply_weight_to_score(
        &self,
        base_score: f64,
        league: Option<&str>,
        market: Option<&str>,
        driver: Option<&str>,
    ) -> ScoreAdjustment {
        if non_empty(league).is_none() || non_empty(market).is_none() {
            return ScoreAdjustment {
                score: base_score,
                weight: NEUTRAL_WEIGHT,
                justification: String::new(),
            };
        }
        let decision = self.get_weight(league, market, driver);
        let score = (base_score * decision.weight).clamp(0.0, 10.0);
        ScoreAdjustment {
            score,
            weight: decision.weight,
            justification: format!("{:.2} → {:.2} {}", base_score, score, decision.explanation),
        }
    }

    fn describe_cell(&self, cell: &StrategyCell) -> String {
        format!(
            "{} n={} wr={:.0}% roi={:+.3} w={:.2}",
            self.policy.state_of(cell),
            cell.bet_count,
            cell.win_rate() * 100.0,
            cell.roi(),
            cell.weight
        )
    }

    /// League × category cell, borrowing the same category from other
    /// leagues (bet-count weighted) when the local cell is still FROZEN.
    fn resolve_market(&self, snapshot: &LedgerSnapshot, league: &str, category: &str) -> Resolved {
        let local = snapshot.cell(league, category);
        if let Some(cell) = local {
            if self.policy.state_of(cell) != CellState::Frozen {
                return Resolved {
                    weight: cell.weight,
                    samples: cell.bet_count,
                    source: format!("local {}", self.describe_cell(cell)),
                };
            }
        }

        let (weighted, samples, leagues) = snapshot
            .cells()
            .filter(|(l, m, cell)| *l != league && *m == category && self.policy.state_of(cell) != CellState::Frozen)
            .fold((0.0, 0u64, 0usize), |(w, n, k), (_, _, cell)| {
                (w + cell.weight * cell.bet_count as f64, n + cell.bet_count, k + 1)
            });

        if samples > 0 {
            let weight = (weighted / samples as f64).clamp(MIN_WEIGHT, MAX_WEIGHT);
            return Resolved {
                weight,
                samples,
                source: format!("global {category} from {leagues} league(s) n={samples} w={weight:.2}"),
            };
        }

        let local_n = local.map(|c| c.bet_count).unwrap_or(0);
        Resolved::neutral(format!("neutral (FROZEN n={local_n}, no global data)"))
    }

    fn resolve_driver(&self, snapshot: &LedgerSnapshot, driver: &str) -> Resolved {
        match snapshot.driver(driver) {
            Some(cell) if self.policy.state_of(cell) != CellState::Frozen => Resolved {
                weight: cell.weight,
                samples: cell.bet_count,
                source: format!("{driver} {}", self.describe_cell(cell)),
            },
            Some(cell) => Resolved::neutral(format!("{driver} neutral (FROZEN n={})", cell.bet_count)),
            None => Resolved::neutral(format!("{driver} neutral (no history)")),
        }
    }
}

/// Neutral passes the other side through untouched; otherwise the bet-count
/// weighted arithmetic mean.
fn combine(a: &Resolved, b: &Resolved) -> f64 {
    if a.is_neutral() {
        return b.weight;
    }
    if b.is_neutral() {
        return a.weight;
    }
    let total = a.samples + b.samples;
    let weight = if total == 0 {
        (a.weight + b.weight) / 2.0
    } else {
        (a.weight * a.samples as f64 + b.weight * b.samples as f64) / total as f64
    };
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use approx::assert_relative_eq;

    fn engine() -> WeightEngine {
        let ledger = PerformanceLedger::open(Box::new(MemoryLedgerStore::new())).unwrap();
        WeightEngine::new(Arc::new(ledger), WeightPolicy::default())
    }

    fn record_n(engine: &WeightEngine, league: &str, market: &str, driver: Option<&str>, n: usize, outcome: BetOutcome, odds: f64) {
        let records: Vec<SettlementRecord> = (0..n)
            .map(|_| SettlementRecord {
                league: league.into(),
                market: market.into(),
                outcome,
                odds,
                driver: driver.map(str::to_string),
                timestamp: Utc::now(),
            })
            .collect();
        engine.record_results(&records).unwrap();
    }

    fn resolved(weight: f64, samples: u64) -> Resolved {
        Resolved {
            weight,
            samples,
            source: String::new(),
        }
    }

    #[test]
    fn frozen_then_active_scenario() {
        let e = engine();
        record_n(&e, "L", "Over 2.5", None, 10, BetOutcome::Win, 1.85);
        let snap = e.ledger().snapshot();
        let cell = snap.cell("L", "OVER").unwrap();
        assert_eq!(cell.bet_count, 10);
        assert_eq!(cell.weight, 1.0);

        for _ in 0..40 {
            e.record_result(Some("L"), Some("Over 2.5"), BetOutcome::Win, 1.85, None).unwrap();
        }
        let snap = e.ledger().snapshot();
        let cell = snap.cell("L", "OVER").unwrap();
        assert_eq!(cell.bet_count, 50);
        assert!(cell.weight > 1.0);
        assert!(e.get_weight(Some("L"), Some("Over 2.5"), None).weight > 1.0);
    }

    #[test]
    fn push_and_pending_leave_the_ledger_untouched() {
        let e = engine();
        record_n(&e, "L", "Home Win", Some("injury_intel"), 3, BetOutcome::Win, 2.0);
        let before = e.ledger().snapshot();

        assert_eq!(e.record_result(Some("L"), Some("Home Win"), BetOutcome::Push, 2.0, Some("injury_intel")).unwrap(), 0);
        assert_eq!(e.record_result(Some("L"), Some("Home Win"), BetOutcome::Pending, 2.0, None).unwrap(), 0);

        let after = e.ledger().snapshot();
        assert_eq!(before, after);
        let cell = after.cell("L", "1X2").unwrap();
        assert_eq!(cell.bet_count, 3);
        assert_eq!(cell.win_count, 3);
        assert_relative_eq!(cell.cumulative_profit, 3.0);
    }

    #[test]
    fn empty_league_or_market_is_skipped() {
        let e = engine();
        assert_eq!(e.record_result(None, Some("Over 2.5"), BetOutcome::Win, 2.0, None).unwrap(), 0);
        assert_eq!(e.record_result(Some("L"), Some("  "), BetOutcome::Win, 2.0, None).unwrap(), 0);
        assert_eq!(e.ledger().snapshot().version, 0);
    }

    #[test]
    fn driver_cell_updated_and_defaults_to_unknown() {
        let e = engine();
        record_n(&e, "L", "BTTS", Some("sharp_money"), 2, BetOutcome::Loss, 1.7);
        record_n(&e, "L", "BTTS", None, 1, BetOutcome::Win, 1.7);
        let snap = e.ledger().snapshot();
        assert_eq!(snap.driver("sharp_money").unwrap().bet_count, 2);
        assert_eq!(snap.driver(UNKNOWN_DRIVER).unwrap().bet_count, 1);
        assert_eq!(snap.global.total_bets, 3);
    }

    #[test]
    fn invalid_odds_use_default_and_extreme_odds_are_clamped() {
        let e = engine();
        e.record_result(Some("L"), Some("1"), BetOutcome::Win, f64::NAN, None).unwrap();
        e.record_result(Some("M"), Some("1"), BetOutcome::Win, 500.0, None).unwrap();
        let snap = e.ledger().snapshot();
        assert_relative_eq!(snap.cell("L", "1X2").unwrap().cumulative_profit, 0.9, epsilon = 1e-9);
        assert_relative_eq!(snap.cell("M", "1X2").unwrap().cumulative_profit, 99.0, epsilon = 1e-9);
    }

    #[test]
    fn frozen_cell_borrows_global_category_weight() {
        let e = engine();
        record_n(&e, "Premier League", "Over 2.5 Goals", None, 60, BetOutcome::Win, 1.9);
        record_n(&e, "Ligue 2", "Over 2.5 Goals", None, 5, BetOutcome::Loss, 1.9);

        let global = e.get_weight(Some("Ligue 2"), Some("Over 1.5 Goals"), None);
        let epl = e.ledger().snapshot().cell("Premier League", "OVER").unwrap().weight;
        assert_relative_eq!(global.weight, epl, epsilon = 1e-9);
        assert!(global.explanation.contains("global"));

        // A category nobody has proven stays neutral.
        let neutral = e.get_weight(Some("Ligue 2"), Some("BTTS"), None);
        assert_eq!(neutral.weight, 1.0);
    }

    #[test]
    fn combine_passes_through_neutral() {
        assert_eq!(combine(&resolved(1.0, 0), &resolved(1.5, 80)), 1.5);
        assert_eq!(combine(&resolved(1.5, 80), &resolved(1.0, 12)), 1.5);
    }

    #[test]
    fn combine_is_bet_count_weighted() {
        let w = combine(&resolved(1.6, 300), &resolved(0.8, 100));
        assert_relative_eq!(w, 1.4, epsilon = 1e-9);
    }

    #[test]
    fn score_adjustment_clamps_and_explains() {
        let e = engine();
        record_n(&e, "L", "Over 2.5", None, 60, BetOutcome::Win, 2.5);
        let adj = e.apply_weight_to_score(8.0, Some("L"), Some("Over 2.5"), None);
        assert_relative_eq!(adj.score, 10.0);
        assert!(!adj.justification.is_empty());

        let noop = e.apply_weight_to_score(8.0, None, Some("Over 2.5"), None);
        assert_relative_eq!(noop.score, 8.0);
        assert!(noop.justification.is_empty());
    }
}
