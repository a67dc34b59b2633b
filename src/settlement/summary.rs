use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::models::Settlement;
use crate::markets::{BetOutcome, ExpansionType};

/// Settled WIN/LOSS bets needed before the false-positive rate is reported.
pub const FALSE_POSITIVE_MIN_SETTLED: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComboStats {
    pub settled: u64,
    pub wins: u64,
    pub win_rate: f64,
}

/// Aggregate statistics for one settlement run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettlementSummary {
    pub run_at: DateTime<Utc>,
    pub candidates: u64,
    pub wins: u64,
    pub losses: u64,
    pub pushes: u64,
    /// Result or stats not available yet, or provider failure; retried next run
    pub pending: u64,
    /// Provider failures and timeouts
    pub errors: u64,
    pub write_failures: u64,
    /// Records accepted by the weight engine
    pub learned: u64,
    pub total_profit: f64,
    pub roi_pct: f64,
    pub avg_clv: Option<f64>,
    pub positive_clv_pct: Option<f64>,
    pub combo: BTreeMap<ExpansionType, ComboStats>,
    /// LOSS share of settled bets, once there are enough of them
    pub false_positive_rate: Option<f64>,
    #[serde(skip)]
    clv_values: Vec<f64>,
}

impl SettlementSummary {
    pub fn new(run_at: DateTime<Utc>, candidates: usize) -> Self {
        SettlementSummary {
            run_at,
            candidates: candidates as u64,
            ..Self::default()
        }
    }

    /// WIN + LOSS count.
    pub fn settled(&self) -> u64 {
        self.wins + self.losses
    }

    pub fn record(&mut self, s: &Settlement, expansion: Option<ExpansionType>) {
        match s.outcome {
            BetOutcome::Win => self.wins += 1,
            BetOutcome::Loss => self.losses += 1,
            BetOutcome::Push => self.pushes += 1,
            BetOutcome::Pending => {
                self.pending += 1;
                return;
            }
        }
        if !s.outcome.is_resolved() {
            return;
        }
        self.total_profit += s.profit;
        if let Some(clv) = s.clv {
            self.clv_values.push(clv);
        }
        if let Some(kind) = expansion {
            let combo = self.combo.entry(kind).or_default();
            combo.settled += 1;
            if s.outcome == BetOutcome::Win {
                combo.wins += 1;
            }
        }
    }

    pub fn record_failure(&mut self, transient: bool) {
        self.pending += 1;
        if transient {
            self.errors += 1;
        }
    }

    /// Compute the derived rates. Call once after every record is in.
    pub fn finalize(&mut self) {
        let settled = self.settled();
        if settled > 0 {
            self.roi_pct = round2(self.total_profit / settled as f64 * 100.0);
        }
        self.total_profit = round2(self.total_profit);

        if !self.clv_values.is_empty() {
            let n = self.clv_values.len() as f64;
            let positive = self.clv_values.iter().filter(|c| **c > 0.0).count() as f64;
            self.avg_clv = Some(round2(self.clv_values.iter().sum::<f64>() / n));
            self.positive_clv_pct = Some(round2(positive / n * 100.0));
        }

        for combo in self.combo.values_mut() {
            if combo.settled > 0 {
                combo.win_rate = combo.wins as f64 / combo.settled as f64;
            }
        }

        self.false_positive_rate =
            (settled >= FALSE_POSITIVE_MIN_SETTLED).then(|| self.losses as f64 / settled as f64);
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn settlement(outcome: BetOutcome, profit: f64, clv: Option<f64>) -> Settlement {
        Settlement {
            alert_id: 1,
            outcome,
            odds: 2.0,
            profit,
            clv,
            home_score: Some(1),
            away_score: Some(0),
            stats: None,
            explanation: String::new(),
            settled_at: Utc::now(),
        }
    }

    #[test]
    fn totals_and_rates() {
        let mut s = SettlementSummary::new(Utc::now(), 5);
        s.record(&settlement(BetOutcome::Win, 1.0, Some(4.0)), Some(ExpansionType::Goals));
        s.record(&settlement(BetOutcome::Loss, -1.0, Some(-2.0)), Some(ExpansionType::Goals));
        s.record(&settlement(BetOutcome::Win, 1.0, None), None);
        s.record(&settlement(BetOutcome::Push, 0.0, Some(9.0)), None);
        s.record_failure(true);
        s.finalize();

        assert_eq!((s.wins, s.losses, s.pushes, s.pending, s.errors), (2, 1, 1, 1, 1));
        assert_relative_eq!(s.roi_pct, 33.33);
        assert_eq!(s.avg_clv, Some(1.0));
        assert_eq!(s.positive_clv_pct, Some(50.0));
        assert_relative_eq!(s.combo[&ExpansionType::Goals].win_rate, 0.5);
        // fewer than 10 settled
        assert_eq!(s.false_positive_rate, None);
    }

    #[test]
    fn false_positive_rate_from_ten_settled() {
        let mut s = SettlementSummary::new(Utc::now(), 10);
        for i in 0..10 {
            let outcome = if i < 3 { BetOutcome::Win } else { BetOutcome::Loss };
            s.record(&settlement(outcome, 0.0, None), None);
        }
        s.finalize();
        assert_relative_eq!(s.false_positive_rate.unwrap(), 0.7);
    }

    #[test]
    fn empty_run_is_all_zero() {
        let mut s = SettlementSummary::new(Utc::now(), 0);
        s.finalize();
        assert_eq!(s.roi_pct, 0.0);
        assert!(s.avg_clv.is_none());
        assert!(s.combo.is_empty());
    }
}
