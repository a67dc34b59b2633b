use serde::Serialize;

use crate::ledger::models::LedgerSnapshot;

/// Live alert threshold derived from demonstrated performance: alerts get
/// more aggressive while the book is healthy and more selective in a
/// drawdown.
#[derive(Debug, Clone)]
pub struct DynamicThresholdCalculator {
    pub baseline: f64,
    pub min: f64,
    pub max: f64,
    /// Settled bets required before the ledger is trusted at all
    pub min_samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdDecision {
    pub threshold: f64,
    pub reason: String,
    pub aggregate_drawdown: f64,
    pub roi: f64,
    pub samples: u64,
}

const SHALLOW_DRAWDOWN: f64 = -0.10;
const DEEP_DRAWDOWN: f64 = -0.25;
const SEVERE_DRAWDOWN: f64 = -0.40;

impl Default for DynamicThresholdCalculator {
    fn default() -> Self {
        DynamicThresholdCalculator {
            baseline: 7.5,
            min: 7.0,
            max: 9.0,
            min_samples: 30,
        }
    }
}

impl DynamicThresholdCalculator {
    pub fn new(baseline: f64, min: f64, max: f64) -> Self {
        DynamicThresholdCalculator {
            baseline,
            min,
            max,
            ..Self::default()
        }
    }

    pub fn compute(&self, snapshot: &LedgerSnapshot) -> ThresholdDecision {
        let baseline = self.baseline.clamp(self.min, self.max);

        let (weighted_dd, samples) = snapshot
            .cells()
            .filter(|(_, _, c)| c.bet_count > 0)
            .fold((0.0, 0u64), |(dd, n), (_, _, c)| {
                (dd + c.max_drawdown * c.bet_count as f64, n + c.bet_count)
            });

        if samples < self.min_samples {
            return ThresholdDecision {
                threshold: baseline,
                reason: format!("baseline ({samples} settled bet(s), need {})", self.min_samples),
                aggregate_drawdown: 0.0,
                roi: snapshot.global.roi,
                samples,
            };
        }

        let drawdown = weighted_dd / samples as f64;
        let roi = snapshot.global.roi;

        let (adjust, why) = if drawdown <= SEVERE_DRAWDOWN {
            (1.0, "severe drawdown")
        } else if drawdown <= DEEP_DRAWDOWN {
            (0.5, "deep drawdown")
        } else if drawdown > SHALLOW_DRAWDOWN && roi > 0.0 {
            (-0.5, "shallow drawdown, positive ROI")
        } else {
            (0.0, "neutral")
        };

        let threshold = (baseline + adjust).clamp(self.min, self.max);
        ThresholdDecision {
            threshold,
            reason: format!(
                "{why}: drawdown {:.1}%, roi {:+.1}% over {samples} bet(s)",
                drawdown * 100.0,
                roi * 100.0
            ),
            aggregate_drawdown: drawdown,
            roi,
            samples,
        }
    }
}
