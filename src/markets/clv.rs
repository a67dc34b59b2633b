//! Closing Line Value calculator.
//!
//! CLV measures how much better the odds taken were than the fair odds the
//! market settled on at kickoff. Beating the close consistently is the
//! long-run edge signal, independent of short-run win/loss luck.
//!
//! ```text
//! p   = 1 / closing_odds                      (implied probability)
//! fp  = clamp(p / (1 + margin), 0.01, 0.99)   (bookmaker margin removed)
//! CLV = (odds_taken · fp − 1) · 100            (i.e. odds_taken / fair_odds − 1)
//! ```

/// Typical bookmaker overround used when the caller has no better estimate.
pub const DEFAULT_MARGIN: f64 = 0.05;

/// Odds above this are treated as data errors rather than real prices.
const MAX_SANE_ODDS: f64 = 1000.0;

fn valid_odds(odds: f64) -> bool {
    odds.is_finite() && odds > 1.0 && odds <= MAX_SANE_ODDS
}

/// Calculate CLV as a percentage rounded to two decimals.
///
/// Returns `None` when either price is ≤ 1.0, non-finite, or above 1000.
pub fn calculate(odds_taken: f64, closing_odds: f64, margin: f64) -> Option<f64> {
    if !valid_odds(odds_taken) || !valid_odds(closing_odds) {
        return None;
    }
    let margin = if margin.is_finite() && margin >= 0.0 {
        margin
    } else {
        DEFAULT_MARGIN
    };

    let implied = 1.0 / closing_odds;
    let fair_prob = (implied / (1.0 + margin)).clamp(0.01, 0.99);
    let fair_closing_odds = 1.0 / fair_prob;
    let clv = (odds_taken / fair_closing_odds - 1.0) * 100.0;
    Some((clv * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn beating_the_close_is_positive() {
        let clv = calculate(2.20, 2.00, 0.05).unwrap();
        assert!(clv > 0.0);
        // fp = 0.5 / 1.05 = 0.47619 → fair odds 2.1 → 2.2 / 2.1 − 1 = 4.76%
        assert_relative_eq!(clv, 4.76, epsilon = 1e-9);
    }

    #[test]
    fn taking_worse_than_the_close_is_negative() {
        assert!(calculate(1.80, 2.00, 0.05).unwrap() < 0.0);
    }

    #[test]
    fn zero_margin_equal_odds_is_flat() {
        assert_relative_eq!(calculate(2.0, 2.0, 0.0).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_invalid_odds() {
        assert!(calculate(1.0, 2.0, 0.05).is_none());
        assert!(calculate(2.0, 1.0, 0.05).is_none());
        assert!(calculate(0.5, 2.0, 0.05).is_none());
        assert!(calculate(f64::NAN, 2.0, 0.05).is_none());
        assert!(calculate(2.0, f64::INFINITY, 0.05).is_none());
        assert!(calculate(1001.0, 2.0, 0.05).is_none());
        assert!(calculate(2.0, 1500.0, 0.05).is_none());
    }

    #[test]
    fn fair_probability_is_clamped() {
        // Closing odds of 1.001 imply ~99.9%; the clamp caps fair prob at 0.99.
        let clv = calculate(1.05, 1.001, 0.0).unwrap();
        assert_relative_eq!(clv, ((1.05 * 0.99 - 1.0) * 100.0_f64 * 100.0).round() / 100.0, epsilon = 1e-9);
    }
}
