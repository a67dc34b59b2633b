//! Risk-adjusted return statistics over a cell's bounded return series.

/// Sortino value reported when a positive series has no downside at all.
pub const SORTINO_NO_DOWNSIDE: f64 = 5.0;

pub fn push_capped<T>(dst: &mut Vec<T>, value: T, cap: usize) {
    dst.push(value);
    if dst.len() > cap {
        let drop_n = dst.len() - cap;
        dst.drain(0..drop_n);
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean over sample standard deviation. `0.0` with fewer than two samples
/// or a flat series.
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let var = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let sd = var.sqrt();
    if sd <= f64::EPSILON {
        0.0
    } else {
        m / sd
    }
}

/// Mean over downside deviation (root mean square of the negative returns,
/// taken over the whole series). A positive series with no losing sample
/// reports [`SORTINO_NO_DOWNSIDE`].
pub fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let downside_sq: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    if downside_sq <= 0.0 {
        return if m > 0.0 { SORTINO_NO_DOWNSIDE } else { 0.0 };
    }
    let dd = (downside_sq / returns.len() as f64).sqrt();
    m / dd
}

/// Largest peak-to-trough decline of a cumulative PnL series, as a fraction
/// of the peak (negative, or `0.0` if there was never a drawdown).
///
/// The running peak starts at −∞ rather than the first value, and a drawdown
/// is only measured once the peak is positive, so an opening loss cannot
/// mask a later, larger fall.
pub fn max_drawdown(pnl_history: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for &value in pnl_history {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (value - peak) / peak;
            if dd < worst {
                worst = dd;
            }
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn drawdown_ignores_opening_losses() {
        let dd = max_drawdown(&[-1.0, -0.5, 0.5, 1.0, 0.2, -0.5]);
        assert_relative_eq!(dd, -1.5, epsilon = 1e-9);
    }

    #[test]
    fn drawdown_zero_without_positive_peak() {
        assert_relative_eq!(max_drawdown(&[-1.0, -2.0, -3.0]), 0.0);
        assert_relative_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn drawdown_monotonic_gain_is_zero() {
        assert_relative_eq!(max_drawdown(&[0.5, 1.0, 1.5, 2.0]), 0.0);
    }

    #[test]
    fn sortino_sentinel_when_no_losses() {
        assert_relative_eq!(sortino(&[0.85, 0.85, 0.85]), SORTINO_NO_DOWNSIDE);
    }

    #[test]
    fn sortino_penalises_only_downside() {
        // 1.5 vs 0.25: the big swing in `upside` is a gain and costs nothing.
        let upside = [2.0, 0.0, 0.0, -0.5];
        let downside = [0.5, 0.5, 0.5, -1.0];
        assert!(sortino(&upside) > 0.0);
        assert!(sortino(&upside) > sortino(&downside));
    }

    #[test]
    fn sharpe_flat_series_is_zero() {
        assert_relative_eq!(sharpe(&[1.0, 1.0, 1.0]), 0.0);
        assert_relative_eq!(sharpe(&[1.0]), 0.0);
    }

    #[test]
    fn sharpe_sign_follows_mean() {
        assert!(sharpe(&[0.9, -1.0, 0.9, 0.9]) > 0.0);
        assert!(sharpe(&[-1.0, -1.0, 0.9, -1.0]) < 0.0);
    }

    #[test]
    fn push_capped_drops_oldest() {
        let mut v = vec![1, 2, 3];
        push_capped(&mut v, 4, 3);
        assert_eq!(v, vec![2, 3, 4]);
    }
}
