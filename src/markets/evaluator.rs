//! Settle a market against a final result.
//!
//! Anything that cannot be proven from the data in hand (missing score,
//! missing box-score stats, a market not understood) comes back as `Pending`
//! with a diagnostic, never as a guessed WIN or LOSS. Pending bets are
//! retried on the next run.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use super::classifier::{classify, parse_line, split_combo, Direction, MarketCategory};
use crate::db::models::{MatchStats, MatchStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetOutcome {
    Win,
    Loss,
    Push,
    Pending,
}

impl BetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetOutcome::Win => "WIN",
            BetOutcome::Loss => "LOSS",
            BetOutcome::Push => "PUSH",
            BetOutcome::Pending => "PENDING",
        }
    }

    /// Parse a stored outcome label. Unrecognised labels count as a LOSS so a
    /// typo can never inflate a cell's win rate.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "WIN" | "WON" | "W" => BetOutcome::Win,
            "LOSS" | "LOST" | "L" => BetOutcome::Loss,
            "PUSH" | "VOID" => BetOutcome::Push,
            "PENDING" => BetOutcome::Pending,
            other => {
                warn!("Unrecognised outcome label '{}', treating as LOSS", other);
                BetOutcome::Loss
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, BetOutcome::Win | BetOutcome::Loss)
    }
}

impl fmt::Display for BetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the second leg of a combo bet was, for combo win-rate reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionType {
    Goals,
    Corners,
    Cards,
    Btts,
    Unknown,
}

impl ExpansionType {
    fn from_category(category: MarketCategory) -> Self {
        match category {
            MarketCategory::Over | MarketCategory::Under => ExpansionType::Goals,
            MarketCategory::Corners => ExpansionType::Corners,
            MarketCategory::Cards => ExpansionType::Cards,
            MarketCategory::Btts => ExpansionType::Btts,
            _ => ExpansionType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: BetOutcome,
    pub explanation: String,
    /// Set only for combo markets.
    pub expansion: Option<ExpansionType>,
}

impl Evaluation {
    fn new(outcome: BetOutcome, explanation: impl Into<String>) -> Self {
        Evaluation {
            outcome,
            explanation: explanation.into(),
            expansion: None,
        }
    }
}

/// Evaluate `market` against the final score and box-score stats.
pub fn evaluate(
    market: Option<&str>,
    home_score: Option<i32>,
    away_score: Option<i32>,
    status: MatchStatus,
    stats: Option<&MatchStats>,
) -> Evaluation {
    if matches!(status, MatchStatus::Cancelled | MatchStatus::Postponed) {
        return Evaluation::new(BetOutcome::Push, format!("match {status}, bet void"));
    }
    if status != MatchStatus::Finished {
        return Evaluation::new(BetOutcome::Pending, format!("match not finished ({status})"));
    }

    let market = match market.map(str::trim) {
        Some(m) if !m.is_empty() => m,
        _ => return Evaluation::new(BetOutcome::Pending, "unrecognized market: <empty>"),
    };

    let scores = match (home_score, away_score) {
        (Some(h), Some(a)) if h >= 0 && a >= 0 => (h, a),
        _ => return Evaluation::new(BetOutcome::Pending, "final score unavailable"),
    };

    match split_combo(market) {
        Some(parts) => evaluate_combo(&parts, scores, stats),
        None => evaluate_single(market, scores, stats),
    }
}

fn evaluate_combo(parts: &[&str], scores: (i32, i32), stats: Option<&MatchStats>) -> Evaluation {
    let legs: Vec<Evaluation> = parts
        .iter()
        .map(|p| evaluate_single(p, scores, stats))
        .collect();

    let outcome = if legs.iter().any(|l| l.outcome == BetOutcome::Loss) {
        BetOutcome::Loss
    } else if legs.iter().all(|l| l.outcome == BetOutcome::Win) {
        BetOutcome::Win
    } else {
        BetOutcome::Pending
    };
    let explanation = legs
        .iter()
        .map(|l| l.explanation.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    let expansion = ExpansionType::from_category(classify(parts.get(1).copied()));

    Evaluation {
        outcome,
        explanation: format!("combo {outcome}: {explanation}"),
        expansion: Some(expansion),
    }
}

fn evaluate_single(market: &str, (home, away): (i32, i32), stats: Option<&MatchStats>) -> Evaluation {
    let category = classify(Some(market));
    let m = market.trim().to_lowercase();

    match category {
        MarketCategory::Corners => {
            let Some((h, a)) = stats.and_then(MatchStats::corners) else {
                return Evaluation::new(BetOutcome::Pending, "corner stats unavailable");
            };
            compare_line(&m, "corners", h, a)
        }
        MarketCategory::Cards => {
            let Some((h, a)) = stats.and_then(MatchStats::cards) else {
                return Evaluation::new(BetOutcome::Pending, "card stats unavailable");
            };
            compare_line(&m, "cards", h, a)
        }
        MarketCategory::Over | MarketCategory::Under => compare_line(&m, "goals", home, away),
        MarketCategory::OneXTwo => match selection(&m) {
            Some(side) => {
                let won = match side {
                    Side::Home => home > away,
                    Side::Draw => home == away,
                    Side::Away => away > home,
                };
                Evaluation::new(
                    verdict(won),
                    format!("{side:?} @ {home}-{away} → {}", verdict(won)),
                )
            }
            None => Evaluation::new(
                BetOutcome::Pending,
                format!("unrecognized market: '{market}' (no side)"),
            ),
        },
        MarketCategory::DoubleChance => {
            let won = if m.contains("1x") {
                home >= away
            } else if m.contains("x2") {
                away >= home
            } else if m.contains("12") {
                home != away
            } else {
                return Evaluation::new(
                    BetOutcome::Pending,
                    format!("unrecognized market: '{market}' (double chance side)"),
                );
            };
            Evaluation::new(
                verdict(won),
                format!("double chance '{market}' @ {home}-{away} → {}", verdict(won)),
            )
        }
        MarketCategory::Btts => {
            let both = home > 0 && away > 0;
            let won = if m.ends_with(" no") || m.contains("- no") { !both } else { both };
            Evaluation::new(
                verdict(won),
                format!("btts @ {home}-{away} → {}", verdict(won)),
            )
        }
        MarketCategory::Unknown => Evaluation::new(
            BetOutcome::Pending,
            format!("unrecognized market: '{market}'"),
        ),
    }
}

/// Strict comparison against the parsed line: `>` for over, `<` for under.
fn compare_line(market: &str, what: &str, home: i32, away: i32) -> Evaluation {
    let Some((direction, line)) = parse_line(market) else {
        return Evaluation::new(
            BetOutcome::Pending,
            format!("unrecognized market: '{market}' (no settleable {what} line)"),
        );
    };
    let total = home + away;
    let won = match direction {
        Direction::Over => f64::from(total) > line,
        Direction::Under => f64::from(total) < line,
    };
    Evaluation::new(
        verdict(won),
        format!("{what} {total} ({home}+{away}) vs {direction:?} {line} → {}", verdict(won)),
    )
}

fn verdict(won: bool) -> BetOutcome {
    if won {
        BetOutcome::Win
    } else {
        BetOutcome::Loss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Home,
    Draw,
    Away,
}

fn selection(m: &str) -> Option<Side> {
    match m {
        "1" => return Some(Side::Home),
        "x" => return Some(Side::Draw),
        "2" => return Some(Side::Away),
        _ => {}
    }
    if m.contains("draw") {
        Some(Side::Draw)
    } else if m.contains("home") {
        Some(Side::Home)
    } else if m.contains("away") {
        Some(Side::Away)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners(home: i32, away: i32) -> MatchStats {
        MatchStats {
            home_corners: Some(home),
            away_corners: Some(away),
            ..MatchStats::default()
        }
    }

    fn finished(market: &str, home: i32, away: i32) -> Evaluation {
        evaluate(Some(market), Some(home), Some(away), MatchStatus::Finished, None)
    }

    #[test]
    fn quarter_lines_stay_pending() {
        for market in ["Over 2.25 Goals", "Under 2.75 Goals", "Over 1.75"] {
            let ev = finished(market, 2, 1);
            assert_eq!(ev.outcome, BetOutcome::Pending, "{market}");
            assert!(ev.explanation.contains("unrecognized market"), "{}", ev.explanation);
        }
        assert_eq!(finished("Over 2.50 Goals", 2, 1).outcome, BetOutcome::Win);
    }

    #[test]
    fn corners_over_line_wins_and_reports_total() {
        let stats = corners(6, 5);
        let ev = evaluate(Some("Over 9.5 Corners"), Some(1), Some(0), MatchStatus::Finished, Some(&stats));
        assert_eq!(ev.outcome, BetOutcome::Win);
        assert!(ev.explanation.contains("11"), "{}", ev.explanation);
    }

    #[test]
    fn corners_under_the_line_loses() {
        let stats = corners(4, 4);
        let ev = evaluate(Some("Over 9.5 Corners"), Some(1), Some(0), MatchStatus::Finished, Some(&stats));
        assert_eq!(ev.outcome, BetOutcome::Loss);
        assert!(ev.explanation.contains('8'), "{}", ev.explanation);
    }

    #[test]
    fn corners_without_stats_is_pending() {
        let ev = finished("Over 9.5 Corners", 1, 0);
        assert_eq!(ev.outcome, BetOutcome::Pending);

        let negative = corners(-1, 4);
        let ev = evaluate(Some("Over 9.5 Corners"), Some(1), Some(0), MatchStatus::Finished, Some(&negative));
        assert_eq!(ev.outcome, BetOutcome::Pending);
    }

    #[test]
    fn cards_sum_yellow_and_red() {
        let stats = MatchStats {
            home_yellow_cards: Some(2),
            away_yellow_cards: Some(2),
            home_red_cards: Some(1),
            away_red_cards: Some(0),
            ..MatchStats::default()
        };
        let ev = evaluate(Some("Under 4.5 Cards"), Some(0), Some(0), MatchStatus::Finished, Some(&stats));
        assert_eq!(ev.outcome, BetOutcome::Loss);
        assert!(ev.explanation.contains('5'));
    }

    #[test]
    fn missing_score_is_pending_not_error() {
        let ev = evaluate(Some("Over 2.5 Goals"), None, Some(1), MatchStatus::Finished, None);
        assert_eq!(ev.outcome, BetOutcome::Pending);
        let ev = evaluate(Some("Home Win"), Some(2), None, MatchStatus::Finished, None);
        assert_eq!(ev.outcome, BetOutcome::Pending);
    }

    #[test]
    fn cancelled_and_postponed_push_regardless_of_scores() {
        for status in [MatchStatus::Cancelled, MatchStatus::Postponed] {
            let ev = evaluate(Some("Home Win"), Some(3), Some(0), status, None);
            assert_eq!(ev.outcome, BetOutcome::Push);
            let ev = evaluate(Some("Home Win"), None, None, status, None);
            assert_eq!(ev.outcome, BetOutcome::Push);
        }
    }

    #[test]
    fn unfinished_match_is_pending() {
        let ev = evaluate(Some("Home Win"), Some(1), Some(0), MatchStatus::InProgress, None);
        assert_eq!(ev.outcome, BetOutcome::Pending);
    }

    #[test]
    fn goal_lines_are_strict() {
        assert_eq!(finished("Over 2.5 Goals", 2, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("Over 2.5 Goals", 1, 1).outcome, BetOutcome::Loss);
        assert_eq!(finished("Under 2.5 Goals", 1, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("Over 3 Goals", 2, 1).outcome, BetOutcome::Loss);
    }

    #[test]
    fn match_result_selections() {
        assert_eq!(finished("1", 2, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("X", 1, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("2", 2, 1).outcome, BetOutcome::Loss);
        assert_eq!(finished("Away Win", 0, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("Draw", 0, 1).outcome, BetOutcome::Loss);
    }

    #[test]
    fn bare_win_without_side_is_pending() {
        let ev = finished("Arsenal to win", 2, 0);
        assert_eq!(ev.outcome, BetOutcome::Pending);
        assert!(ev.explanation.contains("unrecognized"));
    }

    #[test]
    fn double_chance_covers_two_sides() {
        assert_eq!(finished("1X", 1, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("1X", 0, 1).outcome, BetOutcome::Loss);
        assert_eq!(finished("X2", 0, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("12", 1, 1).outcome, BetOutcome::Loss);
        assert_eq!(finished("12", 3, 1).outcome, BetOutcome::Win);
    }

    #[test]
    fn btts() {
        assert_eq!(finished("BTTS", 1, 1).outcome, BetOutcome::Win);
        assert_eq!(finished("Both Teams To Score", 2, 0).outcome, BetOutcome::Loss);
        assert_eq!(finished("BTTS No", 2, 0).outcome, BetOutcome::Win);
    }

    #[test]
    fn combo_requires_every_leg() {
        let ev = finished("Home Win + Over 2.5 Goals", 3, 1);
        assert_eq!(ev.outcome, BetOutcome::Win);
        assert_eq!(ev.expansion, Some(ExpansionType::Goals));

        let ev = finished("Home Win + Over 2.5 Goals", 1, 0);
        assert_eq!(ev.outcome, BetOutcome::Loss);
    }

    #[test]
    fn combo_with_unsettleable_leg_is_pending() {
        // Corners leg has no stats, home leg wins → cannot settle yet.
        let ev = finished("Home Win + Over 8.5 Corners", 2, 0);
        assert_eq!(ev.outcome, BetOutcome::Pending);
        assert_eq!(ev.expansion, Some(ExpansionType::Corners));

        // A losing leg settles the combo even when the other is unknown.
        let ev = finished("Away Win + Over 8.5 Corners", 2, 0);
        assert_eq!(ev.outcome, BetOutcome::Loss);
    }

    #[test]
    fn unrecognized_market_is_pending_with_diagnostic() {
        let ev = finished("First goalscorer Salah", 1, 0);
        assert_eq!(ev.outcome, BetOutcome::Pending);
        assert!(ev.explanation.contains("unrecognized market"));

        let ev = evaluate(None, Some(1), Some(0), MatchStatus::Finished, None);
        assert_eq!(ev.outcome, BetOutcome::Pending);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(BetOutcome::from_label("win"), BetOutcome::Win);
        assert_eq!(BetOutcome::from_label("VOID"), BetOutcome::Push);
        assert_eq!(BetOutcome::from_label("half-won"), BetOutcome::Loss);
    }
}
