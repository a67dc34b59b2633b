use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::markets::BetOutcome;

/// An alert that was sent to subscribers and will later be settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    /// External match/event ID at the result provider
    pub match_id: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: DateTime<Utc>,
    /// Free-text market, e.g. "Over 2.5 Goals" or "Home Win + BTTS"
    pub market: String,
    /// Which analytical signal produced the alert, e.g. "injury_intel"
    pub driver: Option<String>,
    /// Alert score on the 0–10 scale
    pub score: f64,
    /// Decimal odds when the alert went out
    pub odds_at_alert: Option<f64>,
    /// Decimal odds captured at kickoff (the closing line)
    pub odds_at_kickoff: Option<f64>,
    /// Legacy closing-odds column from older alert rows
    pub closing_odds: Option<f64>,
    /// Latest live odds seen for the market
    pub current_odds: Option<f64>,
    pub sent_at: DateTime<Utc>,
}

/// Alert registration payload from the alert pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub match_id: String,
    pub league: String,
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    pub kickoff: DateTime<Utc>,
    pub market: String,
    #[serde(default)]
    pub driver: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub odds_at_alert: Option<f64>,
    #[serde(default)]
    pub current_odds: Option<f64>,
}

/// Structured record for one bet awaiting settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCandidate {
    pub alert_id: i64,
    pub match_id: String,
    pub league: String,
    pub market: String,
    pub driver: Option<String>,
    pub kickoff: DateTime<Utc>,
    pub score: f64,
    pub odds_at_alert: Option<f64>,
    pub odds_at_kickoff: Option<f64>,
    pub closing_odds: Option<f64>,
    pub current_odds: Option<f64>,
}

impl SettlementCandidate {
    /// Odds used for profit: alert > kickoff > legacy closing > live > default,
    /// capped at `max_odds`.
    pub fn effective_odds(&self, default_odds: f64, max_odds: f64) -> f64 {
        [
            self.odds_at_alert,
            self.odds_at_kickoff,
            self.closing_odds,
            self.current_odds,
        ]
        .into_iter()
        .flatten()
        .find(|o| o.is_finite() && *o > 1.0)
        .unwrap_or(default_odds)
        .min(max_odds)
    }

    /// The closing line for CLV: kickoff odds, else the legacy closing column.
    pub fn closing_line(&self) -> Option<f64> {
        self.odds_at_kickoff.or(self.closing_odds)
    }
}

/// Final state of a match as reported by the result provider.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub match_id: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status: MatchStatus,
    /// Free-text reason from the provider, e.g. "Postponed - waterlogged pitch"
    pub status_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    NotStarted,
    InProgress,
    Finished,
    Cancelled,
    Postponed,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStatus::NotStarted => "NOT_STARTED",
            MatchStatus::InProgress => "IN_PROGRESS",
            MatchStatus::Finished => "FINISHED",
            MatchStatus::Cancelled => "CANCELLED",
            MatchStatus::Postponed => "POSTPONED",
        };
        f.write_str(s)
    }
}

/// Box-score stats for a finished match. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub home_corners: Option<i32>,
    pub away_corners: Option<i32>,
    pub home_yellow_cards: Option<i32>,
    pub away_yellow_cards: Option<i32>,
    pub home_red_cards: Option<i32>,
    pub away_red_cards: Option<i32>,
}

fn non_negative(v: Option<i32>) -> Option<i32> {
    v.filter(|n| *n >= 0)
}

impl MatchStats {
    /// (home, away) corners, if both are present and non-negative.
    pub fn corners(&self) -> Option<(i32, i32)> {
        Some((non_negative(self.home_corners)?, non_negative(self.away_corners)?))
    }

    /// (home, away) cards counting yellows and reds. Yellows are required;
    /// a missing red count is treated as zero.
    pub fn cards(&self) -> Option<(i32, i32)> {
        let home = non_negative(self.home_yellow_cards)?;
        let away = non_negative(self.away_yellow_cards)?;
        let home_red = match self.home_red_cards {
            Some(n) if n < 0 => return None,
            other => other.unwrap_or(0),
        };
        let away_red = match self.away_red_cards {
            Some(n) if n < 0 => return None,
            other => other.unwrap_or(0),
        };
        Some((home + home_red, away + away_red))
    }
}

/// A settled (or still pending) bet as written back to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub alert_id: i64,
    pub outcome: BetOutcome,
    /// Odds the profit was computed with
    pub odds: f64,
    /// Unit-stake profit: odds − 1 on WIN, −1 on LOSS, 0 otherwise
    pub profit: f64,
    pub clv: Option<f64>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub stats: Option<MatchStats>,
    pub explanation: String,
    pub settled_at: DateTime<Utc>,
}

impl NewAlert {
    /// Reject alerts that could never be settled or learned from.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.match_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("match_id is empty".into()));
        }
        if self.league.trim().is_empty() || self.market.trim().is_empty() {
            return Err(EngineError::InvalidInput("league and market are required".into()));
        }
        if !self.score.is_finite() || !(0.0..=10.0).contains(&self.score) {
            return Err(EngineError::InvalidInput(format!("score {} outside 0–10", self.score)));
        }
        for odds in [self.odds_at_alert, self.current_odds].into_iter().flatten() {
            if !odds.is_finite() || odds <= 1.0 {
                return Err(EngineError::InvalidInput(format!("odds {odds} must be > 1.0")));
            }
        }
        Ok(())
    }

    pub fn into_alert(self, sent_at: DateTime<Utc>) -> Alert {
        Alert {
            id: None,
            match_id: self.match_id.trim().to_string(),
            league: self.league.trim().to_string(),
            home_team: self.home_team,
            away_team: self.away_team,
            kickoff: self.kickoff,
            market: self.market.trim().to_string(),
            driver: self.driver.filter(|d| !d.trim().is_empty()),
            score: self.score,
            odds_at_alert: self.odds_at_alert,
            odds_at_kickoff: None,
            closing_odds: None,
            current_odds: self.current_odds,
            sent_at,
        }
    }
}
