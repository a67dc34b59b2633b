//! Free-text market string → canonical market category.
//!
//! Alert markets arrive as whatever the upstream pipeline wrote ("Over 2.5
//! Goals", "Home Win + BTTS", "X2", "Over 9.5 Corners"). Every downstream
//! bucket (ledger cell, outcome rule, weight lookup) keys off the category
//! returned here, so the priority order below matters:
//!
//! 1. combo strings ("A + B") classify by their second component
//! 2. single-character selections `1`, `2`, `X`
//! 3. corners, then cards/bookings (regardless of over/under wording)
//! 4. over/under with a numeric line
//! 5. both-teams-to-score
//! 6. double chance (`1X`, `X2`, `12`)
//! 7. home/away/draw/win wording

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static RE_OVER_UNDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(over|under)\s+(\d+(?:\.\d+)?)").expect("valid regex"));
static RE_DOUBLE_CHANCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(1x|x2|12)\b").expect("valid regex"));
static RE_RESULT_WORDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(home|away|draw|win|wins)\b").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    #[serde(rename = "1X2")]
    OneXTwo,
    #[serde(rename = "OVER")]
    Over,
    #[serde(rename = "UNDER")]
    Under,
    #[serde(rename = "BTTS")]
    Btts,
    #[serde(rename = "DOUBLE_CHANCE")]
    DoubleChance,
    #[serde(rename = "CORNERS")]
    Corners,
    #[serde(rename = "CARDS")]
    Cards,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl MarketCategory {
    /// Key used in the ledger document.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCategory::OneXTwo => "1X2",
            MarketCategory::Over => "OVER",
            MarketCategory::Under => "UNDER",
            MarketCategory::Btts => "BTTS",
            MarketCategory::DoubleChance => "DOUBLE_CHANCE",
            MarketCategory::Corners => "CORNERS",
            MarketCategory::Cards => "CARDS",
            MarketCategory::Unknown => "UNKNOWN",
        }
    }

    /// Categories settled from box-score stats rather than the scoreline.
    pub fn needs_match_stats(&self) -> bool {
        matches!(self, MarketCategory::Corners | MarketCategory::Cards)
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a combo market ("Home Win + Over 2.5 Goals") into trimmed parts.
/// Returns `None` unless there are at least two non-empty components.
pub fn split_combo(market: &str) -> Option<Vec<&str>> {
    if !market.contains('+') {
        return None;
    }
    let parts: Vec<&str> = market
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    (parts.len() >= 2).then_some(parts)
}

/// Parse the numeric line out of an over/under market ("Over 9.5 Corners" → 9.5).
/// Only whole and half lines settle; quarter lines such as 2.25 give `None`.
pub fn parse_line(market: &str) -> Option<(Direction, f64)> {
    let (direction, line) = parse_over_under(market)?;
    let frac = line.fract();
    (frac == 0.0 || frac == 0.5).then_some((direction, line))
}

fn parse_over_under(market: &str) -> Option<(Direction, f64)> {
    let caps = RE_OVER_UNDER.captures(market)?;
    let direction = if caps[1].eq_ignore_ascii_case("over") {
        Direction::Over
    } else {
        Direction::Under
    };
    let line = caps[2].parse::<f64>().ok()?;
    Some((direction, line))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Over,
    Under,
}

/// Classify a market string. Never panics; empty or absent input is `Unknown`.
pub fn classify(market: Option<&str>) -> MarketCategory {
    let raw = match market.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return MarketCategory::Unknown,
    };

    if let Some(parts) = split_combo(raw) {
        return classify(parts.get(1).copied());
    }

    let m = raw.to_lowercase();

    if matches!(m.as_str(), "1" | "2" | "x") {
        return MarketCategory::OneXTwo;
    }
    if m.contains("corner") {
        return MarketCategory::Corners;
    }
    if m.contains("card") || m.contains("booking") {
        return MarketCategory::Cards;
    }
    if let Some((direction, _)) = parse_over_under(&m) {
        // Corners and cards are handled above, so any remaining line is goals.
        return match direction {
            Direction::Over => MarketCategory::Over,
            Direction::Under => MarketCategory::Under,
        };
    }
    if m.contains("btts") || m.contains("both teams") {
        return MarketCategory::Btts;
    }
    if m.contains("double chance") || RE_DOUBLE_CHANCE.is_match(&m) {
        return MarketCategory::DoubleChance;
    }
    if RE_RESULT_WORDING.is_match(&m) {
        return MarketCategory::OneXTwo;
    }
    MarketCategory::Unknown
}
