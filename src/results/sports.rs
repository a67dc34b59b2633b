use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::ResultProvider;
use crate::db::models::{MatchResult, MatchStats, MatchStatus};
use crate::error::{EngineError, EngineResult};

const MAX_ATTEMPTS: u32 = 3;

/// Result provider backed by the TheSportsDB JSON API.
/// Docs: <https://www.thesportsdb.com/api.php>
pub struct SportsDbResults {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
}

impl SportsDbResults {
    pub fn new(api_key: Option<&str>, base_url: Option<&str>, timeout: Duration) -> EngineResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(SportsDbResults {
            http,
            // "3" is TheSportsDB's public free-tier key
            api_key: api_key.unwrap_or("3").to_string(),
            base_url: base_url
                .unwrap_or("https://www.thesportsdb.com/api/v1/json")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn status_from_str(s: &str, postponed_flag: Option<&str>) -> MatchStatus {
        if postponed_flag.is_some_and(|p| p.eq_ignore_ascii_case("yes")) {
            return MatchStatus::Postponed;
        }
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "match finished" | "ft" | "finished" | "aet" | "pen" | "after penalties" | "after extra time" => {
                MatchStatus::Finished
            }
            "not started" | "ns" | "tbd" | "" => MatchStatus::NotStarted,
            _ if s.contains("cancel") || s.contains("abandon") || s.contains("awarded") => MatchStatus::Cancelled,
            _ if s.contains("postpon") || s.contains("delayed") || s.contains("suspended") => {
                MatchStatus::Postponed
            }
            _ => MatchStatus::InProgress,
        }
    }

    /// GET a JSON document, retrying transient failures with jittered
    /// exponential backoff.
    async fn get_json(&self, url: &str) -> EngineResult<serde_json::Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_get_json(url).await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < MAX_ATTEMPTS && e.is_transient() => {
                    let jitter = rand::thread_rng().gen_range(0..250);
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1) + jitter);
                    warn!("{} request failed ({}), retrying in {:?}", self.name(), e, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get_json(&self, url: &str) -> EngineResult<serde_json::Value> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(EngineError::Provider(format!("{} returned {}", self.name(), status)));
        }
        if !status.is_success() {
            return Err(EngineError::DataUnavailable(format!("{} returned {}", self.name(), status)));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ResultProvider for SportsDbResults {
    fn name(&self) -> &str {
        "TheSportsDB"
    }

    async fn fetch_result(&self, match_id: &str) -> EngineResult<MatchResult> {
        let url = format!("{}/{}/lookupevent.php?id={}", self.base_url, self.api_key, match_id);
        let raw = self.get_json(&url).await?;
        parse_event_response(match_id, &raw)
    }

    async fn fetch_stats(&self, match_id: &str) -> EngineResult<MatchStats> {
        let url = format!("{}/{}/lookupeventstats.php?id={}", self.base_url, self.api_key, match_id);
        let raw = self.get_json(&url).await?;
        parse_stats_response(match_id, &raw)
    }
}

/// Numbers arrive as either JSON numbers or strings; anything else is absent.
fn int_field(v: &serde_json::Value) -> Option<i32> {
    v.as_str()
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| v.as_i64().and_then(|n| i32::try_from(n).ok()))
}

fn parse_event_response(match_id: &str, raw: &serde_json::Value) -> EngineResult<MatchResult> {
    let ev = raw["events"]
        .as_array()
        .and_then(|events| events.first())
        .ok_or_else(|| EngineError::DataUnavailable(format!("no event {match_id}")))?;

    let status_str = ev["strStatus"].as_str().unwrap_or_default();
    let status = SportsDbResults::status_from_str(status_str, ev["strPostponed"].as_str());
    let reason = ev["strResult"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or_else(|| (!status_str.is_empty()).then(|| status_str.to_string()));

    Ok(MatchResult {
        match_id: match_id.to_string(),
        home_score: int_field(&ev["intHomeScore"]),
        away_score: int_field(&ev["intAwayScore"]),
        status,
        status_reason: reason,
    })
}

fn parse_stats_response(match_id: &str, raw: &serde_json::Value) -> EngineResult<MatchStats> {
    let rows = raw["eventstats"]
        .as_array()
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| EngineError::DataUnavailable(format!("no stats for {match_id}")))?;

    let mut stats = MatchStats::default();
    for row in rows {
        let name = row["strStat"].as_str().unwrap_or_default().to_lowercase();
        let home = int_field(&row["intHome"]);
        let away = int_field(&row["intAway"]);
        if name.contains("corner") {
            stats.home_corners = home;
            stats.away_corners = away;
        } else if name.contains("yellow") {
            stats.home_yellow_cards = home;
            stats.away_yellow_cards = away;
        } else if name.contains("red") {
            stats.home_red_cards = home;
            stats.away_red_cards = away;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_from_str() {
        assert_eq!(SportsDbResults::status_from_str("FT", None), MatchStatus::Finished);
        assert_eq!(SportsDbResults::status_from_str("Match Finished", None), MatchStatus::Finished);
        assert_eq!(SportsDbResults::status_from_str("NS", None), MatchStatus::NotStarted);
        assert_eq!(SportsDbResults::status_from_str("Match Cancelled", None), MatchStatus::Cancelled);
        assert_eq!(SportsDbResults::status_from_str("Match Postponed", None), MatchStatus::Postponed);
        assert_eq!(SportsDbResults::status_from_str("2H", None), MatchStatus::InProgress);
        assert_eq!(SportsDbResults::status_from_str("NS", Some("yes")), MatchStatus::Postponed);
    }

    #[test]
    fn parses_string_and_numeric_scores() {
        let raw = json!({"events": [{
            "idEvent": "1",
            "intHomeScore": "2",
            "intAwayScore": 1,
            "strStatus": "FT",
            "strPostponed": "no"
        }]});
        let r = parse_event_response("1", &raw).unwrap();
        assert_eq!(r.home_score, Some(2));
        assert_eq!(r.away_score, Some(1));
        assert_eq!(r.status, MatchStatus::Finished);
    }

    #[test]
    fn non_numeric_score_is_absent() {
        let raw = json!({"events": [{"intHomeScore": "", "intAwayScore": null, "strStatus": "FT"}]});
        let r = parse_event_response("1", &raw).unwrap();
        assert_eq!(r.home_score, None);
        assert_eq!(r.away_score, None);
    }

    #[test]
    fn missing_event_is_data_unavailable() {
        let raw = json!({"events": null});
        assert!(matches!(
            parse_event_response("9", &raw),
            Err(EngineError::DataUnavailable(_))
        ));
    }

    #[test]
    fn parses_corner_and_card_stats() {
        let raw = json!({"eventstats": [
            {"strStat": "Corner Kicks", "intHome": "6", "intAway": "5"},
            {"strStat": "Yellow Cards", "intHome": 2, "intAway": "3"},
            {"strStat": "Red Cards", "intHome": "0", "intAway": "1"},
            {"strStat": "Shots on Goal", "intHome": "4", "intAway": "2"}
        ]});
        let s = parse_stats_response("1", &raw).unwrap();
        assert_eq!(s.corners(), Some((6, 5)));
        assert_eq!(s.cards(), Some((2, 4)));
    }
}
