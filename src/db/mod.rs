use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub mod models;
use models::*;

use crate::markets::BetOutcome;

/// Matches that kicked off less than this long ago are never settled.
const MIN_HOURS_SINCE_KICKOFF: i64 = 2;

/// Thread-safe SQLite store for sent alerts and their settlements (single
/// connection with mutex).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open database {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Alerts ────────────────────────────────────────────────────────────────

    /// Insert an alert sent by the pipeline
    pub fn insert_alert(&self, alert: &Alert) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO alerts (
                match_id, league, home_team, away_team, kickoff, market, driver,
                score, odds_at_alert, odds_at_kickoff, closing_odds, current_odds, sent_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                alert.match_id,
                alert.league,
                alert.home_team,
                alert.away_team,
                alert.kickoff,
                alert.market,
                alert.driver,
                alert.score,
                alert.odds_at_alert,
                alert.odds_at_kickoff,
                alert.closing_odds,
                alert.current_odds,
                alert.sent_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record the market price at kickoff. Returns false if the alert does not exist.
    pub fn set_kickoff_odds(&self, alert_id: i64, odds: f64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE alerts SET odds_at_kickoff=?1 WHERE id=?2",
            params![odds, alert_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_alert(&self, alert_id: i64) -> Result<Option<Alert>> {
        let conn = self.lock()?;
        let alert = conn
            .query_row(
                "SELECT id, match_id, league, home_team, away_team, kickoff, market, driver,
                        score, odds_at_alert, odds_at_kickoff, closing_odds, current_odds, sent_at
                 FROM alerts WHERE id=?1",
                params![alert_id],
                map_alert,
            )
            .optional()?;
        Ok(alert)
    }

    // ── Settlement ────────────────────────────────────────────────────────────

    /// Alerts whose match kicked off between 2h and `lookback_hours` ago,
    /// taking the best-scored alert per match, when that score met
    /// `min_score` and it is unsettled or still PENDING.
    pub fn list_settlement_candidates(
        &self,
        now: DateTime<Utc>,
        lookback_hours: i64,
        min_score: f64,
    ) -> Result<Vec<SettlementCandidate>> {
        let newest = now - Duration::hours(MIN_HOURS_SINCE_KICKOFF);
        let oldest = now - Duration::hours(lookback_hours);
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.match_id, a.league, a.market, a.driver, a.kickoff, a.score,
                    a.odds_at_alert, a.odds_at_kickoff, a.closing_odds, a.current_odds
             FROM alerts a
             LEFT JOIN settlements s ON s.alert_id = a.id
             WHERE a.kickoff >= ?1 AND a.kickoff <= ?2
               AND a.score >= ?3
               AND a.id = (SELECT b.id FROM alerts b WHERE b.match_id = a.match_id
                           ORDER BY b.score DESC, b.id ASC LIMIT 1)
               AND (s.alert_id IS NULL OR s.outcome = 'PENDING')
             ORDER BY a.kickoff ASC",
        )?;
        let rows = stmt
            .query_map(params![oldest, newest, min_score], |row| {
                Ok(SettlementCandidate {
                    alert_id: row.get(0)?,
                    match_id: row.get(1)?,
                    league: row.get(2)?,
                    market: row.get(3)?,
                    driver: row.get(4)?,
                    kickoff: row.get(5)?,
                    score: row.get(6)?,
                    odds_at_alert: row.get(7)?,
                    odds_at_kickoff: row.get(8)?,
                    closing_odds: row.get(9)?,
                    current_odds: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upsert settlements in one short lock hold. A failing row is logged
    /// and skipped; returns the alert IDs that were written.
    pub fn write_settlements(&self, settlements: &[Settlement]) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut written = Vec::with_capacity(settlements.len());
        for s in settlements {
            match upsert_settlement(&conn, s) {
                Ok(()) => written.push(s.alert_id),
                Err(e) => warn!("Failed to write settlement for alert {}: {:#}", s.alert_id, e),
            }
        }
        Ok(written)
    }

    /// List recent settlements, newest first
    pub fn list_settlements(&self, limit: i64) -> Result<Vec<Settlement>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT alert_id, outcome, odds, profit, clv, home_score, away_score,
                    stats_json, explanation, settled_at
             FROM settlements ORDER BY settled_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], map_settlement)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn upsert_settlement(conn: &Connection, s: &Settlement) -> Result<()> {
    let stats_json = s
        .stats
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize match stats")?;
    conn.execute(
        "INSERT INTO settlements (
            alert_id, outcome, odds, profit, clv, home_score, away_score,
            stats_json, explanation, settled_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
         ON CONFLICT(alert_id) DO UPDATE SET
            outcome=excluded.outcome,
            odds=excluded.odds,
            profit=excluded.profit,
            clv=excluded.clv,
            home_score=excluded.home_score,
            away_score=excluded.away_score,
            stats_json=excluded.stats_json,
            explanation=excluded.explanation,
            settled_at=excluded.settled_at",
        params![
            s.alert_id,
            s.outcome.as_str(),
            s.odds,
            s.profit,
            s.clv,
            s.home_score,
            s.away_score,
            stats_json,
            s.explanation,
            s.settled_at,
        ],
    )?;
    Ok(())
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        match_id: row.get(1)?,
        league: row.get(2)?,
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        kickoff: row.get(5)?,
        market: row.get(6)?,
        driver: row.get(7)?,
        score: row.get(8)?,
        odds_at_alert: row.get(9)?,
        odds_at_kickoff: row.get(10)?,
        closing_odds: row.get(11)?,
        current_odds: row.get(12)?,
        sent_at: row.get(13)?,
    })
}

fn map_settlement(row: &rusqlite::Row) -> rusqlite::Result<Settlement> {
    let outcome: String = row.get(1)?;
    let stats_json: Option<String> = row.get(7)?;
    Ok(Settlement {
        alert_id: row.get(0)?,
        outcome: BetOutcome::from_label(&outcome),
        odds: row.get(2)?,
        profit: row.get(3)?,
        clv: row.get(4)?,
        home_score: row.get(5)?,
        away_score: row.get(6)?,
        stats: stats_json.and_then(|s| serde_json::from_str(&s).ok()),
        explanation: row.get(8)?,
        settled_at: row.get(9)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id        TEXT    NOT NULL,
    league          TEXT    NOT NULL,
    home_team       TEXT    NOT NULL DEFAULT '',
    away_team       TEXT    NOT NULL DEFAULT '',
    kickoff         TEXT    NOT NULL,
    market          TEXT    NOT NULL,
    driver          TEXT,
    score           REAL    NOT NULL,
    odds_at_alert   REAL,
    odds_at_kickoff REAL,
    closing_odds    REAL,
    current_odds    REAL,
    sent_at         TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS settlements (
    alert_id    INTEGER PRIMARY KEY,
    outcome     TEXT    NOT NULL,
    odds        REAL    NOT NULL,
    profit      REAL    NOT NULL,
    clv         REAL,
    home_score  INTEGER,
    away_score  INTEGER,
    stats_json  TEXT,
    explanation TEXT    NOT NULL DEFAULT '',
    settled_at  TEXT    NOT NULL,
    FOREIGN KEY (alert_id) REFERENCES alerts(id)
);

CREATE INDEX IF NOT EXISTS idx_alerts_kickoff ON alerts(kickoff);
CREATE INDEX IF NOT EXISTS idx_alerts_match ON alerts(match_id);
CREATE INDEX IF NOT EXISTS idx_settlements_outcome ON settlements(outcome);
"#;
