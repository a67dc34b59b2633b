//! Settlement runs: turn sent alerts into WIN/LOSS/PUSH results, write them
//! back to the alert store and feed the resolved ones to the weight engine.
//!
//! A run has three phases:
//! 1. select candidates from the database (short lock hold),
//! 2. fetch results and evaluate with no lock held,
//! 3. write settlements and record them into the ledger.

pub mod summary;

pub use summary::SettlementSummary;

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::models::{MatchStatus, Settlement, SettlementCandidate};
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::ledger::SettlementRecord;
use crate::markets::classifier::split_combo;
use crate::markets::{classify, clv, evaluate, BetOutcome, ExpansionType};
use crate::notify::{notify_best_effort, Notifier};
use crate::results::ResultProvider;
use crate::weights::{WeightEngine, WeightPolicy};

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub lookback_hours: i64,
    /// Minimum best-alert score for a match to be settled
    pub min_score: f64,
    pub default_odds: f64,
    /// Odds above this are capped before profit is computed
    pub max_odds: f64,
    pub clv_margin: f64,
    /// Max in-flight provider lookups
    pub concurrency: usize,
    pub provider_timeout: Duration,
    /// Operator alert fires above this false-positive rate
    pub false_positive_alert: f64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        SettlementConfig {
            lookback_hours: 72,
            min_score: 7.0,
            default_odds: 1.9,
            max_odds: WeightPolicy::default().max_odds,
            clv_margin: clv::DEFAULT_MARGIN,
            concurrency: 4,
            provider_timeout: Duration::from_secs(15),
            false_positive_alert: 0.40,
        }
    }
}

/// Outcome of phase 2 for one candidate.
struct Evaluated {
    candidate: SettlementCandidate,
    result: EngineResult<(Settlement, Option<ExpansionType>)>,
}

pub struct SettlementOrchestrator {
    db: Database,
    provider: Arc<dyn ResultProvider>,
    notifier: Arc<dyn Notifier>,
    engine: Arc<WeightEngine>,
    config: SettlementConfig,
}

impl SettlementOrchestrator {
    pub fn new(
        db: Database,
        provider: Arc<dyn ResultProvider>,
        notifier: Arc<dyn Notifier>,
        engine: Arc<WeightEngine>,
        config: SettlementConfig,
    ) -> Self {
        SettlementOrchestrator {
            db,
            provider,
            notifier,
            engine,
            config,
        }
    }

    /// Run one settlement pass. Always returns a summary; per-candidate
    /// failures are logged and counted, never propagated.
    pub async fn run(&self, now: DateTime<Utc>) -> SettlementSummary {
        // Phase 1
        let candidates = match self.db.list_settlement_candidates(
            now,
            self.config.lookback_hours,
            self.config.min_score,
        ) {
            Ok(c) => c,
            Err(e) => {
                error!("Settlement candidate query failed: {:#}", e);
                let mut summary = SettlementSummary::new(now, 0);
                summary.errors += 1;
                summary.finalize();
                return summary;
            }
        };
        let mut summary = SettlementSummary::new(now, candidates.len());
        if candidates.is_empty() {
            info!("Settlement: no candidates in the last {}h", self.config.lookback_hours);
            summary.finalize();
            return summary;
        }
        info!(
            "Settlement: {} candidate(s), fetching results from {}",
            candidates.len(),
            self.provider.name()
        );

        // Phase 2
        let fetches: Vec<_> = candidates
            .into_iter()
            .map(|candidate| async move {
                let result = self.fetch_and_evaluate(&candidate, now).await;
                Evaluated { candidate, result }
            })
            .collect();
        let evaluated: Vec<Evaluated> = stream::iter(fetches)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut settlements = Vec::with_capacity(evaluated.len());
        for item in evaluated {
            match item.result {
                Ok((settlement, expansion)) => settlements.push((item.candidate, settlement, expansion)),
                Err(EngineError::DataUnavailable(reason)) => {
                    debug!("Alert {} not ready: {}", item.candidate.alert_id, reason);
                    summary.record_failure(false);
                }
                Err(e) => {
                    warn!(
                        "Settlement fetch failed for alert {} (match {}): {}",
                        item.candidate.alert_id, item.candidate.match_id, e
                    );
                    summary.record_failure(true);
                }
            }
        }

        // Phase 3
        let rows: Vec<Settlement> = settlements.iter().map(|(_, s, _)| s.clone()).collect();
        let written: HashSet<i64> = match self.db.write_settlements(&rows) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!("Settlement batch write failed: {:#}", e);
                HashSet::new()
            }
        };

        let mut records = Vec::new();
        for (candidate, settlement, expansion) in &settlements {
            if !written.contains(&settlement.alert_id) {
                summary.write_failures += 1;
                continue;
            }
            summary.record(settlement, *expansion);
            if settlement.outcome.is_resolved() {
                records.push(SettlementRecord {
                    league: candidate.league.clone(),
                    market: candidate.market.clone(),
                    outcome: settlement.outcome,
                    odds: settlement.odds,
                    driver: candidate.driver.clone(),
                    timestamp: settlement.settled_at,
                });
            }
        }

        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || engine.record_results(&records)).await {
            Ok(Ok(n)) => summary.learned = n as u64,
            Ok(Err(e)) => error!("Ledger update failed, in-memory weights kept: {}", e),
            Err(e) => error!("Ledger update task failed: {}", e),
        }

        summary.finalize();
        info!(
            "Settlement done: {} win / {} loss / {} push / {} pending ({} errors), ROI {:.2}%, avg CLV {:?}",
            summary.wins,
            summary.losses,
            summary.pushes,
            summary.pending,
            summary.errors,
            summary.roi_pct,
            summary.avg_clv
        );

        if let Some(rate) = summary.false_positive_rate {
            if rate > self.config.false_positive_alert {
                let text = format!(
                    "False-positive rate {:.0}% over {} settled alerts (threshold {:.0}%). ROI {:.2}%.",
                    rate * 100.0,
                    summary.settled(),
                    self.config.false_positive_alert * 100.0,
                    summary.roi_pct
                );
                warn!("{}", text);
                notify_best_effort(self.notifier.as_ref(), &text).await;
            }
        }

        summary
    }

    async fn fetch_and_evaluate(
        &self,
        c: &SettlementCandidate,
        now: DateTime<Utc>,
    ) -> EngineResult<(Settlement, Option<ExpansionType>)> {
        let result = self.with_timeout(self.provider.fetch_result(&c.match_id)).await?;
        debug!(
            "Alert {} (score {:.1}, kickoff {}): match {} is {} {:?}-{:?}",
            c.alert_id, c.score, c.kickoff, result.match_id, result.status, result.home_score, result.away_score
        );

        let stats = if result.status == MatchStatus::Finished && needs_match_stats(&c.market) {
            match self.with_timeout(self.provider.fetch_stats(&c.match_id)).await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    // evaluator leaves the bet PENDING without stats
                    debug!("Stats for match {} unavailable: {}", c.match_id, e);
                    None
                }
            }
        } else {
            None
        };

        let eval = evaluate(
            Some(c.market.as_str()),
            result.home_score,
            result.away_score,
            result.status,
            stats.as_ref(),
        );

        let odds = c.effective_odds(self.config.default_odds, self.config.max_odds);
        let profit = match eval.outcome {
            BetOutcome::Win => odds - 1.0,
            BetOutcome::Loss => -1.0,
            BetOutcome::Push | BetOutcome::Pending => 0.0,
        };
        let clv = match (c.odds_at_alert, c.closing_line()) {
            (Some(taken), Some(closing)) => clv::calculate(taken, closing, self.config.clv_margin),
            _ => None,
        };

        let mut explanation = eval.explanation;
        if eval.outcome == BetOutcome::Push {
            if let Some(reason) = &result.status_reason {
                explanation = format!("{explanation}: {reason}");
            }
        }

        Ok((
            Settlement {
                alert_id: c.alert_id,
                outcome: eval.outcome,
                odds,
                profit,
                clv,
                home_score: result.home_score,
                away_score: result.away_score,
                stats,
                explanation,
                settled_at: now,
            },
            eval.expansion,
        ))
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
        let timeout = self.config.provider_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Provider(format!(
                "{} timed out after {:?}",
                self.provider.name(),
                timeout
            ))),
        }
    }
}

/// Whether settling `market` needs box-score stats, for any leg of a combo.
fn needs_match_stats(market: &str) -> bool {
    match split_combo(market) {
        Some(parts) => parts.into_iter().any(|p| classify(Some(p)).needs_match_stats()),
        None => classify(Some(market)).needs_match_stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Alert, MatchResult, MatchStats};
    use crate::ledger::{MemoryLedgerStore, PerformanceLedger};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubProvider {
        results: HashMap<String, MatchResult>,
        stats: HashMap<String, MatchStats>,
        failing: HashSet<String>,
        stats_calls: AtomicUsize,
    }

    impl StubProvider {
        fn finished(mut self, id: &str, home: i32, away: i32) -> Self {
            self.results.insert(id.into(), result(id, Some(home), Some(away), MatchStatus::Finished));
            self
        }

        fn with_status(mut self, id: &str, status: MatchStatus) -> Self {
            self.results.insert(id.into(), result(id, None, None, status));
            self
        }
    }

    fn result(id: &str, home: Option<i32>, away: Option<i32>, status: MatchStatus) -> MatchResult {
        MatchResult {
            match_id: id.into(),
            home_score: home,
            away_score: away,
            status,
            status_reason: Some(format!("{status}")),
        }
    }

    #[async_trait]
    impl ResultProvider for StubProvider {
        async fn fetch_result(&self, match_id: &str) -> EngineResult<MatchResult> {
            if self.failing.contains(match_id) {
                return Err(EngineError::Provider("503".into()));
            }
            self.results
                .get(match_id)
                .cloned()
                .ok_or_else(|| EngineError::DataUnavailable(match_id.into()))
        }

        async fn fetch_stats(&self, match_id: &str) -> EngineResult<MatchStats> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            self.stats
                .get(match_id)
                .cloned()
                .ok_or_else(|| EngineError::DataUnavailable(match_id.into()))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[derive(Default)]
    struct StubNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for StubNotifier {
        async fn notify(&self, text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Harness {
        db: Database,
        engine: Arc<WeightEngine>,
        notifier: Arc<StubNotifier>,
        now: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let ledger = PerformanceLedger::open(Box::new(MemoryLedgerStore::new())).unwrap();
            Harness {
                db: Database::open(":memory:").unwrap(),
                engine: Arc::new(WeightEngine::new(Arc::new(ledger), WeightPolicy::default())),
                notifier: Arc::new(StubNotifier::default()),
                now: Utc::now(),
            }
        }

        fn alert(&self, match_id: &str, market: &str, odds: Option<f64>) -> i64 {
            let kickoff = self.now - ChronoDuration::hours(5);
            self.db
                .insert_alert(&Alert {
                    id: None,
                    match_id: match_id.into(),
                    league: "Serie A".into(),
                    home_team: "Inter".into(),
                    away_team: "Milan".into(),
                    kickoff,
                    market: market.into(),
                    driver: Some("injury_intel".into()),
                    score: 8.2,
                    odds_at_alert: odds,
                    odds_at_kickoff: None,
                    closing_odds: None,
                    current_odds: None,
                    sent_at: kickoff - ChronoDuration::hours(2),
                })
                .unwrap()
        }

        fn orchestrator(&self, provider: StubProvider) -> SettlementOrchestrator {
            SettlementOrchestrator::new(
                self.db.clone(),
                Arc::new(provider),
                self.notifier.clone(),
                self.engine.clone(),
                SettlementConfig::default(),
            )
        }
    }

    #[tokio::test]
    async fn mixed_batch_settles_what_it_can() {
        let h = Harness::new();
        h.alert("win", "Over 2.5 Goals", Some(2.0));
        h.alert("loss", "Under 2.5 Goals", Some(1.8));
        h.alert("void", "Home Win", Some(1.6));
        h.alert("later", "BTTS", Some(1.7));
        h.alert("down", "Away Win", Some(3.1));

        let mut provider = StubProvider::default()
            .finished("win", 2, 1)
            .finished("loss", 3, 1)
            .with_status("void", MatchStatus::Postponed);
        provider.failing.insert("down".into());

        let summary = h.orchestrator(provider).run(h.now).await;
        assert_eq!(summary.candidates, 5);
        assert_eq!((summary.wins, summary.losses, summary.pushes), (1, 1, 1));
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.learned, 2);
        assert_eq!(summary.roi_pct, 0.0);

        let doc = h.engine.ledger().snapshot();
        assert_eq!(doc.global.total_bets, 2);
        assert_eq!(doc.driver("injury_intel").unwrap().bet_count, 2);

        // settled rows drop out; the unpublished and failed ones come back
        let remaining = h.db.list_settlement_candidates(h.now, 72, 7.0).unwrap();
        let mut ids: Vec<_> = remaining.iter().map(|c| c.match_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["down", "later"]);
    }

    #[tokio::test]
    async fn stats_fetched_only_for_stat_markets() {
        let h = Harness::new();
        h.alert("goals", "Over 2.5 Goals", Some(1.9));
        h.alert("corners", "Over 9.5 Corners", Some(1.9));

        let mut provider = StubProvider::default()
            .finished("goals", 1, 1)
            .finished("corners", 0, 0);
        provider.stats.insert(
            "corners".into(),
            MatchStats {
                home_corners: Some(6),
                away_corners: Some(5),
                ..MatchStats::default()
            },
        );
        let provider = Arc::new(provider);
        let orch = SettlementOrchestrator::new(
            h.db.clone(),
            provider.clone(),
            h.notifier.clone(),
            h.engine.clone(),
            SettlementConfig::default(),
        );

        let summary = orch.run(h.now).await;
        assert_eq!(provider.stats_calls.load(Ordering::SeqCst), 1);
        assert_eq!((summary.wins, summary.losses), (1, 1));

        let rows = h.db.list_settlements(10).unwrap();
        let corners = rows.iter().find(|s| s.outcome == BetOutcome::Win).unwrap();
        assert!(corners.explanation.contains("11"));
        assert_eq!(corners.stats.as_ref().and_then(|s| s.corners()), Some((6, 5)));
    }

    #[tokio::test]
    async fn clv_uses_kickoff_odds() {
        let h = Harness::new();
        let id = h.alert("m1", "Home Win", Some(2.20));
        h.db.set_kickoff_odds(id, 2.00).unwrap();
        h.alert("m2", "Home Win", None);

        let provider = StubProvider::default().finished("m1", 1, 0).finished("m2", 1, 0);
        let summary = h.orchestrator(provider).run(h.now).await;

        assert_eq!(summary.avg_clv, Some(4.76));
        assert_eq!(summary.positive_clv_pct, Some(100.0));

        let rows = h.db.list_settlements(10).unwrap();
        let m1 = rows.iter().find(|s| s.alert_id == id).unwrap();
        assert_eq!(m1.odds, 2.20);
        assert!((m1.profit - 1.20).abs() < 1e-9);
        // m2 had no alert odds: default odds, no CLV
        let m2 = rows.iter().find(|s| s.alert_id != id).unwrap();
        assert_eq!(m2.odds, 1.9);
        assert_eq!(m2.clv, None);
    }

    #[tokio::test]
    async fn extreme_odds_are_capped_in_profit() {
        let h = Harness::new();
        let id = h.alert("long", "Home Win", Some(250.0));

        let provider = StubProvider::default().finished("long", 1, 0);
        let summary = h.orchestrator(provider).run(h.now).await;

        let rows = h.db.list_settlements(10).unwrap();
        let row = rows.iter().find(|s| s.alert_id == id).unwrap();
        assert_eq!(row.odds, 100.0);
        assert!((row.profit - 99.0).abs() < 1e-9);
        assert_eq!(summary.total_profit, 99.0);
        assert_eq!(summary.roi_pct, 9900.0);

        let cell = h.engine.ledger().snapshot().cell("Serie A", "1X2").unwrap().clone();
        assert!((cell.cumulative_profit - row.profit).abs() < 1e-9);
    }

    #[tokio::test]
    async fn high_false_positive_rate_alerts_operator() {
        let h = Harness::new();
        let mut provider = StubProvider::default();
        for i in 0..10 {
            let id = format!("m{i}");
            h.alert(&id, "Home Win", Some(1.9));
            provider = provider.finished(&id, 0, 2);
        }

        let summary = h.orchestrator(provider).run(h.now).await;
        assert_eq!(summary.false_positive_rate, Some(1.0));
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("False-positive rate 100%"));
    }

    #[tokio::test]
    async fn healthy_run_sends_nothing() {
        let h = Harness::new();
        let mut provider = StubProvider::default();
        for i in 0..10 {
            let id = format!("m{i}");
            h.alert(&id, "Home Win", Some(1.9));
            provider = provider.finished(&id, 2, 0);
        }

        let summary = h.orchestrator(provider).run(h.now).await;
        assert_eq!(summary.false_positive_rate, Some(0.0));
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn combo_win_rate_by_expansion() {
        let h = Harness::new();
        h.alert("c1", "Home Win + Over 2.5 Goals", Some(2.5));
        h.alert("c2", "Home Win + BTTS", Some(3.0));

        let provider = StubProvider::default().finished("c1", 3, 0).finished("c2", 2, 0);
        let summary = h.orchestrator(provider).run(h.now).await;

        assert_eq!(summary.combo[&ExpansionType::Goals].wins, 1);
        assert_eq!(summary.combo[&ExpansionType::Btts].win_rate, 0.0);
    }

    #[tokio::test]
    async fn empty_database_returns_empty_summary() {
        let h = Harness::new();
        let summary = h.orchestrator(StubProvider::default()).run(h.now).await;
        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.learned, 0);
        assert_eq!(h.engine.ledger().snapshot().version, 0);
    }
}
