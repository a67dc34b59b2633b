use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::db::models::NewAlert;
use crate::db::Database;
use crate::markets::BetOutcome;
use crate::settlement::SettlementSummary;
use crate::weights::{DynamicThresholdCalculator, WeightEngine};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: Arc<WeightEngine>,
    pub threshold: DynamicThresholdCalculator,
    /// Summary of the most recent settlement run, if any
    pub last_settlement: Arc<RwLock<Option<SettlementSummary>>>,
}

type ApiError = (StatusCode, String);

/// Build the Axum router for the weights API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/weight", get(weight_handler))
        .route("/api/score", get(score_handler))
        .route("/api/threshold", get(threshold_handler))
        .route("/api/ledger", get(ledger_handler))
        .route("/api/settlement/last", get(last_settlement_handler))
        .route("/api/settlements", get(settlements_handler))
        .route("/api/alerts", post(create_alert_handler))
        .route("/api/alerts/:id/kickoff-odds", post(kickoff_odds_handler))
        .route("/api/ledger/results", post(record_result_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

#[derive(Debug, Deserialize)]
struct WeightQuery {
    league: Option<String>,
    market: Option<String>,
    driver: Option<String>,
}

/// GET /api/weight?league=&market=&driver=
async fn weight_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<WeightQuery>,
) -> impl IntoResponse {
    Json(
        state
            .engine
            .get_weight(q.league.as_deref(), q.market.as_deref(), q.driver.as_deref()),
    )
}

#[derive(Debug, Deserialize)]
struct ScoreQuery {
    base: f64,
    league: Option<String>,
    market: Option<String>,
    driver: Option<String>,
}

/// GET /api/score?base=8.1&league=&market=&driver=
async fn score_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ScoreQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !q.base.is_finite() {
        return Err((StatusCode::BAD_REQUEST, "base must be a finite number".into()));
    }
    Ok(Json(state.engine.apply_weight_to_score(
        q.base,
        q.league.as_deref(),
        q.market.as_deref(),
        q.driver.as_deref(),
    )))
}

/// GET /api/threshold
async fn threshold_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.ledger().snapshot();
    Json(state.threshold.compute(&snapshot))
}

/// GET /api/ledger
async fn ledger_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.ledger().snapshot();
    Json(snapshot.as_ref().clone())
}

/// GET /api/settlement/last
async fn last_settlement_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.last_settlement.read().await.clone())
}

/// GET /api/settlements
async fn settlements_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .list_settlements(100)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// POST /api/alerts
async fn create_alert_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewAlert>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let alert = body.into_alert(Utc::now());
    let id = state
        .db
        .insert_alert(&alert)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    info!(
        "Alert {} registered: {} {} ({}) score {:.1}",
        id, alert.league, alert.market, alert.match_id, alert.score
    );
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

#[derive(Debug, Deserialize)]
struct KickoffOdds {
    odds: f64,
}

/// POST /api/alerts/:id/kickoff-odds
async fn kickoff_odds_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<KickoffOdds>,
) -> Result<impl IntoResponse, ApiError> {
    if !body.odds.is_finite() || body.odds <= 1.0 {
        return Err((StatusCode::BAD_REQUEST, format!("odds {} must be > 1.0", body.odds)));
    }
    let internal = |e: anyhow::Error| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    if !state.db.set_kickoff_odds(id, body.odds).map_err(internal)? {
        return Err((StatusCode::NOT_FOUND, format!("alert {id} not found")));
    }
    match state.db.get_alert(id).map_err(internal)? {
        Some(alert) => Ok(Json(alert)),
        None => Err((StatusCode::NOT_FOUND, format!("alert {id} not found"))),
    }
}

#[derive(Debug, Deserialize)]
struct ManualResult {
    league: String,
    market: String,
    outcome: String,
    odds: f64,
    driver: Option<String>,
}

/// POST /api/ledger/results: record a bet settled outside the pipeline
async fn record_result_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ManualResult>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = BetOutcome::from_label(&body.outcome);
    let engine = Arc::clone(&state.engine);
    let (league, market, driver) = (body.league.clone(), body.market.clone(), body.driver.clone());
    let odds = body.odds;
    // ledger writes are blocking file I/O with retry sleeps
    let applied = tokio::task::spawn_blocking(move || {
        engine.record_result(
            Some(league.as_str()),
            Some(market.as_str()),
            outcome,
            odds,
            driver.as_deref(),
        )
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    info!(
        "Manual result {} for {}/{} applied={}",
        outcome, body.league, body.market, applied
    );
    let decision = state.engine.get_weight(
        Some(body.league.as_str()),
        Some(body.market.as_str()),
        body.driver.as_deref(),
    );
    Ok(Json(serde_json::json!({ "applied": applied, "weight": decision })))
}

/// Embedded status page (HTML + JS)
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Edge Ledger</title>
<style>
  body { background: #0f1117; color: #e0e0e0; font-family: system-ui, sans-serif; padding: 1.5rem 2rem; }
  h1 { font-size: 1.3rem; margin-bottom: 1rem; }
  h2 { font-size: 1rem; color: #8888aa; margin: 1.5rem 0 .5rem; }
  table { border-collapse: collapse; width: 100%; font-size: .85rem; }
  th, td { border-bottom: 1px solid #2a2d3a; padding: .35rem .6rem; text-align: left; }
  .pos { color: #00c896; } .neg { color: #ff4f6a; }
  pre { background: #1a1d27; padding: .8rem; border-radius: 6px; }
</style>
</head>
<body>
<h1>Edge Ledger</h1>
<h2>Alert threshold</h2>
<pre id="threshold">loading…</pre>
<h2>Last settlement run</h2>
<pre id="settlement">loading…</pre>
<h2>League × market cells</h2>
<table>
  <thead><tr><th>League</th><th>Market</th><th>Bets</th><th>Win %</th><th>Profit</th><th>Max DD</th><th>Weight</th></tr></thead>
  <tbody id="cells"></tbody>
</table>
<script>
async function load() {
  const [threshold, last, ledger] = await Promise.all([
    fetch('/api/threshold').then(r => r.json()),
    fetch('/api/settlement/last').then(r => r.json()),
    fetch('/api/ledger').then(r => r.json()),
  ]);
  document.getElementById('threshold').textContent =
    `${threshold.threshold.toFixed(2)}  (${threshold.reason})`;
  document.getElementById('settlement').textContent =
    last ? JSON.stringify(last, null, 2) : 'no run yet';
  const cell = (text, cls) => {
    const td = document.createElement('td');
    td.textContent = text;
    if (cls) td.className = cls;
    return td;
  };
  const body = document.getElementById('cells');
  body.replaceChildren();
  for (const [league, markets] of Object.entries(ledger.stats || {})) {
    for (const [market, c] of Object.entries(markets)) {
      const wr = c.bet_count ? (100 * c.win_count / c.bet_count).toFixed(1) : '-';
      const tr = document.createElement('tr');
      tr.append(
        cell(league), cell(market), cell(String(c.bet_count)), cell(wr),
        cell(c.cumulative_profit.toFixed(2), c.cumulative_profit >= 0 ? 'pos' : 'neg'),
        cell(`${(100 * c.max_drawdown).toFixed(1)}%`), cell(c.weight.toFixed(2)),
      );
      body.appendChild(tr);
    }
  }
}
load();
setInterval(load, 30000);
</script>
</body>
</html>
"#;
