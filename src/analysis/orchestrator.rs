//! Analysis orchestrator.
//!
//! Sequences catalog refresh, the rate-limited per-set fan-out, scoring and
//! persistence, while publishing progress to subscribers. At most one run may
//! be in flight: the run guard is a `tokio::sync::Mutex` and a second trigger
//! observes `Conflict` instead of starting another run.
//!
//! State machine: idle -> running -> completed | error -> idle. Terminal
//! progress events carry either 100% or the error text; after the terminal
//! event the published snapshot returns to idle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::catalog::{CatalogCache, SetDefinition};
use crate::error::{EngineError, Result};
use crate::market::{MarketClient, OrderBook, Statistics};
use crate::models::{
    AnalysisResult, ExecutionMode, PartDetail, ProgressEvent, RunState, ScoredSet, StrategyType,
};
use crate::storage::RunStore;

use super::liquidity::{analyze_book, price_metrics, volume_metrics};
use super::pricing::{resolve_part_price, resolve_set_price};
use super::profit::compute_variant;
use super::scoring::apply_strategy;

/// Sets analyzed per run in test mode.
const TEST_MODE_SET_LIMIT: usize = 10;

/// Progress band boundaries, mirroring the run phases.
const PROGRESS_CATALOG_INDEX: u8 = 5;
const PROGRESS_DETAILS_START: u8 = 10;
const PROGRESS_DETAILS_END: u8 = 40;
const PROGRESS_SETS_END: u8 = 90;
const PROGRESS_SCORING: u8 = 92;
const PROGRESS_SAVING: u8 = 96;

/// Per-run request parameters.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisParams {
    pub strategy: StrategyType,
    pub execution_mode: ExecutionMode,
    pub force_refresh: bool,
    pub test_mode: bool,
}

pub struct Orchestrator {
    client: MarketClient,
    catalog: Arc<CatalogCache>,
    store: Arc<RunStore>,
    run_guard: Arc<Mutex<()>>,
    snapshot: RwLock<ProgressEvent>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    latest: RwLock<Option<AnalysisResult>>,
    workers: usize,
    analysis_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        client: MarketClient,
        catalog: Arc<CatalogCache>,
        store: Arc<RunStore>,
        workers: usize,
        analysis_timeout: Duration,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(256);
        Orchestrator {
            client,
            catalog,
            store,
            run_guard: Arc::new(Mutex::new(())),
            snapshot: RwLock::new(ProgressEvent::idle()),
            progress_tx,
            latest: RwLock::new(None),
            workers: workers.max(1),
            analysis_timeout,
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> ProgressEvent {
        self.snapshot.read().clone()
    }

    /// Subscribe to live progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Start a run in the background. Errors with `Conflict` when one is
    /// already in flight; the conflict carries the last committed run id.
    pub fn trigger(self: &Arc<Self>, params: AnalysisParams) -> Result<()> {
        let guard = match self.run_guard.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                return Err(EngineError::Conflict {
                    run_id: self.snapshot.read().run_id,
                })
            }
        };

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = orchestrator.run_bounded(params).await {
                warn!(error = %e, "Background analysis failed");
            }
        });
        Ok(())
    }

    /// Run an analysis synchronously, waiting for any in-flight run first.
    pub async fn run_blocking(&self, params: AnalysisParams) -> Result<AnalysisResult> {
        let _guard = self.run_guard.lock().await;
        self.run_bounded(params).await
    }

    /// Latest scored result: the in-memory copy when present, otherwise the
    /// newest run replayed from the store.
    pub fn latest_result(&self) -> Result<Option<AnalysisResult>> {
        if let Some(result) = self.latest.read().clone() {
            return Ok(Some(result));
        }
        let Some(run_id) = self.store.latest_run_id()? else {
            return Ok(None);
        };
        let loaded = self.store.get_full(run_id)?;
        if let Some(result) = &loaded {
            *self.latest.write() = Some(result.clone());
        }
        Ok(loaded)
    }

    /// Rescore the latest run under a new strategy and execution mode using
    /// the captured metrics and price variants. No upstream calls.
    pub fn rescore(
        &self,
        strategy: StrategyType,
        execution_mode: ExecutionMode,
    ) -> Result<AnalysisResult> {
        let Some(mut result) = self.latest_result()? else {
            return Err(EngineError::NotFound(
                "no analysis data available; run an analysis first".to_string(),
            ));
        };

        let profitable = apply_strategy(&mut result.sets, strategy, execution_mode);
        result.strategy = strategy;
        result.execution_mode = execution_mode;
        result.profitable_sets = profitable;
        result.cached = true;

        *self.latest.write() = Some(result.clone());
        Ok(result)
    }

    /// Background loop triggering a run every `interval`; skips cycles while
    /// a run is already in flight.
    pub fn spawn_poll_loop(self: &Arc<Self>, interval: Duration, params: AnalysisParams) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Continuous analysis polling started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so startup stays quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match orchestrator.trigger(params) {
                    Ok(()) => {}
                    Err(EngineError::Conflict { .. }) => {
                        info!("Skipping poll cycle, analysis already running");
                    }
                    Err(e) => warn!(error = %e, "Poll cycle failed to start"),
                }
            }
        });
    }

    /// Run one analysis inside the global timeout, translating every failure
    /// into a terminal error event.
    async fn run_bounded(&self, params: AnalysisParams) -> Result<AnalysisResult> {
        // The snapshot keeps the last committed run id until this run commits
        // its own, so conflict responses can always point at a real run.
        let last_run_id = self.snapshot.read().run_id;
        self.publish(ProgressEvent {
            status: RunState::Running,
            progress: Some(0),
            message: Some("Starting analysis...".to_string()),
            run_id: last_run_id,
            error: None,
        });

        let outcome = match tokio::time::timeout(self.analysis_timeout, self.run_inner(params))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(format!(
                "analysis exceeded {}s",
                self.analysis_timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(result) => {
                self.publish(ProgressEvent {
                    status: RunState::Completed,
                    progress: Some(100),
                    message: Some("Analysis complete".to_string()),
                    run_id: result.run_id,
                    error: None,
                });
                self.settle_idle();
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, "Analysis run failed");
                let (progress, run_id) = {
                    let snap = self.snapshot.read();
                    (snap.progress, snap.run_id)
                };
                self.publish(ProgressEvent {
                    status: RunState::Error,
                    progress,
                    message: Some("Analysis failed".to_string()),
                    run_id,
                    error: Some(e.to_string()),
                });
                self.settle_idle();
                Err(e)
            }
        }
    }

    async fn run_inner(&self, params: AnalysisParams) -> Result<AnalysisResult> {
        info!(
            strategy = %params.strategy,
            execution_mode = %params.execution_mode,
            force_refresh = params.force_refresh,
            test_mode = params.test_mode,
            "Starting full analysis"
        );

        // Phase 1: catalog.
        self.report(PROGRESS_CATALOG_INDEX, "Fetching catalog index...");
        let mut sets = self
            .catalog
            .refresh_if_stale(&self.client, params.force_refresh, |done, total| {
                if total > 0 {
                    let span = f64::from(PROGRESS_DETAILS_END - PROGRESS_DETAILS_START);
                    let pct = PROGRESS_DETAILS_START
                        + (done as f64 / total as f64 * span).round() as u8;
                    self.report(pct, &format!("Fetching set details ({done}/{total})..."));
                }
            })
            .await?;

        if params.test_mode {
            sets.truncate(TEST_MODE_SET_LIMIT);
        }
        info!(sets = sets.len(), "Catalog ready");

        // Phase 2: per-set fan-out over a bounded worker pool. Workers hold a
        // snapshot of the catalog; a concurrent refresh cannot change this run.
        let total = sets.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<ScoredSet> = JoinSet::new();
        for def in sets {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closes");
                analyze_set(&client, &def).await
            });
        }

        let mut scored: Vec<ScoredSet> = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            let set = joined
                .map_err(|e| EngineError::Cancelled(format!("worker aborted: {e}")))?;
            scored.push(set);
            let span = f64::from(PROGRESS_SETS_END - PROGRESS_DETAILS_END);
            let pct = PROGRESS_DETAILS_END
                + (scored.len() as f64 / total.max(1) as f64 * span).round() as u8;
            self.report(pct, &format!("Analyzing sets ({}/{total})...", scored.len()));
        }

        // Phase 3: scoring.
        self.report(
            PROGRESS_SCORING,
            &format!("Applying {} strategy...", params.strategy),
        );
        let profitable = apply_strategy(&mut scored, params.strategy, params.execution_mode);

        let mut result = AnalysisResult {
            run_id: None,
            timestamp: Utc::now(),
            strategy: params.strategy,
            execution_mode: params.execution_mode,
            total_sets: scored.len(),
            profitable_sets: profitable,
            sets: scored,
            cached: false,
        };

        // Phase 4: persist.
        self.report(PROGRESS_SAVING, "Saving results...");
        let run_id = self.store.append(&result)?;
        result.run_id = Some(run_id);

        *self.latest.write() = Some(result.clone());
        info!(
            run_id,
            total_sets = result.total_sets,
            profitable_sets = result.profitable_sets,
            "Analysis complete"
        );
        Ok(result)
    }

    /// Publish a running progress update, keeping the percentage monotonic
    /// within the run.
    fn report(&self, pct: u8, message: &str) {
        let (previous, run_id) = {
            let snap = self.snapshot.read();
            (snap.progress.unwrap_or(0), snap.run_id)
        };
        self.publish(ProgressEvent {
            status: RunState::Running,
            progress: Some(previous.max(pct.min(100))),
            message: Some(message.to_string()),
            run_id,
            error: None,
        });
    }

    fn publish(&self, event: ProgressEvent) {
        *self.snapshot.write() = event.clone();
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.progress_tx.send(event);
    }

    /// After a terminal event the published state returns to idle; the last
    /// run id, progress and error stay visible on the status endpoint.
    fn settle_idle(&self) {
        let mut snap = self.snapshot.write();
        snap.status = RunState::Idle;
    }
}

/// Fetch and assemble one set's unscored data. Fetch failures produce a
/// zeroed row with the error noted instead of aborting the run.
async fn analyze_set(client: &MarketClient, def: &SetDefinition) -> ScoredSet {
    match fetch_set_data(client, def).await {
        Ok((set_book, part_books, stats)) => build_set_datum(def, &set_book, &part_books, &stats),
        Err(e) => {
            warn!(set = %def.slug, error = %e, "Set analysis failed");
            ScoredSet::failed(&def.slug, &def.name, ExecutionMode::Instant, e.to_string())
        }
    }
}

async fn fetch_set_data(
    client: &MarketClient,
    def: &SetDefinition,
) -> Result<(OrderBook, Vec<OrderBook>, Statistics)> {
    let set_book = client.top_orders(&def.slug).await?;

    let mut part_books = Vec::with_capacity(def.parts.len());
    for part in &def.parts {
        part_books.push(client.top_orders(&part.slug).await?);
    }

    let stats = client.statistics(&def.slug).await?;
    Ok((set_book, part_books, stats))
}

fn build_set_datum(
    def: &SetDefinition,
    set_book: &OrderBook,
    part_books: &[OrderBook],
    stats: &Statistics,
) -> ScoredSet {
    let instant_parts: Vec<(Option<f64>, u32)> = def
        .parts
        .iter()
        .zip(part_books)
        .map(|(part, book)| (resolve_part_price(book, ExecutionMode::Instant), part.quantity))
        .collect();
    let patient_parts: Vec<(Option<f64>, u32)> = def
        .parts
        .iter()
        .zip(part_books)
        .map(|(part, book)| (resolve_part_price(book, ExecutionMode::Patient), part.quantity))
        .collect();

    let instant = compute_variant(
        resolve_set_price(set_book, ExecutionMode::Instant),
        &instant_parts,
    );
    let patient = compute_variant(
        resolve_set_price(set_book, ExecutionMode::Patient),
        &patient_parts,
    );

    // The breakdown shows instant unit prices, falling back to patient for
    // parts with no online ask.
    let part_details: Vec<PartDetail> = def
        .parts
        .iter()
        .zip(instant_parts.iter().zip(&patient_parts))
        .map(|(part, ((instant_price, _), (patient_price, _)))| {
            let unit_price = instant_price.or(*patient_price).unwrap_or(0.0);
            PartDetail {
                slug: part.slug.clone(),
                name: part.name.clone(),
                unit_price,
                quantity: part.quantity,
                total_cost: unit_price * f64::from(part.quantity),
            }
        })
        .collect();

    let book_liquidity = analyze_book(set_book);
    let volume = volume_metrics(&stats.hours48);
    // Trend and volatility prefer the daily series; the 48h series stands in
    // when the daily one is too short.
    let price_series = if stats.days90.len() >= 2 {
        &stats.days90
    } else {
        &stats.hours48
    };
    let prices = price_metrics(price_series);

    let mut set = ScoredSet::failed(&def.slug, &def.name, ExecutionMode::Instant, String::new());
    set.fetch_error = None;
    set.part_details = part_details;

    set.instant_set_price = instant.map(|v| v.set_price);
    set.instant_part_cost = instant.map(|v| v.part_cost);
    set.instant_profit_margin = instant.map(|v| v.profit_margin);
    set.instant_profit_percentage = instant.map(|v| v.profit_percentage);
    set.patient_set_price = patient.map(|v| v.set_price);
    set.patient_part_cost = patient.map(|v| v.part_cost);
    set.patient_profit_margin = patient.map(|v| v.profit_margin);
    set.patient_profit_percentage = patient.map(|v| v.profit_percentage);

    set.volume = volume.volume_48h;
    set.liquidity_velocity = volume.velocity;
    set.bid_ask_ratio = book_liquidity.bid_ask_ratio;
    set.sell_side_competition = book_liquidity.sell_side_competition;
    set.trend_slope = prices.trend_slope;
    set.volatility = prices.volatility;

    set
}
