pub mod controller;
pub mod scheduler;

pub use controller::CycleController;
pub use scheduler::Scheduler;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::features::{materialize_features, FeatureEngine};
use crate::ingest::{ingest_symbol, QuoteProvider};
use crate::ledger::PredictionLedger;
use crate::models::ForecastEngine;
use crate::registry::ModelRegistry;
use crate::types::{JobRun, JobStatus, PipelineStep};

pub fn cycle_id_for(date: NaiveDate) -> String {
    format!("cycle-{}", date.format("%Y-%m-%d"))
}

/// How one symbol's pipeline ended in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: String,
    /// `Done`, `Failed`, or the step that was next when the cycle stopped.
    pub final_step: PipelineStep,
    /// Steps already completed by an earlier run of this cycle.
    pub skipped: Vec<PipelineStep>,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl SymbolOutcome {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            final_step: PipelineStep::Pending,
            skipped: Vec::new(),
            error: None,
            cancelled: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: String,
    pub as_of: DateTime<Utc>,
    pub outcomes: Vec<SymbolOutcome>,
    pub reference: Vec<SymbolOutcome>,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.final_step == PipelineStep::Done).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.final_step == PipelineStep::Failed).count()
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|o| o.symbol == symbol)
    }
}

/// Runs the daily ingest → features → forecast → reconcile pipeline per symbol.
pub struct Orchestrator {
    db: Database,
    provider: Arc<dyn QuoteProvider>,
    ledger: PredictionLedger,
    forecaster: ForecastEngine,
    features: FeatureEngine,
    config: PipelineConfig,
    controller: Arc<CycleController>,
    owner: String,
}

impl Orchestrator {
    pub fn new(db: Database, provider: Arc<dyn QuoteProvider>, config: PipelineConfig) -> Self {
        let registry = ModelRegistry::new(db.clone());
        let forecaster = ForecastEngine::new(
            db.clone(),
            registry,
            config.forecast.clone(),
            config.orchestrator.history_window_days,
        );

        Self {
            ledger: PredictionLedger::new(db.clone()),
            features: FeatureEngine::new(config.features.clone()),
            db,
            provider,
            forecaster,
            config,
            controller: Arc::new(CycleController::new()),
            owner: format!("orchestrator-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn controller(&self) -> Arc<CycleController> {
        self.controller.clone()
    }

    /// The cycle's logical time: `date` at the configured run time (UTC).
    pub fn as_of_for(&self, date: NaiveDate) -> Result<DateTime<Utc>> {
        let run_time: NaiveTime = self.config.schedule.run_time().ok_or_else(|| {
            PipelineError::Config(config::ConfigError::Message(format!(
                "invalid schedule.run_time_utc {:?}",
                self.config.schedule.run_time_utc
            )))
        })?;
        Ok(Utc.from_utc_datetime(&date.and_time(run_time)))
    }

    /// Runs (or resumes) the cycle for `date`. Steps already completed for this
    /// cycle are skipped, so re-running after a failure picks up where it stopped.
    pub async fn run_cycle(&self, date: NaiveDate) -> Result<CycleReport> {
        let cycle_id = cycle_id_for(date);
        let as_of = self.as_of_for(date)?;
        self.controller
            .begin(&cycle_id)
            .await
            .map_err(PipelineError::Model)?;

        info!(cycle_id = %cycle_id, as_of = %as_of, "Starting pipeline cycle");

        // A symbol listed twice would otherwise run twice in parallel
        let mut seen = HashSet::new();
        let symbols: Vec<String> = self
            .config
            .universe
            .symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect();
        let reference_symbols: Vec<String> = self
            .config
            .all_instruments()
            .into_iter()
            .filter(|s| !symbols.contains(s))
            .collect();

        // Reference series feed correlation features, so they land first
        let mut reference = Vec::with_capacity(reference_symbols.len());
        for symbol in &reference_symbols {
            reference.push(
                self.run_symbol(symbol, &cycle_id, as_of, &[PipelineStep::Ingesting])
                    .await,
            );
        }

        let parallel = self.config.orchestrator.max_parallel_symbols.max(1);
        let cycle = cycle_id.as_str();
        let outcomes: Vec<SymbolOutcome> = stream::iter(symbols)
            .map(|symbol| async move { self.run_symbol(&symbol, cycle, as_of, &PipelineStep::WORK).await })
            .buffer_unordered(parallel)
            .collect()
            .await;

        let cancelled = self.controller.is_cancelled();
        if !cancelled {
            if let Err(e) = self.apply_retention(as_of).await {
                warn!(error = %e, "Retention pruning failed");
            }
        }
        self.controller.finish().await;

        let mut outcomes = outcomes;
        outcomes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let report = CycleReport {
            cycle_id,
            as_of,
            outcomes,
            reference,
            cancelled,
        };
        info!(
            cycle_id = %report.cycle_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled,
            "Pipeline cycle finished"
        );
        Ok(report)
    }

    /// Drives one symbol through `steps` under its advisory lock. Never returns
    /// an error: failures end in `FAILED` and are recorded on the outcome.
    pub(crate) async fn run_symbol(
        &self,
        symbol: &str,
        cycle_id: &str,
        as_of: DateTime<Utc>,
        steps: &[PipelineStep],
    ) -> SymbolOutcome {
        let mut outcome = SymbolOutcome::new(symbol);
        let ttl = Duration::seconds(self.config.orchestrator.lock_ttl_secs);

        match self.db.try_acquire_symbol_lock(symbol, &self.owner, ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(symbol, "Symbol is locked by another cycle; skipping");
                outcome.error = Some("locked by another cycle".to_string());
                return outcome;
            }
            Err(e) => {
                error!(symbol, error = %e, "Could not take symbol lock");
                outcome.final_step = PipelineStep::Failed;
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }

        self.drive(&mut outcome, cycle_id, as_of, steps).await;

        if let Err(e) = self.db.release_symbol_lock(symbol, &self.owner).await {
            warn!(symbol, error = %e, "Could not release symbol lock");
        }
        outcome
    }

    async fn drive(&self, outcome: &mut SymbolOutcome, cycle_id: &str, as_of: DateTime<Utc>, steps: &[PipelineStep]) {
        let symbol = outcome.symbol.clone();
        let completed = match self.db.completed_job_types(cycle_id, &symbol).await {
            Ok(done) => done,
            Err(e) => {
                outcome.final_step = PipelineStep::Failed;
                outcome.error = Some(e.to_string());
                return;
            }
        };

        let mut step = PipelineStep::Pending.next();
        while !step.is_terminal() {
            if !steps.contains(&step) {
                step = step.next();
                continue;
            }
            if self.controller.is_cancelled() {
                info!(symbol = %symbol, next = %step, "Cycle cancelled before step");
                outcome.final_step = step;
                outcome.cancelled = true;
                return;
            }
            if completed.contains(&step.job_type()) {
                outcome.skipped.push(step);
                step = step.next();
                continue;
            }

            match self.run_logged_step(step, &symbol, cycle_id, as_of).await {
                Ok(()) => {
                    self.controller.record_step();
                    step = step.next();
                }
                Err(e) => {
                    error!(symbol = %symbol, step = %step, error = %e, "Pipeline step failed");
                    outcome.final_step = PipelineStep::Failed;
                    outcome.error = Some(format!("{}: {}", step, e));
                    return;
                }
            }
        }
        outcome.final_step = step;
    }

    /// Writes a `started` row, runs the step with retries, then writes the
    /// `completed` or `failed` row with timing.
    async fn run_logged_step(&self, step: PipelineStep, symbol: &str, cycle_id: &str, as_of: DateTime<Utc>) -> Result<()> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut run = JobRun {
            job_type: step.job_type(),
            job_id,
            cycle_id: cycle_id.to_string(),
            symbol: symbol.to_string(),
            status: JobStatus::Started,
            message: String::new(),
            started_at,
            finished_at: None,
            duration_ms: None,
        };
        self.db.insert_job_run(&run).await?;

        let (result, attempts) = self.execute_with_retry(step, symbol, as_of).await;

        let finished_at = Utc::now();
        run.finished_at = Some(finished_at);
        run.duration_ms = Some((finished_at - started_at).num_milliseconds());
        match &result {
            Ok(message) => {
                run.status = JobStatus::Completed;
                run.message = message.clone();
            }
            Err(e) => {
                run.status = JobStatus::Failed;
                run.message = format!("{} (after {} attempt(s))", e, attempts);
            }
        }
        self.db.insert_job_run(&run).await?;

        result.map(|_| ())
    }

    /// Retries transient failures with exponential backoff.
    async fn execute_with_retry(&self, step: PipelineStep, symbol: &str, as_of: DateTime<Utc>) -> (Result<String>, u32) {
        let settings = &self.config.orchestrator;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.execute_step(step, symbol, as_of).await {
                Ok(message) => return (Ok(message), attempt),
                Err(e) if e.is_transient() && attempt <= settings.max_retries => {
                    let delay = settings.retry_base_delay_ms.saturating_mul(1u64 << (attempt - 1).min(16));
                    warn!(
                        symbol,
                        step = %step,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    async fn execute_step(&self, step: PipelineStep, symbol: &str, as_of: DateTime<Utc>) -> Result<String> {
        let settings = &self.config.orchestrator;
        match step {
            PipelineStep::Ingesting => {
                let end = as_of.date_naive();
                let start = match self.db.latest_bar_timestamp(symbol).await? {
                    Some(latest) => latest.date_naive() - Duration::days(settings.ingest_lookback_days),
                    None => end - Duration::days(settings.history_window_days),
                };
                let summary = ingest_symbol(&self.db, self.provider.as_ref(), symbol, start, end).await?;
                Ok(format!(
                    "fetched {} bars, inserted {}, rejected {}",
                    summary.fetched, summary.inserted, summary.rejected
                ))
            }
            PipelineStep::Featurizing => {
                let since = as_of - Duration::days(settings.history_window_days);
                let summary = materialize_features(
                    &self.db,
                    &self.features,
                    &self.config.universe,
                    symbol,
                    Some(since),
                    as_of,
                )
                .await?;
                Ok(format!(
                    "computed {} vectors, inserted {}, patterns {}",
                    summary.computed, summary.inserted, summary.patterns
                ))
            }
            PipelineStep::Forecasting => {
                let horizon = self.config.forecast.horizon_days;
                let mut recorded = Vec::new();
                let mut first_error = None;
                for selector in &self.config.forecast.models {
                    let result = match self.forecaster.forecast_as_of(symbol, horizon, *selector, as_of).await {
                        Ok(predictions) => self.ledger.record(&predictions).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(written) => recorded.push(format!("{} {}", selector.model_name(), written)),
                        Err(e) => {
                            warn!(symbol, model = selector.model_name(), error = %e, "Forecast failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(format!("recorded predictions: {}", recorded.join(", "))),
                }
            }
            PipelineStep::Reconciling => {
                let updated = self.ledger.reconcile(symbol, as_of).await?;
                Ok(format!("reconciled {} predictions", updated))
            }
            PipelineStep::Pending | PipelineStep::Done | PipelineStep::Failed => Ok(String::new()),
        }
    }

    async fn apply_retention(&self, as_of: DateTime<Utc>) -> Result<()> {
        if let Some(days) = self.config.retention.bars_days {
            self.db.prune_bars(as_of - Duration::days(days)).await?;
        }
        if let Some(days) = self.config.retention.job_runs_days {
            self.db.prune_job_runs(as_of - Duration::days(days)).await?;
        }
        Ok(())
    }
}
