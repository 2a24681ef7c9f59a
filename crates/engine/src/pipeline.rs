// crates/engine/src/pipeline.rs
use crate::aggregator::{AggregateRequest, Aggregator};
use crate::lock::RunLock;
use crate::snapshot::SnapshotStore;
use common::time::{is_valid_date, now_rfc3339, today_utc};
use common::*;
use features::FeatureBuilder;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use universe::{ScoreContext, ScoringEngine};

pub const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Overwrite,
    /// Leave an existing snapshot for the date untouched
    Skip,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    pub date: Option<String>,
    pub universe: Option<Vec<String>>,
    pub since: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LockHeld,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub date: String,
    pub report: AggregatedReport,
    /// Scores of the primary locale
    pub scores: Vec<ScoreResult>,
    pub locales_written: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed(RunReport),
    Skipped(SkipReason),
}

/// Settings of the daily run
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub locales: Vec<String>,
    pub history_len: usize,
    pub lock_ttl: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            locales: vec!["de".to_string(), "en".to_string()],
            history_len: 5,
            lock_ttl: Duration::from_secs(900),
        }
    }
}

/// Aggregate, score and persist one day under an advisory lock.
pub struct DailyRunner {
    aggregator: Aggregator,
    store: Arc<dyn SnapshotStore>,
    lock: Arc<dyn RunLock>,
    scoring: ScoringEngine,
    features: FeatureBuilder,
    settings: RunnerSettings,
}

impl DailyRunner {
    pub fn new(
        aggregator: Aggregator,
        store: Arc<dyn SnapshotStore>,
        lock: Arc<dyn RunLock>,
        scoring: ScoringEngine,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            aggregator,
            store,
            lock,
            scoring,
            features: FeatureBuilder::default(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    fn primary_locale(&self) -> &str {
        self.settings.locales.first().map(String::as_str).unwrap_or("en")
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome> {
        let date = options.date.clone().unwrap_or_else(today_utc);
        if !is_valid_date(&date) {
            return Err(Error::InvalidData(format!("invalid run date: {}", date)));
        }

        let key = format!("daily-run:{}", date);
        if !self.lock.try_acquire(&key, self.settings.lock_ttl).await? {
            info!("Run for {} skipped: lock held", date);
            counter!(common::telemetry::RUNS_SKIPPED, "reason" => "lock_held").increment(1);
            return Ok(RunOutcome::Skipped(SkipReason::LockHeld));
        }

        let outcome = self.run_locked(&date, &options).await;

        if let Err(e) = self.lock.release(&key).await {
            warn!("Failed to release {}: {}", key, e);
        }

        outcome
    }

    async fn run_locked(&self, date: &str, options: &RunOptions) -> Result<RunOutcome> {
        let mut warnings = Vec::new();

        if options.mode == RunMode::Skip {
            match self.store.get(date, self.primary_locale()).await {
                Ok(Some(_)) => {
                    info!("Run for {} skipped: snapshot exists", date);
                    counter!(common::telemetry::RUNS_SKIPPED, "reason" => "already_exists").increment(1);
                    return Ok(RunOutcome::Skipped(SkipReason::AlreadyExists));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not check existing snapshot for {}: {}", date, e);
                    warnings.push(format!("existing snapshot check failed: {}", e));
                }
            }
        }

        info!("Daily run for {} starting", date);

        let aggregation = self
            .aggregator
            .aggregate(&AggregateRequest {
                universe: options.universe.clone(),
                since: options.since.clone(),
                date: Some(date.to_string()),
            })
            .await;
        warnings.extend(aggregation.warnings);
        let report = aggregation.report;

        let mut scores = Vec::new();
        let mut locales_written = Vec::new();

        for locale in &self.settings.locales {
            let previous = self.previous_snapshot(date, locale, &mut warnings).await;
            let snapshot = self.build_snapshot(date, locale, &report, previous.as_ref());

            if locale == self.primary_locale() {
                let whitelist = self.aggregator.whitelist();
                scores = whitelist.filter(snapshot.assets.iter().map(|a| a.result.clone()).collect());
                whitelist.sort_by_order(&mut scores);
            }

            match self.store.put(date, locale, &snapshot).await {
                Ok(()) => locales_written.push(locale.clone()),
                Err(e) => {
                    warn!("Persisting {}.{} failed: {}", date, locale, e);
                    counter!(common::telemetry::PERSISTENCE_FAILURES).increment(1);
                    warnings.push(format!("persisting {}.{} failed: {}", date, locale, e));
                }
            }
        }

        counter!(common::telemetry::RUNS_COMPLETED).increment(1);
        info!(
            "Daily run for {} complete: {} assets, {} locales written, {} warnings",
            date,
            report.assets.len(),
            locales_written.len(),
            warnings.len()
        );

        Ok(RunOutcome::Completed(RunReport {
            date: date.to_string(),
            report,
            scores,
            locales_written,
            warnings,
        }))
    }

    /// Same-day snapshot if present, else the most recent one.
    async fn previous_snapshot(&self, date: &str, locale: &str, warnings: &mut Vec<String>) -> Option<Snapshot> {
        let lookup = match self.store.get(date, locale).await {
            Ok(Some(snapshot)) => Ok(Some(snapshot)),
            Ok(None) => self.store.latest(locale).await,
            Err(e) => Err(e),
        };

        lookup.unwrap_or_else(|e| {
            warn!("Could not load previous {} snapshot: {}", locale, e);
            warnings.push(format!("previous {} snapshot unavailable: {}", locale, e));
            None
        })
    }

    fn build_snapshot(&self, date: &str, locale: &str, report: &AggregatedReport, previous: Option<&Snapshot>) -> Snapshot {
        let as_of = now_rfc3339();

        let assets: Vec<SnapshotAsset> = report
            .assets
            .iter()
            .map(|asset| {
                let prior = previous.and_then(|p| p.asset(&asset.symbol));
                let features = self.features.derive(asset, prior);
                let context = ScoreContext {
                    previous_label: prior.map(|p| p.result.label),
                };
                let result = self.scoring.compute_score(&asset.symbol, &features, &context);

                let mut history = prior.map(|p| p.history.clone()).unwrap_or_default();
                history.push(result.total_score);
                let overflow = history.len().saturating_sub(self.settings.history_len.max(1));
                history.drain(..overflow);

                SnapshotAsset {
                    result,
                    as_of: as_of.clone(),
                    history,
                }
            })
            .collect();

        Snapshot {
            date: date.to_string(),
            locale: locale.to_string(),
            generated_at: as_of,
            version: SNAPSHOT_VERSION.to_string(),
            complete: !assets.is_empty(),
            report: report.clone(),
            assets,
        }
    }
}
