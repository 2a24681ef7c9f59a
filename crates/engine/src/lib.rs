// crates/engine/src/lib.rs
//! Signal aggregation and daily scoring pipeline.
//!
//! Sources are merged and whitelisted, bucketed per asset and summarized
//! (heuristically, or through an optional summarizer), then scored and
//! persisted as dated, localized snapshots.

pub mod aggregator;
pub mod lexicon;
pub mod lock;
pub mod pipeline;
pub mod snapshot;
pub mod summarizer;

pub use aggregator::{AggregateRequest, Aggregation, Aggregator, select_top_signals};
pub use lexicon::Lexicon;
pub use lock::{FileRunLock, MemoryRunLock, RunLock};
pub use pipeline::{DailyRunner, RunMode, RunOptions, RunOutcome, RunReport, RunnerSettings, SkipReason};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use summarizer::{ChatSummarizer, Summarizer, Summary, parse_summary};

use common::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;

/// Wire the whole pipeline from configuration.
pub fn build_runner(config: &AppConfig) -> common::Result<DailyRunner> {
    let aggregator = build_aggregator(config)?;

    let settings = RunnerSettings {
        locales: config.snapshots.locales.clone(),
        history_len: config.snapshots.history_len,
        lock_ttl: Duration::from_secs(config.lock.ttl_secs),
    };

    Ok(DailyRunner::new(
        aggregator,
        Arc::new(FileSnapshotStore::new(&config.snapshots.dir)),
        Arc::new(FileRunLock::new(&config.lock.dir)),
        universe::ScoringEngine::from_config(&config.scoring),
        settings,
    ))
}

pub fn build_aggregator(config: &AppConfig) -> common::Result<Aggregator> {
    let sources = adapters::from_config(&config.sources)?;
    if sources.is_empty() {
        tracing::warn!("No sources configured; reports will be empty");
    }

    let summarizer = ChatSummarizer::from_config(config.summarizer.as_ref())?
        .map(|s| Arc::new(s) as Arc<dyn Summarizer>);

    Ok(Aggregator::new(
        adapters::SourceMerger::new(sources),
        universe::AssetWhitelist::from_definitions(&config.assets),
    )
    .with_lexicon(Lexicon::from_config(&config.lexicon))
    .with_settings(&config.aggregator)
    .with_summarizer(summarizer))
}
