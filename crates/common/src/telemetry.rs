// crates/common/src/telemetry.rs
//! Metric names shared across crates. Recorded through the `metrics` facade;
//! the binary decides which recorder (if any) is installed.

use metrics::{Unit, describe_counter, describe_histogram};

pub const ADAPTER_FAILURES: &str = "sentiment_adapter_failures_total";
pub const ENTRIES_MERGED: &str = "sentiment_entries_merged_total";
pub const DUPLICATES_DROPPED: &str = "sentiment_duplicates_dropped_total";
pub const SUMMARIZER_FALLBACKS: &str = "sentiment_summarizer_fallbacks_total";
pub const AGGREGATION_DURATION_MS: &str = "sentiment_aggregation_duration_ms";
pub const RUNS_COMPLETED: &str = "sentiment_runs_completed_total";
pub const RUNS_SKIPPED: &str = "sentiment_runs_skipped_total";
pub const PERSISTENCE_FAILURES: &str = "sentiment_persistence_failures_total";

pub fn describe() {
    describe_counter!(ADAPTER_FAILURES, "Source adapters that failed during a fetch");
    describe_counter!(ENTRIES_MERGED, "Entries surviving dedup and merge");
    describe_counter!(DUPLICATES_DROPPED, "Entries dropped as duplicates");
    describe_counter!(SUMMARIZER_FALLBACKS, "Assets that fell back to the heuristic rationale");
    describe_histogram!(
        AGGREGATION_DURATION_MS,
        Unit::Milliseconds,
        "Wall time of one aggregation run"
    );
    describe_counter!(RUNS_COMPLETED, "Daily runs that produced a report");
    describe_counter!(RUNS_SKIPPED, "Daily runs skipped (lock held or snapshot exists)");
    describe_counter!(PERSISTENCE_FAILURES, "Snapshot writes that failed");
}
