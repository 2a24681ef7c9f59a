// crates/adapters/src/merge.rs
use crate::SourceAdapter;
use common::*;
use futures::future::join_all;
use metrics::counter;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one fan-out over all adapters
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Deduplicated entries, newest first
    pub entries: Vec<NormalizedEntry>,
    /// One line per adapter that failed
    pub warnings: Vec<String>,
}

/// Fetches every adapter concurrently and merges their output
pub struct SourceMerger {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceMerger {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Fetch every adapter concurrently. Transient failures get one retry;
    /// anything still failing becomes a warning.
    pub async fn fetch_all(&self) -> MergeOutcome {
        let fetches = self.adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            async move {
                let result = match adapter.fetch_entries().await {
                    Err(e) if e.is_retryable() => {
                        debug!("Source {} failed ({}), retrying once", adapter.name(), e);
                        adapter.fetch_entries().await
                    }
                    other => other,
                };
                (adapter, result)
            }
        });

        let mut collected = Vec::new();
        let mut warnings = Vec::new();

        for (adapter, result) in join_all(fetches).await {
            match result {
                Ok(entries) => {
                    debug!("Source {} returned {} entries", adapter.name(), entries.len());
                    collected.extend(entries);
                }
                Err(e) => {
                    warn!("Source {} failed: {}", adapter.name(), e);
                    counter!(common::telemetry::ADAPTER_FAILURES, "source" => adapter.name().to_string())
                        .increment(1);
                    warnings.push(format!("source {} failed: {}", adapter.name(), e));
                }
            }
        }

        let total = collected.len();
        let entries = deduplicate(collected);
        let dropped = total - entries.len();

        counter!(common::telemetry::ENTRIES_MERGED).increment(entries.len() as u64);
        counter!(common::telemetry::DUPLICATES_DROPPED).increment(dropped as u64);

        info!(
            "Merged {} entries from {} sources ({} duplicates, {} failures)",
            entries.len(),
            self.adapters.len(),
            dropped,
            warnings.len()
        );

        MergeOutcome { entries, warnings }
    }
}

/// Collapse whitespace, trim and lowercase
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn dedup_key(entry: &NormalizedEntry) -> String {
    format!("{}|{}", entry.asset.to_uppercase(), normalize_text(&entry.summary))
}

/// Whether `candidate` should replace `current` on a key collision.
fn prefer(candidate: &NormalizedEntry, current: &NormalizedEntry) -> bool {
    match candidate
        .engagement_or_zero()
        .partial_cmp(&current.engagement_or_zero())
        .unwrap_or(Ordering::Equal)
    {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.timestamp_ms() > current.timestamp_ms(),
    }
}

/// Drop duplicate `(asset, text)` pairs and order newest first.
///
/// On collision the higher engagement wins, then the more recent timestamp;
/// a full tie keeps the first seen. Unparsable timestamps count as epoch 0.
pub fn deduplicate(entries: Vec<NormalizedEntry>) -> Vec<NormalizedEntry> {
    let mut slots: Vec<NormalizedEntry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());

    for entry in entries {
        match index.entry(dedup_key(&entry)) {
            Entry::Occupied(slot) => {
                let current = &mut slots[*slot.get()];
                if prefer(&entry, current) {
                    *current = entry;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(slots.len());
                slots.push(entry);
            }
        }
    }

    // Stable sort keeps first-seen order among equal timestamps
    slots.sort_by_key(|e| std::cmp::Reverse(e.timestamp_ms()));
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn entry(asset: &str, summary: &str, engagement: Option<f64>, timestamp: &str, source: &str) -> NormalizedEntry {
        NormalizedEntry {
            id: format!("{}-{}-{}", source, asset, timestamp),
            source_kind: SourceKind::Social,
            source_name: source.to_string(),
            asset: asset.to_string(),
            title: None,
            summary: summary.to_string(),
            url: None,
            timestamp: timestamp.to_string(),
            engagement,
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "broken"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::News
        }

        async fn fetch_entries(&self) -> Result<Vec<NormalizedEntry>> {
            Err(Error::Adapter("upstream 503".to_string()))
        }
    }

    /// Times out on the first call, then succeeds
    struct FlakyAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Social
        }

        async fn fetch_entries(&self) -> Result<Vec<NormalizedEntry>> {
            if self.calls.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                return Err(Error::Timeout("flaky feed".to_string()));
            }
            Ok(vec![entry("ETH", "Staking demand climbs", None, "2025-03-01T10:00:00Z", "flaky")])
        }
    }

    #[test]
    fn test_higher_engagement_wins() {
        let out = deduplicate(vec![
            entry("BTC", "ETF inflows surge", Some(10.0), "2025-03-01T10:00:00Z", "a"),
            entry("btc", "  etf   INFLOWS surge ", Some(50.0), "2025-03-01T09:00:00Z", "b"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_name, "b");
    }

    #[test]
    fn test_equal_engagement_prefers_recent() {
        let out = deduplicate(vec![
            entry("ETH", "gas fees drop", None, "2025-03-01T08:00:00Z", "old"),
            entry("ETH", "Gas fees drop", Some(0.0), "2025-03-01T12:00:00Z", "new"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_name, "new");

        let out = deduplicate(vec![
            entry("ETH", "gas fees drop", None, "2025-03-01T12:00:00Z", "valid"),
            entry("ETH", "gas fees drop", None, "garbage", "unparsable"),
        ]);
        assert_eq!(out[0].source_name, "valid");
    }

    #[test]
    fn test_same_text_different_asset_kept() {
        let out = deduplicate(vec![
            entry("BTC", "market rallies", None, "2025-03-01T10:00:00Z", "a"),
            entry("ETH", "market rallies", None, "2025-03-01T10:00:00Z", "a"),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_output_newest_first_with_unparsable_last() {
        let out = deduplicate(vec![
            entry("SOL", "one", None, "not-a-date", "a"),
            entry("SOL", "two", None, "2025-03-01T10:00:00Z", "a"),
            entry("SOL", "three", None, "2025-03-02T10:00:00Z", "a"),
        ]);
        let order: Vec<&str> = out.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(order, vec!["three", "two", "one"]);
    }

    #[test]
    fn test_dedup_idempotent() {
        let once = deduplicate(vec![
            entry("BTC", "a", Some(1.0), "2025-03-01T10:00:00Z", "x"),
            entry("BTC", "A", Some(2.0), "2025-03-01T10:00:00Z", "y"),
            entry("ETH", "b", None, "2025-03-01T11:00:00Z", "x"),
            entry("XRP", "c", None, "2025-03-01T11:00:00Z", "z"),
        ]);
        let twice = deduplicate(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_adapter_becomes_warning() {
        let healthy = crate::StaticFeedAdapter::new(
            "social",
            SourceKind::Social,
            vec![crate::RawEntry {
                asset: "BTC".to_string(),
                summary: Some("Whales accumulate".to_string()),
                timestamp: Some("2025-03-01T10:00:00Z".to_string()),
                ..Default::default()
            }],
        );

        let merger = SourceMerger::new(vec![Arc::new(FailingAdapter), Arc::new(healthy)]);
        let outcome = merger.fetch_all().await;

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("broken"));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let flaky = Arc::new(FlakyAdapter {
            calls: AtomicUsize::new(0),
        });
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![flaky.clone(), Arc::new(FailingAdapter)];
        let merger = SourceMerger::new(adapters);
        let outcome = merger.fetch_all().await;

        assert_eq!(flaky.calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(outcome.entries.len(), 1);
        // Non-transient errors are not retried and still surface
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("broken"));
    }
}
