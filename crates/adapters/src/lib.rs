// crates/adapters/src/lib.rs
use async_trait::async_trait;
use common::*;

pub mod feed;
pub mod merge;
pub mod normalize;
mod rate_limiter;

pub use feed::{FileFeedAdapter, HttpFeedAdapter, StaticFeedAdapter};
pub use merge::{MergeOutcome, SourceMerger, deduplicate};
pub use normalize::{RawEntry, normalize_entry};
pub use rate_limiter::RateLimiter;

/// A single independent feed of signal entries.
///
/// Implementations may fail; the merge stage catches the error and carries on
/// with the remaining adapters.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Name used in warnings and logs
    fn name(&self) -> &str;

    /// Default kind for entries that do not declare one
    fn kind(&self) -> SourceKind;

    /// Fetch and normalize the current entries
    async fn fetch_entries(&self) -> Result<Vec<NormalizedEntry>>;
}

/// Build adapters from configuration
pub fn from_config(sources: &[common::config::SourceConfig]) -> Result<Vec<std::sync::Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<std::sync::Arc<dyn SourceAdapter>> = Vec::with_capacity(sources.len());

    for source in sources {
        match (&source.url, &source.path) {
            (Some(url), None) => {
                adapters.push(std::sync::Arc::new(HttpFeedAdapter::new(
                    source.name.clone(),
                    source.kind,
                    url.clone(),
                    std::time::Duration::from_millis(source.timeout_ms),
                    source.rate_limit_per_sec,
                )?));
            }
            (None, Some(path)) => {
                adapters.push(std::sync::Arc::new(FileFeedAdapter::new(
                    source.name.clone(),
                    source.kind,
                    path.into(),
                )));
            }
            _ => {
                return Err(Error::Config(format!(
                    "source '{}' needs exactly one of url/path",
                    source.name
                )));
            }
        }
        tracing::debug!("Configured source adapter: {} ({})", source.name, source.kind);
    }

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::SourceConfig;

    #[test]
    fn test_from_config_builds_each_kind() {
        let sources = vec![
            SourceConfig {
                name: "news-wire".to_string(),
                kind: SourceKind::News,
                url: Some("http://127.0.0.1:9/feed".to_string()),
                path: None,
                timeout_ms: 500,
                rate_limit_per_sec: 2.0,
            },
            SourceConfig {
                name: "onchain".to_string(),
                kind: SourceKind::Onchain,
                url: None,
                path: Some("data/feeds/onchain.json".to_string()),
                timeout_ms: 500,
                rate_limit_per_sec: 2.0,
            },
        ];

        let adapters = from_config(&sources).unwrap();
        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters[0].name(), "news-wire");
        assert_eq!(adapters[1].kind(), SourceKind::Onchain);
    }
}
