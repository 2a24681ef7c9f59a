// crates/adapters/src/feed.rs
use crate::normalize::{RawEntry, normalize_entry};
use crate::{RateLimiter, SourceAdapter};
use async_trait::async_trait;
use common::*;
use std::path::PathBuf;
use std::time::Duration;

fn normalize_all(raw: &[RawEntry], name: &str, kind: SourceKind) -> Vec<NormalizedEntry> {
    let entries: Vec<NormalizedEntry> = raw
        .iter()
        .filter_map(|r| normalize_entry(r, name, kind))
        .collect();
    let dropped = raw.len() - entries.len();
    if dropped > 0 {
        tracing::debug!("Source {}: dropped {} records without asset or text", name, dropped);
    }
    entries
}

/// Polls an HTTP endpoint returning a JSON array of raw entries
pub struct HttpFeedAdapter {
    name: String,
    kind: SourceKind,
    url: String,
    client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl HttpFeedAdapter {
    pub fn new(name: String, kind: SourceKind, url: String, timeout: Duration, rate_limit_per_sec: f64) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            name,
            kind,
            url,
            client,
            rate_limiter: RateLimiter::new(4, rate_limit_per_sec),
        })
    }
}

#[async_trait]
impl SourceAdapter for HttpFeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_entries(&self) -> Result<Vec<NormalizedEntry>> {
        let _guard = self
            .rate_limiter
            .acquire()
            .await
            .ok_or_else(|| Error::Adapter(format!("{}: rate limiter closed", self.name)))?;

        let start = std::time::Instant::now();
        let resp = self.client.get(&self.url).send().await?;

        let resp = resp
            .error_for_status()
            .map_err(|e| Error::Adapter(format!("{}: {}", self.name, e)))?;

        let raw: Vec<RawEntry> = resp.json().await?;

        tracing::debug!(
            "Source {} fetched {} records in {:.2}s",
            self.name,
            raw.len(),
            start.elapsed().as_secs_f32()
        );

        Ok(normalize_all(&raw, &self.name, self.kind))
    }
}

/// Reads a JSON array of raw entries from disk
pub struct FileFeedAdapter {
    name: String,
    kind: SourceKind,
    path: PathBuf,
}

impl FileFeedAdapter {
    pub fn new(name: String, kind: SourceKind, path: PathBuf) -> Self {
        Self { name, kind, path }
    }
}

#[async_trait]
impl SourceAdapter for FileFeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_entries(&self) -> Result<Vec<NormalizedEntry>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Adapter(format!("{}: reading {}: {}", self.name, self.path.display(), e)))?;

        let raw: Vec<RawEntry> = serde_json::from_slice(&bytes)?;
        Ok(normalize_all(&raw, &self.name, self.kind))
    }
}

/// Fixed set of entries; used for offline runs and tests
pub struct StaticFeedAdapter {
    name: String,
    kind: SourceKind,
    entries: Vec<RawEntry>,
}

impl StaticFeedAdapter {
    pub fn new(name: &str, kind: SourceKind, entries: Vec<RawEntry>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            entries,
        }
    }
}

#[async_trait]
impl SourceAdapter for StaticFeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_entries(&self) -> Result<Vec<NormalizedEntry>> {
        Ok(normalize_all(&self.entries, &self.name, self.kind))
    }
}
