// crates/engine/src/snapshot.rs
use async_trait::async_trait;
use common::time::is_valid_date;
use common::*;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Dated, localized snapshot persistence
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, date: &str, locale: &str, snapshot: &Snapshot) -> Result<()>;

    async fn get(&self, date: &str, locale: &str) -> Result<Option<Snapshot>>;

    /// Newest first
    async fn list_recent(&self, locale: &str, limit: usize) -> Result<Vec<Snapshot>>;

    async fn latest(&self, locale: &str) -> Result<Option<Snapshot>> {
        Ok(self.list_recent(locale, 1).await?.into_iter().next())
    }
}

fn check_key(date: &str, locale: &str) -> Result<()> {
    if !is_valid_date(date) {
        return Err(Error::InvalidData(format!("invalid snapshot date: {}", date)));
    }
    if locale.is_empty() || !locale.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::InvalidData(format!("invalid snapshot locale: {}", locale)));
    }
    Ok(())
}

/// Snapshots as `<dir>/<date>.<locale>.json`
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, date: &str, locale: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.json", date, locale))
    }

    async fn read(path: &Path) -> Result<Option<Snapshot>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, date: &str, locale: &str, snapshot: &Snapshot) -> Result<()> {
        check_key(date, locale)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Persistence(format!("creating {}: {}", self.dir.display(), e)))?;

        let mut body = serde_json::to_vec_pretty(snapshot)?;
        body.push(b'\n');

        // Write then rename so readers never see a partial file
        let path = self.path_for(date, locale);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| Error::Persistence(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Persistence(format!("renaming to {}: {}", path.display(), e)))?;

        tracing::debug!("Stored snapshot {}", path.display());
        Ok(())
    }

    async fn get(&self, date: &str, locale: &str) -> Result<Option<Snapshot>> {
        check_key(date, locale)?;
        Self::read(&self.path_for(date, locale)).await
    }

    async fn list_recent(&self, locale: &str, limit: usize) -> Result<Vec<Snapshot>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}.json", locale);
        let mut dates = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(date) = name.strip_suffix(&suffix).filter(|d| is_valid_date(d)) {
                dates.push(date.to_string());
            }
        }

        dates.sort_unstable_by(|a, b| b.cmp(a));

        let mut snapshots = Vec::new();
        for date in dates.into_iter().take(limit) {
            match Self::read(&self.path_for(&date, locale)).await {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable snapshot {}.{}: {}", date, locale, e),
            }
        }
        Ok(snapshots)
    }
}

/// In-process store
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<BTreeMap<(String, String), Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, date: &str, locale: &str, snapshot: &Snapshot) -> Result<()> {
        check_key(date, locale)?;
        self.snapshots
            .write()
            .insert((locale.to_string(), date.to_string()), snapshot.clone());
        Ok(())
    }

    async fn get(&self, date: &str, locale: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .get(&(locale.to_string(), date.to_string()))
            .cloned())
    }

    async fn list_recent(&self, locale: &str, limit: usize) -> Result<Vec<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .rev()
            .filter(|((l, _), _)| l == locale)
            .take(limit)
            .map(|(_, s)| s.clone())
            .collect())
    }
}
