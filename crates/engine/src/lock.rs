// crates/engine/src/lock.rs
use async_trait::async_trait;
use chrono::Utc;
use common::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;

/// Advisory, TTL-bounded lock serializing runs for the same key
#[async_trait]
pub trait RunLock: Send + Sync {
    /// `false` when another holder's lease is still live.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryRunLock {
    leases: Mutex<HashMap<String, Instant>>,
}

impl MemoryRunLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLock for MemoryRunLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        match leases.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.leases.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseFile {
    key: String,
    holder: String,
    expires_at_ms: i64,
}

enum Existing {
    Live,
    Gone,
    /// Expired; carries the holder when the lease was readable
    Stale(Option<String>),
}

/// One file per key under `dir`; the file records its own expiry so a
/// crashed holder's lease lapses.
pub struct FileRunLock {
    dir: PathBuf,
    held: Mutex<HashMap<String, String>>,
}

impl FileRunLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            held: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.lock", name))
    }

    async fn read_lease(path: &Path) -> Option<LeaseFile> {
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Write the lease to a private temp file, then hard-link it into place.
    /// The link fails with `AlreadyExists` rather than clobbering, and the
    /// lock path never holds a partial body.
    async fn create(&self, path: &Path, lease: &LeaseFile) -> std::io::Result<()> {
        let tmp = path.with_extension(format!("lock.{}.tmp", lease.holder));
        let body = serde_json::to_vec(lease).map_err(std::io::Error::other)?;

        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)
                .await?;
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;

        let linked = match written {
            Ok(()) => tokio::fs::hard_link(&tmp, path).await,
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&tmp).await;
        linked
    }

    async fn inspect(path: &Path, now_ms: i64, ttl: Duration) -> Existing {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Existing::Gone,
            Err(_) => return Existing::Live,
        };

        match serde_json::from_slice::<LeaseFile>(&bytes) {
            Ok(lease) if lease.expires_at_ms <= now_ms => Existing::Stale(Some(lease.holder)),
            Ok(_) => Existing::Live,
            // Unreadable leases stay live until the file is older than the TTL
            Err(_) => {
                let age = tokio::fs::metadata(path)
                    .await
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok());
                match age {
                    Some(age) if age >= ttl => Existing::Stale(None),
                    _ => Existing::Live,
                }
            }
        }
    }

    /// Move a stale lease aside. `false` when the moved file turned out to be
    /// someone else's fresh lease; it is linked back in that case.
    async fn reclaim(&self, path: &Path, stale_holder: Option<&str>, token: &str) -> Result<bool> {
        let tomb = path.with_extension(format!("lock.{}.stale", token));
        match tokio::fs::rename(path, &tomb).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Error::Persistence(format!("reclaiming {}: {}", path.display(), e))),
        }

        let moved = Self::read_lease(&tomb).await.map(|lease| lease.holder);
        let was_stale = match (stale_holder, moved.as_deref()) {
            (Some(expected), Some(found)) => expected == found,
            (None, None) => true,
            _ => false,
        };

        if !was_stale {
            let _ = tokio::fs::hard_link(&tomb, path).await;
        }
        let _ = tokio::fs::remove_file(&tomb).await;
        Ok(was_stale)
    }
}

#[async_trait]
impl RunLock for FileRunLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Persistence(format!("creating {}: {}", self.dir.display(), e)))?;

        let path = self.path_for(key);
        let now_ms = Utc::now().timestamp_millis();
        let lease = LeaseFile {
            key: key.to_string(),
            holder: format!("{}-{}", std::process::id(), Utc::now().timestamp_nanos_opt().unwrap_or(now_ms)),
            expires_at_ms: now_ms + ttl.as_millis() as i64,
        };

        // Second attempt only after clearing an expired lease
        for _ in 0..2 {
            match self.create(&path, &lease).await {
                Ok(()) => {
                    self.held.lock().insert(key.to_string(), lease.holder.clone());
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match Self::inspect(&path, now_ms, ttl).await {
                        Existing::Live => return Ok(false),
                        Existing::Gone => {}
                        Existing::Stale(stale_holder) => {
                            tracing::warn!("Reclaiming expired lock {}", path.display());
                            if !self.reclaim(&path, stale_holder.as_deref(), &lease.holder).await? {
                                return Ok(false);
                            }
                        }
                    }
                }
                Err(e) => return Err(Error::Persistence(format!("locking {}: {}", path.display(), e))),
            }
        }
        Ok(false)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let Some(holder) = self.held.lock().remove(key) else {
            return Ok(());
        };

        let path = self.path_for(key);
        match Self::read_lease(&path).await {
            Some(existing) if existing.holder == holder => match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            _ => {
                tracing::debug!("Lock {} no longer ours; leaving it", path.display());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_lock_exclusive_until_released() {
        let lock = MemoryRunLock::new();
        assert!(lock.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());
        assert!(!lock.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());
        assert!(lock.try_acquire("daily-run:2025-03-02", Duration::from_secs(60)).await.unwrap());

        lock.release("daily-run:2025-03-01").await.unwrap();
        assert!(lock.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_lock_expires() {
        let lock = MemoryRunLock::new();
        assert!(lock.try_acquire("k", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(lock.try_acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_lock_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileRunLock::new(dir.path());
        let second = FileRunLock::new(dir.path());

        assert!(first.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());
        assert!(!second.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());

        // Releasing a lock we never held is a no-op
        second.release("daily-run:2025-03-01").await.unwrap();
        assert!(!second.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());

        first.release("daily-run:2025-03-01").await.unwrap();
        assert!(second.try_acquire("daily-run:2025-03-01", Duration::from_secs(60)).await.unwrap());

        // No temp or stale files left next to the lease
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["daily-run_2025-03-01.lock"]);
    }

    #[tokio::test]
    async fn test_file_lock_reclaims_stale_lease() {
        let dir = tempfile::tempdir().unwrap();
        let crashed = FileRunLock::new(dir.path());
        assert!(crashed.try_acquire("run", Duration::from_millis(0)).await.unwrap());

        let next = FileRunLock::new(dir.path());
        assert!(next.try_acquire("run", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_lock_respects_fresh_empty_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily-run_2025-03-01.lock");
        // Holder created the file but has not written the body yet
        std::fs::write(&path, b"").unwrap();

        let other = FileRunLock::new(dir.path());
        assert!(!other.try_acquire("daily-run:2025-03-01", Duration::from_secs(900)).await.unwrap());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_lock_reclaims_old_unreadable_lease() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.lock"), b"{\"key\": \"ru").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let next = FileRunLock::new(dir.path());
        assert!(next.try_acquire("run", Duration::from_millis(10)).await.unwrap());
        next.release("run").await.unwrap();
        assert!(!dir.path().join("run.lock").exists());
    }
}
