//! JSON-file source store and per-source cycle locks.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use glimpse_media::write_atomic;
use glimpse_models::{Source, SourceUpdate};
use tokio::fs;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::collaborators::SourceStore;
use crate::error::{WorkerError, WorkerResult};

/// Sources whose configuration changed on reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigChanges {
    /// New sources and sources with edited configuration.
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Fold later changes in; the latest verdict for a name wins.
    fn absorb(&mut self, later: ConfigChanges) {
        for name in later.changed {
            self.removed.retain(|n| *n != name);
            if !self.changed.contains(&name) {
                self.changed.push(name);
            }
        }
        for name in later.removed {
            self.changed.retain(|n| *n != name);
            if !self.removed.contains(&name) {
                self.removed.push(name);
            }
        }
    }
}

/// Source records kept in memory and persisted as a JSON array.
///
/// Every write first adopts configuration edits made to the file since the
/// last read, then rewrites it atomically. Edits adopted that way are held
/// back and reported by the next [`FileSourceStore::reload`].
#[derive(Debug)]
pub struct FileSourceStore {
    path: PathBuf,
    sources: RwLock<BTreeMap<String, Source>>,
    pending: Mutex<ConfigChanges>,
}

impl FileSourceStore {
    /// Open the store, starting empty when the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let sources = read_sources(&path).await?;
        info!("Loaded {} sources from {}", sources.len(), path.display());
        Ok(Self {
            path,
            sources: RwLock::new(sources),
            pending: Mutex::new(ConfigChanges::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or edit a source's configuration, keeping its cycle state.
    pub async fn upsert(&self, mut source: Source) -> WorkerResult<()> {
        source.clamp_timeout();
        source.validate_config()?;

        let mut sources = self.sources.write().await;
        self.adopt_file_edits(&mut sources).await?;
        match sources.get_mut(&source.name) {
            Some(current) => merge_config(current, source),
            None => {
                sources.insert(source.name.clone(), source);
            }
        }
        persist(&self.path, &sources).await
    }

    pub async fn remove(&self, name: &str) -> WorkerResult<bool> {
        let mut sources = self.sources.write().await;
        self.adopt_file_edits(&mut sources).await?;
        if sources.remove(name).is_none() {
            return Ok(false);
        }
        persist(&self.path, &sources).await?;
        Ok(true)
    }

    /// Re-read the file and adopt external configuration edits.
    ///
    /// Cycle state already held in memory wins over the file for sources
    /// that still exist. The result also covers edits picked up by writes
    /// since the previous reload.
    pub async fn reload(&self) -> WorkerResult<ConfigChanges> {
        let mut sources = self.sources.write().await;
        self.adopt_file_edits(&mut sources).await?;
        let changes = std::mem::take(&mut *self.lock_pending());

        if !changes.is_empty() {
            info!(
                "Source configuration reloaded: {} changed, {} removed",
                changes.changed.len(),
                changes.removed.len()
            );
        }
        Ok(changes)
    }

    /// Merge the file's configuration into `sources` and remember what moved.
    async fn adopt_file_edits(&self, sources: &mut BTreeMap<String, Source>) -> WorkerResult<()> {
        let on_disk = read_sources(&self.path).await?;
        let changes = merge_file(sources, on_disk);
        if !changes.is_empty() {
            debug!(
                "Adopted file edits: {:?} changed, {:?} removed",
                changes.changed, changes.removed
            );
            self.lock_pending().absorb(changes);
        }
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, ConfigChanges> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SourceStore for FileSourceStore {
    async fn get(&self, name: &str) -> WorkerResult<Option<Source>> {
        Ok(self.sources.read().await.get(name).cloned())
    }

    async fn save(&self, name: &str, update: &SourceUpdate) -> WorkerResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut sources = self.sources.write().await;
        // An unreadable file is left alone; the state stays in memory until
        // a later write succeeds.
        let readable = match self.adopt_file_edits(&mut sources).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Not writing {}: {}", self.path.display(), e);
                false
            }
        };
        let source = sources
            .get_mut(name)
            .ok_or_else(|| WorkerError::SourceNotFound(name.to_string()))?;
        source.apply(update);
        if readable {
            persist(&self.path, &sources).await?;
        }
        Ok(())
    }

    async fn list(&self) -> WorkerResult<BTreeMap<String, Source>> {
        Ok(self.sources.read().await.clone())
    }
}

/// Bring `sources` in line with the file's configuration.
fn merge_file(
    sources: &mut BTreeMap<String, Source>,
    on_disk: BTreeMap<String, Source>,
) -> ConfigChanges {
    let mut changes = ConfigChanges::default();

    changes.removed = sources
        .keys()
        .filter(|name| !on_disk.contains_key(*name))
        .cloned()
        .collect();
    for name in &changes.removed {
        sources.remove(name);
    }

    for (name, incoming) in on_disk {
        match sources.get_mut(&name) {
            Some(current) if same_config(current, &incoming) => {}
            Some(current) => {
                merge_config(current, incoming);
                changes.changed.push(name);
            }
            None => {
                sources.insert(name.clone(), incoming);
                changes.changed.push(name);
            }
        }
    }
    changes
}

async fn read_sources(path: &Path) -> WorkerResult<BTreeMap<String, Source>> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No sources file at {}", path.display());
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(e.into()),
    };
    let list: Vec<Source> = serde_json::from_slice(&raw)?;

    let mut sources = BTreeMap::new();
    for source in list {
        if let Some(previous) = sources.insert(source.name.clone(), source) {
            warn!("Duplicate source {} in {}, keeping the last", previous.name, path.display());
        }
    }
    Ok(sources)
}

async fn persist(path: &Path, sources: &BTreeMap<String, Source>) -> WorkerResult<()> {
    let list: Vec<&Source> = sources.values().collect();
    let raw = serde_json::to_vec_pretty(&list)?;
    write_atomic(path, raw).await?;
    Ok(())
}

fn same_config(a: &Source, b: &Source) -> bool {
    a.url == b.url
        && a.frequency_minutes == b.frequency_minutes
        && a.timeout_secs == b.timeout_secs
        && a.motion_threshold == b.motion_threshold
        && a.object_filter == b.object_filter
        && a.object_confidence == b.object_confidence
        && a.groups == b.groups
        && a.live_caption == b.live_caption
}

fn merge_config(current: &mut Source, incoming: Source) {
    current.url = incoming.url;
    current.frequency_minutes = incoming.frequency_minutes;
    current.timeout_secs = incoming.timeout_secs;
    current.motion_threshold = incoming.motion_threshold;
    current.object_filter = incoming.object_filter;
    current.object_confidence = incoming.object_confidence;
    current.groups = incoming.groups;
    current.live_caption = incoming.live_caption;
}

/// Registry of per-source locks.
///
/// A cycle holds its source's lock from the initial read to the final save,
/// so two cycles for the same source never interleave their read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct SourceLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string()).or_default().clone()
    }

    /// Take the source's lock, or `None` when a cycle already holds it.
    pub fn try_acquire(&self, name: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(name).try_lock_owned().ok()
    }

    /// Wait for the source's lock.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        self.lock_for(name).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSourceStore::open(dir.path().join("sources.json"))
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get("cam").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_persists_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        let store = FileSourceStore::open(&path).await.unwrap();
        store
            .upsert(Source::new("cam", "https://example.com/cam.jpg"))
            .await
            .unwrap();

        let now = Utc::now();
        let update = SourceUpdate {
            last_caption: Some("A quiet street".into()),
            last_caption_time: Some(now),
            ..Default::default()
        };
        store.save("cam", &update).await.unwrap();

        let reopened = FileSourceStore::open(&path).await.unwrap();
        let cam = reopened.get("cam").await.unwrap().unwrap();
        assert_eq!(cam.last_caption, "A quiet street");
        assert_eq!(cam.last_caption_time, Some(now));
    }

    #[tokio::test]
    async fn test_save_unknown_source() {
        let dir = TempDir::new().unwrap();
        let store = FileSourceStore::open(dir.path().join("s.json")).await.unwrap();
        let update = SourceUpdate {
            last_capture_time: Some(Utc::now()),
            ..Default::default()
        };
        let err = store.save("ghost", &update).await.unwrap_err();
        assert!(matches!(err, WorkerError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_upsert_keeps_state_and_clamps_timeout() {
        let dir = TempDir::new().unwrap();
        let store = FileSourceStore::open(dir.path().join("s.json")).await.unwrap();
        store.upsert(Source::new("cam", "")).await.unwrap();
        store
            .save(
                "cam",
                &SourceUpdate {
                    last_caption: Some("kept".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut edited = Source::new("cam", "").with_frequency(1);
        edited.timeout_secs = 600;
        store.upsert(edited).await.unwrap();

        let cam = store.get("cam").await.unwrap().unwrap();
        assert_eq!(cam.frequency_minutes, 1);
        assert_eq!(cam.timeout_secs, 59);
        assert_eq!(cam.last_caption, "kept");
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_name() {
        let dir = TempDir::new().unwrap();
        let store = FileSourceStore::open(dir.path().join("s.json")).await.unwrap();
        let err = store.upsert(Source::new("../etc", "")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigurationInvalid);
    }

    #[tokio::test]
    async fn test_reload_reports_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        let store = FileSourceStore::open(&path).await.unwrap();
        store.upsert(Source::new("a", "")).await.unwrap();
        store.upsert(Source::new("b", "")).await.unwrap();

        // Nothing changed on disk.
        assert!(store.reload().await.unwrap().is_empty());

        let edited = vec![
            Source::new("a", "").with_frequency(5),
            Source::new("c", ""),
        ];
        fs::write(&path, serde_json::to_vec(&edited).unwrap())
            .await
            .unwrap();

        let changes = store.reload().await.unwrap();
        assert_eq!(changes.changed, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(changes.removed, vec!["b".to_string()]);
        assert_eq!(store.get("a").await.unwrap().unwrap().frequency_minutes, 5);
    }

    #[tokio::test]
    async fn test_save_keeps_file_edits_for_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        let store = FileSourceStore::open(&path).await.unwrap();
        store
            .upsert(Source::new("cam", "").with_frequency(30))
            .await
            .unwrap();

        let edited = vec![Source::new("cam", "").with_frequency(5)];
        fs::write(&path, serde_json::to_vec(&edited).unwrap())
            .await
            .unwrap();

        let now = Utc::now();
        let update = SourceUpdate {
            last_capture_time: Some(now),
            ..Default::default()
        };
        store.save("cam", &update).await.unwrap();

        let on_disk = FileSourceStore::open(&path).await.unwrap();
        let cam = on_disk.get("cam").await.unwrap().unwrap();
        assert_eq!(cam.frequency_minutes, 5);
        assert_eq!(cam.last_capture_time, Some(now));

        let changes = store.reload().await.unwrap();
        assert_eq!(changes.changed, vec!["cam".to_string()]);
        assert!(changes.removed.is_empty());
        assert_eq!(store.get("cam").await.unwrap().unwrap().frequency_minutes, 5);

        // Reported once.
        assert!(store.reload().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_for_source_removed_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        let store = FileSourceStore::open(&path).await.unwrap();
        store.upsert(Source::new("a", "")).await.unwrap();
        store.upsert(Source::new("b", "")).await.unwrap();

        let edited = vec![Source::new("b", "")];
        fs::write(&path, serde_json::to_vec(&edited).unwrap())
            .await
            .unwrap();

        let update = SourceUpdate {
            last_capture_time: Some(Utc::now()),
            ..Default::default()
        };
        let err = store.save("a", &update).await.unwrap_err();
        assert!(matches!(err, WorkerError::SourceNotFound(_)));

        let changes = store.reload().await.unwrap();
        assert_eq!(changes.removed, vec!["a".to_string()]);
        assert!(changes.changed.is_empty());
    }

    #[test]
    fn test_absorb_keeps_latest_verdict() {
        let mut changes = ConfigChanges {
            changed: vec!["a".into()],
            removed: vec!["b".into()],
        };
        changes.absorb(ConfigChanges {
            changed: vec!["b".into()],
            removed: vec!["a".into()],
        });
        assert_eq!(changes.changed, vec!["b".to_string()]);
        assert_eq!(changes.removed, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_source_locks_are_exclusive() {
        let locks = SourceLocks::new();
        let guard = locks.try_acquire("cam").unwrap();
        assert!(locks.try_acquire("cam").is_none());
        assert!(locks.try_acquire("other").is_some());
        drop(guard);
        assert!(locks.try_acquire("cam").is_some());
    }
}
