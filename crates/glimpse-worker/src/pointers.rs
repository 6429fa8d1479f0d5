//! Pointer publishing.
//!
//! Pointers are republished, never edited in place: each one goes through
//! [`publish_link`], which renames a fully prepared temporary link over the
//! old one. A failure on one pointer is logged and counted and the remaining
//! pointers are still attempted.

use std::path::{Path, PathBuf};

use glimpse_media::{publish_link, resolve_link, write_atomic};
use glimpse_models::frame::GROUPS_DIR;
use glimpse_models::{validate_group_name, PointerKind, Source};
use tokio::fs;
use tracing::{debug, warn};

use crate::metrics;

/// What one publish round did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub published: Vec<String>,
    pub failed: Vec<String>,
}

impl PublishReport {
    fn record(&mut self, label: String, ok: bool) {
        if ok {
            self.published.push(label);
        } else {
            self.failed.push(label);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointerPublisher {
    frame_dir: PathBuf,
}

impl PointerPublisher {
    pub fn new(frame_dir: impl Into<PathBuf>) -> Self {
        Self {
            frame_dir: frame_dir.into(),
        }
    }

    pub fn pointer_path(&self, source: &str, kind: PointerKind) -> PathBuf {
        self.frame_dir.join(source).join(kind.file_name())
    }

    /// Group-wide "latest" pointer.
    pub fn group_pointer_path(&self, group: &str) -> PathBuf {
        self.frame_dir
            .join(GROUPS_DIR)
            .join(group)
            .join(PointerKind::Latest.file_name())
    }

    /// Republish the pointers of one accepted cycle.
    ///
    /// "latest" (per source and per group) always moves to `frame`; the event
    /// pointers only move when `triggered`, with "previous-motion" taking over
    /// the old "last-motion" target first.
    pub async fn publish_cycle(
        &self,
        source: &Source,
        frame: &Path,
        caption: &str,
        triggered: bool,
    ) -> PublishReport {
        let mut report = PublishReport::default();

        let latest = self.pointer_path(&source.name, PointerKind::Latest);
        let ok = self.publish(frame, &latest, caption).await;
        report.record(PointerKind::Latest.to_string(), ok);

        for group in &source.groups {
            let ok = if validate_group_name(group).is_ok() {
                self.publish(frame, &self.group_pointer_path(group), caption)
                    .await
            } else {
                warn!(source = %source.name, "Skipping invalid group {:?}", group);
                false
            };
            report.record(format!("group:{group}"), ok);
        }

        if triggered {
            let ok = self.rotate_previous_motion(source, frame).await;
            report.record(PointerKind::PreviousMotion.to_string(), ok);

            for kind in [PointerKind::LastMotion, PointerKind::LastCaption] {
                let ok = self
                    .publish(frame, &self.pointer_path(&source.name, kind), caption)
                    .await;
                report.record(kind.to_string(), ok);
            }
        }

        for label in &report.failed {
            metrics::record_pointer_failure(label);
        }
        report
    }

    /// Point "previous-motion" at what "last-motion" points at now.
    async fn rotate_previous_motion(&self, source: &Source, frame: &Path) -> bool {
        let last = self.pointer_path(&source.name, PointerKind::LastMotion);
        let Some(old_target) = resolve_link(&last).await else {
            debug!(source = %source.name, "No last-motion pointer to rotate");
            return true;
        };
        if old_target == frame {
            return true;
        }

        let previous = self.pointer_path(&source.name, PointerKind::PreviousMotion);
        let caption = fs::read_to_string(sidecar(&last)).await.unwrap_or_default();
        self.publish(&old_target, &previous, &caption).await
    }

    async fn publish(&self, frame: &Path, pointer: &Path, caption: &str) -> bool {
        if let Err(e) = publish_link(frame, pointer).await {
            warn!("Failed to publish pointer {}: {}", pointer.display(), e);
            return false;
        }
        if let Err(e) = write_atomic(sidecar(pointer), caption).await {
            warn!("Failed to write caption for {}: {}", pointer.display(), e);
            return false;
        }
        true
    }
}

/// Caption file published next to a pointer.
fn sidecar(pointer: &Path) -> PathBuf {
    let mut name = pointer
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".txt");
    pointer.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn frame(dir: &TempDir, name: &str) -> PathBuf {
        let source_dir = dir.path().join("cam");
        fs::create_dir_all(&source_dir).await.unwrap();
        let path = source_dir.join(name);
        fs::write(&path, name).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_latest_only_when_not_triggered() {
        let dir = TempDir::new().unwrap();
        let publisher = PointerPublisher::new(dir.path());
        let source = Source::new("cam", "").with_groups("north, front yard");
        let f1 = frame(&dir, "cam_20240101000000.png").await;

        let report = publisher.publish_cycle(&source, &f1, "old caption", false).await;
        assert!(report.failed.is_empty());
        assert_eq!(report.published.len(), 3);

        let latest = publisher.pointer_path("cam", PointerKind::Latest);
        assert_eq!(resolve_link(&latest).await.unwrap(), f1);
        assert_eq!(
            fs::read_to_string(sidecar(&latest)).await.unwrap(),
            "old caption"
        );
        assert_eq!(
            fs::read(publisher.group_pointer_path("front_yard")).await.unwrap(),
            b"cam_20240101000000.png"
        );
        assert!(resolve_link(publisher.pointer_path("cam", PointerKind::LastMotion))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_triggered_rotates_previous_motion() {
        let dir = TempDir::new().unwrap();
        let publisher = PointerPublisher::new(dir.path());
        let source = Source::new("cam", "");
        let f1 = frame(&dir, "cam_20240101000000.png").await;
        let f2 = frame(&dir, "cam_20240101000100.png").await;

        publisher.publish_cycle(&source, &f1, "first", true).await;
        let report = publisher.publish_cycle(&source, &f2, "second", true).await;
        assert!(report.failed.is_empty());

        let last = publisher.pointer_path("cam", PointerKind::LastMotion);
        let prev = publisher.pointer_path("cam", PointerKind::PreviousMotion);
        let caption = publisher.pointer_path("cam", PointerKind::LastCaption);
        assert_eq!(resolve_link(&last).await.unwrap(), f2);
        assert_eq!(resolve_link(&prev).await.unwrap(), f1);
        assert_eq!(resolve_link(&caption).await.unwrap(), f2);
        assert_eq!(fs::read_to_string(sidecar(&prev)).await.unwrap(), "first");
        assert_eq!(fs::read_to_string(sidecar(&caption)).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_missing_frame_keeps_pointers() {
        let dir = TempDir::new().unwrap();
        let publisher = PointerPublisher::new(dir.path());
        let source = Source::new("cam", "");
        let f1 = frame(&dir, "cam_20240101000000.png").await;
        publisher.publish_cycle(&source, &f1, "first", true).await;

        let gone = dir.path().join("cam").join("cam_20240101000500.png");
        let report = publisher.publish_cycle(&source, &gone, "x", true).await;
        assert_eq!(report.failed.len(), 3);

        for kind in [PointerKind::Latest, PointerKind::LastMotion, PointerKind::LastCaption] {
            let resolved = resolve_link(publisher.pointer_path("cam", kind)).await;
            assert_eq!(resolved.unwrap(), f1, "{kind} moved");
        }
    }

    #[tokio::test]
    async fn test_group_outside_groups_dir_is_refused() {
        let dir = TempDir::new().unwrap();
        let publisher = PointerPublisher::new(dir.path());
        let mut source = Source::new("cam", "");
        source.groups = vec!["../../escape".into(), "north".into()];
        let f1 = frame(&dir, "cam_20240101000000.png").await;

        let report = publisher.publish_cycle(&source, &f1, "", false).await;
        assert_eq!(report.failed, vec!["group:../../escape".to_string()]);
        assert!(resolve_link(publisher.group_pointer_path("north")).await.is_some());
        assert!(!dir.path().join("escape").exists());
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_sidecar_name() {
        assert_eq!(
            sidecar(Path::new("/f/cam/last_motion.png")),
            PathBuf::from("/f/cam/last_motion.png.txt")
        );
    }
}
