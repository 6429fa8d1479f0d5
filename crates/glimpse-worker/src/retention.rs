//! Retention sweeper.
//!
//! Prunes frame and segment directories by age and cumulative size. Pointer
//! names, the live in-process segment and the optional baseline frame are
//! never candidates, and neither are symbolic links. Frames that a pointer
//! currently refers to are kept so that no pointer is left dangling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use glimpse_media::resolve_link;
use glimpse_models::frame::{is_protected_name, GROUPS_DIR};
use glimpse_models::PointerKind;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::RetentionPolicy;
use crate::logging::CycleLogger;
use crate::metrics;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub deleted: usize,
    pub freed_bytes: u64,
    pub failures: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.deleted += other.deleted;
        self.freed_bytes += other.freed_bytes;
        self.failures += other.failures;
    }
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    frame_dir: PathBuf,
    video_dir: PathBuf,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(
        frame_dir: impl Into<PathBuf>,
        video_dir: impl Into<PathBuf>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            frame_dir: frame_dir.into(),
            video_dir: video_dir.into(),
            policy,
        }
    }

    /// Sweep the frame and segment directory of every source.
    pub async fn sweep<'a>(&self, sources: impl IntoIterator<Item = &'a String>) -> SweepReport {
        let logger = CycleLogger::new("all", "retention");
        logger.log_start("sweeping frame and segment directories");

        let now = SystemTime::now();
        let mut report = SweepReport::default();
        for name in sources {
            for root in [&self.frame_dir, &self.video_dir] {
                report.merge(self.sweep_dir(&root.join(name), now).await);
            }
        }

        logger.log_completion(&format!(
            "deleted {} files, freed {} bytes, {} failures",
            report.deleted, report.freed_bytes, report.failures
        ));
        report
    }

    /// Sweep one directory as of `now`.
    pub async fn sweep_dir(&self, dir: &Path, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let pinned = self.pointer_targets(dir).await;
        let mut candidates = match list_candidates(dir, &pinned).await {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot list {}: {}", dir.display(), e);
                    report.failures += 1;
                }
                return report;
            }
        };

        // Newest first; the first `minimum_kept` are never touched.
        candidates.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));

        let mut total: u64 = 0;
        for candidate in candidates.into_iter().skip(self.policy.minimum_kept) {
            total += candidate.size;
            let age = now.duration_since(candidate.modified).unwrap_or(Duration::ZERO);
            let too_old = age > self.policy.max_age;
            let too_big = total > self.policy.max_total_bytes;
            if !too_old && !too_big {
                continue;
            }

            match fs::remove_file(&candidate.path).await {
                Ok(()) => {
                    debug!(
                        "Deleted {} (old={}, over_size={})",
                        candidate.path.display(),
                        too_old,
                        too_big
                    );
                    total -= candidate.size;
                    report.deleted += 1;
                    report.freed_bytes += candidate.size;
                    metrics::record_retention_deletion(candidate.size);
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", candidate.path.display(), e);
                    report.failures += 1;
                }
            }
        }
        report
    }

    /// Canonical paths of the files referenced by the pointers in `dir` and
    /// by every group pointer.
    async fn pointer_targets(&self, dir: &Path) -> HashSet<PathBuf> {
        let mut links: Vec<PathBuf> = PointerKind::ALL
            .iter()
            .map(|kind| dir.join(kind.file_name()))
            .collect();

        if let Ok(mut groups) = fs::read_dir(self.frame_dir.join(GROUPS_DIR)).await {
            while let Ok(Some(group)) = groups.next_entry().await {
                links.push(group.path().join(PointerKind::Latest.file_name()));
            }
        }

        let mut targets = HashSet::new();
        for link in links {
            let Some(target) = resolve_link(&link).await else {
                continue;
            };
            if let Ok(target) = fs::canonicalize(&target).await {
                targets.insert(target);
            }
        }
        targets
    }
}

async fn list_candidates(dir: &Path, pinned: &HashSet<PathBuf>) -> std::io::Result<Vec<Candidate>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_protected_name(&name) {
            continue;
        }
        let meta = match fs::symlink_metadata(entry.path()).await {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        if !pinned.is_empty() {
            if let Ok(canonical) = fs::canonicalize(entry.path()).await {
                if pinned.contains(&canonical) {
                    debug!("Keeping {}, a pointer refers to it", canonical.display());
                    continue;
                }
            }
        }
        candidates.push(Candidate {
            path: entry.path(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: meta.len(),
        });
    }
    Ok(candidates)
}
