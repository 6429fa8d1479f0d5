//! Filesystem utilities: cross-device moves and atomic publishing.
//!
//! Readers of a published path must always observe either the previous or the
//! new content, never a missing or half-written file. Every writer here goes
//! through a uniquely named temporary sibling followed by a rename, which is
//! atomic on the same filesystem.

use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Attempts a rename first and falls back to copy-then-rename when the rename
/// fails with EXDEV.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            let tmp = temp_sibling(dst);
            fs::copy(src, &tmp).await?;
            rename_or_cleanup(&tmp, dst).await?;
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!(
                    "Failed to remove source file after cross-device move: {}: {}",
                    src.display(),
                    e
                );
            }
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

/// Uniquely named hidden sibling of `path`.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "publish".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

async fn rename_or_cleanup(tmp: &Path, dst: &Path) -> MediaResult<()> {
    if let Err(e) = fs::rename(tmp, dst).await {
        let _ = fs::remove_file(tmp).await;
        return Err(MediaError::from(e));
    }
    Ok(())
}

/// Atomically replace `path` with `contents`.
pub async fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> MediaResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, contents).await?;
    rename_or_cleanup(&tmp, path).await
}

/// Atomically point `link` at the existing file `target`.
///
/// On unix the pointer is a symbolic link (relative when both live in the same
/// directory); elsewhere it is a full copy. The target must exist, so a
/// published pointer never dangles at publish time.
pub async fn publish_link(target: impl AsRef<Path>, link: impl AsRef<Path>) -> MediaResult<()> {
    let target = target.as_ref();
    let link = link.as_ref();

    if !fs::try_exists(target).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(target.to_path_buf()));
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_sibling(link);
    create_pointer(target, link, &tmp).await?;
    rename_or_cleanup(&tmp, link).await
}

#[cfg(unix)]
async fn create_pointer(target: &Path, link: &Path, tmp: &Path) -> MediaResult<()> {
    let same_dir = match (target.parent(), link.parent()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    let link_target = match (same_dir, target.file_name()) {
        (true, Some(name)) => PathBuf::from(name),
        _ => fs::canonicalize(target).await?,
    };
    fs::symlink(&link_target, tmp).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn create_pointer(target: &Path, _link: &Path, tmp: &Path) -> MediaResult<()> {
    fs::copy(target, tmp).await?;
    Ok(())
}

/// Resolve the file a pointer currently refers to.
///
/// Returns `None` when the pointer does not exist or dangles.
pub async fn resolve_link(link: impl AsRef<Path>) -> Option<PathBuf> {
    let link = link.as_ref();
    match fs::read_link(link).await {
        Ok(target) => {
            let resolved = if target.is_absolute() {
                target
            } else {
                link.parent().map(|p| p.join(&target)).unwrap_or(target)
            };
            fs::try_exists(&resolved)
                .await
                .unwrap_or(false)
                .then_some(resolved)
        }
        // Not a symlink: a copied pointer stands for itself.
        Err(_) => fs::try_exists(link)
            .await
            .unwrap_or(false)
            .then(|| link.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("temp_video.mp4");
        let dst = dir.path().join("in_process.mp4");

        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_publish_link_resolves_to_new_target() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("cam_20240101000000.png");
        let second = dir.path().join("cam_20240101000100.png");
        let link = dir.path().join("latest_camera.png");
        fs::write(&first, b"one").await.unwrap();
        fs::write(&second, b"two").await.unwrap();

        publish_link(&first, &link).await.unwrap();
        assert_eq!(resolve_link(&link).await.unwrap(), first);

        publish_link(&second, &link).await.unwrap();
        assert_eq!(resolve_link(&link).await.unwrap(), second);
        assert_eq!(fs::read(&link).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_publish_link_missing_target_keeps_old_pointer() {
        let dir = TempDir::new().unwrap();
        let frame = dir.path().join("cam_20240101000000.png");
        let link = dir.path().join("latest_camera.png");
        fs::write(&frame, b"one").await.unwrap();
        publish_link(&frame, &link).await.unwrap();

        let missing = dir.path().join("cam_20240101000500.png");
        let result = publish_link(&missing, &link).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
        assert_eq!(resolve_link(&link).await.unwrap(), frame);

        // No temporary siblings are left behind.
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().ends_with(".tmp"));
        }
    }

    #[tokio::test]
    async fn test_publish_link_across_directories() {
        let dir = TempDir::new().unwrap();
        let frame = dir.path().join("cam").join("cam_20240101000000.png");
        let link = dir.path().join("groups").join("north").join("latest_camera.png");
        fs::create_dir_all(frame.parent().unwrap()).await.unwrap();
        fs::write(&frame, b"one").await.unwrap();

        publish_link(&frame, &link).await.unwrap();
        assert_eq!(fs::read(&link).await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_write_atomic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latest_camera.png.txt");
        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_resolve_missing_link() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_link(dir.path().join("last_motion.png")).await.is_none());
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
