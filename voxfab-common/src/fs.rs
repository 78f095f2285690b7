//! Atomic file write helpers
//!
//! Writers produce a uniquely named sibling temp file and rename it over the
//! target, so readers observe either the old or the new file, never a torn one.
//! Temp and target must live on the same filesystem for the rename to be atomic.

use crate::Result;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique temp path next to `target`: `.<file_name>.<uuid>.tmp`
pub fn temp_sibling(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp_name = format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple());
    match target.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

/// Rename an already written temp file over `target`
pub async fn commit_temp(tmp: &Path, target: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::rename(tmp, target).await {
        let _ = tokio::fs::remove_file(tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Copy `src` over `dst` through a temp sibling of `dst`
pub async fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    let tmp = temp_sibling(dst);
    if let Err(e) = tokio::fs::copy(src, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    commit_temp(&tmp, dst).await
}

/// Rename `tmp` over `target`, moving any previous `target` to a temp sibling
///
/// Returns the displaced file, if there was one, for `restore` or `discard`.
pub async fn replace_keeping(tmp: &Path, target: &Path) -> Result<Option<PathBuf>> {
    let aside = temp_sibling(target);
    let displaced = match tokio::fs::rename(target, &aside).await {
        Ok(()) => Some(aside),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = tokio::fs::rename(tmp, target).await {
        restore(target, displaced.as_deref()).await;
        return Err(e.into());
    }
    Ok(displaced)
}

/// Undo `replace_keeping`: put the displaced file back, or remove `target`
/// when nothing was displaced
pub async fn restore(target: &Path, displaced: Option<&Path>) {
    let result = match displaced {
        Some(prev) => tokio::fs::rename(prev, target).await,
        None => tokio::fs::remove_file(target).await,
    };
    if let Err(e) = result {
        tracing::warn!(path = %target.display(), error = %e, "Failed to restore previous file");
    }
}

/// Remove temp files abandoned in `dir` by writers that never committed
///
/// Only names produced by `temp_sibling` are touched. Returns how many were removed.
pub async fn sweep_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(".tmp") && entry.file_type().await?.is_file() {
            discard(&entry.path()).await;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Best-effort removal of a temp file left behind by a failed write
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}
