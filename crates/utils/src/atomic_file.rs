//! Atomic file operations so readers never observe a half-written file

use audiograb_core::StorageError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn temp_sibling(dir: &Path) -> PathBuf {
    dir.join(format!(".{}.tmp", Uuid::new_v4()))
}

/// Write data to a file atomically by writing to a temporary file and renaming
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::other(path, "write", "path has no parent directory"))?;

    fs::create_dir_all(parent)
        .map_err(|e| StorageError::new(parent, "create parent directory", e))?;

    // Same directory as the target so the rename stays on one filesystem
    let temp_path = temp_sibling(parent);

    let result = (|| -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| StorageError::new(&temp_path, "create temporary file", e))?;

        file.write_all(content)
            .map_err(|e| StorageError::new(&temp_path, "write temporary file", e))?;

        file.sync_all()
            .map_err(|e| StorageError::new(&temp_path, "sync temporary file", e))?;

        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StorageError::new(path, "atomic rename", e)
    })
}

/// Copy `src` into a hidden temporary file inside `dir` and return its path.
///
/// The caller publishes the copy with a rename, which lets it hold a lock for
/// the rename only and not for the copy.
pub async fn copy_to_temp(src: &Path, dir: &Path) -> Result<PathBuf, StorageError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::new(dir, "create directory", e))?;

    let temp_path = temp_sibling(dir);
    if let Err(e) = tokio::fs::copy(src, &temp_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::new(src, "copy", e));
    }
    Ok(temp_path)
}

/// Write `content` to a hidden temporary file inside `dir` and return its path
pub async fn write_to_temp(dir: &Path, content: &[u8]) -> Result<PathBuf, StorageError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::new(dir, "create directory", e))?;

    let temp_path = temp_sibling(dir);
    if let Err(e) = tokio::fs::write(&temp_path, content).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::new(&temp_path, "write temporary file", e));
    }
    Ok(temp_path)
}

/// Copy `src` to `dest` atomically, replacing `dest` if it exists
pub async fn copy_atomic(src: &Path, dest: &Path) -> Result<(), StorageError> {
    let parent = dest
        .parent()
        .ok_or_else(|| StorageError::other(dest, "copy", "path has no parent directory"))?;

    let temp_path = copy_to_temp(src, parent).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, dest).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::new(dest, "atomic rename", e));
    }
    Ok(())
}
