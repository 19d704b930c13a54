//! Size-capped zip archives of an owner's media.

use crate::layout::{MediaFile, StorageLayout};
use audiograb_core::{ArchiveError, Owner, StorageError, ARCHIVE_EXTENSION};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Builds one archive per call under `downloads/temp`.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    layout: StorageLayout,
    size_cap: u64,
}

impl ArchiveBuilder {
    pub fn new(layout: StorageLayout, size_cap: u64) -> Self {
        Self { layout, size_cap }
    }

    pub fn size_cap(&self) -> u64 {
        self.size_cap
    }

    /// Bundle every media file of `owner` into a fresh archive.
    ///
    /// The size check runs on the listing alone, before any archive file is
    /// created.
    pub async fn build_archive(&self, owner: &Owner) -> Result<ArchiveHandle, ArchiveError> {
        let files = self.layout.list_owner_media(owner)?;
        if files.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let actual: u64 = files.iter().map(|f| f.size).sum();
        if actual > self.size_cap {
            tracing::info!(%owner, actual, limit = self.size_cap, "archive over size cap");
            return Err(ArchiveError::TooLarge {
                actual,
                limit: self.size_cap,
            });
        }

        let temp_dir = self.layout.ensure_temp_dir()?;
        let stem = archive_stem(owner, Utc::now());
        let (file, path) = create_unique(&temp_dir, &stem)?;
        // From here on the handle owns the file, so any failure removes it
        let handle = ArchiveHandle { path };

        let target = handle.path.clone();
        tokio::task::spawn_blocking(move || write_zip(file, &target, &files))
            .await
            .map_err(|e| ArchiveError::Compression {
                path: handle.path.clone(),
                message: e.to_string(),
            })??;

        tracing::info!(%owner, archive = %handle.path.display(), bytes = actual, "archive built");
        Ok(handle)
    }
}

/// `<owner>_<YYYYmmddHHMMSS>`
fn archive_stem(owner: &Owner, now: DateTime<Utc>) -> String {
    format!("{}_{}", owner.segment(), now.format("%Y%m%d%H%M%S"))
}

/// Create `<stem>.zip`, or `<stem>-N.zip` when a same-second archive of the
/// same owner is still around.
fn create_unique(dir: &Path, stem: &str) -> Result<(File, PathBuf), StorageError> {
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.{ARCHIVE_EXTENSION}")
        } else {
            format!("{stem}-{attempt}.{ARCHIVE_EXTENSION}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 100 => {
                attempt += 1;
            }
            Err(e) => return Err(StorageError::new(&path, "create archive", e)),
        }
    }
}

fn write_zip(file: File, path: &Path, files: &[MediaFile]) -> Result<(), ArchiveError> {
    let compression = |e: zip::result::ZipError| ArchiveError::Compression {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for media in files {
        let mut source =
            File::open(&media.path).map_err(|e| StorageError::new(&media.path, "open", e))?;
        zip.start_file(media.name.as_str(), options)
            .map_err(compression)?;
        std::io::copy(&mut source, &mut zip)
            .map_err(|e| StorageError::new(&media.path, "compress", e))?;
    }

    let mut writer = zip.finish().map_err(compression)?;
    writer
        .flush()
        .map_err(|e| StorageError::new(path, "flush archive", e))?;
    Ok(())
}

/// An archive on disk that is deleted when the handle goes away.
#[derive(Debug)]
pub struct ArchiveHandle {
    path: PathBuf,
}

impl ArchiveHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Copy the archive into `writer`. The file is removed afterwards whether
    /// or not the copy succeeded.
    pub async fn stream_to<W>(self, writer: &mut W) -> Result<u64, StorageError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| StorageError::new(&self.path, "open archive", e))?;
        let written = tokio::io::copy(&mut file, writer)
            .await
            .map_err(|e| StorageError::new(&self.path, "stream archive", e))?;
        writer
            .flush()
            .await
            .map_err(|e| StorageError::new(&self.path, "flush stream", e))?;
        Ok(written)
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(archive = %self.path.display(), "archive removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove archive {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiograb_core::OwnerKey;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn alice() -> Owner {
        Owner::User(OwnerKey::parse("alice").unwrap())
    }

    fn setup(files: &[(&str, usize)]) -> (TempDir, StorageLayout) {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());
        let dir = layout.folder_for(&alice()).unwrap();
        for (name, size) in files {
            fs::write(dir.join(name), vec![b'a'; *size]).unwrap();
        }
        (temp, layout)
    }

    #[tokio::test]
    async fn archive_contains_exactly_the_media_files() {
        let (_temp, layout) = setup(&[("one.mp3", 100), ("two.wav", 200), ("notes.txt", 5)]);
        let builder = ArchiveBuilder::new(layout.clone(), 1024);

        let handle = builder.build_archive(&alice()).await.unwrap();
        assert!(handle.path().starts_with(layout.temp_dir()));
        assert!(handle.file_name().starts_with("alice_"));
        assert!(handle.file_name().ends_with(".zip"));

        let mut archive = zip::ZipArchive::new(File::open(handle.path()).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.mp3", "two.wav"]);

        let mut content = Vec::new();
        archive
            .by_name("two.wav")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content.len(), 200);
    }

    #[tokio::test]
    async fn over_cap_fails_before_writing_anything() {
        let (_temp, layout) = setup(&[("one.mp3", 600), ("two.mp3", 600)]);
        let builder = ArchiveBuilder::new(layout.clone(), 1000);

        let err = builder.build_archive(&alice()).await.unwrap_err();
        assert_eq!(
            err,
            ArchiveError::TooLarge {
                actual: 1200,
                limit: 1000
            }
        );
        assert!(!layout.temp_dir().exists());
    }

    #[tokio::test]
    async fn exactly_at_cap_is_allowed() {
        let (_temp, layout) = setup(&[("one.mp3", 500), ("two.mp3", 500)]);
        let builder = ArchiveBuilder::new(layout, 1000);
        assert!(builder.build_archive(&alice()).await.is_ok());
    }

    #[tokio::test]
    async fn empty_storage_is_an_error() {
        let (_temp, layout) = setup(&[("readme.txt", 10)]);
        let builder = ArchiveBuilder::new(layout, 1000);
        assert_eq!(
            builder.build_archive(&alice()).await.unwrap_err(),
            ArchiveError::Empty
        );
    }

    #[tokio::test]
    async fn streaming_removes_the_archive() {
        let (_temp, layout) = setup(&[("one.mp3", 64)]);
        let builder = ArchiveBuilder::new(layout, 1000);
        let handle = builder.build_archive(&alice()).await.unwrap();
        let path = handle.path().to_path_buf();

        let mut sink = Vec::new();
        let written = handle.stream_to(&mut sink).await.unwrap();

        assert_eq!(written as usize, sink.len());
        assert!(sink.starts_with(b"PK"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropped_handle_removes_the_archive() {
        let (_temp, layout) = setup(&[("one.mp3", 64)]);
        let builder = ArchiveBuilder::new(layout, 1000);
        let handle = builder.build_archive(&alice()).await.unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());

        drop(handle);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn same_second_archives_do_not_collide() {
        let (_temp, layout) = setup(&[("one.mp3", 64)]);
        let builder = ArchiveBuilder::new(layout, 1000);
        let first = builder.build_archive(&alice()).await.unwrap();
        let second = builder.build_archive(&alice()).await.unwrap();
        assert_ne!(first.path(), second.path());
    }
}
