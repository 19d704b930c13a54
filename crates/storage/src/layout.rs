//! Owner-scoped directories under `<root>/downloads`.

use audiograb_core::{CoreConfig, Owner, StorageError, MEDIA_EXTENSIONS, TEMP_DIR};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A recognised media file inside an owner's folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// Maps owners to isolated directories.
///
/// Owner keys are validated on construction (see `OwnerKey`), so every
/// `Owner::User` resolves to a distinct direct child of the downloads
/// directory, and none of them can be `shared` or `temp`.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    downloads_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.downloads_dir())
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Owner directory path, without touching the filesystem
    pub fn owner_dir(&self, owner: &Owner) -> PathBuf {
        self.downloads_dir.join(owner.segment())
    }

    /// Create (idempotently) and return the owner's directory
    pub fn folder_for(&self, owner: &Owner) -> Result<PathBuf, StorageError> {
        let dir = self.owner_dir(owner);
        fs::create_dir_all(&dir).map_err(|e| StorageError::new(&dir, "create owner directory", e))?;
        Ok(dir)
    }

    /// Namespace for ephemeral archives
    pub fn temp_dir(&self) -> PathBuf {
        self.downloads_dir.join(TEMP_DIR)
    }

    pub fn ensure_temp_dir(&self) -> Result<PathBuf, StorageError> {
        let dir = self.temp_dir();
        fs::create_dir_all(&dir).map_err(|e| StorageError::new(&dir, "create temp directory", e))?;
        Ok(dir)
    }

    /// Path of `filename` in the owner's folder if it is a bare name of an
    /// existing regular file. Anything that could step outside the folder is
    /// treated as absent.
    pub fn locate(&self, owner: &Owner, filename: &str) -> Option<PathBuf> {
        if !is_bare_filename(filename) {
            return None;
        }
        let path = self.owner_dir(owner).join(filename);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Media files in the owner's folder, most recent first
    pub fn list_owner_media(&self, owner: &Owner) -> Result<Vec<MediaFile>, StorageError> {
        list_media_files(&self.owner_dir(owner))
    }
}

/// Recognised media files in `dir`, most recently modified first.
///
/// A missing directory is simply empty.
pub fn list_media_files(dir: &Path) -> Result<Vec<MediaFile>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::new(dir, "list directory", e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::new(dir, "read directory entry", e))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || !is_media_file(&path) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            // Removed between listing and stat
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(StorageError::new(&path, "stat", e)),
        };
        let modified = meta
            .modified()
            .map_err(|e| StorageError::new(&path, "read modification time", e))?;
        files.push(MediaFile {
            name,
            path,
            modified,
            size: meta.len(),
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Whether the extension is one of the recognised audio formats
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// A single path component with no separators or parent references
pub fn is_bare_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiograb_core::OwnerKey;
    use std::time::Duration;
    use tempfile::TempDir;

    fn user(name: &str) -> Owner {
        Owner::User(OwnerKey::parse(name).unwrap())
    }

    fn touch(path: &Path, age: Duration) {
        fs::write(path, b"audio").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn folders_are_isolated_per_owner() {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());

        let alice = layout.folder_for(&user("alice")).unwrap();
        let bob = layout.folder_for(&user("bob")).unwrap();
        let shared = layout.folder_for(&Owner::Shared).unwrap();

        assert_ne!(alice, bob);
        assert_ne!(alice, shared);
        assert_ne!(shared, layout.temp_dir());
        assert!(alice.is_dir() && bob.is_dir() && shared.is_dir());
        assert_eq!(shared, temp.path().join("shared"));
        // Idempotent
        assert_eq!(layout.folder_for(&user("alice")).unwrap(), alice);
    }

    #[test]
    fn lists_only_media_most_recent_first() {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());
        let dir = layout.folder_for(&user("alice")).unwrap();

        touch(&dir.join("old.mp3"), Duration::from_secs(300));
        touch(&dir.join("new.M4A"), Duration::from_secs(10));
        touch(&dir.join("mid.wav"), Duration::from_secs(100));
        touch(&dir.join("cover.jpg"), Duration::from_secs(1));
        touch(&dir.join(".partial.mp3"), Duration::from_secs(1));
        fs::create_dir(dir.join("nested.mp3")).unwrap();

        let names: Vec<_> = layout
            .list_owner_media(&user("alice"))
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["new.M4A", "mid.wav", "old.mp3"]);
    }

    #[test]
    fn missing_folder_lists_empty() {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());
        assert!(layout.list_owner_media(&user("nobody")).unwrap().is_empty());
    }

    #[test]
    fn locate_refuses_to_leave_owner_folder() {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());
        let alice = layout.folder_for(&user("alice")).unwrap();
        let bob = layout.folder_for(&user("bob")).unwrap();
        fs::write(alice.join("secret.mp3"), b"a").unwrap();
        fs::write(bob.join("mine.mp3"), b"b").unwrap();

        assert_eq!(
            layout.locate(&user("bob"), "mine.mp3"),
            Some(bob.join("mine.mp3"))
        );
        assert_eq!(layout.locate(&user("bob"), "secret.mp3"), None);
        assert_eq!(layout.locate(&user("bob"), "../alice/secret.mp3"), None);
        assert_eq!(layout.locate(&user("bob"), ".."), None);
        assert_eq!(layout.locate(&user("bob"), ""), None);
    }
}
