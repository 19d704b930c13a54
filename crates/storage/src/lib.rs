//! Filesystem side of audiograb: per-owner folders, the download history
//! sink, archive building and download resolution.

pub mod archive;
pub mod history;
pub mod layout;
pub mod resolver;

pub use archive::{ArchiveBuilder, ArchiveHandle};
pub use history::{HistorySink, JsonFileHistory, MemoryHistory};
pub use layout::{is_bare_filename, is_media_file, list_media_files, MediaFile, StorageLayout};
pub use resolver::{DownloadResolver, ResolvedFile};
