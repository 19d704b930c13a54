//! Failures as shown to the user: `error[<kind>]: <detail>`.

use audiograb_core::{
    ArchiveError, ConfigError, ErrorReport, FetchError, HistoryError, OwnerKeyError,
    ResolveError, StorageError,
};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError(pub ErrorReport);

impl CommandError {
    pub fn kind(&self) -> &'static str {
        self.0.kind
    }

    pub fn io(operation: &str, source: std::io::Error) -> Self {
        Self(ErrorReport {
            kind: "storage_io",
            detail: format!("{operation}: {source}"),
        })
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.0.kind, self.0.detail)
    }
}

impl std::error::Error for CommandError {}

macro_rules! report_from {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for CommandError {
                fn from(error: $error) -> Self {
                    Self(ErrorReport::from(&error))
                }
            }
        )*
    };
}

report_from!(
    FetchError,
    ArchiveError,
    ResolveError,
    HistoryError,
    StorageError,
    OwnerKeyError,
    ConfigError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_kind_and_detail() {
        let err = CommandError::from(ResolveError::NoFilesAvailable);
        assert_eq!(err.to_string(), "error[no_files_available]: no files available");

        let err = CommandError::from(ArchiveError::TooLarge {
            actual: 600,
            limit: 500,
        });
        assert_eq!(err.kind(), "too_large");
    }
}
