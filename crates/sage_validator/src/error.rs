//! Errors that abort validation of one file.

use sage_schema::FileType;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Validation result type.
pub type Result<T> = std::result::Result<T, FileProcessingError>;

/// A file that cannot be validated at all.
///
/// Data problems never end up here; they are violations in the report.
#[derive(Error, Debug)]
pub enum FileProcessingError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File type mismatch for {}: declared {declared}, detected {detected}", path.display())]
    TypeMismatch {
        path: PathBuf,
        declared: FileType,
        detected: FileType,
    },

    #[error("Cannot parse CSV {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Cannot read workbook {}: {message}", path.display())]
    Excel { path: PathBuf, message: String },

    #[error("Cannot open archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    #[error("Unknown package: {0}")]
    UnknownPackage(String),
}

impl FileProcessingError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub(crate) fn archive(path: &Path, message: impl ToString) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}
