//! Local store errors
//!
//! I/O failures are sorted into the few cases the admin can act on (no
//! permission, no space) and everything else. Missing notices and forms
//! are errors here too, since every store call is keyed by id.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// ENOSPC and EDQUOT on Linux, ERROR_DISK_FULL on Windows
const DISK_FULL_OS_CODES: [i32; 3] = [28, 122, 112];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot create board data directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No permission to use {path:?}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space saving {path:?}")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot read {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot save {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stored file holds something other than the expected JSON
    #[error("Stored data in {path:?} is unreadable: {details}")]
    InvalidFormat { path: PathBuf, details: String },

    #[error("Cannot encode {key} for storage: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No notice with id {0}")]
    NoticeNotFound(String),

    #[error("No form with id {0}")]
    FormNotFound(String),

    /// The temp file was written but could not replace the real one
    #[error("Cannot move {from:?} into place at {to:?}: {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Wrap a failed write, picking the variant from the error kind
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            StorageError::PermissionDenied {
                path,
                source: error,
            }
        } else if is_disk_full(&error) {
            StorageError::DiskFull {
                path,
                source: error,
            }
        } else {
            StorageError::WriteError {
                path,
                source: error,
            }
        }
    }

    /// Whether the admin can fix this without losing data
    pub fn is_recoverable(&self) -> bool {
        self.recovery_suggestion().is_some()
            && !matches!(self, StorageError::InvalidFormat { .. })
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        Some(match self {
            StorageError::DiskFull { .. } => {
                "Free some disk space; notices and forms are saved again on the next change."
            }
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                "Make the data directory writable, or point NOTICEBOARD_DATA_DIR somewhere that is."
            }
            StorageError::InvalidFormat { .. } => {
                "Sync with the cloud to restore the board from the shared document."
            }
            _ => return None,
        })
    }
}

fn is_disk_full(error: &io::Error) -> bool {
    if let Some(code) = error.raw_os_error() {
        return DISK_FULL_OS_CODES.contains(&code);
    }
    let msg = error.to_string().to_lowercase();
    ["no space left", "disk full", "quota exceeded", "not enough space"]
        .iter()
        .any(|needle| msg.contains(needle))
}

pub type StorageResult<T> = Result<T, StorageError>;
