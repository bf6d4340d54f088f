use std::path::PathBuf;

use common::TrackId;
use metadata::MetadataError;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

use crate::field::{Field, ValidationError};

#[derive(Debug)]
pub enum CatalogError {
    /// The store file could not be opened or created.
    StoreUnavailable { path: PathBuf, source: redb::Error },
    SchemaMismatch(u32),
    Store(redb::Error),
    /// A file that looks like audio could not be read.
    Codec { path: PathBuf, source: MetadataError },
    Validation(ValidationError),
    /// The store committed an edit but the file write failed; the store is
    /// ahead of the file until the write is retried.
    PartialSync {
        track_id: TrackId,
        field: Field,
        path: PathBuf,
        source: MetadataError,
    },
    TrackNotFound(TrackId),
    /// The path cannot be stored without loss.
    UnsupportedPath(PathBuf),
    UnknownField(String),
    Io(std::io::Error),
    Bincode(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::StoreUnavailable { path, source } => {
                write!(f, "catalog store {:?} unavailable: {}", path, source)
            }
            CatalogError::SchemaMismatch(version) => {
                write!(f, "catalog schema version mismatch: {}", version)
            }
            CatalogError::Store(err) => write!(f, "db error: {}", err),
            CatalogError::Codec { path, source } => {
                write!(f, "failed to read tags from {:?}: {}", path, source)
            }
            CatalogError::Validation(err) => write!(f, "{}", err),
            CatalogError::PartialSync {
                track_id,
                field,
                path,
                source,
            } => write!(
                f,
                "track {} {} saved to catalog but not to {:?}: {}",
                track_id, field, path, source
            ),
            CatalogError::TrackNotFound(id) => write!(f, "track {} not found", id),
            CatalogError::UnsupportedPath(path) => {
                write!(f, "path {:?} is not valid UTF-8", path)
            }
            CatalogError::UnknownField(name) => write!(f, "unknown field: {}", name),
            CatalogError::Io(err) => write!(f, "io error: {}", err),
            CatalogError::Bincode(err) => write!(f, "bincode error: {}", err),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err)
    }
}

impl From<ValidationError> for CatalogError {
    fn from(err: ValidationError) -> Self {
        CatalogError::Validation(err)
    }
}

impl From<redb::Error> for CatalogError {
    fn from(err: redb::Error) -> Self {
        CatalogError::Store(err)
    }
}

impl From<DatabaseError> for CatalogError {
    fn from(err: DatabaseError) -> Self {
        CatalogError::Store(err.into())
    }
}

impl From<TableError> for CatalogError {
    fn from(err: TableError) -> Self {
        CatalogError::Store(err.into())
    }
}

impl From<TransactionError> for CatalogError {
    fn from(err: TransactionError) -> Self {
        CatalogError::Store(err.into())
    }
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        CatalogError::Store(err.into())
    }
}

impl From<CommitError> for CatalogError {
    fn from(err: CommitError) -> Self {
        CatalogError::Store(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for CatalogError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        CatalogError::Bincode(err)
    }
}
