//! Music catalog: a redb store of tracks with shared performer and album
//! identities, kept in step with the tags of the files it was built from.

use std::path::Path;
use std::sync::Arc;

use common::{AlbumId, PerformerId, Track, TrackId, TrackRow};
use metadata::TagCodec;
use parking_lot::Mutex;
use tracing::info;

mod error;
mod field;
mod ingest;
mod resolver;
mod schema;
mod store;
mod sync;

pub use error::CatalogError;
pub use field::{validate, Field, ValidationError};
pub use ingest::{
    current_year, discover_files, IngestOutcome, IngestReport, ScanControl, ScanOptions,
    TrackDraft, DEFAULT_BATCH_SIZE,
};
pub use store::{default_store_path, CatalogStats, CatalogStore, TagErrorFile};
pub use sync::SyncOutcome;

/// The catalog plus the codec used to read and write its files.
///
/// Every mutation takes `writer` first, so edits, deletes and ingest
/// inserts are applied one at a time. Reads do not take it.
#[derive(Clone)]
pub struct Catalog {
    store: CatalogStore,
    codec: Arc<dyn TagCodec>,
    writer: Arc<Mutex<()>>,
}

impl Catalog {
    pub fn open(path: &Path, codec: Arc<dyn TagCodec>) -> Result<Self, CatalogError> {
        let store = CatalogStore::open(path)?;
        Ok(Self::with_store(store, codec))
    }

    /// Opens the store at [`default_store_path`].
    pub fn open_default(codec: Arc<dyn TagCodec>) -> Result<Self, CatalogError> {
        let path = default_store_path().ok_or_else(|| {
            CatalogError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no per-user cache directory for the catalog store",
            ))
        })?;
        info!("Using default catalog store {:?}", path);
        Self::open(&path, codec)
    }

    pub fn with_store(store: CatalogStore, codec: Arc<dyn TagCodec>) -> Self {
        Self {
            store,
            codec,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn list_tracks(&self) -> Result<Vec<TrackRow>, CatalogError> {
        self.store.list_tracks()
    }

    pub fn get_row(&self, track_id: TrackId) -> Result<Option<TrackRow>, CatalogError> {
        self.store.get_row(track_id)
    }

    pub fn get_track(&self, track_id: TrackId) -> Result<Option<Track>, CatalogError> {
        self.store.get_track(track_id)
    }

    /// Removes a track, then any performer or album left without tracks.
    /// Returns false when no such track exists.
    pub fn delete_track(&self, track_id: TrackId) -> Result<bool, CatalogError> {
        let _writer = self.writer.lock();
        let removed = self.store.delete_track(track_id)?;
        if removed {
            info!("Deleted track {}", track_id);
        }
        Ok(removed)
    }

    pub fn resolve_performer(&self, name: &str) -> Result<PerformerId, CatalogError> {
        let _writer = self.writer.lock();
        self.store.resolve_performer(name)
    }

    pub fn resolve_album(&self, name: &str, year: i32) -> Result<AlbumId, CatalogError> {
        let _writer = self.writer.lock();
        self.store.resolve_album(name, year)
    }

    pub fn stats(&self) -> Result<CatalogStats, CatalogError> {
        self.store.stats()
    }

    pub fn list_tag_error_files(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TagErrorFile>, usize), CatalogError> {
        self.store.list_tag_error_files(limit, offset)
    }
}
