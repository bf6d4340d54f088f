use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Album, AlbumId, Performer, PerformerId, Track, TrackId, TrackRow};
use redb::{
    Database, ReadableMultimapTable, ReadableTable, TableError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CatalogError;
use crate::ingest::TrackDraft;
use crate::resolver;
use crate::schema::{
    decode_value, encode_value, ensure_schema, next_id, open_or_create_db, ALBUMS_BY_KEY_TABLE,
    ALBUMS_TABLE, ALBUM_TRACKS_TABLE, PERFORMERS_BY_NAME_TABLE, PERFORMERS_TABLE,
    PERFORMER_TRACKS_TABLE, TAG_ERROR_FILES_TABLE, TRACKS_BY_PATH_TABLE, TRACKS_TABLE,
};

const CACHE_DIR_NAME: &str = "tagcat";
const STORE_FILE_NAME: &str = "catalog.redb";

/// Default store location: one file under the per-user cache directory.
pub fn default_store_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join(CACHE_DIR_NAME).join(STORE_FILE_NAME))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub performers: usize,
    pub albums: usize,
    pub tracks: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagErrorFile {
    pub path: String,
    pub error: String,
    pub last_seen: u64,
}

/// Owned handle to the catalog database.
#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let db = open_or_create_db(path).map_err(|err| unavailable(path, err))?;
        ensure_schema(&db).map_err(|err| match err {
            CatalogError::SchemaMismatch(version) => CatalogError::SchemaMismatch(version),
            other => unavailable(path, other),
        })?;
        info!("Opened catalog at {:?}", path);
        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn begin_write(&self) -> Result<WriteTransaction, CatalogError> {
        Ok(self.db.begin_write()?)
    }

    pub fn get_track(&self, track_id: TrackId) -> Result<Option<Track>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_TABLE)?;
        let track = match table.get(track_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    pub fn track_id_for_path(&self, path: &str) -> Result<Option<TrackId>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let id = table.get(path)?.map(|value| value.value());
        Ok(id)
    }

    pub fn get_performer(&self, performer_id: PerformerId) -> Result<Option<Performer>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PERFORMERS_TABLE)?;
        let performer = match table.get(performer_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(performer)
    }

    pub fn get_album(&self, album_id: AlbumId) -> Result<Option<Album>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUMS_TABLE)?;
        let album = match table.get(album_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(album)
    }

    pub fn list_performers(&self) -> Result<Vec<Performer>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PERFORMERS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }

    pub fn list_albums(&self) -> Result<Vec<Album>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUMS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }

    /// Display projection of a track. Read-only: never creates identities.
    pub fn project(&self, track: &Track) -> Result<TrackRow, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let performers = read_txn.open_table(PERFORMERS_TABLE)?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?;
        project_with(&performers, &albums, track)
    }

    pub fn get_row(&self, track_id: TrackId) -> Result<Option<TrackRow>, CatalogError> {
        match self.get_track(track_id)? {
            Some(track) => Ok(Some(self.project(&track)?)),
            None => Ok(None),
        }
    }

    pub fn list_tracks(&self) -> Result<Vec<TrackRow>, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        let performers = read_txn.open_table(PERFORMERS_TABLE)?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?;

        let mut rows = Vec::new();
        for entry in tracks.iter()? {
            let entry = entry?;
            let track: Track = decode_value(entry.1.value())?;
            rows.push(project_with(&performers, &albums, &track)?);
        }
        Ok(rows)
    }

    pub fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let read_txn = self.db.begin_read()?;
        let performers = read_txn.open_table(PERFORMERS_TABLE)?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        Ok(CatalogStats {
            performers: performers.len()? as usize,
            albums: albums.len()? as usize,
            tracks: tracks.len()? as usize,
        })
    }

    pub fn list_tag_error_files(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TagErrorFile>, usize), CatalogError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TAG_ERROR_FILES_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok((Vec::new(), 0)),
            Err(err) => return Err(err.into()),
        };

        let mut total = 0usize;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            total += 1;
            if total <= offset {
                continue;
            }
            if items.len() >= limit {
                continue;
            }
            let info: TagErrorFile = decode_value(entry.1.value())?;
            items.push(info);
        }

        Ok((items, total))
    }

    pub fn resolve_performer(&self, name: &str) -> Result<PerformerId, CatalogError> {
        let write_txn = self.db.begin_write()?;
        let id = resolver::resolve_performer_in(&write_txn, name)?;
        write_txn.commit()?;
        Ok(id)
    }

    pub fn resolve_album(&self, name: &str, year: i32) -> Result<AlbumId, CatalogError> {
        let write_txn = self.db.begin_write()?;
        let id = resolver::resolve_album_in(&write_txn, name, year)?;
        write_txn.commit()?;
        Ok(id)
    }

    /// Removes a track and any identity row it was the last reference to.
    pub fn delete_track(&self, track_id: TrackId) -> Result<bool, CatalogError> {
        let write_txn = self.db.begin_write()?;
        let removed = delete_track_in(&write_txn, track_id)?;
        write_txn.commit()?;
        Ok(removed.is_some())
    }
}

fn unavailable(path: &Path, err: CatalogError) -> CatalogError {
    let source = match err {
        CatalogError::Store(source) => source,
        CatalogError::Io(source) => redb::Error::Io(source),
        other => redb::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    };
    CatalogError::StoreUnavailable {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn project_with(
    performers: &impl ReadableTable<u64, &'static [u8]>,
    albums: &impl ReadableTable<u64, &'static [u8]>,
    track: &Track,
) -> Result<TrackRow, CatalogError> {
    let performer = match track.performer_id {
        Some(id) => match performers.get(id)? {
            Some(value) => Some(decode_value::<Performer>(value.value())?.name),
            None => None,
        },
        None => None,
    };
    let album = match track.album_id {
        Some(id) => match albums.get(id)? {
            Some(value) => Some(decode_value::<Album>(value.value())?.name),
            None => None,
        },
        None => None,
    };
    Ok(TrackRow::from_track(
        track,
        performer.as_deref(),
        album.as_deref(),
    ))
}

pub(crate) fn get_track_in(
    txn: &WriteTransaction,
    track_id: TrackId,
) -> Result<Option<Track>, CatalogError> {
    let table = txn.open_table(TRACKS_TABLE)?;
    let track = match table.get(track_id)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(track)
}

pub(crate) fn track_id_for_path_in(
    txn: &WriteTransaction,
    path: &str,
) -> Result<Option<TrackId>, CatalogError> {
    let table = txn.open_table(TRACKS_BY_PATH_TABLE)?;
    let id = table.get(path)?.map(|value| value.value());
    Ok(id)
}

pub(crate) fn insert_track_in(
    txn: &WriteTransaction,
    draft: &TrackDraft,
    performer_id: Option<PerformerId>,
    album_id: Option<AlbumId>,
) -> Result<Track, CatalogError> {
    let track = {
        let mut tracks_table = txn.open_table(TRACKS_TABLE)?;
        let id = next_id(&tracks_table)?;
        let track = draft.to_track(id, performer_id, album_id);
        let track_bytes = encode_value(&track)?;
        tracks_table.insert(id, track_bytes.as_slice())?;
        track
    };
    {
        let mut by_path_table = txn.open_table(TRACKS_BY_PATH_TABLE)?;
        by_path_table.insert(track.path.as_str(), track.id)?;
    }
    if let Some(performer_id) = track.performer_id {
        link_performer(txn, performer_id, track.id)?;
    }
    if let Some(album_id) = track.album_id {
        link_album(txn, album_id, track.id)?;
    }
    Ok(track)
}

/// Stores `updated` over `current`. A reference moved away from an identity
/// runs the orphan check on the old identity only.
pub(crate) fn replace_track_in(
    txn: &WriteTransaction,
    current: &Track,
    updated: &Track,
) -> Result<(), CatalogError> {
    {
        let mut tracks_table = txn.open_table(TRACKS_TABLE)?;
        let track_bytes = encode_value(updated)?;
        tracks_table.insert(updated.id, track_bytes.as_slice())?;
    }

    if current.performer_id != updated.performer_id {
        if let Some(performer_id) = updated.performer_id {
            link_performer(txn, performer_id, updated.id)?;
        }
        if let Some(performer_id) = current.performer_id {
            release_performer_in(txn, performer_id, current.id)?;
        }
    }
    if current.album_id != updated.album_id {
        if let Some(album_id) = updated.album_id {
            link_album(txn, album_id, updated.id)?;
        }
        if let Some(album_id) = current.album_id {
            release_album_in(txn, album_id, current.id)?;
        }
    }
    Ok(())
}

pub(crate) fn delete_track_in(
    txn: &WriteTransaction,
    track_id: TrackId,
) -> Result<Option<Track>, CatalogError> {
    let track: Track = {
        let mut tracks_table = txn.open_table(TRACKS_TABLE)?;
        let removed = tracks_table.remove(track_id)?;
        match removed {
            Some(value) => decode_value(value.value())?,
            None => return Ok(None),
        }
    };
    {
        let mut by_path_table = txn.open_table(TRACKS_BY_PATH_TABLE)?;
        by_path_table.remove(track.path.as_str())?;
    }
    if let Some(performer_id) = track.performer_id {
        release_performer_in(txn, performer_id, track.id)?;
    }
    if let Some(album_id) = track.album_id {
        release_album_in(txn, album_id, track.id)?;
    }
    debug!("Deleted track {} ({})", track.id, track.path);
    Ok(Some(track))
}

fn link_performer(
    txn: &WriteTransaction,
    performer_id: PerformerId,
    track_id: TrackId,
) -> Result<(), CatalogError> {
    let mut refs = txn.open_multimap_table(PERFORMER_TRACKS_TABLE)?;
    refs.insert(performer_id, track_id)?;
    Ok(())
}

fn link_album(txn: &WriteTransaction, album_id: AlbumId, track_id: TrackId) -> Result<(), CatalogError> {
    let mut refs = txn.open_multimap_table(ALBUM_TRACKS_TABLE)?;
    refs.insert(album_id, track_id)?;
    Ok(())
}

/// Drops one track's reference to a performer, deleting the performer when
/// no reference remains. Returns whether the performer was deleted.
pub(crate) fn release_performer_in(
    txn: &WriteTransaction,
    performer_id: PerformerId,
    track_id: TrackId,
) -> Result<bool, CatalogError> {
    let orphaned = {
        let mut refs = txn.open_multimap_table(PERFORMER_TRACKS_TABLE)?;
        refs.remove(performer_id, track_id)?;
        let mut remaining = refs.get(performer_id)?;
        let orphaned = remaining.next().is_none();
        orphaned
    };
    if !orphaned {
        return Ok(false);
    }

    let performer: Option<Performer> = {
        let mut performers_table = txn.open_table(PERFORMERS_TABLE)?;
        let removed = performers_table.remove(performer_id)?;
        match removed {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        }
    };
    if let Some(performer) = performer {
        let mut by_name_table = txn.open_table(PERFORMERS_BY_NAME_TABLE)?;
        by_name_table.remove(performer.name.as_str())?;
        debug!("Removed orphaned performer {} ({:?})", performer.id, performer.name);
    }
    Ok(true)
}

/// Album counterpart of [`release_performer_in`].
pub(crate) fn release_album_in(
    txn: &WriteTransaction,
    album_id: AlbumId,
    track_id: TrackId,
) -> Result<bool, CatalogError> {
    let orphaned = {
        let mut refs = txn.open_multimap_table(ALBUM_TRACKS_TABLE)?;
        refs.remove(album_id, track_id)?;
        let mut remaining = refs.get(album_id)?;
        let orphaned = remaining.next().is_none();
        orphaned
    };
    if !orphaned {
        return Ok(false);
    }

    let album: Option<Album> = {
        let mut albums_table = txn.open_table(ALBUMS_TABLE)?;
        let removed = albums_table.remove(album_id)?;
        match removed {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        }
    };
    if let Some(album) = album {
        let mut by_key_table = txn.open_table(ALBUMS_BY_KEY_TABLE)?;
        by_key_table.remove((album.name.as_str(), album.year))?;
        debug!(
            "Removed orphaned album {} ({:?}, {})",
            album.id, album.name, album.year
        );
    }
    Ok(true)
}

pub(crate) fn record_tag_error_in(
    txn: &WriteTransaction,
    path: &str,
    error: &str,
) -> Result<(), CatalogError> {
    let info = TagErrorFile {
        path: path.to_string(),
        error: error.to_string(),
        last_seen: now_secs(),
    };
    let bytes = encode_value(&info)?;
    let mut table = txn.open_table(TAG_ERROR_FILES_TABLE)?;
    table.insert(path, bytes.as_slice())?;
    Ok(())
}

pub(crate) fn clear_tag_error_in(txn: &WriteTransaction, path: &str) -> Result<(), CatalogError> {
    let mut table = txn.open_table(TAG_ERROR_FILES_TABLE)?;
    table.remove(path)?;
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
