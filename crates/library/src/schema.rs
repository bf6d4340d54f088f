use std::fs;
use std::path::Path;

use redb::{
    Database, MultimapTableDefinition, ReadableTable, TableDefinition, TableError,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CatalogError;

pub(crate) const SCHEMA_VERSION: u32 = 1;

pub(crate) const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
pub(crate) const PERFORMERS_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("performers");
pub(crate) const PERFORMERS_BY_NAME_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("performers_by_name");
pub(crate) const ALBUMS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("albums");
pub(crate) const ALBUMS_BY_KEY_TABLE: TableDefinition<(&str, i32), u64> =
    TableDefinition::new("albums_by_key");
pub(crate) const TRACKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("tracks");
pub(crate) const TRACKS_BY_PATH_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("tracks_by_path");
pub(crate) const PERFORMER_TRACKS_TABLE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("performer_tracks");
pub(crate) const ALBUM_TRACKS_TABLE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("album_tracks");
pub(crate) const TAG_ERROR_FILES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("tag_error_files");

const META_VERSION_KEY: &str = "version";

pub(crate) fn open_or_create_db(path: &Path) -> Result<Database, CatalogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

/// Creates every table on a fresh store; refuses a store of another version.
pub(crate) fn ensure_schema(db: &Database) -> Result<(), CatalogError> {
    match read_version(db)? {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(version) => Err(CatalogError::SchemaMismatch(version)),
        None => {
            info!("Catalog schema missing; running setup");
            setup(db)
        }
    }
}

fn setup(db: &Database) -> Result<(), CatalogError> {
    let write_txn = db.begin_write()?;
    {
        let mut meta_table = write_txn.open_table(META_TABLE)?;
        let _ = write_txn.open_table(PERFORMERS_TABLE)?;
        let _ = write_txn.open_table(PERFORMERS_BY_NAME_TABLE)?;
        let _ = write_txn.open_table(ALBUMS_TABLE)?;
        let _ = write_txn.open_table(ALBUMS_BY_KEY_TABLE)?;
        let _ = write_txn.open_table(TRACKS_TABLE)?;
        let _ = write_txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let _ = write_txn.open_multimap_table(PERFORMER_TRACKS_TABLE)?;
        let _ = write_txn.open_multimap_table(ALBUM_TRACKS_TABLE)?;
        let _ = write_txn.open_table(TAG_ERROR_FILES_TABLE)?;

        let version_bytes = encode_value(&SCHEMA_VERSION)?;
        meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

pub(crate) fn read_version(db: &Database) -> Result<Option<u32>, CatalogError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

/// Next free row id: one past the largest id in use, starting at 1.
pub(crate) fn next_id(table: &impl ReadableTable<u64, &'static [u8]>) -> Result<u64, CatalogError> {
    let last = table.last()?.map(|(key, _)| key.value()).unwrap_or(0);
    Ok(last + 1)
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CatalogError> {
    Ok(bincode::deserialize(bytes)?)
}
