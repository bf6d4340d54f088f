//! Identity resolution: map a performer name, or an album `(name, year)`
//! pair, to a stable row id, creating the row on first reference.
//!
//! Lookup and insert run inside the caller's write transaction. redb admits
//! a single write transaction at a time, so two resolutions of the same new
//! key cannot both miss the lookup; the `*_by_*` index tables hold the key
//! unique.

use common::{Album, AlbumId, Performer, PerformerId, PerformerKind};
use redb::{ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::CatalogError;
use crate::schema::{
    encode_value, next_id, ALBUMS_BY_KEY_TABLE, ALBUMS_TABLE, PERFORMERS_BY_NAME_TABLE,
    PERFORMERS_TABLE,
};

/// Exact, case-sensitive match on `name`. Empty names are valid keys.
pub(crate) fn resolve_performer_in(
    txn: &WriteTransaction,
    name: &str,
) -> Result<PerformerId, CatalogError> {
    let mut by_name_table = txn.open_table(PERFORMERS_BY_NAME_TABLE)?;
    let existing = by_name_table.get(name)?.map(|value| value.value());
    if let Some(id) = existing {
        return Ok(id);
    }

    let mut performers_table = txn.open_table(PERFORMERS_TABLE)?;
    let id = next_id(&performers_table)?;
    let performer = Performer {
        id,
        kind: PerformerKind::Unknown,
        name: name.to_string(),
    };
    let performer_bytes = encode_value(&performer)?;
    performers_table.insert(id, performer_bytes.as_slice())?;
    by_name_table.insert(name, id)?;
    debug!(
        "Created performer {} ({:?}, kind {})",
        id,
        name,
        performer.kind.as_str()
    );
    Ok(id)
}

/// Exact match on `(name, year)`; the same name in another year is another album.
pub(crate) fn resolve_album_in(
    txn: &WriteTransaction,
    name: &str,
    year: i32,
) -> Result<AlbumId, CatalogError> {
    let mut by_key_table = txn.open_table(ALBUMS_BY_KEY_TABLE)?;
    let existing = by_key_table.get((name, year))?.map(|value| value.value());
    if let Some(id) = existing {
        return Ok(id);
    }

    let mut albums_table = txn.open_table(ALBUMS_TABLE)?;
    let id = next_id(&albums_table)?;
    let album = Album {
        id,
        name: name.to_string(),
        year,
    };
    let album_bytes = encode_value(&album)?;
    albums_table.insert(id, album_bytes.as_slice())?;
    by_key_table.insert((name, year), id)?;
    debug!("Created album {} ({:?}, {})", id, name, year);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use common::PerformerKind;
    use tempfile::TempDir;

    use crate::store::CatalogStore;

    fn open_store() -> (TempDir, CatalogStore) {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn performer_resolution_is_idempotent() {
        let (_dir, store) = open_store();
        let first = store.resolve_performer("Bowie").unwrap();
        let second = store.resolve_performer("Bowie").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.stats().unwrap().performers, 1);

        let performer = store.get_performer(first).unwrap().unwrap();
        assert_eq!(performer.name, "Bowie");
        assert_eq!(performer.kind, PerformerKind::Unknown);
    }

    #[test]
    fn performer_names_match_exactly() {
        let (_dir, store) = open_store();
        let upper = store.resolve_performer("Bowie").unwrap();
        let lower = store.resolve_performer("bowie").unwrap();
        let padded = store.resolve_performer("Bowie ").unwrap();
        assert_ne!(upper, lower);
        assert_ne!(upper, padded);
        assert_eq!(store.stats().unwrap().performers, 3);
    }

    #[test]
    fn empty_names_are_distinct_identities() {
        let (_dir, store) = open_store();
        let empty = store.resolve_performer("").unwrap();
        let blank = store.resolve_performer("  ").unwrap();
        assert_ne!(empty, blank);
        assert_eq!(store.resolve_performer("").unwrap(), empty);
    }

    #[test]
    fn albums_are_keyed_by_name_and_year() {
        let (_dir, store) = open_store();
        let original = store.resolve_album("Low", 1977).unwrap();
        let reissue = store.resolve_album("Low", 1991).unwrap();
        assert_ne!(original, reissue);
        assert_eq!(store.resolve_album("Low", 1977).unwrap(), original);
        assert_eq!(store.stats().unwrap().albums, 2);
        assert_eq!(store.get_album(reissue).unwrap().unwrap().year, 1991);
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let (_dir, store) = open_store();
        assert_eq!(store.resolve_performer("A").unwrap(), 1);
        assert_eq!(store.resolve_performer("B").unwrap(), 2);
        assert_eq!(store.resolve_album("A", 2000).unwrap(), 1);
    }
}
