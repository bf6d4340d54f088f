use std::path::PathBuf;

use common::TrackId;
use metadata::TagMap;
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::field::{validate, year_value, Field};
use crate::resolver::{resolve_album_in, resolve_performer_in};
use crate::store::{get_track_in, replace_track_in};
use crate::Catalog;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The value matched what is displayed; nothing was written.
    Unchanged,
    Applied,
}

impl Catalog {
    /// Applies one edit to the catalog, then writes the edited attribute to
    /// the track's file.
    ///
    /// The two writes are not atomic. When the file write fails after the
    /// catalog commits, the error is [`CatalogError::PartialSync`] and
    /// [`Catalog::push_field`] retries the file write alone.
    pub fn set_field(
        &self,
        track_id: TrackId,
        field: Field,
        value: &str,
    ) -> Result<SyncOutcome, CatalogError> {
        let _writer = self.writer.lock();

        let row = self
            .store
            .get_row(track_id)?
            .ok_or(CatalogError::TrackNotFound(track_id))?;
        if field.is_unchanged(&row, value) {
            debug!("Track {} {} unchanged", track_id, field);
            return Ok(SyncOutcome::Unchanged);
        }
        validate(field, value)?;

        let write_txn = self.store.begin_write()?;
        let current = match get_track_in(&write_txn, track_id)? {
            Some(track) => track,
            None => {
                write_txn.abort()?;
                return Err(CatalogError::TrackNotFound(track_id));
            }
        };
        let updated = match field {
            Field::Performer => {
                let performer_id = resolve_performer_in(&write_txn, value)?;
                current.clone().with_performer(Some(performer_id))
            }
            Field::Album => {
                let album_id = resolve_album_in(&write_txn, value, current.year)?;
                current.clone().with_album(Some(album_id))
            }
            Field::Title => current.clone().with_title(value.to_string()),
            Field::TrackNumber => current.clone().with_track_number(value.to_string()),
            Field::Year => current.clone().with_year(year_value(value)?),
            Field::Genre => current.clone().with_genre(value.to_string()),
        };
        replace_track_in(&write_txn, &current, &updated)?;
        write_txn.commit()?;
        info!("Track {} {} set to {:?}", track_id, field, value);

        self.write_back(track_id, field)?;
        Ok(SyncOutcome::Applied)
    }

    /// Writes a field's current catalog value to the track's file.
    pub fn push_field(&self, track_id: TrackId, field: Field) -> Result<(), CatalogError> {
        let _writer = self.writer.lock();
        self.write_back(track_id, field)
    }

    fn write_back(&self, track_id: TrackId, field: Field) -> Result<(), CatalogError> {
        let track = self
            .store
            .get_track(track_id)?
            .ok_or(CatalogError::TrackNotFound(track_id))?;
        let row = self.store.project(&track)?;

        let mut attributes = TagMap::new();
        attributes.insert(field.tag_key(), field.display_value(&row));

        let path = PathBuf::from(&track.path);
        if let Err(source) = self.codec.write_attributes(&path, &attributes) {
            warn!(
                "Track {} {} is ahead of {:?}: {}",
                track_id, field, path, source
            );
            return Err(CatalogError::PartialSync {
                track_id,
                field,
                path,
                source,
            });
        }
        Ok(())
    }
}
