use serde::{Deserialize, Serialize};

pub type PerformerId = u64;
pub type AlbumId = u64;
pub type TrackId = u64;

/// Display text used for any missing text attribute or unresolved identity.
pub const UNKNOWN: &str = "Unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformerKind {
    Person,
    Group,
    Unknown,
}

impl PerformerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformerKind::Person => "Person",
            PerformerKind::Group => "Group",
            PerformerKind::Unknown => "Unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performer {
    pub id: PerformerId,
    pub kind: PerformerKind,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub name: String,
    pub year: i32,
}

/// One catalog record, keyed externally by `path`.
///
/// Performer and album are weak references: the track points at them but
/// does not own them. Values are replaced, never edited in place; the
/// `with_*` methods return the updated record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub performer_id: Option<PerformerId>,
    pub album_id: Option<AlbumId>,
    pub path: String,
    pub title: String,
    pub track_number: String,
    pub year: i32,
    pub genre: String,
}

impl Track {
    pub fn with_performer(self, performer_id: Option<PerformerId>) -> Self {
        Self {
            performer_id,
            ..self
        }
    }

    pub fn with_album(self, album_id: Option<AlbumId>) -> Self {
        Self { album_id, ..self }
    }

    pub fn with_title(self, title: String) -> Self {
        Self { title, ..self }
    }

    pub fn with_track_number(self, track_number: String) -> Self {
        Self {
            track_number,
            ..self
        }
    }

    pub fn with_year(self, year: i32) -> Self {
        Self { year, ..self }
    }

    pub fn with_genre(self, genre: String) -> Self {
        Self { genre, ..self }
    }
}

/// A track as shown in the grid, identities resolved to names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRow {
    pub id: TrackId,
    pub title: String,
    pub performer: String,
    pub album: String,
    pub track_number: String,
    pub year: i32,
    pub genre: String,
}

impl TrackRow {
    pub fn from_track(track: &Track, performer: Option<&str>, album: Option<&str>) -> Self {
        Self {
            id: track.id,
            title: track.title.clone(),
            performer: performer.unwrap_or(UNKNOWN).to_string(),
            album: album.unwrap_or(UNKNOWN).to_string(),
            track_number: track.track_number.clone(),
            year: track.year,
            genre: track.genre.clone(),
        }
    }
}
