use std::fmt;
use std::str::FromStr;

use common::TrackRow;
use metadata::TagKey;

use crate::error::CatalogError;

/// An editable column of the display row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Performer,
    Album,
    TrackNumber,
    Year,
    Genre,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Title,
        Field::Performer,
        Field::Album,
        Field::TrackNumber,
        Field::Year,
        Field::Genre,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Performer => "performer",
            Field::Album => "album",
            Field::TrackNumber => "track_number",
            Field::Year => "year",
            Field::Genre => "genre",
        }
    }

    /// File attribute the field is written back to.
    pub fn tag_key(self) -> TagKey {
        match self {
            Field::Title => TagKey::Title,
            Field::Performer => TagKey::Artist,
            Field::Album => TagKey::Album,
            Field::TrackNumber => TagKey::TrackNumber,
            Field::Year => TagKey::Date,
            Field::Genre => TagKey::Genre,
        }
    }

    pub fn from_tag_key(key: TagKey) -> Option<Field> {
        Field::ALL.into_iter().find(|field| field.tag_key() == key)
    }

    pub fn display_value(self, row: &TrackRow) -> String {
        match self {
            Field::Title => row.title.clone(),
            Field::Performer => row.performer.clone(),
            Field::Album => row.album.clone(),
            Field::TrackNumber => row.track_number.clone(),
            Field::Year => row.year.to_string(),
            Field::Genre => row.genre.clone(),
        }
    }

    /// True when storing `value` would leave `row` as it is. Years compare by
    /// number, so `"01977"` matches 1977.
    pub fn is_unchanged(self, row: &TrackRow, value: &str) -> bool {
        match self {
            Field::Year => year_value(value).map_or(false, |year| year == row.year),
            _ => self.display_value(row) == value,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = value.trim().to_ascii_lowercase();
        if let Some(field) = Field::ALL.into_iter().find(|field| field.name() == name) {
            return Ok(field);
        }
        match name.as_str() {
            "track" => Ok(Field::TrackNumber),
            other => TagKey::from_name(other)
                .and_then(Field::from_tag_key)
                .ok_or_else(|| CatalogError::UnknownField(value.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: Field,
    pub value: String,
    pub reason: &'static str,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} {:?}: {}", self.field, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// Format gate for scalar edits. Text and identity fields accept anything.
pub fn validate(field: Field, value: &str) -> Result<(), ValidationError> {
    match field {
        Field::TrackNumber => {
            if is_track_number(value) {
                Ok(())
            } else {
                Err(ValidationError {
                    field,
                    value: value.to_string(),
                    reason: "expected digits or digits/digits",
                })
            }
        }
        Field::Year => year_value(value).map(|_| ()),
        _ => Ok(()),
    }
}

pub(crate) fn year_value(value: &str) -> Result<i32, ValidationError> {
    let reject = |reason| ValidationError {
        field: Field::Year,
        value: value.to_string(),
        reason,
    };
    if !is_digits(value) {
        return Err(reject("expected digits only"));
    }
    value.parse::<i32>().map_err(|_| reject("year out of range"))
}

fn is_track_number(value: &str) -> bool {
    match value.split_once('/') {
        Some((number, total)) => is_digits(number) && is_digits(total),
        None => is_digits(value),
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}
