use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};

mod memory;

pub use memory::MemoryCodec;

/// Named attributes the catalog keeps in sync with a file's embedded tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKey {
    Title,
    Artist,
    Album,
    TrackNumber,
    Date,
    Genre,
}

impl TagKey {
    pub const ALL: [TagKey; 6] = [
        TagKey::Title,
        TagKey::Artist,
        TagKey::Album,
        TagKey::TrackNumber,
        TagKey::Date,
        TagKey::Genre,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TagKey::Title => "title",
            TagKey::Artist => "artist",
            TagKey::Album => "album",
            TagKey::TrackNumber => "tracknumber",
            TagKey::Date => "date",
            TagKey::Genre => "genre",
        }
    }

    pub fn from_name(name: &str) -> Option<TagKey> {
        TagKey::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

/// Attributes present on a file. Absent attributes have no entry.
pub type TagMap = BTreeMap<TagKey, String>;

/// Reads and writes the fixed attribute set on audio files.
pub trait TagCodec: Send + Sync {
    fn is_audio_file(&self, path: &Path) -> bool;

    fn read_attributes(&self, path: &Path) -> Result<TagMap, MetadataError>;

    fn write_attributes(&self, path: &Path, attributes: &TagMap) -> Result<(), MetadataError>;
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    NotAudio(PathBuf),
    Missing(PathBuf),
    /// The file's tag format cannot hold the attribute.
    Unsupported {
        path: PathBuf,
        key: TagKey,
        tag_type: TagType,
    },
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::NotAudio(path) => write!(f, "not an audio file: {:?}", path),
            MetadataError::Missing(path) => write!(f, "no such file: {:?}", path),
            MetadataError::Unsupported {
                path,
                key,
                tag_type,
            } => write!(
                f,
                "{:?} tag on {:?} cannot hold {}",
                tag_type,
                path,
                key.as_str()
            ),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Tag codec over real files, backed by lofty.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyCodec;

impl TagCodec for LoftyCodec {
    fn is_audio_file(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        let probe = match Probe::open(path) {
            Ok(probe) => probe,
            Err(_) => return false,
        };
        match probe.guess_file_type() {
            Ok(probe) => probe.file_type().is_some(),
            Err(_) => false,
        }
    }

    fn read_attributes(&self, path: &Path) -> Result<TagMap, MetadataError> {
        let tagged_file = lofty::read_from_path(path)?;
        let mut attributes = TagMap::new();

        let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            Some(tag) => tag,
            None => return Ok(attributes),
        };

        for key in TagKey::ALL {
            if let Some(value) = read_key(tag, key) {
                attributes.insert(key, value);
            }
        }

        Ok(attributes)
    }

    fn write_attributes(&self, path: &Path, attributes: &TagMap) -> Result<(), MetadataError> {
        let mut tagged_file = lofty::read_from_path(path)?;
        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }

        let tag = match tagged_file.primary_tag_mut() {
            Some(tag) => tag,
            None => return Err(MetadataError::NotAudio(path.to_path_buf())),
        };
        let tag_type = tag.tag_type();
        for (key, value) in attributes {
            if !write_key(tag, *key, value) {
                return Err(MetadataError::Unsupported {
                    path: path.to_path_buf(),
                    key: *key,
                    tag_type,
                });
            }
        }

        tagged_file.save_to_path(path, WriteOptions::default())?;
        Ok(())
    }
}

fn item_key(key: TagKey) -> ItemKey {
    match key {
        TagKey::Title => ItemKey::TrackTitle,
        TagKey::Artist => ItemKey::TrackArtist,
        TagKey::Album => ItemKey::AlbumTitle,
        TagKey::TrackNumber => ItemKey::TrackNumber,
        TagKey::Date => ItemKey::RecordingDate,
        TagKey::Genre => ItemKey::Genre,
    }
}

fn read_key(tag: &Tag, key: TagKey) -> Option<String> {
    match key {
        TagKey::TrackNumber => {
            let number = tag.get_string(&ItemKey::TrackNumber)?;
            match tag.get_string(&ItemKey::TrackTotal) {
                Some(total) if !number.contains('/') => Some(format!("{}/{}", number, total)),
                _ => Some(number.to_string()),
            }
        }
        TagKey::Date => tag
            .get_string(&ItemKey::RecordingDate)
            .or_else(|| tag.get_string(&ItemKey::Year))
            .map(|value| value.to_string()),
        other => tag.get_string(&item_key(other)).map(|value| value.to_string()),
    }
}

/// Stores one attribute. Returns false when the tag format has no slot for it.
fn write_key(tag: &mut Tag, key: TagKey, value: &str) -> bool {
    match key {
        TagKey::TrackNumber => match value.split_once('/') {
            Some((number, total)) => {
                tag.insert_text(ItemKey::TrackNumber, number.to_string())
                    && tag.insert_text(ItemKey::TrackTotal, total.to_string())
            }
            None => {
                tag.remove_key(&ItemKey::TrackTotal);
                tag.insert_text(ItemKey::TrackNumber, value.to_string())
            }
        },
        TagKey::Date => {
            // A leftover year item would shadow the new date on formats that keep both.
            tag.remove_key(&ItemKey::Year);
            tag.insert_text(ItemKey::RecordingDate, value.to_string())
        }
        other => tag.insert_text(item_key(other), value.to_string()),
    }
}

/// Leading year of a date tag: the first run of up to four ASCII digits.
pub fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
