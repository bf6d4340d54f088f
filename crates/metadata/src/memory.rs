use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::{MetadataError, TagCodec, TagMap};

/// In-memory stand-in for a directory of tagged audio files.
///
/// Counts successful writes and can be told to fail them, which makes it
/// usable as a spy when checking which edits reach a file.
#[derive(Debug, Default)]
pub struct MemoryCodec {
    files: Mutex<HashMap<PathBuf, TagMap>>,
    unreadable: Mutex<HashSet<PathBuf>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a readable file.
    pub fn insert_file(&self, path: impl Into<PathBuf>, attributes: TagMap) {
        let path = path.into();
        self.unreadable.lock().remove(&path);
        self.files.lock().insert(path, attributes);
    }

    /// Registers a file that claims to be audio but whose tags cannot be read.
    pub fn insert_unreadable(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.files.lock().remove(&path);
        self.unreadable.lock().insert(path);
    }

    pub fn attributes(&self, path: &Path) -> Option<TagMap> {
        self.files.lock().get(path).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl TagCodec for MemoryCodec {
    fn is_audio_file(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path) || self.unreadable.lock().contains(path)
    }

    fn read_attributes(&self, path: &Path) -> Result<TagMap, MetadataError> {
        if self.unreadable.lock().contains(path) {
            return Err(MetadataError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt tag block",
            )));
        }
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| MetadataError::Missing(path.to_path_buf()))
    }

    fn write_attributes(&self, path: &Path, attributes: &TagMap) -> Result<(), MetadataError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MetadataError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is read-only",
            )));
        }
        let mut files = self.files.lock();
        let existing = files
            .get_mut(path)
            .ok_or_else(|| MetadataError::Missing(path.to_path_buf()))?;
        for (key, value) in attributes {
            existing.insert(*key, value.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::MemoryCodec;
    use crate::{MetadataError, TagCodec, TagKey, TagMap};

    #[test]
    fn writes_merge_into_existing_attributes() {
        let codec = MemoryCodec::new();
        let mut tags = TagMap::new();
        tags.insert(TagKey::Title, "Warszawa".to_string());
        tags.insert(TagKey::Artist, "Bowie".to_string());
        codec.insert_file("/music/a.mp3", tags);

        let mut update = TagMap::new();
        update.insert(TagKey::Title, "Art Decade".to_string());
        codec
            .write_attributes(Path::new("/music/a.mp3"), &update)
            .unwrap();

        let stored = codec.attributes(Path::new("/music/a.mp3")).unwrap();
        assert_eq!(stored.get(&TagKey::Title).map(String::as_str), Some("Art Decade"));
        assert_eq!(stored.get(&TagKey::Artist).map(String::as_str), Some("Bowie"));
        assert_eq!(codec.write_count(), 1);
    }

    #[test]
    fn failed_writes_are_not_counted() {
        let codec = MemoryCodec::new();
        codec.insert_file("/music/a.mp3", TagMap::new());
        codec.set_fail_writes(true);
        let err = codec
            .write_attributes(Path::new("/music/a.mp3"), &TagMap::new())
            .unwrap_err();
        assert!(matches!(err, MetadataError::Io(_)));
        assert_eq!(codec.write_count(), 0);
    }

    #[test]
    fn unreadable_files_still_look_like_audio() {
        let codec = MemoryCodec::new();
        codec.insert_unreadable("/music/broken.flac");
        let path = Path::new("/music/broken.flac");
        assert!(codec.is_audio_file(path));
        assert!(codec.read_attributes(path).is_err());
        assert!(!codec.is_audio_file(Path::new("/music/cover.jpg")));
    }
}
