use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{AlbumId, PerformerId, Track, TrackId, UNKNOWN};
use metadata::{parse_year, MetadataError, TagKey, TagMap};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::CatalogError;
use crate::resolver::{resolve_album_in, resolve_performer_in};
use crate::store::{
    clear_tag_error_in, insert_track_in, record_tag_error_in, track_id_for_path_in,
};
use crate::Catalog;

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// A track read from a file with every default applied, before its
/// performer and album are resolved to ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackDraft {
    pub path: String,
    pub title: String,
    pub genre: String,
    pub track_number: String,
    pub year: i32,
    pub performer: Option<String>,
    pub album: Option<String>,
}

impl TrackDraft {
    pub fn from_attributes(path: &str, attributes: &TagMap, current_year: i32) -> Self {
        let text = |key: TagKey| attributes.get(&key).cloned();
        Self {
            path: path.to_string(),
            title: text(TagKey::Title).unwrap_or_else(|| UNKNOWN.to_string()),
            genre: text(TagKey::Genre).unwrap_or_else(|| UNKNOWN.to_string()),
            track_number: text(TagKey::TrackNumber).unwrap_or_else(|| "0".to_string()),
            year: attributes
                .get(&TagKey::Date)
                .and_then(|value| parse_year(value))
                .unwrap_or(current_year),
            performer: text(TagKey::Artist),
            album: text(TagKey::Album),
        }
    }

    pub fn to_track(
        &self,
        id: TrackId,
        performer_id: Option<PerformerId>,
        album_id: Option<AlbumId>,
    ) -> Track {
        Track {
            id,
            performer_id,
            album_id,
            path: self.path.clone(),
            title: self.title.clone(),
            track_number: self.track_number.clone(),
            year: self.year,
            genre: self.genre.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(TrackId),
    AlreadyPresent(TrackId),
    NotAudio,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub discovered: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub not_audio: usize,
    pub failed: usize,
    /// Files skipped because their path is not valid UTF-8.
    pub unsupported_paths: usize,
    pub interrupted: bool,
}

/// Cancellation flag for a directory scan, checked between files.
#[derive(Clone, Debug, Default)]
pub struct ScanControl {
    cancelled: Arc<AtomicBool>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Files decoded in parallel before their inserts run.
    pub batch_size: usize,
    pub control: ScanControl,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            control: ScanControl::new(),
        }
    }
}

enum Decoded {
    Known(TrackId),
    NotAudio,
    UnsupportedPath,
    Failed { key: String, source: MetadataError },
    Draft(TrackDraft),
}

impl Catalog {
    /// Adds one file to the catalog. A path already cataloged is left as is.
    pub fn ingest_file(&self, path: &Path) -> Result<IngestOutcome, CatalogError> {
        match self.decode(path, current_year())? {
            Decoded::Known(id) => Ok(IngestOutcome::AlreadyPresent(id)),
            Decoded::NotAudio => Ok(IngestOutcome::NotAudio),
            Decoded::UnsupportedPath => Err(CatalogError::UnsupportedPath(path.to_path_buf())),
            Decoded::Failed { source, .. } => Err(CatalogError::Codec {
                path: path.to_path_buf(),
                source,
            }),
            Decoded::Draft(draft) => self.insert_draft(&draft),
        }
    }

    pub fn ingest_directory(&self, root: &Path) -> Result<IngestReport, CatalogError> {
        self.ingest_directory_with(root, &ScanOptions::default())
    }

    /// Walks `root` and ingests every audio file in discovery order.
    ///
    /// Tag decoding for a batch runs in parallel; inserts go through the
    /// single writer one file at a time, each committing on its own, so an
    /// interrupted scan keeps what it inserted and can simply be re-run.
    pub fn ingest_directory_with(
        &self,
        root: &Path,
        options: &ScanOptions,
    ) -> Result<IngestReport, CatalogError> {
        let files = discover_files(root);
        info!("Found {} candidate files under {:?}", files.len(), root);

        let mut report = IngestReport {
            discovered: files.len(),
            ..IngestReport::default()
        };
        let year = current_year();

        'batches: for batch in files.chunks(options.batch_size.max(1)) {
            if options.control.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let decoded: Vec<Result<Decoded, CatalogError>> =
                batch.par_iter().map(|path| self.decode(path, year)).collect();

            for (path, result) in batch.iter().zip(decoded) {
                if options.control.is_cancelled() {
                    report.interrupted = true;
                    break 'batches;
                }
                match result? {
                    Decoded::Known(_) => report.already_present += 1,
                    Decoded::NotAudio => report.not_audio += 1,
                    Decoded::UnsupportedPath => {
                        warn!("Skipping {:?}: path is not valid UTF-8", path);
                        report.unsupported_paths += 1;
                    }
                    Decoded::Failed { key, source } => {
                        warn!("Failed to read tags for {:?}: {}", path, source);
                        self.record_tag_error(&key, &source)?;
                        report.failed += 1;
                    }
                    Decoded::Draft(draft) => match self.insert_draft(&draft)? {
                        IngestOutcome::Inserted(_) => report.inserted += 1,
                        IngestOutcome::AlreadyPresent(_) => report.already_present += 1,
                        IngestOutcome::NotAudio => report.not_audio += 1,
                    },
                }
            }
        }

        if report.interrupted {
            warn!(
                "Scan of {:?} interrupted: {} inserted before stop",
                root, report.inserted
            );
        } else {
            info!(
                "Scan of {:?} finished: {} inserted, {} already cataloged, {} skipped, {} failed, {} unsupported paths",
                root,
                report.inserted,
                report.already_present,
                report.not_audio,
                report.failed,
                report.unsupported_paths
            );
        }
        Ok(report)
    }

    fn decode(&self, path: &Path, year: i32) -> Result<Decoded, CatalogError> {
        let key = match path_key(path) {
            Some(key) => key,
            None => return Ok(Decoded::UnsupportedPath),
        };
        if let Some(id) = self.store.track_id_for_path(key)? {
            return Ok(Decoded::Known(id));
        }
        if !self.codec.is_audio_file(path) {
            return Ok(Decoded::NotAudio);
        }
        match self.codec.read_attributes(path) {
            Ok(attributes) => Ok(Decoded::Draft(TrackDraft::from_attributes(
                key,
                &attributes,
                year,
            ))),
            Err(source) => Ok(Decoded::Failed {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn insert_draft(&self, draft: &TrackDraft) -> Result<IngestOutcome, CatalogError> {
        let _writer = self.writer.lock();
        let write_txn = self.store.begin_write()?;

        let existing = track_id_for_path_in(&write_txn, &draft.path)?;
        if let Some(id) = existing {
            write_txn.abort()?;
            return Ok(IngestOutcome::AlreadyPresent(id));
        }

        let performer_id = match &draft.performer {
            Some(name) => Some(resolve_performer_in(&write_txn, name)?),
            None => None,
        };
        let album_id = match &draft.album {
            Some(name) => Some(resolve_album_in(&write_txn, name, draft.year)?),
            None => None,
        };
        let track = insert_track_in(&write_txn, draft, performer_id, album_id)?;
        clear_tag_error_in(&write_txn, &draft.path)?;
        write_txn.commit()?;

        Ok(IngestOutcome::Inserted(track.id))
    }

    fn record_tag_error(&self, key: &str, err: &MetadataError) -> Result<(), CatalogError> {
        let _writer = self.writer.lock();
        let write_txn = self.store.begin_write()?;
        record_tag_error_in(&write_txn, key, &err.to_string())?;
        write_txn.commit()?;
        Ok(())
    }
}

/// Regular files under `root`, sorted by name within each directory.
pub fn discover_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

pub fn current_year() -> i32 {
    OffsetDateTime::now_utc().year()
}

/// Store key of a path. Paths that are not valid UTF-8 have none, so two
/// distinct file names can never share a key.
pub(crate) fn path_key(path: &Path) -> Option<&str> {
    path.to_str()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use common::UNKNOWN;
    use metadata::{MemoryCodec, MetadataError, TagCodec, TagKey, TagMap};
    use tempfile::TempDir;

    use super::{
        current_year, discover_files, IngestOutcome, ScanControl, ScanOptions, TrackDraft,
    };
    use crate::error::CatalogError;
    use crate::test_support::{open_catalog, tags};
    use crate::Catalog;

    #[test]
    fn draft_defaults_missing_attributes() {
        let draft = TrackDraft::from_attributes("/m/a.mp3", &TagMap::new(), 2031);
        assert_eq!(draft.title, UNKNOWN);
        assert_eq!(draft.genre, UNKNOWN);
        assert_eq!(draft.track_number, "0");
        assert_eq!(draft.year, 2031);
        assert_eq!(draft.performer, None);
        assert_eq!(draft.album, None);
    }

    #[test]
    fn draft_keeps_present_attributes() {
        let attributes = tags(&[
            (TagKey::Title, "Warszawa"),
            (TagKey::TrackNumber, "4/11"),
            (TagKey::Date, "1977-01-14"),
            (TagKey::Artist, ""),
        ]);
        let draft = TrackDraft::from_attributes("/m/a.mp3", &attributes, 2031);
        assert_eq!(draft.title, "Warszawa");
        assert_eq!(draft.track_number, "4/11");
        assert_eq!(draft.year, 1977);
        assert_eq!(draft.performer.as_deref(), Some(""));
    }

    #[test]
    fn unparseable_date_falls_back_to_current_year() {
        let attributes = tags(&[(TagKey::Date, "unknown")]);
        let draft = TrackDraft::from_attributes("/m/a.mp3", &attributes, 2031);
        assert_eq!(draft.year, 2031);
    }

    #[test]
    fn ingest_is_idempotent_on_path() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file("/m/a.mp3", tags(&[(TagKey::Artist, "Bowie"), (TagKey::Album, "Low")]));
        let path = Path::new("/m/a.mp3");

        let first = catalog.ingest_file(path).unwrap();
        let id = match first {
            IngestOutcome::Inserted(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(catalog.ingest_file(path).unwrap(), IngestOutcome::AlreadyPresent(id));

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.tracks, 1);
        assert_eq!(stats.performers, 1);
        assert_eq!(stats.albums, 1);
    }

    #[test]
    fn shared_performer_is_stored_once() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file("/m/a.mp3", tags(&[(TagKey::Artist, "Bowie")]));
        codec.insert_file("/m/b.mp3", tags(&[(TagKey::Artist, "Bowie")]));
        catalog.ingest_file(Path::new("/m/a.mp3")).unwrap();
        catalog.ingest_file(Path::new("/m/b.mp3")).unwrap();

        let performers = catalog.store().list_performers().unwrap();
        assert_eq!(performers.len(), 1);
        let tracks: Vec<_> = [Path::new("/m/a.mp3"), Path::new("/m/b.mp3")]
            .iter()
            .map(|path| {
                let id = catalog
                    .store()
                    .track_id_for_path(&path.to_string_lossy())
                    .unwrap()
                    .unwrap();
                catalog.store().get_track(id).unwrap().unwrap()
            })
            .collect();
        assert!(tracks
            .iter()
            .all(|track| track.performer_id == Some(performers[0].id)));
    }

    #[test]
    fn same_album_name_in_different_years_is_two_albums() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file("/m/a.mp3", tags(&[(TagKey::Album, "Low"), (TagKey::Date, "1977")]));
        codec.insert_file("/m/b.mp3", tags(&[(TagKey::Album, "Low"), (TagKey::Date, "1991")]));
        catalog.ingest_file(Path::new("/m/a.mp3")).unwrap();
        catalog.ingest_file(Path::new("/m/b.mp3")).unwrap();

        let mut years: Vec<i32> = catalog
            .store()
            .list_albums()
            .unwrap()
            .into_iter()
            .map(|album| album.year)
            .collect();
        years.sort();
        assert_eq!(years, vec![1977, 1991]);
    }

    #[test]
    fn album_identity_uses_defaulted_year() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file("/m/a.mp3", tags(&[(TagKey::Album, "Demos")]));
        catalog.ingest_file(Path::new("/m/a.mp3")).unwrap();

        let albums = catalog.store().list_albums().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].year, current_year());
    }

    #[test]
    fn missing_tags_get_defaults() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file("/m/a.mp3", TagMap::new());
        catalog.ingest_file(Path::new("/m/a.mp3")).unwrap();

        let rows = catalog.list_tracks().unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.title, UNKNOWN);
        assert_eq!(row.genre, UNKNOWN);
        assert_eq!(row.track_number, "0");
        assert_eq!(row.year, current_year());
        assert_eq!(row.performer, UNKNOWN);
        assert_eq!(row.album, UNKNOWN);
        assert_eq!(catalog.stats().unwrap().performers, 0);
        assert_eq!(catalog.stats().unwrap().albums, 0);
    }

    #[test]
    fn bowie_scenario_produces_expected_row() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file(
            "/m/low/03.mp3",
            tags(&[
                (TagKey::Artist, "Bowie"),
                (TagKey::Album, "Low"),
                (TagKey::Date, "1977"),
                (TagKey::Title, "Sound and Vision"),
                (TagKey::TrackNumber, "3"),
            ]),
        );
        catalog.ingest_file(Path::new("/m/low/03.mp3")).unwrap();

        let row = catalog.list_tracks().unwrap().remove(0);
        assert_eq!(row.title, "Sound and Vision");
        assert_eq!(row.performer, "Bowie");
        assert_eq!(row.album, "Low");
        assert_eq!(row.track_number, "3");
        assert_eq!(row.year, 1977);
        assert_eq!(row.genre, "Unknown");
    }

    #[test]
    fn non_audio_files_are_skipped() {
        let (_dir, catalog, _codec) = open_catalog();
        let outcome = catalog.ingest_file(Path::new("/m/cover.jpg")).unwrap();
        assert_eq!(outcome, IngestOutcome::NotAudio);
        assert_eq!(catalog.stats().unwrap().tracks, 0);
    }

    #[test]
    fn unreadable_file_is_a_codec_error() {
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_unreadable("/m/broken.flac");
        let err = catalog.ingest_file(Path::new("/m/broken.flac")).unwrap_err();
        assert!(matches!(err, CatalogError::Codec { .. }));
    }

    fn music_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("Bowie").join("Low");
        fs::create_dir_all(&album).unwrap();
        for name in ["01.mp3", "02.mp3", "broken.mp3", "cover.jpg"] {
            fs::write(album.join(name), b"").unwrap();
        }
        dir
    }

    #[test]
    fn discovery_is_sorted_and_files_only() {
        let tree = music_tree();
        let files = discover_files(tree.path());
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01.mp3", "02.mp3", "broken.mp3", "cover.jpg"]);
    }

    #[test]
    fn directory_scan_continues_past_failures() {
        let tree = music_tree();
        let album = tree.path().join("Bowie").join("Low");
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file(album.join("01.mp3"), tags(&[(TagKey::Artist, "Bowie")]));
        codec.insert_file(album.join("02.mp3"), tags(&[(TagKey::Artist, "Bowie")]));
        codec.insert_unreadable(album.join("broken.mp3"));

        let options = ScanOptions {
            batch_size: 2,
            ..ScanOptions::default()
        };
        let report = catalog.ingest_directory_with(tree.path(), &options).unwrap();
        assert_eq!(report.discovered, 4);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.not_audio, 1);
        assert!(!report.interrupted);

        let (errors, total) = catalog.list_tag_error_files(10, 0).unwrap();
        assert_eq!(total, 1);
        assert!(errors[0].path.ends_with("broken.mp3"));

        let again = catalog.ingest_directory(tree.path()).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.already_present, 2);
        assert_eq!(catalog.stats().unwrap().tracks, 2);
    }

    #[test]
    fn recovered_file_clears_its_tag_error() {
        let tree = music_tree();
        let broken = tree.path().join("Bowie").join("Low").join("broken.mp3");
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_unreadable(&broken);
        catalog.ingest_directory(tree.path()).unwrap();
        assert_eq!(catalog.list_tag_error_files(10, 0).unwrap().1, 1);

        codec.insert_file(&broken, tags(&[(TagKey::Title, "Subterraneans")]));
        assert!(matches!(
            catalog.ingest_file(&broken).unwrap(),
            IngestOutcome::Inserted(_)
        ));
        assert_eq!(catalog.list_tag_error_files(10, 0).unwrap().1, 0);
    }

    #[test]
    fn cancelled_scan_stops_before_inserting() {
        let tree = music_tree();
        let album = tree.path().join("Bowie").join("Low");
        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file(album.join("01.mp3"), TagMap::new());

        let options = ScanOptions::default();
        options.control.cancel();
        let report = catalog.ingest_directory_with(tree.path(), &options).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.inserted, 0);
        assert_eq!(catalog.stats().unwrap().tracks, 0);
    }

    /// Cancels the scan from inside the decode of its Nth file.
    struct CancelOnRead {
        files: MemoryCodec,
        control: ScanControl,
        reads: AtomicUsize,
        cancel_on: usize,
    }

    impl TagCodec for CancelOnRead {
        fn is_audio_file(&self, path: &Path) -> bool {
            self.files.is_audio_file(path)
        }

        fn read_attributes(&self, path: &Path) -> Result<TagMap, MetadataError> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if read == self.cancel_on {
                self.control.cancel();
            }
            self.files.read_attributes(path)
        }

        fn write_attributes(&self, path: &Path, attributes: &TagMap) -> Result<(), MetadataError> {
            self.files.write_attributes(path, attributes)
        }
    }

    #[test]
    fn scan_cancelled_midway_keeps_committed_inserts() {
        let tree = music_tree();
        let album = tree.path().join("Bowie").join("Low");
        let control = ScanControl::new();
        let codec = CancelOnRead {
            files: MemoryCodec::new(),
            control: control.clone(),
            reads: AtomicUsize::new(0),
            cancel_on: 2,
        };
        codec.files.insert_file(album.join("01.mp3"), tags(&[(TagKey::Artist, "Bowie")]));
        codec.files.insert_file(album.join("02.mp3"), tags(&[(TagKey::Artist, "Bowie")]));

        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb"), Arc::new(codec)).unwrap();
        let options = ScanOptions {
            batch_size: 1,
            control,
        };
        let report = catalog.ingest_directory_with(tree.path(), &options).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.inserted, 1);
        assert_eq!(catalog.stats().unwrap().tracks, 1);

        let resumed = catalog.ingest_directory(tree.path()).unwrap();
        assert!(!resumed.interrupted);
        assert_eq!(resumed.already_present, 1);
        assert_eq!(resumed.inserted, 1);
        assert_eq!(catalog.stats().unwrap().tracks, 2);
    }

    #[cfg(unix)]
    fn non_utf8_path(last: u8) -> std::path::PathBuf {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let name = [b'c', b'a', b'f', last, b'.', b'm', b'p', b'3'];
        Path::new("/m").join(OsStr::from_bytes(&name))
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_are_rejected_not_merged() {
        let (_dir, catalog, codec) = open_catalog();
        let first = non_utf8_path(0xe9);
        let second = non_utf8_path(0xe8);
        codec.insert_file(first.clone(), tags(&[(TagKey::Title, "A")]));
        codec.insert_file(second.clone(), tags(&[(TagKey::Title, "B")]));

        for path in [&first, &second] {
            match catalog.ingest_file(path) {
                Err(CatalogError::UnsupportedPath(rejected)) => assert_eq!(&rejected, path),
                other => panic!("unexpected result {:?}", other),
            }
        }
        assert_eq!(catalog.stats().unwrap().tracks, 0);
    }

    #[cfg(unix)]
    #[test]
    fn directory_scan_counts_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tree = TempDir::new().unwrap();
        let good = tree.path().join("good.mp3");
        let bad = tree.path().join(OsStr::from_bytes(b"caf\xe9.mp3"));
        fs::write(&good, b"").unwrap();
        if fs::write(&bad, b"").is_err() {
            // Some filesystems refuse non-UTF-8 names outright.
            return;
        }

        let (_dir, catalog, codec) = open_catalog();
        codec.insert_file(good, TagMap::new());
        codec.insert_file(bad, TagMap::new());

        let report = catalog.ingest_directory(tree.path()).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.unsupported_paths, 1);
        assert_eq!(report.failed, 0);
    }
}
