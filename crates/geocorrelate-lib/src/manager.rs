//! TrackManager - owner of all loaded tracks
//!
//! Loads track files in parallel on the rayon pool, assigns every successfully
//! parsed track a unique [`TrackId`] and a palette [`TrackColor`], and keeps the
//! failures in a drainable error list. Progress of a load is reported through
//! the [`TrackLoad`] handle returned by [`TrackManager::load`].

use crate::{Track, TrackColor, TrackId, reader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, watch};

/// Notification sent while a load is in progress
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackManagerEvent {
    /// Tracks were parsed and published to the collection
    TracksAdded(Vec<TrackId>),
    /// Every file of the load was processed; always the last event of a load
    AllTrackFilesLoaded { loaded: usize, failed: usize },
}

/// A file that could not be loaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadError {
    pub source: PathBuf,
    pub message: String,
}

/// Final tally of a load, as returned by [`TrackLoad::wait_blocking`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub added: Vec<TrackId>,
    pub loaded: usize,
    pub failed: usize,
}

/// Track collection guarded by the manager's lock
#[derive(Debug)]
struct TrackStore {
    tracks: Vec<Arc<Track>>,
    /// Never reset, so identifiers are unique for the manager's lifetime
    next_track_id: u64,
    next_color_index: usize,
}

impl Default for TrackStore {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            next_track_id: 1,
            next_color_index: 0,
        }
    }
}

struct Shared {
    store: RwLock<TrackStore>,
    errors: Mutex<Vec<LoadError>>,
    visibility: watch::Sender<bool>,
}

/// Shared handle to the loaded tracks
///
/// Cloning is cheap; all clones see the same collection.
#[derive(Clone)]
pub struct TrackManager {
    shared: Arc<Shared>,
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackManager {
    /// Create an empty, visible track manager
    pub fn new() -> Self {
        let (visibility, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(TrackStore::default()),
                errors: Mutex::new(Vec::new()),
                visibility,
            }),
        }
    }

    /// Load track files in the background
    ///
    /// Each file is parsed on its own rayon task. A parsed track is published
    /// to the collection before the event announcing it is sent, and the
    /// terminal [`TrackManagerEvent::AllTrackFilesLoaded`] comes after every
    /// file has been handled. In-flight loads cannot be cancelled.
    pub fn load<P: Into<PathBuf>>(&self, paths: impl IntoIterator<Item = P>) -> TrackLoad {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        let (sender, receiver) = mpsc::unbounded_channel();
        let file_count = paths.len();

        tracing::debug!("Loading {} track files", file_count);

        if paths.is_empty() {
            let _ = sender.send(TrackManagerEvent::AllTrackFilesLoaded {
                loaded: 0,
                failed: 0,
            });
            return TrackLoad {
                receiver,
                file_count,
            };
        }

        let progress = Arc::new(LoadProgress {
            remaining: AtomicUsize::new(file_count),
            loaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });

        for path in paths {
            let manager = self.clone();
            let sender = sender.clone();
            let progress = progress.clone();

            rayon::spawn(move || {
                match reader::load_track_file(&path).into_result() {
                    Ok(track) => {
                        let id = manager.add_track(track);
                        progress.loaded.fetch_add(1, Ordering::AcqRel);
                        let _ = sender.send(TrackManagerEvent::TracksAdded(vec![id]));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load track {}: {}", path.display(), e);
                        manager.push_error(LoadError {
                            source: path,
                            message: e.to_string(),
                        });
                        progress.failed.fetch_add(1, Ordering::AcqRel);
                    }
                }

                if progress.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let loaded = progress.loaded.load(Ordering::Acquire);
                    let failed = progress.failed.load(Ordering::Acquire);
                    tracing::info!("Track loading finished: {} loaded, {} failed", loaded, failed);
                    let _ = sender.send(TrackManagerEvent::AllTrackFilesLoaded { loaded, failed });
                }
            });
        }

        TrackLoad {
            receiver,
            file_count,
        }
    }

    /// Publish an already parsed track, assigning its id and color
    pub fn add_track(&self, mut track: Track) -> TrackId {
        let mut store = self.write_store();

        let id = TrackId(store.next_track_id);
        store.next_track_id += 1;

        let color = TrackColor::from_palette(store.next_color_index);
        store.next_color_index = (store.next_color_index + 1) % TrackColor::PALETTE.len();

        tracing::debug!(
            "Added track {} from {} with {} points",
            id,
            track.source().display(),
            track.len()
        );

        track.assign(id, color);
        store.tracks.push(Arc::new(track));
        id
    }

    /// Take all load errors collected so far, leaving the list empty
    pub fn read_loading_errors(&self) -> Vec<LoadError> {
        std::mem::take(&mut *self.lock_errors())
    }

    /// Remove all tracks and restart the color rotation
    ///
    /// The id counter keeps running so ids are never reused.
    pub fn clear(&self) {
        let mut store = self.write_store();
        store.tracks.clear();
        store.next_color_index = 0;
    }

    /// Look up a track by id, returning an empty track if there is none
    pub fn get_track_by_id(&self, id: TrackId) -> Arc<Track> {
        self.read_store()
            .tracks
            .iter()
            .find(|track| track.id() == id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the current tracks
    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.read_store().tracks.clone()
    }

    #[inline]
    pub fn track_count(&self) -> usize {
        self.read_store().tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.track_count() == 0
    }

    /// Show or hide all tracks; subscribers are only notified on change
    pub fn set_visibility(&self, visible: bool) {
        self.shared.visibility.send_if_modified(|current| {
            if *current == visible {
                false
            } else {
                *current = visible;
                true
            }
        });
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        *self.shared.visibility.borrow()
    }

    /// Receiver notified whenever the visibility changes
    pub fn subscribe_visibility(&self) -> watch::Receiver<bool> {
        self.shared.visibility.subscribe()
    }

    fn push_error(&self, error: LoadError) {
        self.lock_errors().push(error);
    }

    fn read_store(&self) -> RwLockReadGuard<'_, TrackStore> {
        self.shared
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, TrackStore> {
        self.shared
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_errors(&self) -> std::sync::MutexGuard<'_, Vec<LoadError>> {
        self.shared
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct LoadProgress {
    remaining: AtomicUsize,
    loaded: AtomicUsize,
    failed: AtomicUsize,
}

/// Event stream of one [`TrackManager::load`] call
pub struct TrackLoad {
    receiver: mpsc::UnboundedReceiver<TrackManagerEvent>,
    file_count: usize,
}

impl TrackLoad {
    /// Number of files this load was started with
    #[inline]
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Next event, `None` once the load is over and all events were received
    pub async fn recv(&mut self) -> Option<TrackManagerEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is ready, for polling from an event loop
    pub fn try_recv(&mut self) -> Option<TrackManagerEvent> {
        self.receiver.try_recv().ok()
    }

    /// Blocking variant of [`TrackLoad::recv`]; must not be called from async code
    pub fn blocking_recv(&mut self) -> Option<TrackManagerEvent> {
        self.receiver.blocking_recv()
    }

    /// Wait for the load to finish
    pub async fn wait(mut self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        while let Some(event) = self.recv().await {
            if summary.apply(event) {
                break;
            }
        }
        summary
    }

    /// Blocking variant of [`TrackLoad::wait`]; must not be called from async code
    pub fn wait_blocking(mut self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        while let Some(event) = self.blocking_recv() {
            if summary.apply(event) {
                break;
            }
        }
        summary
    }
}

impl LoadSummary {
    /// Fold an event in, returning true for the terminal event
    fn apply(&mut self, event: TrackManagerEvent) -> bool {
        match event {
            TrackManagerEvent::TracksAdded(ids) => {
                self.added.extend(ids);
                false
            }
            TrackManagerEvent::AllTrackFilesLoaded { loaded, failed } => {
                self.loaded = loaded;
                self.failed = failed;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoCoordinates, TrackPoint};
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    const ONE_POINT: &str = r#"<?xml version="1.0"?>
<gpx version="1.1" xmlns="http://www.topografix.com/GPX/1/1"><trk><trkseg>
  <trkpt lat="48.1" lon="11.5"><time>2021-05-01T08:00:00Z</time></trkpt>
</trkseg></trk></gpx>"#;

    fn write_gpx(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn test_track(name: &str) -> Track {
        Track::new(
            name,
            vec![TrackPoint::new(
                Utc.with_ymd_and_hms(2021, 5, 1, 8, 0, 0).unwrap(),
                GeoCoordinates::new(48.1, 11.5).unwrap(),
            )],
        )
    }

    #[test]
    fn test_load_valid_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let valid = write_gpx(dir.path(), "valid.gpx", ONE_POINT);
        let missing = dir.path().join("missing.gpx");

        let manager = TrackManager::new();
        let mut load = manager.load(vec![valid.clone(), missing.clone()]);
        assert_eq!(load.file_count(), 2);

        let mut events = Vec::new();
        while let Some(event) = load.blocking_recv() {
            // Tracks are readable as soon as their event arrives
            if let TrackManagerEvent::TracksAdded(ids) = &event {
                for &id in ids {
                    let track = manager.get_track_by_id(id);
                    assert_eq!(track.id(), id);
                    assert_eq!(track.source(), valid.as_path());
                    assert!(!track.is_empty());
                }
            }
            events.push(event);
        }

        let terminal: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, TrackManagerEvent::AllTrackFilesLoaded { .. }))
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(
            events.last(),
            Some(&TrackManagerEvent::AllTrackFilesLoaded {
                loaded: 1,
                failed: 1
            })
        );

        assert_eq!(manager.track_count(), 1);
        let errors = manager.read_loading_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, missing);
        assert!(errors[0].message.starts_with("Could not open"));
        assert!(manager.read_loading_errors().is_empty());

        let track = &manager.tracks()[0];
        assert_eq!(track.source(), valid.as_path());
        assert_eq!(track.id(), TrackId(1));
        assert_eq!(track.color(), TrackColor::RED);
    }

    #[test]
    fn test_load_single_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let valid = write_gpx(dir.path(), "valid.gpx", ONE_POINT);

        let manager = TrackManager::new();
        let summary = manager.load([valid]).wait_blocking();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.added, vec![TrackId(1)]);
        assert_eq!(manager.track_count(), 1);
        assert!(manager.read_loading_errors().is_empty());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let manager = TrackManager::new();
        let summary = manager.load(["/nonexistent/track.gpx"]).wait_blocking();

        assert_eq!(summary.loaded, 0);
        assert_eq!(summary.failed, 1);
        assert!(manager.is_empty());
        assert_eq!(manager.read_loading_errors().len(), 1);
    }

    #[test]
    fn test_load_invalid_files_report_errors() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_gpx(dir.path(), "empty.gpx", "");
        let broken = write_gpx(dir.path(), "broken.gpx", "<gpx><trk>");

        let manager = TrackManager::new();
        let summary = manager.load([empty, broken]).wait_blocking();
        assert_eq!(summary.failed, 2);

        let mut messages: Vec<String> = manager
            .read_loading_errors()
            .into_iter()
            .map(|e| e.message)
            .collect();
        messages.sort();
        assert!(messages[0].contains("empty"));
        assert!(messages[1].contains("not a valid track file"));
    }

    #[test]
    fn test_load_nothing() {
        let manager = TrackManager::new();
        let mut load = manager.load(Vec::<PathBuf>::new());
        assert_eq!(
            load.blocking_recv(),
            Some(TrackManagerEvent::AllTrackFilesLoaded {
                loaded: 0,
                failed: 0
            })
        );
        assert_eq!(load.blocking_recv(), None);
    }

    #[test]
    fn test_many_files_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..8)
            .map(|i| write_gpx(dir.path(), &format!("t{i}.gpx"), ONE_POINT))
            .collect();

        let manager = TrackManager::new();
        let mut summary = manager.load(paths).wait_blocking();
        summary.added.sort();
        assert_eq!(summary.added, (1..=8).map(TrackId).collect::<Vec<_>>());
    }

    #[test]
    fn test_ids_never_reused_after_clear() {
        let manager = TrackManager::new();
        let first = manager.add_track(test_track("a.gpx"));
        let second = manager.add_track(test_track("b.gpx"));
        assert!(first < second);

        manager.clear();
        assert!(manager.is_empty());

        let third = manager.add_track(test_track("c.gpx"));
        assert!(third > second);
        assert_eq!(third, TrackId(3));
    }

    #[test]
    fn test_color_rotation_resets_on_clear() {
        let manager = TrackManager::new();
        let colors: Vec<TrackColor> = (0..5)
            .map(|i| {
                let id = manager.add_track(test_track(&format!("{i}.gpx")));
                manager.get_track_by_id(id).color()
            })
            .collect();
        assert_eq!(
            colors,
            vec![
                TrackColor::RED,
                TrackColor::BLUE,
                TrackColor::GREEN,
                TrackColor::MAGENTA,
                TrackColor::RED
            ]
        );

        manager.clear();
        let id = manager.add_track(test_track("x.gpx"));
        assert_eq!(manager.get_track_by_id(id).color(), TrackColor::RED);
    }

    #[test]
    fn test_get_missing_track_is_empty() {
        let manager = TrackManager::new();
        manager.add_track(test_track("a.gpx"));

        let missing = manager.get_track_by_id(TrackId(42));
        assert!(missing.is_empty());
        assert_eq!(missing.id(), TrackId::UNASSIGNED);
    }

    #[test]
    fn test_visibility_notifications() {
        let manager = TrackManager::new();
        let mut receiver = manager.subscribe_visibility();
        assert!(manager.is_visible());

        manager.set_visibility(true);
        assert!(!receiver.has_changed().unwrap());

        manager.set_visibility(false);
        assert!(receiver.has_changed().unwrap());
        assert!(!*receiver.borrow_and_update());
        assert!(!manager.is_visible());
    }

    #[test]
    fn test_clones_share_state() {
        let manager = TrackManager::new();
        let other = manager.clone();
        other.add_track(test_track("a.gpx"));
        assert_eq!(manager.track_count(), 1);
    }
}
