//! Track correlator - position lookup for timestamped items
//!
//! Given the loaded tracks and a batch of [`Correlation`] items, the
//! correlator assigns every item the position of a track point recorded at
//! the same time, or a position linearly interpolated between the two points
//! bracketing the item's time. Items without a match are left out of the
//! results; callers detect them through their own `user_data` bookkeeping.
//!
//! Runs execute on the rayon pool and stream their results back as
//! [`CorrelationEvent`]s, ending with exactly one `Done` or `Cancelled`.

use crate::{CorrelatorError, FixType, GeoCoordinates, Track, TrackManager, TrackPoint};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Items per result batch unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Matching policy for a correlation run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationOptions {
    /// Allow interpolating between the two points bracketing an item
    pub interpolate: bool,
    /// Largest distance in seconds between bracketing points that may be interpolated
    pub max_gap_time: i64,
    /// Seconds added to every item timestamp (camera clock drift)
    pub seconds_offset: i64,
    /// UTC offset in seconds of the clock that produced the item timestamps
    pub time_zone_offset: i64,
    /// Largest whole-second difference still treated as an exact match.
    /// 0 means the item and the point must fall in the same second.
    pub exact_match_tolerance: i64,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            interpolate: true,
            max_gap_time: 30,
            seconds_offset: 0,
            time_zone_offset: 0,
            exact_match_tolerance: 0,
        }
    }
}

impl CorrelationOptions {
    /// UTC time used to search the tracks for an item's timestamp
    ///
    /// Returns `None` if the offsets push the time out of range.
    pub fn lookup_time(&self, date_time: NaiveDateTime) -> Option<DateTime<Utc>> {
        let shift = self.seconds_offset.checked_sub(self.time_zone_offset)?;
        date_time
            .and_utc()
            .checked_add_signed(TimeDelta::try_seconds(shift)?)
    }
}

/// How a correlation result was obtained
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchKind {
    #[default]
    None,
    /// Taken verbatim from a track point
    Exact,
    /// Linearly interpolated between two track points
    Interpolated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CorrelationFlags {
    pub kind: MatchKind,
    /// The resolved coordinates carry an altitude
    pub has_altitude: bool,
}

impl CorrelationFlags {
    #[inline]
    pub fn has_coordinates(&self) -> bool {
        self.kind != MatchKind::None
    }

    #[inline]
    pub fn is_interpolated(&self) -> bool {
        self.kind == MatchKind::Interpolated
    }
}

/// One item to resolve, plus the fields filled in by the correlator
///
/// `user_data` is passed through untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Correlation<T> {
    /// Item timestamp as read from its own clock, without time zone
    pub date_time: NaiveDateTime,
    pub user_data: T,
    pub coordinates: Option<GeoCoordinates>,
    pub n_satellites: Option<u32>,
    pub hdop: Option<f64>,
    pub pdop: Option<f64>,
    pub fix_type: Option<FixType>,
    pub speed: Option<f64>,
    pub flags: CorrelationFlags,
}

impl<T> Correlation<T> {
    pub fn new(date_time: NaiveDateTime, user_data: T) -> Self {
        Self {
            date_time,
            user_data,
            coordinates: None,
            n_satellites: None,
            hdop: None,
            pdop: None,
            fix_type: None,
            speed: None,
            flags: CorrelationFlags::default(),
        }
    }

    fn set_exact(&mut self, point: &TrackPoint) {
        self.coordinates = Some(point.coordinates);
        self.n_satellites = point.n_satellites;
        self.hdop = point.hdop;
        self.pdop = point.pdop;
        self.fix_type = point.fix_type;
        self.speed = point.speed;
        self.flags = CorrelationFlags {
            kind: MatchKind::Exact,
            has_altitude: point.coordinates.has_altitude(),
        };
    }

    fn set_interpolated(&mut self, coordinates: GeoCoordinates) {
        self.coordinates = Some(coordinates);
        self.n_satellites = None;
        self.hdop = None;
        self.pdop = None;
        self.fix_type = None;
        self.speed = None;
        self.flags = CorrelationFlags {
            kind: MatchKind::Interpolated,
            has_altitude: coordinates.has_altitude(),
        };
    }
}

/// Nearest track points before and at-or-after a lookup time, over all tracks
#[derive(Default)]
struct Bracket<'a> {
    /// Latest point strictly before the lookup time
    before: Option<&'a TrackPoint>,
    /// Earliest point at or after the lookup time
    after: Option<&'a TrackPoint>,
}

impl<'a> Bracket<'a> {
    fn find(tracks: &'a [Arc<Track>], lookup: DateTime<Utc>) -> Self {
        let mut bracket = Bracket::default();

        for track in tracks {
            let points = track.points();
            let index = points.partition_point(|p| p.time < lookup);

            if let Some(candidate) = index.checked_sub(1).map(|i| &points[i]) {
                if bracket.before.is_none_or(|b| candidate.time > b.time) {
                    bracket.before = Some(candidate);
                }
            }
            if let Some(candidate) = points.get(index) {
                if bracket.after.is_none_or(|a| candidate.time < a.time) {
                    bracket.after = Some(candidate);
                }
            }
        }

        bracket
    }

    /// Closest bracketing point within `tolerance` whole seconds of `lookup`
    ///
    /// Negative tolerances count as zero.
    fn exact_match(&self, lookup: DateTime<Utc>, tolerance: i64) -> Option<&'a TrackPoint> {
        let tolerance = tolerance.max(0);
        [self.after, self.before]
            .into_iter()
            .flatten()
            .filter(|p| (p.time.timestamp() - lookup.timestamp()).abs() <= tolerance)
            .min_by_key(|p| (p.time - lookup).abs())
    }

    /// Position between the bracketing points, if both exist and are close enough
    fn interpolate(&self, lookup: DateTime<Utc>, max_gap_time: i64) -> Option<GeoCoordinates> {
        let (before, after) = (self.before?, self.after?);
        if !(before.time < lookup && lookup < after.time) {
            return None;
        }

        let gap_ms = (after.time - before.time).num_milliseconds();
        if gap_ms > max_gap_time.saturating_mul(1000) {
            return None;
        }

        let fraction = if gap_ms > 0 {
            (lookup - before.time).num_milliseconds() as f64 / gap_ms as f64
        } else {
            0.0
        };
        Some(before.coordinates.lerp(&after.coordinates, fraction))
    }
}

/// Resolve a single item against `tracks`
///
/// An exact match always wins, whatever the interpolation setting. Returns
/// `None` when the item cannot be placed.
pub fn correlate_item<T>(
    tracks: &[Arc<Track>],
    mut item: Correlation<T>,
    options: &CorrelationOptions,
) -> Option<Correlation<T>> {
    let lookup = options.lookup_time(item.date_time)?;
    let bracket = Bracket::find(tracks, lookup);

    if let Some(point) = bracket.exact_match(lookup, options.exact_match_tolerance) {
        item.set_exact(point);
        return Some(item);
    }

    if !options.interpolate {
        return None;
    }

    let coordinates = bracket.interpolate(lookup, options.max_gap_time)?;
    item.set_interpolated(coordinates);
    Some(item)
}

/// Notification of a correlation run
#[derive(Debug)]
pub enum CorrelationEvent<T> {
    /// A batch of resolved items, in no particular order
    ItemsCorrelated(Vec<Correlation<T>>),
    /// All items were processed
    Done,
    /// The run was cancelled; batches delivered before remain valid
    Cancelled,
}

#[derive(Debug, Default)]
struct RunState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl RunState {
    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[inline]
    fn is_active(&self) -> bool {
        !self.finished.load(Ordering::Acquire) && !self.is_cancelled()
    }

    #[inline]
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Runs correlations against the tracks of a [`TrackManager`]
///
/// Only one run may be active at a time; a cancelled run no longer counts.
pub struct TrackCorrelator {
    manager: TrackManager,
    batch_size: usize,
    current: Mutex<Option<Arc<RunState>>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackCorrelator {
    pub fn new(manager: TrackManager) -> Self {
        Self {
            manager,
            batch_size: DEFAULT_BATCH_SIZE,
            current: Mutex::new(None),
        }
    }

    /// Set how many items are processed per result batch (at least 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Start correlating `items` in the background
    ///
    /// The set of tracks is captured now; tracks added later are not seen by
    /// this run. Returns immediately with the run's event stream.
    pub fn correlate<T: Send + 'static>(
        &self,
        items: Vec<Correlation<T>>,
        options: CorrelationOptions,
    ) -> crate::Result<CorrelationRun<T>> {
        let state = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|state| state.is_active()) {
                return Err(CorrelatorError::AlreadyRunning);
            }
            let state = Arc::new(RunState::default());
            *current = Some(state.clone());
            state
        };

        let tracks = self.manager.tracks();
        let (sender, receiver) = mpsc::unbounded_channel();
        let batch_size = self.batch_size;

        tracing::debug!(
            "Correlating {} items against {} tracks",
            items.len(),
            tracks.len()
        );

        let worker_state = state.clone();
        rayon::spawn(move || {
            run_correlation(&tracks, items, &options, batch_size, &worker_state, &sender);
        });

        Ok(CorrelationRun { receiver, state })
    }

    /// Ask the active run to stop; it ends with [`CorrelationEvent::Cancelled`]
    pub fn cancel_correlation(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = current.as_ref() {
            state.cancel();
        }
    }

    /// Whether a run is still in progress
    pub fn is_running(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .is_some_and(|state| !state.finished.load(Ordering::Acquire))
    }
}

/// Body of a background run; sends the terminal event last
fn run_correlation<T: Send>(
    tracks: &[Arc<Track>],
    items: Vec<Correlation<T>>,
    options: &CorrelationOptions,
    batch_size: usize,
    state: &RunState,
    sender: &mpsc::UnboundedSender<CorrelationEvent<T>>,
) {
    #[cfg(feature = "profiling")]
    profiling::scope!("correlator::run");

    let total = items.len();
    let matched = AtomicUsize::new(0);

    items
        .into_par_iter()
        .chunks(batch_size.max(1))
        .for_each(|chunk| {
            let batch: Vec<Correlation<T>> = chunk
                .into_iter()
                .take_while(|_| !state.is_cancelled())
                .filter_map(|item| correlate_item(tracks, item, options))
                .collect();

            if batch.is_empty() || state.is_cancelled() {
                return;
            }
            matched.fetch_add(batch.len(), Ordering::Relaxed);
            if sender.send(CorrelationEvent::ItemsCorrelated(batch)).is_err() {
                // Nobody listens any more
                state.cancel();
            }
        });

    let terminal = if state.is_cancelled() {
        tracing::debug!("Correlation cancelled");
        CorrelationEvent::Cancelled
    } else {
        tracing::debug!(
            "Correlation finished: {} of {} items matched",
            matched.load(Ordering::Relaxed),
            total
        );
        CorrelationEvent::Done
    };

    state.finished.store(true, Ordering::Release);
    let _ = sender.send(terminal);
}

/// Everything a run delivered, see [`CorrelationRun::collect_blocking`]
#[derive(Debug)]
pub struct CorrelationOutcome<T> {
    pub items: Vec<Correlation<T>>,
    pub cancelled: bool,
}

/// Handle to one background correlation run
pub struct CorrelationRun<T> {
    receiver: mpsc::UnboundedReceiver<CorrelationEvent<T>>,
    state: Arc<RunState>,
}

impl<T> CorrelationRun<T> {
    /// Next event, `None` after the terminal event was received
    pub async fn recv(&mut self) -> Option<CorrelationEvent<T>> {
        self.receiver.recv().await
    }

    /// Next event if one is ready, for polling from an event loop
    pub fn try_recv(&mut self) -> Option<CorrelationEvent<T>> {
        self.receiver.try_recv().ok()
    }

    /// Blocking variant of [`CorrelationRun::recv`]; must not be called from async code
    pub fn blocking_recv(&mut self) -> Option<CorrelationEvent<T>> {
        self.receiver.blocking_recv()
    }

    /// Request cancellation of this run
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Gather all batches until the run ends
    pub async fn collect(mut self) -> CorrelationOutcome<T> {
        let mut outcome = CorrelationOutcome {
            items: Vec::new(),
            cancelled: false,
        };
        while let Some(event) = self.recv().await {
            if outcome.apply(event) {
                break;
            }
        }
        outcome
    }

    /// Blocking variant of [`CorrelationRun::collect`]; must not be called from async code
    pub fn collect_blocking(mut self) -> CorrelationOutcome<T> {
        let mut outcome = CorrelationOutcome {
            items: Vec::new(),
            cancelled: false,
        };
        while let Some(event) = self.blocking_recv() {
            if outcome.apply(event) {
                break;
            }
        }
        outcome
    }
}

impl<T> Drop for CorrelationRun<T> {
    /// An abandoned run stops and frees its correlator
    fn drop(&mut self) {
        self.state.cancel();
    }
}

impl<T> CorrelationOutcome<T> {
    /// Fold an event in, returning true for a terminal event
    fn apply(&mut self, event: CorrelationEvent<T>) -> bool {
        match event {
            CorrelationEvent::ItemsCorrelated(batch) => {
                self.items.extend(batch);
                false
            }
            CorrelationEvent::Done => true,
            CorrelationEvent::Cancelled => {
                self.cancelled = true;
                true
            }
        }
    }
}
