//! Track storage module
//!
//! This module provides the [`Track`] struct holding one loaded track log:
//! its time-sorted [`TrackPoint`]s plus the identity and color assigned by
//! the [`TrackManager`](crate::TrackManager).

use crate::GeoCoordinates;
use chrono::{DateTime, Utc};
use geo::{BoundingRect, MultiPoint, Point, Rect};
use std::fmt;
use std::path::{Path, PathBuf};

/// GPS fix type reported by a track point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixType {
    TwoD,
    ThreeD,
}

impl FixType {
    /// Parse the GPX `fix` element value; only "2d" and "3d" are recognized
    pub fn from_gpx(value: &str) -> Option<Self> {
        match value {
            "2d" => Some(Self::TwoD),
            "3d" => Some(Self::ThreeD),
            _ => None,
        }
    }

    /// Number of dimensions of the fix (2 or 3)
    #[inline]
    pub fn dimensions(&self) -> u8 {
        match self {
            Self::TwoD => 2,
            Self::ThreeD => 3,
        }
    }
}

/// A single time-stamped sample of a track
#[derive(Clone, Debug, PartialEq)]
pub struct TrackPoint {
    /// Sample time in UTC, the sort and search key
    pub time: DateTime<Utc>,
    pub coordinates: GeoCoordinates,
    pub n_satellites: Option<u32>,
    /// Horizontal dilution of precision
    pub hdop: Option<f64>,
    /// Positional dilution of precision
    pub pdop: Option<f64>,
    pub fix_type: Option<FixType>,
    /// Speed in m/s
    pub speed: Option<f64>,
}

impl TrackPoint {
    pub fn new(time: DateTime<Utc>, coordinates: GeoCoordinates) -> Self {
        Self {
            time,
            coordinates,
            n_satellites: None,
            hdop: None,
            pdop: None,
            fix_type: None,
            speed: None,
        }
    }
}

/// Identifier assigned by the track manager; 0 means unassigned
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub u64);

impl TrackId {
    pub const UNASSIGNED: TrackId = TrackId(0);

    #[inline]
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Display color of a track
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrackColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl TrackColor {
    pub const RED: TrackColor = TrackColor::rgb(255, 0, 0);
    pub const BLUE: TrackColor = TrackColor::rgb(0, 0, 255);
    pub const GREEN: TrackColor = TrackColor::rgb(0, 255, 0);
    pub const MAGENTA: TrackColor = TrackColor::rgb(255, 0, 255);

    /// Rotation used for newly loaded tracks
    pub const PALETTE: [TrackColor; 4] = [Self::RED, Self::BLUE, Self::GREEN, Self::MAGENTA];

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Palette entry for the given rotation index (wraps around)
    #[inline]
    pub fn from_palette(index: usize) -> Self {
        Self::PALETTE[index % Self::PALETTE.len()]
    }
}

/// One loaded track log
///
/// The points are kept sorted ascending by time; the correlator relies on it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Track {
    id: TrackId,
    source: PathBuf,
    points: Vec<TrackPoint>,
    color: TrackColor,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Track {
    /// Create an unassigned track, sorting the points by time
    pub fn new(source: impl Into<PathBuf>, mut points: Vec<TrackPoint>) -> Self {
        points.sort_by(|a, b| a.time.cmp(&b.time));
        Self {
            id: TrackId::UNASSIGNED,
            source: source.into(),
            points,
            color: TrackColor::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// Location the track was read from
    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[inline]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    #[inline]
    pub fn color(&self) -> TrackColor {
        self.color
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub(crate) fn assign(&mut self, id: TrackId, color: TrackColor) {
        self.id = id;
        self.color = color;
    }

    /// First and last timestamp, `None` for an empty track
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.points.first()?.time, self.points.last()?.time))
    }

    /// Sum of the great-circle distances between consecutive points, in meters
    pub fn total_distance(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].coordinates.distance_to(&pair[1].coordinates))
            .sum()
    }

    /// Bounding box in WGS84 degrees (x = longitude, y = latitude)
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        let points: MultiPoint<f64> = self
            .points
            .iter()
            .map(|p| Point::from(p.coordinates))
            .collect();
        points.bounding_rect()
    }
}
