//! Track file reader
//!
//! Parses GPX-like XML into a [`Track`]. Track points are recognized by their
//! `trkpt` element anywhere in the document, independent of the namespace, so
//! both GPX 1.0 and 1.1 files (and point-centric variants) are accepted.
//!
//! A point is kept only if it has valid `lat`/`lon` attributes and a valid
//! `time` child. Everything else about it is optional and parsed
//! independently: `ele`, `sat`, `hdop`, `pdop`, `fix` and `speed`.
//! Failures never panic or escape as errors: they are reported through
//! [`TrackReadResult`].

use crate::{FixType, GeoCoordinates, Track, TrackPoint};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use xml::reader::{EventReader, XmlEvent};

/// Why a track file could not be turned into a usable track
#[derive(Debug, thiserror::Error)]
pub enum TrackReadError {
    #[error("Could not open: {0}")]
    Open(#[from] std::io::Error),

    #[error("File is empty.")]
    Empty,

    #[error("Probably not a valid track file: {0}")]
    NotWellFormed(#[from] xml::reader::Error),

    #[error("File is a track file, but no track points with valid timestamps were found.")]
    NoTrackPoints,
}

/// Outcome of reading one track file
///
/// The track is returned even when reading failed, holding whatever was
/// parsed up to the failure.
#[derive(Debug)]
pub struct TrackReadResult {
    pub track: Track,
    error: Option<TrackReadError>,
}

impl TrackReadResult {
    fn invalid(track: Track, error: TrackReadError) -> Self {
        Self {
            track,
            error: Some(error),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    #[inline]
    pub fn error(&self) -> Option<&TrackReadError> {
        self.error.as_ref()
    }

    /// Human-readable description of the failure, if any
    pub fn load_error(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub fn into_result(self) -> Result<Track, TrackReadError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.track),
        }
    }
}

/// Open the file at `path` and read it as a track
pub fn load_track_file(path: &Path) -> TrackReadResult {
    #[cfg(feature = "profiling")]
    profiling::scope!("reader::load_track_file");

    match File::open(path) {
        Ok(file) => read_track(file, path),
        Err(e) => {
            tracing::warn!("Failed to open track file {}: {}", path.display(), e);
            TrackReadResult::invalid(Track::new(path, Vec::new()), TrackReadError::Open(e))
        }
    }
}

/// Read a track from an already opened stream
///
/// `source` is recorded in the resulting track and only used for reporting.
pub fn read_track<R: Read>(reader: R, source: impl Into<PathBuf>) -> TrackReadResult {
    #[cfg(feature = "profiling")]
    profiling::scope!("reader::read_track");

    let source = source.into();
    let mut reader = BufReader::new(reader);

    let error = match reader.fill_buf() {
        Ok([]) => Some(TrackReadError::Empty),
        Ok(_) => None,
        Err(e) => Some(TrackReadError::Open(e)),
    };
    if let Some(error) = error {
        tracing::warn!("Failed to read track file {}: {}", source.display(), error);
        return TrackReadResult::invalid(Track::new(source, Vec::new()), error);
    }

    let mut parser = PointParser::default();
    let outcome = parser.parse(reader);
    let dropped = parser.dropped;
    let track = Track::new(source, parser.points);

    if let Err(e) = outcome {
        tracing::warn!("Malformed track file {}: {}", track.source().display(), e);
        return TrackReadResult::invalid(track, TrackReadError::NotWellFormed(e));
    }

    if dropped > 0 {
        tracing::debug!(
            "Dropped {} track points without valid time or coordinates from {}",
            dropped,
            track.source().display()
        );
    }

    if track.is_empty() {
        return TrackReadResult::invalid(track, TrackReadError::NoTrackPoints);
    }

    TrackReadResult { track, error: None }
}

/// Parse a track point timestamp into UTC
///
/// Accepted: RFC 3339 (`2009-03-11T13:39:55.622Z`, `2010-01-14T09:26:02+02:00`),
/// numeric offsets without colon (`+0200`) and timestamps without any zone,
/// which are taken as UTC. The offset is subtracted to normalize to UTC.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    if let Ok(time) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|time| time.and_utc())
}

/// Optional fields of the point currently being parsed
#[derive(Default)]
struct PendingPoint {
    coordinates: Option<GeoCoordinates>,
    time: Option<DateTime<Utc>>,
    altitude: Option<f64>,
    n_satellites: Option<u32>,
    hdop: Option<f64>,
    pdop: Option<f64>,
    fix_type: Option<FixType>,
    speed: Option<f64>,
}

impl PendingPoint {
    fn from_attributes(attributes: &[xml::attribute::OwnedAttribute]) -> Self {
        let attribute = |name: &str| {
            attributes
                .iter()
                .find(|a| a.name.local_name == name)
                .and_then(|a| a.value.trim().parse::<f64>().ok())
        };

        let coordinates = match (attribute("lat"), attribute("lon")) {
            (Some(lat), Some(lon)) => GeoCoordinates::new(lat, lon).ok(),
            _ => None,
        };

        Self {
            coordinates,
            ..Self::default()
        }
    }

    fn apply(&mut self, element: &str, text: &str) {
        match element {
            "time" => self.time = parse_time(text),
            "ele" => self.altitude = text.parse().ok().or(self.altitude),
            "sat" => self.n_satellites = text.parse().ok().or(self.n_satellites),
            "hdop" => self.hdop = text.parse().ok().or(self.hdop),
            "pdop" => self.pdop = text.parse().ok().or(self.pdop),
            "fix" => self.fix_type = FixType::from_gpx(text).or(self.fix_type),
            "speed" => self.speed = text.parse().ok().or(self.speed),
            _ => {}
        }
    }

    fn finish(self) -> Option<TrackPoint> {
        let mut coordinates = self.coordinates?;
        let time = self.time?;
        if let Some(alt) = self.altitude {
            coordinates = coordinates.with_altitude(alt);
        }
        Some(TrackPoint {
            time,
            coordinates,
            n_satellites: self.n_satellites,
            hdop: self.hdop,
            pdop: self.pdop,
            fix_type: self.fix_type,
            speed: self.speed,
        })
    }
}

/// Streaming state machine collecting `trkpt` elements
#[derive(Default)]
struct PointParser {
    points: Vec<TrackPoint>,
    dropped: usize,
    current: Option<PendingPoint>,
    /// Element nesting below the current `trkpt`
    depth: usize,
    text: String,
}

impl PointParser {
    fn parse<R: Read>(&mut self, reader: R) -> Result<(), xml::reader::Error> {
        for event in EventReader::new(reader) {
            match event? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    if self.current.is_some() {
                        self.depth += 1;
                        self.text.clear();
                    } else if name.local_name == "trkpt" {
                        self.current = Some(PendingPoint::from_attributes(&attributes));
                        self.depth = 0;
                    }
                }
                XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                    if self.current.is_some() {
                        self.text.push_str(&text);
                    }
                }
                XmlEvent::EndElement { name } => {
                    if self.depth == 0 {
                        if let Some(pending) = self.current.take() {
                            match pending.finish() {
                                Some(point) => self.points.push(point),
                                None => self.dropped += 1,
                            }
                        }
                    } else {
                        if let Some(pending) = self.current.as_mut() {
                            pending.apply(&name.local_name, self.text.trim());
                        }
                        self.text.clear();
                        self.depth -= 1;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
