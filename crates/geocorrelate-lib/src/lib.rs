//! Geocorrelate Library - GPS track loading and timestamp correlation
//!
//! This library reads GPX track logs and assigns geographic positions to
//! timestamped items (typically photos) by matching them against the loaded
//! tracks, either exactly or by linear interpolation between track points.
//!
//! # Architecture
//!
//! - **[`GeoCoordinates`]**: Latitude/longitude with optional altitude
//! - **[`Track`]**: One loaded track log, points sorted by time
//! - **[`reader`]**: GPX-like XML to [`Track`], failures reported as data
//! - **[`TrackManager`]**: Parallel loading, track identity and colors
//! - **[`TrackCorrelator`]**: Background correlation streamed in batches
//!
//! # Concurrency
//!
//! Loading and correlation run on the rayon thread pool and never block the
//! caller. Progress arrives over channels: [`TrackLoad`] for a load,
//! [`CorrelationRun`] for a correlation. The terminal event of each is always
//! the last one sent.

mod coordinates;
mod correlator;
mod manager;
pub mod reader;
mod track;

// Public API exports
pub use coordinates::GeoCoordinates;
pub use correlator::{
    Correlation, CorrelationEvent, CorrelationFlags, CorrelationOptions, CorrelationOutcome,
    CorrelationRun, DEFAULT_BATCH_SIZE, MatchKind, TrackCorrelator, correlate_item,
};
pub use manager::{LoadError, LoadSummary, TrackLoad, TrackManager, TrackManagerEvent};
pub use reader::{TrackReadError, TrackReadResult};
pub use track::{FixType, Track, TrackColor, TrackId, TrackPoint};

/// Invalid geographic input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("Latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("Longitude out of range: {0}")]
    LongitudeOutOfRange(f64),
}

/// Error types for the correlator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    #[error("A correlation is already running")]
    AlreadyRunning,
}

/// Result type for correlator operations
pub type Result<T> = std::result::Result<T, CorrelatorError>;
