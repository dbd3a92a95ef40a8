use clap::Parser;
use geocorrelate_lib::{CorrelationOptions, DEFAULT_BATCH_SIZE};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Geocorrelate - assign GPS positions to timestamps using GPX track logs
pub struct Settings {
    /// GPX track files to correlate against
    #[clap(short, long = "track", value_name = "FILE", required = true)]
    pub tracks: Vec<PathBuf>,

    /// File with one item timestamp per line (blank lines and # comments are skipped)
    #[clap(short, long, value_name = "FILE")]
    pub items: Option<PathBuf>,

    /// Item timestamps, e.g. 2021-05-01T08:00:00 or "2021:05:01 08:00:00"
    #[clap(value_name = "TIMESTAMP")]
    pub timestamps: Vec<String>,

    /// Interpolate positions between track points
    #[clap(long)]
    pub interpolate: bool,

    /// Largest gap in seconds between two track points that may be interpolated
    #[clap(long, default_value_t = 30)]
    pub max_gap: i64,

    /// Seconds added to every item timestamp to correct camera clock drift
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    pub offset: i64,

    /// UTC offset in seconds of the clock that produced the timestamps
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    pub timezone_offset: i64,

    /// Largest difference in whole seconds still treated as an exact match
    #[clap(long, default_value_t = 0)]
    pub tolerance: i64,

    /// Number of items per result batch
    #[clap(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Enable debug logging (overridden by RUST_LOG)
    #[clap(short, long)]
    pub verbose: bool,
}

impl Settings {
    /// Parse settings from the command line, exiting on error
    pub fn from_cli() -> Self {
        Settings::parse()
    }

    pub fn correlation_options(&self) -> CorrelationOptions {
        CorrelationOptions {
            interpolate: self.interpolate,
            max_gap_time: self.max_gap,
            seconds_offset: self.offset,
            time_zone_offset: self.timezone_offset,
            exact_match_tolerance: self.tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["geocorrelate", "-t", "a.gpx"]).unwrap();
        assert_eq!(settings.tracks, vec![PathBuf::from("a.gpx")]);
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);

        let options = settings.correlation_options();
        assert!(!options.interpolate);
        assert_eq!(options.max_gap_time, 30);
        assert_eq!(options.seconds_offset, 0);
    }

    #[test]
    fn test_options_mapping() {
        let settings = Settings::try_parse_from([
            "geocorrelate",
            "--track",
            "a.gpx",
            "--track",
            "b.gpx",
            "--interpolate",
            "--max-gap",
            "120",
            "--offset",
            "-15",
            "--timezone-offset",
            "3600",
            "--tolerance",
            "2",
            "2021-05-01T08:00:00",
        ])
        .unwrap();

        assert_eq!(settings.tracks.len(), 2);
        assert_eq!(settings.timestamps, vec!["2021-05-01T08:00:00".to_string()]);

        let options = settings.correlation_options();
        assert!(options.interpolate);
        assert_eq!(options.max_gap_time, 120);
        assert_eq!(options.seconds_offset, -15);
        assert_eq!(options.time_zone_offset, 3600);
        assert_eq!(options.exact_match_tolerance, 2);
    }

    #[test]
    fn test_track_is_required() {
        assert!(Settings::try_parse_from(["geocorrelate", "2021-05-01T08:00:00"]).is_err());
    }
}
