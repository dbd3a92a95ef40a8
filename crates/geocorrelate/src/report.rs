//! Text output of a correlation

use crate::items::Item;
use geocorrelate_lib::{Correlation, MatchKind, Track};

/// Tab separated line for a resolved item
pub fn format_match(item: &Item, correlation: &Correlation<usize>) -> String {
    let (lat, lon, alt) = match correlation.coordinates {
        Some(c) => (
            format!("{:.7}", c.lat()),
            format!("{:.7}", c.lon()),
            c.alt().map_or_else(|| "-".to_string(), |alt| format!("{alt:.1}")),
        ),
        None => ("-".to_string(), "-".to_string(), "-".to_string()),
    };
    let kind = match correlation.flags.kind {
        MatchKind::Exact => "exact",
        MatchKind::Interpolated => "interpolated",
        MatchKind::None => "none",
    };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        correlation.user_data, item.label, lat, lon, alt, kind
    )
}

/// One-line description of a loaded track
pub fn format_track(track: &Track) -> String {
    let range = track
        .time_range()
        .map(|(start, end)| format!("{} .. {}", start.to_rfc3339(), end.to_rfc3339()))
        .unwrap_or_else(|| "no points".to_string());
    format!(
        "{} {}: {} points, {:.2} km, {}",
        track.id(),
        track.source().display(),
        track.len(),
        track.total_distance() / 1000.0,
        range
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use geocorrelate_lib::{CorrelationFlags, GeoCoordinates, TrackPoint};

    fn item() -> Item {
        Item {
            label: "2021-05-01T08:00:00".to_string(),
            date_time: NaiveDate::from_ymd_opt(2021, 5, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_format_exact_match() {
        let mut correlation = Correlation::new(item().date_time, 3);
        correlation.coordinates = Some(GeoCoordinates::new(48.1, 11.5).unwrap().with_altitude(520.0));
        correlation.flags = CorrelationFlags {
            kind: MatchKind::Exact,
            has_altitude: true,
        };
        assert_eq!(
            format_match(&item(), &correlation),
            "3\t2021-05-01T08:00:00\t48.1000000\t11.5000000\t520.0\texact"
        );
    }

    #[test]
    fn test_format_without_altitude() {
        let mut correlation = Correlation::new(item().date_time, 0);
        correlation.coordinates = Some(GeoCoordinates::new(-33.5, 151.25).unwrap());
        correlation.flags.kind = MatchKind::Interpolated;
        let line = format_match(&item(), &correlation);
        assert!(line.ends_with("\t-33.5000000\t151.2500000\t-\tinterpolated"));
    }

    #[test]
    fn test_format_track() {
        let track = Track::new(
            "walk.gpx",
            vec![TrackPoint::new(
                Utc.with_ymd_and_hms(2021, 5, 1, 8, 0, 0).unwrap(),
                GeoCoordinates::new(48.1, 11.5).unwrap(),
            )],
        );
        let line = format_track(&track);
        assert!(line.contains("walk.gpx: 1 points"));
        assert!(line.contains("2021-05-01T08:00:00+00:00"));
    }
}
