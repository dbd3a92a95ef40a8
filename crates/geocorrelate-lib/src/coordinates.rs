//! Geographic coordinate value type
//!
//! [`GeoCoordinates`] is the position carried by track points and by
//! correlation results: WGS84 latitude/longitude in degrees with an optional
//! altitude in meters.

use crate::GeoError;
use geo::Point;

/// Earth's mean radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// An immutable geographic position
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoCoordinates {
    lat: f64,
    lon: f64,
    alt: Option<f64>,
}

impl GeoCoordinates {
    /// Create coordinates from latitude and longitude in degrees
    ///
    /// # Returns
    /// An error if either value is not finite or outside its valid range
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeoError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(GeoError::LongitudeOutOfRange(lon));
        }
        Ok(Self {
            lat,
            lon,
            alt: None,
        })
    }

    /// Same position with the given altitude in meters
    #[inline]
    pub fn with_altitude(self, alt: f64) -> Self {
        Self {
            alt: Some(alt),
            ..self
        }
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[inline]
    pub fn lon(&self) -> f64 {
        self.lon
    }

    #[inline]
    pub fn alt(&self) -> Option<f64> {
        self.alt
    }

    #[inline]
    pub fn has_altitude(&self) -> bool {
        self.alt.is_some()
    }

    /// Position on the straight line from `self` to `other` at `fraction` (0.0 to 1.0)
    ///
    /// Altitude is only interpolated when both ends carry one.
    pub fn lerp(&self, other: &GeoCoordinates, fraction: f64) -> GeoCoordinates {
        let alt = match (self.alt, other.alt) {
            (Some(a), Some(b)) => Some(a + fraction * (b - a)),
            _ => None,
        };
        GeoCoordinates {
            lat: self.lat + fraction * (other.lat - self.lat),
            lon: self.lon + fraction * (other.lon - self.lon),
            alt,
        }
    }

    /// Great-circle distance to `other` in meters (Haversine formula)
    pub fn distance_to(&self, other: &GeoCoordinates) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

impl From<GeoCoordinates> for Point<f64> {
    /// Converts to a `geo` point (x = longitude, y = latitude)
    fn from(coordinates: GeoCoordinates) -> Self {
        Point::new(coordinates.lon, coordinates.lat)
    }
}

impl TryFrom<Point<f64>> for GeoCoordinates {
    type Error = GeoError;

    fn try_from(point: Point<f64>) -> Result<Self, Self::Error> {
        GeoCoordinates::new(point.y(), point.x())
    }
}
