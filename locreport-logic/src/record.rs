use serde::{Deserialize, Serialize};

use crate::error::PositionError;

/// Mean earth radius in meters, used for great-circle distances
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Coordinates of a fix as reported by the platform
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters, platforms leave this out when they can't estimate it
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A raw geolocation fix as gotten from a platform location API, before normalization
pub struct Position {
    pub coords: Coordinates,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f64>, timestamp: i64) -> Self {
        Self {
            coords: Coordinates {
                latitude,
                longitude,
                accuracy,
            },
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Normalized location, every field is always populated
pub struct LocationRecord {
    /// Degrees, WGS84
    pub latitude: f64,
    /// Degrees, WGS84
    pub longitude: f64,
    /// Meters, 0 when the platform didn't know
    pub accuracy: f64,
    /// Milliseconds since the unix epoch, as supplied by the platform
    pub timestamp: i64,
}

impl LocationRecord {
    /// Normalize a platform [Position]. Missing, negative or non-finite accuracy becomes 0,
    /// a fix without finite coordinates is rejected.
    pub fn from_position(position: &Position) -> Result<Self, PositionError> {
        let Coordinates {
            latitude,
            longitude,
            accuracy,
        } = position.coords;

        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(PositionError::InvalidFix {
                latitude,
                longitude,
            });
        }

        let accuracy = accuracy
            .filter(|a| a.is_finite() && *a >= 0.0)
            .unwrap_or(0.0);

        Ok(Self {
            latitude,
            longitude,
            accuracy,
            timestamp: position.timestamp,
        })
    }

    pub fn distance_to(&self, other: &LocationRecord) -> f64 {
        distance_meters(
            (self.latitude, self.longitude),
            (other.latitude, other.longitude),
        )
    }
}

impl TryFrom<Position> for LocationRecord {
    type Error = PositionError;

    fn try_from(value: Position) -> Result<Self, Self::Error> {
        Self::from_position(&value)
    }
}

/// Haversine distance between two (lat, lon) pairs in degrees
pub fn distance_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}
