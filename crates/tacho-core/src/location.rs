use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{CoordinateError, LocatorError};
use crate::ids::ParkingId;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 coordinate pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point, rejecting out-of-range or non-finite coordinates.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// The slice of a truck park the break advisory hands back to the driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParkingSummary {
    pub id: ParkingId,
    pub name: String,
    pub address: Option<String>,
    pub country: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
    pub total_spaces: Option<i64>,
    pub has_security: bool,
    pub has_showers: bool,
    pub price_per_night_eur: Option<f64>,
    pub is_free: bool,
}

/// Nearest-parking lookup. Best-effort: callers must tolerate failure.
#[async_trait]
pub trait ParkingLocator: Send + Sync {
    fn name(&self) -> &str;

    async fn find_nearest_parking(
        &self,
        point: GeoPoint,
        radius_km: f64,
    ) -> Result<Option<ParkingSummary>, LocatorError>;
}

/// Locator used when lookups are switched off.
pub struct NoopParkingLocator;

#[async_trait]
impl ParkingLocator for NoopParkingLocator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn find_nearest_parking(
        &self,
        _point: GeoPoint,
        _radius_km: f64,
    ) -> Result<Option<ParkingSummary>, LocatorError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_point_validates_ranges() {
        assert!(GeoPoint::new(52.2, 11.0).is_ok());
        assert_eq!(GeoPoint::new(91.0, 0.0), Err(CoordinateError::Latitude(91.0)));
        assert_eq!(GeoPoint::new(0.0, -181.0), Err(CoordinateError::Longitude(-181.0)));
        assert!(matches!(GeoPoint::new(f64::NAN, 0.0), Err(CoordinateError::Latitude(_))));
        assert_eq!(
            GeoPoint::new(10.0, 200.0).unwrap_err().to_string(),
            "longitude out of range: 200"
        );
    }

    #[test]
    fn distance_zero_for_same_point() {
        let p = GeoPoint::new(52.2167, 11.0167).unwrap();
        assert!(p.distance_km(&p) < 1e-9);
    }

    #[test]
    fn distance_helmstedt_to_peine() {
        let helmstedt = GeoPoint::new(52.2167, 11.0167).unwrap();
        let peine = GeoPoint::new(52.3167, 10.2333).unwrap();
        let d = helmstedt.distance_km(&peine);
        assert!((50.0..60.0).contains(&d), "got {d}");
        assert!((d - peine.distance_km(&helmstedt)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn noop_locator_finds_nothing() {
        let point = GeoPoint::new(50.0, 8.0).unwrap();
        let result = NoopParkingLocator.find_nearest_parking(point, 50.0).await.unwrap();
        assert!(result.is_none());
    }
}
