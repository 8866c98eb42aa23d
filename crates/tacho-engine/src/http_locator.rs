use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use tacho_core::errors::LocatorError;
use tacho_core::location::{GeoPoint, ParkingLocator, ParkingSummary};

#[derive(Deserialize)]
struct ParkingsResponse {
    parkings: Vec<ParkingSummary>,
}

/// Nearest-parking lookups against a remote parking service.
///
/// Calls `GET {base_url}/parking?lat=..&lng=..&radius_km=..`, which answers
/// `{"parkings": [...]}` ordered by distance.
pub struct HttpParkingLocator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpParkingLocator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("tacho/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn classify(&self, e: reqwest::Error) -> LocatorError {
        if e.is_timeout() {
            LocatorError::Timeout(self.timeout)
        } else if e.is_decode() {
            LocatorError::InvalidResponse(e.to_string())
        } else {
            LocatorError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl ParkingLocator for HttpParkingLocator {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn find_nearest_parking(
        &self,
        point: GeoPoint,
        radius_km: f64,
    ) -> Result<Option<ParkingSummary>, LocatorError> {
        let response = self
            .client
            .get(format!("{}/parking", self.base_url))
            .query(&[
                ("lat", point.lat.to_string()),
                ("lng", point.lng.to_string()),
                ("radius_km", radius_km.to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LocatorError::Unavailable(format!(
                "parking service returned {status}"
            )));
        }

        let body: ParkingsResponse = response.json().await.map_err(|e| self.classify(e))?;
        debug!(results = body.parkings.len(), "parking service answered");
        Ok(body.parkings.into_iter().next())
    }
}
