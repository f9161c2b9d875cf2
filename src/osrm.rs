//! OSRM HTTP adapter for point-to-point travel estimates.

use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::model::Coordinates;
use crate::traits::{MapService, TravelLeg};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn route_url(&self, from: Coordinates, to: Coordinates) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=false",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            from.lng,
            from.lat,
            to.lng,
            to.lat
        )
    }
}

impl MapService for OsrmClient {
    fn distance_duration(&self, from: Coordinates, to: Coordinates) -> Result<TravelLeg, MapError> {
        let body = self
            .client
            .get(self.route_url(from, to))
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmRouteResponse>())?;

        if body.code != "Ok" {
            return Err(MapError::Unavailable(format!("OSRM answered {}", body.code)));
        }

        let route = body.routes.into_iter().next().ok_or(MapError::NoRoute)?;
        Ok(TravelLeg {
            distance_km: route.distance / 1000.0,
            duration_secs: route.duration.round() as i64,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    /// Meters.
    distance: f64,
    /// Seconds.
    duration: f64,
}
