//! Geometric travel estimate (fallback when the map service is unavailable).
//!
//! Uses great-circle distance scaled by a road factor to estimate travel.
//! Less accurate than a routing engine (ignores the road network) but always
//! available.

use crate::config::DistanceConfig;
use crate::model::Coordinates;
use crate::traits::TravelLeg;

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Typical ratio between road and straight-line distance in cities.
const DEFAULT_ROAD_FACTOR: f64 = 1.3;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine-based travel estimator.
#[derive(Debug, Clone)]
pub struct GeometricEstimator {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
    /// Multiplier from straight-line to road distance.
    pub road_factor: f64,
}

impl Default for GeometricEstimator {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
            road_factor: DEFAULT_ROAD_FACTOR,
        }
    }
}

impl GeometricEstimator {
    pub fn new(speed_kmh: f64, road_factor: f64) -> Self {
        Self {
            speed_kmh,
            road_factor,
        }
    }

    pub fn from_config(config: &DistanceConfig) -> Self {
        Self::new(config.fallback_speed_kmh, config.road_factor)
    }

    /// Road distance and travel time between two points.
    pub fn estimate(&self, from: Coordinates, to: Coordinates) -> TravelLeg {
        let km = haversine_km(from, to) * self.road_factor;
        TravelLeg {
            distance_km: km,
            duration_secs: self.km_to_seconds(km),
        }
    }

    /// Convert distance in km to travel time in seconds.
    fn km_to_seconds(&self, km: f64) -> i64 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round() as i64
    }
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAS_VEGAS: Coordinates = Coordinates::new(36.17, -115.14);
    const LOS_ANGELES: Coordinates = Coordinates::new(34.05, -118.24);

    #[test]
    fn same_point_is_zero() {
        let dist = haversine_km(LAS_VEGAS, LAS_VEGAS);
        assert!(dist < 0.001, "Same point should have ~0 distance");
    }

    #[test]
    fn known_distance() {
        // Actual great-circle distance is ~370 km
        let dist = haversine_km(LAS_VEGAS, LOS_ANGELES);
        assert!(dist > 350.0 && dist < 400.0, "LV to LA should be ~370km, got {}", dist);
    }

    #[test]
    fn symmetric() {
        let estimator = GeometricEstimator::default();
        let there = estimator.estimate(LAS_VEGAS, LOS_ANGELES);
        let back = estimator.estimate(LOS_ANGELES, LAS_VEGAS);
        assert_eq!(there.duration_secs, back.duration_secs);
    }

    #[test]
    fn road_factor_scales_distance() {
        let straight = GeometricEstimator::new(40.0, 1.0).estimate(LAS_VEGAS, LOS_ANGELES);
        let road = GeometricEstimator::new(40.0, 1.5).estimate(LAS_VEGAS, LOS_ANGELES);
        assert!((road.distance_km / straight.distance_km - 1.5).abs() < 1e-9);
    }

    #[test]
    fn reasonable_travel_time() {
        let estimator = GeometricEstimator::new(40.0, 1.0);
        // 10 km at 40 km/h = 0.25 hours = 900 seconds
        assert_eq!(estimator.km_to_seconds(10.0), 900);
    }
}
