//! Test fixtures for the dispatch engine.
//!
//! - Builders for work orders and technicians with sensible defaults
//! - A Manhattan map service (1 unit of distance = 1 minute of travel)
//! - A map service that always fails, for the geometric fallback
//! - Real Las Vegas / Henderson locations

#![allow(dead_code)]

pub mod las_vegas_locations;

pub use las_vegas_locations::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fieldroute::config::EngineConfig;
use fieldroute::controller::OptimizationController;
use fieldroute::error::MapError;
use fieldroute::events::EngineEvent;
use fieldroute::model::{
    Coordinates, Route, ServiceDate, TechnicianProfile, TimeWindow, Timestamp, WorkOrderRequest,
    WorkingHours,
};
use fieldroute::traits::{EventSink, MapService, NullSink, TravelLeg};

pub const DAY: ServiceDate = ServiceDate(20_000);

pub fn hour(h: i64) -> Timestamp {
    DAY.midnight() + h * 3600
}

pub fn minutes(m: i64) -> i64 {
    m * 60
}

/// Builder for work-order submissions.
#[derive(Clone, Debug)]
pub struct TestWorkOrder {
    request: WorkOrderRequest,
}

impl TestWorkOrder {
    pub fn new(id: &str) -> Self {
        Self {
            request: WorkOrderRequest {
                id: id.to_string(),
                location: Some(Coordinates::new(0.0, 0.0)),
                required_skills: vec!["HVAC".to_string()],
                time_window: Some(TimeWindow::new(hour(8), hour(17))),
                duration_minutes: 30,
                priority: 1,
            },
        }
    }

    pub fn location(mut self, lat: f64, lng: f64) -> Self {
        self.request.location = Some(Coordinates::new(lat, lng));
        self
    }

    pub fn at(self, place: &Location) -> Self {
        self.location(place.lat, place.lng)
    }

    pub fn without_location(mut self) -> Self {
        self.request.location = None;
        self
    }

    pub fn requires(mut self, skills: &[&str]) -> Self {
        self.request.required_skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Window in whole hours on [`DAY`].
    pub fn window(mut self, from_hour: i64, to_hour: i64) -> Self {
        self.request.time_window = Some(TimeWindow::new(hour(from_hour), hour(to_hour)));
        self
    }

    pub fn window_secs(mut self, earliest: Timestamp, latest: Timestamp) -> Self {
        self.request.time_window = Some(TimeWindow::new(earliest, latest));
        self
    }

    pub fn duration(mut self, minutes: u32) -> Self {
        self.request.duration_minutes = minutes;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn build(self) -> WorkOrderRequest {
        self.request
    }
}

/// Builder for technician profiles.
#[derive(Clone, Debug)]
pub struct TestTechnician {
    profile: TechnicianProfile,
}

impl TestTechnician {
    pub fn new(id: &str) -> Self {
        Self {
            profile: TechnicianProfile {
                id: id.to_string(),
                location: Coordinates::new(0.0, 0.0),
                skills: vec!["HVAC".to_string(), "ELECTRICAL".to_string(), "PLUMBING".to_string()],
                working_hours: WorkingHours::new(8 * 3600, 17 * 3600),
                max_jobs_per_day: 8,
            },
        }
    }

    pub fn location(mut self, lat: f64, lng: f64) -> Self {
        self.profile.location = Coordinates::new(lat, lng);
        self
    }

    pub fn at(self, place: &Location) -> Self {
        self.location(place.lat, place.lng)
    }

    pub fn skills(mut self, skills: &[&str]) -> Self {
        self.profile.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn hours(mut self, start_hour: i64, end_hour: i64) -> Self {
        self.profile.working_hours = WorkingHours::new(start_hour * 3600, end_hour * 3600);
        self
    }

    pub fn max_jobs(mut self, max: u32) -> Self {
        self.profile.max_jobs_per_day = max;
        self
    }

    pub fn build(self) -> TechnicianProfile {
        self.profile
    }
}

/// Manhattan distance map (simple, predictable).
///
/// 1 unit of distance = 1 minute of travel.
pub struct ManhattanMap;

impl MapService for ManhattanMap {
    fn distance_duration(&self, from: Coordinates, to: Coordinates) -> Result<TravelLeg, MapError> {
        let dist = (from.lat - to.lat).abs() + (from.lng - to.lng).abs();
        Ok(TravelLeg {
            distance_km: dist,
            duration_secs: (dist * 60.0).round() as i64,
        })
    }
}

/// Map service that is always down.
#[derive(Default)]
pub struct FailingMap {
    pub calls: AtomicUsize,
}

impl MapService for FailingMap {
    fn distance_duration(&self, _from: Coordinates, _to: Coordinates) -> Result<TravelLeg, MapError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MapError::Unavailable("connection refused".to_string()))
    }
}

/// Config for Manhattan-scale coordinates: a radius wide enough for whole
/// degrees and no retry backoff.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default().with_skills(["HVAC", "ELECTRICAL", "PLUMBING"]);
    config.candidates.service_radius_km = 5_000.0;
    config.distance.retry_backoff_ms = 0;
    config
}

pub fn engine() -> OptimizationController {
    engine_with(test_config(), Some(Arc::new(ManhattanMap)), Arc::new(NullSink))
}

pub fn engine_with(
    config: EngineConfig,
    map: Option<Arc<dyn MapService>>,
    events: Arc<dyn EventSink>,
) -> OptimizationController {
    OptimizationController::new(config, map, events).unwrap()
}

/// Engine whose events land on the returned receiver.
pub fn engine_with_events() -> (OptimizationController, flume::Receiver<EngineEvent>) {
    let (sender, receiver) = flume::unbounded();
    let engine = engine_with(test_config(), Some(Arc::new(ManhattanMap)), Arc::new(sender));
    (engine, receiver)
}

pub fn stop_ids(route: &Route) -> Vec<&str> {
    route.stops.iter().map(|stop| stop.work_order_id.0.as_str()).collect()
}

pub fn route_json(route: &Route) -> String {
    serde_json::to_string(route).unwrap()
}

/// Hard route constraints: ordering with travel, durations, working hours.
pub fn assert_route_feasible(route: &Route, hours: WorkingHours) {
    let shift = hours.on(route.date);
    let mut ready = shift.start;
    for stop in &route.stops {
        assert!(
            stop.arrival >= ready + stop.travel_secs,
            "{} starts before travel from the previous stop completes",
            stop.work_order_id
        );
        assert_eq!(stop.departure, stop.arrival + stop.duration_secs);
        assert!(stop.departure <= shift.end, "{} ends after working hours", stop.work_order_id);
        assert!(stop.arrival >= stop.window.earliest);
        let late_by = stop.departure - stop.window.latest;
        if late_by > 0 {
            assert_eq!(stop.breach.map(|b| b.late_by_secs), Some(late_by));
        }
        ready = stop.departure;
    }
}
