//! Domain model for dispatch: work orders, technicians, routes and the
//! work-order lifecycle.
//!
//! # Time model
//! Timestamps are seconds since the Unix epoch (UTC). A [`ServiceDate`] is a
//! day number; working hours are seconds from midnight and become an
//! absolute shift on a given date. Intervals are half-open `[start, end)`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::skills::{SkillCatalog, SkillSet};

pub type Timestamp = i64;

pub const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkOrderId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TechnicianId(pub String);

impl WorkOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl TechnicianId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for WorkOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TechnicianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic location in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<(f64, f64)> for Coordinates {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

/// Day number since the Unix epoch; one scheduling period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceDate(pub i64);

impl ServiceDate {
    pub fn of(timestamp: Timestamp) -> Self {
        Self(timestamp.div_euclid(SECONDS_PER_DAY))
    }

    pub fn midnight(&self) -> Timestamp {
        self.0 * SECONDS_PER_DAY
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn span(&self) -> Interval {
        Interval::new(self.midnight(), self.midnight() + SECONDS_PER_DAY)
    }
}

impl fmt::Display for ServiceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "day {}", self.0)
    }
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub const fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let clipped = Interval::new(self.start.max(other.start), self.end.min(other.end));
        (!clipped.is_empty()).then_some(clipped)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Committed service window of a work order.
///
/// Service starts at or after `earliest` and departs at or before `latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: Timestamp,
    pub latest: Timestamp,
}

impl TimeWindow {
    pub const fn new(earliest: Timestamp, latest: Timestamp) -> Self {
        Self { earliest, latest }
    }

    pub fn as_interval(&self) -> Interval {
        Interval::new(self.earliest, self.latest)
    }

    /// Service dates the window touches, capped at `horizon_days`.
    pub fn service_dates(&self, horizon_days: u32) -> Vec<ServiceDate> {
        let first = ServiceDate::of(self.earliest);
        let last = ServiceDate::of(self.latest - 1);
        (first.0..=last.0)
            .take(horizon_days.max(1) as usize)
            .map(ServiceDate)
            .collect()
    }
}

/// Daily working hours, seconds from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start_secs: i64,
    pub end_secs: i64,
}

impl WorkingHours {
    pub const fn new(start_secs: i64, end_secs: i64) -> Self {
        Self {
            start_secs,
            end_secs,
        }
    }

    pub fn on(&self, date: ServiceDate) -> Interval {
        Interval::new(date.midnight() + self.start_secs, date.midnight() + self.end_secs)
    }

    pub fn length_secs(&self) -> i64 {
        self.end_secs - self.start_secs
    }
}

/// Work order as supplied by the source system, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrderRequest {
    pub id: String,
    pub location: Option<Coordinates>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub time_window: Option<TimeWindow>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub priority: u8,
}

/// Validated engine projection of a work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub location: Coordinates,
    pub required_skills: SkillSet,
    pub window: TimeWindow,
    pub duration_secs: i64,
    /// Higher is more urgent.
    pub priority: u8,
}

impl WorkOrder {
    /// Ingress validation. Anything rejected here never enters the pool.
    pub fn from_request(request: &WorkOrderRequest, catalog: &SkillCatalog) -> Result<Self> {
        let id = request.id.trim();
        if id.is_empty() {
            return Err(EngineError::invalid_work_order("<empty>", "missing id"));
        }
        let location = request
            .location
            .ok_or_else(|| EngineError::invalid_work_order(id, "missing location"))?;
        if !location.is_valid() {
            return Err(EngineError::invalid_work_order(id, "location out of range"));
        }
        if request.required_skills.is_empty() {
            return Err(EngineError::invalid_work_order(id, "missing required skills"));
        }
        let required_skills = catalog
            .parse(&request.required_skills)
            .map_err(|err| EngineError::invalid_work_order(id, err.to_string()))?;
        let window = request
            .time_window
            .ok_or_else(|| EngineError::invalid_work_order(id, "missing time window"))?;
        if window.latest <= window.earliest {
            return Err(EngineError::invalid_work_order(id, "time window is empty"));
        }
        if request.duration_minutes == 0 {
            return Err(EngineError::invalid_work_order(id, "duration must be positive"));
        }
        let duration_secs = i64::from(request.duration_minutes) * 60;
        if duration_secs > window.latest - window.earliest {
            return Err(EngineError::invalid_work_order(
                id,
                "duration does not fit in the time window",
            ));
        }

        Ok(Self {
            id: WorkOrderId::new(id),
            location,
            required_skills,
            window,
            duration_secs,
            priority: request.priority,
        })
    }
}

/// Technician as supplied by the registry, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicianProfile {
    pub id: String,
    pub location: Coordinates,
    pub skills: Vec<String>,
    pub working_hours: WorkingHours,
    pub max_jobs_per_day: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technician {
    pub id: TechnicianId,
    /// Base location; every day's route starts here.
    pub location: Coordinates,
    pub skills: SkillSet,
    pub working_hours: WorkingHours,
    pub max_jobs_per_day: u32,
}

impl Technician {
    pub fn from_profile(profile: &TechnicianProfile, catalog: &SkillCatalog) -> Result<Self> {
        let id = profile.id.trim();
        if id.is_empty() {
            return Err(EngineError::invalid_technician("<empty>", "missing id"));
        }
        if !profile.location.is_valid() {
            return Err(EngineError::invalid_technician(id, "location out of range"));
        }
        let hours = profile.working_hours;
        if hours.start_secs < 0 || hours.end_secs > SECONDS_PER_DAY || hours.end_secs <= hours.start_secs {
            return Err(EngineError::invalid_technician(id, "working hours must lie within one day"));
        }
        if profile.max_jobs_per_day == 0 {
            return Err(EngineError::invalid_technician(id, "max jobs per day must be positive"));
        }
        let skills = catalog
            .parse(&profile.skills)
            .map_err(|err| EngineError::invalid_technician(id, err.to_string()))?;

        Ok(Self {
            id: TechnicianId::new(id),
            location: profile.location,
            skills,
            working_hours: hours,
            max_jobs_per_day: profile.max_jobs_per_day,
        })
    }

    pub fn shift(&self, date: ServiceDate) -> Interval {
        self.working_hours.on(date)
    }

    pub fn can_perform(&self, order: &WorkOrder) -> bool {
        self.skills.is_superset_of(&order.required_skills)
    }
}

/// Where a distance/duration estimate came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    /// Produced by the external map service.
    #[default]
    Exact,
    /// Produced by the local geometric fallback.
    Degraded,
}

impl Accuracy {
    pub fn worst(self, other: Accuracy) -> Accuracy {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Accuracy::Exact => "exact",
            Accuracy::Degraded => "degraded",
        }
    }
}

/// Recorded lateness past a work order's window, within the configured grace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBreach {
    pub late_by_secs: i64,
}

/// One committed stop on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub work_order_id: WorkOrderId,
    pub location: Coordinates,
    pub window: TimeWindow,
    pub duration_secs: i64,
    pub priority: u8,
    pub skills: SkillSet,
    /// Planned service start.
    pub arrival: Timestamp,
    /// `arrival + duration_secs`.
    pub departure: Timestamp,
    /// Travel from the previous stop (or the base for the first stop).
    pub travel_secs: i64,
    pub travel_km: f64,
    pub accuracy: Accuracy,
    pub breach: Option<WindowBreach>,
    /// Work already done. A completed stop keeps its position and times.
    #[serde(default)]
    pub completed: bool,
}

impl Stop {
    /// Unscheduled stop for a work order; times are filled in by the sequencer.
    pub fn for_order(order: &WorkOrder) -> Self {
        Self {
            work_order_id: order.id.clone(),
            location: order.location,
            window: order.window,
            duration_secs: order.duration_secs,
            priority: order.priority,
            skills: order.required_skills,
            arrival: 0,
            departure: 0,
            travel_secs: 0,
            travel_km: 0.0,
            accuracy: Accuracy::Exact,
            breach: None,
            completed: false,
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.arrival, self.departure)
    }
}

/// Ordered stops of one technician for one service date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub technician_id: TechnicianId,
    pub date: ServiceDate,
    pub stops: Vec<Stop>,
}

impl Route {
    pub fn empty(technician_id: TechnicianId, date: ServiceDate) -> Self {
        Self {
            technician_id,
            date,
            stops: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn total_travel_secs(&self) -> i64 {
        self.stops.iter().map(|stop| stop.travel_secs).sum()
    }

    pub fn total_travel_km(&self) -> f64 {
        self.stops.iter().map(|stop| stop.travel_km).sum()
    }

    pub fn busy_secs(&self) -> i64 {
        self.stops
            .iter()
            .map(|stop| stop.duration_secs + stop.travel_secs)
            .sum()
    }

    /// Number of leading stops that must not be reordered: everything up to
    /// and including the last completed stop.
    pub fn frozen_len(&self) -> usize {
        self.stops
            .iter()
            .rposition(|stop| stop.completed)
            .map_or(0, |last| last + 1)
    }

    pub fn position_of(&self, id: &WorkOrderId) -> Option<usize> {
        self.stops.iter().position(|stop| &stop.work_order_id == id)
    }

    /// Assignment view of the stop at `position`. Accuracy is the worse of
    /// the legs into and out of the stop.
    pub fn assignment_at(&self, position: usize) -> Option<Assignment> {
        let stop = self.stops.get(position)?;
        let leg_out = self
            .stops
            .get(position + 1)
            .map_or(Accuracy::Exact, |next| next.accuracy);
        Some(Assignment {
            technician_id: self.technician_id.clone(),
            date: self.date,
            position,
            arrival: stop.arrival,
            departure: stop.departure,
            accuracy: stop.accuracy.worst(leg_out),
            breach: stop.breach,
        })
    }

    pub fn worst_accuracy(&self) -> Accuracy {
        self.stops
            .iter()
            .fold(Accuracy::Exact, |acc, stop| acc.worst(stop.accuracy))
    }
}

/// Lifecycle state of a work order inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Unassigned,
    TentativelyAssigned,
    Committed,
    Completed,
    Cancelled,
    Unschedulable,
}

impl WorkOrderStatus {
    pub fn can_transition_to(self, next: WorkOrderStatus) -> bool {
        use WorkOrderStatus::*;
        matches!(
            (self, next),
            (Unassigned, TentativelyAssigned | Unschedulable | Cancelled)
                | (TentativelyAssigned, Committed | Unassigned | Unschedulable | Cancelled)
                | (Committed, Completed | Cancelled | TentativelyAssigned)
                | (Unschedulable, Unassigned | Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkOrderStatus::Completed | WorkOrderStatus::Cancelled)
    }

    /// Waiting in the unassigned pool.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            WorkOrderStatus::Unassigned | WorkOrderStatus::TentativelyAssigned
        )
    }
}

/// Why a work order is not (or no longer) on a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoFeasibleCandidate,
    NoFeasibleInsertion,
    ConcurrentModification,
    TechnicianUnavailable,
    DisplacedByUrgent,
    WorkOrderUpdated,
    RouteResequenced,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NoFeasibleCandidate => "NO_FEASIBLE_CANDIDATE",
            ReasonCode::NoFeasibleInsertion => "NO_FEASIBLE_INSERTION",
            ReasonCode::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ReasonCode::TechnicianUnavailable => "TECHNICIAN_UNAVAILABLE",
            ReasonCode::DisplacedByUrgent => "DISPLACED_BY_URGENT",
            ReasonCode::WorkOrderUpdated => "WORK_ORDER_UPDATED",
            ReasonCode::RouteResequenced => "ROUTE_RESEQUENCED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active assignment of a work order to a technician's route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub technician_id: TechnicianId,
    pub date: ServiceDate,
    pub position: usize,
    pub arrival: Timestamp,
    pub departure: Timestamp,
    pub accuracy: Accuracy,
    pub breach: Option<WindowBreach>,
}

/// Answer returned to callers of the service façade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub work_order_id: WorkOrderId,
    pub status: WorkOrderStatus,
    pub technician_id: Option<TechnicianId>,
    pub service_date: Option<ServiceDate>,
    pub route_position: Option<usize>,
    pub planned_arrival: Option<Timestamp>,
    pub accuracy: Option<Accuracy>,
    pub breach: Option<WindowBreach>,
    pub reason: Option<ReasonCode>,
}

impl AssignmentResult {
    pub fn pending(id: WorkOrderId, status: WorkOrderStatus, reason: Option<ReasonCode>) -> Self {
        Self {
            work_order_id: id,
            status,
            technician_id: None,
            service_date: None,
            route_position: None,
            planned_arrival: None,
            accuracy: None,
            breach: None,
            reason,
        }
    }

    pub fn committed(id: WorkOrderId, assignment: &Assignment) -> Self {
        Self {
            work_order_id: id,
            status: WorkOrderStatus::Committed,
            technician_id: Some(assignment.technician_id.clone()),
            service_date: Some(assignment.date),
            route_position: Some(assignment.position),
            planned_arrival: Some(assignment.arrival),
            accuracy: Some(assignment.accuracy),
            breach: assignment.breach,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SkillCatalog {
        SkillCatalog::new(["HVAC", "ELECTRICAL"]).unwrap()
    }

    fn request() -> WorkOrderRequest {
        WorkOrderRequest {
            id: "wo-1".to_string(),
            location: Some(Coordinates::new(36.1, -115.1)),
            required_skills: vec!["hvac".to_string()],
            time_window: Some(TimeWindow::new(8 * 3600, 12 * 3600)),
            duration_minutes: 45,
            priority: 3,
        }
    }

    #[test]
    fn valid_request_is_accepted() {
        let order = WorkOrder::from_request(&request(), &catalog()).unwrap();
        assert_eq!(order.id, WorkOrderId::new("wo-1"));
        assert_eq!(order.duration_secs, 45 * 60);
        assert_eq!(order.required_skills.len(), 1);
    }

    #[test]
    fn missing_fields_are_rejected_at_ingress() {
        let catalog = catalog();

        let mut no_location = request();
        no_location.location = None;
        assert!(matches!(
            WorkOrder::from_request(&no_location, &catalog),
            Err(EngineError::InvalidWorkOrder { .. })
        ));

        let mut no_skills = request();
        no_skills.required_skills.clear();
        assert!(WorkOrder::from_request(&no_skills, &catalog).is_err());

        let mut no_window = request();
        no_window.time_window = None;
        assert!(WorkOrder::from_request(&no_window, &catalog).is_err());

        let mut unknown_skill = request();
        unknown_skill.required_skills = vec!["welding".to_string()];
        assert!(WorkOrder::from_request(&unknown_skill, &catalog).is_err());

        let mut too_long = request();
        too_long.duration_minutes = 5 * 60;
        assert!(WorkOrder::from_request(&too_long, &catalog).is_err());
    }

    #[test]
    fn lifecycle_transitions() {
        use WorkOrderStatus::*;
        assert!(Unassigned.can_transition_to(TentativelyAssigned));
        assert!(TentativelyAssigned.can_transition_to(Committed));
        assert!(Committed.can_transition_to(TentativelyAssigned));
        assert!(Unschedulable.can_transition_to(Unassigned));
        assert!(!Unassigned.can_transition_to(Committed));
        assert!(!Cancelled.can_transition_to(Unassigned));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn window_service_dates() {
        let window = TimeWindow::new(SECONDS_PER_DAY + 3600, 3 * SECONDS_PER_DAY);
        assert_eq!(window.service_dates(7), vec![ServiceDate(1), ServiceDate(2)]);
        assert_eq!(window.service_dates(1), vec![ServiceDate(1)]);
    }

    #[test]
    fn reason_codes_serialize_screaming() {
        let json = serde_json::to_string(&ReasonCode::NoFeasibleCandidate).unwrap();
        assert_eq!(json, "\"NO_FEASIBLE_CANDIDATE\"");
        assert_eq!(serde_json::to_string(&Accuracy::Degraded).unwrap(), "\"degraded\"");
    }
}
