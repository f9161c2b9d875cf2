//! Candidate generation: which technicians could take a work order, and in
//! what order to try them.
//!
//! Filters are skills, service-area radius, daily capacity and a free slot
//! inside the order's window. Survivors are ranked by estimated extra travel
//! plus a load penalty. Every candidate carries the snapshot it was judged
//! on, so the optimizer sequences and commits against that exact version.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::availability::{AvailabilityIndex, DaySnapshot};
use crate::config::{CandidateConfig, ObjectiveWeights};
use crate::distance::DistanceEstimator;
use crate::haversine::haversine_km;
use crate::model::{Coordinates, ServiceDate, Technician, TechnicianId, WorkOrder};
use crate::skills::SkillSet;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub snapshot: DaySnapshot,
    pub score: f64,
    pub estimated_detour_secs: i64,
    pub committed_stops: usize,
    pub slack_secs: i64,
}

impl Candidate {
    pub fn technician_id(&self) -> &TechnicianId {
        &self.snapshot.technician.id
    }

    pub fn date(&self) -> ServiceDate {
        self.snapshot.date
    }
}

pub struct CandidateGenerator<'a> {
    index: &'a AvailabilityIndex,
    estimator: &'a DistanceEstimator,
    config: &'a CandidateConfig,
    weights: &'a ObjectiveWeights,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(
        index: &'a AvailabilityIndex,
        estimator: &'a DistanceEstimator,
        config: &'a CandidateConfig,
        weights: &'a ObjectiveWeights,
    ) -> Self {
        Self {
            index,
            estimator,
            config,
            weights,
        }
    }

    /// Ranked feasible candidates. Empty is a normal outcome.
    pub fn candidates(&self, order: &WorkOrder) -> Vec<Candidate> {
        self.generate(order, true)
    }

    /// Candidates by skills and service area only, ignoring current load.
    /// Used to look for displaceable work when an urgent order arrives.
    pub fn relaxed_candidates(&self, order: &WorkOrder) -> Vec<Candidate> {
        self.generate(order, false)
    }

    /// Whether any registered technician has these skills at all.
    pub fn any_qualified(&self, skills: &SkillSet) -> bool {
        self.index
            .technicians()
            .iter()
            .any(|tech| tech.skills.is_superset_of(skills))
    }

    fn generate(&self, order: &WorkOrder, require_free_slot: bool) -> Vec<Candidate> {
        let dates = order.window.service_dates(self.config.horizon_days);
        let technicians = self.index.technicians();

        let mut candidates: Vec<Candidate> = technicians
            .par_iter()
            .filter(|tech| tech.can_perform(order))
            .filter(|tech| self.in_service_area(tech, order.location))
            .flat_map_iter(|tech| {
                dates
                    .iter()
                    .filter_map(|date| self.evaluate(tech, *date, order, require_free_slot))
                    .collect::<Vec<_>>()
            })
            .collect();

        candidates.sort_by(rank_order);
        candidates.truncate(self.config.max_candidates);

        tracing::debug!(
            work_order = %order.id,
            technicians = technicians.len(),
            candidates = candidates.len(),
            require_free_slot,
            "candidates generated"
        );
        candidates
    }

    fn in_service_area(&self, tech: &Technician, location: Coordinates) -> bool {
        haversine_km(tech.location, location) <= self.config.service_radius_km
    }

    fn evaluate(
        &self,
        tech: &Technician,
        date: ServiceDate,
        order: &WorkOrder,
        require_free_slot: bool,
    ) -> Option<Candidate> {
        let snapshot = self.index.snapshot(&tech.id, date).ok()?;
        if require_free_slot
            && (!snapshot.has_capacity()
                || !snapshot.has_free_slot(order.window.as_interval(), order.duration_secs))
        {
            return None;
        }
        if snapshot.shift().intersect(&order.window.as_interval()).is_none() {
            return None;
        }

        let estimated_detour_secs = self.estimated_detour(&snapshot, order.location);
        let committed_stops = snapshot.route.len();
        let score = estimated_detour_secs as f64 * self.weights.travel_per_second
            + committed_stops as f64 * self.weights.load_per_stop;

        Some(Candidate {
            slack_secs: snapshot.slack_secs(),
            snapshot,
            score,
            estimated_detour_secs,
            committed_stops,
        })
    }

    /// Cheapest detour over consecutive route locations, ignoring time.
    fn estimated_detour(&self, snapshot: &DaySnapshot, location: Coordinates) -> i64 {
        let travel = |from: Coordinates, to: Coordinates| self.estimator.estimate(from, to).duration_secs;

        let mut points = Vec::with_capacity(snapshot.route.len() + 1);
        points.push(snapshot.technician.location);
        points.extend(snapshot.route.stops.iter().map(|stop| stop.location));

        let mut best = points
            .last()
            .map_or(0, |last| travel(*last, location));
        for pair in points.windows(2) {
            let detour = travel(pair[0], location) + travel(location, pair[1]) - travel(pair[0], pair[1]);
            best = best.min(detour);
        }
        best.max(0)
    }
}

/// Lower score first; ties go to the technician with more slack.
fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| b.slack_secs.cmp(&a.slack_secs))
        .then_with(|| a.technician_id().cmp(b.technician_id()))
        .then_with(|| a.date().cmp(&b.date()))
}
