//! Assignment optimizer: drains the unassigned pool through the candidate
//! generator and route sequencer, and commits placements against the live
//! availability index.
//!
//! A placement is computed without holding any lock. The commit then takes
//! the book lock, checks that the order was not changed or withdrawn in the
//! meantime (its revision), and writes the route with the snapshot's version
//! token. A stale snapshot is re-evaluated a bounded number of times before
//! the order goes back to the pool.

use std::collections::HashMap;
use std::sync::Arc;

use crate::availability::{AvailabilityIndex, CommitRequest, DaySnapshot};
use crate::book::{BookState, WorkOrderBook};
use crate::budget::Budget;
use crate::candidates::CandidateGenerator;
use crate::config::EngineConfig;
use crate::distance::DistanceEstimator;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::improve::{ImprovementReport, ImprovementSearch};
use crate::model::{
    Assignment, ReasonCode, Route, ServiceDate, WorkOrder, WorkOrderId, WorkOrderStatus,
};
use crate::sequencer::{Insertion, InsertionMode, RouteSequencer};
use crate::traits::EventSink;

/// Outcome of one placement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Committed(Assignment),
    /// Left in the pool for a later cycle.
    Deferred(ReasonCode),
    Unschedulable(ReasonCode),
    /// The order was no longer pending, or changed while being placed.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub committed: usize,
    pub deferred: usize,
    pub unschedulable: usize,
    /// Orders still pooled when the cycle ended.
    pub remaining: usize,
    pub timed_out: bool,
}

pub struct AssignmentOptimizer {
    index: Arc<AvailabilityIndex>,
    estimator: Arc<DistanceEstimator>,
    book: Arc<WorkOrderBook>,
    config: Arc<EngineConfig>,
    events: Arc<dyn EventSink>,
}

impl AssignmentOptimizer {
    pub fn new(
        index: Arc<AvailabilityIndex>,
        estimator: Arc<DistanceEstimator>,
        book: Arc<WorkOrderBook>,
        config: Arc<EngineConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            index,
            estimator,
            book,
            config,
            events,
        }
    }

    pub fn index(&self) -> &AvailabilityIndex {
        &self.index
    }

    pub fn book(&self) -> &WorkOrderBook {
        &self.book
    }

    pub fn estimator(&self) -> &DistanceEstimator {
        &self.estimator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    pub(crate) fn generator(&self) -> CandidateGenerator<'_> {
        CandidateGenerator::new(
            &self.index,
            &self.estimator,
            &self.config.candidates,
            &self.config.weights,
        )
    }

    pub(crate) fn sequencer(&self) -> RouteSequencer<'_> {
        RouteSequencer::new(&self.estimator, &self.config.sequencer, &self.config.weights)
    }

    /// Tries to place one pooled order.
    pub fn assign(&self, id: &WorkOrderId, mode: InsertionMode) -> Result<Placement> {
        let (order, revision) = {
            let book = self.book.lock();
            let record = book.record(id)?;
            if !record.status.is_pending() {
                return Ok(Placement::Skipped);
            }
            (record.order.clone(), record.revision)
        };

        let generator = self.generator();
        if !generator.any_qualified(&order.required_skills) {
            tracing::warn!(work_order = %id, "no registered technician has the required skills");
            return self.mark_unschedulable(id, ReasonCode::NoFeasibleCandidate);
        }

        let sequencer = self.sequencer();
        let mut conflicts = 0;
        loop {
            let candidates = generator.candidates(&order);
            let found = candidates.iter().find_map(|candidate| {
                sequencer
                    .insert(&candidate.snapshot, &order, mode)
                    .map(|insertion| (candidate, insertion))
            });
            let Some((candidate, insertion)) = found else {
                let reason = if candidates.is_empty() {
                    ReasonCode::NoFeasibleCandidate
                } else {
                    ReasonCode::NoFeasibleInsertion
                };
                return self.defer(id, reason);
            };

            match self.commit_insertion(&order, revision, &candidate.snapshot, insertion) {
                Ok(Some(assignment)) => return Ok(Placement::Committed(assignment)),
                Ok(None) => return Ok(Placement::Skipped),
                Err(err) if err.is_conflict() => {
                    conflicts += 1;
                    tracing::warn!(work_order = %id, attempt = conflicts, error = %err, "commit conflict");
                    if conflicts > self.config.optimizer.max_commit_retries {
                        return self.requeue_after_conflict(id);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Drains the pool once, highest priority first, under the cycle budget.
    #[tracing::instrument(skip(self))]
    pub fn run_cycle(&self) -> CycleReport {
        let mut budget = Budget::new(self.config.optimizer.cycle_budget());
        let mut report = CycleReport::default();

        for id in self.book.pending() {
            if !budget.tick() {
                report.timed_out = true;
                tracing::warn!(elapsed_ms = budget.elapsed().as_millis() as u64, "cycle budget exhausted");
                break;
            }
            match self.assign(&id, InsertionMode::Shift) {
                Ok(Placement::Committed(_)) => report.committed += 1,
                Ok(Placement::Deferred(_)) => report.deferred += 1,
                Ok(Placement::Unschedulable(_)) => report.unschedulable += 1,
                Ok(Placement::Skipped) => {}
                Err(err) => tracing::warn!(work_order = %id, error = %err, "placement failed"),
            }
        }

        report.remaining = self.book.lock().pending_len();
        tracing::info!(
            committed = report.committed,
            deferred = report.deferred,
            unschedulable = report.unschedulable,
            remaining = report.remaining,
            "optimization cycle finished"
        );
        report
    }

    /// Batch improvement over every route on `date`. Runs under the
    /// improvement budget; whatever was found by then is committed unless
    /// a route changed underneath, in which case the result is discarded.
    #[tracing::instrument(skip(self, date), fields(date = date.0))]
    pub fn improve(&self, date: ServiceDate) -> Result<ImprovementReport> {
        let snapshots: Vec<DaySnapshot> = self
            .index
            .technicians()
            .iter()
            .filter_map(|tech| self.index.snapshot(&tech.id, date).ok())
            .collect();
        let arrival: HashMap<WorkOrderId, u64> = {
            let book = self.book.lock();
            snapshots
                .iter()
                .flat_map(|snapshot| &snapshot.route.stops)
                .filter_map(|stop| {
                    book.get(&stop.work_order_id)
                        .map(|record| (stop.work_order_id.clone(), record.sequence))
                })
                .collect()
        };

        let sequencer = self.sequencer();
        let mut search = ImprovementSearch::new(&sequencer, snapshots);
        let mut budget = Budget::new(self.config.optimizer.improvement_budget())
            .with_max_iterations(self.config.optimizer.improvement_max_iterations);
        let mut report = search.run(&arrival, &mut budget);

        let requests = search.into_requests();
        if requests.is_empty() {
            return Ok(report);
        }
        let mut book = self.book.lock();
        match self.apply_routes(&mut book, requests) {
            Ok(()) => report.committed = true,
            Err(err) if err.is_conflict() => {
                tracing::warn!(error = %err, "routes changed during improvement; result discarded");
                report.travel_after = report.travel_before;
            }
            Err(err) => return Err(err),
        }
        tracing::info!(
            improvements = report.improvements,
            travel_before = report.travel_before,
            travel_after = report.travel_after,
            timed_out = report.timed_out,
            "improvement pass finished"
        );
        Ok(report)
    }

    /// Marks a committed order done. The stop is pinned on its route first,
    /// so later route changes keep it where it is; the book follows only
    /// once the index accepted that.
    pub fn complete(&self, id: &WorkOrderId) -> Result<()> {
        let mut book = self.book.lock();
        let record = book.record(id)?;
        if !record.status.can_transition_to(WorkOrderStatus::Completed) {
            return Err(EngineError::InvalidTransition {
                id: id.clone(),
                from: record.status,
                to: WorkOrderStatus::Completed,
            });
        }
        if let Some(assignment) = record.assignment.clone() {
            self.pin_completed(id, &assignment)?;
        }
        book.transition(id, WorkOrderStatus::Completed, None)?;
        tracing::info!(work_order = %id, "work order completed");
        Ok(())
    }

    fn pin_completed(&self, id: &WorkOrderId, assignment: &Assignment) -> Result<()> {
        let mut attempt = 0;
        loop {
            let snapshot = self.index.snapshot(&assignment.technician_id, assignment.date)?;
            let mut route = snapshot.route.clone();
            let stop = route
                .stops
                .iter_mut()
                .find(|stop| &stop.work_order_id == id)
                .ok_or_else(|| EngineError::route_violation(&assignment.technician_id, "completed stop not on route"))?;
            stop.completed = true;

            match self.index.commit(CommitRequest::new(&snapshot, route)) {
                Ok(_) => return Ok(()),
                Err(err) if err.is_conflict() && attempt < self.config.optimizer.max_commit_retries => {
                    attempt += 1;
                    tracing::debug!(work_order = %id, attempt, "retrying completion after conflict");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Commits whole routes and brings every stop's stored assignment in
    /// line with its new position and times.
    pub(crate) fn apply_routes(&self, book: &mut BookState, requests: Vec<CommitRequest>) -> Result<()> {
        let routes: Vec<Route> = requests.iter().map(|request| request.route.clone()).collect();
        self.index.commit_many(requests)?;
        for route in &routes {
            refresh_assignments(book, route)?;
        }
        Ok(())
    }

    pub(crate) fn commit_insertion(
        &self,
        order: &WorkOrder,
        revision: u64,
        snapshot: &DaySnapshot,
        insertion: Insertion,
    ) -> Result<Option<Assignment>> {
        let mut book = self.book.lock();
        let record = book.record(&order.id)?;
        if record.revision != revision || !record.status.is_pending() {
            tracing::debug!(work_order = %order.id, "placement superseded; discarding");
            return Ok(None);
        }
        if record.status == WorkOrderStatus::Unassigned {
            book.transition(&order.id, WorkOrderStatus::TentativelyAssigned, None)?;
        }

        let route = insertion.route;
        self.index.commit(CommitRequest::new(snapshot, route.clone()))?;

        let assignment = route
            .assignment_at(insertion.position)
            .ok_or_else(|| EngineError::route_violation(&route.technician_id, "inserted stop missing"))?;
        book.commit(&order.id, assignment.clone())?;
        refresh_assignments(&mut book, &route)?;
        drop(book);

        tracing::info!(
            work_order = %order.id,
            technician = %assignment.technician_id,
            date = assignment.date.0,
            position = assignment.position,
            accuracy = assignment.accuracy.as_str(),
            "assignment committed"
        );
        self.emit(EngineEvent::AssignmentCommitted {
            work_order_id: order.id.clone(),
            technician_id: assignment.technician_id.clone(),
            service_date: assignment.date,
            accuracy: assignment.accuracy,
        });
        Ok(Some(assignment))
    }

    fn defer(&self, id: &WorkOrderId, reason: ReasonCode) -> Result<Placement> {
        let mut book = self.book.lock();
        let record = book.record(id)?;
        if !record.status.is_pending() {
            return Ok(Placement::Skipped);
        }
        if record.status == WorkOrderStatus::TentativelyAssigned {
            book.transition(id, WorkOrderStatus::Unassigned, Some(reason))?;
        }
        let deferrals = book.defer(id, reason)?;
        if deferrals < self.config.optimizer.max_deferrals {
            tracing::debug!(work_order = %id, deferrals, reason = reason.as_str(), "deferred");
            return Ok(Placement::Deferred(reason));
        }
        drop(book);
        self.mark_unschedulable(id, ReasonCode::NoFeasibleCandidate)
    }

    fn requeue_after_conflict(&self, id: &WorkOrderId) -> Result<Placement> {
        let reason = ReasonCode::ConcurrentModification;
        let mut book = self.book.lock();
        match book.record(id)?.status {
            WorkOrderStatus::TentativelyAssigned => {
                book.transition(id, WorkOrderStatus::Unassigned, Some(reason))?;
            }
            WorkOrderStatus::Unassigned => {
                book.defer(id, reason)?;
            }
            _ => return Ok(Placement::Skipped),
        }
        Ok(Placement::Deferred(reason))
    }

    fn mark_unschedulable(&self, id: &WorkOrderId, reason: ReasonCode) -> Result<Placement> {
        self.book
            .lock()
            .transition(id, WorkOrderStatus::Unschedulable, Some(reason))?;
        tracing::warn!(work_order = %id, reason = reason.as_str(), "work order unschedulable");
        self.emit(EngineEvent::WorkOrderUnschedulable {
            work_order_id: id.clone(),
            reason,
        });
        Ok(Placement::Unschedulable(reason))
    }
}

/// Updates the stored assignment of every committed stop on `route`.
pub(crate) fn refresh_assignments(book: &mut BookState, route: &Route) -> Result<()> {
    for (position, stop) in route.stops.iter().enumerate() {
        if let Some(assignment) = route.assignment_at(position) {
            book.refresh_assignment(&stop.work_order_id, assignment)?;
        }
    }
    Ok(())
}
