//! Incremental rebalancing after disruptive events.
//!
//! Every event is scoped to the work orders it directly orphans. Those stops
//! are taken off their route in one commit, the rest of that route keeps its
//! committed times where travel allows, and the orphans are re-placed under
//! the rebalancer budget. With `preserve_committed` they are only placed
//! where no existing stop on any other route changes. Completed stops are
//! never taken off a route.

use std::sync::Arc;

use crate::availability::{CommitRequest, Occupancy, Slot, Timeline, day_pieces};
use crate::book::BookState;
use crate::budget::Budget;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::model::{
    Assignment, Interval, ReasonCode, Route, ServiceDate, Stop, TechnicianId, WorkOrderId,
    WorkOrderStatus,
};
use crate::optimizer::{AssignmentOptimizer, Placement, refresh_assignments};
use crate::sequencer::{Anchor, InsertionMode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Orders taken off a route and sent back to the pool.
    pub released: Vec<WorkOrderId>,
    pub committed: usize,
    pub deferred: usize,
    pub unschedulable: usize,
    pub timed_out: bool,
}

pub struct Rebalancer {
    optimizer: Arc<AssignmentOptimizer>,
}

impl Rebalancer {
    pub fn new(optimizer: Arc<AssignmentOptimizer>) -> Self {
        Self { optimizer }
    }

    /// Cancels a work order in any non-terminal state. A committed stop is
    /// removed from its route.
    #[tracing::instrument(skip(self, id), fields(work_order = %id))]
    pub fn cancel(&self, id: &WorkOrderId) -> Result<RebalanceReport> {
        let mut book = self.optimizer.book().lock();
        let record = book.record(id)?.clone();

        let mut released = Vec::new();
        if let (WorkOrderStatus::Committed, Some(assignment)) = (record.status, &record.assignment) {
            let taken = self.detach(&mut book, &assignment.technician_id, assignment.date, &[id.clone()], &[])?;
            released = self.release(
                &mut book,
                &assignment.technician_id,
                taken.into_iter().filter(|taken| taken != id).collect(),
                ReasonCode::RouteResequenced,
            )?;
        }
        book.transition(id, WorkOrderStatus::Cancelled, None)?;
        drop(book);

        tracing::info!(released = released.len(), "work order cancelled");
        Ok(self.reassign(released))
    }

    /// Blocks `interval` on the technician's timeline and orphans every stop
    /// that overlaps it.
    #[tracing::instrument(
        skip(self, technician, interval),
        fields(technician = %technician, from = interval.start, to = interval.end)
    )]
    pub fn technician_unavailable(&self, technician: &TechnicianId, interval: Interval) -> Result<RebalanceReport> {
        if interval.is_empty() {
            return Err(EngineError::invalid_technician(
                technician.0.clone(),
                "unavailability interval is empty",
            ));
        }
        self.check_span(technician, interval)?;
        let index = self.optimizer.index();
        let tech = index.technician(technician)?;

        let mut book = self.optimizer.book().lock();
        let mut released = Vec::new();
        for (date, piece) in day_pieces(interval) {
            let Some(piece) = piece.intersect(&tech.shift(date)) else {
                continue;
            };
            let snapshot = index.snapshot(technician, date)?;
            let blocks = uncovered(piece, &snapshot.blocked());
            if blocks.is_empty() {
                continue;
            }
            let taken = self.detach(&mut book, technician, date, &[], &blocks)?;
            released.extend(self.release(&mut book, technician, taken, ReasonCode::TechnicianUnavailable)?);
        }
        drop(book);

        tracing::info!(released = released.len(), "technician unavailable");
        Ok(self.reassign(released))
    }

    /// Lifts unavailability recorded for `interval`. Pooled work is picked
    /// up by the next cycle.
    #[tracing::instrument(skip(self, technician, interval), fields(technician = %technician))]
    pub fn technician_available(&self, technician: &TechnicianId, interval: Interval) -> Result<u64> {
        self.check_span(technician, interval)?;
        self.optimizer.index().unblock(technician, interval)
    }

    fn check_span(&self, technician: &TechnicianId, interval: Interval) -> Result<()> {
        let config = &self.optimizer.config().rebalancer;
        if interval.duration() > config.max_unavailable_secs() {
            return Err(EngineError::invalid_technician(
                technician.0.clone(),
                format!("unavailability longer than {} days", config.max_unavailable_days),
            ));
        }
        Ok(())
    }

    /// Takes a committed order off its route because its content changed.
    /// The order itself is left tentatively assigned for the caller to
    /// place; collateral orphans are reassigned here.
    pub fn release_for_update(&self, id: &WorkOrderId) -> Result<RebalanceReport> {
        let mut book = self.optimizer.book().lock();
        let record = book.record(id)?.clone();
        let (WorkOrderStatus::Committed, Some(assignment)) = (record.status, record.assignment) else {
            return Ok(RebalanceReport::default());
        };

        let taken = self.detach(&mut book, &assignment.technician_id, assignment.date, &[id.clone()], &[])?;
        let mut released = self.release(&mut book, &assignment.technician_id, taken, ReasonCode::WorkOrderUpdated)?;
        drop(book);

        released.retain(|released| released != id);
        let mut report = self.reassign(released);
        report.released.push(id.clone());
        Ok(report)
    }

    /// Makes room for an urgent order by releasing one lower-priority stop
    /// from the best relaxed candidate whose route then fits it. Returns
    /// `None` when no single displacement helps.
    #[tracing::instrument(skip(self, id), fields(work_order = %id))]
    pub fn displace_for(&self, id: &WorkOrderId) -> Result<Option<(Assignment, RebalanceReport)>> {
        let (order, revision) = {
            let book = self.optimizer.book().lock();
            let record = book.record(id)?;
            if !record.status.is_pending() {
                return Ok(None);
            }
            (record.order.clone(), record.revision)
        };

        let sequencer = self.optimizer.sequencer();
        for candidate in self.optimizer.generator().relaxed_candidates(&order) {
            let snapshot = &candidate.snapshot;
            let mut victims: Vec<&Stop> = snapshot
                .route
                .stops
                .iter()
                .filter(|stop| !stop.completed && stop.priority < order.priority)
                .collect();
            victims.sort_by_key(|stop| (stop.priority, std::cmp::Reverse(stop.window.latest)));

            for victim in victims {
                let kept: Vec<Stop> = snapshot
                    .route
                    .stops
                    .iter()
                    .filter(|stop| stop.work_order_id != victim.work_order_id)
                    .cloned()
                    .collect();
                let Some(route) = sequencer.schedule(snapshot, kept, Anchor::KeepCommitted { except: None }) else {
                    continue;
                };
                let mut trial = snapshot.clone();
                trial.route = route;
                let Some(insertion) = sequencer.insert(&trial, &order, InsertionMode::Shift) else {
                    continue;
                };

                let victim_id = victim.work_order_id.clone();
                let mut book = self.optimizer.book().lock();
                let still_there = book
                    .get(&victim_id)
                    .is_some_and(|record| record.status == WorkOrderStatus::Committed);
                if !still_there {
                    continue;
                }
                book.transition(
                    &victim_id,
                    WorkOrderStatus::TentativelyAssigned,
                    Some(ReasonCode::DisplacedByUrgent),
                )?;
                drop(book);

                match self.optimizer.commit_insertion(&order, revision, snapshot, insertion) {
                    Ok(Some(assignment)) => {
                        self.optimizer.emit(EngineEvent::AssignmentReleased {
                            work_order_id: victim_id.clone(),
                            technician_id: candidate.technician_id().clone(),
                            reason: ReasonCode::DisplacedByUrgent,
                        });
                        tracing::info!(
                            displaced = %victim_id,
                            technician = %candidate.technician_id(),
                            "lower-priority stop displaced"
                        );
                        return Ok(Some((assignment, self.reassign(vec![victim_id]))));
                    }
                    Ok(None) => {
                        self.restore(&victim_id, &candidate.snapshot.route)?;
                        return Ok(None);
                    }
                    Err(err) if err.is_conflict() => {
                        self.restore(&victim_id, &candidate.snapshot.route)?;
                        tracing::warn!(error = %err, "displacement target changed; trying next candidate");
                        break;
                    }
                    Err(err) => {
                        self.restore(&victim_id, &candidate.snapshot.route)?;
                        return Err(err);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Puts a victim whose displacement did not go through back to
    /// committed, with the assignment it had on `route`.
    fn restore(&self, id: &WorkOrderId, route: &Route) -> Result<()> {
        let mut book = self.optimizer.book().lock();
        if book.get(id).is_some_and(|record| record.status == WorkOrderStatus::TentativelyAssigned) {
            if let Some(assignment) = route.position_of(id).and_then(|pos| route.assignment_at(pos)) {
                book.commit(id, assignment)?;
            }
        }
        Ok(())
    }

    /// Removes `remove` plus every stop overlapping `blocks` from one
    /// technician-day, records the blocks, and returns the ids taken off.
    /// Remaining stops keep their times unless travel forces them later;
    /// when that is infeasible everything after the first removal goes too.
    /// Completed stops stay, and blocks are cut around them. Nothing is
    /// written unless every order taken off is still committed.
    fn detach(
        &self,
        book: &mut BookState,
        technician: &TechnicianId,
        date: ServiceDate,
        remove: &[WorkOrderId],
        blocks: &[Interval],
    ) -> Result<Vec<WorkOrderId>> {
        let index = self.optimizer.index();
        let sequencer = self.optimizer.sequencer();
        let attempts = self.optimizer.config().optimizer.max_commit_retries + 1;

        let mut last_err = None;
        for _ in 0..attempts {
            let snapshot = index.snapshot(technician, date)?;
            let pinned: Vec<Interval> = snapshot
                .route
                .stops
                .iter()
                .filter(|stop| stop.completed)
                .map(Stop::interval)
                .collect();
            let blocks: Vec<Interval> = blocks.iter().flat_map(|block| uncovered(*block, &pinned)).collect();
            let taken_at = |stop: &Stop| {
                !stop.completed
                    && (remove.contains(&stop.work_order_id)
                        || blocks.iter().any(|block| block.overlaps(&stop.interval())))
            };

            let mut scratch = snapshot.clone();
            scratch.timeline = Timeline::default();
            for block in snapshot.blocked().into_iter().chain(blocks.iter().copied()) {
                scratch
                    .timeline
                    .insert(Slot {
                        interval: block,
                        occupancy: Occupancy::Blocked,
                    })
                    .map_err(|interval| EngineError::Overlap {
                        technician: technician.clone(),
                        interval,
                    })?;
            }

            let kept: Vec<Stop> = snapshot
                .route
                .stops
                .iter()
                .filter(|stop| !taken_at(*stop))
                .cloned()
                .collect();
            let anchor = Anchor::KeepCommitted { except: None };
            let route = match sequencer.schedule(&scratch, kept, anchor) {
                Some(route) => route,
                None => {
                    let cut = snapshot.route.stops.iter().position(taken_at).unwrap_or(0);
                    let prefix: Vec<Stop> = snapshot
                        .route
                        .stops
                        .iter()
                        .enumerate()
                        .filter(|(position, stop)| *position < cut || stop.completed)
                        .map(|(_, stop)| stop.clone())
                        .collect();
                    sequencer.schedule(&scratch, prefix, anchor).ok_or_else(|| {
                        EngineError::route_violation(technician, "route prefix no longer feasible")
                    })?
                }
            };

            let taken: Vec<WorkOrderId> = snapshot
                .route
                .stops
                .iter()
                .filter(|stop| route.position_of(&stop.work_order_id).is_none())
                .map(|stop| stop.work_order_id.clone())
                .collect();
            for id in &taken {
                let status = book.record(id)?.status;
                if status != WorkOrderStatus::Committed {
                    return Err(EngineError::InvalidTransition {
                        id: id.clone(),
                        from: status,
                        to: WorkOrderStatus::TentativelyAssigned,
                    });
                }
            }
            let request = CommitRequest::new(&snapshot, route.clone()).with_blocks(blocks);
            match index.commit(request) {
                Ok(_) => {
                    refresh_assignments(book, &route)?;
                    return Ok(taken);
                }
                Err(err) if err.is_conflict() => {
                    tracing::warn!(technician = %technician, error = %err, "route changed while detaching; retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::route_violation(technician, "detach retries exhausted")))
    }

    /// Committed → TentativelyAssigned for every id, back into the pool.
    fn release(
        &self,
        book: &mut BookState,
        technician: &TechnicianId,
        ids: Vec<WorkOrderId>,
        reason: ReasonCode,
    ) -> Result<Vec<WorkOrderId>> {
        for id in &ids {
            book.transition(id, WorkOrderStatus::TentativelyAssigned, Some(reason))?;
            tracing::info!(work_order = %id, technician = %technician, reason = reason.as_str(), "assignment released");
            self.optimizer.emit(EngineEvent::AssignmentReleased {
                work_order_id: id.clone(),
                technician_id: technician.clone(),
                reason,
            });
        }
        Ok(ids)
    }

    fn reassign(&self, released: Vec<WorkOrderId>) -> RebalanceReport {
        let config = &self.optimizer.config().rebalancer;
        let mode = if config.preserve_committed {
            InsertionMode::PreserveCommitted
        } else {
            InsertionMode::Shift
        };
        let mut budget = Budget::new(config.budget());
        let mut report = RebalanceReport::default();

        for (done, id) in released.iter().enumerate() {
            if !budget.tick() {
                report.timed_out = true;
                tracing::warn!(left = released.len() - done, "rebalance budget exhausted; leaving the rest pooled");
                break;
            }
            match self.optimizer.assign(id, mode) {
                Ok(Placement::Committed(_)) => report.committed += 1,
                Ok(Placement::Deferred(_)) => report.deferred += 1,
                Ok(Placement::Unschedulable(_)) => report.unschedulable += 1,
                Ok(Placement::Skipped) => {}
                Err(err) => tracing::warn!(work_order = %id, error = %err, "reassignment failed"),
            }
        }
        report.released = released;
        report
    }
}

/// Parts of `interval` not already covered by `blocked` (sorted, disjoint).
fn uncovered(interval: Interval, blocked: &[Interval]) -> Vec<Interval> {
    let mut pieces = Vec::new();
    let mut cursor = interval.start;
    for block in blocked {
        if block.end <= cursor || block.start >= interval.end {
            continue;
        }
        if block.start > cursor {
            pieces.push(Interval::new(cursor, block.start));
        }
        cursor = cursor.max(block.end);
    }
    if cursor < interval.end {
        pieces.push(Interval::new(cursor, interval.end));
    }
    pieces
}
