//! Technician availability index.
//!
//! The index is the single source of truth for "what is free when". Each
//! technician lives in an arena slot holding, per service date, a sorted
//! list of disjoint occupied intervals (one per route stop plus any
//! unavailability blocks) together with the route those stops belong to.
//! Timeline and route are only ever replaced together, under the slot's
//! write lock, and every successful write bumps the technician's version.
//!
//! Readers take a [`DaySnapshot`] (a consistent copy plus the version it was
//! taken at) and evaluate against it without holding locks. Writers hand the
//! version back in a [`CommitRequest`]; if the technician changed in the
//! meantime the commit is rejected with
//! [`EngineError::ConcurrentModification`] and the caller re-evaluates.
//!
//! Operations on different technicians never contend; operations on the
//! same technician are serialized by its slot lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::model::{Interval, Route, ServiceDate, Stop, Technician, TechnicianId, WorkOrderId};

/// What occupies an interval on a technician's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    Stop(WorkOrderId),
    /// Technician unavailable (sick, vehicle down, training...).
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub interval: Interval,
    pub occupancy: Occupancy,
}

/// Sorted, disjoint occupied intervals of one technician on one date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    slots: Vec<Slot>,
}

impl Timeline {
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// O(log n): the only slot that can overlap `interval` is the first one
    /// ending after `interval.start`.
    pub fn is_free(&self, interval: Interval) -> bool {
        if interval.is_empty() {
            return true;
        }
        let idx = self.slots.partition_point(|slot| slot.interval.end <= interval.start);
        match self.slots.get(idx) {
            Some(slot) => slot.interval.start >= interval.end,
            None => true,
        }
    }

    /// Inserts `slot`, rejecting any overlap. On error the timeline is unchanged.
    pub fn insert(&mut self, slot: Slot) -> std::result::Result<(), Interval> {
        if slot.interval.is_empty() {
            return Err(slot.interval);
        }
        if !self.is_free(slot.interval) {
            return Err(slot.interval);
        }
        let idx = self.slots.partition_point(|s| s.interval.start < slot.interval.start);
        self.slots.insert(idx, slot);
        debug_assert!(self.is_sorted_and_disjoint());
        Ok(())
    }

    /// Removes the slot with exactly this interval and occupancy.
    pub fn remove(&mut self, interval: Interval, occupancy: &Occupancy) -> Option<Slot> {
        let idx = self.slots.partition_point(|s| s.interval.start < interval.start);
        match self.slots.get(idx) {
            Some(slot) if slot.interval == interval && &slot.occupancy == occupancy => {
                Some(self.slots.remove(idx))
            }
            _ => None,
        }
    }

    pub fn blocked(&self) -> Vec<Interval> {
        self.slots
            .iter()
            .filter(|slot| slot.occupancy == Occupancy::Blocked)
            .map(|slot| slot.interval)
            .collect()
    }

    /// Whether some free gap inside `within` is at least `duration` long.
    pub fn has_gap(&self, within: Interval, duration: i64) -> bool {
        if within.duration() < duration {
            return false;
        }
        let mut cursor = within.start;
        let first = self.slots.partition_point(|slot| slot.interval.end <= within.start);
        for slot in &self.slots[first..] {
            if slot.interval.start >= within.end {
                break;
            }
            if slot.interval.start - cursor >= duration {
                return true;
            }
            cursor = cursor.max(slot.interval.end);
        }
        within.end - cursor >= duration
    }

    /// Busy time inside `within`.
    pub fn occupied_secs(&self, within: Interval) -> i64 {
        self.slots
            .iter()
            .filter_map(|slot| slot.interval.intersect(&within))
            .map(|iv| iv.duration())
            .sum()
    }

    fn is_sorted_and_disjoint(&self) -> bool {
        self.slots
            .windows(2)
            .all(|w| w[0].interval.end <= w[1].interval.start)
    }
}

#[derive(Debug, Clone)]
struct DayPlan {
    timeline: Timeline,
    route: Route,
}

#[derive(Debug)]
struct TechnicianState {
    technician: Technician,
    days: BTreeMap<ServiceDate, DayPlan>,
    version: u64,
}

impl TechnicianState {
    fn plan(&self, date: ServiceDate) -> DayPlan {
        self.days.get(&date).cloned().unwrap_or_else(|| DayPlan {
            timeline: Timeline::default(),
            route: Route::empty(self.technician.id.clone(), date),
        })
    }

    fn snapshot(&self, date: ServiceDate) -> DaySnapshot {
        let plan = self.plan(date);
        DaySnapshot {
            technician: self.technician.clone(),
            date,
            route: plan.route,
            timeline: plan.timeline,
            version: self.version,
        }
    }

    fn check_version(&self, expected: u64) -> Result<()> {
        if self.version == expected {
            Ok(())
        } else {
            Err(EngineError::ConcurrentModification {
                technician: self.technician.id.clone(),
                expected,
                found: self.version,
            })
        }
    }

    /// Builds the plan a commit would install, without touching state.
    fn stage(&self, request: &CommitRequest) -> Result<DayPlan> {
        let technician = &self.technician;
        validate_route(technician, request.date, &request.route)?;

        let current = self.plan(request.date);
        let mut timeline = current.timeline;
        for stop in &current.route.stops {
            let occupancy = Occupancy::Stop(stop.work_order_id.clone());
            if timeline.remove(stop.interval(), &occupancy).is_none() {
                return Err(EngineError::route_violation(
                    &technician.id,
                    format!("timeline lost track of stop {}", stop.work_order_id),
                ));
            }
        }
        let day = request.date.span();
        for block in &request.add_blocks {
            if let Some(clipped) = block.intersect(&day) {
                timeline
                    .insert(Slot {
                        interval: clipped,
                        occupancy: Occupancy::Blocked,
                    })
                    .map_err(|interval| EngineError::Overlap {
                        technician: technician.id.clone(),
                        interval,
                    })?;
            }
        }
        for stop in &request.route.stops {
            timeline
                .insert(Slot {
                    interval: stop.interval(),
                    occupancy: Occupancy::Stop(stop.work_order_id.clone()),
                })
                .map_err(|interval| EngineError::Overlap {
                    technician: technician.id.clone(),
                    interval,
                })?;
        }

        Ok(DayPlan {
            timeline,
            route: request.route.clone(),
        })
    }

    fn install(&mut self, date: ServiceDate, plan: DayPlan) {
        if plan.timeline.is_empty() && plan.route.is_empty() {
            self.days.remove(&date);
        } else {
            self.days.insert(date, plan);
        }
    }
}

/// Consistent copy of one technician's day, tagged with the version it was
/// read at.
#[derive(Debug, Clone)]
pub struct DaySnapshot {
    pub technician: Technician,
    pub date: ServiceDate,
    pub route: Route,
    pub timeline: Timeline,
    pub version: u64,
}

impl DaySnapshot {
    pub fn shift(&self) -> Interval {
        self.technician.shift(self.date)
    }

    pub fn blocked(&self) -> Vec<Interval> {
        self.timeline.blocked()
    }

    pub fn has_capacity(&self) -> bool {
        (self.route.len() as u32) < self.technician.max_jobs_per_day
    }

    pub fn is_free(&self, interval: Interval) -> bool {
        self.timeline.is_free(interval)
    }

    /// A gap of `duration` exists inside both the shift and `window`.
    pub fn has_free_slot(&self, window: Interval, duration: i64) -> bool {
        match self.shift().intersect(&window) {
            Some(within) => self.timeline.has_gap(within, duration),
            None => false,
        }
    }

    /// Working time not yet spent on stops, travel or blocks.
    pub fn slack_secs(&self) -> i64 {
        let shift = self.shift();
        let travel: i64 = self.route.stops.iter().map(|stop| stop.travel_secs).sum();
        (shift.duration() - self.timeline.occupied_secs(shift) - travel).max(0)
    }
}

/// Replace one technician-day's route, optionally recording new blocks.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub technician: TechnicianId,
    pub date: ServiceDate,
    pub expected_version: u64,
    pub route: Route,
    pub add_blocks: Vec<Interval>,
}

impl CommitRequest {
    pub fn new(snapshot: &DaySnapshot, route: Route) -> Self {
        Self {
            technician: snapshot.technician.id.clone(),
            date: snapshot.date,
            expected_version: snapshot.version,
            route,
            add_blocks: Vec::new(),
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<Interval>) -> Self {
        self.add_blocks = blocks;
        self
    }
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Arc<RwLock<TechnicianState>>>,
    by_id: HashMap<TechnicianId, usize>,
}

/// Arena of technician timelines with per-technician locking.
#[derive(Debug, Default)]
pub struct AvailabilityIndex {
    arena: RwLock<Arena>,
}

impl AvailabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a technician or updates its profile.
    ///
    /// A profile update is rejected if an existing route would no longer
    /// satisfy it (skills, hours, capacity).
    pub fn upsert(&self, technician: Technician) -> Result<()> {
        if let Some(slot) = self.slot(&technician.id) {
            let mut state = slot.write();
            for (date, plan) in &state.days {
                validate_route(&technician, *date, &plan.route)?;
            }
            state.technician = technician;
            state.version += 1;
            return Ok(());
        }

        let mut arena = self.arena.write();
        if arena.by_id.contains_key(&technician.id) {
            drop(arena);
            return self.upsert(technician);
        }
        let idx = arena.slots.len();
        arena.by_id.insert(technician.id.clone(), idx);
        arena.slots.push(Arc::new(RwLock::new(TechnicianState {
            technician,
            days: BTreeMap::new(),
            version: 0,
        })));
        Ok(())
    }

    pub fn contains(&self, id: &TechnicianId) -> bool {
        self.arena.read().by_id.contains_key(id)
    }

    pub fn technician(&self, id: &TechnicianId) -> Result<Technician> {
        Ok(self.require(id)?.read().technician.clone())
    }

    pub fn technicians(&self) -> Vec<Technician> {
        self.all_slots()
            .iter()
            .map(|slot| slot.read().technician.clone())
            .collect()
    }

    pub fn version(&self, id: &TechnicianId) -> Result<u64> {
        Ok(self.require(id)?.read().version)
    }

    pub fn snapshot(&self, id: &TechnicianId, date: ServiceDate) -> Result<DaySnapshot> {
        Ok(self.require(id)?.read().snapshot(date))
    }

    /// Snapshots of every technician that has stops on `date`.
    pub fn routes_on(&self, date: ServiceDate) -> Vec<DaySnapshot> {
        self.all_slots()
            .iter()
            .filter_map(|slot| {
                let state = slot.read();
                let has_stops = state
                    .days
                    .get(&date)
                    .is_some_and(|plan| !plan.route.is_empty());
                has_stops.then(|| state.snapshot(date))
            })
            .collect()
    }

    pub fn route(&self, id: &TechnicianId, date: ServiceDate) -> Result<Route> {
        Ok(self.snapshot(id, date)?.route)
    }

    /// Whether `interval` is free of stops and blocks.
    pub fn is_free(&self, id: &TechnicianId, interval: Interval) -> Result<bool> {
        let slot = self.require(id)?;
        let state = slot.read();
        Ok(day_pieces(interval).all(|(date, piece)| {
            state
                .days
                .get(&date)
                .is_none_or(|plan| plan.timeline.is_free(piece))
        }))
    }

    pub fn has_free_slot(
        &self,
        id: &TechnicianId,
        date: ServiceDate,
        window: Interval,
        duration: i64,
    ) -> Result<bool> {
        Ok(self.snapshot(id, date)?.has_free_slot(window, duration))
    }

    /// Reserves `interval` as unavailable time. Rejects overlaps with any
    /// stop or existing block; on rejection nothing is recorded.
    pub fn insert(&self, id: &TechnicianId, interval: Interval) -> Result<u64> {
        let slot = self.require(id)?;
        let mut state = slot.write();
        let mut staged = Vec::new();
        for (date, piece) in day_pieces(interval) {
            let mut plan = state.plan(date);
            plan.timeline
                .insert(Slot {
                    interval: piece,
                    occupancy: Occupancy::Blocked,
                })
                .map_err(|interval| EngineError::Overlap {
                    technician: id.clone(),
                    interval,
                })?;
            staged.push((date, plan));
        }
        for (date, plan) in staged {
            state.install(date, plan);
        }
        state.version += 1;
        Ok(state.version)
    }

    /// Removes a reservation previously made with [`insert`](Self::insert).
    pub fn remove(&self, id: &TechnicianId, interval: Interval) -> Result<u64> {
        let slot = self.require(id)?;
        let mut state = slot.write();
        let mut staged = Vec::new();
        for (date, piece) in day_pieces(interval) {
            let mut plan = state.plan(date);
            if plan.timeline.remove(piece, &Occupancy::Blocked).is_none() {
                return Err(EngineError::route_violation(
                    id,
                    format!("no reservation {} on {}", piece, date),
                ));
            }
            staged.push((date, plan));
        }
        for (date, plan) in staged {
            state.install(date, plan);
        }
        state.version += 1;
        Ok(state.version)
    }

    /// Lifts every block overlapping `interval`, trimming partial overlaps.
    pub fn unblock(&self, id: &TechnicianId, interval: Interval) -> Result<u64> {
        let slot = self.require(id)?;
        let mut state = slot.write();
        for (date, piece) in day_pieces(interval) {
            if !state.days.contains_key(&date) {
                continue;
            }
            let mut plan = state.plan(date);
            for block in plan.timeline.blocked() {
                if !block.overlaps(&piece) {
                    continue;
                }
                plan.timeline.remove(block, &Occupancy::Blocked);
                for rest in [
                    Interval::new(block.start, piece.start),
                    Interval::new(piece.end, block.end),
                ] {
                    if !rest.is_empty() {
                        // The remainder sat inside the removed block, so it cannot overlap.
                        let _ = plan.timeline.insert(Slot {
                            interval: rest,
                            occupancy: Occupancy::Blocked,
                        });
                    }
                }
            }
            state.install(date, plan);
        }
        state.version += 1;
        Ok(state.version)
    }

    /// Atomically replaces one technician-day, re-validating against the
    /// live timeline. Returns the new version.
    pub fn commit(&self, request: CommitRequest) -> Result<u64> {
        let slot = self.require(&request.technician)?;
        let mut state = slot.write();
        state.check_version(request.expected_version)?;
        let plan = state.stage(&request)?;
        state.install(request.date, plan);
        state.version += 1;
        tracing::debug!(
            technician = %request.technician,
            date = request.date.0,
            stops = request.route.len(),
            version = state.version,
            "route committed"
        );
        Ok(state.version)
    }

    /// All-or-nothing commit across technicians. Locks are taken in arena
    /// order so concurrent multi-commits cannot deadlock.
    pub fn commit_many(&self, requests: Vec<CommitRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut targets: Vec<(usize, Arc<RwLock<TechnicianState>>)> = {
            let arena = self.arena.read();
            let mut targets = Vec::new();
            for request in &requests {
                let idx = *arena
                    .by_id
                    .get(&request.technician)
                    .ok_or_else(|| EngineError::UnknownTechnician(request.technician.clone()))?;
                targets.push((idx, arena.slots[idx].clone()));
            }
            targets
        };
        targets.sort_by_key(|(idx, _)| *idx);
        targets.dedup_by_key(|(idx, _)| *idx);

        let mut guards: Vec<_> = targets.iter().map(|(_, slot)| slot.write()).collect();

        let mut staged = Vec::with_capacity(requests.len());
        for request in &requests {
            let Some(pos) = guards
                .iter()
                .position(|state| state.technician.id == request.technician)
            else {
                return Err(EngineError::UnknownTechnician(request.technician.clone()));
            };
            guards[pos].check_version(request.expected_version)?;
            staged.push((pos, request.date, guards[pos].stage(request)?));
        }

        let mut touched = vec![false; guards.len()];
        for (pos, date, plan) in staged {
            guards[pos].install(date, plan);
            touched[pos] = true;
        }
        for (state, touched) in guards.iter_mut().zip(touched) {
            if touched {
                state.version += 1;
            }
        }
        Ok(())
    }

    fn slot(&self, id: &TechnicianId) -> Option<Arc<RwLock<TechnicianState>>> {
        let arena = self.arena.read();
        arena.by_id.get(id).map(|idx| arena.slots[*idx].clone())
    }

    fn require(&self, id: &TechnicianId) -> Result<Arc<RwLock<TechnicianState>>> {
        self.slot(id)
            .ok_or_else(|| EngineError::UnknownTechnician(id.clone()))
    }

    fn all_slots(&self) -> Vec<Arc<RwLock<TechnicianState>>> {
        self.arena.read().slots.clone()
    }
}

/// Splits an interval at midnights.
pub(crate) fn day_pieces(interval: Interval) -> impl Iterator<Item = (ServiceDate, Interval)> {
    let first = ServiceDate::of(interval.start);
    let last = ServiceDate::of((interval.end - 1).max(interval.start));
    (first.0..=last.0).filter_map(move |day| {
        let date = ServiceDate(day);
        date.span().intersect(&interval).map(|piece| (date, piece))
    })
}

/// Hard constraints every committed route must satisfy.
pub fn validate_route(technician: &Technician, date: ServiceDate, route: &Route) -> Result<()> {
    let id = &technician.id;
    if &route.technician_id != id || route.date != date {
        return Err(EngineError::route_violation(id, "route belongs to another technician or date"));
    }
    if route.len() as u32 > technician.max_jobs_per_day {
        return Err(EngineError::route_violation(
            id,
            format!("{} stops exceed the daily maximum of {}", route.len(), technician.max_jobs_per_day),
        ));
    }

    let shift = technician.shift(date);
    let mut ready = shift.start;
    for stop in &route.stops {
        check_stop(technician, shift, ready, stop)?;
        ready = stop.departure;
    }
    Ok(())
}

fn check_stop(technician: &Technician, shift: Interval, ready: i64, stop: &Stop) -> Result<()> {
    let id = &technician.id;
    let wo = &stop.work_order_id;
    if !technician.skills.is_superset_of(&stop.skills) {
        return Err(EngineError::route_violation(id, format!("lacks skills for {}", wo)));
    }
    if stop.departure != stop.arrival + stop.duration_secs || stop.duration_secs <= 0 {
        return Err(EngineError::route_violation(id, format!("stop {} has inconsistent times", wo)));
    }
    if stop.arrival < ready + stop.travel_secs {
        return Err(EngineError::route_violation(
            id,
            format!("stop {} starts before travel from the previous stop completes", wo),
        ));
    }
    if !shift.contains(&stop.interval()) {
        return Err(EngineError::route_violation(id, format!("stop {} is outside working hours", wo)));
    }
    if stop.arrival < stop.window.earliest {
        return Err(EngineError::route_violation(id, format!("stop {} starts before its window", wo)));
    }
    let late_by = stop.departure - stop.window.latest;
    match stop.breach {
        None if late_by > 0 => Err(EngineError::route_violation(
            id,
            format!("stop {} misses its window without a recorded breach", wo),
        )),
        Some(breach) if breach.late_by_secs != late_by.max(0) => Err(EngineError::route_violation(
            id,
            format!("stop {} records a wrong breach", wo),
        )),
        _ => Ok(()),
    }
}
