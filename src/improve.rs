//! Batch improvement for one service date.
//!
//! Local search written as an explicit step function: each call to
//! [`ImprovementSearch::step`] applies at most one strictly improving move
//! and reports what happened, so the driver loop can stop on a wall-clock
//! or iteration budget and keep the best routes found so far.
//!
//! Moves, tried in order: 2-opt segment reversal inside a route, relocating
//! a stop to another technician, and swapping a pair of stops between
//! technicians. Every candidate route is re-timed from scratch and must pass
//! the same feasibility rules as a fresh insertion. Stops up to the last
//! completed one are never reordered or moved off their route.

use std::collections::HashMap;

use crate::availability::{CommitRequest, DaySnapshot};
use crate::budget::Budget;
use crate::model::{Route, Stop, WorkOrderId};
use crate::sequencer::{Anchor, RouteSequencer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImprovementReport {
    pub iterations: u64,
    pub improvements: u32,
    pub travel_before: i64,
    pub travel_after: i64,
    pub timed_out: bool,
    /// Whether the improved routes were written back.
    pub committed: bool,
}

/// What one step of the search did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Improved,
    /// No improving move exists; the routes are a local optimum.
    Converged,
    OutOfBudget,
}

#[derive(Debug, Clone)]
struct WorkingRoute {
    snapshot: DaySnapshot,
    route: Route,
    changed: bool,
}

impl WorkingRoute {
    fn travel(&self) -> i64 {
        self.route.total_travel_secs()
    }

    fn adopt(&mut self, route: Route) {
        self.route = route;
        self.changed = true;
    }
}

pub struct ImprovementSearch<'a> {
    sequencer: &'a RouteSequencer<'a>,
    routes: Vec<WorkingRoute>,
}

impl<'a> ImprovementSearch<'a> {
    pub fn new(sequencer: &'a RouteSequencer<'a>, snapshots: Vec<DaySnapshot>) -> Self {
        let routes = snapshots
            .into_iter()
            .map(|snapshot| WorkingRoute {
                route: snapshot.route.clone(),
                snapshot,
                changed: false,
            })
            .collect();
        Self { sequencer, routes }
    }

    pub fn total_travel(&self) -> i64 {
        self.routes.iter().map(WorkingRoute::travel).sum()
    }

    /// Drives [`step`](Self::step) until convergence or budget exhaustion.
    /// `arrival` maps each stop to its arrival sequence for the baseline
    /// guard.
    pub fn run(&mut self, arrival: &HashMap<WorkOrderId, u64>, budget: &mut Budget) -> ImprovementReport {
        let mut report = ImprovementReport {
            travel_before: self.total_travel(),
            ..ImprovementReport::default()
        };
        report.improvements += self.adopt_arrival_order(arrival);

        loop {
            if !budget.tick() {
                report.timed_out = budget.timed_out();
                break;
            }
            match self.step(budget) {
                Step::Improved => report.improvements += 1,
                Step::Converged => break,
                Step::OutOfBudget => {
                    report.timed_out = true;
                    break;
                }
            }
        }

        if report.timed_out {
            tracing::warn!(improvements = report.improvements, "improvement budget exhausted; keeping partial result");
        }
        report.iterations = budget.iterations();
        report.travel_after = self.total_travel();
        report
    }

    /// Applies the first strictly improving move found.
    pub fn step(&mut self, budget: &Budget) -> Step {
        if let Some(step) = self.two_opt(budget) {
            return step;
        }
        if let Some(step) = self.relocate(budget) {
            return step;
        }
        if let Some(step) = self.swap(budget) {
            return step;
        }
        Step::Converged
    }

    /// Commit requests for every route that changed.
    pub fn into_requests(self) -> Vec<CommitRequest> {
        self.routes
            .into_iter()
            .filter(|working| working.changed)
            .map(|working| CommitRequest::new(&working.snapshot, working.route))
            .collect()
    }

    /// Re-sequences each route in submission order when that is feasible
    /// and cheaper, so the result never does worse than the naive plan.
    fn adopt_arrival_order(&mut self, arrival: &HashMap<WorkOrderId, u64>) -> u32 {
        let mut adopted = 0;
        for working in &mut self.routes {
            if working.route.len() < 2 {
                continue;
            }
            let frozen = working.route.frozen_len();
            let mut stops = working.route.stops.clone();
            stops[frozen..].sort_by_key(|stop| arrival.get(&stop.work_order_id).copied().unwrap_or(u64::MAX));
            if same_order(&stops, &working.route.stops) {
                continue;
            }
            if let Some(route) = self.sequencer.schedule(&working.snapshot, stops, Anchor::Tight) {
                if route.total_travel_secs() < working.travel() {
                    working.adopt(route);
                    adopted += 1;
                }
            }
        }
        adopted
    }

    fn two_opt(&mut self, budget: &Budget) -> Option<Step> {
        for working in &mut self.routes {
            let n = working.route.len();
            if n < 2 {
                continue;
            }
            let current = working.travel();
            for i in working.route.frozen_len()..n.saturating_sub(1) {
                for j in i + 1..n {
                    if budget.exhausted() {
                        return Some(Step::OutOfBudget);
                    }
                    let mut stops = working.route.stops.clone();
                    stops[i..=j].reverse();
                    let Some(route) = self.sequencer.schedule(&working.snapshot, stops, Anchor::Tight) else {
                        continue;
                    };
                    if route.total_travel_secs() < current {
                        tracing::debug!(technician = %working.snapshot.technician.id, i, j, "2-opt move");
                        working.adopt(route);
                        return Some(Step::Improved);
                    }
                }
            }
        }
        None
    }

    fn relocate(&mut self, budget: &Budget) -> Option<Step> {
        for from in 0..self.routes.len() {
            for idx in self.routes[from].route.frozen_len()..self.routes[from].route.len() {
                let mut remaining = self.routes[from].route.stops.clone();
                let moved = remaining.remove(idx);
                let Some(from_route) =
                    self.sequencer
                        .schedule(&self.routes[from].snapshot, remaining, Anchor::Tight)
                else {
                    continue;
                };

                for to in 0..self.routes.len() {
                    if to == from || !self.routes[to].snapshot.technician.skills.is_superset_of(&moved.skills) {
                        continue;
                    }
                    let before = self.routes[from].travel() + self.routes[to].travel();
                    for pos in self.routes[to].route.frozen_len()..=self.routes[to].route.len() {
                        if budget.exhausted() {
                            return Some(Step::OutOfBudget);
                        }
                        let mut stops = self.routes[to].route.stops.clone();
                        stops.insert(pos, moved.clone());
                        let Some(to_route) = self.sequencer.schedule(&self.routes[to].snapshot, stops, Anchor::Tight)
                        else {
                            continue;
                        };
                        if from_route.total_travel_secs() + to_route.total_travel_secs() < before {
                            tracing::debug!(
                                work_order = %moved.work_order_id,
                                from = %self.routes[from].snapshot.technician.id,
                                to = %self.routes[to].snapshot.technician.id,
                                "relocate move"
                            );
                            self.routes[from].adopt(from_route);
                            self.routes[to].adopt(to_route);
                            return Some(Step::Improved);
                        }
                    }
                }
            }
        }
        None
    }

    fn swap(&mut self, budget: &Budget) -> Option<Step> {
        let count = self.routes.len();
        for a in 0..count {
            for b in a + 1..count {
                let before = self.routes[a].travel() + self.routes[b].travel();
                for i in self.routes[a].route.frozen_len()..self.routes[a].route.len() {
                    for j in self.routes[b].route.frozen_len()..self.routes[b].route.len() {
                        if budget.exhausted() {
                            return Some(Step::OutOfBudget);
                        }
                        let stop_a = &self.routes[a].route.stops[i];
                        let stop_b = &self.routes[b].route.stops[j];
                        if !self.routes[b].snapshot.technician.skills.is_superset_of(&stop_a.skills)
                            || !self.routes[a].snapshot.technician.skills.is_superset_of(&stop_b.skills)
                        {
                            continue;
                        }

                        let mut stops_a = self.routes[a].route.stops.clone();
                        let mut stops_b = self.routes[b].route.stops.clone();
                        std::mem::swap(&mut stops_a[i], &mut stops_b[j]);

                        let Some(route_a) = self.sequencer.schedule(&self.routes[a].snapshot, stops_a, Anchor::Tight)
                        else {
                            continue;
                        };
                        let Some(route_b) = self.sequencer.schedule(&self.routes[b].snapshot, stops_b, Anchor::Tight)
                        else {
                            continue;
                        };
                        if route_a.total_travel_secs() + route_b.total_travel_secs() < before {
                            tracing::debug!(
                                a = %self.routes[a].snapshot.technician.id,
                                b = %self.routes[b].snapshot.technician.id,
                                "swap move"
                            );
                            self.routes[a].adopt(route_a);
                            self.routes[b].adopt(route_b);
                            return Some(Step::Improved);
                        }
                    }
                }
            }
        }
        None
    }
}

fn same_order(a: &[Stop], b: &[Stop]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.work_order_id == y.work_order_id)
}
