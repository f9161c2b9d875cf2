//! Route sequencing: timing an ordered list of stops and finding the
//! cheapest feasible place to insert a new one.

use crate::availability::DaySnapshot;
use crate::config::{ObjectiveWeights, SequencerConfig};
use crate::distance::DistanceEstimator;
use crate::model::{Accuracy, Interval, Route, Stop, WindowBreach, WorkOrder, WorkOrderId};

/// How an insertion may treat stops already on the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionMode {
    /// Later stops may be pushed back as far as their windows allow.
    Shift,
    /// Existing stops must stay exactly as committed: same times and the
    /// same inbound leg. Used when placing work on someone else's route.
    PreserveCommitted,
}

/// Start-time policy when timing a stop list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor<'a> {
    /// Every stop starts as early as possible.
    Tight,
    /// Planned stops never move earlier than their current arrival; only
    /// `except` (a stop being placed for the first time) floats freely.
    KeepCommitted { except: Option<&'a WorkOrderId> },
}

/// Result of a successful cheapest insertion.
#[derive(Debug, Clone)]
pub struct Insertion {
    pub route: Route,
    pub position: usize,
    pub added_travel_secs: i64,
    pub cost: f64,
    /// Worst accuracy of the legs into and out of the new stop.
    pub accuracy: Accuracy,
    pub breach: Option<WindowBreach>,
}

impl Insertion {
    pub fn stop(&self) -> &Stop {
        &self.route.stops[self.position]
    }
}

pub struct RouteSequencer<'a> {
    estimator: &'a DistanceEstimator,
    config: &'a SequencerConfig,
    weights: &'a ObjectiveWeights,
}

impl<'a> RouteSequencer<'a> {
    pub fn new(
        estimator: &'a DistanceEstimator,
        config: &'a SequencerConfig,
        weights: &'a ObjectiveWeights,
    ) -> Self {
        Self {
            estimator,
            config,
            weights,
        }
    }

    /// Cheapest-insertion over every gap of the snapshot's route. `None`
    /// means no gap is feasible for this technician.
    pub fn insert(&self, snapshot: &DaySnapshot, order: &WorkOrder, mode: InsertionMode) -> Option<Insertion> {
        if !snapshot.technician.can_perform(order) || !snapshot.has_capacity() {
            return None;
        }
        if snapshot.route.position_of(&order.id).is_some() {
            return None;
        }

        let current = &snapshot.route;
        let base_travel = current.total_travel_secs();
        let mut best: Option<Insertion> = None;

        for position in current.frozen_len()..=current.len() {
            let mut stops = current.stops.clone();
            stops.insert(position, Stop::for_order(order));

            let Some(route) = self.schedule(
                snapshot,
                stops,
                Anchor::KeepCommitted {
                    except: Some(&order.id),
                },
            ) else {
                continue;
            };

            if mode == InsertionMode::PreserveCommitted && disturbs_existing(current, &route, position) {
                continue;
            }

            let new_stop = &route.stops[position];
            let added_travel_secs = route.total_travel_secs() - base_travel;
            let lateness = new_stop.breach.map_or(0, |breach| breach.late_by_secs);
            let cost = added_travel_secs as f64 * self.weights.travel_per_second
                + lateness as f64 * self.weights.lateness_per_second;

            if best.as_ref().is_some_and(|b| cost >= b.cost) {
                continue;
            }

            let leg_out = route
                .stops
                .get(position + 1)
                .map_or(Accuracy::Exact, |next| next.accuracy);
            best = Some(Insertion {
                accuracy: new_stop.accuracy.worst(leg_out),
                breach: new_stop.breach,
                position,
                added_travel_secs,
                cost,
                route,
            });
        }

        if let Some(found) = &best {
            tracing::debug!(
                technician = %snapshot.technician.id,
                work_order = %order.id,
                position = found.position,
                added_travel_secs = found.added_travel_secs,
                "cheapest insertion"
            );
        }
        best
    }

    /// Times `stops` in the given order. `None` if any stop misses its
    /// window (beyond grace), the working hours, or the daily capacity.
    /// Completed stops are pinned to their recorded arrival.
    pub fn schedule(&self, snapshot: &DaySnapshot, stops: Vec<Stop>, anchor: Anchor<'_>) -> Option<Route> {
        if stops.len() as u32 > snapshot.technician.max_jobs_per_day {
            return None;
        }

        let shift = snapshot.shift();
        let blocked = snapshot.blocked();
        let grace = self.config.window_grace_secs;

        let mut ready = shift.start;
        let mut previous = snapshot.technician.location;
        let mut timed = Vec::with_capacity(stops.len());

        for mut stop in stops {
            let leg = self.estimator.estimate(previous, stop.location);
            let mut start = (ready + leg.duration_secs)
                .max(stop.window.earliest)
                .max(shift.start);
            if let Anchor::KeepCommitted { except } = anchor {
                if except != Some(&stop.work_order_id) {
                    start = start.max(stop.arrival);
                }
            }
            let mut start = skip_blocked(start, stop.duration_secs, &blocked);
            if stop.completed {
                // Done work is a fact: it can be reached earlier, never later.
                if start > stop.arrival {
                    return None;
                }
                start = stop.arrival;
            }
            let end = start + stop.duration_secs;

            let late_by = end - stop.window.latest;
            if !stop.completed && (end > shift.end || late_by > grace) {
                return None;
            }

            stop.arrival = start;
            stop.departure = end;
            stop.travel_secs = leg.duration_secs;
            stop.travel_km = leg.distance_km;
            stop.accuracy = leg.accuracy;
            stop.breach = (late_by > 0).then_some(WindowBreach {
                late_by_secs: late_by,
            });

            ready = end;
            previous = stop.location;
            timed.push(stop);
        }

        Some(Route {
            technician_id: snapshot.technician.id.clone(),
            date: snapshot.date,
            stops: timed,
        })
    }
}

/// First start at or after `start` where `[start, start + duration)` avoids
/// every block. `blocked` is sorted and disjoint.
fn skip_blocked(mut start: i64, duration: i64, blocked: &[Interval]) -> i64 {
    for block in blocked {
        if block.end <= start {
            continue;
        }
        if block.start >= start + duration {
            break;
        }
        start = block.end;
    }
    start
}

fn disturbs_existing(before: &Route, after: &Route, inserted_at: usize) -> bool {
    after
        .stops
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != inserted_at)
        .zip(&before.stops)
        .any(|((_, new), old)| new != old)
}
