//! Work-order book: the engine's projection of every work order it has
//! seen, its lifecycle state, and the unassigned pool.
//!
//! The pool is ordered by priority (highest first), then deadline, then
//! arrival. Pool membership follows the status: an order is pooled exactly
//! while it is `Unassigned` or `TentativelyAssigned`.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{EngineError, Result};
use crate::model::{
    Assignment, AssignmentResult, ReasonCode, Timestamp, WorkOrder, WorkOrderId, WorkOrderStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkOrderRecord {
    pub order: WorkOrder,
    pub status: WorkOrderStatus,
    pub assignment: Option<Assignment>,
    /// Consecutive cycles without a feasible insertion.
    pub deferrals: u32,
    /// Bumped whenever the order's content changes.
    pub revision: u64,
    /// Arrival order; the naive baseline sequences stops by it.
    pub sequence: u64,
    pub reason: Option<ReasonCode>,
    pub reassignments: u32,
}

impl WorkOrderRecord {
    pub fn result(&self) -> AssignmentResult {
        match (&self.status, &self.assignment) {
            (WorkOrderStatus::Committed, Some(assignment)) => {
                AssignmentResult::committed(self.order.id.clone(), assignment)
            }
            (WorkOrderStatus::Completed, Some(assignment)) => AssignmentResult {
                status: WorkOrderStatus::Completed,
                ..AssignmentResult::committed(self.order.id.clone(), assignment)
            },
            _ => AssignmentResult::pending(self.order.id.clone(), self.status, self.reason),
        }
    }

    fn pool_key(&self) -> PoolKey {
        PoolKey {
            priority: Reverse(self.order.priority),
            latest: self.order.window.latest,
            sequence: self.sequence,
            id: self.order.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PoolKey {
    priority: Reverse<u8>,
    latest: Timestamp,
    sequence: u64,
    id: WorkOrderId,
}

/// What a submission did to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    New,
    /// Same content as the stored order; carries its current status.
    Unchanged(WorkOrderStatus),
    /// Content changed; carries the status before the change.
    Changed(WorkOrderStatus),
}

#[derive(Debug, Default)]
pub struct BookState {
    records: HashMap<WorkOrderId, WorkOrderRecord>,
    pool: BTreeSet<PoolKey>,
    next_sequence: u64,
}

impl BookState {
    pub fn get(&self, id: &WorkOrderId) -> Option<&WorkOrderRecord> {
        self.records.get(id)
    }

    pub fn record(&self, id: &WorkOrderId) -> Result<&WorkOrderRecord> {
        self.records
            .get(id)
            .ok_or_else(|| EngineError::UnknownWorkOrder(id.clone()))
    }

    /// Adds a new order or refreshes a known one. Terminal orders cannot be
    /// resubmitted.
    pub fn upsert(&mut self, order: WorkOrder) -> Result<Intake> {
        let Some(existing) = self.records.get(&order.id) else {
            let record = WorkOrderRecord {
                status: WorkOrderStatus::Unassigned,
                assignment: None,
                deferrals: 0,
                revision: 0,
                sequence: self.next_sequence,
                reason: None,
                reassignments: 0,
                order,
            };
            self.next_sequence += 1;
            self.pool.insert(record.pool_key());
            self.records.insert(record.order.id.clone(), record);
            return Ok(Intake::New);
        };

        let status = existing.status;
        if status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id: order.id.clone(),
                from: status,
                to: WorkOrderStatus::Unassigned,
            });
        }
        if existing.order == order {
            return Ok(Intake::Unchanged(status));
        }

        let old_key = existing.pool_key();
        let id = order.id.clone();
        let pooled = self.pool.remove(&old_key);
        let record = self.require_mut(&id)?;
        record.order = order;
        record.revision += 1;
        let key = record.pool_key();
        if pooled {
            self.pool.insert(key);
        }
        Ok(Intake::Changed(status))
    }

    /// Applies a lifecycle transition, keeping pool membership in step.
    pub fn transition(
        &mut self,
        id: &WorkOrderId,
        next: WorkOrderStatus,
        reason: Option<ReasonCode>,
    ) -> Result<()> {
        let record = self.require_mut(id)?;
        let from = record.status;
        if !from.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                id: id.clone(),
                from,
                to: next,
            });
        }
        if from == WorkOrderStatus::Committed && next == WorkOrderStatus::TentativelyAssigned {
            record.reassignments += 1;
        }
        if next != WorkOrderStatus::Committed && next != WorkOrderStatus::Completed {
            record.assignment = None;
        }
        if next == WorkOrderStatus::Unassigned && from == WorkOrderStatus::Unschedulable {
            record.deferrals = 0;
        }
        record.status = next;
        record.reason = reason;

        let key = record.pool_key();
        if next.is_pending() {
            self.pool.insert(key);
        } else {
            self.pool.remove(&key);
        }
        Ok(())
    }

    /// Records a committed assignment. The order must be tentatively
    /// assigned.
    pub fn commit(&mut self, id: &WorkOrderId, assignment: Assignment) -> Result<()> {
        self.transition(id, WorkOrderStatus::Committed, None)?;
        let record = self.require_mut(id)?;
        record.assignment = Some(assignment);
        record.deferrals = 0;
        Ok(())
    }

    /// Updates the stored assignment after a resequencing moved the stop.
    pub fn refresh_assignment(&mut self, id: &WorkOrderId, assignment: Assignment) -> Result<()> {
        let record = self.require_mut(id)?;
        if matches!(record.status, WorkOrderStatus::Committed | WorkOrderStatus::Completed) {
            record.assignment = Some(assignment);
        }
        Ok(())
    }

    /// Counts a failed placement attempt and returns the new total.
    pub fn defer(&mut self, id: &WorkOrderId, reason: ReasonCode) -> Result<u32> {
        let record = self.require_mut(id)?;
        record.deferrals += 1;
        record.reason = Some(reason);
        Ok(record.deferrals)
    }

    /// Pooled orders in processing order.
    pub fn pending(&self) -> Vec<WorkOrderId> {
        self.pool.iter().map(|key| key.id.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pool.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &WorkOrderRecord> {
        self.records.values()
    }

    fn require_mut(&mut self, id: &WorkOrderId) -> Result<&mut WorkOrderRecord> {
        self.records
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownWorkOrder(id.clone()))
    }
}

/// Shared book. Lock order: book first, then any availability slot.
#[derive(Debug, Default)]
pub struct WorkOrderBook {
    state: Mutex<BookState>,
}

impl WorkOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock()
    }

    pub fn get(&self, id: &WorkOrderId) -> Option<WorkOrderRecord> {
        self.state.lock().get(id).cloned()
    }

    pub fn status(&self, id: &WorkOrderId) -> Option<WorkOrderStatus> {
        self.state.lock().get(id).map(|record| record.status)
    }

    pub fn pending(&self) -> Vec<WorkOrderId> {
        self.state.lock().pending()
    }
}
