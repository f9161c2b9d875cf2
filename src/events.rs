//! Events published for downstream ticket and notification systems.

use serde::{Deserialize, Serialize};

use crate::model::{Accuracy, ReasonCode, ServiceDate, TechnicianId, WorkOrderId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    AssignmentCommitted {
        work_order_id: WorkOrderId,
        technician_id: TechnicianId,
        service_date: ServiceDate,
        accuracy: Accuracy,
    },
    WorkOrderUnschedulable {
        work_order_id: WorkOrderId,
        reason: ReasonCode,
    },
    /// A committed stop was taken off a route and sent back to the pool.
    AssignmentReleased {
        work_order_id: WorkOrderId,
        technician_id: TechnicianId,
        reason: ReasonCode,
    },
}

impl EngineEvent {
    pub fn work_order_id(&self) -> &WorkOrderId {
        match self {
            EngineEvent::AssignmentCommitted { work_order_id, .. }
            | EngineEvent::WorkOrderUnschedulable { work_order_id, .. }
            | EngineEvent::AssignmentReleased { work_order_id, .. } => work_order_id,
        }
    }
}
