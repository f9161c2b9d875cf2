//! Error types for the dispatch engine.
//!
//! Business outcomes such as "no technician can take this job" are not
//! errors; they surface as work-order states with a [`ReasonCode`].
//!
//! [`ReasonCode`]: crate::model::ReasonCode

use thiserror::Error;

use crate::model::{Interval, TechnicianId, WorkOrderId, WorkOrderStatus};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid work order {id}: {reason}")]
    InvalidWorkOrder { id: String, reason: String },

    #[error("invalid technician {id}: {reason}")]
    InvalidTechnician { id: String, reason: String },

    #[error("unknown skill label: {0}")]
    UnknownSkill(String),

    #[error("unknown technician: {0}")]
    UnknownTechnician(TechnicianId),

    #[error("unknown work order: {0}")]
    UnknownWorkOrder(WorkOrderId),

    #[error("work order {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: WorkOrderId,
        from: WorkOrderStatus,
        to: WorkOrderStatus,
    },

    #[error("interval {interval} overlaps committed time for technician {technician}")]
    Overlap {
        technician: TechnicianId,
        interval: Interval,
    },

    #[error("route for technician {technician} rejected: {detail}")]
    RouteViolation {
        technician: TechnicianId,
        detail: String,
    },

    #[error("technician {technician} timeline changed (expected version {expected}, found {found})")]
    ConcurrentModification {
        technician: TechnicianId,
        expected: u64,
        found: u64,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("intake queue is closed")]
    IntakeClosed,
}

impl EngineError {
    pub(crate) fn invalid_work_order(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidWorkOrder {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_technician(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidTechnician {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn route_violation(technician: &TechnicianId, detail: impl Into<String>) -> Self {
        EngineError::RouteViolation {
            technician: technician.clone(),
            detail: detail.into(),
        }
    }

    /// Whether the failure came from a stale version token.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }
}

/// Failures reported by the external map service.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("map service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("map service found no route")]
    NoRoute,

    #[error("map service unavailable: {0}")]
    Unavailable(String),
}
