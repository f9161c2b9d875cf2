//! Seams to external collaborators.
//!
//! The engine consumes a map service and emits events; it implements
//! neither. Hosts plug their own providers in behind these traits.

use crate::error::MapError;
use crate::events::EngineEvent;
use crate::model::Coordinates;

/// One origin→destination travel estimate from the map provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelLeg {
    pub distance_km: f64,
    pub duration_secs: i64,
}

impl TravelLeg {
    pub const ZERO: TravelLeg = TravelLeg {
        distance_km: 0.0,
        duration_secs: 0,
    };
}

/// External map/routing provider.
///
/// Implementations may fail; the distance estimator retries and then falls
/// back to a geometric estimate.
pub trait MapService: Send + Sync {
    fn distance_duration(&self, from: Coordinates, to: Coordinates) -> Result<TravelLeg, MapError>;
}

/// Receiver for engine events (ticketing, notifications, dashboards).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for flume::Sender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        if self.send(event).is_err() {
            tracing::debug!("event receiver dropped; discarding event");
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}
