//! Service-facing façade over the engine.
//!
//! Validates ingress, routes each call to the optimizer or rebalancer and
//! answers with the work order's resulting state. Safe to share across
//! threads; wrap it in a [`Dispatcher`](crate::intake::Dispatcher) to
//! serialize a region's events through one queue.

use std::sync::Arc;

use crate::availability::AvailabilityIndex;
use crate::book::{Intake, WorkOrderBook};
use crate::config::EngineConfig;
use crate::distance::{CacheStats, DistanceEstimator};
use crate::error::{EngineError, Result};
use crate::improve::ImprovementReport;
use crate::model::{
    AssignmentResult, Interval, Route, ServiceDate, Technician, TechnicianId, TechnicianProfile,
    Timestamp, WorkOrder, WorkOrderId, WorkOrderRequest, WorkOrderStatus,
};
use crate::optimizer::{AssignmentOptimizer, CycleReport, Placement};
use crate::osrm::OsrmClient;
use crate::rebalancer::{RebalanceReport, Rebalancer};
use crate::sequencer::InsertionMode;
use crate::skills::SkillCatalog;
use crate::traits::{EventSink, MapService};

pub struct OptimizationController {
    catalog: SkillCatalog,
    optimizer: Arc<AssignmentOptimizer>,
    rebalancer: Rebalancer,
}

impl OptimizationController {
    /// Builds an engine. Without a map service every estimate is geometric
    /// and flagged degraded.
    pub fn new(
        config: EngineConfig,
        map: Option<Arc<dyn MapService>>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = config.skill_catalog()?;
        let estimator = Arc::new(DistanceEstimator::new(map, config.distance.clone()));
        let optimizer = Arc::new(AssignmentOptimizer::new(
            Arc::new(AvailabilityIndex::new()),
            estimator,
            Arc::new(WorkOrderBook::new()),
            Arc::new(config),
            events,
        ));
        tracing::info!(skills = %catalog, "engine ready");
        Ok(Self {
            catalog,
            rebalancer: Rebalancer::new(optimizer.clone()),
            optimizer,
        })
    }

    /// Builds an engine whose map service comes from the `[osrm]` section.
    pub fn from_config(config: EngineConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        let map: Option<Arc<dyn MapService>> = match &config.osrm {
            Some(osrm) => {
                let client = OsrmClient::new(osrm.clone())
                    .map_err(|err| EngineError::Config(format!("osrm client: {err}")))?;
                tracing::info!(base_url = %osrm.base_url, profile = %osrm.profile, "using OSRM map service");
                let map: Arc<dyn MapService> = Arc::new(client);
                Some(map)
            }
            None => None,
        };
        Self::new(config, map, events)
    }

    pub fn config(&self) -> &EngineConfig {
        self.optimizer.config()
    }

    pub fn catalog(&self) -> &SkillCatalog {
        &self.catalog
    }

    /// Registers a technician or updates its profile.
    #[tracing::instrument(skip(self, profile), fields(technician = %profile.id))]
    pub fn register_technician(&self, profile: &TechnicianProfile) -> Result<()> {
        let technician = Technician::from_profile(profile, &self.catalog)?;
        self.optimizer.index().upsert(technician)
    }

    /// Accepts a new or updated work order and tries to place it at once.
    ///
    /// Resubmitting a committed order unchanged returns its assignment and
    /// changes nothing. A changed committed order is taken off its route and
    /// placed again.
    #[tracing::instrument(skip(self, request), fields(work_order = %request.id))]
    pub fn submit_work_order(&self, request: &WorkOrderRequest) -> Result<AssignmentResult> {
        let order = WorkOrder::from_request(request, &self.catalog)?;
        let id = order.id.clone();
        let urgent = order.priority >= self.config().rebalancer.urgent_priority;

        let intake = self.optimizer.book().lock().upsert(order)?;
        match intake {
            Intake::Unchanged(WorkOrderStatus::Committed) => {
                tracing::debug!("unchanged resubmission of a committed order");
                return self.work_order_status(&id);
            }
            Intake::Unchanged(WorkOrderStatus::Unschedulable) | Intake::Changed(WorkOrderStatus::Unschedulable) => {
                self.optimizer
                    .book()
                    .lock()
                    .transition(&id, WorkOrderStatus::Unassigned, None)?;
            }
            Intake::Changed(WorkOrderStatus::Committed) => {
                self.rebalancer.release_for_update(&id)?;
            }
            _ => {}
        }

        let placement = self.optimizer.assign(&id, InsertionMode::Shift)?;
        if urgent && matches!(placement, Placement::Deferred(_)) {
            self.rebalancer.displace_for(&id)?;
        }
        self.work_order_status(&id)
    }

    #[tracing::instrument(skip(self, id), fields(work_order = %id))]
    pub fn cancel_work_order(&self, id: &WorkOrderId) -> Result<RebalanceReport> {
        self.rebalancer.cancel(id)
    }

    /// Marks a committed order done. Its stop stays on the route, pinned to
    /// its position and times.
    #[tracing::instrument(skip(self, id), fields(work_order = %id))]
    pub fn complete_work_order(&self, id: &WorkOrderId) -> Result<()> {
        self.optimizer.complete(id)
    }

    pub fn technician_unavailable(
        &self,
        technician: &TechnicianId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<RebalanceReport> {
        self.rebalancer
            .technician_unavailable(technician, Interval::new(from, to))
    }

    pub fn technician_available(&self, technician: &TechnicianId, from: Timestamp, to: Timestamp) -> Result<()> {
        self.rebalancer
            .technician_available(technician, Interval::new(from, to))
            .map(|_| ())
    }

    /// Ordered stops with planned arrival and departure.
    pub fn get_route(&self, technician: &TechnicianId, date: ServiceDate) -> Result<Route> {
        self.optimizer.index().route(technician, date)
    }

    pub fn work_order_status(&self, id: &WorkOrderId) -> Result<AssignmentResult> {
        self.optimizer
            .book()
            .get(id)
            .map(|record| record.result())
            .ok_or_else(|| EngineError::UnknownWorkOrder(id.clone()))
    }

    pub fn run_cycle(&self) -> CycleReport {
        self.optimizer.run_cycle()
    }

    pub fn improve_routes(&self, date: ServiceDate) -> Result<ImprovementReport> {
        self.optimizer.improve(date)
    }

    pub fn pending(&self) -> Vec<WorkOrderId> {
        self.optimizer.book().pending()
    }

    pub fn distance_stats(&self) -> CacheStats {
        self.optimizer.estimator().stats()
    }
}
