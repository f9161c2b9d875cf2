//! Serialized intake queue for one scheduling region.
//!
//! A single worker thread owns the write path: submissions and disruption
//! events are sent as [`Command`]s over a flume channel, each carrying its
//! own reply channel, and applied one at a time. Route reads go straight to
//! the controller and never wait behind the queue.

use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender};

use crate::controller::OptimizationController;
use crate::error::{EngineError, Result};
use crate::improve::ImprovementReport;
use crate::model::{
    AssignmentResult, Route, ServiceDate, TechnicianId, TechnicianProfile, Timestamp, WorkOrderId,
    WorkOrderRequest,
};
use crate::optimizer::CycleReport;
use crate::rebalancer::RebalanceReport;

type Reply<T> = Sender<Result<T>>;

enum Command {
    RegisterTechnician(TechnicianProfile, Reply<()>),
    Submit(WorkOrderRequest, Reply<AssignmentResult>),
    Cancel(WorkOrderId, Reply<RebalanceReport>),
    Complete(WorkOrderId, Reply<()>),
    TechnicianUnavailable {
        technician: TechnicianId,
        from: Timestamp,
        to: Timestamp,
        reply: Reply<RebalanceReport>,
    },
    TechnicianAvailable {
        technician: TechnicianId,
        from: Timestamp,
        to: Timestamp,
        reply: Reply<()>,
    },
    RunCycle(Sender<CycleReport>),
    Improve(ServiceDate, Reply<ImprovementReport>),
}

pub struct Dispatcher;

impl Dispatcher {
    /// Starts the worker thread for `controller`.
    pub fn spawn(controller: Arc<OptimizationController>) -> Result<DispatcherHandle> {
        let (sender, receiver) = flume::unbounded();
        let worker_controller = controller.clone();
        let worker = std::thread::Builder::new()
            .name("fieldroute-intake".to_string())
            .spawn(move || run(worker_controller, receiver))
            .map_err(|err| EngineError::Config(format!("cannot start intake worker: {err}")))?;

        Ok(DispatcherHandle {
            sender: Some(sender),
            worker: Some(worker),
            controller,
        })
    }
}

fn run(controller: Arc<OptimizationController>, receiver: Receiver<Command>) {
    tracing::debug!("intake worker started");
    for command in receiver.iter() {
        // A caller that gave up on its reply is not an error.
        match command {
            Command::RegisterTechnician(profile, reply) => {
                let _ = reply.send(controller.register_technician(&profile));
            }
            Command::Submit(request, reply) => {
                let _ = reply.send(controller.submit_work_order(&request));
            }
            Command::Cancel(id, reply) => {
                let _ = reply.send(controller.cancel_work_order(&id));
            }
            Command::Complete(id, reply) => {
                let _ = reply.send(controller.complete_work_order(&id));
            }
            Command::TechnicianUnavailable {
                technician,
                from,
                to,
                reply,
            } => {
                let _ = reply.send(controller.technician_unavailable(&technician, from, to));
            }
            Command::TechnicianAvailable {
                technician,
                from,
                to,
                reply,
            } => {
                let _ = reply.send(controller.technician_available(&technician, from, to));
            }
            Command::RunCycle(reply) => {
                let _ = reply.send(controller.run_cycle());
            }
            Command::Improve(date, reply) => {
                let _ = reply.send(controller.improve_routes(date));
            }
        }
    }
    tracing::debug!("intake worker stopped");
}

/// Client side of the intake queue. Dropping it drains the queue and stops
/// the worker.
pub struct DispatcherHandle {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    controller: Arc<OptimizationController>,
}

impl DispatcherHandle {
    pub fn register_technician(&self, profile: TechnicianProfile) -> Result<()> {
        self.call(|reply| Command::RegisterTechnician(profile, reply))
    }

    pub fn submit_work_order(&self, request: WorkOrderRequest) -> Result<AssignmentResult> {
        self.call(|reply| Command::Submit(request, reply))
    }

    pub fn cancel_work_order(&self, id: WorkOrderId) -> Result<RebalanceReport> {
        self.call(|reply| Command::Cancel(id, reply))
    }

    pub fn complete_work_order(&self, id: WorkOrderId) -> Result<()> {
        self.call(|reply| Command::Complete(id, reply))
    }

    pub fn technician_unavailable(
        &self,
        technician: TechnicianId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<RebalanceReport> {
        self.call(|reply| Command::TechnicianUnavailable {
            technician,
            from,
            to,
            reply,
        })
    }

    pub fn technician_available(&self, technician: TechnicianId, from: Timestamp, to: Timestamp) -> Result<()> {
        self.call(|reply| Command::TechnicianAvailable {
            technician,
            from,
            to,
            reply,
        })
    }

    pub fn run_cycle(&self) -> Result<CycleReport> {
        let (reply, answer) = flume::bounded(1);
        self.send(Command::RunCycle(reply))?;
        answer.recv().map_err(|_| EngineError::IntakeClosed)
    }

    pub fn improve_routes(&self, date: ServiceDate) -> Result<ImprovementReport> {
        self.call(|reply| Command::Improve(date, reply))
    }

    /// Reads bypass the queue.
    pub fn get_route(&self, technician: &TechnicianId, date: ServiceDate) -> Result<Route> {
        self.controller.get_route(technician, date)
    }

    pub fn work_order_status(&self, id: &WorkOrderId) -> Result<AssignmentResult> {
        self.controller.work_order_status(id)
    }

    /// Stops accepting commands, lets the worker finish what is queued, and
    /// joins it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, answer) = flume::bounded(1);
        self.send(command(reply))?;
        answer.recv().map_err(|_| EngineError::IntakeClosed)?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(EngineError::IntakeClosed)?
            .send(command)
            .map_err(|_| EngineError::IntakeClosed)
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("intake worker panicked");
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
