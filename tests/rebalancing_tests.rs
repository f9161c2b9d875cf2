//! Cancellations, technician outages and urgent displacement.

mod fixtures;

use fieldroute::error::EngineError;
use fieldroute::events::EngineEvent;
use fieldroute::model::{ReasonCode, TechnicianId, WorkOrderId, WorkOrderStatus};

use fixtures::*;

fn tech(id: &str) -> TechnicianId {
    TechnicianId::new(id)
}

fn order(id: &str) -> WorkOrderId {
    WorkOrderId::new(id)
}

fn status(engine: &fieldroute::controller::OptimizationController, id: &str) -> WorkOrderStatus {
    engine.work_order_status(&order(id)).unwrap().status
}

// ============================================================================
// Technician unavailable
// ============================================================================

#[test]
fn outage_moves_only_the_affected_route() {
    let (engine, events) = engine_with_events();
    engine
        .register_technician(&TestTechnician::new("x").skills(&["HVAC"]).build())
        .unwrap();
    engine
        .register_technician(&TestTechnician::new("y").skills(&["PLUMBING"]).build())
        .unwrap();

    engine
        .submit_work_order(&TestWorkOrder::new("x-1").location(1.0, 0.0).build())
        .unwrap();
    engine
        .submit_work_order(&TestWorkOrder::new("x-2").location(2.0, 0.0).build())
        .unwrap();
    engine
        .submit_work_order(
            &TestWorkOrder::new("y-1")
                .requires(&["PLUMBING"])
                .location(1.0, 1.0)
                .build(),
        )
        .unwrap();
    assert_eq!(stop_ids(&engine.get_route(&tech("x"), DAY).unwrap()), vec!["x-1", "x-2"]);

    engine
        .register_technician(&TestTechnician::new("z").skills(&["HVAC"]).build())
        .unwrap();
    let y_before = route_json(&engine.get_route(&tech("y"), DAY).unwrap());
    let _ = events.try_iter().count();

    let report = engine.technician_unavailable(&tech("x"), hour(8), hour(17)).unwrap();

    assert_eq!(report.released, vec![order("x-1"), order("x-2")]);
    assert_eq!(report.committed, 2);
    assert!(engine.get_route(&tech("x"), DAY).unwrap().is_empty());
    assert_eq!(stop_ids(&engine.get_route(&tech("z"), DAY).unwrap()), vec!["x-1", "x-2"]);
    assert_eq!(y_before, route_json(&engine.get_route(&tech("y"), DAY).unwrap()));

    let released: Vec<EngineEvent> = events
        .try_iter()
        .filter(|event| matches!(event, EngineEvent::AssignmentReleased { .. }))
        .collect();
    assert_eq!(
        released,
        vec![
            EngineEvent::AssignmentReleased {
                work_order_id: order("x-1"),
                technician_id: tech("x"),
                reason: ReasonCode::TechnicianUnavailable,
            },
            EngineEvent::AssignmentReleased {
                work_order_id: order("x-2"),
                technician_id: tech("x"),
                reason: ReasonCode::TechnicianUnavailable,
            },
        ]
    );
}

#[test]
fn partial_outage_keeps_stops_outside_the_interval() {
    let engine = engine();
    engine
        .register_technician(&TestTechnician::new("x").skills(&["HVAC"]).build())
        .unwrap();
    engine
        .submit_work_order(&TestWorkOrder::new("morning").location(1.0, 0.0).window(8, 10).build())
        .unwrap();
    engine
        .submit_work_order(&TestWorkOrder::new("afternoon").location(2.0, 0.0).window(13, 15).build())
        .unwrap();
    engine
        .register_technician(&TestTechnician::new("z").skills(&["HVAC"]).build())
        .unwrap();
    let morning_before = engine.get_route(&tech("x"), DAY).unwrap().stops[0].clone();

    let report = engine.technician_unavailable(&tech("x"), hour(12), hour(17)).unwrap();

    assert_eq!(report.released, vec![order("afternoon")]);
    let x_route = engine.get_route(&tech("x"), DAY).unwrap();
    assert_eq!(x_route.stops, vec![morning_before]);
    assert_eq!(status(&engine, "morning"), WorkOrderStatus::Committed);

    let afternoon = engine.work_order_status(&order("afternoon")).unwrap();
    assert_eq!(afternoon.status, WorkOrderStatus::Committed);
    assert_eq!(afternoon.technician_id, Some(tech("z")));
}

#[test]
fn orphans_wait_in_pool_until_technician_returns() {
    let engine = engine();
    engine.register_technician(&TestTechnician::new("x").build()).unwrap();
    for (id, lat) in [("wo-1", 1.0), ("wo-2", 2.0)] {
        engine
            .submit_work_order(&TestWorkOrder::new(id).location(lat, 0.0).build())
            .unwrap();
    }

    let report = engine.technician_unavailable(&tech("x"), hour(8), hour(17)).unwrap();
    assert_eq!(report.released.len(), 2);
    assert_eq!(report.deferred, 2);
    for id in ["wo-1", "wo-2"] {
        let result = engine.work_order_status(&order(id)).unwrap();
        assert_eq!(result.status, WorkOrderStatus::Unassigned);
        assert_eq!(result.reason, Some(ReasonCode::NoFeasibleCandidate));
    }

    // Repeating the same outage changes nothing.
    let again = engine.technician_unavailable(&tech("x"), hour(8), hour(17)).unwrap();
    assert!(again.released.is_empty());

    engine.technician_available(&tech("x"), hour(8), hour(17)).unwrap();
    let cycle = engine.run_cycle();
    assert_eq!(cycle.committed, 2);
    assert_eq!(engine.get_route(&tech("x"), DAY).unwrap().len(), 2);
}

#[test]
fn outage_keeps_completed_work_on_the_route() {
    let (engine, events) = engine_with_events();
    engine.register_technician(&TestTechnician::new("t1").build()).unwrap();
    for (id, lat) in [("wo-1", 1.0), ("wo-2", 2.0)] {
        engine
            .submit_work_order(&TestWorkOrder::new(id).location(lat, 0.0).build())
            .unwrap();
    }
    engine.complete_work_order(&order("wo-1")).unwrap();
    let done = engine.get_route(&tech("t1"), DAY).unwrap().stops[0].clone();
    assert!(done.completed);
    let _ = events.try_iter().count();

    let report = engine.technician_unavailable(&tech("t1"), hour(8), hour(17)).unwrap();

    assert_eq!(report.released, vec![order("wo-2")]);
    let route = engine.get_route(&tech("t1"), DAY).unwrap();
    assert_eq!(route.stops, vec![done]);
    assert_eq!(status(&engine, "wo-1"), WorkOrderStatus::Completed);
    assert!(status(&engine, "wo-2").is_pending());

    let released: Vec<EngineEvent> = events
        .try_iter()
        .filter(|event| matches!(event, EngineEvent::AssignmentReleased { .. }))
        .collect();
    assert_eq!(released.len(), 1);

    // Repeating the outage finds nothing left to release.
    let again = engine.technician_unavailable(&tech("t1"), hour(8), hour(17)).unwrap();
    assert!(again.released.is_empty());
    assert_eq!(engine.get_route(&tech("t1"), DAY).unwrap().len(), 1);
}

#[test]
fn completed_stop_survives_cancelling_an_earlier_one() {
    let engine = engine();
    engine.register_technician(&TestTechnician::new("t1").build()).unwrap();
    for (id, lat) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        engine
            .submit_work_order(&TestWorkOrder::new(id).location(lat, 0.0).build())
            .unwrap();
    }
    engine.complete_work_order(&order("b")).unwrap();
    let b_before = engine.get_route(&tech("t1"), DAY).unwrap().stops[1].clone();

    engine.cancel_work_order(&order("a")).unwrap();

    let route = engine.get_route(&tech("t1"), DAY).unwrap();
    assert_eq!(stop_ids(&route), vec!["b", "c"]);
    assert_eq!(route.stops[0].arrival, b_before.arrival);
    assert!(route.stops[0].completed);
    let b = engine.work_order_status(&order("b")).unwrap();
    assert_eq!(b.status, WorkOrderStatus::Completed);
    assert_eq!(b.route_position, Some(0));
}

#[test]
fn overlong_outage_is_rejected_without_changes() {
    let engine = engine();
    engine.register_technician(&TestTechnician::new("x").build()).unwrap();
    engine
        .submit_work_order(&TestWorkOrder::new("wo-1").location(1.0, 0.0).build())
        .unwrap();
    let before = route_json(&engine.get_route(&tech("x"), DAY).unwrap());
    let far = hour(8) + 2_000_000 * 86_400;

    let result = engine.technician_unavailable(&tech("x"), hour(8), far);
    assert!(matches!(result, Err(EngineError::InvalidTechnician { .. })));
    assert!(matches!(
        engine.technician_available(&tech("x"), hour(8), far),
        Err(EngineError::InvalidTechnician { .. })
    ));

    assert_eq!(before, route_json(&engine.get_route(&tech("x"), DAY).unwrap()));
    assert_eq!(status(&engine, "wo-1"), WorkOrderStatus::Committed);

    // A year is still accepted.
    let year = engine
        .technician_unavailable(&tech("x"), hour(8), hour(8) + 365 * 86_400)
        .unwrap();
    assert_eq!(year.released, vec![order("wo-1")]);
}

#[test]
fn outage_for_unknown_technician_is_an_error() {
    let engine = engine();
    let result = engine.technician_unavailable(&tech("ghost"), hour(8), hour(9));
    assert!(matches!(result, Err(EngineError::UnknownTechnician(_))));
}

// ============================================================================
// Cancel and complete
// ============================================================================

#[test]
fn cancel_removes_stop_and_keeps_neighbours() {
    let engine = engine();
    engine.register_technician(&TestTechnician::new("t1").build()).unwrap();
    for (id, lat) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        engine
            .submit_work_order(&TestWorkOrder::new(id).location(lat, 0.0).build())
            .unwrap();
    }
    let before = engine.get_route(&tech("t1"), DAY).unwrap();

    let report = engine.cancel_work_order(&order("b")).unwrap();
    assert!(report.released.is_empty());
    assert_eq!(status(&engine, "b"), WorkOrderStatus::Cancelled);

    let after = engine.get_route(&tech("t1"), DAY).unwrap();
    assert_eq!(stop_ids(&after), vec!["a", "c"]);
    assert_eq!(after.stops[0], before.stops[0]);
    // c keeps its committed time; the shorter leg only adds idle time.
    assert_eq!(after.stops[1].arrival, before.stops[2].arrival);
    assert_eq!(after.stops[1].travel_secs, minutes(2));
    assert_eq!(engine.work_order_status(&order("c")).unwrap().route_position, Some(1));

    assert!(matches!(
        engine.cancel_work_order(&order("b")),
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[test]
fn cancel_pooled_order_leaves_the_pool() {
    let engine = engine();
    engine
        .register_technician(&TestTechnician::new("t1").max_jobs(1).build())
        .unwrap();
    engine.submit_work_order(&TestWorkOrder::new("first").build()).unwrap();
    engine.submit_work_order(&TestWorkOrder::new("second").build()).unwrap();
    assert_eq!(engine.pending(), vec![order("second")]);

    engine.cancel_work_order(&order("second")).unwrap();
    assert!(engine.pending().is_empty());
    assert_eq!(status(&engine, "second"), WorkOrderStatus::Cancelled);
}

#[test]
fn completed_orders_cannot_be_cancelled() {
    let engine = engine();
    engine.register_technician(&TestTechnician::new("t1").build()).unwrap();
    engine.submit_work_order(&TestWorkOrder::new("done").build()).unwrap();

    engine.complete_work_order(&order("done")).unwrap();
    assert_eq!(status(&engine, "done"), WorkOrderStatus::Completed);
    assert_eq!(engine.get_route(&tech("t1"), DAY).unwrap().len(), 1);

    assert!(matches!(
        engine.cancel_work_order(&order("done")),
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.submit_work_order(&TestWorkOrder::new("done").duration(45).build()),
        Err(EngineError::InvalidTransition { .. })
    ));
}

// ============================================================================
// Urgent displacement
// ============================================================================

#[test]
fn urgent_order_displaces_lower_priority_stop() {
    let (engine, events) = engine_with_events();
    engine
        .register_technician(&TestTechnician::new("t1").max_jobs(1).build())
        .unwrap();
    engine
        .submit_work_order(&TestWorkOrder::new("routine").location(1.0, 0.0).priority(1).build())
        .unwrap();
    let _ = events.try_iter().count();

    let urgent = engine
        .submit_work_order(&TestWorkOrder::new("urgent").location(2.0, 0.0).priority(9).build())
        .unwrap();

    assert_eq!(urgent.status, WorkOrderStatus::Committed);
    assert_eq!(urgent.technician_id, Some(tech("t1")));
    assert_eq!(stop_ids(&engine.get_route(&tech("t1"), DAY).unwrap()), vec!["urgent"]);
    assert!(status(&engine, "routine").is_pending());
    assert_eq!(engine.pending(), vec![order("routine")]);

    let emitted: Vec<EngineEvent> = events.try_iter().collect();
    assert!(emitted.contains(&EngineEvent::AssignmentReleased {
        work_order_id: order("routine"),
        technician_id: tech("t1"),
        reason: ReasonCode::DisplacedByUrgent,
    }));
}

#[test]
fn urgent_order_never_displaces_equal_priority() {
    let engine = engine();
    engine
        .register_technician(&TestTechnician::new("t1").max_jobs(1).build())
        .unwrap();
    engine
        .submit_work_order(&TestWorkOrder::new("first").priority(9).build())
        .unwrap();

    let second = engine
        .submit_work_order(&TestWorkOrder::new("second").priority(9).build())
        .unwrap();

    assert_eq!(second.status, WorkOrderStatus::Unassigned);
    assert_eq!(status(&engine, "first"), WorkOrderStatus::Committed);
}
