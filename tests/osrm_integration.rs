//! Live OSRM checks. Needs Docker and a prepared Nevada extract
//! (`nevada-latest.osrm*`, MLD) in `OSRM_DATA_DIR`.
//!
//! Run with `cargo test --test osrm_integration -- --ignored`.

mod fixtures;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use testcontainers::core::{IntoContainerPort, Mount};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, GenericImage, ImageExt, ReuseDirective, TestcontainersError};

use fieldroute::model::{Accuracy, Coordinates, TechnicianId, WorkOrderStatus};
use fieldroute::osrm::{OsrmClient, OsrmConfig};
use fieldroute::traits::{MapService, NullSink};

use fixtures::*;

fn osrm_container() -> Result<(Container<GenericImage>, String), TestcontainersError> {
    let data_dir = PathBuf::from(env::var("OSRM_DATA_DIR").unwrap_or_else(|_| "osrm-data".to_string()));
    if !data_dir.join("nevada-latest.osrm.partition").exists() {
        return Err(TestcontainersError::other(format!(
            "no prepared OSRM extract in {}",
            data_dir.display()
        )));
    }

    let image = GenericImage::new("osrm/osrm-backend", "latest")
        .with_exposed_port(5000.tcp())
        .with_mount(Mount::bind_mount(data_dir.to_string_lossy().to_string(), "/data"))
        .with_cmd(vec!["osrm-routed", "--algorithm", "mld", "/data/nevada-latest.osrm"])
        .with_container_name("fieldroute-osrm-nevada")
        .with_startup_timeout(Duration::from_secs(30))
        .with_reuse(ReuseDirective::Always);

    let container = image.start()?;
    let port = container.get_host_port_ipv4(5000.tcp())?;
    Ok((container, format!("http://127.0.0.1:{}", port)))
}

fn client(base_url: &str) -> OsrmClient {
    OsrmClient::new(OsrmConfig {
        base_url: base_url.to_string(),
        profile: "car".to_string(),
        timeout_secs: 10,
    })
    .expect("build OSRM client")
}

/// The router answers before its graph is loaded; poll until it routes.
fn wait_until_routing(client: &OsrmClient, from: Coordinates, to: Coordinates) {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(15) {
        if client.distance_duration(from, to).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(500));
    }
    panic!("OSRM never answered a route request");
}

#[test]
#[ignore = "needs Docker and a prepared OSRM extract"]
fn osrm_returns_road_leg() {
    let (_container, base_url) = osrm_container().expect("start OSRM container");
    let client = client(&base_url);

    let wynn = Coordinates::new(SERVICE_YARDS[0].lat, SERVICE_YARDS[0].lng);
    let mgm = Coordinates::new(SERVICE_YARDS[1].lat, SERVICE_YARDS[1].lng);
    wait_until_routing(&client, wynn, mgm);

    let leg = client.distance_duration(wynn, mgm).expect("route");
    // ~2.7 km as the crow flies; the road is longer but not absurdly so.
    assert!(leg.distance_km > 2.5 && leg.distance_km < 10.0, "distance {}", leg.distance_km);
    assert!(leg.duration_secs > 60 && leg.duration_secs < 1800, "duration {}", leg.duration_secs);
}

#[test]
#[ignore = "needs Docker and a prepared OSRM extract"]
fn osrm_backed_engine_commits_exact_assignments() {
    let (_container, base_url) = osrm_container().expect("start OSRM container");
    let client = client(&base_url);
    let yard = Coordinates::new(SERVICE_YARDS[0].lat, SERVICE_YARDS[0].lng);
    let site = Coordinates::new(STRIP_CUSTOMERS[1].lat, STRIP_CUSTOMERS[1].lng);
    wait_until_routing(&client, yard, site);

    let mut config = test_config();
    config.candidates.service_radius_km = 50.0;
    let engine = engine_with(config, Some(Arc::new(client)), Arc::new(NullSink));
    engine
        .register_technician(&TestTechnician::new("tech-1").at(&SERVICE_YARDS[0]).build())
        .unwrap();

    for (i, site) in STRIP_CUSTOMERS.iter().take(4).enumerate() {
        let result = engine
            .submit_work_order(&TestWorkOrder::new(&format!("wo-{i}")).at(site).build())
            .unwrap();
        assert_eq!(result.status, WorkOrderStatus::Committed, "{}", site.name);
        assert_eq!(result.accuracy, Some(Accuracy::Exact), "{}", site.name);
    }

    let tech = TestTechnician::new("tech-1").build();
    let route = engine.get_route(&TechnicianId::new("tech-1"), DAY).unwrap();
    assert_eq!(route.len(), 4);
    assert_route_feasible(&route, tech.working_hours);
}
