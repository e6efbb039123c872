use std::collections::BTreeSet;

use crate::base::port_set::{PortId, EAST_PORT, LOCAL_PORT_START, WEST_PORT};
use crate::noc::config::RouterConfig;
use crate::noc::event::{BootstrapCommand, BootstrapMessage, MeshCoord, Nid, NocEvent};
use crate::noc::mesh::{BootstrapState, MeshRouter};
use crate::sim::component::Component;
use crate::sim::config::{EndpointConfig, SimConfig};
use crate::sim::fabric::MeshFabric;

fn router_config() -> RouterConfig {
    let mut cfg = RouterConfig::new("1GB/s", "8B").unwrap();
    cfg.input_buf_size = Some("32B".parse().unwrap());
    cfg
}

fn mesh(width: usize, height: usize) -> SimConfig {
    SimConfig {
        width,
        height,
        ..SimConfig::default()
    }
}

fn bootstrapped(sim: &SimConfig, router: &RouterConfig) -> MeshFabric {
    let mut fabric = MeshFabric::new(sim, router, &EndpointConfig::default()).unwrap();
    fabric.initialize().unwrap();
    fabric
}

/// Checks what every router must agree on after bootstrap.
fn assert_converged(fabric: &MeshFabric, sim: &SimConfig) {
    let endpoints = fabric.endpoints().count() as i64;
    let mut next_start = 0;
    for ry in 0..sim.height {
        for rx in 0..sim.width {
            let router = fabric.router(rx, ry).unwrap();
            assert_eq!(BootstrapState::SteadyState, router.bootstrap_state());
            assert_eq!(
                MeshCoord::new(rx as i64 + 1, ry as i64 + 1),
                router.coord(),
                "router ({}, {})",
                rx,
                ry
            );
            let geometry = router.geometry();
            assert_eq!(sim.width as i64 + 2, geometry.x_size);
            assert_eq!(sim.height as i64 + 2, geometry.y_size);
            assert_eq!(endpoints, router.total_endpoints());

            // starts are prefix sums in row-major order from the southwest
            assert_eq!(next_start, router.endpoint_start(), "router ({}, {})", rx, ry);
            next_start += router.my_endpoints();
        }
    }
    assert_eq!(endpoints, next_start);

    let ids = fabric.endpoint_ids();
    assert_eq!(endpoints as usize, ids.len());
    let unique: BTreeSet<Nid> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len());
}

#[test]
fn two_by_two_discovers_coordinates_and_ids() {
    let sim = mesh(2, 2);
    let fabric = bootstrapped(&sim, &router_config());
    assert_converged(&fabric, &sim);
    // (y * x_size + x) with x_size = 4
    assert_eq!(vec![5, 6, 9, 10], fabric.endpoint_ids());
}

#[test]
fn lone_router_bootstraps() {
    let sim = mesh(1, 1);
    let fabric = bootstrapped(&sim, &router_config());
    assert_converged(&fabric, &sim);
    assert_eq!(vec![4], fabric.endpoint_ids());
}

#[test]
fn single_row_and_single_column() {
    for (w, h) in [(4, 1), (1, 4), (1, 2), (2, 1)] {
        let sim = mesh(w, h);
        let fabric = bootstrapped(&sim, &router_config());
        assert_converged(&fabric, &sim);
    }
}

#[test]
fn rectangular_mesh_with_halo_endpoints() {
    let sim = SimConfig {
        halo_endpoints: true,
        ..mesh(4, 3)
    };
    let fabric = bootstrapped(&sim, &router_config());
    assert_converged(&fabric, &sim);
    // 12 local plus 2 * (4 + 3) on the boundary
    assert_eq!(26, fabric.endpoint_ids().len());

    let corner = fabric.router(0, 0).unwrap();
    assert_eq!(3, corner.my_endpoints());
    let geometry = corner.geometry();
    for id in fabric.endpoint_ids() {
        let (coord, _) = geometry.locate(id);
        assert!(geometry.is_interior(coord), "id {} lands on {}", id, coord);
    }
}

#[test]
fn dense_ids_are_contiguous() {
    let mut router = router_config();
    router.use_dense_map = true;
    router.local_ports = 2;
    let sim = SimConfig {
        halo_endpoints: true,
        ..mesh(3, 2)
    };
    let fabric = bootstrapped(&sim, &router);
    assert_converged(&fabric, &sim);

    let mut ids = fabric.endpoint_ids();
    ids.sort_unstable();
    let expected: Vec<Nid> = (0..ids.len() as Nid).collect();
    assert_eq!(expected, ids);

    let map = fabric.dense_map().unwrap();
    assert!(map.is_frozen());
    assert_eq!(ids.len(), map.len());
}

#[test]
fn credits_are_seeded_from_both_sides() {
    let sim = mesh(2, 2);
    let fabric = bootstrapped(&sim, &router_config());
    for router in fabric.routers() {
        for port in 0..router.num_ports() {
            let expected = if router.endpoint_ports().contains(port) {
                128
            } else if router.edge_ports().contains(port) {
                0
            } else {
                4
            };
            assert_eq!(expected, router.port_credits(port), "{} port {}", router.name(), port);
        }
        assert_eq!(Some(1), router.endpoint_vns(LOCAL_PORT_START));
    }
    for endpoint in fabric.endpoints() {
        assert_eq!(4, endpoint.link().rtr_credits());
        assert_eq!(64, endpoint.link().flit_size());
        assert!(endpoint.link().is_network_initialized());
    }
}

#[test]
fn init_gives_up_after_max_phases() {
    let sim = SimConfig {
        max_init_phases: 4,
        ..mesh(3, 3)
    };
    let mut fabric = MeshFabric::new(&sim, &router_config(), &EndpointConfig::default()).unwrap();
    let err = fabric.run_init().unwrap_err();
    assert!(err.to_string().contains("did not converge"));
}

fn bootstrap_token(command: BootstrapCommand, value: i64) -> NocEvent {
    NocEvent::Bootstrap(BootstrapMessage::new(command, value))
}

/// West end of a row: only the east neighbour is connected.
fn west_end_router() -> MeshRouter {
    let mut router = MeshRouter::new("rtr", &router_config(), None).unwrap();
    router.init_ports().connect(EAST_PORT);
    router.init(0).unwrap();
    router.init(1).unwrap();
    assert_eq!(BootstrapState::WaitWest, router.bootstrap_state());
    router
}

#[test]
fn out_of_order_tokens_are_a_protocol_error() {
    let mut router = west_end_router();
    router
        .init_ports()
        .deliver(EAST_PORT, bootstrap_token(BootstrapCommand::ComputeXSize, 1));
    router
        .init_ports()
        .deliver(EAST_PORT, bootstrap_token(BootstrapCommand::SumEndpoints, 1));
    let err = router.init(2).unwrap_err();
    assert!(err.to_string().contains("protocol error"));
}

#[test]
fn missing_token_is_a_protocol_error() {
    let mut router = west_end_router();
    router
        .init_ports()
        .deliver(EAST_PORT, bootstrap_token(BootstrapCommand::SumEndpoints, 1));
    assert!(router.init(2).is_err());
}

#[test]
fn tokens_that_have_not_arrived_are_waited_for() {
    let mut router = west_end_router();
    router.init(2).unwrap();
    router.init(3).unwrap();
    assert_eq!(BootstrapState::WaitWest, router.bootstrap_state());

    router
        .init_ports()
        .deliver(EAST_PORT, bootstrap_token(BootstrapCommand::SumEndpoints, 3));
    router
        .init_ports()
        .deliver(EAST_PORT, bootstrap_token(BootstrapCommand::ComputeXSize, 2));
    router.init(4).unwrap();
    // single row: the west end is the origin right away
    assert_eq!(MeshCoord::new(1, 1), router.coord());
    assert_eq!(3, router.total_endpoints());
    assert_eq!(5, router.geometry().x_size);
    assert_eq!(3, router.geometry().y_size);
}

#[test]
fn unexpected_report_on_a_router_port_is_rejected() {
    let mut router = MeshRouter::new("rtr", &router_config(), None).unwrap();
    let port: PortId = WEST_PORT;
    router.init_ports().connect(port);
    router.init(0).unwrap();
    router
        .init_ports()
        .deliver(port, bootstrap_token(BootstrapCommand::SumEndpoints, 2));
    assert!(router.init(1).is_err());
}
