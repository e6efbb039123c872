use std::collections::BTreeSet;

use crate::noc::config::RouterConfig;
use crate::noc::event::{Nid, Request};
use crate::sim::config::{EndpointConfig, SimConfig};
use crate::sim::fabric::MeshFabric;
use crate::traffic::{TrafficConfig, UniformTraffic};

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

fn ready_fabric(sim: &SimConfig, router: &RouterConfig, endpoint: &EndpointConfig) -> MeshFabric {
    let mut fabric = MeshFabric::new(sim, router, endpoint).unwrap();
    fabric.initialize().unwrap();
    fabric
}

/// After a drained run every credit is back where bootstrap put it.
fn assert_no_credit_drift(fabric: &MeshFabric, router: &RouterConfig, endpoint: &EndpointConfig) {
    let params = router.validate().unwrap();
    let router_buffer = params.input_buf_credits();
    let endpoint_buffer = (endpoint.in_buf_size.to_bits().unwrap() / params.flit_size_bits) as u32;
    let out_buffer = (endpoint.out_buf_size.to_bits().unwrap() / params.flit_size_bits) as u32;
    for r in fabric.routers() {
        for port in 0..r.num_ports() {
            if r.endpoint_ports().contains(port) {
                assert_eq!(endpoint_buffer, r.port_credits(port));
            } else if !r.edge_ports().contains(port) {
                assert_eq!(router_buffer, r.port_credits(port));
            }
            assert_eq!(0, r.queue_len(port));
        }
    }
    for e in fabric.endpoints() {
        assert_eq!(router_buffer, e.link().rtr_credits());
        for vn in 0..e.link().vns() {
            assert_eq!(out_buffer, e.link().outbuf_credits(vn));
            assert_eq!(0, e.link().input_queue_len(vn));
            assert_eq!(0, e.link().output_queue_len(vn));
        }
    }
}

fn received_total(fabric: &MeshFabric) -> usize {
    fabric.endpoints().map(|e| e.received().len()).sum()
}

#[test]
fn three_flit_packet_crosses_two_hops() {
    let sim = mesh(2, 2);
    let router = router_config();
    // four credits on every link, both directions
    let endpoint = EndpointConfig {
        in_buf_size: "32B".parse().unwrap(),
        out_buf_size: "32B".parse().unwrap(),
        ..EndpointConfig::default()
    };
    let mut fabric = ready_fabric(&sim, &router, &endpoint);
    let ids = fabric.endpoint_ids();

    fabric
        .endpoint_mut(0)
        .unwrap()
        .enqueue([Request::new(ids[0], ids[3], 192)])
        .unwrap();
    fabric.run().unwrap();

    let dst = fabric.endpoint(3).unwrap();
    assert_eq!(1, dst.received().len());
    assert_eq!(ids[0], dst.received()[0].src);
    assert_eq!(ids[3], dst.received()[0].dest);
    assert_eq!(192, dst.received()[0].size_in_bits);
    assert_eq!(1, received_total(&fabric));

    // two routers on the way plus the egress router, three flits each
    let report = fabric.report();
    assert_eq!(3, report.router_ports.packets_sent());
    assert_eq!(3 * 192, report.router_ports.send_bit_count());
    assert!(report.links.latency_min().unwrap() > 0);
    assert_no_credit_drift(&fabric, &router, &endpoint);
}

#[test]
fn packets_on_one_path_arrive_in_order() {
    let sim = mesh(3, 2);
    let router = router_config();
    let endpoint = EndpointConfig::default();
    let mut fabric = ready_fabric(&sim, &router, &endpoint);
    let ids = fabric.endpoint_ids();
    let dest = ids[5];

    for src in [0, 3] {
        let requests: Vec<Request> = (0..12u8)
            .map(|i| {
                // sizes vary between one and four flits
                let bits = 64 * (1 + u64::from(i % 4));
                Request::new(ids[src], dest, bits).with_payload(vec![src as u8, i])
            })
            .collect();
        fabric.endpoint_mut(src).unwrap().enqueue(requests).unwrap();
    }
    fabric.run().unwrap();

    let received = fabric.endpoint(5).unwrap().received();
    assert_eq!(24, received.len());
    for src in [0u8, 3] {
        let order: Vec<u8> = received
            .iter()
            .filter(|r| r.payload[0] == src)
            .map(|r| r.payload[1])
            .collect();
        assert_eq!((0..12).collect::<Vec<u8>>(), order);
    }
    assert_no_credit_drift(&fabric, &router, &endpoint);
}

fn run_uniform(sim: &SimConfig, router: &RouterConfig, endpoint: &EndpointConfig, traffic: &TrafficConfig) -> MeshFabric {
    let mut fabric = ready_fabric(sim, router, endpoint);
    let queued = UniformTraffic::new(traffic)
        .unwrap()
        .populate(&mut fabric)
        .unwrap();
    fabric.run().unwrap();

    assert_eq!(queued, received_total(&fabric));
    for e in fabric.endpoints() {
        let id = e.id().unwrap();
        assert!(e.received().iter().all(|r| r.dest == id && r.src != id));
    }
    let report = fabric.report();
    assert_eq!(0, report.undelivered);
    assert_eq!(queued as u64, report.links.packets_sent());
    assert_eq!(queued as u64, report.links.packets_received());
    assert_no_credit_drift(&fabric, router, endpoint);
    fabric
}

fn small_packets() -> TrafficConfig {
    TrafficConfig {
        packets_per_endpoint: 8,
        packet_size: "16B".parse().unwrap(),
        seed: 11,
        ..TrafficConfig::default()
    }
}

#[test]
fn uniform_traffic_is_fully_delivered() {
    run_uniform(
        &mesh(3, 3),
        &router_config(),
        &EndpointConfig::default(),
        &small_packets(),
    );
}

#[test]
fn halo_endpoints_with_dense_ids() {
    let sim = SimConfig {
        halo_endpoints: true,
        ..mesh(3, 2)
    };
    let mut router = router_config();
    router.use_dense_map = true;
    router.local_ports = 2;
    let fabric = run_uniform(&sim, &router, &EndpointConfig::default(), &small_packets());
    let ids: BTreeSet<Nid> = fabric.endpoint_ids().into_iter().collect();
    assert_eq!(Some(&0), ids.first());
    assert_eq!(Some(&(ids.len() as Nid - 1)), ids.last());
}

#[test]
fn y_first_routing_delivers_too() {
    let mut router = router_config();
    router.route_y_first = true;
    router.port_priority_equal = true;
    run_uniform(&mesh(4, 2), &router, &EndpointConfig::default(), &small_packets());
}

#[test]
fn second_virtual_network_carries_traffic() {
    let endpoint = EndpointConfig {
        vns: 2,
        ..EndpointConfig::default()
    };
    let traffic = TrafficConfig {
        vn: 1,
        ..small_packets()
    };
    let fabric = run_uniform(&mesh(2, 2), &router_config(), &endpoint, &traffic);
    for e in fabric.endpoints() {
        assert!(e.received().iter().all(|r| r.vn == 1));
    }
}

#[test]
fn tight_endpoint_buffers_still_drain() {
    let endpoint = EndpointConfig {
        in_buf_size: "16B".parse().unwrap(),
        out_buf_size: "16B".parse().unwrap(),
        ..EndpointConfig::default()
    };
    let fabric = run_uniform(&mesh(2, 3), &router_config(), &endpoint, &small_packets());
    // two-flit packets against two output credits: every endpoint waits at least once
    assert!(fabric.report().send_stalls >= fabric.endpoints().count() as u64);
}

#[test]
fn requests_need_an_endpoint_id() {
    let mut fabric =
        MeshFabric::new(&mesh(2, 1), &router_config(), &EndpointConfig::default()).unwrap();
    let err = fabric
        .endpoint_mut(0)
        .unwrap()
        .enqueue([Request::new(0, 1, 64)])
        .unwrap_err();
    assert!(err.to_string().contains("before the endpoint has an id"));
    assert_eq!(0, fabric.endpoint(0).unwrap().backlog_len());
}

#[test]
fn traffic_on_a_missing_vn_is_rejected() {
    let mut fabric = ready_fabric(&mesh(2, 1), &router_config(), &EndpointConfig::default());
    let traffic = TrafficConfig {
        vn: 3,
        ..small_packets()
    };
    assert!(UniformTraffic::new(&traffic)
        .unwrap()
        .populate(&mut fabric)
        .is_err());
}

#[test]
fn oversized_packets_are_rejected_before_the_run() {
    let mut fabric = ready_fabric(&mesh(2, 1), &router_config(), &EndpointConfig::default());
    // 64B is eight flits, the router buffers four
    let err = UniformTraffic::new(&TrafficConfig::default())
        .unwrap()
        .populate(&mut fabric)
        .unwrap_err();
    assert!(err.to_string().contains("never fit"));
}

#[test]
fn init_broadcast_reaches_every_other_endpoint_once() {
    for (sim, local_ports) in [
        (mesh(3, 2), 1),
        (
            SimConfig {
                halo_endpoints: true,
                ..mesh(2, 2)
            },
            2,
        ),
        (mesh(1, 1), 3),
    ] {
        let mut router = router_config();
        router.local_ports = local_ports;
        let mut fabric =
            MeshFabric::with_init_broadcast(&sim, &router, &EndpointConfig::default(), true)
                .unwrap();
        fabric.initialize().unwrap();

        let ids = fabric.endpoint_ids();
        for e in fabric.endpoints() {
            let id = e.id().unwrap();
            let mut heard: Vec<Nid> = e.init_received().iter().map(|r| r.src).collect();
            heard.sort_unstable();
            let mut expected: Vec<Nid> = ids.iter().copied().filter(|&x| x != id).collect();
            expected.sort_unstable();
            assert_eq!(expected, heard, "endpoint {}", id);
        }
    }
}

#[test]
fn timeout_stops_the_run() {
    let sim = SimConfig {
        timeout: 1,
        ..mesh(2, 2)
    };
    let mut fabric = ready_fabric(&sim, &router_config(), &EndpointConfig::default());
    let queued = UniformTraffic::new(&small_packets())
        .unwrap()
        .populate(&mut fabric)
        .unwrap();
    fabric.run().unwrap();
    assert!(received_total(&fabric) < queued);
}

#[test]
fn empty_mesh_is_a_config_error() {
    assert!(MeshFabric::new(&mesh(0, 2), &router_config(), &EndpointConfig::default()).is_err());
}

#[test]
fn report_serializes() {
    let fabric = ready_fabric(&mesh(2, 2), &router_config(), &EndpointConfig::default());
    let json = serde_json::to_value(fabric.report()).unwrap();
    assert_eq!(Some(4), json["endpoints"].as_u64());
    assert!(json["init_phases"].as_u64().unwrap() > 0);
    assert!(json.get("links").is_some());
}
