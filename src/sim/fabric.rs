use anyhow::{bail, Context};
use log::{debug, info, warn};
use serde::Serialize;

use crate::base::port_set::{
    Direction, PortId, EAST_PORT, LOCAL_PORT_START, NORTH_PORT, SOUTH_PORT, WEST_PORT,
};
use crate::noc::config::RouterConfig;
use crate::noc::event::{Nid, NocEvent};
use crate::noc::link_control::ROUTER_PORT;
use crate::noc::mesh::{DenseAddressMap, MeshRouter, SharedDenseMap};
use crate::noc::stats::{LinkStats, PortStats};
use crate::sim::component::{Action, Component};
use crate::sim::config::{EndpointConfig, SimConfig};
use crate::sim::endpoint::Endpoint;
use crate::timeq::{Cycle, SimTime, TimeQueue};

pub type NodeId = usize;

pub enum Node {
    Router(MeshRouter),
    Endpoint(Endpoint),
}

impl Node {
    fn component(&self) -> &dyn Component {
        match self {
            Node::Router(r) => r,
            Node::Endpoint(e) => e,
        }
    }

    fn component_mut(&mut self) -> &mut dyn Component {
        match self {
            Node::Router(r) => r,
            Node::Endpoint(e) => e,
        }
    }
}

#[derive(Debug)]
enum KernelEvent {
    Deliver {
        node: NodeId,
        port: PortId,
        event: NocEvent,
    },
    Clock {
        node: NodeId,
        cycle: Cycle,
    },
    Timer {
        node: NodeId,
    },
}

/// Where init data a node sent in the current phase has to be delivered.
type InitDelivery = (NodeId, PortId, NocEvent);

/// A W x H mesh of routers with its endpoints, plus the event kernel that drives them.
///
/// Routers are numbered row-major from the southwest corner, so router `(rx, ry)` is node
/// `ry * width + rx`; endpoints follow.
pub struct MeshFabric {
    config: SimConfig,
    nodes: Vec<Node>,
    peers: Vec<Vec<Option<(NodeId, PortId)>>>,
    routers: Vec<NodeId>,
    endpoints: Vec<NodeId>,
    queue: TimeQueue<KernelEvent>,
    init_phases: u32,
    complete_phases: u32,
    dense_map: Option<SharedDenseMap>,
}

impl MeshFabric {
    pub fn new(
        config: &SimConfig,
        router_config: &RouterConfig,
        endpoint_config: &EndpointConfig,
    ) -> anyhow::Result<Self> {
        Self::with_init_broadcast(config, router_config, endpoint_config, false)
    }

    pub fn with_init_broadcast(
        config: &SimConfig,
        router_config: &RouterConfig,
        endpoint_config: &EndpointConfig,
        init_broadcast: bool,
    ) -> anyhow::Result<Self> {
        if config.width == 0 || config.height == 0 {
            bail!(
                "mesh must have at least one router, got {}x{}",
                config.width,
                config.height
            );
        }
        let dense_map = router_config
            .use_dense_map
            .then(DenseAddressMap::shared);

        let mut fabric = Self {
            config: config.clone(),
            nodes: Vec::new(),
            peers: Vec::new(),
            routers: Vec::new(),
            endpoints: Vec::new(),
            queue: TimeQueue::new(),
            init_phases: 0,
            complete_phases: 0,
            dense_map,
        };

        for ry in 0..config.height {
            for rx in 0..config.width {
                let router = MeshRouter::new(
                    format!("rtr.{}.{}", rx, ry),
                    router_config,
                    fabric.dense_map.clone(),
                )?;
                let node = fabric.add_node(Node::Router(router));
                fabric.routers.push(node);
            }
        }

        for ry in 0..config.height {
            for rx in 0..config.width {
                let here = fabric.router_node(rx, ry);
                if rx + 1 < config.width {
                    let east = fabric.router_node(rx + 1, ry);
                    fabric.connect((here, EAST_PORT), (east, WEST_PORT));
                }
                if ry + 1 < config.height {
                    let north = fabric.router_node(rx, ry + 1);
                    fabric.connect((here, NORTH_PORT), (north, SOUTH_PORT));
                }
            }
        }

        let local_ports = router_config.local_ports;
        for ry in 0..config.height {
            for rx in 0..config.width {
                let here = fabric.router_node(rx, ry);
                let mut ports: Vec<PortId> =
                    (0..local_ports).map(|i| LOCAL_PORT_START + i).collect();
                if config.halo_endpoints {
                    let boundary = [
                        (Direction::North, ry + 1 == config.height),
                        (Direction::South, ry == 0),
                        (Direction::East, rx + 1 == config.width),
                        (Direction::West, rx == 0),
                    ];
                    ports.extend(
                        boundary
                            .into_iter()
                            .filter(|(_, on_boundary)| *on_boundary)
                            .map(|(dir, _)| dir.port()),
                    );
                }
                for port in ports {
                    let endpoint = Endpoint::new(
                        format!("ep.{}.{}.{}", rx, ry, port),
                        endpoint_config,
                    )?
                    .with_init_broadcast(init_broadcast);
                    let node = fabric.add_node(Node::Endpoint(endpoint));
                    fabric.endpoints.push(node);
                    fabric.connect((node, ROUTER_PORT), (here, port));
                }
            }
        }

        info!(
            "built {}x{} mesh with {} endpoints",
            config.width,
            config.height,
            fabric.endpoints.len()
        );
        Ok(fabric)
    }

    fn add_node(&mut self, mut node: Node) -> NodeId {
        let ports = node.component_mut().init_ports().num_ports();
        self.nodes.push(node);
        self.peers.push(vec![None; ports]);
        self.nodes.len() - 1
    }

    fn connect(&mut self, a: (NodeId, PortId), b: (NodeId, PortId)) {
        self.peers[a.0][a.1] = Some(b);
        self.peers[b.0][b.1] = Some(a);
        self.nodes[a.0].component_mut().init_ports().connect(a.1);
        self.nodes[b.0].component_mut().init_ports().connect(b.1);
    }

    fn router_node(&self, rx: usize, ry: usize) -> NodeId {
        self.routers[ry * self.config.width + rx]
    }

    fn peer(&self, node: NodeId, port: PortId) -> anyhow::Result<(NodeId, PortId)> {
        self.peers[node].get(port).copied().flatten().with_context(|| {
            format!(
                "{} sent on unconnected port {}",
                self.nodes[node].component().name(),
                port
            )
        })
    }

    pub fn router(&self, rx: usize, ry: usize) -> Option<&MeshRouter> {
        if rx >= self.config.width || ry >= self.config.height {
            return None;
        }
        match &self.nodes[self.router_node(rx, ry)] {
            Node::Router(r) => Some(r),
            Node::Endpoint(_) => None,
        }
    }

    pub fn routers(&self) -> impl Iterator<Item = &MeshRouter> + '_ {
        self.routers.iter().filter_map(|&n| match &self.nodes[n] {
            Node::Router(r) => Some(r),
            Node::Endpoint(_) => None,
        })
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> + '_ {
        self.endpoints.iter().filter_map(|&n| match &self.nodes[n] {
            Node::Endpoint(e) => Some(e),
            Node::Router(_) => None,
        })
    }

    pub fn endpoint(&self, index: usize) -> Option<&Endpoint> {
        match self.nodes.get(*self.endpoints.get(index)?)? {
            Node::Endpoint(e) => Some(e),
            Node::Router(_) => None,
        }
    }

    pub fn endpoint_mut(&mut self, index: usize) -> Option<&mut Endpoint> {
        match self.nodes.get_mut(*self.endpoints.get(index)?)? {
            Node::Endpoint(e) => Some(e),
            Node::Router(_) => None,
        }
    }

    /// Ids handed out by bootstrap, in endpoint order.
    pub fn endpoint_ids(&self) -> Vec<Nid> {
        self.endpoints().filter_map(Endpoint::id).collect()
    }

    pub fn dense_map(&self) -> Option<&SharedDenseMap> {
        self.dense_map.as_ref()
    }

    pub fn init_phases(&self) -> u32 {
        self.init_phases
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Collects a node's requested side effects. Timed ones go on the event queue, init
    /// data is returned for delivery at the end of the phase.
    fn drain_actions(&mut self, node: NodeId, init: &mut Vec<InitDelivery>) -> anyhow::Result<()> {
        let actions = self.nodes[node].component_mut().take_actions();
        for action in actions {
            match action {
                Action::Send { port, event } => {
                    let (peer, peer_port) = self.peer(node, port)?;
                    self.queue.schedule_in(
                        self.config.link_latency,
                        KernelEvent::Deliver {
                            node: peer,
                            port: peer_port,
                            event,
                        },
                    );
                }
                Action::SendInit { port, event } => {
                    let (peer, peer_port) = self.peer(node, port)?;
                    init.push((peer, peer_port, event));
                }
                Action::Timer { delay } => {
                    self.queue.schedule_in(delay, KernelEvent::Timer { node });
                }
                Action::Clock { cycle } => self.schedule_clock(node, cycle)?,
            }
        }
        Ok(())
    }

    fn schedule_clock(&mut self, node: NodeId, cycle: Cycle) -> anyhow::Result<()> {
        let Some(period) = self.nodes[node].component().clock_period() else {
            bail!(
                "{} armed a clock without a clock period",
                self.nodes[node].component().name()
            );
        };
        self.queue
            .schedule_at(cycle * period, KernelEvent::Clock { node, cycle });
        Ok(())
    }

    fn deliver_init(&mut self, deliveries: Vec<InitDelivery>) {
        for (node, port, event) in deliveries {
            self.nodes[node]
                .component_mut()
                .init_ports()
                .deliver(port, event);
        }
    }

    /// Runs init phases until one passes with no init data sent and every component is
    /// done with bootstrap.
    pub fn run_init(&mut self) -> anyhow::Result<u32> {
        let mut phase = 0;
        loop {
            if phase >= self.config.max_init_phases {
                bail!(
                    "init did not converge within {} phases",
                    self.config.max_init_phases
                );
            }
            let mut sent = Vec::new();
            for node in 0..self.nodes.len() {
                self.nodes[node]
                    .component_mut()
                    .init(phase)
                    .with_context(|| format!("init phase {} failed", phase))?;
                self.drain_actions(node, &mut sent)?;
            }
            let quiet = sent.is_empty();
            self.deliver_init(sent);
            phase += 1;
            if quiet && self.nodes.iter().all(|n| n.component().init_complete()) {
                break;
            }
        }
        self.init_phases = phase;
        info!("init finished after {} phases", phase);
        Ok(phase)
    }

    /// Complete phases run until a phase passes with no init data sent.
    pub fn run_complete(&mut self) -> anyhow::Result<u32> {
        let mut phase = 0;
        loop {
            if phase >= self.config.max_init_phases {
                bail!(
                    "complete did not settle within {} phases",
                    self.config.max_init_phases
                );
            }
            let mut sent = Vec::new();
            for node in 0..self.nodes.len() {
                self.nodes[node]
                    .component_mut()
                    .complete(phase)
                    .with_context(|| format!("complete phase {} failed", phase))?;
                self.drain_actions(node, &mut sent)?;
            }
            let quiet = sent.is_empty();
            self.deliver_init(sent);
            phase += 1;
            if quiet {
                break;
            }
        }
        self.complete_phases = phase;
        debug!("complete finished after {} phases", phase);
        Ok(phase)
    }

    /// Both untimed stages: bootstrap, then draining leftover init traffic.
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        self.run_init()?;
        self.run_complete()?;
        Ok(())
    }

    /// Timed simulation. Returns the time of the last event processed.
    pub fn run(&mut self) -> anyhow::Result<SimTime> {
        let mut init = Vec::new();
        for node in 0..self.nodes.len() {
            self.nodes[node].component_mut().setup()?;
        }
        let now = self.queue.now();
        for node in 0..self.nodes.len() {
            self.nodes[node].component_mut().start(now)?;
            self.drain_actions(node, &mut init)?;
        }

        while let Some(at) = self.queue.peek_time() {
            if at > self.config.timeout {
                warn!("timeout at {} ps with {} events pending", at, self.queue.len());
                break;
            }
            let Some((now, event)) = self.queue.pop() else {
                break;
            };
            let node = match event {
                KernelEvent::Deliver { node, port, event } => {
                    self.nodes[node]
                        .component_mut()
                        .handle_event(port, event, now)?;
                    node
                }
                KernelEvent::Clock { node, cycle } => {
                    let keep_on = self.nodes[node].component_mut().clock_tick(cycle, now)?;
                    if keep_on {
                        self.schedule_clock(node, cycle + 1)?;
                    }
                    node
                }
                KernelEvent::Timer { node } => {
                    self.nodes[node].component_mut().timer(now)?;
                    node
                }
            };
            self.drain_actions(node, &mut init)?;
            if !init.is_empty() {
                bail!(
                    "{} sent init data during the timed run",
                    self.nodes[node].component().name()
                );
            }
        }
        Ok(self.queue.now())
    }

    pub fn status(&self) -> String {
        self.routers().map(MeshRouter::status).collect()
    }

    pub fn report(&self) -> FabricReport {
        let mut links = LinkStats::default();
        self.endpoints().for_each(|e| links += e.stats());
        let mut ports = PortStats::default();
        self.routers().for_each(|r| ports += &r.stats().totals());
        FabricReport {
            width: self.config.width,
            height: self.config.height,
            endpoints: self.endpoints.len(),
            init_phases: self.init_phases,
            complete_phases: self.complete_phases,
            sim_time: self.queue.now(),
            links,
            router_ports: ports,
            undelivered: self.endpoints().map(Endpoint::backlog_len).sum(),
            send_stalls: self.endpoints().map(Endpoint::send_stalls).sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FabricReport {
    pub width: usize,
    pub height: usize,
    pub endpoints: usize,
    pub init_phases: u32,
    pub complete_phases: u32,
    pub sim_time: SimTime,
    pub links: LinkStats,
    pub router_ports: PortStats,
    pub undelivered: usize,
    pub send_stalls: u64,
}
