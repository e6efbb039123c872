pub mod bootstrap;
pub mod dense_map;
pub mod routing;

use std::collections::VecDeque;
use std::fmt::Write;

use anyhow::{bail, Context};
use log::{debug, info};
use smallvec::SmallVec;

use crate::base::arbiter::PriorityArbiter;
use crate::base::port_set::{port_name, Direction, PortId, PortSet, LOCAL_PORT_START};
use crate::noc::config::{RouterConfig, RouterParams};
use crate::noc::event::{Credit, Egress, MeshCoord, NocEvent, Packet, RoutingEnvelope, TraceType};
use crate::noc::stats::RouterStats;
use crate::sim::component::{Action, Component, InitPorts, Outbox};
use crate::timeq::{next_cycle, Cycle, SimTime};

pub use bootstrap::BootstrapState;
pub use dense_map::{DenseAddressMap, SharedDenseMap};
pub use routing::MeshGeometry;

/// One router of a 2-D mesh. Compass ports connect to neighbouring routers (or, on the
/// boundary, optionally to an endpoint); local ports connect to endpoints.
///
/// The router learns its own coordinate, the mesh size, and the endpoint numbering during
/// the init phases (see [`bootstrap`]); after that it forwards packets one flit per clock
/// cycle per output port under credit flow control.
pub struct MeshRouter {
    name: String,
    params: RouterParams,

    state: BootstrapState,
    edges: PortSet,
    endpoints: PortSet,
    endpoint_vns: Vec<Option<usize>>,
    my_endpoints: i64,
    row_endpoints: i64,
    total_endpoints: i64,
    endpoint_start: i64,
    coord: MeshCoord,
    x_size: i64,
    y_size: i64,
    init_count: i64,
    credits_pending: PortSet,
    dense_map: Option<SharedDenseMap>,

    port_queues: Vec<VecDeque<RoutingEnvelope>>,
    port_credits: Vec<u32>,
    port_busy: Vec<u64>,
    arbiters: SmallVec<[PriorityArbiter; 2]>,
    clock_is_off: bool,
    last_cycle: Cycle,

    outbox: Outbox,
    init_ports: InitPorts,
    stats: RouterStats,
}

impl MeshRouter {
    /// `dense_map` is the table shared by every router of the mesh; it is only consulted
    /// when `use_dense_map` is set.
    pub fn new(
        name: impl Into<String>,
        config: &RouterConfig,
        dense_map: Option<SharedDenseMap>,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let params = config
            .validate()
            .with_context(|| format!("invalid configuration for router {}", name))?;
        let dense_map = match (params.use_dense_map, dense_map) {
            (true, Some(map)) => Some(map),
            (true, None) => bail!("{}: use_dense_map requires a shared dense map", name),
            (false, _) => None,
        };
        let num_ports = params.num_ports();

        Ok(Self {
            name,
            params,
            state: BootstrapState::AwaitEndpoints,
            edges: PortSet::new(),
            endpoints: PortSet::new(),
            endpoint_vns: vec![None; num_ports],
            my_endpoints: 0,
            row_endpoints: 0,
            total_endpoints: 0,
            endpoint_start: 0,
            coord: MeshCoord::default(),
            x_size: 0,
            y_size: 0,
            init_count: 0,
            credits_pending: PortSet::new(),
            dense_map,
            port_queues: (0..num_ports).map(|_| VecDeque::new()).collect(),
            port_credits: vec![0; num_ports],
            port_busy: vec![0; num_ports],
            arbiters: SmallVec::new(),
            clock_is_off: true,
            last_cycle: 0,
            outbox: Outbox::default(),
            init_ports: InitPorts::new(num_ports),
            stats: RouterStats::new(num_ports),
        })
    }

    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    pub fn num_ports(&self) -> usize {
        self.params.num_ports()
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.state
    }

    pub fn coord(&self) -> MeshCoord {
        self.coord
    }

    pub fn geometry(&self) -> MeshGeometry {
        MeshGeometry::new(self.x_size, self.y_size, self.params.local_ports)
    }

    pub fn total_endpoints(&self) -> i64 {
        self.total_endpoints
    }

    pub fn endpoint_start(&self) -> i64 {
        self.endpoint_start
    }

    pub fn my_endpoints(&self) -> i64 {
        self.my_endpoints
    }

    pub fn edge_ports(&self) -> PortSet {
        self.edges
    }

    pub fn endpoint_ports(&self) -> PortSet {
        self.endpoints
    }

    /// Virtual network count the endpoint on `port` asked for.
    pub fn endpoint_vns(&self, port: PortId) -> Option<usize> {
        self.endpoint_vns.get(port).copied().flatten()
    }

    pub fn port_credits(&self, port: PortId) -> u32 {
        self.port_credits[port]
    }

    pub fn port_busy(&self, port: PortId) -> u64 {
        self.port_busy[port]
    }

    pub fn queue_len(&self, port: PortId) -> usize {
        self.port_queues[port].len()
    }

    pub fn is_clock_off(&self) -> bool {
        self.clock_is_off
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    fn is_edge(&self, dir: Direction) -> bool {
        self.edges.contains_dir(dir)
    }

    /// Builds the routing envelope for a packet injected by a local endpoint.
    pub fn wrap_incoming_packet(&self, packet: Packet) -> anyhow::Result<RoutingEnvelope> {
        if packet.request.is_broadcast() {
            return Ok(RoutingEnvelope::broadcast(packet));
        }
        let mut dest = packet.request.dest;
        if let Some(map) = &self.dense_map {
            dest = map
                .lookup(dest)
                .with_context(|| format!("{}: no sparse id for dense id {}", self.name, dest))?;
        }
        let (coord, egress) = self.geometry().locate(dest);
        Ok(RoutingEnvelope::new(coord, Egress::Port(egress), packet))
    }

    /// Sets the envelope's next hop out of this router.
    pub fn route(&self, envelope: &mut RoutingEnvelope) -> anyhow::Result<PortId> {
        let Egress::Port(egress) = envelope.egress else {
            bail!("{}: broadcasts cannot be routed point to point", self.name);
        };
        let port = routing::next_port(
            self.coord,
            envelope.dest,
            egress,
            self.params.route_y_first,
        );
        envelope.next_port = Some(port);
        Ok(port)
    }

    /// Routes everything that arrived as init data: endpoint packets are wrapped first,
    /// broadcasts follow the spanning tree, unicast goes out as untimed init data.
    fn route_init_traffic(&mut self) -> anyhow::Result<()> {
        for port in 0..self.num_ports() {
            if !self.init_ports.is_connected(port) {
                continue;
            }
            let from_endpoint = self.endpoints.contains(port);
            while let Some(event) = self.init_ports.recv(port) {
                let envelope = match event {
                    NocEvent::Packet(packet) if from_endpoint => {
                        self.wrap_incoming_packet(packet)?
                    }
                    NocEvent::Internal(envelope) if !from_endpoint => envelope,
                    other => bail!(
                        "{}: unexpected init data {} on {} port",
                        self.name,
                        other.describe(),
                        port_name(port)
                    ),
                };
                if envelope.is_broadcast() {
                    self.broadcast_init(port, from_endpoint, envelope);
                } else {
                    self.forward_init(envelope)?;
                }
            }
        }
        Ok(())
    }

    fn broadcast_init(&mut self, port: PortId, from_endpoint: bool, envelope: RoutingEnvelope) {
        let from = if from_endpoint {
            None
        } else {
            Direction::from_port(port)
        };
        for &dir in routing::broadcast_directions(from) {
            if !self.is_edge(dir) {
                self.outbox
                    .send_init(dir.port(), NocEvent::Internal(envelope.clone()));
            }
        }

        let targets: SmallVec<[PortId; 8]> = self
            .endpoints
            .iter()
            .filter(|&p| !(from_endpoint && p == port))
            .collect();
        if let Some((&last, rest)) = targets.split_last() {
            for &target in rest {
                self.outbox
                    .send_init(target, NocEvent::Packet(envelope.packet.clone()));
            }
            self.outbox
                .send_init(last, NocEvent::Packet(envelope.packet));
        }
    }

    fn forward_init(&mut self, mut envelope: RoutingEnvelope) -> anyhow::Result<()> {
        let out = self.route(&mut envelope)?;
        if !self.init_ports.is_connected(out) {
            bail!(
                "{}: init packet for {} routed to unconnected {} port",
                self.name,
                envelope.packet.request.dest,
                port_name(out)
            );
        }
        if self.endpoints.contains(out) {
            self.outbox
                .send_init(out, NocEvent::Packet(envelope.packet));
        } else {
            self.outbox.send_init(out, NocEvent::Internal(envelope));
        }
        Ok(())
    }

    fn accept(&mut self, port: PortId, mut envelope: RoutingEnvelope, now: SimTime) -> anyhow::Result<()> {
        if envelope.is_broadcast() {
            bail!(
                "{}: broadcast from {} outside of init",
                self.name,
                envelope.packet.request.src
            );
        }
        let out = self.route(&mut envelope)?;
        if envelope.packet.request.trace != TraceType::None {
            info!(
                "TRACE({}): {} ps: router {} {} got packet on {} port, next hop {}",
                envelope.packet.request.trace_id,
                now,
                self.name,
                self.coord,
                port_name(port),
                port_name(out)
            );
        }
        self.port_queues[port].push_back(envelope);
        if self.clock_is_off {
            self.clock_wakeup(now);
        }
        Ok(())
    }

    /// Re-arms the clock and rolls the busy counters forward over the skipped cycles.
    fn clock_wakeup(&mut self, now: SimTime) {
        let next = next_cycle(now, self.params.clock_period);
        let cycles_off = next.saturating_sub(self.last_cycle + 1);
        for busy in self.port_busy.iter_mut() {
            *busy = busy.saturating_sub(cycles_off);
        }
        self.stats.record_wakeup();
        self.outbox.clock(next);
        self.clock_is_off = false;
    }

    /// Tries to move the head of `input` across the crossbar. Returns whether it moved.
    fn try_forward(&mut self, input: PortId, now: SimTime, keep_on: &mut bool) -> anyhow::Result<bool> {
        let Some(head) = self.port_queues[input].front() else {
            return Ok(false);
        };
        let out = head
            .next_port
            .with_context(|| format!("{}: unrouted envelope on {} port", self.name, port_name(input)))?;
        let flits = head.flits();

        if self.port_busy[out] > 0 {
            self.stats.port_mut(out).record_xbar_stall();
            *keep_on = true;
            return Ok(false);
        }

        let serviced = if self.port_credits[out] >= flits {
            let Some(envelope) = self.port_queues[input].pop_front() else {
                return Ok(false);
            };
            self.port_credits[out] -= flits;
            self.port_busy[out] = flits as u64;

            let request = &envelope.packet.request;
            let bits = request.size_in_bits;
            let vn = envelope.packet.vn;
            if request.trace == TraceType::Full {
                info!(
                    "TRACE({}): {} ps: router {} {} sent packet on vn {} from src {} to dest {} via {} port",
                    request.trace_id,
                    now,
                    self.name,
                    self.coord,
                    vn,
                    request.src,
                    request.dest,
                    port_name(out)
                );
            }
            debug!(
                "{}: {} -> {}, {} flits ({} -> {})",
                self.name,
                port_name(input),
                port_name(out),
                flits,
                request.src,
                request.dest
            );

            if self.edges.contains(out) {
                self.outbox.send(out, NocEvent::Packet(envelope.packet));
            } else {
                self.outbox.send(out, NocEvent::Internal(envelope));
            }
            self.stats.port_mut(out).record_send(bits);
            self.outbox
                .send(input, NocEvent::Credit(Credit::new(vn, flits)));
            true
        } else {
            self.stats.port_mut(out).record_output_port_stall();
            false
        };

        if !self.port_queues[input].is_empty() {
            *keep_on = true;
        }
        Ok(serviced)
    }

    pub fn status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Start Router {}: id = {}", self.name, self.coord);
        for port in 0..self.num_ports() {
            let _ = writeln!(out, "  {} port:", port_name(port));
            if !self.init_ports.is_connected(port) {
                let _ = writeln!(out, "    UNUSED");
                continue;
            }
            if let Some(vns) = self.endpoint_vns(port) {
                let _ = writeln!(out, "    Endpoint vns = {}", vns);
            }
            let _ = writeln!(out, "    Port busy = {}", self.port_busy[port]);
            let _ = writeln!(out, "    Port credits = {}", self.port_credits[port]);
            let _ = writeln!(
                out,
                "    Input queue total packets = {}, head packet info:",
                self.port_queues[port].len()
            );
            match self.port_queues[port].front() {
                None => {
                    let _ = writeln!(out, "      <empty>");
                }
                Some(env) => {
                    let _ = writeln!(
                        out,
                        "      src = {}, dest = {}, next_port = {}, flits = {}",
                        env.packet.request.src,
                        env.packet.request.dest,
                        env.next_port.map(port_name).unwrap_or_default(),
                        env.flits()
                    );
                }
            }
        }
        let _ = writeln!(out, "End Router {}: id = {}", self.name, self.coord);
        out
    }
}

impl Component for MeshRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, phase: u32) -> anyhow::Result<()> {
        self.step_bootstrap(phase)
    }

    fn complete(&mut self, _phase: u32) -> anyhow::Result<()> {
        self.route_init_traffic()
    }

    /// Local ports are arbitrated ahead of compass ports unless `port_priority_equal`.
    fn setup(&mut self) -> anyhow::Result<()> {
        let connected: Vec<PortId> = (0..self.num_ports())
            .filter(|&p| self.init_ports.is_connected(p))
            .collect();

        let mut local = PriorityArbiter::new();
        connected
            .iter()
            .filter(|&&p| p >= LOCAL_PORT_START)
            .for_each(|&p| local.insert(p));
        self.arbiters.clear();
        self.arbiters.push(local);

        if !self.params.port_priority_equal {
            self.arbiters[0].finalize();
            self.arbiters.push(PriorityArbiter::new());
        }
        if let Some(mesh) = self.arbiters.last_mut() {
            connected
                .iter()
                .filter(|&&p| p < LOCAL_PORT_START)
                .for_each(|&p| mesh.insert(p));
            mesh.finalize();
        }
        Ok(())
    }

    fn start(&mut self, now: SimTime) -> anyhow::Result<()> {
        self.outbox.clock(next_cycle(now, self.params.clock_period));
        self.clock_is_off = false;
        Ok(())
    }

    fn handle_event(&mut self, port: PortId, event: NocEvent, now: SimTime) -> anyhow::Result<()> {
        if self.state != BootstrapState::SteadyState {
            bail!(
                "{}: timed {} before bootstrap finished",
                self.name,
                event.describe()
            );
        }
        let from_endpoint = self.endpoints.contains(port);
        match event {
            NocEvent::Credit(credit) => self.port_credits[port] += credit.credits,
            NocEvent::Packet(packet) if from_endpoint => {
                let envelope = self.wrap_incoming_packet(packet)?;
                self.accept(port, envelope, now)?;
            }
            NocEvent::Internal(envelope) if !from_endpoint => self.accept(port, envelope, now)?,
            other => bail!(
                "{}: unexpected {} on {} port",
                self.name,
                other.describe(),
                port_name(port)
            ),
        }
        Ok(())
    }

    fn clock_tick(&mut self, cycle: Cycle, now: SimTime) -> anyhow::Result<bool> {
        self.last_cycle = cycle;
        self.stats.record_tick();
        for busy in self.port_busy.iter_mut() {
            *busy = busy.saturating_sub(1);
        }

        let mut keep_on = false;
        // earlier arbiters have strictly higher priority
        for group in 0..self.arbiters.len() {
            for _ in 0..self.arbiters[group].size() {
                let input = self.arbiters[group].top();
                let serviced = self.try_forward(input, now, &mut keep_on)?;
                self.arbiters[group].satisfied(serviced);
            }
        }

        self.clock_is_off = !keep_on;
        Ok(keep_on)
    }

    fn clock_period(&self) -> Option<SimTime> {
        Some(self.params.clock_period)
    }

    fn init_complete(&self) -> bool {
        self.state == BootstrapState::SteadyState
    }

    fn init_ports(&mut self) -> &mut InitPorts {
        &mut self.init_ports
    }

    fn take_actions(&mut self) -> Vec<Action> {
        self.outbox.take()
    }
}
