//! Leaderless topology discovery.
//!
//! Routers start out knowing only which of their ports are connected. Tokens travel along
//! the compass links, one hop per init phase:
//!
//! 1. Endpoint counts are prefix-summed westward along every row. The south row also
//!    counts its columns, which gives the mesh width at the southwest router.
//! 2. The west column sums the row totals southward and counts the rows.
//! 3. The southwest router, now knowing everything, becomes `(1, 1)` and broadcasts the
//!    endpoint prefix, the totals, and the coordinates north then east.
//! 4. Every router waits until the broadcast has reached the northeast corner, then all of
//!    them hand out endpoint ids in the same phase.
//! 5. Both sides of every link seed each other's credit pool.

use anyhow::{bail, Context};
use log::debug;
use smallvec::SmallVec;

use crate::base::port_set::{
    port_name, Direction, PortId, EAST_PORT, LOCAL_PORT_START, NORTH_PORT, SOUTH_PORT, WEST_PORT,
};
use crate::noc::event::{BootstrapCommand, BootstrapMessage, Credit, MeshCoord, Nid, NocEvent};

use super::MeshRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    AwaitEndpoints,
    ClassifyPorts,
    RelayCount,
    WaitWest,
    RelayNorth,
    ComputeOrigin,
    WaitTopologyBroadcast,
    ConvergenceWait,
    AssignEndpointIds,
    SeedCredits,
    ReceiveCredits,
    SteadyState,
}

impl BootstrapState {
    /// Tokens a router in this state reads from its neighbour, in the order they are sent.
    /// Routers outside the south row or the west column only read a prefix.
    pub fn expected_commands(self) -> &'static [BootstrapCommand] {
        use BootstrapCommand::*;
        match self {
            BootstrapState::RelayCount | BootstrapState::WaitWest => &[SumEndpoints, ComputeXSize],
            BootstrapState::RelayNorth | BootstrapState::ComputeOrigin => {
                &[SumEndpoints, ComputeYSize]
            }
            BootstrapState::WaitTopologyBroadcast => &[
                ComputeEndpointStart,
                BroadcastTotalEndpoints,
                BroadcastXSize,
                BroadcastYSize,
                ComputeXPos,
                ComputeYPos,
            ],
            _ => &[],
        }
    }
}

/// Whether the state machine keeps going in the current phase.
enum Flow {
    Yield,
    FallThrough,
}

type Tokens = SmallVec<[i64; 6]>;

impl MeshRouter {
    pub(super) fn step_bootstrap(&mut self, phase: u32) -> anyhow::Result<()> {
        loop {
            let before = self.state;
            let flow = match self.state {
                BootstrapState::AwaitEndpoints => {
                    // endpoints announce themselves in this phase
                    self.state = BootstrapState::ClassifyPorts;
                    Flow::Yield
                }
                BootstrapState::ClassifyPorts => self.classify_ports()?,
                BootstrapState::RelayCount => self.relay_count()?,
                BootstrapState::WaitWest => self.wait_west()?,
                BootstrapState::RelayNorth => self.relay_north()?,
                BootstrapState::ComputeOrigin => self.compute_origin()?,
                BootstrapState::WaitTopologyBroadcast => self.wait_topology_broadcast()?,
                BootstrapState::ConvergenceWait => self.convergence_wait(),
                BootstrapState::AssignEndpointIds => self.assign_endpoint_ids()?,
                BootstrapState::SeedCredits => self.seed_credits()?,
                BootstrapState::ReceiveCredits => self.receive_credits()?,
                BootstrapState::SteadyState => {
                    self.route_init_traffic()?;
                    Flow::Yield
                }
            };
            if self.state != before {
                debug!(
                    "{}: phase {}: {:?} -> {:?}",
                    self.name, phase, before, self.state
                );
            }
            if let Flow::Yield = flow {
                return Ok(());
            }
        }
    }

    fn send_token(&mut self, port: PortId, command: BootstrapCommand, value: i64) {
        self.outbox
            .send_init(port, NocEvent::Bootstrap(BootstrapMessage::new(command, value)));
    }

    fn send_tokens(&mut self, port: PortId, commands: &[BootstrapCommand], values: &[i64]) {
        for (&command, &value) in commands.iter().zip(values) {
            self.send_token(port, command, value);
        }
    }

    /// Reads the first `count` tokens this state expects from `port`. Nothing pending means
    /// the tokens have not arrived yet; a partial or out-of-order sequence is a protocol
    /// error.
    fn recv_tokens(&mut self, port: PortId, count: usize) -> anyhow::Result<Option<Tokens>> {
        if self.init_ports.pending(port) == 0 {
            return Ok(None);
        }
        let expected = &self.state.expected_commands()[..count];
        let mut values = Tokens::new();
        for &command in expected {
            match self.init_ports.recv(port) {
                Some(NocEvent::Bootstrap(msg)) if msg.command == command => {
                    values.push(msg.int_value)
                }
                Some(other) => bail!(
                    "{}: protocol error in {:?}: expected {:?} on {} port, got {}",
                    self.name,
                    self.state,
                    command,
                    port_name(port),
                    other.describe()
                ),
                None => bail!(
                    "{}: protocol error in {:?}: {:?} missing on {} port",
                    self.name,
                    self.state,
                    command,
                    port_name(port)
                ),
            }
        }
        Ok(Some(values))
    }

    fn classify_ports(&mut self) -> anyhow::Result<Flow> {
        for port in 0..self.num_ports() {
            if !self.init_ports.is_connected(port) {
                self.edges.insert(port);
                continue;
            }
            match self.init_ports.recv(port) {
                // silent peers are routers
                None => {}
                Some(NocEvent::Bootstrap(msg)) if msg.command == BootstrapCommand::ReportEndpoint => {
                    self.edges.insert(port);
                    self.endpoints.insert(port);
                    self.endpoint_vns[port] = Some(msg.int_value.max(0) as usize);
                    self.my_endpoints += 1;
                }
                Some(other) => bail!(
                    "{}: protocol error: expected an endpoint report on {} port, got {}",
                    self.name,
                    port_name(port),
                    other.describe()
                ),
            }
        }
        debug!(
            "{}: edges {:?}, endpoints {:?}",
            self.name, self.edges, self.endpoints
        );

        let flit_size = self.params.flit_size();
        let endpoints = self.endpoints;
        for port in endpoints.iter() {
            self.outbox.send_init(
                port,
                NocEvent::Bootstrap(BootstrapMessage::with_quantity(
                    BootstrapCommand::ReportFlitSize,
                    flit_size,
                )),
            );
        }

        let east = self.is_edge(Direction::East);
        let west = self.is_edge(Direction::West);
        if east && !west {
            self.send_token(WEST_PORT, BootstrapCommand::SumEndpoints, self.my_endpoints);
            if self.is_edge(Direction::South) {
                self.send_token(WEST_PORT, BootstrapCommand::ComputeXSize, 1);
            }
            self.state = BootstrapState::WaitTopologyBroadcast;
            Ok(Flow::Yield)
        } else if west {
            if east {
                // single column, the row total is ours alone
                return self.finish_row(self.my_endpoints, 0);
            }
            self.state = BootstrapState::WaitWest;
            Ok(Flow::Yield)
        } else {
            self.state = BootstrapState::RelayCount;
            Ok(Flow::Yield)
        }
    }

    fn relay_count(&mut self) -> anyhow::Result<Flow> {
        let south = self.is_edge(Direction::South);
        let Some(tokens) = self.recv_tokens(EAST_PORT, if south { 2 } else { 1 })? else {
            return Ok(Flow::Yield);
        };
        self.send_token(
            WEST_PORT,
            BootstrapCommand::SumEndpoints,
            tokens[0] + self.my_endpoints,
        );
        if south {
            self.send_token(WEST_PORT, BootstrapCommand::ComputeXSize, tokens[1] + 1);
        }
        self.state = BootstrapState::WaitTopologyBroadcast;
        Ok(Flow::Yield)
    }

    fn wait_west(&mut self) -> anyhow::Result<Flow> {
        let south = self.is_edge(Direction::South);
        let Some(tokens) = self.recv_tokens(EAST_PORT, if south { 2 } else { 1 })? else {
            return Ok(Flow::Yield);
        };
        let columns = if south { tokens[1] } else { 0 };
        self.finish_row(self.my_endpoints + tokens[0], columns)
    }

    /// West column: the row total is known. `columns` counts the routers east of this one
    /// and is only meaningful on the south row.
    fn finish_row(&mut self, row_total: i64, columns: i64) -> anyhow::Result<Flow> {
        self.row_endpoints = row_total;
        let north = self.is_edge(Direction::North);
        if self.is_edge(Direction::South) {
            // one for this router, two for the halo
            self.x_size = columns + 3;
            if north {
                // single row
                return self.originate(0, 0);
            }
            self.state = BootstrapState::ComputeOrigin;
        } else if north {
            self.send_token(SOUTH_PORT, BootstrapCommand::SumEndpoints, row_total);
            self.send_token(SOUTH_PORT, BootstrapCommand::ComputeYSize, 1);
            self.state = BootstrapState::WaitTopologyBroadcast;
        } else {
            self.state = BootstrapState::RelayNorth;
        }
        Ok(Flow::Yield)
    }

    fn relay_north(&mut self) -> anyhow::Result<Flow> {
        let Some(tokens) = self.recv_tokens(NORTH_PORT, 2)? else {
            return Ok(Flow::Yield);
        };
        self.send_token(
            SOUTH_PORT,
            BootstrapCommand::SumEndpoints,
            tokens[0] + self.row_endpoints,
        );
        self.send_token(SOUTH_PORT, BootstrapCommand::ComputeYSize, tokens[1] + 1);
        self.state = BootstrapState::WaitTopologyBroadcast;
        Ok(Flow::Yield)
    }

    fn compute_origin(&mut self) -> anyhow::Result<Flow> {
        let Some(tokens) = self.recv_tokens(NORTH_PORT, 2)? else {
            return Ok(Flow::Yield);
        };
        self.originate(tokens[0], tokens[1])
    }

    /// Southwest router: fixes the origin and starts the topology broadcast.
    fn originate(&mut self, north_endpoints: i64, rows: i64) -> anyhow::Result<Flow> {
        self.total_endpoints = self.row_endpoints + north_endpoints;
        self.y_size = rows + 3;
        self.coord = MeshCoord::new(1, 1);
        self.endpoint_start = 0;

        let commands = BootstrapState::WaitTopologyBroadcast.expected_commands();
        let rest = [
            self.total_endpoints,
            self.x_size,
            self.y_size,
            self.coord.x,
            self.coord.y,
        ];
        // the row above starts after this row, the router to the east after this one
        for (dir, start) in [
            (Direction::North, self.row_endpoints),
            (Direction::East, self.my_endpoints),
        ] {
            if !self.is_edge(dir) {
                let mut values: Tokens = SmallVec::from_slice(&[start]);
                values.extend_from_slice(&rest);
                self.send_tokens(dir.port(), commands, &values);
            }
        }
        debug!(
            "{}: origin, {} endpoints, mesh {}x{}",
            self.name, self.total_endpoints, self.x_size, self.y_size
        );
        Ok(self.begin_convergence())
    }

    fn wait_topology_broadcast(&mut self) -> anyhow::Result<Flow> {
        let west_column = self.is_edge(Direction::West);
        let from = if west_column { SOUTH_PORT } else { WEST_PORT };
        let Some(tokens) = self.recv_tokens(from, 6)? else {
            return Ok(Flow::Yield);
        };
        let (start, total, x_size, y_size, x_pos, y_pos) =
            (tokens[0], tokens[1], tokens[2], tokens[3], tokens[4], tokens[5]);
        self.endpoint_start = start;
        self.total_endpoints = total;
        self.x_size = x_size;
        self.y_size = y_size;

        let commands = BootstrapState::WaitTopologyBroadcast.expected_commands();
        if west_column {
            self.coord = MeshCoord::new(x_pos, y_pos + 1);
            if !self.is_edge(Direction::North) {
                let values = [start + self.row_endpoints, total, x_size, y_size, x_pos, y_pos + 1];
                self.send_tokens(NORTH_PORT, commands, &values);
            }
            if !self.is_edge(Direction::East) {
                let values = [start + self.my_endpoints, total, x_size, y_size, x_pos, y_pos + 1];
                self.send_tokens(EAST_PORT, commands, &values);
            }
        } else {
            self.coord = MeshCoord::new(x_pos + 1, y_pos);
            if !self.is_edge(Direction::East) {
                let values = [start + self.my_endpoints, total, x_size, y_size, x_pos + 1, y_pos];
                self.send_tokens(EAST_PORT, commands, &values);
            }
        }
        debug!(
            "{}: at {}, endpoint_start {}",
            self.name, self.coord, self.endpoint_start
        );
        Ok(self.begin_convergence())
    }

    /// Waits until the broadcast reaches the northeast corner so that every router hands
    /// out ids in the same phase. The corner itself goes straight on.
    fn begin_convergence(&mut self) -> Flow {
        let remaining = self.geometry().distance_to_far_corner(self.coord) - 1;
        if remaining < 0 {
            self.state = BootstrapState::AssignEndpointIds;
            Flow::FallThrough
        } else {
            self.init_count = remaining;
            self.state = BootstrapState::ConvergenceWait;
            Flow::Yield
        }
    }

    fn convergence_wait(&mut self) -> Flow {
        if self.init_count > 0 {
            self.init_count -= 1;
            return Flow::Yield;
        }
        self.state = BootstrapState::AssignEndpointIds;
        Flow::FallThrough
    }

    fn assign_endpoint_ids(&mut self) -> anyhow::Result<Flow> {
        let geometry = self.geometry();
        let mut ids: SmallVec<[(Nid, PortId); 8]> = SmallVec::new();
        for dir in Direction::ALL {
            if self.endpoints.contains_dir(dir) {
                let (dx, dy) = dir.offset();
                let halo = MeshCoord::new(self.coord.x + dx, self.coord.y + dy);
                ids.push((geometry.endpoint_id(halo, 0), dir.port()));
            }
        }
        for i in 0..self.params.local_ports {
            let port = LOCAL_PORT_START + i;
            if self.endpoints.contains(port) {
                ids.push((geometry.endpoint_id(self.coord, i), port));
            }
        }

        if let Some(map) = &self.dense_map {
            ids.sort_unstable();
            for (i, (id, _)) in ids.iter_mut().enumerate() {
                let dense = self.endpoint_start as usize + i;
                map.insert(dense, *id)
                    .with_context(|| format!("{}: cannot publish dense id", self.name))?;
                *id = dense as Nid;
            }
        }

        for (id, port) in ids {
            self.send_token(port, BootstrapCommand::ReportEndpointId, id as i64);
        }
        self.state = BootstrapState::SeedCredits;
        Ok(Flow::Yield)
    }

    fn seed_credits(&mut self) -> anyhow::Result<Flow> {
        let credits = self.params.input_buf_credits();
        for port in 0..self.num_ports() {
            if self.init_ports.is_connected(port) {
                self.outbox
                    .send_init(port, NocEvent::Credit(Credit::new(0, credits)));
                self.credits_pending.insert(port);
            }
        }
        // every router published its ids in the previous phase
        if let Some(map) = &self.dense_map {
            map.freeze()
                .with_context(|| format!("{}: dense map is incomplete", self.name))?;
        }
        self.state = BootstrapState::ReceiveCredits;
        Ok(Flow::Yield)
    }

    /// Exactly one credit seed is expected per connected port.
    fn receive_credits(&mut self) -> anyhow::Result<Flow> {
        let pending = self.credits_pending;
        for port in pending.iter() {
            match self.init_ports.recv(port) {
                None => {}
                Some(NocEvent::Credit(credit)) => {
                    self.port_credits[port] += credit.credits;
                    self.credits_pending.remove(port);
                }
                Some(other) => bail!(
                    "{}: protocol error: expected a credit seed on {} port, got {}",
                    self.name,
                    port_name(port),
                    other.describe()
                ),
            }
        }
        if self.credits_pending.is_empty() {
            self.state = BootstrapState::SteadyState;
            Ok(Flow::FallThrough)
        } else {
            Ok(Flow::Yield)
        }
    }
}
