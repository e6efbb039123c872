use std::fmt;

use crate::base::port_set::{port_name, PortId};
use crate::base::units::Quantity;
use crate::timeq::{ceil_div, SimTime};

/// Network endpoint id.
pub type Nid = u64;

/// Destination that every endpoint except the sender receives. Only valid for init data.
pub const INIT_BROADCAST_ADDR: Nid = Nid::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceType {
    #[default]
    None,
    Route,
    Full,
}

/// Caller payload carried by the fabric. Only the addressing fields, the size, and the
/// virtual network are looked at; the payload bytes are never touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub src: Nid,
    pub dest: Nid,
    pub size_in_bits: u64,
    pub vn: usize,
    pub trace: TraceType,
    pub trace_id: u64,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(src: Nid, dest: Nid, size_in_bits: u64) -> Self {
        Self {
            src,
            dest,
            size_in_bits,
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_trace(mut self, trace: TraceType, trace_id: u64) -> Self {
        self.trace = trace;
        self.trace_id = trace_id;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest == INIT_BROADCAST_ADDR
    }
}

/// A request in flight, sized in flits.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub request: Request,
    pub vn: usize,
    size_in_flits: u32,
    injection_time: SimTime,
}

/// Number of `flit_size`-bit flits needed for `bits`, if it fits a credit count.
pub fn flit_count(bits: u64, flit_size: u64) -> Option<u32> {
    if flit_size == 0 {
        return None;
    }
    u32::try_from(ceil_div(bits, flit_size)).ok()
}

impl Packet {
    /// Sizes the packet in flits. A count past `u32::MAX` saturates, so such a packet
    /// never finds enough credits.
    pub fn new(request: Request, flit_size: u64) -> Self {
        let size_in_flits = flit_count(request.size_in_bits, flit_size).unwrap_or(u32::MAX);
        Self::with_flits(request, size_in_flits)
    }

    pub fn with_flits(request: Request, size_in_flits: u32) -> Self {
        Self {
            vn: request.vn,
            request,
            size_in_flits,
            injection_time: 0,
        }
    }

    pub fn size_in_flits(&self) -> u32 {
        self.size_in_flits
    }

    pub fn injection_time(&self) -> SimTime {
        self.injection_time
    }

    pub fn set_injection_time(&mut self, now: SimTime) {
        self.injection_time = now;
    }

    pub fn traced(&self) -> bool {
        self.request.trace == TraceType::Full
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

/// Return of buffer space to the sender on the other side of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    pub vn: usize,
    pub credits: u32,
}

impl Credit {
    pub fn new(vn: usize, credits: u32) -> Self {
        Self { vn, credits }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapCommand {
    ReportEndpoint,
    SumEndpoints,
    ComputeXSize,
    ComputeYSize,
    ComputeEndpointStart,
    BroadcastTotalEndpoints,
    BroadcastXSize,
    BroadcastYSize,
    ComputeXPos,
    ComputeYPos,
    ReportEndpointId,
    ReportFlitSize,
    ReportRequestedVns,
}

/// One token of the topology discovery protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapMessage {
    pub command: BootstrapCommand,
    pub int_value: i64,
    pub quantity: Option<Quantity>,
}

impl BootstrapMessage {
    pub fn new(command: BootstrapCommand, int_value: i64) -> Self {
        Self {
            command,
            int_value,
            quantity: None,
        }
    }

    pub fn with_quantity(command: BootstrapCommand, quantity: Quantity) -> Self {
        Self {
            command,
            int_value: 0,
            quantity: Some(quantity),
        }
    }
}

/// Router coordinate including the halo, so interior routers live in
/// `1..=x_size - 2` by `1..=y_size - 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MeshCoord {
    pub x: i64,
    pub y: i64,
}

impl MeshCoord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: &MeshCoord) -> u64 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl fmt::Display for MeshCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Where an envelope leaves the mesh once it reaches its destination router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Egress {
    /// Replicated to every endpoint.
    Broadcast,
    Port(PortId),
}

/// Router-to-router unit. Never crosses the endpoint boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingEnvelope {
    pub dest: MeshCoord,
    pub egress: Egress,
    pub next_port: Option<PortId>,
    pub packet: Packet,
}

impl RoutingEnvelope {
    pub fn new(dest: MeshCoord, egress: Egress, packet: Packet) -> Self {
        Self {
            dest,
            egress,
            next_port: None,
            packet,
        }
    }

    pub fn broadcast(packet: Packet) -> Self {
        Self::new(MeshCoord::new(-1, -1), Egress::Broadcast, packet)
    }

    pub fn is_broadcast(&self) -> bool {
        self.egress == Egress::Broadcast
    }

    pub fn flits(&self) -> u32 {
        self.packet.size_in_flits()
    }
}

/// Everything that can travel over a link.
#[derive(Debug, Clone, PartialEq)]
pub enum NocEvent {
    Credit(Credit),
    Packet(Packet),
    Internal(RoutingEnvelope),
    Bootstrap(BootstrapMessage),
}

impl NocEvent {
    pub fn describe(&self) -> String {
        match self {
            NocEvent::Credit(c) => format!("credit(vn {}, {})", c.vn, c.credits),
            NocEvent::Packet(p) => format!(
                "packet({} -> {}, {} flits)",
                p.request.src,
                p.request.dest,
                p.size_in_flits()
            ),
            NocEvent::Internal(e) => format!(
                "envelope({} -> {} via {})",
                e.packet.request.src,
                e.dest,
                e.next_port.map(port_name).unwrap_or_else(|| "-".to_string())
            ),
            NocEvent::Bootstrap(b) => format!("bootstrap({:?}, {})", b.command, b.int_value),
        }
    }
}
