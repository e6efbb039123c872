use std::collections::VecDeque;
use std::fmt::Write;

use anyhow::{bail, Context};
use log::{debug, info, warn};

use crate::base::port_set::PortId;
use crate::base::units::{flit_period, Quantity, Unit};
use crate::noc::event::{
    flit_count, BootstrapCommand, BootstrapMessage, Credit, Nid, NocEvent, Packet, Request,
};
use crate::noc::stats::LinkStats;
use crate::sim::component::{Action, InitPorts, Outbox};
use crate::timeq::SimTime;

/// The only port of a link: the one facing the router.
pub const ROUTER_PORT: PortId = 0;

/// Callback fired with the vn that became ready. Returning `false` unregisters it.
pub type NotifyFn = Box<dyn FnMut(usize) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkInitState {
    Announce,
    AwaitFlitSize,
    AwaitEndpointId,
    Initialized,
    Steady,
}

/// Endpoint side of a router link. Fragments requests into flits, keeps per-vn input
/// and output queues, and paces output at one flit per link cycle under credit flow
/// control.
///
/// The router's input buffer is shared by all virtual networks, so credits received from
/// the router go into a single pool; the local buffers are per vn.
pub struct LinkControl {
    name: String,
    port_name: String,
    init_state: LinkInitState,
    link_bw: Quantity,
    req_vns: usize,
    id: Option<Nid>,
    inbuf_bits: u64,
    outbuf_bits: u64,
    flit_size: u64,
    output_period: SimTime,
    input_buf: Vec<VecDeque<Packet>>,
    output_buf: Vec<VecDeque<Packet>>,
    rtr_credits: u32,
    in_ret_credits: Vec<u32>,
    outbuf_credits: Vec<u32>,
    waiting: bool,
    have_packets: bool,
    next_vn: usize,
    receive_functor: Option<NotifyFn>,
    send_functor: Option<NotifyFn>,
    network_initialized: bool,
    init_events: VecDeque<Packet>,
    now: SimTime,
    outbox: Outbox,
    init_ports: InitPorts,
    stats: LinkStats,
}

impl LinkControl {
    pub fn new(name: impl Into<String>) -> Self {
        let mut init_ports = InitPorts::new(1);
        init_ports.connect(ROUTER_PORT);
        Self {
            name: name.into(),
            port_name: String::new(),
            init_state: LinkInitState::Announce,
            link_bw: Quantity::new(0.0, Unit::BitsPerSec),
            req_vns: 0,
            id: None,
            inbuf_bits: 0,
            outbuf_bits: 0,
            flit_size: 0,
            output_period: 1,
            input_buf: Vec::new(),
            output_buf: Vec::new(),
            rtr_credits: 0,
            in_ret_credits: Vec::new(),
            outbuf_credits: Vec::new(),
            waiting: true,
            have_packets: false,
            next_vn: 0,
            receive_functor: None,
            send_functor: None,
            network_initialized: false,
            init_events: VecDeque::new(),
            now: 0,
            outbox: Outbox::default(),
            init_ports,
            stats: LinkStats::default(),
        }
    }

    /// Configures the link. Buffer sizes must be in bits or bytes; anything else is a
    /// fatal configuration error.
    pub fn initialize(
        &mut self,
        port_name: &str,
        link_bw: Quantity,
        vns: usize,
        in_buf_size: Quantity,
        out_buf_size: Quantity,
    ) -> anyhow::Result<()> {
        if vns == 0 {
            bail!("{}: at least one virtual network is required", self.name);
        }
        link_bw
            .to_bits_per_sec()
            .with_context(|| format!("{}: invalid link_bw", self.name))?;
        self.inbuf_bits = in_buf_size
            .to_bits()
            .with_context(|| format!("{}: invalid in_buf_size", self.name))?;
        self.outbuf_bits = out_buf_size
            .to_bits()
            .with_context(|| format!("{}: invalid out_buf_size", self.name))?;

        self.port_name = port_name.to_string();
        self.link_bw = link_bw.in_bits();
        self.req_vns = vns;
        self.input_buf = (0..vns).map(|_| VecDeque::new()).collect();
        self.output_buf = (0..vns).map(|_| VecDeque::new()).collect();
        // credits are in flits; they are sized once the router reports the flit size
        self.in_ret_credits = vec![0; vns];
        self.outbuf_credits = vec![0; vns];
        self.rtr_credits = 0;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<Nid> {
        self.id
    }

    pub fn flit_size(&self) -> u64 {
        self.flit_size
    }

    pub fn vns(&self) -> usize {
        self.req_vns
    }

    pub fn is_network_initialized(&self) -> bool {
        self.network_initialized
    }

    pub fn init_complete(&self) -> bool {
        self.init_state == LinkInitState::Steady
    }

    pub fn rtr_credits(&self) -> u32 {
        self.rtr_credits
    }

    pub fn outbuf_credits(&self, vn: usize) -> u32 {
        self.outbuf_credits[vn]
    }

    pub fn in_ret_credits(&self, vn: usize) -> u32 {
        self.in_ret_credits[vn]
    }

    pub fn input_queue_len(&self, vn: usize) -> usize {
        self.input_buf[vn].len()
    }

    pub fn output_queue_len(&self, vn: usize) -> usize {
        self.output_buf[vn].len()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn init_ports(&mut self) -> &mut InitPorts {
        &mut self.init_ports
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        self.outbox.take()
    }

    pub fn set_notify_on_receive(&mut self, functor: NotifyFn) {
        self.receive_functor = Some(functor);
    }

    pub fn set_notify_on_send(&mut self, functor: NotifyFn) {
        self.send_functor = Some(functor);
    }

    fn flit_credits(&self, what: &str, bits: u64) -> anyhow::Result<u32> {
        u32::try_from(bits / self.flit_size).with_context(|| {
            format!(
                "{}: {} of {} bits is too many {}-bit flits to count",
                self.name, what, bits, self.flit_size
            )
        })
    }

    /// Queues `request` on `vn` if the output buffer has room for it. On failure the
    /// request is handed back untouched and the link is left as it was.
    pub fn send(&mut self, mut request: Request, vn: usize) -> Result<(), Request> {
        if vn >= self.req_vns {
            return Err(request);
        }
        let Some(flits) = flit_count(request.size_in_bits, self.flit_size) else {
            return Err(request);
        };
        if self.outbuf_credits[vn] < flits {
            return Err(request);
        }

        request.vn = vn;
        let packet = Packet::with_flits(request, flits);
        self.outbuf_credits[vn] -= flits;
        if packet.traced() {
            info!(
                "TRACE({}): {} ps: send on link in {}",
                packet.request.trace_id, self.now, self.name
            );
        }
        self.output_buf[vn].push_back(packet);

        if self.waiting && !self.have_packets {
            self.outbox.timer(self.output_period);
            self.waiting = false;
        }
        Ok(())
    }

    pub fn space_to_send(&self, vn: usize, bits: u64) -> bool {
        vn < self.req_vns && self.outbuf_credits[vn] as u64 * self.flit_size >= bits
    }

    /// Pops the next request on `vn` and returns its buffer space to the router.
    pub fn recv(&mut self, vn: usize) -> Option<Request> {
        let packet = self.input_buf.get_mut(vn)?.pop_front()?;
        self.in_ret_credits[vn] += packet.size_in_flits();
        self.outbox.send(
            ROUTER_PORT,
            NocEvent::Credit(Credit::new(vn, self.in_ret_credits[vn])),
        );
        self.in_ret_credits[vn] = 0;
        Some(packet.into_request())
    }

    pub fn request_to_receive(&self, vn: usize) -> bool {
        self.input_buf.get(vn).is_some_and(|q| !q.is_empty())
    }

    pub fn send_init_data(&mut self, request: Request) {
        let packet = Packet::new(request, self.flit_size.max(1));
        self.outbox.send_init(ROUTER_PORT, NocEvent::Packet(packet));
    }

    pub fn recv_init_data(&mut self) -> Option<Request> {
        self.init_events.pop_front().map(Packet::into_request)
    }

    fn expect_bootstrap(
        &self,
        event: NocEvent,
        command: BootstrapCommand,
    ) -> anyhow::Result<BootstrapMessage> {
        match event {
            NocEvent::Bootstrap(msg) if msg.command == command => Ok(msg),
            other => bail!(
                "{}: expected {:?} during init state {:?}, got {}",
                self.name,
                command,
                self.init_state,
                other.describe()
            ),
        }
    }

    pub fn init(&mut self, phase: u32) -> anyhow::Result<()> {
        match self.init_state {
            LinkInitState::Announce => {
                self.outbox.send_init(
                    ROUTER_PORT,
                    NocEvent::Bootstrap(BootstrapMessage::new(
                        BootstrapCommand::ReportEndpoint,
                        self.req_vns as i64,
                    )),
                );
                self.init_state = LinkInitState::AwaitFlitSize;
            }
            LinkInitState::AwaitFlitSize => {
                let Some(event) = self.init_ports.recv(ROUTER_PORT) else {
                    return Ok(());
                };
                let msg = self.expect_bootstrap(event, BootstrapCommand::ReportFlitSize)?;
                let flit = msg
                    .quantity
                    .with_context(|| format!("{}: flit size report without a size", self.name))?;
                self.flit_size = flit.to_bits()?;
                if self.flit_size == 0 {
                    bail!("{}: router reported a zero flit size", self.name);
                }
                self.output_period = flit_period(&self.link_bw, &flit)?;
                let out_credits = self.flit_credits("out_buf_size", self.outbuf_bits)?;
                let in_credits = self.flit_credits("in_buf_size", self.inbuf_bits)?;
                self.outbuf_credits.iter_mut().for_each(|c| *c = out_credits);
                self.in_ret_credits.iter_mut().for_each(|c| *c = in_credits);
                debug!(
                    "{}: phase {}: flit size {}b, output period {} ps",
                    self.name, phase, self.flit_size, self.output_period
                );
                self.init_state = LinkInitState::AwaitEndpointId;
            }
            LinkInitState::AwaitEndpointId => {
                let Some(event) = self.init_ports.recv(ROUTER_PORT) else {
                    return Ok(());
                };
                let msg = self.expect_bootstrap(event, BootstrapCommand::ReportEndpointId)?;
                self.id = Some(msg.int_value as Nid);

                // The router keeps one credit pool per port, so one buffer's worth is
                // advertised and the rest of the pending returns are dropped.
                let seed = self.in_ret_credits[0];
                self.in_ret_credits.iter_mut().for_each(|c| *c = 0);
                self.outbox
                    .send_init(ROUTER_PORT, NocEvent::Credit(Credit::new(0, seed)));
                debug!("{}: phase {}: assigned id {}", self.name, phase, msg.int_value);
                self.init_state = LinkInitState::Initialized;
            }
            LinkInitState::Initialized | LinkInitState::Steady => {
                if self.init_state == LinkInitState::Initialized {
                    self.network_initialized = true;
                    self.init_state = LinkInitState::Steady;
                }
                self.drain_init_data();
            }
        }
        Ok(())
    }

    pub fn complete(&mut self, _phase: u32) -> anyhow::Result<()> {
        self.drain_init_data();
        Ok(())
    }

    /// Credits are applied, packets are kept for the owning endpoint.
    fn drain_init_data(&mut self) {
        while let Some(event) = self.init_ports.recv(ROUTER_PORT) {
            match event {
                NocEvent::Credit(credit) => {
                    if credit.vn < self.req_vns {
                        self.rtr_credits += credit.credits;
                    }
                }
                NocEvent::Packet(packet) => self.init_events.push_back(packet),
                other => warn!("{}: ignoring init data {}", self.name, other.describe()),
            }
        }
    }

    pub fn handle_input(&mut self, event: NocEvent, now: SimTime) -> anyhow::Result<()> {
        self.now = now;
        match event {
            NocEvent::Credit(credit) => {
                self.rtr_credits += credit.credits;
                if self.waiting {
                    self.outbox.timer(0);
                    self.waiting = false;
                }
            }
            NocEvent::Packet(packet) => {
                let vn = packet.vn;
                if vn >= self.req_vns {
                    bail!(
                        "{}: received packet on vn {} but only {} vns are configured",
                        self.name,
                        vn,
                        self.req_vns
                    );
                }
                if packet.traced() {
                    info!(
                        "TRACE({}): {} ps: received on link in {} on vn {} from src {}",
                        packet.request.trace_id, now, self.name, vn, packet.request.src
                    );
                }
                let latency = now.saturating_sub(packet.injection_time());
                self.stats
                    .record_receive(packet.request.size_in_bits, latency);
                self.input_buf[vn].push_back(packet);

                if let Some(functor) = self.receive_functor.as_mut() {
                    if !functor(vn) {
                        self.receive_functor = None;
                    }
                }
            }
            other => bail!(
                "{}: unexpected {} on an endpoint link",
                self.name,
                other.describe()
            ),
        }
        Ok(())
    }

    /// Output pacing timer.
    pub fn handle_output(&mut self, now: SimTime) {
        self.now = now;
        let vns = self.req_vns;
        let mut any_queued = false;
        let mut chosen = None;
        for i in 0..vns {
            let vn = (self.next_vn + i) % vns;
            if let Some(head) = self.output_buf[vn].front() {
                any_queued = true;
                if head.size_in_flits() <= self.rtr_credits {
                    chosen = Some(vn);
                    break;
                }
            }
        }

        let Some(vn) = chosen else {
            // nothing fits: sleep until a credit or a new packet shows up
            self.waiting = true;
            self.have_packets = any_queued;
            return;
        };

        self.have_packets = true;
        let Some(mut packet) = self.output_buf[vn].pop_front() else {
            return;
        };
        packet.vn = vn;
        packet.request.vn = vn;

        let size = packet.size_in_flits();
        self.outbuf_credits[vn] += size;
        self.rtr_credits -= size;
        self.outbox.timer(size as SimTime * self.output_period);
        packet.set_injection_time(now);
        self.stats.record_send(packet.request.size_in_bits);
        self.next_vn = (vn + 1) % vns;

        if packet.traced() {
            info!(
                "TRACE({}): {} ps: sent to router from link in {} on vn {} to dest {}",
                packet.request.trace_id, now, self.name, vn, packet.request.dest
            );
        }
        self.outbox.send(ROUTER_PORT, NocEvent::Packet(packet));

        if let Some(functor) = self.send_functor.as_mut() {
            if !functor(vn) {
                self.send_functor = None;
            }
        }
    }

    pub fn status(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Start link {} ({}):", self.name, self.port_name);
        let _ = writeln!(out, "  Router credits = {}", self.rtr_credits);
        for vn in 0..self.req_vns {
            let _ = writeln!(
                out,
                "  vn {}: output buffer credits = {}, input queue = {}, output queue = {}",
                vn,
                self.outbuf_credits[vn],
                self.input_buf[vn].len(),
                self.output_buf[vn].len()
            );
            match self.output_buf[vn].front() {
                Some(p) => {
                    let _ = writeln!(
                        out,
                        "    head: src = {}, dest = {}, flits = {}",
                        p.request.src,
                        p.request.dest,
                        p.size_in_flits()
                    );
                }
                None => {
                    let _ = writeln!(out, "    head: <empty>");
                }
            }
        }
        let _ = writeln!(out, "End link {}", self.name);
        out
    }
}
