use std::collections::VecDeque;

use crate::base::port_set::PortId;
use crate::noc::event::NocEvent;
use crate::timeq::{Cycle, SimTime};

/// Side effect requested by a component. Components never touch each other directly;
/// the kernel drains these after every callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Timed send over the link attached to `port`.
    Send { port: PortId, event: NocEvent },
    /// Untimed init-phase send, readable by the peer in the next phase.
    SendInit { port: PortId, event: NocEvent },
    /// Self-timer that fires `delay` picoseconds from now.
    Timer { delay: SimTime },
    /// (Re-)arm the component clock, first tick at `cycle`.
    Clock { cycle: Cycle },
}

#[derive(Debug, Default)]
pub struct Outbox {
    actions: Vec<Action>,
}

impl Outbox {
    pub fn send(&mut self, port: PortId, event: NocEvent) {
        self.actions.push(Action::Send { port, event });
    }

    pub fn send_init(&mut self, port: PortId, event: NocEvent) {
        self.actions.push(Action::SendInit { port, event });
    }

    pub fn timer(&mut self, delay: SimTime) {
        self.actions.push(Action::Timer { delay });
    }

    pub fn clock(&mut self, cycle: Cycle) {
        self.actions.push(Action::Clock { cycle });
    }

    pub fn take(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

/// Per-port inbound init data together with which ports have a link attached.
#[derive(Debug, Default)]
pub struct InitPorts {
    inbound: Vec<VecDeque<NocEvent>>,
    connected: Vec<bool>,
}

impl InitPorts {
    pub fn new(num_ports: usize) -> Self {
        Self {
            inbound: (0..num_ports).map(|_| VecDeque::new()).collect(),
            connected: vec![false; num_ports],
        }
    }

    pub fn connect(&mut self, port: PortId) {
        self.connected[port] = true;
    }

    pub fn is_connected(&self, port: PortId) -> bool {
        self.connected.get(port).copied().unwrap_or(false)
    }

    pub fn num_ports(&self) -> usize {
        self.connected.len()
    }

    pub fn deliver(&mut self, port: PortId, event: NocEvent) {
        self.inbound[port].push_back(event);
    }

    pub fn recv(&mut self, port: PortId) -> Option<NocEvent> {
        self.inbound.get_mut(port)?.pop_front()
    }

    pub fn pending(&self, port: PortId) -> usize {
        self.inbound.get(port).map_or(0, VecDeque::len)
    }
}

/// A simulated object driven by the kernel.
pub trait Component {
    fn name(&self) -> &str;

    /// Called once per init phase. Init data sent in phase `n` is readable in `n + 1`.
    fn init(&mut self, phase: u32) -> anyhow::Result<()>;

    /// Called once per complete phase, after init is over.
    fn complete(&mut self, _phase: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when timed simulation begins.
    fn start(&mut self, _now: SimTime) -> anyhow::Result<()> {
        Ok(())
    }

    fn handle_event(&mut self, port: PortId, event: NocEvent, now: SimTime) -> anyhow::Result<()>;

    /// Returns whether the clock should keep ticking.
    fn clock_tick(&mut self, _cycle: Cycle, _now: SimTime) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn timer(&mut self, _now: SimTime) -> anyhow::Result<()> {
        Ok(())
    }

    /// Clock period for components that register a clock.
    fn clock_period(&self) -> Option<SimTime> {
        None
    }

    /// True once the component needs no more init phases.
    fn init_complete(&self) -> bool;

    fn init_ports(&mut self) -> &mut InitPorts;

    fn take_actions(&mut self) -> Vec<Action>;
}
