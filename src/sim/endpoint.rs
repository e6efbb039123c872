use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::bail;
use log::debug;

use crate::base::port_set::PortId;
use crate::noc::event::{Nid, NocEvent, Request, INIT_BROADCAST_ADDR};
use crate::noc::link_control::LinkControl;
use crate::noc::stats::LinkStats;
use crate::sim::component::{Action, Component, InitPorts};
use crate::sim::config::EndpointConfig;
use crate::timeq::SimTime;

/// Traffic source and sink attached to one router port. Injects a backlog of requests as
/// fast as its link accepts them and keeps everything it receives.
pub struct Endpoint {
    name: String,
    link: LinkControl,
    vn: usize,
    backlog: VecDeque<Request>,
    send_stalls: u64,
    received: Vec<Request>,
    init_received: Vec<Request>,
    announce: bool,
    announced: bool,
    receive_ready: Rc<Cell<bool>>,
    send_ready: Rc<Cell<bool>>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, config: &EndpointConfig) -> anyhow::Result<Self> {
        let name = name.into();
        let mut link = LinkControl::new(format!("{}.link", name));
        link.initialize(
            "rtr",
            config.link_bw,
            config.vns,
            config.in_buf_size,
            config.out_buf_size,
        )?;

        let receive_ready = Rc::new(Cell::new(false));
        let send_ready = Rc::new(Cell::new(false));
        let flag = Rc::clone(&receive_ready);
        link.set_notify_on_receive(Box::new(move |_vn: usize| {
            flag.set(true);
            true
        }));
        let flag = Rc::clone(&send_ready);
        link.set_notify_on_send(Box::new(move |_vn: usize| {
            flag.set(true);
            true
        }));

        Ok(Self {
            name,
            link,
            vn: 0,
            backlog: VecDeque::new(),
            send_stalls: 0,
            received: Vec::new(),
            init_received: Vec::new(),
            announce: false,
            announced: false,
            receive_ready,
            send_ready,
        })
    }

    /// Sends one init-phase broadcast carrying this endpoint's id once the network is up.
    pub fn with_init_broadcast(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    pub fn set_vn(&mut self, vn: usize) {
        self.vn = vn;
    }

    pub fn id(&self) -> Option<Nid> {
        self.link.id()
    }

    pub fn link(&self) -> &LinkControl {
        &self.link
    }

    pub fn stats(&self) -> &LinkStats {
        self.link.stats()
    }

    /// Requests queued for injection. `src` is filled in with this endpoint's id.
    pub fn enqueue(&mut self, requests: impl IntoIterator<Item = Request>) -> anyhow::Result<()> {
        let Some(src) = self.id() else {
            bail!("{}: requests queued before the endpoint has an id", self.name);
        };
        self.backlog.extend(requests.into_iter().map(|mut r| {
            r.src = src;
            r
        }));
        Ok(())
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Times the link turned the head of the backlog away for lack of credits.
    pub fn send_stalls(&self) -> u64 {
        self.send_stalls
    }

    pub fn received(&self) -> &[Request] {
        &self.received
    }

    pub fn init_received(&self) -> &[Request] {
        &self.init_received
    }

    fn pump(&mut self) {
        while let Some(request) = self.backlog.pop_front() {
            if let Err(request) = self.link.send(request, self.vn) {
                self.backlog.push_front(request);
                self.send_stalls += 1;
                break;
            }
        }
    }

    fn drain_received(&mut self) {
        for vn in 0..self.link.vns() {
            while let Some(request) = self.link.recv(vn) {
                self.received.push(request);
            }
        }
    }

    fn collect_init_data(&mut self) {
        while let Some(request) = self.link.recv_init_data() {
            debug!("{}: init data from {}", self.name, request.src);
            self.init_received.push(request);
        }
    }
}

impl Component for Endpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, phase: u32) -> anyhow::Result<()> {
        self.link.init(phase)?;
        let ready = self.announce && !self.announced && self.link.is_network_initialized();
        if let (true, Some(src)) = (ready, self.id()) {
            let bits = self.link.flit_size();
            self.link
                .send_init_data(Request::new(src, INIT_BROADCAST_ADDR, bits));
            self.announced = true;
        }
        self.collect_init_data();
        Ok(())
    }

    fn complete(&mut self, phase: u32) -> anyhow::Result<()> {
        self.link.complete(phase)?;
        self.collect_init_data();
        Ok(())
    }

    fn start(&mut self, _now: SimTime) -> anyhow::Result<()> {
        self.pump();
        Ok(())
    }

    fn handle_event(&mut self, _port: PortId, event: NocEvent, now: SimTime) -> anyhow::Result<()> {
        self.link.handle_input(event, now)?;
        if self.receive_ready.replace(false) {
            self.drain_received();
        }
        Ok(())
    }

    fn timer(&mut self, now: SimTime) -> anyhow::Result<()> {
        self.link.handle_output(now);
        if self.send_ready.replace(false) {
            self.pump();
        }
        Ok(())
    }

    fn init_complete(&self) -> bool {
        self.link.init_complete()
    }

    fn init_ports(&mut self) -> &mut InitPorts {
        self.link.init_ports()
    }

    fn take_actions(&mut self) -> Vec<Action> {
        self.link.take_actions()
    }
}
