use std::ops::AddAssign;

use serde::Serialize;

use crate::timeq::SimTime;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PortStats {
    send_bit_count: u64,
    packets_sent: u64,
    output_port_stalls: u64,
    xbar_stalls: u64,
}

impl PortStats {
    pub fn send_bit_count(&self) -> u64 {
        self.send_bit_count
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn output_port_stalls(&self) -> u64 {
        self.output_port_stalls
    }

    pub fn xbar_stalls(&self) -> u64 {
        self.xbar_stalls
    }

    pub fn record_send(&mut self, bits: u64) {
        self.send_bit_count = self.send_bit_count.saturating_add(bits);
        self.packets_sent = self.packets_sent.saturating_add(1);
    }

    /// Head of an input queue wanted this output but it had no credits.
    pub fn record_output_port_stall(&mut self) {
        self.output_port_stalls = self.output_port_stalls.saturating_add(1);
    }

    /// Head of an input queue wanted this output but it was still busy.
    pub fn record_xbar_stall(&mut self) {
        self.xbar_stalls = self.xbar_stalls.saturating_add(1);
    }
}

impl AddAssign<&PortStats> for PortStats {
    fn add_assign(&mut self, other: &PortStats) {
        self.send_bit_count = self.send_bit_count.saturating_add(other.send_bit_count);
        self.packets_sent = self.packets_sent.saturating_add(other.packets_sent);
        self.output_port_stalls = self
            .output_port_stalls
            .saturating_add(other.output_port_stalls);
        self.xbar_stalls = self.xbar_stalls.saturating_add(other.xbar_stalls);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    ports: Vec<PortStats>,
    clock_ticks: u64,
    clock_wakeups: u64,
}

impl RouterStats {
    pub fn new(num_ports: usize) -> Self {
        Self {
            ports: vec![PortStats::default(); num_ports],
            ..Self::default()
        }
    }

    pub fn port(&self, port: usize) -> &PortStats {
        &self.ports[port]
    }

    pub fn port_mut(&mut self, port: usize) -> &mut PortStats {
        &mut self.ports[port]
    }

    pub fn clock_ticks(&self) -> u64 {
        self.clock_ticks
    }

    pub fn clock_wakeups(&self) -> u64 {
        self.clock_wakeups
    }

    pub fn record_tick(&mut self) {
        self.clock_ticks = self.clock_ticks.saturating_add(1);
    }

    pub fn record_wakeup(&mut self) {
        self.clock_wakeups = self.clock_wakeups.saturating_add(1);
    }

    pub fn totals(&self) -> PortStats {
        let mut total = PortStats::default();
        self.ports.iter().for_each(|p| total += p);
        total
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkStats {
    packets_sent: u64,
    bits_sent: u64,
    packets_received: u64,
    bits_received: u64,
    latency_count: u64,
    latency_sum: SimTime,
    latency_min: Option<SimTime>,
    latency_max: Option<SimTime>,
}

impl LinkStats {
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn bits_sent(&self) -> u64 {
        self.bits_sent
    }

    pub fn bits_received(&self) -> u64 {
        self.bits_received
    }

    pub fn latency_min(&self) -> Option<SimTime> {
        self.latency_min
    }

    pub fn latency_max(&self) -> Option<SimTime> {
        self.latency_max
    }

    pub fn mean_latency(&self) -> Option<f64> {
        (self.latency_count > 0).then(|| self.latency_sum as f64 / self.latency_count as f64)
    }

    pub fn record_send(&mut self, bits: u64) {
        self.packets_sent = self.packets_sent.saturating_add(1);
        self.bits_sent = self.bits_sent.saturating_add(bits);
    }

    pub fn record_receive(&mut self, bits: u64, latency: SimTime) {
        self.packets_received = self.packets_received.saturating_add(1);
        self.bits_received = self.bits_received.saturating_add(bits);
        self.latency_count = self.latency_count.saturating_add(1);
        self.latency_sum = self.latency_sum.saturating_add(latency);
        self.latency_min = Some(self.latency_min.map_or(latency, |m| m.min(latency)));
        self.latency_max = Some(self.latency_max.map_or(latency, |m| m.max(latency)));
    }
}

impl AddAssign<&LinkStats> for LinkStats {
    fn add_assign(&mut self, other: &LinkStats) {
        self.packets_sent = self.packets_sent.saturating_add(other.packets_sent);
        self.bits_sent = self.bits_sent.saturating_add(other.bits_sent);
        self.packets_received = self.packets_received.saturating_add(other.packets_received);
        self.bits_received = self.bits_received.saturating_add(other.bits_received);
        self.latency_count = self.latency_count.saturating_add(other.latency_count);
        self.latency_sum = self.latency_sum.saturating_add(other.latency_sum);
        self.latency_min = match (self.latency_min, other.latency_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.latency_max = match (self.latency_max, other.latency_max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_tracks_extremes_and_mean() {
        let mut stats = LinkStats::default();
        assert!(stats.mean_latency().is_none());
        stats.record_receive(64, 10);
        stats.record_receive(64, 30);
        assert_eq!(Some(10), stats.latency_min());
        assert_eq!(Some(30), stats.latency_max());
        assert_eq!(Some(20.0), stats.mean_latency());
    }

    #[test]
    fn aggregation_merges_extremes() {
        let mut a = LinkStats::default();
        a.record_receive(8, 5);
        let mut b = LinkStats::default();
        b.record_receive(8, 50);
        b.record_send(16);
        a += &b;
        assert_eq!(2, a.packets_received());
        assert_eq!(1, a.packets_sent());
        assert_eq!(Some(5), a.latency_min());
        assert_eq!(Some(50), a.latency_max());
    }

    #[test]
    fn router_totals_sum_ports() {
        let mut stats = RouterStats::new(5);
        stats.port_mut(0).record_send(64);
        stats.port_mut(4).record_send(128);
        stats.port_mut(4).record_xbar_stall();
        let total = stats.totals();
        assert_eq!(192, total.send_bit_count());
        assert_eq!(1, total.xbar_stalls());
    }
}
