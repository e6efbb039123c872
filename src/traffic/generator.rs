use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::noc::event::{Nid, Request};
use crate::sim::fabric::MeshFabric;
use crate::timeq::ceil_div;
use crate::traffic::config::TrafficConfig;

/// Uniform random traffic: every endpoint sends a fixed number of equally sized packets,
/// each to a destination drawn uniformly from the other endpoints.
pub struct UniformTraffic {
    rng: StdRng,
    packets_per_endpoint: usize,
    packet_bits: u64,
    vn: usize,
}

impl UniformTraffic {
    pub fn new(config: &TrafficConfig) -> anyhow::Result<Self> {
        let packet_bits = config.packet_size.to_bits()?;
        if packet_bits == 0 {
            bail!("traffic packet_size must be non-zero");
        }
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            packets_per_endpoint: config.packets_per_endpoint,
            packet_bits,
            vn: config.vn,
        })
    }

    /// Requests sent by `src`. Empty when there is nobody else to talk to.
    pub fn requests(&mut self, src: Nid, ids: &[Nid]) -> Vec<Request> {
        let others: Vec<Nid> = ids.iter().copied().filter(|&id| id != src).collect();
        if others.is_empty() {
            return Vec::new();
        }
        (0..self.packets_per_endpoint)
            .map(|_| {
                let dest = others[self.rng.gen_range(0..others.len())];
                let mut request = Request::new(src, dest, self.packet_bits);
                request.vn = self.vn;
                request
            })
            .collect()
    }

    /// Queues traffic on every endpoint of an initialized fabric. Returns the number of
    /// requests queued.
    pub fn populate(&mut self, fabric: &mut MeshFabric) -> anyhow::Result<usize> {
        let ids = fabric.endpoint_ids();
        if let (Some(router), Some(endpoint)) = (fabric.routers().next(), fabric.endpoint(0)) {
            let flits = ceil_div(self.packet_bits, endpoint.link().flit_size().max(1));
            let buffer = router.params().input_buf_credits() as u64;
            if flits > buffer {
                bail!(
                    "{}-flit packets never fit a {}-flit router input buffer",
                    flits,
                    buffer
                );
            }
        }
        let mut total = 0;
        for (index, &src) in ids.iter().enumerate() {
            let requests = self.requests(src, &ids);
            total += requests.len();
            let Some(endpoint) = fabric.endpoint_mut(index) else {
                bail!("endpoint {} disappeared from the fabric", index);
            };
            if self.vn >= endpoint.link().vns() {
                bail!(
                    "traffic vn {} is not configured on the endpoints ({} vns)",
                    self.vn,
                    endpoint.link().vns()
                );
            }
            endpoint.set_vn(self.vn);
            endpoint.enqueue(requests)?;
        }
        Ok(total)
    }
}
