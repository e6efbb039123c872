use crate::sim::fabric::FabricReport;
use crate::timeq::SimTime;

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_queued(endpoints: usize, requests: usize) {
        println!(
            "[TRAFFIC] {} requests queued on {} endpoints",
            requests, endpoints
        );
    }

    pub fn log_summary(report: &FabricReport) {
        let links = &report.links;
        println!(
            "[TRAFFIC] {}x{} mesh, {} endpoints, init took {} phases",
            report.width, report.height, report.endpoints, report.init_phases
        );
        println!(
            "[TRAFFIC] sent {} received {} stalled {} undelivered {} by time {:>10} ps",
            links.packets_sent(),
            links.packets_received(),
            report.send_stalls,
            report.undelivered,
            report.sim_time
        );
        if let Some(mean) = links.mean_latency() {
            println!(
                "[TRAFFIC] latency min {} mean {:.1} max {} ps",
                links.latency_min().unwrap_or_default(),
                mean,
                links.latency_max().unwrap_or_default()
            );
        }
        println!(
            "[TRAFFIC] router output stalls {} crossbar stalls {}",
            report.router_ports.output_port_stalls(),
            report.router_ports.xbar_stalls()
        );
    }

    pub fn log_timeout(at: SimTime) {
        println!("[TRAFFIC] stopped at {:>10} ps with traffic still in flight", at);
    }
}
