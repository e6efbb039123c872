use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use meshnoc::noc::config::RouterConfig;
use meshnoc::sim::config::{Config, EndpointConfig, SimConfig};
use meshnoc::sim::fabric::MeshFabric;
use meshnoc::traffic::{TrafficConfig, TrafficLogger, UniformTraffic};
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct MeshArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override mesh width in routers")]
    width: Option<usize>,
    #[arg(long, help = "Override mesh height in routers")]
    height: Option<usize>,
    #[arg(long, help = "Override packets sent per endpoint")]
    packets: Option<usize>,
    #[arg(long, help = "Override traffic seed")]
    seed: Option<u64>,
    #[arg(long, help = "Route north/south before east/west")]
    route_y_first: Option<bool>,
    #[arg(long, help = "Write the run summary as JSON to this path")]
    results_json: Option<PathBuf>,
}

pub fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv = MeshArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"))?;
    let mut router_config = RouterConfig::from_section(config_table.get("router"))?;
    let endpoint_config = EndpointConfig::from_section(config_table.get("endpoint"))?;
    let mut traffic_config = TrafficConfig::from_section(config_table.get("traffic"))?;

    // override toml configs with argv
    sim_config.width = argv.width.unwrap_or(sim_config.width);
    sim_config.height = argv.height.unwrap_or(sim_config.height);
    router_config.route_y_first = argv.route_y_first.unwrap_or(router_config.route_y_first);
    traffic_config.packets_per_endpoint = argv.packets.unwrap_or(traffic_config.packets_per_endpoint);
    traffic_config.seed = argv.seed.unwrap_or(traffic_config.seed);
    traffic_config.results_json = argv.results_json.or(traffic_config.results_json);

    let mut fabric = MeshFabric::with_init_broadcast(
        &sim_config,
        &router_config,
        &endpoint_config,
        traffic_config.init_broadcast,
    )?;
    fabric.initialize()?;

    let mut traffic = UniformTraffic::new(&traffic_config)?;
    let queued = traffic.populate(&mut fabric)?;
    TrafficLogger::log_queued(fabric.endpoint_ids().len(), queued);

    let end = fabric.run()?;
    let report = fabric.report();
    if report.undelivered > 0 || report.links.packets_received() < queued as u64 {
        TrafficLogger::log_timeout(end);
        log::warn!("{}", fabric.status());
    }
    TrafficLogger::log_summary(&report);

    if let Some(path) = &traffic_config.results_json {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(())
}
