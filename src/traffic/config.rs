use std::path::PathBuf;

use serde::Deserialize;

use crate::base::units::{Quantity, Unit};
use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub packets_per_endpoint: usize,
    pub packet_size: Quantity,
    pub vn: usize,
    pub seed: u64,
    /// Every endpoint announces itself with an init-phase broadcast.
    pub init_broadcast: bool,
    pub results_json: Option<PathBuf>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            packets_per_endpoint: 16,
            packet_size: Quantity::new(64.0, Unit::Bytes),
            vn: 0,
            seed: 0,
            init_broadcast: false,
            results_json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml::Table;

    #[test]
    fn packet_size_takes_units() {
        let table: Table = toml::from_str(
            r#"
            [traffic]
            packets_per_endpoint = 4
            packet_size = "24B"
            results_json = "out.json"
            "#,
        )
        .unwrap();
        let cfg = TrafficConfig::from_section(table.get("traffic")).unwrap();
        assert_eq!(4, cfg.packets_per_endpoint);
        assert_eq!(192, cfg.packet_size.to_bits().unwrap());
        assert_eq!(Some(PathBuf::from("out.json")), cfg.results_json);
        assert!(!cfg.init_broadcast);
    }
}
