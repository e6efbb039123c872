use anyhow::bail;
use serde::Deserialize;

use crate::base::port_set::{PortSet, LOCAL_PORT_START};
use crate::base::units::{flit_period, Quantity};
use crate::sim::config::Config;
use crate::timeq::SimTime;

/// Router options as they appear in the `[router]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RouterConfig {
    pub local_ports: usize,
    pub link_bw: Option<Quantity>,
    pub flit_size: Option<Quantity>,
    pub input_buf_size: Option<Quantity>,
    pub port_priority_equal: bool,
    pub route_y_first: bool,
    pub use_dense_map: bool,
}

impl Config for RouterConfig {}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            local_ports: 1,
            link_bw: None,
            flit_size: None,
            input_buf_size: None,
            port_priority_equal: false,
            route_y_first: false,
            use_dense_map: false,
        }
    }
}

impl RouterConfig {
    pub fn new(link_bw: &str, flit_size: &str) -> anyhow::Result<Self> {
        Ok(Self {
            link_bw: Some(link_bw.parse()?),
            flit_size: Some(flit_size.parse()?),
            ..Self::default()
        })
    }

    /// Checks the options and converts them into the units the router works in.
    pub fn validate(&self) -> anyhow::Result<RouterParams> {
        let Some(flit_size) = self.flit_size else {
            bail!("mesh router requires flit_size to be specified");
        };
        let Some(link_bw) = self.link_bw else {
            bail!("mesh router requires link_bw to be specified");
        };
        let flit_size_bits = flit_size.to_bits()?;
        if flit_size_bits == 0 {
            bail!("flit_size must be non-zero");
        }
        let input_buf_size = self
            .input_buf_size
            .unwrap_or_else(|| flit_size.in_bits().scaled(2.0));
        let input_buf_bits = input_buf_size.to_bits()?;
        if input_buf_bits < flit_size_bits {
            bail!(
                "input_buf_size ({}) must hold at least one flit ({})",
                input_buf_size,
                flit_size
            );
        }
        if u32::try_from(input_buf_bits / flit_size_bits).is_err() {
            bail!(
                "input_buf_size ({}) holds more {} flits than a credit count can track",
                input_buf_size,
                flit_size
            );
        }
        if self.local_ports == 0 {
            bail!("local_ports must be at least 1");
        }
        if LOCAL_PORT_START + self.local_ports > PortSet::CAPACITY {
            bail!(
                "local_ports ({}) exceeds the supported maximum of {}",
                self.local_ports,
                PortSet::CAPACITY - LOCAL_PORT_START
            );
        }

        Ok(RouterParams {
            local_ports: self.local_ports,
            flit_size_bits,
            input_buf_bits,
            link_bw_bps: link_bw.to_bits_per_sec()?,
            clock_period: flit_period(&link_bw, &flit_size)?,
            port_priority_equal: self.port_priority_equal,
            route_y_first: self.route_y_first,
            use_dense_map: self.use_dense_map,
        })
    }
}

/// Validated router parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterParams {
    pub local_ports: usize,
    pub flit_size_bits: u64,
    pub input_buf_bits: u64,
    pub link_bw_bps: f64,
    pub clock_period: SimTime,
    pub port_priority_equal: bool,
    pub route_y_first: bool,
    pub use_dense_map: bool,
}

impl RouterParams {
    pub fn num_ports(&self) -> usize {
        LOCAL_PORT_START + self.local_ports
    }

    /// Fits in a `u32`; `validate` refuses larger buffers.
    pub fn input_buf_credits(&self) -> u32 {
        (self.input_buf_bits / self.flit_size_bits) as u32
    }

    pub fn flit_size(&self) -> Quantity {
        Quantity::bits(self.flit_size_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_buffer_must_be_countable_in_credits() {
        let mut cfg = RouterConfig::new("1GB/s", "8B").unwrap();
        cfg.input_buf_size = Some(Quantity::bits(64 << 32));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("credit count"));
    }

    #[test]
    fn missing_flit_size_is_fatal() {
        let cfg = RouterConfig {
            link_bw: Some("1GB/s".parse().unwrap()),
            ..RouterConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("flit_size"));
    }

    #[test]
    fn missing_link_bw_is_fatal() {
        let cfg = RouterConfig {
            flit_size: Some("8B".parse().unwrap()),
            ..RouterConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("link_bw"));
    }

    #[test]
    fn input_buffer_defaults_to_two_flits() {
        let params = RouterConfig::new("1GB/s", "8B").unwrap().validate().unwrap();
        assert_eq!(64, params.flit_size_bits);
        assert_eq!(128, params.input_buf_bits);
        assert_eq!(2, params.input_buf_credits());
        assert_eq!(8_000, params.clock_period);
        assert_eq!(5, params.num_ports());
    }

    #[test]
    fn buffer_in_bandwidth_units_is_rejected() {
        let mut cfg = RouterConfig::new("1GB/s", "8B").unwrap();
        cfg.input_buf_size = Some("1GB/s".parse().unwrap());
        assert!(cfg.validate().is_err());
    }
}
