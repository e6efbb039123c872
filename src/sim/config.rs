use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::base::units::{Quantity, Unit};

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Shape of the simulated system and kernel limits.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// Routers per row.
    pub width: usize,
    /// Routers per column.
    pub height: usize,
    /// Attach an endpoint to every compass port on the mesh boundary.
    pub halo_endpoints: bool,
    /// Link latency in picoseconds.
    pub link_latency: u64,
    /// Simulated time limit in picoseconds.
    pub timeout: u64,
    pub max_init_phases: u32,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 2,
            height: 2,
            halo_endpoints: false,
            link_latency: 1_000,
            timeout: 1_000_000_000,
            max_init_phases: 10_000,
        }
    }
}

/// Parameters handed to an endpoint's link when it is initialized.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointConfig {
    pub link_bw: Quantity,
    pub vns: usize,
    pub in_buf_size: Quantity,
    pub out_buf_size: Quantity,
}

impl Config for EndpointConfig {}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            link_bw: Quantity::new(1e9, Unit::BytesPerSec),
            vns: 1,
            in_buf_size: Quantity::new(1024.0, Unit::Bytes),
            out_buf_size: Quantity::new(1024.0, Unit::Bytes),
        }
    }
}
