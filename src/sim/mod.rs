pub mod component;
pub mod config;
pub mod endpoint;
pub mod fabric;

pub use component::{Action, Component};
pub use config::{Config, EndpointConfig, SimConfig};
pub use fabric::{FabricReport, MeshFabric};
