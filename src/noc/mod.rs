pub mod config;
pub mod event;
pub mod link_control;
pub mod mesh;
pub mod stats;

#[cfg(test)]
mod unit_tests;

pub use config::{RouterConfig, RouterParams};
pub use event::{Nid, NocEvent, Packet, Request, TraceType, INIT_BROADCAST_ADDR};
pub use link_control::LinkControl;
pub use mesh::MeshRouter;
