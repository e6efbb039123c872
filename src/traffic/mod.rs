pub mod config;
pub mod generator;
pub mod logging;

pub use config::TrafficConfig;
pub use generator::UniformTraffic;
pub use logging::TrafficLogger;
