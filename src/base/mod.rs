pub mod arbiter;
pub mod port_set;
pub mod units;
