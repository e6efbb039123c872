pub mod base;
pub mod noc;
pub mod sim;
pub mod timeq;
pub mod traffic;
