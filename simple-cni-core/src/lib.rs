pub mod assignment;
pub mod bridge;
pub mod durable;
pub mod ip;
pub mod ipam;
pub mod os;
pub mod store;

pub const DEFAULT_BRIDGE_NAME: &str = "cni0";
pub const DEFAULT_MTU: u32 = 1500;
