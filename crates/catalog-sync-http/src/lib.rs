pub mod client;
pub mod order;
pub mod wire;

pub use client::{DistributorClient, DistributorConfig, RequestLimiter};
