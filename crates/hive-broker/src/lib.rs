//! Queue depth queries for demand-driven pools.
pub mod management;
pub use management::{ManagementBroker, QueueInfo};

pub mod url;
