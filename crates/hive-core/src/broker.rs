//! Depth-reporting collaborator used by demand-driven pools.
//!
//! A [`Broker`] opens a [`QueueProbe`]; the pool owns the probe exclusively, queries it every
//! tick, and drops it on any error so the next tick reconnects.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("broker channel closed: {0}")]
    ChannelClosed(String),
    #[error("broker query timed out")]
    Timeout,
    #[error("unexpected broker response: {0}")]
    Protocol(String),
}

impl BrokerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::NotFound(_) => "not_found",
            BrokerError::ChannelClosed(_) => "channel_closed",
            BrokerError::Timeout => "timeout",
            BrokerError::Protocol(_) => "protocol",
        }
    }
}

/// A live connection able to answer cheap, side-effect-free queue queries.
pub trait QueueProbe: Send {
    /// Count of messages waiting in `queue`.
    fn current_depth(&mut self, queue: &str) -> Result<u64, BrokerError>;
    /// Active consumers on `queue` across all processes.
    fn consumer_count(&mut self, queue: &str) -> Result<u64, BrokerError>;
}

/// Factory for probes; shared by all pools of one supervisor.
pub trait Broker: Send + Sync {
    fn connect(&self) -> Result<Box<dyn QueueProbe>, BrokerError>;
}
