//! Message broker boundary and the topics the node publishes.

pub mod mqtt;

use std::time::Duration;

use thiserror::Error;

pub use mqtt::MqttBroker;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Credentials or client id refused. Retrying the same session won't help.
    #[error("broker refused the session: {0}")]
    Rejected(String),

    /// Transport-level failure, usually transient.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("no broker session")]
    NotConnected,

    #[error("client error: {0}")]
    Client(String),
}

/// A broker session the node can (re)open and publish scalars through.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Open a new session, replacing any previous one.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool)
        -> Result<(), BrokerError>;

    /// Service the session for `period` (keep-alives, acknowledgements).
    async fn idle(&mut self, period: Duration) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self);
}

/// Topic names for one publish cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub status: String,
    pub temperature: String,
    pub humidity: String,
    pub heat_index: String,
}

impl Topics {
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty());
        let topic = |name: &str| match prefix {
            Some(p) => format!("{p}/{name}"),
            None => name.to_string(),
        };
        Self {
            status: topic("status"),
            temperature: topic("temperature"),
            humidity: topic("humidity"),
            heat_index: topic("heatindex"),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Scalar payload with one decimal place.
pub fn format_scalar(value: f32) -> String {
    format!("{value:.1}")
}
