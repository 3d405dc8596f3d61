//! In-memory collaborators for exercising the phase handlers.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::sleep;

use crate::broker::{Broker, BrokerError};
use crate::config::NetworkConfig;
use crate::network::{LinkError, LinkStatus, NetworkLink};
use crate::ota::{UpdateCheck, UpdateError, UpdateSource};
use crate::sensor::{Reading, Sensor, SensorError};

pub struct FakeLink {
    pub join_result: Result<(), LinkError>,
    /// Makes `join` hang for this long first, like a slow name lookup.
    pub join_delay: Option<Duration>,
    /// Consumed one per `status` call, then `steady` is reported.
    pub statuses: VecDeque<LinkStatus>,
    pub steady: LinkStatus,
    pub joins: u32,
}

impl FakeLink {
    pub fn up() -> Self {
        Self {
            join_result: Ok(()),
            join_delay: None,
            statuses: VecDeque::new(),
            steady: LinkStatus::Up("192.168.1.101".parse().unwrap()),
            joins: 0,
        }
    }

    pub fn with_steady(steady: LinkStatus) -> Self {
        Self {
            steady,
            ..Self::up()
        }
    }
}

impl NetworkLink for FakeLink {
    async fn join(&mut self, _config: &NetworkConfig) -> Result<(), LinkError> {
        self.joins += 1;
        if let Some(delay) = self.join_delay {
            sleep(delay).await;
        }
        self.join_result.clone()
    }

    fn status(&mut self) -> LinkStatus {
        self.statuses
            .pop_front()
            .unwrap_or_else(|| self.steady.clone())
    }
}

/// Broker double that records every publish.
#[derive(Default)]
pub struct RecordingBroker {
    pub connect_results: VecDeque<Result<(), BrokerError>>,
    /// Makes `connect` hang for this long first.
    pub connect_delay: Option<Duration>,
    pub connected: bool,
    pub published: Vec<(String, String, bool)>,
    /// Publishes beyond this count fail.
    pub publish_limit: Option<usize>,
    pub idle_error: Option<BrokerError>,
    pub idled: Vec<Duration>,
    pub disconnects: u32,
}

impl RecordingBroker {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    pub fn topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _, _)| t.as_str()).collect()
    }

    pub fn payload(&self, topic: &str) -> Option<&str> {
        self.published
            .iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, p, _)| p.as_str())
    }
}

impl Broker for RecordingBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        if let Some(delay) = self.connect_delay {
            sleep(delay).await;
        }
        let result = self.connect_results.pop_front().unwrap_or(Ok(()));
        self.connected = result.is_ok();
        result
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        if self.publish_limit.is_some_and(|limit| self.published.len() >= limit) {
            self.connected = false;
            return Err(BrokerError::Unreachable("connection reset".into()));
        }
        self.published
            .push((topic.to_string(), payload.to_string(), retain));
        Ok(())
    }

    async fn idle(&mut self, period: Duration) -> Result<(), BrokerError> {
        if let Some(err) = self.idle_error.take() {
            self.connected = false;
            return Err(err);
        }
        self.idled.push(period);
        sleep(period).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

/// Returns queued results, then a fixed 20 °C / 50 % reading.
#[derive(Default)]
pub struct ScriptedSensor {
    pub results: VecDeque<Result<Reading, SensorError>>,
    pub reads: u32,
}

impl ScriptedSensor {
    pub fn failing_once() -> Self {
        Self {
            results: VecDeque::from([Err(SensorError::NoData)]),
            reads: 0,
        }
    }
}

impl Sensor for ScriptedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.reads += 1;
        self.results
            .pop_front()
            .unwrap_or_else(|| Reading::new(20.0, 50.0))
    }
}

#[derive(Default)]
pub struct ScriptedUpdates {
    pub results: VecDeque<Result<UpdateCheck, UpdateError>>,
    pub delay: Option<Duration>,
}

impl ScriptedUpdates {
    pub fn returning(result: Result<UpdateCheck, UpdateError>) -> Self {
        Self {
            results: VecDeque::from([result]),
            delay: None,
        }
    }
}

impl UpdateSource for ScriptedUpdates {
    async fn check(&mut self) -> Result<UpdateCheck, UpdateError> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        self.results.pop_front().unwrap_or(Ok(UpdateCheck::UpToDate))
    }
}
