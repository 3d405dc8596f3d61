//! Phase handlers.
//!
//! Each handler does its bounded work against the injected collaborators and
//! reports an [`Outcome`]. Nothing is carried between calls except what the
//! collaborators themselves hold (the broker session, the link state).

use std::net::IpAddr;

use tokio::time::{sleep, timeout};

use crate::broker::{Broker, BrokerError, STATUS_ONLINE, Topics, format_scalar};
use crate::config::NodeConfig;
use crate::driver::PhaseRunner;
use crate::network::{LinkError, LinkStatus, NetworkLink};
use crate::ota::{UpdateCheck, UpdateSource};
use crate::sensor::Sensor;
use crate::state_machine::{Outcome, Phase};

pub struct Node<L, B, S, U> {
    config: NodeConfig,
    topics: Topics,
    link: L,
    broker: B,
    sensor: S,
    updates: U,
}

impl<L, B, S, U> Node<L, B, S, U>
where
    L: NetworkLink,
    B: Broker,
    S: Sensor,
    U: UpdateSource,
{
    pub fn new(config: NodeConfig, link: L, broker: B, sensor: S, updates: U) -> Self {
        let topics = Topics::new(config.broker.topic_prefix.as_deref());
        Self {
            config,
            topics,
            link,
            broker,
            sensor,
            updates,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Close the broker session cleanly before the process stops.
    pub async fn shutdown(&mut self) {
        self.broker.disconnect().await;
    }

    fn link_address(&mut self) -> Option<IpAddr> {
        match self.link.status() {
            LinkStatus::Up(ip) => Some(ip),
            _ => None,
        }
    }

    /// Join and poll for an address, both inside the connect budget.
    async fn network_connect(&mut self) -> Outcome {
        let budget = self.config.timing.network_connect();
        let poll = self.config.timing.network_poll();
        let network = &self.config.network;
        let link = &mut self.link;
        let attempt = async {
            if let Err(e) = link.join(network).await {
                return Err(e);
            }
            loop {
                match link.status() {
                    LinkStatus::Up(ip) => return Ok(Ok(ip)),
                    LinkStatus::Failed(reason) => return Ok(Err(reason)),
                    LinkStatus::Connecting => sleep(poll).await,
                }
            }
        };

        match timeout(budget, attempt).await {
            Ok(Ok(Ok(ip))) => {
                log::info!("network: up at {ip}");
                Outcome::Success
            }
            Ok(Ok(Err(reason))) => {
                log::warn!("network: {reason}");
                Outcome::Retry
            }
            Ok(Err(e @ LinkError::NoCredentials)) => {
                log::error!("network: {e}");
                Outcome::Failure
            }
            Ok(Err(e)) => {
                log::warn!("network: {e}");
                Outcome::Retry
            }
            Err(_) => {
                log::warn!("network: no address within {budget:?}");
                Outcome::Timeout
            }
        }
    }

    async fn ota_check(&mut self) -> Outcome {
        let window = self.config.timing.ota_window();
        match timeout(window, self.updates.check()).await {
            Ok(Ok(UpdateCheck::UpToDate)) => {
                log::debug!("ota: up to date");
                Outcome::Success
            }
            Ok(Ok(UpdateCheck::Applied { version })) => {
                log::info!("ota: {version} staged, restart required");
                Outcome::UpdateApplied
            }
            Ok(Err(e)) => {
                log::warn!("ota: {e}, skipping");
                Outcome::Failure
            }
            Err(_) => {
                log::warn!("ota: no answer within {window:?}, skipping");
                Outcome::Timeout
            }
        }
    }

    async fn broker_connect(&mut self) -> Outcome {
        if self.link_address().is_none() {
            log::warn!("broker: network link is down");
            return Outcome::Failure;
        }

        let budget = self.config.timing.broker_connect();
        match timeout(budget, self.broker.connect()).await {
            Ok(Ok(())) => {
                log::info!(
                    "broker: connected to {}:{}",
                    self.config.broker.host,
                    self.config.broker.port
                );
                Outcome::Success
            }
            Ok(Err(e @ BrokerError::Rejected(_))) => {
                log::error!("broker: {e}");
                Outcome::Failure
            }
            Ok(Err(e)) => {
                log::warn!("broker: {e}");
                Outcome::Retry
            }
            Err(_) => {
                log::warn!("broker: no session within {budget:?}");
                Outcome::Timeout
            }
        }
    }

    async fn publish(&mut self) -> Outcome {
        if self.link_address().is_none() {
            log::warn!("publish: network link is down");
            return Outcome::Failure;
        }
        if !self.broker.is_connected() {
            log::warn!("publish: broker session lost");
            return Outcome::LinkLost;
        }

        // A sensor glitch skips this cycle's publishes but keeps the phase.
        match self.sensor.read() {
            Ok(reading) => {
                let heat_index = reading.heat_index_c();
                log::info!(
                    "publish: {:.1}°C {:.1}% heat index {heat_index:.1}°C",
                    reading.temperature_c,
                    reading.humidity_pct
                );
                let messages = [
                    (&self.topics.status, STATUS_ONLINE.to_string(), true),
                    (&self.topics.temperature, format_scalar(reading.temperature_c), false),
                    (&self.topics.humidity, format_scalar(reading.humidity_pct), false),
                    (&self.topics.heat_index, format_scalar(heat_index), false),
                ];
                for (topic, payload, retain) in messages {
                    if let Err(e) = self.broker.publish(topic, &payload, retain).await {
                        log::warn!("publish: {topic}: {e}");
                        return Outcome::LinkLost;
                    }
                }
            }
            Err(e) => log::warn!("publish: sensor read failed, skipping cycle: {e}"),
        }

        if let Err(e) = self.broker.idle(self.config.timing.publish_interval()).await {
            log::warn!("publish: {e}");
            return Outcome::LinkLost;
        }
        Outcome::Success
    }
}

impl<L, B, S, U> PhaseRunner for Node<L, B, S, U>
where
    L: NetworkLink,
    B: Broker,
    S: Sensor,
    U: UpdateSource,
{
    async fn run_phase(&mut self, phase: Phase) -> Outcome {
        match phase {
            Phase::NetworkConnect => self.network_connect().await,
            Phase::OtaCheck => self.ota_check().await,
            Phase::BrokerConnect => self.broker_connect().await,
            Phase::Publish => self.publish().await,
        }
    }
}
