//! MQTT broker session on top of `rumqttc`.
//!
//! The event loop is polled from the driver's single thread: `connect` polls
//! until CONNACK, `publish` until the packet is written, `idle` for the
//! requested period.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use tokio::time::timeout;

use super::{Broker, BrokerError, STATUS_OFFLINE};
use crate::config::BrokerConfig;

const REQUEST_CAPACITY: usize = 16;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

pub struct MqttBroker {
    client_id: String,
    config: BrokerConfig,
    will_topic: String,
    io_timeout: Duration,
    session: Option<Session>,
}

impl MqttBroker {
    /// `will_topic` receives a retained `offline` if the session dies without
    /// a clean disconnect. `io_timeout` bounds a single publish.
    pub fn new(
        client_id: &str,
        config: BrokerConfig,
        will_topic: impl Into<String>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            client_id: client_id.trim().to_string(),
            config,
            will_topic: will_topic.into(),
            io_timeout,
            session: None,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(true);
        if !self.config.username.is_empty() {
            options.set_credentials(&self.config.username, &self.config.password);
        }
        options.set_last_will(LastWill::new(
            &self.will_topic,
            STATUS_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        options
    }

    async fn flush_publish(
        session: &mut Session,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), BrokerError> {
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        loop {
            match session.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    async fn pump(session: &mut Session) -> BrokerError {
        loop {
            if let Err(e) = session.eventloop.poll().await {
                return classify(e);
            }
        }
    }
}

/// Authentication and client-id refusals are permanent for this session;
/// everything else is treated as a transport problem.
fn classify(err: ConnectionError) -> BrokerError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadClientId),
        ) => BrokerError::Rejected(format!("{code:?}")),
        other => BrokerError::Unreachable(other.to_string()),
    }
}

impl Broker for MqttBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        log::debug!(
            "mqtt: connecting to {}:{} as {}",
            self.config.host,
            self.config.port,
            self.client_id
        );
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(classify(ConnectionError::ConnectionRefused(ack.code)));
                    }
                    self.session = Some(Session { client, eventloop });
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), BrokerError> {
        let io_timeout = self.io_timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(BrokerError::NotConnected);
        };
        let flushed = timeout(io_timeout, Self::flush_publish(session, topic, payload, retain)).await;
        let result = match flushed {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Unreachable(format!(
                "publish to {topic} not flushed within {io_timeout:?}"
            ))),
        };
        if result.is_err() {
            self.session = None;
        }
        result
    }

    async fn idle(&mut self, period: Duration) -> Result<(), BrokerError> {
        let Some(session) = self.session.as_mut() else {
            return Err(BrokerError::NotConnected);
        };
        let serviced = timeout(period, Self::pump(session)).await;
        match serviced {
            Err(_) => Ok(()),
            Ok(err) => {
                self.session = None;
                Err(err)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let _ = session.client.try_publish(
            self.will_topic.as_str(),
            QoS::AtMostOnce,
            true,
            STATUS_OFFLINE.as_bytes().to_vec(),
        );
        let _ = session.client.try_disconnect();
        let drain = async {
            loop {
                match session.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        };
        if timeout(DISCONNECT_GRACE, drain).await.is_err() {
            log::warn!("mqtt: disconnect not acknowledged within {DISCONNECT_GRACE:?}");
        }
    }
}
