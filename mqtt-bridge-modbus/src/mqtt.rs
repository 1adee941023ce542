//! MQTT broker link.
//!
//! Wraps the `rumqttc` client. The event loop runs in a spawned driver task
//! that logs connection acknowledgements, delivery acknowledgements and
//! errors, and tracks the connection state on a watch channel. Publishing
//! only enqueues into the client channel; delivery outcomes arrive through
//! the driver, never as a return value.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::MqttConnectionConfig;

/// Errors from the broker link.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("publish error on '{topic}': {message}")]
    Publish { topic: String, message: String },
}

/// Broker connection state as observed by the event-loop driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
}

/// Non-blocking dispatch of message bodies to the broker.
#[async_trait]
pub trait PayloadSink {
    /// Queue a message for delivery. Returns once the message is enqueued;
    /// the delivery outcome is reported by the event-loop driver.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;
}

/// Handle to the MQTT broker connection.
pub struct MqttLink {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    driver: JoinHandle<()>,
    qos: QoS,
    retain: bool,
}

impl MqttLink {
    /// Initiate the broker connection.
    ///
    /// Returns as soon as the client is set up; success or failure of the
    /// connection itself is reported through the event loop and the
    /// [`ConnectionState`] channel. `rumqttc` keeps reconnecting on its own,
    /// so a broker outage never fails the bridge.
    pub fn connect(
        config: &MqttConnectionConfig,
        last_will: Option<LastWill>,
    ) -> Result<Self, MqttError> {
        let (host, port) = parse_broker_url(&config.broker_url)?;
        let opts = &config.options;

        let mut mqtt_options = MqttOptions::new(opts.client_id.clone(), host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(opts.keep_alive_secs));
        if let (Some(username), Some(password)) = (&opts.username, &opts.password) {
            mqtt_options.set_credentials(username.clone(), password.clone());
        }
        if let Some(will) = last_will {
            mqtt_options.set_last_will(will);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let driver = tokio::spawn(drive_eventloop(eventloop, state_tx));

        info!(broker = %config.broker_url, client_id = %opts.client_id, "MQTT connect initiated");

        Ok(Self {
            client,
            state: state_rx,
            driver,
            qos: qos_from_u8(opts.qos),
            retain: opts.retain,
        })
    }

    /// Current broker connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish raw bytes with the retain flag set (status messages).
    pub async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.client
            .publish(topic, self.qos, true, payload)
            .await
            .map_err(|e| MqttError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    /// Shut the link down. Best-effort; never raises.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Error disconnecting MQTT client");
        }
        self.driver.abort();
    }
}

#[async_trait]
impl PayloadSink for MqttLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        self.client
            .publish(topic, self.qos, self.retain, payload)
            .await
            .map_err(|e| MqttError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// Poll the event loop, log delivery outcomes and track connection state.
///
/// On error the state flips to `Reconnecting` and polling resumes after a
/// short pause; `rumqttc` re-establishes the session itself.
async fn drive_eventloop(mut eventloop: EventLoop, state: watch::Sender<ConnectionState>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                let _ = state.send(ConnectionState::Connected);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(pkid = ack.pkid, "Publish acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error");
                let _ = state.send(ConnectionState::Reconnecting);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Parse a broker URL into host and port.
///
/// Accepts `mqtt://host[:port]`, `tcp://host[:port]` or a bare
/// `host[:port]`; the port defaults to 1883.
fn parse_broker_url(input: &str) -> Result<(String, u16), MqttError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| MqttError::InvalidBrokerUrl(format!("{}: {}", input, e)))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(MqttError::InvalidBrokerUrl(format!(
                    "{}: unsupported scheme '{}'",
                    input, scheme
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidBrokerUrl(format!("{}: missing host", input)))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(format!("{}: missing host", input)))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            MqttError::InvalidBrokerUrl(format!("{}: invalid port '{}'", input, port))
        })?,
    };
    if parts.next().is_some() {
        return Err(MqttError::InvalidBrokerUrl(format!(
            "{}: too many ':' separators",
            input
        )));
    }

    Ok((host.to_string(), port))
}

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_url() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.5").unwrap(),
            ("10.0.0.5".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_bare_host() {
        assert_eq!(
            parse_broker_url("broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(parse_broker_url("ws://broker.local").is_err());
        assert!(parse_broker_url("broker.local:notaport").is_err());
        assert!(parse_broker_url("a:1:2").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
