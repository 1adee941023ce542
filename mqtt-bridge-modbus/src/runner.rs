//! Bridge lifecycle management.
//!
//! Brings up the broker and controller connections in a fixed order, hands
//! control to the acquisition scheduler, and tears both connections down
//! when the termination signal arrives.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{LastWill, QoS};
use tokio::signal;
use tracing::{debug, error, info, warn};

use plcbridge_common::topic::resolve_topic;

use crate::config::BridgeConfig;
use crate::controller::ModbusController;
use crate::mqtt::MqttLink;
use crate::scheduler::AcquisitionScheduler;

/// Lifecycle states of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Connecting,
    Polling,
    Stopping,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "idle",
            BridgeState::Connecting => "connecting",
            BridgeState::Polling => "polling",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Runs the bridge from startup to shutdown.
pub struct BridgeRunner {
    config: BridgeConfig,
    state: BridgeState,
}

impl BridgeRunner {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: BridgeState::Idle,
        }
    }

    fn transition(&mut self, next: BridgeState) {
        info!(from = %self.state, to = %next, "Bridge state change");
        self.state = next;
    }

    /// Run until Ctrl+C is received.
    ///
    /// Startup order: the broker connect is initiated first (its outcome
    /// arrives through the event loop), then the controller connect is
    /// awaited. A controller connect failure aborts startup; polling never
    /// begins.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.transition(BridgeState::Connecting);

        let status_topic = resolve_topic(
            &self.config.mqtt.connection.base_topic,
            &self.config.mqtt.mapping_values(),
            "status",
        );
        let will = LastWill::new(&status_topic, offline_status(), QoS::AtLeastOnce, true);

        let mqtt = MqttLink::connect(&self.config.mqtt.connection, Some(will))?;

        let controller = match ModbusController::connect(&self.config.plc.connection).await {
            Ok(controller) => Arc::new(controller),
            Err(e) => {
                error!(error = %e, "Controller connect failed, aborting startup");
                self.transition(BridgeState::Stopping);
                mqtt.disconnect().await;
                self.transition(BridgeState::Stopped);
                return Err(e.into());
            }
        };

        let mqtt = Arc::new(mqtt);

        let scheduler =
            AcquisitionScheduler::new(&self.config, Arc::clone(&controller), Arc::clone(&mqtt));
        let poll_task = tokio::spawn(scheduler.run());
        self.transition(BridgeState::Polling);

        debug!(state = ?mqtt.connection_state(), "Publishing bridge status");
        if let Err(e) = mqtt.publish_retained(&status_topic, running_status(&self.config)).await {
            warn!(error = %e, "Failed to publish running status");
        }

        info!("Bridge running. Press Ctrl+C to stop.");
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }

        info!("Received shutdown signal");
        self.transition(BridgeState::Stopping);

        // Stop scheduling further ticks. Tick tasks already in flight are
        // abandoned, not drained.
        poll_task.abort();

        if let Err(e) = mqtt.publish_retained(&status_topic, offline_status()).await {
            warn!(error = %e, "Failed to publish offline status");
        }

        // Give the event loop a moment to flush the status message.
        tokio::time::sleep(Duration::from_millis(100)).await;

        controller.disconnect().await;
        mqtt.disconnect().await;

        self.transition(BridgeState::Stopped);
        info!("Bridge stopped");

        Ok(())
    }
}

fn running_status(config: &BridgeConfig) -> Vec<u8> {
    let status = serde_json::json!({
        "bridge": "modbus",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "groups": config.plc.tags.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(),
        "polling_interval_ms": config.mqtt.connection.polling_interval,
    });
    status.to_string().into_bytes()
}

fn offline_status() -> Vec<u8> {
    serde_json::json!({
        "bridge": "modbus",
        "status": "offline",
    })
    .to_string()
    .into_bytes()
}
