//! Acquisition scheduling: the per-tick read, assemble and publish loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use plcbridge_common::payload::GroupPayload;
use plcbridge_common::topic::resolve_topic;

use crate::config::{BridgeConfig, TagGroup};
use crate::controller::SymbolSource;
use crate::mqtt::PayloadSink;

/// Drives the polling loop: on every tick, reads each configured tag group
/// from the controller, assembles a timestamped payload per group and
/// dispatches it to the broker.
pub struct AcquisitionScheduler<S, P> {
    source: Arc<S>,
    sink: Arc<P>,
    base_topic: String,
    mapping_values: Vec<String>,
    groups: Vec<TagGroup>,
    interval: Duration,
}

impl<S, P> AcquisitionScheduler<S, P>
where
    S: SymbolSource + Send + Sync + 'static,
    P: PayloadSink + Send + Sync + 'static,
{
    /// Create a scheduler from the loaded configuration and live handles.
    pub fn new(config: &BridgeConfig, source: Arc<S>, sink: Arc<P>) -> Self {
        Self {
            source,
            sink,
            base_topic: config.mqtt.connection.base_topic.clone(),
            mapping_values: config.mqtt.mapping_values(),
            groups: config.plc.tags.iter().cloned().collect(),
            interval: Duration::from_millis(config.mqtt.connection.polling_interval),
        }
    }

    /// Run the polling loop until the task is aborted.
    ///
    /// Each tick runs in its own task, so a tick that outlasts the polling
    /// interval does not delay the next one; reads from consecutive ticks
    /// may then overlap on the controller session, which serializes them.
    pub async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            groups = self.groups.len(),
            "Starting acquisition scheduler"
        );

        let scheduler = Arc::new(self);
        let mut ticker = tokio::time::interval(scheduler.interval);

        loop {
            ticker.tick().await;

            let tick = Arc::clone(&scheduler);
            tokio::spawn(async move {
                tick.run_tick().await;
            });
        }
    }

    /// One pass over all payload groups, in configuration order.
    pub async fn run_tick(&self) {
        for group in &self.groups {
            self.process_group(group).await;
        }
    }

    /// Read, assemble and dispatch a single group's payload.
    ///
    /// The first failed read drops this group's payload for the tick; other
    /// groups are unaffected. Nothing partial is ever published.
    async fn process_group(&self, group: &TagGroup) {
        let mut entries = Vec::with_capacity(group.tags.len());

        for tag in &group.tags {
            match self.source.read_symbol(&tag.tagname).await {
                Ok(value) => entries.push((tag.description.clone(), value)),
                Err(e) => {
                    warn!(
                        group = %group.name,
                        error = %e,
                        "Tag read failed, dropping this group's payload for the tick"
                    );
                    return;
                }
            }
        }

        let payload = GroupPayload::assemble(entries);
        let topic = resolve_topic(&self.base_topic, &self.mapping_values, &group.name);

        let body = match payload.to_json() {
            Ok(body) => body,
            Err(e) => {
                warn!(group = %group.name, error = %e, "Failed to encode payload");
                return;
            }
        };

        match self.sink.publish(&topic, body).await {
            Ok(()) => debug!(topic = %topic, group = %group.name, "Dispatched group payload"),
            Err(e) => warn!(error = %e, "Publish dispatch failed"),
        }
    }
}
