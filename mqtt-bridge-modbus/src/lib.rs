//! MQTT bridge for Modbus PLCs.
//!
//! This bridge polls tag groups from a Modbus/TCP controller on a fixed
//! interval and republishes each group as a timestamped JSON payload on an
//! MQTT broker.
//!
//! # Topics
//!
//! ```text
//! <base_topic><mapping values joined with "/">/<group>
//! ```
//!
//! Where:
//! - `<base_topic>` - Prefixed verbatim from configuration
//! - `<mapping values>` - The values of `mqtt.topic_mapping`, in order
//! - `<group>` - Group name from `plc.tags`

pub mod config;
pub mod controller;
pub mod mqtt;
pub mod runner;
pub mod scheduler;
