//! Configuration for the Modbus-to-MQTT bridge.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use plcbridge_common::config::LoggingConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker settings and topic derivation
    pub mqtt: MqttConfig,

    /// Controller connection and tag groups
    pub plc: PlcConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT side of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker connection parameters
    pub connection: MqttConnectionConfig,

    /// Ordered single-entry maps whose values extend the base topic
    #[serde(default)]
    pub topic_mapping: Vec<TopicSegment>,
}

impl MqttConfig {
    /// The topic-mapping values, in sequence order.
    pub fn mapping_values(&self) -> Vec<String> {
        self.topic_mapping.iter().map(|s| s.value.clone()).collect()
    }
}

/// Broker connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConnectionConfig {
    /// Broker URL: `mqtt://host:port`, `tcp://host:port` or `host[:port]`
    pub broker_url: String,

    /// Broker client options
    #[serde(default)]
    pub options: MqttOptionsConfig,

    /// Prefixed verbatim to every resolved topic
    pub base_topic: String,

    /// Polling interval in milliseconds (must be > 0)
    pub polling_interval: u64,
}

/// Broker client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttOptionsConfig {
    /// MQTT client identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Username for broker authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for broker authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// QoS for published payloads (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,

    /// Retain flag for published payloads
    #[serde(default)]
    pub retain: bool,
}

fn default_client_id() -> String {
    "mqtt-bridge-modbus".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl Default for MqttOptionsConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            qos: 0,
            retain: false,
        }
    }
}

/// One `{key: value}` entry of the topic mapping. Only the value ends up in
/// the topic; the key is documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSegment {
    pub key: String,
    pub value: String,
}

impl Serialize for TopicSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for TopicSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SegmentVisitor;

        impl<'de> Visitor<'de> for SegmentVisitor {
            type Value = TopicSegment;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map with exactly one entry")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let (key, value): (String, String) = map.next_entry()?.ok_or_else(|| {
                    serde::de::Error::custom("topic_mapping entry must not be empty")
                })?;

                if map.next_entry::<String, String>()?.is_some() {
                    return Err(serde::de::Error::custom(
                        "topic_mapping entry must have exactly one key",
                    ));
                }

                Ok(TopicSegment { key, value })
            }
        }

        deserializer.deserialize_map(SegmentVisitor)
    }
}

/// Controller side of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Connection parameters for the controller session
    pub connection: PlcConnectionConfig,

    /// Payload groups, in configuration order
    pub tags: TagGroups,
}

/// Controller connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConnectionConfig {
    /// Controller IP address
    pub host: String,

    /// Modbus TCP port (default: 502)
    #[serde(default = "default_plc_port")]
    pub port: u16,

    /// Modbus unit/slave ID (default: 1)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_plc_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

/// A named payload group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroup {
    /// Group name (used as the last topic level)
    pub name: String,

    /// Tags in read order
    pub tags: Vec<TagConfig>,
}

/// One tag within a payload group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Controller-side symbol name (e.g. `holding:100:f32`)
    pub tagname: String,

    /// Key for this value in the published payload
    pub description: String,
}

/// Tag groups keyed by name, kept in configuration order.
///
/// The config document maps group names to tag lists; iteration order of the
/// groups follows the document. Duplicate group names are rejected at parse
/// time.
#[derive(Debug, Clone, Default)]
pub struct TagGroups(Vec<TagGroup>);

impl TagGroups {
    pub fn new(groups: Vec<TagGroup>) -> Self {
        Self(groups)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagGroup> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for TagGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for group in &self.0 {
            map.serialize_entry(&group.name, &group.tags)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TagGroups {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GroupsVisitor;

        impl<'de> Visitor<'de> for GroupsVisitor {
            type Value = TagGroups;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of group name to tag list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut groups = Vec::new();
                let mut seen = HashSet::new();

                while let Some((name, tags)) = map.next_entry::<String, Vec<TagConfig>>()? {
                    if !seen.insert(name.clone()) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate tag group '{}'",
                            name
                        )));
                    }
                    groups.push(TagGroup { name, tags });
                }

                Ok(TagGroups(groups))
            }
        }

        deserializer.deserialize_map(GroupsVisitor)
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.connection.polling_interval == 0 {
            return Err(ConfigError::Validation(
                "polling_interval must be greater than zero".to_string(),
            ));
        }

        if self.mqtt.connection.options.qos > 2 {
            return Err(ConfigError::Validation(format!(
                "qos must be 0, 1 or 2, got {}",
                self.mqtt.connection.options.qos
            )));
        }

        if self.plc.connection.host.is_empty() {
            return Err(ConfigError::Validation(
                "plc.connection.host cannot be empty".to_string(),
            ));
        }

        if self.plc.tags.is_empty() {
            return Err(ConfigError::Validation(
                "At least one tag group must be configured".to_string(),
            ));
        }

        for group in self.plc.tags.iter() {
            if group.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Tag group name cannot be empty".to_string(),
                ));
            }

            if group.tags.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Tag group '{}': must contain at least one tag",
                    group.name
                )));
            }

            for tag in &group.tags {
                if tag.tagname.is_empty() || tag.description.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Tag group '{}': tagname and description cannot be empty",
                        group.name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        mqtt: {
            connection: {
                broker_url: "mqtt://192.168.1.20:1883",
                options: { client_id: "line1-bridge", qos: 1 },
                base_topic: "plant/",
                polling_interval: 1000,
            },
            topic_mapping: [
                { site: "cell3" },
                { device: "plc01" },
            ],
        },
        plc: {
            connection: { host: "192.168.1.10" },
            tags: {
                Line1: [
                    { tagname: "holding:0:f32", description: "temperature" },
                    { tagname: "coil:4", description: "running" },
                ],
                Line2: [
                    { tagname: "input:10:i16", description: "level" },
                ],
            },
        },
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config: BridgeConfig = json5::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mqtt.connection.broker_url, "mqtt://192.168.1.20:1883");
        assert_eq!(config.mqtt.connection.options.client_id, "line1-bridge");
        assert_eq!(config.mqtt.connection.options.qos, 1);
        assert_eq!(config.mqtt.connection.options.keep_alive_secs, 30);
        assert_eq!(config.mqtt.connection.base_topic, "plant/");
        assert_eq!(config.mqtt.connection.polling_interval, 1000);
        assert_eq!(config.plc.connection.port, 502);
        assert_eq!(config.plc.connection.unit_id, 1);
    }

    #[test]
    fn test_mapping_values_in_order() {
        let config: BridgeConfig = json5::from_str(SAMPLE).unwrap();
        assert_eq!(config.mqtt.mapping_values(), vec!["cell3", "plc01"]);
    }

    #[test]
    fn test_groups_keep_document_order() {
        let config: BridgeConfig = json5::from_str(SAMPLE).unwrap();

        let names: Vec<&str> = config.plc.tags.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Line1", "Line2"]);

        let line1 = config.plc.tags.iter().next().unwrap();
        assert_eq!(line1.tags[0].tagname, "holding:0:f32");
        assert_eq!(line1.tags[0].description, "temperature");
    }

    #[test]
    fn test_topic_segment_with_two_keys_rejected() {
        let json = r#"{ site: "cell3", device: "plc01" }"#;
        let result: Result<TopicSegment, _> = json5::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let json = r#"{
            Line1: [{ tagname: "coil:0", description: "a" }],
            Line1: [{ tagname: "coil:1", description: "b" }],
        }"#;
        let result: Result<TagGroups, _> = json5::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config: BridgeConfig = json5::from_str(SAMPLE).unwrap();
        config.mqtt.connection.polling_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_qos() {
        let mut config: BridgeConfig = json5::from_str(SAMPLE).unwrap();
        config.mqtt.connection.options.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_groups() {
        let mut config: BridgeConfig = json5::from_str(SAMPLE).unwrap();
        config.plc.tags = TagGroups::new(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_group_tags() {
        let mut config: BridgeConfig = json5::from_str(SAMPLE).unwrap();
        config.plc.tags = TagGroups::new(vec![TagGroup {
            name: "Line1".to_string(),
            tags: Vec::new(),
        }]);
        assert!(config.validate().is_err());
    }
}
