//! Controller session over Modbus/TCP.
//!
//! The rest of the bridge only sees [`SymbolSource::read_symbol`]: a symbol
//! name goes in, a typed value comes out. The symbol-name syntax is private
//! to this module:
//!
//! ```text
//! <area>:<address>[:<type>]
//! ```
//!
//! Where `<area>` is `coil`, `discrete`, `input` or `holding`, `<address>`
//! is the 0-based register address, and `<type>` (word areas only) is one of
//! `u16` (default), `i16`, `u32`, `i32` or `f32`.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use plcbridge_common::TagValue;

use crate::config::PlcConnectionConfig;

/// Errors from the controller session.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Read failed for '{tagname}': {message}")]
    Read { tagname: String, message: String },
}

fn read_error(tagname: &str, message: impl Into<String>) -> ControllerError {
    ControllerError::Read {
        tagname: tagname.to_string(),
        message: message.into(),
    }
}

/// Read access to named controller symbols.
#[async_trait]
pub trait SymbolSource {
    /// Read the current value of a symbol by name.
    async fn read_symbol(&self, tagname: &str) -> Result<TagValue, ControllerError>;
}

/// Register area addressed by a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Area {
    Coil,
    Discrete,
    Input,
    Holding,
}

/// Value interpretation for word-area reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum WordType {
    #[default]
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl WordType {
    /// Number of 16-bit registers one value occupies.
    fn register_count(self) -> u16 {
        match self {
            WordType::U16 | WordType::I16 => 1,
            WordType::U32 | WordType::I32 | WordType::F32 => 2,
        }
    }
}

/// Parsed form of a symbol name.
#[derive(Debug, Clone, PartialEq)]
struct SymbolSpec {
    area: Area,
    address: u16,
    word_type: WordType,
}

impl FromStr for SymbolSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (area_str, addr_str, type_str) = match parts.as_slice() {
            [area, addr] => (*area, *addr, None),
            [area, addr, ty] => (*area, *addr, Some(*ty)),
            _ => return Err(format!("expected '<area>:<address>[:<type>]', got '{}'", s)),
        };

        let area = match area_str {
            "coil" => Area::Coil,
            "discrete" => Area::Discrete,
            "input" => Area::Input,
            "holding" => Area::Holding,
            other => return Err(format!("unknown register area '{}'", other)),
        };

        let address: u16 = addr_str
            .parse()
            .map_err(|_| format!("invalid register address '{}'", addr_str))?;

        let word_type = match (area, type_str) {
            (Area::Coil | Area::Discrete, Some(ty)) => {
                return Err(format!("bit area '{}' takes no data type, got '{}'", area_str, ty));
            }
            (_, None) => WordType::default(),
            (_, Some("u16")) => WordType::U16,
            (_, Some("i16")) => WordType::I16,
            (_, Some("u32")) => WordType::U32,
            (_, Some("i32")) => WordType::I32,
            (_, Some("f32")) => WordType::F32,
            (_, Some(other)) => return Err(format!("unknown data type '{}'", other)),
        };

        Ok(SymbolSpec {
            area,
            address,
            word_type,
        })
    }
}

/// Decode raw register words into a typed value. Big-endian word order for
/// two-register types.
fn decode_words(words: &[u16], word_type: WordType) -> Result<TagValue, String> {
    if (words.len() as u16) < word_type.register_count() {
        return Err(format!(
            "short response: got {} register(s), need {}",
            words.len(),
            word_type.register_count()
        ));
    }

    let value = match word_type {
        WordType::U16 => TagValue::Integer(i64::from(words[0])),
        WordType::I16 => TagValue::Integer(i64::from(words[0] as i16)),
        WordType::U32 => {
            let raw = ((words[0] as u32) << 16) | (words[1] as u32);
            TagValue::Integer(i64::from(raw))
        }
        WordType::I32 => {
            let raw = ((words[0] as u32) << 16) | (words[1] as u32);
            TagValue::Integer(i64::from(raw as i32))
        }
        WordType::F32 => {
            let bits = ((words[0] as u32) << 16) | (words[1] as u32);
            TagValue::Float(f64::from(f32::from_bits(bits)))
        }
    };

    Ok(value)
}

/// A live Modbus/TCP session exposing symbol reads.
///
/// The context sits behind an async mutex: overlapping ticks serialize their
/// reads instead of interleaving mid-transaction.
pub struct ModbusController {
    ctx: Mutex<Context>,
}

impl ModbusController {
    /// Open the controller session. Fails fast; the caller decides whether
    /// to retry.
    pub async fn connect(config: &PlcConnectionConfig) -> Result<Self, ControllerError> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ControllerError::Connect(format!("Invalid address: {}", e)))?;

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let slave = Slave(config.unit_id);

        let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
            .await
            .map_err(|_| ControllerError::Connect("Connection timeout".to_string()))?
            .map_err(|e| ControllerError::Connect(e.to_string()))?;

        info!(
            host = %config.host,
            port = config.port,
            unit_id = config.unit_id,
            "Connected to controller"
        );

        Ok(Self {
            ctx: Mutex::new(ctx),
        })
    }

    /// Close the session. Best-effort; errors are logged and swallowed.
    pub async fn disconnect(&self) {
        let mut ctx = self.ctx.lock().await;
        if let Err(e) = ctx.disconnect().await {
            debug!(error = %e, "Error closing controller session");
        }
    }
}

#[async_trait]
impl SymbolSource for ModbusController {
    async fn read_symbol(&self, tagname: &str) -> Result<TagValue, ControllerError> {
        let spec: SymbolSpec = tagname.parse().map_err(|m: String| read_error(tagname, m))?;

        let mut ctx = self.ctx.lock().await;

        match spec.area {
            Area::Coil => {
                let bits = ctx
                    .read_coils(spec.address, 1)
                    .await
                    .map_err(|e| read_error(tagname, e.to_string()))?
                    .map_err(|e| read_error(tagname, format!("Exception: {:?}", e)))?;

                let bit = bits
                    .first()
                    .copied()
                    .ok_or_else(|| read_error(tagname, "empty response"))?;
                Ok(TagValue::Bool(bit))
            }
            Area::Discrete => {
                let bits = ctx
                    .read_discrete_inputs(spec.address, 1)
                    .await
                    .map_err(|e| read_error(tagname, e.to_string()))?
                    .map_err(|e| read_error(tagname, format!("Exception: {:?}", e)))?;

                let bit = bits
                    .first()
                    .copied()
                    .ok_or_else(|| read_error(tagname, "empty response"))?;
                Ok(TagValue::Bool(bit))
            }
            Area::Input | Area::Holding => {
                let count = spec.word_type.register_count();
                let words = match spec.area {
                    Area::Input => ctx.read_input_registers(spec.address, count).await,
                    _ => ctx.read_holding_registers(spec.address, count).await,
                }
                .map_err(|e| read_error(tagname, e.to_string()))?
                .map_err(|e| read_error(tagname, format!("Exception: {:?}", e)))?;

                decode_words(&words, spec.word_type).map_err(|m| read_error(tagname, m))
            }
        }
    }
}
