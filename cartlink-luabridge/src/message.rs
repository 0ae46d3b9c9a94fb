//! Wire messages: one JSON object per message, terminated by a single
//! `0x00` byte. Byte payloads travel base64-encoded in the `block`
//! field.

use cartlink_core::DeviceError;
use serde::{Deserialize, Serialize};

/// Request/response message types.
pub const TYPE_READ_BLOCK: u8 = 0x0F;
pub const TYPE_WRITE_BLOCK: u8 = 0x1F;
pub const TYPE_SHOW_MESSAGE: u8 = 0xF0;
pub const TYPE_PING: u8 = 0xFF;

/// The memory domain covering the CPU bus.
pub const DOMAIN_SYSTEM_BUS: &str = "System Bus";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LuaBlock {
    pub id: u32,
    #[serde(default)]
    pub stamp: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub address: u32,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub value: u32,
    #[serde(default, with = "base64_bytes")]
    pub block: Vec<u8>,
}

/// Serialize a message with its `0x00` terminator.
pub fn encode(block: &LuaBlock) -> Result<Vec<u8>, DeviceError> {
    let mut bytes = serde_json::to_vec(block)?;
    bytes.push(0);
    Ok(bytes)
}

/// Parse the bytes between terminators back into a message.
pub fn decode(bytes: &[u8]) -> Result<LuaBlock, DeviceError> {
    Ok(serde_json::from_slice(bytes)?)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Vec::new()),
            Some(text) => STANDARD.decode(&text).map_err(serde::de::Error::custom),
        }
    }
}
