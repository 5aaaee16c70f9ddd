//! Server-control packets: the narrower `{flags, payload}` shape used on
//! the long-lived connection between a rendezvous point and a content server.
//!
//! Payloads vary by message (a content name, a stream address, a catalog),
//! so the packet is generic over `T` and serialized as JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire::{Flags, WireError};

/// One item of a content server's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPacket<T> {
    pub flags: Flags,
    pub payload: T,
}

#[derive(Deserialize)]
struct FlagsOnly {
    flags: Flags,
}

/// Read only the flags of an encoded control packet.
pub fn peek_flags(data: &[u8]) -> Result<Flags, WireError> {
    let probe: FlagsOnly = serde_json::from_slice(data).map_err(|e| WireError::Json(e.to_string()))?;
    check_control_flags(probe.flags)?;
    Ok(probe.flags)
}

fn check_control_flags(flags: Flags) -> Result<(), WireError> {
    if flags.is_empty() || flags.bits() & !Flags::CONTROL_MASK != 0 {
        return Err(WireError::UnknownFlags(flags.bits()));
    }
    Ok(())
}

impl<T: Serialize> ControlPacket<T> {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::Json(e.to_string()))
    }
}

impl<T: DeserializeOwned> ControlPacket<T> {
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let packet: Self =
            serde_json::from_slice(data).map_err(|e| WireError::Json(e.to_string()))?;
        check_control_flags(packet.flags)?;
        Ok(packet)
    }

    /// Decode and require the packet to mean exactly `expected`.
    pub fn decode_expecting(data: &[u8], expected: Flags) -> Result<Self, WireError> {
        let actual = peek_flags(data)?;
        if !actual.is(expected) {
            return Err(WireError::MisTagged { expected, actual });
        }
        Self::decode(data)
    }
}

impl ControlPacket<String> {
    fn with(flags: Flags, payload: &str) -> Self {
        Self {
            flags,
            payload: payload.to_string(),
        }
    }

    pub fn wake() -> Self {
        Self::with(Flags::WAKE, "")
    }

    pub fn request(content_name: &str) -> Self {
        Self::with(Flags::REQUEST, content_name)
    }

    /// Answer to REQUEST: where the server will send the stream.
    /// Either `host:port` or a bare port.
    pub fn content_port(address: &str) -> Self {
        Self::with(Flags::CONTENT, address)
    }

    pub fn stop(content_name: &str) -> Self {
        Self::with(Flags::STOP, content_name)
    }

    pub fn ok() -> Self {
        Self::with(Flags::OK, "")
    }

    pub fn ping() -> Self {
        Self::with(Flags::PING, "")
    }

    pub fn pong() -> Self {
        Self::with(Flags::PONG, "")
    }
}

impl ControlPacket<Vec<CatalogEntry>> {
    /// Answer to WAKE.
    pub fn catalog(entries: Vec<CatalogEntry>) -> Self {
        Self {
            flags: Flags::CONTENT,
            payload: entries,
        }
    }
}
