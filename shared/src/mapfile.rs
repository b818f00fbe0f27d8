//! Persisted map files.
//!
//! Layout: the 4-byte magic `HXMP`, a 4-byte little-endian payload length,
//! then a `Packet::MapDefinition` encoded exactly as it would travel on the
//! wire. Trailing bytes after the declared payload are ignored.

use crate::error::ProtocolError;
use crate::protocol::{MapDefinition, Packet};

pub const MAP_MAGIC: [u8; 4] = *b"HXMP";

const HEADER_LEN: usize = 8;

pub fn encode_map(map: &MapDefinition) -> Result<Vec<u8>, ProtocolError> {
    let payload = Packet::MapDefinition { map: map.clone() }.encode()?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAP_MAGIC);
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn decode_map(bytes: &[u8]) -> Result<MapDefinition, ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            declared: HEADER_LEN,
            available: bytes.len(),
        });
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[..4]);
    if magic != MAP_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[4..HEADER_LEN]);
    let declared = u32::from_le_bytes(len) as usize;
    let body = &bytes[HEADER_LEN..];
    if body.len() < declared {
        return Err(ProtocolError::Truncated {
            declared,
            available: body.len(),
        });
    }
    match Packet::decode(&body[..declared])? {
        Packet::MapDefinition { map } => Ok(map),
        _ => Err(ProtocolError::NotAMap),
    }
}
