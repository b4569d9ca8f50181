use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 20;

/// Width in bytes of the type id that prefixes every message.
pub const TYPE_ID_WIDTH: usize = std::mem::size_of::<u64>();

/// Stable packet type identifier: FNV-1a of the type's name, so independently
/// started processes agree on ids without a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketTypeId(u64);

impl PacketTypeId {
    pub const fn from_name(name: &str) -> Self {
        Self(const_fnv1a_hash::fnv1a_hash_str_64(name))
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; TYPE_ID_WIDTH] {
        self.0.to_le_bytes()
    }

    /// Splits a message into its type id and payload.
    pub fn split(message: &[u8]) -> Option<(Self, &[u8])> {
        let (head, payload) = message.split_first_chunk::<TYPE_ID_WIDTH>()?;
        Some((Self(u64::from_le_bytes(*head)), payload))
    }
}

impl fmt::Display for PacketTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("message of {len} bytes is shorter than the {width}-byte type id", width = TYPE_ID_WIDTH)]
    Malformed { len: usize },
    #[error("unregistered packet type {0}")]
    UnknownType(PacketTypeId),
    #[error("failed to encode {packet}: {reason}")]
    Encode { packet: &'static str, reason: String },
    #[error("failed to decode {packet}: {reason}")]
    Decode { packet: &'static str, reason: String },
}

/// A payload type that can travel over a [`Connection`](super::Connection).
///
/// The default codec is MessagePack with named fields, which keeps
/// [`Document`](crate::Document) payloads self-describing. Types with a
/// fixed layout may override `encode`/`decode`.
pub trait Packet: Serialize + DeserializeOwned + Send + 'static {
    const NAME: &'static str;

    fn packet_type() -> PacketTypeId {
        PacketTypeId::from_name(Self::NAME)
    }

    fn encode(&self) -> Result<Vec<u8>, PacketError> {
        rmp_serde::to_vec_named(self).map_err(|e| PacketError::Encode {
            packet: Self::NAME,
            reason: e.to_string(),
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        rmp_serde::from_slice(bytes).map_err(|e| PacketError::Decode {
            packet: Self::NAME,
            reason: e.to_string(),
        })
    }
}
