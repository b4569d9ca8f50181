use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use super::protocol::{Packet, PacketError, PacketTypeId, TYPE_ID_WIDTH};

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>, PacketError>;

struct PacketType {
    name: &'static str,
    decode: DecodeFn,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("packet type '{0}' is already registered")]
    DuplicateType(&'static str),
    #[error("packet type '{name}' hashes to {id}, already taken by '{existing}'")]
    IdCollision {
        name: &'static str,
        existing: &'static str,
        id: PacketTypeId,
    },
}

/// A decoded message waiting for dispatch.
pub struct DecodedPacket {
    pub type_id: PacketTypeId,
    pub name: &'static str,
    pub payload: Box<dyn Any + Send>,
}

impl std::fmt::Debug for DecodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedPacket")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registration phase of the process-wide packet type table. Must be fully
/// populated before the first connection is opened.
#[derive(Default)]
pub struct PacketRegistryBuilder {
    types: HashMap<PacketTypeId, PacketType>,
}

impl PacketRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Packet>(&mut self) -> Result<PacketTypeId, RegistryError> {
        let id = P::packet_type();
        if let Some(existing) = self.types.get(&id) {
            return Err(if existing.name == P::NAME {
                RegistryError::DuplicateType(P::NAME)
            } else {
                RegistryError::IdCollision {
                    name: P::NAME,
                    existing: existing.name,
                    id,
                }
            });
        }

        self.types.insert(
            id,
            PacketType {
                name: P::NAME,
                decode: decode_erased::<P>,
            },
        );
        Ok(id)
    }

    pub fn build(self) -> Arc<PacketRegistry> {
        for (id, ty) in &self.types {
            log::debug!("{}: {}", ty.name, id);
        }
        Arc::new(PacketRegistry { types: self.types })
    }
}

/// Read-only packet type table shared by every connection.
pub struct PacketRegistry {
    types: HashMap<PacketTypeId, PacketType>,
}

impl PacketRegistry {
    pub fn builder() -> PacketRegistryBuilder {
        PacketRegistryBuilder::new()
    }

    pub fn contains(&self, id: PacketTypeId) -> bool {
        self.types.contains_key(&id)
    }

    pub fn name(&self, id: PacketTypeId) -> Option<&'static str> {
        self.types.get(&id).map(|ty| ty.name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Builds a wire message: type id followed by the encoded payload.
    pub fn encode<P: Packet>(&self, packet: &P) -> Result<Vec<u8>, PacketError> {
        let id = P::packet_type();
        if !self.contains(id) {
            return Err(PacketError::UnknownType(id));
        }

        let payload = packet.encode()?;
        let mut message = Vec::with_capacity(TYPE_ID_WIDTH + payload.len());
        message.extend_from_slice(&id.to_bytes());
        message.extend_from_slice(&payload);
        Ok(message)
    }

    pub fn decode(&self, message: &[u8]) -> Result<DecodedPacket, PacketError> {
        let (type_id, payload) = PacketTypeId::split(message)
            .ok_or(PacketError::Malformed { len: message.len() })?;
        let ty = self
            .types
            .get(&type_id)
            .ok_or(PacketError::UnknownType(type_id))?;

        Ok(DecodedPacket {
            type_id,
            name: ty.name,
            payload: (ty.decode)(payload)?,
        })
    }
}

fn decode_erased<P: Packet>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, PacketError> {
    Ok(Box::new(P::decode(bytes)?))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chat {
        sender: String,
        text: String,
    }

    impl Packet for Chat {
        const NAME: &'static str = "Chat";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Unlisted;

    impl Packet for Unlisted {
        const NAME: &'static str = "Unlisted";
    }

    fn registry() -> Arc<PacketRegistry> {
        let mut builder = PacketRegistry::builder();
        builder.register::<Chat>().unwrap();
        builder.build()
    }

    #[test]
    fn test_duplicate_registration() {
        let mut builder = PacketRegistry::builder();
        builder.register::<Chat>().unwrap();
        assert!(matches!(
            builder.register::<Chat>(),
            Err(RegistryError::DuplicateType("Chat"))
        ));
    }

    #[test]
    fn test_frame_roundtrip() {
        let registry = registry();
        let chat = Chat {
            sender: "ann".into(),
            text: "hi".into(),
        };

        let message = registry.encode(&chat).unwrap();
        assert_eq!(&message[..TYPE_ID_WIDTH], &Chat::packet_type().to_bytes());

        let decoded = registry.decode(&message).unwrap();
        assert_eq!(decoded.name, "Chat");
        assert_eq!(*decoded.payload.downcast::<Chat>().unwrap(), chat);
    }

    #[test]
    fn test_unregistered_types() {
        let registry = registry();
        assert!(matches!(
            registry.encode(&Unlisted),
            Err(PacketError::UnknownType(_))
        ));

        let message = Unlisted::packet_type().to_bytes();
        assert!(matches!(
            registry.decode(&message),
            Err(PacketError::UnknownType(id)) if id == Unlisted::packet_type()
        ));
    }

    #[test]
    fn test_short_message_is_malformed() {
        let registry = registry();
        assert!(matches!(
            registry.decode(&[7]),
            Err(PacketError::Malformed { len: 1 })
        ));
    }
}
