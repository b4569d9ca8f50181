use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::net::{Connection, Packet, PacketRegistryBuilder, RegistryError, SendError};

use super::networked::NetworkId;

/// Build the entity by replaying a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntity {
    pub network_id: NetworkId,
    pub template: String,
    pub arguments: Document,
}

/// Build the entity from a full snapshot of its tracked components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateExplicit {
    pub network_id: NetworkId,
    pub components: BTreeMap<String, Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachComponent {
    pub network_id: NetworkId,
    pub component: String,
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateComponent {
    pub network_id: NetworkId,
    pub component: String,
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachComponent {
    pub network_id: NetworkId,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyEntity {
    pub network_id: NetworkId,
}

impl Packet for CreateEntity {
    const NAME: &'static str = "replica.CreateEntity";
}

impl Packet for CreateExplicit {
    const NAME: &'static str = "replica.CreateExplicit";
}

impl Packet for AttachComponent {
    const NAME: &'static str = "replica.AttachComponent";
}

impl Packet for UpdateComponent {
    const NAME: &'static str = "replica.UpdateComponent";
}

impl Packet for DetachComponent {
    const NAME: &'static str = "replica.DetachComponent";
}

impl Packet for DestroyEntity {
    const NAME: &'static str = "replica.DestroyEntity";
}

/// Registers the six replication packet types.
pub fn register_packets(builder: &mut PacketRegistryBuilder) -> Result<(), RegistryError> {
    builder.register::<CreateEntity>()?;
    builder.register::<CreateExplicit>()?;
    builder.register::<AttachComponent>()?;
    builder.register::<UpdateComponent>()?;
    builder.register::<DetachComponent>()?;
    builder.register::<DestroyEntity>()?;
    Ok(())
}

/// One outgoing replication packet, in the order the server produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationMessage {
    Create(CreateEntity),
    CreateExplicit(CreateExplicit),
    Attach(AttachComponent),
    Update(UpdateComponent),
    Detach(DetachComponent),
    Destroy(DestroyEntity),
}

impl ReplicationMessage {
    pub fn network_id(&self) -> NetworkId {
        match self {
            ReplicationMessage::Create(p) => p.network_id,
            ReplicationMessage::CreateExplicit(p) => p.network_id,
            ReplicationMessage::Attach(p) => p.network_id,
            ReplicationMessage::Update(p) => p.network_id,
            ReplicationMessage::Detach(p) => p.network_id,
            ReplicationMessage::Destroy(p) => p.network_id,
        }
    }

    pub fn send<C>(&self, connection: &mut Connection<C>) -> Result<(), SendError> {
        match self {
            ReplicationMessage::Create(p) => connection.send(p),
            ReplicationMessage::CreateExplicit(p) => connection.send(p),
            ReplicationMessage::Attach(p) => connection.send(p),
            ReplicationMessage::Update(p) => connection.send(p),
            ReplicationMessage::Detach(p) => connection.send(p),
            ReplicationMessage::Destroy(p) => connection.send(p),
        }
    }
}
