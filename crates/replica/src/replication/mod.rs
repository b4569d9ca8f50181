//! Server-authoritative entity replication.
//!
//! The server marks entities as networked and calls
//! [`ServerReplicator::tick`] once per simulation tick; the resulting
//! messages are sent to every connection in order. Clients apply them through
//! [`ClientReplicator`], usually via the handlers of
//! [`ClientWorld::dispatcher`].

mod client;
mod networked;
mod packets;
mod server;

use crate::reflect::ReflectError;
use crate::template::TemplateError;
use crate::world::Entity;

pub use client::{ClientReplicator, ClientWorld, Replicated};
pub use networked::{NetworkId, Networked};
pub use packets::{
    AttachComponent, CreateEntity, CreateExplicit, DestroyEntity, DetachComponent,
    ReplicationMessage, UpdateComponent, register_packets,
};
pub use server::ServerReplicator;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Reflect(#[from] ReflectError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{0} was not built from a template")]
    NoTemplate(Entity),
    #[error("{0} is not networked")]
    NotNetworked(Entity),
    #[error("{entity} is already networked as {network_id}")]
    AlreadyNetworked { entity: Entity, network_id: NetworkId },
}
