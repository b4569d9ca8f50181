use std::collections::HashMap;
use std::sync::Arc;

use crate::document::Document;
use crate::net::Dispatcher;
use crate::reflect::ComponentRegistry;
use crate::template::TemplateRegistry;
use crate::world::{Entity, World};

use super::ReplicationError;
use super::networked::NetworkId;
use super::packets::{
    AttachComponent, CreateEntity, CreateExplicit, DestroyEntity, DetachComponent,
    ReplicationMessage, UpdateComponent,
};

/// Attached to client entities created by replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicated {
    pub network_id: NetworkId,
}

/// Client half of replication: owns the network id to entity map and applies
/// incoming packets to the local world.
pub struct ClientReplicator {
    components: Arc<ComponentRegistry>,
    templates: Arc<TemplateRegistry>,
    entities: HashMap<NetworkId, Entity>,
}

impl ClientReplicator {
    pub fn new(components: Arc<ComponentRegistry>, templates: Arc<TemplateRegistry>) -> Self {
        Self {
            components,
            templates,
            entities: HashMap::new(),
        }
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    pub fn entity(&self, network_id: NetworkId) -> Option<Entity> {
        self.entities.get(&network_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn network_ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.entities.keys().copied()
    }

    pub fn apply_create(
        &mut self,
        world: &mut World,
        packet: CreateEntity,
    ) -> Result<Entity, ReplicationError> {
        self.templates.get(&packet.template)?;
        let entity = self.bind(world, packet.network_id);
        self.templates.create_with_template(
            world,
            &self.components,
            entity,
            &packet.template,
            packet.arguments,
        )?;
        Ok(entity)
    }

    pub fn apply_create_explicit(
        &mut self,
        world: &mut World,
        packet: CreateExplicit,
    ) -> Result<Entity, ReplicationError> {
        let entity = self.bind(world, packet.network_id);
        self.components.write_all(world, entity, &packet.components)?;
        Ok(entity)
    }

    /// Returns `false` when the network id is unknown and the packet was ignored.
    pub fn apply_attach(
        &mut self,
        world: &mut World,
        packet: AttachComponent,
    ) -> Result<bool, ReplicationError> {
        self.write(world, packet.network_id, &packet.component, packet.document, "Attach")
    }

    pub fn apply_update(
        &mut self,
        world: &mut World,
        packet: UpdateComponent,
    ) -> Result<bool, ReplicationError> {
        self.write(world, packet.network_id, &packet.component, packet.document, "Update")
    }

    pub fn apply_detach(
        &mut self,
        world: &mut World,
        packet: DetachComponent,
    ) -> Result<bool, ReplicationError> {
        let Some(entity) = self.live_entity(world, packet.network_id, "Detach") else {
            return Ok(false);
        };
        self.components.remove(world, entity, &packet.component)?;
        Ok(true)
    }

    pub fn apply_destroy(&mut self, world: &mut World, packet: DestroyEntity) -> bool {
        match self.entities.remove(&packet.network_id) {
            Some(entity) => {
                world.despawn(entity);
                true
            }
            None => {
                log::debug!("Ignoring Destroy for unknown {}", packet.network_id);
                false
            }
        }
    }

    /// Applies a message produced in-process by a server replicator.
    pub fn apply(
        &mut self,
        world: &mut World,
        message: ReplicationMessage,
    ) -> Result<(), ReplicationError> {
        match message {
            ReplicationMessage::Create(p) => self.apply_create(world, p).map(drop),
            ReplicationMessage::CreateExplicit(p) => self.apply_create_explicit(world, p).map(drop),
            ReplicationMessage::Attach(p) => self.apply_attach(world, p).map(drop),
            ReplicationMessage::Update(p) => self.apply_update(world, p).map(drop),
            ReplicationMessage::Detach(p) => self.apply_detach(world, p).map(drop),
            ReplicationMessage::Destroy(p) => {
                self.apply_destroy(world, p);
                Ok(())
            }
        }
    }

    fn bind(&mut self, world: &mut World, network_id: NetworkId) -> Entity {
        if let Some(stale) = self.entities.remove(&network_id) {
            log::warn!(
                "Duplicate network id {}: replacing {} with a new entity",
                network_id,
                stale
            );
            world.despawn(stale);
        }

        let entity = world.spawn();
        world.insert(entity, Replicated { network_id });
        self.entities.insert(network_id, entity);
        entity
    }

    fn live_entity(&self, world: &World, network_id: NetworkId, packet: &str) -> Option<Entity> {
        match self.entities.get(&network_id) {
            Some(&entity) if world.contains(entity) => Some(entity),
            Some(&entity) => {
                log::debug!("Ignoring {} for {}: {} no longer exists", packet, network_id, entity);
                None
            }
            None => {
                log::debug!("Ignoring {} for unknown {}", packet, network_id);
                None
            }
        }
    }

    fn write(
        &self,
        world: &mut World,
        network_id: NetworkId,
        component: &str,
        document: Document,
        packet: &str,
    ) -> Result<bool, ReplicationError> {
        let Some(entity) = self.live_entity(world, network_id, packet) else {
            return Ok(false);
        };
        self.components.write(world, entity, component, document)?;
        Ok(true)
    }
}

/// Simulation context of a client connection.
pub struct ClientWorld {
    pub world: World,
    pub replicator: ClientReplicator,
}

impl ClientWorld {
    pub fn new(components: Arc<ComponentRegistry>, templates: Arc<TemplateRegistry>) -> Self {
        Self {
            world: World::new(),
            replicator: ClientReplicator::new(components, templates),
        }
    }

    /// Handlers for all six replication packets.
    pub fn dispatcher() -> Dispatcher<ClientWorld> {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .on(|ctx: &mut ClientWorld, packet: CreateEntity| {
                ctx.replicator.apply_create(&mut ctx.world, packet)?;
                Ok(())
            })
            .on(|ctx: &mut ClientWorld, packet: CreateExplicit| {
                ctx.replicator.apply_create_explicit(&mut ctx.world, packet)?;
                Ok(())
            })
            .on(|ctx: &mut ClientWorld, packet: AttachComponent| {
                ctx.replicator.apply_attach(&mut ctx.world, packet)?;
                Ok(())
            })
            .on(|ctx: &mut ClientWorld, packet: UpdateComponent| {
                ctx.replicator.apply_update(&mut ctx.world, packet)?;
                Ok(())
            })
            .on(|ctx: &mut ClientWorld, packet: DetachComponent| {
                ctx.replicator.apply_detach(&mut ctx.world, packet)?;
                Ok(())
            })
            .on(|ctx: &mut ClientWorld, packet: DestroyEntity| {
                ctx.replicator.apply_destroy(&mut ctx.world, packet);
                Ok(())
            });
        dispatcher
    }
}
