use std::collections::BTreeMap;
use std::sync::Arc;

use crate::document::Document;
use crate::reflect::{ComponentRegistry, ReflectError};
use crate::template::{TemplateOrigin, TemplateRegistry};
use crate::world::{Entity, World};

use super::ReplicationError;
use super::networked::{NetworkId, Networked};
use super::packets::{
    AttachComponent, CreateEntity, CreateExplicit, DestroyEntity, DetachComponent,
    ReplicationMessage, UpdateComponent,
};

pub struct ServerReplicator {
    components: Arc<ComponentRegistry>,
    templates: Arc<TemplateRegistry>,
    next_id: u64,
    bound: BTreeMap<NetworkId, Entity>,
}

impl ServerReplicator {
    pub fn new(components: Arc<ComponentRegistry>, templates: Arc<TemplateRegistry>) -> Self {
        Self {
            components,
            templates,
            next_id: 1,
            bound: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    pub fn entity(&self, network_id: NetworkId) -> Option<Entity> {
        self.bound.get(&network_id).copied()
    }

    pub fn network_id(&self, world: &World, entity: Entity) -> Option<NetworkId> {
        world.get::<Networked>(entity).map(Networked::network_id)
    }

    /// Starts replicating `entity`. The creation message goes out on the next
    /// [`tick`](Self::tick).
    pub fn mark_networked<I, S>(
        &mut self,
        world: &mut World,
        entity: Entity,
        tracked: I,
    ) -> Result<NetworkId, ReplicationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !world.contains(entity) {
            return Err(ReflectError::NoSuchEntity(entity).into());
        }
        if let Some(networked) = world.get::<Networked>(entity) {
            return Err(ReplicationError::AlreadyNetworked {
                entity,
                network_id: networked.network_id,
            });
        }

        let mut names: Vec<String> = Vec::new();
        for name in tracked {
            let name = name.into();
            self.components.lookup(&name)?;
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let network_id = NetworkId::new(self.next_id);
        self.next_id += 1;
        world.insert(entity, Networked::new(network_id, names));
        self.bound.insert(network_id, entity);
        log::debug!("{} is now replicated as {}", entity, network_id);
        Ok(network_id)
    }

    /// Networks a template-built entity with the components its template
    /// declares. Returns `None` for templates that declare none.
    pub fn network_template_entity(
        &mut self,
        world: &mut World,
        entity: Entity,
    ) -> Result<Option<NetworkId>, ReplicationError> {
        let Some(origin) = world.get::<TemplateOrigin>(entity) else {
            return Err(ReplicationError::NoTemplate(entity));
        };
        let tracked = self.templates.get(&origin.template)?.networked_components().to_vec();
        if tracked.is_empty() {
            return Ok(None);
        }
        self.mark_networked(world, entity, tracked).map(Some)
    }

    pub fn create_networked(
        &mut self,
        world: &mut World,
        name: &str,
        arguments: Document,
    ) -> Result<(Entity, Option<NetworkId>), ReplicationError> {
        let entity = self.templates.create(world, &self.components, name, arguments)?;
        let network_id = self.network_template_entity(world, entity)?;
        Ok((entity, network_id))
    }

    pub fn track(&mut self, world: &mut World, entity: Entity, name: &str) -> Result<(), ReplicationError> {
        self.components.lookup(name)?;
        let networked = world
            .get_mut::<Networked>(entity)
            .ok_or(ReplicationError::NotNetworked(entity))?;
        if !networked.tracked.iter().any(|tracked| tracked == name) {
            networked.tracked.push(name.to_string());
        }
        Ok(())
    }

    /// Diffs every networked entity against what was last sent. An entity
    /// that fails to diff is logged and skipped; it is retried next tick.
    pub fn tick(&mut self, world: &mut World) -> Vec<ReplicationMessage> {
        let mut out = Vec::new();
        let mut vanished = Vec::new();

        for (&network_id, &entity) in &self.bound {
            let Some(mut networked) = world.remove::<Networked>(entity) else {
                vanished.push(network_id);
                continue;
            };
            if let Err(e) = self.diff(world, entity, &mut networked, &mut out) {
                log::error!("Failed to replicate {} ({}): {}", network_id, entity, e);
            }
            world.insert(entity, networked);
        }

        for network_id in vanished {
            self.bound.remove(&network_id);
            log::debug!("{} vanished without despawn", network_id);
            out.push(ReplicationMessage::Destroy(DestroyEntity { network_id }));
        }
        out
    }

    pub fn despawn(&mut self, world: &mut World, entity: Entity) -> Option<ReplicationMessage> {
        let message = world.get::<Networked>(entity).and_then(|networked| {
            self.bound.remove(&networked.network_id);
            networked.announced.then(|| {
                ReplicationMessage::Destroy(DestroyEntity {
                    network_id: networked.network_id,
                })
            })
        });
        world.despawn(entity);
        message
    }

    /// Messages that bring a fresh client up to date.
    pub fn full_state(&self, world: &World) -> Result<Vec<ReplicationMessage>, ReplicationError> {
        let mut out = Vec::new();
        for &entity in self.bound.values() {
            let Some(networked) = world.get::<Networked>(entity) else {
                continue;
            };
            if !networked.announced {
                continue;
            }

            let network_id = networked.network_id;
            match self.creation(world, entity, networked)? {
                creation @ ReplicationMessage::Create(_) => {
                    out.push(creation);
                    for name in &networked.tracked {
                        match self.components.try_read(world, entity, name)? {
                            Some(document) => out.push(ReplicationMessage::Attach(AttachComponent {
                                network_id,
                                component: name.clone(),
                                document,
                            })),
                            None => out.push(ReplicationMessage::Detach(DetachComponent {
                                network_id,
                                component: name.clone(),
                            })),
                        }
                    }
                }
                creation => out.push(creation),
            }
        }
        Ok(out)
    }

    fn diff(
        &self,
        world: &World,
        entity: Entity,
        networked: &mut Networked,
        out: &mut Vec<ReplicationMessage>,
    ) -> Result<(), ReplicationError> {
        let network_id = networked.network_id;

        if !networked.announced {
            let creation = self.creation(world, entity, networked)?;
            if let ReplicationMessage::Create(create) = &creation {
                self.observe_template(networked, create)?;
            } else {
                for name in networked.tracked.clone() {
                    let hash = self.components.change_hash(world, entity, &name)?;
                    networked.observe(&name, hash);
                }
            }
            out.push(creation);
            networked.announced = true;
        }

        for name in networked.tracked.clone() {
            let present = self.components.has(world, entity, &name)?;
            match (networked.was_present(&name), present) {
                (false, false) => {}
                (false, true) => {
                    out.push(ReplicationMessage::Attach(AttachComponent {
                        network_id,
                        document: self.components.read(world, entity, &name)?,
                        component: name.clone(),
                    }));
                    networked.observe(&name, self.components.change_hash(world, entity, &name)?);
                }
                (true, false) => {
                    out.push(ReplicationMessage::Detach(DetachComponent {
                        network_id,
                        component: name.clone(),
                    }));
                    networked.observe(&name, None);
                }
                (true, true) => {
                    let hash = self.components.change_hash(world, entity, &name)?;
                    if hash != networked.last_hash.get(&name).copied() {
                        out.push(ReplicationMessage::Update(UpdateComponent {
                            network_id,
                            document: self.components.read(world, entity, &name)?,
                            component: name.clone(),
                        }));
                        networked.observe(&name, hash);
                    }
                }
            }
        }
        Ok(())
    }

    fn creation(
        &self,
        world: &World,
        entity: Entity,
        networked: &Networked,
    ) -> Result<ReplicationMessage, ReplicationError> {
        let network_id = networked.network_id;
        if let Some(origin) = world.get::<TemplateOrigin>(entity) {
            if self.templates.contains(&origin.template) {
                return Ok(ReplicationMessage::Create(CreateEntity {
                    network_id,
                    template: origin.template.clone(),
                    arguments: origin.arguments.clone(),
                }));
            }
            log::warn!(
                "{} was built by unknown template '{}', sending its components instead",
                network_id,
                origin.template
            );
        }

        let names = networked.tracked.iter().map(String::as_str);
        Ok(ReplicationMessage::CreateExplicit(CreateExplicit {
            network_id,
            components: self.components.snapshot_of(world, entity, names)?,
        }))
    }

    // Baseline is what a client holds right after replaying the template.
    fn observe_template(
        &self,
        networked: &mut Networked,
        create: &CreateEntity,
    ) -> Result<(), ReplicationError> {
        let mut scratch = World::new();
        let replica = scratch.spawn();
        self.templates.create_with_template(
            &mut scratch,
            &self.components,
            replica,
            &create.template,
            create.arguments.clone(),
        )?;
        for name in networked.tracked.clone() {
            let hash = self.components.change_hash(&scratch, replica, &name)?;
            networked.observe(&name, hash);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerReplicator")
            .field("next_id", &self.next_id)
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}
