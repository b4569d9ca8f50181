use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::document::{Document, kind_name, merge_over};
use crate::world::{Entity, World};

use super::descriptor::ComponentDescriptor;
use super::error::ReflectError;

struct Registered {
    descriptor: ComponentDescriptor,
    default_document: Document,
    fields: Option<BTreeSet<String>>,
}

/// Write phase of the component registry. Consumed by [`build`](Self::build).
#[derive(Default)]
pub struct ComponentRegistryBuilder {
    entries: Vec<Registered>,
    by_name: HashMap<String, usize>,
}

impl ComponentRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ComponentDescriptor) -> Result<&mut Self, ReflectError> {
        let name = descriptor.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ReflectError::DuplicateName(name));
        }

        let default_document = descriptor
            .default_document()
            .map_err(|e| ReflectError::serialize(&name, e))?;
        let fields = default_document
            .as_object()
            .map(|object| object.keys().cloned().collect());

        self.by_name.insert(name, self.entries.len());
        self.entries.push(Registered {
            descriptor,
            default_document,
            fields,
        });
        Ok(self)
    }

    pub fn register_component<T>(&mut self, name: &str) -> Result<&mut Self, ReflectError>
    where
        T: crate::world::Component + serde::Serialize + serde::de::DeserializeOwned + Default,
    {
        self.register(ComponentDescriptor::of::<T>(name))
    }

    pub fn register_volatile_component<T>(&mut self, name: &str) -> Result<&mut Self, ReflectError>
    where
        T: crate::world::Component
            + serde::Serialize
            + serde::de::DeserializeOwned
            + Default
            + super::descriptor::Volatile,
    {
        self.register(ComponentDescriptor::of_volatile::<T>(name))
    }

    pub fn build(self) -> Arc<ComponentRegistry> {
        log::debug!("Component registry sealed with {} types", self.entries.len());
        Arc::new(ComponentRegistry {
            entries: self.entries,
            by_name: self.by_name,
        })
    }
}

/// Read-only phase of the component registry, shared across the process.
pub struct ComponentRegistry {
    entries: Vec<Registered>,
    by_name: HashMap<String, usize>,
}

impl ComponentRegistry {
    pub fn builder() -> ComponentRegistryBuilder {
        ComponentRegistryBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Result<&ComponentDescriptor, ReflectError> {
        self.entry(name).map(|entry| &entry.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.descriptor.name())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, world: &World, entity: Entity, name: &str) -> Result<bool, ReflectError> {
        Ok(self.entry(name)?.descriptor.has(world, entity))
    }

    pub fn try_read(
        &self,
        world: &World,
        entity: Entity,
        name: &str,
    ) -> Result<Option<Document>, ReflectError> {
        let entry = self.entry(name)?;
        entry
            .descriptor
            .read(world, entity)
            .transpose()
            .map_err(|e| ReflectError::serialize(name, e))
    }

    pub fn read(&self, world: &World, entity: Entity, name: &str) -> Result<Document, ReflectError> {
        if !world.contains(entity) {
            return Err(ReflectError::NoSuchEntity(entity));
        }
        self.try_read(world, entity, name)?
            .ok_or_else(|| ReflectError::MissingComponent {
                component: name.to_string(),
                entity,
            })
    }

    /// Writes `document` over the current state of the component, attaching
    /// it from its default first when absent. Object-shaped components only
    /// accept objects whose keys are declared fields.
    pub fn write(
        &self,
        world: &mut World,
        entity: Entity,
        name: &str,
        document: Document,
    ) -> Result<(), ReflectError> {
        let entry = self.entry(name)?;
        if !world.contains(entity) {
            return Err(ReflectError::NoSuchEntity(entity));
        }

        let merged = match &entry.fields {
            Some(fields) => {
                let object = document.as_object().ok_or_else(|| {
                    ReflectError::schema(
                        name,
                        format!("expected an object, got {}", kind_name(&document)),
                    )
                })?;
                if let Some(unknown) = object.keys().find(|key| !fields.contains(*key)) {
                    return Err(ReflectError::schema(name, format!("unknown field '{}'", unknown)));
                }

                let current = match entry.descriptor.read(world, entity) {
                    Some(current) => current.map_err(|e| ReflectError::serialize(name, e))?,
                    None => entry.default_document.clone(),
                };
                merge_over(&current, &document)
            }
            None => document,
        };

        entry
            .descriptor
            .write(world, entity, merged)
            .map_err(|e| ReflectError::schema(name, e))
    }

    pub fn change_hash(
        &self,
        world: &World,
        entity: Entity,
        name: &str,
    ) -> Result<Option<u64>, ReflectError> {
        Ok(self.entry(name)?.descriptor.change_hash(world, entity))
    }

    pub fn default_document(&self, name: &str) -> Result<Document, ReflectError> {
        Ok(self.entry(name)?.default_document.clone())
    }

    /// Removes the component. Returns whether it was present.
    pub fn remove(&self, world: &mut World, entity: Entity, name: &str) -> Result<bool, ReflectError> {
        Ok(self.entry(name)?.descriptor.remove(world, entity))
    }

    /// Every registered component present on `entity`, by name.
    pub fn snapshot(
        &self,
        world: &World,
        entity: Entity,
    ) -> Result<BTreeMap<String, Document>, ReflectError> {
        let mut snapshot = BTreeMap::new();
        for entry in &self.entries {
            if let Some(document) = entry.descriptor.read(world, entity) {
                let name = entry.descriptor.name();
                let document = document.map_err(|e| ReflectError::serialize(name, e))?;
                snapshot.insert(name.to_string(), document);
            }
        }
        Ok(snapshot)
    }

    /// Like [`snapshot`](Self::snapshot) but restricted to `names`.
    pub fn snapshot_of<'a>(
        &self,
        world: &World,
        entity: Entity,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<BTreeMap<String, Document>, ReflectError> {
        let mut snapshot = BTreeMap::new();
        for name in names {
            if let Some(document) = self.try_read(world, entity, name)? {
                snapshot.insert(name.to_string(), document);
            }
        }
        Ok(snapshot)
    }

    /// Writes every entry of a snapshot, stopping at the first failure.
    pub fn write_all(
        &self,
        world: &mut World,
        entity: Entity,
        snapshot: &BTreeMap<String, Document>,
    ) -> Result<(), ReflectError> {
        for (name, document) in snapshot {
            self.write(world, entity, name, document.clone())?;
        }
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<&Registered, ReflectError> {
        self.by_name
            .get(name)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| ReflectError::UnknownComponent(name.to_string()))
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
