use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::document::Document;
use crate::world::{Component, Entity, World};

pub type ReadFn = fn(&World, Entity) -> Option<Result<Document, serde_json::Error>>;
pub type WriteFn = fn(&mut World, Entity, Document) -> Result<(), serde_json::Error>;
pub type HasFn = fn(&World, Entity) -> bool;
pub type RemoveFn = fn(&mut World, Entity) -> bool;
pub type HashFn = fn(&World, Entity) -> Option<u64>;
pub type DefaultFn = fn() -> Result<Document, serde_json::Error>;

/// Components carrying `#[serde(skip)]` state that a write must not reset.
pub trait Volatile {
    /// Copies the skipped fields of `previous` into the freshly written value.
    fn keep_volatile(&mut self, previous: &Self);
}

/// Type-erased operations for one component type, keyed by a stable name.
#[derive(Clone)]
pub struct ComponentDescriptor {
    name: String,
    read: ReadFn,
    write: WriteFn,
    has: HasFn,
    remove: RemoveFn,
    change_hash: HashFn,
    default_document: DefaultFn,
}

impl ComponentDescriptor {
    /// Descriptor backed by the serde representation of `T`. Fields marked
    /// `#[serde(skip)]` are neither transmitted nor hashed.
    pub fn of<T>(name: impl Into<String>) -> Self
    where
        T: Component + Serialize + DeserializeOwned + Default,
    {
        Self {
            name: name.into(),
            read: read_component::<T>,
            write: write_component::<T>,
            has: has_component::<T>,
            remove: remove_component::<T>,
            change_hash: hash_component::<T>,
            default_document: default_component::<T>,
        }
    }

    /// Like [`of`](Self::of), but writes over a live component keep its
    /// volatile fields.
    pub fn of_volatile<T>(name: impl Into<String>) -> Self
    where
        T: Component + Serialize + DeserializeOwned + Default + Volatile,
    {
        Self {
            write: write_volatile::<T>,
            ..Self::of::<T>(name)
        }
    }

    pub fn with_change_hash(mut self, change_hash: HashFn) -> Self {
        self.change_hash = change_hash;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn read(&self, world: &World, entity: Entity) -> Option<Result<Document, serde_json::Error>> {
        (self.read)(world, entity)
    }

    pub(crate) fn write(&self, world: &mut World, entity: Entity, document: Document) -> Result<(), serde_json::Error> {
        (self.write)(world, entity, document)
    }

    pub(crate) fn has(&self, world: &World, entity: Entity) -> bool {
        (self.has)(world, entity)
    }

    pub(crate) fn remove(&self, world: &mut World, entity: Entity) -> bool {
        (self.remove)(world, entity)
    }

    pub(crate) fn change_hash(&self, world: &World, entity: Entity) -> Option<u64> {
        (self.change_hash)(world, entity)
    }

    pub(crate) fn default_document(&self) -> Result<Document, serde_json::Error> {
        (self.default_document)()
    }
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// FNV-1a over the JSON encoding of `value`. Map-typed fields must iterate
/// in a stable order (BTreeMap) for the hash to be stable.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> u64 {
    match serde_json::to_vec(value) {
        Ok(bytes) => const_fnv1a_hash::fnv1a_hash_64(&bytes, None),
        Err(e) => {
            log::warn!("Could not fingerprint component: {}", e);
            0
        }
    }
}

fn read_component<T: Component + Serialize>(
    world: &World,
    entity: Entity,
) -> Option<Result<Document, serde_json::Error>> {
    world.get::<T>(entity).map(serde_json::to_value)
}

fn write_component<T: Component + DeserializeOwned>(
    world: &mut World,
    entity: Entity,
    document: Document,
) -> Result<(), serde_json::Error> {
    let component: T = serde_json::from_value(document)?;
    world.insert(entity, component);
    Ok(())
}

fn write_volatile<T: Component + DeserializeOwned + Volatile>(
    world: &mut World,
    entity: Entity,
    document: Document,
) -> Result<(), serde_json::Error> {
    let mut component: T = serde_json::from_value(document)?;
    if let Some(previous) = world.get::<T>(entity) {
        component.keep_volatile(previous);
    }
    world.insert(entity, component);
    Ok(())
}

fn has_component<T: Component>(world: &World, entity: Entity) -> bool {
    world.has::<T>(entity)
}

fn remove_component<T: Component>(world: &mut World, entity: Entity) -> bool {
    world.remove::<T>(entity).is_some()
}

fn hash_component<T: Component + Serialize>(world: &World, entity: Entity) -> Option<u64> {
    world.get::<T>(entity).map(fingerprint)
}

fn default_component<T: Serialize + Default>() -> Result<Document, serde_json::Error> {
    serde_json::to_value(T::default())
}
