mod entity;

use std::any::{Any, TypeId};
use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

pub use entity::Entity;

/// Anything storable on an entity.
pub trait Component: Send + 'static {}

impl<T: Send + 'static> Component for T {}

/// Engine-level position, read and restored by persistence.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position(pub Vec3);

type ComponentMap = HashMap<TypeId, Box<dyn Any + Send>>;

#[derive(Default)]
struct Slot {
    generation: u32,
    components: Option<ComponentMap>,
}

/// Entity registry owned by the simulation thread.
#[derive(Default)]
pub struct World {
    tick: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
    alive: usize,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn spawn(&mut self) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.components = Some(HashMap::new());
            return Entity::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            components: Some(HashMap::new()),
        });
        Entity::new(index, 0)
    }

    pub fn despawn(&mut self, entity: Entity) -> bool {
        let Some(slot) = self.slot_mut(entity) else {
            return false;
        };
        slot.components = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index());
        self.alive -= 1;
        true
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.components(entity).is_some()
    }

    pub fn len(&self) -> usize {
        self.alive
    }

    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.components
                .as_ref()
                .map(|_| Entity::new(index as u32, slot.generation))
        })
    }

    /// Entities carrying a `T`, in index order.
    pub fn with<T: Component>(&self) -> Vec<Entity> {
        self.entities().filter(|&e| self.has::<T>(e)).collect()
    }

    /// Attaches or replaces `component`. Returns false when the entity is dead.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> bool {
        match self.components_mut(entity) {
            Some(components) => {
                components.insert(TypeId::of::<T>(), Box::new(component));
                true
            }
            None => {
                log::debug!("Ignoring insert on dead entity {}", entity);
                false
            }
        }
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.components(entity)?
            .get(&TypeId::of::<T>())?
            .downcast_ref::<T>()
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.components_mut(entity)?
            .get_mut(&TypeId::of::<T>())?
            .downcast_mut::<T>()
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let boxed = self.components_mut(entity)?.remove(&TypeId::of::<T>())?;
        boxed.downcast::<T>().ok().map(|component| *component)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.components(entity)
            .is_some_and(|components| components.contains_key(&TypeId::of::<T>()))
    }

    pub fn position(&self, entity: Entity) -> Option<Vec3> {
        self.get::<Position>(entity).map(|p| p.0)
    }

    pub fn set_position(&mut self, entity: Entity, position: Vec3) -> bool {
        self.insert(entity, Position(position))
    }

    fn slot_mut(&mut self, entity: Entity) -> Option<&mut Slot> {
        self.slots
            .get_mut(entity.index() as usize)
            .filter(|slot| slot.generation == entity.generation() && slot.components.is_some())
    }

    fn components(&self, entity: Entity) -> Option<&ComponentMap> {
        let slot = self.slots.get(entity.index() as usize)?;
        if slot.generation != entity.generation() {
            return None;
        }
        slot.components.as_ref()
    }

    fn components_mut(&mut self, entity: Entity) -> Option<&mut ComponentMap> {
        self.slot_mut(entity)?.components.as_mut()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("alive", &self.alive)
            .finish()
    }
}
