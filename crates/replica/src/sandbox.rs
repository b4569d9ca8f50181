//! Small content set shared by the server, the client and the tests.

use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::net::{PacketRegistry, RegistryError};
use crate::persistence::PersistenceMode;
use crate::reflect::{ComponentRegistry, ReflectError, Volatile};
use crate::replication::register_packets;
use crate::script::{Callable, NativeScripts, ScriptError, ScriptHooks};
use crate::template::{FnTemplate, TemplateError, TemplateRegistry, argument};
use crate::world::{Position, World};

/// Every replicable sandbox component.
pub const TRACKED: [&str; 5] = ["Coin", "Health", "Label", "Position", "Velocity"];

pub const WANDER: &str = "slime.wander";
pub const DROP_COIN: &str = "slime.drop_coin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub value: i64,
}

impl Default for Coin {
    fn default() -> Self {
        Self { value: 1 }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub hp: i64,
    pub max: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: Vec3,
    /// Distance covered so far. Local bookkeeping, not replicated.
    #[serde(skip)]
    pub travelled: f32,
}

impl Volatile for Velocity {
    fn keep_volatile(&mut self, previous: &Self) {
        self.travelled = previous.travelled;
    }
}

pub fn components() -> Result<Arc<ComponentRegistry>, ReflectError> {
    let mut builder = ComponentRegistry::builder();
    builder
        .register_component::<Coin>("Coin")?
        .register_component::<Health>("Health")?
        .register_component::<Label>("Label")?
        .register_component::<Position>("Position")?
        .register_volatile_component::<Velocity>("Velocity")?;
    Ok(builder.build())
}

pub fn templates() -> Result<Arc<TemplateRegistry>, TemplateError> {
    let mut builder = TemplateRegistry::builder();
    builder
        .register(
            FnTemplate::new("Coin", |ctx, entity, args| {
                let value: i64 = argument(args, "value")?;
                ctx.set_component(entity, "Coin", json!({ "value": value }))
            })
            .description("A pickup worth `value`.")
            .defaults(json!({"value": 1}))
            .networked(["Coin", "Position"]),
        )?
        .register(
            FnTemplate::new("Slime", |ctx, entity, args| {
                let hp: i64 = argument(args, "hp")?;
                let name: String = argument(args, "name")?;
                ctx.set_component(entity, "Health", json!({ "hp": hp, "max": hp }))?;
                ctx.set_component(entity, "Label", json!({ "text": name }))?;
                ctx.set_component(entity, "Velocity", json!({}))?;
                ctx.world().insert(
                    entity,
                    ScriptHooks::new()
                        .with_update(Callable::new(WANDER), 0.5, true)
                        .with_on_destroy(Callable::new(DROP_COIN)),
                );
                Ok(())
            })
            .description("Wanders around and slowly dissolves.")
            .defaults(json!({"hp": 10, "name": "slime"}))
            .persistence(PersistenceMode::default())
            .save_components(["Health"])
            .networked(["Health", "Label", "Position", "Velocity"]),
        )?;
    Ok(builder.build())
}

pub fn packets() -> Result<Arc<PacketRegistry>, RegistryError> {
    let mut builder = PacketRegistry::builder();
    register_packets(&mut builder)?;
    Ok(builder.build())
}

/// Native implementations of the sandbox script functions.
pub fn scripts(components: Arc<ComponentRegistry>, templates: Arc<TemplateRegistry>) -> NativeScripts {
    let mut scripts = NativeScripts::new();
    scripts.define(WANDER, |world, entity, _| {
        let heading = Vec3::new(fastrand::f32() * 2.0 - 1.0, 0.0, fastrand::f32() * 2.0 - 1.0);
        if let Some(velocity) = world.get_mut::<Velocity>(entity) {
            velocity.linear = heading.normalize_or_zero();
        }
        if let Some(health) = world.get_mut::<Health>(entity) {
            health.hp -= 1;
        }
        Ok(())
    });
    scripts.define(DROP_COIN, move |world, entity, _| {
        let position = world.position(entity).unwrap_or_default();
        let value = world.get::<Health>(entity).map_or(1, |health| health.max.max(1));
        let coin = templates
            .create(world, &components, "Coin", json!({ "value": value }))
            .map_err(|e| ScriptError::Failed {
                callable: DROP_COIN.to_string(),
                reason: e.to_string(),
            })?;
        world.set_position(coin, position);
        Ok(())
    });
    scripts
}

/// Moves every entity that has both a velocity and a position.
pub fn integrate(world: &mut World, dt: f32) {
    for entity in world.with::<Velocity>() {
        let Some(velocity) = world.get::<Velocity>(entity).map(|v| v.linear) else {
            continue;
        };
        if velocity == Vec3::ZERO {
            continue;
        }
        if let Some(position) = world.position(entity) {
            world.set_position(entity, position + velocity * dt);
        }
        if let Some(velocity) = world.get_mut::<Velocity>(entity) {
            velocity.travelled += (velocity.linear * dt).length();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::script::ScriptSystem;

    #[test]
    fn test_coin_template() {
        let components = components().unwrap();
        let templates = templates().unwrap();
        let mut world = World::new();

        let coin = templates.create(&mut world, &components, "Coin", json!({})).unwrap();
        assert_eq!(components.read(&world, coin, "Coin").unwrap(), json!({"value": 1}));
    }

    #[test]
    fn test_slime_template() {
        let components = components().unwrap();
        let templates = templates().unwrap();
        let mut world = World::new();

        let slime = templates.create(&mut world, &components, "Slime", Value::Null).unwrap();
        assert_eq!(
            components.read(&world, slime, "Health").unwrap(),
            json!({"hp": 10, "max": 10})
        );
        assert_eq!(components.read(&world, slime, "Label").unwrap(), json!({"text": "slime"}));
        assert!(world.has::<ScriptHooks>(slime));
    }

    #[test]
    fn test_slime_drops_coin() {
        let components = components().unwrap();
        let templates = templates().unwrap();
        let mut scripts = scripts(Arc::clone(&components), Arc::clone(&templates));
        let mut world = World::new();

        let slime = templates
            .create(&mut world, &components, "Slime", json!({"hp": 4}))
            .unwrap();
        world.set_position(slime, Vec3::new(2.0, 0.0, 1.0));

        assert!(ScriptSystem::destroy(&mut world, &mut scripts, slime));
        world.despawn(slime);

        let coins = world.with::<Coin>();
        assert_eq!(coins.len(), 1);
        assert_eq!(world.get::<Coin>(coins[0]), Some(&Coin { value: 4 }));
        assert_eq!(world.position(coins[0]), Some(Vec3::new(2.0, 0.0, 1.0)));
    }

    #[test]
    fn test_integrate() {
        let mut world = World::new();
        let entity = world.spawn();
        world.set_position(entity, Vec3::ZERO);
        world.insert(entity, Velocity { linear: Vec3::X, travelled: 0.0 });

        integrate(&mut world, 0.5);
        assert_eq!(world.position(entity), Some(Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(world.get::<Velocity>(entity).unwrap().travelled, 0.5);
    }

    #[test]
    fn test_replicated_velocity_keeps_distance() {
        let components = components().unwrap();
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Velocity { linear: Vec3::X, travelled: 3.0 });

        components
            .write(&mut world, entity, "Velocity", json!({"linear": [0.0, 0.0, 1.0]}))
            .unwrap();
        assert_eq!(
            world.get::<Velocity>(entity),
            Some(&Velocity { linear: Vec3::Z, travelled: 3.0 })
        );
    }

    #[test]
    fn test_templates_declare_replicated_components() {
        let templates = templates().unwrap();
        assert_eq!(templates.get("Coin").unwrap().networked_components(), ["Coin", "Position"]);
        assert!(
            templates
                .get("Slime")
                .unwrap()
                .networked_components()
                .iter()
                .all(|name| TRACKED.contains(&name.as_str()))
        );
    }
}
