use glam::Vec3;
use serde_json::json;

use replica::sandbox::{Coin, Health, Velocity, integrate};
use replica::{
    ComponentRegistry, Entity, NativeScripts, Networked, ReplicationMessage,
    ScriptSystem, ServerReplicator, TemplateError, TemplateOrigin, TemplateRegistry, World,
};

const ARENA_RADIUS: f32 = 20.0;
const MAX_COINS: usize = 24;

pub fn simulate_world(
    world: &mut World,
    replicator: &mut ServerReplicator,
    scripts: &mut NativeScripts,
    dt: f32,
) -> Vec<ReplicationMessage> {
    ScriptSystem::update(world, scripts, dt);
    integrate(world, dt);
    keep_in_arena(world);

    let mut messages = reap_slimes(world, replicator, scripts);
    messages.extend(trim_coins(world, replicator));
    messages
}

/// Coins slowly gain value while nobody picks them up.
pub fn appreciate_coins(world: &mut World) {
    for entity in world.with::<Coin>() {
        if let Some(coin) = world.get_mut::<Coin>(entity) {
            coin.value += 1;
        }
    }
}

pub fn spawn_slime(
    world: &mut World,
    components: &ComponentRegistry,
    templates: &TemplateRegistry,
) -> Result<Entity, TemplateError> {
    let entity = world.spawn();
    let hp = fastrand::i64(4..=12);
    let name = format!("slime-{}", world.tick());
    templates.create_persistent(
        world,
        components,
        entity,
        "Slime",
        json!({ "hp": hp, "name": name }),
    )?;
    world.set_position(entity, random_point());
    Ok(entity)
}

pub fn count_slimes(world: &World) -> usize {
    world.with::<Health>().len()
}

/// Starts replicating everything built from a template that is not yet
/// networked.
pub fn network_new_entities(world: &mut World, replicator: &mut ServerReplicator) -> usize {
    let mut marked = 0;
    for entity in world.with::<TemplateOrigin>() {
        if world.has::<Networked>(entity) {
            continue;
        }
        match replicator.network_template_entity(world, entity) {
            Ok(Some(_)) => marked += 1,
            Ok(None) => {}
            Err(e) => log::warn!("Failed to network {}: {}", entity, e),
        }
    }
    marked
}

fn keep_in_arena(world: &mut World) {
    for entity in world.with::<Velocity>() {
        let Some(position) = world.position(entity) else {
            continue;
        };
        if position.length() <= ARENA_RADIUS {
            continue;
        }
        if let Some(velocity) = world.get_mut::<Velocity>(entity) {
            velocity.linear = -position.normalize_or_zero();
        }
    }
}

fn reap_slimes(
    world: &mut World,
    replicator: &mut ServerReplicator,
    scripts: &mut NativeScripts,
) -> Vec<ReplicationMessage> {
    let mut messages = Vec::new();
    for entity in world.with::<Health>() {
        let dead = world.get::<Health>(entity).is_some_and(|health| health.hp <= 0);
        if !dead {
            continue;
        }
        ScriptSystem::destroy(world, scripts, entity);
        messages.extend(replicator.despawn(world, entity));
    }
    messages
}

fn trim_coins(world: &mut World, replicator: &mut ServerReplicator) -> Vec<ReplicationMessage> {
    let coins = world.with::<Coin>();
    let excess = coins.len().saturating_sub(MAX_COINS);
    coins
        .into_iter()
        .take(excess)
        .filter_map(|entity| replicator.despawn(world, entity))
        .collect()
}

fn random_point() -> Vec3 {
    let angle = fastrand::f32() * std::f32::consts::TAU;
    let radius = fastrand::f32() * ARENA_RADIUS * 0.5;
    Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
}

#[cfg(test)]
mod tests {
    use replica::sandbox;

    use super::*;

    #[test]
    fn test_dead_slime_becomes_coin() {
        let components = sandbox::components().unwrap();
        let templates = sandbox::templates().unwrap();
        let mut scripts = sandbox::scripts(components.clone(), templates.clone());
        let mut replicator = ServerReplicator::new(components.clone(), templates.clone());
        let mut world = World::new();

        let slime = spawn_slime(&mut world, &components, &templates).unwrap();
        assert_eq!(network_new_entities(&mut world, &mut replicator), 1);
        replicator.tick(&mut world);

        world.get_mut::<Health>(slime).unwrap().hp = 0;
        let messages = simulate_world(&mut world, &mut replicator, &mut scripts, 0.05);
        assert_eq!(messages.len(), 1);
        assert!(!world.contains(slime));
        assert_eq!(world.with::<Coin>().len(), 1);

        assert_eq!(network_new_entities(&mut world, &mut replicator), 1);
    }

    #[test]
    fn test_arena_turns_entities_around() {
        let mut world = World::new();
        let entity = world.spawn();
        world.set_position(entity, Vec3::new(ARENA_RADIUS * 2.0, 0.0, 0.0));
        world.insert(entity, Velocity { linear: Vec3::X, travelled: 0.0 });

        keep_in_arena(&mut world);
        assert_eq!(world.get::<Velocity>(entity).unwrap().linear, -Vec3::X);
    }
}
