use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, empty_object, merge_over};
use crate::reflect::ComponentRegistry;
use crate::template::{STABLE_ID_ARGUMENT, TemplateRegistry};
use crate::world::{Entity, World};

use super::{PersistenceError, PersistenceMode, Persistent, generate_stable_id};

/// One saved entity, keyed by stable id in [`SaveGame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, Document>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    pub mode: PersistenceMode,
    /// The entity was destroyed and must not come back.
    #[serde(default)]
    pub consumed: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    records: BTreeMap<String, PersistentRecord>,
    #[serde(default)]
    data: BTreeMap<String, Document>,
    #[serde(skip)]
    temporary: BTreeMap<String, Document>,
}

impl SaveGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, stable_id: &str) -> Option<&PersistentRecord> {
        self.records.get(stable_id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &PersistentRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn is_consumed(&self, stable_id: &str) -> bool {
        self.records.get(stable_id).is_some_and(|record| record.consumed)
    }

    /// Free-form data kept for an entity. Temporary data lives until the
    /// process exits and is never written to disk.
    pub fn data_for(&mut self, stable_id: &str, temporary: bool) -> &mut Document {
        let store = if temporary {
            &mut self.temporary
        } else {
            &mut self.data
        };
        store.entry(stable_id.to_string()).or_insert_with(empty_object)
    }

    pub fn data(&self, stable_id: &str) -> Option<&Document> {
        self.data
            .get(stable_id)
            .or_else(|| self.temporary.get(stable_id))
    }

    /// Records every entity carrying [`Persistent`]. Records whose entity is
    /// gone are kept for respawn when flagged `REVIVE` and consumed otherwise.
    /// Returns the number of live entities captured.
    pub fn capture(
        &mut self,
        world: &mut World,
        components: &ComponentRegistry,
    ) -> Result<usize, PersistenceError> {
        let mut seen = HashSet::new();

        for entity in world.with::<Persistent>() {
            let stable_id = assign_stable_id(world, entity);
            let Some(persistent) = world.get::<Persistent>(entity) else {
                continue;
            };
            let record = capture_record(world, components, entity, persistent)?;
            self.records.insert(stable_id.clone(), record);
            seen.insert(stable_id);
        }

        for (stable_id, record) in &mut self.records {
            if seen.contains(stable_id) || record.consumed {
                continue;
            }
            if !record.mode.contains(PersistenceMode::REVIVE) {
                log::debug!("Persistent entity '{}' is gone, marking consumed", stable_id);
                record.consumed = true;
            }
        }

        log::info!("Captured {} persistent entities", seen.len());
        Ok(seen.len())
    }

    /// Spawns every record that is not consumed and has no live entity yet.
    pub fn restore(
        &mut self,
        world: &mut World,
        components: &ComponentRegistry,
        templates: &TemplateRegistry,
    ) -> Result<Vec<(String, Entity)>, PersistenceError> {
        let live: HashSet<String> = world
            .with::<Persistent>()
            .into_iter()
            .filter_map(|entity| world.get::<Persistent>(entity)?.stable_id.clone())
            .collect();

        let mut restored = Vec::new();
        for (stable_id, record) in &self.records {
            if record.consumed || live.contains(stable_id) {
                continue;
            }
            let entity = world.spawn();
            let mut data = self.data.remove(stable_id).unwrap_or_else(empty_object);
            let result =
                restore_record(world, components, templates, entity, stable_id, record, &mut data);
            if data.as_object().is_none_or(|object| !object.is_empty()) {
                self.data.insert(stable_id.clone(), data);
            }
            result?;
            restored.push((stable_id.clone(), entity));
        }

        log::info!("Restored {} persistent entities", restored.len());
        Ok(restored)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        log::debug!("Wrote {} records to {}", self.records.len(), path.display());
        Ok(())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Loads `path`, or starts empty when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        match Self::load_from(path) {
            Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }
}

fn assign_stable_id(world: &mut World, entity: Entity) -> String {
    let Some(persistent) = world.get_mut::<Persistent>(entity) else {
        return String::new();
    };
    if let Some(stable_id) = &persistent.stable_id {
        return stable_id.clone();
    }
    let stable_id = generate_stable_id(persistent.template.as_deref().unwrap_or("entity"));
    persistent.stable_id = Some(stable_id.clone());
    stable_id
}

fn capture_record(
    world: &World,
    components: &ComponentRegistry,
    entity: Entity,
    persistent: &Persistent,
) -> Result<PersistentRecord, PersistenceError> {
    let mode = persistent.mode;
    let mut record = PersistentRecord {
        template: None,
        arguments: None,
        components: None,
        position: None,
        mode,
        consumed: false,
    };

    if mode.contains(PersistenceMode::ALL_COMPONENTS) {
        record.components = Some(components.snapshot(world, entity)?);
    } else {
        if mode.contains(PersistenceMode::TEMPLATE) {
            record.template = persistent.template.clone();
        }
        if mode.contains(PersistenceMode::ARGS) {
            record.arguments = Some(persistent.arguments.clone());
        }
        if !persistent.save_components.is_empty() {
            let names = persistent.save_components.iter().map(String::as_str);
            record.components = Some(components.snapshot_of(world, entity, names)?);
        }
    }
    if mode.contains(PersistenceMode::POSITION) {
        record.position = world.position(entity);
    }
    Ok(record)
}

fn restore_record(
    world: &mut World,
    components: &ComponentRegistry,
    templates: &TemplateRegistry,
    entity: Entity,
    stable_id: &str,
    record: &PersistentRecord,
    data: &mut Document,
) -> Result<(), PersistenceError> {
    match &record.template {
        Some(template) => {
            let arguments = merge_over(
                record.arguments.as_ref().unwrap_or(&Value::Null),
                &serde_json::json!({ STABLE_ID_ARGUMENT: stable_id }),
            );
            templates.create_persistent_with_data(
                world, components, entity, template, arguments, data,
            )?;
        }
        None => {
            world.insert(
                entity,
                Persistent {
                    stable_id: Some(stable_id.to_string()),
                    template: None,
                    arguments: record.arguments.clone().unwrap_or(Value::Null),
                    mode: record.mode,
                    save_components: Vec::new(),
                },
            );
        }
    }

    if let Some(persistent) = world.get_mut::<Persistent>(entity) {
        persistent.mode = record.mode;
    }
    if let Some(snapshot) = &record.components {
        components.write_all(world, entity, snapshot)?;
    }
    if let Some(position) = record.position {
        world.set_position(entity, position);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::template::FnTemplate;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Health {
        hp: i64,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Label {
        text: String,
    }

    fn registries() -> (std::sync::Arc<ComponentRegistry>, std::sync::Arc<TemplateRegistry>) {
        let mut components = ComponentRegistry::builder();
        components.register_component::<Health>("Health").unwrap();
        components.register_component::<Label>("Label").unwrap();

        let mut templates = TemplateRegistry::builder();
        templates
            .register(
                FnTemplate::new("Slime", |ctx, entity, args| {
                    ctx.set_component(entity, "Health", json!({ "hp": args["hp"] }))?;
                    ctx.set_component(entity, "Label", json!({ "text": args["name"] }))
                })
                .defaults(json!({"hp": 10, "name": "slime"})),
            )
            .unwrap();
        templates
            .register(
                FnTemplate::new("Totem", |ctx, entity, _| {
                    ctx.set_component(entity, "Label", json!({"text": "totem"}))
                })
                .persistence(PersistenceMode::default() | PersistenceMode::REVIVE),
            )
            .unwrap();
        templates
            .register(FnTemplate::new("Chest", |ctx, entity, _| {
                let data = ctx.save_data();
                let opened = data.get("opened").and_then(Value::as_bool).unwrap_or(false);
                if opened {
                    let visits = data.get("visits").and_then(Value::as_i64).unwrap_or(0);
                    data["visits"] = json!(visits + 1);
                }
                let text = if opened { "open" } else { "closed" };
                ctx.set_component(entity, "Label", json!({ "text": text }))
            }))
            .unwrap();
        (components.build(), templates.build())
    }

    #[test]
    fn test_capture_template_record() {
        let (components, templates) = registries();
        let mut world = World::new();
        let slime = world.spawn();
        templates
            .create_persistent(&mut world, &components, slime, "Slime", json!({"hp": 3}))
            .unwrap();
        world.set_position(slime, Vec3::new(1.0, 2.0, 3.0));

        let mut save = SaveGame::new();
        assert_eq!(save.capture(&mut world, &components).unwrap(), 1);

        let (_, record) = save.records().next().unwrap();
        assert_eq!(record.template.as_deref(), Some("Slime"));
        assert_eq!(record.arguments, Some(json!({"hp": 3, "name": "slime"})));
        assert_eq!(record.position, Some(Vec3::new(1.0, 2.0, 3.0)));
        assert!(record.components.is_none());
    }

    #[test]
    fn test_lazy_stable_id() {
        let (components, _) = registries();
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(
            entity,
            Persistent {
                stable_id: None,
                template: None,
                arguments: Value::Null,
                mode: PersistenceMode::ALL_COMPONENTS,
                save_components: Vec::new(),
            },
        );
        components.write(&mut world, entity, "Label", json!({"text": "sign"})).unwrap();

        let mut save = SaveGame::new();
        save.capture(&mut world, &components).unwrap();

        let stable_id = world.get::<Persistent>(entity).unwrap().stable_id.clone().unwrap();
        assert!(stable_id.starts_with("entity_"));
        let record = save.record(&stable_id).unwrap();
        assert_eq!(
            record.components.as_ref().unwrap()["Label"],
            json!({"text": "sign"})
        );
    }

    #[test]
    fn test_explicit_restore() {
        let (components, templates) = registries();
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Persistent::explicit("sign"));
        components.write(&mut world, entity, "Label", json!({"text": "hello"})).unwrap();

        let mut save = SaveGame::new();
        save.capture(&mut world, &components).unwrap();

        let mut fresh = World::new();
        let restored = save.restore(&mut fresh, &components, &templates).unwrap();
        assert_eq!(restored.len(), 1);
        let (stable_id, entity) = &restored[0];
        assert_eq!(stable_id, "sign");
        assert_eq!(
            components.read(&fresh, *entity, "Label").unwrap(),
            json!({"text": "hello"})
        );
        assert_eq!(
            fresh.get::<Persistent>(*entity).unwrap().stable_id.as_deref(),
            Some("sign")
        );
    }

    #[test]
    fn test_consumed_and_revived() {
        let (components, templates) = registries();
        let mut world = World::new();
        let slime = world.spawn();
        templates
            .create_persistent(
                &mut world,
                &components,
                slime,
                "Slime",
                json!({ STABLE_ID_ARGUMENT: "slime" }),
            )
            .unwrap();
        let totem = world.spawn();
        templates
            .create_persistent(
                &mut world,
                &components,
                totem,
                "Totem",
                json!({ STABLE_ID_ARGUMENT: "totem" }),
            )
            .unwrap();

        let mut save = SaveGame::new();
        save.capture(&mut world, &components).unwrap();

        world.despawn(slime);
        world.despawn(totem);
        save.capture(&mut world, &components).unwrap();
        assert!(save.is_consumed("slime"));
        assert!(!save.is_consumed("totem"));

        let restored = save.restore(&mut world, &components, &templates).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].0, "totem");

        // already live, nothing to do
        assert!(save.restore(&mut world, &components, &templates).unwrap().is_empty());
    }

    #[test]
    fn test_data_for() {
        let mut save = SaveGame::new();
        save.data_for("chest", false)["opened"] = json!(true);
        save.data_for("spark", true)["age"] = json!(3);
        assert_eq!(save.data("chest"), Some(&json!({"opened": true})));
        assert_eq!(save.data("spark"), Some(&json!({"age": 3})));
        assert!(save.data("door").is_none());

        let text = serde_json::to_string(&save).unwrap();
        let reloaded: SaveGame = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded.data("chest"), Some(&json!({"opened": true})));
        assert!(reloaded.data("spark").is_none());
    }

    #[test]
    fn test_constructor_reads_save_data() {
        let (components, templates) = registries();
        let mut world = World::new();
        let chest = world.spawn();
        templates
            .create_persistent(
                &mut world,
                &components,
                chest,
                "Chest",
                json!({ STABLE_ID_ARGUMENT: "chest" }),
            )
            .unwrap();
        assert_eq!(
            components.read(&world, chest, "Label").unwrap(),
            json!({"text": "closed"})
        );

        let mut save = SaveGame::new();
        save.capture(&mut world, &components).unwrap();
        save.data_for("chest", false)["opened"] = json!(true);

        let mut fresh = World::new();
        let restored = save.restore(&mut fresh, &components, &templates).unwrap();
        assert_eq!(
            components.read(&fresh, restored[0].1, "Label").unwrap(),
            json!({"text": "open"})
        );
        assert_eq!(save.data("chest"), Some(&json!({"opened": true, "visits": 1})));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(SaveGame::load_or_default(&path).unwrap().is_empty());
        assert!(matches!(
            SaveGame::load_from(&path),
            Err(PersistenceError::Io(_))
        ));
    }
}
