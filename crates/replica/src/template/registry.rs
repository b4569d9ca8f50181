use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{Document, empty_object, kind_name, merge_over};
use crate::persistence::{Persistent, generate_stable_id};
use crate::reflect::{ComponentRegistry, ReflectError};
use crate::world::{Entity, World};

use super::context::TemplateContext;
use super::{STABLE_ID_ARGUMENT, Template, TemplateError, TemplateOrigin};

#[derive(Default)]
pub struct TemplateRegistryBuilder {
    templates: Vec<Box<dyn Template>>,
    by_name: HashMap<String, usize>,
}

impl TemplateRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: impl Template + 'static) -> Result<&mut Self, TemplateError> {
        let name = template.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(TemplateError::DuplicateTemplate(name));
        }
        self.by_name.insert(name, self.templates.len());
        self.templates.push(Box::new(template));
        Ok(self)
    }

    pub fn build(self) -> Arc<TemplateRegistry> {
        log::debug!("Template registry sealed with {} templates", self.templates.len());
        Arc::new(TemplateRegistry {
            templates: self.templates,
            by_name: self.by_name,
        })
    }
}

pub struct TemplateRegistry {
    templates: Vec<Box<dyn Template>>,
    by_name: HashMap<String, usize>,
}

impl TemplateRegistry {
    pub fn builder() -> TemplateRegistryBuilder {
        TemplateRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Result<&dyn Template, TemplateError> {
        self.by_name
            .get(name)
            .map(|&index| self.templates[index].as_ref())
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|template| template.name())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Builds `entity` from template `name`. `arguments` are merged over the
    /// template's defaults. A failing constructor is logged and leaves the
    /// entity as far as it got.
    pub fn create_with_template(
        &self,
        world: &mut World,
        components: &ComponentRegistry,
        entity: Entity,
        name: &str,
        arguments: Document,
    ) -> Result<(), TemplateError> {
        self.apply(world, components, entity, name, arguments, false, None, 0)
    }

    /// Same as [`create_with_template`](Self::create_with_template), and
    /// also attaches a [`Persistent`] record so the entity is saved.
    pub fn create_persistent(
        &self,
        world: &mut World,
        components: &ComponentRegistry,
        entity: Entity,
        name: &str,
        arguments: Document,
    ) -> Result<(), TemplateError> {
        self.apply(world, components, entity, name, arguments, true, None, 0)
    }

    /// Persistent creation whose constructor sees `save_data` through
    /// [`TemplateContext::save_data`].
    pub fn create_persistent_with_data(
        &self,
        world: &mut World,
        components: &ComponentRegistry,
        entity: Entity,
        name: &str,
        arguments: Document,
        save_data: &mut Document,
    ) -> Result<(), TemplateError> {
        self.apply(world, components, entity, name, arguments, true, Some(save_data), 0)
    }

    /// Spawns a fresh entity and builds it from template `name`.
    pub fn create(
        &self,
        world: &mut World,
        components: &ComponentRegistry,
        name: &str,
        arguments: Document,
    ) -> Result<Entity, TemplateError> {
        self.get(name)?;
        let entity = world.spawn();
        self.create_with_template(world, components, entity, name, arguments)?;
        Ok(entity)
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn apply(
        &self,
        world: &mut World,
        components: &ComponentRegistry,
        entity: Entity,
        name: &str,
        arguments: Document,
        persistent: bool,
        save_data: Option<&mut Document>,
        depth: usize,
    ) -> Result<(), TemplateError> {
        let template = self.get(name)?;
        if !world.contains(entity) {
            return Err(ReflectError::NoSuchEntity(entity).into());
        }

        let arguments = match arguments {
            Value::Null => empty_object(),
            Value::Object(_) => arguments,
            other => {
                return Err(TemplateError::InvalidArguments {
                    template: name.to_string(),
                    kind: kind_name(&other),
                });
            }
        };
        let merged = merge_over(&template.default_arguments(), &arguments);

        if depth == 0 {
            world.insert(
                entity,
                TemplateOrigin {
                    template: name.to_string(),
                    arguments: merged.clone(),
                },
            );
        }
        if persistent {
            let stable_id = merged
                .get(STABLE_ID_ARGUMENT)
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| world.get::<Persistent>(entity).and_then(|p| p.stable_id.clone()))
                .unwrap_or_else(|| generate_stable_id(name));
            world.insert(
                entity,
                Persistent {
                    stable_id: Some(stable_id),
                    template: Some(name.to_string()),
                    arguments: merged.clone(),
                    mode: template.persistence(),
                    save_components: template.save_components().to_vec(),
                },
            );
        }

        let mut ctx = TemplateContext::new(world, components, self, save_data, depth);
        match template.construct(&mut ctx, entity, &merged) {
            Ok(()) => Ok(()),
            Err(e) if depth > 0 => Err(e),
            Err(e) => {
                log::error!("Template '{}' failed while building {}: {}", name, entity, e);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::persistence::STABLE_ID_SUFFIX_LEN;
    use crate::template::{FnTemplate, argument};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Health {
        hp: i64,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Label {
        text: String,
    }

    fn setup() -> (Arc<ComponentRegistry>, Arc<TemplateRegistry>) {
        let mut components = ComponentRegistry::builder();
        components.register_component::<Health>("Health").unwrap();
        components.register_component::<Label>("Label").unwrap();

        let mut templates = TemplateRegistry::builder();
        templates
            .register(
                FnTemplate::new("Named", |ctx, entity, args| {
                    let name: String = argument(args, "name")?;
                    ctx.set_component(entity, "Label", json!({ "text": name }))
                })
                .defaults(json!({"name": "nobody"})),
            )
            .unwrap();
        templates
            .register(
                FnTemplate::new("Slime", |ctx, entity, args| {
                    ctx.apply_template(entity, "Named", json!({ "name": args["name"] }))?;
                    ctx.set_component(entity, "Health", json!({ "hp": args["hp"] }))
                })
                .defaults(json!({"hp": 10, "name": "slime"})),
            )
            .unwrap();
        templates
            .register(FnTemplate::new("Broken", |ctx, entity, _| {
                ctx.set_component(entity, "Health", json!({"hp": 1}))?;
                Err(TemplateError::Construct("boom".to_string()))
            }))
            .unwrap();

        (components.build(), templates.build())
    }

    #[test]
    fn test_duplicate_template() {
        let mut templates = TemplateRegistry::builder();
        templates.register(FnTemplate::new("A", |_, _, _| Ok(()))).unwrap();
        assert!(matches!(
            templates.register(FnTemplate::new("A", |_, _, _| Ok(()))),
            Err(TemplateError::DuplicateTemplate(name)) if name == "A"
        ));
    }

    #[test]
    fn test_defaults_and_overrides() {
        let (components, templates) = setup();
        let mut world = World::new();

        let slime = templates.create(&mut world, &components, "Slime", Value::Null).unwrap();
        assert_eq!(components.read(&world, slime, "Health").unwrap(), json!({"hp": 10}));
        assert_eq!(components.read(&world, slime, "Label").unwrap(), json!({"text": "slime"}));

        let boss = templates
            .create(&mut world, &components, "Slime", json!({"hp": 99}))
            .unwrap();
        assert_eq!(components.read(&world, boss, "Health").unwrap(), json!({"hp": 99}));
        assert_eq!(components.read(&world, boss, "Label").unwrap(), json!({"text": "slime"}));

        let origin = world.get::<TemplateOrigin>(boss).unwrap();
        assert_eq!(origin.template, "Slime");
        assert_eq!(origin.arguments, json!({"hp": 99, "name": "slime"}));
    }

    #[test]
    fn test_unknown_template_and_bad_arguments() {
        let (components, templates) = setup();
        let mut world = World::new();

        assert!(matches!(
            templates.create(&mut world, &components, "Dragon", Value::Null),
            Err(TemplateError::UnknownTemplate(name)) if name == "Dragon"
        ));
        assert!(world.is_empty());

        let entity = world.spawn();
        assert!(matches!(
            templates.create_with_template(&mut world, &components, entity, "Slime", json!([1])),
            Err(TemplateError::InvalidArguments { kind: "array", .. })
        ));
    }

    #[test]
    fn test_constructor_failure_keeps_partial_state() {
        let (components, templates) = setup();
        let mut world = World::new();

        let entity = templates.create(&mut world, &components, "Broken", Value::Null).unwrap();
        assert_eq!(components.read(&world, entity, "Health").unwrap(), json!({"hp": 1}));
    }

    #[test]
    fn test_persistent_stable_ids() {
        let (components, templates) = setup();
        let mut world = World::new();

        let named = world.spawn();
        templates
            .create_persistent(
                &mut world,
                &components,
                named,
                "Slime",
                json!({ STABLE_ID_ARGUMENT: "slime_king" }),
            )
            .unwrap();
        let record = world.get::<Persistent>(named).unwrap();
        assert_eq!(record.stable_id.as_deref(), Some("slime_king"));
        assert_eq!(record.template.as_deref(), Some("Slime"));

        let generated = world.spawn();
        templates
            .create_persistent(&mut world, &components, generated, "Slime", Value::Null)
            .unwrap();
        let stable_id = world
            .get::<Persistent>(generated)
            .and_then(|p| p.stable_id.clone())
            .unwrap();
        let suffix = stable_id.strip_prefix("Slime_").unwrap();
        assert_eq!(suffix.len(), STABLE_ID_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
