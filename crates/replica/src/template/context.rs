use crate::document::{Document, empty_object};
use crate::reflect::ComponentRegistry;
use crate::world::{Entity, World};

use super::TemplateError;
use super::registry::TemplateRegistry;

const MAX_NESTING: usize = 16;

/// What a template constructor may touch: the world, components by name,
/// and other templates.
pub struct TemplateContext<'a> {
    world: &'a mut World,
    components: &'a ComponentRegistry,
    templates: &'a TemplateRegistry,
    save_data: Option<&'a mut Document>,
    scratch: Document,
    depth: usize,
}

impl<'a> TemplateContext<'a> {
    pub(super) fn new(
        world: &'a mut World,
        components: &'a ComponentRegistry,
        templates: &'a TemplateRegistry,
        save_data: Option<&'a mut Document>,
        depth: usize,
    ) -> Self {
        Self {
            world,
            components,
            templates,
            save_data,
            scratch: empty_object(),
            depth,
        }
    }

    pub fn world(&mut self) -> &mut World {
        self.world
    }

    pub fn components(&self) -> &ComponentRegistry {
        self.components
    }

    /// Data saved alongside the entity. Entities built outside a save game
    /// get an empty object that is dropped after construction.
    pub fn save_data(&mut self) -> &mut Document {
        match &mut self.save_data {
            Some(data) => &mut **data,
            None => &mut self.scratch,
        }
    }

    pub fn spawn(&mut self) -> Entity {
        self.world.spawn()
    }

    pub fn set_component(
        &mut self,
        entity: Entity,
        name: &str,
        document: Document,
    ) -> Result<(), TemplateError> {
        Ok(self.components.write(self.world, entity, name, document)?)
    }

    /// Sets every `name: document` pair of an object.
    pub fn set_components(&mut self, entity: Entity, components: &Document) -> Result<(), TemplateError> {
        let object = components.as_object().ok_or_else(|| {
            TemplateError::Construct("the components table must be an object".to_string())
        })?;
        for (name, document) in object {
            self.set_component(entity, name, document.clone())?;
        }
        Ok(())
    }

    pub fn get_component(&self, entity: Entity, name: &str) -> Result<Option<Document>, TemplateError> {
        Ok(self.components.try_read(self.world, entity, name)?)
    }

    pub fn remove_component(&mut self, entity: Entity, name: &str) -> Result<bool, TemplateError> {
        Ok(self.components.remove(self.world, entity, name)?)
    }

    /// Applies another template to `entity`, extending what this one builds.
    pub fn apply_template(
        &mut self,
        entity: Entity,
        name: &str,
        arguments: Document,
    ) -> Result<(), TemplateError> {
        if self.depth >= MAX_NESTING {
            return Err(TemplateError::Construct(format!(
                "template '{}' nested more than {} levels deep",
                name, MAX_NESTING
            )));
        }
        let save_data = match &mut self.save_data {
            Some(data) => &mut **data,
            None => &mut self.scratch,
        };
        self.templates.apply(
            self.world,
            self.components,
            entity,
            name,
            arguments,
            false,
            Some(save_data),
            self.depth + 1,
        )
    }
}
