//! Hooks through which script code drives entities. The scripting language
//! lives behind [`ScriptHost`]; this module only schedules the calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::document::Document;
use crate::world::{Entity, World};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Callable(String);

impl Callable {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script function '{0}' is not defined")]
    Undefined(String),
    #[error("script function '{callable}' failed: {reason}")]
    Failed { callable: String, reason: String },
}

pub trait ScriptHost {
    fn call(
        &mut self,
        world: &mut World,
        callable: &Callable,
        entity: Entity,
        arguments: Document,
    ) -> Result<(), ScriptError>;
}

#[derive(Debug, Clone, Default)]
pub struct ScriptHooks {
    pub update: Option<Callable>,
    /// Seconds between update calls. Zero calls every tick.
    pub update_frequency: f32,
    accumulator: f32,
    pub on_destroy: Option<Callable>,
}

impl ScriptHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// With `random_phase` the first call lands anywhere within one period,
    /// so entities spawned together do not all update on the same tick.
    pub fn with_update(mut self, callable: Callable, frequency: f32, random_phase: bool) -> Self {
        self.update = Some(callable);
        self.update_frequency = frequency.max(0.0);
        self.accumulator = if random_phase {
            fastrand::f32() * self.update_frequency
        } else {
            0.0
        };
        self
    }

    pub fn with_on_destroy(mut self, callable: Callable) -> Self {
        self.on_destroy = Some(callable);
        self
    }
}

pub struct ScriptSystem;

impl ScriptSystem {
    /// Returns the number of successful calls.
    pub fn update(world: &mut World, host: &mut dyn ScriptHost, dt: f32) -> usize {
        let mut calls = 0;
        for entity in world.with::<ScriptHooks>() {
            let due = match world.get_mut::<ScriptHooks>(entity) {
                Some(hooks) => hooks.update.clone().and_then(|callable| {
                    hooks.accumulator += dt;
                    if hooks.accumulator < hooks.update_frequency {
                        return None;
                    }
                    let elapsed = hooks.accumulator;
                    hooks.accumulator = 0.0;
                    Some((callable, elapsed))
                }),
                None => None,
            };

            let Some((callable, elapsed)) = due else {
                continue;
            };
            match host.call(world, &callable, entity, json!({ "dt": elapsed })) {
                Ok(()) => calls += 1,
                Err(e) => log::error!("Update hook of {} failed: {}", entity, e),
            }
        }
        calls
    }

    /// Runs the on-destroy hook of `entity`, if any. The caller despawns.
    pub fn destroy(world: &mut World, host: &mut dyn ScriptHost, entity: Entity) -> bool {
        let Some(callable) = world
            .get::<ScriptHooks>(entity)
            .and_then(|hooks| hooks.on_destroy.clone())
        else {
            return false;
        };
        match host.call(world, &callable, entity, Document::Null) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Destroy hook of {} failed: {}", entity, e);
                false
            }
        }
    }
}

type NativeFn = Box<dyn FnMut(&mut World, Entity, &Document) -> Result<(), ScriptError> + Send>;

#[derive(Default)]
pub struct NativeScripts {
    functions: HashMap<String, NativeFn>,
}

impl NativeScripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define<F>(&mut self, name: impl Into<String>, function: F) -> Callable
    where
        F: FnMut(&mut World, Entity, &Document) -> Result<(), ScriptError> + Send + 'static,
    {
        let name = name.into();
        self.functions.insert(name.clone(), Box::new(function));
        Callable(name)
    }
}

impl ScriptHost for NativeScripts {
    fn call(
        &mut self,
        world: &mut World,
        callable: &Callable,
        entity: Entity,
        arguments: Document,
    ) -> Result<(), ScriptError> {
        let function = self
            .functions
            .get_mut(callable.name())
            .ok_or_else(|| ScriptError::Undefined(callable.name().to_string()))?;
        function(world, entity, &arguments)
    }
}
