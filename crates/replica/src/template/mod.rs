mod context;
mod registry;

use serde::de::DeserializeOwned;

use crate::document::{Document, empty_object};
use crate::persistence::PersistenceMode;
use crate::reflect::ReflectError;
use crate::world::Entity;

pub use context::TemplateContext;
pub use registry::{TemplateRegistry, TemplateRegistryBuilder};

/// Argument key whose string value becomes the persistent stable id.
pub const STABLE_ID_ARGUMENT: &str = "saveGameEntityID";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("entity template '{0}' does not exist")]
    UnknownTemplate(String),
    #[error("entity template '{0}' is already registered")]
    DuplicateTemplate(String),
    #[error("arguments for template '{template}' must be an object, got {kind}")]
    InvalidArguments { template: String, kind: &'static str },
    #[error("argument '{key}': {reason}")]
    Argument { key: String, reason: String },
    #[error("{0}")]
    Construct(String),
    #[error(transparent)]
    Reflect(#[from] ReflectError),
}

/// Deterministic entity construction procedure. Given the same arguments,
/// every peer must end up with structurally equal component state, since
/// replication transmits only the template name and its arguments.
pub trait Template: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn default_arguments(&self) -> Document {
        empty_object()
    }

    fn persistence(&self) -> PersistenceMode {
        PersistenceMode::default()
    }

    /// Components captured in addition to template replay when saved.
    fn save_components(&self) -> &[String] {
        &[]
    }

    /// Components replicated when an entity built by this template is
    /// networked. Empty means the template's entities stay local.
    fn networked_components(&self) -> &[String] {
        &[]
    }

    fn construct(
        &self,
        ctx: &mut TemplateContext<'_>,
        entity: Entity,
        arguments: &Document,
    ) -> Result<(), TemplateError>;
}

/// Which template built an entity and with what (merged) arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOrigin {
    pub template: String,
    pub arguments: Document,
}

type ConstructFn = Box<
    dyn Fn(&mut TemplateContext<'_>, Entity, &Document) -> Result<(), TemplateError> + Send + Sync,
>;

/// Closure-backed [`Template`].
pub struct FnTemplate {
    name: String,
    description: String,
    defaults: Document,
    persistence: PersistenceMode,
    save_components: Vec<String>,
    networked: Vec<String>,
    construct: ConstructFn,
}

impl FnTemplate {
    pub fn new<F>(name: impl Into<String>, construct: F) -> Self
    where
        F: Fn(&mut TemplateContext<'_>, Entity, &Document) -> Result<(), TemplateError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            defaults: empty_object(),
            persistence: PersistenceMode::default(),
            save_components: Vec::new(),
            networked: Vec::new(),
            construct: Box::new(construct),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn defaults(mut self, defaults: Document) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn persistence(mut self, mode: PersistenceMode) -> Self {
        self.persistence = mode;
        self
    }

    pub fn save_components<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.save_components = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn networked<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.networked = names.into_iter().map(Into::into).collect();
        self
    }
}

impl Template for FnTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn default_arguments(&self) -> Document {
        self.defaults.clone()
    }

    fn persistence(&self) -> PersistenceMode {
        self.persistence
    }

    fn save_components(&self) -> &[String] {
        &self.save_components
    }

    fn networked_components(&self) -> &[String] {
        &self.networked
    }

    fn construct(
        &self,
        ctx: &mut TemplateContext<'_>,
        entity: Entity,
        arguments: &Document,
    ) -> Result<(), TemplateError> {
        (self.construct)(ctx, entity, arguments)
    }
}

/// Reads and deserializes one argument.
pub fn argument<T: DeserializeOwned>(arguments: &Document, key: &str) -> Result<T, TemplateError> {
    let value = arguments.get(key).ok_or_else(|| TemplateError::Argument {
        key: key.to_string(),
        reason: "missing".to_string(),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| TemplateError::Argument {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
