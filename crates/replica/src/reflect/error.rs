use crate::world::Entity;

#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    #[error("component type '{0}' is already registered")]
    DuplicateName(String),
    #[error("component type '{0}' does not exist")]
    UnknownComponent(String),
    #[error("document does not fit component '{component}': {reason}")]
    SchemaMismatch { component: String, reason: String },
    #[error("entity {0} does not exist")]
    NoSuchEntity(Entity),
    #[error("entity {entity} has no '{component}' component")]
    MissingComponent { component: String, entity: Entity },
    #[error("failed to serialize component '{component}': {source}")]
    Serialize {
        component: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ReflectError {
    pub(crate) fn schema(component: &str, reason: impl ToString) -> Self {
        Self::SchemaMismatch {
            component: component.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn serialize(component: &str, source: serde_json::Error) -> Self {
        Self::Serialize {
            component: component.to_string(),
            source,
        }
    }
}
