mod save;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::reflect::ReflectError;
use crate::template::TemplateError;

pub use save::{PersistentRecord, SaveGame};

pub(crate) const STABLE_ID_SUFFIX_LEN: usize = 24;

bitflags! {
    /// What gets written for a persistent entity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PersistenceMode: u8 {
        const TEMPLATE = 1 << 0;
        const ARGS = 1 << 1;
        const POSITION = 1 << 2;
        /// Snapshot every registered component instead of replaying the template.
        const ALL_COMPONENTS = 1 << 3;
        /// Respawn on load even after the entity was destroyed.
        const REVIVE = 1 << 4;
    }
}

impl Default for PersistenceMode {
    fn default() -> Self {
        Self::TEMPLATE | Self::ARGS | Self::POSITION
    }
}

/// Marks an entity for inclusion in save games.
#[derive(Debug, Clone, PartialEq)]
pub struct Persistent {
    /// Assigned lazily on the first capture when `None`.
    pub stable_id: Option<String>,
    pub template: Option<String>,
    pub arguments: Document,
    pub mode: PersistenceMode,
    pub save_components: Vec<String>,
}

impl Persistent {
    /// A record for an entity that was not built from a template.
    pub fn explicit(stable_id: impl Into<String>) -> Self {
        Self {
            stable_id: Some(stable_id.into()),
            template: None,
            arguments: Document::Null,
            mode: PersistenceMode::ALL_COMPONENTS | PersistenceMode::POSITION,
            save_components: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("save file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("save file is not valid: {0}")]
    Format(#[from] serde_json::Error),
    #[error(transparent)]
    Reflect(#[from] ReflectError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub(crate) fn generate_stable_id(prefix: &str) -> String {
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(STABLE_ID_SUFFIX_LEN)
        .collect();
    format!("{}_{}", prefix, suffix)
}
