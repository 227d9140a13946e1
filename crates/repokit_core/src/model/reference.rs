//! Explicit two-state many-to-one reference.
//!
//! A reference starts `Unloaded` when decoded from storage and becomes
//! `Loaded` only through `UnitOfWork::resolve`/`load_batch`. Nothing is
//! fetched implicitly on access.

use crate::model::entity::{Entity, EntityId};

#[derive(Debug, Clone)]
pub enum Reference<T> {
    Unloaded(EntityId),
    Loaded(T),
}

impl<T: Entity> Reference<T> {
    pub fn to(entity: &T) -> Self {
        Self::Loaded(entity.clone())
    }

    /// Target id. `None` only for a loaded entity that was never saved.
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Unloaded(id) => Some(id.clone()),
            Self::Loaded(entity) => entity.id(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Loaded(entity) => Some(entity),
            Self::Unloaded(_) => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Loaded target that has not been saved yet, so there is no key to store.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Loaded(entity) if entity.id().is_none())
    }
}

/// References compare by target identity, regardless of load state.
impl<T: Entity> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T: Entity> Eq for Reference<T> {}
