//! Typed identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a live entity, unique within the process lifetime.
///
/// Ids are assigned monotonically starting at 1; zero is never a valid id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a player account, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Allocates entity ids, starting at 1.
#[derive(Debug, Default)]
pub struct EntityIdAllocator {
    next: i64,
}

impl EntityIdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn allocate(&mut self) -> EntityId {
        self.next += 1;
        EntityId(self.next)
    }
}
