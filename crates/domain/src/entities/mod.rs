//! Entity subkind facets.
//!
//! Subkinds are polymorphic by capability: a single [`crate::Entity`] carries
//! one of these facet structs in its `kind` sum. Facets compose by value
//! (a `Weapon` embeds an `Equipment` embeds an `Item` embeds a `Thing`), and
//! typed property dispatch walks the same composition.

mod creature;
mod item;
mod location;
mod portal;
pub(crate) mod thing;

pub use creature::{Creature, Fixture, ResourceNode};
pub use item::{Equipment, Item, Weapon};
pub use location::Location;
pub use portal::{Direction, Portal};
pub use thing::Thing;
