//! Thornvale domain model.
//!
//! This crate contains the pure data model of the world: identifiers and
//! refs, the script `Value` union, the bytecode representation produced by
//! the compiler, and the prototype-chained entity graph with its subkinds.
//!
//! Nothing here performs I/O; the engine crate owns execution, dispatch,
//! persistence, and transport.

pub mod avatar;
pub mod bytecode;
pub mod entities;
pub mod entity;
pub mod error;
pub mod ids;
pub mod quest;
pub mod race;
pub mod refs;
pub mod region;
pub mod skill;
pub mod value;

pub use avatar::{Activity, Avatar, AvatarRecord, ItemRecord, Offer};
pub use bytecode::{CodeBlock, Constant, Constraint, Format, Op, Param, ScriptFunction};
pub use entities::{
    Creature, Direction, Equipment, Fixture, Item, Location, Portal, ResourceNode, Thing, Weapon,
};
pub use entity::{Entity, EntityKind, EventHandler, EventPhase};
pub use error::PropertyError;
pub use ids::{AccountId, EntityId};
pub use quest::{Quest, QuestPhase, QuestState};
pub use race::Race;
pub use refs::Ref;
pub use region::Region;
pub use skill::Skill;
pub use value::{Function, FutureValue, NativeFunction, Value};
