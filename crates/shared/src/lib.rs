//! Thornvale wire protocol.
//!
//! Types exchanged over the WebSocket connection and the auth endpoints.
//! The engine sends [`UpdateBatch`] frames; the client sends plain text
//! commands, so there is no inbound message enum.
//!
//! ## Versioning policy
//!
//! - New update variants can be added at the end (forward compatible)
//! - Removing or renaming variants is a breaking change
//! - Field names are stable identifiers the client indexes on

pub mod auth;
pub mod updates;

pub use auth::UsernameResponse;
pub use updates::{
    ClientUpdate, EquipmentInfo, ItemInfo, MapCell, NeighborInfo, QuestInfo, SkillInfo,
    UpdateBatch,
};
