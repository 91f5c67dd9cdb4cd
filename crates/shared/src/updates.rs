//! Client update frames.
//!
//! Avatar mutations enqueue [`ClientUpdate`] values; the engine coalesces the
//! buffer into one [`UpdateBatch`] JSON frame per tick.

use serde::{Deserialize, Serialize};

/// One WebSocket text frame: `{"updates":[...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub updates: Vec<ClientUpdate>,
}

/// A visible entity in the avatar's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborInfo {
    /// Entity id; stable for the entity's lifetime.
    pub key: i64,
    pub brief: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// An inventory stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    pub key: i64,
    pub brief: String,
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// An equipped item keyed by slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentInfo {
    pub slot: String,
    pub brief: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A skill row: the skill's ref string plus the avatar's rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInfo {
    pub key: String,
    pub name: String,
    pub rank: i64,
    pub max_rank: i64,
}

/// A quest journal row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestInfo {
    pub key: String,
    pub name: String,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
}

/// One cell of the region map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapCell {
    pub key: i64,
    pub name: String,
    pub exits: Vec<String>,
    #[serde(default)]
    pub here: bool,
}

/// The discriminated union of updates the client renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientUpdate {
    // Neighbors pane
    SetNeighbors { neighbors: Vec<NeighborInfo> },
    UpdateNeighbor { neighbor: NeighborInfo },
    RemoveNeighbor { key: i64 },

    // Equipment pane
    SetEquipment { equipment: Vec<EquipmentInfo> },
    Equip { item: EquipmentInfo },
    Unequip { slot: String },

    // Inventory pane
    SetItems { items: Vec<ItemInfo> },
    UpdateItem { item: ItemInfo },
    RemoveItem { key: i64 },

    // Skills pane
    SetSkills { skills: Vec<SkillInfo> },
    UpdateSkill { skill: SkillInfo },
    RemoveSkill { key: String },

    // Attributes pane
    SetAttributes { attributes: Vec<(String, f64)> },
    UpdateAttribute { name: String, value: f64 },

    // Quest journal
    SetQuests { quests: Vec<QuestInfo> },
    UpdateQuest { quest: QuestInfo },
    RemoveQuest { key: String },

    // Main text pane
    ShowText { text: String },
    ShowNotice { text: String },
    ShowTutorial { text: String },
    ShowError { text: String },
    ShowSay { speaker: String, text: String },
    ShowList { heading: String, items: Vec<String> },
    ShowLinks { heading: String, links: Vec<String> },
    ShowLocation {
        name: String,
        description: String,
        exits: Vec<String>,
        contents: Vec<NeighborInfo>,
    },

    // Activity casting bar
    StartCast { name: String, seconds: f64 },
    StopCast,

    // Map pane
    SetMap { region: String, cells: Vec<MapCell> },
    UpdateMap { cell: MapCell },

    // Avatar header fields
    SetName { name: String },
    SetLevel { level: i64 },
    SetRace { race: String },
}
