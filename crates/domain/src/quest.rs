//! Quests and per-avatar quest state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::refs::Ref;
use crate::value::Value;

/// A named stage of a quest, with its own members.
#[derive(Debug, Clone)]
pub struct QuestPhase {
    pub name: String,
    pub members: HashMap<String, Value>,
}

impl QuestPhase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }
}

/// A quest definition: an ordered list of phases plus quest-level members.
/// Immutable after world load.
#[derive(Debug, Clone)]
pub struct Quest {
    quest_ref: Ref,
    pub members: HashMap<String, Value>,
    pub phases: Vec<Arc<QuestPhase>>,
}

impl Quest {
    pub fn new(quest_ref: Ref) -> Self {
        Self {
            quest_ref,
            members: HashMap::new(),
            phases: Vec::new(),
        }
    }

    pub fn quest_ref(&self) -> &Ref {
        &self.quest_ref
    }

    pub fn phase(&self, name: &str) -> Option<&Arc<QuestPhase>> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn first_phase(&self) -> Option<&Arc<QuestPhase>> {
        self.phases.first()
    }

    /// The phase after `name`, or `None` when `name` is last or unknown.
    pub fn phase_after(&self, name: &str) -> Option<&Arc<QuestPhase>> {
        let i = self.phases.iter().position(|p| p.name == name)?;
        self.phases.get(i + 1)
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    /// Display name, falling back to the ref's trailing segment.
    pub fn display_name(&self) -> String {
        match self.members.get("name").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => self.quest_ref.name().replace('_', " "),
        }
    }

    /// Minimum avatar level to accept the quest, if authored.
    pub fn required_level(&self) -> i64 {
        self.members
            .get("level")
            .and_then(Value::as_integer)
            .unwrap_or(1)
    }
}

/// An avatar's progress through one quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestState {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
}

impl QuestState {
    pub fn at_phase(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            progress: None,
        }
    }
}
