//! Player avatars and their persisted form.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entities::thing::{set_boolean, set_integer, Thing};
use crate::error::PropertyError;
use crate::ids::{AccountId, EntityId};
use crate::quest::QuestState;
use crate::refs::Ref;
use crate::value::Value;

/// A pending quest offer awaiting accept/decline. At most one per avatar.
#[derive(Debug, Clone)]
pub struct Offer {
    pub quest: Ref,
    pub npc: EntityId,
}

/// A multi-second action in progress (gathering, casting). At most one per
/// avatar; the token lets completion callbacks detect cancellation.
#[derive(Debug, Clone)]
pub struct Activity {
    pub name: String,
    pub token: u64,
}

/// The in-world character bound to a player account.
///
/// Session binding and the pending-update buffer live in the engine's session
/// registry; this facet carries persisted state plus the transient offer and
/// activity slots, which are cleared on location change and disconnect.
#[derive(Debug, Clone)]
pub struct Avatar {
    pub thing: Thing,
    pub account: Option<AccountId>,
    pub level: i64,
    pub race: Option<Ref>,
    pub location: Option<EntityId>,
    pub inventory: Vec<EntityId>,
    pub capacity: usize,
    pub equipped: BTreeMap<String, EntityId>,
    pub active_quests: BTreeMap<Ref, QuestState>,
    pub completed_quests: BTreeMap<Ref, i64>,
    pub skills: BTreeMap<Ref, i64>,
    pub tutorials_on: bool,
    pub tutorials_seen: BTreeSet<String>,
    pub offer: Option<Offer>,
    pub activity: Option<Activity>,
}

impl Default for Avatar {
    fn default() -> Self {
        Self {
            thing: Thing::default(),
            account: None,
            level: 1,
            race: None,
            location: None,
            inventory: Vec::new(),
            capacity: 20,
            equipped: BTreeMap::new(),
            active_quests: BTreeMap::new(),
            completed_quests: BTreeMap::new(),
            skills: BTreeMap::new(),
            tutorials_on: true,
            tutorials_seen: BTreeSet::new(),
            offer: None,
            activity: None,
        }
    }
}

impl Avatar {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "level" => Some(Value::from(self.level)),
            "race" => Some(match &self.race {
                Some(r) => Value::Ref(r.clone()),
                None => Value::Nil,
            }),
            "inventory" => Some(Value::list(
                self.inventory.iter().map(|id| Value::Entity(*id)).collect(),
            )),
            "capacity" => Some(Value::from(self.capacity as i64)),
            "tutorials_on" => Some(Value::Boolean(self.tutorials_on)),
            _ => self.thing.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "level" => Some(set_integer(&mut self.level, value)),
            "race" => Some(match value {
                Value::Ref(r) => {
                    self.race = Some(r.clone());
                    Ok(())
                }
                Value::Race(r) => {
                    self.race = Some(r.race_ref().clone());
                    Ok(())
                }
                _ => Err(PropertyError::Expected("race")),
            }),
            "inventory" => Some(Err(PropertyError::ReadOnly)),
            "capacity" => Some(match value.as_integer() {
                Some(n) if n >= 0 => {
                    self.capacity = n as usize;
                    Ok(())
                }
                _ => Err(PropertyError::Expected("number")),
            }),
            "tutorials_on" => Some(set_boolean(&mut self.tutorials_on, value)),
            _ => self.thing.set(name, value),
        }
    }
}

/// An inventory or equipment entry as persisted: the item's prototype ref
/// plus the stacked count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub proto: Ref,
    pub count: i64,
}

/// The serde payload an avatar round-trips through the store.
///
/// Non-persisted state (session binding, pending updates, offer, activity)
/// is rebuilt on login. `tutorials_seen` and `completed_quests` are joined
/// from their own tables by the store rather than stored in the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvatarRecord {
    pub level: i64,
    pub location: Option<Ref>,
    pub race: Option<Ref>,
    pub inventory: Vec<ItemRecord>,
    pub equipped: BTreeMap<String, ItemRecord>,
    pub active_quests: BTreeMap<Ref, QuestState>,
    #[serde(skip)]
    pub completed_quests: BTreeMap<Ref, i64>,
    pub skills: BTreeMap<Ref, i64>,
    pub tutorials_on: bool,
    #[serde(skip)]
    pub tutorials_seen: BTreeSet<String>,
}
