//! Building the client's view: location panes, inventory rows, speech.

use thornvale_domain::bytecode::{Article, Format};
use thornvale_domain::ids::EntityId;
use thornvale_domain::refs::Ref;
use thornvale_shared::{ClientUpdate, EquipmentInfo, ItemInfo, NeighborInfo, QuestInfo, SkillInfo};

use super::World;

const CAPITAL_DEFINITE: Format = Format {
    article: Article::Definite,
    capitalize: true,
};

impl World {
    pub fn neighbor_info(&self, id: EntityId) -> NeighborInfo {
        let entity = self.entity(id);
        NeighborInfo {
            key: id.0,
            brief: entity
                .and_then(|e| e.brief())
                .unwrap_or("something")
                .to_string(),
            icon: self
                .lookup_member(id, "icon")
                .and_then(|v| v.as_str().map(str::to_string)),
        }
    }

    pub fn item_info(&self, id: EntityId) -> ItemInfo {
        let count = self
            .entity(id)
            .and_then(|e| e.kind.item())
            .map_or(1, |i| i.count);
        ItemInfo {
            key: id.0,
            brief: self
                .entity(id)
                .and_then(|e| e.brief())
                .unwrap_or("something")
                .to_string(),
            count,
            icon: self
                .lookup_member(id, "icon")
                .and_then(|v| v.as_str().map(str::to_string)),
        }
    }

    pub fn equipment_info(&self, slot: &str, id: EntityId) -> EquipmentInfo {
        EquipmentInfo {
            slot: slot.to_string(),
            brief: self
                .entity(id)
                .and_then(|e| e.brief())
                .unwrap_or("something")
                .to_string(),
            icon: self
                .lookup_member(id, "icon")
                .and_then(|v| v.as_str().map(str::to_string)),
        }
    }

    pub fn skill_info(&self, skill_ref: &Ref, rank: i64) -> SkillInfo {
        let (name, max_rank) = match self.skill(skill_ref) {
            Some(s) => (s.display_name(), s.max_rank()),
            None => (skill_ref.name().replace('_', " "), 100),
        };
        SkillInfo {
            key: skill_ref.to_string(),
            name,
            rank,
            max_rank,
        }
    }

    pub fn quest_info(&self, quest_ref: &Ref, phase: &str, progress: Option<i64>) -> QuestInfo {
        let name = match self.quest(quest_ref) {
            Some(q) => q.display_name(),
            None => quest_ref.name().replace('_', " "),
        };
        QuestInfo {
            key: quest_ref.to_string(),
            name,
            phase: phase.to_string(),
            progress,
        }
    }

    /// The avatars present in a location (for speech and neighbor updates).
    pub fn avatars_in(&self, location: EntityId) -> Vec<EntityId> {
        match self.entity(location).and_then(|e| e.as_location()) {
            Some(l) => l
                .contents
                .iter()
                .copied()
                .filter(|id| self.entity(*id).is_some_and(|e| e.is_avatar()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Everything in the location the avatar can refer to: contents (minus
    /// the avatar itself) then exits.
    pub fn visible_to(&self, avatar: EntityId) -> Vec<EntityId> {
        let Some(location) = self.location_of(avatar) else {
            return Vec::new();
        };
        let Some(loc) = self.entity(location).and_then(|e| e.as_location()) else {
            return Vec::new();
        };
        loc.contents
            .iter()
            .chain(loc.exits.iter())
            .copied()
            .filter(|id| *id != avatar)
            .collect()
    }

    /// The location pane: name, description, exit directions, and neighbors.
    pub fn location_view(&self, avatar: EntityId, location: EntityId) -> ClientUpdate {
        let loc = self.entity(location).and_then(|e| e.as_location());
        let name = loc
            .and_then(|l| l.thing.brief.clone())
            .unwrap_or_else(|| "Nowhere".to_string());
        let description = loc
            .and_then(|l| l.thing.description.clone())
            .unwrap_or_default();
        let exits = loc
            .map(|l| {
                l.exits
                    .iter()
                    .filter_map(|id| self.entity(*id).and_then(|e| e.as_portal()))
                    .filter_map(|p| p.direction.map(|d| d.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let contents = loc
            .map(|l| {
                l.contents
                    .iter()
                    .copied()
                    .filter(|id| *id != avatar)
                    .map(|id| self.neighbor_info(id))
                    .collect()
            })
            .unwrap_or_default();
        ClientUpdate::ShowLocation {
            name,
            description,
            exits,
            contents,
        }
    }

    pub fn show_location(&mut self, avatar: EntityId) {
        if let Some(location) = self.location_of(avatar) {
            let view = self.location_view(avatar, location);
            self.push_update(avatar, view);
        }
    }

    /// Re-send the whole UI state; used at login and reconnect.
    pub fn push_full_state(&mut self, avatar_id: EntityId) {
        let Some(avatar) = self.entity(avatar_id).and_then(|e| e.as_avatar()) else {
            return;
        };
        let name = avatar.thing.brief.clone().unwrap_or_default();
        let level = avatar.level;
        let race = avatar
            .race
            .as_ref()
            .map(|r| r.name().replace('_', " "))
            .unwrap_or_default();
        let items: Vec<ItemInfo> = avatar
            .inventory
            .clone()
            .iter()
            .map(|id| self.item_info(*id))
            .collect();
        let equipment: Vec<EquipmentInfo> = avatar
            .equipped
            .iter()
            .map(|(slot, id)| self.equipment_info(slot, *id))
            .collect();
        let skills: Vec<SkillInfo> = avatar
            .skills
            .iter()
            .map(|(r, rank)| self.skill_info(r, *rank))
            .collect();
        let quests: Vec<QuestInfo> = avatar
            .active_quests
            .iter()
            .map(|(r, state)| self.quest_info(r, &state.phase, state.progress))
            .collect();

        self.push_update(avatar_id, ClientUpdate::SetName { name });
        self.push_update(avatar_id, ClientUpdate::SetLevel { level });
        self.push_update(avatar_id, ClientUpdate::SetRace { race });
        self.push_update(avatar_id, ClientUpdate::SetItems { items });
        self.push_update(avatar_id, ClientUpdate::SetEquipment { equipment });
        self.push_update(avatar_id, ClientUpdate::SetSkills { skills });
        self.push_update(avatar_id, ClientUpdate::SetQuests { quests });
        self.show_location(avatar_id);
    }

    /// An actor speaks aloud; everyone else present hears it.
    pub fn say(&mut self, actor: EntityId, text: &str) {
        let Some(location) = self.location_of(actor) else {
            return;
        };
        let speaker = self.describe_entity(actor, CAPITAL_DEFINITE);
        for listener in self.avatars_in(location) {
            if listener == actor {
                self.show(actor, format!("You say, \"{text}\""));
            } else {
                self.push_update(
                    listener,
                    ClientUpdate::ShowSay {
                        speaker: speaker.clone(),
                        text: text.to_string(),
                    },
                );
            }
        }
    }

    /// An NPC speaks to a single avatar.
    pub fn tell(&mut self, speaker: EntityId, avatar: EntityId, text: &str) {
        let speaker = self.describe_entity(speaker, CAPITAL_DEFINITE);
        self.push_update(
            avatar,
            ClientUpdate::ShowSay {
                speaker,
                text: text.to_string(),
            },
        );
    }
}
