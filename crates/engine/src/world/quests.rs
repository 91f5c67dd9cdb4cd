//! Quest flow: offer, accept, decline, advance, complete. Skills ride along
//! because ranks are awarded mostly from quest and gathering handlers.

use std::sync::Arc;

use thornvale_domain::ids::EntityId;
use thornvale_domain::quest::QuestState;
use thornvale_domain::refs::Ref;
use thornvale_domain::skill::Skill;
use thornvale_domain::value::Value;
use thornvale_shared::ClientUpdate;

use thornvale_domain::avatar::Offer;

use super::World;

impl World {
    /// Find a skill definition by ref, anchored or not.
    pub fn skill(&self, r: &Ref) -> Option<Arc<Skill>> {
        let lookup = |module: &str, name: &str| match self.module_binding(module, name) {
            Some(Value::Skill(s)) => Some(s),
            _ => None,
        };
        match r.module() {
            Some(m) => lookup(m, r.name()),
            None => self.modules.keys().find_map(|m| lookup(m, r.name())),
        }
    }

    /// Offer a quest to an avatar. No-op (with a log) when the avatar
    /// already has a pending offer or activity, or holds the quest.
    pub fn offer_quest(&mut self, npc: EntityId, avatar_id: EntityId, quest_ref: &Ref) {
        let Some(quest) = self.quest(quest_ref) else {
            tracing::warn!(quest = %quest_ref, "offered an unknown quest");
            return;
        };
        let Some(avatar) = self.entity(avatar_id).and_then(|e| e.as_avatar()) else {
            return;
        };
        if avatar.offer.is_some()
            || avatar.activity.is_some()
            || avatar.active_quests.contains_key(quest_ref)
            || avatar.completed_quests.contains_key(quest_ref)
        {
            return;
        }
        let name = quest.display_name();
        if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
            a.offer = Some(Offer {
                quest: quest_ref.clone(),
                npc,
            });
        }
        self.show_notice(
            avatar_id,
            format!("You have been offered the quest \"{name}\". Type accept or decline."),
        );
    }

    /// Accept the pending offer; the quest starts at its first phase.
    pub fn accept_offer(&mut self, avatar_id: EntityId) -> bool {
        let Some(offer) = self
            .entity_mut(avatar_id)
            .and_then(|e| e.as_avatar_mut())
            .and_then(|a| a.offer.take())
        else {
            self.show_error(avatar_id, "You have nothing to accept.");
            return false;
        };
        let Some(quest) = self.quest(&offer.quest) else {
            return false;
        };
        let first = match quest.first_phase() {
            Some(p) => p.name.clone(),
            None => {
                tracing::error!(quest = %offer.quest, "quest has no phases");
                return false;
            }
        };
        if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
            a.active_quests
                .insert(offer.quest.clone(), QuestState::at_phase(first.clone()));
        }
        let info = self.quest_info(&offer.quest, &first, None);
        self.push_update(avatar_id, ClientUpdate::UpdateQuest { quest: info });
        self.show_notice(
            avatar_id,
            format!("Quest accepted: {}.", quest.display_name()),
        );
        let location = self.location_of(avatar_id);
        if let Some(location) = location {
            let args = vec![
                Value::Entity(avatar_id),
                Value::Quest(quest.clone()),
                Value::Entity(offer.npc),
            ];
            self.trigger_event("accept_quest", location, &[avatar_id, offer.npc], &args, |_| {});
        }
        true
    }

    /// Decline the pending offer, notifying the player.
    pub fn decline_offer(&mut self, avatar_id: EntityId) -> bool {
        if self.decline_offer_silently(avatar_id) {
            self.show_notice(avatar_id, "Offer declined.");
            true
        } else {
            self.show_error(avatar_id, "You have nothing to decline.");
            false
        }
    }

    /// Drop the pending offer without player-facing output; location changes
    /// and disconnects go through here.
    pub(crate) fn decline_offer_silently(&mut self, avatar_id: EntityId) -> bool {
        self.entity_mut(avatar_id)
            .and_then(|e| e.as_avatar_mut())
            .and_then(|a| a.offer.take())
            .is_some()
    }

    /// Move an active quest to its next phase; the last phase completes it.
    pub fn advance_quest(&mut self, avatar_id: EntityId, quest_ref: &Ref) {
        let Some(quest) = self.quest(quest_ref) else {
            tracing::warn!(quest = %quest_ref, "advanced an unknown quest");
            return;
        };
        let Some(current) = self
            .entity(avatar_id)
            .and_then(|e| e.as_avatar())
            .and_then(|a| a.active_quests.get(quest_ref))
            .map(|s| s.phase.clone())
        else {
            return;
        };
        match quest.phase_after(&current) {
            Some(next) => {
                let next = next.name.clone();
                if let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) {
                    a.active_quests
                        .insert(quest_ref.clone(), QuestState::at_phase(next.clone()));
                }
                let info = self.quest_info(quest_ref, &next, None);
                self.push_update(avatar_id, ClientUpdate::UpdateQuest { quest: info });
            }
            None => self.complete_quest(avatar_id, quest_ref),
        }
    }

    /// Complete and journal a quest.
    pub fn complete_quest(&mut self, avatar_id: EntityId, quest_ref: &Ref) {
        let name = match self.quest(quest_ref) {
            Some(q) => q.display_name(),
            None => quest_ref.name().replace('_', " "),
        };
        let now = chrono::Utc::now().timestamp();
        let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) else {
            return;
        };
        if a.active_quests.remove(quest_ref).is_none() {
            return;
        }
        a.completed_quests.insert(quest_ref.clone(), now);
        self.push_update(
            avatar_id,
            ClientUpdate::RemoveQuest {
                key: quest_ref.to_string(),
            },
        );
        self.show_notice(avatar_id, format!("Quest complete: {name}!"));
    }

    /// Raise a skill rank, clamped to the skill's maximum.
    pub fn raise_skill(&mut self, avatar_id: EntityId, skill_ref: &Ref, amount: i64) {
        let max_rank = self.skill(skill_ref).map_or(100, |s| s.max_rank());
        let Some(a) = self.entity_mut(avatar_id).and_then(|e| e.as_avatar_mut()) else {
            return;
        };
        let rank = a.skills.entry(skill_ref.clone()).or_insert(0);
        *rank = (*rank + amount).clamp(0, max_rank);
        let rank = *rank;
        let info = self.skill_info(skill_ref, rank);
        self.push_update(avatar_id, ClientUpdate::UpdateSkill { skill: info });
    }
}
