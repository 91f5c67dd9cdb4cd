//! Equipping and unequipping gear.

use thornvale_domain::ids::EntityId;
use thornvale_domain::value::Value;

use crate::world::matcher::Match;
use crate::world::World;

use super::Binding;

pub fn equip(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Equip what?");
        return;
    };
    let item = match world.match_inventory(actor, &binding.tokens()) {
        Match::One(id) => id,
        Match::None => {
            world.show_error(actor, "You aren't carrying that.");
            return;
        }
        Match::Many(candidates) => {
            super::ambiguous(world, actor, &candidates);
            return;
        }
    };
    let Some(location) = world.location_of(actor) else {
        return;
    };
    let args = vec![Value::Entity(actor), Value::Entity(item)];
    world.trigger_event("equip", location, &[actor, item], &args, |w| {
        match w.equip_item(actor, item) {
            Ok(()) => {
                let brief = w.describe_entity(
                    item,
                    thornvale_domain::bytecode::Format {
                        article: thornvale_domain::bytecode::Article::Definite,
                        capitalize: false,
                    },
                );
                w.show(actor, format!("You equip {brief}."));
            }
            Err(message) => w.show_error(actor, message),
        }
    });
}

pub fn unequip(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Unequip what?");
        return;
    };
    let equipped: Vec<(String, EntityId)> = match world.entity(actor).and_then(|e| e.as_avatar())
    {
        Some(a) => a.equipped.iter().map(|(s, i)| (s.clone(), *i)).collect(),
        None => return,
    };
    // Accept either a slot name or the item's name.
    let text = binding.text().to_lowercase();
    let by_slot = equipped.iter().find(|(slot, _)| *slot == text);
    let slot = match by_slot {
        Some((slot, _)) => Some(slot.clone()),
        None => {
            let items: Vec<EntityId> = equipped.iter().map(|(_, i)| *i).collect();
            match world.match_entities(&binding.tokens(), &items) {
                Match::One(found) => equipped
                    .iter()
                    .find(|(_, i)| *i == found)
                    .map(|(s, _)| s.clone()),
                Match::None => None,
                Match::Many(candidates) => {
                    super::ambiguous(world, actor, &candidates);
                    return;
                }
            }
        }
    };
    let Some(slot) = slot else {
        world.show_error(actor, "You don't have that equipped.");
        return;
    };
    if let Err(message) = world.unequip_slot(actor, &slot) {
        world.show_error(actor, message);
    }
}
