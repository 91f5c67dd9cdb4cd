//! Saying things aloud and talking to NPCs.

use thornvale_domain::ids::EntityId;
use thornvale_domain::value::Value;

use crate::world::matcher::Match;
use crate::world::World;

use super::Binding;

pub fn say(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(text) = clauses.first().and_then(|c| c.as_ref()).map(|b| b.text()) else {
        world.show_error(actor, "Say what?");
        return;
    };
    world.say(actor, &text);
}

/// `talk to elder`: fires the `talk` event so quest and dialogue handlers on
/// the NPC (or its prototypes) can respond.
pub fn talk(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Talk to whom?");
        return;
    };
    let npc = match world.match_visible(actor, &binding.tokens()) {
        Match::One(id) => id,
        Match::None => {
            world.show_error(actor, "You don't see anyone like that here.");
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
    world.trigger_event("talk", location, &[actor, npc], &[Value::Entity(actor)], |_| {});
}
