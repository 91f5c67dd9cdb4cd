//! The go command.

use thornvale_domain::entities::Direction;
use thornvale_domain::ids::EntityId;

use crate::world::matcher::Match;
use crate::world::World;

use super::Binding;

/// `go north`, `go gate`: pick an exit by direction or by name and travel.
pub fn go(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Go where?");
        return;
    };
    let Some(location) = world.location_of(actor) else {
        return;
    };
    let exits = match world.entity(location).and_then(|e| e.as_location()) {
        Some(l) => l.exits.clone(),
        None => Vec::new(),
    };

    let tokens = binding.tokens();
    if let [single] = tokens.as_slice() {
        if let Ok(direction) = single.to_lowercase().parse::<Direction>() {
            let exit = exits.iter().copied().find(|&e| {
                world
                    .entity(e)
                    .and_then(|e| e.as_portal())
                    .is_some_and(|p| p.direction == Some(direction))
            });
            match exit {
                Some(exit) => {
                    world.travel(actor, exit);
                }
                None => world.show_error(actor, format!("You can't go {direction}.")),
            }
            return;
        }
    }

    match world.match_entities(&tokens, &exits) {
        Match::One(exit) => {
            world.travel(actor, exit);
        }
        Match::None => world.show_error(actor, "You can't go that way."),
        Match::Many(candidates) => super::ambiguous(world, actor, &candidates),
    }
}
