//! The look command.

use thornvale_domain::ids::EntityId;
use thornvale_domain::value::Value;

use crate::world::matcher::Match;
use crate::world::World;

use super::Binding;

/// `look` shows the location; `look at X` examines one visible thing. The
/// tool clause rides along in the event arguments for content handlers.
pub fn look(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(target) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_location(actor);
        return;
    };
    let target = match world.match_visible(actor, &target.tokens()) {
        Match::One(id) => id,
        Match::None => {
            world.show_error(actor, "You don't see anything like that here.");
            return;
        }
        Match::Many(candidates) => {
            super::ambiguous(world, actor, &candidates);
            return;
        }
    };
    let tool = clauses.get(1).and_then(|c| c.as_ref()).and_then(|binding| {
        match world.match_inventory(actor, &binding.tokens()) {
            Match::One(id) => Some(id),
            _ => None,
        }
    });

    let Some(location) = world.location_of(actor) else {
        return;
    };
    let mut args = vec![Value::Entity(actor), Value::Entity(target)];
    if let Some(tool) = tool {
        args.push(Value::Entity(tool));
    }
    world.trigger_event("look", location, &[actor, target], &args, |w| {
        let text = w
            .lookup_member(target, "description")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                let brief = w.describe_entity(
                    target,
                    thornvale_domain::bytecode::Format {
                        article: thornvale_domain::bytecode::Article::Indefinite,
                        capitalize: false,
                    },
                );
                format!("You see nothing special about {brief}.")
            });
        w.show(actor, text);
    });
}
