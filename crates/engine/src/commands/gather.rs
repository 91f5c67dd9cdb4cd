//! Gathering from resource nodes: a timed activity that yields items.

use thornvale_domain::entity::EntityKind;
use thornvale_domain::ids::EntityId;
use thornvale_domain::refs::Ref;
use thornvale_domain::value::Value;

use crate::world::activity::ActivityHook;
use crate::world::matcher::Match;
use crate::world::World;

use super::Binding;

pub fn gather(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Gather what?");
        return;
    };
    let nodes: Vec<EntityId> = world
        .visible_to(actor)
        .into_iter()
        .filter(|id| {
            matches!(
                world.entity(*id).map(|e| &e.kind),
                Some(EntityKind::ResourceNode(_))
            )
        })
        .collect();
    let node = match world.match_entities(&binding.tokens(), &nodes) {
        Match::One(id) => id,
        Match::None => {
            world.show_error(actor, "There is nothing like that to gather here.");
            return;
        }
        Match::Many(candidates) => {
            super::ambiguous(world, actor, &candidates);
            return;
        }
    };

    let Some(facet) = world.entity(node).and_then(|e| match &e.kind {
        EntityKind::ResourceNode(r) => Some(r.clone()),
        _ => None,
    }) else {
        return;
    };
    let skill_ref = gathering_skill(world, node);
    if facet.required_rank > 0 {
        let rank = skill_ref
            .as_ref()
            .and_then(|s| {
                world
                    .entity(actor)
                    .and_then(|e| e.as_avatar())
                    .and_then(|a| a.skills.get(s).copied())
            })
            .unwrap_or(0);
        if rank < facet.required_rank {
            world.show_error(actor, "You lack the skill to gather that.");
            return;
        }
    }

    let Some(location) = world.location_of(actor) else {
        return;
    };
    let args = vec![Value::Entity(actor), Value::Entity(node)];
    world.trigger_event("gather", location, &[actor, node], &args, |w| {
        let resource = facet.resource;
        let (min, max) = (facet.min_count, facet.max_count.max(facet.min_count));
        let on_finish = ActivityHook::Engine(Box::new(move |w: &mut World| {
            finish_gather(w, actor, resource, min, max, skill_ref);
        }));
        if w.begin_activity(actor, "gathering".to_string(), facet.gather_seconds, on_finish, None)
        {
            w.show(actor, "You begin gathering.");
        }
    });
}

/// The node's `skill` member names what gathering here trains.
fn gathering_skill(world: &World, node: EntityId) -> Option<Ref> {
    match world.lookup_member(node, "skill") {
        Some(Value::Skill(s)) => Some(s.skill_ref().clone()),
        Some(Value::Ref(r)) => Some(r),
        _ => None,
    }
}

fn finish_gather(
    world: &mut World,
    actor: EntityId,
    resource: Option<EntityId>,
    min: i64,
    max: i64,
    skill_ref: Option<Ref>,
) {
    let Some(proto) = resource.filter(|id| world.entity(*id).is_some()) else {
        world.show_error(actor, "You come up empty-handed.");
        return;
    };
    let count = if max > min {
        use rand::Rng;
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    if world.give_item(actor, proto, count) {
        let brief = world
            .entity(proto)
            .and_then(|e| e.brief())
            .unwrap_or("something")
            .to_string();
        world.show(actor, format!("You gather {count} {brief}."));
        if let Some(skill) = skill_ref {
            world.raise_skill(actor, &skill, 1);
        }
    } else {
        world.show_error(actor, "Your pack is full.");
    }
}
