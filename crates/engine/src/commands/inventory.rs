//! Carrying things: inventory, take, drop, put, give.

use std::sync::Arc;

use thornvale_domain::ids::EntityId;
use thornvale_domain::value::Value;
use thornvale_shared::ClientUpdate;

use crate::world::matcher::Match;
use crate::world::World;

use super::Binding;

pub fn inventory(world: &mut World, actor: EntityId, _verb: &str, _clauses: &[Option<Binding>]) {
    let Some(avatar) = world.entity(actor).and_then(|e| e.as_avatar()) else {
        return;
    };
    let items: Vec<String> = avatar
        .inventory
        .clone()
        .iter()
        .map(|id| {
            let info = world.item_info(*id);
            if info.count > 1 {
                format!("{} x{}", info.brief, info.count)
            } else {
                info.brief
            }
        })
        .collect();
    if items.is_empty() {
        world.show(actor, "You are carrying nothing.");
    } else {
        world.push_update(
            actor,
            ClientUpdate::ShowList {
                heading: "You are carrying:".to_string(),
                items,
            },
        );
    }
}

/// Things on the floor the avatar could pick up.
fn portable_here(world: &World, actor: EntityId) -> Vec<EntityId> {
    world
        .visible_to(actor)
        .into_iter()
        .filter(|id| world.entity(*id).is_some_and(|e| e.kind.item().is_some()))
        .collect()
}

/// A named container's contents, stored as an entity-list member.
fn container_contents(world: &World, container: EntityId) -> Vec<EntityId> {
    match world.lookup_member(container, "contents") {
        Some(Value::List(items)) => items.iter().filter_map(Value::as_entity).collect(),
        _ => Vec::new(),
    }
}

fn is_container(world: &World, id: EntityId) -> bool {
    world
        .lookup_member(id, "container")
        .is_some_and(|v| v.is_truthy())
}

pub fn take(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Take what?");
        return;
    };
    let container = match clauses.get(1).and_then(|c| c.as_ref()) {
        Some(b) => match world.match_visible(actor, &b.tokens()) {
            Match::One(id) if is_container(world, id) => Some(id),
            Match::One(_) | Match::None => {
                world.show_error(actor, "You don't see that container here.");
                return;
            }
            Match::Many(candidates) => {
                super::ambiguous(world, actor, &candidates);
                return;
            }
        },
        None => None,
    };
    let pool = match container {
        Some(c) => container_contents(world, c),
        None => portable_here(world, actor),
    };
    let item = match world.match_entities(&binding.tokens(), &pool) {
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
    let Some(location) = world.location_of(actor) else {
        return;
    };
    let args = vec![Value::Entity(actor), Value::Entity(item)];
    world.trigger_event("take", location, &[actor, item], &args, |w| {
        let moved = match container {
            Some(c) => {
                remove_from_container(w, c, item);
                if let Some(a) = w.entity_mut(actor).and_then(|e| e.as_avatar_mut()) {
                    a.inventory.push(item);
                }
                let info = w.item_info(item);
                w.push_update(actor, ClientUpdate::UpdateItem { item: info });
                true
            }
            None => w.take_item(actor, item),
        };
        if moved {
            let brief = w.describe_entity(item, definite());
            w.show(actor, format!("You take {brief}."));
        }
    });
}

pub fn drop(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(binding) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Drop what?");
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
    world.trigger_event("drop", location, &[actor, item], &args, |w| {
        if w.drop_item(actor, item) {
            let brief = w.describe_entity(item, definite());
            w.show(actor, format!("You drop {brief}."));
        }
    });
}

pub fn put(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(item_b) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Put what where?");
        return;
    };
    let Some(container_b) = clauses.get(1).and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Put it where?");
        return;
    };
    let item = match world.match_inventory(actor, &item_b.tokens()) {
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
    let container = match world.match_visible(actor, &container_b.tokens()) {
        Match::One(id) => id,
        Match::None => {
            world.show_error(actor, "You don't see that here.");
            return;
        }
        Match::Many(candidates) => {
            super::ambiguous(world, actor, &candidates);
            return;
        }
    };
    if !is_container(world, container) {
        world.show_error(actor, "You can't put things there.");
        return;
    }
    let Some(location) = world.location_of(actor) else {
        return;
    };
    let args = vec![
        Value::Entity(actor),
        Value::Entity(item),
        Value::Entity(container),
    ];
    world.trigger_event("put", location, &[actor, item, container], &args, |w| {
        if let Some(a) = w.entity_mut(actor).and_then(|e| e.as_avatar_mut()) {
            a.inventory.retain(|i| *i != item);
        }
        add_to_container(w, container, item);
        w.push_update(actor, ClientUpdate::RemoveItem { key: item.0 });
        let item_brief = w.describe_entity(item, definite());
        let container_brief = w.describe_entity(container, definite());
        w.show(actor, format!("You put {item_brief} in {container_brief}."));
    });
}

pub fn give(world: &mut World, actor: EntityId, _verb: &str, clauses: &[Option<Binding>]) {
    let Some(item_b) = clauses.first().and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Give what to whom?");
        return;
    };
    let Some(recipient_b) = clauses.get(1).and_then(|c| c.as_ref()) else {
        world.show_error(actor, "Give it to whom?");
        return;
    };
    let item = match world.match_inventory(actor, &item_b.tokens()) {
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
    let recipient = match world.match_visible(actor, &recipient_b.tokens()) {
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
    let args = vec![
        Value::Entity(actor),
        Value::Entity(item),
        Value::Entity(recipient),
    ];
    world.trigger_event("give", location, &[actor, item, recipient], &args, |w| {
        if w.transfer_item(actor, item, recipient) {
            let item_brief = w.describe_entity(item, definite());
            let who = w.describe_entity(recipient, definite());
            w.show(actor, format!("You give {item_brief} to {who}."));
        }
    });
}

fn add_to_container(world: &mut World, container: EntityId, item: EntityId) {
    world.remove_from_location(item);
    let mut contents = container_contents(world, container);
    contents.push(item);
    if let Some(e) = world.entity_mut(container) {
        e.members.insert(
            "contents".to_string(),
            Value::List(Arc::new(contents.into_iter().map(Value::Entity).collect())),
        );
    }
}

fn remove_from_container(world: &mut World, container: EntityId, item: EntityId) {
    let contents: Vec<EntityId> = container_contents(world, container)
        .into_iter()
        .filter(|i| *i != item)
        .collect();
    if let Some(e) = world.entity_mut(container) {
        e.members.insert(
            "contents".to_string(),
            Value::List(Arc::new(contents.into_iter().map(Value::Entity).collect())),
        );
    }
}

fn definite() -> thornvale_domain::bytecode::Format {
    thornvale_domain::bytecode::Format {
        article: thornvale_domain::bytecode::Article::Definite,
        capitalize: false,
    }
}
