//! Locations: the rooms of the world.

use crate::error::PropertyError;
use crate::ids::EntityId;
use crate::value::Value;

use super::thing::{opt_string, set_string, Thing};

/// A place avatars can inhabit.
///
/// `contents` holds everything present (creatures, fixtures, avatars, loose
/// items) in insertion order; `exits` holds portal entities. Initializers
/// assign both as lists of entities; anything else is rejected.
#[derive(Debug, Clone, Default)]
pub struct Location {
    pub thing: Thing,
    pub contents: Vec<EntityId>,
    pub exits: Vec<EntityId>,
    pub domain: Option<String>,
    pub tutorial: Option<String>,
}

impl Location {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "contents" => Some(Value::list(
                self.contents.iter().map(|id| Value::Entity(*id)).collect(),
            )),
            "exits" => Some(Value::list(
                self.exits.iter().map(|id| Value::Entity(*id)).collect(),
            )),
            "domain" => Some(opt_string(&self.domain)),
            "tutorial" => Some(opt_string(&self.tutorial)),
            _ => self.thing.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "contents" => Some(set_entity_list(&mut self.contents, value)),
            "exits" => Some(set_entity_list(&mut self.exits, value)),
            "domain" => Some(set_string(&mut self.domain, value)),
            "tutorial" => Some(set_string(&mut self.tutorial, value)),
            _ => self.thing.set(name, value),
        }
    }
}

fn set_entity_list(slot: &mut Vec<EntityId>, value: &Value) -> Result<(), PropertyError> {
    let Value::List(items) = value else {
        return Err(PropertyError::Expected("list of entities"));
    };
    let mut ids = Vec::with_capacity(items.len());
    for item in items.iter() {
        match item.as_entity() {
            Some(id) => ids.push(id),
            None => return Err(PropertyError::Expected("list of entities")),
        }
    }
    *slot = ids;
    Ok(())
}
