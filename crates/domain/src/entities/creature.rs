//! Creatures, resource nodes, and fixed scenery.

use crate::error::PropertyError;
use crate::ids::EntityId;
use crate::value::Value;

use super::thing::{set_integer, set_number, Thing};

/// A non-player inhabitant of the world.
#[derive(Debug, Clone)]
pub struct Creature {
    pub thing: Thing,
    pub level: i64,
}

impl Default for Creature {
    fn default() -> Self {
        Self {
            thing: Thing::default(),
            level: 1,
        }
    }
}

impl Creature {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "level" => Some(Value::from(self.level)),
            _ => self.thing.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "level" => Some(set_integer(&mut self.level, value)),
            _ => self.thing.set(name, value),
        }
    }
}

/// A gatherable node yielding clones of a resource item prototype.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub thing: Thing,
    pub resource: Option<EntityId>,
    pub min_count: i64,
    pub max_count: i64,
    pub required_rank: i64,
    pub gather_seconds: f64,
}

impl Default for ResourceNode {
    fn default() -> Self {
        Self {
            thing: Thing::default(),
            resource: None,
            min_count: 1,
            max_count: 1,
            required_rank: 0,
            gather_seconds: 3.0,
        }
    }
}

impl ResourceNode {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "resource" => Some(match self.resource {
                Some(id) => Value::Entity(id),
                None => Value::Nil,
            }),
            "min_count" => Some(Value::from(self.min_count)),
            "max_count" => Some(Value::from(self.max_count)),
            "required_rank" => Some(Value::from(self.required_rank)),
            "gather_seconds" => Some(Value::Number(self.gather_seconds)),
            _ => self.thing.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "resource" => Some(match value {
                Value::Entity(id) => {
                    self.resource = Some(*id);
                    Ok(())
                }
                Value::Nil => {
                    self.resource = None;
                    Ok(())
                }
                _ => Err(PropertyError::Expected("entity")),
            }),
            "min_count" => Some(set_integer(&mut self.min_count, value)),
            "max_count" => Some(set_integer(&mut self.max_count, value)),
            "required_rank" => Some(set_integer(&mut self.required_rank, value)),
            "gather_seconds" => Some(set_number(&mut self.gather_seconds, value)),
            _ => self.thing.set(name, value),
        }
    }
}

/// Immovable scenery that can still observe events and be looked at.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub thing: Thing,
}

impl Fixture {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.thing.get(name)
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        self.thing.set(name, value)
    }
}
