//! Carryable items, wearable equipment, and weapons.

use std::collections::BTreeMap;

use crate::error::PropertyError;
use crate::value::Value;

use super::thing::{opt_string, set_integer, set_number, set_string, Thing};

/// A stackable item with an integer count and a per-stack limit.
#[derive(Debug, Clone)]
pub struct Item {
    pub thing: Thing,
    pub count: i64,
    pub stack_limit: i64,
}

impl Default for Item {
    fn default() -> Self {
        Self {
            thing: Thing::default(),
            count: 1,
            stack_limit: 1,
        }
    }
}

impl Item {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "count" => Some(Value::from(self.count)),
            "stack_limit" => Some(Value::from(self.stack_limit)),
            _ => self.thing.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "count" => Some(set_integer(&mut self.count, value)),
            "stack_limit" => Some(set_integer(&mut self.stack_limit, value)),
            _ => self.thing.set(name, value),
        }
    }
}

/// Equipment occupies a slot and carries a quality tier plus named traits.
#[derive(Debug, Clone, Default)]
pub struct Equipment {
    pub item: Item,
    pub slot: Option<String>,
    pub quality: i64,
    pub traits: BTreeMap<String, f64>,
}

impl Equipment {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "slot" => Some(opt_string(&self.slot)),
            "quality" => Some(Value::from(self.quality)),
            "traits" => Some(Value::list(
                self.traits.keys().map(|k| Value::symbol(k.as_str())).collect(),
            )),
            _ => self.item.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "slot" => Some(set_string(&mut self.slot, value)),
            "quality" => Some(set_integer(&mut self.quality, value)),
            "traits" => Some(Err(PropertyError::ReadOnly)),
            _ => self.item.set(name, value),
        }
    }
}

/// A weapon is equipment with a damage band and an attack verb for prose.
#[derive(Debug, Clone)]
pub struct Weapon {
    pub equipment: Equipment,
    pub min_damage: f64,
    pub max_damage: f64,
    pub attack_verb: Option<String>,
}

impl Default for Weapon {
    fn default() -> Self {
        Self {
            equipment: Equipment::default(),
            min_damage: 1.0,
            max_damage: 2.0,
            attack_verb: None,
        }
    }
}

impl Weapon {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "min_damage" => Some(Value::Number(self.min_damage)),
            "max_damage" => Some(Value::Number(self.max_damage)),
            "attack_verb" => Some(opt_string(&self.attack_verb)),
            _ => self.equipment.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "min_damage" => Some(set_number(&mut self.min_damage, value)),
            "max_damage" => Some(set_number(&mut self.max_damage, value)),
            "attack_verb" => Some(set_string(&mut self.attack_verb, value)),
            _ => self.equipment.set(name, value),
        }
    }
}
