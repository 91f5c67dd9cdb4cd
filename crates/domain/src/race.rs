//! Playable races.

use std::collections::HashMap;

use crate::refs::Ref;
use crate::value::Value;

/// A race definition. Immutable after world load.
#[derive(Debug, Clone)]
pub struct Race {
    race_ref: Ref,
    pub members: HashMap<String, Value>,
}

impl Race {
    pub fn new(race_ref: Ref) -> Self {
        Self {
            race_ref,
            members: HashMap::new(),
        }
    }

    pub fn race_ref(&self) -> &Ref {
        &self.race_ref
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    pub fn display_name(&self) -> String {
        match self.members.get("name").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => self.race_ref.name().replace('_', " "),
        }
    }
}
