//! Trainable skills.

use std::collections::HashMap;

use crate::refs::Ref;
use crate::value::Value;

/// A skill definition; avatars track an integer rank per skill.
#[derive(Debug, Clone)]
pub struct Skill {
    skill_ref: Ref,
    pub members: HashMap<String, Value>,
}

impl Skill {
    pub fn new(skill_ref: Ref) -> Self {
        Self {
            skill_ref,
            members: HashMap::new(),
        }
    }

    pub fn skill_ref(&self) -> &Ref {
        &self.skill_ref
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    pub fn display_name(&self) -> String {
        match self.members.get("name").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => self.skill_ref.name().replace('_', " "),
        }
    }

    /// Highest attainable rank, when authored.
    pub fn max_rank(&self) -> i64 {
        self.members
            .get("max_rank")
            .and_then(Value::as_integer)
            .unwrap_or(100)
    }
}
