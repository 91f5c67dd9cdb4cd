//! The base viewable, matchable facet.

use crate::error::PropertyError;
use crate::value::Value;

/// Anything a player can see and refer to by name.
///
/// `brief` is the noun phrase used in prose and matching ("rusty sword");
/// articles are applied by the stringifier, so briefs are stored bare.
#[derive(Debug, Clone, Default)]
pub struct Thing {
    pub brief: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

impl Thing {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "brief" => Some(opt_string(&self.brief)),
            "description" => Some(opt_string(&self.description)),
            "icon" => Some(opt_string(&self.icon)),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "brief" => Some(set_string(&mut self.brief, value)),
            "description" => Some(set_string(&mut self.description, value)),
            "icon" => Some(set_string(&mut self.icon, value)),
            _ => None,
        }
    }
}

pub(crate) fn opt_string(s: &Option<String>) -> Value {
    match s {
        Some(s) => Value::string(s.as_str()),
        None => Value::Nil,
    }
}

pub(crate) fn set_string(slot: &mut Option<String>, value: &Value) -> Result<(), PropertyError> {
    match value {
        Value::String(s) => {
            *slot = Some(s.to_string());
            Ok(())
        }
        Value::Nil => {
            *slot = None;
            Ok(())
        }
        _ => Err(PropertyError::Expected("string")),
    }
}

pub(crate) fn set_integer(slot: &mut i64, value: &Value) -> Result<(), PropertyError> {
    match value.as_integer() {
        Some(n) => {
            *slot = n;
            Ok(())
        }
        None => Err(PropertyError::Expected("number")),
    }
}

pub(crate) fn set_number(slot: &mut f64, value: &Value) -> Result<(), PropertyError> {
    match value.as_number() {
        Some(n) => {
            *slot = n;
            Ok(())
        }
        None => Err(PropertyError::Expected("number")),
    }
}

pub(crate) fn set_boolean(slot: &mut bool, value: &Value) -> Result<(), PropertyError> {
    match value.as_boolean() {
        Some(b) => {
            *slot = b;
            Ok(())
        }
        None => Err(PropertyError::Expected("boolean")),
    }
}
