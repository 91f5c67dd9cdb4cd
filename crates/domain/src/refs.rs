//! Content-defined references.
//!
//! A [`Ref`] names a value defined by a script module. Relative refs carry a
//! bare name and are resolved against the current lexical context and the
//! builtins module; absolute refs name a module explicitly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier for a content-defined value.
///
/// Equality is structural, so `village.well != plaza.well` and a relative
/// `well` equals neither. Refs serialize to `module.name` or `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Ref {
    module: Option<String>,
    name: String,
}

impl Ref {
    pub fn relative(name: impl Into<String>) -> Self {
        Self {
            module: None,
            name: name.into(),
        }
    }

    pub fn absolute(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            name: name.into(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.module.is_some()
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Anchor a relative ref in `module`; absolute refs are unchanged.
    pub fn anchored_in(&self, module: &str) -> Ref {
        match self.module {
            Some(_) => self.clone(),
            None => Ref::absolute(module, self.name.clone()),
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(m) => write!(f, "{}.{}", m, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<Ref> for String {
    fn from(r: Ref) -> String {
        r.to_string()
    }
}

impl FromStr for Ref {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty ref".to_string());
        }
        match s.split_once('.') {
            Some((module, name)) => {
                if module.is_empty() || name.is_empty() || name.contains('.') {
                    Err(format!("malformed ref {s:?}"))
                } else {
                    Ok(Ref::absolute(module, name))
                }
            }
            None => Ok(Ref::relative(s)),
        }
    }
}

impl TryFrom<String> for Ref {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_and_absolute() {
        assert_eq!("well".parse::<Ref>().unwrap(), Ref::relative("well"));
        assert_eq!(
            "village.well".parse::<Ref>().unwrap(),
            Ref::absolute("village", "well")
        );
        assert!("a.b.c".parse::<Ref>().is_err());
        assert!("".parse::<Ref>().is_err());
    }

    #[test]
    fn equality_is_structural() {
        assert_ne!(Ref::relative("well"), Ref::absolute("village", "well"));
        assert_eq!(
            Ref::absolute("village", "well"),
            Ref::absolute("village", "well")
        );
    }

    #[test]
    fn round_trips_through_strings() {
        for s in ["well", "village.well"] {
            assert_eq!(s.parse::<Ref>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn anchoring_leaves_absolute_refs_alone() {
        let abs = Ref::absolute("plaza", "gate");
        assert_eq!(abs.anchored_in("village"), abs);
        assert_eq!(
            Ref::relative("gate").anchored_in("village"),
            Ref::absolute("village", "gate")
        );
    }

    #[test]
    fn serializes_as_map_key() {
        use std::collections::BTreeMap;
        let mut m = BTreeMap::new();
        m.insert(Ref::absolute("village", "well_quest"), 3);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"village.well_quest":3}"#);
        let back: BTreeMap<Ref, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
