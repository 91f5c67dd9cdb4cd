//! Portals and compass directions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PropertyError;
use crate::ids::EntityId;
use crate::refs::Ref;
use crate::value::Value;

use super::thing::{set_boolean, Thing};

/// Direction of travel through a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
    Up,
    Down,
    In,
    Out,
}

impl Direction {
    pub const ALL: [Direction; 12] = [
        Direction::North,
        Direction::Northeast,
        Direction::East,
        Direction::Southeast,
        Direction::South,
        Direction::Southwest,
        Direction::West,
        Direction::Northwest,
        Direction::Up,
        Direction::Down,
        Direction::In,
        Direction::Out,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::Northeast => Direction::Southwest,
            Direction::East => Direction::West,
            Direction::Southeast => Direction::Northwest,
            Direction::South => Direction::North,
            Direction::Southwest => Direction::Northeast,
            Direction::West => Direction::East,
            Direction::Northwest => Direction::Southeast,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::Northeast => "northeast",
            Direction::East => "east",
            Direction::Southeast => "southeast",
            Direction::South => "south",
            Direction::Southwest => "southwest",
            Direction::West => "west",
            Direction::Northwest => "northwest",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    /// Short form used by travel aliases ("n", "sw", ...).
    pub fn abbreviation(self) -> &'static str {
        match self {
            Direction::North => "n",
            Direction::Northeast => "ne",
            Direction::East => "e",
            Direction::Southeast => "se",
            Direction::South => "s",
            Direction::Southwest => "sw",
            Direction::West => "w",
            Direction::Northwest => "nw",
            Direction::Up => "u",
            Direction::Down => "d",
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Direction::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s || d.abbreviation() == s)
            .ok_or(())
    }
}

/// An exit from a location.
///
/// `destination` stays a ref until world load finishes; `twin` is resolved
/// once at that point and is constant afterwards.
#[derive(Debug, Clone, Default)]
pub struct Portal {
    pub thing: Thing,
    pub direction: Option<Direction>,
    pub destination: Option<Ref>,
    pub twin: Option<EntityId>,
    pub oneway: bool,
}

impl Portal {
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "direction" => Some(match self.direction {
                Some(d) => Value::symbol(d.as_str()),
                None => Value::Nil,
            }),
            "destination" => Some(match &self.destination {
                Some(r) => Value::Ref(r.clone()),
                None => Value::Nil,
            }),
            "oneway" => Some(Value::Boolean(self.oneway)),
            _ => self.thing.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match name {
            "direction" => Some(match value.as_symbol().map(str::parse) {
                Some(Ok(d)) => {
                    self.direction = Some(d);
                    Ok(())
                }
                _ => Err(PropertyError::Expected("direction symbol")),
            }),
            "destination" => Some(match value {
                Value::Ref(r) => {
                    self.destination = Some(r.clone());
                    Ok(())
                }
                _ => Err(PropertyError::Expected("ref")),
            }),
            "oneway" => Some(set_boolean(&mut self.oneway, value)),
            _ => self.thing.set(name, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposites_are_involutions() {
        for d in Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
        }
    }

    #[test]
    fn parses_long_and_short_forms() {
        assert_eq!("north".parse::<Direction>().unwrap(), Direction::North);
        assert_eq!("sw".parse::<Direction>().unwrap(), Direction::Southwest);
        assert!("northish".parse::<Direction>().is_err());
    }
}
