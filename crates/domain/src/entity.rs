//! The entity graph node.
//!
//! Every in-world object is an [`Entity`]: an id, an optional content ref,
//! an optional prototype link, script-defined `members`, event `handlers`,
//! and a [`EntityKind`] facet carrying the subkind's typed fields.
//!
//! Name resolution order is typed accessor, then `members`, then the
//! prototype chain; the chain walk needs the entity directory and so lives in
//! the engine's world, which also enforces acyclicity by construction (a
//! clone's prototype always points at an already-existing entity).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::avatar::Avatar;
use crate::bytecode::ScriptFunction;
use crate::entities::{
    Creature, Equipment, Fixture, Item, Location, Portal, ResourceNode, Thing, Weapon,
};
use crate::error::PropertyError;
use crate::ids::EntityId;
use crate::refs::Ref;
use crate::value::Value;

/// The four dispatch phases of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    Allow,
    Before,
    When,
    After,
}

impl EventPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EventPhase::Allow => "allow",
            EventPhase::Before => "before",
            EventPhase::When => "when",
            EventPhase::After => "after",
        }
    }
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "allow" => Ok(EventPhase::Allow),
            "before" => Ok(EventPhase::Before),
            "when" => Ok(EventPhase::When),
            "after" => Ok(EventPhase::After),
            _ => Err(()),
        }
    }
}

/// A compiled script function registered under `(phase, event)`.
#[derive(Debug, Clone)]
pub struct EventHandler {
    pub phase: EventPhase,
    pub event: String,
    pub func: Arc<ScriptFunction>,
}

/// Subkind facet. Variants share the prototype/cloning/event machinery of
/// the enclosing [`Entity`]; only typed fields differ.
#[derive(Debug, Clone)]
pub enum EntityKind {
    Thing(Thing),
    Item(Item),
    Equipment(Equipment),
    Weapon(Weapon),
    Portal(Portal),
    Location(Location),
    Creature(Creature),
    Avatar(Box<Avatar>),
    ResourceNode(ResourceNode),
    Fixture(Fixture),
}

impl EntityKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EntityKind::Thing(_) => "thing",
            EntityKind::Item(_) => "item",
            EntityKind::Equipment(_) => "equipment",
            EntityKind::Weapon(_) => "weapon",
            EntityKind::Portal(_) => "portal",
            EntityKind::Location(_) => "location",
            EntityKind::Creature(_) => "creature",
            EntityKind::Avatar(_) => "avatar",
            EntityKind::ResourceNode(_) => "resource_node",
            EntityKind::Fixture(_) => "fixture",
        }
    }

    /// Typed accessor read; `None` when no accessor covers `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self {
            EntityKind::Thing(t) => t.get(name),
            EntityKind::Item(i) => i.get(name),
            EntityKind::Equipment(e) => e.get(name),
            EntityKind::Weapon(w) => w.get(name),
            EntityKind::Portal(p) => p.get(name),
            EntityKind::Location(l) => l.get(name),
            EntityKind::Creature(c) => c.get(name),
            EntityKind::Avatar(a) => a.get(name),
            EntityKind::ResourceNode(r) => r.get(name),
            EntityKind::Fixture(f) => f.get(name),
        }
    }

    /// Typed accessor write; `None` when no accessor covers `name`.
    pub fn set(&mut self, name: &str, value: &Value) -> Option<Result<(), PropertyError>> {
        match self {
            EntityKind::Thing(t) => t.set(name, value),
            EntityKind::Item(i) => i.set(name, value),
            EntityKind::Equipment(e) => e.set(name, value),
            EntityKind::Weapon(w) => w.set(name, value),
            EntityKind::Portal(p) => p.set(name, value),
            EntityKind::Location(l) => l.set(name, value),
            EntityKind::Creature(c) => c.set(name, value),
            EntityKind::Avatar(a) => a.set(name, value),
            EntityKind::ResourceNode(r) => r.set(name, value),
            EntityKind::Fixture(f) => f.set(name, value),
        }
    }

    /// The underlying viewable facet.
    pub fn thing(&self) -> &Thing {
        match self {
            EntityKind::Thing(t) => t,
            EntityKind::Item(i) => &i.thing,
            EntityKind::Equipment(e) => &e.item.thing,
            EntityKind::Weapon(w) => &w.equipment.item.thing,
            EntityKind::Portal(p) => &p.thing,
            EntityKind::Location(l) => &l.thing,
            EntityKind::Creature(c) => &c.thing,
            EntityKind::Avatar(a) => &a.thing,
            EntityKind::ResourceNode(r) => &r.thing,
            EntityKind::Fixture(f) => &f.thing,
        }
    }

    pub fn thing_mut(&mut self) -> &mut Thing {
        match self {
            EntityKind::Thing(t) => t,
            EntityKind::Item(i) => &mut i.thing,
            EntityKind::Equipment(e) => &mut e.item.thing,
            EntityKind::Weapon(w) => &mut w.equipment.item.thing,
            EntityKind::Portal(p) => &mut p.thing,
            EntityKind::Location(l) => &mut l.thing,
            EntityKind::Creature(c) => &mut c.thing,
            EntityKind::Avatar(a) => &mut a.thing,
            EntityKind::ResourceNode(r) => &mut r.thing,
            EntityKind::Fixture(f) => &mut f.thing,
        }
    }

    /// The stackable facet shared by items, equipment, and weapons.
    pub fn item(&self) -> Option<&Item> {
        match self {
            EntityKind::Item(i) => Some(i),
            EntityKind::Equipment(e) => Some(&e.item),
            EntityKind::Weapon(w) => Some(&w.equipment.item),
            _ => None,
        }
    }

    pub fn item_mut(&mut self) -> Option<&mut Item> {
        match self {
            EntityKind::Item(i) => Some(i),
            EntityKind::Equipment(e) => Some(&mut e.item),
            EntityKind::Weapon(w) => Some(&mut w.equipment.item),
            _ => None,
        }
    }

    /// The equipment facet shared by equipment and weapons.
    pub fn equipment(&self) -> Option<&Equipment> {
        match self {
            EntityKind::Equipment(e) => Some(e),
            EntityKind::Weapon(w) => Some(&w.equipment),
            _ => None,
        }
    }
}

/// A node in the prototype-based object graph.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    /// Set iff the entity was defined at a module's top level.
    pub entity_ref: Option<Ref>,
    /// Parent in the prototype chain.
    pub prototype: Option<EntityId>,
    /// Script-defined properties not backed by a typed accessor.
    pub members: HashMap<String, Value>,
    /// Ordered handlers; matched in insertion order.
    pub handlers: Vec<EventHandler>,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            entity_ref: None,
            prototype: None,
            members: HashMap::new(),
            handlers: Vec::new(),
            kind,
        }
    }

    /// Property lookup on this node only: typed accessor, then `members`.
    /// Prototype delegation is the world's concern.
    pub fn own_property(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.kind.get(name) {
            return Some(v);
        }
        self.members.get(name).cloned()
    }

    /// Property write: validated through a typed accessor when one exists,
    /// otherwise stored into `members`.
    pub fn set_property(&mut self, name: &str, value: Value) -> Result<(), PropertyError> {
        match self.kind.set(name, &value) {
            Some(result) => result,
            None => {
                self.members.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    pub fn add_handler(&mut self, phase: EventPhase, event: impl Into<String>, func: Arc<ScriptFunction>) {
        self.handlers.push(EventHandler {
            phase,
            event: event.into(),
            func,
        });
    }

    pub fn handlers_for<'a>(
        &'a self,
        phase: EventPhase,
        event: &'a str,
    ) -> impl Iterator<Item = &'a EventHandler> + 'a {
        self.handlers
            .iter()
            .filter(move |h| h.phase == phase && h.event == event)
    }

    /// The clone contract: typed fields copy by value, the id is supplied
    /// fresh, `ref` is cleared, and `members`/`handlers` are left to
    /// delegation up the chain. The clone's prototype is this entity when it
    /// has a ref, otherwise this entity's own prototype.
    pub fn clone_as(&self, new_id: EntityId) -> Entity {
        Entity {
            id: new_id,
            entity_ref: None,
            prototype: if self.entity_ref.is_some() {
                Some(self.id)
            } else {
                self.prototype
            },
            members: HashMap::new(),
            handlers: Vec::new(),
            kind: self.kind.clone(),
        }
    }

    pub fn brief(&self) -> Option<&str> {
        self.kind.thing().brief.as_deref()
    }

    pub fn is_avatar(&self) -> bool {
        matches!(self.kind, EntityKind::Avatar(_))
    }

    pub fn as_avatar(&self) -> Option<&Avatar> {
        match &self.kind {
            EntityKind::Avatar(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_avatar_mut(&mut self) -> Option<&mut Avatar> {
        match &mut self.kind {
            EntityKind::Avatar(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_location(&self) -> Option<&Location> {
        match &self.kind {
            EntityKind::Location(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_location_mut(&mut self) -> Option<&mut Location> {
        match &mut self.kind {
            EntityKind::Location(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_portal(&self) -> Option<&Portal> {
        match &self.kind {
            EntityKind::Portal(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_portal_mut(&mut self) -> Option<&mut Portal> {
        match &mut self.kind {
            EntityKind::Portal(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thing_with_brief(id: i64, brief: &str) -> Entity {
        let mut e = Entity::new(EntityId(id), EntityKind::Thing(Thing::default()));
        e.set_property("brief", Value::from(brief)).unwrap();
        e
    }

    #[test]
    fn typed_accessor_write_is_validated() {
        let mut e = thing_with_brief(1, "lantern");
        assert_eq!(
            e.set_property("brief", Value::Number(7.0)),
            Err(PropertyError::Expected("string"))
        );
        assert_eq!(e.own_property("brief"), Some(Value::from("lantern")));
    }

    #[test]
    fn untyped_members_fall_through_to_the_map() {
        let mut e = thing_with_brief(1, "lantern");
        e.set_property("lit", Value::Boolean(true)).unwrap();
        assert_eq!(e.own_property("lit"), Some(Value::Boolean(true)));
        assert!(e.own_property("missing").is_none());
    }

    #[test]
    fn read_only_accessors_reject_writes() {
        let mut e = Entity::new(
            EntityId(2),
            EntityKind::Avatar(Box::new(crate::avatar::Avatar::default())),
        );
        assert_eq!(
            e.set_property("inventory", Value::list(vec![])),
            Err(PropertyError::ReadOnly)
        );
    }

    #[test]
    fn entity_list_accessors_validate_their_elements() {
        let mut e = Entity::new(EntityId(2), EntityKind::Location(Location::default()));
        e.set_property(
            "contents",
            Value::list(vec![Value::Entity(EntityId(5))]),
        )
        .unwrap();
        assert_eq!(
            e.set_property("contents", Value::list(vec![Value::Number(1.0)])),
            Err(PropertyError::Expected("list of entities"))
        );
    }

    #[test]
    fn clone_follows_the_prototype_rule() {
        let mut proto = thing_with_brief(1, "lantern");
        proto.entity_ref = Some(Ref::absolute("items", "lantern"));
        proto.members.insert("lit".into(), Value::Boolean(false));

        // Clone of a ref'd entity: prototype is the source, state is not copied.
        let clone = proto.clone_as(EntityId(2));
        assert_eq!(clone.prototype, Some(EntityId(1)));
        assert!(clone.entity_ref.is_none());
        assert!(clone.members.is_empty());
        assert_eq!(clone.brief(), Some("lantern"));

        // Clone of an anonymous clone: prototype link is inherited.
        let second = clone.clone_as(EntityId(3));
        assert_eq!(second.prototype, Some(EntityId(1)));
    }

    #[test]
    fn item_facet_reaches_through_equipment_and_weapons() {
        let e = Entity::new(EntityId(1), EntityKind::Weapon(Weapon::default()));
        assert_eq!(e.kind.item().unwrap().count, 1);
        assert!(e.kind.equipment().is_some());
        let plain = Entity::new(EntityId(2), EntityKind::Thing(Thing::default()));
        assert!(plain.kind.item().is_none());
    }
}
