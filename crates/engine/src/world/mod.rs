//! The world runtime.
//!
//! A single [`World`] owns every live entity, the loaded modules, the session
//! registry, and the schedule queue. All mutation happens on the world task
//! (`tick`), so nothing here is locked.

pub mod activity;
pub mod builtins;
pub mod events;
pub mod inventory;
pub mod loader;
pub mod matcher;
pub mod movement;
pub mod quests;
pub mod tick;
pub mod view;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thornvale_domain::bytecode::Format;
use thornvale_domain::entities::Direction;
use thornvale_domain::entity::{Entity, EntityKind};
use thornvale_domain::ids::{AccountId, EntityId, EntityIdAllocator};
use thornvale_domain::quest::Quest;
use thornvale_domain::refs::Ref;
use thornvale_domain::value::{FutureValue, Value};
use thornvale_shared::ClientUpdate;

use crate::commands::CommandRegistry;
use crate::script::vm::{self, Continuation, Exec, ExecError, ScriptContext};
use crate::session::SessionMap;
use crate::store::Store;

pub use loader::{LoadError, WorldLoader};

/// A named container of top-level bindings, loaded once from a script file.
/// Modules act as scopes for relative ref resolution.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    pub bindings: HashMap<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: HashMap::new(),
        }
    }
}

type Callback = Box<dyn FnOnce(&mut World) + Send>;

struct Scheduled {
    due: Instant,
    seq: u64,
    callback: Callback,
}

/// The world: entity directory, modules, sessions, and the schedule.
pub struct World {
    entities: HashMap<EntityId, Entity>,
    ids: EntityIdAllocator,
    pub(crate) modules: HashMap<String, Module>,
    pub(crate) startables: Vec<EntityId>,
    /// Where new and misplaced avatars go.
    pub(crate) start_location: Option<Ref>,
    pub(crate) sessions: SessionMap,
    pub(crate) commands: Arc<CommandRegistry>,
    pub(crate) store: Arc<dyn Store>,
    schedule: Vec<Scheduled>,
    schedule_seq: u64,
    activity_tokens: u64,
    pub(crate) activities: HashMap<u64, activity::ActivityHooks>,
}

impl World {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let mut world = Self {
            entities: HashMap::new(),
            ids: EntityIdAllocator::new(),
            modules: HashMap::new(),
            startables: Vec::new(),
            start_location: None,
            sessions: SessionMap::default(),
            commands: Arc::new(CommandRegistry::standard()),
            store,
            schedule: Vec::new(),
            schedule_seq: 0,
            activity_tokens: 0,
            activities: HashMap::new(),
        };
        builtins::install(&mut world);
        world
    }

    // ----- entity directory -----------------------------------------------

    pub fn create_entity(&mut self, kind: EntityKind) -> EntityId {
        let id = self.ids.allocate();
        self.entities.insert(id, Entity::new(id, kind));
        id
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub(crate) fn entities_keys(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Clone `proto` per the prototype rule; the clone joins the directory.
    pub fn clone_entity_from(&mut self, proto: EntityId) -> Option<EntityId> {
        let id = self.ids.allocate();
        let clone = self.entities.get(&proto)?.clone_as(id);
        self.entities.insert(id, clone);
        Some(id)
    }

    /// Walk the prototype chain from `id`, inclusive. The chain is finite by
    /// construction; the cap guards against directory corruption.
    pub fn prototype_chain(&self, id: EntityId) -> Vec<EntityId> {
        let mut chain = Vec::new();
        let mut node = Some(id);
        while let Some(current) = node {
            if chain.len() > 64 || chain.contains(&current) {
                tracing::error!(entity = %current, "prototype chain is not acyclic");
                break;
            }
            chain.push(current);
            node = self.entities.get(&current).and_then(|e| e.prototype);
        }
        chain
    }

    /// True iff `r` names `id` or any prototype above it.
    pub fn isa(&self, id: EntityId, r: &Ref) -> bool {
        self.prototype_chain(id).iter().any(|node| {
            self.entities
                .get(node)
                .and_then(|e| e.entity_ref.as_ref())
                .is_some_and(|er| er == r)
        })
    }

    /// Property lookup walking the prototype chain.
    pub fn lookup_member(&self, id: EntityId, name: &str) -> Option<Value> {
        for node in self.prototype_chain(id) {
            if let Some(v) = self.entities.get(&node).and_then(|e| e.own_property(name)) {
                return Some(v);
            }
        }
        None
    }

    /// The location containing `id`, tracked directly for avatars and found
    /// by scan for everything else.
    pub fn location_of(&self, id: EntityId) -> Option<EntityId> {
        if let Some(avatar) = self.entities.get(&id).and_then(|e| e.as_avatar()) {
            return avatar.location;
        }
        self.entities
            .values()
            .find(|e| {
                e.as_location()
                    .is_some_and(|l| l.contents.contains(&id) || l.exits.contains(&id))
            })
            .map(|e| e.id)
    }

    // ----- modules and refs -----------------------------------------------

    pub fn module_binding(&self, module: &str, name: &str) -> Option<Value> {
        self.modules.get(module)?.bindings.get(name).cloned()
    }

    /// Resolve a ref against a scope chain, then the declaring module, then
    /// builtins. Absolute refs go straight to their module. A bare name that
    /// resolves nowhere else but names a loaded module yields the module
    /// itself, so `items.torch` works as an expression.
    pub fn resolve_value(&self, scopes: &[Value], module: &str, r: &Ref) -> Option<Value> {
        if let Some(m) = r.module() {
            return self.module_binding(m, r.name());
        }
        for scope in scopes {
            let found = match scope {
                Value::Entity(id) => self.lookup_member(*id, r.name()),
                Value::Module(name) => self.module_binding(name, r.name()),
                _ => None,
            };
            if found.is_some() {
                return found;
            }
        }
        self.module_binding(module, r.name())
            .or_else(|| self.module_binding(builtins::MODULE, r.name()))
            .or_else(|| {
                self.modules
                    .contains_key(r.name())
                    .then(|| Value::Module(Arc::from(r.name())))
            })
    }

    /// Find a quest definition by ref, anchored or not.
    pub fn quest(&self, r: &Ref) -> Option<Arc<Quest>> {
        let lookup = |module: &str, name: &str| match self.module_binding(module, name) {
            Some(Value::Quest(q)) => Some(q),
            _ => None,
        };
        match r.module() {
            Some(m) => lookup(m, r.name()),
            None => self
                .modules
                .keys()
                .find_map(|m| lookup(m, r.name())),
        }
    }

    /// The absolute ref of the entity, if it is content-defined.
    pub fn entity_ref(&self, id: EntityId) -> Option<&Ref> {
        self.entities.get(&id)?.entity_ref.as_ref()
    }

    // ----- scheduling -----------------------------------------------------

    /// Queue `callback` to run on the tick loop after `delay`. Ties fire in
    /// enqueue order.
    pub fn schedule(&mut self, delay: Duration, callback: impl FnOnce(&mut World) + Send + 'static) {
        self.schedule_seq += 1;
        self.schedule.push(Scheduled {
            due: Instant::now() + delay,
            seq: self.schedule_seq,
            callback: Box::new(callback),
        });
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.schedule.iter().map(|s| s.due).min()
    }

    /// Run every callback whose deadline has passed, in (due, enqueue) order.
    pub(crate) fn run_due_callbacks(&mut self, now: Instant) {
        loop {
            let next = self
                .schedule
                .iter()
                .enumerate()
                .filter(|(_, s)| s.due <= now)
                .min_by_key(|(_, s)| (s.due, s.seq))
                .map(|(i, _)| i);
            let Some(i) = next else { break };
            let entry = self.schedule.swap_remove(i);
            (entry.callback)(self);
        }
    }

    pub(crate) fn next_activity_token(&mut self) -> u64 {
        self.activity_tokens += 1;
        self.activity_tokens
    }

    // ----- client updates -------------------------------------------------

    /// Queue an update for the avatar's session, if any is connected.
    pub fn push_update(&mut self, avatar: EntityId, update: ClientUpdate) {
        self.sessions.push_update(avatar, update);
    }

    pub fn show(&mut self, avatar: EntityId, text: impl Into<String>) {
        self.push_update(avatar, ClientUpdate::ShowText { text: text.into() });
    }

    pub fn show_notice(&mut self, avatar: EntityId, text: impl Into<String>) {
        self.push_update(avatar, ClientUpdate::ShowNotice { text: text.into() });
    }

    pub fn show_error(&mut self, avatar: EntityId, text: impl Into<String>) {
        self.push_update(avatar, ClientUpdate::ShowError { text: text.into() });
    }

    /// Serialize and send one batch per avatar whose buffer is non-empty.
    pub fn flush_updates(&mut self) {
        self.sessions.flush();
    }

    // ----- script plumbing ------------------------------------------------

    /// Handle a VM yield that nobody is waiting on: schedule awaits, log
    /// errors, discard values.
    pub fn drive(&mut self, result: Result<Exec, ExecError>) {
        match result {
            Ok(Exec::Await {
                future,
                continuation,
            }) => self.spawn_await(future, continuation),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "script error"),
        }
    }

    /// Describe an entity with an article: "a rusty sword", "the well".
    /// Avatars are proper names and never take an article.
    pub fn describe_entity(&self, id: EntityId, format: Format) -> String {
        use thornvale_domain::bytecode::Article;
        let entity = self.entity(id);
        let brief = entity
            .and_then(|e| e.brief().map(str::to_string))
            .unwrap_or_else(|| "something".to_string());
        let proper = entity.is_some_and(|e| e.is_avatar());
        let mut out = match format.article {
            _ if proper => brief,
            Article::Plain => brief,
            Article::Definite => format!("the {brief}"),
            Article::Indefinite => {
                let vowel = brief
                    .chars()
                    .next()
                    .is_some_and(|c| "aeiou".contains(c.to_ascii_lowercase()));
                if vowel {
                    format!("an {brief}")
                } else {
                    format!("a {brief}")
                }
            }
        };
        if format.capitalize {
            let mut chars = out.chars();
            if let Some(c) = chars.next() {
                out = c.to_uppercase().collect::<String>() + chars.as_str();
            }
        }
        out
    }
}

impl ScriptContext for World {
    fn resolve(&mut self, scopes: &[Value], module: &str, r: &Ref) -> Option<Value> {
        self.resolve_value(scopes, module, r)
    }

    fn member(&mut self, target: &Value, name: &str) -> Result<Option<Value>, ExecError> {
        match target {
            Value::Entity(id) => Ok(self.lookup_member(*id, name)),
            Value::Module(m) => Ok(self.module_binding(m, name)),
            Value::Quest(q) => Ok(q.member(name).cloned()),
            Value::Phase(p) => Ok(p.members.get(name).cloned()),
            Value::Race(r) => Ok(r.member(name).cloned()),
            Value::Skill(s) => Ok(s.member(name).cloned()),
            Value::Region(r) => Ok(r.member(name).cloned()),
            other => Err(ExecError::TypeMismatch {
                expected: "entity or module",
                found: other.type_name(),
            }),
        }
    }

    fn set_member(&mut self, target: &Value, name: &str, value: Value) -> Result<(), ExecError> {
        match target {
            Value::Entity(id) => {
                let entity = self.entity_mut(*id).ok_or(ExecError::TypeMismatch {
                    expected: "live entity",
                    found: "entity",
                })?;
                entity.set_property(name, value)?;
                Ok(())
            }
            other => Err(ExecError::TypeMismatch {
                expected: "entity",
                found: other.type_name(),
            }),
        }
    }

    fn clone_entity(&mut self, proto: EntityId) -> Result<EntityId, ExecError> {
        self.clone_entity_from(proto).ok_or(ExecError::TypeMismatch {
            expected: "live entity",
            found: "entity",
        })
    }

    fn set_count(&mut self, item: EntityId, count: i64) -> Result<(), ExecError> {
        let entity = self.entity_mut(item).ok_or(ExecError::TypeMismatch {
            expected: "live entity",
            found: "entity",
        })?;
        match entity.kind.item_mut() {
            Some(facet) => {
                facet.count = count;
                Ok(())
            }
            None => Err(ExecError::TypeMismatch {
                expected: "stackable item",
                found: entity.kind.kind_name(),
            }),
        }
    }

    fn make_portal(
        &mut self,
        proto: EntityId,
        direction: Direction,
        destination: Ref,
    ) -> Result<EntityId, ExecError> {
        let id = self.clone_entity_from(proto).ok_or(ExecError::TypeMismatch {
            expected: "portal prototype",
            found: "entity",
        })?;
        let entity = self.entity_mut(id).expect("clone joined the directory");
        match entity.as_portal_mut() {
            Some(portal) => {
                portal.direction = Some(direction);
                portal.destination = Some(destination);
                Ok(id)
            }
            None => {
                self.remove_entity(id);
                Err(ExecError::TypeMismatch {
                    expected: "portal prototype",
                    found: "entity",
                })
            }
        }
    }

    fn call_native(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        builtins::call(self, name, args)
    }

    fn spawn_await(&mut self, future: FutureValue, continuation: Continuation) {
        let FutureValue::Sleep { seconds } = future;
        let delay = Duration::from_secs_f64(seconds.max(0.0));
        self.schedule(delay, move |world| {
            let result = vm::resume(world, continuation);
            world.drive(result);
        });
    }

    fn describe(&self, value: &Value, format: Format) -> String {
        match value {
            Value::Entity(id) => self.describe_entity(*id, format),
            other => {
                let mut s = other.to_string();
                if format.capitalize {
                    let mut chars = s.chars();
                    if let Some(c) = chars.next() {
                        s = c.to_uppercase().collect::<String>() + chars.as_str();
                    }
                }
                s
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn isa_walks_the_prototype_chain() {
        let mut world = empty_world();
        let root = world.create_entity(EntityKind::Thing(Default::default()));
        world.entity_mut(root).unwrap().entity_ref = Some(Ref::absolute("items", "tool"));
        let proto = world.clone_entity_from(root).unwrap();
        world.entity_mut(proto).unwrap().entity_ref = Some(Ref::absolute("items", "axe"));
        let instance = world.clone_entity_from(proto).unwrap();

        assert!(world.isa(instance, &Ref::absolute("items", "axe")));
        assert!(world.isa(instance, &Ref::absolute("items", "tool")));
        assert!(!world.isa(instance, &Ref::absolute("items", "sword")));
    }

    #[test]
    fn member_lookup_delegates_to_prototypes() {
        let mut world = empty_world();
        let proto = world.create_entity(EntityKind::Thing(Default::default()));
        world.entity_mut(proto).unwrap().entity_ref = Some(Ref::absolute("items", "axe"));
        world
            .entity_mut(proto)
            .unwrap()
            .members
            .insert("sharp".into(), Value::Boolean(true));
        let instance = world.clone_entity_from(proto).unwrap();
        assert_eq!(
            world.lookup_member(instance, "sharp"),
            Some(Value::Boolean(true))
        );
        // An own member shadows the prototype's.
        world
            .entity_mut(instance)
            .unwrap()
            .members
            .insert("sharp".into(), Value::Boolean(false));
        assert_eq!(
            world.lookup_member(instance, "sharp"),
            Some(Value::Boolean(false))
        );
    }

    #[test]
    fn scheduled_callbacks_fire_in_deadline_then_enqueue_order() {
        let mut world = empty_world();
        let marker = world.create_entity(EntityKind::Thing(Default::default()));
        world
            .entity_mut(marker)
            .unwrap()
            .members
            .insert("order".into(), Value::list(vec![]));

        let push = |world: &mut World, marker: EntityId, n: f64| {
            let Some(Value::List(items)) = world.lookup_member(marker, "order") else {
                panic!();
            };
            let mut items = (*items).clone();
            items.push(Value::Number(n));
            world
                .entity_mut(marker)
                .unwrap()
                .members
                .insert("order".into(), Value::List(Arc::new(items)));
        };

        world.schedule(Duration::from_millis(50), move |w| push(w, marker, 2.0));
        world.schedule(Duration::from_millis(10), move |w| push(w, marker, 1.0));
        world.schedule(Duration::from_millis(50), move |w| push(w, marker, 3.0));

        world.run_due_callbacks(Instant::now() + Duration::from_millis(100));
        let Some(Value::List(items)) = world.lookup_member(marker, "order") else {
            panic!();
        };
        assert_eq!(
            **items,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
        );
    }

    #[test]
    fn describe_entity_applies_articles() {
        use thornvale_domain::bytecode::Article;
        let mut world = empty_world();
        let loc = add_location(&mut world, "yard");
        let axe = add_thing(&mut world, loc, "axe");
        let door = add_thing(&mut world, loc, "red door");
        let fmt = |article, capitalize| Format {
            article,
            capitalize,
        };
        assert_eq!(
            world.describe_entity(axe, fmt(Article::Indefinite, false)),
            "an axe"
        );
        assert_eq!(
            world.describe_entity(door, fmt(Article::Indefinite, true)),
            "A red door"
        );
        assert_eq!(
            world.describe_entity(door, fmt(Article::Definite, false)),
            "the red door"
        );
    }
}
