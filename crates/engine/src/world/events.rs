//! Four-phase event dispatch.
//!
//! `trigger_event` runs allow → before → body → when → after over the
//! observer set; `respond_to` walks one observer's prototype chain trying
//! handlers in insertion order. Handler errors are logged and read as nil,
//! so a failing `allow` handler does not veto.

use std::sync::Arc;

use thornvale_domain::bytecode::{Constraint, Param, ScriptFunction};
use thornvale_domain::entity::EventPhase;
use thornvale_domain::ids::EntityId;
use thornvale_domain::value::Value;

use crate::script::vm::{self, Exec};

use super::World;

impl World {
    /// Dispatch `name` at `location`. Participants respond first and are the
    /// only observers of the `when` phase; `body` is the authoritative state
    /// change and runs only if no observer's allow handler returns false.
    pub fn trigger_event(
        &mut self,
        name: &str,
        location: EntityId,
        participants: &[EntityId],
        args: &[Value],
        body: impl FnOnce(&mut World),
    ) -> bool {
        let observers = self.observers(location, participants);
        for &observer in &observers {
            if let Value::Boolean(false) = self.respond_to(observer, EventPhase::Allow, name, args)
            {
                tracing::debug!(event = name, observer = %observer, "event vetoed");
                return false;
            }
        }
        for &observer in &observers {
            let _ = self.respond_to(observer, EventPhase::Before, name, args);
        }
        body(self);
        for &participant in participants {
            let _ = self.respond_to(participant, EventPhase::When, name, args);
        }
        for &observer in &observers {
            let _ = self.respond_to(observer, EventPhase::After, name, args);
        }
        true
    }

    /// The observer set: participants, the location, its contents, and its
    /// exits, de-duplicated preserving first appearance.
    pub(crate) fn observers(&self, location: EntityId, participants: &[EntityId]) -> Vec<EntityId> {
        let mut observers: Vec<EntityId> = Vec::new();
        let mut push = |id: EntityId, observers: &mut Vec<EntityId>| {
            if !observers.contains(&id) {
                observers.push(id);
            }
        };
        for &p in participants {
            push(p, &mut observers);
        }
        push(location, &mut observers);
        if let Some(loc) = self.entity(location).and_then(|e| e.as_location()) {
            for &id in loc.contents.iter().chain(loc.exits.iter()) {
                push(id, &mut observers);
            }
        }
        observers
    }

    /// Try `observer`'s handlers for `(phase, name)`, walking the prototype
    /// chain. The observer is prepended to the argument list. The first
    /// matching handler that returns a value ends the chain; `await` detaches
    /// the script and reads as nil; `fallthrough` moves on.
    pub fn respond_to(
        &mut self,
        observer: EntityId,
        phase: EventPhase,
        name: &str,
        args: &[Value],
    ) -> Value {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::Entity(observer));
        full_args.extend_from_slice(args);

        for node in self.prototype_chain(observer) {
            let handlers: Vec<Arc<ScriptFunction>> = match self.entity(node) {
                Some(e) => e.handlers_for(phase, name).map(|h| h.func.clone()).collect(),
                None => continue,
            };
            for func in handlers {
                if func.params.len() != full_args.len() {
                    continue;
                }
                if !self.params_match(&func.params, &full_args) {
                    continue;
                }
                let scopes = vec![Value::Module(Arc::from(func.module.as_str()))];
                match vm::call_function(self, func, full_args.clone(), scopes) {
                    Ok(Exec::Value(v)) => return v,
                    Ok(Exec::Fallthrough) => continue,
                    Ok(Exec::Await {
                        future,
                        continuation,
                    }) => {
                        // The suspended script runs to completion on its own;
                        // it cannot influence this dispatch. For the allow
                        // phase nil reads as permission.
                        use crate::script::vm::ScriptContext;
                        self.spawn_await(future, continuation);
                        return Value::Nil;
                    }
                    Err(e) => {
                        tracing::error!(
                            event = name,
                            phase = %phase,
                            observer = %observer,
                            error = %e,
                            "handler failed"
                        );
                        return Value::Nil;
                    }
                }
            }
        }
        Value::Nil
    }

    fn params_match(&self, params: &[Param], args: &[Value]) -> bool {
        params
            .iter()
            .zip(args)
            .all(|(p, a)| self.constraint_matches(&p.constraint, a, &args[0]))
    }

    /// Test one argument against one parameter constraint.
    pub(crate) fn constraint_matches(
        &self,
        constraint: &Constraint,
        arg: &Value,
        observer: &Value,
    ) -> bool {
        match constraint {
            Constraint::None => true,
            Constraint::SelfRef => arg == observer,
            Constraint::Prototype(r) => match arg {
                Value::Entity(id) => self.isa(*id, r),
                Value::Quest(q) => q.quest_ref() == r,
                _ => false,
            },
            Constraint::Quest { quest, phase } => {
                let Some(avatar) = arg
                    .as_entity()
                    .and_then(|id| self.entity(id))
                    .and_then(|e| e.as_avatar())
                else {
                    return false;
                };
                match phase.as_str() {
                    "available" => self.quest_available(avatar, quest),
                    "offered" => avatar
                        .offer
                        .as_ref()
                        .is_some_and(|o| &o.quest == quest),
                    "incomplete" => avatar.active_quests.contains_key(quest),
                    "complete" => avatar.completed_quests.contains_key(quest),
                    _ => avatar
                        .active_quests
                        .get(quest)
                        .is_some_and(|state| state.phase == *phase),
                }
            }
            Constraint::Race(r) => arg
                .as_entity()
                .and_then(|id| self.entity(id))
                .and_then(|e| e.as_avatar())
                .and_then(|a| a.race.as_ref())
                .is_some_and(|race| race == r),
            Constraint::Equipped(r) => arg
                .as_entity()
                .and_then(|id| self.entity(id))
                .and_then(|e| e.as_avatar())
                .is_some_and(|a| a.equipped.values().any(|&item| self.isa(item, r))),
        }
    }

    fn quest_available(&self, avatar: &thornvale_domain::avatar::Avatar, quest: &thornvale_domain::refs::Ref) -> bool {
        if avatar.active_quests.contains_key(quest) || avatar.completed_quests.contains_key(quest)
        {
            return false;
        }
        match self.quest(quest) {
            Some(q) => avatar.level >= q.required_level(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::compiler::Compiler;
    use crate::script::parser::Parser;
    use crate::world::test_support::*;
    use thornvale_domain::avatar::Offer;
    use thornvale_domain::refs::Ref;

    /// Compile one handler body and register it on `target`.
    fn register_handler(
        world: &mut World,
        target: EntityId,
        phase: EventPhase,
        event: &str,
        params: Vec<Param>,
        body_src: &str,
    ) {
        let wrapped = format!("def t: thing {{ when test(self) {{ {body_src} }} }}");
        let out = Parser::new(&wrapped).parse();
        assert_eq!(out.errors, 0);
        let crate::script::ast::Item::Entity { body, .. } = &out.items[0] else {
            panic!();
        };
        let func = Compiler::new("test")
            .compile_function(Some(event.to_string()), params, &body.handlers[0].block)
            .unwrap();
        world
            .entity_mut(target)
            .unwrap()
            .add_handler(phase, event, Arc::new(func));
    }

    fn p(name: &str) -> Param {
        Param::new(name, Constraint::None)
    }

    #[test]
    fn allow_veto_prevents_body_and_later_phases() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let avatar = add_avatar(&mut world, yard, "traveler");
        let gate = add_portal(
            &mut world,
            yard,
            thornvale_domain::entities::Direction::North,
            Ref::absolute("test", "road"),
        );
        // The portal vetoes, and records that its allow ran.
        register_handler(
            &mut world,
            gate,
            EventPhase::Allow,
            "exit_location",
            vec![p("self"), p("actor"), p("loc"), p("portal")],
            "self.saw_allow = true return false",
        );
        register_handler(
            &mut world,
            gate,
            EventPhase::After,
            "exit_location",
            vec![p("self"), p("actor"), p("loc"), p("portal")],
            "self.saw_after = true",
        );

        let args = vec![
            Value::Entity(avatar),
            Value::Entity(yard),
            Value::Entity(gate),
        ];
        let mut body_ran = false;
        let permitted = world.trigger_event(
            "exit_location",
            yard,
            &[avatar, gate],
            &args,
            |_| body_ran = true,
        );

        assert!(!permitted);
        assert!(!body_ran);
        assert_eq!(
            world.lookup_member(gate, "saw_allow"),
            Some(Value::Boolean(true))
        );
        assert_eq!(world.lookup_member(gate, "saw_after"), None);
    }

    #[test]
    fn when_phase_reaches_participants_only() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let avatar = add_avatar(&mut world, yard, "traveler");
        let bystander = add_thing(&mut world, yard, "statue");
        for id in [avatar, bystander] {
            register_handler(
                &mut world,
                id,
                EventPhase::When,
                "wave",
                vec![p("self"), p("actor")],
                "self.waved = true",
            );
        }
        world.trigger_event("wave", yard, &[avatar], &[Value::Entity(avatar)], |_| {});
        assert_eq!(
            world.lookup_member(avatar, "waved"),
            Some(Value::Boolean(true))
        );
        assert_eq!(world.lookup_member(bystander, "waved"), None);
    }

    #[test]
    fn fallthrough_tries_later_handlers_across_the_chain() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        // Prototype with a handler; instance with a falling-through one.
        let proto = add_thing(&mut world, yard, "bell");
        world.entity_mut(proto).unwrap().entity_ref = Some(Ref::absolute("test", "bell"));
        register_handler(
            &mut world,
            proto,
            EventPhase::When,
            "ring",
            vec![p("self"), p("actor")],
            "return 'deep",
        );
        let instance = world.clone_entity_from(proto).unwrap();
        register_handler(
            &mut world,
            instance,
            EventPhase::When,
            "ring",
            vec![p("self"), p("actor")],
            "self.tried = true fallthrough",
        );

        let result = world.respond_to(
            instance,
            EventPhase::When,
            "ring",
            &[Value::Entity(instance)],
        );
        assert_eq!(result, Value::symbol("deep"));
        assert_eq!(
            world.lookup_member(instance, "tried"),
            Some(Value::Boolean(true))
        );
    }

    #[test]
    fn handler_errors_read_as_nil_and_do_not_veto() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let avatar = add_avatar(&mut world, yard, "traveler");
        register_handler(
            &mut world,
            avatar,
            EventPhase::Allow,
            "enter_location",
            vec![p("self"), p("actor")],
            "return missing_name.level", // undefined reference at runtime
        );
        let mut body_ran = false;
        let permitted = world.trigger_event(
            "enter_location",
            yard,
            &[avatar],
            &[Value::Entity(avatar)],
            |_| body_ran = true,
        );
        assert!(permitted);
        assert!(body_ran);
    }

    #[test]
    fn self_constraint_matches_the_observer() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let bell = add_thing(&mut world, yard, "bell");
        let other = add_thing(&mut world, yard, "rock");
        register_handler(
            &mut world,
            bell,
            EventPhase::When,
            "touch",
            vec![
                Param::new("self", Constraint::SelfRef),
                Param::new("target", Constraint::SelfRef),
            ],
            "return 'rang",
        );
        // Argument equals observer: matches.
        let hit = world.respond_to(bell, EventPhase::When, "touch", &[Value::Entity(bell)]);
        assert_eq!(hit, Value::symbol("rang"));
        // Argument is a different entity: no match, chain yields nil.
        let miss = world.respond_to(bell, EventPhase::When, "touch", &[Value::Entity(other)]);
        assert_eq!(miss, Value::Nil);
    }

    #[test]
    fn quest_constraint_selectors() {
        use thornvale_domain::quest::{Quest, QuestPhase, QuestState};

        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let avatar_id = add_avatar(&mut world, yard, "traveler");
        let npc = add_thing(&mut world, yard, "elder");
        let quest_ref = Ref::absolute("test", "well_quest");

        // Bind the quest into a module so `available` can see its level gate.
        let mut quest = Quest::new(quest_ref.clone());
        quest.phases.push(Arc::new(QuestPhase::new("fetch")));
        let mut module = crate::world::Module::new("test");
        module
            .bindings
            .insert("well_quest".into(), Value::Quest(Arc::new(quest)));
        world.modules.insert("test".into(), module);

        let constraint = |phase: &str| Constraint::Quest {
            quest: quest_ref.clone(),
            phase: phase.to_string(),
        };
        let arg = Value::Entity(avatar_id);
        let observer = Value::Entity(npc);

        assert!(world.constraint_matches(&constraint("available"), &arg, &observer));
        assert!(!world.constraint_matches(&constraint("offered"), &arg, &observer));

        world.entity_mut(avatar_id).unwrap().as_avatar_mut().unwrap().offer = Some(Offer {
            quest: quest_ref.clone(),
            npc,
        });
        assert!(world.constraint_matches(&constraint("offered"), &arg, &observer));

        let avatar = world.entity_mut(avatar_id).unwrap().as_avatar_mut().unwrap();
        avatar.offer = None;
        avatar
            .active_quests
            .insert(quest_ref.clone(), QuestState::at_phase("fetch"));
        assert!(world.constraint_matches(&constraint("incomplete"), &arg, &observer));
        assert!(world.constraint_matches(&constraint("fetch"), &arg, &observer));
        assert!(!world.constraint_matches(&constraint("deliver"), &arg, &observer));
        assert!(!world.constraint_matches(&constraint("available"), &arg, &observer));

        let avatar = world.entity_mut(avatar_id).unwrap().as_avatar_mut().unwrap();
        avatar.active_quests.clear();
        avatar.completed_quests.insert(quest_ref.clone(), 12345);
        assert!(world.constraint_matches(&constraint("complete"), &arg, &observer));
        assert!(!world.constraint_matches(&constraint("available"), &arg, &observer));
    }

    #[test]
    fn observer_order_and_deduplication() {
        let mut world = empty_world();
        let yard = add_location(&mut world, "yard");
        let avatar = add_avatar(&mut world, yard, "traveler");
        let statue = add_thing(&mut world, yard, "statue");
        let gate = add_portal(
            &mut world,
            yard,
            thornvale_domain::entities::Direction::North,
            Ref::absolute("test", "road"),
        );
        // The avatar is both a participant and in the contents; it appears
        // once, first.
        let observers = world.observers(yard, &[avatar, gate]);
        assert_eq!(observers, vec![avatar, gate, yard, statue]);
    }
}
