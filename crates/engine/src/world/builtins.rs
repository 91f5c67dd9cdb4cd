//! The builtins module: root prototypes for every subkind plus the native
//! functions scripts call. Natives are bound by name; the VM resolves the
//! name back through [`call`] at call time.

use std::sync::Arc;

use rand::Rng;

use thornvale_domain::avatar::Avatar;
use thornvale_domain::entities::{
    Creature, Equipment, Fixture, Item, Location, Portal, ResourceNode, Thing, Weapon,
};
use thornvale_domain::entity::EntityKind;
use thornvale_domain::ids::EntityId;
use thornvale_domain::refs::Ref;
use thornvale_domain::value::{Function, FutureValue, NativeFunction, Value};

use crate::script::vm::ExecError;

use super::{Module, World};

/// Name of the builtins module.
pub const MODULE: &str = "builtins";

const ROOTS: [&str; 10] = [
    "thing",
    "item",
    "equipment",
    "weapon",
    "portal",
    "location",
    "creature",
    "avatar",
    "resource_node",
    "fixture",
];

const NATIVES: [&str; 21] = [
    "show",
    "show_notice",
    "tell",
    "say",
    "sleep",
    "range",
    "len",
    "random",
    "spawn",
    "place",
    "travel",
    "offer_quest",
    "advance_quest",
    "complete_quest",
    "give_item",
    "remove_item",
    "has_item",
    "count_items",
    "raise_skill",
    "begin_activity",
    "cancel_activity",
];

/// Install the builtins module: one root prototype per subkind and one
/// binding per native.
pub fn install(world: &mut World) {
    let mut module = Module::new(MODULE);
    for name in ROOTS {
        let kind = root_kind(name);
        let id = world.create_entity(kind);
        world.entity_mut(id).expect("fresh entity").entity_ref =
            Some(Ref::absolute(MODULE, name));
        module.bindings.insert(name.to_string(), Value::Entity(id));
    }
    for name in NATIVES {
        module.bindings.insert(
            name.to_string(),
            Value::Function(Function::Native(NativeFunction::new(name))),
        );
    }
    world.modules.insert(MODULE.to_string(), module);
}

fn root_kind(name: &str) -> EntityKind {
    match name {
        "item" => EntityKind::Item(Item::default()),
        "equipment" => EntityKind::Equipment(Equipment::default()),
        "weapon" => EntityKind::Weapon(Weapon::default()),
        "portal" => EntityKind::Portal(Portal::default()),
        "location" => EntityKind::Location(Location::default()),
        "creature" => EntityKind::Creature(Creature::default()),
        "avatar" => EntityKind::Avatar(Box::new(Avatar::default())),
        "resource_node" => EntityKind::ResourceNode(ResourceNode::default()),
        "fixture" => EntityKind::Fixture(Fixture::default()),
        _ => EntityKind::Thing(Thing::default()),
    }
}

/// Dispatch a native call by name.
pub fn call(world: &mut World, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
    match name {
        "show" => {
            let avatar = entity_arg(&args, 0)?;
            let text = string_arg(&args, 1)?;
            world.show(avatar, text);
            Ok(Value::Nil)
        }
        "show_notice" => {
            let avatar = entity_arg(&args, 0)?;
            let text = string_arg(&args, 1)?;
            world.show_notice(avatar, text);
            Ok(Value::Nil)
        }
        "tell" => {
            // An NPC speaks to one avatar.
            let speaker = entity_arg(&args, 0)?;
            let avatar = entity_arg(&args, 1)?;
            let text = string_arg(&args, 2)?;
            world.tell(speaker, avatar, &text);
            Ok(Value::Nil)
        }
        "say" => {
            let actor = entity_arg(&args, 0)?;
            let text = string_arg(&args, 1)?;
            world.say(actor, &text);
            Ok(Value::Nil)
        }
        "sleep" => {
            let seconds = number_arg(&args, 0)?;
            Ok(Value::Future(FutureValue::Sleep { seconds }))
        }
        "range" => {
            let min = integer_arg(&args, 0)?;
            let max = integer_arg(&args, 1)?;
            Ok(Value::Range(min, max))
        }
        "len" => match args.first() {
            Some(Value::List(items)) => Ok(Value::from(items.len() as i64)),
            Some(Value::String(s)) => Ok(Value::from(s.chars().count() as i64)),
            Some(other) => Err(ExecError::TypeMismatch {
                expected: "list or string",
                found: other.type_name(),
            }),
            None => Err(missing_arg()),
        },
        "random" => {
            let min = integer_arg(&args, 0)?;
            let max = integer_arg(&args, 1)?;
            if min > max {
                return Ok(Value::from(min));
            }
            Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
        }
        "spawn" => {
            let proto = entity_arg(&args, 0)?;
            let id = world
                .clone_entity_from(proto)
                .ok_or(ExecError::TypeMismatch {
                    expected: "live entity",
                    found: "entity",
                })?;
            Ok(Value::Entity(id))
        }
        "place" => {
            let entity = entity_arg(&args, 0)?;
            let location = entity_arg(&args, 1)?;
            world.place(entity, location);
            Ok(Value::Nil)
        }
        "travel" => {
            let avatar = entity_arg(&args, 0)?;
            let portal = entity_arg(&args, 1)?;
            world.travel(avatar, portal);
            Ok(Value::Nil)
        }
        "offer_quest" => {
            let npc = entity_arg(&args, 0)?;
            let avatar = entity_arg(&args, 1)?;
            let quest = quest_ref_arg(&args, 2)?;
            world.offer_quest(npc, avatar, &quest);
            Ok(Value::Nil)
        }
        "advance_quest" => {
            let avatar = entity_arg(&args, 0)?;
            let quest = quest_ref_arg(&args, 1)?;
            world.advance_quest(avatar, &quest);
            Ok(Value::Nil)
        }
        "complete_quest" => {
            let avatar = entity_arg(&args, 0)?;
            let quest = quest_ref_arg(&args, 1)?;
            world.complete_quest(avatar, &quest);
            Ok(Value::Nil)
        }
        "give_item" => {
            let avatar = entity_arg(&args, 0)?;
            let proto = entity_arg(&args, 1)?;
            let count = match args.get(2) {
                Some(v) => v.as_integer().ok_or(ExecError::TypeMismatch {
                    expected: "number",
                    found: v.type_name(),
                })?,
                None => 1,
            };
            Ok(Value::Boolean(world.give_item(avatar, proto, count)))
        }
        "remove_item" => {
            let avatar = entity_arg(&args, 0)?;
            let proto = proto_ref_arg(world, &args, 1)?;
            let count = match args.get(2) {
                Some(v) => v.as_integer().ok_or(ExecError::TypeMismatch {
                    expected: "number",
                    found: v.type_name(),
                })?,
                None => 1,
            };
            Ok(Value::Boolean(world.remove_item(avatar, &proto, count)))
        }
        "has_item" => {
            let avatar = entity_arg(&args, 0)?;
            let proto = proto_ref_arg(world, &args, 1)?;
            Ok(Value::Boolean(world.count_items(avatar, &proto) > 0))
        }
        "count_items" => {
            let avatar = entity_arg(&args, 0)?;
            let proto = proto_ref_arg(world, &args, 1)?;
            Ok(Value::from(world.count_items(avatar, &proto)))
        }
        "begin_activity" => {
            use super::activity::ActivityHook;
            let avatar = entity_arg(&args, 0)?;
            let name = string_arg(&args, 1)?;
            let seconds = number_arg(&args, 2)?;
            let on_finish = ActivityHook::Script(function_arg(&args, 3)?);
            let on_cancel = match args.get(4) {
                Some(Value::Function(f)) => Some(ActivityHook::Script(f.clone())),
                Some(Value::Nil) | None => None,
                Some(other) => {
                    return Err(ExecError::TypeMismatch {
                        expected: "function",
                        found: other.type_name(),
                    })
                }
            };
            Ok(Value::Boolean(world.begin_activity(
                avatar, name, seconds, on_finish, on_cancel,
            )))
        }
        "cancel_activity" => {
            let avatar = entity_arg(&args, 0)?;
            world.cancel_activity(avatar);
            Ok(Value::Nil)
        }
        "raise_skill" => {
            let avatar = entity_arg(&args, 0)?;
            let skill = match args.get(1) {
                Some(Value::Skill(s)) => s.skill_ref().clone(),
                Some(Value::Ref(r)) => r.clone(),
                Some(other) => {
                    return Err(ExecError::TypeMismatch {
                        expected: "skill",
                        found: other.type_name(),
                    })
                }
                None => return Err(missing_arg()),
            };
            world.raise_skill(avatar, &skill, 1);
            Ok(Value::Nil)
        }
        _ => Err(ExecError::UndefinedSymbol(name.to_string())),
    }
}

fn missing_arg() -> ExecError {
    ExecError::TypeMismatch {
        expected: "argument",
        found: "nothing",
    }
}

fn entity_arg(args: &[Value], i: usize) -> Result<EntityId, ExecError> {
    match args.get(i) {
        Some(v) => v.as_entity().ok_or(ExecError::TypeMismatch {
            expected: "entity",
            found: v.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

fn string_arg(args: &[Value], i: usize) -> Result<String, ExecError> {
    match args.get(i) {
        Some(Value::String(s)) => Ok(s.to_string()),
        Some(other) => Err(ExecError::TypeMismatch {
            expected: "string",
            found: other.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

fn function_arg(args: &[Value], i: usize) -> Result<Function, ExecError> {
    match args.get(i) {
        Some(Value::Function(f)) => Ok(f.clone()),
        Some(other) => Err(ExecError::TypeMismatch {
            expected: "function",
            found: other.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

fn number_arg(args: &[Value], i: usize) -> Result<f64, ExecError> {
    match args.get(i) {
        Some(v) => v.as_number().ok_or(ExecError::TypeMismatch {
            expected: "number",
            found: v.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

fn integer_arg(args: &[Value], i: usize) -> Result<i64, ExecError> {
    match args.get(i) {
        Some(v) => v.as_integer().ok_or(ExecError::TypeMismatch {
            expected: "number",
            found: v.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

/// Quests may arrive as quest values or refs.
fn quest_ref_arg(args: &[Value], i: usize) -> Result<Ref, ExecError> {
    match args.get(i) {
        Some(Value::Quest(q)) => Ok(q.quest_ref().clone()),
        Some(Value::Ref(r)) => Ok(r.clone()),
        Some(other) => Err(ExecError::TypeMismatch {
            expected: "quest",
            found: other.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

/// Item prototypes may arrive as refs or as the prototype entity itself.
fn proto_ref_arg(world: &World, args: &[Value], i: usize) -> Result<Ref, ExecError> {
    match args.get(i) {
        Some(Value::Ref(r)) => Ok(r.clone()),
        Some(Value::Entity(id)) => {
            world
                .entity_ref(*id)
                .cloned()
                .ok_or(ExecError::TypeMismatch {
                    expected: "content-defined prototype",
                    found: "entity",
                })
        }
        Some(other) => Err(ExecError::TypeMismatch {
            expected: "ref",
            found: other.type_name(),
        }),
        None => Err(missing_arg()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::test_support::empty_world;

    #[test]
    fn install_binds_roots_and_natives() {
        let world = empty_world();
        for name in ROOTS {
            match world.module_binding(MODULE, name) {
                Some(Value::Entity(id)) => {
                    assert_eq!(
                        world.entity_ref(id),
                        Some(&Ref::absolute(MODULE, name)),
                        "root {name} carries its ref"
                    );
                }
                other => panic!("{name} bound to {other:?}"),
            }
        }
        for name in NATIVES {
            assert!(
                matches!(
                    world.module_binding(MODULE, name),
                    Some(Value::Function(Function::Native(_)))
                ),
                "{name} is a native"
            );
        }
    }

    #[test]
    fn sleep_returns_a_future() {
        let mut world = empty_world();
        let v = call(&mut world, "sleep", vec![Value::Number(2.5)]).unwrap();
        assert!(matches!(
            v,
            Value::Future(FutureValue::Sleep { seconds }) if seconds == 2.5
        ));
    }

    #[test]
    fn len_counts_lists_and_strings() {
        let mut world = empty_world();
        let v = call(
            &mut world,
            "len",
            vec![Value::list(vec![Value::Nil, Value::Nil])],
        )
        .unwrap();
        assert_eq!(v, Value::Number(2.0));
        let v = call(&mut world, "len", vec![Value::from("well")]).unwrap();
        assert_eq!(v, Value::Number(4.0));
        assert!(call(&mut world, "len", vec![Value::Number(1.0)]).is_err());
    }

    #[test]
    fn unknown_native_is_an_undefined_symbol() {
        let mut world = empty_world();
        assert_eq!(
            call(&mut world, "no_such", vec![]).unwrap_err(),
            ExecError::UndefinedSymbol("no_such".into())
        );
    }
}
