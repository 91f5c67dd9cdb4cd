//! World loading.
//!
//! Reads the `MODULES` manifest, parses and evaluates each script file into
//! a module, applies `extend` forms, twins portals, and fires the
//! `start_world` events. Loading is best-effort: authoring errors are logged
//! per item and the load fails at the end if any occurred.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use thornvale_domain::bytecode::{Constraint, Param, ScriptFunction};
use thornvale_domain::entity::EventPhase;
use thornvale_domain::quest::{Quest, QuestPhase};
use thornvale_domain::race::Race;
use thornvale_domain::refs::Ref;
use thornvale_domain::skill::Skill;
use thornvale_domain::value::{Function, Value};

use crate::script::ast::{ConstraintDef, EntityBody, Expr, Item, MethodDef, ParamDef, Stmt};
use crate::script::compiler::Compiler;
use crate::script::parser::Parser;
use crate::script::vm::{self, Exec};

use super::{Module, World};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("{0} authoring errors; see the log")]
    Failures(usize),
}

/// Loads a content tree rooted at a directory containing `MODULES`.
pub struct WorldLoader {
    root: PathBuf,
}

impl WorldLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load every module named by the manifest, then link the world.
    pub fn load(&self, world: &mut World) -> Result<(), LoadError> {
        let manifest_path = self.root.join("MODULES");
        let manifest = std::fs::read_to_string(&manifest_path).map_err(|e| LoadError::Io {
            path: manifest_path,
            message: e.to_string(),
        })?;
        let mut errors = 0;
        let mut extends = Vec::new();
        for rel in parse_manifest(&manifest) {
            let path = self.root.join(&rel);
            let source = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "cannot read module");
                    errors += 1;
                    continue;
                }
            };
            let name = module_name(&rel);
            tracing::info!(module = %name, path = %path.display(), "loading module");
            errors += load_module_source(world, &name, &source, &mut extends);
        }
        errors += apply_extensions(world, extends);
        twin_portals(world);
        if errors > 0 {
            return Err(LoadError::Failures(errors));
        }
        Ok(())
    }
}

/// Manifest grammar: `#` comments; a line ending in `/` names a directory;
/// indented entries belong to the most recently named directory; non-indented
/// entries reset to the root.
pub fn parse_manifest(text: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut dir: Option<PathBuf> = None;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if let Some(d) = trimmed.strip_suffix('/') {
            dir = Some(PathBuf::from(d));
            continue;
        }
        let base = if Path::new(trimmed).extension().is_some() {
            PathBuf::from(trimmed)
        } else {
            PathBuf::from(format!("{trimmed}.lore"))
        };
        let path = match (&dir, indented) {
            (Some(d), true) => d.join(base),
            _ => {
                dir = None;
                base
            }
        };
        files.push(path);
    }
    files
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}

/// A deferred `extend` form, applied after all modules are loaded.
pub struct PendingExtend {
    module: String,
    target: Ref,
    body: EntityBody,
}

/// Parse and evaluate one module's source. Returns the number of errors.
pub fn load_module_source(
    world: &mut World,
    name: &str,
    source: &str,
    extends: &mut Vec<PendingExtend>,
) -> usize {
    let outcome = Parser::new(source).parse();
    let mut errors = outcome.errors;
    world
        .modules
        .entry(name.to_string())
        .or_insert_with(|| Module::new(name));
    let compiler = Compiler::new(name);
    for item in outcome.items {
        match item {
            Item::Entity {
                name: def_name,
                proto,
                startable,
                body,
                line,
            } => {
                if let Err(message) =
                    define_entity(world, &compiler, name, &def_name, &proto, startable, &body)
                {
                    tracing::error!("{line}: def {def_name}: {message}");
                    errors += 1;
                }
            }
            Item::Extend { target, body, line } => {
                let _ = line;
                extends.push(PendingExtend {
                    module: name.to_string(),
                    target,
                    body,
                });
            }
            Item::Quest {
                name: quest_name,
                members,
                phases,
                line,
            } => {
                let quest_ref = Ref::absolute(name, quest_name.clone());
                let mut quest = Quest::new(quest_ref);
                for (member, expr) in &members {
                    match eval_expr(world, &compiler, name, expr) {
                        Ok(v) => {
                            quest.members.insert(member.clone(), v);
                        }
                        Err(message) => {
                            tracing::error!("{line}: quest {quest_name}.{member}: {message}");
                            errors += 1;
                        }
                    }
                }
                for phase in phases {
                    let mut p = QuestPhase::new(phase.name.clone());
                    for (member, expr) in &phase.members {
                        match eval_expr(world, &compiler, name, expr) {
                            Ok(v) => {
                                p.members.insert(member.clone(), v);
                            }
                            Err(message) => {
                                tracing::error!(
                                    "{line}: phase {}.{member}: {message}",
                                    phase.name
                                );
                                errors += 1;
                            }
                        }
                    }
                    quest.phases.push(Arc::new(p));
                }
                bind(world, name, &quest_name, Value::Quest(Arc::new(quest)));
            }
            Item::Race {
                name: race_name,
                members,
                line,
            } => {
                let mut race = Race::new(Ref::absolute(name, race_name.clone()));
                for (member, expr) in &members {
                    match eval_expr(world, &compiler, name, expr) {
                        Ok(v) => {
                            race.members.insert(member.clone(), v);
                        }
                        Err(message) => {
                            tracing::error!("{line}: race {race_name}.{member}: {message}");
                            errors += 1;
                        }
                    }
                }
                bind(world, name, &race_name, Value::Race(Arc::new(race)));
            }
            Item::Skill {
                name: skill_name,
                members,
                line,
            } => {
                let mut skill = Skill::new(Ref::absolute(name, skill_name.clone()));
                for (member, expr) in &members {
                    match eval_expr(world, &compiler, name, expr) {
                        Ok(v) => {
                            skill.members.insert(member.clone(), v);
                        }
                        Err(message) => {
                            tracing::error!("{line}: skill {skill_name}.{member}: {message}");
                            errors += 1;
                        }
                    }
                }
                bind(world, name, &skill_name, Value::Skill(Arc::new(skill)));
            }
            Item::Func(def) => match compile_method(&compiler, world, name, &def) {
                Ok(func) => bind(
                    world,
                    name,
                    &def.name,
                    Value::Function(Function::Script(func)),
                ),
                Err(message) => {
                    tracing::error!("{}: func {}: {message}", def.line, def.name);
                    errors += 1;
                }
            },
        }
    }
    errors
}

fn bind(world: &mut World, module: &str, name: &str, value: Value) {
    if let Some(m) = world.modules.get_mut(module) {
        if m.bindings.insert(name.to_string(), value).is_some() {
            tracing::warn!(module, name, "binding redefined");
        }
    }
}

fn define_entity(
    world: &mut World,
    compiler: &Compiler,
    module: &str,
    name: &str,
    proto: &Ref,
    startable: bool,
    body: &EntityBody,
) -> Result<(), String> {
    let proto_id = match world.resolve_value(&[], module, proto) {
        Some(Value::Entity(id)) => id,
        Some(other) => return Err(format!("prototype {proto} is a {}", other.type_name())),
        None => return Err(format!("unknown prototype {proto}")),
    };
    let id = world
        .clone_entity_from(proto_id)
        .ok_or_else(|| format!("prototype {proto} is not live"))?;
    world.entity_mut(id).expect("fresh clone").entity_ref =
        Some(Ref::absolute(module, name));
    bind(world, module, name, Value::Entity(id));

    apply_body(world, compiler, module, id, body)?;

    if startable {
        world.startables.push(id);
        let is_location = world.entity(id).is_some_and(|e| e.as_location().is_some());
        if is_location && world.start_location.is_none() {
            world.start_location = Some(Ref::absolute(module, name));
        }
    }
    Ok(())
}

/// Evaluate member initializers and attach handlers and methods.
fn apply_body(
    world: &mut World,
    compiler: &Compiler,
    module: &str,
    id: thornvale_domain::ids::EntityId,
    body: &EntityBody,
) -> Result<(), String> {
    if !body.members.is_empty() {
        let init = compiler
            .compile_initializer(&format!("{module}.{id}"), &body.members)
            .map_err(|e| e.to_string())?;
        let scopes = vec![Value::Entity(id), Value::Module(Arc::from(module))];
        match vm::call_function(world, Arc::new(init), vec![Value::Entity(id)], scopes) {
            Ok(Exec::Value(_)) | Ok(Exec::Fallthrough) => {}
            Ok(Exec::Await { .. }) => return Err("initializer may not await".to_string()),
            Err(e) => return Err(e.to_string()),
        }
    }
    for handler in &body.handlers {
        let params = resolve_params(world, module, &handler.params);
        let func = compiler
            .compile_function(Some(handler.event.clone()), params, &handler.block)
            .map_err(|e| format!("{}: {e}", handler.line))?;
        if let Some(e) = world.entity_mut(id) {
            e.add_handler(handler.phase, handler.event.clone(), Arc::new(func));
        }
    }
    for method in &body.methods {
        let func = compile_method(compiler, world, module, method)
            .map_err(|message| format!("{}: {message}", method.line))?;
        if let Some(e) = world.entity_mut(id) {
            e.members
                .insert(method.name.clone(), Value::Function(Function::Script(func)));
        }
    }
    Ok(())
}

fn compile_method(
    compiler: &Compiler,
    world: &World,
    module: &str,
    def: &MethodDef,
) -> Result<Arc<ScriptFunction>, String> {
    let params = resolve_params(world, module, &def.params);
    compiler
        .compile_function(Some(def.name.clone()), params, &def.block)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

/// Anchor constraint refs. A relative ref resolves through the module and
/// builtins when the target is already bound; otherwise it anchors to the
/// current module, which covers forward references within a file.
fn resolve_params(world: &World, module: &str, params: &[ParamDef]) -> Vec<Param> {
    let anchor = |r: &Ref| -> Ref {
        if r.is_absolute() {
            return r.clone();
        }
        match world.resolve_value(&[], module, r) {
            Some(Value::Entity(id)) => world
                .entity_ref(id)
                .cloned()
                .unwrap_or_else(|| r.anchored_in(module)),
            Some(Value::Quest(q)) => q.quest_ref().clone(),
            Some(Value::Race(race)) => race.race_ref().clone(),
            Some(Value::Skill(skill)) => skill.skill_ref().clone(),
            _ => r.anchored_in(module),
        }
    };
    params
        .iter()
        .map(|p| {
            let constraint = match &p.constraint {
                ConstraintDef::None => Constraint::None,
                ConstraintDef::SelfRef => Constraint::SelfRef,
                ConstraintDef::Prototype(r) => Constraint::Prototype(anchor(r)),
                ConstraintDef::Quest { quest, phase } => Constraint::Quest {
                    quest: anchor(quest),
                    phase: phase.clone(),
                },
                ConstraintDef::Race(r) => Constraint::Race(anchor(r)),
                ConstraintDef::Equipped(r) => Constraint::Equipped(anchor(r)),
            };
            Param::new(p.name.clone(), constraint)
        })
        .collect()
}

/// Evaluate a bare expression in module scope via a synthetic thunk.
fn eval_expr(
    world: &mut World,
    compiler: &Compiler,
    module: &str,
    expr: &Expr,
) -> Result<Value, String> {
    let thunk = compiler
        .compile_function(None, Vec::new(), &[Stmt::Return(Some(expr.clone()))])
        .map_err(|e| e.to_string())?;
    let scopes = vec![Value::Module(Arc::from(module))];
    match vm::call_function(world, Arc::new(thunk), Vec::new(), scopes) {
        Ok(Exec::Value(v)) => Ok(v),
        Ok(_) => Ok(Value::Nil),
        Err(e) => Err(e.to_string()),
    }
}

/// Apply `extend` forms after all base definitions exist.
fn apply_extensions(world: &mut World, extends: Vec<PendingExtend>) -> usize {
    let mut errors = 0;
    for pending in extends {
        let compiler = Compiler::new(&pending.module);
        let target = pending.target.anchored_in(&pending.module);
        let id = match world.resolve_value(&[], &pending.module, &pending.target) {
            Some(Value::Entity(id)) => id,
            _ => {
                tracing::error!(target = %target, "extend target not found");
                errors += 1;
                continue;
            }
        };
        if let Err(message) = apply_body(world, &compiler, &pending.module, id, &pending.body) {
            tracing::error!(target = %target, "extend failed: {message}");
            errors += 1;
        }
    }
    errors
}

/// Resolve portal twins: for each exit, find the destination's exit in the
/// opposite direction pointing back at the origin, and cross-link them.
pub fn twin_portals(world: &mut World) {
    let locations: Vec<_> = world
        .entity_ids()
        .into_iter()
        .filter(|id| world.entity(*id).is_some_and(|e| e.as_location().is_some()))
        .collect();
    for &origin in &locations {
        let origin_ref = world.entity_ref(origin).cloned();
        let exits = match world.entity(origin).and_then(|e| e.as_location()) {
            Some(l) => l.exits.clone(),
            None => continue,
        };
        for exit in exits {
            let (direction, resolved_twin) = match world.entity(exit).and_then(|e| e.as_portal()) {
                Some(p) => (p.direction, p.twin),
                None => continue,
            };
            if resolved_twin.is_some() {
                continue;
            }
            let Some(direction) = direction else {
                tracing::warn!(portal = %exit, "exit has no direction");
                continue;
            };
            let Some(destination) = world.portal_destination(exit) else {
                tracing::warn!(portal = %exit, "exit destination does not resolve");
                continue;
            };
            let dest_exits = match world.entity(destination).and_then(|e| e.as_location()) {
                Some(l) => l.exits.clone(),
                None => continue,
            };
            let reverse = dest_exits.into_iter().find(|&back| {
                world
                    .entity(back)
                    .and_then(|e| e.as_portal())
                    .is_some_and(|p| p.direction == Some(direction.opposite()))
            });
            let Some(reverse) = reverse else {
                tracing::warn!(
                    portal = %exit,
                    direction = %direction,
                    "destination has no matching reverse exit"
                );
                continue;
            };
            // The reverse exit must point back at the origin.
            let back_dest = world
                .entity(reverse)
                .and_then(|e| e.as_portal())
                .and_then(|p| p.destination.clone());
            if back_dest.as_ref() != origin_ref.as_ref() {
                tracing::warn!(
                    portal = %exit,
                    "reverse exit points at {:?}, expected {:?}",
                    back_dest,
                    origin_ref
                );
                continue;
            }
            if let Some(p) = world.entity_mut(exit).and_then(|e| e.as_portal_mut()) {
                p.twin = Some(reverse);
            }
            if let Some(p) = world.entity_mut(reverse).and_then(|e| e.as_portal_mut()) {
                p.twin = Some(exit);
            }
        }
    }
}

impl World {
    pub(crate) fn entity_ids(&self) -> Vec<thornvale_domain::ids::EntityId> {
        let mut ids: Vec<_> = self.entities_keys();
        ids.sort();
        ids
    }

    /// Fire `start_world` on every startable entity.
    pub fn start_world(&mut self) {
        for startable in self.startables.clone() {
            let _ = self.respond_to(startable, EventPhase::When, "start_world", &[]);
        }
        tracing::info!(startables = self.startables.len(), "world started");
    }

    /// Fire `stop_world` on every startable entity.
    pub fn stop_world(&mut self) {
        for startable in self.startables.clone() {
            let _ = self.respond_to(startable, EventPhase::When, "stop_world", &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::test_support::empty_world;
    use thornvale_domain::entities::Direction;

    fn load(world: &mut World, name: &str, source: &str) -> usize {
        let mut extends = Vec::new();
        let errors = load_module_source(world, name, source, &mut extends);
        errors + apply_extensions(world, extends)
    }

    #[test]
    fn manifest_directories_and_indentation() {
        let manifest = "\
# world content
core/
    items
    village
standalone
quests/
    well.lore
";
        let files = parse_manifest(manifest);
        assert_eq!(
            files,
            vec![
                PathBuf::from("core/items.lore"),
                PathBuf::from("core/village.lore"),
                PathBuf::from("standalone.lore"),
                PathBuf::from("quests/well.lore"),
            ]
        );
    }

    #[test]
    fn defines_entities_with_members_and_prototypes() {
        let mut world = empty_world();
        let errors = load(
            &mut world,
            "items",
            r#"
            def tool: item {
                stack_limit = 5
            }
            def axe: tool {
                brief = "axe"
            }
            "#,
        );
        assert_eq!(errors, 0);
        let Some(Value::Entity(axe)) = world.module_binding("items", "axe") else {
            panic!();
        };
        assert!(world.isa(axe, &Ref::absolute("items", "tool")));
        assert!(world.isa(axe, &Ref::absolute("builtins", "item")));
        // stack_limit flows through the prototype's typed field copy.
        assert_eq!(
            world.entity(axe).unwrap().kind.item().unwrap().stack_limit,
            5
        );
        assert_eq!(world.entity(axe).unwrap().brief(), Some("axe"));
    }

    #[test]
    fn unknown_prototype_is_an_error_but_load_continues() {
        let mut world = empty_world();
        let errors = load(
            &mut world,
            "bad",
            r#"
            def ghost: phantasm { }
            def fine: thing { }
            "#,
        );
        assert_eq!(errors, 1);
        assert!(world.module_binding("bad", "fine").is_some());
        assert!(world.module_binding("bad", "ghost").is_none());
    }

    #[test]
    fn quests_races_and_functions_bind() {
        let mut world = empty_world();
        let errors = load(
            &mut world,
            "village",
            r#"
            defquest well_quest {
                name = "The Old Well"
                level = 2
                phase fetch { summary = "Fetch water." }
                phase deliver { summary = "Deliver it." }
            }
            defrace elf {
                name = "elf"
            }
            defskill mining {
                name = "mining"
                max_rank = 50
            }
            func greeting() {
                return "Well met."
            }
            "#,
        );
        assert_eq!(errors, 0);
        let Some(Value::Quest(q)) = world.module_binding("village", "well_quest") else {
            panic!();
        };
        assert_eq!(q.display_name(), "The Old Well");
        assert_eq!(q.required_level(), 2);
        assert_eq!(q.phases.len(), 2);
        assert!(matches!(
            world.module_binding("village", "elf"),
            Some(Value::Race(_))
        ));
        match world.module_binding("village", "mining") {
            Some(Value::Skill(s)) => assert_eq!(s.max_rank(), 50),
            other => panic!("mining bound to {other:?}"),
        }
        assert!(matches!(
            world.module_binding("village", "greeting"),
            Some(Value::Function(_))
        ));
    }

    #[test]
    fn deflocation_builds_exits_and_twins_link() {
        let mut world = empty_world();
        let errors = load(
            &mut world,
            "village",
            r#"
            def gate: portal {
                brief = "wooden gate"
            }
            deflocation plaza: location {
                brief = "plaza"
                exits = [gate -> north to village.well_yard]
            }
            deflocation well_yard: location {
                brief = "well yard"
                exits = [gate -> south to village.plaza]
            }
            "#,
        );
        assert_eq!(errors, 0);
        twin_portals(&mut world);

        let Some(Value::Entity(plaza)) = world.module_binding("village", "plaza") else {
            panic!();
        };
        let exits = world
            .entity(plaza)
            .unwrap()
            .as_location()
            .unwrap()
            .exits
            .clone();
        assert_eq!(exits.len(), 1);
        let north = exits[0];
        let portal = world.entity(north).unwrap().as_portal().unwrap();
        assert_eq!(portal.direction, Some(Direction::North));
        let twin = portal.twin.expect("twinned");
        let back = world.entity(twin).unwrap().as_portal().unwrap();
        assert_eq!(back.direction, Some(Direction::South));
        assert_eq!(back.twin, Some(north));
        // The start location is the first deflocation.
        assert_eq!(
            world.start_location,
            Some(Ref::absolute("village", "plaza"))
        );
        assert_eq!(world.startables.len(), 2);
    }

    #[test]
    fn extend_adds_members_to_existing_entities() {
        let mut world = empty_world();
        let errors = load(
            &mut world,
            "village",
            r#"
            def elder: creature {
                brief = "village elder"
            }
            extend elder {
                mood = 'patient
            }
            "#,
        );
        assert_eq!(errors, 0);
        let Some(Value::Entity(elder)) = world.module_binding("village", "elder") else {
            panic!();
        };
        assert_eq!(
            world.lookup_member(elder, "mood"),
            Some(Value::symbol("patient"))
        );
    }

    #[test]
    fn start_world_reaches_startables() {
        let mut world = empty_world();
        let errors = load(
            &mut world,
            "village",
            r#"
            deflocation plaza: location {
                when start_world(self) {
                    self.started = true
                }
            }
            "#,
        );
        assert_eq!(errors, 0);
        world.start_world();
        let Some(Value::Entity(plaza)) = world.module_binding("village", "plaza") else {
            panic!();
        };
        assert_eq!(
            world.lookup_member(plaza, "started"),
            Some(Value::Boolean(true))
        );
    }
}
