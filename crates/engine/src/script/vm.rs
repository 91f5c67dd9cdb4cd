//! Bytecode execution.
//!
//! The VM runs one call frame at a time on a private value stack. Suspension
//! is explicit: the `await` opcode snapshots the frame into a
//! [`Continuation`] and returns [`Exec::Await`]; the world resumes the same
//! block on its tick loop when the future fires. Between two successive
//! non-await opcodes nothing else interleaves.
//!
//! The VM reaches the live world through [`ScriptContext`], which keeps this
//! module testable against a stub world.

use std::sync::Arc;

use thiserror::Error;
use thornvale_domain::bytecode::{Constant, Format, Op, ScriptFunction};
use thornvale_domain::entities::Direction;
use thornvale_domain::error::PropertyError;
use thornvale_domain::ids::EntityId;
use thornvale_domain::refs::Ref;
use thornvale_domain::value::{Function, FutureValue, Value};

/// Runtime script failure. Errors abort the current handler only; the
/// dispatcher logs them and proceeds as if the handler returned nil.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("undefined symbol {0}")]
    UndefinedSymbol(String),
    #[error("undefined reference {0}")]
    UndefinedReference(Ref),
    #[error("index {index} out of bounds for list of {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("a reference is required here")]
    ReferenceRequired,
    #[error("value is not callable")]
    ExpectedCallable,
    #[error("await requires a future")]
    ExpectedFuture,
    #[error("invalid result")]
    InvalidResult,
    #[error("nested iteration is not supported")]
    NestedIterationNotSupported,
    #[error("{0}")]
    Property(#[from] PropertyError),
    #[error("malformed bytecode: {0}")]
    Malformed(&'static str),
}

/// The world surface the VM executes against.
pub trait ScriptContext {
    /// Resolve a ref through the invocation's scope chain (entities and
    /// modules), the function's module, and the builtins module.
    fn resolve(&mut self, scopes: &[Value], module: &str, r: &Ref) -> Option<Value>;

    /// Member lookup on a value; `Ok(None)` when the member is absent.
    fn member(&mut self, target: &Value, name: &str) -> Result<Option<Value>, ExecError>;

    fn set_member(&mut self, target: &Value, name: &str, value: Value) -> Result<(), ExecError>;

    fn clone_entity(&mut self, proto: EntityId) -> Result<EntityId, ExecError>;

    fn set_count(&mut self, item: EntityId, count: i64) -> Result<(), ExecError>;

    fn make_portal(
        &mut self,
        proto: EntityId,
        direction: Direction,
        destination: Ref,
    ) -> Result<EntityId, ExecError>;

    fn call_native(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError>;

    /// A nested call suspended; run it to completion independently. The
    /// caller observes nil.
    fn spawn_await(&mut self, future: FutureValue, continuation: Continuation);

    /// Render a value under an article format (entity briefs get articles).
    fn describe(&self, value: &Value, format: Format) -> String;
}

/// Result of running a block to a yield point.
#[derive(Debug)]
pub enum Exec {
    Value(Value),
    /// The block suspended; hand the continuation to the future.
    Await {
        future: FutureValue,
        continuation: Continuation,
    },
    /// Ask the event dispatcher to try the next matching handler.
    Fallthrough,
}

#[derive(Debug, Clone)]
enum Iter {
    List { items: Arc<Vec<Value>>, index: usize },
    Range { next: i64, end: i64 },
}

impl Iter {
    fn advance(&mut self) -> Option<Value> {
        match self {
            Iter::List { items, index } => {
                let v = items.get(*index)?.clone();
                *index += 1;
                Some(v)
            }
            Iter::Range { next, end } => {
                if *next > *end {
                    None
                } else {
                    let v = Value::from(*next);
                    *next += 1;
                    Some(v)
                }
            }
        }
    }
}

/// One call frame, also the unit of suspension.
#[derive(Debug, Clone)]
struct Frame {
    function: Arc<ScriptFunction>,
    ip: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    iterator: Option<Iter>,
    list_marks: Vec<usize>,
}

/// A suspended frame plus its scope chain, resumable exactly once.
#[derive(Debug, Clone)]
pub struct Continuation {
    frame: Frame,
    scopes: Vec<Value>,
}

/// Invoke a compiled function. `scopes` is the lexical scope chain for
/// unbound identifiers: `[entity, module]` for member initializers, the
/// module alone for handlers and methods.
pub fn call_function<C: ScriptContext>(
    ctx: &mut C,
    function: Arc<ScriptFunction>,
    args: Vec<Value>,
    scopes: Vec<Value>,
) -> Result<Exec, ExecError> {
    if args.len() != function.params.len() {
        return Err(ExecError::TypeMismatch {
            expected: "matching argument count",
            found: "argument list",
        });
    }
    let mut frame = Frame {
        function,
        ip: 0,
        stack: Vec::new(),
        locals: args,
        iterator: None,
        list_marks: Vec::new(),
    };
    finish(ctx, &mut frame, scopes)
}

/// Resume a suspended continuation after its future fired.
pub fn resume<C: ScriptContext>(ctx: &mut C, continuation: Continuation) -> Result<Exec, ExecError> {
    let Continuation { mut frame, scopes } = continuation;
    finish(ctx, &mut frame, scopes)
}

fn finish<C: ScriptContext>(
    ctx: &mut C,
    frame: &mut Frame,
    scopes: Vec<Value>,
) -> Result<Exec, ExecError> {
    match execute(ctx, frame, &scopes)? {
        StepOutcome::Value(v) => Ok(Exec::Value(v)),
        StepOutcome::Fallthrough => Ok(Exec::Fallthrough),
        StepOutcome::Await(future) => Ok(Exec::Await {
            future,
            continuation: Continuation {
                frame: frame.clone(),
                scopes,
            },
        }),
    }
}

enum StepOutcome {
    Value(Value),
    Fallthrough,
    Await(FutureValue),
}

fn execute<C: ScriptContext>(
    ctx: &mut C,
    frame: &mut Frame,
    scopes: &[Value],
) -> Result<StepOutcome, ExecError> {
    let function = frame.function.clone();
    let code = &function.block.code;
    let constants = &function.block.constants;

    macro_rules! pop {
        () => {
            frame
                .stack
                .pop()
                .ok_or(ExecError::Malformed("stack underflow"))?
        };
    }

    loop {
        let byte = *code
            .get(frame.ip)
            .ok_or(ExecError::Malformed("ran off the end of the block"))?;
        let op = Op::try_from(byte).map_err(|_| ExecError::Malformed("bad opcode"))?;
        frame.ip += 1;

        match op {
            Op::PushNil => frame.stack.push(Value::Nil),
            Op::PushTrue => frame.stack.push(Value::Boolean(true)),
            Op::PushFalse => frame.stack.push(Value::Boolean(false)),
            Op::SmallInt => {
                let b = read_u8(code, &mut frame.ip)? as i8;
                frame.stack.push(Value::from(b as i64));
            }
            Op::Constant => {
                let index = read_u16(code, &mut frame.ip)? as usize;
                let constant = constants
                    .get(index)
                    .ok_or(ExecError::Malformed("bad constant index"))?;
                frame.stack.push(constant_value(constant));
            }
            Op::Pop => {
                pop!();
            }
            Op::CreateLocal => {
                let v = pop!();
                frame.locals.push(v);
            }
            Op::RemoveLocals => {
                let n = read_u8(code, &mut frame.ip)? as usize;
                let len = frame.locals.len();
                if n > len {
                    return Err(ExecError::Malformed("removing more locals than exist"));
                }
                frame.locals.truncate(len - n);
            }
            Op::LoadLocal => {
                let i = read_u8(code, &mut frame.ip)? as usize;
                let v = frame
                    .locals
                    .get(i)
                    .ok_or(ExecError::Malformed("bad local index"))?
                    .clone();
                frame.stack.push(v);
            }
            Op::StoreLocal => {
                let i = read_u8(code, &mut frame.ip)? as usize;
                let v = pop!();
                let slot = frame
                    .locals
                    .get_mut(i)
                    .ok_or(ExecError::Malformed("bad local index"))?;
                *slot = v;
            }
            Op::Not => {
                let v = pop!();
                frame.stack.push(Value::Boolean(!v.is_truthy()));
            }
            Op::Negate => {
                let v = pop!();
                let n = v.as_number().ok_or(ExecError::TypeMismatch {
                    expected: "number",
                    found: v.type_name(),
                })?;
                frame.stack.push(Value::Number(-n));
            }
            Op::Deref => {
                let v = pop!();
                let Value::Ref(r) = v else {
                    return Err(ExecError::ReferenceRequired);
                };
                match ctx.resolve(scopes, &function.module, &r) {
                    Some(value) => frame.stack.push(value),
                    None => return Err(ExecError::UndefinedReference(r)),
                }
            }
            Op::Add => {
                let rhs = pop!();
                let lhs = pop!();
                let result = match (&lhs, &rhs) {
                    (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                    (Value::String(a), Value::String(b)) => {
                        Value::string(format!("{a}{b}"))
                    }
                    _ => {
                        return Err(ExecError::TypeMismatch {
                            expected: "numbers or strings",
                            found: lhs.type_name(),
                        })
                    }
                };
                frame.stack.push(result);
            }
            Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let rhs = pop!();
                let lhs = pop!();
                let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(ExecError::TypeMismatch {
                            expected: "number",
                            found: lhs.as_number().map_or(lhs.type_name(), |_| rhs.type_name()),
                        })
                    }
                };
                let n = match op {
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Div => a / b,
                    _ => a % b,
                };
                frame.stack.push(Value::Number(n));
            }
            Op::Eq | Op::Ne => {
                let rhs = pop!();
                let lhs = pop!();
                let eq = lhs == rhs;
                frame
                    .stack
                    .push(Value::Boolean(if op == Op::Eq { eq } else { !eq }));
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let rhs = pop!();
                let lhs = pop!();
                let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(ExecError::TypeMismatch {
                            expected: "number",
                            found: lhs.as_number().map_or(lhs.type_name(), |_| rhs.type_name()),
                        })
                    }
                };
                let result = match op {
                    Op::Lt => a < b,
                    Op::Le => a <= b,
                    Op::Gt => a > b,
                    _ => a >= b,
                };
                frame.stack.push(Value::Boolean(result));
            }
            Op::Jump => {
                let offset = read_i16(code, &mut frame.ip)?;
                jump(frame, offset)?;
            }
            Op::JumpIf => {
                let offset = read_i16(code, &mut frame.ip)?;
                if pop!().is_truthy() {
                    jump(frame, offset)?;
                }
            }
            Op::JumpUnless => {
                let offset = read_i16(code, &mut frame.ip)?;
                if !pop!().is_truthy() {
                    jump(frame, offset)?;
                }
            }
            Op::LoadSymbol => {
                let index = read_u16(code, &mut frame.ip)? as usize;
                match constants.get(index) {
                    Some(Constant::Symbol(s)) => frame.stack.push(Value::Symbol(s.clone())),
                    _ => return Err(ExecError::Malformed("bad symbol constant")),
                }
            }
            Op::LoadMember => {
                let name = symbol_constant(constants, read_u16(code, &mut frame.ip)?)?;
                let target = pop!();
                let value = ctx
                    .member(&target, &name)?
                    .ok_or_else(|| ExecError::UndefinedSymbol(name.to_string()))?;
                // A function fetched off an entity becomes a bound method so
                // the entity arrives as its first argument.
                let value = match (&target, value) {
                    (Value::Entity(id), Value::Function(f)) => Value::Function(Function::Bound {
                        receiver: *id,
                        inner: Arc::new(f),
                    }),
                    (_, v) => v,
                };
                frame.stack.push(value);
            }
            Op::StoreMember => {
                let name = symbol_constant(constants, read_u16(code, &mut frame.ip)?)?;
                let value = pop!();
                let target = pop!();
                ctx.set_member(&target, &name, value)?;
                // The target stays for chained configuration stores.
                frame.stack.push(target);
            }
            Op::LoadSubscript => {
                let index = pop!();
                let target = pop!();
                let items = target.as_list().ok_or(ExecError::TypeMismatch {
                    expected: "list",
                    found: target.type_name(),
                })?;
                let i = index.as_integer().ok_or(ExecError::TypeMismatch {
                    expected: "number",
                    found: index.type_name(),
                })?;
                let v = usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or(ExecError::IndexOutOfBounds {
                        index: i,
                        len: items.len(),
                    })?
                    .clone();
                frame.stack.push(v);
            }
            Op::StoreSubscript => {
                let value = pop!();
                let index = pop!();
                let target = pop!();
                let Value::List(mut items) = target else {
                    return Err(ExecError::TypeMismatch {
                        expected: "list",
                        found: target.type_name(),
                    });
                };
                let i = index.as_integer().ok_or(ExecError::TypeMismatch {
                    expected: "number",
                    found: index.type_name(),
                })?;
                let len = items.len();
                let slot = usize::try_from(i)
                    .ok()
                    .filter(|i| *i < len)
                    .ok_or(ExecError::IndexOutOfBounds { index: i, len })?;
                Arc::make_mut(&mut items)[slot] = value;
                frame.stack.push(Value::List(items));
            }
            Op::BeginList => frame.list_marks.push(frame.stack.len()),
            Op::EndList => {
                let mark = frame
                    .list_marks
                    .pop()
                    .ok_or(ExecError::Malformed("end-list without begin-list"))?;
                let items = frame.stack.split_off(mark);
                frame.stack.push(Value::list(items));
            }
            Op::MakeIterator => {
                if frame.iterator.is_some() {
                    return Err(ExecError::NestedIterationNotSupported);
                }
                let seq = pop!();
                frame.iterator = Some(match seq {
                    Value::List(items) => Iter::List { items, index: 0 },
                    Value::Range(a, b) => Iter::Range { next: a, end: b },
                    other => {
                        return Err(ExecError::TypeMismatch {
                            expected: "list or range",
                            found: other.type_name(),
                        })
                    }
                });
            }
            Op::AdvanceOrJump => {
                let offset = read_i16(code, &mut frame.ip)?;
                let next = frame
                    .iterator
                    .as_mut()
                    .ok_or(ExecError::Malformed("advance without iterator"))?
                    .advance();
                match next {
                    Some(v) => frame.stack.push(v),
                    None => {
                        frame.iterator = None;
                        jump(frame, offset)?;
                    }
                }
            }
            Op::MakePortal => {
                let destination = pop!();
                let direction = pop!();
                let proto = pop!();
                let Value::Ref(destination) = destination else {
                    return Err(ExecError::ReferenceRequired);
                };
                let direction = direction
                    .as_symbol()
                    .and_then(|s| s.parse::<Direction>().ok())
                    .ok_or(ExecError::TypeMismatch {
                        expected: "direction symbol",
                        found: direction.type_name(),
                    })?;
                let proto = proto.as_entity().ok_or(ExecError::TypeMismatch {
                    expected: "portal prototype",
                    found: proto.type_name(),
                })?;
                let portal = ctx.make_portal(proto, direction, destination)?;
                frame.stack.push(Value::Entity(portal));
            }
            Op::Clone => {
                let v = pop!();
                let id = v.as_entity().ok_or(ExecError::TypeMismatch {
                    expected: "entity",
                    found: v.type_name(),
                })?;
                let clone = ctx.clone_entity(id)?;
                frame.stack.push(Value::Entity(clone));
            }
            Op::SetCount => {
                let count = pop!();
                let item = pop!();
                let n = count.as_integer().ok_or(ExecError::TypeMismatch {
                    expected: "number",
                    found: count.type_name(),
                })?;
                let id = item.as_entity().ok_or(ExecError::TypeMismatch {
                    expected: "item",
                    found: item.type_name(),
                })?;
                ctx.set_count(id, n)?;
                frame.stack.push(item);
            }
            Op::Call => {
                let argc = read_u8(code, &mut frame.ip)? as usize;
                if frame.stack.len() < argc + 1 {
                    return Err(ExecError::Malformed("stack underflow in call"));
                }
                let args = frame.stack.split_off(frame.stack.len() - argc);
                let callee = pop!();
                let Value::Function(f) = callee else {
                    return Err(ExecError::ExpectedCallable);
                };
                let result = call_value(ctx, &f, args)?;
                frame.stack.push(result);
            }
            Op::Stringify => {
                let format = Format::decode(read_u8(code, &mut frame.ip)?);
                let v = pop!();
                frame.stack.push(Value::string(ctx.describe(&v, format)));
            }
            Op::JoinStrings => {
                let n = read_u8(code, &mut frame.ip)? as usize;
                if frame.stack.len() < n {
                    return Err(ExecError::Malformed("stack underflow in join"));
                }
                let parts = frame.stack.split_off(frame.stack.len() - n);
                let mut joined = String::new();
                for part in &parts {
                    match part {
                        Value::String(s) => joined.push_str(s),
                        other => joined.push_str(&other.to_string()),
                    }
                }
                frame.stack.push(Value::string(joined));
            }
            Op::Await => {
                let v = pop!();
                let Value::Future(future) = v else {
                    return Err(ExecError::ExpectedFuture);
                };
                return Ok(StepOutcome::Await(future));
            }
            Op::Return => {
                let v = pop!();
                return Ok(StepOutcome::Value(v));
            }
            Op::Fallthrough => return Ok(StepOutcome::Fallthrough),
        }
    }
}

/// Call a function value. A suspended nested call is detached: it runs to
/// completion independently and the caller sees nil. Also used by the world
/// for activity hooks.
pub fn call_value<C: ScriptContext>(
    ctx: &mut C,
    function: &Function,
    args: Vec<Value>,
) -> Result<Value, ExecError> {
    match function {
        Function::Native(native) => ctx.call_native(&native.name, args),
        Function::Script(script) => {
            match call_function(ctx, script.clone(), args, vec![Value::Module(Arc::from(
                script.module.as_str(),
            ))])? {
                Exec::Value(v) => Ok(v),
                Exec::Fallthrough => Ok(Value::Nil),
                Exec::Await {
                    future,
                    continuation,
                } => {
                    ctx.spawn_await(future, continuation);
                    Ok(Value::Nil)
                }
            }
        }
        Function::Bound { receiver, inner } => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(Value::Entity(*receiver));
            full.extend(args);
            call_value(ctx, inner, full)
        }
    }
}

fn jump(frame: &mut Frame, offset: i16) -> Result<(), ExecError> {
    let target = frame.ip as isize + offset as isize;
    if target < 0 {
        return Err(ExecError::Malformed("jump before block start"));
    }
    frame.ip = target as usize;
    Ok(())
}

fn read_u8(code: &[u8], ip: &mut usize) -> Result<u8, ExecError> {
    let b = *code
        .get(*ip)
        .ok_or(ExecError::Malformed("truncated operand"))?;
    *ip += 1;
    Ok(b)
}

fn read_u16(code: &[u8], ip: &mut usize) -> Result<u16, ExecError> {
    let lo = read_u8(code, ip)?;
    let hi = read_u8(code, ip)?;
    Ok(u16::from_le_bytes([lo, hi]))
}

fn read_i16(code: &[u8], ip: &mut usize) -> Result<i16, ExecError> {
    Ok(read_u16(code, ip)? as i16)
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Number(n) => Value::Number(*n),
        Constant::String(s) => Value::String(s.clone()),
        Constant::Symbol(s) => Value::Symbol(s.clone()),
        Constant::Ref(r) => Value::Ref(r.clone()),
    }
}

fn symbol_constant(constants: &[Constant], index: u16) -> Result<Arc<str>, ExecError> {
    match constants.get(index as usize) {
        Some(Constant::Symbol(s)) => Ok(s.clone()),
        _ => Err(ExecError::Malformed("bad symbol constant")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::Item;
    use crate::script::compiler::Compiler;
    use crate::script::parser::Parser;
    use std::collections::HashMap;
    use thornvale_domain::bytecode::{Article, Param};

    /// A stub world: a flat binding map plus a `sleep` native.
    #[derive(Default)]
    struct StubWorld {
        bindings: HashMap<String, Value>,
        members: HashMap<(i64, String), Value>,
        detached: Vec<(FutureValue, Continuation)>,
        native_log: Vec<String>,
    }

    impl ScriptContext for StubWorld {
        fn resolve(&mut self, _scopes: &[Value], _module: &str, r: &Ref) -> Option<Value> {
            if let Some(v) = self.bindings.get(r.name()) {
                return Some(v.clone());
            }
            match r.name() {
                "sleep" | "range" => Some(Value::Function(Function::Native(
                    thornvale_domain::value::NativeFunction::new(r.name().to_string()),
                ))),
                _ => None,
            }
        }

        fn member(&mut self, target: &Value, name: &str) -> Result<Option<Value>, ExecError> {
            match target {
                Value::Entity(id) => Ok(self.members.get(&(id.0, name.to_string())).cloned()),
                _ => Err(ExecError::TypeMismatch {
                    expected: "entity",
                    found: target.type_name(),
                }),
            }
        }

        fn set_member(
            &mut self,
            target: &Value,
            name: &str,
            value: Value,
        ) -> Result<(), ExecError> {
            match target {
                Value::Entity(id) => {
                    self.members.insert((id.0, name.to_string()), value);
                    Ok(())
                }
                _ => Err(ExecError::TypeMismatch {
                    expected: "entity",
                    found: target.type_name(),
                }),
            }
        }

        fn clone_entity(&mut self, proto: EntityId) -> Result<EntityId, ExecError> {
            Ok(EntityId(proto.0 + 1000))
        }

        fn set_count(&mut self, _item: EntityId, _count: i64) -> Result<(), ExecError> {
            Ok(())
        }

        fn make_portal(
            &mut self,
            proto: EntityId,
            _direction: Direction,
            _destination: Ref,
        ) -> Result<EntityId, ExecError> {
            Ok(EntityId(proto.0 + 2000))
        }

        fn call_native(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
            self.native_log.push(name.to_string());
            match name {
                "sleep" => {
                    let seconds = args
                        .first()
                        .and_then(Value::as_number)
                        .ok_or(ExecError::TypeMismatch {
                            expected: "number",
                            found: "nil",
                        })?;
                    Ok(Value::Future(FutureValue::Sleep { seconds }))
                }
                "range" => Ok(Value::Range(
                    args[0].as_integer().unwrap(),
                    args[1].as_integer().unwrap(),
                )),
                _ => Err(ExecError::UndefinedSymbol(name.to_string())),
            }
        }

        fn spawn_await(&mut self, future: FutureValue, continuation: Continuation) {
            self.detached.push((future, continuation));
        }

        fn describe(&self, value: &Value, format: Format) -> String {
            let mut s = value.to_string();
            if format.article == Article::Indefinite {
                s = format!("a {s}");
            }
            if format.capitalize {
                let mut chars = s.chars();
                if let Some(c) = chars.next() {
                    s = c.to_uppercase().collect::<String>() + chars.as_str();
                }
            }
            s
        }
    }

    fn compile(src: &str, params: &[&str]) -> Arc<ScriptFunction> {
        let wrapped = format!(
            "def t: thing {{ when test({}) {{ {src} }} }}",
            params.join(", ")
        );
        let out = Parser::new(&wrapped).parse();
        assert_eq!(out.errors, 0, "parse failed: {src}");
        let Item::Entity { body, .. } = &out.items[0] else {
            panic!();
        };
        let params = params
            .iter()
            .map(|p| Param::new(*p, thornvale_domain::bytecode::Constraint::None))
            .collect();
        Arc::new(
            Compiler::new("test")
                .compile_function(Some("test".into()), params, &body.handlers[0].block)
                .unwrap(),
        )
    }

    fn run(world: &mut StubWorld, src: &str, params: &[&str], args: Vec<Value>) -> Exec {
        call_function(world, compile(src, params), args, vec![]).unwrap()
    }

    fn run_value(src: &str) -> Value {
        let mut world = StubWorld::default();
        match run(&mut world, src, &[], vec![]) {
            Exec::Value(v) => v,
            other => panic!("expected value, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_and_comparisons() {
        assert_eq!(run_value("return 2 + 3 * 4"), Value::Number(14.0));
        assert_eq!(run_value("return 10 % 3"), Value::Number(1.0));
        assert_eq!(run_value("return 2 < 3 and 3 <= 3"), Value::Boolean(true));
        assert_eq!(run_value("return !nil"), Value::Boolean(true));
        assert_eq!(
            run_value(r#"return "mel" + "on""#),
            Value::from("melon")
        );
    }

    #[test]
    fn mixed_type_equality_is_false_not_an_error() {
        assert_eq!(run_value(r#"return 1 == "1""#), Value::Boolean(false));
        assert_eq!(run_value(r#"return 1 != "1""#), Value::Boolean(true));
    }

    #[test]
    fn locals_and_control_flow() {
        let v = run_value("var total = 0 var i = 0 while i < 5 { i = i + 1 total += i } return total");
        assert_eq!(v, Value::Number(15.0));
    }

    #[test]
    fn for_loop_iterates_lists_and_comprehensions_filter() {
        let v = run_value("var acc = 0 for x in [1, 2, 3, 4] { acc += x } return acc");
        assert_eq!(v, Value::Number(10.0));
        let v = run_value("return [x * x for x in [1, 2, 3, 4] if x % 2 == 0]");
        let Value::List(items) = v else { panic!() };
        assert_eq!(**items, vec![Value::Number(4.0), Value::Number(16.0)]);
    }

    #[test]
    fn ranges_iterate_inclusively() {
        let mut world = StubWorld::default();
        let v = match run(&mut world, "var acc = 0 for i in range(1, 4) { acc += i } return acc", &[], vec![]) {
            Exec::Value(v) => v,
            other => panic!("{other:?}"),
        };
        assert_eq!(v, Value::Number(10.0));
    }

    #[test]
    fn runtime_nested_iteration_is_rejected() {
        // Hand-assemble a block that starts a second iteration while one is
        // live; the compiler refuses to emit this, the VM backstops it.
        let mut block = thornvale_domain::bytecode::CodeBlock::default();
        block.code.push(Op::BeginList as u8);
        block.code.push(Op::EndList as u8);
        block.code.push(Op::MakeIterator as u8);
        block.code.push(Op::BeginList as u8);
        block.code.push(Op::EndList as u8);
        block.code.push(Op::MakeIterator as u8);
        let f = Arc::new(ScriptFunction {
            name: None,
            module: "test".into(),
            params: vec![],
            block,
        });
        let mut world = StubWorld::default();
        let err = call_function(&mut world, f, vec![], vec![]).unwrap_err();
        assert_eq!(err, ExecError::NestedIterationNotSupported);
    }

    #[test]
    fn subscripts_load_store_and_bounds_check() {
        assert_eq!(
            run_value("var xs = [1, 2, 3] xs[1] = 9 return xs[1]"),
            Value::Number(9.0)
        );
        let mut world = StubWorld::default();
        let f = compile("return arg[5]", &["arg"]);
        let err = call_function(&mut world, f, vec![Value::list(vec![Value::Nil])], vec![])
            .unwrap_err();
        assert_eq!(err, ExecError::IndexOutOfBounds { index: 5, len: 1 });
    }

    #[test]
    fn member_access_binds_methods_to_entities() {
        let mut world = StubWorld::default();
        let method = compile("return self", &["self"]);
        world.members.insert(
            (7, "who".to_string()),
            Value::Function(Function::Script(method)),
        );
        let v = match run(
            &mut world,
            "return arg.who()",
            &["arg"],
            vec![Value::Entity(EntityId(7))],
        ) {
            Exec::Value(v) => v,
            other => panic!("{other:?}"),
        };
        assert_eq!(v, Value::Entity(EntityId(7)));
    }

    #[test]
    fn member_store_and_compound_update() {
        let mut world = StubWorld::default();
        let result = run(
            &mut world,
            "arg.depth = 2 arg.depth += 3 return arg.depth",
            &["arg"],
            vec![Value::Entity(EntityId(1))],
        );
        let Exec::Value(v) = result else { panic!() };
        assert_eq!(v, Value::Number(5.0));
    }

    #[test]
    fn interpolation_applies_formats() {
        let v = run_value(r#"var n = 3 return "You see {n:I} wells.""#);
        assert_eq!(v, Value::from("You see A 3 wells."));
    }

    #[test]
    fn await_suspends_and_resumes_once() {
        let mut world = StubWorld::default();
        let f = compile("var x = 1 await sleep(0.01) x = x + 1 return x", &[]);
        // First run yields the await sentinel.
        let exec = call_function(&mut world, f.clone(), vec![], vec![]).unwrap();
        let Exec::Await {
            future,
            continuation,
        } = exec
        else {
            panic!("expected await, got a value");
        };
        assert!(matches!(future, FutureValue::Sleep { seconds } if seconds == 0.01));
        // Resumption picks up exactly where it left off.
        let resumed = resume(&mut world, continuation).unwrap();
        let Exec::Value(v) = resumed else { panic!() };
        assert_eq!(v, Value::Number(2.0));
        // A fresh call starts over with x = 1.
        let again = call_function(&mut world, f, vec![], vec![]).unwrap();
        assert!(matches!(again, Exec::Await { .. }));
    }

    #[test]
    fn await_on_non_future_fails() {
        let mut world = StubWorld::default();
        let f = compile("await 3", &[]);
        let err = call_function(&mut world, f, vec![], vec![]).unwrap_err();
        assert_eq!(err, ExecError::ExpectedFuture);
    }

    #[test]
    fn fallthrough_is_the_implicit_result() {
        let mut world = StubWorld::default();
        let exec = run(&mut world, "var x = 1", &[], vec![]);
        assert!(matches!(exec, Exec::Fallthrough));
        let exec = run(&mut world, "fallthrough", &[], vec![]);
        assert!(matches!(exec, Exec::Fallthrough));
    }

    #[test]
    fn calling_a_non_function_fails() {
        let mut world = StubWorld::default();
        let f = compile("return arg()", &["arg"]);
        let err = call_function(&mut world, f, vec![Value::Number(3.0)], vec![]).unwrap_err();
        assert_eq!(err, ExecError::ExpectedCallable);
    }

    #[test]
    fn undefined_reference_reports_the_ref() {
        let mut world = StubWorld::default();
        let f = compile("return missing", &[]);
        let err = call_function(&mut world, f, vec![], vec![]).unwrap_err();
        assert_eq!(err, ExecError::UndefinedReference(Ref::relative("missing")));
    }
}
