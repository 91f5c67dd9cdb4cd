//! Bytecode compilation.
//!
//! Each script function (and each entity's synthetic member initializer)
//! compiles to its own [`CodeBlock`]. The compiler tracks two pieces of
//! state: the ordered `locals` currently in scope and `scope_depths`, the
//! local count at each enclosing block entry, so leaving a block is a single
//! `RemoveLocals N`.
//!
//! Jumps are signed 16-bit offsets relative to the byte after the operand;
//! forward jumps are emitted with a placeholder and patched once the
//! destination is known.

use std::sync::Arc;

use thiserror::Error;
use thornvale_domain::bytecode::{CodeBlock, Constant, Op, Param, ScriptFunction};
use thornvale_domain::refs::Ref;

use super::ast::{BinaryOp, Expr, LogicalOp, Segment, Stmt, UnaryOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("assignment to undefined variable {0}")]
    UndefinedVariable(String),
    #[error("nested iteration is not supported; hoist the inner loop into a function")]
    NestedIteration,
    #[error("invalid assignment target")]
    InvalidAssignment,
    #[error("too many locals in one function")]
    TooManyLocals,
    #[error("jump distance exceeds 16 bits")]
    JumpTooFar,
}

/// Compiles functions for one module.
pub struct Compiler {
    module: String,
}

impl Compiler {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
        }
    }

    /// Compile a handler or method body.
    pub fn compile_function(
        &self,
        name: Option<String>,
        params: Vec<Param>,
        body: &[Stmt],
    ) -> Result<ScriptFunction, CompileError> {
        let mut f = FunctionCompiler::new();
        for p in &params {
            f.declare_local(&p.name)?;
        }
        for stmt in body {
            f.statement(stmt)?;
        }
        // A body that runs off the end yields fallthrough, so handlers only
        // stop the chain when they return explicitly.
        f.emit(Op::Fallthrough);
        Ok(ScriptFunction {
            name,
            module: self.module.clone(),
            params,
            block: f.block,
        })
    }

    /// Compile an entity's member initializers into a synthetic function
    /// taking the entity as its sole argument.
    pub fn compile_initializer(
        &self,
        owner: &str,
        members: &[(String, Expr)],
    ) -> Result<ScriptFunction, CompileError> {
        let mut f = FunctionCompiler::new();
        f.declare_local("self")?;
        for (name, expr) in members {
            f.emit_byte_op(Op::LoadLocal, 0);
            f.expression(expr)?;
            let index = f.block.intern(Constant::Symbol(Arc::from(name.as_str())));
            f.emit_u16_op(Op::StoreMember, index);
            f.emit(Op::Pop);
        }
        f.emit(Op::PushNil);
        f.emit(Op::Return);
        Ok(ScriptFunction {
            name: Some(format!("{owner}.init")),
            module: self.module.clone(),
            params: vec![Param::new("self", thornvale_domain::bytecode::Constraint::None)],
            block: f.block,
        })
    }
}

struct FunctionCompiler {
    block: CodeBlock,
    locals: Vec<String>,
    scope_depths: Vec<usize>,
    iterating: bool,
}

impl FunctionCompiler {
    fn new() -> Self {
        Self {
            block: CodeBlock::default(),
            locals: Vec::new(),
            scope_depths: Vec::new(),
            iterating: false,
        }
    }

    // ----- emission -------------------------------------------------------

    fn emit(&mut self, op: Op) {
        self.block.code.push(op as u8);
    }

    fn emit_byte_op(&mut self, op: Op, operand: u8) {
        self.emit(op);
        self.block.code.push(operand);
    }

    fn emit_u16_op(&mut self, op: Op, operand: u16) {
        self.emit(op);
        self.block.code.extend_from_slice(&operand.to_le_bytes());
    }

    fn emit_constant(&mut self, constant: Constant) {
        let index = self.block.intern(constant);
        self.emit_u16_op(Op::Constant, index);
    }

    /// Emit a forward jump with a placeholder offset; returns the operand
    /// position for [`patch_jump`].
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        let pos = self.block.code.len();
        self.block.code.extend_from_slice(&[0xFF, 0xFF]);
        pos
    }

    fn patch_jump(&mut self, operand_pos: usize) -> Result<(), CompileError> {
        let offset = self.block.code.len() as isize - (operand_pos as isize + 2);
        let offset = i16::try_from(offset).map_err(|_| CompileError::JumpTooFar)?;
        self.block.code[operand_pos..operand_pos + 2].copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// Emit a backward jump to an already-known target.
    fn emit_jump_back(&mut self, op: Op, target: usize) -> Result<(), CompileError> {
        self.emit(op);
        let after = self.block.code.len() as isize + 2;
        let offset = i16::try_from(target as isize - after).map_err(|_| CompileError::JumpTooFar)?;
        self.block.code.extend_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    // ----- scopes ---------------------------------------------------------

    fn declare_local(&mut self, name: &str) -> Result<u8, CompileError> {
        if self.locals.len() >= u8::MAX as usize {
            return Err(CompileError::TooManyLocals);
        }
        self.locals.push(name.to_string());
        Ok((self.locals.len() - 1) as u8)
    }

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals
            .iter()
            .rposition(|n| n == name)
            .map(|i| i as u8)
    }

    fn begin_scope(&mut self) {
        self.scope_depths.push(self.locals.len());
    }

    fn end_scope(&mut self) {
        let depth = self.scope_depths.pop().unwrap_or(0);
        let count = self.locals.len() - depth;
        if count > 0 {
            self.emit_byte_op(Op::RemoveLocals, count as u8);
            self.locals.truncate(depth);
        }
    }

    // ----- statements -----------------------------------------------------

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Var { name, init } => {
                self.expression(init)?;
                self.emit(Op::CreateLocal);
                self.declare_local(name)?;
                Ok(())
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expression(cond)?;
                let to_else = self.emit_jump(Op::JumpUnless);
                self.scoped_block(then_block)?;
                if else_block.is_empty() {
                    self.patch_jump(to_else)?;
                } else {
                    let to_end = self.emit_jump(Op::Jump);
                    self.patch_jump(to_else)?;
                    self.scoped_block(else_block)?;
                    self.patch_jump(to_end)?;
                }
                Ok(())
            }
            Stmt::While { cond, block } => {
                let top = self.block.code.len();
                self.expression(cond)?;
                let to_end = self.emit_jump(Op::JumpUnless);
                self.scoped_block(block)?;
                self.emit_jump_back(Op::Jump, top)?;
                self.patch_jump(to_end)
            }
            Stmt::For { var, seq, block } => {
                if self.iterating {
                    return Err(CompileError::NestedIteration);
                }
                self.iterating = true;
                self.expression(seq)?;
                self.emit(Op::MakeIterator);
                let top = self.block.code.len();
                let to_end = self.emit_jump(Op::AdvanceOrJump);
                self.emit(Op::CreateLocal);
                self.declare_local(var)?;
                self.begin_scope();
                for stmt in block {
                    self.statement(stmt)?;
                }
                self.end_scope();
                self.emit_byte_op(Op::RemoveLocals, 1);
                self.locals.pop();
                self.emit_jump_back(Op::Jump, top)?;
                self.patch_jump(to_end)?;
                self.iterating = false;
                Ok(())
            }
            Stmt::Return(expr) => {
                match expr {
                    Some(e) => self.expression(e)?,
                    None => self.emit(Op::PushNil),
                }
                self.emit(Op::Return);
                Ok(())
            }
            Stmt::Fallthrough => {
                self.emit(Op::Fallthrough);
                Ok(())
            }
            Stmt::Await(expr) => {
                self.expression(expr)?;
                self.emit(Op::Await);
                Ok(())
            }
            Stmt::Assign { target, op, value } => self.assignment(target, *op, value),
            Stmt::Expr(expr) => {
                self.expression(expr)?;
                self.emit(Op::Pop);
                Ok(())
            }
        }
    }

    fn scoped_block(&mut self, block: &[Stmt]) -> Result<(), CompileError> {
        self.begin_scope();
        for stmt in block {
            self.statement(stmt)?;
        }
        self.end_scope();
        Ok(())
    }

    /// Read-modify-write lowering for assignment. Compound forms re-evaluate
    /// the base and index expressions; those are locals and simple members in
    /// practice.
    fn assignment(
        &mut self,
        target: &Expr,
        op: Option<BinaryOp>,
        value: &Expr,
    ) -> Result<(), CompileError> {
        match target {
            Expr::Ident(name) => {
                let Some(slot) = self.resolve_local(name) else {
                    return Err(CompileError::UndefinedVariable(name.clone()));
                };
                if let Some(op) = op {
                    self.emit_byte_op(Op::LoadLocal, slot);
                    self.expression(value)?;
                    self.emit(binary_op(op));
                } else {
                    self.expression(value)?;
                }
                self.emit_byte_op(Op::StoreLocal, slot);
                Ok(())
            }
            Expr::Member(base, name) => {
                let index = self
                    .block
                    .intern(Constant::Symbol(Arc::from(name.as_str())));
                self.expression(base)?;
                if let Some(op) = op {
                    self.expression(base)?;
                    self.emit_u16_op(Op::LoadMember, index);
                    self.expression(value)?;
                    self.emit(binary_op(op));
                } else {
                    self.expression(value)?;
                }
                // StoreMember leaves the object for chained stores; discard.
                self.emit_u16_op(Op::StoreMember, index);
                self.emit(Op::Pop);
                Ok(())
            }
            Expr::Subscript(base, index) => {
                // StoreSubscript pushes the updated list, which is written
                // back through the base lvalue.
                match base.as_ref() {
                    Expr::Ident(name) => {
                        let Some(slot) = self.resolve_local(name) else {
                            return Err(CompileError::UndefinedVariable(name.clone()));
                        };
                        self.emit_byte_op(Op::LoadLocal, slot);
                        self.expression(index)?;
                        if let Some(op) = op {
                            self.emit_byte_op(Op::LoadLocal, slot);
                            self.expression(index)?;
                            self.emit(Op::LoadSubscript);
                            self.expression(value)?;
                            self.emit(binary_op(op));
                        } else {
                            self.expression(value)?;
                        }
                        self.emit(Op::StoreSubscript);
                        self.emit_byte_op(Op::StoreLocal, slot);
                    }
                    Expr::Member(obj, name) => {
                        let sym = self
                            .block
                            .intern(Constant::Symbol(Arc::from(name.as_str())));
                        // Object once for the write-back, once for the read.
                        self.expression(obj)?;
                        self.expression(obj)?;
                        self.emit_u16_op(Op::LoadMember, sym);
                        self.expression(index)?;
                        if let Some(op) = op {
                            self.expression(base)?;
                            self.expression(index)?;
                            self.emit(Op::LoadSubscript);
                            self.expression(value)?;
                            self.emit(binary_op(op));
                        } else {
                            self.expression(value)?;
                        }
                        self.emit(Op::StoreSubscript);
                        self.emit_u16_op(Op::StoreMember, sym);
                        self.emit(Op::Pop);
                    }
                    _ => return Err(CompileError::InvalidAssignment),
                }
                Ok(())
            }
            _ => Err(CompileError::InvalidAssignment),
        }
    }

    // ----- expressions ----------------------------------------------------

    fn expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Nil => {
                self.emit(Op::PushNil);
                Ok(())
            }
            Expr::Boolean(true) => {
                self.emit(Op::PushTrue);
                Ok(())
            }
            Expr::Boolean(false) => {
                self.emit(Op::PushFalse);
                Ok(())
            }
            Expr::Number(n) => {
                if n.fract() == 0.0 && (i8::MIN as f64..=i8::MAX as f64).contains(n) {
                    self.emit_byte_op(Op::SmallInt, *n as i8 as u8);
                } else {
                    self.emit_constant(Constant::Number(*n));
                }
                Ok(())
            }
            Expr::Str(segments) => self.string(segments),
            Expr::Symbol(s) => {
                let index = self.block.intern(Constant::Symbol(Arc::from(s.as_str())));
                self.emit_u16_op(Op::LoadSymbol, index);
                Ok(())
            }
            Expr::Ident(name) => {
                if let Some(slot) = self.resolve_local(name) {
                    self.emit_byte_op(Op::LoadLocal, slot);
                } else {
                    // Unbound names resolve through the runtime scope chain.
                    self.emit_constant(Constant::Ref(Ref::relative(name.clone())));
                    self.emit(Op::Deref);
                }
                Ok(())
            }
            Expr::Deref(r) => {
                self.emit_constant(Constant::Ref(r.clone()));
                self.emit(Op::Deref);
                Ok(())
            }
            Expr::Member(base, name) => {
                self.expression(base)?;
                let index = self
                    .block
                    .intern(Constant::Symbol(Arc::from(name.as_str())));
                self.emit_u16_op(Op::LoadMember, index);
                Ok(())
            }
            Expr::Subscript(base, index) => {
                self.expression(base)?;
                self.expression(index)?;
                self.emit(Op::LoadSubscript);
                Ok(())
            }
            Expr::Call { callee, args } => {
                self.expression(callee)?;
                for arg in args {
                    self.expression(arg)?;
                }
                self.emit_byte_op(Op::Call, args.len() as u8);
                Ok(())
            }
            Expr::Unary(UnaryOp::Negate, operand) => {
                self.expression(operand)?;
                self.emit(Op::Negate);
                Ok(())
            }
            Expr::Unary(UnaryOp::Not, operand) => {
                self.expression(operand)?;
                self.emit(Op::Not);
                Ok(())
            }
            Expr::Binary(op, lhs, rhs) => {
                self.expression(lhs)?;
                self.expression(rhs)?;
                self.emit(binary_op(*op));
                Ok(())
            }
            Expr::Logical(op, lhs, rhs) => self.logical(*op, lhs, rhs),
            Expr::ListLiteral(items) => {
                self.emit(Op::BeginList);
                for item in items {
                    self.expression(item)?;
                }
                self.emit(Op::EndList);
                Ok(())
            }
            Expr::Comprehension {
                value,
                var,
                seq,
                cond,
            } => self.comprehension(value, var, seq, cond.as_deref()),
            Expr::Portal {
                proto,
                direction,
                oneway,
                destination,
            } => {
                self.emit_constant(Constant::Ref(proto.clone()));
                self.emit(Op::Deref);
                let dir = self
                    .block
                    .intern(Constant::Symbol(Arc::from(direction.as_str())));
                self.emit_u16_op(Op::LoadSymbol, dir);
                self.emit_constant(Constant::Ref(destination.clone()));
                self.emit(Op::MakePortal);
                if *oneway {
                    self.emit(Op::PushTrue);
                    let sym = self.block.intern(Constant::Symbol(Arc::from("oneway")));
                    self.emit_u16_op(Op::StoreMember, sym);
                }
                Ok(())
            }
            Expr::Stack { count, proto } => {
                self.emit_constant(Constant::Ref(proto.clone()));
                self.emit(Op::Deref);
                self.emit(Op::Clone);
                self.expression(count)?;
                self.emit(Op::SetCount);
                Ok(())
            }
        }
    }

    fn logical(&mut self, op: LogicalOp, lhs: &Expr, rhs: &Expr) -> Result<(), CompileError> {
        // Short-circuit to a boolean result.
        let (test, early, late) = match op {
            LogicalOp::And => (Op::JumpUnless, Op::PushFalse, Op::PushTrue),
            LogicalOp::Or => (Op::JumpIf, Op::PushTrue, Op::PushFalse),
        };
        self.expression(lhs)?;
        let short1 = self.emit_jump(test);
        self.expression(rhs)?;
        let short2 = self.emit_jump(test);
        self.emit(late);
        let done = self.emit_jump(Op::Jump);
        self.patch_jump(short1)?;
        self.patch_jump(short2)?;
        self.emit(early);
        self.patch_jump(done)
    }

    fn comprehension(
        &mut self,
        value: &Expr,
        var: &str,
        seq: &Expr,
        cond: Option<&Expr>,
    ) -> Result<(), CompileError> {
        if self.iterating {
            return Err(CompileError::NestedIteration);
        }
        self.iterating = true;
        // Accumulate results between the list mark and EndList while the
        // iterator runs; each pass leaves at most one value on the stack.
        self.emit(Op::BeginList);
        self.expression(seq)?;
        self.emit(Op::MakeIterator);
        let top = self.block.code.len();
        let to_end = self.emit_jump(Op::AdvanceOrJump);
        self.emit(Op::CreateLocal);
        self.declare_local(var)?;
        let skip = match cond {
            Some(c) => {
                self.expression(c)?;
                Some(self.emit_jump(Op::JumpUnless))
            }
            None => None,
        };
        self.expression(value)?;
        if let Some(skip) = skip {
            let past = self.emit_jump(Op::Jump);
            self.patch_jump(skip)?;
            self.patch_jump(past)?;
        }
        self.emit_byte_op(Op::RemoveLocals, 1);
        self.locals.pop();
        self.emit_jump_back(Op::Jump, top)?;
        self.patch_jump(to_end)?;
        self.emit(Op::EndList);
        self.iterating = false;
        Ok(())
    }

    fn string(&mut self, segments: &[Segment]) -> Result<(), CompileError> {
        if let [Segment::Literal(text)] = segments {
            self.emit_constant(Constant::String(Arc::from(text.as_str())));
            return Ok(());
        }
        for segment in segments {
            match segment {
                Segment::Literal(text) => {
                    self.emit_constant(Constant::String(Arc::from(text.as_str())));
                }
                Segment::Expr { expr, format } => {
                    self.expression(expr)?;
                    self.emit_byte_op(Op::Stringify, format.encode());
                }
            }
        }
        if segments.len() > 1 {
            self.emit_byte_op(Op::JoinStrings, segments.len() as u8);
        }
        Ok(())
    }
}

fn binary_op(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Ne => Op::Ne,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Le => Op::Le,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Ge => Op::Ge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::disasm;
    use crate::script::parser::Parser;
    use thornvale_domain::bytecode::Constraint;

    fn compile_body(src: &str) -> Result<ScriptFunction, CompileError> {
        let wrapped = format!("def t: thing {{ when test(self, arg) {{ {src} }} }}");
        let out = Parser::new(&wrapped).parse();
        assert_eq!(out.errors, 0, "parse failed for {src}");
        let crate::script::ast::Item::Entity { body, .. } = &out.items[0] else {
            panic!();
        };
        let handler = &body.handlers[0];
        let params = vec![
            Param::new("self", Constraint::SelfRef),
            Param::new("arg", Constraint::None),
        ];
        Compiler::new("test").compile_function(Some("test".into()), params, &handler.block)
    }

    fn ops_of(f: &ScriptFunction) -> Vec<Op> {
        disasm::instructions(&f.block).map(|(_, op, _)| op).collect()
    }

    #[test]
    fn locals_resolve_by_scope() {
        let f = compile_body("var x = 1 var y = x return y").unwrap();
        assert_eq!(
            ops_of(&f),
            vec![
                Op::SmallInt,
                Op::CreateLocal,
                Op::LoadLocal,
                Op::CreateLocal,
                Op::LoadLocal,
                Op::Return,
                Op::Fallthrough,
            ]
        );
    }

    #[test]
    fn repeated_constants_share_a_slot() {
        let f = compile_body(r#"return "hello" + "hello""#).unwrap();
        assert_eq!(f.block.constants.len(), 1);
    }

    #[test]
    fn if_else_patches_forward_jumps() {
        let f = compile_body("if arg { return 1 } else { return 2 } ").unwrap();
        let listing = disasm::listing(&f.block);
        // Both jump targets must land inside the block.
        for (at, op, operand) in disasm::instructions(&f.block) {
            if matches!(op, Op::Jump | Op::JumpIf | Op::JumpUnless) {
                let target = at as isize + 3 + operand.unwrap() as isize;
                assert!(
                    target >= 0 && target <= f.block.code.len() as isize,
                    "jump out of range in:\n{listing}"
                );
            }
        }
    }

    #[test]
    fn while_loop_jumps_backward() {
        let f = compile_body("var i = 0 while i < 10 { i = i + 1 }").unwrap();
        let backward = disasm::instructions(&f.block)
            .any(|(_, op, operand)| op == Op::Jump && operand.unwrap() < 0);
        assert!(backward);
    }

    #[test]
    fn for_loop_uses_one_iterator_frame() {
        let f = compile_body("for x in arg { show(self, x) }").unwrap();
        let ops = ops_of(&f);
        assert_eq!(ops.iter().filter(|o| **o == Op::MakeIterator).count(), 1);
        assert_eq!(ops.iter().filter(|o| **o == Op::AdvanceOrJump).count(), 1);
    }

    #[test]
    fn nested_iteration_is_rejected_at_compile_time() {
        let err = compile_body("for x in arg { for y in x { show(self, y) } }").unwrap_err();
        assert_eq!(err, CompileError::NestedIteration);
        let err = compile_body("for x in arg { var z = [y for y in x] }").unwrap_err();
        assert_eq!(err, CompileError::NestedIteration);
    }

    #[test]
    fn compound_assignment_lowers_to_read_modify_write() {
        let f = compile_body("var x = 1 x += 2").unwrap();
        assert_eq!(
            ops_of(&f),
            vec![
                Op::SmallInt,
                Op::CreateLocal,
                Op::LoadLocal,
                Op::SmallInt,
                Op::Add,
                Op::StoreLocal,
                Op::Fallthrough,
            ]
        );
    }

    #[test]
    fn member_compound_assignment() {
        let f = compile_body("self.depth += 1").unwrap();
        assert_eq!(
            ops_of(&f),
            vec![
                Op::LoadLocal,
                Op::LoadLocal,
                Op::LoadMember,
                Op::SmallInt,
                Op::Add,
                Op::StoreMember,
                Op::Pop,
                Op::Fallthrough,
            ]
        );
    }

    #[test]
    fn assignment_to_unknown_name_fails() {
        let err = compile_body("ghost = 1").unwrap_err();
        assert_eq!(err, CompileError::UndefinedVariable("ghost".into()));
    }

    #[test]
    fn interpolation_stringifies_and_joins() {
        let f = compile_body(r#"return "You see {arg:i} here.""#).unwrap();
        let ops = ops_of(&f);
        assert!(ops.contains(&Op::Stringify));
        assert_eq!(*ops.iter().rev().nth(1).unwrap(), Op::Return);
        assert!(ops.contains(&Op::JoinStrings));
    }

    #[test]
    fn implicit_end_is_fallthrough() {
        let f = compile_body("show(self, arg)").unwrap();
        assert_eq!(ops_of(&f).last(), Some(&Op::Fallthrough));
    }

    #[test]
    fn repeated_compilation_is_byte_identical() {
        let a = compile_body("var x = 2 return x * x").unwrap();
        let b = compile_body("var x = 2 return x * x").unwrap();
        assert_eq!(a.block, b.block);
    }
}
