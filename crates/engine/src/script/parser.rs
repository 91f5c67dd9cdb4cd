//! Parsing.
//!
//! A recursive-descent parser with Pratt-style expression precedence:
//! `or < and < equality < comparison < term < factor < unary < call`.
//! `and` and `or` are contextual operators, not reserved words.
//!
//! Parse errors are logged as `LINE: MESSAGE`, counted, and recovery skips
//! to the next top-level form.

use thornvale_domain::bytecode::Format;
use thornvale_domain::entity::EventPhase;
use thornvale_domain::refs::Ref;

use super::ast::{
    BinaryOp, ConstraintDef, EntityBody, Expr, HandlerDef, Item, LogicalOp, MethodDef, ParamDef,
    PhaseDef, Segment, Stmt, UnaryOp,
};
use super::token::{Lexer, Token};

/// Result of parsing a module file. `errors` is the number of diagnostics
/// emitted; a nonzero count fails the world load after all files are tried.
#[derive(Debug)]
pub struct ParseOutcome {
    pub items: Vec<Item>,
    pub errors: usize,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    errors: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_lexer(Lexer::new(source))
    }

    fn with_lexer(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            errors: 0,
        }
    }

    /// Parse a whole module file.
    pub fn parse(mut self) -> ParseOutcome {
        let mut items = Vec::new();
        while self.current != Token::Eof {
            match self.top_level() {
                Ok(item) => items.push(item),
                Err(()) => self.resync(),
            }
        }
        ParseOutcome {
            items,
            errors: self.errors,
        }
    }

    /// Parse a single expression (used by tests and the interpolation
    /// sub-parser). Fails unless the whole input is consumed.
    pub fn parse_expression(source: &str) -> Result<Expr, String> {
        let mut parser = Parser::new(source);
        let expr = parser
            .expression()
            .map_err(|()| "malformed expression".to_string())?;
        if parser.current != Token::Eof {
            return Err(format!("trailing input after expression: {}", parser.current));
        }
        Ok(expr)
    }

    // ----- token plumbing -------------------------------------------------

    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    fn eat(&mut self, token: &Token) -> bool {
        if &self.current == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<(), ()> {
        if self.current == token {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected {token} {context}, found {}", self.current))
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, ()> {
        match &self.current {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => {
                let message = format!("expected name {context}, found {other}");
                self.error(message)
            }
        }
    }

    fn error<T>(&mut self, message: impl Into<String>) -> Result<T, ()> {
        let line = match &self.current {
            Token::Error { line, .. } => *line,
            _ => self.lexer.line(),
        };
        tracing::error!("{}: {}", line, message.into());
        self.errors += 1;
        Err(())
    }

    /// Skip to the next top-level form after an error.
    fn resync(&mut self) {
        loop {
            match self.current {
                Token::Eof
                | Token::Def
                | Token::Deflocation
                | Token::Defquest
                | Token::Defrace
                | Token::Defskill
                | Token::Extend
                | Token::Func => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ----- top-level forms ------------------------------------------------

    fn top_level(&mut self) -> Result<Item, ()> {
        let line = self.lexer.line();
        match self.current.clone() {
            Token::Def | Token::Deflocation => {
                let startable = self.current == Token::Deflocation;
                self.advance();
                let name = self.expect_ident("after def")?;
                self.expect(Token::Colon, "after entity name")?;
                let proto = self.parse_ref()?;
                let body = self.entity_body()?;
                Ok(Item::Entity {
                    name,
                    proto,
                    startable,
                    body,
                    line,
                })
            }
            Token::Extend => {
                self.advance();
                let target = self.parse_ref()?;
                let body = self.entity_body()?;
                Ok(Item::Extend { target, body, line })
            }
            Token::Defquest => {
                self.advance();
                let name = self.expect_ident("after defquest")?;
                self.expect(Token::LeftBrace, "to open quest body")?;
                let mut members = Vec::new();
                let mut phases = Vec::new();
                while !self.eat(&Token::RightBrace) {
                    if self.current == Token::Eof {
                        return self.error("unterminated quest body");
                    }
                    if self.eat(&Token::Phase) {
                        let phase_name = self.expect_ident("after phase")?;
                        self.expect(Token::LeftBrace, "to open phase body")?;
                        let phase_members = self.member_list()?;
                        phases.push(PhaseDef {
                            name: phase_name,
                            members: phase_members,
                        });
                    } else {
                        members.push(self.member_init()?);
                    }
                }
                Ok(Item::Quest {
                    name,
                    members,
                    phases,
                    line,
                })
            }
            Token::Defrace => {
                self.advance();
                let name = self.expect_ident("after defrace")?;
                self.expect(Token::LeftBrace, "to open race body")?;
                let members = self.member_list()?;
                Ok(Item::Race {
                    name,
                    members,
                    line,
                })
            }
            Token::Defskill => {
                self.advance();
                let name = self.expect_ident("after defskill")?;
                self.expect(Token::LeftBrace, "to open skill body")?;
                let members = self.member_list()?;
                Ok(Item::Skill {
                    name,
                    members,
                    line,
                })
            }
            Token::Func => {
                self.advance();
                Ok(Item::Func(self.method_def(line)?))
            }
            Token::Error { .. } => {
                let message = match &self.current {
                    Token::Error { message, .. } => message.clone(),
                    _ => unreachable!(),
                };
                self.advance();
                self.error(message)
            }
            other => self.error(format!("expected a top-level form, found {other}")),
        }
    }

    /// Member initializers up to and including the closing brace.
    fn member_list(&mut self) -> Result<Vec<(String, Expr)>, ()> {
        let mut members = Vec::new();
        while !self.eat(&Token::RightBrace) {
            if self.current == Token::Eof {
                return self.error("unterminated body");
            }
            members.push(self.member_init()?);
        }
        Ok(members)
    }

    fn member_init(&mut self) -> Result<(String, Expr), ()> {
        let name = self.expect_ident("for member initializer")?;
        self.expect(Token::Assign, "after member name")?;
        let value = self.expression()?;
        Ok((name, value))
    }

    fn entity_body(&mut self) -> Result<EntityBody, ()> {
        self.expect(Token::LeftBrace, "to open body")?;
        let mut body = EntityBody::default();
        loop {
            let line = self.lexer.line();
            match self.current.clone() {
                Token::RightBrace => {
                    self.advance();
                    return Ok(body);
                }
                Token::Eof => return self.error("unterminated entity body"),
                Token::Allow | Token::Before | Token::When | Token::After => {
                    let phase = match self.advance() {
                        Token::Allow => EventPhase::Allow,
                        Token::Before => EventPhase::Before,
                        Token::When => EventPhase::When,
                        _ => EventPhase::After,
                    };
                    let event = self.expect_ident("for event name")?;
                    let params = self.param_list()?;
                    let block = self.block()?;
                    body.handlers.push(HandlerDef {
                        phase,
                        event,
                        params,
                        block,
                        line,
                    });
                }
                Token::Func => {
                    self.advance();
                    body.methods.push(self.method_def(line)?);
                }
                Token::Ident(_) => {
                    body.members.push(self.member_init()?);
                }
                other => return self.error(format!("unexpected {other} in entity body")),
            }
        }
    }

    fn method_def(&mut self, line: u32) -> Result<MethodDef, ()> {
        let name = self.expect_ident("after func")?;
        let params = self.param_list()?;
        let block = self.block()?;
        Ok(MethodDef {
            name,
            params,
            block,
            line,
        })
    }

    // ----- parameters and constraints ------------------------------------

    fn param_list(&mut self) -> Result<Vec<ParamDef>, ()> {
        self.expect(Token::LeftParen, "to open parameter list")?;
        let mut params = Vec::new();
        if !self.eat(&Token::RightParen) {
            loop {
                params.push(self.param()?);
                if self.eat(&Token::RightParen) {
                    break;
                }
                self.expect(Token::Comma, "between parameters")?;
            }
        }
        Ok(params)
    }

    fn param(&mut self) -> Result<ParamDef, ()> {
        let name = self.expect_ident("for parameter")?;
        if !self.eat(&Token::Colon) {
            // A parameter written simply as `self` carries the self
            // constraint.
            let constraint = if name == "self" {
                ConstraintDef::SelfRef
            } else {
                ConstraintDef::None
            };
            return Ok(ParamDef { name, constraint });
        }
        let constraint = if self.eat(&Token::Dot) {
            let kind = self.expect_ident("for constraint kind")?;
            self.expect(Token::LeftParen, "after constraint kind")?;
            let r = self.parse_ref()?;
            let constraint = match kind.as_str() {
                "quest" => {
                    self.expect(Token::Comma, "before quest phase")?;
                    let phase = match self.advance() {
                        Token::Symbol(s) => s,
                        other => {
                            return self.error(format!("expected phase symbol, found {other}"))
                        }
                    };
                    ConstraintDef::Quest { quest: r, phase }
                }
                "race" => ConstraintDef::Race(r),
                "equipped" => ConstraintDef::Equipped(r),
                other => return self.error(format!("unknown constraint .{other}")),
            };
            self.expect(Token::RightParen, "to close constraint")?;
            constraint
        } else if self.current == Token::Ident("self".to_string()) {
            self.advance();
            ConstraintDef::SelfRef
        } else {
            ConstraintDef::Prototype(self.parse_ref()?)
        };
        Ok(ParamDef { name, constraint })
    }

    fn parse_ref(&mut self) -> Result<Ref, ()> {
        let first = self.expect_ident("for ref")?;
        if self.eat(&Token::Dot) {
            let second = self.expect_ident("after . in ref")?;
            Ok(Ref::absolute(first, second))
        } else {
            Ok(Ref::relative(first))
        }
    }

    // ----- statements -----------------------------------------------------

    fn block(&mut self) -> Result<Vec<Stmt>, ()> {
        self.expect(Token::LeftBrace, "to open block")?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RightBrace) {
            if self.current == Token::Eof {
                return self.error("unterminated block");
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ()> {
        match self.current {
            Token::Var | Token::Let => {
                self.advance();
                let name = self.expect_ident("for variable")?;
                self.expect(Token::Assign, "after variable name")?;
                let init = self.expression()?;
                Ok(Stmt::Var { name, init })
            }
            Token::If => {
                self.advance();
                self.if_statement()
            }
            Token::While => {
                self.advance();
                let cond = self.expression()?;
                let block = self.block()?;
                Ok(Stmt::While { cond, block })
            }
            Token::For => {
                self.advance();
                let var = self.expect_ident("for loop variable")?;
                self.expect(Token::In, "after loop variable")?;
                let seq = self.expression()?;
                let block = self.block()?;
                Ok(Stmt::For { var, seq, block })
            }
            Token::Return => {
                self.advance();
                if self.starts_expression() {
                    Ok(Stmt::Return(Some(self.expression()?)))
                } else {
                    Ok(Stmt::Return(None))
                }
            }
            Token::Fallthrough => {
                self.advance();
                Ok(Stmt::Fallthrough)
            }
            Token::Await => {
                self.advance();
                Ok(Stmt::Await(self.expression()?))
            }
            _ => self.assignment_or_expr(),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ()> {
        let cond = self.expression()?;
        let then_block = self.block()?;
        let else_block = if self.eat(&Token::Else) {
            if self.current == Token::If {
                self.advance();
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
        })
    }

    fn assignment_or_expr(&mut self) -> Result<Stmt, ()> {
        let expr = self.expression()?;
        let op = match self.current {
            Token::Assign => None,
            Token::PlusAssign => Some(BinaryOp::Add),
            Token::MinusAssign => Some(BinaryOp::Sub),
            Token::StarAssign => Some(BinaryOp::Mul),
            Token::SlashAssign => Some(BinaryOp::Div),
            Token::PercentAssign => Some(BinaryOp::Mod),
            _ => return Ok(Stmt::Expr(expr)),
        };
        self.advance();
        match expr {
            Expr::Ident(_) | Expr::Member(..) | Expr::Subscript(..) => {}
            _ => return self.error("invalid assignment target"),
        }
        let value = self.expression()?;
        Ok(Stmt::Assign {
            target: expr,
            op,
            value,
        })
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.current,
            Token::Nil
                | Token::True
                | Token::False
                | Token::Number(_)
                | Token::Str(_)
                | Token::Symbol(_)
                | Token::Ident(_)
                | Token::LeftParen
                | Token::LeftBracket
                | Token::Minus
                | Token::Bang
                | Token::Star
        )
    }

    // ----- expressions ----------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ()> {
        let expr = self.or_expr()?;
        // Portal and stack constructors sit outside the operator ladder;
        // they only occur in initializer and list positions.
        if self.current == Token::Arrow {
            self.advance();
            let proto = self.expr_to_ref(expr)?;
            let dir_name = self.expect_ident("for portal direction")?;
            let direction = match dir_name.parse() {
                Ok(d) => d,
                Err(()) => return self.error(format!("unknown direction {dir_name}")),
            };
            let oneway = self.eat(&Token::Oneway);
            self.expect(Token::To, "before portal destination")?;
            let destination = self.parse_ref()?;
            return Ok(Expr::Portal {
                proto,
                direction,
                oneway,
                destination,
            });
        }
        if self.current == Token::At {
            self.advance();
            let proto = self.parse_ref()?;
            return Ok(Expr::Stack {
                count: Box::new(expr),
                proto,
            });
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ()> {
        let mut expr = self.and_expr()?;
        while self.current == Token::Ident("or".to_string()) {
            self.advance();
            let rhs = self.and_expr()?;
            expr = Expr::Logical(LogicalOp::Or, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, ()> {
        let mut expr = self.equality()?;
        while self.current == Token::Ident("and".to_string()) {
            self.advance();
            let rhs = self.equality()?;
            expr = Expr::Logical(LogicalOp::And, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr, ()> {
        let mut expr = self.comparison()?;
        loop {
            let op = match self.current {
                Token::EqEq => BinaryOp::Eq,
                Token::BangEq => BinaryOp::Ne,
                _ => return Ok(expr),
            };
            self.advance();
            let rhs = self.comparison()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn comparison(&mut self) -> Result<Expr, ()> {
        let mut expr = self.term()?;
        loop {
            let op = match self.current {
                Token::Less => BinaryOp::Lt,
                Token::LessEq => BinaryOp::Le,
                Token::Greater => BinaryOp::Gt,
                Token::GreaterEq => BinaryOp::Ge,
                _ => return Ok(expr),
            };
            self.advance();
            let rhs = self.term()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, ()> {
        let mut expr = self.factor()?;
        loop {
            let op = match self.current {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(expr),
            };
            self.advance();
            let rhs = self.factor()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn factor(&mut self) -> Result<Expr, ()> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.current {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(expr),
            };
            self.advance();
            let rhs = self.unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ()> {
        match self.current {
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.unary()?)))
            }
            Token::Bang => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            // Prefix `*` is deref: the value a ref names.
            Token::Star => {
                self.advance();
                Ok(Expr::Deref(self.parse_ref()?))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ()> {
        let mut expr = self.primary()?;
        loop {
            match self.current {
                Token::Dot => {
                    self.advance();
                    let name = self.expect_ident("after .")?;
                    expr = Expr::Member(Box::new(expr), name);
                }
                Token::LeftBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RightBracket, "to close subscript")?;
                    expr = Expr::Subscript(Box::new(expr), Box::new(index));
                }
                Token::LeftParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.eat(&Token::RightParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.eat(&Token::RightParen) {
                                break;
                            }
                            self.expect(Token::Comma, "between arguments")?;
                        }
                    }
                    // A trailing string literal is an additional argument,
                    // used for multi-line prose.
                    if let Token::Str(_) = self.current {
                        let Token::Str(raw) = self.advance() else {
                            unreachable!()
                        };
                        args.push(Expr::Str(self.string_segments(&raw)?));
                    }
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ()> {
        match self.advance() {
            Token::Nil => Ok(Expr::Nil),
            Token::True => Ok(Expr::Boolean(true)),
            Token::False => Ok(Expr::Boolean(false)),
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Symbol(s) => Ok(Expr::Symbol(s)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Str(raw) => Ok(Expr::Str(self.string_segments(&raw)?)),
            Token::LeftParen => {
                let expr = self.expression()?;
                self.expect(Token::RightParen, "to close grouping")?;
                Ok(expr)
            }
            Token::LeftBracket => self.list_or_comprehension(),
            Token::Error { line, message } => {
                tracing::error!("{}: {}", line, message);
                self.errors += 1;
                Err(())
            }
            other => self.error(format!("expected expression, found {other}")),
        }
    }

    fn list_or_comprehension(&mut self) -> Result<Expr, ()> {
        if self.eat(&Token::RightBracket) {
            return Ok(Expr::ListLiteral(Vec::new()));
        }
        let first = self.expression()?;
        if self.eat(&Token::For) {
            let var = self.expect_ident("for comprehension variable")?;
            self.expect(Token::In, "after comprehension variable")?;
            let seq = self.expression()?;
            let cond = if self.eat(&Token::If) {
                Some(Box::new(self.expression()?))
            } else {
                None
            };
            self.expect(Token::RightBracket, "to close comprehension")?;
            return Ok(Expr::Comprehension {
                value: Box::new(first),
                var,
                seq: Box::new(seq),
                cond,
            });
        }
        let mut items = vec![first];
        while !self.eat(&Token::RightBracket) {
            self.expect(Token::Comma, "between list elements")?;
            items.push(self.expression()?);
        }
        Ok(Expr::ListLiteral(items))
    }

    fn expr_to_ref(&mut self, expr: Expr) -> Result<Ref, ()> {
        match expr {
            Expr::Ident(name) => Ok(Ref::relative(name)),
            Expr::Member(base, name) => match *base {
                Expr::Ident(module) => Ok(Ref::absolute(module, name)),
                _ => self.error("expected a ref"),
            },
            _ => self.error("expected a ref"),
        }
    }

    // ----- string interpolation ------------------------------------------

    /// Split a raw string literal into literal and `{expr}` / `{expr:F}`
    /// segments, reparsing each expression with a sub-lexer anchored at the
    /// current line.
    fn string_segments(&mut self, raw: &str) -> Result<Vec<Segment>, ()> {
        let line = self.lexer.line();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            let mut chunk = String::new();
            let mut in_quotes = false;
            let mut closed = false;
            for c in chars.by_ref() {
                match c {
                    '"' => {
                        in_quotes = !in_quotes;
                        chunk.push(c);
                    }
                    '}' if !in_quotes => {
                        closed = true;
                        break;
                    }
                    _ => chunk.push(c),
                }
            }
            if !closed {
                return self.error("unterminated interpolation");
            }
            let (expr_src, format) = split_format(&chunk);
            let format = match format {
                Some(c) => match Format::from_spec_char(c) {
                    Some(f) => f,
                    None => return self.error(format!("unknown format :{c}")),
                },
                None => Format::PLAIN,
            };
            let mut sub = Parser::with_lexer(Lexer::starting_at(expr_src, line));
            let expr = sub.expression();
            let complete = sub.current == Token::Eof;
            self.errors += sub.errors;
            let Ok(expr) = expr else {
                return Err(());
            };
            if !complete {
                return self.error("trailing input in interpolation");
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Expr { expr, format });
        }
        if !literal.is_empty() || segments.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(segments)
    }
}

/// Split `expr:F` into the expression source and the single-char format.
fn split_format(chunk: &str) -> (&str, Option<char>) {
    let bytes = chunk.as_bytes();
    if bytes.len() >= 2 && bytes[bytes.len() - 2] == b':' {
        let c = bytes[bytes.len() - 1] as char;
        if matches!(c, 'i' | 'I' | 'd' | 'D' | 'n' | 'N') {
            return (&chunk[..chunk.len() - 2], Some(c));
        }
    }
    (chunk, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use thornvale_domain::bytecode::Article;
    use thornvale_domain::entities::Direction;

    fn parse_items(source: &str) -> ParseOutcome {
        Parser::new(source).parse()
    }

    #[test]
    fn precedence_ladder() {
        let e = Parser::parse_expression("1 + 2 * 3 == 7 and !done").unwrap();
        // ((1 + (2 * 3)) == 7) and (!done)
        match e {
            Expr::Logical(LogicalOp::And, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Binary(BinaryOp::Eq, ..)));
                assert!(matches!(*rhs, Expr::Unary(UnaryOp::Not, _)));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn deref_parses_refs_not_products() {
        let e = Parser::parse_expression("*village.well").unwrap();
        assert_eq!(e, Expr::Deref(Ref::absolute("village", "well")));
        let e = Parser::parse_expression("a * b").unwrap();
        assert!(matches!(e, Expr::Binary(BinaryOp::Mul, ..)));
    }

    #[test]
    fn entity_def_with_members_handlers_methods() {
        let src = r#"
            def rusty_gate: portal {
                brief = "rusty gate"
                locked = true

                allow exit_location(self, actor, loc) {
                    return !self.locked
                }

                func unlock(self) {
                    self.locked = false
                }
            }
        "#;
        let out = parse_items(src);
        assert_eq!(out.errors, 0);
        assert_eq!(out.items.len(), 1);
        let Item::Entity {
            name,
            proto,
            startable,
            body,
            ..
        } = &out.items[0]
        else {
            panic!("expected entity item");
        };
        assert_eq!(name, "rusty_gate");
        assert_eq!(*proto, Ref::relative("portal"));
        assert!(!startable);
        assert_eq!(body.members.len(), 2);
        assert_eq!(body.handlers.len(), 1);
        assert_eq!(body.methods.len(), 1);
        let h = &body.handlers[0];
        assert_eq!(h.phase, EventPhase::Allow);
        assert_eq!(h.event, "exit_location");
        assert_eq!(h.params[0].constraint, ConstraintDef::SelfRef);
        assert_eq!(h.params[1].constraint, ConstraintDef::None);
    }

    #[test]
    fn constraint_forms() {
        let src = r#"
            def elder: creature {
                when talk(self, avatar:.quest(well_quest, 'offered)) { }
                when nod(self, avatar:.race(races.elf)) { }
                when salute(self, avatar:.equipped(items.sword)) { }
                before poke(self, tool:items.stick) { }
            }
        "#;
        let out = parse_items(src);
        assert_eq!(out.errors, 0);
        let Item::Entity { body, .. } = &out.items[0] else {
            panic!();
        };
        assert_eq!(
            body.handlers[0].params[1].constraint,
            ConstraintDef::Quest {
                quest: Ref::relative("well_quest"),
                phase: "offered".into()
            }
        );
        assert_eq!(
            body.handlers[1].params[1].constraint,
            ConstraintDef::Race(Ref::absolute("races", "elf"))
        );
        assert_eq!(
            body.handlers[2].params[1].constraint,
            ConstraintDef::Equipped(Ref::absolute("items", "sword"))
        );
        assert_eq!(
            body.handlers[3].params[1].constraint,
            ConstraintDef::Prototype(Ref::absolute("items", "stick"))
        );
    }

    #[test]
    fn quest_with_ordered_phases() {
        let src = r#"
            defquest well_quest {
                name = "The Old Well"
                level = 2
                phase fetch {
                    summary = "Fetch a bucket."
                }
                phase deliver {
                    summary = "Deliver the bucket."
                }
            }
        "#;
        let out = parse_items(src);
        assert_eq!(out.errors, 0);
        let Item::Quest {
            members, phases, ..
        } = &out.items[0]
        else {
            panic!();
        };
        assert_eq!(members.len(), 2);
        assert_eq!(phases[0].name, "fetch");
        assert_eq!(phases[1].name, "deliver");
    }

    #[test]
    fn portal_and_stack_expressions() {
        let src = r#"
            deflocation plaza: location {
                exits = [gate -> north to village.well_yard, door -> in oneway to cellar]
                loot = [3 @ silver_coin]
            }
        "#;
        let out = parse_items(src);
        assert_eq!(out.errors, 0);
        let Item::Entity { body, startable, .. } = &out.items[0] else {
            panic!();
        };
        assert!(startable);
        let Expr::ListLiteral(exits) = &body.members[0].1 else {
            panic!();
        };
        assert_eq!(
            exits[0],
            Expr::Portal {
                proto: Ref::relative("gate"),
                direction: Direction::North,
                oneway: false,
                destination: Ref::absolute("village", "well_yard"),
            }
        );
        assert_eq!(
            exits[1],
            Expr::Portal {
                proto: Ref::relative("door"),
                direction: Direction::In,
                oneway: true,
                destination: Ref::relative("cellar"),
            }
        );
        let Expr::ListLiteral(loot) = &body.members[1].1 else {
            panic!();
        };
        assert!(matches!(loot[0], Expr::Stack { .. }));
    }

    #[test]
    fn comprehension_with_condition() {
        let e = Parser::parse_expression("[x.brief for x in loc.contents if x != actor]").unwrap();
        let Expr::Comprehension { cond, .. } = e else {
            panic!();
        };
        assert!(cond.is_some());
    }

    #[test]
    fn interpolated_string_segments() {
        let e = Parser::parse_expression(r#""You see {item:i} on {table.brief:d}.""#).unwrap();
        let Expr::Str(segments) = e else { panic!() };
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0], Segment::Literal("You see ".into()));
        match &segments[1] {
            Segment::Expr { expr, format } => {
                assert_eq!(*expr, Expr::Ident("item".into()));
                assert_eq!(format.article, Article::Indefinite);
                assert!(!format.capitalize);
            }
            other => panic!("unexpected segment {other:?}"),
        }
        assert_eq!(segments[2], Segment::Literal(" on ".into()));
        assert!(matches!(
            segments[3],
            Segment::Expr { ref expr, .. } if matches!(expr, Expr::Member(..))
        ));
        assert_eq!(segments[4], Segment::Literal(".".into()));
    }

    #[test]
    fn trailing_string_call_argument() {
        let e = Parser::parse_expression("tell(actor) \"Long prose.\"").unwrap();
        let Expr::Call { args, .. } = e else { panic!() };
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn compound_assignment_statements() {
        let src = r#"
            def well: fixture {
                when fill(self, amount) {
                    self.depth += amount
                    amount -= 1
                }
            }
        "#;
        let out = parse_items(src);
        assert_eq!(out.errors, 0);
        let Item::Entity { body, .. } = &out.items[0] else {
            panic!();
        };
        let block = &body.handlers[0].block;
        assert!(matches!(
            &block[0],
            Stmt::Assign {
                op: Some(BinaryOp::Add),
                ..
            }
        ));
        assert!(matches!(
            &block[1],
            Stmt::Assign {
                op: Some(BinaryOp::Sub),
                ..
            }
        ));
    }

    #[test]
    fn errors_resync_to_next_top_level_form() {
        let src = r#"
            def broken: {
            def fine: thing {
                brief = "fine"
            }
        "#;
        let out = parse_items(src);
        assert!(out.errors > 0);
        assert_eq!(out.items.len(), 1);
        assert!(matches!(&out.items[0], Item::Entity { name, .. } if name == "fine"));
    }
}
