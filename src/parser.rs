//! Single-pass recursive-descent parser: source text straight to a spanned
//! [`crate::ast::Node`] tree, no separate tokenizer.
//!
//! Literal classification happens by leading character, with `nom` as the
//! character-matching substrate within hand-written `parse_*` functions —
//! a top-level `parse(source) -> Result<Node, Error>` plus one function per
//! grammar production. Every production tracks a byte span, computed as
//! `self.pos` before/after each node — nom's `IResult` remaining-length
//! delta applied manually rather than via a combinator chain, since the
//! grammar (paths, URLs, quantities, rates, pipelines, patterns) is far
//! less regular than a parenthesized-list syntax would be.

use nom::character::complete::digit1;
use nom::combinator::recognize;
use nom::Parser as _;

use crate::ast::{
    BinOp, InterpPart, Node, NodeKind, ObjectEntry, SpawnBody,
};
use crate::error::Error;
use crate::span::Span;

pub fn parse(source: &str) -> Result<Node, Error> {
    tracing::debug!(bytes = source.len(), "parsing module");
    let mut p = State::new(source);
    let start = p.pos;
    let mut stmts = Vec::new();
    p.skip_ws();
    while !p.at_end() {
        stmts.push(p.parse_statement()?);
        p.skip_ws();
    }
    Ok(NodeKind::Module(stmts).at(p.span_from(start)))
}

struct State<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> State<'a> {
    fn new(src: &'a str) -> Self {
        State { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.pos)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.rest().chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::parse(Span::point(self.pos), msg.into())
    }

    /// `#` line comments and whitespace.
    fn skip_ws(&mut self) {
        loop {
            let before = self.pos;
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            if self.peek() == Some('#') {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.bump();
                }
            }
            if self.pos == before {
                break;
            }
        }
    }

    /// Whitespace only, no newline/`;`/`}` consumed — used inside a
    /// no-parens call's argument list, which exits on those.
    fn skip_inline_ws(&mut self) {
        loop {
            let before = self.pos;
            while matches!(self.peek(), Some(c) if c == ' ' || c == '\t') {
                self.bump();
            }
            if self.peek() == Some('#') {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.bump();
                }
            }
            if self.pos == before {
                break;
            }
        }
    }

    fn eat_stmt_terminator(&mut self) {
        self.skip_inline_ws();
        while matches!(self.peek(), Some('\n') | Some(';')) {
            self.bump();
            self.skip_ws();
        }
    }

    // ---------------------------------------------------------------
    // Identifiers
    // ---------------------------------------------------------------

    fn is_ident_start(c: char) -> bool {
        c.is_alphabetic() || c == '-'
    }

    fn is_ident_cont(c: char) -> bool {
        c.is_alphanumeric() || c == '-' || c == '_'
    }

    fn peek_identifier(&self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        let (_, first) = chars.next()?;
        if !Self::is_ident_start(first) {
            return None;
        }
        // A leading '-' followed by a digit is a negative number, not an
        // identifier.
        if first == '-' {
            if let Some((_, next)) = chars.clone().next() {
                if next.is_ascii_digit() {
                    return None;
                }
            } else {
                return None;
            }
        }
        let mut end = first.len_utf8();
        for (i, c) in chars {
            if Self::is_ident_cont(c) {
                end = i + c.len_utf8();
            } else {
                break;
            }
        }
        Some(&rest[..end])
    }

    fn parse_identifier(&mut self) -> Result<&'a str, Error> {
        match self.peek_identifier() {
            Some(id) => {
                self.pos += id.len();
                Ok(id)
            }
            None => Err(self.err("expected identifier")),
        }
    }

    fn try_keyword(&mut self, kw: &str) -> bool {
        if self.peek_identifier() == Some(kw) {
            self.pos += kw.len();
            true
        } else {
            false
        }
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Vec<Node>, Error> {
        self.skip_ws();
        if !self.eat_str("{") {
            return Err(self.err("expected '{'"));
        }
        let mut stmts = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            if self.at_end() {
                return Err(self.err("unterminated block"));
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        self.skip_ws();

        if self.try_keyword("const") {
            return self.parse_const(start);
        }
        if self.try_keyword("require") {
            return self.parse_require(start);
        }
        if self.try_keyword("drop") {
            return self.parse_drop(start);
        }
        if self.try_keyword("import") {
            return self.parse_import(start);
        }
        if self.try_keyword("if") {
            return self.parse_if(start);
        }
        if self.try_keyword("for") {
            return self.parse_for(start);
        }
        if self.try_keyword("switch") {
            return self.parse_switch(start);
        }
        if self.try_keyword("match") {
            return self.parse_match(start);
        }
        if self.try_keyword("return") {
            self.skip_inline_ws();
            let value = if matches!(self.peek(), Some('\n') | Some(';') | Some('}') | None) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            self.eat_stmt_terminator();
            return Ok(NodeKind::Return(value).at(self.span_from(start)));
        }
        if self.try_keyword("break") {
            self.eat_stmt_terminator();
            return Ok(NodeKind::Break.at(self.span_from(start)));
        }
        if self.try_keyword("continue") {
            self.eat_stmt_terminator();
            return Ok(NodeKind::Continue.at(self.span_from(start)));
        }
        if self.try_keyword("fn") {
            return self.parse_function_decl(start);
        }
        if self.try_keyword("assign") {
            return self.parse_multi_assign(start);
        }

        self.parse_expr_or_assignment_statement(start)
    }

    fn parse_const(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let mut bindings = Vec::new();
        if self.eat_str("(") {
            loop {
                self.skip_ws();
                if self.eat_str(")") {
                    break;
                }
                let name = self.parse_global_name()?;
                self.skip_ws();
                if !self.eat_str("=") {
                    return Err(self.err("expected '=' in const binding"));
                }
                self.skip_ws();
                let value = self.parse_expression()?;
                bindings.push((name.to_string(), value));
                self.skip_ws();
            }
        } else {
            let name = self.parse_global_name()?;
            self.skip_ws();
            if !self.eat_str("=") {
                return Err(self.err("expected '=' in const binding"));
            }
            self.skip_ws();
            let value = self.parse_expression()?;
            bindings.push((name.to_string(), value));
        }
        self.eat_stmt_terminator();
        Ok(NodeKind::GlobalConst(bindings).at(self.span_from(start)))
    }

    fn parse_global_name(&mut self) -> Result<String, Error> {
        if self.eat_str("$$") {
            Ok(self.parse_identifier()?.to_string())
        } else {
            Ok(self.parse_identifier()?.to_string())
        }
    }

    fn parse_require(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let obj = self.parse_object_literal()?;
        self.eat_stmt_terminator();
        Ok(NodeKind::Requirement(Box::new(obj)).at(self.span_from(start)))
    }

    fn parse_drop(&mut self, start: usize) -> Result<Node, Error> {
        let mut perms = vec![self.parse_expression()?];
        loop {
            self.skip_inline_ws();
            if self.eat_str(",") {
                self.skip_ws();
                perms.push(self.parse_expression()?);
            } else {
                break;
            }
        }
        self.eat_stmt_terminator();
        Ok(NodeKind::PermissionDrop(perms).at(self.span_from(start)))
    }

    fn parse_import(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let name = self.parse_identifier()?.to_string();
        self.skip_ws();
        let url = Box::new(self.parse_expression()?);
        self.skip_ws();
        let hash = self.parse_string_literal()?;
        self.skip_ws();
        let args = Box::new(self.parse_expression()?);
        self.skip_ws();
        if !self.try_keyword("allow") {
            return Err(self.err("expected 'allow' in import statement"));
        }
        self.skip_ws();
        let allow = Box::new(self.parse_expression()?);
        self.eat_stmt_terminator();
        Ok(NodeKind::Import { name, url, hash, args, allow }.at(self.span_from(start)))
    }

    fn parse_if(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let cond = Box::new(self.parse_expression()?);
        let then_branch = self.parse_block()?;
        self.skip_ws();
        let else_branch = if self.try_keyword("else") {
            self.skip_ws();
            if self.try_keyword("if") {
                let inner_start = self.pos;
                Some(vec![self.parse_if(inner_start)?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(NodeKind::If { cond, then_branch, else_branch }.at(self.span_from(start)))
    }

    fn parse_for(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let first = self.parse_identifier()?.to_string();
        self.skip_ws();
        let (key, value) = if self.eat_str(",") {
            self.skip_ws();
            let second = self.parse_identifier()?.to_string();
            (Some(first), second)
        } else {
            (None, first)
        };
        self.skip_ws();
        if !self.try_keyword("in") {
            return Err(self.err("expected 'in' in for statement"));
        }
        self.skip_ws();
        let iterable = Box::new(self.parse_expression()?);
        let body = self.parse_block()?;
        Ok(NodeKind::For { key, value, iterable, body }.at(self.span_from(start)))
    }

    fn parse_switch(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let subject = Box::new(self.parse_expression()?);
        self.skip_ws();
        if !self.eat_str("{") {
            return Err(self.err("expected '{' in switch"));
        }
        let mut cases = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            let mut values = vec![self.parse_expression()?];
            self.skip_inline_ws();
            while self.eat_str(",") {
                self.skip_ws();
                values.push(self.parse_expression()?);
                self.skip_inline_ws();
            }
            let body = self.parse_block()?;
            cases.push((values, body));
        }
        Ok(NodeKind::Switch { subject, cases }.at(self.span_from(start)))
    }

    fn parse_match(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let subject = Box::new(self.parse_expression()?);
        self.skip_ws();
        if !self.eat_str("{") {
            return Err(self.err("expected '{' in match"));
        }
        let mut cases = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            let pattern = self.parse_expression()?;
            let body = self.parse_block()?;
            cases.push((pattern, body));
        }
        Ok(NodeKind::Match { subject, cases }.at(self.span_from(start)))
    }

    fn parse_function_decl(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let name = self.parse_identifier()?.to_string();
        self.skip_ws();
        let params = self.parse_param_list()?;
        let body = self.parse_block()?;
        Ok(NodeKind::FunctionDecl { name, params, body }.at(self.span_from(start)))
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>, Error> {
        self.skip_ws();
        let mut params = Vec::new();
        if !self.eat_str("(") {
            return Ok(params);
        }
        loop {
            self.skip_ws();
            if self.eat_str(")") {
                break;
            }
            params.push(self.parse_identifier()?.to_string());
            self.skip_ws();
            self.eat_str(",");
        }
        Ok(params)
    }

    fn parse_multi_assign(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let mut targets = vec![self.parse_postfix()?];
        loop {
            self.skip_inline_ws();
            if matches!(self.peek(), Some(c) if c != '=') && self.peek_identifier().is_some() {
                targets.push(self.parse_postfix()?);
            } else {
                break;
            }
        }
        self.skip_ws();
        if !self.eat_str("=") {
            return Err(self.err("expected '=' in multi-assignment"));
        }
        self.skip_ws();
        let value = Box::new(self.parse_rhs_expression_or_pipeline()?);
        self.eat_stmt_terminator();
        Ok(NodeKind::MultiAssign { targets, value }.at(self.span_from(start)))
    }

    /// Parses `target = expr`, a bare pipeline statement, or a bare
    /// expression statement, disambiguated by what follows the first
    /// parsed expression.
    fn parse_expr_or_assignment_statement(&mut self, start: usize) -> Result<Node, Error> {
        let expr = self.parse_expression()?;
        self.skip_inline_ws();
        if self.eat_str("=") {
            self.skip_ws();
            let value = Box::new(self.parse_rhs_expression_or_pipeline()?);
            self.eat_stmt_terminator();
            return Ok(NodeKind::Assign { target: Box::new(expr), value }.at(self.span_from(start)));
        }
        if self.peek() == Some('|') {
            let mut stages = vec![expr];
            while self.peek() == Some('|') {
                self.bump();
                self.skip_ws();
                stages.push(self.parse_call_expr()?);
                self.skip_inline_ws();
            }
            self.eat_stmt_terminator();
            return Ok(NodeKind::PipelineStmt(stages).at(self.span_from(start)));
        }
        self.eat_stmt_terminator();
        Ok(expr)
    }

    /// The right-hand side of `$a = | stage | stage` is itself a pipeline
    /// expression.
    fn parse_rhs_expression_or_pipeline(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        if self.peek() == Some('|') {
            let mut stages = Vec::new();
            while self.peek() == Some('|') {
                self.bump();
                self.skip_ws();
                stages.push(self.parse_call_expr()?);
                self.skip_inline_ws();
            }
            return Ok(NodeKind::Pipeline(stages).at(self.span_from(start)));
        }
        let first = self.parse_expression()?;
        self.skip_inline_ws();
        if self.peek() == Some('|') {
            let mut stages = vec![first];
            while self.peek() == Some('|') {
                self.bump();
                self.skip_ws();
                stages.push(self.parse_call_expr()?);
                self.skip_inline_ws();
            }
            return Ok(NodeKind::Pipeline(stages).at(self.span_from(start)));
        }
        Ok(first)
    }

    fn parse_call_expr(&mut self) -> Result<Node, Error> {
        self.parse_postfix()
    }

    // ---------------------------------------------------------------
    // Expressions (precedence climbing)
    // ---------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Node, Error> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut lhs = self.parse_and()?;
        loop {
            self.skip_inline_ws();
            if self.starts_with("||") {
                self.eat_str("||");
                self.skip_ws();
                let rhs = self.parse_and()?;
                lhs = NodeKind::BinaryOp { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) }
                    .at(self.span_from(start));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut lhs = self.parse_equality()?;
        loop {
            self.skip_inline_ws();
            if self.starts_with("&&") {
                self.eat_str("&&");
                self.skip_ws();
                let rhs = self.parse_equality()?;
                lhs = NodeKind::BinaryOp { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) }
                    .at(self.span_from(start));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut lhs = self.parse_comparison()?;
        loop {
            self.skip_inline_ws();
            let op = if self.starts_with("==") {
                Some(BinOp::Eq)
            } else if self.starts_with("!=") {
                Some(BinOp::Ne)
            } else {
                None
            };
            match op {
                Some(op) => {
                    self.pos += 2;
                    self.skip_ws();
                    let rhs = self.parse_comparison()?;
                    lhs = NodeKind::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
                        .at(self.span_from(start));
                }
                None => break,
            }
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut lhs = self.parse_range()?;
        loop {
            self.skip_inline_ws();
            let op = if self.starts_with("<=") {
                Some((BinOp::Le, 2))
            } else if self.starts_with(">=") {
                Some((BinOp::Ge, 2))
            } else if self.peek() == Some('<') && self.peek_at(1) != Some('.') {
                Some((BinOp::Lt, 1))
            } else if self.peek() == Some('>') {
                Some((BinOp::Gt, 1))
            } else {
                None
            };
            match op {
                Some((op, len)) => {
                    self.pos += len;
                    self.skip_ws();
                    let rhs = self.parse_range()?;
                    lhs = NodeKind::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
                        .at(self.span_from(start));
                }
                None => break,
            }
        }
        Ok(lhs)
    }

    /// `a..b`, `a..<b`, and the upper-bound form `..10`.
    fn parse_range(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        if self.starts_with("..") {
            return self.parse_range_tail(start, None);
        }
        let lhs = self.parse_additive()?;
        self.skip_inline_ws();
        if self.starts_with("..") {
            return self.parse_range_tail(start, Some(Box::new(lhs)));
        }
        Ok(lhs)
    }

    fn parse_range_tail(&mut self, start: usize, lhs: Option<Box<Node>>) -> Result<Node, Error> {
        self.eat_str("..");
        let exclusive = self.eat_str("<");
        self.skip_inline_ws();
        let end_present = !matches!(
            self.peek(),
            None | Some('\n') | Some(';') | Some('}') | Some(')') | Some(']') | Some(',')
        );
        let end = if end_present {
            Some(Box::new(self.parse_additive()?))
        } else {
            None
        };
        Ok(NodeKind::Range { start: lhs, end, exclusive }.at(self.span_from(start)))
    }

    fn parse_additive(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            self.skip_inline_ws();
            let op = match self.peek() {
                Some('+') => Some(BinOp::Add),
                Some('-') if self.peek_at(1) != Some('>') => Some(BinOp::Sub),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.bump();
                    self.skip_ws();
                    let rhs = self.parse_multiplicative()?;
                    lhs = NodeKind::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
                        .at(self.span_from(start));
                }
                None => break,
            }
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_inline_ws();
            let op = match self.peek() {
                Some('*') => Some(BinOp::Mul),
                Some('/') if self.peek_at(1) != Some('/') => Some(BinOp::Div),
                Some('%') => Some(BinOp::Mod),
                _ => None,
            };
            match op {
                Some(op) => {
                    self.bump();
                    self.skip_ws();
                    let rhs = self.parse_unary()?;
                    lhs = NodeKind::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
                        .at(self.span_from(start));
                }
                None => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        if self.peek() == Some('@') && self.peek_at(1) == Some('(') {
            self.bump();
            self.bump();
            self.skip_ws();
            let inner = self.parse_expression()?;
            self.skip_ws();
            if !self.eat_str(")") {
                return Err(self.err("unterminated lazy expression"));
            }
            return Ok(NodeKind::Lazy(Box::new(inner)).at(self.span_from(start)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some('.') if self.peek_at(1).map(Self::is_ident_start).unwrap_or(false) => {
                    self.bump();
                    let name = self.parse_identifier()?.to_string();
                    expr = NodeKind::Member { target: Box::new(expr), name }.at(self.span_from(start));
                }
                Some('[') => {
                    self.bump();
                    self.skip_ws();
                    expr = self.parse_index_or_slice(start, expr)?;
                }
                Some('(') => {
                    let args = self.parse_paren_args()?;
                    expr = NodeKind::Call { callee: Box::new(expr), args, must: self.eat_str("!"), shorthand: false }
                        .at(self.span_from(start));
                }
                Some('"') if matches!(expr.kind, NodeKind::Identifier(_) | NodeKind::IdentifierMember(_)) => {
                    let lit = self.parse_string_literal_node()?;
                    expr = NodeKind::Call {
                        callee: Box::new(expr),
                        args: vec![lit],
                        must: self.eat_str("!"),
                        shorthand: true,
                    }
                    .at(self.span_from(start));
                }
                Some('?') if self.peek_at(1) != Some('?') => {
                    self.bump();
                    expr = NodeKind::BoolConvert(Box::new(expr)).at(self.span_from(start));
                }
                Some('!') if self.peek_at(1) != Some('=') => {
                    self.bump();
                    expr = match expr.kind {
                        NodeKind::Call { callee, args, shorthand, .. } => {
                            NodeKind::Call { callee, args, must: true, shorthand }.at(self.span_from(start))
                        }
                        other => other.at(self.span_from(start)),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_index_or_slice(&mut self, start: usize, target: Node) -> Result<Node, Error> {
        if self.eat_str(":") {
            self.skip_ws();
            let end = if self.peek() == Some(']') { None } else { Some(Box::new(self.parse_expression()?)) };
            self.skip_ws();
            if !self.eat_str("]") {
                return Err(self.err("unterminated slice"));
            }
            if end.is_none() {
                return Err(self.err("slice with neither endpoint"));
            }
            return Ok(NodeKind::Slice { target: Box::new(target), start: None, end }.at(self.span_from(start)));
        }
        let first = self.parse_expression()?;
        self.skip_ws();
        if self.eat_str(":") {
            self.skip_ws();
            let end = if self.peek() == Some(']') { None } else { Some(Box::new(self.parse_expression()?)) };
            self.skip_ws();
            if !self.eat_str("]") {
                return Err(self.err("unterminated slice"));
            }
            return Ok(NodeKind::Slice { target: Box::new(target), start: Some(Box::new(first)), end }
                .at(self.span_from(start)));
        }
        self.skip_ws();
        if !self.eat_str("]") {
            return Err(self.err("unterminated index"));
        }
        Ok(NodeKind::Index { target: Box::new(target), index: Box::new(first) }.at(self.span_from(start)))
    }

    fn parse_paren_args(&mut self) -> Result<Vec<Node>, Error> {
        self.eat_str("(");
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str(")") {
                break;
            }
            args.push(self.parse_expression()?);
            self.skip_ws();
            self.eat_str(",");
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        self.skip_inline_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                self.skip_ws();
                let inner = self.parse_rhs_expression_or_pipeline()?;
                self.skip_ws();
                if !self.eat_str(")") {
                    return Err(self.err("unterminated parenthesized expression"));
                }
                Ok(inner)
            }
            Some('[') => self.parse_list_literal(start),
            Some('{') => self.parse_object_literal(),
            Some('"') => self.parse_string_literal_node(),
            Some('$') => self.parse_variable(start),
            Some('@') => self.parse_host_alias(start),
            Some('%') => self.parse_pattern_expr(start),
            Some('.') if self.peek_at(1) == Some('{') => self.parse_key_list(start),
            Some('.') if self.peek_at(1) == Some('.') => self.parse_range(),
            Some('/') => self.parse_absolute_path_or_url(start),
            Some(c) if c == '.' || c.is_ascii_digit() => self.parse_number(start),
            Some('-') if self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                self.parse_number(start)
            }
            Some(_) => self.parse_keyword_or_identifier_or_word_literal(start),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn parse_variable(&mut self, start: usize) -> Result<Node, Error> {
        self.bump();
        if self.eat_str("$") {
            let name = self.parse_identifier()?.to_string();
            Ok(NodeKind::GlobalVar(name).at(self.span_from(start)))
        } else {
            let name = self.parse_identifier()?.to_string();
            Ok(NodeKind::LocalVar(name).at(self.span_from(start)))
        }
    }

    fn parse_host_alias(&mut self, start: usize) -> Result<Node, Error> {
        self.bump();
        if self.eat_str("(") {
            self.skip_ws();
            let inner = self.parse_expression()?;
            self.skip_ws();
            if !self.eat_str(")") {
                return Err(self.err("unterminated lazy expression"));
            }
            return Ok(NodeKind::Lazy(Box::new(inner)).at(self.span_from(start)));
        }
        let name = self.parse_identifier()?.to_string();
        Ok(NodeKind::HostAliasRef(name).at(self.span_from(start)))
    }

    fn parse_pattern_expr(&mut self, start: usize) -> Result<Node, Error> {
        self.bump();
        if self.eat_str("{") {
            let entries = self.parse_object_pattern_entries()?;
            return Ok(NodeKind::ObjectPattern(entries).at(self.span_from(start)));
        }
        let name = self.parse_identifier()?.to_string();
        let mut node = NodeKind::PatternIdentifier(name).at(self.span_from(start));
        self.skip_inline_ws();
        while self.peek() == Some('|') {
            self.bump();
            self.skip_ws();
            let alt_start = self.pos;
            if !self.eat_str("%") {
                return Err(self.err("expected '%' in pattern union"));
            }
            let alt_name = self.parse_identifier()?.to_string();
            let alt = NodeKind::PatternIdentifier(alt_name).at(self.span_from(alt_start));
            node = NodeKind::PatternUnion(vec![node, alt]).at(self.span_from(start));
            self.skip_inline_ws();
        }
        Ok(node)
    }

    fn parse_object_pattern_entries(&mut self) -> Result<Vec<crate::ast::ObjectPatternEntry>, Error> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            let mut keys = vec![self.parse_object_key()?];
            self.skip_ws();
            while self.eat_str(",") {
                self.skip_ws();
                if self.peek() == Some(':') {
                    break;
                }
                keys.push(self.parse_object_key()?);
                self.skip_ws();
            }
            self.skip_ws();
            if !self.eat_str(":") {
                return Err(self.err("expected ':' in object pattern"));
            }
            self.skip_ws();
            let pattern = self.parse_expression()?;
            entries.push(crate::ast::ObjectPatternEntry { keys, pattern });
            self.skip_ws();
            self.eat_str(",");
        }
        Ok(entries)
    }

    fn parse_key_list(&mut self, start: usize) -> Result<Node, Error> {
        self.bump();
        self.bump();
        let mut keys = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            keys.push(self.parse_identifier()?.to_string());
            self.skip_ws();
            self.eat_str(",");
        }
        Ok(NodeKind::KeyList(keys).at(self.span_from(start)))
    }

    fn parse_list_literal(&mut self, start: usize) -> Result<Node, Error> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("]") {
                break;
            }
            if self.peek() == Some('%') {
                items.push(self.parse_pattern_expr(self.pos)?);
            } else {
                items.push(self.parse_expression()?);
            }
            self.skip_ws();
            self.eat_str(",");
        }
        Ok(NodeKind::List(items).at(self.span_from(start)))
    }

    fn parse_object_key(&mut self) -> Result<String, Error> {
        if self.peek() == Some('"') {
            self.parse_string_literal()
        } else {
            Ok(self.parse_identifier()?.to_string())
        }
    }

    fn parse_object_literal(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        self.bump();
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            if self.eat_str(":") {
                self.skip_ws();
                let value = self.parse_expression()?;
                entries.push(ObjectEntry { keys: vec![], value });
            } else {
                let mut keys = vec![self.parse_object_key()?];
                self.skip_ws();
                while self.eat_str(",") {
                    self.skip_ws();
                    if self.peek() == Some(':') {
                        break;
                    }
                    // Look ahead: a bare identifier followed by `,`/`}` with
                    // no `:` means it was actually the *next* entry, not a
                    // multi-key alias — back out.
                    let save = self.pos;
                    let candidate = self.parse_object_key()?;
                    self.skip_ws();
                    if self.peek() == Some(':') || self.peek() == Some(',') {
                        keys.push(candidate);
                        self.skip_ws();
                    } else {
                        self.pos = save;
                        break;
                    }
                }
                self.skip_ws();
                if !self.eat_str(":") {
                    // Implicit-valued shorthand: treat each bare key as its
                    // own identifier reference value is not supported by
                    // the grammar outside multi-key form, so this is a
                    // parse error.
                    return Err(self.err("expected ':' in object literal"));
                }
                self.skip_ws();
                let value = self.parse_expression()?;
                for k in &keys {
                    if k.len() > crate::value::MAX_OBJECT_KEY_BYTE_LEN {
                        return Err(self.err("object key exceeds maximum byte length"));
                    }
                }
                entries.push(ObjectEntry { keys, value });
            }
            self.skip_ws();
            self.eat_str(",");
        }
        Ok(NodeKind::Object(entries).at(self.span_from(start)))
    }

    fn parse_string_literal(&mut self) -> Result<String, Error> {
        if !self.eat_str("\"") {
            return Err(self.err("expected string literal"));
        }
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(self.err("unterminated escape sequence")),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(s)
    }

    fn parse_string_literal_node(&mut self) -> Result<Node, Error> {
        let start = self.pos;
        let s = self.parse_string_literal()?;
        Ok(NodeKind::Str(s).at(self.span_from(start)))
    }

    fn parse_number(&mut self, start: usize) -> Result<Node, Error> {
        let negative = self.eat_str("-");
        let int_part: nom::IResult<&str, &str> = recognize(digit1).parse(self.rest());
        let digits = match int_part {
            Ok((_, d)) => d,
            Err(_) => return Err(self.err("expected digit")),
        };
        self.pos += digits.len();
        let mut is_float = false;
        let mut frac = String::new();
        if self.peek() == Some('.') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(true) {
            is_float = true;
            self.bump();
            let frac_part: nom::IResult<&str, &str> = recognize(nom::multi::many0(nom::character::complete::one_of("0123456789"))).parse(self.rest());
            if let Ok((_, d)) = frac_part {
                frac = d.to_string();
                self.pos += d.len();
            }
        }
        let number_text = format!("{}{}{}{}", if negative { "-" } else { "" }, digits, if is_float { "." } else { "" }, frac);

        // Quantity: number immediately followed by a unit word, no space.
        if let Some(unit) = self.peek_unit_word() {
            self.pos += unit.len();
            let value: f64 = number_text.parse().map_err(|_| self.err("invalid quantity literal"))?;
            if self.peek() == Some('/') {
                self.bump();
                let per = self.parse_identifier().map_err(|_| self.err("rate literal missing unit after '/'"))?.to_string();
                return Ok(NodeKind::Rate { value, unit: unit.to_string(), per }.at(self.span_from(start)));
            }
            return Ok(NodeKind::Quantity { value, unit: unit.to_string() }.at(self.span_from(start)));
        }

        if is_float {
            let value: f64 = number_text.parse().map_err(|_| self.err("invalid float literal"))?;
            Ok(NodeKind::Float(value).at(self.span_from(start)))
        } else {
            let value: i64 = number_text.parse().map_err(|_| self.err("invalid integer literal"))?;
            Ok(NodeKind::Integer(value).at(self.span_from(start)))
        }
    }

    /// A unit word directly abutting a number: letters only, not itself a
    /// keyword continuing into a larger identifier use (e.g. `10s` but not
    /// `10sOMETHING` followed by more identifier characters being part of
    /// a different token — both are accepted here and left for the
    /// checker/evaluator to reject unknown units).
    fn peek_unit_word(&self) -> Option<&'a str> {
        let rest = self.rest();
        let end = rest.find(|c: char| !c.is_alphabetic()).unwrap_or(rest.len());
        if end == 0 {
            None
        } else {
            Some(&rest[..end])
        }
    }

    fn parse_keyword_or_identifier_or_word_literal(&mut self, start: usize) -> Result<Node, Error> {
        if self.starts_with("./") {
            return self.parse_relative_path_or_pattern(start);
        }
        if let Some(scheme_end) = self.peek_scheme() {
            return self.parse_url_or_host(start, scheme_end);
        }
        let id = self.parse_identifier()?;
        match id {
            "true" => return Ok(NodeKind::Bool(true).at(self.span_from(start))),
            "false" => return Ok(NodeKind::Bool(false).at(self.span_from(start))),
            "nil" => return Ok(NodeKind::Nil.at(self.span_from(start))),
            "fn" => {
                let params = self.parse_param_list()?;
                let body = self.parse_block()?;
                return Ok(NodeKind::FunctionExpr { params, body }.at(self.span_from(start)));
            }
            "sr" => return self.parse_spawn(start),
            _ => {}
        }
        let mut parts = vec![id.to_string()];
        while self.peek() == Some('.') && self.peek_at(1).map(Self::is_ident_start).unwrap_or(false) {
            self.bump();
            parts.push(self.parse_identifier()?.to_string());
        }
        let base = if parts.len() == 1 {
            NodeKind::Identifier(parts.remove(0)).at(self.span_from(start))
        } else {
            NodeKind::IdentifierMember(parts).at(self.span_from(start))
        };

        // No-parens ("must") call form: identifier followed by whitespace
        // and at least one argument on the same logical line.
        let save = self.pos;
        self.skip_inline_ws();
        if self.can_start_no_paren_arg() {
            let mut args = vec![self.parse_no_paren_arg()?];
            loop {
                self.skip_inline_ws();
                if self.eat_str(",") {
                    self.skip_ws();
                    args.push(self.parse_no_paren_arg()?);
                } else if self.can_start_no_paren_arg() {
                    args.push(self.parse_no_paren_arg()?);
                } else {
                    break;
                }
            }
            let must = self.eat_str("!");
            return Ok(NodeKind::Call { callee: Box::new(base), args, must, shorthand: false }
                .at(self.span_from(start)));
        }
        self.pos = save;
        Ok(base)
    }

    fn can_start_no_paren_arg(&self) -> bool {
        !matches!(
            self.peek(),
            None | Some('\n') | Some(';') | Some('}') | Some(')') | Some(']') | Some('=') | Some('|') | Some('{')
        )
    }

    fn parse_no_paren_arg(&mut self) -> Result<Node, Error> {
        self.parse_postfix()
    }

    fn parse_spawn(&mut self, start: usize) -> Result<Node, Error> {
        self.skip_ws();
        let group = if self.try_keyword("nil") {
            None
        } else if self.peek_identifier().is_some() {
            let save = self.pos;
            let name = self.parse_identifier()?.to_string();
            self.skip_inline_ws();
            // Only consume as a group name if a globals argument still
            // follows; otherwise this identifier was the globals/body.
            if self.peek() == Some('{') || self.try_keyword("nil") || self.peek_identifier().is_some() {
                Some(name)
            } else {
                self.pos = save;
                None
            }
        } else {
            None
        };
        self.skip_ws();
        let globals = if self.try_keyword("nil") {
            None
        } else if self.peek() == Some('{') {
            Some(Box::new(self.parse_object_literal()?))
        } else {
            None
        };
        self.skip_ws();
        let body = if self.peek() == Some('{') {
            SpawnBody::EmbeddedModule(self.parse_embedded_module_body()?)
        } else {
            SpawnBody::Call(Box::new(self.parse_postfix()?))
        };
        Ok(NodeKind::Spawn { group, globals, body }.at(self.span_from(start)))
    }

    fn parse_embedded_module_body(&mut self) -> Result<Vec<Node>, Error> {
        self.eat_str("{");
        let mut stmts = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_str("}") {
                break;
            }
            if self.at_end() {
                return Err(self.err("unterminated embedded module"));
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    // ---------------------------------------------------------------
    // Paths / URLs / hosts
    // ---------------------------------------------------------------

    fn peek_scheme(&self) -> Option<usize> {
        let rest = self.rest();
        let ident_end = rest.find(|c: char| !(c.is_alphanumeric() || c == '+' || c == '-')).unwrap_or(0);
        if ident_end == 0 {
            return None;
        }
        if rest[ident_end..].starts_with("://") {
            Some(ident_end + 3)
        } else {
            None
        }
    }

    fn parse_url_or_host(&mut self, start: usize, scheme_end: usize) -> Result<Node, Error> {
        let rest = self.rest();
        let host_start = scheme_end;
        let host_len = rest[host_start..]
            .find(|c: char| c == '/' || c.is_whitespace() || c == ',' || c == ')' || c == '}' || c == ']')
            .unwrap_or(rest[host_start..].len());
        let host_text = &rest[..host_start + host_len];
        let has_slash_after = rest[host_start + host_len..].starts_with('/');

        if !has_slash_after {
            // Bare host token (no path) — an HTTP host or host pattern.
            self.pos += host_text.len();
            return if host_text.contains('*') {
                Ok(NodeKind::HttpHostPattern(host_text.to_string()).at(self.span_from(start)))
            } else {
                Ok(NodeKind::HttpHost(host_text.to_string()).at(self.span_from(start)))
            };
        }

        // Full URL: scan to a terminator, rejecting `..` components and
        // detecting a terminal `...` prefix marker and `$`-holes.
        let url_len = rest
            .find(|c: char| c.is_whitespace() || c == ',' || c == ')' || c == '}' || c == ']' || c == ';')
            .unwrap_or(rest.len());
        let raw = &rest[..url_len];
        if raw.contains("..") && !raw.ends_with("...") {
            return Err(self.err("'..' is not allowed in a URL"));
        }
        let (body, prefix) = match raw.strip_suffix("...") {
            Some(b) => (b, true),
            None => (raw, false),
        };
        self.pos += raw.len();
        if body.contains('$') {
            let parts = split_interp(body);
            return Ok(NodeKind::UrlInterp { base: parts, query: Vec::new() }.at(self.span_from(start)));
        }
        Ok(NodeKind::Url(body.to_string()).at(self.span_from(start)))
            .map(|n| if prefix {
                NodeKind::UrlPattern { url: body.to_string(), prefix: true }.at(n.span)
            } else {
                n
            })
    }

    fn parse_absolute_path_or_url(&mut self, start: usize) -> Result<Node, Error> {
        self.parse_path_like(start, true)
    }

    fn parse_relative_path_or_pattern(&mut self, start: usize) -> Result<Node, Error> {
        self.parse_path_like(start, false)
    }

    fn parse_path_like(&mut self, start: usize, absolute: bool) -> Result<Node, Error> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || c == ',' || c == ')' || c == '}' || c == ']' || c == ';')
            .unwrap_or(rest.len());
        let raw = &rest[..len];
        if raw.contains("..") && !raw.ends_with("...") && !raw.starts_with("./") {
            return Err(self.err("'..' is not allowed in a path"));
        }
        // `./` itself is fine; only interior `..` components are rejected.
        let body_checked = if absolute { raw } else { &raw[2..] };
        if contains_dotdot_component(body_checked) {
            return Err(self.err("'..' path component is not allowed"));
        }
        let (body, prefix) = match raw.strip_suffix("...") {
            Some(b) => (b, true),
            None => (raw, false),
        };
        self.pos += raw.len();
        if body.contains('$') {
            let parts = split_interp(body);
            return Ok(NodeKind::PathInterp(parts).at(self.span_from(start)));
        }
        if prefix {
            return Ok(NodeKind::PathPattern { path: body.to_string(), prefix: true }.at(self.span_from(start)));
        }
        if absolute {
            Ok(NodeKind::AbsolutePath(body.to_string()).at(self.span_from(start)))
        } else {
            Ok(NodeKind::RelativePath(body.to_string()).at(self.span_from(start)))
        }
    }
}

fn contains_dotdot_component(s: &str) -> bool {
    s.split('/').any(|seg| seg == "..")
}

/// Splits a path/URL body containing `$name` holes into literal/hole
/// parts for the interpolation node kinds.
fn split_interp(body: &str) -> Vec<InterpPart> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '$' {
            if !literal.is_empty() {
                parts.push(InterpPart::Literal(std::mem::take(&mut literal)));
            }
            let mut name = String::new();
            while let Some(&(_, nc)) = chars.peek() {
                if nc.is_alphanumeric() || nc == '-' || nc == '_' {
                    name.push(nc);
                    chars.next();
                } else {
                    break;
                }
            }
            let hole_span = Span::point(0);
            parts.push(InterpPart::Hole(NodeKind::LocalVar(name).at(hole_span)));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        parts.push(InterpPart::Literal(literal));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    fn parse_expr(src: &str) -> Node {
        let mut p = State::new(src);
        p.skip_ws();
        p.parse_expression().expect("expected a parseable expression")
    }

    #[test]
    fn parses_integer_literal() {
        let n = parse_expr("42");
        assert!(matches!(n.kind, NodeKind::Integer(42)));
    }

    #[test]
    fn parses_negative_float() {
        let n = parse_expr("-3.5");
        match n.kind {
            NodeKind::Float(f) => assert!((f + 3.5).abs() < f64::EPSILON),
            _ => panic!("expected float"),
        }
    }

    #[test]
    fn parses_byte_rate_quantity() {
        let n = parse_expr("10kB/s");
        match n.kind {
            NodeKind::Rate { value, unit, per } => {
                assert_eq!(value, 10.0);
                assert_eq!(unit, "kB");
                assert_eq!(per, "s");
            }
            other => panic!("expected rate literal, got {other:?}"),
        }
    }

    #[test]
    fn parses_local_and_global_variables() {
        assert!(matches!(parse_expr("$x").kind, NodeKind::LocalVar(n) if n == "x"));
        assert!(matches!(parse_expr("$$x").kind, NodeKind::GlobalVar(n) if n == "x"));
    }

    #[test]
    fn rejects_dotdot_in_absolute_path() {
        let mut p = State::new("/etc/../passwd");
        p.skip_ws();
        assert!(p.parse_expression().is_err());
    }

    #[test]
    fn accepts_terminal_ellipsis_as_path_pattern() {
        let n = parse_expr("/var/log/...");
        assert!(matches!(n.kind, NodeKind::PathPattern { prefix: true, .. }));
    }

    #[test]
    fn parses_list_literal() {
        let n = parse_expr("[1, 2, 3]");
        match n.kind {
            NodeKind::List(items) => assert_eq!(items.len(), 3),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn parses_module_with_assignment_and_return() {
        let module = parse("$a = [0]\n$a[0] = 1\nreturn $a\n").unwrap();
        match module.kind {
            NodeKind::Module(stmts) => assert_eq!(stmts.len(), 3),
            other => panic!("expected module, got {other:?}"),
        }
    }

    #[test]
    fn parses_pipeline_statement() {
        let module = parse("print $a | do-something | do-something-else\n").unwrap();
        match module.kind {
            NodeKind::Module(stmts) => {
                assert_eq!(stmts.len(), 1);
                assert!(matches!(stmts[0].kind, NodeKind::PipelineStmt(ref s) if s.len() == 3));
            }
            other => panic!("expected module, got {other:?}"),
        }
    }

    #[test]
    fn span_is_within_source_bounds() {
        let module = parse("$a = 1\n").unwrap();
        assert!(module.span.start < module.span.end);
        assert!(module.span.end <= "$a = 1\n".len());
    }
}
