//! The sandboxed expression evaluator: a small boolean/value expression
//! language used for `Condition`, `Filter`, and wait predicates.
//!
//! Grammar (lowest to highest precedence):
//!   expr    := or
//!   or      := and ("||" and)*
//!   and     := equality ("&&" equality)*
//!   equality:= comparison (("==" | "!=") comparison)*
//!   comparison := additive (("<" | "<=" | ">" | ">=") additive)*
//!   additive := multiplicative (("+" | "-") multiplicative)*
//!   multiplicative := unary (("*" | "/") unary)*
//!   unary   := ("!" | "-")? primary
//!   primary := literal | path | "(" expr ")"
//!
//! Variables bound: `signal, processor, task, workflow, tasks, input, with,
//! env, item, index, parent, current, project, payload, headers, query` —
//! enforced by the caller assembling the root object ([`crate::context`]),
//! not by this module (a path into an unbound key simply resolves to null).

use crate::error::ExpressionError;
use serde_json::Value as Json;
use std::sync::Arc;

use super::cache::ProgramCache;

/// Default cost ceiling.
pub const DEFAULT_COST_CEILING: u64 = 1000;
/// Expressions exceeding this fraction of the ceiling emit a warning.
pub const COST_WARNING_FRACTION: f64 = 0.8;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Path(Vec<PathSeg>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathSeg {
    Field(String),
    Index(usize),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

/// A compiled program: the AST plus its static cost estimate (node count).
#[derive(Clone, Debug)]
pub struct Program {
    pub expr: Arc<Expr>,
    pub static_cost: u64,
}

pub struct Evaluator {
    cache: ProgramCache<Program>,
    cost_ceiling: u64,
}

impl Evaluator {
    pub fn new(cost_ceiling: u64) -> Self {
        Self {
            cache: ProgramCache::new(cost_ceiling.max(1) * 64),
            cost_ceiling,
        }
    }

    /// Compile (or fetch from cache) the program for `expr_text`.
    pub fn compile(&self, expr_text: &str) -> Result<Program, ExpressionError> {
        if let Some(p) = self.cache.get(expr_text) {
            return Ok(p);
        }
        let mut parser = Parser::new(expr_text);
        let expr = parser
            .parse_expr()
            .map_err(|reason| ExpressionError::CompileError {
                expr: expr_text.to_string(),
                reason,
            })?;
        parser.expect_end().map_err(|reason| ExpressionError::CompileError {
            expr: expr_text.to_string(),
            reason,
        })?;
        let static_cost = count_nodes(&expr);
        let program = Program {
            expr: Arc::new(expr),
            static_cost,
        };
        self.cache
            .insert(expr_text.to_string(), program.clone(), static_cost);
        Ok(program)
    }

    /// Evaluate and return the raw value (any type).
    pub fn evaluate_value(&self, expr_text: &str, vars: &Json) -> Result<Json, ExpressionError> {
        let program = self.compile(expr_text)?;
        let mut cost = 0u64;
        let result = eval(&program.expr, vars, &mut cost, self.cost_ceiling)?;
        if cost as f64 >= self.cost_ceiling as f64 * COST_WARNING_FRACTION {
            tracing::warn!(
                expr = expr_text,
                cost,
                ceiling = self.cost_ceiling,
                "expression cost approaching ceiling"
            );
        }
        Ok(result)
    }

    /// Evaluate and require the result to be a boolean.
    pub fn evaluate(&self, expr_text: &str, vars: &Json) -> Result<bool, ExpressionError> {
        let value = self.evaluate_value(expr_text, vars)?;
        value
            .as_bool()
            .ok_or_else(|| ExpressionError::TypeError {
                expected: "bool".to_string(),
                got: json_type_name(&value).to_string(),
            })
    }
}

fn count_nodes(expr: &Expr) -> u64 {
    match expr {
        Expr::Null | Expr::Bool(_) | Expr::Num(_) | Expr::Str(_) | Expr::Path(_) => 1,
        Expr::Unary(_, inner) => 1 + count_nodes(inner),
        Expr::Binary(_, lhs, rhs) => 1 + count_nodes(lhs) + count_nodes(rhs),
    }
}

fn eval(expr: &Expr, vars: &Json, cost: &mut u64, ceiling: u64) -> Result<Json, ExpressionError> {
    *cost += 1;
    if *cost > ceiling {
        return Err(ExpressionError::CostExceeded {
            cost: *cost,
            limit: ceiling,
        });
    }
    match expr {
        Expr::Null => Ok(Json::Null),
        Expr::Bool(b) => Ok(Json::Bool(*b)),
        Expr::Num(n) => Ok(serde_json::json!(n)),
        Expr::Str(s) => Ok(Json::String(s.clone())),
        Expr::Path(segs) => Ok(resolve_path(vars, segs)),
        Expr::Unary(op, inner) => {
            let v = eval(inner, vars, cost, ceiling)?;
            match op {
                UnOp::Not => Ok(Json::Bool(!truthy(&v))),
                UnOp::Neg => {
                    let n = as_num(&v)?;
                    Ok(serde_json::json!(-n))
                }
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, vars, cost, ceiling)?;
            // Short-circuit and/or.
            match op {
                BinOp::And => {
                    if !truthy(&l) {
                        return Ok(Json::Bool(false));
                    }
                    let r = eval(rhs, vars, cost, ceiling)?;
                    return Ok(Json::Bool(truthy(&r)));
                }
                BinOp::Or => {
                    if truthy(&l) {
                        return Ok(Json::Bool(true));
                    }
                    let r = eval(rhs, vars, cost, ceiling)?;
                    return Ok(Json::Bool(truthy(&r)));
                }
                _ => {}
            }
            let r = eval(rhs, vars, cost, ceiling)?;
            match op {
                BinOp::Eq => Ok(Json::Bool(json_eq(&l, &r))),
                BinOp::Ne => Ok(Json::Bool(!json_eq(&l, &r))),
                BinOp::Lt => Ok(Json::Bool(as_num(&l)? < as_num(&r)?)),
                BinOp::Le => Ok(Json::Bool(as_num(&l)? <= as_num(&r)?)),
                BinOp::Gt => Ok(Json::Bool(as_num(&l)? > as_num(&r)?)),
                BinOp::Ge => Ok(Json::Bool(as_num(&l)? >= as_num(&r)?)),
                BinOp::Add => numeric_or_concat(&l, &r, |a, b| a + b),
                BinOp::Sub => Ok(serde_json::json!(as_num(&l)? - as_num(&r)?)),
                BinOp::Mul => Ok(serde_json::json!(as_num(&l)? * as_num(&r)?)),
                BinOp::Div => Ok(serde_json::json!(as_num(&l)? / as_num(&r)?)),
                BinOp::And | BinOp::Or => unreachable!("handled above"),
            }
        }
    }
}

fn numeric_or_concat(l: &Json, r: &Json, f: impl Fn(f64, f64) -> f64) -> Result<Json, ExpressionError> {
    if let (Json::String(a), Json::String(b)) = (l, r) {
        return Ok(Json::String(format!("{a}{b}")));
    }
    Ok(serde_json::json!(f(as_num(l)?, as_num(r)?)))
}

fn as_num(v: &Json) -> Result<f64, ExpressionError> {
    v.as_f64().ok_or_else(|| ExpressionError::TypeError {
        expected: "number".to_string(),
        got: json_type_name(v).to_string(),
    })
}

pub fn truthy(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

fn json_eq(l: &Json, r: &Json) -> bool {
    l == r
}

pub fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Resolve a dotted/bracketed path against a variable root, returning `null`
/// for anything unbound rather than erroring — matches the teacher's
/// defaulting behaviour for optional context keys.
pub fn resolve_path(root: &Json, segs: &[PathSeg]) -> Json {
    let mut cur = root;
    for seg in segs {
        match seg {
            PathSeg::Field(name) => match cur.get(name) {
                Some(v) => cur = v,
                None => return Json::Null,
            },
            PathSeg::Index(i) => match cur.get(i) {
                Some(v) => cur = v,
                None => return Json::Null,
            },
        }
    }
    cur.clone()
}

// ─── Parser ─────────────────────────────────────────────────────

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            src,
        }
    }

    fn expect_end(&mut self) -> Result<(), String> {
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(format!(
                "unexpected trailing input at byte {} in `{}`",
                self.pos, self.src
            ));
        }
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, s: &str) -> bool {
        self.skip_ws();
        let sc: Vec<char> = s.chars().collect();
        if self.chars[self.pos..].starts_with(sc.as_slice()) {
            self.pos += sc.len();
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.eat("||") {
                let rhs = self.parse_and()?;
                lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_equality()?;
        loop {
            self.skip_ws();
            if self.eat("&&") {
                let rhs = self.parse_equality()?;
                lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_comparison()?;
        loop {
            self.skip_ws();
            if self.eat("==") {
                let rhs = self.parse_comparison()?;
                lhs = Expr::Binary(BinOp::Eq, Box::new(lhs), Box::new(rhs));
            } else if self.eat("!=") {
                let rhs = self.parse_comparison()?;
                lhs = Expr::Binary(BinOp::Ne, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            self.skip_ws();
            let op = if self.eat("<=") {
                Some(BinOp::Le)
            } else if self.eat(">=") {
                Some(BinOp::Ge)
            } else if self.eat("<") {
                Some(BinOp::Lt)
            } else if self.eat(">") {
                Some(BinOp::Gt)
            } else {
                None
            };
            match op {
                Some(op) => {
                    let rhs = self.parse_additive()?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                None => break,
            }
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            self.skip_ws();
            if self.eat("+") {
                let rhs = self.parse_multiplicative()?;
                lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
            } else if self.peek() == Some('-') && !self.looks_like_neg_of_next() {
                self.pos += 1;
                let rhs = self.parse_multiplicative()?;
                lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    // `-` is ambiguous only at statement start, which additive never is; kept
    // for symmetry with unary minus parsing below.
    fn looks_like_neg_of_next(&self) -> bool {
        false
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.eat("*") {
                let rhs = self.parse_unary()?;
                lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
            } else if self.eat("/") {
                let rhs = self.parse_unary()?;
                lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        if self.eat("!") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        if self.peek() == Some('-') {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.skip_ws();
                if !self.eat(")") {
                    return Err("expected closing `)`".to_string());
                }
                Ok(inner)
            }
            Some('"') => self.parse_string(),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('.') => self.parse_path(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_ident_or_keyword(),
            other => Err(format!("unexpected character {other:?} in expression")),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, String> {
        self.pos += 1; // opening quote
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err("unterminated string literal".to_string()),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(c) => s.push(c),
                        None => return Err("unterminated escape".to_string()),
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Expr::Str(s))
    }

    fn parse_number(&mut self) -> Result<Expr, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Expr::Num)
            .map_err(|e| format!("invalid number `{text}`: {e}"))
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_ident_or_keyword(&mut self) -> Result<Expr, String> {
        let ident = self.parse_ident();
        match ident.as_str() {
            "true" => Ok(Expr::Bool(true)),
            "false" => Ok(Expr::Bool(false)),
            "null" | "nil" => Ok(Expr::Null),
            _ => {
                let mut segs = vec![PathSeg::Field(ident)];
                self.parse_path_tail(&mut segs)?;
                Ok(Expr::Path(segs))
            }
        }
    }

    fn parse_path(&mut self) -> Result<Expr, String> {
        self.pos += 1; // leading '.'
        let ident = self.parse_ident();
        if ident.is_empty() {
            return Err("expected identifier after `.`".to_string());
        }
        let mut segs = vec![PathSeg::Field(ident)];
        self.parse_path_tail(&mut segs)?;
        Ok(Expr::Path(segs))
    }

    fn parse_path_tail(&mut self, segs: &mut Vec<PathSeg>) -> Result<(), String> {
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    let ident = self.parse_ident();
                    if ident.is_empty() {
                        return Err("expected identifier after `.`".to_string());
                    }
                    segs.push(PathSeg::Field(ident));
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    let start = self.pos;
                    while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                        self.pos += 1;
                    }
                    let text: String = self.chars[start..self.pos].iter().collect();
                    let idx: usize = text
                        .parse()
                        .map_err(|_| format!("expected integer index, got `{text}`"))?;
                    self.skip_ws();
                    if self.peek() != Some(']') {
                        return Err("expected closing `]`".to_string());
                    }
                    self.pos += 1;
                    segs.push(PathSeg::Index(idx));
                }
                _ => break,
            }
        }
        Ok(())
    }
}
