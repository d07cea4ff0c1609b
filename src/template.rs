//! The templating pass.
//!
//! A small logic-light template language evaluated against a JSON data
//! context. It runs once per root template, after inclusion directives are
//! expanded and before translation markers are substituted, so it only ever
//! sees actions between its own delimiters and passes `{{ … }}` markers
//! through untouched.
//!
//! ## Syntax
//!
//! With the default `[%` / `%]` delimiters:
//!
//! - `[% .git.version %]` prints a context field; `[% . %]` prints the
//!   current value
//! - `[% $v %]`, `[% $v.field %]` print a variable
//! - `[% $v := .a.b %]` declares a variable until the end of the enclosing
//!   block
//! - `[% if .compress %] … [% else if .x %] … [% else %] … [% end %]`
//! - `[% with .git %] … [% else %] … [% end %]` sets `.` to the value when it
//!   is truthy
//! - `[% range .languages %] … [% else %] … [% end %]` sets `.` to each
//!   element; the `else` branch runs for an empty collection
//! - `[% range $code, $info := .languages %] … [% end %]` also binds
//!   key and value; objects iterate in sorted key order
//! - function calls, optionally parenthesized as arguments:
//!   `eq .basename "index" "faq"` (first argument equals any other),
//!   `ne`, `lt`, `le`, `gt`, `ge`, `and`, `or`, `not`, `len`,
//!   `index .languages "fr_FR"`
//! - literals: `"string"` (with `\"`, `\\`, `\n`, `\t`), `` `raw` ``,
//!   numbers, `true`, `false`
//! - `[%- … -%]` trims whitespace before / after the action
//! - `[%/* comment */%]` renders nothing
//!
//! Truthiness: `false`, `null`, `0`, and empty strings, arrays, and objects
//! are false. `and` / `or` return the deciding argument and stop evaluating
//! there. Numbers compare by value; `len` counts characters of a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use thiserror::Error;

/// An error while parsing or executing a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}:{line}: {message}")]
pub struct TemplateError {
    pub name: String,
    pub line: usize,
    pub message: String,
}

/// The action delimiter pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "[%".to_string(),
            close: "%]".to_string(),
        }
    }
}

/// Parse and execute `source` in one go.
pub fn render(
    name: &str,
    source: &str,
    delimiters: &Delimiters,
    context: &Value,
) -> Result<String, TemplateError> {
    Template::parse(name, source, delimiters)?.render(context)
}

/// A parsed template.
#[derive(Debug)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Text(String),
    Print {
        expr: Expr,
        line: usize,
    },
    Assign {
        name: String,
        expr: Expr,
        line: usize,
    },
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
    With {
        expr: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
    Range {
        key_var: Option<String>,
        value_var: Option<String>,
        expr: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
}

#[derive(Debug)]
enum Root {
    Dot,
    Var(String),
}

/// A field path rooted at `.` or at a variable.
#[derive(Debug)]
struct FieldPath {
    root: Root,
    fields: Vec<String>,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Dot if self.fields.is_empty() => return f.write_str("."),
            Root::Dot => {}
            Root::Var(name) => write!(f, "${name}")?,
        }
        for field in &self.fields {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Len,
    Index,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "len" => Self::Len,
            "index" => Self::Index,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Len => "len",
            Self::Index => "index",
        }
    }

    fn check_arity(self, count: usize) -> Result<(), String> {
        let ok = match self {
            Self::Eq => count >= 2,
            Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => count == 2,
            Self::And | Self::Or | Self::Index => count >= 1,
            Self::Not | Self::Len => count == 1,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("wrong number of arguments for `{}`: {count}", self.name()))
        }
    }
}

#[derive(Debug)]
enum Expr {
    Path(FieldPath),
    Literal(Value),
    Call { func: Func, args: Vec<Expr> },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => fmt::Display::fmt(path, f),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Call { func, args } => {
                write!(f, "({}", func.name())?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

enum Token<'a> {
    Text(&'a str),
    Action { body: &'a str, line: usize },
}

/// How a block of nodes ended. `Else` carries the rest of an
/// `else if …` / `else with …` action.
enum Terminator<'a> {
    Eof,
    Else(usize, Option<&'a str>),
    End(usize),
}

type Vars = [(String, Value)];

impl Template {
    pub fn parse(name: &str, source: &str, delimiters: &Delimiters) -> Result<Self, TemplateError> {
        let error = |line: usize, message: String| TemplateError {
            name: name.to_string(),
            line,
            message,
        };

        let tokens = tokenize(source, delimiters).map_err(|(line, message)| error(line, message))?;
        let mut parser = Parser {
            tokens: tokens.into_iter(),
        };
        let (nodes, terminator) = parser.block().map_err(|(line, message)| error(line, message))?;
        match terminator {
            Terminator::Eof => Ok(Self {
                name: name.to_string(),
                nodes,
            }),
            Terminator::Else(line, _) => Err(error(line, "unexpected `else`".to_string())),
            Terminator::End(line) => Err(error(line, "unmatched `end`".to_string())),
        }
    }

    pub fn render(&self, context: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        let mut vars = Vec::new();
        self.exec(&self.nodes, context, &mut vars, &mut out)?;
        Ok(out)
    }

    fn error(&self, line: usize, message: String) -> TemplateError {
        TemplateError {
            name: self.name.clone(),
            line,
            message,
        }
    }

    fn eval<'v>(&self, expr: &Expr, dot: &'v Value, vars: &'v Vars, line: usize) -> Result<Cow<'v, Value>, TemplateError> {
        evaluate(expr, dot, vars).map_err(|m| self.error(line, m))
    }

    /// Execute `nodes`; variables declared inside go out of scope at the end.
    fn exec(
        &self,
        nodes: &[Node],
        dot: &Value,
        vars: &mut Vec<(String, Value)>,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let mark = vars.len();
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Print { expr, line } => {
                    let value = self.eval(expr, dot, vars, *line)?;
                    match &*value {
                        Value::Null => {}
                        Value::String(s) => out.push_str(s),
                        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                        Value::Number(n) => out.push_str(&n.to_string()),
                        Value::Array(_) | Value::Object(_) => {
                            return Err(self.error(*line, format!("cannot print composite value {expr}")));
                        }
                    }
                }
                Node::Assign { name, expr, line } => {
                    let value = self.eval(expr, dot, vars, *line)?.into_owned();
                    vars.push((name.clone(), value));
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                    line,
                } => {
                    let taken = truthy(&*self.eval(cond, dot, vars, *line)?);
                    self.exec(if taken { then } else { otherwise }, dot, vars, out)?;
                }
                Node::With {
                    expr,
                    body,
                    otherwise,
                    line,
                } => {
                    let value = self.eval(expr, dot, vars, *line)?.into_owned();
                    if truthy(&value) {
                        self.exec(body, &value, vars, out)?;
                    } else {
                        self.exec(otherwise, dot, vars, out)?;
                    }
                }
                Node::Range {
                    key_var,
                    value_var,
                    expr,
                    body,
                    otherwise,
                    line,
                } => {
                    let collection = self.eval(expr, dot, vars, *line)?.into_owned();
                    let items: Vec<(Value, Value)> = match collection {
                        Value::Null => Vec::new(),
                        Value::Array(items) => items
                            .into_iter()
                            .enumerate()
                            .map(|(i, item)| (Value::from(i), item))
                            .collect(),
                        Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
                        _ => return Err(self.error(*line, format!("cannot range over {expr}"))),
                    };
                    if items.is_empty() {
                        self.exec(otherwise, dot, vars, out)?;
                    }
                    for (key, item) in items {
                        let mark = vars.len();
                        if let Some(name) = key_var {
                            vars.push((name.clone(), key));
                        }
                        if let Some(name) = value_var {
                            vars.push((name.clone(), item.clone()));
                        }
                        self.exec(body, &item, vars, out)?;
                        vars.truncate(mark);
                    }
                }
            }
        }
        vars.truncate(mark);
        Ok(())
    }
}

fn evaluate<'v>(expr: &Expr, dot: &'v Value, vars: &'v Vars) -> Result<Cow<'v, Value>, String> {
    match expr {
        Expr::Path(path) => resolve(path, dot, vars).map(Cow::Borrowed),
        Expr::Literal(value) => Ok(Cow::Owned(value.clone())),
        Expr::Call { func, args } => call(*func, args, dot, vars),
    }
}

fn call<'v>(func: Func, args: &[Expr], dot: &'v Value, vars: &'v Vars) -> Result<Cow<'v, Value>, String> {
    let arg = |i: usize| evaluate(&args[i], dot, vars);
    match func {
        Func::And | Func::Or => {
            let mut last = Cow::Owned(Value::Null);
            for expr in args {
                last = evaluate(expr, dot, vars)?;
                if truthy(&last) == (func == Func::Or) {
                    break;
                }
            }
            Ok(last)
        }
        Func::Not => boolean(!truthy(&*arg(0)?)),
        Func::Len => {
            let value = arg(0)?;
            let len = match &*value {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(format!("len of {}", kind(other))),
            };
            Ok(Cow::Owned(Value::from(len)))
        }
        Func::Index => {
            let mut current = arg(0)?;
            for key in &args[1..] {
                let key = evaluate(key, dot, vars)?;
                current = match current {
                    Cow::Borrowed(value) => lookup(value, &key)?.map_or(Cow::Owned(Value::Null), Cow::Borrowed),
                    Cow::Owned(value) => Cow::Owned(lookup(&value, &key)?.cloned().unwrap_or(Value::Null)),
                };
            }
            Ok(current)
        }
        Func::Eq => {
            let first = arg(0)?;
            for i in 1..args.len() {
                if equal(&first, &*arg(i)?)? {
                    return boolean(true);
                }
            }
            boolean(false)
        }
        Func::Ne => boolean(!equal(&*arg(0)?, &*arg(1)?)?),
        Func::Lt | Func::Le | Func::Gt | Func::Ge => {
            let ordering = compare(&*arg(0)?, &*arg(1)?)?;
            boolean(match func {
                Func::Lt => ordering == Ordering::Less,
                Func::Le => ordering != Ordering::Greater,
                Func::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn boolean<'v>(b: bool) -> Result<Cow<'v, Value>, String> {
    Ok(Cow::Owned(Value::Bool(b)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn equal(a: &Value, b: &Value) -> Result<bool, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.as_f64() == y.as_f64()),
        (Value::String(x), Value::String(y)) => Ok(x == y),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Null, Value::Null) => Ok(true),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            Err(format!("cannot compare {} with {}", kind(a), kind(b)))
        }
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        _ => Err(format!("incompatible types for comparison: {} and {}", kind(a), kind(b))),
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .ok_or_else(|| "numbers are not comparable".to_string()),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(format!("cannot order {} and {}", kind(a), kind(b))),
    }
}

/// `value[key]`: a missing object key is `None`, an out-of-range index is an
/// error.
fn lookup<'v>(value: &'v Value, key: &Value) -> Result<Option<&'v Value>, String> {
    match (value, key) {
        (Value::Null, _) => Ok(None),
        (Value::Object(map), Value::String(key)) => Ok(map.get(key)),
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_u64().ok_or_else(|| format!("bad index {n}"))?;
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .map(Some)
                .ok_or_else(|| format!("index {i} out of range"))
        }
        _ => Err(format!("cannot index {} with {}", kind(value), kind(key))),
    }
}

fn resolve<'a>(path: &FieldPath, dot: &'a Value, vars: &'a Vars) -> Result<&'a Value, String> {
    let mut current = match &path.root {
        Root::Dot => dot,
        Root::Var(name) => vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value)
            .ok_or_else(|| format!("undefined variable ${name}"))?,
    };
    for field in &path.fields {
        current = match current {
            Value::Object(map) => map
                .get(field)
                .ok_or_else(|| format!("no field `{field}` in {path}"))?,
            _ => return Err(format!("cannot read `{field}` of a non-object in {path}")),
        };
    }
    Ok(current)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn tokenize<'a>(source: &'a str, delimiters: &Delimiters) -> Result<Vec<Token<'a>>, (usize, String)> {
    let (open, close) = (delimiters.open.as_str(), delimiters.close.as_str());
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    while let Some(start) = rest.find(open) {
        let raw = &rest[..start];
        let after = &rest[start + open.len()..];
        let end = after.find(close).ok_or_else(|| {
            let line = line + raw.matches('\n').count();
            (line, format!("unclosed action, expected `{close}`"))
        })?;
        let mut body = &after[..end];

        let trim_before = trim_marker(body.strip_prefix('-'), true);
        if let Some(inner) = trim_before {
            body = inner;
        }
        let trim_after = trim_marker(body.strip_suffix('-'), false);
        if let Some(inner) = trim_after {
            body = inner;
        }

        let mut text = raw;
        if trim_next {
            text = text.trim_start();
        }
        if trim_before.is_some() {
            text = text.trim_end();
        }
        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }
        line += raw.matches('\n').count();

        tokens.push(Token::Action { body, line });
        line += after[..end].matches('\n').count();
        trim_next = trim_after.is_some();
        rest = &after[end + close.len()..];
    }
    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(tokens)
}

/// A `-` trim marker only counts when whitespace separates it from the
/// action body, so `[%-3%]` still prints the number -3.
fn trim_marker(inner: Option<&str>, leading: bool) -> Option<&str> {
    let inner = inner?;
    let separated = if leading {
        inner.starts_with(char::is_whitespace)
    } else {
        inner.ends_with(char::is_whitespace)
    };
    separated.then_some(inner)
}

struct Parser<'a> {
    tokens: std::vec::IntoIter<Token<'a>>,
}

impl<'a> Parser<'a> {
    /// Parse nodes until end of input or a block terminator.
    fn block(&mut self) -> Result<(Vec<Node>, Terminator<'a>), (usize, String)> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            let (body, line) = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text.to_string()));
                    continue;
                }
                Token::Action { body, line } => (body.trim(), line),
            };
            if body.starts_with("/*") && body.ends_with("*/") {
                continue;
            }
            if let Some(assign) = assignment(body, line)? {
                nodes.push(assign);
                continue;
            }

            let (keyword, args) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
            let args = args.trim();
            match keyword {
                "else" if args.is_empty() => return Ok((nodes, Terminator::Else(line, None))),
                "else" => return Ok((nodes, Terminator::Else(line, Some(args)))),
                "end" if args.is_empty() => return Ok((nodes, Terminator::End(line))),
                "if" => nodes.push(self.if_node(args, line)?),
                "with" => nodes.push(self.with_node(args, line)?),
                "range" => nodes.push(self.range_node(args, line)?),
                _ => nodes.push(Node::Print {
                    expr: parse_expr(body).map_err(|m| (line, m))?,
                    line,
                }),
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn if_node(&mut self, args: &str, line: usize) -> Result<Node, (usize, String)> {
        let cond = parse_expr(args).map_err(|m| (line, m))?;
        let (then, otherwise) = self.branches("if", line)?;
        Ok(Node::If {
            cond,
            then,
            otherwise,
            line,
        })
    }

    fn with_node(&mut self, args: &str, line: usize) -> Result<Node, (usize, String)> {
        let expr = parse_expr(args).map_err(|m| (line, m))?;
        let (body, otherwise) = self.branches("with", line)?;
        Ok(Node::With {
            expr,
            body,
            otherwise,
            line,
        })
    }

    /// The body of an `if`/`with` plus its `else` part. An `else if` or
    /// `else with` chain nests the next conditional, which consumes the
    /// shared `end`.
    fn branches(&mut self, kind: &str, line: usize) -> Result<(Vec<Node>, Vec<Node>), (usize, String)> {
        let (body, terminator) = self.block()?;
        let otherwise = match terminator {
            Terminator::End(_) => Vec::new(),
            Terminator::Else(_, None) => self.closing_block(kind, line)?,
            Terminator::Else(else_line, Some(chained)) => {
                let (keyword, args) = chained.split_once(char::is_whitespace).unwrap_or((chained, ""));
                match keyword {
                    "if" => vec![self.if_node(args.trim(), else_line)?],
                    "with" => vec![self.with_node(args.trim(), else_line)?],
                    _ => {
                        return Err((else_line, format!("expected `if` or `with` after `else`, found `{chained}`")));
                    }
                }
            }
            Terminator::Eof => return Err((line, format!("missing `end` for `{kind}`"))),
        };
        Ok((body, otherwise))
    }

    /// A final `else` block, which must be closed by `end`.
    fn closing_block(&mut self, kind: &str, line: usize) -> Result<Vec<Node>, (usize, String)> {
        match self.block()? {
            (nodes, Terminator::End(_)) => Ok(nodes),
            (_, Terminator::Else(else_line, _)) => Err((else_line, format!("duplicate `else` in `{kind}`"))),
            (_, Terminator::Eof) => Err((line, format!("missing `end` for `{kind}`"))),
        }
    }

    fn range_node(&mut self, args: &str, line: usize) -> Result<Node, (usize, String)> {
        let (key_var, value_var, operand) = match args.split_once(":=") {
            None => (None, None, args),
            Some((declared, operand)) => {
                let names = declared
                    .split(',')
                    .map(|name| parse_var_name(name.trim()).map_err(|m| (line, m)))
                    .collect::<Result<Vec<_>, _>>()?;
                match names.as_slice() {
                    [value] => (None, Some(value.clone()), operand.trim()),
                    [key, value] => (Some(key.clone()), Some(value.clone()), operand.trim()),
                    _ => return Err((line, "range declares one or two variables".to_string())),
                }
            }
        };
        let expr = parse_expr(operand).map_err(|m| (line, m))?;

        let (body, terminator) = self.block()?;
        let otherwise = match terminator {
            Terminator::End(_) => Vec::new(),
            Terminator::Else(_, None) => self.closing_block("range", line)?,
            Terminator::Else(else_line, Some(_)) => {
                return Err((else_line, "only a plain `else` may follow `range`".to_string()));
            }
            Terminator::Eof => return Err((line, "missing `end` for `range`".to_string())),
        };
        Ok(Node::Range {
            key_var,
            value_var,
            expr,
            body,
            otherwise,
            line,
        })
    }
}

/// `$name := expr`, or `None` when `body` is not a declaration.
fn assignment(body: &str, line: usize) -> Result<Option<Node>, (usize, String)> {
    if !body.starts_with('$') {
        return Ok(None);
    }
    let Some((name, value)) = body.split_once(":=") else {
        return Ok(None);
    };
    let name = parse_var_name(name.trim()).map_err(|m| (line, m))?;
    let expr = parse_expr(value.trim()).map_err(|m| (line, m))?;
    Ok(Some(Node::Assign { name, expr, line }))
}

fn parse_var_name(word: &str) -> Result<String, String> {
    match word.strip_prefix('$') {
        Some(name) if !name.is_empty() && !name.contains('.') => Ok(name.to_string()),
        _ => Err(format!("expected a `$variable`, found `{word}`")),
    }
}

#[derive(Debug, PartialEq)]
enum Lexeme<'s> {
    Word(&'s str),
    Str(String),
    Open,
    Close,
}

type Lexemes<'s> = Peekable<std::vec::IntoIter<Lexeme<'s>>>;

fn lex(source: &str) -> Result<Vec<Lexeme<'_>>, String> {
    let mut lexemes = Vec::new();
    let mut rest = source.trim_start();
    while let Some(c) = rest.chars().next() {
        match c {
            '(' => {
                lexemes.push(Lexeme::Open);
                rest = &rest[1..];
            }
            ')' => {
                lexemes.push(Lexeme::Close);
                rest = &rest[1..];
            }
            '"' => {
                let (text, used) = quoted(rest)?;
                lexemes.push(Lexeme::Str(text));
                rest = &rest[used..];
            }
            '`' => {
                let end = rest[1..]
                    .find('`')
                    .ok_or_else(|| format!("unterminated raw string in `{source}`"))?;
                lexemes.push(Lexeme::Str(rest[1..=end].to_string()));
                rest = &rest[end + 2..];
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '`'))
                    .unwrap_or(rest.len());
                lexemes.push(Lexeme::Word(&rest[..end]));
                rest = &rest[end..];
            }
        }
        rest = rest.trim_start();
    }
    Ok(lexemes)
}

/// Decode the double-quoted literal at the start of `source`, returning it
/// and the number of bytes consumed.
fn quoted(source: &str) -> Result<(String, usize), String> {
    let mut text = String::new();
    let mut chars = source.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((text, i + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, c @ ('"' | '\\'))) => text.push(c),
                Some((_, other)) => return Err(format!("unknown escape \\{other} in string")),
                None => break,
            },
            _ => text.push(c),
        }
    }
    Err(format!("unterminated string in `{source}`"))
}

fn parse_expr(source: &str) -> Result<Expr, String> {
    let mut lexemes = lex(source)?.into_iter().peekable();
    let expr = command(&mut lexemes)?;
    match lexemes.next() {
        None => Ok(expr),
        Some(_) => Err(format!("unexpected `)` in `{source}`")),
    }
}

/// A function call or a single operand, up to a closing parenthesis.
fn command(lexemes: &mut Lexemes<'_>) -> Result<Expr, String> {
    if let Some(func) = lexemes.peek().and_then(|lexeme| match lexeme {
        Lexeme::Word(word) => Func::lookup(word),
        _ => None,
    }) {
        lexemes.next();
        let mut args = Vec::new();
        while !matches!(lexemes.peek(), None | Some(Lexeme::Close)) {
            args.push(operand(lexemes)?);
        }
        func.check_arity(args.len())?;
        return Ok(Expr::Call { func, args });
    }

    let first = operand(lexemes)?;
    if !matches!(lexemes.peek(), None | Some(Lexeme::Close)) {
        return Err(format!("`{first}` is not a function"));
    }
    Ok(first)
}

fn operand(lexemes: &mut Lexemes<'_>) -> Result<Expr, String> {
    match lexemes.next() {
        Some(Lexeme::Word(word)) => word_operand(word),
        Some(Lexeme::Str(text)) => Ok(Expr::Literal(Value::String(text))),
        Some(Lexeme::Open) => {
            let inner = command(lexemes)?;
            match lexemes.next() {
                Some(Lexeme::Close) => Ok(inner),
                _ => Err("missing `)`".to_string()),
            }
        }
        Some(Lexeme::Close) => Err("unexpected `)`".to_string()),
        None => Err("empty action".to_string()),
    }
}

fn word_operand(word: &str) -> Result<Expr, String> {
    match word {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        _ => {}
    }
    if word.starts_with('.') || word.starts_with('$') {
        return parse_path(word).map(Expr::Path);
    }
    let numeric = word.strip_prefix('-').unwrap_or(word);
    if numeric.starts_with(|c: char| c.is_ascii_digit()) {
        return parse_number(word).map(Expr::Literal);
    }
    if Func::lookup(word).is_some() {
        return Err(format!("function `{word}` needs parentheses here"));
    }
    Err(format!("unknown keyword or expression `{word}`"))
}

fn parse_number(word: &str) -> Result<Value, String> {
    if let Ok(n) = word.parse::<i64>() {
        return Ok(Value::from(n));
    }
    word.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("bad number `{word}`"))
}

fn parse_path(word: &str) -> Result<FieldPath, String> {
    if word == "." {
        return Ok(FieldPath {
            root: Root::Dot,
            fields: Vec::new(),
        });
    }
    let (root, path) = if let Some(path) = word.strip_prefix('.') {
        (Root::Dot, path)
    } else if let Some(var) = word.strip_prefix('$') {
        let (name, path) = var.split_once('.').unwrap_or((var, ""));
        if name.is_empty() {
            return Err(format!("bad variable `{word}`"));
        }
        (Root::Var(name.to_string()), path)
    } else {
        return Err(format!("unknown keyword or expression `{word}`"));
    };

    let fields: Vec<String> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').map(str::to_string).collect()
    };
    if fields.iter().any(String::is_empty) {
        return Err(format!("empty field name in `{word}`"));
    }
    Ok(FieldPath { root, fields })
}
