//! `{{ ... }}` interpolation and truthy conditions.
//!
//! The expression language is deliberately tiny: a token is a dotted path
//! rooted at a named scope entry (`state.user.name`, `response.text`),
//! optionally negated with `!` in conditions, or a boolean literal.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ExprError;
use crate::state::lookup;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("invalid regex"));

static PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*(\.[A-Za-z0-9_\-]+)*$").expect("invalid regex")
});

/// Named values visible to expressions.
///
/// The builder exposes `state`; the action runner additionally exposes
/// `response` while handling the reply to an external request.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    state: &'a Value,
    response: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    /// Scope exposing only `state`.
    #[must_use]
    pub fn new(state: &'a Value) -> Self {
        Self {
            state,
            response: None,
        }
    }

    /// Also expose `response`.
    #[must_use]
    pub fn with_response(mut self, response: &'a Value) -> Self {
        self.response = Some(response);
        self
    }

    /// Resolve a well-formed dotted path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&'a Value> {
        let (root, rest) = path.split_once('.').unwrap_or((path, ""));
        let base = match root {
            "state" => self.state,
            "response" => self.response?,
            _ => return None,
        };
        lookup(base, rest)
    }
}

/// Result of interpolating a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    /// The interpolated value.
    pub value: Value,
    /// Well-formed paths that did not resolve, in first-seen order, deduplicated.
    pub missing: Vec<String>,
    /// Token bodies that are not valid expressions, in first-seen order.
    pub invalid: Vec<String>,
}

impl Interpolation {
    fn unchanged(value: Value) -> Self {
        Self {
            value,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    fn note_missing(&mut self, path: &str) {
        if !self.missing.iter().any(|p| p == path) {
            self.missing.push(path.to_owned());
        }
    }

    fn note_invalid(&mut self, body: &str) {
        if !self.invalid.iter().any(|p| p == body) {
            self.invalid.push(body.to_owned());
        }
    }

    fn absorb(&mut self, other: Interpolation) -> Value {
        for path in &other.missing {
            self.note_missing(path);
        }
        for body in &other.invalid {
            self.note_invalid(body);
        }
        other.value
    }
}

/// Interpolate every `{{ path }}` token inside `value`, recursing into arrays
/// and objects.
///
/// A string that consists of exactly one token is replaced by the resolved
/// value itself, keeping its JSON type. Tokens that do not resolve are left
/// verbatim and reported in [`Interpolation::missing`] or
/// [`Interpolation::invalid`].
#[must_use]
pub fn interpolate(value: &Value, scope: &Scope<'_>) -> Interpolation {
    match value {
        Value::String(text) => interpolate_str(text, scope),
        Value::Array(items) => {
            let mut out = Interpolation::unchanged(Value::Null);
            let items: Vec<Value> = items
                .iter()
                .map(|item| {
                    let inner = interpolate(item, scope);
                    out.absorb(inner)
                })
                .collect();
            out.value = Value::Array(items);
            out
        },
        Value::Object(map) => {
            let mut out = Interpolation::unchanged(Value::Null);
            let mut result = Map::with_capacity(map.len());
            for (key, item) in map {
                let inner = interpolate(item, scope);
                result.insert(key.clone(), out.absorb(inner));
            }
            out.value = Value::Object(result);
            out
        },
        other => Interpolation::unchanged(other.clone()),
    }
}

fn interpolate_str(text: &str, scope: &Scope<'_>) -> Interpolation {
    let mut out = Interpolation::unchanged(Value::Null);

    // A lone token keeps the resolved value's type.
    // Surrounding whitespace makes it a string splice instead.
    if let Some(caps) = TOKEN.captures(text)
        && caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == text.len())
    {
        let body = caps.get(1).map_or("", |m| m.as_str());
        if !PATH.is_match(body) {
            out.note_invalid(body);
            out.value = Value::String(text.to_owned());
        } else if let Some(resolved) = scope.resolve(body) {
            out.value = resolved.clone();
        } else {
            out.note_missing(body);
            out.value = Value::String(text.to_owned());
        }
        return out;
    }

    let mut missing = Vec::new();
    let mut invalid = Vec::new();
    let replaced = TOKEN.replace_all(text, |caps: &regex::Captures<'_>| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let body = caps.get(1).map_or("", |m| m.as_str());
        if !PATH.is_match(body) {
            invalid.push(body.to_owned());
            return whole.to_owned();
        }
        match scope.resolve(body) {
            Some(resolved) => display(resolved),
            None => {
                missing.push(body.to_owned());
                whole.to_owned()
            },
        }
    });

    for path in &missing {
        out.note_missing(path);
    }
    for body in &invalid {
        out.note_invalid(body);
    }
    out.value = Value::String(replaced.into_owned());
    out
}

/// Text form of a value when spliced into a larger string.
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JavaScript-style truthiness.
///
/// `null`, `false`, `0`, and `""` are falsy; everything else, including empty
/// arrays and objects, is truthy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluate a condition expression.
///
/// Accepted forms: `{{ state.flag }}`, `state.flag`, `!state.flag`,
/// `{{ !state.flag }}`, `true`, `false`. A well-formed path that does not
/// resolve is falsy.
///
/// # Errors
///
/// Returns [`ExprError::Syntax`] for anything else; callers decide how to
/// treat an expression they cannot read.
pub fn evaluate_condition(expr: &str, scope: &Scope<'_>) -> Result<bool, ExprError> {
    let trimmed = expr.trim();
    let body = match trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        Some(inner) => inner.trim(),
        None => trimmed,
    };

    let (negated, body) = match body.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, body),
    };

    let value = match body {
        "true" => true,
        "false" => false,
        path if PATH.is_match(path) => scope.resolve(path).is_some_and(is_truthy),
        _ => return Err(ExprError::Syntax(expr.to_owned())),
    };

    Ok(value != negated)
}
