//! Action descriptor parsing.
//!
//! ```yaml
//! actions:
//!   increment:
//!     type: setState
//!     path: count
//!     value: "{{ state.next }}"
//!     then: [notify]
//!   notify:
//!     type: sendMessage
//!     message: refresh
//!     payload: { count: "{{ state.count }}" }
//!   both: [increment, notify]        # bare list == sequence
//! ```

use std::collections::BTreeMap;

use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};

use super::Context;
use crate::action::{ActionNode, ActionRef, Branch};

pub(super) fn parse_actions(ctx: &mut Context, map: &Mapping) -> BTreeMap<String, ActionNode> {
    let mut out = BTreeMap::new();
    for (name, descriptor) in map {
        let Some(name) = name.as_str().filter(|n| !n.is_empty()) else {
            ctx.error("actions", "action names must be non-empty strings");
            continue;
        };
        let path = format!("actions.{name}");
        if let Some(action) = parse_action(ctx, descriptor, &path) {
            out.insert(name.to_owned(), action);
        }
    }
    out
}

fn parse_action(ctx: &mut Context, value: &Yaml, path: &str) -> Option<ActionNode> {
    let map = match value {
        Yaml::Mapping(map) => map,
        Yaml::Sequence(items) => {
            return Some(ActionNode::Sequence {
                steps: parse_refs(ctx, items, path),
            });
        },
        _ => {
            ctx.error(path, "action must be a mapping or a list of steps");
            return None;
        },
    };

    let Some(kind) = map.get("type").and_then(Yaml::as_str) else {
        ctx.error(format!("{path}.type"), "missing action type");
        return None;
    };

    let action = match kind {
        "setState" | "state" | "update" => {
            let target = string_field(ctx, map, &["path", "key"], path)?;
            let value = json_field(ctx, map, "value", path).unwrap_or(Value::Null);
            ActionNode::StateUpdate {
                path: target,
                value,
            }
        },
        "sendMessage" | "message" | "dispatch" => {
            let message_type = string_field(ctx, map, &["message", "messageType"], path)?;
            let payload = json_field(ctx, map, "payload", path).unwrap_or(Value::Null);
            ActionNode::MessageDispatch {
                message_type,
                payload,
            }
        },
        "conditional" | "branch" | "if" => ActionNode::ConditionalBranch {
            branches: parse_branches(ctx, map, path),
        },
        "requestAI" | "request" | "ai" => {
            let prompt = string_field(ctx, map, &["prompt"], path)?;
            let context = json_field(ctx, map, "context", path).unwrap_or(Value::Null);
            let store_as = map
                .get("storeAs")
                .and_then(Yaml::as_str)
                .map(str::to_owned);
            let on_success = list_field(ctx, map, "onSuccess", path);
            ActionNode::ExternalRequest {
                prompt,
                context,
                store_as,
                on_success,
            }
        },
        "sequence" => ActionNode::Sequence {
            steps: list_field(ctx, map, "steps", path),
        },
        other => {
            ctx.error(format!("{path}.type"), format!("unknown action type '{other}'"));
            return None;
        },
    };

    // `then` turns any action into the first step of a sequence.
    let then = list_field(ctx, map, "then", path);
    if then.is_empty() {
        return Some(action);
    }
    let mut steps = Vec::with_capacity(then.len().saturating_add(1));
    steps.push(ActionRef::Inline(Box::new(action)));
    steps.extend(then);
    Some(ActionNode::Sequence { steps })
}

fn parse_branches(ctx: &mut Context, map: &Mapping, path: &str) -> Vec<Branch> {
    let mut branches = Vec::new();
    let Some(items) = map.get("branches") else {
        ctx.error(format!("{path}.branches"), "conditional action needs branches");
        return branches;
    };
    let Yaml::Sequence(items) = items else {
        ctx.error(format!("{path}.branches"), "must be a sequence");
        return branches;
    };

    for (i, item) in items.iter().enumerate() {
        let branch_path = format!("{path}.branches[{i}]");
        let when = match item.get("when") {
            Some(Yaml::String(s)) => s.clone(),
            Some(Yaml::Bool(b)) => b.to_string(),
            _ => {
                ctx.error(&branch_path, "branch needs a `when` expression");
                continue;
            },
        };
        let Some(action) = item
            .get("action")
            .and_then(|a| parse_ref(ctx, a, &format!("{branch_path}.action")))
        else {
            ctx.error(&branch_path, "branch needs an `action`");
            continue;
        };
        branches.push(Branch { when, action });
    }
    branches
}

fn parse_ref(ctx: &mut Context, value: &Yaml, path: &str) -> Option<ActionRef> {
    match value {
        Yaml::String(name) if !name.is_empty() => Some(ActionRef::Named(name.clone())),
        Yaml::Mapping(_) | Yaml::Sequence(_) => {
            parse_action(ctx, value, path).map(|a| ActionRef::Inline(Box::new(a)))
        },
        _ => {
            ctx.error(path, "expected an action name or an inline action");
            None
        },
    }
}

fn parse_refs(ctx: &mut Context, items: &[Yaml], path: &str) -> Vec<ActionRef> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| parse_ref(ctx, item, &format!("{path}[{i}]")))
        .collect()
}

fn list_field(ctx: &mut Context, map: &Mapping, key: &str, path: &str) -> Vec<ActionRef> {
    match map.get(key) {
        None | Some(Yaml::Null) => Vec::new(),
        Some(Yaml::Sequence(items)) => parse_refs(ctx, items, &format!("{path}.{key}")),
        Some(single) => parse_ref(ctx, single, &format!("{path}.{key}"))
            .into_iter()
            .collect(),
    }
}

fn string_field(ctx: &mut Context, map: &Mapping, keys: &[&str], path: &str) -> Option<String> {
    let found = keys.iter().find_map(|k| map.get(*k).map(|v| (*k, v)));
    match found {
        Some((_, Yaml::String(s))) if !s.trim().is_empty() => Some(s.clone()),
        Some((key, _)) => {
            ctx.error(format!("{path}.{key}"), "must be a non-empty string");
            None
        },
        None => {
            let key = keys.first().copied().unwrap_or_default();
            ctx.error(format!("{path}.{key}"), format!("missing required `{key}`"));
            None
        },
    }
}

fn json_field(ctx: &mut Context, map: &Mapping, key: &str, path: &str) -> Option<Value> {
    map.get(key)
        .and_then(|v| ctx.to_json(v, &format!("{path}.{key}")))
}
