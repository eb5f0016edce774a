//! Reference resolution: turns a node's static `config` and its
//! `inputMapping` into engine input transforms.
//!
//! `$ref:node-id.output.field` → `results.node_id.field`
//! `$ref:flow_input.field`     → `flow_input.field`
//! anything else               → a static value
//!
//! Dot-notation keys (`body.campaignId`) are collapsed into a single object
//! construction expression for the root parameter.

use serde_json::{Map, Value};

use crate::wire::{InputTransform, InputTransforms};

/// Module identifiers on the engine cannot carry hyphens; node ids are
/// normalized the same way everywhere they are referenced.
pub fn normalize_id(id: &str) -> String {
    id.replace('-', "_")
}

/// Resolve config and mapping entries into input transforms. Mapping entries
/// override same-named config entries; insertion order is preserved through
/// dot-notation collapsing so generated expressions are stable.
pub fn build_input_transforms(
    config: &Map<String, Value>,
    input_mapping: &Map<String, Value>,
) -> InputTransforms {
    let mut entries: Vec<(String, InputTransform)> = Vec::new();

    for (key, value) in config {
        upsert(
            &mut entries,
            key.clone(),
            InputTransform::Static {
                value: value.clone(),
            },
        );
    }

    for (key, value) in input_mapping {
        let transform = match value.as_str().and_then(|s| s.strip_prefix("$ref:")) {
            Some(path) => InputTransform::Javascript {
                expr: resolve_ref(path),
            },
            None => InputTransform::Static {
                value: value.clone(),
            },
        };
        upsert(&mut entries, key.clone(), transform);
    }

    collapse_dot_notation(entries)
}

fn upsert(entries: &mut Vec<(String, InputTransform)>, key: String, transform: InputTransform) {
    if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = transform;
    } else {
        entries.push((key, transform));
    }
}

/// Compile a stripped `$ref:` path into an engine expression.
///
/// Paths of depth ≥ 2 past the node reference use optional chaining so a
/// missing intermediate object resolves to undefined instead of throwing.
fn resolve_ref(path: &str) -> String {
    if path == "flow_input" || path.starts_with("flow_input.") {
        return path.to_string();
    }

    let mut parts = path.split('.');
    let node_id = normalize_id(parts.next().unwrap_or(path));
    // "output" segments are an authoring convention, not part of the result path
    let rest: Vec<&str> = parts.filter(|p| *p != "output").collect();

    match rest.len() {
        0 => format!("results.{}", node_id),
        1 => format!("results.{}.{}", node_id, rest[0]),
        _ => {
            let mut expr = format!("results.{}.{}", node_id, rest[0]);
            for part in &rest[1..] {
                expr.push_str("?.");
                expr.push_str(part);
            }
            expr
        }
    }
}

fn to_expr(transform: &InputTransform) -> String {
    match transform {
        InputTransform::Javascript { expr } => expr.clone(),
        InputTransform::Static { value } => value.to_string(),
    }
}

fn safe_key(key: &str) -> String {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if valid {
        key.to_string()
    } else {
        Value::String(key.to_string()).to_string()
    }
}

/// Collapse dot-notation keys into one object-construction expression per
/// root. A key like `body.campaignId` names a `campaignId` field inside the
/// `body` parameter, never a parameter literally called "body.campaignId".
/// A static object already resolved for the root is spread first so dynamic
/// fields override and extend it.
fn collapse_dot_notation(entries: Vec<(String, InputTransform)>) -> InputTransforms {
    if !entries.iter().any(|(k, _)| k.contains('.')) {
        return entries.into_iter().collect();
    }

    let mut result = InputTransforms::new();
    let mut groups: Vec<(String, Vec<(String, InputTransform)>)> = Vec::new();

    for (key, transform) in entries {
        match key.split_once('.') {
            None => {
                result.insert(key, transform);
            }
            Some((root, path)) => {
                let path = path.to_string();
                if let Some((_, children)) = groups.iter_mut().find(|(r, _)| r == root) {
                    children.push((path, transform));
                } else {
                    groups.push((root.to_string(), vec![(path, transform)]));
                }
            }
        }
    }

    for (root, children) in groups {
        let base_obj: Option<Map<String, Value>> = result.get(&root).and_then(|t| match t {
            InputTransform::Static { value } => value.as_object().cloned(),
            _ => None,
        });

        // Direct fields (body.x) and one-deeper nested groups (body.x.y)
        let mut direct: Vec<(String, String)> = Vec::new();
        let mut nested: Vec<(String, Vec<(String, String)>)> = Vec::new();

        for (path, transform) in children {
            match path.split_once('.') {
                None => {
                    let expr = to_expr(&transform);
                    if let Some(slot) = direct.iter_mut().find(|(f, _)| *f == path) {
                        slot.1 = expr;
                    } else {
                        direct.push((path, expr));
                    }
                }
                Some((parent, child)) => {
                    let entry = (child.to_string(), to_expr(&transform));
                    if let Some((_, subs)) = nested.iter_mut().find(|(p, _)| p == parent) {
                        subs.push(entry);
                    } else {
                        nested.push((parent.to_string(), vec![entry]));
                    }
                }
            }
        }

        let mut parts: Vec<String> = Vec::new();

        if let Some(base) = &base_obj {
            parts.push(format!("...{}", Value::Object(base.clone())));
        }

        for (field, expr) in &direct {
            parts.push(format!("{}: {}", safe_key(field), expr));
        }

        for (parent, subs) in &nested {
            let parent_static = base_obj
                .as_ref()
                .and_then(|b| b.get(parent))
                .and_then(|v| v.as_object());
            let mut nested_parts: Vec<String> = Vec::new();
            if let Some(obj) = parent_static {
                nested_parts.push(format!("...{}", Value::Object(obj.clone())));
            }
            for (sub, expr) in subs {
                nested_parts.push(format!("{}: {}", safe_key(sub), expr));
            }
            parts.push(format!("{}: {{{}}}", safe_key(parent), nested_parts.join(", ")));
        }

        result.insert(
            root,
            InputTransform::Javascript {
                expr: format!("({{{}}})", parts.join(", ")),
            },
        );
    }

    result
}
