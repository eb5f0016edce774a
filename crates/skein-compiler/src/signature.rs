//! Deterministic DAG identity.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use skein_core::{Dag, Result};

/// SHA-256 over the canonical JSON form of a DAG.
///
/// Object keys sort recursively so that key order never affects the hash.
/// Array order is preserved: node and edge order are meaningful.
pub fn dag_signature(dag: &Dag) -> Result<String> {
    let canonical = canonicalize(&serde_json::to_value(dag)?);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_core::{DagEdge, DagNode};

    fn linear_dag() -> Dag {
        Dag::new(
            vec![
                DagNode::new("fetch", "http.call").with_config("url", json!("https://x.test")),
                DagNode::new("send", "email.send"),
            ],
            vec![DagEdge::new("fetch", "send")],
        )
    }

    #[test]
    fn signature_is_sha256_hex() {
        let sig = dag_signature(&linear_dag()).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_dag_same_signature() {
        let a = dag_signature(&linear_dag()).unwrap();
        let b = dag_signature(&linear_dag()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nested_config_key_order_does_not_matter() {
        let mut first = DagNode::new("a", "http.call");
        first = first
            .with_config("body", json!({"z": 1, "a": 2}))
            .with_config("url", json!("https://x.test"));
        let mut second = DagNode::new("a", "http.call");
        second = second
            .with_config("url", json!("https://x.test"))
            .with_config("body", json!({"a": 2, "z": 1}));

        let sig_a = dag_signature(&Dag::new(vec![first], vec![])).unwrap();
        let sig_b = dag_signature(&Dag::new(vec![second], vec![])).unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn config_change_changes_signature() {
        let a = Dag::new(
            vec![DagNode::new("a", "http.call").with_config("path", json!("/v1"))],
            vec![],
        );
        let b = Dag::new(
            vec![DagNode::new("a", "http.call").with_config("path", json!("/v2"))],
            vec![],
        );
        assert_ne!(
            dag_signature(&a).unwrap(),
            dag_signature(&b).unwrap()
        );
    }

    #[test]
    fn node_order_changes_signature() {
        let a = Dag::new(
            vec![DagNode::new("a", "x.op"), DagNode::new("b", "y.op")],
            vec![],
        );
        let b = Dag::new(
            vec![DagNode::new("b", "y.op"), DagNode::new("a", "x.op")],
            vec![],
        );
        assert_ne!(
            dag_signature(&a).unwrap(),
            dag_signature(&b).unwrap()
        );
    }

    #[test]
    fn on_error_changes_signature() {
        let plain = linear_dag();
        let with_handler = linear_dag().with_on_error("send");
        assert_ne!(
            dag_signature(&plain).unwrap(),
            dag_signature(&with_handler).unwrap()
        );
    }
}
