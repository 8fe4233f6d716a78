//! Structural validation and node-level diff of workflow definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TemplateError, TemplateResult};

/// Node-count diff between two definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    /// True whenever any node was removed. Heuristic only.
    pub breaking: bool,
}

impl TemplateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// A definition must carry a `nodes` array and a `connections` object.
pub fn validate_definition(definition: &Value) -> TemplateResult<()> {
    let Some(obj) = definition.as_object() else {
        return Err(TemplateError::InvalidDefinition(
            "definition must be a JSON object".into(),
        ));
    };
    match obj.get("nodes") {
        Some(Value::Array(_)) => {}
        Some(_) => return Err(TemplateError::InvalidDefinition("'nodes' must be an array".into())),
        None => return Err(TemplateError::InvalidDefinition("missing 'nodes'".into())),
    }
    match obj.get("connections") {
        Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(TemplateError::InvalidDefinition(
            "'connections' must be an object".into(),
        )),
        None => Err(TemplateError::InvalidDefinition("missing 'connections'".into())),
    }
}

/// Index nodes by `name`. Unnamed nodes fall back to their position.
fn nodes_by_name(definition: &Value) -> BTreeMap<String, &Value> {
    definition
        .get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .enumerate()
                .map(|(i, node)| {
                    let name = node
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("#{i}"));
                    (name, node)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Diff `from` against `to`.
pub fn compare_definitions(from: &Value, to: &Value) -> TemplateDiff {
    let old = nodes_by_name(from);
    let new = nodes_by_name(to);

    let mut diff = TemplateDiff::default();
    for (name, node) in &new {
        match old.get(name) {
            None => diff.added.push(name.clone()),
            Some(prev) if prev != node => diff.modified.push(name.clone()),
            Some(_) => {}
        }
    }
    diff.removed = old
        .keys()
        .filter(|name| !new.contains_key(*name))
        .cloned()
        .collect();
    diff.breaking = !diff.removed.is_empty();
    diff
}
