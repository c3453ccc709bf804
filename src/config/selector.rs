//! Nested selector trees and their flattening into one CSS selector list.
//!
//! A tree like `{".page .contents": ["h1", {".tip": ["p"]}]}` resolves to
//! `".page .contents h1, .page .contents .tip p"`.

use super::{ConfigurationError, FieldPath};
use serde_yaml::Value;

/// Separator placed between resolved leaf paths.
pub const DEFAULT_SEPARATOR: &str = ", ";

/// A selector description: a leaf tag/class string, or parent keys each owning nested trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorTree {
    Leaf(String),
    /// Entries keep their document order; keys are unique per level.
    Node(Vec<(String, Vec<SelectorTree>)>),
}

/// Flatten a tree into a comma-separated selector list.
pub fn resolve(tree: &SelectorTree) -> String {
    resolve_with(tree, DEFAULT_SEPARATOR)
}

/// Flatten a tree, joining leaf paths with `separator`.
pub fn resolve_with(tree: &SelectorTree, separator: &str) -> String {
    descend(tree, "", separator).trim().to_string()
}

fn descend(tree: &SelectorTree, prefix: &str, separator: &str) -> String {
    match tree {
        SelectorTree::Leaf(leaf) => format!("{} {}", prefix, leaf).trim().to_string(),
        SelectorTree::Node(entries) if entries.is_empty() => prefix.trim().to_string(),
        SelectorTree::Node(entries) => entries
            .iter()
            .map(|(class_name, children)| {
                let nested = format!("{} {}", prefix, class_name);
                if children.is_empty() {
                    return nested.trim().to_string();
                }
                children
                    .iter()
                    .map(|child| descend(child, &nested, separator))
                    .collect::<Vec<_>>()
                    .join(separator)
            })
            .collect::<Vec<_>>()
            .join(separator),
    }
}

impl SelectorTree {
    /// Build a tree from a parsed YAML value. `path` locates the value for error messages.
    pub(crate) fn from_yaml(value: &Value, path: &FieldPath) -> Result<Self, ConfigurationError> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Ok(SelectorTree::Leaf(s.trim().to_string())),
            Value::String(_) => Err(ConfigurationError::invalid(path, "selector must not be empty")),
            Value::Mapping(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, children) in map {
                    let key = match key {
                        Value::String(k) if !k.trim().is_empty() => k.trim().to_string(),
                        _ => {
                            return Err(ConfigurationError::invalid(
                                path,
                                "selector keys must be non-empty strings",
                            ))
                        }
                    };
                    let child_path = path.key(&key);
                    let list = children.as_sequence().ok_or_else(|| {
                        ConfigurationError::invalid(
                            &child_path,
                            "nested selectors must be a list",
                        )
                    })?;
                    let nested = list
                        .iter()
                        .enumerate()
                        .map(|(i, child)| SelectorTree::from_yaml(child, &child_path.index(i)))
                        .collect::<Result<Vec<_>, _>>()?;
                    entries.push((key, nested));
                }
                Ok(SelectorTree::Node(entries))
            }
            _ => Err(ConfigurationError::invalid(
                path,
                "selector must be a string or a mapping of nested selectors",
            )),
        }
    }
}
