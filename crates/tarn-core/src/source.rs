//! Source properties and extract policies handed to connectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Connector-specific key/value bag, ordered so structural comparison and
/// serialization are stable.
pub type SourceProperties = BTreeMap<String, serde_json::Value>;

/// Read a string property.
pub fn prop_str<'a>(props: &'a SourceProperties, key: &str) -> Option<&'a str> {
    props.get(key).and_then(|v| v.as_str())
}

/// Read a boolean property, accepting `true`/`"true"`.
pub fn prop_bool(props: &SourceProperties, key: &str) -> Option<bool> {
    match props.get(key)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

/// Read an unsigned property, accepting numbers or numeric strings.
pub fn prop_u64(props: &SourceProperties, key: &str) -> Option<u64> {
    match props.get(key)? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Unspecified,
    Head,
    Tail,
}

/// Limits applied while extracting data from a source.
///
/// The rows part trims textual row data to a byte budget on line
/// boundaries. The files part keeps only the first or last N matched files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExtractPolicy {
    #[serde(default)]
    pub rows_strategy: Strategy,
    #[serde(default)]
    pub rows_limit_bytes: u64,
    #[serde(default)]
    pub files_strategy: Strategy,
    #[serde(default)]
    pub files_limit: u64,
}

impl ExtractPolicy {
    pub fn rows(&self) -> Option<(Strategy, u64)> {
        match self.rows_strategy {
            Strategy::Unspecified => None,
            s if self.rows_limit_bytes > 0 => Some((s, self.rows_limit_bytes)),
            _ => None,
        }
    }

    pub fn files(&self) -> Option<(Strategy, u64)> {
        match self.files_strategy {
            Strategy::Unspecified => None,
            s if self.files_limit > 0 => Some((s, self.files_limit)),
            _ => None,
        }
    }

    /// Keep the first or last `limit` items according to the files policy.
    pub fn select_files<T>(&self, mut items: Vec<T>) -> Vec<T> {
        match self.files() {
            Some((Strategy::Head, n)) => {
                items.truncate(n as usize);
                items
            }
            Some((Strategy::Tail, n)) => {
                let skip = items.len().saturating_sub(n as usize);
                items.split_off(skip)
            }
            _ => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_accessors() {
        let mut props = SourceProperties::new();
        props.insert("path".into(), json!("data/*.csv"));
        props.insert("flag".into(), json!("TRUE"));
        props.insert("n".into(), json!("42"));
        assert_eq!(prop_str(&props, "path"), Some("data/*.csv"));
        assert_eq!(prop_bool(&props, "flag"), Some(true));
        assert_eq!(prop_u64(&props, "n"), Some(42));
        assert_eq!(prop_str(&props, "missing"), None);
    }

    #[test]
    fn files_policy_selects_head_and_tail() {
        let head = ExtractPolicy {
            files_strategy: Strategy::Head,
            files_limit: 2,
            ..Default::default()
        };
        assert_eq!(head.select_files(vec![1, 2, 3, 4]), vec![1, 2]);

        let tail = ExtractPolicy {
            files_strategy: Strategy::Tail,
            files_limit: 3,
            ..Default::default()
        };
        assert_eq!(tail.select_files(vec![1, 2, 3, 4]), vec![2, 3, 4]);
        assert_eq!(tail.select_files(vec![1]), vec![1]);

        assert_eq!(ExtractPolicy::default().select_files(vec![1, 2]), vec![1, 2]);
    }

    #[test]
    fn zero_limit_disables_policy() {
        let p = ExtractPolicy {
            rows_strategy: Strategy::Head,
            rows_limit_bytes: 0,
            ..Default::default()
        };
        assert!(p.rows().is_none());
    }
}
