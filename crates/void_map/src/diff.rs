//! Property map diffing

use serde_json::Value;

use crate::descriptor::PropertyMap;

static NULL: Value = Value::Null;

/// One property call needed to move from the applied map to the desired one
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    /// New or changed value
    Set(String, Value),
    /// Key dropped from the desired map; sent to the engine as null
    Reset(String),
}

impl PropertyChange {
    pub fn key(&self) -> &str {
        match self {
            PropertyChange::Set(key, _) | PropertyChange::Reset(key) => key,
        }
    }

    /// Value to send to the engine
    pub fn value(&self) -> &Value {
        match self {
            PropertyChange::Set(_, value) => value,
            PropertyChange::Reset(_) => &NULL,
        }
    }

    /// Record a successful change in the applied map
    pub fn apply_to(&self, applied: &mut PropertyMap) {
        match self {
            PropertyChange::Set(key, value) => {
                applied.insert(key.clone(), value.clone());
            }
            PropertyChange::Reset(key) => {
                applied.remove(key);
            }
        }
    }
}

/// Changes needed to go from `applied` to `desired`, in key order
///
/// Unchanged keys produce nothing. Dropped keys produce a reset only when
/// `reset_removed` is set.
pub fn diff_properties(
    applied: &PropertyMap,
    desired: &PropertyMap,
    reset_removed: bool,
) -> Vec<PropertyChange> {
    let mut changes: Vec<PropertyChange> = desired
        .iter()
        .filter(|(key, value)| applied.get(*key) != Some(*value))
        .map(|(key, value)| PropertyChange::Set(key.clone(), value.clone()))
        .collect();

    if reset_removed {
        changes.extend(
            applied
                .keys()
                .filter(|key| !desired.contains_key(*key))
                .map(|key| PropertyChange::Reset(key.clone())),
        );
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> PropertyMap {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => PropertyMap::new(),
        }
    }

    #[test]
    fn test_only_changed_keys() {
        let applied = props(json!({"line-color": "red", "line-width": 2}));
        let desired = props(json!({"line-color": "blue", "line-width": 2}));

        assert_eq!(
            diff_properties(&applied, &desired, true),
            vec![PropertyChange::Set("line-color".to_string(), json!("blue"))]
        );
    }

    #[test]
    fn test_removed_keys() {
        let applied = props(json!({"line-color": "red", "line-blur": 1}));
        let desired = props(json!({"line-color": "red"}));

        let changes = diff_properties(&applied, &desired, true);
        assert_eq!(changes, vec![PropertyChange::Reset("line-blur".to_string())]);
        assert_eq!(changes[0].value(), &Value::Null);

        assert!(diff_properties(&applied, &desired, false).is_empty());
    }

    #[test]
    fn test_apply_to() {
        let mut applied = props(json!({"a": 1, "b": 2}));
        PropertyChange::Set("a".to_string(), json!(5)).apply_to(&mut applied);
        PropertyChange::Reset("b".to_string()).apply_to(&mut applied);

        assert_eq!(applied, props(json!({"a": 5})));
    }
}
