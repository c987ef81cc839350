//! Per-entity store of replicated properties

use crate::value::{FromProp, PropValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named replicated fields of one entity.
///
/// Keys are kept sorted so snapshots and change passes walk properties in a
/// stable order on every peer. The store itself does no authority checks;
/// writes go through [`crate::world::World`], which does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyStore {
    values: BTreeMap<String, PropValue>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used when spawning an entity with its initial values.
    pub fn with(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.values.get(name)
    }

    pub fn read<T: FromProp>(&self, name: &str) -> Option<T> {
        self.values.get(name).and_then(T::from_prop)
    }

    /// Overwrites a value. Returns true when the stored value actually changed.
    pub(crate) fn write(&mut self, name: &str, value: PropValue) -> bool {
        match self.values.get_mut(name) {
            Some(current) if *current == value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.values.insert(name.to_string(), value);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::props;

    #[test]
    fn test_builder_and_typed_read() {
        let store = PropertyStore::new()
            .with(props::SCORE, 4i64)
            .with(props::NAME, "ada");

        assert_eq!(store.len(), 2);
        assert_eq!(store.read::<i64>(props::SCORE), Some(4));
        assert_eq!(store.read::<String>(props::NAME), Some("ada".to_string()));
        assert_eq!(store.read::<bool>(props::SCORE), None);
        assert_eq!(store.read::<i64>(props::EXPLODED), None);
    }

    #[test]
    fn test_write_reports_change() {
        let mut store = PropertyStore::new().with(props::SCORE, 1i64);

        assert!(!store.write(props::SCORE, PropValue::Int(1)));
        assert!(store.write(props::SCORE, PropValue::Int(2)));
        assert!(store.write(props::ATTACKING, PropValue::Bool(true)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_iteration_is_sorted() {
        let store = PropertyStore::new()
            .with("b", 1i64)
            .with("c", 2i64)
            .with("a", 3i64);
        let names: Vec<&str> = store.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
