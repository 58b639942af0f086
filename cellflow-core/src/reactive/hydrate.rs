//! Hydration hooks backed by a key/value store.
//!
//! [`AtomOptions::persist`] wires an atom's `load` and `save` hooks to a
//! [`HydrationStore`]. Values are stored as `serde_json::Value`, so any
//! serde-serializable state can be persisted.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::atom::AtomOptions;

/// A key/value store consulted when atoms are created and written after
/// every state change.
pub trait HydrationStore {
    /// The stored value for `key`, if any.
    fn load(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key`.
    fn save(&self, key: &str, value: Value);
}

/// An in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<HashMap<String, Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `values`.
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let store = Self::new();
        store
            .values
            .borrow_mut()
            .extend(values.into_iter().map(|(key, value)| (key.into(), value)));
        store
    }

    /// The raw stored value for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

impl HydrationStore for MemoryStore {
    fn load(&self, key: &str) -> Option<Value> {
        self.get(key)
    }

    fn save(&self, key: &str, value: Value) {
        self.values.borrow_mut().insert(key.to_owned(), value);
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").field("len", &self.len()).finish()
    }
}

impl<T> AtomOptions<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Load the initial state from `store` and save every change back to it.
    ///
    /// Values that fail to deserialize are ignored and logged.
    pub fn persist(self, key: impl Into<String>, store: Rc<dyn HydrationStore>) -> Self {
        let key: Rc<str> = Rc::from(key.into());
        let (load_key, load_store) = (Rc::clone(&key), Rc::clone(&store));

        self.name(key.to_string())
            .load(move || {
                let value = load_store.load(&load_key)?;
                match serde_json::from_value(value) {
                    Ok(state) => Some(state),
                    Err(error) => {
                        tracing::warn!(key = %load_key, %error, "ignoring stored value");
                        None
                    }
                }
            })
            .save(move |state: &T| match serde_json::to_value(state) {
                Ok(value) => store.save(&key, value),
                Err(error) => tracing::warn!(key = %key, %error, "failed to serialize state"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Atom;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        size: u32,
    }

    #[test]
    fn persisted_atoms_load_and_save() {
        let store = MemoryStore::with_values([("settings", json!({ "theme": "dark", "size": 12 }))]);
        let settings = Atom::with_options(
            Settings {
                theme: "light".into(),
                size: 10,
            },
            AtomOptions::new().persist("settings", Rc::new(store.clone())),
        );

        assert_eq!(settings.peek().theme, "dark");
        assert_eq!(settings.name(), Some("settings"));

        settings.update(|s| Settings { size: 14, ..s.clone() });
        assert_eq!(store.get("settings"), Some(json!({ "theme": "dark", "size": 14 })));
    }

    #[test]
    fn malformed_values_fall_back_to_initial_state() {
        let store = MemoryStore::with_values([("count", json!("not a number"))]);
        let count = Atom::with_options(3_u32, AtomOptions::new().persist("count", Rc::new(store)));
        assert_eq!(count.peek(), 3);
    }
}
