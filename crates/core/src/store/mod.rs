//! Remote Store Access
//!
//! The session protocol depends on nothing beyond the operations of
//! [`RemoteStore`]. Backends:
//!
//! - `memory`: an in-process JSON tree, used by tests and for embedding.
//! - `firebase`: the Realtime Database REST API.
//!
//! [`SessionStore`] layers the persisted layout (profiles, connection records,
//! channels) on top of the raw path operations.

mod firebase;
mod layout;
mod memory;

pub use firebase::FirebaseStore;
pub use layout::SessionStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

/// A slash-separated location in the store, built one segment at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.as_ref().to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Minimal capability surface required from the shared store.
///
/// Each operation is atomic for the path it touches; nothing is transactional
/// across paths.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Point read. Absent and `null` values both read as `None`.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Point write, replacing whatever was at `path`.
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Field write: merges `fields` into the object at `path`.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Atomically writes `new` only if the current value equals `expected`.
    ///
    /// Returns `false`, without writing, when the value differs.
    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError>;

    /// Children of `path` whose key is `>= start_key`, ascending by key.
    ///
    /// Keys compare as strings, so numeric keys must be fixed-width for key
    /// order to match numeric order.
    async fn query_ordered(&self, path: &StorePath, start_key: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Recursive delete. Deleting an absent path succeeds.
    async fn delete(&self, path: &StorePath) -> Result<(), StoreError>;
}

/// Keeps the children at or after `start_key`, in key order.
pub(crate) fn children_from(children: Map<String, Value>, start_key: &str) -> Vec<(String, Value)> {
    let mut rows: Vec<(String, Value)> = children
        .into_iter()
        .filter(|(key, _)| key.as_str() >= start_key)
        .collect();
    rows.sort_by(|(a, _), (b, _)| a.cmp(b));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_path_display() {
        let path = StorePath::root().child("chats").child("A").child("B");
        assert_eq!(path.to_string(), "chats/A/B");
        assert_eq!(StorePath::root().to_string(), "");
    }

    #[test]
    fn test_children_from_filters_and_orders_by_key() {
        let Value::Object(children) = json!({"003": 3, "001": 1, "002": 2}) else {
            unreachable!()
        };
        let rows = children_from(children, "002");
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["002", "003"]);
    }
}
