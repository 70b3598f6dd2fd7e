//! In-process store backed by a single JSON tree.

use super::{RemoteStore, StorePath, children_from};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard};

/// A [`RemoteStore`] kept entirely in memory.
///
/// Mirrors the hosted store's data semantics: writing `null` deletes, and
/// parents left empty by a delete disappear with it.
#[derive(Debug)]
pub struct MemoryStore {
    root: Mutex<Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
        }
    }

    /// A copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        match self.root.lock() {
            Ok(root) => root.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>, StoreError> {
        self.root
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

fn lookup<'a>(node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(node, |current, segment| current.get(segment))
}

fn is_empty(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

fn present(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !is_empty(v)).cloned()
}

/// Walks to `segments`, turning anything in the way into an object.
fn slot<'a>(node: &'a mut Value, segments: &[String]) -> &'a mut Value {
    segments.iter().fold(node, |current, segment| {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        match current {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            _ => unreachable!("non-object replaced above"),
        }
    })
}

fn remove(node: &mut Value, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    if let Value::Object(map) = node {
        if rest.is_empty() {
            map.remove(first);
        } else if let Some(child) = map.get_mut(first) {
            remove(child, rest);
            if is_empty(child) {
                map.remove(first);
            }
        }
    }
}

fn write(root: &mut Value, segments: &[String], value: Value) {
    if is_empty(&value) {
        remove(root, segments);
    } else {
        *slot(root, segments) = value;
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let root = self.lock()?;
        Ok(present(lookup(&root, path.segments())))
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let mut root = self.lock()?;
        write(&mut root, path.segments(), value);
        Ok(())
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut root = self.lock()?;
        let target = slot(&mut root, path.segments());
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        if let Value::Object(map) = target {
            for (key, value) in fields {
                if value.is_null() {
                    map.remove(&key);
                } else {
                    map.insert(key, value);
                }
            }
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        let mut root = self.lock()?;
        let current = present(lookup(&root, path.segments()));
        if current.as_ref() != expected {
            return Ok(false);
        }
        write(&mut root, path.segments(), new);
        Ok(true)
    }

    async fn query_ordered(&self, path: &StorePath, start_key: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let root = self.lock()?;
        Ok(match lookup(&root, path.segments()) {
            Some(Value::Object(children)) => children_from(children.clone(), start_key),
            _ => Vec::new(),
        })
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        let mut root = self.lock()?;
        remove(&mut root, path.segments());
        Ok(())
    }
}
