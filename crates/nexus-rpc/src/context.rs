//! Per-call context assembled by middleware

use crate::error::{RpcError, RpcResult};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// String-keyed map of typed entries produced by a procedure's middleware.
///
/// Each middleware returns a partial context; the engine merges them in declaration order,
/// so a later middleware overwrites an earlier one's entry with the same key. Entries are
/// reference-counted, so cloning a context is cheap.
///
/// ```rust,ignore
/// let ctx = Context::new().with("user", User { id: 1 });
/// let user: &User = ctx.require("user")?;
/// ```
#[derive(Clone, Default)]
pub struct Context {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning the context.
    #[must_use = "This method returns a new Context and does not modify self"]
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace an entry.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Typed lookup. `None` if the key is absent or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries
            .get(key)
            .and_then(|entry| entry.downcast_ref::<T>())
    }

    /// Typed lookup that fails the call when the entry is missing.
    pub fn require<T: Any>(&self, key: &str) -> RpcResult<&T> {
        self.get(key).ok_or_else(|| {
            RpcError::internal(format!(
                "Context entry '{}' of type {} is missing",
                key,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shallow merge; entries of `other` win.
    pub fn merge(&mut self, other: Context) {
        self.entries.extend(other.entries);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}
