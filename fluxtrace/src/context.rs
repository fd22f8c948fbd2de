// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The ambient context carried by a subscription.
//!
//! A [`Context`] is an immutable snapshot keyed by type. Deriving a context with [`Context::with`]
//! never touches the original, so a snapshot handed to one subscriber cannot change under it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

const DEFAULT_MAP_CAPACITY: usize = 4;

/// Immutable, type-keyed key/value snapshot attached to a single subscription.
#[derive(Clone, Default)]
pub struct Context {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Context {
    /// Returns a context without any entry.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get a reference to the value stored under type `V`.
    #[inline]
    pub fn get<V: Send + Sync + 'static>(&self) -> Option<&V> {
        self.entries.get(&TypeId::of::<V>()).and_then(|v| v.downcast_ref::<V>())
    }

    /// Get a copy of the value stored under type `V`, or `default` when absent.
    #[inline]
    pub fn get_or<V: Clone + Send + Sync + 'static>(&self, default: V) -> V {
        self.get::<V>().cloned().unwrap_or(default)
    }

    /// Check if the context holds a value of type `V`.
    #[inline]
    pub fn contains<V: Send + Sync + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<V>())
    }

    /// Returns a new context equal to this one with `value` stored under its type.
    pub fn with<V: Send + Sync + 'static>(&self, value: V) -> Self {
        let mut entries = HashMap::with_capacity((self.entries.len() + 1).max(DEFAULT_MAP_CAPACITY));
        entries.extend(self.entries.iter().map(|(k, v)| (*k, v.clone())));
        entries.insert(TypeId::of::<V>(), Arc::new(value) as Arc<dyn Any + Send + Sync>);
        Self { entries: Arc::new(entries) }
    }

    /// Returns a new context equal to this one without the entry of type `V`.
    pub fn without<V: Send + Sync + 'static>(&self) -> Self {
        if !self.contains::<V>() {
            return self.clone();
        }
        let key = TypeId::of::<V>();
        let entries = self.entries.iter().filter(|(k, _)| **k != key).map(|(k, v)| (*k, v.clone())).collect();
        Self { entries: Arc::new(entries) }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the context has no entry.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("len", &self.entries.len()).finish()
    }
}
