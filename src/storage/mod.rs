// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable key/value storage.
//!
//! Every mutation is durable before the call returns. Two backends:
//! - [`FileKeyValueStore`] - a locked, atomically replaced JSON document
//! - [`MemoryKeyValueStore`] - a shared in-memory map for tests and dry runs

pub mod file;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;

use crate::locks::{resilient_read, resilient_write};

pub use file::FileKeyValueStore;

/// Synchronous string key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in lexicographic order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory storage. Clones share the same map, so a clone handed to a
/// second engine instance observes everything the first one wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(resilient_read(&self.values).get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        resilient_write(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        resilient_write(&self.values).remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(resilient_read(&self.values)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
