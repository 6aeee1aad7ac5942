// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable per-transfer records.
//!
//! The store keeps an in-memory copy of every entry and writes through to
//! [`KeyValueStore`] before each mutating call returns. Callers always get
//! clones; mutation only happens through [`PersistentEntryStore::put`] and
//! [`PersistentEntryStore::remove`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::types::{PersistedEntry, TransferId};
use crate::storage::KeyValueStore;

/// Key prefix for serialized entries.
pub const ENTRY_KEY_PREFIX: &str = "entry/";

/// What happened to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChange {
    /// Added or replaced
    Upserted(PersistedEntry),
    Removed,
}

/// Receives entry change notifications.
pub trait EntryObserver: Send {
    fn on_entry_changed(&mut self, id: &TransferId, change: &EntryChange);
}

impl<F> EntryObserver for F
where
    F: FnMut(&TransferId, &EntryChange) + Send,
{
    fn on_entry_changed(&mut self, id: &TransferId, change: &EntryChange) {
        self(id, change)
    }
}

/// Token returned by [`PersistentEntryStore::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct PersistentEntryStore {
    storage: Arc<dyn KeyValueStore>,
    entries: HashMap<TransferId, PersistedEntry>,
    observers: Vec<(ObserverId, Box<dyn EntryObserver>)>,
    next_observer: u64,
}

impl PersistentEntryStore {
    /// Load every entry from storage. Malformed records are skipped.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let keys = storage
            .keys(ENTRY_KEY_PREFIX)
            .context("Failed to enumerate persisted entries")?;

        let mut entries = HashMap::new();
        for key in keys {
            let raw = match storage.get(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            match serde_json::from_str::<PersistedEntry>(&raw) {
                Ok(entry) => {
                    entries.insert(entry.id.clone(), entry);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping malformed entry");
                }
            }
        }

        tracing::debug!(count = entries.len(), "loaded persisted entries");
        Ok(Self {
            storage,
            entries,
            observers: Vec::new(),
            next_observer: 0,
        })
    }

    /// Storage key for a transfer. The namespace is length-prefixed so no
    /// (namespace, id) pair can collide with another.
    pub fn storage_key(id: &TransferId) -> String {
        format!(
            "{}{}:{}{}",
            ENTRY_KEY_PREFIX,
            id.namespace.len(),
            id.namespace,
            id.id
        )
    }

    /// Add or replace an entry. Writing an identical entry is a no-op and
    /// notifies nobody.
    pub fn put(&mut self, entry: PersistedEntry) -> Result<()> {
        if self.entries.get(&entry.id) == Some(&entry) {
            return Ok(());
        }

        let raw = serde_json::to_string(&entry).context("Failed to serialize entry")?;
        self.storage
            .put(&Self::storage_key(&entry.id), &raw)
            .with_context(|| format!("Failed to persist entry {}", entry.id))?;

        let id = entry.id.clone();
        self.entries.insert(id.clone(), entry.clone());
        self.notify(&id, &EntryChange::Upserted(entry));
        Ok(())
    }

    /// Remove an entry. Returns the removed entry, `None` if it was absent.
    pub fn remove(&mut self, id: &TransferId) -> Result<Option<PersistedEntry>> {
        if !self.entries.contains_key(id) {
            return Ok(None);
        }

        self.storage
            .remove(&Self::storage_key(id))
            .with_context(|| format!("Failed to remove entry {}", id))?;

        let removed = self.entries.remove(id);
        self.notify(id, &EntryChange::Removed);
        Ok(removed)
    }

    pub fn get(&self, id: &TransferId) -> Option<PersistedEntry> {
        self.entries.get(id).cloned()
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.entries.contains_key(id)
    }

    /// Every entry, in no particular order.
    pub fn all(&self) -> Vec<PersistedEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_observer(&mut self, observer: impl EntryObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns false if the observer was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    fn notify(&mut self, id: &TransferId, change: &EntryChange) {
        for (_, observer) in &mut self.observers {
            observer.on_entry_changed(id, change);
        }
    }
}

impl std::fmt::Debug for PersistentEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentEntryStore")
            .field("entries", &self.entries)
            .field("observers", &self.observers.len())
            .finish()
    }
}
