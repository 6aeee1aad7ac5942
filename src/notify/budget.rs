// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persisted counter bounding automatic resumption attempts.
//!
//! Each automatic resumption consumes one attempt. The counter only goes back
//! up through [`ResumptionBudget::clear`], so a transfer that crashes the
//! process on every resume cannot loop forever.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::storage::KeyValueStore;

pub const BUDGET_KEY: &str = "resumption_budget";

/// Attempts available after a clear, unless configured otherwise.
pub const DEFAULT_RESUMPTION_ATTEMPTS: u32 = 5;

pub struct ResumptionBudget {
    storage: Arc<dyn KeyValueStore>,
    max_attempts: u32,
}

impl ResumptionBudget {
    pub fn new(storage: Arc<dyn KeyValueStore>, max_attempts: u32) -> Self {
        Self {
            storage,
            max_attempts,
        }
    }

    /// Attempts left. An absent or unreadable counter counts as full.
    pub fn remaining(&self) -> u32 {
        match self.storage.get(BUDGET_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<u32>() {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(value = %raw, "malformed resumption budget, treating as full");
                    self.max_attempts
                }
            },
            Ok(None) => self.max_attempts,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read resumption budget");
                self.max_attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume one attempt. Returns false, without writing, when exhausted.
    pub fn try_consume(&mut self) -> Result<bool> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(false);
        }
        self.write(remaining - 1)?;
        Ok(true)
    }

    /// Reset to the full allowance.
    pub fn clear(&mut self) -> Result<()> {
        self.write(self.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn write(&self, value: u32) -> Result<()> {
        self.storage
            .put(BUDGET_KEY, &value.to_string())
            .context("Failed to persist resumption budget")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    #[test]
    fn test_budget_counts_down_to_zero_and_stops() {
        let storage = MemoryKeyValueStore::new();
        let mut budget = ResumptionBudget::new(Arc::new(storage.clone()), 2);
        assert_eq!(budget.remaining(), 2);

        assert!(budget.try_consume().unwrap());
        assert!(budget.try_consume().unwrap());
        assert!(budget.is_exhausted());

        assert!(!budget.try_consume().unwrap());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(storage.get(BUDGET_KEY).unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn test_clear_restores_full_allowance() {
        let storage = MemoryKeyValueStore::new();
        let mut budget = ResumptionBudget::new(Arc::new(storage), 3);
        budget.try_consume().unwrap();
        budget.clear().unwrap();
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn test_budget_survives_restart() {
        let storage = MemoryKeyValueStore::new();
        {
            let mut budget = ResumptionBudget::new(Arc::new(storage.clone()), 5);
            budget.try_consume().unwrap();
        }
        let budget = ResumptionBudget::new(Arc::new(storage), 5);
        assert_eq!(budget.remaining(), 4);
    }

    #[test]
    fn test_malformed_counter_counts_as_full() {
        let storage = MemoryKeyValueStore::new();
        storage.put(BUDGET_KEY, "-3").unwrap();
        let budget = ResumptionBudget::new(Arc::new(storage), 5);
        assert_eq!(budget.remaining(), 5);
    }
}
