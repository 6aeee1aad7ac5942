// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lock helpers that recover from poisoning instead of panicking.
//!
//! A poisoned lock means some thread panicked while holding it. The engine
//! keeps running on the recovered guard: a stale storage map or a stale
//! recording is better than taking down the coordination thread.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering the guard if the lock is poisoned.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "dlnotify::locks",
                event = "LOCK_POISONED_READ",
                "RwLock poisoned during read; recovering possibly inconsistent data"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering the guard if the lock is poisoned.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "dlnotify::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock poisoned during write; recovering possibly inconsistent data"
            );
            poisoned.into_inner()
        }
    }
}
