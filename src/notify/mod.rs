// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download notification coordination.
//!
//! Keeps the user-visible notifications and a background execution context
//! consistent with the state of many concurrent transfers:
//! - Surface updates rate-limited to one per drain interval
//! - Transfers that survive restarts shown as paused until resumed
//! - Budgeted, network-aware automatic resumption
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ NotificationDirector │────▶│ UpdateThrottler      │
//! │ (classify events)    │     │ (one update / tick)  │
//! └───┬──────────────┬───┘     └──────────┬───────────┘
//!     │              │                    ▼
//!     ▼              ▼         ┌──────────────────────┐
//! ┌──────────┐ ┌────────────┐  │ Surface +            │
//! │ Entries  │ │ Resumption │  │ ForegroundLifecycle  │
//! │ (persist)│ │ (deferred) │  └──────────────────────┘
//! └──────────┘ └────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dlnotify::notify::{
//!     Collaborators, DirectorSettings, NotificationDirector, TransferEvent, TransferId,
//!     TransferStatus,
//! };
//! use dlnotify::storage::MemoryKeyValueStore;
//!
//! # fn example(collaborators: Collaborators) -> anyhow::Result<()> {
//! let mut director = NotificationDirector::new(
//!     Arc::new(MemoryKeyValueStore::new()),
//!     DirectorSettings::default(),
//!     collaborators,
//! )?;
//! director.start();
//! director.on_transfer_event(TransferEvent::new(
//!     TransferId::new("downloads", "42"),
//!     "model.bin",
//!     TransferStatus::Succeeded { total_bytes: 1024 },
//! ));
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod director;
pub mod entries;
pub mod foreground;
pub mod render;
pub mod resumption;
pub mod throttle;
pub mod types;

// Re-export commonly used items
pub use budget::ResumptionBudget;
pub use director::{
    Collaborators, DirectorSettings, DirectorSnapshot, NotificationDirector, UserAction,
};
pub use entries::{EntryChange, EntryObserver, ObserverId, PersistentEntryStore};
pub use foreground::{ForegroundLifecycleManager, ForegroundPhase, ForegroundState};
pub use render::render;
pub use resumption::ResumptionScheduler;
pub use throttle::UpdateThrottler;
pub use types::{
    PauseCause, PendingReason, PendingUpdate, PersistedEntry, ProgressInfo, RenderedContent,
    SurfaceHandle, TransferEvent, TransferId, TransferStatus, UpdateKind, UpdatePriority,
};
