// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dlnotify - download notification coordination
//!
//! Keeps user-visible download notifications and a long-lived background
//! execution context consistent with the state of many concurrent transfers,
//! across process restarts.
//!
//! # Core Modules
//!
//! - [`notify`] - Director, throttler, background-context lifecycle, persisted entries
//! - [`coordinator`] - Single tokio task that serializes every input
//! - [`collaborators`] - Traits for the surface, host, engine and schedulers
//! - [`storage`] - Durable key/value storage (file-backed and in-memory)
//! - [`host`] - Log-backed collaborators for running without a platform
//! - [`config`] - User configuration
//! - `testing` - Recording collaborator doubles (`testing` feature)

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod locks;
pub mod notify;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collaborators::{
    DeferredTaskScheduler, DownloadEngine, DrainTimer, ForegroundHost, NetworkConstraint,
    NotificationSurface,
};
pub use config::NotifyConfig;
pub use coordinator::{
    event_channel, CoordinatorEvent, CoordinatorHandle, EventReceiver, EventSender,
    TokioDrainTimer, TokioTaskScheduler,
};
pub use notify::{
    Collaborators, DirectorSettings, DirectorSnapshot, NotificationDirector, TransferEvent,
    TransferId, TransferStatus, UserAction,
};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
