// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Façade that turns transfer-status events into surface updates.
//!
//! For every event the director:
//! 1. classifies it (active, waiting for network, paused, terminal),
//! 2. adds, replaces or removes the persisted entry,
//! 3. updates the in-flight set and the deferred resumption task,
//! 4. hands a [`PendingUpdate`] to the throttler, whose deliveries feed the
//!    surface and the background-context lifecycle.
//!
//! On a cold start every persisted entry is shown as paused before any other
//! event is handled; nothing resumes network activity on its own except the
//! budgeted [`NotificationDirector::resume_all_pending`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indexmap::IndexMap;

use super::budget::{ResumptionBudget, DEFAULT_RESUMPTION_ATTEMPTS};
use super::entries::{EntryObserver, ObserverId, PersistentEntryStore};
use super::foreground::{
    Activity, ForegroundLifecycleManager, ForegroundPhase, ForegroundState, ForegroundUpdate,
};
use super::render::render;
use super::resumption::{ResumptionScheduler, DEFAULT_RESUMPTION_DELAY};
use super::throttle::{UpdateThrottler, DEFAULT_THROTTLE_INTERVAL};
use super::types::{
    PauseCause, PendingReason, PendingUpdate, PersistedEntry, SurfaceHandle, TransferEvent,
    TransferId, TransferStatus, UpdateKind,
};
use crate::collaborators::{
    DeferredTaskScheduler, DownloadEngine, DrainTimer, ForegroundHost, NetworkConstraint,
    NotificationSurface,
};
use crate::storage::KeyValueStore;

/// Storage key of the persisted surface-handle counter.
pub const NEXT_HANDLE_KEY: &str = "next_surface_handle";

/// How many finished transfers keep their handle in memory for repeated
/// terminal events. Older ones fall back to the persisted counter.
pub const RECENT_TERMINAL_CAPACITY: usize = 256;

/// Tunables of the director.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorSettings {
    pub throttle_interval: Duration,
    pub resumption_attempts: u32,
    pub resumption_delay: Duration,
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            resumption_attempts: DEFAULT_RESUMPTION_ATTEMPTS,
            resumption_delay: DEFAULT_RESUMPTION_DELAY,
        }
    }
}

/// External systems the director drives.
pub struct Collaborators {
    pub surface: Box<dyn NotificationSurface>,
    pub host: Box<dyn ForegroundHost>,
    pub engine: Box<dyn DownloadEngine>,
    pub scheduler: Box<dyn DeferredTaskScheduler>,
    pub timer: Box<dyn DrainTimer>,
}

/// Actions triggered from notification buttons or the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Pause(TransferId),
    Resume(TransferId),
    Cancel(TransferId),
    /// Clear the resumption budget and resume everything pending
    RetryAll,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorSnapshot {
    pub foreground: ForegroundState,
    pub phase: ForegroundPhase,
    pub in_flight: Vec<TransferId>,
    pub queued_updates: usize,
    pub persisted: Vec<PersistedEntry>,
    pub resumption_budget: u32,
    pub resumption_scheduled: Option<NetworkConstraint>,
}

pub struct NotificationDirector {
    storage: Arc<dyn KeyValueStore>,
    entries: PersistentEntryStore,
    budget: ResumptionBudget,
    throttler: UpdateThrottler,
    foreground: ForegroundLifecycleManager,
    resumption: ResumptionScheduler,
    surface: Box<dyn NotificationSurface>,
    engine: Box<dyn DownloadEngine>,
    timer: Box<dyn DrainTimer>,
    /// Transfers currently classified active
    in_flight: HashSet<TransferId>,
    /// Most recently finished transfers and their handles, oldest first
    recent_terminal: IndexMap<TransferId, SurfaceHandle>,
    reconciled: bool,
}

impl NotificationDirector {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        settings: DirectorSettings,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let entries = PersistentEntryStore::load(Arc::clone(&storage))?;
        let budget = ResumptionBudget::new(Arc::clone(&storage), settings.resumption_attempts);

        Ok(Self {
            storage,
            entries,
            budget,
            throttler: UpdateThrottler::new(settings.throttle_interval),
            foreground: ForegroundLifecycleManager::new(collaborators.host),
            resumption: ResumptionScheduler::new(collaborators.scheduler, settings.resumption_delay),
            surface: collaborators.surface,
            engine: collaborators.engine,
            timer: collaborators.timer,
            in_flight: HashSet::new(),
            recent_terminal: IndexMap::new(),
            reconciled: false,
        })
    }

    /// Cold-start reconciliation. Runs once; every other entry point runs
    /// it first if it has not run yet.
    pub fn start(&mut self) {
        if self.reconciled {
            return;
        }
        self.reconciled = true;

        let mut entries = self.entries.all();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(entries = entries.len(), "reconciling persisted transfers");

        for entry in entries {
            if entry.off_the_record {
                tracing::debug!(transfer = %entry.id, "dropping off-the-record transfer");
                if let Err(e) = self.entries.remove(&entry.id) {
                    tracing::warn!(transfer = %entry.id, error = %e, "failed to remove entry");
                }
                self.surface.cancel(entry.surface_handle);
                continue;
            }

            self.dispatch(PendingUpdate::new(
                entry.id,
                entry.surface_handle,
                entry.display_name,
                UpdateKind::Paused,
            ));
        }

        self.resumption.schedule_if_necessary(&self.entries);
    }

    /// Handle a transfer-status event from the download engine.
    pub fn on_transfer_event(&mut self, event: TransferEvent) {
        self.start();

        let TransferEvent {
            id,
            display_name,
            off_the_record,
            metered_allowed,
            is_transient,
            status,
        } = event;

        // `Some(auto_resumable)` keeps an entry, `None` removes it.
        let (kind, keep_entry) = match status {
            TransferStatus::InProgress(progress) => (UpdateKind::Progress(progress), Some(true)),
            TransferStatus::Paused {
                resumable: false, ..
            } => (
                UpdateKind::Failed {
                    reason: "transfer cannot be resumed".to_string(),
                },
                None,
            ),
            TransferStatus::Paused {
                cause: PauseCause::WaitingForNetwork,
                ..
            } => (UpdateKind::Pending(PendingReason::WaitingForNetwork), Some(true)),
            TransferStatus::Paused {
                cause: PauseCause::ByUser,
                ..
            } => (UpdateKind::Paused, Some(false)),
            TransferStatus::Interrupted {
                resumable: false,
                reason,
                ..
            } => (UpdateKind::Failed { reason }, None),
            TransferStatus::Interrupted {
                auto_resumable: true,
                ..
            } => (UpdateKind::Pending(PendingReason::WaitingForNetwork), Some(true)),
            TransferStatus::Interrupted { reason, .. } => {
                (UpdateKind::Interrupted { reason }, Some(false))
            }
            TransferStatus::Succeeded { total_bytes } => {
                (UpdateKind::Succeeded { total_bytes }, None)
            }
            TransferStatus::Failed { reason } => (UpdateKind::Failed { reason }, None),
            TransferStatus::Cancelled => (UpdateKind::Cancelled, None),
        };

        if keep_entry.is_none()
            && self.recent_terminal.contains_key(&id)
            && !self.entries.contains(&id)
            && !self.in_flight.contains(&id)
        {
            tracing::debug!(transfer = %id, kind = kind.label(), "ignoring repeated terminal event");
            return;
        }

        let handle = self.surface_handle_for(&id);
        match keep_entry {
            Some(auto_resumable) => {
                let entry = PersistedEntry {
                    id: id.clone(),
                    surface_handle: handle,
                    off_the_record,
                    metered_allowed,
                    display_name: display_name.clone(),
                    auto_resumable,
                    is_transient,
                };
                if let Err(e) = self.entries.put(entry) {
                    tracing::warn!(transfer = %id, error = %e, "failed to persist entry");
                }
                self.recent_terminal.shift_remove(&id);
            }
            None => {
                if let Err(e) = self.entries.remove(&id) {
                    tracing::warn!(transfer = %id, error = %e, "failed to remove entry");
                }
                self.remember_terminal(id.clone(), handle);
            }
        }

        let was_idle = self.in_flight.is_empty();
        if kind.is_active() {
            self.in_flight.insert(id.clone());
        } else {
            self.in_flight.remove(&id);
        }
        self.sync_resumption(was_idle);

        self.dispatch(PendingUpdate::new(id, handle, display_name, kind));
    }

    /// Resume every auto-resumable transfer not already in flight, if the
    /// resumption budget allows another attempt.
    pub fn resume_all_pending(&mut self) {
        self.start();
        self.resumption.cancel();

        match self.budget.try_consume() {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("resumption budget exhausted, not resuming");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to consume resumption budget");
                return;
            }
        }

        let mut pending: Vec<_> = self
            .entries
            .all()
            .into_iter()
            .filter(|entry| entry.auto_resumable && !self.in_flight.contains(&entry.id))
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::info!(
            pending = pending.len(),
            budget_left = self.budget.remaining(),
            "resuming pending transfers"
        );
        for entry in pending {
            self.begin_resume(entry);
        }
    }

    /// The deferred resumption task fired.
    pub fn on_resumption_task_fired(&mut self) {
        // A fire already queued when the task was cancelled is stale.
        if self.resumption.scheduled().is_none() {
            tracing::debug!("ignoring resumption task fired after cancel");
            return;
        }
        self.resumption.on_fired();
        self.resume_all_pending();
    }

    pub fn on_user_action(&mut self, action: UserAction) {
        self.start();

        match action {
            UserAction::Pause(id) => self.engine.pause(&id),
            UserAction::Resume(id) => {
                self.clear_resumption_budget();
                match self.entries.get(&id) {
                    Some(entry) => {
                        if !self.in_flight.contains(&id) {
                            self.begin_resume(entry);
                        }
                    }
                    None => tracing::warn!(transfer = %id, "resume requested for unknown transfer"),
                }
            }
            UserAction::Cancel(id) => {
                self.engine.cancel(&id);
                let display_name = self
                    .entries
                    .get(&id)
                    .map(|entry| entry.display_name)
                    .unwrap_or_default();
                self.on_transfer_event(TransferEvent::new(
                    id,
                    display_name,
                    TransferStatus::Cancelled,
                ));
            }
            UserAction::RetryAll => {
                self.clear_resumption_budget();
                self.resume_all_pending();
            }
        }
    }

    /// Explicitly restore the full resumption budget.
    pub fn clear_resumption_budget(&mut self) {
        if let Err(e) = self.budget.clear() {
            tracing::warn!(error = %e, "failed to clear resumption budget");
        }
    }

    /// A drain tick fired.
    pub fn on_drain_timer(&mut self) {
        match self.throttler.next_due() {
            Some(update) => {
                self.deliver(update);
                self.timer.arm(self.throttler.interval());
            }
            None => tracing::debug!("drain cycle finished"),
        }
    }

    pub fn on_foreground_connected(&mut self) {
        self.foreground.on_connected(self.surface.as_mut());
    }

    pub fn on_foreground_disconnected(&mut self) {
        self.foreground.on_disconnected(self.surface.as_mut());
    }

    /// Read access to persisted entries. Writes go through the director only.
    pub fn entries(&self) -> &PersistentEntryStore {
        &self.entries
    }

    pub fn add_entry_observer(&mut self, observer: impl EntryObserver + 'static) -> ObserverId {
        self.entries.add_observer(observer)
    }

    pub fn remove_entry_observer(&mut self, id: ObserverId) -> bool {
        self.entries.remove_observer(id)
    }

    pub fn foreground_state(&self) -> ForegroundState {
        self.foreground.state()
    }

    /// Handle assigned to a transfer, if it has one.
    pub fn surface_handle(&self, id: &TransferId) -> Option<SurfaceHandle> {
        self.entries
            .get(id)
            .map(|entry| entry.surface_handle)
            .or_else(|| self.recent_terminal.get(id).copied())
    }

    pub fn is_in_flight(&self, id: &TransferId) -> bool {
        self.in_flight.contains(id)
    }

    /// True while the throttler has a drain cycle running.
    pub fn is_draining(&self) -> bool {
        self.throttler.is_draining()
    }

    pub fn snapshot(&self) -> DirectorSnapshot {
        let mut in_flight: Vec<_> = self.in_flight.iter().cloned().collect();
        in_flight.sort();
        let mut persisted = self.entries.all();
        persisted.sort_by(|a, b| a.id.cmp(&b.id));

        DirectorSnapshot {
            foreground: self.foreground.state(),
            phase: self.foreground.phase(),
            in_flight,
            queued_updates: self.throttler.len(),
            persisted,
            resumption_budget: self.budget.remaining(),
            resumption_scheduled: self.resumption.scheduled(),
        }
    }

    fn begin_resume(&mut self, entry: PersistedEntry) {
        let was_idle = self.in_flight.is_empty();
        self.in_flight.insert(entry.id.clone());
        self.sync_resumption(was_idle);

        self.dispatch(PendingUpdate::new(
            entry.id.clone(),
            entry.surface_handle,
            entry.display_name,
            UpdateKind::Pending(PendingReason::Resuming),
        ));
        self.engine.resume(&entry.id);
    }

    /// Keep the deferred task consistent with the in-flight set: cancelled
    /// once something is in flight, rescheduled (or cancelled) when idle.
    fn sync_resumption(&mut self, was_idle: bool) {
        if self.in_flight.is_empty() {
            self.resumption.schedule_if_necessary(&self.entries);
        } else if was_idle {
            self.resumption.cancel();
        }
    }

    fn dispatch(&mut self, update: PendingUpdate) {
        if let Some(update) = self.throttler.enqueue(update) {
            self.deliver(update);
            self.timer.arm(self.throttler.interval());
        }
    }

    fn deliver(&mut self, update: PendingUpdate) {
        let content = render(&update);
        tracing::debug!(
            transfer = %update.transfer_id,
            handle = update.surface_handle,
            kind = update.kind.label(),
            "updating surface"
        );

        if update.kind.is_user_cancel() {
            self.surface.cancel(update.surface_handle);
        } else {
            self.surface.push(update.surface_handle, &content);
        }

        let activity = if update.kind.is_active() {
            Activity::Active
        } else {
            Activity::Terminal {
                user_cancelled: update.kind.is_user_cancel(),
            }
        };
        self.foreground.on_update(
            ForegroundUpdate {
                transfer_id: update.transfer_id,
                surface_handle: update.surface_handle,
                content,
                activity,
            },
            self.surface.as_mut(),
        );
    }

    fn remember_terminal(&mut self, id: TransferId, handle: SurfaceHandle) {
        self.recent_terminal.shift_remove(&id);
        self.recent_terminal.insert(id, handle);
        while self.recent_terminal.len() > RECENT_TERMINAL_CAPACITY {
            self.recent_terminal.shift_remove_index(0);
        }
    }

    /// Stable handle for a transfer: its persisted one, the one it finished
    /// with recently, or the next value of the persisted counter.
    fn surface_handle_for(&mut self, id: &TransferId) -> SurfaceHandle {
        if let Some(entry) = self.entries.get(id) {
            return entry.surface_handle;
        }
        if let Some(handle) = self.recent_terminal.get(id) {
            return *handle;
        }

        let stored = match self.storage.get(NEXT_HANDLE_KEY) {
            Ok(raw) => raw.and_then(|raw| raw.trim().parse::<SurfaceHandle>().ok()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read surface handle counter");
                None
            }
        };
        let floor = self
            .entries
            .all()
            .iter()
            .map(|entry| entry.surface_handle)
            .chain(self.recent_terminal.values().copied())
            .max()
            .map(|max| max.wrapping_add(1))
            .unwrap_or(1);
        let handle = stored.unwrap_or(floor).max(floor);

        if let Err(e) = self
            .storage
            .put(NEXT_HANDLE_KEY, &handle.wrapping_add(1).to_string())
        {
            tracing::warn!(error = %e, "failed to persist surface handle counter");
        }
        handle
    }
}
