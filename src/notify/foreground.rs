// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lifecycle of the background execution context.
//!
//! ```text
//!            active update              connected
//!  Unbound ───────────────▶ Binding ─────────────▶ Bound
//!     ▲                        │                      │ no active transfer left
//!     │  disconnected          │ disconnected         ▼
//!     └────────────────────────┴─────────────── Unbinding
//! ```
//!
//! While bound, the context is anchored to exactly one surface: the pinned
//! transfer. Pinning changes only when the pinned transfer stops being
//! active. Updates that arrive while binding or unbinding are buffered and
//! replayed in arrival order once the pending request is acknowledged.

use std::collections::VecDeque;

use indexmap::IndexMap;

use super::types::{RenderedContent, SurfaceHandle, TransferId};
use crate::collaborators::{ForegroundHost, NotificationSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundPhase {
    Unbound,
    /// Bind requested, waiting for the connected callback
    Binding,
    Bound,
    /// Unbind requested, waiting for the disconnected callback
    Unbinding,
}

impl std::fmt::Display for ForegroundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForegroundPhase::Unbound => write!(f, "UNBOUND"),
            ForegroundPhase::Binding => write!(f, "BINDING"),
            ForegroundPhase::Bound => write!(f, "BOUND"),
            ForegroundPhase::Unbinding => write!(f, "UNBINDING"),
        }
    }
}

/// Observable state of the background context.
///
/// `connected` implies `bound`; a pinned handle exists only while bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForegroundState {
    pub bound: bool,
    pub connected: bool,
    pub pinned_surface_handle: Option<SurfaceHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Terminal { user_cancelled: bool },
}

/// A delivered surface update, as seen by the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundUpdate {
    pub transfer_id: TransferId,
    pub surface_handle: SurfaceHandle,
    pub content: RenderedContent,
    pub activity: Activity,
}

impl ForegroundUpdate {
    fn is_active(&self) -> bool {
        self.activity == Activity::Active
    }

    fn is_user_cancel(&self) -> bool {
        self.activity == Activity::Terminal { user_cancelled: true }
    }
}

pub struct ForegroundLifecycleManager {
    host: Box<dyn ForegroundHost>,
    phase: ForegroundPhase,
    /// Transfers believed active, latest update each, in arrival order
    active: IndexMap<TransferId, ForegroundUpdate>,
    buffered: VecDeque<ForegroundUpdate>,
    /// Anchor of the context, with its last known content
    pinned: Option<ForegroundUpdate>,
    /// Whether the update that started the current unbind was a user cancel
    unbind_for_cancel: bool,
}

impl ForegroundLifecycleManager {
    pub fn new(host: Box<dyn ForegroundHost>) -> Self {
        Self {
            host,
            phase: ForegroundPhase::Unbound,
            active: IndexMap::new(),
            buffered: VecDeque::new(),
            pinned: None,
            unbind_for_cancel: false,
        }
    }

    pub fn phase(&self) -> ForegroundPhase {
        self.phase
    }

    pub fn state(&self) -> ForegroundState {
        ForegroundState {
            bound: self.phase != ForegroundPhase::Unbound,
            connected: matches!(self.phase, ForegroundPhase::Bound | ForegroundPhase::Unbinding),
            pinned_surface_handle: self.pinned.as_ref().map(|p| p.surface_handle),
        }
    }

    /// Transfer currently anchoring the context.
    pub fn pinned_transfer(&self) -> Option<&TransferId> {
        self.pinned.as_ref().map(|p| &p.transfer_id)
    }

    pub fn is_active(&self, id: &TransferId) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_transfers(&self) -> impl Iterator<Item = &TransferId> {
        self.active.keys()
    }

    /// Feed a delivered update.
    pub fn on_update(&mut self, update: ForegroundUpdate, surface: &mut dyn NotificationSurface) {
        self.track(&update);

        match self.phase {
            ForegroundPhase::Unbound => {
                if update.is_active() {
                    self.buffered.push_back(update);
                    self.request_bind();
                }
            }
            ForegroundPhase::Binding | ForegroundPhase::Unbinding => {
                self.buffered.push_back(update);
            }
            ForegroundPhase::Bound => self.apply(update, surface),
        }
    }

    /// The host acknowledged the bind request.
    pub fn on_connected(&mut self, surface: &mut dyn NotificationSurface) {
        if self.phase != ForegroundPhase::Binding {
            tracing::warn!(phase = %self.phase, "ignoring connect outside of binding");
            return;
        }

        self.phase = ForegroundPhase::Bound;
        tracing::info!(buffered = self.buffered.len(), "background context connected");

        // Only the latest update of each transfer is replayed; an older
        // active update must not pin a transfer that has since finished.
        let mut latest: IndexMap<TransferId, ForegroundUpdate> = IndexMap::new();
        for update in std::mem::take(&mut self.buffered) {
            latest.insert(update.transfer_id.clone(), update);
        }
        for update in latest.into_values() {
            if self.phase == ForegroundPhase::Bound {
                self.apply(update, surface);
            } else {
                // An unbind started mid-replay; the rest waits for it.
                self.buffered.push_back(update);
            }
        }
    }

    /// The host reported the context gone, either acknowledging an unbind
    /// or because it died.
    pub fn on_disconnected(&mut self, surface: &mut dyn NotificationSurface) {
        match self.phase {
            ForegroundPhase::Unbinding => {
                if let Some(last) = self.pinned.take() {
                    if !self.unbind_for_cancel {
                        // Outlive the context that owned it.
                        surface.push(last.surface_handle, &last.content);
                    }
                }
                self.unbind_for_cancel = false;
                self.phase = ForegroundPhase::Unbound;
                tracing::info!("background context unbound");

                if self.active.is_empty() {
                    self.buffered.clear();
                } else {
                    tracing::debug!(active = self.active.len(), "transfers became active while unbinding");
                    self.request_bind();
                }
            }
            ForegroundPhase::Binding | ForegroundPhase::Bound => {
                tracing::warn!(
                    phase = %self.phase,
                    active = self.active.len(),
                    "background context disconnected unexpectedly"
                );
                self.phase = ForegroundPhase::Unbound;
                self.pinned = None;
                self.buffered.clear();
                self.unbind_for_cancel = false;
            }
            ForegroundPhase::Unbound => {
                tracing::debug!("ignoring disconnect while unbound");
            }
        }
    }

    fn track(&mut self, update: &ForegroundUpdate) {
        if update.is_active() {
            self.active.insert(update.transfer_id.clone(), update.clone());
        } else {
            self.active.shift_remove(&update.transfer_id);
        }
    }

    fn request_bind(&mut self) {
        if self.phase == ForegroundPhase::Binding {
            return;
        }
        tracing::info!("requesting background context bind");
        self.host.bind_request();
        self.phase = ForegroundPhase::Binding;
    }

    /// Apply one update while bound.
    fn apply(&mut self, update: ForegroundUpdate, surface: &mut dyn NotificationSurface) {
        if update.is_active() {
            match self.pinned_transfer().cloned() {
                Some(pinned) if pinned == update.transfer_id => {
                    self.pinned = Some(update);
                }
                Some(pinned) if self.active.contains_key(&pinned) => {}
                _ => self.pin(update, surface),
            }
            return;
        }

        if self.pinned_transfer() == Some(&update.transfer_id) {
            self.pinned = Some(update.clone());
        }

        let pinned_still_active = self
            .pinned
            .as_ref()
            .map(|p| self.active.contains_key(&p.transfer_id))
            .unwrap_or(false);
        if pinned_still_active {
            return;
        }

        if let Some(next) = self.active.values().next().cloned() {
            self.pin(next, surface);
            return;
        }

        tracing::info!(transfer = %update.transfer_id, "no active transfers left, unbinding");
        self.unbind_for_cancel = update.is_user_cancel();
        self.host.unbind_request();
        self.phase = ForegroundPhase::Unbinding;
    }

    fn pin(&mut self, update: ForegroundUpdate, surface: &mut dyn NotificationSurface) {
        if let Some(previous) = self.pinned.take() {
            if previous.transfer_id != update.transfer_id && !surface.preserves_detached_surface() {
                self.host.detach_anchor();
                if !previous.is_user_cancel() {
                    surface.push(previous.surface_handle, &previous.content);
                }
            }
        }

        tracing::debug!(
            transfer = %update.transfer_id,
            handle = update.surface_handle,
            "pinning background context"
        );
        self.host.anchor_to(update.surface_handle, &update.content);
        self.pinned = Some(update);
    }
}

impl std::fmt::Debug for ForegroundLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForegroundLifecycleManager")
            .field("phase", &self.phase)
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .field("buffered", &self.buffered.len())
            .field("pinned", &self.pinned_transfer())
            .finish()
    }
}
