// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared by the notification engine.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Integer handle the notification surface uses to address one notification.
pub type SurfaceHandle = u32;

/// Identity of a transfer: a namespace plus an id unique within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId {
    pub namespace: String,
    pub id: String,
}

impl TransferId {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// Durable per-transfer record that survives process death.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub id: TransferId,
    pub surface_handle: SurfaceHandle,
    #[serde(default)]
    pub off_the_record: bool,
    #[serde(default)]
    pub metered_allowed: bool,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub auto_resumable: bool,
    #[serde(default)]
    pub is_transient: bool,
}

/// Progress payload reported by the download engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressInfo {
    /// Percentage complete, `None` when the total size is unknown
    pub percent: Option<u8>,
    pub time_remaining: Option<Duration>,
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
}

impl ProgressInfo {
    /// Build progress from byte counts, deriving the percentage when possible.
    pub fn from_bytes(bytes_received: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total == 0 {
                0
            } else {
                ((bytes_received.min(total) as f64 / total as f64) * 100.0) as u8
            }
        });
        Self {
            percent,
            time_remaining: None,
            bytes_received,
            total_bytes,
        }
    }
}

/// Why a transfer stopped making progress without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    /// Explicitly paused; only the user resumes it
    ByUser,
    /// Waiting for a suitable network; resumed automatically
    WaitingForNetwork,
}

/// Status reported by the download engine for one transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferStatus {
    InProgress(ProgressInfo),
    Paused { cause: PauseCause, resumable: bool },
    Interrupted {
        resumable: bool,
        auto_resumable: bool,
        reason: String,
    },
    Succeeded { total_bytes: u64 },
    Failed { reason: String },
    /// Cancelled by the user
    Cancelled,
}

/// A transfer-status event as delivered by the download engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub id: TransferId,
    pub display_name: String,
    pub off_the_record: bool,
    pub metered_allowed: bool,
    pub is_transient: bool,
    pub status: TransferStatus,
}

impl TransferEvent {
    pub fn new(id: TransferId, display_name: impl Into<String>, status: TransferStatus) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            off_the_record: false,
            metered_allowed: false,
            is_transient: false,
            status,
        }
    }

    pub fn off_the_record(mut self, value: bool) -> Self {
        self.off_the_record = value;
        self
    }

    pub fn metered_allowed(mut self, value: bool) -> Self {
        self.metered_allowed = value;
        self
    }

    pub fn transient(mut self, value: bool) -> Self {
        self.is_transient = value;
        self
    }
}

/// Why a transfer is shown as queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReason {
    /// A resume command was just issued
    Resuming,
    /// Waiting for connectivity before it can continue
    WaitingForNetwork,
}

/// What a queued surface update shows.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Progress(ProgressInfo),
    Pending(PendingReason),
    Paused,
    Interrupted { reason: String },
    Succeeded { total_bytes: u64 },
    Failed { reason: String },
    Cancelled,
}

impl UpdateKind {
    /// Progress ticks are low priority; every state change is high priority.
    pub fn priority(&self) -> UpdatePriority {
        match self {
            UpdateKind::Progress(_) => UpdatePriority::Low,
            _ => UpdatePriority::High,
        }
    }

    /// Returns true if this update should keep the background context alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UpdateKind::Progress(_) | UpdateKind::Pending(PendingReason::Resuming)
        )
    }

    pub fn is_user_cancel(&self) -> bool {
        matches!(self, UpdateKind::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UpdateKind::Progress(_) => "progress",
            UpdateKind::Pending(_) => "pending",
            UpdateKind::Paused => "paused",
            UpdateKind::Interrupted { .. } => "interrupted",
            UpdateKind::Succeeded { .. } => "succeeded",
            UpdateKind::Failed { .. } => "failed",
            UpdateKind::Cancelled => "cancelled",
        }
    }
}

/// Drain priority of a queued update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdatePriority {
    Low = 0,
    High = 1,
}

/// A surface update waiting in the throttler.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub transfer_id: TransferId,
    pub surface_handle: SurfaceHandle,
    pub display_name: String,
    pub kind: UpdateKind,
    pub priority: UpdatePriority,
    /// Set by the throttler when absent; inherited from a superseded update
    pub enqueued_at: Option<Instant>,
}

impl PendingUpdate {
    pub fn new(
        transfer_id: TransferId,
        surface_handle: SurfaceHandle,
        display_name: impl Into<String>,
        kind: UpdateKind,
    ) -> Self {
        let priority = kind.priority();
        Self {
            transfer_id,
            surface_handle,
            display_name: display_name.into(),
            kind,
            priority,
            enqueued_at: None,
        }
    }

    pub fn enqueued_at(mut self, at: Instant) -> Self {
        self.enqueued_at = Some(at);
        self
    }
}

/// Content pushed to the notification surface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedContent {
    pub title: String,
    pub text: String,
    pub progress: Option<u8>,
    /// Ongoing notifications cannot be swiped away
    pub ongoing: bool,
}
