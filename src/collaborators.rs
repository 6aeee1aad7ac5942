// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Boundaries to the external systems the engine drives.
//!
//! All calls are fire-and-forget. Acknowledgments (background context
//! connected/disconnected, timers firing) come back later as events on the
//! coordination thread, never as return values.

use std::time::Duration;

use crate::notify::types::{RenderedContent, SurfaceHandle, TransferId};

/// The user-facing notification surface.
pub trait NotificationSurface: Send {
    fn push(&mut self, handle: SurfaceHandle, content: &RenderedContent);

    fn cancel(&mut self, handle: SurfaceHandle);

    /// Whether a surface detached from the background context keeps showing
    /// when the context anchors itself to a different surface. When false,
    /// the previous surface is relaunched after an anchor switch.
    fn preserves_detached_surface(&self) -> bool {
        false
    }
}

/// Host of the long-lived background execution context.
///
/// `bind_request` is answered by a connected event, `unbind_request` by a
/// disconnected event. A disconnected event without a preceding unbind
/// request means the context died.
pub trait ForegroundHost: Send {
    fn bind_request(&mut self);

    fn anchor_to(&mut self, handle: SurfaceHandle, content: &RenderedContent);

    fn detach_anchor(&mut self);

    fn unbind_request(&mut self);
}

/// The download engine that actually moves bytes.
pub trait DownloadEngine: Send {
    fn resume(&mut self, id: &TransferId);

    fn pause(&mut self, id: &TransferId);

    fn cancel(&mut self, id: &TransferId);
}

/// Network requirement attached to the deferred resumption task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkConstraint {
    /// Only run on an unmetered connection
    Unmetered,
    /// Any connection will do
    Any,
}

/// Scheduler for the one-shot deferred resumption task.
pub trait DeferredTaskScheduler: Send {
    fn schedule_one_shot(&mut self, delay: Duration, network: NetworkConstraint, replace: bool);

    /// Cancelling when nothing is scheduled is a no-op.
    fn cancel(&mut self);
}

/// Posts a drain tick back to the coordination thread after a delay.
pub trait DrainTimer: Send {
    fn arm(&mut self, after: Duration);
}
