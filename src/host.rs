// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Collaborators for running the engine without a platform behind it.
//!
//! The surface and engine write what they are asked to do to the log. The
//! loopback host answers bind and unbind requests right away by posting the
//! matching callback to the coordinator, like a platform that starts the
//! background context immediately.

use crate::collaborators::{DownloadEngine, ForegroundHost, NotificationSurface};
use crate::coordinator::{CoordinatorEvent, EventSender};
use crate::notify::types::{RenderedContent, SurfaceHandle, TransferId};

#[derive(Debug, Default)]
pub struct LogSurface {
    preserves_detached: bool,
}

impl LogSurface {
    pub fn new(preserves_detached: bool) -> Self {
        Self { preserves_detached }
    }
}

impl NotificationSurface for LogSurface {
    fn push(&mut self, handle: SurfaceHandle, content: &RenderedContent) {
        tracing::info!(
            target: "dlnotify::surface",
            handle,
            title = %content.title,
            text = %content.text,
            progress = ?content.progress,
            ongoing = content.ongoing,
            "notification"
        );
    }

    fn cancel(&mut self, handle: SurfaceHandle) {
        tracing::info!(target: "dlnotify::surface", handle, "notification dismissed");
    }

    fn preserves_detached_surface(&self) -> bool {
        self.preserves_detached
    }
}

#[derive(Debug)]
pub struct LoopbackHost {
    sender: EventSender,
}

impl LoopbackHost {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

impl ForegroundHost for LoopbackHost {
    fn bind_request(&mut self) {
        tracing::info!(target: "dlnotify::host", "starting background context");
        self.sender.post(CoordinatorEvent::ForegroundConnected);
    }

    fn anchor_to(&mut self, handle: SurfaceHandle, content: &RenderedContent) {
        tracing::info!(target: "dlnotify::host", handle, title = %content.title, "context anchored");
    }

    fn detach_anchor(&mut self) {
        tracing::debug!(target: "dlnotify::host", "context anchor detached");
    }

    fn unbind_request(&mut self) {
        tracing::info!(target: "dlnotify::host", "stopping background context");
        self.sender.post(CoordinatorEvent::ForegroundDisconnected);
    }
}

#[derive(Debug, Default)]
pub struct LogEngine;

impl DownloadEngine for LogEngine {
    fn resume(&mut self, id: &TransferId) {
        tracing::info!(target: "dlnotify::engine", transfer = %id, "resume");
    }

    fn pause(&mut self, id: &TransferId) {
        tracing::info!(target: "dlnotify::engine", transfer = %id, "pause");
    }

    fn cancel(&mut self, id: &TransferId) {
        tracing::info!(target: "dlnotify::engine", transfer = %id, "cancel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::event_channel;

    #[test]
    fn test_loopback_host_answers_requests() {
        let (sender, mut receiver) = event_channel();
        let mut host = LoopbackHost::new(sender);

        host.bind_request();
        host.unbind_request();

        assert!(matches!(
            receiver.try_recv(),
            Some(CoordinatorEvent::ForegroundConnected)
        ));
        assert!(matches!(
            receiver.try_recv(),
            Some(CoordinatorEvent::ForegroundDisconnected)
        ));
        assert!(receiver.try_recv().is_none());
    }
}
