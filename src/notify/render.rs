// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Plain-text rendering of queued updates.

use std::time::Duration;

use super::types::{PendingReason, PendingUpdate, RenderedContent, UpdateKind};

/// Render an update into the content pushed to the surface.
pub fn render(update: &PendingUpdate) -> RenderedContent {
    let title = if update.display_name.is_empty() {
        update.transfer_id.id.clone()
    } else {
        update.display_name.clone()
    };

    let (text, progress) = match &update.kind {
        UpdateKind::Progress(info) => {
            let mut text = match info.percent {
                Some(percent) => format!("{}%", percent),
                None => format_bytes(info.bytes_received),
            };
            if let Some(eta) = info.time_remaining.map(eta_string) {
                text.push_str(&format!(" - {} left", eta));
            }
            (text, info.percent)
        }
        UpdateKind::Pending(PendingReason::Resuming) => ("Resuming...".to_string(), None),
        UpdateKind::Pending(PendingReason::WaitingForNetwork) => {
            ("Waiting for network".to_string(), None)
        }
        UpdateKind::Paused => ("Paused".to_string(), None),
        UpdateKind::Interrupted { reason } => (format!("Interrupted: {}", reason), None),
        UpdateKind::Succeeded { total_bytes } => {
            (format!("Download complete ({})", format_bytes(*total_bytes)), Some(100))
        }
        UpdateKind::Failed { reason } => (format!("Download failed: {}", reason), None),
        UpdateKind::Cancelled => ("Cancelled".to_string(), None),
    };

    RenderedContent {
        title,
        text,
        progress,
        ongoing: update.kind.is_active(),
    }
}

/// Format a remaining duration as "1h 2m", "3m 4s" or "5s".
pub fn eta_string(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Format a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
