// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rate limiting for surface updates.
//!
//! The notification surface drops writes beyond roughly five per second, so
//! at most one update goes out per drain interval:
//!
//! - with no drain cycle running, an update is handed back for immediate
//!   delivery and a cycle starts;
//! - while a cycle runs, updates wait in a queue ordered by priority, then
//!   by enqueue time;
//! - each tick releases one update; an empty queue ends the cycle.
//!
//! At most one update per transfer is queued. A newer update replaces the
//! queued one but keeps its enqueue time, so a transfer that reports progress
//! continuously is not pushed behind later arrivals forever.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::types::{PendingUpdate, TransferId, UpdatePriority};

/// Keeps surface writes under ~5 per second.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(220);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    /// 0 drains first
    rank: u8,
    enqueued_at: Instant,
    /// Tie-breaker for identical timestamps
    seq: u64,
}

#[derive(Debug)]
pub struct UpdateThrottler {
    interval: Duration,
    queue: BTreeMap<QueueKey, PendingUpdate>,
    index: HashMap<TransferId, QueueKey>,
    drain_scheduled: bool,
    next_seq: u64,
}

impl UpdateThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            queue: BTreeMap::new(),
            index: HashMap::new(),
            drain_scheduled: false,
            next_seq: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Offer an update.
    ///
    /// Returns the update back when it must be delivered right away; the
    /// caller then delivers it and arms a drain tick after [`Self::interval`].
    /// Returns `None` when the update was queued behind a running cycle.
    pub fn enqueue(&mut self, mut update: PendingUpdate) -> Option<PendingUpdate> {
        if let Some(previous) = self.index.remove(&update.transfer_id) {
            self.queue.remove(&previous);
            if update.enqueued_at.is_none() {
                update.enqueued_at = Some(previous.enqueued_at);
            }
            tracing::debug!(transfer = %update.transfer_id, "coalesced queued update");
        }
        let enqueued_at = *update.enqueued_at.get_or_insert_with(Instant::now);

        if !self.drain_scheduled {
            self.drain_scheduled = true;
            return Some(update);
        }

        let key = QueueKey {
            rank: match update.priority {
                UpdatePriority::High => 0,
                UpdatePriority::Low => 1,
            },
            enqueued_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(update.transfer_id.clone(), key);
        self.queue.insert(key, update);
        None
    }

    /// Handle a drain tick: release the next update, or end the cycle when
    /// the queue is empty. The caller re-arms the tick only on `Some`.
    pub fn next_due(&mut self) -> Option<PendingUpdate> {
        match self.queue.pop_first() {
            Some((_, update)) => {
                self.index.remove(&update.transfer_id);
                Some(update)
            }
            None => {
                self.drain_scheduled = false;
                None
            }
        }
    }

    /// True while a drain cycle is running.
    pub fn is_draining(&self) -> bool {
        self.drain_scheduled
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The queued update for a transfer, if any.
    pub fn queued(&self, id: &TransferId) -> Option<&PendingUpdate> {
        self.index.get(id).and_then(|key| self.queue.get(key))
    }
}

impl Default for UpdateThrottler {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::types::{ProgressInfo, UpdateKind};

    fn progress(id: &str, percent: u8) -> PendingUpdate {
        PendingUpdate::new(
            TransferId::new("ns", id),
            1,
            id,
            UpdateKind::Progress(ProgressInfo {
                percent: Some(percent),
                ..ProgressInfo::default()
            }),
        )
    }

    fn succeeded(id: &str) -> PendingUpdate {
        PendingUpdate::new(
            TransferId::new("ns", id),
            1,
            id,
            UpdateKind::Succeeded { total_bytes: 1 },
        )
    }

    #[test]
    fn test_first_update_is_delivered_immediately() {
        let mut throttler = UpdateThrottler::default();
        let delivered = throttler.enqueue(progress("a", 1));
        assert!(delivered.is_some());
        assert!(delivered.unwrap().enqueued_at.is_some());
        assert!(throttler.is_draining());

        // Cycle running: the next one waits.
        assert!(throttler.enqueue(progress("b", 1)).is_none());
        assert_eq!(throttler.len(), 1);
    }

    #[test]
    fn test_cycle_ends_when_queue_empties() {
        let mut throttler = UpdateThrottler::default();
        throttler.enqueue(progress("a", 1));
        throttler.enqueue(progress("b", 1));

        assert_eq!(throttler.next_due().unwrap().transfer_id.id, "b");
        assert!(throttler.is_draining());
        assert!(throttler.next_due().is_none());
        assert!(!throttler.is_draining());

        // Idle again: immediate delivery.
        assert!(throttler.enqueue(progress("c", 1)).is_some());
    }

    #[test]
    fn test_at_most_one_queued_update_per_transfer() {
        let mut throttler = UpdateThrottler::default();
        throttler.enqueue(progress("warmup", 0));
        for percent in 0..20 {
            throttler.enqueue(progress("a", percent));
            throttler.enqueue(progress("b", percent));
        }
        assert_eq!(throttler.len(), 2);

        let queued = throttler.queued(&TransferId::new("ns", "a")).unwrap();
        assert!(matches!(
            &queued.kind,
            UpdateKind::Progress(info) if info.percent == Some(19)
        ));
    }

    #[test]
    fn test_replacement_keeps_original_timestamp() {
        let mut throttler = UpdateThrottler::default();
        throttler.enqueue(progress("warmup", 0));

        let t0 = Instant::now();
        throttler.enqueue(progress("x", 1).enqueued_at(t0));
        throttler.enqueue(progress("x", 2));

        let queued = throttler.queued(&TransferId::new("ns", "x")).unwrap();
        assert_eq!(queued.enqueued_at, Some(t0));
    }

    #[test]
    fn test_high_priority_drains_before_older_low_priority() {
        let mut throttler = UpdateThrottler::default();
        throttler.enqueue(progress("warmup", 0));

        let t0 = Instant::now();
        throttler.enqueue(progress("a", 5).enqueued_at(t0));
        throttler.enqueue(succeeded("b").enqueued_at(t0 + Duration::from_millis(10)));

        assert_eq!(throttler.next_due().unwrap().transfer_id.id, "b");
        assert_eq!(throttler.next_due().unwrap().transfer_id.id, "a");
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut throttler = UpdateThrottler::default();
        throttler.enqueue(progress("warmup", 0));

        let t0 = Instant::now();
        throttler.enqueue(progress("late", 1).enqueued_at(t0 + Duration::from_millis(20)));
        throttler.enqueue(progress("early", 1).enqueued_at(t0));
        throttler.enqueue(progress("middle", 1).enqueued_at(t0 + Duration::from_millis(10)));

        let order: Vec<_> = std::iter::from_fn(|| throttler.next_due())
            .map(|u| u.transfer_id.id)
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_replaced_update_can_change_priority() {
        let mut throttler = UpdateThrottler::default();
        throttler.enqueue(progress("warmup", 0));

        let t0 = Instant::now();
        throttler.enqueue(progress("other", 1).enqueued_at(t0));
        throttler.enqueue(progress("x", 50).enqueued_at(t0 + Duration::from_millis(5)));
        throttler.enqueue(succeeded("x"));

        let first = throttler.next_due().unwrap();
        assert_eq!(first.transfer_id.id, "x");
        assert_eq!(first.priority, UpdatePriority::High);
        assert_eq!(first.enqueued_at, Some(t0 + Duration::from_millis(5)));
    }
}
