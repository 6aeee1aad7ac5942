// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deferred task that brings interrupted transfers back.
//!
//! The task itself only asks the director to resume pending transfers; the
//! director applies the resumption budget.

use std::time::Duration;

use super::entries::PersistentEntryStore;
use crate::collaborators::{DeferredTaskScheduler, NetworkConstraint};

/// Delay before the deferred resumption task runs.
pub const DEFAULT_RESUMPTION_DELAY: Duration = Duration::from_secs(30);

pub struct ResumptionScheduler {
    scheduler: Box<dyn DeferredTaskScheduler>,
    delay: Duration,
    scheduled: Option<NetworkConstraint>,
}

impl ResumptionScheduler {
    pub fn new(scheduler: Box<dyn DeferredTaskScheduler>, delay: Duration) -> Self {
        Self {
            scheduler,
            delay,
            scheduled: None,
        }
    }

    /// Schedule the task if any entry is auto-resumable, replacing any
    /// earlier one; otherwise cancel whatever is outstanding.
    ///
    /// The task needs an unmetered network unless at least one resumable
    /// entry allows metered downloads.
    pub fn schedule_if_necessary(&mut self, entries: &PersistentEntryStore) {
        let resumable: Vec<_> = entries
            .all()
            .into_iter()
            .filter(|entry| entry.auto_resumable)
            .collect();

        if resumable.is_empty() {
            self.cancel();
            return;
        }

        let network = if resumable.iter().any(|entry| entry.metered_allowed) {
            NetworkConstraint::Any
        } else {
            NetworkConstraint::Unmetered
        };

        tracing::info!(
            resumable = resumable.len(),
            network = ?network,
            delay_secs = self.delay.as_secs(),
            "scheduling deferred resumption"
        );
        self.scheduler.schedule_one_shot(self.delay, network, true);
        self.scheduled = Some(network);
    }

    /// Idempotent.
    pub fn cancel(&mut self) {
        if self.scheduled.take().is_some() {
            tracing::debug!("cancelling deferred resumption");
        }
        self.scheduler.cancel();
    }

    /// Network constraint of the outstanding task, if one is scheduled.
    pub fn scheduled(&self) -> Option<NetworkConstraint> {
        self.scheduled
    }

    /// The task fired; it is no longer outstanding.
    pub fn on_fired(&mut self) {
        self.scheduled = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::types::{PersistedEntry, TransferId};
    use crate::storage::MemoryKeyValueStore;
    use crate::testing::{RecordingScheduler, SchedulerCall};
    use std::sync::Arc;

    fn entry(id: &str, auto_resumable: bool, metered_allowed: bool) -> PersistedEntry {
        PersistedEntry {
            id: TransferId::new("downloads", id),
            surface_handle: 1,
            off_the_record: false,
            metered_allowed,
            display_name: id.to_string(),
            auto_resumable,
            is_transient: false,
        }
    }

    fn store_with(entries: Vec<PersistedEntry>) -> PersistentEntryStore {
        let mut store = PersistentEntryStore::load(Arc::new(MemoryKeyValueStore::new())).unwrap();
        for e in entries {
            store.put(e).unwrap();
        }
        store
    }

    fn setup() -> (ResumptionScheduler, RecordingScheduler) {
        let recording = RecordingScheduler::new();
        let scheduler =
            ResumptionScheduler::new(Box::new(recording.clone()), Duration::from_secs(5));
        (scheduler, recording)
    }

    #[test]
    fn test_unmetered_required_by_default() {
        let (mut scheduler, recording) = setup();
        scheduler.schedule_if_necessary(&store_with(vec![entry("a", true, false)]));

        assert_eq!(
            recording.calls(),
            vec![SchedulerCall::Schedule {
                delay: Duration::from_secs(5),
                network: NetworkConstraint::Unmetered,
                replace: true,
            }]
        );
        assert_eq!(scheduler.scheduled(), Some(NetworkConstraint::Unmetered));
    }

    #[test]
    fn test_any_network_when_one_entry_allows_metered() {
        let (mut scheduler, recording) = setup();
        scheduler.schedule_if_necessary(&store_with(vec![
            entry("a", true, false),
            entry("b", true, true),
            // Not resumable; its metered flag does not count.
            entry("c", false, true),
        ]));

        assert!(matches!(
            recording.last(),
            Some(SchedulerCall::Schedule {
                network: NetworkConstraint::Any,
                ..
            })
        ));
    }

    #[test]
    fn test_metered_flag_of_non_resumable_entry_ignored() {
        let (mut scheduler, recording) = setup();
        scheduler.schedule_if_necessary(&store_with(vec![
            entry("a", true, false),
            entry("c", false, true),
        ]));

        assert!(matches!(
            recording.last(),
            Some(SchedulerCall::Schedule {
                network: NetworkConstraint::Unmetered,
                ..
            })
        ));
    }

    #[test]
    fn test_nothing_resumable_cancels() {
        let (mut scheduler, recording) = setup();
        scheduler.schedule_if_necessary(&store_with(vec![entry("a", true, false)]));
        scheduler.schedule_if_necessary(&store_with(vec![entry("a", false, false)]));

        assert_eq!(recording.last(), Some(SchedulerCall::Cancel));
        assert_eq!(scheduler.scheduled(), None);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut scheduler, _recording) = setup();
        scheduler.cancel();
        scheduler.cancel();
        assert_eq!(scheduler.scheduled(), None);
    }
}
