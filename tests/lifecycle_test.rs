// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end lifecycle tests: a director wired to recording doubles, driven
//! through whole transfer lifetimes and process restarts.

use std::sync::Arc;
use std::time::Duration;

use dlnotify::collaborators::NetworkConstraint;
use dlnotify::notify::budget::BUDGET_KEY;
use dlnotify::notify::{
    Collaborators, DirectorSettings, ForegroundPhase, NotificationDirector, PauseCause,
    ProgressInfo, TransferEvent, TransferId, TransferStatus, UserAction,
};
use dlnotify::storage::{FileKeyValueStore, KeyValueStore};
use dlnotify::testing::{
    DirectorHarness, HostCall, ManualTimer, RecordingEngine, RecordingHost, RecordingScheduler,
    RecordingSurface, SchedulerCall, SurfaceCall,
};
use tempfile::TempDir;

fn id(name: &str) -> TransferId {
    TransferId::new("downloads", name)
}

fn progress(name: &str, percent: u64) -> TransferEvent {
    TransferEvent::new(
        id(name),
        format!("{}.zip", name),
        TransferStatus::InProgress(ProgressInfo::from_bytes(percent * 10, Some(1000))),
    )
}

fn succeeded(name: &str) -> TransferEvent {
    TransferEvent::new(
        id(name),
        format!("{}.zip", name),
        TransferStatus::Succeeded { total_bytes: 1000 },
    )
}

// =============================================================================
// Scenario A / B: a single transfer from start to finish
// =============================================================================

#[test]
fn test_transfer_start_binds_and_pins() {
    let mut h = DirectorHarness::new();

    h.director.on_transfer_event(progress("x", 0));
    h.drain();

    let entry = h.director.entries().get(&id("x")).expect("entry persisted");
    assert!(entry.auto_resumable);
    assert_eq!(h.host.calls(), vec![HostCall::Bind]);
    assert_eq!(h.director.snapshot().phase, ForegroundPhase::Binding);

    h.director.on_foreground_connected();

    let handle = h.handle_of(&id("x"));
    let state = h.director.foreground_state();
    assert!(state.bound && state.connected);
    assert_eq!(state.pinned_surface_handle, Some(handle));
    assert_eq!(h.host.calls(), vec![HostCall::Bind, HostCall::AnchorTo(handle)]);
}

#[test]
fn test_transfer_success_unbinds_and_relaunches_final_content() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("x", 0));
    h.director.on_foreground_connected();
    let handle = h.handle_of(&id("x"));

    h.director.on_transfer_event(succeeded("x"));
    h.drain();

    assert!(h.director.entries().get(&id("x")).is_none());
    assert_eq!(h.host.calls().last(), Some(&HostCall::Unbind));
    assert_eq!(h.director.snapshot().phase, ForegroundPhase::Unbinding);

    h.surface.clear();
    h.director.on_foreground_disconnected();

    let state = h.director.foreground_state();
    assert!(!state.bound);
    assert_eq!(state.pinned_surface_handle, None);

    // The success notification is re-pushed so it outlives the context.
    let calls = h.surface.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        SurfaceCall::Push(pushed, content) => {
            assert_eq!(*pushed, handle);
            assert!(content.text.starts_with("Download complete"));
            assert!(!content.ongoing);
        }
        other => panic!("unexpected surface call {:?}", other),
    }
}

#[test]
fn test_user_cancel_skips_final_relaunch() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("x", 10));
    h.director.on_foreground_connected();
    let handle = h.handle_of(&id("x"));

    h.director.on_user_action(UserAction::Cancel(id("x")));
    h.drain();
    assert!(h.surface.calls().contains(&SurfaceCall::Cancel(handle)));
    assert_eq!(h.host.calls().last(), Some(&HostCall::Unbind));

    h.surface.clear();
    h.director.on_foreground_disconnected();
    assert!(h.surface.calls().is_empty());
    assert!(!h.director.foreground_state().bound);
}

// =============================================================================
// Scenario C / D: restarts and budgeted resumption
// =============================================================================

#[test]
fn test_restart_shows_paused_and_schedules_resumption() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("x", 40));
    let handle = h.handle_of(&id("x"));

    let mut h = h.restart();
    h.director.start();
    h.drain();

    let pushes = h.surface.pushes_for(handle);
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].text, "Paused");
    assert!(!pushes[0].ongoing);

    // No network activity and no background context on a cold start.
    assert!(h.engine.calls().is_empty());
    assert!(h.host.calls().is_empty());
    assert_eq!(
        h.scheduler.last(),
        Some(SchedulerCall::Schedule {
            delay: Duration::from_secs(30),
            network: NetworkConstraint::Unmetered,
            replace: true,
        })
    );
    assert_eq!(h.director.snapshot().resumption_budget, 5);
}

#[test]
fn test_resumption_with_exhausted_budget_does_nothing() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("x", 40));

    h.storage.put(BUDGET_KEY, "0").unwrap();
    let mut h = h.restart();
    h.director.start();
    h.drain();
    h.host.clear();

    h.director.on_resumption_task_fired();
    h.drain();

    assert!(h.engine.resumed().is_empty());
    assert_eq!(h.director.snapshot().resumption_budget, 0);
    assert_eq!(h.host.count(&HostCall::Bind), 0);
}

#[test]
fn test_resumption_resumes_auto_resumable_entries_once() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("auto", 40));
    h.director.on_transfer_event(TransferEvent::new(
        id("manual"),
        "manual.zip",
        TransferStatus::Paused {
            cause: PauseCause::ByUser,
            resumable: true,
        },
    ));

    let mut h = h.restart();
    h.director.start();
    h.drain();

    h.director.on_resumption_task_fired();
    assert_eq!(h.engine.resumed(), vec![id("auto")]);
    assert!(h.director.is_in_flight(&id("auto")));
    assert_eq!(h.director.snapshot().resumption_budget, 4);
    assert_eq!(h.scheduler.last(), Some(SchedulerCall::Cancel));

    // "Resuming" is active: the context binds once it is delivered.
    h.drain();
    assert_eq!(h.host.count(&HostCall::Bind), 1);
    let last = h
        .surface
        .pushes_for(h.handle_of(&id("auto")))
        .pop()
        .unwrap();
    assert_eq!(last.text, "Resuming...");

    // A second pass does not resume what is already in flight.
    h.director.resume_all_pending();
    assert_eq!(h.engine.resumed(), vec![id("auto")]);
}

#[test]
fn test_budget_only_decreases_until_cleared() {
    let mut h = DirectorHarness::new();
    let mut previous = h.director.snapshot().resumption_budget;
    for _ in 0..8 {
        h.director.resume_all_pending();
        let now = h.director.snapshot().resumption_budget;
        assert!(now <= previous);
        previous = now;
    }
    assert_eq!(previous, 0);

    // Transfers finishing do not restore it.
    h.director.on_transfer_event(progress("x", 1));
    h.director.on_transfer_event(succeeded("x"));
    assert_eq!(h.director.snapshot().resumption_budget, 0);

    h.director.on_user_action(UserAction::RetryAll);
    assert_eq!(h.director.snapshot().resumption_budget, 4);
}

#[test]
fn test_off_the_record_entries_dropped_on_restart() {
    let mut h = DirectorHarness::new();
    h.director
        .on_transfer_event(progress("private", 10).off_the_record(true));
    h.director.on_transfer_event(progress("public", 10));
    let private_handle = h.handle_of(&id("private"));

    let mut h = h.restart();
    h.director.start();
    h.drain();

    assert!(h.director.entries().get(&id("private")).is_none());
    assert!(h.director.entries().get(&id("public")).is_some());
    assert!(h.surface.calls().contains(&SurfaceCall::Cancel(private_handle)));
    assert!(h.surface.pushes_for(private_handle).is_empty());
}

#[test]
fn test_metered_entry_relaxes_network_constraint() {
    let mut h = DirectorHarness::new();
    h.director
        .on_transfer_event(progress("x", 10).metered_allowed(true));
    h.director.on_transfer_event(
        TransferEvent::new(
            id("x"),
            "x.zip",
            TransferStatus::Paused {
                cause: PauseCause::WaitingForNetwork,
                resumable: true,
            },
        )
        .metered_allowed(true),
    );

    assert!(!h.director.is_in_flight(&id("x")));
    assert_eq!(
        h.director.snapshot().resumption_scheduled,
        Some(NetworkConstraint::Any)
    );
}

#[test]
fn test_fire_queued_before_new_transfer_does_not_resume() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("x", 40));

    let mut h = h.restart();
    h.director.start();
    h.drain();
    assert!(h.director.snapshot().resumption_scheduled.is_some());

    // A new transfer cancels the task after its fire was already posted.
    h.director.on_transfer_event(progress("y", 0));
    assert_eq!(h.scheduler.last(), Some(SchedulerCall::Cancel));
    h.director.on_resumption_task_fired();
    h.drain();

    assert!(h.engine.resumed().is_empty());
    assert!(!h.director.is_in_flight(&id("x")));
    assert_eq!(h.director.snapshot().resumption_budget, 5);

    // Once y finishes the task is scheduled again and a real fire resumes x.
    h.director.on_transfer_event(succeeded("y"));
    assert!(h.director.snapshot().resumption_scheduled.is_some());
    h.director.on_resumption_task_fired();
    assert_eq!(h.engine.resumed(), vec![id("x")]);
    assert_eq!(h.director.snapshot().resumption_budget, 4);
}

// =============================================================================
// Background-context lifecycle across several transfers
// =============================================================================

#[test]
fn test_transfer_finished_while_binding_is_not_pinned() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("a", 10));
    h.director.on_transfer_event(progress("b", 10));
    h.director.on_transfer_event(succeeded("a"));
    h.drain();
    assert_eq!(h.director.snapshot().phase, ForegroundPhase::Binding);

    let a = h.handle_of(&id("a"));
    let b = h.handle_of(&id("b"));
    let pushes_before = h.surface.pushes_for(a).len();
    h.director.on_foreground_connected();

    // b anchors directly; a is never pinned, so nothing detaches or relaunches it.
    assert_eq!(h.host.calls(), vec![HostCall::Bind, HostCall::AnchorTo(b)]);
    assert_eq!(h.director.foreground_state().pinned_surface_handle, Some(b));
    assert_eq!(h.surface.pushes_for(a).len(), pushes_before);
    let last = h.surface.pushes_for(a).pop().unwrap();
    assert!(last.text.starts_with("Download complete"));

    h.director.on_transfer_event(succeeded("b"));
    h.drain();
    h.director.on_foreground_disconnected();
    assert!(!h.director.foreground_state().bound);
    assert_eq!(h.surface.pushes_for(a).len(), pushes_before);
}

#[test]
fn test_pin_moves_to_remaining_active_transfer() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("a", 10));
    h.director.on_transfer_event(progress("b", 10));
    h.drain();
    h.director.on_foreground_connected();

    let a = h.handle_of(&id("a"));
    let b = h.handle_of(&id("b"));
    assert_eq!(h.director.foreground_state().pinned_surface_handle, Some(a));

    h.director.on_transfer_event(succeeded("a"));
    h.drain();

    // Still bound, now anchored to the other transfer.
    let state = h.director.foreground_state();
    assert!(state.bound);
    assert_eq!(state.pinned_surface_handle, Some(b));
    assert_eq!(h.host.count(&HostCall::Unbind), 0);

    h.director.on_transfer_event(succeeded("b"));
    h.drain();
    h.director.on_foreground_disconnected();
    assert!(!h.director.foreground_state().bound);
    assert!(h.director.snapshot().in_flight.is_empty());
}

#[test]
fn test_detached_surface_relaunched_unless_preserved() {
    for preserving in [false, true] {
        let mut h = if preserving {
            DirectorHarness::preserving_detached()
        } else {
            DirectorHarness::new()
        };
        h.director.on_transfer_event(progress("a", 10));
        h.director.on_transfer_event(progress("b", 10));
        h.drain();
        h.director.on_foreground_connected();
        let a = h.handle_of(&id("a"));

        h.director.on_transfer_event(succeeded("a"));
        h.drain();

        let detached = h.host.count(&HostCall::Detach);
        if preserving {
            assert_eq!(detached, 0);
        } else {
            assert_eq!(detached, 1);
            let last = h.surface.pushes_for(a).pop().unwrap();
            assert!(last.text.starts_with("Download complete"));
        }
    }
}

#[test]
fn test_unexpected_disconnect_rebinds_on_next_update() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("x", 10));
    h.director.on_foreground_connected();

    h.director.on_foreground_disconnected();
    let state = h.director.foreground_state();
    assert!(!state.bound && !state.connected);

    h.director.on_transfer_event(progress("x", 20));
    h.drain();
    assert_eq!(h.host.count(&HostCall::Bind), 2);
    assert_eq!(h.director.snapshot().phase, ForegroundPhase::Binding);
}

#[test]
fn test_transfer_started_while_unbinding_rebinds() {
    let mut h = DirectorHarness::new();
    h.director.on_transfer_event(progress("a", 10));
    h.director.on_foreground_connected();
    h.director.on_transfer_event(succeeded("a"));
    h.drain();
    assert_eq!(h.director.snapshot().phase, ForegroundPhase::Unbinding);

    h.director.on_transfer_event(progress("b", 10));
    h.drain();
    h.director.on_foreground_disconnected();

    assert_eq!(h.host.count(&HostCall::Bind), 2);
    h.director.on_foreground_connected();
    assert_eq!(
        h.director.foreground_state().pinned_surface_handle,
        Some(h.handle_of(&id("b")))
    );
}

// =============================================================================
// File-backed storage across a restart
// =============================================================================

#[test]
fn test_file_backed_restart_preserves_entries_and_budget() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let build = |surface: RecordingSurface, engine: RecordingEngine| {
        let storage = FileKeyValueStore::open(&path).unwrap();
        NotificationDirector::new(
            Arc::new(storage),
            DirectorSettings::default(),
            Collaborators {
                surface: Box::new(surface),
                host: Box::new(RecordingHost::new()),
                engine: Box::new(engine),
                scheduler: Box::new(RecordingScheduler::new()),
                timer: Box::new(ManualTimer::new()),
            },
        )
        .unwrap()
    };

    {
        let mut director = build(RecordingSurface::new(), RecordingEngine::new());
        director.on_transfer_event(progress("x", 50));
        director.resume_all_pending();
    }

    let surface = RecordingSurface::new();
    let engine = RecordingEngine::new();
    let mut director = build(surface.clone(), engine.clone());
    director.start();

    let entry = director.entries().get(&id("x")).unwrap();
    assert_eq!(entry.display_name, "x.zip");
    assert_eq!(director.snapshot().resumption_budget, 4);
    assert_eq!(
        surface.pushes_for(entry.surface_handle)[0].text,
        "Paused"
    );
    assert!(engine.calls().is_empty());
}
