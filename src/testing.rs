// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Recording collaborator doubles.
//!
//! Each double is cheap to clone and every clone shares one call log, so a
//! test keeps a clone, boxes the other into the engine, and inspects what
//! the engine did. None of them call back: tests deliver connect/disconnect
//! and timer ticks by hand.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::collaborators::{
    DeferredTaskScheduler, DownloadEngine, DrainTimer, ForegroundHost, NetworkConstraint,
    NotificationSurface,
};
use crate::locks::{resilient_read, resilient_write};
use crate::notify::director::{Collaborators, DirectorSettings, NotificationDirector};
use crate::notify::types::{RenderedContent, SurfaceHandle, TransferId};
use crate::storage::MemoryKeyValueStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Push(SurfaceHandle, RenderedContent),
    Cancel(SurfaceHandle),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<RwLock<Vec<SurfaceCall>>>,
    preserves_detached: bool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface whose detached notifications survive anchor switches.
    pub fn preserving_detached() -> Self {
        Self {
            preserves_detached: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        resilient_read(&self.calls).clone()
    }

    /// Content pushed to `handle`, oldest first.
    pub fn pushes_for(&self, handle: SurfaceHandle) -> Vec<RenderedContent> {
        resilient_read(&self.calls)
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Push(h, content) if *h == handle => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        resilient_write(&self.calls).clear();
    }
}

impl NotificationSurface for RecordingSurface {
    fn push(&mut self, handle: SurfaceHandle, content: &RenderedContent) {
        resilient_write(&self.calls).push(SurfaceCall::Push(handle, content.clone()));
    }

    fn cancel(&mut self, handle: SurfaceHandle) {
        resilient_write(&self.calls).push(SurfaceCall::Cancel(handle));
    }

    fn preserves_detached_surface(&self) -> bool {
        self.preserves_detached
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Bind,
    AnchorTo(SurfaceHandle),
    Detach,
    Unbind,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    calls: Arc<RwLock<Vec<HostCall>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        resilient_read(&self.calls).clone()
    }

    pub fn count(&self, call: &HostCall) -> usize {
        resilient_read(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        resilient_write(&self.calls).clear();
    }
}

impl ForegroundHost for RecordingHost {
    fn bind_request(&mut self) {
        resilient_write(&self.calls).push(HostCall::Bind);
    }

    fn anchor_to(&mut self, handle: SurfaceHandle, _content: &RenderedContent) {
        resilient_write(&self.calls).push(HostCall::AnchorTo(handle));
    }

    fn detach_anchor(&mut self) {
        resilient_write(&self.calls).push(HostCall::Detach);
    }

    fn unbind_request(&mut self) {
        resilient_write(&self.calls).push(HostCall::Unbind);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Resume(TransferId),
    Pause(TransferId),
    Cancel(TransferId),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    calls: Arc<RwLock<Vec<EngineCall>>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        resilient_read(&self.calls).clone()
    }

    pub fn resumed(&self) -> Vec<TransferId> {
        resilient_read(&self.calls)
            .iter()
            .filter_map(|call| match call {
                EngineCall::Resume(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl DownloadEngine for RecordingEngine {
    fn resume(&mut self, id: &TransferId) {
        resilient_write(&self.calls).push(EngineCall::Resume(id.clone()));
    }

    fn pause(&mut self, id: &TransferId) {
        resilient_write(&self.calls).push(EngineCall::Pause(id.clone()));
    }

    fn cancel(&mut self, id: &TransferId) {
        resilient_write(&self.calls).push(EngineCall::Cancel(id.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    Schedule {
        delay: Duration,
        network: NetworkConstraint,
        replace: bool,
    },
    Cancel,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    calls: Arc<RwLock<Vec<SchedulerCall>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SchedulerCall> {
        resilient_read(&self.calls).clone()
    }

    pub fn last(&self) -> Option<SchedulerCall> {
        resilient_read(&self.calls).last().cloned()
    }

    pub fn clear(&self) {
        resilient_write(&self.calls).clear();
    }
}

impl DeferredTaskScheduler for RecordingScheduler {
    fn schedule_one_shot(&mut self, delay: Duration, network: NetworkConstraint, replace: bool) {
        resilient_write(&self.calls).push(SchedulerCall::Schedule {
            delay,
            network,
            replace,
        });
    }

    fn cancel(&mut self) {
        resilient_write(&self.calls).push(SchedulerCall::Cancel);
    }
}

/// A director wired to recording doubles over shared in-memory storage.
pub struct DirectorHarness {
    pub director: NotificationDirector,
    pub storage: MemoryKeyValueStore,
    pub surface: RecordingSurface,
    pub host: RecordingHost,
    pub engine: RecordingEngine,
    pub scheduler: RecordingScheduler,
    pub timer: ManualTimer,
    settings: DirectorSettings,
}

impl DirectorHarness {
    pub fn new() -> Self {
        Self::with_parts(
            MemoryKeyValueStore::new(),
            RecordingSurface::new(),
            DirectorSettings::default(),
        )
    }

    /// Same as [`Self::new`] with a surface that keeps detached notifications.
    pub fn preserving_detached() -> Self {
        Self::with_parts(
            MemoryKeyValueStore::new(),
            RecordingSurface::preserving_detached(),
            DirectorSettings::default(),
        )
    }

    pub fn with_parts(
        storage: MemoryKeyValueStore,
        surface: RecordingSurface,
        settings: DirectorSettings,
    ) -> Self {
        let host = RecordingHost::new();
        let engine = RecordingEngine::new();
        let scheduler = RecordingScheduler::new();
        let timer = ManualTimer::new();

        let director = NotificationDirector::new(
            Arc::new(storage.clone()),
            settings.clone(),
            Collaborators {
                surface: Box::new(surface.clone()),
                host: Box::new(host.clone()),
                engine: Box::new(engine.clone()),
                scheduler: Box::new(scheduler.clone()),
                timer: Box::new(timer.clone()),
            },
        )
        .expect("director over in-memory storage");

        Self {
            director,
            storage,
            surface,
            host,
            engine,
            scheduler,
            timer,
            settings,
        }
    }

    /// Simulate a process restart: a fresh director and fresh doubles over
    /// the same storage.
    pub fn restart(self) -> Self {
        let surface = if self.surface.preserves_detached_surface() {
            RecordingSurface::preserving_detached()
        } else {
            RecordingSurface::new()
        };
        Self::with_parts(self.storage, surface, self.settings)
    }

    /// Fire drain ticks until the current cycle ends.
    pub fn drain(&mut self) {
        for _ in 0..10_000 {
            if !self.director.is_draining() {
                return;
            }
            self.director.on_drain_timer();
        }
        panic!("drain cycle did not end");
    }

    pub fn handle_of(&self, id: &TransferId) -> SurfaceHandle {
        self.director
            .surface_handle(id)
            .expect("transfer has a surface handle")
    }
}

impl Default for DirectorHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Records drain-tick requests; the test fires ticks itself.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    arms: Arc<RwLock<Vec<Duration>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Vec<Duration> {
        resilient_read(&self.arms).clone()
    }
}

impl DrainTimer for ManualTimer {
    fn arm(&mut self, after: Duration) {
        resilient_write(&self.arms).push(after);
    }
}
