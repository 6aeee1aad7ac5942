// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Single coordination task for the notification engine.
//!
//! Every input (transfer events, drain ticks, background-context callbacks,
//! the deferred resumption task, user actions) is posted to one unbounded
//! channel and handled in arrival order by the task that owns the
//! [`NotificationDirector`]. Nothing else touches director state.
//!
//! Timers are tokio tasks that post an event back to the same channel when
//! they expire.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::collaborators::{DeferredTaskScheduler, DrainTimer, NetworkConstraint};
use crate::notify::{DirectorSnapshot, NotificationDirector, TransferEvent, UserAction};

/// Everything the coordination task reacts to.
#[derive(Debug)]
pub enum CoordinatorEvent {
    Transfer(TransferEvent),
    /// The throttler's drain interval elapsed
    DrainTimerFired,
    ForegroundConnected,
    ForegroundDisconnected,
    /// The deferred resumption task ran
    ResumptionTaskFired,
    User(UserAction),
    ClearResumptionBudget,
    Snapshot {
        reply: oneshot::Sender<DirectorSnapshot>,
    },
    /// Stop the loop; answered once the last event has been handled
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Posting side of the coordination channel, shared by timers and hosts.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl EventSender {
    /// Post an event. Returns false when the coordinator has stopped.
    pub fn post(&self, event: CoordinatorEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(event = ?e.0, "coordinator stopped, dropping event");
                false
            }
        }
    }

    fn send(&self, event: CoordinatorEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("Notification coordinator is not running"))
    }
}

pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

impl EventReceiver {
    /// Next queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<CoordinatorEvent> {
        self.rx.try_recv().ok()
    }
}

/// Create the coordination channel. Collaborators that call back (timers,
/// the background-context host) take a clone of the sender before the
/// director is built.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Handle to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    sender: EventSender,
    status_rx: watch::Receiver<DirectorSnapshot>,
}

impl CoordinatorHandle {
    pub fn transfer_event(&self, event: TransferEvent) -> Result<()> {
        self.sender.send(CoordinatorEvent::Transfer(event))
    }

    pub fn user_action(&self, action: UserAction) -> Result<()> {
        self.sender.send(CoordinatorEvent::User(action))
    }

    pub fn clear_resumption_budget(&self) -> Result<()> {
        self.sender.send(CoordinatorEvent::ClearResumptionBudget)
    }

    /// Snapshot taken after every event queued before this call.
    pub async fn snapshot(&self) -> Result<DirectorSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender.send(CoordinatorEvent::Snapshot { reply: reply_tx })?;
        reply_rx
            .await
            .context("Coordinator stopped before answering snapshot request")
    }

    /// Last published snapshot, without a round trip.
    pub fn status(&self) -> DirectorSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DirectorSnapshot> {
        self.status_rx.clone()
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender.send(CoordinatorEvent::Shutdown { reply: reply_tx })?;
        reply_rx
            .await
            .context("Coordinator stopped before acknowledging shutdown")
    }
}

/// Run the director on its own task. Cold-start reconciliation happens
/// before the first queued event is handled.
pub fn spawn(
    mut director: NotificationDirector,
    sender: EventSender,
    receiver: EventReceiver,
) -> (CoordinatorHandle, JoinHandle<()>) {
    director.start();
    let (status_tx, status_rx) = watch::channel(director.snapshot());

    let task = tokio::spawn(run(director, receiver, status_tx));
    (CoordinatorHandle { sender, status_rx }, task)
}

async fn run(
    mut director: NotificationDirector,
    mut receiver: EventReceiver,
    status_tx: watch::Sender<DirectorSnapshot>,
) {
    tracing::info!("notification coordinator started");

    while let Some(event) = receiver.rx.recv().await {
        match event {
            CoordinatorEvent::Transfer(event) => director.on_transfer_event(event),
            CoordinatorEvent::DrainTimerFired => director.on_drain_timer(),
            CoordinatorEvent::ForegroundConnected => director.on_foreground_connected(),
            CoordinatorEvent::ForegroundDisconnected => director.on_foreground_disconnected(),
            CoordinatorEvent::ResumptionTaskFired => director.on_resumption_task_fired(),
            CoordinatorEvent::User(action) => director.on_user_action(action),
            CoordinatorEvent::ClearResumptionBudget => director.clear_resumption_budget(),
            CoordinatorEvent::Snapshot { reply } => {
                let _ = reply.send(director.snapshot());
                continue;
            }
            CoordinatorEvent::Shutdown { reply } => {
                tracing::info!("notification coordinator stopped");
                let _ = reply.send(());
                return;
            }
        }
        status_tx.send_replace(director.snapshot());
    }

    tracing::info!("all senders dropped, notification coordinator stopped");
}

/// Drain timer backed by a sleeping tokio task.
pub struct TokioDrainTimer {
    runtime: Handle,
    sender: EventSender,
}

impl TokioDrainTimer {
    pub fn new(sender: EventSender) -> Result<Self> {
        let runtime = Handle::try_current().context("Drain timer requires a tokio runtime")?;
        Ok(Self { runtime, sender })
    }
}

impl DrainTimer for TokioDrainTimer {
    fn arm(&mut self, after: Duration) {
        let deadline = Instant::now() + after;
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sender.post(CoordinatorEvent::DrainTimerFired);
        });
    }
}

/// One-shot resumption task backed by a sleeping tokio task.
///
/// The host has no network monitor here, so the network requirement is
/// logged and considered satisfied.
pub struct TokioTaskScheduler {
    runtime: Handle,
    sender: EventSender,
    pending: Option<AbortHandle>,
}

impl TokioTaskScheduler {
    pub fn new(sender: EventSender) -> Result<Self> {
        let runtime = Handle::try_current().context("Task scheduler requires a tokio runtime")?;
        Ok(Self {
            runtime,
            sender,
            pending: None,
        })
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl DeferredTaskScheduler for TokioTaskScheduler {
    fn schedule_one_shot(&mut self, delay: Duration, network: NetworkConstraint, replace: bool) {
        if self.is_scheduled() {
            if !replace {
                return;
            }
            self.cancel();
        }

        tracing::debug!(delay_ms = delay.as_millis() as u64, network = ?network, "resumption task armed");
        let deadline = Instant::now() + delay;
        let sender = self.sender.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sender.post(CoordinatorEvent::ResumptionTaskFired);
        });
        self.pending = Some(task.abort_handle());
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
