// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::{collections::HashSet, fmt, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use gns_types::{MessagingTask, ProtocolEvent, ProtocolTypes};

/// Whether a task stays registered after the step that produced an outcome
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskStatus {
    /// keep the task registered
    #[default]
    Continue,
    /// send the outcome's messages, spawn its follow-up, then remove the task
    Cancel,
}

/// What one step of a task produced
pub struct TaskOutcome<TYPES: ProtocolTypes> {
    /// messages to hand to the transport, stamped with the routing key first
    pub messages: Vec<MessagingTask<TYPES>>,
    /// a new task to spawn, chaining the next protocol step
    pub follow_up: Option<Box<dyn ProtocolTask<TYPES>>>,
    /// whether the producing task stays registered
    pub status: TaskStatus,
}

impl<TYPES: ProtocolTypes> Default for TaskOutcome<TYPES> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            follow_up: None,
            status: TaskStatus::Continue,
        }
    }
}

impl<TYPES: ProtocolTypes> fmt::Debug for TaskOutcome<TYPES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOutcome")
            .field("messages", &self.messages)
            .field("follow_up", &self.follow_up.as_ref().map(|task| task.name()))
            .field("status", &self.status)
            .finish()
    }
}

impl<TYPES: ProtocolTypes> TaskOutcome<TYPES> {
    /// Nothing to send, keep waiting
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Send `messages`, keep waiting
    #[must_use]
    pub fn send(messages: Vec<MessagingTask<TYPES>>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Nothing to send, remove the task
    #[must_use]
    pub fn cancel() -> Self {
        Self {
            status: TaskStatus::Cancel,
            ..Self::default()
        }
    }

    /// Add one messaging task
    #[must_use]
    pub fn with_message(mut self, message: MessagingTask<TYPES>) -> Self {
        self.messages.push(message);
        self
    }

    /// Spawn `task` once this outcome has been sent
    #[must_use]
    pub fn with_follow_up(mut self, task: impl ProtocolTask<TYPES>) -> Self {
        self.follow_up = Some(Box::new(task));
        self
    }

    /// Remove the producing task after this outcome has been sent
    #[must_use]
    pub fn then_cancel(mut self) -> Self {
        self.status = TaskStatus::Cancel;
        self
    }

    /// true if the producing task is to be removed
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        self.status == TaskStatus::Cancel
    }
}

/// One step of a message driven protocol.
///
/// A task is spawned on a `ProtocolExecutor`, which calls `start` once and
/// then `handle_event` for every event carrying the task's key. A task whose
/// `period` is set is also restarted on a fixed-delay timer until it cancels.
/// Nothing here may block on the network: waiting for replies is state kept
/// between invocations.
#[async_trait]
pub trait ProtocolTask<TYPES: ProtocolTypes>: Send + 'static {
    /// The correlation key this task is registered under
    fn key(&self) -> TYPES::Key;

    /// Pick a different key, remember it, and return it.
    ///
    /// Called by the executor for as long as the current key collides with a
    /// registered task.
    fn refresh_key(&mut self) -> TYPES::Key;

    /// Event types this task expects
    fn event_types(&self) -> HashSet<TYPES::EventType>;

    /// Called exactly once, right after the task was registered
    async fn start(&mut self) -> Result<TaskOutcome<TYPES>>;

    /// Called once per event routed to this task
    async fn handle_event(&mut self, event: &ProtocolEvent<TYPES>) -> Result<TaskOutcome<TYPES>>;

    /// Called on every periodic tick after `start`
    async fn restart(&mut self) -> Result<TaskOutcome<TYPES>> {
        self.start().await
    }

    /// Restart period; `Some` makes the executor schedule the task on spawn
    fn period(&self) -> Option<Duration> {
        None
    }

    /// Name used in logs
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
