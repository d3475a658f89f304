// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::{
    collections::{BTreeSet, HashSet},
    fmt::Debug,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use gns_types::{ProtocolEvent, ProtocolTypes};
use tracing::{debug, warn};

use crate::task::{ProtocolTask, TaskOutcome};

/// Tracks which members of an expected set answered, and fires once when
/// enough of them did.
#[derive(Debug)]
pub struct QuorumTracker<N: Ord> {
    /// nodes whose answers count
    expected: BTreeSet<N>,
    /// members that gave a valid answer
    heard: BTreeSet<N>,
    /// answers needed
    threshold: usize,
    /// one-shot guard for the completion step
    fired: AtomicBool,
}

impl<N: Clone + Debug + Ord> QuorumTracker<N> {
    /// Wait for `threshold` of `expected`.
    ///
    /// The threshold is clamped to `1..=expected.len()` (to 0 for an empty set).
    pub fn new(expected: impl IntoIterator<Item = N>, threshold: usize) -> Self {
        let expected: BTreeSet<N> = expected.into_iter().collect();
        let clamped = threshold.clamp(1.min(expected.len()), expected.len());
        if clamped != threshold {
            warn!(
                "Quorum threshold {} out of range for {} members, using {}",
                threshold,
                expected.len(),
                clamped
            );
        }
        Self {
            expected,
            heard: BTreeSet::new(),
            threshold: clamped,
            fired: AtomicBool::new(false),
        }
    }

    /// Wait for every member of `expected`
    pub fn all(expected: impl IntoIterator<Item = N>) -> Self {
        let expected: BTreeSet<N> = expected.into_iter().collect();
        let threshold = expected.len();
        Self::new(expected, threshold)
    }

    /// the expected set
    #[must_use]
    pub fn expected(&self) -> &BTreeSet<N> {
        &self.expected
    }

    /// members that gave a valid answer so far
    #[must_use]
    pub fn heard(&self) -> &BTreeSet<N> {
        &self.heard
    }

    /// members still to answer
    pub fn silent(&self) -> impl Iterator<Item = &N> {
        self.expected.difference(&self.heard)
    }

    /// answers needed
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// true if `node` is in the expected set
    #[must_use]
    pub fn is_member(&self, node: &N) -> bool {
        self.expected.contains(node)
    }

    /// true if `node` already gave a valid answer
    #[must_use]
    pub fn has_heard(&self, node: &N) -> bool {
        self.heard.contains(node)
    }

    /// Record a valid answer. Returns false for non-members and repeats.
    pub fn record(&mut self, node: N) -> bool {
        if !self.expected.contains(&node) {
            return false;
        }
        self.heard.insert(node)
    }

    /// true once enough members answered
    #[must_use]
    pub fn is_reached(&self) -> bool {
        self.heard.len() >= self.threshold
    }

    /// true once the completion step was claimed
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Claim the completion step. Succeeds at most once, and only once the
    /// threshold is reached.
    pub fn try_fire(&self) -> bool {
        self.is_reached()
            && self
                .fired
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

/// Protocol logic of a task that waits for a threshold of valid responses.
///
/// Wrapped in a [`QuorumTask`], which does the membership bookkeeping.
#[async_trait]
pub trait ThresholdHandler<TYPES: ProtocolTypes>: Send + 'static {
    /// see [`ProtocolTask::key`]
    fn key(&self) -> TYPES::Key;

    /// see [`ProtocolTask::refresh_key`]
    fn refresh_key(&mut self) -> TYPES::Key;

    /// Types of the responses this task counts
    fn event_types(&self) -> HashSet<TYPES::EventType>;

    /// see [`ProtocolTask::period`]
    fn period(&self) -> Option<Duration> {
        None
    }

    /// Send the requests
    async fn start(&mut self) -> Result<TaskOutcome<TYPES>>;

    /// Resend the requests. Recipients that already answered are filtered
    /// out of the result.
    async fn restart(&mut self) -> Result<TaskOutcome<TYPES>> {
        self.start().await
    }

    /// Whether `event`, from a member not yet heard from, counts toward the threshold
    async fn is_valid_response(&mut self, event: &ProtocolEvent<TYPES>) -> Result<bool>;

    /// Runs once, when the threshold is reached. The task is removed after its
    /// outcome was sent, whatever the returned status.
    async fn handle_threshold_event(&mut self) -> Result<TaskOutcome<TYPES>>;

    /// see [`ProtocolTask::name`]
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A task that completes once `threshold` members of an expected set gave a valid response
pub struct QuorumTask<TYPES: ProtocolTypes, H: ThresholdHandler<TYPES>> {
    /// the protocol logic
    handler: H,
    /// who answered
    tracker: QuorumTracker<TYPES::NodeId>,
}

impl<TYPES: ProtocolTypes, H: ThresholdHandler<TYPES>> QuorumTask<TYPES, H> {
    /// Wait for `threshold` of `expected`
    pub fn new(
        handler: H,
        expected: impl IntoIterator<Item = TYPES::NodeId>,
        threshold: usize,
    ) -> Self {
        Self {
            handler,
            tracker: QuorumTracker::new(expected, threshold),
        }
    }

    /// Wait for every member of `expected`
    pub fn all(handler: H, expected: impl IntoIterator<Item = TYPES::NodeId>) -> Self {
        Self {
            handler,
            tracker: QuorumTracker::all(expected),
        }
    }

    /// membership bookkeeping
    #[must_use]
    pub fn tracker(&self) -> &QuorumTracker<TYPES::NodeId> {
        &self.tracker
    }

    /// the protocol logic
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run the completion step if the threshold is reached and it has not run yet
    async fn fire_if_reached(&mut self) -> Result<Option<TaskOutcome<TYPES>>> {
        if !self.tracker.try_fire() {
            return Ok(None);
        }
        debug!(
            "{} reached threshold {} of {}",
            self.handler.key(),
            self.tracker.threshold(),
            self.tracker.expected().len()
        );
        let outcome = self.handler.handle_threshold_event().await?;
        Ok(Some(outcome.then_cancel()))
    }
}

#[async_trait]
impl<TYPES: ProtocolTypes, H: ThresholdHandler<TYPES>> ProtocolTask<TYPES>
    for QuorumTask<TYPES, H>
{
    fn key(&self) -> TYPES::Key {
        self.handler.key()
    }

    fn refresh_key(&mut self) -> TYPES::Key {
        self.handler.refresh_key()
    }

    fn event_types(&self) -> HashSet<TYPES::EventType> {
        self.handler.event_types()
    }

    fn period(&self) -> Option<Duration> {
        self.handler.period()
    }

    fn name(&self) -> &'static str {
        self.handler.name()
    }

    async fn start(&mut self) -> Result<TaskOutcome<TYPES>> {
        let mut outcome = self.handler.start().await?;
        // empty expected set: nothing to wait for
        if let Some(done) = self.fire_if_reached().await? {
            outcome.messages.extend(done.messages);
            outcome.follow_up = done.follow_up.or(outcome.follow_up);
            outcome.status = done.status;
        }
        Ok(outcome)
    }

    async fn restart(&mut self) -> Result<TaskOutcome<TYPES>> {
        if self.tracker.has_fired() {
            return Ok(TaskOutcome::cancel());
        }
        let mut outcome = self.handler.restart().await?;
        let tracker = &self.tracker;
        for mtask in &mut outcome.messages {
            mtask.retain_recipients(|node| !tracker.has_heard(node));
        }
        outcome.messages.retain(|mtask| !mtask.is_empty());
        Ok(outcome)
    }

    async fn handle_event(&mut self, event: &ProtocolEvent<TYPES>) -> Result<TaskOutcome<TYPES>> {
        if !self.handler.event_types().contains(&event.event_type) {
            debug!(
                "{} ignoring unexpected event type {:?}",
                self.handler.key(),
                event.event_type
            );
            return Ok(TaskOutcome::none());
        }
        if self.tracker.has_fired()
            || !self.tracker.is_member(&event.sender)
            || self.tracker.has_heard(&event.sender)
        {
            debug!(
                "{} not counting response from {}",
                self.handler.key(),
                event.sender
            );
            return Ok(TaskOutcome::none());
        }
        if !self.handler.is_valid_response(event).await? {
            debug!(
                "{} invalid response from {}",
                self.handler.key(),
                event.sender
            );
            return Ok(TaskOutcome::none());
        }
        self.tracker.record(event.sender.clone());
        Ok(self.fire_if_reached().await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::QuorumTracker;

    #[test]
    fn threshold_is_clamped_to_membership() {
        assert_eq!(QuorumTracker::new(['a', 'b', 'c'], 5).threshold(), 3);
        assert_eq!(QuorumTracker::new(['a', 'b', 'c'], 0).threshold(), 1);
        assert_eq!(QuorumTracker::<char>::new([], 2).threshold(), 0);
        assert_eq!(QuorumTracker::all(['a', 'b']).threshold(), 2);
    }

    #[test]
    fn fires_once_after_threshold() {
        let mut tracker = QuorumTracker::new(['a', 'b', 'c'], 2);
        assert!(tracker.record('a'));
        assert!(!tracker.try_fire());
        assert!(!tracker.record('a'));
        assert!(tracker.record('b'));
        assert!(tracker.try_fire());
        assert!(tracker.record('c'));
        assert!(!tracker.try_fire());
        assert!(tracker.has_fired());
    }

    #[test]
    fn ignores_non_members() {
        let mut tracker = QuorumTracker::new(['a', 'b'], 1);
        assert!(!tracker.record('z'));
        assert!(!tracker.is_reached());
        assert_eq!(tracker.silent().copied().collect::<Vec<_>>(), vec!['a', 'b']);
    }

    #[test]
    fn first_response_wins_with_threshold_one() {
        let mut tracker = QuorumTracker::new(['a', 'b', 'c'], 1);
        tracker.record('c');
        assert!(tracker.try_fire());
        assert_eq!(tracker.silent().copied().collect::<Vec<_>>(), vec!['a', 'b']);
    }
}
