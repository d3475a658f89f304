// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Composite trait for the types a protocol executor instance is built over
//!
//! This module defines the [`ProtocolTypes`] trait, which bundles the node
//! identifier, event type, correlation key and wire message of one executor
//! deployment, so that the rest of the code only carries a single `TYPES`
//! parameter.

use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

/// Trait with all the type definitions that are used in the current executor.
///
/// It is implemented once per deployment (for example once for the
/// reconfiguration packets of the name service) on a zero-sized marker type.
pub trait ProtocolTypes:
    Clone + Copy + Debug + Default + PartialEq + Eq + Hash + Send + Sync + 'static
{
    /// Identifier of a node; recipients of outgoing messages and senders of events.
    type NodeId: Clone + Debug + Display + PartialEq + Eq + Hash + Ord + Send + Sync + 'static;

    /// The kind of an incoming event, used to find default handlers.
    type EventType: Clone + Copy + Debug + PartialEq + Eq + Hash + Send + Sync + 'static;

    /// The correlation key routing a response back to the task that waits for it.
    type Key: Clone + Debug + Display + PartialEq + Eq + Hash + Send + Sync + 'static;

    /// The decoded message carried by events and produced by tasks.
    type Message: ProtocolMessage<Self>;
}

/// A message that can be routed by the executor.
///
/// Every message exposes its event type and its correlation key so the
/// executor can stamp the key of the producing task on the way out and route
/// the reply on the way back in.
pub trait ProtocolMessage<TYPES: ProtocolTypes>:
    Clone + Debug + PartialEq + Send + Sync + 'static
{
    /// The event type an incoming copy of this message is dispatched as
    fn event_type(&self) -> TYPES::EventType;

    /// The correlation key, if one was stamped
    fn key(&self) -> Option<&TYPES::Key>;

    /// Stamp the correlation key
    fn set_key(&mut self, key: TYPES::Key);
}
