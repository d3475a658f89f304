// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Incoming events handed to the executor

use crate::traits::node_implementation::{ProtocolMessage, ProtocolTypes};

/// A decoded incoming message, tagged with the type and key used to route it.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolEvent<TYPES: ProtocolTypes> {
    /// selects the default handler, if one is registered
    pub event_type: TYPES::EventType,
    /// selects the keyed task otherwise
    pub key: Option<TYPES::Key>,
    /// node the message came from
    pub sender: TYPES::NodeId,
    /// the decoded message
    pub payload: TYPES::Message,
}

impl<TYPES: ProtocolTypes> ProtocolEvent<TYPES> {
    /// Build an event from a decoded message, taking type and key from the message itself.
    #[must_use]
    pub fn from_message(sender: TYPES::NodeId, payload: TYPES::Message) -> Self {
        Self {
            event_type: payload.event_type(),
            key: payload.key().cloned(),
            sender,
            payload,
        }
    }
}
