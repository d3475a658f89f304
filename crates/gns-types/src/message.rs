// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Outgoing messages produced by protocol tasks

use crate::traits::node_implementation::{ProtocolMessage, ProtocolTypes};

/// A set of messages addressed to a set of recipients.
///
/// One task step returns a batch (`Vec`) of these.
#[derive(Clone, Debug, PartialEq)]
pub struct MessagingTask<TYPES: ProtocolTypes> {
    /// who receives every message in `msgs`
    pub recipients: Vec<TYPES::NodeId>,
    /// the messages
    pub msgs: Vec<TYPES::Message>,
}

impl<TYPES: ProtocolTypes> MessagingTask<TYPES> {
    /// One message to one recipient
    #[must_use]
    pub fn new(recipient: TYPES::NodeId, msg: TYPES::Message) -> Self {
        Self {
            recipients: vec![recipient],
            msgs: vec![msg],
        }
    }

    /// One message to many recipients
    #[must_use]
    pub fn multicast(recipients: Vec<TYPES::NodeId>, msg: TYPES::Message) -> Self {
        Self {
            recipients,
            msgs: vec![msg],
        }
    }

    /// true if sending this would not put anything on the wire
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty() || self.msgs.is_empty()
    }

    /// Stamp `key` on every message that does not carry a key yet.
    ///
    /// Messages already keyed for another task are forwarded untouched.
    pub fn stamp_key(&mut self, key: &TYPES::Key) {
        for msg in &mut self.msgs {
            if msg.key().is_none() {
                msg.set_key(key.clone());
            }
        }
    }

    /// Drop every recipient for which `keep` returns false.
    pub fn retain_recipients(&mut self, mut keep: impl FnMut(&TYPES::NodeId) -> bool) {
        self.recipients.retain(|recipient| keep(recipient));
    }
}
