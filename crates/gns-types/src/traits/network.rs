// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Network access compatibility
//!
//! Contains the transport abstraction the executor hands outgoing messages to.
//! Reliable delivery is the transport's job; the executor never retries a
//! failed send by itself.

use async_trait::async_trait;
use snafu::Snafu;

use super::node_implementation::ProtocolTypes;
use crate::message::MessagingTask;

/// Error type for networking
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NetworkError {
    /// Could not deliver a message to a specified recipient
    CouldNotDeliver {
        /// description of the recipient
        recipient: String,
    },
    /// Attempted to deliver a message to an unknown node
    NoSuchNode {
        /// description of the recipient
        recipient: String,
    },
    /// Error sending output to consumer of the transport
    ChannelSend,
    /// The underlying connection has been shut down
    ShutDown,
}

/// Transport the executor sends outgoing messages through.
#[async_trait]
pub trait Messenger<TYPES: ProtocolTypes>: Send + Sync + 'static {
    /// The id of the node this messenger sends from
    fn my_id(&self) -> TYPES::NodeId;

    /// Send every message of `task` to every one of its recipients.
    ///
    /// # Errors
    /// Returns the first delivery failure; messages to other recipients may
    /// still have been sent.
    async fn send(&self, task: &MessagingTask<TYPES>) -> Result<(), NetworkError>;

    /// Shut the transport down
    fn stop(&self) {}
}
