// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use gns_types::{ProtocolMessage, ProtocolTypes};
use serde::{Deserialize, Serialize};

/// node identifier used in tests
pub type TestNodeId = u64;

/// Event types of the test protocols
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestEventType {
    /// generic request, answered by a `Response`
    Request,
    /// generic response
    Response,
    /// ask a replica to stop the current epoch
    StopEpoch,
    /// replica stopped the epoch
    AckStopEpoch,
    /// ask a replica to start the next epoch
    StartEpoch,
    /// replica started the epoch
    AckStartEpoch,
}

/// Wire message of the test protocols
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    /// dispatch type
    pub event_type: TestEventType,
    /// correlation key, stamped by the executor
    pub key: Option<String>,
    /// epoch the message is about
    pub epoch: u64,
    /// free-form content
    pub body: String,
}

impl TestMessage {
    /// unkeyed message
    #[must_use]
    pub fn new(event_type: TestEventType, epoch: u64, body: impl Into<String>) -> Self {
        Self {
            event_type,
            key: None,
            epoch,
            body: body.into(),
        }
    }

    /// message already keyed
    #[must_use]
    pub fn keyed(
        event_type: TestEventType,
        key: impl Into<String>,
        epoch: u64,
        body: impl Into<String>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(event_type, epoch, body)
        }
    }
}

impl ProtocolMessage<TestTypes> for TestMessage {
    fn event_type(&self) -> TestEventType {
        self.event_type
    }

    fn key(&self) -> Option<&String> {
        self.key.as_ref()
    }

    fn set_key(&mut self, key: String) {
        self.key = Some(key);
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
/// filler struct to implement protocol types and allow us
/// to select our traits
pub struct TestTypes;
impl ProtocolTypes for TestTypes {
    type NodeId = TestNodeId;
    type EventType = TestEventType;
    type Key = String;
    type Message = TestMessage;
}
