// Copyright 2025 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt;
use std::collections::HashSet;

use crate::node::{Node, NodeState};
use crate::node_source::NodeSourceInfo;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EventType {
    NodeAdded,
    NodeBusy,
    NodeFree,
    NodeDown,
    NodeToRelease,
    NodeRemoved,
    NodeSourceCreated,
    NodeSourceRemoved,
    RmStarted,
    RmShuttingDown,
    RmShutdown,
}

impl EventType {
    pub const ALL: [Self; 11] = [
        Self::NodeAdded,
        Self::NodeBusy,
        Self::NodeFree,
        Self::NodeDown,
        Self::NodeToRelease,
        Self::NodeRemoved,
        Self::NodeSourceCreated,
        Self::NodeSourceRemoved,
        Self::RmStarted,
        Self::RmShuttingDown,
        Self::RmShutdown,
    ];
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NodeAdded => "NODE_ADDED",
            Self::NodeBusy => "NODE_BUSY",
            Self::NodeFree => "NODE_FREE",
            Self::NodeDown => "NODE_DOWN",
            Self::NodeToRelease => "NODE_TO_RELEASE",
            Self::NodeRemoved => "NODE_REMOVED",
            Self::NodeSourceCreated => "NODESOURCE_CREATED",
            Self::NodeSourceRemoved => "NODESOURCE_REMOVED",
            Self::RmStarted => "RM_STARTED",
            Self::RmShuttingDown => "RM_SHUTTING_DOWN",
            Self::RmShutdown => "RM_SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// What an event is about.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EventSubject {
    /// The node as it is after the transition. For `NodeRemoved` this is
    /// the node as it was right before it left the registry.
    Node {
        node: Node,
        previous_state: Option<NodeState>,
    },
    NodeSource(NodeSourceInfo),
    ResourceManager,
}

/// An immutable, totally ordered resource manager event.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RmEvent {
    pub sequence: u64,
    pub event_type: EventType,
    pub subject: EventSubject,
}

impl RmEvent {
    pub const fn node(&self) -> Option<&Node> {
        match &self.subject {
            EventSubject::Node { node, .. } => Some(node),
            _ => None,
        }
    }

    pub const fn node_source(&self) -> Option<&NodeSourceInfo> {
        match &self.subject {
            EventSubject::NodeSource(info) => Some(info),
            _ => None,
        }
    }
}

impl fmt::Display for RmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            EventSubject::Node { node, .. } => {
                write!(f, "[{}] {} {}", self.sequence, self.event_type, node.url)
            }
            EventSubject::NodeSource(info) => {
                write!(f, "[{}] {} {}", self.sequence, self.event_type, info.name)
            }
            EventSubject::ResourceManager => write!(f, "[{}] {}", self.sequence, self.event_type),
        }
    }
}

/// Selects the event types a subscriber receives.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct EventFilter {
    types: Option<HashSet<EventType>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self { types: None }
    }

    pub fn only(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            types: Some(types.into_iter().collect()),
        }
    }

    pub fn matches(&self, event_type: EventType) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.contains(&event_type))
    }
}

/// Pool state captured atomically with a subscription. `sequence` is the
/// sequence number of the last event already reflected in it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InitialState {
    pub sequence: u64,
    pub nodes: Vec<Node>,
    pub sources: Vec<NodeSourceInfo>,
    pub shutting_down: bool,
}

/// Consumer of resource manager events, driven by
/// [`crate::event_bus::spawn_event_listener`].
pub trait EventListener: Send + 'static {
    fn initial_state(&mut self, _state: &InitialState) {}

    fn handle(&mut self, event: &RmEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_only_matches_listed_types() {
        let filter = EventFilter::only([EventType::NodeDown, EventType::NodeRemoved]);
        assert!(filter.matches(EventType::NodeDown));
        assert!(!filter.matches(EventType::NodeAdded));
        assert!(EventType::ALL.iter().all(|t| EventFilter::all().matches(*t)));
    }
}
