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
use std::time::SystemTime;

/// Stable identity of a node while it is registered. Opaque to the
/// resource manager; reusing a url replaces whatever node held it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeUrl(String);

impl NodeUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl From<&str> for NodeUrl {
    fn from(url: &str) -> Self {
        Self(url.to_string())
    }
}

impl From<String> for NodeUrl {
    fn from(url: String) -> Self {
        Self(url)
    }
}

/// Identifier of a client that leases nodes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Incarnation of a node. Every `add_node` call mints a new one, so two
/// registrations of the same url never share an id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeState {
    /// Registered and available for leasing.
    Free,
    /// Leased by a client.
    Busy,
    /// Failed a liveness probe.
    Down,
    /// Leased, and will be removed as soon as its holder frees it.
    ToRelease,
}

impl NodeState {
    /// Alive nodes are the ones that still answer probes.
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Down)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "FREE",
            Self::Busy => "BUSY",
            Self::Down => "DOWN",
            Self::ToRelease => "TO_RELEASE",
        };
        f.write_str(name)
    }
}

/// A node tracked by the registry. Cloning one gives a point-in-time
/// snapshot, which is what events and queries hand out.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Node {
    pub id: NodeId,
    pub url: NodeUrl,
    pub source_name: String,
    /// Id of the node source incarnation the node belongs to.
    pub source_id: u64,
    pub state: NodeState,
    /// Lease holder. Only set while the node is `Busy` or `ToRelease`.
    pub owner: Option<ClientId>,
    pub last_transition_time: SystemTime,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        url: NodeUrl,
        source_name: String,
        source_id: u64,
        now: SystemTime,
    ) -> Self {
        Self {
            id,
            url,
            source_name,
            source_id,
            state: NodeState::Free,
            owner: None,
            last_transition_time: now,
        }
    }

    pub(crate) fn lease(&mut self, client_id: ClientId, now: SystemTime) -> NodeState {
        let previous = self.set_state(NodeState::Busy, now);
        self.owner = Some(client_id);
        previous
    }

    pub(crate) fn release(&mut self, now: SystemTime) -> NodeState {
        self.owner = None;
        self.set_state(NodeState::Free, now)
    }

    pub(crate) fn mark_to_release(&mut self, now: SystemTime) -> NodeState {
        self.set_state(NodeState::ToRelease, now)
    }

    pub(crate) fn mark_down(&mut self, now: SystemTime) -> NodeState {
        self.owner = None;
        self.set_state(NodeState::Down, now)
    }

    fn set_state(&mut self, state: NodeState, now: SystemTime) -> NodeState {
        let previous = self.state;
        self.state = state;
        self.last_transition_time = now;
        previous
    }
}

/// Number of registered nodes in every state.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct NodeCounts {
    pub free: usize,
    pub busy: usize,
    pub down: usize,
    pub to_release: usize,
}

impl NodeCounts {
    pub(crate) fn count(&mut self, state: NodeState) {
        match state {
            NodeState::Free => self.free += 1,
            NodeState::Busy => self.busy += 1,
            NodeState::Down => self.down += 1,
            NodeState::ToRelease => self.to_release += 1,
        }
    }

    pub(crate) fn uncount(&mut self, state: NodeState) {
        let counter = match state {
            NodeState::Free => &mut self.free,
            NodeState::Busy => &mut self.busy,
            NodeState::Down => &mut self.down,
            NodeState::ToRelease => &mut self.to_release,
        };
        *counter = counter.saturating_sub(1);
    }

    /// Raises every counter to at least the matching one of `other`.
    pub(crate) fn raise_to(&mut self, other: &Self) {
        self.free = self.free.max(other.free);
        self.busy = self.busy.max(other.busy);
        self.down = self.down.max(other.down);
        self.to_release = self.to_release.max(other.to_release);
    }

    pub const fn total(&self) -> usize {
        self.free + self.busy + self.down + self.to_release
    }

    pub const fn alive(&self) -> usize {
        self.free + self.busy + self.to_release
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    #[test]
    fn lease_then_mark_down_clears_owner() {
        let mut node = Node::new(NodeId(1), "pnp://a:1".into(), "S".to_string(), 1, UNIX_EPOCH);
        assert_eq!(node.lease(ClientId::from("c"), UNIX_EPOCH), NodeState::Free);
        assert_eq!(node.owner, Some(ClientId::from("c")));
        assert_eq!(node.mark_down(UNIX_EPOCH), NodeState::Busy);
        assert_eq!(node.owner, None);
        assert!(!node.state.is_alive());
    }

    #[test]
    fn counts_total_every_state() {
        let mut counts = NodeCounts::default();
        for state in [
            NodeState::Free,
            NodeState::Busy,
            NodeState::Down,
            NodeState::ToRelease,
            NodeState::Free,
        ] {
            counts.count(state);
        }
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.alive(), 4);
        assert_eq!(counts.free, 2);
    }
}
