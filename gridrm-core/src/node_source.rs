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
use core::time::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use crate::node::{NodeCounts, NodeUrl};
use crate::policy::NodeSourcePolicy;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeSourceLifecycle {
    Active,
    /// No longer accepts nodes; discarded once it owns none.
    Removing,
    Removed,
}

impl fmt::Display for NodeSourceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Removing => "REMOVING",
            Self::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// A named group of nodes sharing an infrastructure, a policy and a ping
/// frequency. Owned by the registry.
pub(crate) struct NodeSource {
    /// Tells apart successive node sources registered under the same name.
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) infrastructure: String,
    pub(crate) policy: Arc<dyn NodeSourcePolicy>,
    pub(crate) ping_frequency: Duration,
    pub(crate) lifecycle: NodeSourceLifecycle,
    pub(crate) nodes: HashSet<NodeUrl>,
}

impl fmt::Debug for NodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("infrastructure", &self.infrastructure)
            .field("policy", &self.policy.description())
            .field("ping_frequency", &self.ping_frequency)
            .field("lifecycle", &self.lifecycle)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl NodeSource {
    pub(crate) fn new(
        id: u64,
        name: String,
        infrastructure: String,
        policy: Arc<dyn NodeSourcePolicy>,
        ping_frequency: Duration,
    ) -> Self {
        Self {
            id,
            name,
            infrastructure,
            policy,
            ping_frequency,
            lifecycle: NodeSourceLifecycle::Active,
            nodes: HashSet::new(),
        }
    }

    pub(crate) fn info(&self, counts: NodeCounts) -> NodeSourceInfo {
        NodeSourceInfo {
            id: self.id,
            name: self.name.clone(),
            infrastructure: self.infrastructure.clone(),
            policy: self.policy.description(),
            ping_frequency: self.ping_frequency,
            lifecycle: self.lifecycle,
            counts,
        }
    }
}

/// Point-in-time description of a node source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeSourceInfo {
    pub id: u64,
    pub name: String,
    pub infrastructure: String,
    pub policy: String,
    pub ping_frequency: Duration,
    pub lifecycle: NodeSourceLifecycle,
    pub counts: NodeCounts,
}
