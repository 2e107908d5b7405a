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

use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{EventListener, EventSubject, EventType, InitialState, RmEvent};
use crate::node::NodeCounts;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RmStatus {
    #[default]
    Started,
    ShuttingDown,
    Shutdown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RmStatisticsSnapshot {
    pub status: RmStatus,
    /// Nodes in each state right now.
    pub current: NodeCounts,
    /// Highest number of nodes seen in each state.
    pub max: NodeCounts,
    pub nodes_added: u64,
    pub nodes_removed: u64,
    pub node_sources: usize,
}

/// Resource manager statistics kept up to date from the event stream.
/// Clones share the same counters, so keep one and hand a clone to
/// [`crate::event_bus::spawn_event_listener`].
#[derive(Clone, Debug, Default)]
pub struct RmStatistics {
    inner: Arc<Mutex<RmStatisticsSnapshot>>,
}

impl RmStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RmStatisticsSnapshot {
        self.inner.lock().clone()
    }
}

impl EventListener for RmStatistics {
    fn initial_state(&mut self, state: &InitialState) {
        let mut stats = self.inner.lock();
        let mut current = NodeCounts::default();
        for node in &state.nodes {
            current.count(node.state);
        }
        stats.current = current;
        stats.max.raise_to(&current);
        stats.node_sources = state.sources.len();
        if state.shutting_down {
            stats.status = RmStatus::ShuttingDown;
        }
    }

    fn handle(&mut self, event: &RmEvent) {
        let mut stats = self.inner.lock();
        match &event.subject {
            EventSubject::Node {
                node,
                previous_state,
            } => {
                if let Some(previous_state) = previous_state {
                    stats.current.uncount(*previous_state);
                }
                match event.event_type {
                    EventType::NodeRemoved => stats.nodes_removed += 1,
                    EventType::NodeAdded => {
                        stats.nodes_added += 1;
                        stats.current.count(node.state);
                    }
                    _ => stats.current.count(node.state),
                }
                let current = stats.current;
                stats.max.raise_to(&current);
            }
            EventSubject::NodeSource(_) => match event.event_type {
                EventType::NodeSourceCreated => stats.node_sources += 1,
                EventType::NodeSourceRemoved => {
                    stats.node_sources = stats.node_sources.saturating_sub(1);
                }
                _ => {}
            },
            EventSubject::ResourceManager => {
                stats.status = match event.event_type {
                    EventType::RmShuttingDown => RmStatus::ShuttingDown,
                    EventType::RmShutdown => RmStatus::Shutdown,
                    _ => RmStatus::Started,
                };
            }
        }
    }
}
