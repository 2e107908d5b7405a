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

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_lock::Mutex;
use gridrm_config::rm_server::{GlobalConfig, NodeSelectionStrategy};
use gridrm_error::{Code, Error, ResultExt, error_if, make_err};
use gridrm_util::instant_wrapper::InstantWrapper;
use lru::LruCache;
use tracing::{Level, event};

use crate::event_bus::{EventBus, EventStream};
use crate::events::{EventFilter, EventSubject, EventType, InitialState};
use crate::lease_tracker::LeaseTracker;
use crate::node::{ClientId, Node, NodeCounts, NodeId, NodeState, NodeUrl};
use crate::node_source::{NodeSource, NodeSourceInfo, NodeSourceLifecycle};
use crate::policy::{NodeSelector, NodeSourcePolicy};

/// A node the ping monitor is about to probe. The id pins the incarnation,
/// so a result that arrives after the url was replaced is ignored.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProbeTarget {
    pub url: NodeUrl,
    pub node_id: NodeId,
}

/// Point-in-time view of the whole pool.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RmState {
    pub counts: NodeCounts,
    pub free_urls: Vec<NodeUrl>,
    pub alive_urls: Vec<NodeUrl>,
    pub all_urls: Vec<NodeUrl>,
}

fn count_nodes<'a>(nodes: impl Iterator<Item = &'a Node>) -> NodeCounts {
    let mut counts = NodeCounts::default();
    for node in nodes {
        counts.count(node.state);
    }
    counts
}

/// Every node and node source, the leases and the event bus. One lock
/// guards all of it, so every method here is one atomic step.
struct RegistryImpl {
    /// A `LruCache` of nodes, promoted whenever a node changes hands.
    nodes: LruCache<NodeUrl, Node>,
    sources: HashMap<String, NodeSource>,
    leases: LeaseTracker,
    bus: EventBus,
    next_node_id: u64,
    next_source_id: u64,

    /// Maximum number of alive nodes, zero means unlimited.
    max_nodes: usize,
    selection_strategy: NodeSelectionStrategy,
    clock: Box<dyn InstantWrapper>,

    shutting_down: bool,
    shutdown_complete: bool,
}

impl RegistryImpl {
    fn now(&self) -> SystemTime {
        self.clock.now()
    }

    fn publish_node(&mut self, event_type: EventType, node: Node, previous_state: Option<NodeState>) {
        self.bus.publish(
            event_type,
            EventSubject::Node {
                node,
                previous_state,
            },
        );
    }

    fn source_counts(&self, source: &NodeSource) -> NodeCounts {
        count_nodes(source.nodes.iter().filter_map(|url| self.nodes.peek(url)))
    }

    fn source_info(&self, name: &str) -> Option<NodeSourceInfo> {
        let source = self.sources.get(name)?;
        Some(source.info(self.source_counts(source)))
    }

    fn add_node(&mut self, url: NodeUrl, source_name: &str) -> Result<Node, Error> {
        error_if!(url.is_empty(), "Node url must not be empty");
        error_if!(source_name.is_empty(), "Node source name must not be empty");
        if self.shutting_down {
            return Err(make_err!(
                Code::Unavailable,
                "Resource manager is shutting down, refusing node {url}"
            ));
        }
        let source = self.sources.get(source_name).err_tip_with_code(|_| {
            (
                Code::InvalidArgument,
                format!("Node source {source_name} does not exist"),
            )
        })?;
        error_if!(
            source.lifecycle != NodeSourceLifecycle::Active,
            "Node source {source_name} is {}, it does not accept nodes",
            source.lifecycle
        );
        let source_id = source.id;
        if self.max_nodes > 0 {
            // The node being replaced does not count against the limit.
            let alive = self
                .nodes
                .iter()
                .filter(|(node_url, node)| node.state.is_alive() && **node_url != url)
                .count();
            if alive >= self.max_nodes {
                return Err(make_err!(
                    Code::ResourceExhausted,
                    "Maximum number of nodes ({}) reached, refusing node {url}",
                    self.max_nodes
                ));
            }
        }

        let replaced = self.pop_node(&url);
        if let Some(old) = &replaced {
            event!(
                Level::INFO,
                %url,
                old_id = %old.id,
                old_source = %old.source_name,
                "Node url reused, replacing previous node"
            );
        }

        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        let node = Node::new(id, url.clone(), source_name.to_string(), source_id, self.now());
        self.nodes.put(url.clone(), node.clone());
        if let Some(source) = self.sources.get_mut(source_name) {
            source.nodes.insert(url.clone());
        }
        self.publish_node(EventType::NodeAdded, node.clone(), None);
        event!(Level::INFO, %url, %id, source_name, "Node added");

        // The completion check is deferred so the replacement stays a
        // removal immediately followed by the addition.
        if let Some(old) = replaced {
            self.check_source_completion(&old.source_name);
        }
        Ok(node)
    }

    /// Takes a node out of the map, its source and the leases, and
    /// publishes `NodeRemoved`. Does not run the source completion check.
    fn pop_node(&mut self, url: &NodeUrl) -> Option<Node> {
        let node = self.nodes.pop(url)?;
        if let Some(owner) = &node.owner {
            self.leases.remove(owner, url);
        }
        if let Some(source) = self.sources.get_mut(&node.source_name) {
            source.nodes.remove(url);
        }
        self.publish_node(EventType::NodeRemoved, node.clone(), Some(node.state));
        event!(Level::INFO, %url, id = %node.id, previous_state = %node.state, "Node removed");
        Some(node)
    }

    fn remove_node_now(&mut self, url: &NodeUrl) {
        if let Some(node) = self.pop_node(url) {
            self.check_source_completion(&node.source_name);
        }
    }

    /// Discards a removing source once it owns no node.
    fn check_source_completion(&mut self, source_name: &str) {
        let completed = self.sources.get(source_name).is_some_and(|source| {
            source.lifecycle == NodeSourceLifecycle::Removing && source.nodes.is_empty()
        });
        if !completed {
            return;
        }
        let Some(mut source) = self.sources.remove(source_name) else {
            return;
        };
        source.lifecycle = NodeSourceLifecycle::Removed;
        self.bus.publish(
            EventType::NodeSourceRemoved,
            EventSubject::NodeSource(source.info(NodeCounts::default())),
        );
        event!(Level::INFO, source_name, "Node source removed");
        self.check_shutdown_completion();
    }

    fn check_shutdown_completion(&mut self) {
        if self.shutting_down && !self.shutdown_complete && self.sources.is_empty() {
            self.shutdown_complete = true;
            self.bus
                .publish(EventType::RmShutdown, EventSubject::ResourceManager);
            event!(Level::WARN, "Resource manager shut down");
        }
    }

    fn get_at_most_nodes(
        &mut self,
        count: usize,
        selector: &dyn NodeSelector,
        client_id: &ClientId,
    ) -> Result<Vec<Node>, Error> {
        error_if!(count == 0, "Asked for zero nodes");
        error_if!(client_id.is_empty(), "Client id must not be empty");
        if self.shutting_down {
            return Ok(Vec::new());
        }

        let sources = &self.sources;
        let is_candidate = |(_, node): &(&NodeUrl, &Node)| {
            node.state == NodeState::Free
                && sources.get(&node.source_name).is_some_and(|source| {
                    source.lifecycle == NodeSourceLifecycle::Active
                        && source.policy.accepts(client_id)
                })
                && selector.accepts(node)
        };
        let selected: Vec<NodeUrl> = match self.selection_strategy {
            // Iterate from the back to get the least recently used first.
            NodeSelectionStrategy::least_recently_used => self
                .nodes
                .iter()
                .rev()
                .filter(is_candidate)
                .take(count)
                .map(|(url, _)| url.clone())
                .collect(),
            NodeSelectionStrategy::most_recently_used => self
                .nodes
                .iter()
                .filter(is_candidate)
                .take(count)
                .map(|(url, _)| url.clone())
                .collect(),
        };

        let now = self.now();
        let mut leased = Vec::with_capacity(selected.len());
        for url in selected {
            let Some(node) = self.nodes.get_mut(&url) else {
                continue;
            };
            let previous_state = node.lease(client_id.clone(), now);
            let node = node.clone();
            self.leases.add(client_id, url);
            self.publish_node(EventType::NodeBusy, node.clone(), Some(previous_state));
            leased.push(node);
        }
        event!(
            Level::DEBUG,
            %client_id,
            requested = count,
            leased = leased.len(),
            "Leased nodes"
        );
        Ok(leased)
    }

    fn free_node(&mut self, url: &NodeUrl) {
        let Some(state) = self.nodes.peek(url).map(|node| node.state) else {
            return;
        };
        match state {
            NodeState::Busy => {
                let now = self.now();
                let Some(node) = self.nodes.get_mut(url) else {
                    return;
                };
                let owner = node.owner.take();
                let previous_state = node.release(now);
                let node = node.clone();
                if let Some(owner) = owner {
                    self.leases.remove(&owner, url);
                }
                self.publish_node(EventType::NodeFree, node, Some(previous_state));
            }
            NodeState::ToRelease => self.remove_node_now(url),
            NodeState::Free | NodeState::Down => {}
        }
    }

    fn remove_node(&mut self, url: &NodeUrl, preemptive: bool) {
        let Some(state) = self.nodes.peek(url).map(|node| node.state) else {
            return;
        };
        match (state, preemptive) {
            (NodeState::Busy, false) => {
                let now = self.now();
                let Some(node) = self.nodes.peek_mut(url) else {
                    return;
                };
                let previous_state = node.mark_to_release(now);
                let node = node.clone();
                self.publish_node(EventType::NodeToRelease, node, Some(previous_state));
            }
            (NodeState::ToRelease, false) => {}
            _ => self.remove_node_now(url),
        }
    }

    /// Marks a node down. With `expected_id` set, only that incarnation.
    /// Returns false if nothing changed.
    fn mark_down(&mut self, url: &NodeUrl, expected_id: Option<NodeId>) -> bool {
        let now = self.now();
        let Some(node) = self.nodes.peek_mut(url) else {
            return false;
        };
        if expected_id.is_some_and(|id| id != node.id) || node.state == NodeState::Down {
            return false;
        }
        let owner = node.owner.clone();
        let previous_state = node.mark_down(now);
        let node = node.clone();
        if let Some(owner) = owner {
            self.leases.remove(&owner, url);
        }
        event!(Level::WARN, %url, id = %node.id, %previous_state, "Node is down");
        let removing = self
            .sources
            .get(&node.source_name)
            .is_some_and(|source| source.lifecycle == NodeSourceLifecycle::Removing);
        self.publish_node(EventType::NodeDown, node, Some(previous_state));
        if removing {
            self.remove_node_now(url);
        }
        true
    }

    fn set_node_available(&mut self, url: &NodeUrl) {
        let now = self.now();
        let Some(node) = self.nodes.get_mut(url) else {
            return;
        };
        if node.state != NodeState::Down {
            return;
        }
        let previous_state = node.release(now);
        let node = node.clone();
        self.publish_node(EventType::NodeFree, node, Some(previous_state));
    }

    fn release_client(&mut self, client_id: &ClientId) -> usize {
        let mut released = 0;
        for url in self.leases.leased_by(client_id) {
            let owned = self
                .nodes
                .peek(&url)
                .is_some_and(|node| node.owner.as_ref() == Some(client_id));
            if owned {
                self.free_node(&url);
                released += 1;
            } else {
                self.leases.remove(client_id, &url);
            }
        }
        released
    }

    fn remove_nodes(&mut self, count: usize, source_name: &str, preemptive: bool) -> usize {
        let Some(source) = self.sources.get(source_name) else {
            return 0;
        };
        let mut victims: Vec<NodeUrl> = Vec::new();
        for wanted in [NodeState::Free, NodeState::Busy] {
            victims.extend(
                self.nodes
                    .iter()
                    .rev()
                    .filter(|(url, node)| node.state == wanted && source.nodes.contains(*url))
                    .map(|(url, _)| url.clone()),
            );
        }
        victims.truncate(count);
        for url in &victims {
            self.remove_node(url, preemptive);
        }
        victims.len()
    }

    fn register_source(
        &mut self,
        name: &str,
        infrastructure: String,
        policy: Arc<dyn NodeSourcePolicy>,
        ping_frequency: Duration,
    ) -> Result<NodeSourceInfo, Error> {
        error_if!(name.is_empty(), "Node source name must not be empty");
        error_if!(
            ping_frequency.is_zero(),
            "Ping frequency of node source {name} must not be zero"
        );
        if self.shutting_down {
            return Err(make_err!(
                Code::Unavailable,
                "Resource manager is shutting down, refusing node source {name}"
            ));
        }
        error_if!(
            self.sources.contains_key(name),
            "Node source {name} already exists"
        );
        let id = self.next_source_id;
        self.next_source_id += 1;
        let source = NodeSource::new(id, name.to_string(), infrastructure, policy, ping_frequency);
        let info = source.info(NodeCounts::default());
        self.sources.insert(name.to_string(), source);
        self.bus.publish(
            EventType::NodeSourceCreated,
            EventSubject::NodeSource(info.clone()),
        );
        event!(Level::INFO, name, "Node source created");
        Ok(info)
    }

    fn begin_source_removal(&mut self, name: &str, preemptive: bool) -> bool {
        let Some(source) = self.sources.get_mut(name) else {
            return false;
        };
        source.lifecycle = NodeSourceLifecycle::Removing;
        let mut urls: Vec<NodeUrl> = source.nodes.iter().cloned().collect();
        urls.sort_unstable();
        event!(Level::INFO, name, preemptive, nodes = urls.len(), "Removing node source");
        for url in &urls {
            self.remove_node(url, preemptive);
        }
        self.check_source_completion(name);
        true
    }

    fn begin_shutdown(&mut self) -> Vec<String> {
        if !self.shutting_down {
            self.shutting_down = true;
            self.bus
                .publish(EventType::RmShuttingDown, EventSubject::ResourceManager);
            event!(Level::WARN, "Resource manager shutting down");
        }
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort_unstable();
        self.check_shutdown_completion();
        names
    }

    fn rm_state(&self) -> RmState {
        let mut state = RmState {
            counts: count_nodes(self.nodes.iter().map(|(_, node)| node)),
            ..RmState::default()
        };
        for (url, node) in &self.nodes {
            if node.state == NodeState::Free {
                state.free_urls.push(url.clone());
            }
            if node.state.is_alive() {
                state.alive_urls.push(url.clone());
            }
            state.all_urls.push(url.clone());
        }
        state.free_urls.sort_unstable();
        state.alive_urls.sort_unstable();
        state.all_urls.sort_unstable();
        state
    }

    fn list_sources(&self) -> Vec<NodeSourceInfo> {
        let mut infos: Vec<NodeSourceInfo> = self
            .sources
            .values()
            .map(|source| source.info(self.source_counts(source)))
            .collect();
        infos.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

/// The single authoritative store of nodes and node sources. Every state
/// transition goes through here and is applied atomically; every visible
/// change is published as an event while the lock is still held.
pub struct Registry {
    inner: Mutex<RegistryImpl>,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(config: &GlobalConfig) -> Self {
        Self::new_with_clock(config, Box::new(SystemTime::now()))
    }

    pub fn new_with_clock(config: &GlobalConfig, clock: Box<dyn InstantWrapper>) -> Self {
        let mut bus = EventBus::new();
        bus.publish(EventType::RmStarted, EventSubject::ResourceManager);
        Self {
            inner: Mutex::new(RegistryImpl {
                nodes: LruCache::unbounded(),
                sources: HashMap::new(),
                leases: LeaseTracker::new(),
                bus,
                next_node_id: 1,
                next_source_id: 1,
                max_nodes: config.max_nodes,
                selection_strategy: config.selection_strategy,
                clock,
                shutting_down: false,
                shutdown_complete: false,
            }),
        }
    }

    /// Registers a FREE node under `source_name`. A node already holding
    /// `url` is removed first, in the same atomic step.
    pub async fn add_node(&self, url: NodeUrl, source_name: &str) -> Result<Node, Error> {
        let mut inner = self.inner.lock().await;
        inner
            .add_node(url, source_name)
            .err_tip(|| "In Registry::add_node")
    }

    /// Leases up to `count` free nodes accepted by `selector` and by the
    /// policy of their source. Returns fewer, possibly none, if not enough
    /// nodes match. Never waits for nodes to become free.
    pub async fn get_at_most_nodes(
        &self,
        count: usize,
        selector: &dyn NodeSelector,
        client_id: &ClientId,
    ) -> Result<Vec<Node>, Error> {
        let mut inner = self.inner.lock().await;
        inner
            .get_at_most_nodes(count, selector, client_id)
            .err_tip(|| "In Registry::get_at_most_nodes")
    }

    /// Returns a busy node to the pool, or finishes the removal of a node
    /// waiting to be released. Anything else is ignored.
    pub async fn free_node(&self, url: &NodeUrl) {
        self.inner.lock().await.free_node(url);
    }

    pub async fn free_nodes(&self, urls: &[NodeUrl]) {
        let mut inner = self.inner.lock().await;
        for url in urls {
            inner.free_node(url);
        }
    }

    /// Removes a node. A busy node removed without preemption is only
    /// marked to release and stays until its holder frees it.
    pub async fn remove_node(&self, url: &NodeUrl, preemptive: bool) {
        self.inner.lock().await.remove_node(url, preemptive);
    }

    /// Removes up to `count` nodes of a source, free ones first. Returns
    /// how many nodes were removed or marked to release.
    pub async fn remove_nodes(&self, count: usize, source_name: &str, preemptive: bool) -> usize {
        self.inner
            .lock()
            .await
            .remove_nodes(count, source_name, preemptive)
    }

    pub async fn mark_down(&self, url: &NodeUrl) {
        self.inner.lock().await.mark_down(url, None);
    }

    /// Like `mark_down`, but a no-op if the url now belongs to a different
    /// incarnation than the one probed. Returns whether the node went down.
    pub async fn mark_down_probed(&self, target: &ProbeTarget) -> bool {
        self.inner
            .lock()
            .await
            .mark_down(&target.url, Some(target.node_id))
    }

    /// Brings a down node back to the free pool.
    pub async fn set_node_available(&self, url: &NodeUrl) {
        self.inner.lock().await.set_node_available(url);
    }

    /// Frees every node still leased by `client_id`. Returns how many nodes
    /// were released.
    pub async fn release_client(&self, client_id: &ClientId) -> usize {
        self.inner.lock().await.release_client(client_id)
    }

    /// An explicit disconnect is handled exactly like a crashed client.
    pub async fn disconnect_client(&self, client_id: &ClientId) -> usize {
        self.release_client(client_id).await
    }

    pub async fn leased_by(&self, client_id: &ClientId) -> Vec<NodeUrl> {
        self.inner.lock().await.leases.leased_by(client_id)
    }

    pub async fn register_source(
        &self,
        name: &str,
        infrastructure: String,
        policy: Arc<dyn NodeSourcePolicy>,
        ping_frequency: Duration,
    ) -> Result<NodeSourceInfo, Error> {
        let mut inner = self.inner.lock().await;
        inner
            .register_source(name, infrastructure, policy, ping_frequency)
            .err_tip(|| "In Registry::register_source")
    }

    /// Marks a source removing and removes its nodes. The source is
    /// discarded as soon as it owns no node, which may be right away.
    /// Returns false if there is no such source.
    pub async fn begin_source_removal(&self, name: &str, preemptive: bool) -> bool {
        self.inner
            .lock()
            .await
            .begin_source_removal(name, preemptive)
    }

    /// Returns the id of the updated source, `None` if there is no such
    /// source.
    pub async fn set_source_ping_frequency(
        &self,
        name: &str,
        ping_frequency: Duration,
    ) -> Result<Option<u64>, Error> {
        error_if!(
            ping_frequency.is_zero(),
            "Ping frequency of node source {name} must not be zero"
        );
        let mut inner = self.inner.lock().await;
        let Some(source) = inner.sources.get_mut(name) else {
            return Ok(None);
        };
        source.ping_frequency = ping_frequency;
        Ok(Some(source.id))
    }

    /// Stops accepting nodes and sources. Returns the sources left to
    /// remove; `RmShutdown` is published once they are all gone.
    pub async fn begin_shutdown(&self) -> Vec<String> {
        self.inner.lock().await.begin_shutdown()
    }

    /// Snapshot of the pool plus a stream of every later event matching
    /// `filter`, taken atomically.
    pub async fn subscribe(&self, filter: EventFilter) -> (InitialState, EventStream) {
        let mut inner = self.inner.lock().await;
        let (sequence, stream) = inner.bus.subscribe(filter);
        let mut nodes: Vec<Node> = inner.nodes.iter().map(|(_, node)| node.clone()).collect();
        nodes.sort_unstable_by(|a, b| a.url.cmp(&b.url));
        let initial_state = InitialState {
            sequence,
            nodes,
            sources: inner.list_sources(),
            shutting_down: inner.shutting_down,
        };
        (initial_state, stream)
    }

    /// Alive nodes of `source_name` to probe.
    pub async fn probe_targets(&self, source_name: &str) -> Vec<ProbeTarget> {
        let inner = self.inner.lock().await;
        let Some(source) = inner.sources.get(source_name) else {
            return Vec::new();
        };
        let mut targets: Vec<ProbeTarget> = source
            .nodes
            .iter()
            .filter_map(|url| inner.nodes.peek(url))
            .filter(|node| node.state.is_alive())
            .map(|node| ProbeTarget {
                url: node.url.clone(),
                node_id: node.id,
            })
            .collect();
        targets.sort_unstable_by(|a, b| a.url.cmp(&b.url));
        targets
    }

    pub async fn total_nodes(&self) -> usize {
        self.inner.lock().await.nodes.len()
    }

    pub async fn free_nodes_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .nodes
            .iter()
            .filter(|(_, node)| node.state == NodeState::Free)
            .count()
    }

    pub async fn node_state(&self, url: &NodeUrl) -> Option<NodeState> {
        self.inner.lock().await.nodes.peek(url).map(|node| node.state)
    }

    pub async fn node_info(&self, url: &NodeUrl) -> Option<Node> {
        self.inner.lock().await.nodes.peek(url).cloned()
    }

    /// True if the node is registered and not down.
    pub async fn node_is_available(&self, url: &NodeUrl) -> bool {
        self.node_state(url)
            .await
            .is_some_and(NodeState::is_alive)
    }

    pub async fn list_alive_node_urls(&self) -> Vec<NodeUrl> {
        self.rm_state().await.alive_urls
    }

    pub async fn rm_state(&self) -> RmState {
        self.inner.lock().await.rm_state()
    }

    pub async fn source_info(&self, name: &str) -> Option<NodeSourceInfo> {
        self.inner.lock().await.source_info(name)
    }

    pub async fn list_sources(&self) -> Vec<NodeSourceInfo> {
        self.inner.lock().await.list_sources()
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.lock().await.shutting_down
    }
}
