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

use futures::StreamExt;
use gridrm_config::node_sources::{DEFAULT_NODE_SOURCE_NAME, NodeSourceConfig};
use gridrm_config::rm_server::GlobalConfig;
use gridrm_error::{Error, ResultExt, error_if};
use gridrm_util::spawn;
use gridrm_util::task::JoinHandleDropGuard;
use parking_lot::Mutex;
use tracing::{Level, event};

use crate::default_node_source_factory::{infrastructure_factory, policy_factory};
use crate::event_bus::EventStream;
use crate::events::{EventFilter, EventSubject, EventType};
use crate::infrastructure::{Infrastructure, ManualInfrastructure};
use crate::node::{Node, NodeUrl};
use crate::node_source::NodeSourceInfo;
use crate::ping_monitor::{DEFAULT_PING_FREQUENCY_MS, NodeProber, PingMonitor, PingSettings, Pinger};
use crate::policy::{NodeSourcePolicy, StaticPolicy};
use crate::registry::Registry;

/// Runtime handles of a node source that live outside the registry.
struct ManagedSource {
    name: String,
    infrastructure: Arc<dyn Infrastructure>,
    ping_monitor: PingMonitor,
    _deployment: JoinHandleDropGuard<()>,
}

/// Keyed by source id, so a removed source and a newer one of the same
/// name never share handles.
type ManagedSources = Arc<Mutex<HashMap<u64, ManagedSource>>>;

/// Creates and removes node sources. The registry keeps their state; this
/// keeps what runs on their behalf: the deployment task, the ping monitor
/// and the infrastructure, all released once the source is removed.
pub struct NodeSourceManager {
    registry: Arc<Registry>,
    prober: Arc<dyn NodeProber>,
    ping_settings: PingSettings,
    default_ping_frequency: Mutex<Duration>,
    sources: ManagedSources,
    _removal_watcher: JoinHandleDropGuard<()>,
}

impl core::fmt::Debug for NodeSourceManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeSourceManager")
            .field("ping_settings", &self.ping_settings)
            .field("default_ping_frequency", &*self.default_ping_frequency.lock())
            .field("sources", &self.managed_source_names())
            .finish_non_exhaustive()
    }
}

impl NodeSourceManager {
    pub async fn new(
        registry: Arc<Registry>,
        prober: Arc<dyn NodeProber>,
        config: &GlobalConfig,
    ) -> Self {
        let mut default_ping_frequency_ms = config.default_ping_frequency_ms;
        if default_ping_frequency_ms == 0 {
            default_ping_frequency_ms = DEFAULT_PING_FREQUENCY_MS;
        }
        let sources: ManagedSources = Arc::new(Mutex::new(HashMap::new()));
        let (_, removals) = registry
            .subscribe(EventFilter::only([
                EventType::NodeRemoved,
                EventType::NodeSourceRemoved,
            ]))
            .await;
        let removal_watcher = spawn!(
            "node_source_removal_watcher",
            watch_removals(sources.clone(), removals)
        );
        Self {
            registry,
            prober,
            ping_settings: PingSettings::from_config(config),
            default_ping_frequency: Mutex::new(Duration::from_millis(default_ping_frequency_ms)),
            sources,
            _removal_watcher: removal_watcher,
        }
    }

    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Creates a node source from its configuration.
    pub async fn create_source(&self, config: &NodeSourceConfig) -> Result<NodeSourceInfo, Error> {
        let ping_frequency = config
            .ping_frequency_ms
            .filter(|ms| *ms != 0)
            .map(Duration::from_millis);
        self.create_source_with(
            &config.name,
            infrastructure_factory(&config.infrastructure),
            policy_factory(&config.policy),
            ping_frequency,
        )
        .await
    }

    /// Registers the node source, starts pinging it and deploys it in the
    /// background. Deployment failures are logged, not returned.
    pub async fn create_source_with(
        &self,
        name: &str,
        infrastructure: Arc<dyn Infrastructure>,
        policy: Arc<dyn NodeSourcePolicy>,
        ping_frequency: Option<Duration>,
    ) -> Result<NodeSourceInfo, Error> {
        let ping_frequency = ping_frequency.unwrap_or_else(|| *self.default_ping_frequency.lock());
        let info = self
            .registry
            .register_source(name, infrastructure.description(), policy, ping_frequency)
            .await
            .err_tip(|| format!("Creating node source {name}"))?;

        let pinger = Pinger::new(
            name.to_string(),
            self.registry.clone(),
            self.prober.clone(),
            self.ping_settings,
        );
        let ping_monitor = PingMonitor::start(pinger, ping_frequency);
        {
            let mut sources = self.sources.lock();
            // Spawned under the lock so the deployment cannot add (and have
            // removed) a node before its infrastructure is reachable.
            let deployment = {
                let infrastructure = infrastructure.clone();
                let registry = self.registry.clone();
                let source_name = name.to_string();
                spawn!(
                    "node_source_deployment",
                    async move {
                        if let Err(err) = infrastructure.deploy(&source_name, &registry).await {
                            event!(
                                Level::ERROR,
                                %source_name,
                                ?err,
                                "Node source deployment failed"
                            );
                        }
                    },
                    source_name = name
                )
            };
            sources.insert(
                info.id,
                ManagedSource {
                    name: name.to_string(),
                    infrastructure,
                    ping_monitor,
                    _deployment: deployment,
                },
            );
        }
        // A removal that completed before the insert above was skipped by
        // the removal watcher.
        let still_registered = self
            .registry
            .source_info(name)
            .await
            .is_some_and(|current| current.id == info.id);
        if !still_registered {
            release_managed_source(&self.sources, info.id).await;
        }
        Ok(info)
    }

    /// Removes a node source. Busy nodes of a non-preemptive removal stay
    /// until released; the source goes away with its last node. Unknown
    /// sources are ignored.
    pub async fn remove_source(&self, name: &str, preemptive: bool) -> Result<(), Error> {
        error_if!(name.is_empty(), "Node source name must not be empty");
        if !self.registry.begin_source_removal(name, preemptive).await {
            event!(Level::DEBUG, name, "Asked to remove unknown node source");
        }
        Ok(())
    }

    /// Adds a node to `source_name`, or to the default node source, which
    /// is created on first use.
    pub async fn add_node(&self, url: NodeUrl, source_name: Option<&str>) -> Result<Node, Error> {
        let source_name = match source_name {
            Some(source_name) => source_name,
            None => {
                self.ensure_default_source().await?;
                DEFAULT_NODE_SOURCE_NAME
            }
        };
        self.registry.add_node(url, source_name).await
    }

    async fn ensure_default_source(&self) -> Result<(), Error> {
        if self
            .registry
            .source_info(DEFAULT_NODE_SOURCE_NAME)
            .await
            .is_some()
        {
            return Ok(());
        }
        let create_result = self
            .create_source_with(
                DEFAULT_NODE_SOURCE_NAME,
                Arc::new(ManualInfrastructure),
                Arc::new(StaticPolicy),
                None,
            )
            .await;
        match create_result {
            Ok(_) => Ok(()),
            Err(err) => {
                // Someone else may have created it in the meantime.
                if self
                    .registry
                    .source_info(DEFAULT_NODE_SOURCE_NAME)
                    .await
                    .is_some()
                {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Sets the ping frequency of a node source, or with `None` the one
    /// used by node sources created from now on.
    pub async fn set_ping_frequency(
        &self,
        source_name: Option<&str>,
        frequency: Duration,
    ) -> Result<(), Error> {
        error_if!(frequency.is_zero(), "Ping frequency must not be zero");
        let Some(source_name) = source_name else {
            *self.default_ping_frequency.lock() = frequency;
            return Ok(());
        };
        let source_id = self
            .registry
            .set_source_ping_frequency(source_name, frequency)
            .await?;
        let Some(source_id) = source_id else {
            return Ok(());
        };
        if let Some(managed) = self.sources.lock().get(&source_id) {
            managed.ping_monitor.set_frequency(frequency);
        }
        Ok(())
    }

    pub async fn get_ping_frequency(&self, source_name: Option<&str>) -> Option<Duration> {
        match source_name {
            Some(source_name) => self
                .registry
                .source_info(source_name)
                .await
                .map(|info| info.ping_frequency),
            None => Some(*self.default_ping_frequency.lock()),
        }
    }

    /// Shuts the resource manager down by removing every node source.
    /// `RmShutdown` is published once the last one is gone.
    pub async fn shutdown(&self, preemptive: bool) -> Result<(), Error> {
        let remaining = self.registry.begin_shutdown().await;
        event!(
            Level::WARN,
            preemptive,
            node_sources = remaining.len(),
            "Shutting down node sources"
        );
        for name in remaining {
            self.remove_source(&name, preemptive)
                .await
                .err_tip(|| "In NodeSourceManager::shutdown")?;
        }
        Ok(())
    }

    /// Frequency the running ping monitor of the newest `source_name`
    /// source uses.
    pub fn ping_monitor_frequency(&self, source_name: &str) -> Option<Duration> {
        self.sources
            .lock()
            .iter()
            .filter(|(_, managed)| managed.name == source_name)
            .max_by_key(|(source_id, _)| **source_id)
            .map(|(_, managed)| managed.ping_monitor.frequency())
    }

    /// Node sources whose ping monitor and infrastructure are still held.
    pub fn managed_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .lock()
            .values()
            .map(|managed| managed.name.clone())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Stops the ping monitor and any deployment still running for
/// `source_id`, then shuts its infrastructure down. Only the first call for
/// a source does anything.
async fn release_managed_source(sources: &ManagedSources, source_id: u64) {
    let managed = sources.lock().remove(&source_id);
    let Some(managed) = managed else {
        return;
    };
    let ManagedSource {
        name,
        infrastructure,
        ping_monitor,
        _deployment: deployment,
    } = managed;
    drop(ping_monitor);
    drop(deployment);
    if let Err(err) = infrastructure.shutdown().await {
        event!(
            Level::ERROR,
            %name,
            source_id,
            ?err,
            "Infrastructure failed to shut down"
        );
    }
}

/// Tells infrastructures about removed nodes and releases everything a
/// node source held once it is removed.
async fn watch_removals(sources: ManagedSources, mut removals: EventStream) {
    while let Some(event) = removals.next().await {
        match (event.event_type, &event.subject) {
            (EventType::NodeRemoved, EventSubject::Node { node, .. }) => {
                let infrastructure = sources
                    .lock()
                    .get(&node.source_id)
                    .map(|managed| managed.infrastructure.clone());
                let Some(infrastructure) = infrastructure else {
                    continue;
                };
                if let Err(err) = infrastructure.node_removed(node).await {
                    event!(
                        Level::WARN,
                        url = %node.url,
                        ?err,
                        "Infrastructure failed to release removed node"
                    );
                }
            }
            (EventType::NodeSourceRemoved, EventSubject::NodeSource(info)) => {
                release_managed_source(&sources, info.id).await;
            }
            _ => {}
        }
    }
}
