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

use async_trait::async_trait;
use futures::future::join_all;
use gridrm_config::rm_server::GlobalConfig;
use gridrm_error::{Error, ResultExt, make_input_err};
use gridrm_util::spawn;
use gridrm_util::task::JoinHandleDropGuard;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{Level, event};

use crate::node::{NodeId, NodeUrl};
use crate::registry::{ProbeTarget, Registry};

/// Default ping frequency of a node source in milliseconds.
/// If this changes, remember to change the documentation in the config.
pub const DEFAULT_PING_FREQUENCY_MS: u64 = 45_000;

/// Default time a ping may take before it counts as failed.
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 5_000;

/// Default number of consecutive failed pings before a node is down.
pub const DEFAULT_PING_FAILURE_THRESHOLD: u32 = 1;

/// Checks whether a node is still alive.
#[async_trait]
pub trait NodeProber: Send + Sync + 'static {
    async fn probe(&self, url: &NodeUrl) -> Result<(), Error>;
}

/// Considers a node alive if a TCP connection to the host and port of its
/// url can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpNodeProber;

impl TcpNodeProber {
    /// Extracts `host:port` from urls like `scheme://host:port/path`.
    pub fn socket_address(url: &NodeUrl) -> Result<&str, Error> {
        let without_scheme = url
            .as_str()
            .split_once("://")
            .map_or(url.as_str(), |(_, rest)| rest);
        let authority = without_scheme
            .split_once('/')
            .map_or(without_scheme, |(authority, _)| authority);
        match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(authority),
            _ => Err(make_input_err!("Node url {url} has no host:port to probe")),
        }
    }
}

#[async_trait]
impl NodeProber for TcpNodeProber {
    async fn probe(&self, url: &NodeUrl) -> Result<(), Error> {
        let address = Self::socket_address(url)?;
        TcpStream::connect(address)
            .await
            .map(|_| ())
            .err_tip(|| format!("Connecting to {url}"))
    }
}

/// Timeout and threshold applied to every ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSettings {
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            failure_threshold: DEFAULT_PING_FAILURE_THRESHOLD,
        }
    }
}

impl PingSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        let mut ping_timeout_ms = config.ping_timeout_ms;
        if ping_timeout_ms == 0 {
            ping_timeout_ms = DEFAULT_PING_TIMEOUT_MS;
        }
        let mut failure_threshold = config.ping_failure_threshold;
        if failure_threshold == 0 {
            failure_threshold = DEFAULT_PING_FAILURE_THRESHOLD;
        }
        Self {
            timeout: Duration::from_millis(ping_timeout_ms),
            failure_threshold,
        }
    }
}

/// Probes the nodes of one node source. Holds the consecutive failure
/// count of every node between cycles.
pub struct Pinger {
    source_name: String,
    registry: Arc<Registry>,
    prober: Arc<dyn NodeProber>,
    settings: PingSettings,
    failures: HashMap<NodeUrl, (NodeId, u32)>,
}

impl core::fmt::Debug for Pinger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pinger")
            .field("source_name", &self.source_name)
            .field("settings", &self.settings)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl Pinger {
    pub fn new(
        source_name: String,
        registry: Arc<Registry>,
        prober: Arc<dyn NodeProber>,
        settings: PingSettings,
    ) -> Self {
        Self {
            source_name,
            registry,
            prober,
            settings,
            failures: HashMap::new(),
        }
    }

    /// Probes every alive node of the source once. The registry lock is
    /// only taken to snapshot the targets and to mark nodes down, never
    /// while probing. Returns the number of nodes marked down.
    pub async fn run_cycle(&mut self) -> usize {
        let targets = self.registry.probe_targets(&self.source_name).await;
        let prober = &self.prober;
        let timeout = self.settings.timeout;
        let results = join_all(targets.iter().map(|target| async move {
            let result = match tokio::time::timeout(timeout, prober.probe(&target.url)).await {
                Ok(result) => result,
                Err(elapsed) => Err(Error::from(elapsed)),
            };
            (target, result)
        }))
        .await;

        // Nodes that are gone or answered start over from zero.
        let mut failures = HashMap::new();
        let mut marked_down = 0;
        for (target, result) in results {
            let Err(err) = result else {
                continue;
            };
            let count = self
                .failures
                .get(&target.url)
                .filter(|(node_id, _)| *node_id == target.node_id)
                .map_or(0, |(_, count)| *count)
                + 1;
            event!(
                Level::INFO,
                source_name = %self.source_name,
                url = %target.url,
                count,
                ?err,
                "Ping failed"
            );
            if count >= self.settings.failure_threshold {
                if self.registry.mark_down_probed(target).await {
                    marked_down += 1;
                }
            } else {
                failures.insert(target.url.clone(), (target.node_id, count));
            }
        }
        self.failures = failures;
        event!(
            Level::DEBUG,
            source_name = %self.source_name,
            probed = targets.len(),
            marked_down,
            "Ping cycle done"
        );
        marked_down
    }
}

/// Runs a [`Pinger`] periodically in its own task. Dropping the monitor
/// stops the task.
#[derive(Debug)]
pub struct PingMonitor {
    frequency_tx: watch::Sender<Duration>,
    _task: JoinHandleDropGuard<()>,
}

impl PingMonitor {
    pub fn start(mut pinger: Pinger, frequency: Duration) -> Self {
        let (frequency_tx, mut frequency_rx) = watch::channel(frequency);
        let source_name = pinger.source_name.clone();
        let task = spawn!(
            "ping_monitor",
            async move {
                loop {
                    let frequency = *frequency_rx.borrow_and_update();
                    tokio::select! {
                        () = tokio::time::sleep(frequency) => {
                            pinger.run_cycle().await;
                        }
                        changed = frequency_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
            },
            source_name = %source_name
        );
        Self {
            frequency_tx,
            _task: task,
        }
    }

    /// Takes effect right away; the current wait restarts with the new
    /// frequency.
    pub fn set_frequency(&self, frequency: Duration) {
        self.frequency_tx.send_replace(frequency);
    }

    pub fn frequency(&self) -> Duration {
        *self.frequency_tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_address_strips_scheme_and_path() {
        let url = NodeUrl::from("pnp://compute-7:64738/PA/node1");
        assert_eq!(TcpNodeProber::socket_address(&url).unwrap(), "compute-7:64738");
        let url = NodeUrl::from("10.0.0.1:22");
        assert_eq!(TcpNodeProber::socket_address(&url).unwrap(), "10.0.0.1:22");
    }

    #[test]
    fn socket_address_requires_port() {
        let url = NodeUrl::from("pnp://compute-7/PA/node1");
        assert!(TcpNodeProber::socket_address(&url).is_err());
    }
}
