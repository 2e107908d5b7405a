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
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use gridrm_config::rm_server::GlobalConfig;
use gridrm_core::event_bus::EventStream;
use gridrm_core::events::{EventType, RmEvent};
use gridrm_core::infrastructure::Infrastructure;
use gridrm_core::node::{Node, NodeUrl};
use gridrm_core::ping_monitor::NodeProber;
use gridrm_core::registry::Registry;
use gridrm_error::{Code, Error, make_err};
use gridrm_util::instant_wrapper::MockInstantWrapped;
use parking_lot::Mutex;

pub(crate) const SOURCE: &str = "S";

pub(crate) fn make_registry(config: &GlobalConfig) -> Arc<Registry> {
    Arc::new(Registry::new_with_clock(config, Box::new(MockInstantWrapped)))
}

pub(crate) fn url(name: &str) -> NodeUrl {
    NodeUrl::from(format!("pnp://{name}:64738/PA"))
}

/// Events already queued on `stream`, without waiting for new ones.
pub(crate) fn drain_events(stream: &mut EventStream) -> Vec<RmEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.try_next() {
        events.push(event);
    }
    events
}

pub(crate) fn event_types(events: &[RmEvent]) -> Vec<EventType> {
    events.iter().map(|event| event.event_type).collect()
}

/// Waits for the next event of `event_type`, skipping any other.
pub(crate) async fn next_event_of(stream: &mut EventStream, event_type: EventType) -> RmEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = stream.next().await.expect("Event stream closed");
            if event.event_type == event_type {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Timed out waiting for {event_type}"))
}

/// Polls `condition` until it holds.
pub(crate) async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition never became true");
}

/// Prober whose nodes are alive unless killed.
#[derive(Default)]
pub(crate) struct MockProber {
    dead: Mutex<HashSet<NodeUrl>>,
    probes: Mutex<HashMap<NodeUrl, usize>>,
    delay: Option<Duration>,
}

impl MockProber {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub(crate) fn kill(&self, url: &NodeUrl) {
        self.dead.lock().insert(url.clone());
    }

    pub(crate) fn revive(&self, url: &NodeUrl) {
        self.dead.lock().remove(url);
    }

    pub(crate) fn probe_count(&self, url: &NodeUrl) -> usize {
        self.probes.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeProber for MockProber {
    async fn probe(&self, url: &NodeUrl) -> Result<(), Error> {
        *self.probes.lock().entry(url.clone()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.dead.lock().contains(url) {
            return Err(make_err!(Code::Unavailable, "{url} is dead"));
        }
        Ok(())
    }
}

/// Infrastructure deploying a fixed set of nodes and recording what the
/// manager tells it.
#[derive(Default)]
pub(crate) struct RecordingInfrastructure {
    urls: Vec<NodeUrl>,
    fail_deploy: bool,
    removed: Mutex<Vec<NodeUrl>>,
    shutdown_calls: Mutex<usize>,
}

impl RecordingInfrastructure {
    pub(crate) fn new(urls: Vec<NodeUrl>) -> Arc<Self> {
        Arc::new(Self {
            urls,
            ..Self::default()
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_deploy: true,
            ..Self::default()
        })
    }

    pub(crate) fn removed(&self) -> Vec<NodeUrl> {
        self.removed.lock().clone()
    }

    pub(crate) fn shutdown_calls(&self) -> usize {
        *self.shutdown_calls.lock()
    }
}

#[async_trait]
impl Infrastructure for RecordingInfrastructure {
    fn description(&self) -> String {
        "recording".to_string()
    }

    async fn deploy(&self, source_name: &str, registry: &Arc<Registry>) -> Result<(), Error> {
        if self.fail_deploy {
            return Err(make_err!(Code::Internal, "Could not spawn any node"));
        }
        for url in &self.urls {
            registry.add_node(url.clone(), source_name).await?;
        }
        Ok(())
    }

    async fn node_removed(&self, node: &Node) -> Result<(), Error> {
        self.removed.lock().push(node.url.clone());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Error> {
        *self.shutdown_calls.lock() += 1;
        Ok(())
    }
}

pub(crate) async fn register_source(registry: &Registry, name: &str) {
    registry
        .register_source(
            name,
            "manual".to_string(),
            Arc::new(gridrm_core::policy::StaticPolicy),
            Duration::from_secs(45),
        )
        .await
        .expect("Could not register node source");
}
