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
use std::sync::Arc;

use async_trait::async_trait;
use gridrm_config::rm_server::GlobalConfig;
use gridrm_core::events::{EventFilter, EventType};
use gridrm_core::node::{NodeState, NodeUrl};
use gridrm_core::ping_monitor::{NodeProber, PingMonitor, PingSettings, Pinger};
use gridrm_core::registry::Registry;
use gridrm_error::{Code, Error, make_err};
use gridrm_macro::gridrm_test;
use pretty_assertions::assert_eq;
use utils::rm_utils::{MockProber, SOURCE, make_registry, next_event_of, register_source, url};

mod utils {
    pub(crate) mod rm_utils;
}

async fn setup(names: &[&str]) -> Arc<Registry> {
    let registry = make_registry(&GlobalConfig::default());
    register_source(&registry, SOURCE).await;
    for name in names {
        registry.add_node(url(name), SOURCE).await.unwrap();
    }
    registry
}

fn settings(failure_threshold: u32) -> PingSettings {
    PingSettings {
        timeout: Duration::from_millis(50),
        failure_threshold,
    }
}

#[gridrm_test]
async fn failed_ping_marks_node_down() -> Result<(), Error> {
    let registry = setup(&["alive", "dead"]).await;
    let prober = MockProber::new();
    prober.kill(&url("dead"));
    let mut pinger = Pinger::new(SOURCE.to_string(), registry.clone(), prober.clone(), settings(1));

    assert_eq!(pinger.run_cycle().await, 1);
    assert_eq!(registry.node_state(&url("dead")).await, Some(NodeState::Down));
    assert_eq!(registry.node_state(&url("alive")).await, Some(NodeState::Free));

    // Down nodes are not probed again.
    assert_eq!(pinger.run_cycle().await, 0);
    assert_eq!(prober.probe_count(&url("dead")), 1);
    assert_eq!(prober.probe_count(&url("alive")), 2);
    Ok(())
}

#[gridrm_test]
async fn threshold_needs_consecutive_failures() -> Result<(), Error> {
    let registry = setup(&["flaky"]).await;
    let flaky = url("flaky");
    let prober = MockProber::new();
    let mut pinger = Pinger::new(SOURCE.to_string(), registry.clone(), prober.clone(), settings(2));

    prober.kill(&flaky);
    assert_eq!(pinger.run_cycle().await, 0);
    prober.revive(&flaky);
    assert_eq!(pinger.run_cycle().await, 0);
    prober.kill(&flaky);
    assert_eq!(pinger.run_cycle().await, 0);
    assert_eq!(registry.node_state(&flaky).await, Some(NodeState::Free));
    assert_eq!(pinger.run_cycle().await, 1);
    assert_eq!(registry.node_state(&flaky).await, Some(NodeState::Down));
    Ok(())
}

#[gridrm_test]
async fn slow_ping_counts_as_failure() -> Result<(), Error> {
    let registry = setup(&["slow"]).await;
    let prober = MockProber::with_delay(Duration::from_secs(10));
    let mut pinger = Pinger::new(SOURCE.to_string(), registry.clone(), prober, settings(1));

    assert_eq!(pinger.run_cycle().await, 1);
    assert_eq!(registry.node_state(&url("slow")).await, Some(NodeState::Down));
    Ok(())
}

/// Re-registers the url it probes before failing, as if the node had been
/// restarted while the ping was in flight.
struct ReplacingProber {
    registry: Arc<Registry>,
}

#[async_trait]
impl NodeProber for ReplacingProber {
    async fn probe(&self, url: &NodeUrl) -> Result<(), Error> {
        self.registry.add_node(url.clone(), SOURCE).await?;
        Err(make_err!(Code::Unavailable, "Old incarnation is gone"))
    }
}

#[gridrm_test]
async fn failed_ping_of_replaced_node_is_ignored() -> Result<(), Error> {
    let registry = setup(&["restarted"]).await;
    let prober = Arc::new(ReplacingProber {
        registry: registry.clone(),
    });
    let mut pinger = Pinger::new(SOURCE.to_string(), registry.clone(), prober, settings(1));

    // The failure is not counted as a node marked down.
    assert_eq!(pinger.run_cycle().await, 0);
    assert_eq!(
        registry.node_state(&url("restarted")).await,
        Some(NodeState::Free)
    );
    Ok(())
}

#[gridrm_test]
async fn monitor_pings_periodically() -> Result<(), Error> {
    let registry = setup(&["n1"]).await;
    let prober = MockProber::new();
    let pinger = Pinger::new(SOURCE.to_string(), registry.clone(), prober.clone(), settings(1));
    let (_, mut events) = registry
        .subscribe(EventFilter::only([EventType::NodeDown]))
        .await;

    let monitor = PingMonitor::start(pinger, Duration::from_secs(3600));
    monitor.set_frequency(Duration::from_millis(10));
    assert_eq!(monitor.frequency(), Duration::from_millis(10));
    prober.kill(&url("n1"));

    let event = next_event_of(&mut events, EventType::NodeDown).await;
    assert_eq!(event.node().map(|node| node.url.clone()), Some(url("n1")));

    // Dropping the monitor stops pinging.
    drop(monitor);
    registry.add_node(url("n2"), SOURCE).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(prober.probe_count(&url("n2")), 0);
    Ok(())
}

#[gridrm_test]
async fn settings_fall_back_to_defaults() -> Result<(), Error> {
    assert_eq!(PingSettings::from_config(&GlobalConfig::default()), PingSettings::default());
    let settings = PingSettings::from_config(&GlobalConfig {
        ping_timeout_ms: 200,
        ping_failure_threshold: 3,
        ..GlobalConfig::default()
    });
    assert_eq!(settings.timeout, Duration::from_millis(200));
    assert_eq!(settings.failure_threshold, 3);
    Ok(())
}
