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

use gridrm_config::rm_server::GlobalConfig;
use gridrm_core::events::{EventFilter, EventType};
use gridrm_core::node::{ClientId, NodeState};
use gridrm_core::node_source_manager::NodeSourceManager;
use gridrm_core::ping_monitor::{PingSettings, Pinger};
use gridrm_core::policy::{AnyNode, StaticPolicy};
use gridrm_error::Error;
use gridrm_macro::gridrm_test;
use pretty_assertions::assert_eq;
use utils::rm_utils::{
    MockProber, RecordingInfrastructure, SOURCE, drain_events, event_types, make_registry,
    next_event_of, url,
};

mod utils {
    pub(crate) mod rm_utils;
}

#[gridrm_test]
async fn lease_release_down_and_preemptive_source_removal() -> Result<(), Error> {
    let config = GlobalConfig::default();
    let registry = make_registry(&config);
    let prober = MockProber::new();
    let manager = NodeSourceManager::new(registry.clone(), prober.clone(), &config).await;
    let (_, mut events) = registry.subscribe(EventFilter::all()).await;

    let names = ["n1", "n2", "n3", "n4", "n5"];
    manager
        .create_source_with(
            SOURCE,
            RecordingInfrastructure::new(names.iter().map(|name| url(name)).collect()),
            Arc::new(StaticPolicy),
            None,
        )
        .await?;
    for _ in names {
        next_event_of(&mut events, EventType::NodeAdded).await;
    }

    let leased = registry
        .get_at_most_nodes(3, &AnyNode, &ClientId::from("client"))
        .await?;
    assert_eq!(leased.len(), 3);
    assert_eq!(registry.total_nodes().await, 5);
    assert_eq!(registry.free_nodes_count().await, 2);

    let busy_a = leased[0].url.clone();
    let busy_b = leased[1].url.clone();
    registry.remove_node(&busy_a, false).await;
    assert_eq!(registry.node_state(&busy_a).await, Some(NodeState::ToRelease));
    assert_eq!(registry.total_nodes().await, 5);
    assert_eq!(registry.free_nodes_count().await, 2);

    prober.kill(&busy_b);
    let mut pinger = Pinger::new(
        SOURCE.to_string(),
        registry.clone(),
        prober.clone(),
        PingSettings::default(),
    );
    assert_eq!(pinger.run_cycle().await, 1);
    assert_eq!(registry.node_state(&busy_b).await, Some(NodeState::Down));
    assert_eq!(registry.total_nodes().await, 5);
    assert_eq!(registry.free_nodes_count().await, 2);

    drain_events(&mut events);
    manager.remove_source(SOURCE, true).await?;
    let events = drain_events(&mut events);
    assert_eq!(
        event_types(&events),
        [vec![EventType::NodeRemoved; 5], vec![EventType::NodeSourceRemoved]].concat()
    );
    assert_eq!(registry.total_nodes().await, 0);
    Ok(())
}

#[gridrm_test]
async fn add_and_remove_single_node() -> Result<(), Error> {
    let config = GlobalConfig::default();
    let manager = NodeSourceManager::new(make_registry(&config), MockProber::new(), &config).await;
    let registry = manager.registry().clone();
    let (_, mut events) = registry.subscribe(EventFilter::all()).await;

    manager.add_node(url("n1"), None).await?;
    assert_eq!(registry.total_nodes().await, 1);
    assert_eq!(registry.free_nodes_count().await, 1);
    assert_eq!(
        event_types(&drain_events(&mut events)),
        vec![EventType::NodeSourceCreated, EventType::NodeAdded]
    );

    registry.remove_node(&url("n1"), false).await;
    assert_eq!(registry.total_nodes().await, 0);
    assert_eq!(
        event_types(&drain_events(&mut events)),
        vec![EventType::NodeRemoved]
    );
    Ok(())
}

#[gridrm_test]
async fn dead_node_re_registered_before_any_probe() -> Result<(), Error> {
    let config = GlobalConfig::default();
    let prober = MockProber::new();
    let manager = NodeSourceManager::new(make_registry(&config), prober.clone(), &config).await;
    let registry = manager.registry().clone();

    let n2 = url("n2");
    let old = manager.add_node(n2.clone(), None).await?;
    prober.kill(&n2);

    let (_, mut events) = registry.subscribe(EventFilter::all()).await;
    let new = manager.add_node(n2.clone(), None).await?;
    let events = drain_events(&mut events);
    assert_eq!(
        event_types(&events),
        vec![EventType::NodeRemoved, EventType::NodeAdded]
    );
    assert_eq!(events[0].node().map(|node| node.id), Some(old.id));
    assert_eq!(events[1].node().map(|node| node.id), Some(new.id));
    assert_eq!(registry.total_nodes().await, 1);
    assert_eq!(registry.free_nodes_count().await, 1);
    Ok(())
}
