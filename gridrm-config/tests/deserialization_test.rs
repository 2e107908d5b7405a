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

use gridrm_config::node_sources::{
    InfrastructureSpec, NodeSourceConfig, PolicySpec, RestrictedPolicy, StaticUrlsInfrastructure,
};
use gridrm_config::rm_server::{NodeSelectionStrategy, RmConfig};
use pretty_assertions::assert_eq;

#[test]
fn test_full_config_deserialize() {
    let example = r#"
        {
            global: {
                default_ping_frequency_ms: 1000,
                ping_timeout_ms: "250",
                ping_failure_threshold: 3,
                max_nodes: 16,
                selection_strategy: "most_recently_used",
            },
            node_sources: [
                {
                    name: "static",
                    infrastructure: {
                        static_urls: { urls: ["pnp://host-a:9000/n1", "pnp://host-b:9000/n2"] },
                    },
                    policy: { restricted: { allowed_clients: ["scheduler"] } },
                    ping_frequency_ms: 500,
                },
                { name: "manual" },
            ],
        }
    "#;
    let config: RmConfig = serde_json5::from_str(example).unwrap();
    let global = config.global.unwrap();
    assert_eq!(global.default_ping_frequency_ms, 1000);
    assert_eq!(global.ping_timeout_ms, 250);
    assert_eq!(global.ping_failure_threshold, 3);
    assert_eq!(global.max_nodes, 16);
    assert_eq!(
        global.selection_strategy,
        NodeSelectionStrategy::most_recently_used
    );
    assert_eq!(
        config.node_sources,
        vec![
            NodeSourceConfig {
                name: "static".to_string(),
                infrastructure: InfrastructureSpec::static_urls(StaticUrlsInfrastructure {
                    urls: vec![
                        "pnp://host-a:9000/n1".to_string(),
                        "pnp://host-b:9000/n2".to_string(),
                    ],
                }),
                policy: PolicySpec::restricted(RestrictedPolicy {
                    allowed_clients: vec!["scheduler".to_string()],
                }),
                ping_frequency_ms: Some(500),
            },
            NodeSourceConfig {
                name: "manual".to_string(),
                infrastructure: InfrastructureSpec::manual,
                policy: PolicySpec::static_policy,
                ping_frequency_ms: None,
            },
        ]
    );
}

#[test]
fn test_missing_global_uses_defaults() {
    let config: RmConfig = serde_json5::from_str("{}").unwrap();
    assert!(config.global.is_none());
    assert!(config.node_sources.is_empty());
}

#[test]
fn test_shellexpand_numeric_value() {
    // SAFETY: tests in this binary do not read this variable concurrently.
    unsafe { std::env::set_var("GRIDRM_TEST_PING_MS", "1500") };
    let config: RmConfig = serde_json5::from_str(
        r#"{ global: { default_ping_frequency_ms: "$GRIDRM_TEST_PING_MS" } }"#,
    )
    .unwrap();
    assert_eq!(config.global.unwrap().default_ping_frequency_ms, 1500);
}

#[test]
fn test_unknown_field_is_rejected() {
    let result = serde_json5::from_str::<RmConfig>(r#"{ global: { ping_every: 10 } }"#);
    assert!(result.is_err());
}

#[test]
fn test_shipped_example_config_parses() {
    let config: RmConfig =
        serde_json5::from_str(include_str!("../../config/examples/basic_rm.json5")).unwrap();
    assert_eq!(config.node_sources.len(), 2);
    let InfrastructureSpec::static_urls(infrastructure) = &config.node_sources[0].infrastructure
    else {
        panic!("Expected static urls infrastructure");
    };
    assert_eq!(infrastructure.urls[0], "pnp://127.0.0.1:64738/node1");
    assert_eq!(
        config.global.unwrap().selection_strategy,
        NodeSelectionStrategy::least_recently_used
    );
}
