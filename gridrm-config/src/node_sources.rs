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

use serde::Deserialize;

use crate::serde_utils::{
    convert_optional_numeric_with_shellexpand, convert_string_with_shellexpand,
    convert_vec_string_with_shellexpand,
};

/// Name of the node source used when a node is added without naming one.
pub const DEFAULT_NODE_SOURCE_NAME: &str = "Default";

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StaticUrlsInfrastructure {
    /// Urls of already running nodes. Every url is registered in the node
    /// source as soon as the node source is deployed.
    #[serde(deserialize_with = "convert_vec_string_with_shellexpand")]
    pub urls: Vec<String>,
}

/// Describes how nodes of a node source come to life.
#[allow(non_camel_case_types)]
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub enum InfrastructureSpec {
    /// Nodes are never deployed by the resource manager, an administrator
    /// (or the nodes themselves) register them one by one.
    #[default]
    manual,

    /// A fixed list of node urls registered at deployment time.
    static_urls(StaticUrlsInfrastructure),
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RestrictedPolicy {
    /// Only these clients may lease nodes of the node source.
    #[serde(deserialize_with = "convert_vec_string_with_shellexpand")]
    pub allowed_clients: Vec<String>,
}

/// Decides which clients may be handed the nodes of a node source.
#[allow(non_camel_case_types)]
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub enum PolicySpec {
    /// Every client may lease every node.
    #[default]
    static_policy,

    /// Only listed clients may lease nodes.
    restricted(RestrictedPolicy),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NodeSourceConfig {
    /// Unique name of the node source.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub name: String,

    #[serde(default)]
    pub infrastructure: InfrastructureSpec,

    #[serde(default)]
    pub policy: PolicySpec,

    /// Overrides `GlobalConfig::default_ping_frequency_ms` for this source.
    #[serde(default, deserialize_with = "convert_optional_numeric_with_shellexpand")]
    pub ping_frequency_ms: Option<u64>,
}
