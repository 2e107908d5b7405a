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

use crate::node_sources::NodeSourceConfig;
use crate::serde_utils::convert_numeric_with_shellexpand;

/// When a client asks for nodes and more free nodes match than were asked
/// for, this decides which of the candidates are handed out first.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Deserialize, Debug, Default, PartialEq, Eq)]
pub enum NodeSelectionStrategy {
    /// Prefer nodes that have gone the longest without a state transition.
    #[default]
    least_recently_used,
    /// Prefer nodes that most recently changed state.
    most_recently_used,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// How often every node of a node source is pinged, unless the node
    /// source overrides it.
    /// Default: 45000 (milliseconds)
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub default_ping_frequency_ms: u64,

    /// A ping that did not answer within this amount of time counts as a
    /// failed ping.
    /// Default: 5000 (milliseconds)
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub ping_timeout_ms: u64,

    /// Number of consecutive failed pings after which a node is marked down.
    /// Default: 1
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub ping_failure_threshold: u32,

    /// Maximum number of alive (not down) nodes the resource manager will
    /// accept. A value of zero is treated as unlimited.
    /// Default: 0
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub max_nodes: usize,

    /// The strategy used to pick free nodes for a client.
    #[serde(default)]
    pub selection_strategy: NodeSelectionStrategy,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RmConfig {
    /// Node sources to create when the resource manager starts. Nodes of
    /// these sources are (re)deployed by their infrastructure on startup,
    /// nothing is restored from a previous run.
    #[serde(default)]
    pub node_sources: Vec<NodeSourceConfig>,

    /// Any global configurations that apply to the resource manager as a
    /// whole.
    pub global: Option<GlobalConfig>,
}
