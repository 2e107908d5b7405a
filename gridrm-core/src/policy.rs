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

use std::collections::HashSet;

use crate::node::{ClientId, Node};

/// Decides which clients may lease the nodes of a node source.
pub trait NodeSourcePolicy: Send + Sync + 'static {
    fn description(&self) -> String;

    fn accepts(&self, client_id: &ClientId) -> bool;
}

/// Extra criteria a client puts on the nodes it asks for.
pub trait NodeSelector: Send + Sync {
    fn accepts(&self, node: &Node) -> bool;
}

impl<F> NodeSelector for F
where
    F: Fn(&Node) -> bool + Send + Sync,
{
    fn accepts(&self, node: &Node) -> bool {
        self(node)
    }
}

/// Selector matching every node.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyNode;

impl NodeSelector for AnyNode {
    fn accepts(&self, _node: &Node) -> bool {
        true
    }
}

/// Lets every client lease the source's nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPolicy;

impl NodeSourcePolicy for StaticPolicy {
    fn description(&self) -> String {
        "static".to_string()
    }

    fn accepts(&self, _client_id: &ClientId) -> bool {
        true
    }
}

/// Only the listed clients may lease the source's nodes.
#[derive(Debug, Clone)]
pub struct RestrictedPolicy {
    allowed_clients: HashSet<ClientId>,
}

impl RestrictedPolicy {
    pub fn new<I, S>(allowed_clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_clients: allowed_clients
                .into_iter()
                .map(ClientId::new)
                .collect(),
        }
    }
}

impl NodeSourcePolicy for RestrictedPolicy {
    fn description(&self) -> String {
        let mut clients: Vec<&str> = self.allowed_clients.iter().map(ClientId::as_str).collect();
        clients.sort_unstable();
        format!("restricted({})", clients.join(","))
    }

    fn accepts(&self, client_id: &ClientId) -> bool {
        self.allowed_clients.contains(client_id)
    }
}
