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

use async_trait::async_trait;
use gridrm_error::{Error, ResultExt};
use tracing::{Level, event};

use crate::node::{Node, NodeUrl};
use crate::registry::Registry;

/// Deployment backend of a node source. It brings nodes to life on its own
/// schedule and registers each one through [`Registry::add_node`].
#[async_trait]
pub trait Infrastructure: Send + Sync + 'static {
    fn description(&self) -> String;

    /// Deploys the nodes of `source_name`. Runs in its own task and may
    /// take as long as provisioning takes.
    async fn deploy(&self, source_name: &str, registry: &Arc<Registry>) -> Result<(), Error>;

    /// Called once a node of this infrastructure left the registry.
    async fn node_removed(&self, _node: &Node) -> Result<(), Error> {
        Ok(())
    }

    /// Called once the node source is removed.
    async fn shutdown(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Nodes are registered by hand, nothing is deployed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualInfrastructure;

#[async_trait]
impl Infrastructure for ManualInfrastructure {
    fn description(&self) -> String {
        "manual".to_string()
    }

    async fn deploy(&self, _source_name: &str, _registry: &Arc<Registry>) -> Result<(), Error> {
        Ok(())
    }
}

/// Registers a fixed list of already running nodes.
#[derive(Debug, Clone)]
pub struct StaticUrlsInfrastructure {
    urls: Vec<NodeUrl>,
}

impl StaticUrlsInfrastructure {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(NodeUrl::new).collect(),
        }
    }
}

#[async_trait]
impl Infrastructure for StaticUrlsInfrastructure {
    fn description(&self) -> String {
        format!("static_urls({})", self.urls.len())
    }

    async fn deploy(&self, source_name: &str, registry: &Arc<Registry>) -> Result<(), Error> {
        let mut result: Result<(), Error> = Ok(());
        for url in &self.urls {
            let add_result = registry
                .add_node(url.clone(), source_name)
                .await
                .map(|_| ())
                .err_tip(|| format!("Deploying {url} in {source_name}"));
            if let Err(err) = &add_result {
                event!(Level::WARN, %url, source_name, ?err, "Failed to register static node");
            }
            result = result.merge(add_result);
        }
        result
    }
}
