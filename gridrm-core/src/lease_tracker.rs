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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use gridrm_util::spawn;
use gridrm_util::task::JoinHandleDropGuard;
use tracing::{Level, event};

use crate::node::{ClientId, NodeUrl};
use crate::registry::Registry;

/// Nodes currently leased by each client. A client only has an entry while
/// it holds at least one node.
#[derive(Debug, Default)]
pub struct LeaseTracker {
    leases: HashMap<ClientId, HashSet<NodeUrl>>,
}

impl LeaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, client_id: &ClientId, url: NodeUrl) {
        self.leases
            .entry(client_id.clone())
            .or_default()
            .insert(url);
    }

    /// Removes a lease. Unknown client/url pairs are ignored.
    pub fn remove(&mut self, client_id: &ClientId, url: &NodeUrl) {
        if let Some(urls) = self.leases.get_mut(client_id) {
            urls.remove(url);
            if urls.is_empty() {
                self.leases.remove(client_id);
            }
        }
    }

    /// Urls leased by `client_id`, sorted.
    pub fn leased_by(&self, client_id: &ClientId) -> Vec<NodeUrl> {
        let mut urls: Vec<NodeUrl> = self
            .leases
            .get(client_id)
            .map(|urls| urls.iter().cloned().collect())
            .unwrap_or_default();
        urls.sort_unstable();
        urls
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// Reclaims the nodes of every client reported by `crashed_clients`. The
/// stream is the client liveness oracle; it yields a client id once that
/// client is known to be gone. Reclaimed nodes go through the ordinary free
/// path of the registry.
pub fn spawn_lease_reclaimer<S>(registry: Arc<Registry>, crashed_clients: S) -> JoinHandleDropGuard<()>
where
    S: Stream<Item = ClientId> + Send + Unpin + 'static,
{
    spawn!("lease_reclaimer", async move {
        let mut crashed_clients = crashed_clients;
        while let Some(client_id) = crashed_clients.next().await {
            let released = registry.release_client(&client_id).await;
            event!(
                Level::INFO,
                %client_id,
                released,
                "Reclaimed nodes of unreachable client"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_last_url_drops_the_lease() {
        let mut tracker = LeaseTracker::new();
        let client = ClientId::from("client");
        tracker.add(&client, NodeUrl::from("n1"));
        tracker.add(&client, NodeUrl::from("n2"));
        tracker.remove(&client, &NodeUrl::from("n1"));
        assert_eq!(tracker.leased_by(&client), vec![NodeUrl::from("n2")]);
        tracker.remove(&client, &NodeUrl::from("n2"));
        // Removing twice is fine.
        tracker.remove(&client, &NodeUrl::from("n2"));
        assert!(tracker.is_empty());
    }
}
