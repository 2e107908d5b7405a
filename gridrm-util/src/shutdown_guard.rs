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

use tokio::sync::watch;

/// Keeps the process alive until every part of it finished shutting down.
///
/// Each clone is handed to a component that must finish before the process
/// exits; the component drops it when done. The holder of the guard that
/// requested the shutdown calls [`ShutdownGuard::wait_for_clones`].
#[derive(Debug)]
pub struct ShutdownGuard {
    live_guards: Arc<watch::Sender<usize>>,
    released: bool,
}

impl ShutdownGuard {
    /// Stops counting this guard and waits until every other guard sharing
    /// its counter is dropped.
    pub async fn wait_for_clones(&mut self) {
        self.release();
        let mut live_guards = self.live_guards.subscribe();
        // The sender lives as long as `self`, so the channel cannot close.
        drop(live_guards.wait_for(|count| *count == 0).await);
    }

    /// Number of guards still counted.
    pub fn live_guards(&self) -> usize {
        *self.live_guards.borrow()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.live_guards
                .send_modify(|count| *count = count.saturating_sub(1));
        }
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        let (live_guards, _) = watch::channel(1);
        Self {
            live_guards: Arc::new(live_guards),
            released: false,
        }
    }
}

impl Clone for ShutdownGuard {
    fn clone(&self) -> Self {
        self.live_guards.send_modify(|count| *count += 1);
        Self {
            live_guards: self.live_guards.clone(),
            released: false,
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.release();
    }
}
