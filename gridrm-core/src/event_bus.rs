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

use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use gridrm_util::spawn;
use gridrm_util::task::JoinHandleDropGuard;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{Level, event};

use crate::events::{EventFilter, EventListener, EventSubject, EventType, RmEvent};
use crate::registry::Registry;

struct Subscriber {
    id: u64,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<RmEvent>,
}

/// Assigns sequence numbers to events and fans them out to subscribers.
///
/// The bus has no lock of its own. The registry owns it inside its critical
/// section, which is what makes a subscription's snapshot and its stream
/// line up, and what keeps events in the order their transitions happened.
#[derive(Default)]
pub struct EventBus {
    sequence: u64,
    next_subscriber_id: u64,
    subscribers: Vec<Subscriber>,
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("sequence", &self.sequence)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last published event.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Registers a subscriber. Every event published after this call and
    /// matching `filter` is delivered to the returned stream. Returns the
    /// sequence number the subscription starts after.
    pub fn subscribe(&mut self, filter: EventFilter) -> (u64, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.push(Subscriber { id, filter, tx });
        (
            self.sequence,
            EventStream {
                subscriber_id: id,
                inner: UnboundedReceiverStream::new(rx),
            },
        )
    }

    /// Appends an event to the global sequence and queues it for every
    /// matching subscriber. Never waits on a subscriber; the ones whose
    /// stream has been dropped are pruned.
    pub fn publish(&mut self, event_type: EventType, subject: EventSubject) -> u64 {
        self.sequence += 1;
        let event = RmEvent {
            sequence: self.sequence,
            event_type,
            subject,
        };
        event!(Level::DEBUG, %event, "Publishing event");
        self.subscribers.retain(|subscriber| {
            if subscriber.tx.is_closed() {
                event!(
                    Level::DEBUG,
                    subscriber_id = subscriber.id,
                    "Dropping closed event subscriber"
                );
                return false;
            }
            if !subscriber.filter.matches(event_type) {
                return true;
            }
            subscriber.tx.send(event.clone()).is_ok()
        });
        self.sequence
    }
}

/// Ordered stream of the events of one subscription.
#[derive(Debug)]
pub struct EventStream {
    subscriber_id: u64,
    inner: UnboundedReceiverStream<RmEvent>,
}

impl EventStream {
    pub const fn subscriber_id(&self) -> u64 {
        self.subscriber_id
    }

    /// Next event already queued, without waiting for one.
    pub fn try_next(&mut self) -> Option<RmEvent> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = RmEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Subscribes `listener` to the registry and drives it from its own task.
/// A listener that panics or stalls only affects its own task and queue.
/// Dropping the returned guard stops the listener.
pub async fn spawn_event_listener<L: EventListener>(
    registry: &Arc<Registry>,
    filter: EventFilter,
    mut listener: L,
) -> JoinHandleDropGuard<()> {
    let (initial_state, mut stream) = registry.subscribe(filter).await;
    let subscriber_id = stream.subscriber_id();
    spawn!(
        "event_listener",
        async move {
            listener.initial_state(&initial_state);
            while let Some(event) = stream.next().await {
                listener.handle(&event);
            }
        },
        subscriber_id
    )
}
