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
use std::time::{SystemTime, UNIX_EPOCH};

use mock_instant::thread_local::MockClock;

/// Wrapper used to abstract away which underlying clock we are using.
/// This is needed for testing.
pub trait InstantWrapper: Send + Sync + Unpin + 'static {
    fn unix_timestamp(&self) -> u64;
    fn now(&self) -> SystemTime;
}

impl InstantWrapper for SystemTime {
    fn unix_timestamp(&self) -> u64 {
        self.duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    fn now(&self) -> SystemTime {
        Self::now()
    }
}

/// Our mocked out clock. Time only moves when the test calls
/// `MockClock::advance` or `MockClock::set_time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockInstantWrapped;

impl InstantWrapper for MockInstantWrapped {
    fn unix_timestamp(&self) -> u64 {
        MockClock::time().as_secs()
    }

    fn now(&self) -> SystemTime {
        UNIX_EPOCH + MockClock::time()
    }
}
