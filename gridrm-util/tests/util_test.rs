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
use std::time::UNIX_EPOCH;

use gridrm_error::Error;
use gridrm_macro::gridrm_test;
use gridrm_util::instant_wrapper::{InstantWrapper, MockInstantWrapped};
use gridrm_util::shutdown_guard::ShutdownGuard;
use gridrm_util::spawn;
use mock_instant::thread_local::MockClock;
use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

#[gridrm_test]
async fn mock_instant_only_moves_when_advanced() -> Result<(), Error> {
    MockClock::set_time(Duration::from_secs(100));
    let clock = MockInstantWrapped;
    assert_eq!(clock.unix_timestamp(), 100);
    MockClock::advance(Duration::from_secs(5));
    assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(105));
    Ok(())
}

#[gridrm_test]
async fn shutdown_guard_waits_for_clones() -> Result<(), Error> {
    let mut guard = ShutdownGuard::default();
    let clone = guard.clone();
    assert_eq!(guard.live_guards(), 2);
    let (tx, rx) = oneshot::channel::<()>();
    let _task = spawn!("shutdown_guard_test_clone", async move {
        let _clone = clone;
        drop(rx.await);
    });

    let wait_result =
        tokio::time::timeout(Duration::from_millis(50), guard.wait_for_clones()).await;
    assert!(wait_result.is_err(), "Guard should wait while a clone is alive");

    // Waiting released the waiter's own count, only the clone is left.
    assert_eq!(guard.live_guards(), 1);
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), guard.wait_for_clones())
        .await
        .expect("Guard should complete once clones are dropped");
    Ok(())
}

#[gridrm_test]
async fn drop_guard_aborts_task() -> Result<(), Error> {
    let (tx, rx) = oneshot::channel::<()>();
    let task = spawn!("drop_guard_test", async move {
        let _tx = tx;
        core::future::pending::<()>().await;
    });
    drop(task);
    // The sender is dropped together with the aborted future.
    assert!(rx.await.is_err());
    Ok(())
}

#[gridrm_test]
async fn shutdown_guard_with_no_clones_returns_right_away() -> Result<(), Error> {
    let mut guard = ShutdownGuard::default();
    drop(guard.clone());
    tokio::time::timeout(Duration::from_secs(5), guard.wait_for_clones())
        .await
        .expect("No clone is alive");
    assert_eq!(guard.live_guards(), 0);
    Ok(())
}
