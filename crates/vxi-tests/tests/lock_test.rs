//! Lock lease tests
//!
//! Run with: cargo test -p vxi-tests --test lock_test

use std::time::Duration;

use tokio::time::{timeout, Instant};
use vxi_core::{DeviceErrorCode, DeviceLockParams, LinkId, OperationFlags};
use vxi_tests::{generic_params, write_params, Bench};

fn lock(link_id: LinkId, lease_ms: u32) -> DeviceLockParams {
    DeviceLockParams {
        link_id,
        flags: OperationFlags::NONE,
        lock_timeout_ms: lease_ms,
    }
}

#[tokio::test(start_paused = true)]
async fn test_lease_blocks_then_expires() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    let b = bench.link(2, "inst0").await;
    assert_eq!(bench.core.device_lock(lock(a, 500)).await.error, DeviceErrorCode::NoError);

    // Without WaitLock: immediate failure
    let start = Instant::now();
    let response = bench.core.device_write(write_params(b, "*CLS\n")).await;
    assert_eq!(response.error, DeviceErrorCode::DeviceLockedByAnotherLink);
    assert_eq!(response.size, 0);
    assert!(start.elapsed() < Duration::from_millis(1));

    // With WaitLock: completes once the lease runs out
    let mut params = write_params(b, "*CLS\n");
    params.flags = OperationFlags::WAIT_LOCK | OperationFlags::END;
    params.lock_timeout_ms = 2000;
    let response = bench.core.device_write(params).await;
    assert_eq!(response.error, DeviceErrorCode::NoError);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_wait_lock_bounded_by_lock_timeout() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    let b = bench.link(2, "inst0").await;
    bench.core.device_lock(lock(a, 10_000)).await;

    let mut params = write_params(b, "*CLS\n");
    params.flags = OperationFlags::WAIT_LOCK | OperationFlags::END;
    params.lock_timeout_ms = 300;
    let start = Instant::now();
    let response = bench.core.device_write(params).await;
    assert_eq!(response.error, DeviceErrorCode::DeviceLockedByAnotherLink);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_lock_wakes_on_unlock() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    let b = bench.link(2, "inst0").await;
    bench.core.device_lock(lock(a, 60_000)).await;

    let core = bench.core.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        core.device_unlock(a).await;
    });

    let start = Instant::now();
    let params = DeviceLockParams {
        link_id: b,
        flags: OperationFlags::WAIT_LOCK,
        lock_timeout_ms: 5000,
    };
    assert_eq!(bench.core.device_lock(params).await.error, DeviceErrorCode::NoError);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(bench.write(a, "*CLS\n").await, DeviceErrorCode::DeviceLockedByAnotherLink);
}

#[tokio::test(start_paused = true)]
async fn test_create_link_with_lock_waits_for_holder() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    bench.core.device_lock(lock(a, 250)).await;

    let start = Instant::now();
    let mut params = vxi_tests::link_params(2, "inst0");
    params.lock_device = true;
    params.lock_timeout_ms = 1000;
    let response = bench.core.create_link(params).await;
    assert_eq!(response.error, DeviceErrorCode::NoError);
    assert!(start.elapsed() >= Duration::from_millis(250));

    let holder = bench.core.registry().lock_holder("inst0", Instant::now());
    assert_eq!(holder.map(|(id, _)| id), Some(response.link_id));
}

#[tokio::test]
async fn test_locks_are_per_device() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    let b = bench.link(2, "gpib0,5").await;
    bench.core.device_lock(lock(a, 60_000)).await;
    assert_eq!(bench.write(b, "*CLS\n").await, DeviceErrorCode::NoError);
    assert_eq!(bench.core.device_lock(lock(b, 60_000)).await.error, DeviceErrorCode::NoError);
}

#[tokio::test]
async fn test_unlock_without_lock() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    assert_eq!(
        bench.core.device_unlock(a).await.error,
        DeviceErrorCode::NoLockHeldByThisLink
    );
    bench.core.device_lock(lock(a, 60_000)).await;
    assert_eq!(bench.core.device_unlock(a).await.error, DeviceErrorCode::NoError);
    assert_eq!(
        bench.core.device_unlock(a).await.error,
        DeviceErrorCode::NoLockHeldByThisLink
    );
}

#[tokio::test(start_paused = true)]
async fn test_waiting_clear_does_not_block_destroy() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    let b = bench.link(2, "inst0").await;
    bench.core.device_lock(lock(a, 60_000)).await;

    let core = bench.core.clone();
    let clear = tokio::spawn(async move {
        let mut params = generic_params(b);
        params.flags = OperationFlags::WAIT_LOCK;
        params.lock_timeout_ms = 5000;
        core.device_clear(params).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The lock holder leaves while the clear is still waiting for it
    let start = Instant::now();
    let destroyed = timeout(Duration::from_secs(1), bench.core.destroy_link(a))
        .await
        .expect("destroy_link waited behind device_clear");
    assert_eq!(destroyed.error, DeviceErrorCode::NoError);
    assert!(start.elapsed() < Duration::from_millis(1));

    let cleared = timeout(Duration::from_secs(1), clear)
        .await
        .expect("device_clear still waiting")
        .unwrap();
    assert_eq!(cleared.error, DeviceErrorCode::NoError);
}

#[tokio::test(start_paused = true)]
async fn test_lock_contenders_both_get_their_turn() {
    let bench = Bench::new();
    let a = bench.link(1, "inst0").await;
    let b = bench.link(2, "inst0").await;
    bench.core.device_lock(lock(a, 60_000)).await;

    let core = bench.core.clone();
    let locker = tokio::spawn(async move {
        let params = DeviceLockParams {
            link_id: b,
            flags: OperationFlags::WAIT_LOCK,
            lock_timeout_ms: 5000,
        };
        core.device_lock(params).await
    });
    let core = bench.core.clone();
    let creator = tokio::spawn(async move {
        let mut params = vxi_tests::link_params(3, "inst0");
        params.lock_device = true;
        params.lock_timeout_ms = 5000;
        core.create_link(params).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    bench.core.device_unlock(a).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Whoever won hands over; the other one is still waiting
    let (winner, _) = bench
        .core
        .registry()
        .lock_holder("inst0", Instant::now())
        .expect("lock taken");
    assert_ne!(winner, a);
    assert_eq!(bench.core.device_unlock(winner).await.error, DeviceErrorCode::NoError);

    let locked = timeout(Duration::from_secs(1), locker).await.unwrap().unwrap();
    let created = timeout(Duration::from_secs(1), creator).await.unwrap().unwrap();
    assert_eq!(locked.error, DeviceErrorCode::NoError);
    assert_eq!(created.error, DeviceErrorCode::NoError);
    let (holder, _) = bench.core.registry().lock_holder("inst0", Instant::now()).unwrap();
    assert_ne!(holder, winner);
}
