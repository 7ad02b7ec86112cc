// src/tests/connection_tests.rs
use crate::db::ConnectionState;
use crate::errors::StoreError;
use crate::tests::utils::{connection, fast_settings, MockProcess};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn concurrent_acquire_starts_process_once() {
    let process = Arc::new(MockProcess::default());
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.acquire().await.map(|_| ()) })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(process.starts(), 1);
    assert_eq!(conn.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn running_process_is_not_started() {
    let process = Arc::new(MockProcess::default());
    process.running.store(true, std::sync::atomic::Ordering::SeqCst);
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    let _guard = conn.acquire().await.unwrap();
    assert_eq!(process.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn closes_after_idle_timeout() {
    let process = Arc::new(MockProcess::default());
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    drop(conn.acquire().await.unwrap());
    assert_eq!(conn.state(), ConnectionState::Ready);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(conn.state(), ConnectionState::Idle);
    assert_eq!(process.stops(), 1);

    // The next caller starts it again.
    drop(conn.acquire().await.unwrap());
    assert_eq!(process.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn reacquire_resets_idle_timer() {
    let process = Arc::new(MockProcess::default());
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    drop(conn.acquire().await.unwrap());
    tokio::time::sleep(Duration::from_secs(30)).await;
    drop(conn.acquire().await.unwrap());
    tokio::time::sleep(Duration::from_secs(45)).await;

    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(process.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn held_guard_keeps_connection_open() {
    let process = Arc::new(MockProcess::default());
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    let guard = conn.acquire().await.unwrap();
    drop(conn.acquire().await.unwrap());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(conn.state(), ConnectionState::Ready);
    drop(guard);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_bounded_start_attempts() {
    let process = Arc::new(MockProcess::failing());
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    let err = conn.acquire().await.err().unwrap();
    assert!(matches!(err, StoreError::ConnectionUnavailable { attempts: 3, .. }));
    assert_eq!(process.starts(), 3);
    assert_eq!(conn.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_aborts_readiness_poll() {
    let process = Arc::new(MockProcess::unhealthy());
    let cancel = CancellationToken::new();
    let conn = connection(Arc::clone(&process), fast_settings(), cancel.clone());

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(conn.state(), ConnectionState::Connecting);

    cancel.cancel();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(conn.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn acquire_while_idle_close_is_stopping_restarts_process() {
    let process = Arc::new(MockProcess::slow_stop(Duration::from_secs(2)));
    let conn = connection(Arc::clone(&process), fast_settings(), CancellationToken::new());

    drop(conn.acquire().await.unwrap());
    tokio::time::sleep(Duration::from_millis(60_500)).await;
    assert_eq!(conn.state(), ConnectionState::Closing);
    assert_eq!(process.stops(), 1);

    // Waits for the stop to finish, then brings the process back.
    let guard = conn.acquire().await.unwrap();
    assert_eq!(process.starts(), 2);
    assert!(process.is_running());
    assert_eq!(conn.state(), ConnectionState::Ready);

    // Nothing left over from the first stop takes it down again.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(process.is_running());
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(process.stops(), 1);
    drop(guard);
}
