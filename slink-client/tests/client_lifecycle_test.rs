//! Client lifecycle integration tests: connect/disconnect promises,
//! lifecycle hooks, dispose, and reconnection behavior seen from the host

mod common;

use common::{fake_transport, standard_responder, test_client, test_client_with, wait_until, ServerOptions};
use serde_json::{json, Value};
use slink_core::{Error, SessionId};
use slink_session::SessionStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_connect_resolves_and_hooks_fire() {
    let (transport, handle) = fake_transport();
    handle.set_responder(standard_responder(ServerOptions::new()));
    let client = test_client(transport);

    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));

    let connected_count = connected.clone();
    client
        .on_connected(move || {
            let connected = connected_count.clone();
            async move {
                connected.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
    let disconnected_count = disconnected.clone();
    client
        .on_disconnected(move || {
            let disconnected = disconnected_count.clone();
            async move {
                disconnected.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    client.connect().await.unwrap();
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(client.status().await, SessionStatus::Connected);

    // Connect while already connected resolves immediately.
    client.connect().await.unwrap();
    assert_eq!(connected.load(Ordering::SeqCst), 1);

    client.disconnect().await.unwrap();
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(client.status().await, SessionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_rejects_after_budget() {
    let (transport, handle) = fake_transport();
    handle.fail_next_connects(u32::MAX);
    let client = test_client_with(transport, |builder| {
        builder
            .max_reconnect_attempts(1)
            .reconnect_interval(Duration::from_millis(50))
    });

    let disconnected = Arc::new(AtomicUsize::new(0));
    let disconnected_count = disconnected.clone();
    client
        .on_disconnected(move || {
            let disconnected = disconnected_count.clone();
            async move {
                disconnected.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    let result = client.connect().await;
    match result {
        Err(Error::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {other:?}"),
    }

    // Initial attempt plus one scheduled retry, one terminal notification.
    assert_eq!(handle.connects(), 2);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(client.status().await, SessionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_double_disconnect_is_idempotent() {
    let (transport, handle) = fake_transport();
    handle.set_responder(standard_responder(ServerOptions::new()));
    let client = test_client(transport);

    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.status().await, SessionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_rejects_pending_and_stops_worker() {
    let (transport, handle) = fake_transport();
    let options = ServerOptions::new();
    handle.set_responder(standard_responder(options.clone()));
    let client = Arc::new(test_client(transport));
    client.connect().await.unwrap();

    options.silent_ping.store(true, Ordering::SeqCst);
    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request::<Value>("ping", json!({}), Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.dispose().await;

    let result = pending.await.unwrap();
    match result {
        Err(Error::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {other:?}"),
    }

    // The worker is gone: further calls fail with WorkerLost.
    let after: slink_core::Result<Value> = client
        .request("ping", json!({}), Duration::from_millis(100))
        .await;
    assert!(matches!(after, Err(Error::WorkerLost)));
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_loss_reconnects_and_closes_subscriptions() {
    let (transport, handle) = fake_transport();
    let options = ServerOptions::new();
    options.swallow_keepalives.store(true, Ordering::SeqCst);
    handle.set_responder(standard_responder(options));
    let client = test_client_with(transport, |builder| {
        builder
            .keepalive_interval(Duration::from_millis(200))
            .max_keepalive_failures(2)
            .reconnect_interval(Duration::from_millis(100))
    });

    let connected = Arc::new(AtomicUsize::new(0));
    let connected_count = connected.clone();
    client
        .on_connected(move || {
            let connected = connected_count.clone();
            async move {
                connected.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    client.connect().await.unwrap();
    assert_eq!(client.session_id().await, Some(SessionId::from("S1")));

    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = errors.clone();
    client
        .subscribe(
            "flow",
            json!({}),
            |_data| async {},
            move |_err| {
                let errors = error_count.clone();
                async move {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .await
        .unwrap();

    // Silence kills the first session; the worker reconnects into S2.
    {
        let connected = connected.clone();
        wait_until(move || connected.load(Ordering::SeqCst) == 2).await;
    }
    assert_eq!(client.session_id().await, Some(SessionId::from("S2")));
    assert_eq!(client.status().await, SessionStatus::Connected);

    // The old subscription did not survive the reconnect.
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
