//! End-to-end round trips over an in-process duplex byte stream: one
//! task runs a [`Router`], the other a [`Client`], connected through
//! `tokio::io::duplex` instead of a real socket. Covers the scenarios
//! spec §8 lists as literal — pub/sub fan-out, RPC call/yield, and call
//! cancellation in kill mode — at the level the teacher's own
//! `client.rs`/`messaging.rs` integration would have exercised a real
//! socket pair.

use std::time::Duration;

use tokio::time::timeout;

use wampire::client::Client;
use wampire::session::CallChit;
use wampire::transport::{HandshakeConfig, Serializer};
use wampire::{
    ArgList, CallOptions, CancelMode, ClientRoles, HelloDetails, MatchingPolicy, PublishOptions,
    Reason, Router, Value, URI,
};

const REALM: &str = "wampire.tests";

async fn connected_client(router: &Router) -> Client {
    let (client_io, router_io) = tokio::io::duplex(64 * 1024);
    let router = router.clone();
    tokio::spawn(async move {
        router.accept(router_io, None).await.expect("router accept failed");
    });
    let handshake = HandshakeConfig::new(10, Serializer::Json);
    Client::connect(client_io, handshake, None, None)
        .await
        .expect("client handshake failed")
}

#[tokio::test]
async fn join_subscribe_publish_round_trip() {
    let router = Router::new();
    router.add_realm(REALM);

    let publisher = connected_client(&router).await;
    publisher
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("publisher join failed");

    let subscriber = connected_client(&router).await;
    subscriber
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("subscriber join failed");

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    subscriber
        .subscribe(
            URI::new("ca.dal.topic"),
            Box::new(move |args, _kwargs, _details| {
                let _ = event_tx.send(args);
            }),
        )
        .await
        .expect("subscribe failed");

    // give the router a moment to register the subscription before
    // publishing, since subscribe/publish are independent round trips.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let publication_id = publisher
        .publish(
            URI::new("ca.dal.topic"),
            PublishOptions::new(true),
            Some(vec![Value::Int(42)]),
            None,
        )
        .await
        .expect("publish failed");
    assert!(publication_id.is_some());

    let received = timeout(Duration::from_secs(1), event_rx.recv())
        .await
        .expect("event never arrived")
        .expect("event channel closed");
    assert_eq!(received, Some(vec![Value::Int(42)]));
}

#[tokio::test]
async fn call_routes_to_callee_and_back() {
    let router = Router::new();
    router.add_realm(REALM);

    let callee = connected_client(&router).await;
    callee
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("callee join failed");
    callee
        .enroll(
            URI::new("ca.dal.add"),
            MatchingPolicy::Strict,
            Box::new(|args, _kwargs, _details| {
                Box::pin(async move {
                    let args = args.unwrap_or_default();
                    let sum = args.get_int(0).unwrap_or(0) + args.get_int(1).unwrap_or(0);
                    Ok((Some(vec![Value::Int(sum)]), None))
                })
            }),
        )
        .await
        .expect("enroll failed");

    let caller = connected_client(&router).await;
    caller
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("caller join failed");

    let (_chit, future) = caller
        .call(
            URI::new("ca.dal.add"),
            CallOptions::new(),
            Some(vec![Value::Int(1), Value::Int(2)]),
            None,
        )
        .await
        .expect("call send failed");
    let (args, _kwargs) = timeout(Duration::from_secs(1), future)
        .await
        .expect("call never completed")
        .expect("call returned an error");
    assert_eq!(args, Some(vec![Value::Int(3)]));
}

#[tokio::test]
async fn call_without_registration_reports_no_such_procedure() {
    let router = Router::new();
    router.add_realm(REALM);

    let caller = connected_client(&router).await;
    caller
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("caller join failed");

    let (_chit, future) = caller
        .call(URI::new("ca.dal.missing"), CallOptions::new(), None, None)
        .await
        .expect("call send failed");
    let err = timeout(Duration::from_secs(1), future)
        .await
        .expect("call never completed")
        .expect_err("call unexpectedly succeeded");
    assert_eq!(err.error_uri(), Some(Reason::NoSuchProcedure.to_string()));
}

#[tokio::test]
async fn kill_mode_cancel_interrupts_callee_and_cancels_caller() {
    let router = Router::new();
    router.add_realm(REALM);

    let (interrupted_tx, mut interrupted_rx) = tokio::sync::mpsc::unbounded_channel();

    let callee = connected_client(&router).await;
    callee
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("callee join failed");
    callee
        .enroll_cancellable(
            URI::new("ca.dal.never_replies"),
            MatchingPolicy::Strict,
            Box::new(|_args, _kwargs, _details| {
                // Deferred forever: only resolved by the interrupt handler below.
                Box::pin(std::future::pending())
            }),
            Some(Box::new(move |_options| {
                let interrupted_tx = interrupted_tx.clone();
                Box::pin(async move {
                    let _ = interrupted_tx.send(());
                    Err(wampire::CallError::new(Reason::Cancelled, None, None))
                })
            })),
        )
        .await
        .expect("enroll failed");

    let caller = connected_client(&router).await;
    caller
        .join(URI::new(REALM), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("caller join failed");

    let (chit, future): (CallChit, _) = caller
        .call(URI::new("ca.dal.never_replies"), CallOptions::new(), None, None)
        .await
        .expect("call send failed");

    tokio::time::sleep(Duration::from_millis(20)).await;
    chit.cancel(CancelMode::Kill);

    let outcome = timeout(Duration::from_secs(1), future)
        .await
        .expect("call never completed");
    assert!(outcome.is_err(), "cancelled call should resolve with an error");

    timeout(Duration::from_secs(1), interrupted_rx.recv())
        .await
        .expect("callee was never interrupted")
        .expect("interrupt channel closed");
}
