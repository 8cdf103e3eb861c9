use super::{Client, ClientIdentity, ClientStats, EnqueueError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn test_client(capacity: usize) -> Client {
    let identity = ClientIdentity::new("U1", "W1").unwrap();
    Client::new(identity, capacity, CancellationToken::new())
}

#[test]
fn test_identity_new() {
    let identity = ClientIdentity::new("U1", "W1").unwrap();
    assert_eq!(identity.primary_id(), "U1");
    assert_eq!(identity.group_id(), "W1");
    assert_eq!(identity.to_string(), "U1@W1");
}

#[test]
fn test_identity_rejects_blank_components() {
    assert!(ClientIdentity::new("", "W1").is_err());
    assert!(ClientIdentity::new("U1", "  ").is_err());
}

#[test]
fn test_client_new() {
    let client = test_client(4);
    assert!(!client.id().to_string().is_empty());
    assert!(!client.is_closed());
    assert!(!client.lifetime().is_cancelled());
    assert_eq!(client.stats().delivered(), 0);
}

#[test]
fn test_client_ids_are_unique() {
    assert_ne!(test_client(1).id(), test_client(1).id());
}

#[test]
fn test_outbound_has_a_single_consumer() {
    let client = test_client(4);
    assert!(client.take_outbound().is_some());
    assert!(client.take_outbound().is_none());
}

#[tokio::test]
async fn test_send_timeout_delivers() {
    let client = test_client(4);
    let mut outbound = client.take_outbound().unwrap();

    client
        .send_timeout(Bytes::from_static(b"hello"), Duration::from_millis(100))
        .await
        .unwrap();

    assert_eq!(outbound.recv().await.unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(client.stats().delivered(), 1);
}

#[tokio::test]
async fn test_send_timeout_drops_when_full() {
    let client = test_client(1);
    let _outbound = client.take_outbound().unwrap();

    client
        .send_timeout(Bytes::from_static(b"first"), Duration::from_millis(50))
        .await
        .unwrap();
    let result = client
        .send_timeout(Bytes::from_static(b"second"), Duration::from_millis(50))
        .await;

    assert_eq!(result, Err(EnqueueError::TimedOut));
    assert_eq!(client.stats().dropped(), 1);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let client = test_client(4);
    let mut outbound = client.take_outbound().unwrap();

    assert!(client.close());
    assert!(!client.close());
    assert!(client.is_closed());
    assert!(client.lifetime().is_cancelled());

    // the consumer sees the end of the queue
    assert!(outbound.recv().await.is_none());
}

#[tokio::test]
async fn test_send_after_close_reports_closed() {
    let client = test_client(4);
    client.close();

    let result = client
        .send_timeout(Bytes::from_static(b"late"), Duration::from_millis(50))
        .await;
    assert_eq!(result, Err(EnqueueError::Closed));
}

#[tokio::test]
async fn test_cancel_interrupts_a_blocked_send() {
    let client = test_client(1);
    let _outbound = client.take_outbound().unwrap();
    client
        .send_timeout(Bytes::from_static(b"fill"), Duration::from_millis(50))
        .await
        .unwrap();

    let lifetime = client.lifetime().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        lifetime.cancel();
    });

    let result = client
        .send_timeout(Bytes::from_static(b"blocked"), Duration::from_secs(5))
        .await;
    assert_eq!(result, Err(EnqueueError::Cancelled));
    assert_eq!(client.stats().dropped(), 0);
}

#[tokio::test]
async fn test_cancelled_client_refuses_payload_even_with_room() {
    let identity = ClientIdentity::new("U1", "W1").unwrap();
    let lifetime = CancellationToken::new();
    lifetime.cancel();
    // cancelled but not yet closed: the sender is still in place
    let client = Client::new(identity, 4, lifetime);
    let mut outbound = client.take_outbound().unwrap();

    for _ in 0..32 {
        let result = client
            .send_timeout(Bytes::from_static(b"late"), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(EnqueueError::Cancelled));
    }
    assert!(outbound.try_recv().is_err());
    assert_eq!(client.stats().delivered(), 0);
}

#[test]
fn test_counts_reach_shared_totals() {
    let totals = Arc::new(ClientStats::default());
    let first = test_client(1).with_totals(totals.clone());
    let second = test_client(1).with_totals(totals.clone());

    first.stats().record_malformed();
    second.stats().record_malformed();
    second.stats().record_malformed();

    assert_eq!(first.stats().malformed(), 1);
    assert_eq!(second.stats().malformed(), 2);
    assert_eq!(totals.malformed(), 3);
}
