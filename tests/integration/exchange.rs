use std::time::Duration;

use nearcard_core::{encode, frame, ContactRecord, SessionId};
use nearcard_services::{LoopbackMedium, ReassemblyCache};

use crate::*;

/// Framing on one side, reverse-order delivery, reassembly on the other.
#[test]
fn test_reverse_order_delivery_reassembles() {
    let payload = encode(&ann());
    assert_eq!(payload, "n:Ann,p:123");

    let parts = frame(SessionId(*b"AB"), &payload).unwrap();
    assert_eq!(parts.len(), 2);

    let cache = ReassemblyCache::new();
    for part in parts.iter().rev() {
        cache.ingest(&part.to_frame());
    }
    assert_eq!(cache.snapshot(), vec![ann()]);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reaches_scanner() {
    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, ann()).await;
    let receiver = device(&medium);

    receiver.service.start_scanning().unwrap();
    sender.service.set_broadcasting_enabled(true).await.unwrap();

    assert_eq!(receiver.service.scan_once().await, vec![ann()]);

    sender.service.stop_broadcasting().unwrap();
    receiver.service.stop_scanning();
}

#[tokio::test(start_paused = true)]
async fn test_two_senders_one_scanner() {
    let medium = LoopbackMedium::new();
    let a = device_with_profile(&medium, ann()).await;
    let b = device_with_profile(&medium, bob()).await;
    let receiver = device(&medium);

    receiver.service.start_scanning().unwrap();
    a.service.set_broadcasting_enabled(true).await.unwrap();
    b.service.set_broadcasting_enabled(true).await.unwrap();

    let contacts = receiver.service.scan_once().await;
    assert_eq!(by_name(contacts), vec![ann(), bob()]);

    a.service.stop_broadcasting().unwrap();
    b.service.stop_broadcasting().unwrap();
}

/// A scanner that starts mid-circle still gets the contact on the next one.
#[tokio::test(start_paused = true)]
async fn test_late_scanner_catches_next_circle() {
    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, ann()).await;
    let receiver = device(&medium);

    sender.service.set_broadcasting_enabled(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    receiver.service.start_scanning().unwrap();
    assert_eq!(receiver.service.scan_once().await, vec![ann()]);

    sender.service.stop_broadcasting().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sender_leaving_range_expires() {
    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, ann()).await;
    let receiver = device(&medium);

    receiver.service.start_scanning().unwrap();
    sender.service.set_broadcasting_enabled(true).await.unwrap();
    assert_eq!(receiver.service.scan_once().await, vec![ann()]);

    sender.service.stop_broadcasting().unwrap();

    // Still listed until the entry outlives its TTL.
    assert_eq!(receiver.service.scan_once().await, vec![ann()]);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(receiver.service.scan_once().await.is_empty());
}

/// Separators, escapes and multi-byte text survive the trip over the air.
#[tokio::test(start_paused = true)]
async fn test_awkward_values_arrive_intact() {
    let record = ContactRecord {
        surname: Some("Ångström".into()),
        organization: Some("Acme, Inc.".into()),
        web_page: Some("https://acme.example/a,b".into()),
        messenger: Some(r"@ann\work".into()),
        job_title: Some("日本語のエンジニア".into()),
        ..ContactRecord::new("Zoë")
    };

    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, record.clone()).await;
    let receiver = device(&medium);

    receiver.service.start_scanning().unwrap();
    sender.service.set_broadcasting_enabled(true).await.unwrap();

    // Long record: let a full circle go by before looking.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(receiver.service.scan_once().await, vec![record]);

    sender.service.stop_broadcasting().unwrap();
}
