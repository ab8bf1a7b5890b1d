use std::sync::Arc;
use std::time::Duration;

use nearcard_core::ContactRecord;
use nearcard_services::{
    FlagStore, JsonFlagStore, LoopbackMedium, ProfileStore, ProximityError, BROADCAST_ENABLED_KEY,
};

use crate::*;

#[tokio::test(start_paused = true)]
async fn test_double_start_runs_one_loop() {
    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, ann()).await;

    sender.service.set_broadcasting_enabled(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let session = sender.service.broadcaster().session().expect("loop running");

    sender.service.set_broadcasting_enabled(true).await.unwrap();
    sender.service.start_broadcasting(bob()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    let sent = sender.radio.sent();
    // Two circles of two packets, all from the first session.
    assert_eq!(sent.len(), 4);
    assert!(sent.iter().all(|f| f[..2] == session.0));

    sender.service.stop_broadcasting().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_oversized_profile_is_refused() {
    let medium = LoopbackMedium::new();
    let record = ContactRecord {
        avatar_url: Some(format!("https://cdn.example/{}", "a".repeat(1_200))),
        ..ann()
    };
    let sender = device_with_profile(&medium, record.clone()).await;

    let err = sender.service.set_broadcasting_enabled(true).await.unwrap_err();
    assert!(matches!(err, ProximityError::PayloadTooLarge(_)));

    let err = sender.service.start_broadcasting(record).await.unwrap_err();
    assert!(matches!(err, ProximityError::PayloadTooLarge(_)));

    assert!(!sender.service.is_broadcasting_enabled().unwrap());
    assert!(sender.radio.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_enable_without_profile() {
    let medium = LoopbackMedium::new();
    let sender = device(&medium);

    let err = sender.service.set_broadcasting_enabled(true).await.unwrap_err();
    assert!(matches!(err, ProximityError::ProfileNotSet));
    assert!(!sender.service.is_broadcasting_enabled().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_disable_takes_advert_off_air() {
    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, ann()).await;
    let receiver = device(&medium);
    receiver.service.start_scanning().unwrap();

    sender.service.set_broadcasting_enabled(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sender.radio.on_air().is_some());

    sender.service.set_broadcasting_enabled(false).await.unwrap();
    assert!(sender.radio.on_air().is_none());
    assert!(!sender.service.is_broadcasting_enabled().unwrap());

    let before = sender.radio.sent().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sender.radio.sent().len(), before, "nothing sent after disable");
}

/// Broadcasting switched on survives a restart and resumes from disk.
#[tokio::test(start_paused = true)]
async fn test_enabled_broadcast_resumes_after_restart() {
    let dir = temp_dir("resume");
    let state_path = dir.join("state.json");
    let profile_path = dir.join("profile.json");
    let medium = LoopbackMedium::new();

    {
        let flags = Arc::new(JsonFlagStore::open(&state_path).unwrap());
        let profile = ProfileStore::with_persistence(profile_path.clone()).unwrap();
        let first = device_with(&medium, flags, profile);
        first.service.profile().set(ann()).await.unwrap();
        first.service.set_broadcasting_enabled(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Process exit: the loop ends, the durable flag stays.
        first.service.broadcaster().halt();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!first.service.broadcaster().is_active());
    }
    assert!(JsonFlagStore::open(&state_path)
        .unwrap()
        .get(BROADCAST_ENABLED_KEY)
        .unwrap());

    let flags = Arc::new(JsonFlagStore::open(&state_path).unwrap());
    let profile = ProfileStore::with_persistence(profile_path).unwrap();
    let second = device_with(&medium, flags, profile);
    let receiver = device(&medium);
    receiver.service.start_scanning().unwrap();

    assert!(second.service.resume_broadcasting().await.unwrap());
    assert_eq!(receiver.service.scan_once().await, vec![ann()]);

    second.service.stop_broadcasting().unwrap();
    assert!(!second.service.is_broadcasting_enabled().unwrap());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(start_paused = true)]
async fn test_disable_straight_after_enable() {
    let medium = LoopbackMedium::new();
    let sender = device_with_profile(&medium, ann()).await;
    let receiver = device(&medium);
    receiver.service.start_scanning().unwrap();

    sender.service.set_broadcasting_enabled(true).await.unwrap();
    sender.service.set_broadcasting_enabled(false).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!sender.service.broadcaster().is_active());
    assert!(!sender.service.is_broadcasting_enabled().unwrap());
    assert!(sender.radio.sent().is_empty());
    assert!(receiver.service.scan_once().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_straight_after_resume() {
    let dir = temp_dir("resume-stop");
    let flags = Arc::new(JsonFlagStore::open(dir.join("state.json")).unwrap());
    flags.set(BROADCAST_ENABLED_KEY, true).unwrap();

    let medium = LoopbackMedium::new();
    let sender = device_with(&medium, flags.clone(), ProfileStore::new());
    sender.service.profile().set(ann()).await.unwrap();

    assert!(sender.service.resume_broadcasting().await.unwrap());
    sender.service.stop_broadcasting().unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!sender.service.broadcaster().is_active());
    assert!(!flags.get(BROADCAST_ENABLED_KEY).unwrap());
    assert!(sender.radio.sent().is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}
