//! nearcard integration tests.
//!
//! Every device in these tests shares one in-process loopback medium, so
//! they run anywhere, without radio hardware or privileges:
//!
//!   cargo test --test integration
//!
//! Time is paused in the async tests; sleeps advance the clock instantly.

use std::path::PathBuf;
use std::sync::Arc;

use nearcard_core::config::NearcardConfig;
use nearcard_core::ContactRecord;
use nearcard_services::{
    FlagStore, LoopbackMedium, LoopbackRadio, MemoryFlagStore, ProfileStore, ProximityService,
};

mod exchange;
mod lifecycle;

// ── Harness ───────────────────────────────────────────────────────────────────

/// One simulated phone on the shared medium.
pub struct Device {
    pub radio: Arc<LoopbackRadio>,
    pub service: ProximityService,
}

/// A device with in-memory state.
pub fn device(medium: &Arc<LoopbackMedium>) -> Device {
    device_with(medium, Arc::new(MemoryFlagStore::new()), ProfileStore::new())
}

pub fn device_with(
    medium: &Arc<LoopbackMedium>,
    flags: Arc<dyn FlagStore>,
    profile: ProfileStore,
) -> Device {
    let radio = Arc::new(medium.radio());
    let service =
        ProximityService::from_config(radio.clone(), flags, profile, &NearcardConfig::default());
    Device { radio, service }
}

/// A device that has stored `record` as its profile.
pub async fn device_with_profile(medium: &Arc<LoopbackMedium>, record: ContactRecord) -> Device {
    let device = device(medium);
    device
        .service
        .profile()
        .set(record)
        .await
        .expect("profile should be accepted");
    device
}

pub fn ann() -> ContactRecord {
    ContactRecord {
        phone: Some("123".into()),
        ..ContactRecord::new("Ann")
    }
}

pub fn bob() -> ContactRecord {
    ContactRecord {
        surname: Some("Stone".into()),
        organization: Some("Stone & Sons".into()),
        ..ContactRecord::new("Bob")
    }
}

/// Fresh per-test directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nearcard-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Contacts sorted by name, for comparisons that ignore arrival order.
pub fn by_name(mut contacts: Vec<ContactRecord>) -> Vec<ContactRecord> {
    contacts.sort_by(|a, b| a.name.cmp(&b.name));
    contacts
}
