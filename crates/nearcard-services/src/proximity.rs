//! ProximityService — the surface the host application talks to.
//!
//! Bundles the broadcaster, the scanner and the user's profile. The host
//! toggles broadcasting with [`ProximityService::set_broadcasting_enabled`]
//! and polls [`ProximityService::scan_once`] from its refresh loop.

use std::sync::{Arc, Mutex};

use nearcard_core::config::NearcardConfig;
use nearcard_core::wire::WireError;
use nearcard_core::ContactRecord;
use tokio::task::JoinHandle;

use crate::broadcaster::{BroadcastClaim, BroadcastTiming, Broadcaster};
use crate::profile::{ProfileError, ProfileStore};
use crate::radio::{lock, Radio, RadioError};
use crate::reassembly::ReassemblyCache;
use crate::scanner::Scanner;
use crate::store::{FlagStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    #[error("contact does not fit the packet numbering: {0}")]
    PayloadTooLarge(WireError),
    #[error(transparent)]
    Wire(WireError),
    #[error("no profile stored, nothing to broadcast")]
    ProfileNotSet,
    #[error("radio: {0}")]
    Radio(#[from] RadioError),
    #[error("durable state: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl From<WireError> for ProximityError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::PayloadTooLarge { .. } => Self::PayloadTooLarge(e),
            other => Self::Wire(other),
        }
    }
}

pub struct ProximityService {
    broadcaster: Arc<Broadcaster>,
    scanner: Scanner,
    profile: ProfileStore,
    broadcast_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProximityService {
    pub fn new(broadcaster: Arc<Broadcaster>, scanner: Scanner, profile: ProfileStore) -> Self {
        Self {
            broadcaster,
            scanner,
            profile,
            broadcast_task: Mutex::new(None),
        }
    }

    /// Wire both halves onto one radio using the configured timings.
    pub fn from_config(
        radio: Arc<dyn Radio>,
        flags: Arc<dyn FlagStore>,
        profile: ProfileStore,
        config: &NearcardConfig,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(
            radio.clone(),
            flags,
            BroadcastTiming::from(&config.broadcast),
        ));
        let scanner = Scanner::new(radio, ReassemblyCache::new(), &config.scan);
        Self::new(broadcaster, scanner, profile)
    }

    pub fn start_scanning(&self) -> Result<(), ProximityError> {
        Ok(self.scanner.start()?)
    }

    pub fn stop_scanning(&self) {
        self.scanner.stop();
    }

    /// One scan round: wait a dwell period, return the contacts in range.
    pub async fn scan_once(&self) -> Vec<ContactRecord> {
        self.scanner.scan_once().await
    }

    /// Broadcast `record` until stopped. See [`Broadcaster::start_broadcasting`].
    pub async fn start_broadcasting(&self, record: ContactRecord) -> Result<(), ProximityError> {
        self.broadcaster.start_broadcasting(record).await
    }

    pub fn stop_broadcasting(&self) -> Result<(), ProximityError> {
        self.broadcaster.stop_broadcasting()?;
        // The loop ends on its own once woken.
        lock(&self.broadcast_task).take();
        Ok(())
    }

    pub fn is_broadcasting_enabled(&self) -> Result<bool, ProximityError> {
        self.broadcaster.is_broadcasting_enabled()
    }

    /// Switch broadcasting of the stored profile on or off.
    ///
    /// Turning it on claims the transmit loop, setting both flags, before
    /// spawning it, so a stop that follows at once is never lost. Fails with
    /// `ProfileNotSet` when no profile is stored and with `PayloadTooLarge`
    /// when the profile cannot be framed.
    pub async fn set_broadcasting_enabled(&self, enabled: bool) -> Result<(), ProximityError> {
        if !enabled {
            return self.stop_broadcasting();
        }

        let record = self.profile.get().await.ok_or(ProximityError::ProfileNotSet)?;
        if let Some(claim) = self.broadcaster.begin(record)? {
            self.spawn_loop(claim);
        }
        Ok(())
    }

    /// Restart broadcasting at startup if it was on when the process ended.
    ///
    /// Returns whether a loop was started.
    pub async fn resume_broadcasting(&self) -> Result<bool, ProximityError> {
        if !self.broadcaster.is_broadcasting_enabled()? {
            return Ok(false);
        }
        let Some(record) = self.profile.get().await else {
            tracing::warn!("broadcast was enabled but no profile is stored");
            return Ok(false);
        };

        match self.broadcaster.begin_resume(record)? {
            Some(claim) => {
                self.spawn_loop(claim);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn spawn_loop(&self, claim: BroadcastClaim) {
        let broadcaster = self.broadcaster.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = broadcaster.transmit(claim).await {
                tracing::warn!(error = %e, "broadcast loop ended with error");
            }
        });
        *lock(&self.broadcast_task) = Some(handle);
    }

    pub fn profile(&self) -> &ProfileStore {
        &self.profile
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::radio::loopback::{LoopbackMedium, LoopbackRadio};
    use crate::store::{MemoryFlagStore, BROADCAST_ENABLED_KEY};

    fn ann() -> ContactRecord {
        ContactRecord {
            phone: Some("123".into()),
            ..ContactRecord::new("Ann")
        }
    }

    fn service(medium: &Arc<LoopbackMedium>, flags: &MemoryFlagStore) -> ProximityService {
        service_with_radio(medium, flags).1
    }

    fn service_with_radio(
        medium: &Arc<LoopbackMedium>,
        flags: &MemoryFlagStore,
    ) -> (Arc<LoopbackRadio>, ProximityService) {
        let radio = Arc::new(medium.radio());
        let svc = ProximityService::from_config(
            radio.clone(),
            Arc::new(flags.clone()),
            ProfileStore::new(),
            &NearcardConfig::default(),
        );
        (radio, svc)
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_without_profile_fails() {
        let medium = LoopbackMedium::new();
        let flags = MemoryFlagStore::new();
        let svc = service(&medium, &flags);

        let err = svc.set_broadcasting_enabled(true).await.unwrap_err();
        assert!(matches!(err, ProximityError::ProfileNotSet));
        assert!(!svc.is_broadcasting_enabled().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_profile_reaches_a_nearby_scanner() {
        let medium = LoopbackMedium::new();
        let sender = service(&medium, &MemoryFlagStore::new());
        let receiver = service(&medium, &MemoryFlagStore::new());

        receiver.start_scanning().unwrap();
        sender.profile().set(ann()).await.unwrap();
        sender.set_broadcasting_enabled(true).await.unwrap();

        assert_eq!(receiver.scan_once().await, vec![ann()]);
        assert!(sender.is_broadcasting_enabled().unwrap());

        sender.set_broadcasting_enabled(false).await.unwrap();
        assert!(!sender.is_broadcasting_enabled().unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sender.broadcaster().is_active());

        receiver.stop_scanning();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_profile_is_rejected_up_front() {
        let medium = LoopbackMedium::new();
        let flags = MemoryFlagStore::new();
        let svc = service(&medium, &flags);
        svc.profile()
            .set(ContactRecord {
                web_page: Some("w".repeat(1_500)),
                ..ann()
            })
            .await
            .unwrap();

        let err = svc.set_broadcasting_enabled(true).await.unwrap_err();
        assert!(matches!(err, ProximityError::PayloadTooLarge(_)));
        assert!(!flags.get(BROADCAST_ENABLED_KEY).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_restarts_after_restart() {
        let medium = LoopbackMedium::new();
        let flags = MemoryFlagStore::new();
        flags.set(BROADCAST_ENABLED_KEY, true).unwrap();

        let svc = service(&medium, &flags);
        // Enabled but nothing to send.
        assert!(!svc.resume_broadcasting().await.unwrap());

        svc.profile().set(ann()).await.unwrap();
        assert!(svc.resume_broadcasting().await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(svc.broadcaster().is_active());

        svc.stop_broadcasting().unwrap();
        assert!(!svc.is_broadcasting_enabled().unwrap());
        assert!(!svc.resume_broadcasting().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_right_after_enable_stays_off() {
        let medium = LoopbackMedium::new();
        let flags = MemoryFlagStore::new();
        let (radio, svc) = service_with_radio(&medium, &flags);
        svc.profile().set(ann()).await.unwrap();

        svc.set_broadcasting_enabled(true).await.unwrap();
        assert!(svc.broadcaster().is_active());
        svc.set_broadcasting_enabled(false).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!svc.broadcaster().is_active());
        assert!(!flags.get(BROADCAST_ENABLED_KEY).unwrap());
        assert!(radio.sent().is_empty());
        assert!(radio.on_air().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_right_after_resume_stays_off() {
        let medium = LoopbackMedium::new();
        let flags = MemoryFlagStore::new();
        flags.set(BROADCAST_ENABLED_KEY, true).unwrap();
        let (radio, svc) = service_with_radio(&medium, &flags);
        svc.profile().set(ann()).await.unwrap();

        assert!(svc.resume_broadcasting().await.unwrap());
        svc.stop_broadcasting().unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!svc.broadcaster().is_active());
        assert!(!flags.get(BROADCAST_ENABLED_KEY).unwrap());
        assert!(radio.sent().is_empty());
    }

    #[test]
    fn only_oversize_maps_to_payload_too_large() {
        let err = ProximityError::from(WireError::PayloadTooLarge {
            packets: 200,
            max: 127,
        });
        assert!(matches!(err, ProximityError::PayloadTooLarge(_)));

        let err = ProximityError::from(WireError::InvalidUtf8);
        assert!(matches!(err, ProximityError::Wire(WireError::InvalidUtf8)));
    }
}
