//! Radio capability — the broadcast medium this protocol runs over.
//!
//! The medium is injected. On a phone it wraps the platform's
//! low-energy advertiser and scanner; the daemon supplies a link-local
//! multicast emulation; tests use [`loopback::LoopbackRadio`].

use std::sync::{Arc, Mutex, MutexGuard};

use nearcard_core::ServiceId;

pub mod loopback;

/// Callback receiving raw frames tagged with the service they arrived under.
///
/// Invoked from whatever thread the radio delivers on, possibly many at once.
pub type FrameSink = Arc<dyn Fn(&ServiceId, &[u8]) + Send + Sync>;

/// Advertising power/latency trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPower {
    UltraLow,
    Low,
    Medium,
    High,
}

/// How adverts are put on air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub tx_power: TxPower,
    /// Contact adverts are pure broadcast; nobody connects back.
    pub connectable: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::LowLatency,
            tx_power: TxPower::High,
            connectable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::LowLatency,
        }
    }
}

/// Only frames advertised under `service` are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub service: ServiceId,
}

impl ScanFilter {
    pub fn service(service: ServiceId) -> Self {
        Self { service }
    }

    pub fn matches(&self, service: &ServiceId) -> bool {
        self.service == *service
    }
}

/// Failures reported by the radio layer.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("advertising already started")]
    AlreadyStarted,

    #[error("feature unsupported by this radio")]
    FeatureUnsupported,

    #[error("too many advertisers")]
    TooManyAdvertisers,

    #[error("advert of {0} bytes is too large")]
    DataTooLarge(usize),

    #[error("radio internal error: {0}")]
    Internal(String),

    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The broadcast medium: fire-and-forget adverts plus a filtered listen stream.
///
/// One advert is held at a time; starting a new one while another is on air
/// is the caller's mistake and may be refused with `AlreadyStarted`.
pub trait Radio: Send + Sync {
    /// Begin advertising `payload` under `service` until `stop_advertising`.
    fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        service: &ServiceId,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    /// Take the current advert off air. No-op if none is held.
    fn stop_advertising(&self);

    /// Deliver every frame matching `filter` to `sink` until `stop_scan`.
    fn start_scan(
        &self,
        filter: &ScanFilter,
        settings: &ScanSettings,
        sink: FrameSink,
    ) -> Result<(), RadioError>;

    fn stop_scan(&self);
}

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
