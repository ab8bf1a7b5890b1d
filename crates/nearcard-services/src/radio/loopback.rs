//! In-process broadcast medium.
//!
//! Every [`LoopbackRadio`] attached to the same [`LoopbackMedium`] hears the
//! adverts of every other radio on it, synchronously, at the moment the
//! advert starts. A radio never hears itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use nearcard_core::ServiceId;

use super::{lock, AdvertiseSettings, FrameSink, Radio, RadioError, ScanFilter, ScanSettings};

/// Shared air between loopback radios.
#[derive(Default)]
pub struct LoopbackMedium {
    listeners: DashMap<u64, (ScanFilter, FrameSink)>,
    next_radio: AtomicU64,
}

impl LoopbackMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new radio to this medium.
    pub fn radio(self: &Arc<Self>) -> LoopbackRadio {
        LoopbackRadio {
            medium: self.clone(),
            id: self.next_radio.fetch_add(1, Ordering::Relaxed),
            on_air: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_advertising: AtomicBool::new(false),
            max_advert_len: None,
        }
    }

    /// Put a frame on air as if some unseen device advertised it.
    pub fn inject(&self, service: &ServiceId, frame: &[u8]) {
        self.deliver(u64::MAX, service, frame);
    }

    /// Number of radios currently scanning.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn deliver(&self, from: u64, service: &ServiceId, frame: &[u8]) {
        // Collect first so no shard lock is held while sinks run.
        let sinks: Vec<FrameSink> = self
            .listeners
            .iter()
            .filter(|entry| *entry.key() != from && entry.value().0.matches(service))
            .map(|entry| entry.value().1.clone())
            .collect();

        for sink in sinks {
            sink(service, frame);
        }
    }
}

/// A radio attached to a [`LoopbackMedium`].
pub struct LoopbackRadio {
    medium: Arc<LoopbackMedium>,
    id: u64,
    on_air: Mutex<Option<Bytes>>,
    sent: Mutex<Vec<Bytes>>,
    fail_advertising: AtomicBool,
    max_advert_len: Option<usize>,
}

impl LoopbackRadio {
    /// Refuse adverts larger than `len` bytes, like a real controller would.
    pub fn with_max_advert_len(mut self, len: usize) -> Self {
        self.max_advert_len = Some(len);
        self
    }

    /// Make every subsequent `start_advertising` fail.
    pub fn set_fail_advertising(&self, fail: bool) {
        self.fail_advertising.store(fail, Ordering::SeqCst);
    }

    /// Every frame this radio has put on air, oldest first.
    pub fn sent(&self) -> Vec<Bytes> {
        lock(&self.sent).clone()
    }

    /// The frame currently held on air, if any.
    pub fn on_air(&self) -> Option<Bytes> {
        lock(&self.on_air).clone()
    }
}

impl Radio for LoopbackRadio {
    fn start_advertising(
        &self,
        _settings: &AdvertiseSettings,
        service: &ServiceId,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        if self.fail_advertising.load(Ordering::SeqCst) {
            return Err(RadioError::Internal("advertiser unavailable".into()));
        }
        if let Some(max) = self.max_advert_len {
            if payload.len() > max {
                return Err(RadioError::DataTooLarge(payload.len()));
            }
        }

        let frame = Bytes::copy_from_slice(payload);
        {
            let mut on_air = lock(&self.on_air);
            if on_air.is_some() {
                return Err(RadioError::AlreadyStarted);
            }
            *on_air = Some(frame.clone());
        }
        lock(&self.sent).push(frame);

        self.medium.deliver(self.id, service, payload);
        Ok(())
    }

    fn stop_advertising(&self) {
        lock(&self.on_air).take();
    }

    fn start_scan(
        &self,
        filter: &ScanFilter,
        _settings: &ScanSettings,
        sink: FrameSink,
    ) -> Result<(), RadioError> {
        self.medium.listeners.insert(self.id, (filter.clone(), sink));
        Ok(())
    }

    fn stop_scan(&self) {
        self.medium.listeners.remove(&self.id);
    }
}
