//! Receive side — subscribes to the radio and feeds the reassembly cache.
//!
//! The scanner does not loop on its own. Callers poll [`Scanner::scan_once`]
//! from their own refresh loop; each call waits one dwell period and returns
//! whatever the cache can decode at that point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nearcard_core::config::ScanConfig;
use nearcard_core::{ContactRecord, ServiceId};
use tokio::task::JoinHandle;

use crate::radio::{lock, FrameSink, Radio, RadioError, ScanFilter, ScanSettings};
use crate::reassembly::ReassemblyCache;

/// How often the expiry task sweeps the cache.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Scanner {
    radio: Arc<dyn Radio>,
    cache: ReassemblyCache,
    service: ServiceId,
    settings: ScanSettings,
    dwell: Duration,
    entry_ttl: Duration,
    scanning: AtomicBool,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(radio: Arc<dyn Radio>, cache: ReassemblyCache, config: &ScanConfig) -> Self {
        Self {
            radio,
            cache,
            service: ServiceId::contact_exchange(),
            settings: ScanSettings::default(),
            dwell: config.dwell(),
            entry_ttl: config.entry_ttl(),
            scanning: AtomicBool::new(false),
            expiry_task: Mutex::new(None),
        }
    }

    /// Subscribe to frames under the contact service and start expiring
    /// stale entries. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), RadioError> {
        let cache = self.cache.clone();
        let service = self.service;
        let sink: FrameSink = Arc::new(move |from: &ServiceId, frame: &[u8]| {
            if *from == service {
                cache.ingest(frame);
            }
        });

        self.radio
            .start_scan(&ScanFilter::service(self.service), &self.settings, sink)?;
        self.scanning.store(true, Ordering::SeqCst);

        let mut task = lock(&self.expiry_task);
        if task.is_none() {
            *task = Some(tokio::spawn(expiry_loop(self.cache.clone(), self.entry_ttl)));
        }

        tracing::info!(service = %self.service, "contact scan started");
        Ok(())
    }

    /// End the subscription. Collected parts stay in the cache.
    pub fn stop(&self) {
        self.radio.stop_scan();
        self.scanning.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.expiry_task).take() {
            task.abort();
        }
        tracing::info!("contact scan stopped");
    }

    /// Wait one dwell period, then return every contact decodable so far.
    pub async fn scan_once(&self) -> Vec<ContactRecord> {
        tokio::time::sleep(self.dwell).await;
        let contacts = self.cache.snapshot();
        tracing::debug!(count = contacts.len(), "scanned contacts");
        contacts
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &ReassemblyCache {
        &self.cache
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.expiry_task).take() {
            task.abort();
        }
    }
}

/// Remove cache entries that have not been refreshed within the TTL.
///
/// Runs until aborted.
async fn expiry_loop(cache: ReassemblyCache, ttl: Duration) {
    let mut interval = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        cache.evict_expired(ttl);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
