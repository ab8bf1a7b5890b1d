//! Cyclic contact broadcast.
//!
//! One circle puts every packet of the encoded contact on air in turn, each
//! held for a dwell time, then pauses before the next circle. Circles repeat
//! until [`Broadcaster::stop_broadcasting`].
//!
//! Two flags: the durable one in the [`FlagStore`] records the user's intent
//! across restarts, the in-memory `active` one gates the running loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nearcard_core::config::BroadcastConfig;
use nearcard_core::wire::{self, PacketPart, WireError};
use nearcard_core::{encode, ContactRecord, ServiceId, SessionId};
use tokio::sync::Notify;

use crate::proximity::ProximityError;
use crate::radio::{lock, AdvertiseSettings, Radio};
use crate::store::{FlagStore, BROADCAST_ENABLED_KEY};

/// Pacing of the transmit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTiming {
    /// How long each packet stays on air.
    pub packet_dwell: Duration,
    /// Pause after the last packet of a circle.
    pub circle_gap: Duration,
}

impl Default for BroadcastTiming {
    fn default() -> Self {
        Self {
            packet_dwell: Duration::from_millis(200),
            circle_gap: Duration::from_millis(2_000),
        }
    }
}

impl From<&BroadcastConfig> for BroadcastTiming {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            packet_dwell: config.packet_dwell(),
            circle_gap: config.circle_gap(),
        }
    }
}

/// A transmit loop claimed by [`Broadcaster::begin`], not yet running.
#[derive(Debug)]
pub struct BroadcastClaim {
    session: SessionId,
    epoch: u64,
    record: ContactRecord,
}

impl BroadcastClaim {
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Drives the transmit side over an injected radio.
pub struct Broadcaster {
    radio: Arc<dyn Radio>,
    flags: Arc<dyn FlagStore>,
    service: ServiceId,
    settings: AdvertiseSettings,
    timing: BroadcastTiming,
    active: AtomicBool,
    /// Bumped by every stop. A loop runs only while its epoch is current,
    /// so a loop still winding down never mistakes a newer start for its own.
    epoch: AtomicU64,
    session: Mutex<Option<SessionId>>,
    wake: Notify,
}

impl Broadcaster {
    pub fn new(radio: Arc<dyn Radio>, flags: Arc<dyn FlagStore>, timing: BroadcastTiming) -> Self {
        Self {
            radio,
            flags,
            service: ServiceId::contact_exchange(),
            settings: AdvertiseSettings::default(),
            timing,
            active: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            session: Mutex::new(None),
            wake: Notify::new(),
        }
    }

    /// Broadcast `record` until stopped.
    ///
    /// Resolves only once the loop ends. Returns immediately with `Ok` when
    /// broadcasting is already switched on (durably or in this process), and
    /// with `PayloadTooLarge` before touching any state when the record does
    /// not fit the packet numbering.
    pub async fn start_broadcasting(&self, record: ContactRecord) -> Result<(), ProximityError> {
        match self.begin(record)? {
            Some(claim) => self.transmit(claim).await,
            None => Ok(()),
        }
    }

    /// Restart the loop after a process restart left the durable flag on.
    ///
    /// Does nothing unless the flag is on and no loop is running here.
    pub async fn resume(&self, record: ContactRecord) -> Result<(), ProximityError> {
        match self.begin_resume(record)? {
            Some(claim) => self.transmit(claim).await,
            None => Ok(()),
        }
    }

    /// Claim the transmit loop for `record` without running it.
    ///
    /// Both flags are set when this returns `Some`, so a stop issued before
    /// [`Broadcaster::transmit`] is first polled still wins. `None` means
    /// broadcasting was already switched on.
    pub fn begin(&self, record: ContactRecord) -> Result<Option<BroadcastClaim>, ProximityError> {
        if self.flags.get(BROADCAST_ENABLED_KEY)? {
            tracing::debug!("broadcast already enabled, ignoring start");
            return Ok(None);
        }
        self.claim(record)
    }

    /// Like [`Broadcaster::begin`], for the restart path: claims only while
    /// the durable flag is on.
    pub fn begin_resume(
        &self,
        record: ContactRecord,
    ) -> Result<Option<BroadcastClaim>, ProximityError> {
        if !self.flags.get(BROADCAST_ENABLED_KEY)? {
            return Ok(None);
        }
        tracing::info!("resuming broadcast enabled before restart");
        self.claim(record)
    }

    fn claim(&self, record: ContactRecord) -> Result<Option<BroadcastClaim>, ProximityError> {
        let record = record.for_broadcast();
        // Fail before claiming anything if the record cannot be framed.
        let packets = wire::frame(SessionId([0; 2]), &encode(&record))?.len();

        let epoch = self.epoch.load(Ordering::SeqCst);
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("broadcast loop already running, ignoring start");
            return Ok(None);
        }

        if let Err(e) = self.flags.set(BROADCAST_ENABLED_KEY, true) {
            self.active.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let session = SessionId::random();
        *lock(&self.session) = Some(session);
        tracing::info!(session = %session, packets, "contact broadcast started");

        Ok(Some(BroadcastClaim {
            session,
            epoch,
            record,
        }))
    }

    /// Run a claimed loop until it is stopped.
    pub async fn transmit(&self, claim: BroadcastClaim) -> Result<(), ProximityError> {
        let BroadcastClaim {
            session,
            epoch,
            record,
        } = claim;

        let result = self.transmit_loop(session, epoch, &record).await;

        if self.is_current(epoch) {
            // Only reachable on error; a stop always bumps the epoch.
            self.active.store(false, Ordering::SeqCst);
            self.radio.stop_advertising();
        }
        {
            let mut current = lock(&self.session);
            if *current == Some(session) {
                *current = None;
            }
        }
        tracing::info!(session = %session, "contact broadcast stopped");
        result
    }

    async fn transmit_loop(
        &self,
        session: SessionId,
        epoch: u64,
        record: &ContactRecord,
    ) -> Result<(), ProximityError> {
        let mut circles = 0u64;

        while self.is_current(epoch) {
            // The record is fixed for the loop's lifetime, so packet
            // boundaries come out the same every circle.
            let parts = framed(session, record)?;

            for part in &parts {
                if !self.is_current(epoch) {
                    break;
                }
                self.send(part, epoch).await;
            }

            circles += 1;
            tracing::trace!(session = %session, circles, "circle complete");

            if self.is_current(epoch) {
                self.pause(self.timing.circle_gap).await;
            }
        }
        Ok(())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.is_active() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Hold one packet on air for the dwell time.
    async fn send(&self, part: &PacketPart, epoch: u64) {
        let frame = part.to_frame();
        match self
            .radio
            .start_advertising(&self.settings, &self.service, &frame)
        {
            // Stopped while the advert went up. The radio holds only this
            // advert, so taking it down cannot touch a newer loop's.
            Ok(()) if !self.is_current(epoch) => {
                self.radio.stop_advertising();
                return;
            }
            Ok(()) => tracing::trace!(index = part.index, total = part.total, "packet on air"),
            // Best effort: no retry, the next circle sends it again.
            Err(e) => tracing::warn!(index = part.index, error = %e, "advertise failed"),
        }
        self.pause(self.timing.packet_dwell).await;
        // After a stop the advert is already down, and may belong to a newer loop.
        if self.is_current(epoch) {
            self.radio.stop_advertising();
        }
    }

    /// Sleep, waking early if broadcasting is stopped.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Switch broadcasting off, durably, and end any running loop.
    pub fn stop_broadcasting(&self) -> Result<(), ProximityError> {
        self.halt();
        self.flags.set(BROADCAST_ENABLED_KEY, false)?;
        tracing::info!("contact broadcast switched off");
        Ok(())
    }

    /// End the loop in this process and take the advert off air, leaving
    /// the durable flag as it is. Used at shutdown.
    pub fn halt(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // Advert down before `active` is released, so a new start claiming
        // the loop cannot have its first packet taken off air.
        self.radio.stop_advertising();
        self.active.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// The durable on/off intent.
    pub fn is_broadcasting_enabled(&self) -> Result<bool, ProximityError> {
        Ok(self.flags.get(BROADCAST_ENABLED_KEY)?)
    }

    /// True while the transmit loop runs in this process.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Session id of the running loop.
    pub fn session(&self) -> Option<SessionId> {
        *lock(&self.session)
    }
}

fn framed(session: SessionId, record: &ContactRecord) -> Result<Vec<PacketPart>, WireError> {
    wire::frame(session, &encode(record))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
