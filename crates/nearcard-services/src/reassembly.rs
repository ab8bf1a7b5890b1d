//! Receiver-side reassembly of broadcast contacts.
//!
//! Frames arrive from the radio callback in any order, repeated once per
//! broadcast circle, from any number of senders at once. The cache keeps one
//! entry per session id holding the parts seen so far, ordered by index.
//!
//! Shared between the radio callback (writer, possibly many threads at once)
//! and the consumer calling [`ReassemblyCache::snapshot`]. DashMap shards
//! the map; an entry is only ever mutated under its shard's write lock, so
//! concurrent inserts into one entry never lose a part.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nearcard_core::wire::PacketPart;
use nearcard_core::{decode, ContactRecord, SessionId};
use tokio::time::Instant;

/// Parts collected for one sender session.
#[derive(Debug)]
struct Entry {
    /// Packet count every part of this entry declares.
    total: u8,
    /// Chunk text by packet index.
    parts: BTreeMap<u8, String>,
    /// Last time any part for this session arrived.
    last_seen: Instant,
}

impl Entry {
    fn new(total: u8) -> Self {
        Self {
            total,
            parts: BTreeMap::new(),
            last_seen: Instant::now(),
        }
    }

    /// Chunks concatenated in index order. Gaps are simply skipped.
    fn payload(&self) -> String {
        self.parts.values().map(String::as_str).collect()
    }
}

/// Progress of one entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub session: SessionId,
    pub received: usize,
    pub total: u8,
}

impl EntrySummary {
    pub fn is_complete(&self) -> bool {
        self.received == self.total as usize
    }
}

/// Concurrent map from session id to the parts received for it.
#[derive(Clone, Default)]
pub struct ReassemblyCache {
    entries: Arc<DashMap<SessionId, Entry>>,
}

impl ReassemblyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw frame and merge it. Never fails: unparseable frames are
    /// dropped, since the radio callback has nowhere to send an error.
    pub fn ingest(&self, frame: &[u8]) {
        match PacketPart::parse(frame) {
            Ok(part) => self.insert(part),
            Err(e) => tracing::trace!(error = %e, bytes = frame.len(), "skipping bad frame"),
        }
    }

    /// Merge an already-parsed part. Re-inserting an index overwrites it.
    pub fn insert(&self, part: PacketPart) {
        let mut entry = self
            .entries
            .entry(part.session)
            .or_insert_with(|| Entry::new(part.total));

        // Same session, different packet count: the sender is now
        // broadcasting a different payload. Start over.
        if entry.total != part.total {
            tracing::debug!(
                session = %part.session,
                old_total = entry.total,
                new_total = part.total,
                "packet count changed, resetting entry"
            );
            *entry = Entry::new(part.total);
        }

        tracing::trace!(session = %part.session, index = part.index, total = part.total, "part received");
        entry.parts.insert(part.index, part.chunk);
        entry.last_seen = Instant::now();
    }

    /// Decode every entry, complete or not, into a contact.
    ///
    /// Entries that do not decode are skipped. The cache is left untouched,
    /// so a sender still in range shows up again on the next call.
    pub fn snapshot(&self) -> Vec<ContactRecord> {
        let mut payloads: Vec<(SessionId, String)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().payload()))
            .collect();
        payloads.sort_by_key(|(session, _)| *session);

        payloads
            .into_iter()
            .filter_map(|(session, payload)| match decode(&payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(session = %session, error = %e, payload = %payload, "could not decode entry");
                    None
                }
            })
            .collect()
    }

    /// Drop entries that have not received a part within `ttl`.
    /// Returns how many were removed.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "expired reassembly entries");
        }
        removed
    }

    /// Per-session progress, ordered by session id.
    pub fn summaries(&self) -> Vec<EntrySummary> {
        let mut out: Vec<EntrySummary> = self
            .entries
            .iter()
            .map(|entry| EntrySummary {
                session: *entry.key(),
                received: entry.value().parts.len(),
                total: entry.value().total,
            })
            .collect();
        out.sort_by_key(|s| s.session);
        out
    }

    /// Indices received so far for `session`, ascending.
    pub fn indices(&self, session: &SessionId) -> Vec<u8> {
        self.entries
            .get(session)
            .map(|entry| entry.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
