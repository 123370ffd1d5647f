//! Send buffer (spec §4.4): per-destination FIFO of payloads awaiting route
//! discovery.

use crate::types::{ms, Ticks, VirtualAddress};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// `SENDBUF_TIMEOUT = FIRST_BACKOFF + MAX_BACKOFF` (spec §9 constants table).
pub fn sendbuf_timeout() -> Ticks {
    ms(crate::reqtable::FIRST_BACKOFF_MS + crate::reqtable::MAX_BACKOFF_MS)
}

struct Entry {
    payload: Bytes,
    arrival: Ticks,
}

#[derive(Default)]
pub struct SendBuffer {
    queues: HashMap<VirtualAddress, VecDeque<Entry>>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `payload` for `destination`. The caller is responsible for
    /// triggering/refreshing a Route Request via the request table.
    pub fn push(&mut self, destination: VirtualAddress, payload: Bytes, now: Ticks) {
        self.queues
            .entry(destination)
            .or_default()
            .push_back(Entry {
                payload,
                arrival: now,
            });
    }

    /// Drops entries older than `SENDBUF_TIMEOUT`. Returns how many were
    /// dropped (for `stats::Counters::sendbuf_timeout`).
    pub fn expire(&mut self, now: Ticks) -> u64 {
        let timeout = sendbuf_timeout();
        let mut dropped = 0u64;
        self.queues.retain(|_, q| {
            let before = q.len();
            q.retain(|e| now.saturating_sub(e.arrival) < timeout);
            dropped += (before - q.len()) as u64;
            !q.is_empty()
        });
        dropped
    }

    /// Drains every buffered payload for `destination` in FIFO order, once
    /// a route has been acquired.
    pub fn drain(&mut self, destination: VirtualAddress) -> Vec<Bytes> {
        self.queues
            .remove(&destination)
            .map(|q| q.into_iter().map(|e| e.payload).collect())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, destination: VirtualAddress) -> bool {
        self.queues
            .get(&destination)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    pub fn pending_destinations(&self) -> impl Iterator<Item = VirtualAddress> + '_ {
        self.queues.keys().copied()
    }
}
