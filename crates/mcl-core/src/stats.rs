//! Atomic packet/resource counters.
//!
//! Grounded in `rist_bonding_core::net::state::LinkStats`: fields updated
//! outside a structure's lock use plain atomics, and anything tracking a
//! maximum uses compare-and-swap rather than a read-modify-write under a
//! mutex.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bumps `counter` by one. Safe to call from any thread without holding the
/// owning structure's lock.
#[inline]
pub fn atomic_incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Updates `water` to `max(water, value)` using compare-and-swap, so
/// concurrent writers never lose a higher observation to a race.
pub fn atomic_incr_highwater(water: &AtomicU64, value: u64) {
    let mut current = water.load(Ordering::Relaxed);
    while value > current {
        match water.compare_exchange_weak(
            current,
            value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Orchestrator-wide counters. One instance lives in [`crate::context::Context`]
/// and is read by the control surface's "reset statistics" / stats-query
/// operations.
#[derive(Debug, Default)]
pub struct Counters {
    pub recv_bad_mac: AtomicU64,
    pub recv_invalid_packet: AtomicU64,
    pub recv_dup_ack_req: AtomicU64,
    pub forward_drop: AtomicU64,
    pub maintbuf_queue_full: AtomicU64,
    pub maintbuf_link_broken: AtomicU64,
    pub sendbuf_timeout: AtomicU64,
    pub pback_overflow: AtomicU64,
    pub pback_sent_standalone: AtomicU64,
    pub linkinfo_truncated: AtomicU64,
    pub route_request_originated: AtomicU64,
    pub route_request_suppressed: AtomicU64,
    pub dijkstra_runs: AtomicU64,
    pub high_water_maintbuf_depth: AtomicU64,
    pub high_water_forward_queue_depth: AtomicU64,
}

impl Counters {
    pub fn record_maintbuf_depth(&self, depth: u64) {
        atomic_incr_highwater(&self.high_water_maintbuf_depth, depth);
    }

    pub fn record_forward_queue_depth(&self, depth: u64) {
        atomic_incr_highwater(&self.high_water_forward_queue_depth, depth);
    }

    /// `IOCTL_MCL_RESET_STATISTICS`: zeroes every counter.
    pub fn reset(&self) {
        self.recv_bad_mac.store(0, Ordering::Relaxed);
        self.recv_invalid_packet.store(0, Ordering::Relaxed);
        self.recv_dup_ack_req.store(0, Ordering::Relaxed);
        self.forward_drop.store(0, Ordering::Relaxed);
        self.maintbuf_queue_full.store(0, Ordering::Relaxed);
        self.maintbuf_link_broken.store(0, Ordering::Relaxed);
        self.sendbuf_timeout.store(0, Ordering::Relaxed);
        self.pback_overflow.store(0, Ordering::Relaxed);
        self.pback_sent_standalone.store(0, Ordering::Relaxed);
        self.linkinfo_truncated.store(0, Ordering::Relaxed);
        self.route_request_originated.store(0, Ordering::Relaxed);
        self.route_request_suppressed.store(0, Ordering::Relaxed);
        self.dijkstra_runs.store(0, Ordering::Relaxed);
        self.high_water_maintbuf_depth.store(0, Ordering::Relaxed);
        self.high_water_forward_queue_depth.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highwater_only_rises() {
        let w = AtomicU64::new(0);
        atomic_incr_highwater(&w, 5);
        assert_eq!(w.load(Ordering::Relaxed), 5);
        atomic_incr_highwater(&w, 3);
        assert_eq!(w.load(Ordering::Relaxed), 5);
        atomic_incr_highwater(&w, 9);
        assert_eq!(w.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn incr_counts() {
        let c = AtomicU64::new(0);
        atomic_incr(&c);
        atomic_incr(&c);
        assert_eq!(c.load(Ordering::Relaxed), 2);
    }
}
