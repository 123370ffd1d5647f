//! Piggyback cache (spec §4.6): holds control options awaiting a data
//! packet headed the same direction so they can ride along instead of
//! going out standalone.
//!
//! Deadline-ordered, same shape as `strata_transport::pool`'s slab-backed
//! queues but keyed here by destination since piggybacked options are a
//! small, bursty set rather than a steady packet stream.

use crate::codec::{Ack, AckRequest, InfoReply, RouteError, RouteReply, MAX_SR_LEN};
use crate::types::{ms, Ticks, VirtualAddress};
use std::collections::HashMap;

pub fn ack_deadline() -> Ticks {
    ms(80)
}
pub fn route_reply_deadline() -> Ticks {
    ms(1) / 2
}
pub fn route_error_deadline() -> Ticks {
    ms(5)
}
pub fn info_reply_deadline() -> Ticks {
    ms(500)
}
pub fn route_reply_long_sr_deadline() -> Ticks {
    ms(1000)
}

/// `PROTOCOL_MIN_FRAME_SIZE` (spec §9): piggybacked options only attach if
/// the resulting frame stays under this bound.
pub const PROTOCOL_MIN_FRAME_SIZE: usize = 1500;

/// A pending control option and the absolute tick at which it must be sent
/// standalone if nothing else has carried it.
#[derive(Debug, Clone)]
pub enum PendingOption {
    Ack(Ack),
    AckRequest(AckRequest),
    RouteReply(RouteReply),
    RouteError(RouteError),
    InfoReply(InfoReply),
}

impl PendingOption {
    fn wire_len_estimate(&self) -> usize {
        match self {
            PendingOption::Ack(_) => 4,
            PendingOption::AckRequest(_) => 4,
            PendingOption::RouteReply(r) => 2 + r.hops.len() * crate::codec::HOP_LEN,
            PendingOption::RouteError(_) => 2 + 6 + 6 + 6 + 2,
            PendingOption::InfoReply(_) => 2 + 4 + 4,
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    option: PendingOption,
    deadline: Ticks,
}

#[derive(Default)]
pub struct PiggyBackCache {
    queues: HashMap<VirtualAddress, Vec<Pending>>,
}

impl PiggyBackCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `option` for `dest`, coalescing with any existing pending
    /// option of the same kind (spec §4.6 coalescing rules):
    /// - A new Ack Request replaces an older one for the same id space.
    /// - A new Route Reply replaces an older one only if it is at least as
    ///   good (fewer hops); callers pass the fresher, already-chosen reply.
    /// - Route Errors for the same unreachable destination coalesce into
    ///   one.
    pub fn send_option(&mut self, dest: VirtualAddress, option: PendingOption, now: Ticks) {
        let deadline = now + relative_timeout(&option);
        let queue = self.queues.entry(dest).or_default();

        match &option {
            PendingOption::Ack(new_ack) => {
                if let Some(slot) = queue.iter_mut().find(|p| {
                    matches!(&p.option, PendingOption::Ack(a) if a.id == new_ack.id)
                }) {
                    slot.deadline = slot.deadline.min(deadline);
                    return;
                }
            }
            PendingOption::AckRequest(_) => {
                queue.retain(|p| !matches!(p.option, PendingOption::AckRequest(_)));
            }
            PendingOption::RouteError(new_err) => {
                if let Some(slot) = queue.iter_mut().find(|p| {
                    matches!(&p.option, PendingOption::RouteError(e) if e.unreachable == new_err.unreachable)
                }) {
                    slot.option = option;
                    slot.deadline = slot.deadline.min(deadline);
                    return;
                }
            }
            PendingOption::RouteReply(_) | PendingOption::InfoReply(_) => {}
        }

        queue.push(Pending { option, deadline });
    }

    /// Attempt to attach pending options to an outbound `SourceRoute`
    /// packet, constrained by `PROTOCOL_MIN_FRAME_SIZE` minus the space the
    /// packet's existing payload already occupies. `live_dests` is the set
    /// of addresses this departing packet can carry options for (spec §4.6
    /// `send_packet`): every queued destination for a Route Request about
    /// to be broadcast, every node on the remaining source-route suffix for
    /// a routed packet, or just the packet's own destination otherwise.
    /// Queues are drained in `live_dests` order against one shared budget;
    /// options that don't fit stay queued. Returns the options to attach
    /// (already removed from the queue).
    pub fn attach_on_departure(
        &mut self,
        live_dests: &[VirtualAddress],
        payload_len: usize,
        base_header_len: usize,
    ) -> Vec<PendingOption> {
        let mut budget = PROTOCOL_MIN_FRAME_SIZE.saturating_sub(payload_len + base_header_len);
        let mut attached = Vec::new();
        for &dest in live_dests {
            let Some(queue) = self.queues.get_mut(&dest) else {
                continue;
            };
            let mut remaining = Vec::new();
            for pending in queue.drain(..) {
                let len = pending.option.wire_len_estimate();
                if len <= budget {
                    budget -= len;
                    attached.push(pending.option);
                } else {
                    remaining.push(pending);
                }
            }
            *queue = remaining;
            if queue.is_empty() {
                self.queues.remove(&dest);
            }
        }
        attached
    }

    /// All destinations currently holding a pending option, for the Route
    /// Request broadcast case where every queue is "live" at once.
    pub fn live_destinations(&self) -> Vec<VirtualAddress> {
        self.queues.keys().copied().collect()
    }

    /// Sweeps all queues for options whose deadline has passed and removes
    /// them, returning `(destination, option)` pairs that must go out as
    /// standalone packets. A synthesized packet carrying only Acks is
    /// marked with a static (already-known-good) source route by the
    /// caller rather than triggering fresh route discovery.
    pub fn timeout(&mut self, now: Ticks) -> Vec<(VirtualAddress, PendingOption)> {
        let mut fired = Vec::new();
        self.queues.retain(|&dest, queue| {
            let mut remaining = Vec::new();
            for pending in queue.drain(..) {
                if pending.deadline <= now {
                    fired.push((dest, pending.option));
                } else {
                    remaining.push(pending);
                }
            }
            *queue = remaining;
            !queue.is_empty()
        });
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Ticks> {
        self.queues
            .values()
            .flatten()
            .map(|p| p.deadline)
            .min()
    }
}

fn relative_timeout(option: &PendingOption) -> Ticks {
    match option {
        PendingOption::Ack(_) | PendingOption::AckRequest(_) => ack_deadline(),
        PendingOption::RouteReply(r) if r.hops.len() > MAX_SR_LEN / 2 => {
            route_reply_long_sr_deadline()
        }
        PendingOption::RouteReply(_) => route_reply_deadline(),
        PendingOption::RouteError(_) => route_error_deadline(),
        PendingOption::InfoReply(_) => info_reply_deadline(),
    }
}
