//! Maintenance buffer (spec §4.5): per-`(peer, out_if, in_if)` reliable
//! delivery — Ack Request/Ack round trip, retransmission, and link-failure
//! detection.
//!
//! The idle/probing/holdoff state machine is the same shape as
//! `strata_transport::arq`'s retransmit timer: one outstanding request at a
//! time, a rexmit deadline, and a hard ceiling past which the peer is
//! declared gone.

use crate::types::{ms, secs, LQSRIf, Ticks, VirtualAddress};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

pub const MAINTBUF_MAX_QUEUE: usize = 4;
pub fn maintbuf_link_timeout() -> Ticks {
    ms(500)
}
pub fn maintbuf_rexmit_timeout() -> Ticks {
    ms(500)
}
pub fn maintbuf_holdoff_time() -> Ticks {
    ms(250)
}
pub fn maintbuf_idle_timeout() -> Ticks {
    secs(24 * 3600)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MbnKey {
    pub peer: VirtualAddress,
    pub out_if: LQSRIf,
    pub in_if: LQSRIf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Probing { first_ack_req_time: Ticks, ack_req_time: Ticks },
    Holdoff { until: Ticks },
}

struct Mbn {
    queue: VecDeque<(u16, Bytes)>,
    next_ack_id: u16,
    last_activity: Ticks,
    state: State,
}

impl Mbn {
    fn new(now: Ticks) -> Self {
        Self {
            queue: VecDeque::new(),
            next_ack_id: 0,
            last_activity: now,
            state: State::Idle,
        }
    }
}

/// Action the orchestrator must take as a result of driving the maintenance
/// buffer forward.
#[derive(Debug, Clone)]
pub enum MbnEvent {
    /// Send an Ack Request quoting `ack_id` for the packet at the head of
    /// the queue (first transmission or a retransmit).
    SendAckRequest { key: MbnKey, ack_id: u16 },
    /// The link has been declared broken: drop the queue, penalize the
    /// link, and emit a Route Error.
    LinkBroken { key: MbnKey, dropped: Vec<Bytes> },
}

#[derive(Default)]
pub struct MaintenanceBuffer {
    nodes: HashMap<MbnKey, Mbn>,
}

impl MaintenanceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `payload` for transmission to `key`, attaching the next ack
    /// id. Returns `None` if the bounded queue is full (spec: counted as
    /// `maintbuf_queue_full`).
    pub fn enqueue(&mut self, key: MbnKey, payload: Bytes, now: Ticks) -> Option<u16> {
        let mbn = self.nodes.entry(key).or_insert_with(|| Mbn::new(now));
        if mbn.queue.len() >= MAINTBUF_MAX_QUEUE {
            return None;
        }
        let ack_id = mbn.next_ack_id;
        mbn.next_ack_id = mbn.next_ack_id.wrapping_add(1);
        mbn.queue.push_back((ack_id, payload));
        mbn.last_activity = now;
        if let State::Holdoff { until } = mbn.state {
            if now < until {
                return Some(ack_id);
            }
        }
        if matches!(mbn.state, State::Idle) {
            mbn.state = State::Probing {
                first_ack_req_time: now,
                ack_req_time: now,
            };
        }
        Some(ack_id)
    }

    /// Call when an Ack arrives quoting `ack_id` for `key`. Clears the
    /// outstanding request, drops the acked packet from the queue, and
    /// enters the holdoff window.
    pub fn on_ack(&mut self, key: MbnKey, ack_id: u16, now: Ticks) {
        let Some(mbn) = self.nodes.get_mut(&key) else {
            return;
        };
        mbn.queue.retain(|(id, _)| *id != ack_id);
        mbn.last_activity = now;
        mbn.state = State::Holdoff {
            until: now + maintbuf_holdoff_time(),
        };
    }

    /// Periodic sweep: drives retransmits and failure detection. Returns
    /// the events the orchestrator must act on.
    pub fn timeout(&mut self, now: Ticks) -> Vec<MbnEvent> {
        let mut events = Vec::new();
        let mut dead = Vec::new();

        for (&key, mbn) in self.nodes.iter_mut() {
            match mbn.state {
                State::Idle => {
                    if now.saturating_sub(mbn.last_activity) > maintbuf_idle_timeout() {
                        dead.push(key);
                    }
                }
                State::Holdoff { until } => {
                    if now >= until {
                        mbn.state = State::Idle;
                        if !mbn.queue.is_empty() {
                            mbn.state = State::Probing {
                                first_ack_req_time: now,
                                ack_req_time: now,
                            };
                            if let Some(&(ack_id, _)) = mbn.queue.front() {
                                events.push(MbnEvent::SendAckRequest { key, ack_id });
                            }
                        }
                    }
                }
                State::Probing {
                    first_ack_req_time,
                    ack_req_time,
                } => {
                    if now.saturating_sub(first_ack_req_time) >= maintbuf_link_timeout() {
                        let dropped: Vec<Bytes> =
                            mbn.queue.drain(..).map(|(_, p)| p).collect();
                        events.push(MbnEvent::LinkBroken { key, dropped });
                        dead.push(key);
                    } else if now.saturating_sub(ack_req_time) >= maintbuf_rexmit_timeout() {
                        mbn.state = State::Probing {
                            first_ack_req_time,
                            ack_req_time: now,
                        };
                        if let Some(&(ack_id, _)) = mbn.queue.front() {
                            events.push(MbnEvent::SendAckRequest { key, ack_id });
                        }
                    }
                }
            }
        }

        for key in dead {
            self.nodes.remove(&key);
        }
        events
    }

    pub fn depth(&self, key: MbnKey) -> usize {
        self.nodes.get(&key).map(|m| m.queue.len()).unwrap_or(0)
    }

    pub fn total_depth(&self) -> usize {
        self.nodes.values().map(|m| m.queue.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MbnKey {
        MbnKey {
            peer: VirtualAddress::new([1; 6]),
            out_if: 1,
            in_if: 1,
        }
    }

    #[test]
    fn enqueue_full_queue_rejects() {
        let mut mb = MaintenanceBuffer::new();
        for _ in 0..MAINTBUF_MAX_QUEUE {
            assert!(mb.enqueue(key(), Bytes::from_static(b"x"), 0).is_some());
        }
        assert!(mb.enqueue(key(), Bytes::from_static(b"x"), 0).is_none());
    }

    #[test]
    fn ack_clears_queue_entry_and_enters_holdoff() {
        let mut mb = MaintenanceBuffer::new();
        let id = mb.enqueue(key(), Bytes::from_static(b"x"), 0).unwrap();
        mb.on_ack(key(), id, 10);
        assert_eq!(mb.depth(key()), 0);
    }

    #[test]
    fn no_ack_within_link_timeout_declares_broken() {
        let mut mb = MaintenanceBuffer::new();
        mb.enqueue(key(), Bytes::from_static(b"x"), 0);
        let mut saw_broken = false;
        let mut now = 0;
        for _ in 0..10 {
            now += maintbuf_rexmit_timeout();
            for ev in mb.timeout(now) {
                if let MbnEvent::LinkBroken { .. } = ev {
                    saw_broken = true;
                }
            }
        }
        assert!(saw_broken);
        assert_eq!(mb.total_depth(), 0);
    }

    #[test]
    fn holdoff_suppresses_new_ack_request_for_subsequent_packet() {
        let mut mb = MaintenanceBuffer::new();
        let id = mb.enqueue(key(), Bytes::from_static(b"x"), 0).unwrap();
        mb.on_ack(key(), id, 0);
        // Still within holdoff window: a new packet shouldn't re-probe.
        mb.enqueue(key(), Bytes::from_static(b"y"), ms(10));
        let events = mb.timeout(ms(10));
        assert!(events.is_empty());
    }
}
