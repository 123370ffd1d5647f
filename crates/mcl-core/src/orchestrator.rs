//! LQSR orchestrator (spec §4.8): Send/Forward/Receive/Scavenge, and the
//! periodic timer that drives probing, piggy-back timeouts, send-buffer
//! expiry, maintenance-buffer retransmits, and link-info flooding.
//!
//! Grounded in `rist_bonding_core::runtime`'s owning-scheduler-loop shape —
//! one struct owns every per-adapter substructure and a single `tick()`
//! entry point drives all periodic work — generalized here from one bonded
//! link to the full multi-hop LQSR state machine.

use crate::codec::{
    self, Ack, AckRequest, Hop, InfoReply, InfoRequest, LinkInfo, Mac, Probe, ProbeReply,
    RouteError, RouteReply, RouteRequest, SRPacket, SourceRoute, ETHER_HEADER_LEN, FIXED_HEADER_LEN,
    MAX_SR_LEN,
};
use crate::config::VirtualAdapterConfig;
use crate::linkcache::changelog::LinkChangeReason;
use crate::linkcache::LinkCache;
use crate::maintbuf::{MaintenanceBuffer, MbnEvent, MbnKey};
use crate::metric::MetricEngine;
use crate::neighbor::NeighborCache;
use crate::pback::{PendingOption, PiggyBackCache, PROTOCOL_MIN_FRAME_SIZE};
use crate::reqtable::{AcceptOutcome, RequestTable};
use crate::sendbuf::SendBuffer;
use crate::stats::{atomic_incr, Counters};
use crate::types::{ms, secs, LQSRIf, LinkMetric, PhysicalAddress, Ticks, VirtualAddress};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub const MAX_FORWARD_QUEUE: usize = 16;
pub fn min_broadcast_gap() -> Ticks {
    ms(5)
}
pub fn link_info_period() -> Ticks {
    secs(10)
}

/// The host's delivery surface: getting a frame onto the wire on a given
/// physical adapter, and handing a fully routed payload up to the local IP
/// stack. Implemented by the embedding binary, never by this crate.
pub trait PacketIo: Send + Sync {
    fn transmit(&self, out_if: LQSRIf, dest: PhysicalAddress, frame: Bytes);
    fn deliver(&self, payload: Bytes);
}

struct PendingBroadcast {
    req: RouteRequest,
    exclude_if: LQSRIf,
    queued_at: Ticks,
}

/// Owns every per-virtual-adapter substructure and drives the LQSR state
/// machine over it. One instance corresponds to one virtual adapter (spec
/// §3's `VirtualAdapter`).
pub struct Orchestrator {
    pub self_address: VirtualAddress,
    pub config: VirtualAdapterConfig,
    adapters: Vec<LQSRIf>,
    pub link_cache: LinkCache,
    pub neighbor_cache: NeighborCache,
    pub request_table: RequestTable,
    pub send_buffer: SendBuffer,
    pub maint_buffer: MaintenanceBuffer,
    pub pback: PiggyBackCache,
    pub counters: Arc<Counters>,
    engine: Arc<dyn MetricEngine>,
    mac: Arc<dyn Mac>,
    io: Arc<dyn PacketIo>,
    next_request_id: u32,
    next_probe_seq: u32,
    last_broadcast: Ticks,
    forward_queue: VecDeque<PendingBroadcast>,
    last_link_info: Ticks,
}

impl Orchestrator {
    pub fn new(
        self_address: VirtualAddress,
        config: VirtualAdapterConfig,
        adapters: Vec<LQSRIf>,
        engine: Arc<dyn MetricEngine>,
        mac: Arc<dyn Mac>,
        io: Arc<dyn PacketIo>,
        counters: Arc<Counters>,
    ) -> Self {
        let link_timeout = secs(config.link_timeout_secs);
        let damping = config.route_flap_damping_factor;
        Self {
            self_address,
            config,
            adapters,
            link_cache: LinkCache::new(self_address, engine.clone(), link_timeout, damping),
            neighbor_cache: NeighborCache::new(),
            request_table: RequestTable::new(),
            send_buffer: SendBuffer::new(),
            maint_buffer: MaintenanceBuffer::new(),
            pback: PiggyBackCache::new(),
            counters,
            engine,
            mac,
            io,
            next_request_id: 0,
            next_probe_seq: 0,
            last_broadcast: 0,
            forward_queue: VecDeque::new(),
            last_link_info: 0,
        }
    }

    fn mac_key(&self) -> [u8; 16] {
        self.config.crypto_key_mac
    }

    /// Encodes and hands `pkt` to `self.io` addressed to `next_hop` via the
    /// neighbor cache; falls back to Ethernet broadcast if the physical
    /// address isn't known yet (spec: first hop of a freshly discovered
    /// route).
    fn transmit(&self, out_if: LQSRIf, next_hop: VirtualAddress, pkt: &SRPacket) {
        let frame = match codec::emit(pkt, &self.mac_key(), self.mac.as_ref()) {
            Ok(f) => f,
            Err(e) => {
                warn!(?e, "failed to encode outbound packet");
                return;
            }
        };
        let phys = self
            .neighbor_cache
            .lookup(next_hop, out_if)
            .unwrap_or(PhysicalAddress::new([0xff; 6]));
        self.io.transmit(out_if, phys, frame);
    }

    fn broadcast(&mut self, out_if: LQSRIf, pkt: &SRPacket, now: Ticks) {
        self.last_broadcast = now;
        let frame = match codec::emit(pkt, &self.mac_key(), self.mac.as_ref()) {
            Ok(f) => f,
            Err(e) => {
                warn!(?e, "failed to encode broadcast packet");
                return;
            }
        };
        self.io
            .transmit(out_if, PhysicalAddress::new([0xff; 6]), frame);
    }

    // ---- Send path (spec §4.8 "Send path") -------------------------------

    /// Host-originated payload to `dest`. If a source route is already
    /// cached, enqueues directly via the maintenance buffer; otherwise
    /// buffers the payload and originates a Route Request, honoring the
    /// request table's backoff.
    pub fn send(&mut self, dest: VirtualAddress, payload: Bytes, now: Ticks) {
        match self.link_cache.fill_source_route(dest, now) {
            Ok(route) => self.dispatch_via_maintbuf(dest, route, payload, now),
            Err(_) => {
                self.send_buffer.push(dest, payload, now);
                if self.request_table.should_originate(dest, now) {
                    self.originate_route_request(dest, now);
                    atomic_incr(&self.counters.route_request_originated);
                } else {
                    atomic_incr(&self.counters.route_request_suppressed);
                }
            }
        }
    }

    fn dispatch_via_maintbuf(
        &mut self,
        dest: VirtualAddress,
        route: SourceRoute,
        payload: Bytes,
        now: Ticks,
    ) {
        let first_hop = route.hops[1].addr;
        let out_if = route.hops[0].out_if;
        let in_if = route.hops[1].in_if;
        // Every node from the first hop through the destination is on the
        // packet's remaining path and can have options piggybacked (spec
        // §4.6 `send_packet`, source-route case); `hops[0]` is us.
        let live_dests: Vec<VirtualAddress> = route.hops[1..].iter().map(|h| h.addr).collect();
        let mut pkt = SRPacket {
            source_route: Some(route),
            source: self.self_address,
            dest,
            payload,
            ..Default::default()
        };
        for opt in self.pback.attach_on_departure(
            &live_dests,
            pkt.payload.len(),
            ETHER_HEADER_LEN + FIXED_HEADER_LEN,
        ) {
            match opt {
                PendingOption::Ack(a) => pkt.ack.push(a),
                PendingOption::AckRequest(r) => pkt.ack_req = Some(r),
                PendingOption::RouteReply(r) => pkt.rep.push(r),
                PendingOption::RouteError(e) => pkt.err.push(e),
                PendingOption::InfoReply(r) => pkt.info_rep.push(r),
            }
        }
        let Ok(frame) = codec::emit(&pkt, &self.mac_key(), self.mac.as_ref()) else {
            warn!("failed to encode data packet for maintenance buffer");
            return;
        };
        let phys = self
            .neighbor_cache
            .lookup(first_hop, out_if)
            .unwrap_or(PhysicalAddress::new([0xff; 6]));
        self.io.transmit(out_if, phys, frame.clone());
        let key = MbnKey {
            peer: first_hop,
            out_if,
            in_if,
        };
        if self.maint_buffer.enqueue(key, frame, now).is_none() {
            atomic_incr(&self.counters.maintbuf_queue_full);
        }
        self.counters
            .record_maintbuf_depth(self.maint_buffer.total_depth() as u64);
        self.drive_maintbuf_heads(now);
    }

    /// Sends the head-of-queue Ack Request for every MBN that just gained a
    /// new outstanding packet. A real implementation would do this lazily
    /// from `maint_buffer.timeout`'s events; this call short-circuits the
    /// first send so newly enqueued data doesn't wait for the next timer
    /// tick.
    fn drive_maintbuf_heads(&mut self, now: Ticks) {
        for ev in self.maint_buffer.timeout(now.saturating_sub(1)) {
            self.apply_mbn_event(ev, now);
        }
    }

    fn apply_mbn_event(&mut self, ev: MbnEvent, now: Ticks) {
        match ev {
            MbnEvent::SendAckRequest { key, ack_id } => {
                let Some(route) = self.link_cache.get_source_route(key.peer) else {
                    return;
                };
                let hops = route.hops.clone();
                let ack_req = SRPacket {
                    ack_req: Some(AckRequest { id: ack_id }),
                    source_route: Some(SourceRoute {
                        segments_left: (hops.len() - 1) as u8,
                        hops,
                    }),
                    source: self.self_address,
                    dest: key.peer,
                    ..Default::default()
                };
                self.transmit(key.out_if, key.peer, &ack_req);
            }
            MbnEvent::LinkBroken { key, dropped } => {
                atomic_incr(&self.counters.maintbuf_link_broken);
                if let Some(lk) = self.find_link_for_mbn(&key, now) {
                    self.link_cache.penalize_link(lk, now);
                }
                let err = RouteError {
                    src: self.self_address,
                    dst: VirtualAddress::ZERO,
                    unreachable: key.peer,
                    in_if: key.in_if,
                    out_if: key.out_if,
                };
                self.pback
                    .send_option(self.self_address, PendingOption::RouteError(err), now);
                warn!(peer = ?key.peer, dropped = dropped.len(), "maintenance buffer declared link broken");
            }
        }
    }

    fn find_link_for_mbn(&mut self, key: &MbnKey, now: Ticks) -> Option<crate::linkcache::LinkKey> {
        // Re-derive the link id via a fresh `add_link` call: looking the
        // link up by endpoint/interface is idempotent (refreshes the
        // timestamp) when the link already exists.
        Some(self.link_cache.add_link(
            key.peer,
            key.out_if,
            key.in_if,
            None,
            false,
            now,
            LinkChangeReason::AddManual,
        ))
    }

    fn originate_route_request(&mut self, dest: VirtualAddress, now: Ticks) {
        let identifier = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let adapters = self.adapters.clone();

        // A Route Request is broadcast, so it rides every destination
        // currently holding a pending option (spec §4.6 `send_packet`,
        // request case) — drain the queues once and stamp the same set
        // onto every adapter's copy below, rather than splitting them
        // piecemeal across adapters or resending a drained queue empty.
        let live_dests = self.pback.live_destinations();
        let attached = self.pback.attach_on_departure(
            &live_dests,
            0,
            ETHER_HEADER_LEN + FIXED_HEADER_LEN,
        );

        for out_if in adapters {
            // Each adapter gets its own copy with the trailing hop's
            // `out_if` stamped to the interface it's actually leaving on,
            // so whoever receives it can later reconstruct a real route
            // rather than one full of `0` placeholders.
            let req = RouteRequest {
                identifier,
                hops: vec![Hop {
                    addr: self.self_address,
                    in_if: 0,
                    out_if,
                    metric: LinkMetric::ZERO,
                }],
            };
            let mut pkt = SRPacket {
                req: Some(req),
                source: self.self_address,
                dest,
                ..Default::default()
            };
            for opt in attached.iter().cloned() {
                match opt {
                    PendingOption::Ack(a) => pkt.ack.push(a),
                    PendingOption::AckRequest(r) => pkt.ack_req = Some(r),
                    PendingOption::RouteReply(r) => pkt.rep.push(r),
                    PendingOption::RouteError(e) => pkt.err.push(e),
                    PendingOption::InfoReply(r) => pkt.info_rep.push(r),
                }
            }
            self.broadcast(out_if, &pkt, now);
        }
    }

    // ---- Receive path (spec §4.8 "State machine per received packet") ---

    /// Records the virtual-to-physical mapping for whichever node physically
    /// handed us this frame: the option owner's source for a non-routed
    /// control packet (reset to the immediate forwarder each hop, e.g. by
    /// [`Self::drain_forward_queue`]), or the preceding hop in the source
    /// route for a routed data/ack packet. Grounded in the original driver's
    /// `NeighborReceivePassive`.
    fn observe_sender(&mut self, pkt: &SRPacket, in_if: LQSRIf, sender: PhysicalAddress) {
        let peer = match &pkt.source_route {
            Some(sr) => {
                let idx = sr.hops.len() - sr.segments_left as usize;
                if idx == 0 {
                    return;
                }
                sr.hops[idx - 1].addr
            }
            None => pkt.source,
        };
        self.neighbor_cache.observe(peer, in_if, sender);
    }

    /// Entry point for one inbound frame, physically sent by `sender`,
    /// arriving on `in_if`.
    pub fn receive(&mut self, frame: Bytes, in_if: LQSRIf, sender: PhysicalAddress, now: Ticks) {
        let pkt = match codec::parse(frame, &self.mac_key(), self.mac.as_ref()) {
            Ok(p) => p,
            Err(e) => {
                atomic_incr(&self.counters.recv_bad_mac);
                atomic_incr(&self.counters.recv_invalid_packet);
                debug!(?e, "dropping packet that failed codec parse/MAC check");
                return;
            }
        };
        self.observe_sender(&pkt, in_if, sender);

        if let Some(req) = pkt.req.clone() {
            self.handle_route_request(req, in_if, now);
        }
        for rep in pkt.rep.clone() {
            self.handle_route_reply(rep, now);
        }
        for err in pkt.err.clone() {
            self.handle_route_error(err, now);
        }
        for ack in pkt.ack.clone() {
            self.handle_ack(ack, &pkt, now);
        }
        if let Some(ack_req) = pkt.ack_req {
            self.handle_ack_request(ack_req, &pkt, now);
        }
        if let Some(sr) = pkt.source_route.clone() {
            self.handle_source_route(sr, &pkt, in_if, now);
        }
        if pkt.info_req.is_some() {
            self.handle_info_request(pkt.source, now);
        }
        for rep in pkt.info_rep.clone() {
            self.handle_info_reply(rep);
        }
        if let Some(probe) = pkt.probe.clone() {
            self.handle_probe(probe, in_if, pkt.source, now);
        }
        if let Some(reply) = pkt.probe_reply.clone() {
            self.handle_probe_reply(reply, in_if, pkt.source, now);
        }
        for li in pkt.link_info.clone() {
            self.handle_link_info(li, pkt.source, now);
        }
    }

    fn handle_route_request(&mut self, req: RouteRequest, in_if: LQSRIf, now: Ticks) {
        let originator = req.originator();
        if originator == self.self_address {
            return;
        }
        let path_metric = req.hops.len() as u32;
        if self
            .request_table
            .accept(originator, req.identifier, path_metric)
            == AcceptOutcome::Suppress
        {
            trace!(?originator, id = req.identifier, "suppressing duplicate route request");
            return;
        }

        if req.hops.iter().any(|h| h.addr == self.self_address) {
            // Loop: we're already in the accumulated path.
            return;
        }

        let mut hops = req.hops.clone();
        hops.push(Hop {
            addr: self.self_address,
            in_if,
            out_if: 0,
            metric: LinkMetric::ZERO,
        });
        // Every node that touches a Route Request sees the whole
        // accumulated path so far, same as a Route Reply's hop list; learn
        // those links too instead of waiting for a reply to come back
        // through us.
        self.learn_links_along(&hops, now, LinkChangeReason::AddRequest);

        if req.target() == self.self_address {
            let reply = RouteReply { hops: hops.clone() };
            self.pback
                .send_option(originator, PendingOption::RouteReply(reply), now);
            return;
        }

        if hops.len() >= MAX_SR_LEN {
            return;
        }

        if self.forward_queue.len() >= MAX_FORWARD_QUEUE {
            atomic_incr(&self.counters.forward_drop);
            self.counters
                .record_forward_queue_depth(self.forward_queue.len() as u64);
            return;
        }
        self.forward_queue.push_back(PendingBroadcast {
            req: RouteRequest {
                identifier: req.identifier,
                hops,
            },
            exclude_if: in_if,
            queued_at: now,
        });
        self.counters
            .record_forward_queue_depth(self.forward_queue.len() as u64);
    }

    /// Installs a link for every consecutive pair in an accumulated Route
    /// Request/Reply hop chain (spec §4.2 "Add link": a third-party report
    /// rather than a self-measured probe, except for whichever pair
    /// originates at us).
    fn learn_links_along(&mut self, hops: &[Hop], now: Ticks, reason: LinkChangeReason) {
        // Every window's source is whatever node that hop belongs to, not
        // necessarily us: a 3+-hop chain carries edges we never touch at
        // all (the request/reply just happened to relay past us), so this
        // has to go through `add_link_from` with the window's own endpoint
        // as the source, the same as `handle_link_info` does for a
        // reported third-party edge — `add_link` would wrongly record
        // every edge as if it started at us.
        //
        // Both directions get installed: the wireless links a request
        // crosses are assumed usable the other way too (same assumption
        // the original relies on to let a Route Reply retrace a Route
        // Request's path at all), so a target several hops out can route a
        // reply home without a separate discovery back the other way.
        for w in hops.windows(2) {
            let fwd_source = self.link_cache.node_key_for(w[0].addr);
            self.link_cache.add_link_from(
                fwd_source,
                w[1].addr,
                w[0].out_if,
                w[1].in_if,
                Some(w[1].metric),
                w[0].addr == self.self_address,
                now,
                reason,
            );
            let rev_source = self.link_cache.node_key_for(w[1].addr);
            self.link_cache.add_link_from(
                rev_source,
                w[0].addr,
                w[1].in_if,
                w[0].out_if,
                Some(w[0].metric),
                w[1].addr == self.self_address,
                now,
                reason,
            );
        }
    }

    fn handle_route_reply(&mut self, rep: RouteReply, now: Ticks) {
        self.learn_links_along(&rep.hops, now, LinkChangeReason::AddReply);
        let dest = rep.hops.last().unwrap().addr;
        if dest == self.self_address {
            let originator = rep.hops[0].addr;
            self.flush_send_buffer(originator, now);
        }
    }

    fn handle_route_error(&mut self, err: RouteError, now: Ticks) {
        let lk = self.link_cache.add_link(
            err.unreachable,
            err.out_if,
            err.in_if,
            None,
            false,
            now,
            LinkChangeReason::Penalized,
        );
        self.link_cache.penalize_link(lk, now);
    }

    fn handle_ack(&mut self, ack: Ack, pkt: &SRPacket, now: Ticks) {
        let peer = pkt.source;
        // The ack's (out_if,in_if) pair is whatever the source route used
        // to reach us; the maintenance buffer key only needs the peer
        // endpoint plus the interfaces of the final hop, carried on `pkt`.
        let (out_if, in_if) = pkt
            .source_route
            .as_ref()
            .and_then(|sr| sr.hops.last().map(|h| (h.out_if, h.in_if)))
            .unwrap_or((0, 0));
        self.maint_buffer.on_ack(
            MbnKey {
                peer,
                out_if,
                in_if,
            },
            ack.id,
            now,
        );
    }

    fn handle_ack_request(&mut self, ack_req: AckRequest, pkt: &SRPacket, now: Ticks) {
        if pkt.source_route.is_none() {
            return;
        }
        self.pback.send_option(
            pkt.source,
            PendingOption::Ack(Ack { id: ack_req.id }),
            now,
        );
    }

    fn handle_source_route(
        &mut self,
        sr: SourceRoute,
        pkt: &SRPacket,
        in_if: LQSRIf,
        now: Ticks,
    ) {
        // `segments_left` is the count of hops still ahead of this packet,
        // as set by the originator (`hops.len() - 1`) and decremented by
        // every forwarder; our own position in the path is therefore
        // `hops.len() - segments_left`, not one less.
        let idx = sr.hops.len() - sr.segments_left as usize;
        if sr.hops[idx].addr != self.self_address {
            return;
        }
        if idx == sr.hops.len() - 1 {
            if !pkt.payload.is_empty() {
                self.io.deliver(pkt.payload.clone());
            }
            return;
        }
        let next_idx = idx + 1;
        let next_hop = sr.hops[next_idx];
        let mut forwarded = sr.clone();
        forwarded.segments_left -= 1;
        let out_pkt = SRPacket {
            source_route: Some(forwarded),
            source: pkt.source,
            dest: pkt.dest,
            payload: pkt.payload.clone(),
            // Route Reply/Error/Info Reply are addressed end-to-end by
            // `VirtualAddress`, same as the payload itself, not hop-by-hop:
            // carry them along every relay so whichever hop they're
            // actually meant for still sees them, the way `receive()`
            // processes these options regardless of whether this hop turns
            // out to be the final one. Ack/AckRequest stay behind: those
            // are only ever meaningful between the two adjacent maintenance
            // buffer peers that set them.
            rep: pkt.rep.clone(),
            err: pkt.err.clone(),
            info_rep: pkt.info_rep.clone(),
            ..Default::default()
        };
        let _ = in_if;
        self.transmit(next_hop.out_if, next_hop.addr, &out_pkt);
    }

    fn handle_info_request(&mut self, peer: VirtualAddress, now: Ticks) {
        let reply = InfoReply {
            recv_bad_mac: self.counters.recv_bad_mac.load(Ordering::Relaxed) as u32,
            forward_drop: self.counters.forward_drop.load(Ordering::Relaxed) as u32,
        };
        self.pback
            .send_option(peer, PendingOption::InfoReply(reply), now);
    }

    fn handle_info_reply(&mut self, _rep: InfoReply) {}

    fn handle_probe(&mut self, probe: Probe, in_if: LQSRIf, peer: VirtualAddress, now: Ticks) {
        let lk = self
            .link_cache
            .add_link(peer, 0, in_if, None, false, now, LinkChangeReason::AddManual);
        let reply_payload = self
            .link_cache
            .update_link_metric(lk, now, |eng, state| {
                eng.receive_probe(state, probe.seq, &probe.payload, now)
            })
            .flatten();
        if let Some(payload) = reply_payload {
            let pkt = SRPacket {
                probe_reply: Some(ProbeReply {
                    seq: probe.seq,
                    payload,
                }),
                source: self.self_address,
                dest: peer,
                ..Default::default()
            };
            self.transmit(in_if, peer, &pkt);
        }
    }

    fn handle_probe_reply(
        &mut self,
        reply: ProbeReply,
        in_if: LQSRIf,
        peer: VirtualAddress,
        now: Ticks,
    ) {
        let lk = self
            .link_cache
            .add_link(peer, 0, in_if, None, true, now, LinkChangeReason::AddManual);
        let engine = self.engine.clone();
        self.link_cache.update_link_metric(lk, now, |_, state| {
            engine.receive_probe_reply(state, &reply.payload, now);
        });
    }

    fn handle_link_info(&mut self, info: LinkInfo, peer: VirtualAddress, now: Ticks) {
        let reporter = self.link_cache.node_key_for(peer);
        for entry in info.entries {
            self.link_cache.add_link_from(
                reporter,
                entry.peer,
                entry.out_if,
                entry.in_if,
                Some(entry.metric),
                false,
                now,
                LinkChangeReason::AddManual,
            );
        }
    }

    fn flush_send_buffer(&mut self, dest: VirtualAddress, now: Ticks) {
        if !self.send_buffer.has_pending(dest) {
            return;
        }
        let Ok(route) = self.link_cache.fill_source_route(dest, now) else {
            return;
        };
        self.request_table.reset_backoff(dest);
        for payload in self.send_buffer.drain(dest) {
            self.dispatch_via_maintbuf(dest, route.clone(), payload, now);
        }
    }

    // ---- Scavenge / periodic timer (spec §4.8 "Periodic timer task") ----

    /// Drives every periodic subsystem forward and returns the absolute
    /// tick at which it should be called again (spec: `miniport_timeout`
    /// reschedules itself for the earliest of its component deadlines).
    pub fn tick(&mut self, now: Ticks) -> Ticks {
        self.drain_forward_queue(now);

        for ev in self.maint_buffer.timeout(now) {
            self.apply_mbn_event(ev, now);
        }
        self.counters
            .record_maintbuf_depth(self.maint_buffer.total_depth() as u64);

        for (dest, option) in self.pback.timeout(now) {
            self.send_standalone(dest, option, now);
        }

        let dropped = self.send_buffer.expire(now);
        if dropped > 0 {
            for _ in 0..dropped {
                atomic_incr(&self.counters.sendbuf_timeout);
            }
        }

        if now.saturating_sub(self.last_link_info) >= link_info_period() {
            self.broadcast_link_info(now);
            self.last_link_info = now;
        }

        let mut next = now + link_info_period();
        if let Some(d) = self.pback.next_deadline() {
            next = next.min(d);
        }
        next.min(now + ms(100))
    }

    fn send_standalone(&mut self, dest: VirtualAddress, option: PendingOption, now: Ticks) {
        atomic_incr(&self.counters.pback_sent_standalone);
        let Some(route) = self.link_cache.get_source_route(dest) else {
            return;
        };
        let hops = route.hops.clone();
        let mut pkt = SRPacket {
            source_route: Some(SourceRoute {
                segments_left: (hops.len() - 1) as u8,
                hops: hops.clone(),
            }),
            source: self.self_address,
            dest,
            ..Default::default()
        };
        match option {
            PendingOption::Ack(a) => pkt.ack.push(a),
            PendingOption::AckRequest(r) => pkt.ack_req = Some(r),
            PendingOption::RouteReply(r) => pkt.rep.push(r),
            PendingOption::RouteError(e) => pkt.err.push(e),
            PendingOption::InfoReply(r) => pkt.info_rep.push(r),
        }
        let out_if = hops.first().map(|h| h.out_if).unwrap_or(0);
        let next_hop = hops.get(1).map(|h| h.addr).unwrap_or(dest);
        self.transmit(out_if, next_hop, &pkt);
    }

    fn broadcast_link_info(&mut self, now: Ticks) {
        let info = self.link_cache.create_link_info(MAX_SR_LEN);
        if info.entries.is_empty() {
            return;
        }
        let probe_seq = self.next_probe_seq;
        self.next_probe_seq = self.next_probe_seq.wrapping_add(1);
        let pkt = SRPacket {
            probe: Some(Probe {
                seq: probe_seq,
                payload: codec::ProbePayload::Rtt {
                    send_time_ticks: now,
                },
            }),
            link_info: vec![info],
            source: self.self_address,
            ..Default::default()
        };
        let adapters = self.adapters.clone();
        for out_if in adapters {
            self.broadcast(out_if, &pkt, now);
        }
        info!("broadcast link info");
    }

    fn drain_forward_queue(&mut self, now: Ticks) {
        if now.saturating_sub(self.last_broadcast) < min_broadcast_gap() {
            return;
        }
        let Some(pending) = self.forward_queue.pop_front() else {
            return;
        };
        let adapters: Vec<LQSRIf> = self
            .adapters
            .iter()
            .copied()
            .filter(|&a| a != pending.exclude_if)
            .collect();
        for out_if in adapters {
            // Stamp our own trailing hop with the interface this specific
            // copy is actually leaving on, same reasoning as
            // `originate_route_request`.
            let mut hops = pending.req.hops.clone();
            if let Some(last) = hops.last_mut() {
                last.out_if = out_if;
            }
            let pkt = SRPacket {
                req: Some(RouteRequest {
                    identifier: pending.req.identifier,
                    hops,
                }),
                source: self.self_address,
                ..Default::default()
            };
            self.broadcast(out_if, &pkt, now);
        }
        let _ = pending.queued_at;
        self.counters
            .record_forward_queue_depth(self.forward_queue.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::HopMetric;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingIo {
        transmitted: Mutex<Vec<(LQSRIf, Bytes)>>,
        delivered: Mutex<Vec<Bytes>>,
    }

    impl PacketIo for RecordingIo {
        fn transmit(&self, out_if: LQSRIf, _dest: PhysicalAddress, frame: Bytes) {
            self.transmitted.lock().unwrap().push((out_if, frame));
        }
        fn deliver(&self, payload: Bytes) {
            self.delivered.lock().unwrap().push(payload);
        }
    }

    fn addr(n: u8) -> VirtualAddress {
        VirtualAddress::new([n; 6])
    }

    fn orchestrator(io: Arc<RecordingIo>) -> Orchestrator {
        Orchestrator::new(
            addr(0),
            VirtualAdapterConfig::default(),
            vec![1],
            Arc::new(HopMetric),
            Arc::new(codec::ToyMac),
            io,
            Arc::new(Counters::default()),
        )
    }

    #[test]
    fn send_with_no_route_originates_request_and_buffers_payload() {
        let io = Arc::new(RecordingIo::default());
        let mut orch = orchestrator(io.clone());
        orch.send(addr(9), Bytes::from_static(b"hi"), 0);
        assert!(orch.send_buffer.has_pending(addr(9)));
        assert_eq!(io.transmitted.lock().unwrap().len(), 1);
    }

    #[test]
    fn receive_route_reply_installs_links_and_flushes_send_buffer() {
        let io = Arc::new(RecordingIo::default());
        let mut orch = orchestrator(io.clone());
        orch.send(addr(2), Bytes::from_static(b"payload"), 0);
        assert!(orch.send_buffer.has_pending(addr(2)));

        let reply = RouteReply {
            hops: vec![
                Hop {
                    addr: addr(0),
                    in_if: 0,
                    out_if: 1,
                    metric: LinkMetric(1),
                },
                Hop {
                    addr: addr(2),
                    in_if: 1,
                    out_if: 0,
                    metric: LinkMetric(1),
                },
            ],
        };
        let pkt = SRPacket {
            rep: vec![reply],
            ack: vec![Ack { id: 0 }],
            source: addr(2),
            dest: addr(0),
            ..Default::default()
        };
        let frame = codec::emit(&pkt, &orch.mac_key(), orch.mac.as_ref()).unwrap();
        orch.receive(frame, 1, PhysicalAddress::new([2; 6]), 10);

        assert!(!orch.send_buffer.has_pending(addr(2)));
    }

    #[test]
    fn receive_source_route_addressed_to_self_delivers_payload() {
        let io = Arc::new(RecordingIo::default());
        let mut orch = orchestrator(io.clone());
        let sr = SourceRoute {
            hops: vec![
                Hop {
                    addr: addr(5),
                    in_if: 0,
                    out_if: 1,
                    metric: LinkMetric(1),
                },
                Hop {
                    addr: addr(0),
                    in_if: 1,
                    out_if: 0,
                    metric: LinkMetric(1),
                },
            ],
            segments_left: 1,
        };
        let pkt = SRPacket {
            source_route: Some(sr),
            ack: vec![Ack { id: 1 }],
            source: addr(5),
            dest: addr(0),
            payload: Bytes::from_static(b"for-me"),
            ..Default::default()
        };
        let frame = codec::emit(&pkt, &orch.mac_key(), orch.mac.as_ref()).unwrap();
        orch.receive(frame, 1, PhysicalAddress::new([5; 6]), 10);
        assert_eq!(io.delivered.lock().unwrap()[0], Bytes::from_static(b"for-me"));
    }
}
