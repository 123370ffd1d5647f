//! Top-level `Context`: one running instance of the routing core for a
//! single virtual adapter.
//!
//! Per the redesign note in spec.md §9, this replaces what the original
//! driver kept as per-adapter global state with an explicit struct a host
//! owns and can run several of side by side. It composes the
//! [`crate::orchestrator::Orchestrator`] state machine with a [`Clock`] and
//! exposes the packet-path entry points plus the [`crate::control`] surface.

use crate::clock::{Clock, QuantaClock};
use crate::codec::Mac;
use crate::config::VirtualAdapterConfig;
use crate::control::{ExitCode, LinkSummary, Request, Response, StatisticsSnapshot};
use crate::metric;
use crate::orchestrator::{Orchestrator, PacketIo};
use crate::stats::Counters;
use crate::types::{LQSRIf, Ticks};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// One running virtual adapter: owns the LQSR state machine and the clock
/// that drives its periodic timer.
pub struct Context {
    orchestrator: Orchestrator,
    clock: Arc<dyn Clock>,
}

impl Context {
    /// Builds a fresh `Context` for `config`, using the production
    /// `quanta`-backed clock. Tests generally want [`Self::with_clock`]
    /// instead, so timing is deterministic.
    pub fn new(
        config: VirtualAdapterConfig,
        adapters: Vec<LQSRIf>,
        mac: Arc<dyn Mac>,
        io: Arc<dyn PacketIo>,
    ) -> Self {
        Self::with_clock(config, adapters, mac, io, Arc::new(QuantaClock::default()))
    }

    pub fn with_clock(
        config: VirtualAdapterConfig,
        adapters: Vec<LQSRIf>,
        mac: Arc<dyn Mac>,
        io: Arc<dyn PacketIo>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let self_address = config.virtual_address;
        let engine: Arc<dyn metric::MetricEngine> = Arc::from(metric::build_engine(&config));
        let counters = Arc::new(Counters::default());
        let orchestrator = Orchestrator::new(
            self_address,
            config,
            adapters,
            engine,
            mac,
            io,
            counters,
        );
        Self { orchestrator, clock }
    }

    fn now(&self) -> Ticks {
        self.clock.now()
    }

    /// Hands `payload` to the routing core for delivery to `dest` (spec
    /// §4.8, Send path).
    pub fn send(&mut self, dest: crate::types::VirtualAddress, payload: Bytes) {
        let now = self.now();
        self.orchestrator.send(dest, payload, now);
    }

    /// Hands an inbound frame, physically sent by `sender`, received on
    /// `in_if`, to the routing core (spec §4.8, Receive path).
    pub fn receive(&mut self, frame: Bytes, in_if: LQSRIf, sender: crate::types::PhysicalAddress) {
        let now = self.now();
        self.orchestrator.receive(frame, in_if, sender, now);
    }

    /// Drives every periodic process (maintenance buffer, piggy-back cache,
    /// send buffer expiry, link-info broadcast). The host should call this
    /// whenever the returned deadline elapses, and again after that.
    pub fn tick(&mut self) -> Ticks {
        let now = self.now();
        self.orchestrator.tick(now)
    }

    /// Dispatches one control-surface request (spec §6.1), mirroring the
    /// original driver's ioctl table collapsed into a single typed call.
    pub fn control(&mut self, request: Request) -> (Response, ExitCode) {
        let now = self.now();
        match request {
            Request::QueryNeighborCache => {
                let entries = self.orchestrator.neighbor_cache.iter().collect();
                (Response::NeighborCache(entries), ExitCode::Success)
            }
            Request::FlushNeighborCache => {
                self.orchestrator.neighbor_cache.clear();
                (Response::Flushed, ExitCode::Success)
            }
            Request::QuerySourceRoute { destination } => {
                let route = self
                    .orchestrator
                    .link_cache
                    .get_source_route(destination)
                    .map(|r| r.hops.clone());
                (Response::SourceRoute(route), ExitCode::Success)
            }
            Request::QueryLinkCache => {
                let summaries = self
                    .orchestrator
                    .link_cache
                    .all_links_summary()
                    .into_iter()
                    .map(|(source, target, out_if, in_if, metric, ref_count)| LinkSummary {
                        source,
                        target,
                        out_if,
                        in_if,
                        metric,
                        ref_count,
                    })
                    .collect();
                (Response::LinkCache(summaries), ExitCode::Success)
            }
            Request::FlushLinkCache => {
                self.orchestrator.link_cache.flush(now);
                (Response::Flushed, ExitCode::Success)
            }
            Request::AddStaticRoute { hops } => {
                match self.orchestrator.link_cache.add_static_route(hops, now) {
                    Ok(()) => (Response::Ack, ExitCode::Success),
                    Err(e) => (Response::Ack, ExitCode::from(&e)),
                }
            }
            Request::ControlLink {
                target,
                out_if,
                in_if,
                drop_ratio,
            } => match self
                .orchestrator
                .link_cache
                .find_link_key(target, out_if, in_if)
            {
                Some(lk) => {
                    self.orchestrator.link_cache.control_link(lk, drop_ratio);
                    (Response::Ack, ExitCode::Success)
                }
                None => (Response::Ack, ExitCode::NotFound),
            },
            Request::QueryLinkChangeLog => {
                let records = self
                    .orchestrator
                    .link_cache
                    .link_change_log
                    .iter()
                    .cloned()
                    .collect();
                (Response::LinkChangeLog(records), ExitCode::Success)
            }
            Request::QueryRouteChangeLog => {
                let records = self
                    .orchestrator
                    .link_cache
                    .route_change_log
                    .iter()
                    .cloned()
                    .collect();
                (Response::RouteChangeLog(records), ExitCode::Success)
            }
            Request::QueryRouteUsage { destination } => {
                let usage = self
                    .orchestrator
                    .link_cache
                    .route_usage(destination)
                    .map(|u| u.routes.clone())
                    .unwrap_or_default();
                (Response::RouteUsage(usage), ExitCode::Success)
            }
            Request::QueryMaintenanceBuffer => {
                let depth = self.orchestrator.maint_buffer.total_depth();
                (Response::MaintenanceBufferDepth(depth), ExitCode::Success)
            }
            Request::ResetStatistics => {
                self.orchestrator.counters.reset();
                (Response::Ack, ExitCode::Success)
            }
            Request::QueryStatistics => {
                let c = &self.orchestrator.counters;
                let snapshot = StatisticsSnapshot {
                    recv_bad_mac: c.recv_bad_mac.load(Ordering::Relaxed),
                    recv_invalid_packet: c.recv_invalid_packet.load(Ordering::Relaxed),
                    forward_drop: c.forward_drop.load(Ordering::Relaxed),
                    maintbuf_queue_full: c.maintbuf_queue_full.load(Ordering::Relaxed),
                    maintbuf_link_broken: c.maintbuf_link_broken.load(Ordering::Relaxed),
                    sendbuf_timeout: c.sendbuf_timeout.load(Ordering::Relaxed),
                    route_request_originated: c.route_request_originated.load(Ordering::Relaxed),
                    route_request_suppressed: c.route_request_suppressed.load(Ordering::Relaxed),
                    dijkstra_runs: c.dijkstra_runs.load(Ordering::Relaxed),
                };
                (Response::Statistics(snapshot), ExitCode::Success)
            }
        }
    }

    /// Drops every link through `if_index` regardless of reference count
    /// (spec §3, Link lifecycle (a): interface going down).
    pub fn interface_down(&mut self, if_index: LQSRIf) {
        let now = self.now();
        self.orchestrator
            .link_cache
            .delete_interface(if_index, now);
    }

    pub fn self_address(&self) -> crate::types::VirtualAddress {
        self.orchestrator.self_address
    }
}
