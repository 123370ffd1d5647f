//! Pluggable link-quality metric engines (spec §4.7).
//!
//! Four engines share one interface — `init_link`, `path_metric`,
//! `conv_link_metric`, `is_infinite`, `send_probes`, `receive_probe`,
//! `receive_probe_reply`, `penalize` (spec §2, item 8) — the same shape
//! `rist_bonding_core::scheduler::ewma` gives its link-quality smoothing:
//! one small piece of per-link state, updated by a handful of pure
//! functions, with no knowledge of the packets that carry it.

mod etx;
mod hop;
mod pktpair;
mod rtt;
mod wcett;

pub use etx::EtxMetric;
pub use hop::HopMetric;
pub use pktpair::PktPairMetric;
pub use rtt::RttMetric;
pub use wcett::WcettMetric;

use crate::codec::ProbePayload;
use crate::config::VirtualAdapterConfig;
use crate::types::{LinkMetric, MetricType, Ticks};
use std::collections::VecDeque;
use std::fmt;

/// Engine-private per-link state. The wire-visible [`LinkMetric`] stored on
/// each `Link` is always derived from this via `conv_link_metric`; this is
/// the richer bookkeeping (probe history, outstanding probes, channel
/// assignment) that never appears on the wire directly.
#[derive(Debug, Clone)]
pub enum LinkMetricState {
    Hop,
    Rtt {
        raw_ticks: u32,
        outstanding_since: Option<Ticks>,
    },
    PktPair {
        bandwidth_code: u16,
        outstanding_since: Option<Ticks>,
    },
    Etx {
        loss_prob_q12: u16,
        recv_history: VecDeque<Ticks>,
        last_broadcast: Ticks,
    },
    Wcett {
        loss_prob_q12: u16,
        bandwidth_code: u16,
        channel: u8,
    },
}

/// Result of polling an engine for outbound probe traffic.
#[derive(Debug, Clone)]
pub struct ProbeToSend {
    pub seq: u32,
    pub payload: ProbePayload,
}

/// Common interface every metric engine implements (spec §2 item 8, §4.7).
pub trait MetricEngine: fmt::Debug + Send + Sync {
    fn metric_type(&self) -> MetricType;

    /// Initial per-link state for a freshly observed link.
    fn init_link(&self) -> LinkMetricState;

    /// Whether `state`'s current wire metric should be treated as
    /// unreachable by Dijkstra.
    fn is_infinite(&self, state: &LinkMetricState) -> bool;

    /// Wire-visible [`LinkMetric`] derived from `state`.
    fn link_metric(&self, state: &LinkMetricState) -> LinkMetric;

    /// Comparable `u32` Dijkstra accumulates over (spec: `conv`).
    fn conv_link_metric(&self, state: &LinkMetricState) -> u32;

    /// Accumulates the metric of a full path, hop by hop, in path order.
    /// Default: sum of `conv_link_metric`, clamped to `u32::MAX` on
    /// overflow — correct for HOP/RTT/PktPair/ETX; WCETT overrides it.
    fn path_metric(&self, states: &[&LinkMetricState]) -> u32 {
        let mut total: u64 = 0;
        for s in states {
            total += self.conv_link_metric(s) as u64;
            if total >= u32::MAX as u64 {
                return u32::MAX;
            }
        }
        total as u32
    }

    /// Whether this link is due for a fresh probe at `now`; if so, returns
    /// what to send.
    fn send_probes(&self, state: &mut LinkMetricState, now: Ticks) -> Option<ProbeToSend>;

    /// Peer-side handling of an inbound probe: updates any local state
    /// (e.g. ETX receive history) and returns the reply payload to send
    /// back, if any.
    fn receive_probe(
        &self,
        state: &mut LinkMetricState,
        seq: u32,
        payload: &ProbePayload,
        now: Ticks,
    ) -> Option<ProbePayload>;

    /// Sender-side handling of an inbound probe reply: updates the link's
    /// metric state from the round-trip observation.
    fn receive_probe_reply(&self, state: &mut LinkMetricState, payload: &ProbePayload, now: Ticks);

    /// Declares the outstanding probe lost and applies the metric penalty.
    fn penalize(&self, state: &mut LinkMetricState);

    /// Installs a [`LinkMetric`] reported by a peer (a Link Info entry, or a
    /// Route Request/Reply hop we didn't measure ourselves) into `state`,
    /// using the same encoding `link_metric` produces. A `state` of the
    /// wrong variant is left untouched, the same defensive fallback the
    /// per-field accessors elsewhere in each engine use.
    fn install_reported(&self, state: &mut LinkMetricState, reported: u32);
}

pub const MAXALPHA: u32 = 10;

/// Builds the configured metric engine. Grounded in
/// `rist_bonding_core::config`'s pattern of resolving one concrete strategy
/// object out of a config enum at startup.
pub fn build_engine(cfg: &VirtualAdapterConfig) -> Box<dyn MetricEngine> {
    match cfg.metric_type {
        MetricType::Hop => Box::new(HopMetric),
        MetricType::Rtt => Box::new(RttMetric::new(&cfg.rtt)),
        MetricType::PktPair => Box::new(PktPairMetric::new(&cfg.pktpair)),
        MetricType::Etx => Box::new(EtxMetric::new(&cfg.etx)),
        MetricType::Wcett => Box::new(WcettMetric::new(&cfg.wcett)),
    }
}
