//! PktPair metric (spec §4.7, "PktPair"). Used standalone and as the
//! bandwidth-estimation building block inside [`super::wcett`].
//!
//! `small_probe_bytes`/`large_probe_bytes` are sent back to back; the
//! receiver times the inter-arrival of the *large* probe relative to the
//! small one and echoes it back in the reply, from which the sender derives
//! an estimated bandwidth (`WcettConvertPktPairDelayToBandwidth` in
//! `wcett.c`).

use super::{LinkMetricState, MetricEngine, ProbeToSend};
use crate::codec::ProbePayload;
use crate::config::PktPairParams;
use crate::types::{LinkMetric, MetricType, Ticks, TICKS_PER_SECOND};

const PROBE_PACKET_BYTES: u64 = 1088;

pub(super) fn encode_bandwidth(mut bps: u64) -> u16 {
    let mut bexp = 0u32;
    while bps >= 1000 && bexp < 4 {
        bps /= 1000;
        bexp += 1;
    }
    if bexp == 0 {
        0
    } else {
        (((bps as u32) << 2) | (bexp - 1)) as u16
    }
}

pub(super) fn decode_bandwidth(code: u16) -> u64 {
    let bexp = (code & 3) as u32;
    let mantissa = (code >> 2) as u64;
    mantissa * 1000u64.pow(bexp + 1)
}

/// `Delay` is the large-minus-small probe inter-arrival, in ticks (100 ns).
fn delay_to_bandwidth_bps(delay_ticks: u64) -> u64 {
    if delay_ticks == 0 {
        return u64::MAX;
    }
    ((PROBE_PACKET_BYTES * 8 * 100_000) / delay_ticks) * 100
}

#[derive(Debug, Clone, Copy)]
pub struct PktPairMetric {
    #[allow(dead_code)]
    small_probe_bytes: u32,
    #[allow(dead_code)]
    large_probe_bytes: u32,
}

impl PktPairMetric {
    pub fn new(params: &PktPairParams) -> Self {
        Self {
            small_probe_bytes: params.small_probe_bytes,
            large_probe_bytes: params.large_probe_bytes,
        }
    }

    fn bandwidth_code(&self, state: &LinkMetricState) -> u16 {
        match state {
            LinkMetricState::PktPair { bandwidth_code, .. } => *bandwidth_code,
            _ => 0,
        }
    }
}

impl MetricEngine for PktPairMetric {
    fn metric_type(&self) -> MetricType {
        MetricType::PktPair
    }

    fn init_link(&self) -> LinkMetricState {
        LinkMetricState::PktPair {
            bandwidth_code: 0,
            outstanding_since: None,
        }
    }

    fn is_infinite(&self, state: &LinkMetricState) -> bool {
        self.bandwidth_code(state) == 0
    }

    fn link_metric(&self, state: &LinkMetricState) -> LinkMetric {
        LinkMetric(self.bandwidth_code(state) as u32)
    }

    fn conv_link_metric(&self, state: &LinkMetricState) -> u32 {
        let bps = decode_bandwidth(self.bandwidth_code(state));
        if bps == 0 {
            u32::MAX
        } else {
            // Comparable cost: transmission time (ticks) for a 1-second
            // reference frame at this bandwidth, smaller bandwidth = larger cost.
            ((TICKS_PER_SECOND as u128 * 1_000_000 / bps as u128).min(u32::MAX as u128)) as u32
        }
    }

    fn send_probes(&self, state: &mut LinkMetricState, now: Ticks) -> Option<ProbeToSend> {
        if let LinkMetricState::PktPair {
            outstanding_since, ..
        } = state
        {
            if outstanding_since.is_none() {
                *outstanding_since = Some(now);
                return Some(ProbeToSend {
                    seq: 0,
                    payload: ProbePayload::PktPair {
                        small_send_ticks: now,
                        large_send_ticks: now,
                    },
                });
            }
        }
        None
    }

    fn receive_probe(
        &self,
        _state: &mut LinkMetricState,
        _seq: u32,
        payload: &ProbePayload,
        now: Ticks,
    ) -> Option<ProbePayload> {
        match payload {
            ProbePayload::PktPair {
                small_send_ticks, ..
            } => Some(ProbePayload::PktPair {
                small_send_ticks: *small_send_ticks,
                large_send_ticks: now,
            }),
            _ => None,
        }
    }

    fn receive_probe_reply(&self, state: &mut LinkMetricState, payload: &ProbePayload, _now: Ticks) {
        let ProbePayload::PktPair {
            small_send_ticks,
            large_send_ticks,
        } = payload
        else {
            return;
        };
        let delay = large_send_ticks.saturating_sub(*small_send_ticks);
        let bps = delay_to_bandwidth_bps(delay);
        if let LinkMetricState::PktPair {
            bandwidth_code,
            outstanding_since,
        } = state
        {
            *bandwidth_code = encode_bandwidth(bps);
            *outstanding_since = None;
        }
    }

    fn penalize(&self, state: &mut LinkMetricState) {
        if let LinkMetricState::PktPair {
            bandwidth_code,
            outstanding_since,
        } = state
        {
            *bandwidth_code = encode_bandwidth(decode_bandwidth(*bandwidth_code) / 2);
            *outstanding_since = None;
        }
    }

    fn install_reported(&self, state: &mut LinkMetricState, reported: u32) {
        if let LinkMetricState::PktPair { bandwidth_code, .. } = state {
            *bandwidth_code = reported as u16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_round_trips_through_encoding() {
        let bps = 54_000_000u64;
        let code = encode_bandwidth(bps);
        let decoded = decode_bandwidth(code);
        // lossy (10-bit mantissa): within 0.4%
        assert!((decoded as i64 - bps as i64).unsigned_abs() < bps / 200);
    }

    #[test]
    fn zero_bandwidth_is_infinite() {
        let m = PktPairMetric::new(&PktPairParams::default());
        let s = m.init_link();
        assert!(m.is_infinite(&s));
    }

    #[test]
    fn reply_populates_bandwidth_estimate() {
        let m = PktPairMetric::new(&PktPairParams::default());
        let mut s = m.init_link();
        m.receive_probe_reply(
            &mut s,
            &ProbePayload::PktPair {
                small_send_ticks: 0,
                large_send_ticks: 1000, // 100us delay
            },
            0,
        );
        assert!(!m.is_infinite(&s));
    }
}
