//! RTT metric (spec §4.7, "RTT"). EWMA-smoothed round-trip estimate, ported
//! from `rtt.c`'s `RttUpdateRawMetric`.

use super::{LinkMetricState, MetricEngine, ProbeToSend, MAXALPHA};
use crate::codec::ProbePayload;
use crate::config::RttParams;
use crate::types::{ms, LinkMetric, MetricType, Ticks};

const INITIAL_RTT_ESTIMATE_TICKS: u32 = 0;

#[derive(Debug, Clone, Copy)]
pub struct RttMetric {
    alpha: u32,
    penalty_factor: u32,
    infinite_threshold_ticks: u32,
}

impl RttMetric {
    pub fn new(params: &RttParams) -> Self {
        Self {
            alpha: params.alpha.min(MAXALPHA),
            penalty_factor: params.penalty_factor,
            infinite_threshold_ticks: ms(params.infinite_threshold_ms as u64) as u32,
        }
    }

    fn raw(&self, state: &LinkMetricState) -> u32 {
        match state {
            LinkMetricState::Rtt { raw_ticks, .. } => *raw_ticks,
            _ => 0,
        }
    }

    /// EWMA update: `raw' = alpha/M * delta + (M-alpha)/M * raw`, unless raw
    /// is unset (0) or already infinite, in which case `delta` replaces it
    /// outright (first sample / recovering from penalty).
    fn update_raw(&self, state: &mut LinkMetricState, delta: u32) {
        if let LinkMetricState::Rtt { raw_ticks, .. } = state {
            *raw_ticks = if *raw_ticks != 0 && *raw_ticks != u32::MAX {
                let new = (delta as u64 * self.alpha as u64) / MAXALPHA as u64;
                let old = (*raw_ticks as u64 * (MAXALPHA - self.alpha) as u64) / MAXALPHA as u64;
                (new + old).min(u32::MAX as u64) as u32
            } else {
                delta
            };
        }
    }
}

impl MetricEngine for RttMetric {
    fn metric_type(&self) -> MetricType {
        MetricType::Rtt
    }

    fn init_link(&self) -> LinkMetricState {
        LinkMetricState::Rtt {
            raw_ticks: INITIAL_RTT_ESTIMATE_TICKS,
            outstanding_since: None,
        }
    }

    fn is_infinite(&self, state: &LinkMetricState) -> bool {
        self.raw(state) > self.infinite_threshold_ticks
    }

    fn link_metric(&self, state: &LinkMetricState) -> LinkMetric {
        LinkMetric(self.raw(state))
    }

    fn conv_link_metric(&self, state: &LinkMetricState) -> u32 {
        if self.is_infinite(state) {
            u32::MAX
        } else {
            self.raw(state)
        }
    }

    fn send_probes(&self, state: &mut LinkMetricState, now: Ticks) -> Option<ProbeToSend> {
        if let LinkMetricState::Rtt {
            outstanding_since, ..
        } = state
        {
            if outstanding_since.is_none() {
                *outstanding_since = Some(now);
                return Some(ProbeToSend {
                    seq: 0,
                    payload: ProbePayload::Rtt {
                        send_time_ticks: now,
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
        _now: Ticks,
    ) -> Option<ProbePayload> {
        match payload {
            ProbePayload::Rtt { send_time_ticks } => Some(ProbePayload::Rtt {
                send_time_ticks: *send_time_ticks,
            }),
            _ => None,
        }
    }

    fn receive_probe_reply(&self, state: &mut LinkMetricState, payload: &ProbePayload, now: Ticks) {
        let ProbePayload::Rtt { send_time_ticks } = payload else {
            return;
        };
        let delta = now.saturating_sub(*send_time_ticks).min(u32::MAX as u64) as u32;
        self.update_raw(state, delta);
        if let LinkMetricState::Rtt {
            outstanding_since, ..
        } = state
        {
            *outstanding_since = None;
        }
    }

    fn penalize(&self, state: &mut LinkMetricState) {
        let raw = self.raw(state);
        let delta = self.penalty_factor.saturating_mul(raw);
        self.update_raw(state, delta);
        if let LinkMetricState::Rtt {
            outstanding_since, ..
        } = state
        {
            *outstanding_since = None;
        }
    }

    fn install_reported(&self, state: &mut LinkMetricState, reported: u32) {
        if let LinkMetricState::Rtt { raw_ticks, .. } = state {
            *raw_ticks = reported;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RttParams;

    fn engine() -> RttMetric {
        RttMetric::new(&RttParams::default())
    }

    #[test]
    fn first_sample_sets_raw_directly() {
        let m = engine();
        let mut s = m.init_link();
        m.receive_probe_reply(&mut s, &ProbePayload::Rtt { send_time_ticks: 0 }, 500);
        assert_eq!(m.conv_link_metric(&s), 500);
    }

    #[test]
    fn ewma_blends_subsequent_samples() {
        let m = engine();
        let mut s = m.init_link();
        m.receive_probe_reply(&mut s, &ProbePayload::Rtt { send_time_ticks: 0 }, 1000);
        // alpha=1, M=10: raw' = 1/10*2000 + 9/10*1000 = 200 + 900 = 1100
        m.receive_probe_reply(&mut s, &ProbePayload::Rtt { send_time_ticks: 0 }, 2000);
        assert_eq!(m.conv_link_metric(&s), 1100);
    }

    #[test]
    fn penalize_multiplies_raw_by_penalty_factor() {
        let m = engine();
        let mut s = m.init_link();
        m.receive_probe_reply(&mut s, &ProbePayload::Rtt { send_time_ticks: 0 }, 100);
        m.penalize(&mut s);
        assert_eq!(m.conv_link_metric(&s), 300);
    }

    #[test]
    fn beyond_threshold_is_infinite() {
        let m = engine();
        let mut s = m.init_link();
        m.receive_probe_reply(
            &mut s,
            &ProbePayload::Rtt { send_time_ticks: 0 },
            ms(20),
        );
        assert!(m.is_infinite(&s));
        assert_eq!(m.conv_link_metric(&s), u32::MAX);
    }
}
