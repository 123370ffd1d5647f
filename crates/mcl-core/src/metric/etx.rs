//! ETX metric (spec §4.7, "ETX"). Expected Transmission Count, derived from
//! forward/reverse delivery ratios observed via periodic broadcast probes.
//!
//! Grounded in `wcett.c`'s `Etx` sub-block (`ProbeHistory` pruned to a
//! rolling `LossInterval`, loss probability smoothed with the same
//! alpha/MAXALPHA EWMA the RTT engine uses). Simplified relative to the
//! original multi-neighbor broadcast: probes here are modeled per adjacent
//! link, so `receive_counts` carries exactly the one forward count relevant
//! to that link rather than one entry per neighbor in range.

use super::{LinkMetricState, MetricEngine, ProbeToSend, MAXALPHA};
use crate::codec::ProbePayload;
use crate::config::EtxParams;
use crate::types::{ms, LinkMetric, MetricType, Ticks, VirtualAddress};
use std::collections::VecDeque;

const ETX_ALPHA: u32 = 1;
/// ~99% loss probability out of 4096, matching `DEFAULT_WCETT_BROKEN`.
pub(super) const BROKEN_THRESHOLD_Q12: u16 = 4055;
const Q12: u32 = 4096;

#[derive(Debug, Clone, Copy)]
pub struct EtxMetric {
    loss_interval_ticks: Ticks,
    probe_period_ticks: Ticks,
    expected_probes_per_interval: u32,
}

impl EtxMetric {
    pub fn new(params: &EtxParams) -> Self {
        Self {
            loss_interval_ticks: crate::types::secs(params.loss_interval_secs as u64),
            probe_period_ticks: ms(params.probe_period_ms as u64),
            expected_probes_per_interval: params.expected_probes_per_interval,
        }
    }

    fn prune(&self, history: &mut VecDeque<Ticks>, now: Ticks) {
        while let Some(&oldest) = history.front() {
            if now.saturating_sub(oldest) >= self.loss_interval_ticks {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    fn loss_prob(&self, state: &LinkMetricState) -> u16 {
        match state {
            LinkMetricState::Etx { loss_prob_q12, .. } => *loss_prob_q12,
            _ => BROKEN_THRESHOLD_Q12.saturating_add(1).min(Q12 as u16 - 1),
        }
    }
}

impl MetricEngine for EtxMetric {
    fn metric_type(&self) -> MetricType {
        MetricType::Etx
    }

    fn init_link(&self) -> LinkMetricState {
        LinkMetricState::Etx {
            // Start at 50% until a real sample arrives, matching
            // `DEFAULT_WCETT_INITIAL`.
            loss_prob_q12: 2048,
            recv_history: VecDeque::new(),
            last_broadcast: 0,
        }
    }

    fn is_infinite(&self, state: &LinkMetricState) -> bool {
        self.loss_prob(state) > BROKEN_THRESHOLD_Q12
    }

    fn link_metric(&self, state: &LinkMetricState) -> LinkMetric {
        LinkMetric(self.loss_prob(state) as u32)
    }

    fn conv_link_metric(&self, state: &LinkMetricState) -> u32 {
        if self.is_infinite(state) {
            return u32::MAX;
        }
        let p = self.loss_prob(state) as u32;
        // Expected transmission count with bandwidth treated as infinite:
        // ETX = 1 / (1 - p). Fixed-point in Q12.
        if p >= Q12 {
            return u32::MAX;
        }
        (Q12 * 1000) / (Q12 - p)
    }

    fn send_probes(&self, state: &mut LinkMetricState, now: Ticks) -> Option<ProbeToSend> {
        let LinkMetricState::Etx {
            last_broadcast,
            recv_history,
            ..
        } = state
        else {
            return None;
        };
        if now.saturating_sub(*last_broadcast) < self.probe_period_ticks {
            return None;
        }
        *last_broadcast = now;
        self.prune(recv_history, now);
        let count = recv_history.len() as u32;
        Some(ProbeToSend {
            seq: 0,
            payload: ProbePayload::Etx {
                receive_counts: vec![(VirtualAddress::ZERO, count)],
            },
        })
    }

    fn receive_probe(
        &self,
        state: &mut LinkMetricState,
        _seq: u32,
        payload: &ProbePayload,
        now: Ticks,
    ) -> Option<ProbePayload> {
        let ProbePayload::Etx { receive_counts } = payload else {
            return None;
        };
        let LinkMetricState::Etx {
            loss_prob_q12,
            recv_history,
            ..
        } = state
        else {
            return None;
        };

        // Record this arrival for our own reverse delivery ratio.
        self.prune(recv_history, now);
        recv_history.push_back(now);
        let rev = recv_history.len() as u32;
        let fwd = receive_counts.first().map(|(_, c)| *c).unwrap_or(0);

        let n = self.expected_probes_per_interval.max(1);
        let success_q12 = ((fwd as u64 * rev as u64 * Q12 as u64) / (n as u64 * n as u64))
            .min(Q12 as u64 - 1) as u32;
        let new_prob = (Q12 - success_q12).min(Q12 - 1);

        let smoothed = ((new_prob as u64 * ETX_ALPHA as u64
            + *loss_prob_q12 as u64 * (MAXALPHA - ETX_ALPHA) as u64)
            / MAXALPHA as u64) as u16;
        *loss_prob_q12 = smoothed.min(Q12 as u16 - 1);
        None
    }

    fn receive_probe_reply(&self, _state: &mut LinkMetricState, _payload: &ProbePayload, _now: Ticks) {}

    fn penalize(&self, state: &mut LinkMetricState) {
        if let LinkMetricState::Etx { loss_prob_q12, .. } = state {
            *loss_prob_q12 = (*loss_prob_q12).saturating_add(BROKEN_THRESHOLD_Q12 / 4).min(4095);
        }
    }

    fn install_reported(&self, state: &mut LinkMetricState, reported: u32) {
        if let LinkMetricState::Etx { loss_prob_q12, .. } = state {
            *loss_prob_q12 = reported as u16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EtxMetric {
        EtxMetric::new(&EtxParams::default())
    }

    #[test]
    fn perfect_delivery_yields_low_loss_prob() {
        let m = engine();
        let mut s = m.init_link();
        let n = EtxParams::default().expected_probes_per_interval;
        m.receive_probe(
            &mut s,
            0,
            &ProbePayload::Etx {
                receive_counts: vec![(VirtualAddress::ZERO, n)],
            },
            0,
        );
        // single sample smoothed with 9/10 of the 50% prior still leaves
        // loss_prob well under the broken threshold after a few more samples.
        for i in 1..20 {
            m.receive_probe(
                &mut s,
                0,
                &ProbePayload::Etx {
                    receive_counts: vec![(VirtualAddress::ZERO, n)],
                },
                i * 1000,
            );
        }
        assert!(!m.is_infinite(&s));
    }

    #[test]
    fn no_delivery_marks_link_infinite_eventually() {
        let m = engine();
        let mut s = m.init_link();
        for i in 0..20 {
            m.receive_probe(
                &mut s,
                0,
                &ProbePayload::Etx {
                    receive_counts: vec![(VirtualAddress::ZERO, 0)],
                },
                i * 1000,
            );
        }
        assert!(m.is_infinite(&s));
    }

    #[test]
    fn penalize_pushes_toward_broken() {
        let m = engine();
        let mut s = m.init_link();
        for _ in 0..5 {
            m.penalize(&mut s);
        }
        assert!(m.is_infinite(&s));
    }
}
