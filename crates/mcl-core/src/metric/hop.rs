//! HOP metric: every working link costs exactly 1 (spec §4.7, "HOP").

use super::{LinkMetricState, MetricEngine, ProbeToSend};
use crate::codec::ProbePayload;
use crate::types::{LinkMetric, MetricType, Ticks};

#[derive(Debug, Default)]
pub struct HopMetric;

impl MetricEngine for HopMetric {
    fn metric_type(&self) -> MetricType {
        MetricType::Hop
    }

    fn init_link(&self) -> LinkMetricState {
        LinkMetricState::Hop
    }

    fn is_infinite(&self, _state: &LinkMetricState) -> bool {
        false
    }

    fn link_metric(&self, _state: &LinkMetricState) -> LinkMetric {
        LinkMetric(1)
    }

    fn conv_link_metric(&self, _state: &LinkMetricState) -> u32 {
        1
    }

    fn send_probes(&self, _state: &mut LinkMetricState, _now: Ticks) -> Option<ProbeToSend> {
        None
    }

    fn receive_probe(
        &self,
        _state: &mut LinkMetricState,
        _seq: u32,
        _payload: &ProbePayload,
        _now: Ticks,
    ) -> Option<ProbePayload> {
        None
    }

    fn receive_probe_reply(&self, _state: &mut LinkMetricState, _payload: &ProbePayload, _now: Ticks) {}

    fn penalize(&self, _state: &mut LinkMetricState) {}

    fn install_reported(&self, _state: &mut LinkMetricState, _reported: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_link_costs_one() {
        let m = HopMetric;
        let s = m.init_link();
        assert_eq!(m.conv_link_metric(&s), 1);
        assert!(!m.is_infinite(&s));
    }

    #[test]
    fn path_sums_hop_count() {
        let m = HopMetric;
        let s = m.init_link();
        let refs: Vec<&LinkMetricState> = vec![&s, &s, &s];
        assert_eq!(m.path_metric(&refs), 3);
    }
}
