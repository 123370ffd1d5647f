//! Route-flap damping (spec §4.2, "Route-flap damping").
//!
//! Direct port of the original `LinkCacheFlapDamp` fudge-factor formula
//! (`linkcache.c`), re-expressed against this crate's [`Ticks`] unit instead
//! of the original's raw `100 * MILLISECOND` literals.

use crate::types::{ms, secs, Ticks};

/// Returns `true` if the existing route (`old_metric`, aged `age`) is good
/// enough to keep over `new_metric`, the metric of the freshest Dijkstra
/// result, given `damping_factor` (0 disables damping entirely).
///
/// `old_metric == u32::MAX` is treated as "broken" and never kept.
pub fn flap_damp(old_metric: u32, new_metric: u32, age: Ticks, damping_factor: u32) -> bool {
    if old_metric == u32::MAX {
        return false;
    }

    // The old route can look better than the fresh computation if its link
    // metrics improved since Dijkstra last ran; no damping needed then.
    if old_metric <= new_metric {
        return true;
    }

    let fudge_factor: u32 = if age < ms(100) {
        (damping_factor * new_metric) / 8
    } else if age < secs(1) {
        (damping_factor * new_metric) / 16
    } else if age < secs(10) {
        (damping_factor * new_metric) / 32
    } else if age < secs(100) {
        (damping_factor * new_metric) / 64
    } else {
        0
    };

    let fudged_metric = new_metric.saturating_add(fudge_factor);

    // Keep the old route iff old_metric <= new_metric + fudge (inclusive,
    // per the damping rule) — the new route has to beat the fudged metric
    // strictly before it's worth switching to.
    old_metric <= fudged_metric
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_old_route_is_never_kept() {
        assert!(!flap_damp(u32::MAX, 10, 0, 32));
    }

    #[test]
    fn old_route_improved_is_kept_without_damping() {
        assert!(flap_damp(5, 10, secs(1), 32));
    }

    #[test]
    fn fresh_small_improvement_damped_away() {
        // new=100, damping=32, age<100ms -> fudge = 32*100/8 = 400
        // fudged = 500, old(110) <= 500 -> keep old
        assert!(flap_damp(110, 100, ms(10), 32));
    }

    #[test]
    fn large_improvement_switches_even_when_young() {
        // new=10, damping=32, age<100ms -> fudge = 32*10/8 = 40, fudged=50
        // old=1000 > fudged(50) -> switch
        assert!(!flap_damp(1000, 10, ms(10), 32));
    }

    #[test]
    fn damping_factor_zero_disables_damping() {
        assert!(!flap_damp(110, 100, ms(10), 0));
    }

    #[test]
    fn old_route_stale_beyond_100s_gets_no_fudge() {
        assert!(!flap_damp(101, 100, secs(200), 32));
        assert!(flap_damp(100, 100, secs(200), 32));
    }

    #[test]
    fn exact_fudge_boundary_keeps_old_route() {
        // new=100, damping=32, age<100ms -> fudge = 32*100/8 = 400, fudged=500.
        // old sits exactly on the boundary (old == fudged): inclusive rule
        // says keep, not switch.
        assert!(flap_damp(500, 100, ms(10), 32));
    }
}
