//! Request table (spec §4.3): duplicate-forward suppression for Route
//! Requests, plus exponential backoff for locally originated ones.

use crate::types::{ms, Ticks, VirtualAddress};
use std::collections::HashMap;

pub const FIRST_BACKOFF_MS: u64 = 100;
pub const MAX_BACKOFF_MS: u64 = 2000;

#[derive(Debug, Clone, Copy)]
struct SeenRequest {
    identifier: u32,
    best_metric: u32,
}

#[derive(Debug, Clone)]
struct BackoffState {
    last_attempt: Ticks,
    current_backoff: Ticks,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            last_attempt: 0,
            current_backoff: ms(FIRST_BACKOFF_MS),
        }
    }
}

/// Per-originator entry: recently-seen request identifiers (bounded small
/// set) plus the local-origination backoff state.
#[derive(Debug, Default)]
struct Entry {
    seen: Vec<SeenRequest>,
    backoff: BackoffState,
}

const MAX_SEEN_PER_ORIGINATOR: usize = 8;

#[derive(Debug, Default)]
pub struct RequestTable {
    entries: HashMap<VirtualAddress, Entry>,
}

/// Outcome of [`RequestTable::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// First time we've seen this `(originator, identifier)` — forward it.
    Accept,
    /// We've seen it and the new arrival's route isn't strictly better —
    /// suppress.
    Suppress,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts or suppresses a Route Request arrival. `path_metric` is the
    /// comparator value from the metric engine for the route this copy of
    /// the request traveled (lower is better, spec §4.3).
    pub fn accept(&mut self, originator: VirtualAddress, identifier: u32, path_metric: u32) -> AcceptOutcome {
        let entry = self.entries.entry(originator).or_default();
        if let Some(seen) = entry
            .seen
            .iter_mut()
            .find(|s| s.identifier == identifier)
        {
            if path_metric < seen.best_metric {
                seen.best_metric = path_metric;
                return AcceptOutcome::Accept;
            }
            return AcceptOutcome::Suppress;
        }

        if entry.seen.len() >= MAX_SEEN_PER_ORIGINATOR {
            entry.seen.remove(0);
        }
        entry.seen.push(SeenRequest {
            identifier,
            best_metric: path_metric,
        });
        AcceptOutcome::Accept
    }

    /// Whether a fresh locally-originated Route Request should be sent now,
    /// given the Send Buffer still holds payloads for `destination`. Always
    /// advances the backoff on a `true` return (spec §4.3).
    pub fn should_originate(&mut self, destination: VirtualAddress, now: Ticks) -> bool {
        let entry = self.entries.entry(destination).or_default();
        if now.saturating_sub(entry.backoff.last_attempt) < entry.backoff.current_backoff {
            return false;
        }
        entry.backoff.last_attempt = now;
        entry.backoff.current_backoff = (entry.backoff.current_backoff * 2).min(ms(MAX_BACKOFF_MS));
        true
    }

    /// Resets backoff to `FIRST_BACKOFF` once a route to `destination` has
    /// been acquired, so the next loss starts the ramp over.
    pub fn reset_backoff(&mut self, destination: VirtualAddress) {
        if let Some(entry) = self.entries.get_mut(&destination) {
            entry.backoff = BackoffState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> VirtualAddress {
        VirtualAddress::new([n; 6])
    }

    #[test]
    fn first_arrival_is_accepted() {
        let mut rt = RequestTable::new();
        assert_eq!(rt.accept(addr(1), 7, 10), AcceptOutcome::Accept);
    }

    #[test]
    fn duplicate_with_worse_metric_is_suppressed() {
        let mut rt = RequestTable::new();
        rt.accept(addr(1), 7, 10);
        assert_eq!(rt.accept(addr(1), 7, 20), AcceptOutcome::Suppress);
    }

    #[test]
    fn duplicate_with_better_metric_is_accepted() {
        let mut rt = RequestTable::new();
        rt.accept(addr(1), 7, 10);
        assert_eq!(rt.accept(addr(1), 7, 5), AcceptOutcome::Accept);
    }

    #[test]
    fn distinct_identifiers_do_not_suppress_each_other() {
        let mut rt = RequestTable::new();
        rt.accept(addr(1), 7, 10);
        assert_eq!(rt.accept(addr(1), 8, 999), AcceptOutcome::Accept);
    }

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let mut rt = RequestTable::new();
        let d = addr(2);
        assert!(rt.should_originate(d, 0));
        assert!(!rt.should_originate(d, ms(50)));
        assert!(rt.should_originate(d, ms(150)));
        let entry = rt.entries.get(&d).unwrap();
        assert_eq!(entry.backoff.current_backoff, ms(200));
    }

    #[test]
    fn reset_backoff_returns_to_first_backoff() {
        let mut rt = RequestTable::new();
        let d = addr(3);
        rt.should_originate(d, 0);
        rt.should_originate(d, ms(200));
        rt.reset_backoff(d);
        let entry = rt.entries.get(&d).unwrap();
        assert_eq!(entry.backoff.current_backoff, ms(FIRST_BACKOFF_MS));
    }
}
