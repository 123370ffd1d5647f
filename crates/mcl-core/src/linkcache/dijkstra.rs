//! Shortest-path computation (spec §4.2, "Dijkstra details").
//!
//! The original computes over dense arrays indexed `0..nodeCount` with a
//! hand-rolled binary heap. `slab::Slab` keys aren't contiguous once nodes
//! are ever removed, so this uses `std::collections::BinaryHeap` keyed by
//! slab index instead of a hand-rolled one — same algorithm, idiomatic
//! Rust data structures.

use super::{Link, LinkKey, Node, NodeKey};
use crate::codec::MAX_SR_LEN;
use crate::metric::MetricEngine;
use slab::Slab;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    metric: u32,
    node: NodeKey,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest metric sorts first.
        other.metric.cmp(&self.metric)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-node shortest-path results, keyed by slab index.
pub struct DijkstraResult {
    pub metric: HashMap<NodeKey, u32>,
    pub hop_count: HashMap<NodeKey, u32>,
    pub prev: HashMap<NodeKey, NodeKey>,
    pub link_in: HashMap<NodeKey, LinkKey>,
    pub smallest_metric: u32,
    pub largest_metric: u32,
}

/// Runs Dijkstra rooted at `self_key`. Expired-link removal and the
/// `CACHE_TIMEOUT` rescheduling are the caller's (`linkcache::mod`)
/// responsibility; this function only computes the tree over whatever
/// links currently exist.
pub fn run(
    nodes: &Slab<Node>,
    links: &Slab<Link>,
    self_key: NodeKey,
    engine: &dyn MetricEngine,
) -> DijkstraResult {
    let mut smallest_metric = u32::MAX;
    for (_, link) in links.iter() {
        let c = engine.conv_link_metric(&link.metric_state);
        if c < smallest_metric {
            smallest_metric = c;
        }
    }
    if smallest_metric == u32::MAX {
        smallest_metric = 0;
    }

    let mut metric: HashMap<NodeKey, u32> = HashMap::with_capacity(nodes.len());
    let mut hop_count: HashMap<NodeKey, u32> = HashMap::with_capacity(nodes.len());
    let mut prev: HashMap<NodeKey, NodeKey> = HashMap::new();
    let mut link_in: HashMap<NodeKey, LinkKey> = HashMap::new();
    let mut visited: HashMap<NodeKey, bool> = HashMap::with_capacity(nodes.len());

    for (key, _) in nodes.iter() {
        metric.insert(key, u32::MAX);
        hop_count.insert(key, u32::MAX);
        visited.insert(key, false);
    }
    metric.insert(self_key, 0);
    hop_count.insert(self_key, 0);

    let mut heap = BinaryHeap::new();
    heap.push(HeapEntry {
        metric: 0,
        node: self_key,
    });

    while let Some(HeapEntry { metric: d, node: u }) = heap.pop() {
        if visited.get(&u).copied().unwrap_or(true) {
            continue;
        }
        if hop_count[&u] >= MAX_SR_LEN as u32 {
            continue;
        }
        visited.insert(u, true);
        if d > metric[&u] {
            continue;
        }

        let Some(node) = nodes.get(u) else { continue };
        for &lk in &node.adj_out {
            let Some(link) = links.get(lk) else { continue };
            if engine.is_infinite(&link.metric_state) {
                continue;
            }
            if hop_count[&u] + 1 >= MAX_SR_LEN as u32 {
                continue;
            }
            let v = link.target;
            // Recompute the path metric along prev[]+this link using the
            // engine's path_metric, so WCETT's channel-aware blend is
            // respected rather than plain scalar addition.
            let mut chain: Vec<&crate::metric::LinkMetricState> = Vec::new();
            chain.push(&link.metric_state);
            let mut walk = u;
            while walk != self_key {
                let Some(&lw) = link_in.get(&walk) else { break };
                let Some(l) = links.get(lw) else { break };
                chain.push(&l.metric_state);
                let Some(&p) = prev.get(&walk) else { break };
                walk = p;
            }
            chain.reverse();
            let new_metric = engine.path_metric(&chain);

            if new_metric < *metric.get(&v).unwrap_or(&u32::MAX) {
                metric.insert(v, new_metric);
                hop_count.insert(v, hop_count[&u] + 1);
                prev.insert(v, u);
                link_in.insert(v, lk);
                heap.push(HeapEntry {
                    metric: new_metric,
                    node: v,
                });
            }
        }
    }

    let mut largest_metric = 0u32;
    for (_, &lk) in link_in.iter() {
        if let Some(link) = links.get(lk) {
            let c = engine.conv_link_metric(&link.metric_state);
            if c > largest_metric {
                largest_metric = c;
            }
        }
    }
    if largest_metric == 0 {
        largest_metric = u32::MAX;
    }

    DijkstraResult {
        metric,
        hop_count,
        prev,
        link_in,
        smallest_metric,
        largest_metric,
    }
}
