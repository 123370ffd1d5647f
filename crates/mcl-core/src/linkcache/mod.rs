//! Link cache (spec §4.2): the authoritative database of nodes and directed
//! links, Dijkstra-derived route caching with flap damping, and optional
//! change logs.
//!
//! Grounded in `rist_bonding_core::net::state`'s link registry for the
//! shape (one struct owning a handle-indexed arena plus an index from a
//! stable external key back to the handle) and in
//! `strata_transport::pool::PacketPool` for the `slab::Slab` arena pattern
//! itself.

pub mod changelog;
pub mod dijkstra;
pub mod flap;

use crate::codec::{Hop, SourceRoute, MAX_SR_LEN};
use crate::error::{MclError, Result};
use crate::metric::{LinkMetricState, MetricEngine};
use crate::types::{LQSRIf, LinkMetric, Ticks, TICKS_PER_SECOND, VirtualAddress};
use changelog::{LinkChangeLog, LinkChangeReason, RouteChangeLog, RouteChangeRecord, RouteUsage};
use dijkstra::DijkstraResult;
use slab::Slab;
use std::collections::HashMap;
use std::sync::Arc;

pub type NodeKey = usize;
pub type LinkKey = usize;

/// `CACHE_TIMEOUT`: Dijkstra never re-runs more often than this (spec §4.2).
pub const CACHE_TIMEOUT: Ticks = TICKS_PER_SECOND;

#[derive(Debug, Clone)]
pub struct CachedRoute {
    pub hops: Vec<Hop>,
    pub link_chain: Vec<LinkKey>,
    pub is_static: bool,
}

#[derive(Debug)]
pub struct Node {
    pub address: VirtualAddress,
    pub adj_out: Vec<LinkKey>,
    pub adj_in: Vec<LinkKey>,
    pub cached_route: Option<CachedRoute>,
    pub path_metric: u32,
    pub first_usage: Ticks,
    pub route_change_counter: u32,
    pub route_usage: RouteUsage,
}

impl Node {
    fn new(address: VirtualAddress) -> Self {
        Self {
            address,
            adj_out: Vec::new(),
            adj_in: Vec::new(),
            cached_route: None,
            path_metric: u32::MAX,
            first_usage: 0,
            route_change_counter: 0,
            route_usage: RouteUsage::default(),
        }
    }
}

#[derive(Debug)]
pub struct Link {
    pub source: NodeKey,
    pub target: NodeKey,
    pub out_if: LQSRIf,
    pub in_if: LQSRIf,
    pub metric_state: LinkMetricState,
    pub time_stamp: Ticks,
    pub ref_count: u32,
    pub usage: u64,
    pub failures: u32,
    pub drop_ratio: u8,
    pub artificial_drops: u64,
    pub queue_drops: u64,
}

/// Authoritative node/link database for one virtual adapter.
pub struct LinkCache {
    nodes: Slab<Node>,
    links: Slab<Link>,
    address_index: HashMap<VirtualAddress, NodeKey>,
    self_key: NodeKey,
    self_address: VirtualAddress,
    engine: Arc<dyn MetricEngine>,
    link_timeout: Ticks,
    route_flap_damping_factor: u32,
    dijkstra_deadline: Ticks,
    last_dijkstra: DijkstraResult,
    pub link_change_log: LinkChangeLog,
    pub route_change_log: RouteChangeLog,
    pub truncated_link_info_events: u64,
}

impl LinkCache {
    pub fn new(
        self_address: VirtualAddress,
        engine: Arc<dyn MetricEngine>,
        link_timeout: Ticks,
        route_flap_damping_factor: u32,
    ) -> Self {
        let mut nodes = Slab::new();
        let self_key = nodes.insert(Node::new(self_address));
        let mut address_index = HashMap::new();
        address_index.insert(self_address, self_key);

        let last_dijkstra = DijkstraResult {
            metric: HashMap::from([(self_key, 0)]),
            hop_count: HashMap::from([(self_key, 0)]),
            prev: HashMap::new(),
            link_in: HashMap::new(),
            smallest_metric: 0,
            largest_metric: u32::MAX,
        };

        Self {
            nodes,
            links: Slab::new(),
            address_index,
            self_key,
            self_address,
            engine,
            link_timeout,
            route_flap_damping_factor,
            dijkstra_deadline: 0,
            last_dijkstra,
            link_change_log: LinkChangeLog::new(),
            route_change_log: RouteChangeLog::new(),
            truncated_link_info_events: 0,
        }
    }

    /// Returns the node key for `address`, creating a fresh unconnected node
    /// if this is the first time it's been seen (e.g. as the reporter of a
    /// Link Info option).
    pub fn node_key_for(&mut self, address: VirtualAddress) -> NodeKey {
        self.get_or_create_node(address)
    }

    fn get_or_create_node(&mut self, address: VirtualAddress) -> NodeKey {
        if let Some(&key) = self.address_index.get(&address) {
            return key;
        }
        let key = self.nodes.insert(Node::new(address));
        self.address_index.insert(address, key);
        key
    }

    fn find_link(&self, source: NodeKey, target: NodeKey, out_if: LQSRIf, in_if: LQSRIf) -> Option<LinkKey> {
        self.nodes.get(source)?.adj_out.iter().copied().find(|&lk| {
            self.links
                .get(lk)
                .map(|l| l.target == target && l.out_if == out_if && l.in_if == in_if)
                .unwrap_or(false)
        })
    }

    fn invalidate_dijkstra(&mut self, now: Ticks) {
        self.dijkstra_deadline = now;
    }

    /// Adds or refreshes a directed link (spec §4.2, "Add link").
    ///
    /// `self_measured` distinguishes our own probe-derived update (always
    /// authoritative) from a third-party report (e.g. a neighbor's Link
    /// Info) about a link that originates at us — under a non-HOP metric
    /// those third-party reports about our own outgoing links are ignored.
    pub fn add_link(
        &mut self,
        target: VirtualAddress,
        out_if: LQSRIf,
        in_if: LQSRIf,
        reported_metric: Option<LinkMetric>,
        self_measured: bool,
        now: Ticks,
        reason: LinkChangeReason,
    ) -> LinkKey {
        let target_key = self.get_or_create_node(target);
        self.add_link_between(
            self.self_key,
            target_key,
            out_if,
            in_if,
            reported_metric,
            self_measured,
            now,
            reason,
        )
    }

    /// General form of [`Self::add_link`] allowing a non-self source, used
    /// when installing links reported third-hand via Link Info options.
    pub fn add_link_from(
        &mut self,
        source: NodeKey,
        target: VirtualAddress,
        out_if: LQSRIf,
        in_if: LQSRIf,
        reported_metric: Option<LinkMetric>,
        self_measured: bool,
        now: Ticks,
        reason: LinkChangeReason,
    ) -> LinkKey {
        let target_key = self.get_or_create_node(target);
        self.add_link_between(source, target_key, out_if, in_if, reported_metric, self_measured, now, reason)
    }

    fn add_link_between(
        &mut self,
        source: NodeKey,
        target: NodeKey,
        out_if: LQSRIf,
        in_if: LQSRIf,
        reported_metric: Option<LinkMetric>,
        self_measured: bool,
        now: Ticks,
        reason: LinkChangeReason,
    ) -> LinkKey {
        let source_is_self = source == self.self_key;
        let non_hop = !matches!(self.engine.metric_type(), crate::types::MetricType::Hop);

        if let Some(lk) = self.find_link(source, target, out_if, in_if) {
            let link = self.links.get_mut(lk).unwrap();
            link.time_stamp = now;

            if source_is_self && non_hop && !self_measured {
                // Our own probes are authoritative for our own outgoing
                // links; ignore third-party metric reports about them.
                return lk;
            }

            // A raw reported metric (e.g. from a Link Info option or a Route
            // Request/Reply hop) is reinterpreted into the engine's own
            // state representation directly, the same encoding
            // `link_metric` produces — otherwise every link this node
            // hasn't personally probed would sit at whatever `init_link`
            // defaults to forever.
            let old_conv = self.engine.conv_link_metric(&link.metric_state);
            if let Some(m) = reported_metric {
                self.engine.install_reported(&mut link.metric_state, m.0);
            }
            let new_conv = self.engine.conv_link_metric(&link.metric_state);
            self.maybe_invalidate(old_conv, new_conv, now);
            return lk;
        }

        let source_addr = self.nodes[source].address;
        let target_addr = self.nodes[target].address;
        let mut metric_state = self.engine.init_link();
        if let Some(m) = reported_metric {
            self.engine.install_reported(&mut metric_state, m.0);
        }
        let link = Link {
            source,
            target,
            out_if,
            in_if,
            metric_state,
            time_stamp: now,
            ref_count: 0,
            usage: 0,
            failures: 0,
            drop_ratio: 0,
            artificial_drops: 0,
            queue_drops: 0,
        };
        let lk = self.links.insert(link);
        self.nodes[source].adj_out.push(lk);
        self.nodes[target].adj_in.push(lk);
        self.invalidate_dijkstra(now);
        self.link_change_log.push(changelog::LinkChangeRecord {
            timestamp: now,
            source: source_addr,
            target: target_addr,
            out_if,
            in_if,
            reason,
        });
        lk
    }

    fn maybe_invalidate(&mut self, old_conv: u32, new_conv: u32, now: Ticks) {
        let delta = old_conv.abs_diff(new_conv);
        let exceeds_largest = old_conv > self.last_dijkstra.largest_metric
            || new_conv > self.last_dijkstra.largest_metric;
        if delta > self.last_dijkstra.smallest_metric || !exceeds_largest {
            self.invalidate_dijkstra(now);
        }
    }

    /// Applies an engine operation to a link's metric state, then decides
    /// whether the change warrants an early Dijkstra rerun. Returns
    /// whatever `apply` returns (e.g. a probe reply payload), or `None` if
    /// the link no longer exists.
    pub fn update_link_metric<R>(
        &mut self,
        link: LinkKey,
        now: Ticks,
        apply: impl FnOnce(&dyn MetricEngine, &mut LinkMetricState) -> R,
    ) -> Option<R> {
        let l = self.links.get_mut(link)?;
        let old_conv = self.engine.conv_link_metric(&l.metric_state);
        let result = apply(self.engine.as_ref(), &mut l.metric_state);
        let new_conv = self.engine.conv_link_metric(&l.metric_state);
        l.time_stamp = now;
        self.maybe_invalidate(old_conv, new_conv, now);
        Some(result)
    }

    pub fn penalize_link(&mut self, link: LinkKey, now: Ticks) {
        if let Some(l) = self.links.get_mut(link) {
            self.engine.penalize(&mut l.metric_state);
            let source = self.nodes[l.source].address;
            let target = self.nodes[l.target].address;
            self.link_change_log.push(changelog::LinkChangeRecord {
                timestamp: now,
                source,
                target,
                out_if: l.out_if,
                in_if: l.in_if,
                reason: LinkChangeReason::Penalized,
            });
        }
        self.invalidate_dijkstra(now);
    }

    fn check_for_drop(&self, link: &Link, now: Ticks) -> bool {
        link.time_stamp + self.link_timeout < now && link.ref_count == 0 && link.drop_ratio == 0
    }

    fn clean_expired(&mut self, now: Ticks) {
        let expired: Vec<LinkKey> = self
            .links
            .iter()
            .filter(|(_, l)| self.check_for_drop(l, now))
            .map(|(k, _)| k)
            .collect();
        for lk in expired {
            self.remove_link(lk, now, LinkChangeReason::DeleteTimeout);
        }
    }

    fn remove_link(&mut self, lk: LinkKey, now: Ticks, reason: LinkChangeReason) {
        let Some(link) = self.links.try_remove(lk) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(link.source) {
            node.adj_out.retain(|&k| k != lk);
        }
        if let Some(node) = self.nodes.get_mut(link.target) {
            node.adj_in.retain(|&k| k != lk);
        }
        let source = self.nodes.get(link.source).map(|n| n.address).unwrap_or(VirtualAddress::ZERO);
        let target = self.nodes.get(link.target).map(|n| n.address).unwrap_or(VirtualAddress::ZERO);
        self.link_change_log.push(changelog::LinkChangeRecord {
            timestamp: now,
            source,
            target,
            out_if: link.out_if,
            in_if: link.in_if,
            reason,
        });
    }

    /// Removes every link whose `in_if` or `out_if` is `if_index`,
    /// regardless of `ref_count` (spec §3, Link lifecycle (a)).
    pub fn delete_interface(&mut self, if_index: LQSRIf, now: Ticks) {
        let doomed: Vec<LinkKey> = self
            .links
            .iter()
            .filter(|(_, l)| l.in_if == if_index || l.out_if == if_index)
            .map(|(k, _)| k)
            .collect();
        for lk in doomed {
            self.remove_link(lk, now, LinkChangeReason::DeleteInterface);
        }
        self.invalidate_dijkstra(now);
    }

    /// Removes every link unconditionally (spec §3, Link lifecycle (c)).
    pub fn flush(&mut self, now: Ticks) {
        let all: Vec<LinkKey> = self.links.iter().map(|(k, _)| k).collect();
        for lk in all {
            self.remove_link(lk, now, LinkChangeReason::DeleteManual);
        }
        for (_, node) in self.nodes.iter_mut() {
            node.cached_route = None;
        }
        self.invalidate_dijkstra(now);
    }

    pub fn control_link(&mut self, link: LinkKey, drop_ratio: u8) {
        if let Some(l) = self.links.get_mut(link) {
            l.drop_ratio = drop_ratio;
        }
    }

    pub fn count_link_use(&mut self, link: LinkKey) {
        if let Some(l) = self.links.get_mut(link) {
            l.usage += 1;
        }
    }

    pub fn my_degree(&self) -> usize {
        self.nodes[self.self_key].adj_out.len()
    }

    /// Looks up an existing link from self by endpoint/interface pair, for
    /// `IOCTL_MCL_CONTROL_LINK` — unlike [`Self::add_link`] this never
    /// creates one.
    pub fn find_link_key(&self, target: VirtualAddress, out_if: LQSRIf, in_if: LQSRIf) -> Option<LinkKey> {
        let target_key = *self.address_index.get(&target)?;
        self.find_link(self.self_key, target_key, out_if, in_if)
    }

    /// Snapshot of every link for `IOCTL_MCL_QUERY_LINK_CACHE`: (source,
    /// target, out_if, in_if, wire metric, ref_count).
    pub fn all_links_summary(&self) -> Vec<(VirtualAddress, VirtualAddress, LQSRIf, LQSRIf, u32, u32)> {
        self.links
            .iter()
            .map(|(_, l)| {
                (
                    self.nodes[l.source].address,
                    self.nodes[l.target].address,
                    l.out_if,
                    l.in_if,
                    self.engine.link_metric(&l.metric_state).0,
                    l.ref_count,
                )
            })
            .collect()
    }

    /// `IOCTL_MCL_QUERY_ROUTE_USAGE`: distinct routes this node has actually
    /// used to reach `dest`, and how often.
    pub fn route_usage(&self, dest: VirtualAddress) -> Option<&RouteUsage> {
        let key = *self.address_index.get(&dest)?;
        Some(&self.nodes.get(key)?.route_usage)
    }

    /// Builds a single Link Info option listing as many of self's outgoing
    /// links as fit in `max_entries` (spec §4.2, "Link info broadcast").
    pub fn create_link_info(&mut self, max_entries: usize) -> crate::codec::LinkInfo {
        let mut entries = Vec::new();
        let out = &self.nodes[self.self_key].adj_out;
        for (i, &lk) in out.iter().enumerate() {
            if i >= max_entries {
                self.truncated_link_info_events += 1;
                break;
            }
            let link = &self.links[lk];
            entries.push(crate::codec::LinkInfoEntry {
                peer: self.nodes[link.target].address,
                in_if: link.in_if,
                out_if: link.out_if,
                metric: self.engine.link_metric(&link.metric_state),
            });
        }
        crate::codec::LinkInfo { entries }
    }

    fn run_dijkstra(&mut self, now: Ticks) {
        self.clean_expired(now);
        let result = dijkstra::run(&self.nodes, &self.links, self.self_key, self.engine.as_ref());
        self.last_dijkstra = result;
        self.dijkstra_deadline = now + CACHE_TIMEOUT;
    }

    fn reconstruct_hops(&self, dest: NodeKey) -> Option<(Vec<Hop>, Vec<LinkKey>)> {
        let mut chain_nodes = vec![dest];
        let mut chain_links = Vec::new();
        let mut walk = dest;
        while walk != self.self_key {
            let &lk = self.last_dijkstra.link_in.get(&walk)?;
            chain_links.push(lk);
            let &p = self.last_dijkstra.prev.get(&walk)?;
            chain_nodes.push(p);
            walk = p;
        }
        chain_nodes.reverse();
        chain_links.reverse();

        let mut hops = Vec::with_capacity(chain_nodes.len());
        for (i, &nk) in chain_nodes.iter().enumerate() {
            let addr = self.nodes[nk].address;
            let out_if = chain_links.get(i).map(|&lk| self.links[lk].out_if).unwrap_or(0);
            let in_if = if i == 0 {
                0
            } else {
                self.links[chain_links[i - 1]].in_if
            };
            let metric = chain_links
                .get(i)
                .map(|&lk| self.engine.link_metric(&self.links[lk].metric_state))
                .unwrap_or(LinkMetric::ZERO);
            hops.push(Hop {
                addr,
                in_if,
                out_if,
                metric,
            });
        }
        Some((hops, chain_links))
    }

    /// Returns the currently cached route for `dest` without forcing a
    /// recompute (spec §4.2, "get_source_route (read-only)").
    pub fn get_source_route(&self, dest: VirtualAddress) -> Option<&CachedRoute> {
        let key = *self.address_index.get(&dest)?;
        self.nodes.get(key)?.cached_route.as_ref()
    }

    /// Installs a manually configured static route that Dijkstra will never
    /// evict or recompute over (spec §4.2 `add_static_route`).
    pub fn add_static_route(&mut self, hops: Vec<Hop>, now: Ticks) -> Result<()> {
        if hops.len() < 2 {
            return Err(MclError::InvalidConfiguration("static route needs >=2 hops"));
        }
        let dest = hops.last().unwrap().addr;
        let dest_key = self.get_or_create_node(dest);
        let mut link_chain = Vec::new();
        let mut prev_key = self.self_key;
        for w in hops.windows(2) {
            let target_key = self.get_or_create_node(w[1].addr);
            let lk = self.add_link_between(
                prev_key,
                target_key,
                w[0].out_if,
                w[1].in_if,
                None,
                false,
                now,
                LinkChangeReason::AddManual,
            );
            link_chain.push(lk);
            prev_key = target_key;
        }
        for &lk in &link_chain {
            self.links[lk].ref_count += 1;
        }
        self.nodes[dest_key].cached_route = Some(CachedRoute {
            hops,
            link_chain,
            is_static: true,
        });
        self.nodes[dest_key].first_usage = now;
        Ok(())
    }

    /// Given a destination, returns a usable source route — cached (static
    /// or flap-damping-retained) or freshly Dijkstra-derived (spec §4.2,
    /// "Fill source route").
    pub fn fill_source_route(&mut self, dest: VirtualAddress, now: Ticks) -> Result<SourceRoute> {
        if dest == self.self_address {
            return Err(MclError::NoRouteToDestination);
        }
        self.clean_expired(now);
        let dest_key = self.get_or_create_node(dest);

        if let Some(route) = &self.nodes[dest_key].cached_route {
            if route.is_static {
                return Self::to_wire(route);
            }
        }

        if now >= self.dijkstra_deadline {
            self.run_dijkstra(now);
        }

        let new_metric = *self.last_dijkstra.metric.get(&dest_key).unwrap_or(&u32::MAX);
        if new_metric == u32::MAX {
            return Err(MclError::NoRouteToDestination);
        }

        // The cached route's metric is not trustworthy leftover state from
        // whenever it was installed: re-derive it from the current metric
        // state of the links it still runs over before comparing against
        // the freshly computed shortest path, the way the original
        // recomputes `Metric` from the cached route's hops right before its
        // own flap-damp check rather than trusting a stored value.
        let old_route_chain = self.nodes[dest_key]
            .cached_route
            .as_ref()
            .map(|old| (old.link_chain.clone(), old.hops.len()));

        let keep_old = match old_route_chain {
            Some((link_chain, hop_count)) => {
                let states: Vec<&LinkMetricState> = link_chain
                    .iter()
                    .filter_map(|&lk| self.links.get(lk).map(|l| &l.metric_state))
                    .collect();
                let current_metric = self.engine.path_metric(&states);
                self.nodes[dest_key].path_metric = current_metric;
                let age = now.saturating_sub(self.nodes[dest_key].first_usage);
                flap::flap_damp(current_metric, new_metric, age, self.route_flap_damping_factor)
                    && hop_count >= 2
            }
            None => false,
        };

        if !keep_old {
            let (hops, link_chain) = self
                .reconstruct_hops(dest_key)
                .ok_or(MclError::NoRouteToDestination)?;
            if hops.len() > MAX_SR_LEN {
                return Err(MclError::NoRouteToDestination);
            }
            // Release refs on the superseded route, acquire on the new one.
            if let Some(old) = self.nodes[dest_key].cached_route.take() {
                for lk in old.link_chain {
                    if let Some(l) = self.links.get_mut(lk) {
                        l.ref_count = l.ref_count.saturating_sub(1);
                    }
                }
            }
            for &lk in &link_chain {
                self.links[lk].ref_count += 1;
            }
            self.nodes[dest_key].path_metric = new_metric;
            self.nodes[dest_key].first_usage = now;
            self.nodes[dest_key].route_change_counter += 1;
            self.route_change_log.push(RouteChangeRecord {
                timestamp: now,
                destination: dest,
                new_metric,
            });
            self.nodes[dest_key].cached_route = Some(CachedRoute {
                hops,
                link_chain,
                is_static: false,
            });
        }

        let route = self.nodes[dest_key].cached_route.as_ref().unwrap();
        let wire = Self::to_wire(route)?;
        let route_addrs: Vec<VirtualAddress> = route.hops.iter().map(|h| h.addr).collect();
        self.nodes[dest_key].route_usage.record_use(&route_addrs);
        Ok(wire)
    }

    fn to_wire(route: &CachedRoute) -> Result<SourceRoute> {
        if route.hops.len() < 2 {
            return Err(MclError::NoRouteToDestination);
        }
        Ok(SourceRoute {
            hops: route.hops.clone(),
            segments_left: (route.hops.len() - 1) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::HopMetric;
    use crate::types::{ms, secs, VirtualAddress};

    fn addr(n: u8) -> VirtualAddress {
        VirtualAddress::new([n; 6])
    }

    fn cache_with_chain() -> LinkCache {
        let mut lc = LinkCache::new(addr(0), Arc::new(HopMetric), TICKS_PER_SECOND * 30, 32);
        lc.add_link(addr(1), 1, 0, None, true, 0, LinkChangeReason::AddManual);
        lc.add_link_from(
            *lc.address_index.get(&addr(1)).unwrap(),
            addr(2),
            1,
            1,
            None,
            true,
            0,
            LinkChangeReason::AddManual,
        );
        lc
    }

    #[test]
    fn fill_source_route_finds_two_hop_chain() {
        let mut lc = cache_with_chain();
        let sr = lc.fill_source_route(addr(2), 10).unwrap();
        assert_eq!(sr.hops.len(), 3);
        assert_eq!(sr.hops[0].addr, addr(0));
        assert_eq!(sr.hops[0].in_if, 0);
        assert_eq!(sr.hops.last().unwrap().addr, addr(2));
        assert_eq!(sr.hops.last().unwrap().out_if, 0);
    }

    #[test]
    fn no_route_to_unknown_destination() {
        let mut lc = cache_with_chain();
        assert!(lc.fill_source_route(addr(99), 10).is_err());
    }

    #[test]
    fn my_degree_counts_self_outgoing_links() {
        let lc = cache_with_chain();
        assert_eq!(lc.my_degree(), 1);
    }

    #[test]
    fn static_route_survives_flush_of_dynamic_state() {
        let mut lc = cache_with_chain();
        lc.add_static_route(
            vec![
                Hop {
                    addr: addr(0),
                    in_if: 0,
                    out_if: 2,
                    metric: LinkMetric(1),
                },
                Hop {
                    addr: addr(5),
                    in_if: 2,
                    out_if: 0,
                    metric: LinkMetric(1),
                },
            ],
            0,
        )
        .unwrap();
        let sr = lc.fill_source_route(addr(5), 0).unwrap();
        assert_eq!(sr.hops.len(), 2);
    }

    #[test]
    fn delete_interface_removes_attached_links() {
        let mut lc = cache_with_chain();
        lc.delete_interface(1, 50);
        assert_eq!(lc.my_degree(), 0);
    }

    #[test]
    fn link_info_lists_self_outgoing_links() {
        let mut lc = cache_with_chain();
        let li = lc.create_link_info(10);
        assert_eq!(li.entries.len(), 1);
        assert_eq!(li.entries[0].peer, addr(1));
    }

    #[test]
    fn flap_damping_keeps_marginally_improved_route_until_it_ages_out() {
        let mut lc = cache_with_chain();
        // addr(2) is reachable via the 2-hop addr(0)->addr(1)->addr(2)
        // chain (HOP metric, cost 2).
        let sr = lc.fill_source_route(addr(2), 0).unwrap();
        assert_eq!(sr.hops.len(), 3);

        // A direct link appears shortly after (cost 1): strictly better,
        // but not by enough to beat the damping fudge factor while the
        // route is young.
        lc.add_link(addr(2), 2, 2, None, true, ms(10), LinkChangeReason::AddManual);
        let sr = lc.fill_source_route(addr(2), ms(10)).unwrap();
        assert_eq!(sr.hops.len(), 3, "young route should be damped, not replaced");

        // Once the cached route is old enough the fudge factor drops to
        // zero and the strictly shorter route takes over.
        lc.add_link(addr(2), 2, 2, None, true, secs(200), LinkChangeReason::AddManual);
        let sr = lc.fill_source_route(addr(2), secs(200)).unwrap();
        assert_eq!(sr.hops.len(), 2, "stale route should switch to the shorter one");
    }

    #[test]
    fn route_longer_than_max_sr_len_has_no_route() {
        let mut lc = LinkCache::new(addr(0), Arc::new(HopMetric), TICKS_PER_SECOND * 30, 32);
        let mut prev = lc.self_key;
        for n in 1..=(MAX_SR_LEN as u8 + 1) {
            let target_key = lc.get_or_create_node(addr(n));
            lc.add_link_between(prev, target_key, 1, 1, None, true, 0, LinkChangeReason::AddManual);
            prev = target_key;
        }
        assert!(lc.fill_source_route(addr(MAX_SR_LEN as u8 + 1), 0).is_err());
    }
}
