//! Control surface (spec §5): the request/response vocabulary a management
//! plane uses to inspect and steer one running [`crate::context::Context`].
//!
//! Grounded in the original driver's IOCTL table (`sys/io.c`:
//! `IOCTL_MCL_QUERY_LINK_CACHE`, `IOCTL_MCL_ADD_SOURCE_ROUTE`,
//! `IOCTL_MCL_CONTROL_LINK`, `IOCTL_MCL_RESET_STATISTICS`, ...) collapsed
//! into a single typed `Request`/`Response` pair instead of numbered ioctl
//! codes, the way `rist_bonding_core::control` exposes its session control
//! surface as an enum rather than a wire opcode table.

use crate::codec::Hop;
use crate::error::MclError;
use crate::linkcache::changelog::{LinkChangeRecord, RouteChangeRecord};
use crate::types::{LQSRIf, VirtualAddress};

/// One control-surface call. `Context::handle_control` matches on this and
/// returns the matching [`Response`] variant.
#[derive(Debug, Clone)]
pub enum Request {
    /// `IOCTL_MCL_QUERY_NEIGHBOR_CACHE`.
    QueryNeighborCache,
    /// `IOCTL_MCL_FLUSH_NEIGHBOR_CACHE`.
    FlushNeighborCache,
    /// `IOCTL_MCL_QUERY_SOURCE_ROUTE`: current cached route to `destination`,
    /// without forcing a recompute.
    QuerySourceRoute { destination: VirtualAddress },
    /// `IOCTL_MCL_QUERY_LINK_CACHE`: a snapshot of every known node/link.
    QueryLinkCache,
    /// `IOCTL_MCL_FLUSH_LINK_CACHE`.
    FlushLinkCache,
    /// `IOCTL_MCL_ADD_SOURCE_ROUTE`: installs a manually configured static
    /// route.
    AddStaticRoute { hops: Vec<Hop> },
    /// `IOCTL_MCL_CONTROL_LINK`: sets an artificial drop ratio on one link,
    /// identified by its endpoints and interfaces.
    ControlLink {
        target: VirtualAddress,
        out_if: LQSRIf,
        in_if: LQSRIf,
        drop_ratio: u8,
    },
    /// `IOCTL_MCL_QUERY_LINK_CACHE_CHANGE_LOG`.
    QueryLinkChangeLog,
    /// `IOCTL_MCL_QUERY_ROUTE_CACHE_CHANGE_LOG`.
    QueryRouteChangeLog,
    /// `IOCTL_MCL_QUERY_ROUTE_USAGE`: per-destination route usage history.
    QueryRouteUsage { destination: VirtualAddress },
    /// `IOCTL_MCL_QUERY_MAINTENANCE_BUFFER`: aggregate queue depth.
    QueryMaintenanceBuffer,
    /// `IOCTL_MCL_RESET_STATISTICS`.
    ResetStatistics,
    /// `IOCTL_MCL_INFORMATION_REQUEST`: current packet/error counters.
    QueryStatistics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSummary {
    pub source: VirtualAddress,
    pub target: VirtualAddress,
    pub out_if: LQSRIf,
    pub in_if: LQSRIf,
    pub metric: u32,
    pub ref_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct StatisticsSnapshot {
    pub recv_bad_mac: u64,
    pub recv_invalid_packet: u64,
    pub forward_drop: u64,
    pub maintbuf_queue_full: u64,
    pub maintbuf_link_broken: u64,
    pub sendbuf_timeout: u64,
    pub route_request_originated: u64,
    pub route_request_suppressed: u64,
    pub dijkstra_runs: u64,
}

/// Outcome of one [`Request`], one variant per request kind.
#[derive(Debug, Clone)]
pub enum Response {
    NeighborCache(Vec<(VirtualAddress, LQSRIf)>),
    Flushed,
    SourceRoute(Option<Vec<Hop>>),
    LinkCache(Vec<LinkSummary>),
    LinkChangeLog(Vec<LinkChangeRecord>),
    RouteChangeLog(Vec<RouteChangeRecord>),
    RouteUsage(Vec<(Vec<VirtualAddress>, u64)>),
    MaintenanceBufferDepth(usize),
    Statistics(StatisticsSnapshot),
    Ack,
}

/// Mirrors the original driver's `NTSTATUS`-style completion without
/// carrying over Windows error codes: success, or a typed failure a
/// management client can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidRequest,
    NoRoute,
    NotFound,
}

impl From<&MclError> for ExitCode {
    fn from(err: &MclError) -> Self {
        match err {
            MclError::NoRouteToDestination => ExitCode::NoRoute,
            MclError::InvalidConfiguration(_) | MclError::InvalidPacket(_) => {
                ExitCode::InvalidRequest
            }
            _ => ExitCode::NotFound,
        }
    }
}
