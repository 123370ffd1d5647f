//! Error taxonomy (spec §7).
//!
//! Only control-plane calls ([`crate::control`]) and static-route validation
//! ever surface an `MclError` to a caller. Packet-path failures
//! (`InvalidPacket`, `QueueFull`, `LinkBroken`) are contained, counted via
//! [`crate::stats`], and never unwind a packet partially.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MclError {
    /// Codec shape/MAC failure. The packet is dropped and counted; this
    /// variant exists mainly so unit tests can assert on decode failures.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    /// Allocation or heap failure in a non-packet path (e.g. Dijkstra's
    /// scratch arrays). Best-effort recovery: the caller's next periodic
    /// pass retries.
    #[error("out of resources")]
    OutOfResources,

    /// `fill_source_route` found no route. The caller (send path) should
    /// push to the send buffer and originate a Route Request.
    #[error("no route to destination")]
    NoRouteToDestination,

    /// A bounded queue (maintenance buffer, forward queue) is full.
    #[error("queue full")]
    QueueFull,

    /// The maintenance buffer detected a dead link.
    #[error("link broken")]
    LinkBroken,

    /// A control-surface request failed validation (e.g. a static route with
    /// fewer than 2 hops).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

pub type Result<T> = std::result::Result<T, MclError>;
