//! Mesh Connectivity Layer routing core — LQSR (Link-Quality Source Routing),
//! a layer-2.5 wireless mesh routing engine.
//!
//! This crate is a library a host embeds: it does not itself attach to
//! physical or virtual adapters, speak to the OS IP stack, or implement any
//! ioctl/registry transport. A host wires in [`orchestrator::PacketIo`] for
//! the wire/host boundary and drives the whole thing through
//! [`context::Context`].
//!
//! Key components:
//! - [`codec`] — on-wire LQSR frame encode/decode, options, MAC
//! - [`linkcache`] — node/link database, Dijkstra routing, change logs
//! - [`neighbor`] — virtual-to-physical address cache
//! - [`reqtable`] — Route Request dedup/backoff
//! - [`sendbuf`] — per-destination payload queue awaiting route discovery
//! - [`maintbuf`] — per-neighbor ack-request/ack reliability and link-failure
//!   detection
//! - [`pback`] — piggy-back cache for control options riding outbound data
//! - [`metric`] — pluggable link-quality metric engines (HOP/RTT/PktPair/
//!   ETX/WCETT)
//! - [`orchestrator`] — the LQSR state machine and periodic timer
//! - [`control`] — typed control-surface request/response vocabulary
//! - [`context`] — top-level `Context` a host owns one of per virtual adapter

pub mod clock;
pub mod codec;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod linkcache;
pub mod maintbuf;
pub mod metric;
pub mod neighbor;
pub mod orchestrator;
pub mod pback;
pub mod reqtable;
pub mod sendbuf;
pub mod stats;
pub mod types;

/// Installs a default `tracing` subscriber (env-filter based) if no
/// subscriber is already set. Safe to call multiple times — subsequent
/// calls are no-ops. Controlled by `RUST_LOG` (e.g. `RUST_LOG=mcl_core=debug`).
pub fn init() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if tracing::dispatcher::has_been_set() {
            tracing::info!("mcl-core: tracing subscriber already set");
            return;
        }
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_target(true)
            .with_thread_names(true)
            .compact()
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::info!("mcl-core initialized");
        }
    });
}
