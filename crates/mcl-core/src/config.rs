//! Persisted per-virtual-adapter configuration (spec §6).
//!
//! Follows `rist_bonding_core::config`'s pattern: an all-`Option`,
//! `#[serde(default)]` `*Input` struct deserializes from TOML, then
//! `.resolve()` fills in defaults to produce the concrete struct the rest of
//! the crate uses.

use crate::types::{MetricType, VirtualAddress};
use serde::Deserialize;

pub const DEFAULT_ROUTE_FLAP_DAMPING_FACTOR: u32 = 32;
pub const DEFAULT_LINK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VirtualAdapterConfigInput {
    pub virtual_address: Option<[u8; 6]>,
    pub snooping: Option<bool>,
    pub artificial_drop: Option<bool>,
    pub crypto: Option<bool>,
    pub crypto_key_mac: Option<[u8; 16]>,
    pub crypto_key_aes: Option<[u8; 16]>,
    pub link_timeout_secs: Option<u64>,
    pub metric_type: Option<String>,
    pub route_flap_damping_factor: Option<u32>,
    pub rtt: RttParamsInput,
    pub pktpair: PktPairParamsInput,
    pub etx: EtxParamsInput,
    pub wcett: WcettParamsInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RttParamsInput {
    pub alpha: Option<u32>,
    pub penalty_factor: Option<u32>,
    pub infinite_threshold_ms: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PktPairParamsInput {
    pub small_probe_bytes: Option<u32>,
    pub large_probe_bytes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtxParamsInput {
    pub loss_interval_secs: Option<u32>,
    pub probe_period_ms: Option<u32>,
    pub expected_probes_per_interval: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WcettParamsInput {
    pub beta: Option<u32>,
    pub cwmin: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttParams {
    pub alpha: u32,
    pub penalty_factor: u32,
    pub infinite_threshold_ms: u32,
}

impl Default for RttParams {
    fn default() -> Self {
        Self {
            alpha: 1,
            penalty_factor: 3,
            infinite_threshold_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PktPairParams {
    pub small_probe_bytes: u32,
    pub large_probe_bytes: u32,
}

impl Default for PktPairParams {
    fn default() -> Self {
        Self {
            small_probe_bytes: 137,
            large_probe_bytes: 1137,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtxParams {
    pub loss_interval_secs: u32,
    pub probe_period_ms: u32,
    pub expected_probes_per_interval: u32,
}

impl Default for EtxParams {
    fn default() -> Self {
        Self {
            loss_interval_secs: 30,
            probe_period_ms: 1000,
            expected_probes_per_interval: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WcettParams {
    pub beta: u32,
    pub cwmin: u32,
}

impl Default for WcettParams {
    fn default() -> Self {
        Self { beta: 5, cwmin: 31 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualAdapterConfig {
    pub virtual_address: VirtualAddress,
    pub snooping: bool,
    pub artificial_drop: bool,
    pub crypto: bool,
    pub crypto_key_mac: [u8; 16],
    pub crypto_key_aes: [u8; 16],
    pub link_timeout_secs: u64,
    pub metric_type: MetricType,
    pub route_flap_damping_factor: u32,
    pub rtt: RttParams,
    pub pktpair: PktPairParams,
    pub etx: EtxParams,
    pub wcett: WcettParams,
}

impl Default for VirtualAdapterConfig {
    fn default() -> Self {
        Self {
            virtual_address: VirtualAddress::ZERO,
            snooping: false,
            artificial_drop: false,
            crypto: false,
            crypto_key_mac: [0; 16],
            crypto_key_aes: [0; 16],
            link_timeout_secs: DEFAULT_LINK_TIMEOUT_SECS,
            metric_type: MetricType::Hop,
            route_flap_damping_factor: DEFAULT_ROUTE_FLAP_DAMPING_FACTOR,
            rtt: RttParams::default(),
            pktpair: PktPairParams::default(),
            etx: EtxParams::default(),
            wcett: WcettParams::default(),
        }
    }
}

fn parse_metric_type(s: &str) -> Result<MetricType, String> {
    match s.to_ascii_lowercase().as_str() {
        "hop" => Ok(MetricType::Hop),
        "rtt" => Ok(MetricType::Rtt),
        "pktpair" => Ok(MetricType::PktPair),
        "etx" => Ok(MetricType::Etx),
        "wcett" => Ok(MetricType::Wcett),
        other => Err(format!("unknown metric_type {other:?}")),
    }
}

impl VirtualAdapterConfigInput {
    pub fn resolve(self) -> Result<VirtualAdapterConfig, String> {
        let defaults = VirtualAdapterConfig::default();
        let metric_type = match self.metric_type {
            Some(s) => parse_metric_type(&s)?,
            None => defaults.metric_type,
        };
        Ok(VirtualAdapterConfig {
            virtual_address: self
                .virtual_address
                .map(VirtualAddress::new)
                .unwrap_or(defaults.virtual_address),
            snooping: self.snooping.unwrap_or(defaults.snooping),
            artificial_drop: self.artificial_drop.unwrap_or(defaults.artificial_drop),
            crypto: self.crypto.unwrap_or(defaults.crypto),
            crypto_key_mac: self.crypto_key_mac.unwrap_or(defaults.crypto_key_mac),
            crypto_key_aes: self.crypto_key_aes.unwrap_or(defaults.crypto_key_aes),
            link_timeout_secs: self
                .link_timeout_secs
                .unwrap_or(defaults.link_timeout_secs),
            metric_type,
            route_flap_damping_factor: self
                .route_flap_damping_factor
                .unwrap_or(defaults.route_flap_damping_factor),
            rtt: RttParams {
                alpha: self.rtt.alpha.unwrap_or(defaults.rtt.alpha),
                penalty_factor: self
                    .rtt
                    .penalty_factor
                    .unwrap_or(defaults.rtt.penalty_factor),
                infinite_threshold_ms: self
                    .rtt
                    .infinite_threshold_ms
                    .unwrap_or(defaults.rtt.infinite_threshold_ms),
            },
            pktpair: PktPairParams {
                small_probe_bytes: self
                    .pktpair
                    .small_probe_bytes
                    .unwrap_or(defaults.pktpair.small_probe_bytes),
                large_probe_bytes: self
                    .pktpair
                    .large_probe_bytes
                    .unwrap_or(defaults.pktpair.large_probe_bytes),
            },
            etx: EtxParams {
                loss_interval_secs: self
                    .etx
                    .loss_interval_secs
                    .unwrap_or(defaults.etx.loss_interval_secs),
                probe_period_ms: self
                    .etx
                    .probe_period_ms
                    .unwrap_or(defaults.etx.probe_period_ms),
                expected_probes_per_interval: self
                    .etx
                    .expected_probes_per_interval
                    .unwrap_or(defaults.etx.expected_probes_per_interval),
            },
            wcett: WcettParams {
                beta: self.wcett.beta.unwrap_or(defaults.wcett.beta).min(10),
                cwmin: self.wcett.cwmin.unwrap_or(defaults.wcett.cwmin),
            },
        })
    }
}

impl VirtualAdapterConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(VirtualAdapterConfig::default());
        }
        let parsed: VirtualAdapterConfigInput =
            toml::from_str(input).map_err(|e| format!("invalid config TOML: {e}"))?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let cfg = VirtualAdapterConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, VirtualAdapterConfig::default());
    }

    #[test]
    fn parses_basic_fields() {
        let toml = r#"
            virtual_address = [1, 2, 3, 4, 5, 6]
            snooping = true
            metric_type = "ETX"
            route_flap_damping_factor = 16

            [etx]
            loss_interval_secs = 10
        "#;
        let cfg = VirtualAdapterConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.virtual_address, VirtualAddress::new([1, 2, 3, 4, 5, 6]));
        assert!(cfg.snooping);
        assert_eq!(cfg.metric_type, MetricType::Etx);
        assert_eq!(cfg.route_flap_damping_factor, 16);
        assert_eq!(cfg.etx.loss_interval_secs, 10);
        // untouched field still defaults
        assert_eq!(cfg.etx.probe_period_ms, EtxParams::default().probe_period_ms);
    }

    #[test]
    fn rejects_unknown_metric_type() {
        let toml = r#"metric_type = "bogus""#;
        assert!(VirtualAdapterConfig::from_toml_str(toml).is_err());
    }
}
