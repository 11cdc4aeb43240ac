// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for the node.
//!
//! Exactly the recognized cluster options are modeled here; unknown keys are
//! rejected at deserialization. Port bindings are not configuration: they
//! are fixed in code at startup.

use serde::{Deserialize, Serialize};

/// A validator as listed in the genesis configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InitialValidator {
    /// Hex-encoded 32-byte validator id.
    pub id: String,
    /// The validator's reachable endpoint.
    pub endpoint: String,
    /// Initial stake.
    pub stake: u128,
}

/// Per-class end-to-end latency SLAs, in milliseconds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PrioritySlaMs {
    /// SLA for the CRITICAL class.
    #[serde(default = "default_sla_critical")]
    pub critical: u64,
    /// SLA for the HIGH class.
    #[serde(default = "default_sla_high")]
    pub high: u64,
    /// SLA for the NORMAL class.
    #[serde(default = "default_sla_normal")]
    pub normal: u64,
}

fn default_sla_critical() -> u64 {
    2
}
fn default_sla_high() -> u64 {
    5
}
fn default_sla_normal() -> u64 {
    20
}

impl Default for PrioritySlaMs {
    fn default() -> Self {
        Self {
            critical: default_sla_critical(),
            high: default_sla_high(),
            normal: default_sla_normal(),
        }
    }
}

/// Circuit breaker thresholds for downstream dependencies.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures after which the breaker opens.
    #[serde(default = "default_breaker_failures")]
    pub failure_threshold: u32,
    /// Milliseconds the breaker stays open before admitting one probe.
    #[serde(default = "default_breaker_reset_ms")]
    pub reset_ms: u64,
}

fn default_breaker_failures() -> u32 {
    5
}
fn default_breaker_reset_ms() -> u64 {
    60_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failures(),
            reset_ms: default_breaker_reset_ms(),
        }
    }
}

/// Bridge coordinator parameters.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Default transfer timeout, seconds, when a request does not set one.
    #[serde(default = "default_bridge_timeout_s")]
    pub default_timeout_s: u64,
    /// Oracle approval quorum as a ratio. The coordinator requires strictly
    /// more than this fraction of the oracle set.
    #[serde(default = "default_oracle_quorum_ratio")]
    pub oracle_quorum_ratio: (u32, u32),
}

fn default_bridge_timeout_s() -> u64 {
    300
}
fn default_oracle_quorum_ratio() -> (u32, u32) {
    (2, 3)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_timeout_s: default_bridge_timeout_s(),
            oracle_quorum_ratio: default_oracle_quorum_ratio(),
        }
    }
}

/// Top-level node configuration. Only these options are recognized.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// The genesis validator set.
    pub initial_validators: Vec<InitialValidator>,
    /// Base election timeout; actual timeouts are randomized in
    /// `[base, 2·base]` with a stake-biased mean.
    #[serde(default = "default_election_timeout_base_ms")]
    pub election_timeout_base_ms: u64,
    /// Leader heartbeat interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Maximum transactions per block.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Entries between automatic snapshots.
    #[serde(default = "default_snapshot_interval_entries")]
    pub snapshot_interval_entries: u64,
    /// Maximum transactions held in the mempool.
    #[serde(default = "default_mempool_capacity")]
    pub mempool_capacity: usize,
    /// Per-class latency SLAs.
    #[serde(default)]
    pub priority_sla_ms: PrioritySlaMs,
    /// Circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Bridge coordinator parameters.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

fn default_election_timeout_base_ms() -> u64 {
    150
}
fn default_heartbeat_interval_ms() -> u64 {
    50
}
fn default_max_batch() -> usize {
    10_000
}
fn default_snapshot_interval_entries() -> u64 {
    10_000
}
fn default_mempool_capacity() -> usize {
    100_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            initial_validators: Vec::new(),
            election_timeout_base_ms: default_election_timeout_base_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_batch: default_max_batch(),
            snapshot_interval_entries: default_snapshot_interval_entries(),
            mempool_capacity: default_mempool_capacity(),
            priority_sla_ms: PrioritySlaMs::default(),
            breaker: BreakerConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config: NodeConfig =
            serde_json::from_str(r#"{ "initial_validators": [] }"#).unwrap();
        assert_eq!(config.election_timeout_base_ms, 150);
        assert_eq!(config.heartbeat_interval_ms, 50);
        assert_eq!(config.max_batch, 10_000);
        assert_eq!(config.snapshot_interval_entries, 10_000);
        assert_eq!(config.priority_sla_ms.critical, 2);
        assert_eq!(config.priority_sla_ms.high, 5);
        assert_eq!(config.priority_sla_ms.normal, 20);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.reset_ms, 60_000);
        assert_eq!(config.bridge.default_timeout_s, 300);
        assert_eq!(config.bridge.oracle_quorum_ratio, (2, 3));
    }

    #[test]
    fn unknown_keys_rejected() {
        let result = serde_json::from_str::<NodeConfig>(
            r#"{ "initial_validators": [], "surprise": 1 }"#,
        );
        assert!(result.is_err());
    }
}
