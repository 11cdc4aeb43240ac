// Path: crates/types/src/validator.rs

//! Validator records and the versioned cluster configuration.

use crate::error::StateDecodeError;
use crate::{codec, AccountId};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The lifecycle status of a validator.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorStatus {
    /// Participating in consensus. Requires positive stake.
    Active,
    /// Slashed; excluded from elections and quorums until reinstated.
    Jailed,
    /// Removed by a membership change; retained for historical lookups.
    Removed,
}

/// A single validator within the cluster configuration.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRecord {
    /// The stable, unique identifier of the validator.
    pub validator_id: AccountId,
    /// Consensus stake. Must be positive while `Active`.
    pub stake: u128,
    /// Lifecycle status.
    pub status: ValidatorStatus,
    /// The validator's reachable endpoint, opaque to the core.
    pub peer_endpoint: String,
}

impl ValidatorRecord {
    /// True iff the record may vote and be elected.
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active && self.stake > 0
    }
}

/// The versioned set of validators plus derived quorum parameters.
///
/// Config changes are committed log entries and take effect at the height
/// after commit. The validator list is kept sorted by id so quorum math
/// never depends on insertion order.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Monotonic configuration version.
    pub version: u64,
    /// All known validators, sorted by `validator_id`.
    pub validators: Vec<ValidatorRecord>,
}

impl ClusterConfig {
    /// Builds a config from records, sorting them into canonical order.
    pub fn new(version: u64, mut validators: Vec<ValidatorRecord>) -> Self {
        validators.sort_by(|a, b| a.validator_id.cmp(&b.validator_id));
        Self { version, validators }
    }

    /// The number of active validators, `n`.
    pub fn n(&self) -> usize {
        self.validators.iter().filter(|v| v.is_active()).count()
    }

    /// The commit quorum: `⌊2n/3⌋ + 1`. Any two commit quorums intersect in
    /// at least one honest validator for up to `⌊(n-1)/3⌋` Byzantine nodes.
    pub fn q_commit(&self) -> usize {
        (self.n() * 2) / 3 + 1
    }

    /// The view-change quorum required to elect a leader. Equal to the
    /// commit quorum so a minority partition can never form either.
    pub fn q_view_change(&self) -> usize {
        self.q_commit()
    }

    /// Iterates the active validators in canonical order.
    pub fn active(&self) -> impl Iterator<Item = &ValidatorRecord> {
        self.validators.iter().filter(|v| v.is_active())
    }

    /// Looks up a validator record by id.
    pub fn get(&self, id: &AccountId) -> Option<&ValidatorRecord> {
        self.validators.iter().find(|v| &v.validator_id == id)
    }

    /// True iff `id` is an active validator.
    pub fn is_active(&self, id: &AccountId) -> bool {
        self.get(id).is_some_and(ValidatorRecord::is_active)
    }

    /// The total stake of all active validators.
    pub fn total_stake(&self) -> u128 {
        self.active().map(|v| v.stake).sum()
    }
}

// --- Versioned Blob Structures for Backwards Compatibility ---

/// A versioned container for the cluster config as stored in committed
/// entries, supporting future schema upgrades.
#[derive(Encode, Decode, Debug, Clone)]
pub struct ClusterConfigBlob {
    /// The schema version of the payload. Currently 1.
    pub schema_version: u16,
    /// The version-specific payload.
    pub payload: ClusterConfig,
}

/// Current blob schema version.
pub const CLUSTER_CONFIG_SCHEMA: u16 = 1;

/// Read helper that accepts a versioned blob or a raw `ClusterConfig`.
pub fn read_cluster_config(bytes: &[u8]) -> Result<ClusterConfig, StateDecodeError> {
    if let Ok(blob) = codec::from_bytes_canonical::<ClusterConfigBlob>(bytes) {
        return Ok(blob.payload);
    }
    if let Ok(raw) = codec::from_bytes_canonical::<ClusterConfig>(bytes) {
        return Ok(raw);
    }
    Err(StateDecodeError("unknown cluster config encoding".into()))
}

/// Writes the cluster config in canonical blob form with validators sorted
/// by id.
pub fn write_cluster_config(config: &ClusterConfig) -> Vec<u8> {
    let mut sorted = config.clone();
    sorted
        .validators
        .sort_by(|a, b| a.validator_id.cmp(&b.validator_id));
    codec::to_bytes_canonical(&ClusterConfigBlob {
        schema_version: CLUSTER_CONFIG_SCHEMA,
        payload: sorted,
    })
}
