// Path: crates/consensus/src/messages.rs

//! Wire messages exchanged between replicas.
//!
//! Every message that influences commitment is signed by its author; the
//! tally only counts acknowledgments whose signatures verify.

use hyperraft_types::codec;
use hyperraft_types::ledger::{Block, EquivocationProof, Snapshot, Vote};
use hyperraft_types::{AccountId, Digest};
use parity_scale_codec::{Decode, Encode};

/// The follower's verdict on one `AppendEntries`.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The entries matched and were appended durably. Carries the
    /// follower's signed acknowledgment vote on the last appended block.
    Accepted(Vote),
    /// The leader's assumed prefix did not match. `hint` is the follower's
    /// last log height, for next-index back-off.
    Rejected {
        /// The follower's last height.
        hint: u64,
    },
}

/// The consensus message set.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMsg {
    /// A candidate soliciting votes.
    RequestVote {
        /// The soliciting candidate.
        candidate: AccountId,
        /// The candidate's (new) term.
        term: u64,
        /// Term of the candidate's last log entry.
        last_log_term: u64,
        /// Height of the candidate's last log entry.
        last_log_height: u64,
    },
    /// A voter's reply to [`ConsensusMsg::RequestVote`].
    RequestVoteReply {
        /// The replying voter.
        voter: AccountId,
        /// The term the reply belongs to.
        term: u64,
        /// The candidate the reply addresses.
        candidate: AccountId,
        /// Whether the vote was granted.
        granted: bool,
        /// Signature over the reply's signing bytes.
        signature: Vec<u8>,
    },
    /// Log replication and heartbeat.
    AppendEntries {
        /// The sending leader.
        leader: AccountId,
        /// The leader's term.
        term: u64,
        /// Height of the entry immediately preceding `entries`.
        prev_height: u64,
        /// Hash of the header at `prev_height`; all-zero when none.
        prev_hash: Digest,
        /// The entries to append, each carrying its proposer's signature;
        /// empty for a pure heartbeat.
        entries: Vec<Block>,
        /// The leader's commit index.
        leader_commit: u64,
    },
    /// The follower's reply to [`ConsensusMsg::AppendEntries`].
    AppendReply {
        /// The replying follower.
        follower: AccountId,
        /// The follower's current term.
        term: u64,
        /// Accepted-with-vote or rejected-with-hint.
        result: AppendResult,
    },
    /// The leader announcing an advanced commit index.
    CommitNotice {
        /// The announcing leader.
        leader: AccountId,
        /// The leader's term.
        term: u64,
        /// The new commit index.
        commit_height: u64,
    },
    /// A replica's finality confirmation for a committed block.
    FinalityVote(Vote),
    /// Snapshot shipping for replicas behind the log floor.
    InstallSnapshot {
        /// The sending leader.
        leader: AccountId,
        /// The leader's term.
        term: u64,
        /// The snapshot to install.
        snapshot: Snapshot,
    },
    /// Evidence of proposer equivocation, relayed to every replica.
    EquivocationEvidence(EquivocationProof),
}

impl ConsensusMsg {
    /// Canonical bytes covered by a vote-reply signature.
    pub fn vote_reply_signing_bytes(
        voter: &AccountId,
        term: u64,
        candidate: &AccountId,
        granted: bool,
    ) -> Vec<u8> {
        codec::to_bytes_canonical(&(b"vote-reply", voter, term, candidate, granted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_types::ledger::BlockHeader;
    use hyperraft_types::ZERO_DIGEST;

    #[test]
    fn message_roundtrip() {
        let msg = ConsensusMsg::AppendEntries {
            leader: AccountId([1u8; 32]),
            term: 3,
            prev_height: 7,
            prev_hash: [9u8; 32],
            entries: vec![Block {
                header: BlockHeader {
                    height: 8,
                    term: 3,
                    prev_hash: [9u8; 32],
                    tx_root: ZERO_DIGEST,
                    proposer_id: AccountId([1u8; 32]),
                    timestamp_ms: 42,
                },
                transactions: vec![],
                special: None,
                proposer_signature: vec![1, 2, 3],
            }],
            leader_commit: 6,
        };
        let bytes = codec::to_bytes_canonical(&msg);
        let decoded: ConsensusMsg = codec::from_bytes_canonical(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn vote_reply_bytes_bind_all_fields() {
        let voter = AccountId([1u8; 32]);
        let candidate = AccountId([2u8; 32]);
        let a = ConsensusMsg::vote_reply_signing_bytes(&voter, 1, &candidate, true);
        let b = ConsensusMsg::vote_reply_signing_bytes(&voter, 1, &candidate, false);
        let c = ConsensusMsg::vote_reply_signing_bytes(&voter, 2, &candidate, true);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
