// Path: crates/consensus/src/tally.rs

//! Byzantine vote tally and equivocation detection.
//!
//! The tally records signed acknowledgment and finality votes per
//! `(term, height)`, enforces the one-vote-per-kind rule, derives the
//! commit watermark from acknowledged heights, and turns conflicting
//! signed proposals into self-contained equivocation proofs. Vote state
//! for a height is discarded once finality passes it.

use hyperraft_types::error::ConsensusError;
use hyperraft_types::ledger::{BlockHeader, EquivocationProof, Vote, VoteKind};
use hyperraft_types::{AccountId, Digest};
use std::collections::HashMap;

#[derive(Default)]
struct VoterSlot {
    pre_vote: Option<Digest>,
    commit_vote: Option<Digest>,
}

/// Per-`(term, height)` vote bookkeeping plus proposal history.
#[derive(Default)]
pub struct VoteTally {
    votes: HashMap<(u64, u64), HashMap<AccountId, VoterSlot>>,
    /// Highest acknowledged `(term, height)` per voter, from signed acks.
    acked: HashMap<AccountId, (u64, u64)>,
    /// First signed proposal seen per `(term, height)`.
    proposals: HashMap<(u64, u64), (Digest, BlockHeader, Vec<u8>)>,
}

impl VoteTally {
    /// Creates an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a verified vote. Returns `false` for an exact duplicate and
    /// fails when the voter already voted differently at this
    /// `(term, height)`: same kind with another hash, or the other kind
    /// over another hash.
    pub fn record_vote(&mut self, vote: &Vote) -> Result<bool, ConsensusError> {
        let slot = self
            .votes
            .entry((vote.term, vote.target_height))
            .or_default()
            .entry(vote.voter_id)
            .or_default();

        let (mine, other) = match vote.kind {
            VoteKind::PreVote => (&mut slot.pre_vote, &slot.commit_vote),
            VoteKind::CommitVote => (&mut slot.commit_vote, &slot.pre_vote),
        };
        if let Some(prior) = other {
            if *prior != vote.target_hash {
                return Err(ConsensusError::DuplicateVote {
                    voter: vote.voter_id,
                    term: vote.term,
                    height: vote.target_height,
                });
            }
        }
        match mine {
            Some(prior) if *prior == vote.target_hash => Ok(false),
            Some(_) => Err(ConsensusError::DuplicateVote {
                voter: vote.voter_id,
                term: vote.term,
                height: vote.target_height,
            }),
            None => {
                *mine = Some(vote.target_hash);
                if vote.kind == VoteKind::PreVote {
                    let entry = self.acked.entry(vote.voter_id).or_insert((0, 0));
                    if (vote.term, vote.target_height) > *entry {
                        *entry = (vote.term, vote.target_height);
                    }
                }
                Ok(true)
            }
        }
    }

    /// The highest height acknowledged by at least `quorum` voters in
    /// `term`. An acknowledgment at height H covers every height below it,
    /// so this is the quorum-th largest acknowledged height.
    pub fn highest_quorum_height(&self, term: u64, quorum: usize) -> Option<u64> {
        if quorum == 0 {
            return None;
        }
        let mut heights: Vec<u64> = self
            .acked
            .values()
            .filter(|(t, _)| *t == term)
            .map(|(_, h)| *h)
            .collect();
        if heights.len() < quorum {
            return None;
        }
        heights.sort_unstable_by(|a, b| b.cmp(a));
        heights.get(quorum - 1).copied()
    }

    /// Records a signed proposal. When a different header was already seen
    /// at the same `(term, height)` from the same proposer, returns the
    /// equivocation proof.
    pub fn observe_proposal(
        &mut self,
        header: &BlockHeader,
        header_hash: Digest,
        signature: &[u8],
    ) -> Option<EquivocationProof> {
        let key = (header.term, header.height);
        match self.proposals.get(&key) {
            None => {
                self.proposals
                    .insert(key, (header_hash, header.clone(), signature.to_vec()));
                None
            }
            Some((seen_hash, _, _)) if *seen_hash == header_hash => None,
            Some((_, first_header, first_sig)) => {
                if first_header.proposer_id != header.proposer_id {
                    // Conflicting blocks from different claimed proposers is
                    // an election-safety violation upstream, not proof of
                    // proposer equivocation.
                    return None;
                }
                Some(EquivocationProof {
                    offender: header.proposer_id,
                    term: header.term,
                    height: header.height,
                    first: first_header.clone(),
                    first_signature: first_sig.clone(),
                    second: header.clone(),
                    second_signature: signature.to_vec(),
                })
            }
        }
    }

    /// Discards vote and proposal state below `height`. Called when
    /// finality passes; the vote set per `(term, height)` does not outlive
    /// it.
    pub fn prune_below(&mut self, height: u64) {
        self.votes.retain(|(_, h), _| *h >= height);
        self.proposals.retain(|(_, h), _| *h >= height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_types::ZERO_DIGEST;

    fn vote(voter: u8, term: u64, height: u64, hash: [u8; 32], kind: VoteKind) -> Vote {
        Vote {
            voter_id: AccountId([voter; 32]),
            term,
            target_height: height,
            target_hash: hash,
            kind,
            signature: vec![],
        }
    }

    fn header(proposer: u8, term: u64, height: u64, root: [u8; 32]) -> BlockHeader {
        BlockHeader {
            height,
            term,
            prev_hash: ZERO_DIGEST,
            tx_root: root,
            proposer_id: AccountId([proposer; 32]),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn one_vote_per_kind() {
        let mut tally = VoteTally::new();
        let first = vote(1, 2, 5, [7u8; 32], VoteKind::PreVote);
        assert!(tally.record_vote(&first).unwrap());
        // Exact duplicate is idempotent.
        assert!(!tally.record_vote(&first).unwrap());
        // Same kind, different hash: equivocating voter.
        let conflict = vote(1, 2, 5, [8u8; 32], VoteKind::PreVote);
        assert!(matches!(
            tally.record_vote(&conflict),
            Err(ConsensusError::DuplicateVote { .. })
        ));
        // Other kind must target the same hash.
        let cross = vote(1, 2, 5, [8u8; 32], VoteKind::CommitVote);
        assert!(tally.record_vote(&cross).is_err());
        let ok = vote(1, 2, 5, [7u8; 32], VoteKind::CommitVote);
        assert!(tally.record_vote(&ok).unwrap());
    }

    #[test]
    fn quorum_height_is_quorumth_largest() {
        let mut tally = VoteTally::new();
        for (voter, height) in [(1u8, 5u64), (2, 4), (3, 7)] {
            tally
                .record_vote(&vote(voter, 1, height, [height as u8; 32], VoteKind::PreVote))
                .unwrap();
        }
        // 3 voters at heights {7, 5, 4}: a quorum of 3 covers height 4.
        assert_eq!(tally.highest_quorum_height(1, 3), Some(4));
        assert_eq!(tally.highest_quorum_height(1, 2), Some(5));
        assert_eq!(tally.highest_quorum_height(1, 4), None);
        // Votes from another term do not count.
        assert_eq!(tally.highest_quorum_height(2, 1), None);
    }

    #[test]
    fn ack_heights_are_monotonic() {
        let mut tally = VoteTally::new();
        tally
            .record_vote(&vote(1, 1, 5, [5u8; 32], VoteKind::PreVote))
            .unwrap();
        tally
            .record_vote(&vote(1, 1, 3, [3u8; 32], VoteKind::PreVote))
            .unwrap();
        // The later, lower ack does not regress the voter's watermark.
        assert_eq!(tally.highest_quorum_height(1, 1), Some(5));
    }

    #[test]
    fn proposal_conflict_yields_proof() {
        let mut tally = VoteTally::new();
        let a = header(1, 2, 5, [1u8; 32]);
        let b = header(1, 2, 5, [2u8; 32]);
        assert!(tally.observe_proposal(&a, [0xAA; 32], b"sig-a").is_none());
        // Same hash again: no proof.
        assert!(tally.observe_proposal(&a, [0xAA; 32], b"sig-a").is_none());
        let proof = tally.observe_proposal(&b, [0xBB; 32], b"sig-b").unwrap();
        assert_eq!(proof.offender, AccountId([1u8; 32]));
        assert!(proof.is_structurally_valid());
    }

    #[test]
    fn prune_discards_old_heights() {
        let mut tally = VoteTally::new();
        tally
            .record_vote(&vote(1, 1, 3, [3u8; 32], VoteKind::PreVote))
            .unwrap();
        tally.observe_proposal(&header(1, 1, 3, [0u8; 32]), [1u8; 32], b"s");
        tally.prune_below(4);
        assert!(tally.votes.is_empty());
        assert!(tally.proposals.is_empty());
    }
}
