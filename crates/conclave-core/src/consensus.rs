//! Consensus strategies: rank scored replies and pick a winner.
//!
//! Voting deliberately uses plain Jaccard token overlap, not the TF-IDF
//! cosine the consensus scorer uses. Agreement here is about surface
//! wording; weighted similarity already had its say during scoring.

use std::cmp::Ordering;
use thiserror::Error;

use crate::reply::{ConsensusOutcome, ScoredReply};
use crate::similarity::jaccard;

/// Construction-time consensus errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("quorum size must be at least 1, got {0}")]
    QuorumTooSmall(usize),
}

/// Decides the winning reply from an ordered list of scored replies.
///
/// Implementations must honour input order on ties and must satisfy
/// `agreement_count + dissenting = total_models` in every outcome.
pub trait ConsensusStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, scored: &[ScoredReply]) -> ConsensusOutcome;
}

/// Always picks the highest-scored reply; consensus is unconditional.
///
/// Confidence reflects the winner's margin over the runner-up.
pub struct HighestScoreConsensus;

impl ConsensusStrategy for HighestScoreConsensus {
    fn name(&self) -> &str {
        "HighestScore"
    }

    fn decide(&self, scored: &[ScoredReply]) -> ConsensusOutcome {
        if scored.is_empty() {
            return ConsensusOutcome::empty();
        }

        let mut ranked: Vec<&ScoredReply> = scored.iter().collect();
        // stable sort keeps insertion order for equal scores
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let winner = ranked[0];
        let confidence = if ranked.len() == 1 {
            1.0
        } else {
            (0.5 + (winner.score - ranked[1].score)).min(1.0)
        };

        ConsensusOutcome {
            consensus_reached: true,
            best_content: Some(winner.content.clone()),
            best_provider: Some(winner.provider.clone()),
            best_score: winner.score,
            confidence,
            agreement_count: 1,
            total_models: scored.len(),
            dissenting_providers: scored
                .iter()
                .filter(|r| r.provider != winner.provider)
                .map(|r| r.provider.clone())
                .collect(),
            all_scored: scored.to_vec(),
        }
    }
}

/// Greedy similarity clustering; the largest cluster must hold a strict
/// majority for consensus.
pub struct MajorityVoteConsensus {
    threshold: f64,
}

impl MajorityVoteConsensus {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for MajorityVoteConsensus {
    fn default() -> Self {
        Self::new(0.6)
    }
}

impl ConsensusStrategy for MajorityVoteConsensus {
    fn name(&self) -> &str {
        "MajorityVote"
    }

    fn decide(&self, scored: &[ScoredReply]) -> ConsensusOutcome {
        if scored.is_empty() {
            return ConsensusOutcome::empty();
        }

        // Seed a cluster with each unassigned reply; attach later replies
        // whose overlap with the seed clears the threshold.
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for (index, reply) in scored.iter().enumerate() {
            let home = clusters.iter_mut().find(|cluster| {
                jaccard(&scored[cluster[0]].content, &reply.content) >= self.threshold
            });
            match home {
                Some(cluster) => cluster.push(index),
                None => clusters.push(vec![index]),
            }
        }

        // Earlier clusters and earlier members win ties.
        let mut largest = &clusters[0];
        for cluster in &clusters[1..] {
            if cluster.len() > largest.len() {
                largest = cluster;
            }
        }

        let mut winner_index = largest[0];
        for &member in &largest[1..] {
            if scored[member].score > scored[winner_index].score {
                winner_index = member;
            }
        }
        let winner = &scored[winner_index];

        let total = scored.len();
        let agreement = largest.len();

        ConsensusOutcome {
            consensus_reached: agreement * 2 > total,
            best_content: Some(winner.content.clone()),
            best_provider: Some(winner.provider.clone()),
            best_score: winner.score,
            confidence: agreement as f64 / total as f64,
            agreement_count: agreement,
            total_models: total,
            dissenting_providers: (0..total)
                .filter(|index| !largest.contains(index))
                .map(|index| scored[index].provider.clone())
                .collect(),
            all_scored: scored.to_vec(),
        }
    }
}

/// Requires a fixed number of mutually similar replies.
///
/// Each candidate counts the peers (itself included) whose overlap clears
/// the threshold; the best-supported candidate wins and consensus holds
/// when its support meets `required`.
pub struct QuorumConsensus {
    required: usize,
    threshold: f64,
}

impl QuorumConsensus {
    pub fn new(required: usize, threshold: f64) -> Result<Self, ConsensusError> {
        if required < 1 {
            return Err(ConsensusError::QuorumTooSmall(required));
        }
        Ok(Self { required, threshold })
    }
}

impl ConsensusStrategy for QuorumConsensus {
    fn name(&self) -> &str {
        "Quorum"
    }

    fn decide(&self, scored: &[ScoredReply]) -> ConsensusOutcome {
        if scored.is_empty() {
            return ConsensusOutcome::empty();
        }

        let total = scored.len();
        let supporters = |candidate: usize| -> Vec<usize> {
            (0..total)
                .filter(|&peer| {
                    peer == candidate
                        || jaccard(&scored[candidate].content, &scored[peer].content)
                            >= self.threshold
                })
                .collect()
        };

        // Best-supported candidate; earlier input order wins ties.
        let mut winner_index = 0;
        let mut winner_support = supporters(0);
        for candidate in 1..total {
            let support = supporters(candidate);
            if support.len() > winner_support.len() {
                winner_index = candidate;
                winner_support = support;
            }
        }

        let winner = &scored[winner_index];
        let agreement = winner_support.len();

        ConsensusOutcome {
            consensus_reached: agreement >= self.required,
            best_content: Some(winner.content.clone()),
            best_provider: Some(winner.provider.clone()),
            best_score: winner.score,
            confidence: agreement as f64 / total as f64,
            agreement_count: agreement,
            total_models: total,
            dissenting_providers: (0..total)
                .filter(|index| !winner_support.contains(index))
                .map(|index| scored[index].provider.clone())
                .collect(),
            all_scored: scored.to_vec(),
        }
    }
}
