//! Reply scorers.
//!
//! A scorer maps one reply, seen against its peers, to `[0, 1]`. Degenerate
//! inputs (a single reply, identical metrics, fewer than two successful
//! peers) score 1.0 so a lone answer is never penalised.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::reply::Reply;
use crate::similarity::tfidf_cosine;
use crate::validation::Validator;

/// Construction-time scorer errors.
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("negative weight {weight} for scorer '{scorer}'")]
    NegativeWeight { scorer: String, weight: f64 },
}

/// Maps a reply plus its peer set to a score in `[0, 1]`.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Name used as the breakdown key and in weight maps.
    fn name(&self) -> &str;

    /// Score `reply` against `all` (the full reply set, failures included).
    async fn score(&self, reply: &Reply, all: &[Reply], ctx: &CancellationToken) -> f64;
}

fn successful<'a>(all: &'a [Reply]) -> Vec<&'a Reply> {
    all.iter().filter(|r| r.success).collect()
}

/// Fastest successful reply scores 1.0, slowest 0.0, linear in between.
pub struct ResponseTimeScorer;

#[async_trait]
impl Scorer for ResponseTimeScorer {
    fn name(&self) -> &str {
        "ResponseTime"
    }

    async fn score(&self, reply: &Reply, all: &[Reply], _ctx: &CancellationToken) -> f64 {
        let peers = successful(all);
        if peers.len() < 2 {
            return 1.0;
        }
        let fastest = peers.iter().map(|r| r.duration).min().unwrap_or(Duration::ZERO);
        let slowest = peers.iter().map(|r| r.duration).max().unwrap_or(Duration::ZERO);
        if slowest == fastest {
            return 1.0;
        }
        let span = (slowest - fastest).as_secs_f64();
        let offset = reply.duration.saturating_sub(fastest).as_secs_f64();
        (1.0 - offset / span).clamp(0.0, 1.0)
    }
}

/// Fewest completion tokens scores 1.0, most 0.0, over successful peers
/// with a positive token count.
pub struct TokenEfficiencyScorer;

#[async_trait]
impl Scorer for TokenEfficiencyScorer {
    fn name(&self) -> &str {
        "TokenEfficiency"
    }

    async fn score(&self, reply: &Reply, all: &[Reply], _ctx: &CancellationToken) -> f64 {
        let peers: Vec<&Reply> = successful(all)
            .into_iter()
            .filter(|r| r.completion_tokens > 0)
            .collect();
        if peers.len() < 2 || reply.completion_tokens == 0 {
            return 1.0;
        }
        let leanest = peers.iter().map(|r| r.completion_tokens).min().unwrap_or(0);
        let largest = peers.iter().map(|r| r.completion_tokens).max().unwrap_or(0);
        if largest == leanest {
            return 1.0;
        }
        let span = (largest - leanest) as f64;
        let offset = reply.completion_tokens.saturating_sub(leanest) as f64;
        (1.0 - offset / span).clamp(0.0, 1.0)
    }
}

/// Mean TF-IDF cosine similarity to every other successful reply.
pub struct ConsensusScorer;

#[async_trait]
impl Scorer for ConsensusScorer {
    fn name(&self) -> &str {
        "Consensus"
    }

    async fn score(&self, reply: &Reply, all: &[Reply], _ctx: &CancellationToken) -> f64 {
        let peers = successful(all);
        let corpus: Vec<String> = peers.iter().map(|r| r.content.clone()).collect();
        let others: Vec<&Reply> = peers
            .into_iter()
            .filter(|r| r.provider != reply.provider)
            .collect();
        if others.is_empty() {
            return 1.0;
        }
        let total: f64 = others
            .iter()
            .map(|other| tfidf_cosine(&reply.content, &other.content, Some(&corpus)))
            .sum();
        (total / others.len() as f64).clamp(0.0, 1.0)
    }
}

/// Fraction of the attached validators the reply passes.
pub struct ValidationPassScorer {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationPassScorer {
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }
}

#[async_trait]
impl Scorer for ValidationPassScorer {
    fn name(&self) -> &str {
        "ValidationPass"
    }

    async fn score(&self, reply: &Reply, _all: &[Reply], ctx: &CancellationToken) -> f64 {
        if self.validators.is_empty() {
            return 1.0;
        }
        let mut passed = 0usize;
        for validator in &self.validators {
            if validator.validate(&reply.content, ctx).await.valid {
                passed += 1;
            }
        }
        passed as f64 / self.validators.len() as f64
    }
}

/// Weighted combination of scorers: `Σ(scoreᵢ · wᵢ) / Σwᵢ`.
///
/// Zero total weight yields 0.0. Negative weights are rejected when added.
pub struct WeightedScorer {
    entries: Vec<(Arc<dyn Scorer>, f64)>,
}

impl WeightedScorer {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add a scorer with a non-negative weight.
    pub fn push(mut self, scorer: Arc<dyn Scorer>, weight: f64) -> Result<Self, ScoreError> {
        if weight < 0.0 || !weight.is_finite() {
            return Err(ScoreError::NegativeWeight {
                scorer: scorer.name().to_string(),
                weight,
            });
        }
        self.entries.push((scorer, weight));
        Ok(self)
    }

    /// Wrap a single scorer with weight 1.0.
    pub fn single(scorer: Arc<dyn Scorer>) -> Self {
        Self {
            entries: vec![(scorer, 1.0)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Composite score plus the raw per-scorer breakdown.
    pub async fn score_detailed(
        &self,
        reply: &Reply,
        all: &[Reply],
        ctx: &CancellationToken,
    ) -> (f64, BTreeMap<String, f64>) {
        let mut breakdown = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (scorer, weight) in &self.entries {
            let value = scorer.score(reply, all, ctx).await.clamp(0.0, 1.0);
            breakdown.insert(scorer.name().to_string(), value);
            weighted_sum += value * weight;
            total_weight += weight;
        }
        if total_weight <= 0.0 {
            return (0.0, breakdown);
        }
        ((weighted_sum / total_weight).clamp(0.0, 1.0), breakdown)
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scorer for WeightedScorer {
    fn name(&self) -> &str {
        "Weighted"
    }

    async fn score(&self, reply: &Reply, all: &[Reply], ctx: &CancellationToken) -> f64 {
        self.score_detailed(reply, all, ctx).await.0
    }
}
