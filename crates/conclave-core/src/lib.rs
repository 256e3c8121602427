//! # conclave-core
//!
//! Decision logic for the Conclave orchestration engine: the reply data
//! model, text similarity, validators, scorers, consensus strategies and
//! prompt templates. Nothing in this crate touches the network or the
//! clock; given the same replies it always reaches the same decision.
//!
//! The async seams (validators, scorers) exist so network-backed
//! implementations such as a remote moderation validator plug into the
//! same trait as the pure built-ins.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conclave_core::{ConsensusStrategy, HighestScoreConsensus};
//!
//! let outcome = HighestScoreConsensus.decide(&scored_replies);
//! if outcome.consensus_reached {
//!     println!(
//!         "{} wins: {}",
//!         outcome.best_provider.unwrap(),
//!         outcome.best_content.unwrap()
//!     );
//! }
//! ```

pub mod consensus;
pub mod reply;
pub mod scoring;
pub mod similarity;
pub mod template;
pub mod validation;

pub use consensus::{
    ConsensusError, ConsensusStrategy, HighestScoreConsensus, MajorityVoteConsensus,
    QuorumConsensus,
};
pub use reply::{
    ConsensusOutcome, RateLimitInfo, Reply, ScoredReply, ValidationOutcome, CANCELLED_OR_TIMED_OUT,
    CIRCUIT_OPEN,
};
pub use scoring::{
    ConsensusScorer, ResponseTimeScorer, ScoreError, Scorer, TokenEfficiencyScorer,
    ValidationPassScorer, WeightedScorer,
};
pub use similarity::{jaccard, tfidf_cosine, tokenize};
pub use template::{PromptLibrary, PromptTemplate, RenderedPrompt, TemplateError};
pub use validation::{
    CompositeValidator, ContentFilterValidator, CustomValidator, JsonSchemaValidator,
    LengthValidator, RegexValidator, ValidationError, Validator,
};
