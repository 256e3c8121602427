//! # conclave-runtime
//!
//! The orchestration runtime: provider adapters, per-provider resilience
//! (circuit breaker, retry), execution strategies, the step pipeline and
//! the orchestrator facade.
//!
//! A single orchestration fans one prompt out to several providers under
//! the chosen execution strategy, validates and scores the replies with
//! the decision logic from `conclave-core`, and lets a consensus strategy
//! pick the winner. Remote faults never abort an orchestration; they are
//! carried as failed replies and reported in the result.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conclave_runtime::{Orchestrator, OrchestrationOptions, ProviderCatalog};
//! use conclave_runtime::config::{ModelConfig, RuntimeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let catalog = ProviderCatalog::with_defaults();
//! let client = reqwest::Client::new();
//! let config = RuntimeConfig::from_yaml_file("conclave.yaml")?;
//!
//! let orchestrator = Orchestrator::builder().config(config.clone()).build();
//! for model in config.providers {
//!     let adapter = catalog.build(client.clone(), model, config.circuit_breaker.clone())?;
//!     orchestrator.registry().register(adapter);
//! }
//!
//! let result = orchestrator
//!     .orchestrate("Compare Rust and Go for CLIs", OrchestrationOptions::default(), &CancellationToken::new())
//!     .await?;
//! println!("{} said: {}", result.best_provider.unwrap(), result.best_content.unwrap());
//! ```

pub mod config;
pub mod execution;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod resilience;
pub mod tracker;

pub use config::{ConfigError, ModelConfig, RuntimeConfig};
pub use execution::{
    ExecutionError, ExecutionResult, ExecutionStrategy, FallbackExecution, FallbackTriggers,
    ParallelExecution, SequentialExecution,
};
pub use orchestrator::{
    ConsensusKind, OrchestrationOptions, Orchestrator, OrchestratorBuilder, OrchestratorError,
    StrategyKind, NO_CONFIGURED_PROVIDERS,
};
pub use pipeline::{
    OrchestrationResult, Pipeline, PipelineBuilder, PipelineContext, PipelineEvent,
    PromptEnrichment, ProviderFailure, ALL_PROVIDERS_FAILED,
};
pub use providers::{
    AnthropicProvider, GeminiProvider, LlmProvider, OllamaProvider, OpenAiProvider,
    ProviderCatalog, ProviderError, ProviderFactory, ProviderRegistry, RawCompletion,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ExponentialBackoff, FixedDelay,
    RateLimitAware, RetryConfig, RetryPolicy,
};
pub use tracker::{PerformanceTracker, ProviderAnalytics};

// Re-export the core decision types alongside the runtime.
pub use conclave_core as core;
pub use conclave_core::{
    ConsensusOutcome, ConsensusStrategy, HighestScoreConsensus, MajorityVoteConsensus,
    QuorumConsensus, RateLimitInfo, Reply, ScoredReply, Scorer, ValidationOutcome, Validator,
    WeightedScorer,
};
