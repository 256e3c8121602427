//! Orchestrator facade.
//!
//! Wraps the pipeline behind two entry points: [`Orchestrator::orchestrate`]
//! with inline options, and [`Orchestrator::orchestrate_from_template`]
//! which renders a registered prompt template first. The orchestrator owns
//! provider resolution, scorer construction from a weight map, and the
//! post-consensus performance-tracker update.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use conclave_core::{
    ConsensusError, ConsensusScorer, ConsensusStrategy, HighestScoreConsensus,
    MajorityVoteConsensus, PromptLibrary, QuorumConsensus, ResponseTimeScorer, ScoreError, Scorer,
    TemplateError, TokenEfficiencyScorer, ValidationPassScorer, WeightedScorer,
};

use crate::config::RuntimeConfig;
use crate::execution::{
    ExecutionStrategy, FallbackExecution, FallbackTriggers, ParallelExecution, SequentialExecution,
};
use crate::pipeline::{OrchestrationResult, Pipeline, PipelineEvent};
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::tracker::PerformanceTracker;

/// Reason reported when provider resolution comes up empty.
pub const NO_CONFIGURED_PROVIDERS: &str = "No configured providers available";

/// Argument and configuration errors surfaced synchronously.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("at least one provider is required")]
    NoProviders,

    #[error("unknown scorer '{0}' in weight map")]
    UnknownScorer(String),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// How the provider set is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Parallel,
    Sequential,
    Fallback,
}

/// How the winner is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusKind {
    HighestScore,
    MajorityVote,
    Quorum,
}

/// Inline options for a single orchestration call.
#[derive(Debug, Clone)]
pub struct OrchestrationOptions {
    pub strategy: StrategyKind,
    pub consensus: ConsensusKind,

    /// Provider order for the Fallback strategy. Empty means "use the
    /// configured subset".
    pub fallback_order: Vec<String>,
    pub fallback_triggers: FallbackTriggers,

    /// Agreeing replies required by the Quorum consensus.
    pub quorum_size: usize,

    /// Jaccard threshold for MajorityVote and Quorum.
    pub similarity_threshold: f64,

    pub system_prompt: Option<String>,

    /// Scorer weights by name; empty means the default blend.
    pub weights: BTreeMap<String, f64>,

    /// Override of the configured attempt budget.
    pub max_attempts: Option<u32>,
}

impl Default for OrchestrationOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Parallel,
            consensus: ConsensusKind::HighestScore,
            fallback_order: Vec::new(),
            fallback_triggers: FallbackTriggers::ALL,
            quorum_size: 2,
            similarity_threshold: 0.6,
            system_prompt: None,
            weights: BTreeMap::new(),
            max_attempts: None,
        }
    }
}

fn default_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("ResponseTime".to_string(), 1.0),
        ("Consensus".to_string(), 1.0),
        ("TokenEfficiency".to_string(), 1.0),
    ])
}

/// Build a weighted scorer from `name -> weight` over the built-in scorer
/// names. Unknown names are argument errors.
fn build_scorer(weights: &BTreeMap<String, f64>) -> Result<WeightedScorer, OrchestratorError> {
    let weights = if weights.is_empty() {
        default_weights()
    } else {
        weights.clone()
    };

    let mut scorer = WeightedScorer::new();
    for (name, weight) in &weights {
        let entry: Arc<dyn Scorer> = match name.as_str() {
            "ResponseTime" => Arc::new(ResponseTimeScorer),
            "Consensus" => Arc::new(ConsensusScorer),
            "TokenEfficiency" => Arc::new(TokenEfficiencyScorer),
            "ValidationPass" => Arc::new(ValidationPassScorer::new(Vec::new())),
            other => return Err(OrchestratorError::UnknownScorer(other.to_string())),
        };
        scorer = scorer.push(entry, *weight)?;
    }
    Ok(scorer)
}

/// Facade over registry, template library, tracker and pipeline.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    library: Arc<PromptLibrary>,
    tracker: Arc<PerformanceTracker>,
    config: RuntimeConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        library: Arc<PromptLibrary>,
        tracker: Arc<PerformanceTracker>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            library,
            tracker,
            config,
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn library(&self) -> &Arc<PromptLibrary> {
        &self.library
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// A pipeline builder pre-loaded with this orchestrator's configured
    /// providers and retry settings.
    pub fn pipeline(&self) -> crate::pipeline::PipelineBuilder {
        Pipeline::builder()
            .providers(self.registry.configured())
            .retry_policy(self.config.retry.build())
            .max_attempts(self.config.max_attempts)
    }

    /// Run one orchestration with inline options.
    pub async fn orchestrate(
        &self,
        prompt: &str,
        options: OrchestrationOptions,
        ctx: &CancellationToken,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let providers = self.resolve_providers(&options);
        if providers.is_empty() {
            tracing::warn!("no configured providers to orchestrate over");
            return Ok(unconfigured_result());
        }

        let scorer = build_scorer(&options.weights)?;
        let consensus: Arc<dyn ConsensusStrategy> = match options.consensus {
            ConsensusKind::HighestScore => Arc::new(HighestScoreConsensus),
            ConsensusKind::MajorityVote => {
                Arc::new(MajorityVoteConsensus::new(options.similarity_threshold))
            }
            ConsensusKind::Quorum => Arc::new(QuorumConsensus::new(
                options.quorum_size,
                options.similarity_threshold,
            )?),
        };
        let execution: Arc<dyn ExecutionStrategy> = match options.strategy {
            StrategyKind::Parallel => Arc::new(ParallelExecution),
            StrategyKind::Sequential => Arc::new(SequentialExecution),
            StrategyKind::Fallback => Arc::new(FallbackExecution::new(options.fallback_triggers)),
        };

        let mut builder = Pipeline::builder()
            .providers(providers)
            .scorer(scorer)
            .consensus(consensus)
            .execution(execution)
            .retry_policy(self.config.retry.build())
            .max_attempts(options.max_attempts.unwrap_or(self.config.max_attempts));
        if let Some(system_prompt) = &options.system_prompt {
            builder = builder.system_prompt(system_prompt.clone());
        }

        let result = builder.build().run(prompt, ctx).await?;
        self.record(&result);
        Ok(result)
    }

    /// Render a registered template, then orchestrate its prompts.
    pub async fn orchestrate_from_template(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
        mut options: OrchestrationOptions,
        ctx: &CancellationToken,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let rendered = self.library.render(name, vars)?;
        if options.system_prompt.is_none() {
            options.system_prompt = rendered.system_prompt;
        }
        self.orchestrate(&rendered.user_prompt, options, ctx).await
    }

    fn resolve_providers(&self, options: &OrchestrationOptions) -> Vec<Arc<dyn LlmProvider>> {
        if options.strategy == StrategyKind::Fallback && !options.fallback_order.is_empty() {
            self.registry.by_names(&options.fallback_order)
        } else {
            self.registry.configured()
        }
    }

    /// Tracker update after a successful orchestration: one success record
    /// per scored reply (winner flagged), one failure record per execution
    /// failure.
    fn record(&self, result: &OrchestrationResult) {
        if !result.success {
            return;
        }
        for scored in &result.all_scored {
            let won = result.best_provider.as_deref() == Some(scored.provider.as_str());
            self.tracker.record_success(
                &scored.provider,
                scored.response_time,
                scored.score,
                scored.total_tokens,
                won,
            );
        }
        for failure in &result.failures {
            self.tracker.record_failure(&failure.provider);
        }
    }
}

fn unconfigured_result() -> OrchestrationResult {
    OrchestrationResult {
        success: false,
        best_content: None,
        best_provider: None,
        best_score: 0.0,
        consensus_reached: false,
        consensus_confidence: 0.0,
        agreement_count: 0,
        total_models: 0,
        dissenting_providers: Vec::new(),
        all_scored: Vec::new(),
        execution_time: std::time::Duration::ZERO,
        failure_reason: Some(NO_CONFIGURED_PROVIDERS.to_string()),
        failures: Vec::new(),
        attempts: 0,
        pipeline_events: Vec::<PipelineEvent>::new(),
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    registry: Arc<ProviderRegistry>,
    library: Arc<PromptLibrary>,
    tracker: Arc<PerformanceTracker>,
    config: RuntimeConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ProviderRegistry::new()),
            library: Arc::new(PromptLibrary::new()),
            tracker: Arc::new(PerformanceTracker::new()),
            config: RuntimeConfig::default(),
        }
    }

    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn library(mut self, library: Arc<PromptLibrary>) -> Self {
        self.library = library;
        self
    }

    pub fn tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an adapter on the way through.
    pub fn provider(self, provider: Arc<dyn LlmProvider>) -> Self {
        self.registry.register(provider);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator::new(self.registry, self.library, self.tracker, self.config)
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
