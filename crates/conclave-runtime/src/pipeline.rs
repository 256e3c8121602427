//! The orchestration pipeline.
//!
//! One pass runs five steps in a fixed order (enrich, execute, validate,
//! score, consensus) over a [`PipelineContext`] owned by that pass alone.
//! Each step appends a [`PipelineEvent`]; a terminal error short-circuits
//! the rest. The runner wraps passes in a retry loop governed by a
//! [`RetryPolicy`] and an attempt budget.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use conclave_core::reply::duration_millis;
use conclave_core::{
    ConsensusOutcome, ConsensusStrategy, HighestScoreConsensus, Reply, ScoredReply,
    ValidationOutcome, Validator, WeightedScorer,
};

use crate::execution::{ExecutionResult, ExecutionStrategy, ParallelExecution};
use crate::orchestrator::OrchestratorError;
use crate::providers::LlmProvider;
use crate::resilience::{RetryConfig, RetryPolicy};

/// Reason every successful reply was rejected or no provider answered.
pub const ALL_PROVIDERS_FAILED: &str = "All providers failed";

/// One step's trace entry.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub step: String,
    pub detail: String,

    /// Time since the pipeline run started.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

/// Optional first pipeline step: set a system prompt and wrap the user
/// prompt in a fixed prefix/suffix (joined with a blank line).
#[derive(Debug, Clone, Default)]
pub struct PromptEnrichment {
    system_prompt: Option<String>,
    prefix: Option<String>,
    suffix: Option<String>,
}

impl PromptEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    fn apply(&self, prompt: &str) -> (String, Option<String>) {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(prefix) = self.prefix.as_deref() {
            parts.push(prefix);
        }
        parts.push(prompt);
        if let Some(suffix) = self.suffix.as_deref() {
            parts.push(suffix);
        }
        (parts.join("\n\n"), self.system_prompt.clone())
    }
}

/// Mutable state threaded through one pipeline pass.
///
/// Owned by exactly one pass; nothing outside the pass observes it until
/// the pass completes.
#[derive(Debug)]
pub struct PipelineContext {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub execution_result: Option<ExecutionResult>,
    pub validation: BTreeMap<String, Vec<ValidationOutcome>>,
    pub scored: Vec<ScoredReply>,
    pub outcome: Option<ConsensusOutcome>,
    pub events: Vec<PipelineEvent>,
    pub error: Option<String>,
    started: Instant,
}

impl PipelineContext {
    fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            system_prompt: None,
            execution_result: None,
            validation: BTreeMap::new(),
            scored: Vec::new(),
            outcome: None,
            events: Vec::new(),
            error: None,
            started: Instant::now(),
        }
    }

    fn push_event(&mut self, step: &str, detail: impl Into<String>) {
        self.events.push(PipelineEvent {
            step: step.to_string(),
            detail: detail.into(),
            elapsed: self.started.elapsed(),
        });
    }

    fn fail(&mut self, step: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.push_event(step, reason.clone());
        self.error = Some(reason);
    }
}

/// One provider's failure as surfaced to the consumer.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
}

/// Consumer-facing result of one orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub best_content: Option<String>,
    pub best_provider: Option<String>,
    pub best_score: f64,
    pub consensus_reached: bool,
    pub consensus_confidence: f64,
    pub agreement_count: usize,
    pub total_models: usize,
    pub dissenting_providers: Vec<String>,
    pub all_scored: Vec<ScoredReply>,

    #[serde(with = "duration_millis")]
    pub execution_time: Duration,

    pub failure_reason: Option<String>,
    pub failures: Vec<ProviderFailure>,
    pub attempts: u32,
    pub pipeline_events: Vec<PipelineEvent>,
}

/// Fixed-order step pipeline with an outer retry loop.
pub struct Pipeline {
    providers: Vec<Arc<dyn LlmProvider>>,
    validators: Vec<Arc<dyn Validator>>,
    scorer: Option<Arc<WeightedScorer>>,
    consensus: Arc<dyn ConsensusStrategy>,
    execution: Arc<dyn ExecutionStrategy>,
    enrichment: Option<PromptEnrichment>,
    retry: Arc<dyn RetryPolicy>,
    max_attempts: u32,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run the pipeline to completion, retrying failed passes within the
    /// attempt budget.
    ///
    /// Argument errors (empty prompt, no providers) return `Err`
    /// synchronously; everything else is reported in the result.
    pub async fn run(
        &self,
        prompt: &str,
        ctx: &CancellationToken,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        if prompt.trim().is_empty() {
            return Err(OrchestratorError::EmptyPrompt);
        }
        if self.providers.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }

        let started = Instant::now();
        let mut attempt: u32 = 1;
        let mut events: Vec<PipelineEvent> = Vec::new();

        loop {
            tracing::info!(attempt, providers = self.providers.len(), "pipeline pass starting");
            let mut context = self.run_pass(prompt, ctx).await;
            events.append(&mut context.events);

            if context.error.is_none() {
                return Ok(self.build_result(context, events, started.elapsed(), attempt));
            }

            let last_failure = context
                .execution_result
                .as_ref()
                .and_then(|result| result.failed().last().map(|reply| (*reply).clone()));

            let delay = if attempt < self.max_attempts && !ctx.is_cancelled() {
                self.retry.next_delay(attempt, last_failure.as_ref())
            } else {
                None
            };

            match delay {
                Some(delay) => {
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "pass failed, retrying");
                    events.push(PipelineEvent {
                        step: "retry".to_string(),
                        detail: format!("attempt {attempt} failed, waiting {delay:?}"),
                        elapsed: started.elapsed(),
                    });
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            tracing::warn!("cancelled between attempts");
                            return Ok(self.build_result(context, events, started.elapsed(), attempt));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                None => {
                    tracing::warn!(attempt, "giving up");
                    return Ok(self.build_result(context, events, started.elapsed(), attempt));
                }
            }
        }
    }

    async fn run_pass(&self, prompt: &str, ctx: &CancellationToken) -> PipelineContext {
        let mut context = PipelineContext::new(prompt);

        // 1. enrichment
        if let Some(enrichment) = &self.enrichment {
            let (enriched, system_prompt) = enrichment.apply(&context.prompt);
            context.prompt = enriched;
            context.system_prompt = system_prompt;
            context.push_event("enrich", "prompt enriched");
        }

        // 2. execution
        let execution = self
            .execution
            .execute(
                &self.providers,
                &context.prompt,
                context.system_prompt.as_deref(),
                ctx,
            )
            .await;
        let successes: Vec<Reply> = match execution {
            Ok(result) => {
                let successes: Vec<Reply> =
                    result.successful().into_iter().cloned().collect();
                context.push_event(
                    "execute",
                    format!(
                        "{}: {} of {} providers succeeded in {}ms",
                        self.execution.name(),
                        successes.len(),
                        result.len(),
                        result.duration.as_millis()
                    ),
                );
                context.execution_result = Some(result);
                if successes.is_empty() {
                    context.fail("execute", ALL_PROVIDERS_FAILED);
                    return context;
                }
                successes
            }
            Err(error) => {
                context.fail("execute", error.to_string());
                return context;
            }
        };

        // 3. validation (records outcomes, never fatal on its own)
        for reply in &successes {
            let mut outcomes = Vec::with_capacity(self.validators.len());
            for validator in &self.validators {
                outcomes.push(validator.validate(&reply.content, ctx).await);
            }
            context.validation.insert(reply.provider.clone(), outcomes);
        }
        let rejected = context
            .validation
            .values()
            .filter(|outcomes| outcomes.iter().any(|o| !o.valid))
            .count();
        context.push_event(
            "validate",
            format!(
                "{} replies checked against {} validators, {} rejected",
                successes.len(),
                self.validators.len(),
                rejected
            ),
        );

        // 4. scoring, in provider-list order
        let all_replies: Vec<Reply> = context
            .execution_result
            .as_ref()
            .map(|result| result.replies().iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default();
        for reply in &successes {
            let (score, breakdown) = match &self.scorer {
                Some(scorer) => scorer.score_detailed(reply, &all_replies, ctx).await,
                None => (1.0, BTreeMap::new()),
            };
            context
                .scored
                .push(ScoredReply::from_reply(reply, score, breakdown));
        }
        context.push_event("score", format!("{} replies scored", context.scored.len()));

        // 5. consensus
        let outcome = self.consensus.decide(&context.scored);
        context.push_event(
            "consensus",
            format!(
                "{}: reached={} winner={} confidence={:.2}",
                self.consensus.name(),
                outcome.consensus_reached,
                outcome.best_provider.as_deref().unwrap_or("-"),
                outcome.confidence
            ),
        );
        context.outcome = Some(outcome);

        context
    }

    fn build_result(
        &self,
        context: PipelineContext,
        events: Vec<PipelineEvent>,
        execution_time: Duration,
        attempts: u32,
    ) -> OrchestrationResult {
        let failures: Vec<ProviderFailure> = context
            .execution_result
            .as_ref()
            .map(|result| {
                result
                    .failed()
                    .iter()
                    .map(|reply| ProviderFailure {
                        provider: reply.provider.clone(),
                        error: reply.error.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        match (context.error, context.outcome) {
            (None, Some(outcome)) => OrchestrationResult {
                success: true,
                best_content: outcome.best_content,
                best_provider: outcome.best_provider,
                best_score: outcome.best_score,
                consensus_reached: outcome.consensus_reached,
                consensus_confidence: outcome.confidence,
                agreement_count: outcome.agreement_count,
                total_models: outcome.total_models,
                dissenting_providers: outcome.dissenting_providers,
                all_scored: outcome.all_scored,
                execution_time,
                failure_reason: None,
                failures,
                attempts,
                pipeline_events: events,
            },
            (error, _) => OrchestrationResult {
                success: false,
                best_content: None,
                best_provider: None,
                best_score: 0.0,
                consensus_reached: false,
                consensus_confidence: 0.0,
                agreement_count: 0,
                total_models: context.scored.len(),
                dissenting_providers: Vec::new(),
                all_scored: context.scored,
                execution_time,
                failure_reason: error.or_else(|| Some("pipeline produced no outcome".to_string())),
                failures,
                attempts,
                pipeline_events: events,
            },
        }
    }
}

/// Fluent builder for [`Pipeline`].
pub struct PipelineBuilder {
    providers: Vec<Arc<dyn LlmProvider>>,
    validators: Vec<Arc<dyn Validator>>,
    scorer: Option<Arc<WeightedScorer>>,
    consensus: Option<Arc<dyn ConsensusStrategy>>,
    execution: Option<Arc<dyn ExecutionStrategy>>,
    enrichment: Option<PromptEnrichment>,
    retry: Option<Arc<dyn RetryPolicy>>,
    max_attempts: u32,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            validators: Vec::new(),
            scorer: None,
            consensus: None,
            execution: None,
            enrichment: None,
            retry: None,
            max_attempts: 3,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn scorer(mut self, scorer: WeightedScorer) -> Self {
        self.scorer = Some(Arc::new(scorer));
        self
    }

    pub fn consensus(mut self, consensus: Arc<dyn ConsensusStrategy>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn execution(mut self, execution: Arc<dyn ExecutionStrategy>) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn enrichment(mut self, enrichment: PromptEnrichment) -> Self {
        self.enrichment = Some(enrichment);
        self
    }

    /// Shorthand for enrichment that only sets a system prompt.
    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        let enrichment = self
            .enrichment
            .take()
            .unwrap_or_default()
            .system_prompt(system_prompt);
        self.enrichment = Some(enrichment);
        self
    }

    pub fn retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            providers: self.providers,
            validators: self.validators,
            scorer: self.scorer,
            consensus: self
                .consensus
                .unwrap_or_else(|| Arc::new(HighestScoreConsensus)),
            execution: self.execution.unwrap_or_else(|| Arc::new(ParallelExecution)),
            enrichment: self.enrichment,
            retry: self.retry.unwrap_or_else(|| RetryConfig::default().build()),
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
