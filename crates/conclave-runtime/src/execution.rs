//! Execution strategies: how the provider set is invoked.
//!
//! All three strategies share one signature and produce an
//! [`ExecutionResult`] whose reply map is keyed by provider name in
//! provider-list order. Failures are kept in the map alongside successes.

use async_trait::async_trait;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use conclave_core::{Reply, Validator};

use crate::providers::{LlmProvider, ProviderError};

/// Errors from execution strategies. Argument errors only; provider faults
/// are encoded in replies.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("at least one provider is required")]
    NoProviders,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Bitmask of failure classes that advance a fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackTriggers(u8);

impl FallbackTriggers {
    pub const NONE: Self = Self(0);
    pub const TIMEOUT: Self = Self(1);
    pub const VALIDATION_FAILURE: Self = Self(2);
    pub const EXCEPTION: Self = Self(4);
    pub const ALL: Self = Self(7);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for FallbackTriggers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for FallbackTriggers {
    fn default() -> Self {
        Self::ALL
    }
}

/// Replies from one strategy invocation, keyed by provider name in
/// provider-list order, plus the wall-clock span of the whole invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    replies: Vec<(String, Reply)>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reply under its provider name; a duplicate name is
    /// overwritten in place (last writer wins).
    pub fn insert(&mut self, reply: Reply) {
        match self.replies.iter().position(|(name, _)| *name == reply.provider) {
            Some(index) => self.replies[index].1 = reply,
            None => self.replies.push((reply.provider.clone(), reply)),
        }
    }

    pub fn get(&self, provider: &str) -> Option<&Reply> {
        self.replies
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, reply)| reply)
    }

    /// All replies in insertion order.
    pub fn replies(&self) -> &[(String, Reply)] {
        &self.replies
    }

    pub fn successful(&self) -> Vec<&Reply> {
        self.replies
            .iter()
            .map(|(_, reply)| reply)
            .filter(|reply| reply.success)
            .collect()
    }

    pub fn failed(&self) -> Vec<&Reply> {
        self.replies
            .iter()
            .map(|(_, reply)| reply)
            .filter(|reply| !reply.success)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

/// Policy for invoking a set of providers with one prompt.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke the providers. An empty provider slice is an argument error.
    async fn execute(
        &self,
        providers: &[Arc<dyn LlmProvider>],
        prompt: &str,
        system_prompt: Option<&str>,
        ctx: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError>;
}

fn reply_or_failure(
    provider: &dyn LlmProvider,
    outcome: Result<Reply, ProviderError>,
) -> Reply {
    match outcome {
        Ok(reply) => reply,
        // generate only errors on argument problems; surface them as
        // failed replies so the result map stays total
        Err(error) => Reply::failure(provider.name(), provider.model_id(), error.to_string()),
    }
}

/// Call every provider concurrently and wait for all of them.
///
/// One provider failing does not cancel its siblings; only the caller's
/// token does. Duration spans dispatch to last completion.
pub struct ParallelExecution;

#[async_trait]
impl ExecutionStrategy for ParallelExecution {
    fn name(&self) -> &str {
        "Parallel"
    }

    async fn execute(
        &self,
        providers: &[Arc<dyn LlmProvider>],
        prompt: &str,
        system_prompt: Option<&str>,
        ctx: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        if providers.is_empty() {
            return Err(ExecutionError::NoProviders);
        }

        let started = Instant::now();
        let mut join_set = JoinSet::new();
        for (index, provider) in providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let prompt = prompt.to_string();
            let system = system_prompt.map(str::to_string);
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let outcome = provider.generate(&prompt, system.as_deref(), &ctx).await;
                (index, reply_or_failure(provider.as_ref(), outcome))
            });
        }

        let mut slots: Vec<Option<Reply>> = (0..providers.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, reply)) => slots[index] = Some(reply),
                Err(error) => tracing::warn!(error = %error, "provider task join failed"),
            }
        }

        // reassemble in provider-list order
        let mut result = ExecutionResult::new();
        for slot in slots.into_iter().flatten() {
            result.insert(slot);
        }
        result.duration = started.elapsed();
        Ok(result)
    }
}

/// Call providers one at a time, stopping at the first success.
pub struct SequentialExecution;

#[async_trait]
impl ExecutionStrategy for SequentialExecution {
    fn name(&self) -> &str {
        "Sequential"
    }

    async fn execute(
        &self,
        providers: &[Arc<dyn LlmProvider>],
        prompt: &str,
        system_prompt: Option<&str>,
        ctx: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        if providers.is_empty() {
            return Err(ExecutionError::NoProviders);
        }

        let started = Instant::now();
        let mut result = ExecutionResult::new();
        for provider in providers {
            let outcome = provider.generate(prompt, system_prompt, ctx).await;
            let reply = reply_or_failure(provider.as_ref(), outcome);
            let succeeded = reply.success;
            result.insert(reply);
            if succeeded {
                break;
            }
        }
        result.duration = started.elapsed();
        Ok(result)
    }
}

/// Sequential execution gated by a trigger bitmask.
///
/// A failure advances the chain only when its class (timeout or exception)
/// is armed; with validators attached and the validation trigger armed, a
/// successful reply any validator rejects also advances. A non-triggering
/// failure terminates the chain.
pub struct FallbackExecution {
    triggers: FallbackTriggers,
    validators: Vec<Arc<dyn Validator>>,
}

impl FallbackExecution {
    pub fn new(triggers: FallbackTriggers) -> Self {
        Self {
            triggers,
            validators: Vec::new(),
        }
    }

    pub fn with_validators(mut self, validators: Vec<Arc<dyn Validator>>) -> Self {
        self.validators = validators;
        self
    }

    async fn rejected_by_validator(&self, content: &str, ctx: &CancellationToken) -> Option<String> {
        for validator in &self.validators {
            let outcome = validator.validate(content, ctx).await;
            if !outcome.valid {
                return Some(outcome.validator);
            }
        }
        None
    }
}

#[async_trait]
impl ExecutionStrategy for FallbackExecution {
    fn name(&self) -> &str {
        "Fallback"
    }

    async fn execute(
        &self,
        providers: &[Arc<dyn LlmProvider>],
        prompt: &str,
        system_prompt: Option<&str>,
        ctx: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        if providers.is_empty() {
            return Err(ExecutionError::NoProviders);
        }

        let started = Instant::now();
        let mut result = ExecutionResult::new();
        for provider in providers {
            let outcome = provider.generate(prompt, system_prompt, ctx).await;
            let reply = reply_or_failure(provider.as_ref(), outcome);

            if reply.success {
                let rejected = if self.triggers.contains(FallbackTriggers::VALIDATION_FAILURE) {
                    self.rejected_by_validator(&reply.content, ctx).await
                } else {
                    None
                };
                match rejected {
                    Some(validator) => {
                        tracing::warn!(
                            provider = provider.name(),
                            validator = %validator,
                            "reply rejected, advancing fallback chain"
                        );
                        result.insert(reply);
                    }
                    None => {
                        result.insert(reply);
                        break;
                    }
                }
            } else {
                let reason = reply.error.clone().unwrap_or_default();
                let timed_out = reason.to_lowercase().contains("timed out");
                let advance = if timed_out {
                    self.triggers.contains(FallbackTriggers::TIMEOUT)
                } else {
                    self.triggers.contains(FallbackTriggers::EXCEPTION)
                };
                result.insert(reply);
                if !advance {
                    tracing::warn!(
                        provider = provider.name(),
                        reason = %reason,
                        "failure class not armed, terminating fallback chain"
                    );
                    break;
                }
            }
        }
        result.duration = started.elapsed();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::providers::RawCompletion;
    use conclave_core::validation::ContentFilterValidator;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Script {
        Succeed(&'static str),
        Fail(&'static str),
        Slow(&'static str, Duration),
    }

    struct ScriptedProvider {
        name: String,
        script: Script,
        calls: AtomicU32,
        config: ModelConfig,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script,
                calls: AtomicU32::new(0),
                config: ModelConfig::new(name, "test-model"),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model_id(&self) -> &str {
            "test-model"
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn config(&self) -> &ModelConfig {
            &self.config
        }

        async fn send_request(
            &self,
            _prompt: &str,
            _system_prompt: Option<&str>,
        ) -> Result<RawCompletion, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Succeed(content) => Ok(RawCompletion {
                    content: content.to_string(),
                    model: "test-model".to_string(),
                    prompt_tokens: 5,
                    completion_tokens: 5,
                }),
                Script::Fail(reason) => Err(ProviderError::Api {
                    status: 500,
                    message: reason.to_string(),
                }),
                Script::Slow(content, delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(RawCompletion {
                        content: content.to_string(),
                        model: "test-model".to_string(),
                        prompt_tokens: 5,
                        completion_tokens: 5,
                    })
                }
            }
        }
    }

    fn calls(provider: &Arc<ScriptedProvider>) -> u32 {
        provider.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_empty_provider_list_is_an_error() {
        let ctx = CancellationToken::new();
        for strategy in [
            Box::new(ParallelExecution) as Box<dyn ExecutionStrategy>,
            Box::new(SequentialExecution),
            Box::new(FallbackExecution::new(FallbackTriggers::ALL)),
        ] {
            let result = strategy.execute(&[], "hi", None, &ctx).await;
            assert!(matches!(result, Err(ExecutionError::NoProviders)));
        }
    }

    #[tokio::test]
    async fn test_parallel_calls_every_provider_once() {
        let a = ScriptedProvider::new("a", Script::Succeed("alpha"));
        let b = ScriptedProvider::new("b", Script::Fail("boom"));
        let c = ScriptedProvider::new("c", Script::Slow("gamma", Duration::from_millis(20)));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![a.clone(), b.clone(), c.clone()];

        let result = ParallelExecution
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls(&a), 1);
        assert_eq!(calls(&b), 1);
        assert_eq!(calls(&c), 1);
        assert_eq!(result.len(), 3);
        // provider-list order regardless of completion order
        let names: Vec<&str> = result.replies().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(result.successful().len(), 2);
        assert_eq!(result.failed().len(), 1);
        assert_eq!(
            result.successful().len() + result.failed().len(),
            result.len()
        );
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_success() {
        let a = ScriptedProvider::new("a", Script::Fail("down"));
        let b = ScriptedProvider::new("b", Script::Succeed("answer"));
        let c = ScriptedProvider::new("c", Script::Succeed("unused"));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![a.clone(), b.clone(), c.clone()];

        let result = SequentialExecution
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls(&a), 1);
        assert_eq!(calls(&b), 1);
        assert_eq!(calls(&c), 0);
        assert_eq!(result.len(), 2);
        assert!(result.get("a").unwrap().error.is_some());
        assert!(result.get("b").unwrap().success);
    }

    #[tokio::test]
    async fn test_fallback_advances_on_armed_exception() {
        let p1 = ScriptedProvider::new("p1", Script::Fail("boom"));
        let p2 = ScriptedProvider::new("p2", Script::Succeed("saved"));
        let p3 = ScriptedProvider::new("p3", Script::Succeed("unused"));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![p1.clone(), p2.clone(), p3.clone()];

        let result = FallbackExecution::new(FallbackTriggers::EXCEPTION)
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<&str> = result.replies().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2"]);
        assert_eq!(result.successful().len(), 1);
        assert_eq!(result.successful()[0].provider, "p2");
        assert_eq!(calls(&p3), 0);
    }

    #[tokio::test]
    async fn test_fallback_unarmed_failure_terminates() {
        let p1 = ScriptedProvider::new("p1", Script::Fail("boom"));
        let p2 = ScriptedProvider::new("p2", Script::Succeed("never"));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![p1.clone(), p2.clone()];

        let result = FallbackExecution::new(FallbackTriggers::TIMEOUT)
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(calls(&p2), 0);
    }

    #[tokio::test]
    async fn test_fallback_validation_trigger_advances() {
        let p1 = ScriptedProvider::new("p1", Script::Succeed("the wrong thing"));
        let p2 = ScriptedProvider::new("p2", Script::Succeed("contains the magic word"));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![p1.clone(), p2.clone()];

        let validator: Arc<dyn Validator> =
            Arc::new(ContentFilterValidator::new().must_contain("magic"));
        let strategy = FallbackExecution::new(FallbackTriggers::ALL)
            .with_validators(vec![validator]);

        let result = strategy
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        // both replies succeeded at the wire level; the second won
        assert_eq!(result.successful().len(), 2);
        assert_eq!(calls(&p2), 1);
    }

    #[tokio::test]
    async fn test_fallback_timeout_detected_by_reason_substring() {
        // a failure whose reason says "timed out" classifies as timeout
        struct TimeoutProvider {
            config: ModelConfig,
        }

        #[async_trait]
        impl LlmProvider for TimeoutProvider {
            fn name(&self) -> &str {
                "slowpoke"
            }
            fn model_id(&self) -> &str {
                "test-model"
            }
            fn is_configured(&self) -> bool {
                true
            }
            fn config(&self) -> &ModelConfig {
                &self.config
            }
            async fn send_request(
                &self,
                _prompt: &str,
                _system_prompt: Option<&str>,
            ) -> Result<RawCompletion, ProviderError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                unreachable!("deadline fires first")
            }
        }

        let slow: Arc<dyn LlmProvider> = Arc::new(TimeoutProvider {
            config: ModelConfig::new("slowpoke", "test-model")
                .with_timeout(Duration::from_millis(10)),
        });
        let rescue = ScriptedProvider::new("rescue", Script::Succeed("made it"));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![slow, rescue.clone()];

        let result = FallbackExecution::new(FallbackTriggers::TIMEOUT)
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert!(result.get("slowpoke").unwrap().error.as_deref().unwrap().contains("timed out"));
        assert!(result.get("rescue").unwrap().success);
    }

    #[tokio::test]
    async fn test_parallel_duration_spans_slowest() {
        let fast = ScriptedProvider::new("fast", Script::Succeed("quick"));
        let slow = ScriptedProvider::new("slow", Script::Slow("late", Duration::from_millis(40)));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![fast.clone(), slow.clone()];

        let result = ParallelExecution
            .execute(&providers, "hi", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.duration >= Duration::from_millis(40));
    }

    #[test]
    fn test_trigger_bitmask() {
        let combined = FallbackTriggers::TIMEOUT | FallbackTriggers::EXCEPTION;
        assert!(combined.contains(FallbackTriggers::TIMEOUT));
        assert!(combined.contains(FallbackTriggers::EXCEPTION));
        assert!(!combined.contains(FallbackTriggers::VALIDATION_FAILURE));
        assert_eq!(combined.bits(), 5);
        assert_eq!(FallbackTriggers::ALL.bits(), 7);
        assert!(FallbackTriggers::ALL.contains(combined));
    }
}
