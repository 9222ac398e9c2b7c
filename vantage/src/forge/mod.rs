//! Retry/escalation controller
//!
//! [`Forge`] runs the attempt loop for create, fix and update requests:
//! prompt, generate, extract, raw validation, repair, validation and an
//! optional sandbox run. Failures feed the next attempt's prompt. Create
//! requests that exhaust their attempts get a deterministic fallback
//! component; fix and update requests fail with the last error.

pub mod fallback;
pub mod metrics;

pub use fallback::fallback_component;
pub use metrics::{MetricsSnapshot, StageMetrics, StageTally};

use crate::app::AppMetadata;
use crate::config::VantageConfig;
use crate::error::{FailureKind, VantageError, VantageResult};
use crate::llm::GenerationBackend;
use crate::prompt::{build_prompt, metadata_prompt, PriorAttempt};
use crate::request::{FlowKind, GenerationRequest};
use crate::sandbox::{ErrorRefiner, RuntimeTestResult, SandboxVerifier, VerificationMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vantage_source::{
    extract_code_block, repair, repair_candidate, validate, validate_raw, AppPreamble,
    CandidateSource, FixReport, ValidationOutcome,
};

const EXCERPT_CHARS: usize = 240;

/// Where in an attempt a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Generation,
    RawValidation,
    Validation,
    Execution,
}

impl AttemptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStage::Generation => "generation",
            AttemptStage::RawValidation => "raw_validation",
            AttemptStage::Validation => "validation",
            AttemptStage::Execution => "execution",
        }
    }
}

impl std::fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub stage: AttemptStage,
    pub kind: FailureKind,
    pub message: String,
    /// Leading part of the offending code, when there was code
    pub excerpt: Option<String>,
}

/// Accepted (or fallback) component plus everything learned producing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeOutcome {
    pub source: CandidateSource,
    pub is_fallback: bool,
    /// Failed attempts, in order
    pub attempts: Vec<AttemptRecord>,
    pub fix_report: FixReport,
    pub validation: Option<ValidationOutcome>,
    pub runtime: Option<RuntimeTestResult>,
    pub preamble: AppPreamble,
}

impl ForgeOutcome {
    pub fn code(&self) -> &str {
        self.source.text()
    }

    /// Number of backend calls made for the request
    pub fn attempts_used(&self) -> u32 {
        let failed = self.attempts.len() as u32;
        if self.is_fallback {
            failed
        } else {
            failed + 1
        }
    }
}

/// Per-request state: pacing clock, failure history and last results.
struct Invocation {
    last_request: Option<Instant>,
    history: Vec<PriorAttempt>,
    records: Vec<AttemptRecord>,
    fix_report: FixReport,
    validation: Option<ValidationOutcome>,
    runtime: Option<RuntimeTestResult>,
}

impl Invocation {
    fn new() -> Self {
        Self {
            last_request: None,
            history: Vec::new(),
            records: Vec::new(),
            fix_report: FixReport::default(),
            validation: None,
            runtime: None,
        }
    }

    /// Wait until `interval` has passed since the previous backend call.
    async fn pace(&mut self, interval: Duration) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < interval {
                let wait = interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Pacing generation request");
                tokio::time::sleep(wait).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn fail(
        &mut self,
        attempt: u32,
        stage: AttemptStage,
        kind: FailureKind,
        message: String,
        code: Option<&str>,
        guidance: Option<String>,
    ) {
        let excerpt = code.map(excerpt);
        warn!(
            attempt,
            stage = %stage,
            kind = %kind,
            message = %message,
            excerpt = excerpt.as_deref().unwrap_or(""),
            "Generation attempt failed"
        );
        self.history.push(PriorAttempt {
            attempt,
            code: code.map(str::to_string),
            error: message.clone(),
            guidance,
        });
        self.records.push(AttemptRecord {
            attempt,
            stage,
            kind,
            message,
            excerpt,
        });
    }

    fn finish(self, source: CandidateSource, is_fallback: bool) -> ForgeOutcome {
        let preamble = AppPreamble::parse(source.text());
        ForgeOutcome {
            source,
            is_fallback,
            attempts: self.records,
            fix_report: self.fix_report,
            validation: self.validation,
            runtime: self.runtime,
            preamble,
        }
    }
}

fn excerpt(code: &str) -> String {
    let mut chars = code.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

pub struct Forge {
    config: VantageConfig,
    backend: Arc<dyn GenerationBackend>,
    verifier: Option<SandboxVerifier>,
    refiner: ErrorRefiner,
    metrics: StageMetrics,
}

impl Forge {
    pub fn new(config: VantageConfig, backend: Arc<dyn GenerationBackend>) -> VantageResult<Self> {
        config.check()?;
        Ok(Self {
            config,
            backend,
            verifier: None,
            refiner: ErrorRefiner::new(),
            metrics: StageMetrics::new(),
        })
    }

    /// Run accepted candidates through the sandbox before returning them.
    pub fn with_verifier(mut self, verifier: SandboxVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &VantageConfig {
        &self.config
    }

    pub fn verifier(&self) -> Option<&SandboxVerifier> {
        self.verifier.as_ref()
    }

    /// Per-stage outcomes across every request served so far.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn create(&self, description: &str) -> VantageResult<ForgeOutcome> {
        self.run(GenerationRequest::create(description)).await
    }

    pub async fn fix(
        &self,
        description: &str,
        source: &str,
        errors: Vec<String>,
    ) -> VantageResult<ForgeOutcome> {
        self.run(GenerationRequest::fix(description, source, errors))
            .await
    }

    pub async fn update(&self, source: &str, change_request: &str) -> VantageResult<ForgeOutcome> {
        self.run(GenerationRequest::update(source, change_request))
            .await
    }

    /// Drive the attempt loop for one request.
    pub async fn run(&self, request: GenerationRequest) -> VantageResult<ForgeOutcome> {
        let flow = request.flow();
        let max_attempts = self.config.retry.attempts_for(flow);
        let mut ctx = Invocation::new();

        info!(
            flow = %flow,
            model = self.backend.model(),
            max_attempts,
            "Starting generation"
        );

        for attempt in 1..=max_attempts {
            let prompt = if self.config.retry.send_error_feedback {
                build_prompt(&request, &ctx.history)
            } else {
                build_prompt(&request, &[])
            };

            ctx.pace(self.config.retry.min_request_interval()).await;
            let completion = match self
                .backend
                .generate(&prompt, self.config.llm.code_timeout())
                .await
            {
                Ok(completion) => completion,
                Err(failure) => {
                    ctx.fail(
                        attempt,
                        AttemptStage::Generation,
                        failure.kind(),
                        failure.to_string(),
                        None,
                        None,
                    );
                    self.metrics.failed(AttemptStage::Generation);
                    continue;
                }
            };
            self.metrics.passed(AttemptStage::Generation);
            debug!(
                attempt,
                prompt_hash = %completion.prompt_hash,
                response_hash = %completion.response_hash,
                latency_ms = completion.latency_ms as u64,
                total_tokens = completion.total_tokens,
                "Received completion"
            );

            let code = extract_code_block(&completion.text);
            let raw = validate_raw(&code);
            if !raw.valid {
                ctx.fail(
                    attempt,
                    AttemptStage::RawValidation,
                    FailureKind::MalformedResponse,
                    raw.error_messages().join("; "),
                    Some(code.as_str()),
                    None,
                );
                self.metrics.failed(AttemptStage::RawValidation);
                continue;
            }
            self.metrics.passed(AttemptStage::RawValidation);

            let repaired = repair_candidate(&CandidateSource::raw(code))?;
            self.metrics.repaired(repaired.report.total());
            if !repaired.report.is_empty() {
                debug!(attempt, fixes = %repaired.report.summary(), "Applied repairs");
            }
            ctx.fix_report.merge(repaired.report);

            let validation = validate(repaired.source.text());
            let accepted = validation.valid;
            let messages = validation.error_messages();
            ctx.validation = Some(validation);
            if !accepted {
                ctx.fail(
                    attempt,
                    AttemptStage::Validation,
                    FailureKind::Validation,
                    messages.join("; "),
                    Some(repaired.source.text()),
                    None,
                );
                self.metrics.failed(AttemptStage::Validation);
                continue;
            }
            self.metrics.passed(AttemptStage::Validation);
            let validated = repaired.source.promote()?;

            if let Some(verifier) = &self.verifier {
                let result = verifier
                    .verify(&validated, VerificationMode::Validation)
                    .await?;
                let passed = result.success;
                let errors = result.errors.join("\n");
                let guidance = result
                    .first_error()
                    .and_then(|e| self.refiner.classify(e).suggested_fix);
                ctx.runtime = Some(result);
                if !passed {
                    ctx.fail(
                        attempt,
                        AttemptStage::Execution,
                        FailureKind::Runtime,
                        errors,
                        Some(validated.text()),
                        guidance,
                    );
                    self.metrics.failed(AttemptStage::Execution);
                    continue;
                }
                self.metrics.passed(AttemptStage::Execution);
            }

            self.metrics.accepted(attempt);
            info!(flow = %flow, attempt, "Generation accepted");
            return Ok(ctx.finish(validated, false));
        }

        self.exhausted(&request, ctx, max_attempts)
    }

    fn exhausted(
        &self,
        request: &GenerationRequest,
        ctx: Invocation,
        max_attempts: u32,
    ) -> VantageResult<ForgeOutcome> {
        if request.flow() == FlowKind::Create && self.config.retry.use_fallback {
            warn!(
                attempts = max_attempts,
                "All generation attempts failed; returning fallback component"
            );
            self.metrics.fell_back();
            let repaired = repair(&fallback_component(request.description()));
            let source = repaired.source.promote()?;
            return Ok(ctx.finish(source, true));
        }

        let (kind, message) = match ctx.records.last() {
            Some(record) => (record.kind, record.message.clone()),
            None => (
                FailureKind::Configuration,
                "No attempts were made".to_string(),
            ),
        };
        Err(VantageError::RepairExhausted {
            kind,
            message,
            attempts: max_attempts,
        })
    }

    /// Ask the backend for display metadata for a description.
    pub async fn suggest_metadata(&self, description: &str) -> VantageResult<AppMetadata> {
        let completion = self
            .backend
            .generate(&metadata_prompt(description), self.config.llm.metadata_timeout())
            .await
            .map_err(|failure| match failure {
                crate::error::GenerationFailure::Timeout { limit_ms } => VantageError::Timeout {
                    stage: "metadata".to_string(),
                    limit_ms,
                },
                other => other.into(),
            })?;
        AppMetadata::from_response(&completion.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationFailure;
    use crate::llm::StubBackend;
    use crate::sandbox::{ScriptedRun, ScriptedSandbox};
    use pretty_assertions::assert_eq;

    const GOOD: &str = "```jsx\n// APP_NAME: Counter\n// APP_ICON: 🔢\n// APP_DESCRIPTION: Counts\nfunction App() {\n  const [n, setN] = React.useState(0);\n  return <button onClick={() => setN(n + 1)}>{n}</button>;\n}\n```";

    fn quick_config() -> VantageConfig {
        let mut config = VantageConfig::default();
        config.sandbox.validation_timeout_ms = 200;
        config.sandbox.poll_interval_ms = 10;
        config.sandbox.settle_ms = 0;
        config
    }

    fn forge(stub: Arc<StubBackend>) -> Forge {
        Forge::new(quick_config(), stub).unwrap()
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let stub = Arc::new(StubBackend::always(GOOD));
        let forge = forge(stub.clone());
        let outcome = forge.create("a counter").await.unwrap();
        assert!(!outcome.is_fallback);
        assert_eq!(outcome.attempts_used(), 1);
        assert_eq!(outcome.preamble.name.as_deref(), Some("Counter"));
        assert_eq!(stub.calls(), 1);
        let metrics = forge.metrics();
        assert_eq!(metrics.accepted_first_attempt, 1);
        assert_eq!(metrics.execution.reached(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_retried_with_history() {
        let stub = Arc::new(StubBackend::new(vec![
            Err(GenerationFailure::Transport("connection reset".into())),
            Ok(GOOD.to_string()),
        ]));
        let forge = forge(stub.clone());
        let outcome = forge.create("a counter").await.unwrap();
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].kind, FailureKind::Transport);
        assert_eq!(outcome.attempts[0].stage, AttemptStage::Generation);
        let prompts = stub.prompts();
        assert!(!prompts[0].contains("--- Attempt #1 ---"));
        assert!(prompts[1].contains("--- Attempt #1 ---"));
        assert!(prompts[1].contains("connection reset"));
        let metrics = forge.metrics();
        assert_eq!(metrics.accepted_after_retry, 1);
        assert_eq!(metrics.generation, StageTally { passed: 1, failed: 1 });
        assert_eq!(metrics.bottleneck(), Some(AttemptStage::Generation));
    }

    #[tokio::test]
    async fn feedback_can_be_disabled() {
        let stub = Arc::new(StubBackend::new(vec![
            Ok("```jsx\nfunction App() {\n  return (\n```".to_string()),
            Ok(GOOD.to_string()),
        ]));
        let mut config = quick_config();
        config.retry.send_error_feedback = false;
        let forge = Forge::new(config, stub.clone()).unwrap();
        forge.create("a counter").await.unwrap();
        assert!(!stub.prompts()[1].contains("Failure History"));
    }

    #[tokio::test]
    async fn create_exhaustion_returns_fallback() {
        let stub = Arc::new(StubBackend::failing(
            GenerationFailure::Timeout { limit_ms: 120_000 },
            3,
        ));
        let forge = forge(stub.clone());
        let outcome = forge.create("a habit tracker").await.unwrap();
        assert!(outcome.is_fallback);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(stub.calls(), 3);
        assert!(validate(outcome.code()).valid);
        assert_eq!(outcome.source.stage(), vantage_source::Stage::Validated);
        let metrics = forge.metrics();
        assert_eq!(metrics.fallbacks, 1);
        assert_eq!(metrics.accepted(), 0);
        assert_eq!(metrics.attempts(), 3);
    }

    #[tokio::test]
    async fn fix_exhaustion_reports_last_failure() {
        let stub = Arc::new(StubBackend::always("I cannot help with that."));
        let forge = forge(stub.clone());
        let err = forge
            .fix("a counter", "function App() {}", vec!["TypeError: x".into()])
            .await
            .unwrap_err();
        match err {
            VantageError::RepairExhausted {
                kind,
                attempts,
                message,
            } => {
                assert_eq!(kind, FailureKind::MalformedResponse);
                assert_eq!(attempts, 2);
                assert!(message.contains("No code detected"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn update_exhaustion_is_an_error_even_with_fallback() {
        let stub = Arc::new(StubBackend::always(
            "```jsx\nfunction App() {\n  eval('1');\n  return <p>x</p>;\n}\n```",
        ));
        let forge = forge(stub);
        let err = forge
            .update("function App() { return <p>x</p>; }", "add a title")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Validation));
    }

    #[tokio::test]
    async fn runtime_failure_feeds_guidance_into_next_prompt() {
        let stub = Arc::new(StubBackend::always(GOOD));
        let runtime = Arc::new(ScriptedSandbox::new(vec![
            ScriptedRun::runtime_error("ReferenceError: useState is not defined"),
            ScriptedRun::success(),
        ]));
        let config = quick_config();
        let verifier = SandboxVerifier::new(runtime.clone(), config.sandbox.clone());
        let forge = Forge::new(config, stub.clone())
            .unwrap()
            .with_verifier(verifier);

        let outcome = forge.create("a counter").await.unwrap();
        assert!(!outcome.is_fallback);
        assert_eq!(outcome.attempts[0].kind, FailureKind::Runtime);
        assert!(outcome.runtime.as_ref().unwrap().success);
        assert!(stub.prompts()[1].contains("**Fix guidance**: Call the hook as `React.useState`"));
        assert_eq!(runtime.teardowns(), 2);
        assert_eq!(forge.verifier().unwrap().tracker().live(), 0);
    }

    #[tokio::test]
    async fn requests_are_paced() {
        let stub = Arc::new(StubBackend::new(vec![
            Err(GenerationFailure::MalformedResponse("empty".into())),
            Ok(GOOD.to_string()),
        ]));
        let mut config = quick_config();
        config.retry.min_request_interval_ms = 150;
        let forge = Forge::new(config, stub).unwrap();
        let started = std::time::Instant::now();
        forge.create("a counter").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn metadata_is_parsed() {
        let stub = Arc::new(StubBackend::always(
            r#"{"name": "Habit Tracker", "icon": "✅", "description": "Track habits"}"#,
        ));
        let metadata = forge(stub).suggest_metadata("track habits").await.unwrap();
        assert_eq!(metadata.name, "Habit Tracker");
    }

    #[tokio::test]
    async fn zero_attempts_is_a_configuration_error() {
        let mut config = quick_config();
        config.retry.create_attempts = 0;
        let err = Forge::new(config, Arc::new(StubBackend::offline()))
            .err()
            .unwrap();
        assert_eq!(err.kind(), Some(FailureKind::Configuration));
    }
}
