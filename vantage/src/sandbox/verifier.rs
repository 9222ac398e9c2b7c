//! Drives one sandbox session per verification and folds its event stream
//! into a [`RuntimeTestResult`].

use super::{
    EvalStrategy, EventPoll, PhaseMachine, RuntimeTestResult, SandboxEvent, SandboxPage,
    SandboxPhase, SandboxRuntime, SandboxTracker, SessionGuard, VerificationMode,
};
use crate::config::SandboxConfig;
use crate::error::{VantageError, VantageResult};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vantage_source::{lower_jsx, prepare_for_eval, CandidateSource, Stage};

/// Cap on recorded messages per run; a render loop can flood the stream.
const MAX_MESSAGES: usize = 20;

pub struct SandboxVerifier {
    runtime: Arc<dyn SandboxRuntime>,
    config: SandboxConfig,
    tracker: SandboxTracker,
}

/// Accumulated state of one run.
struct RunState {
    machine: PhaseMachine,
    errors: Vec<String>,
    warnings: Vec<String>,
    visible: bool,
    strategy: Option<EvalStrategy>,
    complete: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            machine: PhaseMachine::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            visible: false,
            strategy: None,
            complete: false,
        }
    }

    fn advance(&mut self, phase: SandboxPhase) {
        if let Err(e) = self.machine.advance(phase) {
            debug!("Ignoring out-of-order sandbox event: {}", e);
        }
    }

    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_MESSAGES && !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    fn push_warning(&mut self, message: String) {
        if self.warnings.len() < MAX_MESSAGES && !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn observe(&mut self, event: SandboxEvent) {
        match event {
            SandboxEvent::Loading => self.advance(SandboxPhase::Loading),
            SandboxEvent::Libraries { runtime } => {
                debug!(runtime = %runtime, "Sandbox runtime loaded");
                self.advance(SandboxPhase::WaitingForLibraries);
            }
            SandboxEvent::Executing { strategy } => {
                self.strategy = Some(strategy);
                self.advance(SandboxPhase::Executing);
            }
            SandboxEvent::StrategyFallback { reason } => {
                warn!(reason = %reason, "Strict evaluation failed; retrying in sloppy mode");
                self.push_warning(format!(
                    "Strict evaluation failed, fell back to sloppy mode: {}",
                    reason
                ));
            }
            SandboxEvent::Error { message } => self.push_error(message),
            SandboxEvent::Warning { message } => self.push_warning(message),
            SandboxEvent::Rendered { visible, .. } => self.visible = visible,
            SandboxEvent::Complete => self.complete = true,
        }
    }

    /// Outcome phase for a run that signalled completion.
    fn settle(&mut self) -> SandboxPhase {
        if self.errors.is_empty() && !self.visible {
            self.push_error("App rendered no visible content".to_string());
        }
        if self.errors.is_empty() && self.machine.current() != SandboxPhase::Executing {
            self.push_error("Sandbox completed without executing the component".to_string());
        }
        if self.errors.is_empty() {
            SandboxPhase::Succeeded
        } else {
            SandboxPhase::Failed
        }
    }

    fn finish(mut self, started: Instant) -> RuntimeTestResult {
        let phase = self.machine.outcome().unwrap_or(SandboxPhase::Failed);
        self.advance(SandboxPhase::TornDown);
        RuntimeTestResult {
            success: phase == SandboxPhase::Succeeded,
            errors: self.errors,
            warnings: self.warnings,
            elapsed_ms: started.elapsed().as_millis() as u64,
            has_visible_content: self.visible,
            phase,
            strategy: self.strategy,
        }
    }
}

impl SandboxVerifier {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: SandboxConfig) -> Self {
        Self {
            runtime,
            config,
            tracker: SandboxTracker::new(),
        }
    }

    /// Verifier backed by a child `node` process per run.
    pub fn node(config: SandboxConfig) -> Self {
        let runtime = Arc::new(super::NodeSandbox::new(config.clone()));
        Self::new(runtime, config)
    }

    pub fn tracker(&self) -> &SandboxTracker {
        &self.tracker
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn timeout(&self, mode: VerificationMode) -> Duration {
        Duration::from_millis(match mode {
            VerificationMode::Validation => self.config.validation_timeout_ms,
            VerificationMode::Live => self.config.live_timeout_ms,
        })
    }

    /// Execute a validated candidate in a fresh sandbox session.
    ///
    /// Runtime problems are reported in the returned result; the only error
    /// is a candidate that has not passed validation.
    pub async fn verify(
        &self,
        candidate: &CandidateSource,
        mode: VerificationMode,
    ) -> VantageResult<RuntimeTestResult> {
        if candidate.stage() != Stage::Validated {
            return Err(VantageError::Validation(format!(
                "Only validated candidates can be executed (stage: {})",
                candidate.stage()
            )));
        }
        Ok(self.run(candidate.text(), mode).await)
    }

    async fn run(&self, text: &str, mode: VerificationMode) -> RuntimeTestResult {
        let started = Instant::now();
        let mut state = RunState::new();

        let script = match lower_jsx(&prepare_for_eval(text)) {
            Ok(script) => script,
            Err(e) => {
                state.push_error(format!("SyntaxError: {}", e));
                state.advance(SandboxPhase::Failed);
                return state.finish(started);
            }
        };

        let page = SandboxPage {
            script,
            mode,
            settle_ms: self.config.settle_ms,
        };
        let lease = self.tracker.lease();
        let session = match self.runtime.launch(page).await {
            Ok(session) => session,
            Err(e) => {
                drop(lease);
                warn!("Sandbox launch failed: {}", e);
                state.push_error(format!("Sandbox launch failed: {}", e));
                state.advance(SandboxPhase::Failed);
                return state.finish(started);
            }
        };
        let session_id = session.id.clone();
        let mut guard = SessionGuard::new(session, lease);
        state.advance(SandboxPhase::Loading);

        let limit = self.timeout(mode);
        let deadline = Instant::now() + limit;
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            ticker.tick().await;
            let mut closed = false;
            if let Some(session) = guard.session() {
                loop {
                    match session.poll_event() {
                        EventPoll::Ready(event) => state.observe(event),
                        EventPoll::Pending => break,
                        EventPoll::Closed => {
                            closed = true;
                            break;
                        }
                    }
                }
            } else {
                closed = true;
            }

            if state.complete {
                break state.settle();
            }
            if closed {
                state.push_error("Sandbox exited before rendering completed".to_string());
                break SandboxPhase::Failed;
            }
            if Instant::now() >= deadline {
                state.push_error(format!(
                    "Execution timed out after {} ms: possible infinite loop or pending async work",
                    limit.as_millis()
                ));
                break SandboxPhase::TimedOut;
            }
        };
        state.advance(outcome);

        if let Err(e) = guard.teardown().await {
            warn!(session = %session_id, "Sandbox teardown failed: {}", e);
            state.push_warning(format!("Sandbox teardown failed: {}", e));
        }

        let result = state.finish(started);
        info!(
            session = %session_id,
            runtime = self.runtime.name(),
            phase = %result.phase,
            elapsed_ms = result.elapsed_ms,
            errors = result.errors.len(),
            "Sandbox verification finished"
        );
        result
    }
}
