//! Sandboxed execution of generated components
//!
//! A [`SandboxRuntime`] allocates one disposable execution context per
//! verification. The [`verifier::SandboxVerifier`] drives it, polls its
//! event stream and guarantees teardown on every exit path.

pub mod diagnostics;
pub mod harness;
pub mod node;
pub mod scripted;
pub mod verifier;

use crate::error::{VantageError, VantageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use diagnostics::{DiagnosticClass, ErrorRefiner, RuntimeDiagnostic};
pub use harness::EmbedDocument;
pub use node::NodeSandbox;
pub use scripted::{ScriptedSandbox, ScriptedRun};
pub use verifier::SandboxVerifier;

/// Lifecycle of one verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPhase {
    Created,
    Loading,
    WaitingForLibraries,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
    TornDown,
}

impl SandboxPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxPhase::Created => "created",
            SandboxPhase::Loading => "loading",
            SandboxPhase::WaitingForLibraries => "waiting_for_libraries",
            SandboxPhase::Executing => "executing",
            SandboxPhase::Succeeded => "succeeded",
            SandboxPhase::Failed => "failed",
            SandboxPhase::TimedOut => "timed_out",
            SandboxPhase::TornDown => "torn_down",
        }
    }

    /// Outcome phases; the only phases teardown may follow.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            SandboxPhase::Succeeded | SandboxPhase::Failed | SandboxPhase::TimedOut
        )
    }

    pub fn can_transition_to(&self, next: SandboxPhase) -> bool {
        use SandboxPhase::*;
        match (self, next) {
            (Created, Loading) => true,
            (Loading, WaitingForLibraries) | (Loading, Executing) => true,
            (WaitingForLibraries, Executing) => true,
            (Executing, Succeeded) => true,
            (Created | Loading | WaitingForLibraries | Executing, Failed | TimedOut) => true,
            (Succeeded | Failed | TimedOut, TornDown) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SandboxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated phase sequence for one attempt.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    history: Vec<SandboxPhase>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            history: vec![SandboxPhase::Created],
        }
    }

    pub fn current(&self) -> SandboxPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(SandboxPhase::Created)
    }

    pub fn history(&self) -> &[SandboxPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: SandboxPhase) -> VantageResult<()> {
        let current = self.current();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(VantageError::Sandbox(format!(
                "Invalid sandbox transition {} -> {}",
                current, next
            )));
        }
        self.history.push(next);
        Ok(())
    }

    /// Last outcome phase reached, if any.
    pub fn outcome(&self) -> Option<SandboxPhase> {
        self.history.iter().rev().copied().find(|p| p.is_outcome())
    }
}

/// Which wall-clock bound applies to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Test run before an app is accepted
    Validation,
    /// Run backing a live embedding
    Live,
}

/// Evaluation strategy actually used by the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStrategy {
    Strict,
    Sloppy,
}

/// Line-delimited events streamed by a running sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxEvent {
    Loading,
    /// The UI runtime finished loading inside the context
    Libraries {
        runtime: String,
    },
    Executing {
        strategy: EvalStrategy,
    },
    StrategyFallback {
        reason: String,
    },
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
    Rendered {
        visible: bool,
        #[serde(default)]
        html_length: usize,
    },
    Complete,
}

/// The page a runtime loads: plain JavaScript defining `App`.
#[derive(Debug, Clone)]
pub struct SandboxPage {
    pub script: String,
    pub mode: VerificationMode,
    /// Time given to effects and timers after the first render
    pub settle_ms: u64,
}

/// Result of one sandboxed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeTestResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
    pub has_visible_content: bool,
    /// Outcome phase reached before teardown
    pub phase: SandboxPhase,
    pub strategy: Option<EvalStrategy>,
}

impl RuntimeTestResult {
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

/// Control handle a runtime hands back with each session.
#[async_trait]
pub trait SessionControl: Send {
    /// Release every resource held by the session.
    async fn teardown(&mut self) -> VantageResult<()>;

    /// Synchronous best-effort release, used when a session is dropped
    /// without an explicit teardown.
    fn abort(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPoll {
    Ready(SandboxEvent),
    Pending,
    /// The context stopped producing events
    Closed,
}

/// A live execution context
pub struct SandboxSession {
    pub id: String,
    events: mpsc::UnboundedReceiver<SandboxEvent>,
    control: Box<dyn SessionControl>,
}

impl SandboxSession {
    pub fn new(
        events: mpsc::UnboundedReceiver<SandboxEvent>,
        control: Box<dyn SessionControl>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            events,
            control,
        }
    }

    /// Next queued event, without waiting.
    pub fn poll_event(&mut self) -> EventPoll {
        match self.events.try_recv() {
            Ok(event) => EventPoll::Ready(event),
            Err(mpsc::error::TryRecvError::Empty) => EventPoll::Pending,
            Err(mpsc::error::TryRecvError::Disconnected) => EventPoll::Closed,
        }
    }

    pub async fn teardown(mut self) -> VantageResult<()> {
        self.control.teardown().await
    }

    fn abort(&mut self) {
        self.control.abort();
    }
}

#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Allocate an isolated context and start loading `page` into it.
    async fn launch(&self, page: SandboxPage) -> VantageResult<SandboxSession>;

    fn name(&self) -> &str;
}

/// Counts live sandbox sessions.
#[derive(Debug, Clone, Default)]
pub struct SandboxTracker {
    live: Arc<AtomicUsize>,
    launched: Arc<AtomicU64>,
}

impl SandboxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::SeqCst)
    }

    pub(crate) fn lease(&self) -> TrackerLease {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.launched.fetch_add(1, Ordering::SeqCst);
        TrackerLease {
            live: Arc::clone(&self.live),
        }
    }
}

/// Decrements the live count when dropped.
#[derive(Debug)]
pub(crate) struct TrackerLease {
    live: Arc<AtomicUsize>,
}

impl Drop for TrackerLease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns a session for the duration of one verification. Dropping the guard
/// without calling [`SessionGuard::teardown`] aborts the session.
pub(crate) struct SessionGuard {
    session: Option<SandboxSession>,
    _lease: TrackerLease,
}

impl SessionGuard {
    pub(crate) fn new(session: SandboxSession, lease: TrackerLease) -> Self {
        Self {
            session: Some(session),
            _lease: lease,
        }
    }

    pub(crate) fn session(&mut self) -> Option<&mut SandboxSession> {
        self.session.as_mut()
    }

    pub(crate) async fn teardown(mut self) -> VantageResult<()> {
        match self.session.take() {
            Some(session) => session.teardown().await,
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            tracing::warn!(session = %session.id, "Sandbox session dropped without teardown; aborting");
            session.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_follows_happy_path() {
        let mut machine = PhaseMachine::new();
        for phase in [
            SandboxPhase::Loading,
            SandboxPhase::WaitingForLibraries,
            SandboxPhase::Executing,
            SandboxPhase::Succeeded,
            SandboxPhase::TornDown,
        ] {
            machine.advance(phase).unwrap();
        }
        assert_eq!(machine.outcome(), Some(SandboxPhase::Succeeded));
        assert_eq!(machine.history().len(), 6);
    }

    #[test]
    fn teardown_requires_an_outcome() {
        let mut machine = PhaseMachine::new();
        machine.advance(SandboxPhase::Loading).unwrap();
        machine.advance(SandboxPhase::Executing).unwrap();
        assert!(machine.advance(SandboxPhase::TornDown).is_err());
        machine.advance(SandboxPhase::TimedOut).unwrap();
        machine.advance(SandboxPhase::TornDown).unwrap();
    }

    #[test]
    fn torn_down_is_terminal() {
        let mut machine = PhaseMachine::new();
        machine.advance(SandboxPhase::Failed).unwrap();
        machine.advance(SandboxPhase::TornDown).unwrap();
        for phase in [
            SandboxPhase::Created,
            SandboxPhase::Loading,
            SandboxPhase::Executing,
            SandboxPhase::Succeeded,
        ] {
            assert!(machine.advance(phase).is_err(), "{}", phase);
        }
    }

    #[test]
    fn success_only_from_executing() {
        assert!(!SandboxPhase::Loading.can_transition_to(SandboxPhase::Succeeded));
        assert!(!SandboxPhase::Created.can_transition_to(SandboxPhase::Executing));
    }

    #[test]
    fn events_parse_from_harness_lines() {
        let event: SandboxEvent =
            serde_json::from_str(r#"{"type":"strategy_fallback","reason":"SyntaxError: x"}"#)
                .unwrap();
        assert_eq!(
            event,
            SandboxEvent::StrategyFallback {
                reason: "SyntaxError: x".into()
            }
        );
        let event: SandboxEvent =
            serde_json::from_str(r#"{"type":"libraries","runtime":"react-lite 18.2.0"}"#)
                .unwrap();
        assert_eq!(
            event,
            SandboxEvent::Libraries {
                runtime: "react-lite 18.2.0".into()
            }
        );
    }

    #[test]
    fn lease_drop_releases_count() {
        let tracker = SandboxTracker::new();
        {
            let _a = tracker.lease();
            let _b = tracker.lease();
            assert_eq!(tracker.live(), 2);
        }
        assert_eq!(tracker.live(), 0);
        assert_eq!(tracker.launched(), 2);
    }
}
