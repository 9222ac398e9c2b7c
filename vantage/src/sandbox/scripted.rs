//! Scripted sandbox runtime: replays fixed event sequences without executing
//! anything. Used by tests and by hosts without a Node binary.

use super::harness::RUNTIME_NAME;
use super::{
    EvalStrategy, SandboxEvent, SandboxPage, SandboxRuntime, SandboxSession, SessionControl,
};
use crate::error::{VantageError, VantageResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// One scripted launch
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    /// Emit the events and keep the session open until teardown
    Events(Vec<SandboxEvent>),
    /// Emit the events, then close the stream as if the process exited
    Exit(Vec<SandboxEvent>),
    /// Start loading and never finish
    Hang,
    /// Fail to launch
    LaunchFailure(String),
}

impl ScriptedRun {
    /// A clean render with visible output.
    pub fn success() -> Self {
        ScriptedRun::Events(vec![
            SandboxEvent::Loading,
            SandboxEvent::Libraries {
                runtime: RUNTIME_NAME.to_string(),
            },
            SandboxEvent::Executing {
                strategy: EvalStrategy::Strict,
            },
            SandboxEvent::Rendered {
                visible: true,
                html_length: 128,
            },
            SandboxEvent::Complete,
        ])
    }

    /// A render that reports `message` as a runtime error.
    pub fn runtime_error(message: &str) -> Self {
        ScriptedRun::Events(vec![
            SandboxEvent::Loading,
            SandboxEvent::Libraries {
                runtime: RUNTIME_NAME.to_string(),
            },
            SandboxEvent::Executing {
                strategy: EvalStrategy::Strict,
            },
            SandboxEvent::Error {
                message: message.to_string(),
            },
            SandboxEvent::Rendered {
                visible: false,
                html_length: 0,
            },
            SandboxEvent::Complete,
        ])
    }

    /// A render that only succeeded after falling back to sloppy mode.
    pub fn sloppy_fallback(reason: &str) -> Self {
        ScriptedRun::Events(vec![
            SandboxEvent::Loading,
            SandboxEvent::Libraries {
                runtime: RUNTIME_NAME.to_string(),
            },
            SandboxEvent::StrategyFallback {
                reason: reason.to_string(),
            },
            SandboxEvent::Executing {
                strategy: EvalStrategy::Sloppy,
            },
            SandboxEvent::Rendered {
                visible: true,
                html_length: 64,
            },
            SandboxEvent::Complete,
        ])
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runtime that replays [`ScriptedRun`]s in order, then repeats a default.
pub struct ScriptedSandbox {
    runs: Mutex<VecDeque<ScriptedRun>>,
    default_run: ScriptedRun,
    scripts: Mutex<Vec<String>>,
    teardowns: Arc<AtomicUsize>,
}

impl ScriptedSandbox {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            default_run: ScriptedRun::success(),
            scripts: Mutex::new(Vec::new()),
            teardowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always(run: ScriptedRun) -> Self {
        Self {
            default_run: run,
            ..Self::new(Vec::new())
        }
    }

    /// Scripts received by `launch`, in order.
    pub fn scripts(&self) -> Vec<String> {
        lock(&self.scripts).clone()
    }

    /// Sessions released through teardown or abort.
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedSandbox {
    async fn launch(&self, page: SandboxPage) -> VantageResult<SandboxSession> {
        lock(&self.scripts).push(page.script);
        let run = lock(&self.runs)
            .pop_front()
            .unwrap_or_else(|| self.default_run.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let keep_open = match run {
            ScriptedRun::LaunchFailure(message) => return Err(VantageError::Sandbox(message)),
            ScriptedRun::Hang => {
                let _ = tx.send(SandboxEvent::Loading);
                Some(tx)
            }
            ScriptedRun::Events(events) => {
                for event in events {
                    let _ = tx.send(event);
                }
                Some(tx)
            }
            ScriptedRun::Exit(events) => {
                for event in events {
                    let _ = tx.send(event);
                }
                None
            }
        };

        Ok(SandboxSession::new(
            rx,
            Box::new(ScriptedControl {
                sender: keep_open,
                released: false,
                teardowns: Arc::clone(&self.teardowns),
            }),
        ))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedControl {
    sender: Option<mpsc::UnboundedSender<SandboxEvent>>,
    released: bool,
    teardowns: Arc<AtomicUsize>,
}

impl ScriptedControl {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sender.take();
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SessionControl for ScriptedControl {
    async fn teardown(&mut self) -> VantageResult<()> {
        self.release();
        Ok(())
    }

    fn abort(&mut self) {
        self.release();
    }
}
