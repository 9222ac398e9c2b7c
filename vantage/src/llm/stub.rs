//! Deterministic scripted backend for tests and offline use

use super::{Completion, GenerationBackend};
use crate::error::GenerationFailure;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const STUB_MODEL: &str = "stub";

/// Component served by [`StubBackend::offline`] once its script is empty.
pub const OFFLINE_RESPONSE: &str = r#"```jsx
// APP_NAME: Counter
// APP_ICON: 🔢
// APP_DESCRIPTION: A counter generated without a network backend
function App() {
  const [count, setCount] = React.useState(0);
  return (
    <div className="min-h-screen flex flex-col items-center justify-center gap-4 p-6">
      <h1 className="text-2xl font-bold">Count: {count}</h1>
      <div className="flex gap-2">
        <button className="px-4 py-2 rounded bg-gray-200" onClick={() => setCount(count - 1)}>-</button>
        <button className="px-4 py-2 rounded bg-blue-500 text-white" onClick={() => setCount(count + 1)}>+</button>
      </div>
    </div>
  );
}
```"#;

/// Backend that replays a queue of scripted results and records every
/// prompt it receives.
pub struct StubBackend {
    script: Mutex<VecDeque<Result<String, GenerationFailure>>>,
    prompts: Mutex<Vec<String>>,
    when_empty: Option<String>,
    delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StubBackend {
    pub fn new(script: Vec<Result<String, GenerationFailure>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            when_empty: None,
            delay: None,
        }
    }

    /// Backend that always answers with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            when_empty: Some(text.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Backend that fails every call with the same failure.
    pub fn failing(failure: GenerationFailure, calls: usize) -> Self {
        Self::new((0..calls).map(|_| Err(failure.clone())).collect())
    }

    /// Backend for offline CLI runs.
    pub fn offline() -> Self {
        Self::always(OFFLINE_RESPONSE)
    }

    /// Simulate latency; a delay longer than the call's timeout yields
    /// `GenerationFailure::Timeout`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }

    fn next_result(&self) -> Result<String, GenerationFailure> {
        if let Some(next) = lock(&self.script).pop_front() {
            return next;
        }
        self.when_empty.clone().ok_or_else(|| {
            GenerationFailure::MalformedResponse("Stub script exhausted".to_string())
        })
    }
}

#[async_trait]
impl GenerationBackend for StubBackend {
    async fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Completion, GenerationFailure> {
        lock(&self.prompts).push(prompt.to_string());
        let result = self.next_result();

        if let Some(delay) = self.delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Err(GenerationFailure::Timeout {
                    limit_ms: timeout.as_millis() as u64,
                });
            }
        }

        result.map(|text| Completion::local(STUB_MODEL, prompt, text))
    }

    fn model(&self) -> &str {
        STUB_MODEL
    }
}
