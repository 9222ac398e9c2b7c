//! Vantage runtime
//!
//! Generates small React apps from a description and only hands back code
//! that passed the static repair pipeline, the structural validator and,
//! when a sandbox is attached, an isolated execution run.
//!
//! - [`llm`]: generation backends (Gemini over HTTP, a scripted stub)
//! - [`prompt`]: prompt construction with failure history
//! - [`sandbox`]: disposable execution contexts and the runtime verifier
//! - [`forge`]: the retry/escalation controller
//! - [`app`]: saved apps and their JSON library
//!
//! Pure text processing (extraction, repair, validation, JSX lowering)
//! lives in `vantage_source` and is re-exported here.

pub mod app;
pub mod config;
pub mod error;
pub mod forge;
pub mod llm;
pub mod prompt;
pub mod request;
pub mod sandbox;
pub mod secrets;

pub use app::{AppLibrary, AppMetadata, SavedApp, TestStatus};
pub use config::VantageConfig;
pub use error::{FailureKind, GenerationFailure, VantageError, VantageResult};
pub use forge::{AttemptRecord, AttemptStage, Forge, ForgeOutcome, MetricsSnapshot, StageTally};
pub use llm::{create_backend, Completion, GenerationBackend, GeminiBackend, StubBackend};
pub use request::{FlowKind, GenerationRequest};
pub use sandbox::{
    EmbedDocument, RuntimeTestResult, SandboxPhase, SandboxVerifier, VerificationMode,
};
pub use secrets::SecretStore;

pub use vantage_source;
