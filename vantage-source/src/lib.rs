//! Vantage source layer
//!
//! Pure text processing for generated React components: the candidate stage
//! model, the lexical neutralizer, the static repair table, the structural
//! validator and JSX lowering. Nothing here performs I/O.

pub mod extract;
pub mod jsx;
pub mod lexer;
pub mod repair;
pub mod source;
pub mod validate;

pub use extract::{extract_code_block, prepare_for_eval, AppPreamble};
pub use jsx::{lower_jsx, JsxError};
pub use repair::{repair, repair_candidate, FixRecord, FixReport, RepairOutcome, Severity};
pub use source::{CandidateSource, Stage, StageError};
pub use validate::{validate, validate_raw, Issue, IssueKind, ValidationOutcome};
