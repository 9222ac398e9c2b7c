//! Per-stage outcome counters for the attempt loop.
//!
//! Every attempt walks generation, raw validation, repair, validation and
//! (with a verifier) execution. Each stage it reaches records a pass or a
//! failure, so a snapshot shows where candidates are lost.

use super::AttemptStage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct StageCounter {
    passed: AtomicU64,
    failed: AtomicU64,
}

impl StageCounter {
    fn tally(&self) -> StageTally {
        StageTally {
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Stage counters shared by every request a forge serves
#[derive(Debug, Default)]
pub struct StageMetrics {
    generation: StageCounter,
    raw_validation: StageCounter,
    validation: StageCounter,
    execution: StageCounter,
    /// Attempts whose candidate needed at least one repair
    repaired_candidates: AtomicU64,
    /// Individual repair rule applications
    repairs_applied: AtomicU64,
    accepted_first_attempt: AtomicU64,
    accepted_after_retry: AtomicU64,
    fallbacks: AtomicU64,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, stage: AttemptStage) -> &StageCounter {
        match stage {
            AttemptStage::Generation => &self.generation,
            AttemptStage::RawValidation => &self.raw_validation,
            AttemptStage::Validation => &self.validation,
            AttemptStage::Execution => &self.execution,
        }
    }

    pub fn passed(&self, stage: AttemptStage) {
        self.counter(stage).passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self, stage: AttemptStage) {
        self.counter(stage).failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the repair pass of one attempt; `fixes` is the rule count.
    pub fn repaired(&self, fixes: usize) {
        if fixes > 0 {
            self.repaired_candidates.fetch_add(1, Ordering::Relaxed);
            self.repairs_applied.fetch_add(fixes as u64, Ordering::Relaxed);
        }
    }

    pub fn accepted(&self, attempt: u32) {
        if attempt <= 1 {
            self.accepted_first_attempt.fetch_add(1, Ordering::Relaxed);
        } else {
            self.accepted_after_retry.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn fell_back(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generation: self.generation.tally(),
            raw_validation: self.raw_validation.tally(),
            validation: self.validation.tally(),
            execution: self.execution.tally(),
            repaired_candidates: self.repaired_candidates.load(Ordering::Relaxed),
            repairs_applied: self.repairs_applied.load(Ordering::Relaxed),
            accepted_first_attempt: self.accepted_first_attempt.load(Ordering::Relaxed),
            accepted_after_retry: self.accepted_after_retry.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Passes and failures recorded for one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    pub passed: u64,
    pub failed: u64,
}

impl StageTally {
    pub fn reached(&self) -> u64 {
        self.passed + self.failed
    }

    /// Share of candidates reaching this stage that got through it
    pub fn pass_rate(&self) -> Option<f64> {
        match self.reached() {
            0 => None,
            reached => Some(self.passed as f64 / reached as f64),
        }
    }
}

/// Point-in-time copy of [`StageMetrics`] for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generation: StageTally,
    pub raw_validation: StageTally,
    pub validation: StageTally,
    pub execution: StageTally,
    pub repaired_candidates: u64,
    pub repairs_applied: u64,
    pub accepted_first_attempt: u64,
    pub accepted_after_retry: u64,
    pub fallbacks: u64,
}

impl MetricsSnapshot {
    pub fn stage(&self, stage: AttemptStage) -> StageTally {
        match stage {
            AttemptStage::Generation => self.generation,
            AttemptStage::RawValidation => self.raw_validation,
            AttemptStage::Validation => self.validation,
            AttemptStage::Execution => self.execution,
        }
    }

    /// Every attempt starts with a generation call.
    pub fn attempts(&self) -> u64 {
        self.generation.reached()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted_first_attempt + self.accepted_after_retry
    }

    /// The stage that rejected the most attempts, if any failed. Ties go to
    /// the earlier stage.
    pub fn bottleneck(&self) -> Option<AttemptStage> {
        [
            AttemptStage::Generation,
            AttemptStage::RawValidation,
            AttemptStage::Validation,
            AttemptStage::Execution,
        ]
        .into_iter()
        .rev()
        .filter(|stage| self.stage(*stage).failed > 0)
        .max_by_key(|stage| self.stage(*stage).failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stage_tallies_locate_the_bottleneck() {
        let metrics = StageMetrics::new();
        // attempt 1: cut off mid-response
        metrics.passed(AttemptStage::Generation);
        metrics.failed(AttemptStage::RawValidation);
        // attempt 2: repaired, validated, crashed at mount
        metrics.passed(AttemptStage::Generation);
        metrics.passed(AttemptStage::RawValidation);
        metrics.repaired(2);
        metrics.passed(AttemptStage::Validation);
        metrics.failed(AttemptStage::Execution);
        // attempt 3: accepted
        metrics.passed(AttemptStage::Generation);
        metrics.passed(AttemptStage::RawValidation);
        metrics.repaired(0);
        metrics.passed(AttemptStage::Validation);
        metrics.passed(AttemptStage::Execution);
        metrics.accepted(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempts(), 3);
        assert_eq!(snapshot.accepted(), 1);
        assert_eq!(snapshot.accepted_after_retry, 1);
        assert_eq!(snapshot.repaired_candidates, 1);
        assert_eq!(snapshot.repairs_applied, 2);
        assert_eq!(
            snapshot.raw_validation,
            StageTally {
                passed: 2,
                failed: 1
            }
        );
        assert_eq!(snapshot.execution.pass_rate(), Some(0.5));
        assert_eq!(snapshot.bottleneck(), Some(AttemptStage::RawValidation));
    }

    #[test]
    fn empty_snapshot_has_no_rates() {
        let snapshot = StageMetrics::new().snapshot();
        assert_eq!(snapshot.attempts(), 0);
        assert_eq!(snapshot.validation.pass_rate(), None);
        assert_eq!(snapshot.bottleneck(), None);
    }
}
