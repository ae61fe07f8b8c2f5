//! The fixed stage pipeline for one agent-tick.
//!
//! Two shapes exist: ORPDA (five stages) and the ORPA baseline, which
//! skips drift-decide and acts on the plan alone. Both are validated once
//! at startup against the prompt set.

use driftville_core::error::{DriftvilleError, Result};
use driftville_core::stage::StageKind;
use driftville_llm::prompt::{PromptEngine, PromptId};

/// One stage and the prompt that drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Which slot of the merged result this stage fills.
    pub kind: StageKind,
    /// Template rendered for the call.
    pub prompt: PromptId,
}

impl StageDescriptor {
    const fn new(kind: StageKind, prompt: PromptId) -> Self {
        Self { kind, prompt }
    }
}

const ORPDA: [StageDescriptor; 5] = [
    StageDescriptor::new(StageKind::Observation, PromptId::Observe),
    StageDescriptor::new(StageKind::Reflection, PromptId::Reflect),
    StageDescriptor::new(StageKind::Plan, PromptId::Plan),
    StageDescriptor::new(StageKind::DriftDecision, PromptId::DriftDecide),
    StageDescriptor::new(StageKind::ActionResult, PromptId::ActOrpda),
];

const ORPA: [StageDescriptor; 4] = [
    StageDescriptor::new(StageKind::Observation, PromptId::Observe),
    StageDescriptor::new(StageKind::Reflection, PromptId::Reflect),
    StageDescriptor::new(StageKind::Plan, PromptId::Plan),
    StageDescriptor::new(StageKind::ActionResult, PromptId::ActOrpa),
];

/// Ordered stage descriptors for one run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    use_drift: bool,
    stages: &'static [StageDescriptor],
}

impl Pipeline {
    /// The pipeline for `use_drift`: ORPDA when true, ORPA otherwise.
    #[must_use]
    pub fn for_mode(use_drift: bool) -> Self {
        Self {
            use_drift,
            stages: if use_drift { &ORPDA } else { &ORPA },
        }
    }

    /// Whether the drift-decide stage runs.
    #[must_use]
    pub fn use_drift(&self) -> bool {
        self.use_drift
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        self.stages
    }

    /// Check that the stages follow the cycle order from observation to
    /// action and that every prompt is loaded.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::Pipeline`] describing the first problem.
    pub fn validate(&self, prompts: &PromptEngine) -> Result<()> {
        let mut expected = Some(StageKind::Observation);
        for stage in self.stages {
            if expected != Some(stage.kind) {
                return Err(DriftvilleError::Pipeline(format!(
                    "stage {} out of order, expected {:?}",
                    stage.kind, expected
                )));
            }
            if prompts.get(stage.prompt).is_none() {
                return Err(DriftvilleError::Pipeline(format!("no template for prompt '{}'", stage.prompt)));
            }
            expected = stage.kind.next(self.use_drift);
        }
        if expected.is_some() {
            return Err(DriftvilleError::Pipeline("pipeline ends before the action stage".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_modes_validate_against_builtin_prompts() {
        let prompts = PromptEngine::builtin();
        Pipeline::for_mode(true).validate(&prompts).expect("orpda");
        Pipeline::for_mode(false).validate(&prompts).expect("orpa");
    }

    #[test]
    fn orpa_has_no_drift_stage() {
        let kinds: Vec<StageKind> = Pipeline::for_mode(false).stages().iter().map(|s| s.kind).collect();
        assert!(!kinds.contains(&StageKind::DriftDecision));
        assert_eq!(kinds.last(), Some(&StageKind::ActionResult));
    }

    #[test]
    fn mismatched_mode_is_rejected() {
        let broken = Pipeline { use_drift: true, stages: &ORPA };
        assert!(matches!(broken.validate(&PromptEngine::builtin()), Err(DriftvilleError::Pipeline(_))));
    }

    #[test]
    fn truncated_pipeline_is_rejected() {
        let broken = Pipeline { use_drift: true, stages: &ORPDA[..3] };
        assert!(broken.validate(&PromptEngine::builtin()).is_err());
    }
}
