//! Stage skip policy: decides which named stages of the fixed sequence run.
//!
//! The controller is a pure policy object. The stage order itself is fixed
//! by the generator's dispatch table; the controller only answers, per
//! name, whether that stage should execute. The default policy runs
//! everything; a configured resume point skips every stage strictly before
//! it.

use crate::config::MeshDict;
use crate::error::MeshGenResult;

/// The fixed, ordered sequence of named pipeline stages.
///
/// The unconditional tail (renumbering, patch renaming) is not listed:
/// it always runs and is not subject to the skip policy.
pub const STAGE_SEQUENCE: [&str; 8] = [
    "templateGeneration",
    "surfaceTopology",
    "surfaceProjection",
    "patchAssignment",
    "edgeExtraction",
    "boundaryLayerGeneration",
    "meshOptimisation",
    "boundaryLayerRefinement",
];

/// Stateless skip policy over [`STAGE_SEQUENCE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepController {
    /// Index of the first stage that runs. 0 means run everything.
    resume_from: usize,
}

impl StepController {
    /// Policy that runs every stage.
    pub fn run_all() -> Self {
        Self { resume_from: 0 }
    }

    /// Policy that skips every stage strictly before `stage`.
    ///
    /// Returns `None` when the name is not in [`STAGE_SEQUENCE`]; callers
    /// reject that as a configuration error.
    pub fn resume_from(stage: &str) -> Option<Self> {
        STAGE_SEQUENCE
            .iter()
            .position(|&s| s == stage)
            .map(|resume_from| Self { resume_from })
    }

    /// Build the policy from the meshing dictionary (`stepResume` key).
    ///
    /// Unknown names are rejected by [`crate::config::check_mesh_dict`]
    /// before this is called; they map to the run-everything default here
    /// so the controller stays total.
    pub fn from_dict(dict: &MeshDict) -> MeshGenResult<Self> {
        match dict.get::<String>("stepResume")? {
            Some(name) => Ok(Self::resume_from(&name).unwrap_or_else(Self::run_all)),
            None => Ok(Self::run_all()),
        }
    }

    /// Whether the named stage should execute.
    ///
    /// Safe to query repeatedly and in any order. Names outside the fixed
    /// sequence run unconditionally.
    pub fn should_run(&self, stage: &str) -> bool {
        match STAGE_SEQUENCE.iter().position(|&s| s == stage) {
            Some(idx) => idx >= self.resume_from,
            None => {
                debug_assert!(false, "unknown stage name queried: {stage}");
                true
            }
        }
    }
}

impl Default for StepController {
    fn default() -> Self {
        Self::run_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_all_runs_everything() {
        let ctl = StepController::run_all();
        for stage in STAGE_SEQUENCE {
            assert!(ctl.should_run(stage), "{stage} should run by default");
        }
    }

    #[test]
    fn test_resume_skips_strictly_before() {
        let ctl = StepController::resume_from("patchAssignment").unwrap();
        assert!(!ctl.should_run("templateGeneration"));
        assert!(!ctl.should_run("surfaceTopology"));
        assert!(!ctl.should_run("surfaceProjection"));
        assert!(ctl.should_run("patchAssignment"));
        assert!(ctl.should_run("edgeExtraction"));
        assert!(ctl.should_run("boundaryLayerRefinement"));
    }

    #[test]
    fn test_resume_from_first_equals_run_all() {
        let ctl = StepController::resume_from("templateGeneration").unwrap();
        assert_eq!(ctl, StepController::run_all());
    }

    #[test]
    fn test_unknown_resume_name() {
        assert!(StepController::resume_from("noSuchStage").is_none());
    }

    #[test]
    fn test_query_order_independent() {
        let ctl = StepController::resume_from("meshOptimisation").unwrap();
        // out-of-order, repeated queries give stable answers
        assert!(ctl.should_run("boundaryLayerRefinement"));
        assert!(!ctl.should_run("templateGeneration"));
        assert!(ctl.should_run("meshOptimisation"));
        assert!(!ctl.should_run("templateGeneration"));
    }
}
