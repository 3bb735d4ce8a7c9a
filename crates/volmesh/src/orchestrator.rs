//! The pipeline orchestrator: owns the geometric resources, runs the
//! staged sequence and establishes the failure boundary.
//!
//! [`VolumeMeshGenerator`] is constructed from a meshing dictionary and an
//! output context. Its `generate` operation is total at the public
//! boundary: it either commits a topologically valid [`VolumeMesh`] plus
//! source metadata to the context, or commits nothing and reports a
//! failure. Descriptive failures (configuration, surface, stage) keep
//! their message; internal resource-consistency errors degrade to a
//! generic diagnostic.
//!
//! The stage sequence is a data-driven table of descriptors (name,
//! configuration guard, operation) walked by one dispatch loop, so the
//! [`StepController`] skip policy and configuration gates never touch the
//! dispatch logic itself. After every executed stage the mesh invariant is
//! re-checked: each internal face bounds two cells, each boundary face one
//! cell and one patch.
//!
//! Resource ownership: the generator exclusively owns the active surface,
//! the optional modified surface, the spatial index and the modification
//! record. The index is dropped inside final optimisation once the surface
//! work is done, and rebuilt from scratch over the original surface only
//! for the anisotropic back-projection pass. Every exit path, including
//! early failure, releases each resource exactly once by ownership.

use std::path::Path;

use tracing::{debug, info, info_span, warn};

use crate::config::{MeshDict, check_mesh_dict};
use crate::controller::StepController;
use crate::edges::EdgeExtractor;
use crate::error::{ErrorCode, MeshGenError, MeshGenResult};
use crate::layers::{BoundaryLayerGenerator, LayerRecord};
use crate::mapper::SurfaceMapper;
use crate::mesh::VolumeMesh;
use crate::modification::GeometryModification;
use crate::morph::SurfaceMorpher;
use crate::optimizer::MeshOptimizer;
use crate::output::OutputContext;
use crate::spatial::SpatialIndex;
use crate::surface::{PatchManipulator, TriSurf};
use crate::surface_optimizer::SurfaceOptimizer;
use crate::tessellation::TemplateTessellator;

/// Refinement-level window for the back-projection index rebuild.
const BACK_PROJECTION_MIN_LEVELS: u32 = 32;
const BACK_PROJECTION_MAX_LEVELS: u32 = 64;

type StageFn = fn(&mut VolumeMeshGenerator) -> MeshGenResult<()>;
type GuardFn = fn(&MeshDict) -> bool;

struct StageDescriptor {
    name: &'static str,
    /// Configuration gate, checked after the step controller. `None`
    /// means the stage is mandatory.
    guard: Option<GuardFn>,
    run: StageFn,
}

fn has_boundary_layers(dict: &MeshDict) -> bool {
    dict.found("boundaryLayers")
}

/// Stricter than [`has_boundary_layers`]: the section must be a table.
fn has_boundary_layer_dict(dict: &MeshDict) -> bool {
    dict.is_dict("boundaryLayers")
}

const STAGES: [StageDescriptor; 8] = [
    StageDescriptor {
        name: "templateGeneration",
        guard: None,
        run: VolumeMeshGenerator::stage_template_generation,
    },
    StageDescriptor {
        name: "surfaceTopology",
        guard: None,
        run: VolumeMeshGenerator::stage_surface_topology,
    },
    StageDescriptor {
        name: "surfaceProjection",
        guard: None,
        run: VolumeMeshGenerator::stage_surface_projection,
    },
    StageDescriptor {
        name: "patchAssignment",
        guard: None,
        run: VolumeMeshGenerator::stage_patch_assignment,
    },
    StageDescriptor {
        name: "edgeExtraction",
        guard: None,
        run: VolumeMeshGenerator::stage_edge_extraction,
    },
    StageDescriptor {
        name: "boundaryLayerGeneration",
        guard: Some(has_boundary_layers),
        run: VolumeMeshGenerator::stage_boundary_layer_generation,
    },
    StageDescriptor {
        name: "meshOptimisation",
        guard: None,
        run: VolumeMeshGenerator::stage_mesh_optimisation,
    },
    StageDescriptor {
        name: "boundaryLayerRefinement",
        guard: Some(has_boundary_layer_dict),
        run: VolumeMeshGenerator::stage_boundary_layer_refinement,
    },
];

/// Summary of an attempted generation run.
#[derive(Debug, Default)]
pub struct GenerationReport {
    /// Stages that actually executed.
    pub stages_executed: usize,
    /// Stages skipped by the resume policy or a configuration gate.
    pub stages_skipped: Vec<&'static str>,
    /// Log of operations performed.
    pub operation_log: Vec<String>,
}

/// Why a run produced no mesh.
#[derive(Debug)]
pub enum GenerationFailure {
    /// A failure with a user-actionable description.
    Descriptive { code: ErrorCode, message: String },
    /// Anything else; reported as a generic diagnostic.
    Unclassified,
}

impl GenerationFailure {
    pub fn is_descriptive(&self) -> bool {
        matches!(self, GenerationFailure::Descriptive { .. })
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationFailure::Descriptive { code, message } => {
                write!(f, "[{code}] {message}")
            }
            GenerationFailure::Unclassified => {
                write!(f, "meshing process terminated without producing a usable mesh")
            }
        }
    }
}

/// Result of [`VolumeMeshGenerator::generate`].
///
/// On success the context carries the committed mesh; on failure it is
/// exactly as constructed.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub context: OutputContext,
    pub report: GenerationReport,
    pub failure: Option<GenerationFailure>,
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Staged volumetric mesh generator.
///
/// # Example
///
/// ```no_run
/// use volmesh::{MeshDict, OutputContext, VolumeMeshGenerator};
///
/// let dict = MeshDict::from_file("meshDict.toml").unwrap();
/// let context = OutputContext::new(".");
/// let outcome = VolumeMeshGenerator::new(dict, context).generate();
/// match outcome.context.mesh() {
///     Some(mesh) => println!("generated {} cells", mesh.n_cells()),
///     None => eprintln!("{}", outcome.failure.unwrap()),
/// }
/// ```
pub struct VolumeMeshGenerator {
    dict: MeshDict,
    context: OutputContext,
    controller: StepController,

    /// Active surface in original coordinates (patch-annotated when the
    /// input carries feature edges).
    surface: Option<TriSurf>,
    /// Transformed copy backing the initial index; disposed right after
    /// the modification is reverted.
    modified_surface: Option<TriSurf>,
    modification: Option<GeometryModification>,
    index: Option<SpatialIndex>,

    mesh: VolumeMesh,
    layers: Option<LayerRecord>,
    enforce_constraints: bool,
    meta: Option<serde_json::Value>,
    report: GenerationReport,
}

impl VolumeMeshGenerator {
    pub fn new(dict: MeshDict, context: OutputContext) -> Self {
        Self {
            dict,
            context,
            controller: StepController::run_all(),
            surface: None,
            modified_surface: None,
            modification: None,
            index: None,
            mesh: VolumeMesh::new(),
            layers: None,
            enforce_constraints: false,
            meta: None,
            report: GenerationReport::default(),
        }
    }

    /// Run the pipeline. Never panics or propagates an error past this
    /// boundary; all failures become a [`GenerationFailure`].
    pub fn generate(mut self) -> GenerationOutcome {
        let failure = match self.run() {
            Ok(()) => {
                info!(
                    target: "volmesh::orchestrator",
                    stages = self.report.stages_executed,
                    "Mesh generation finished"
                );
                None
            }
            Err(err) if err.is_descriptive() => {
                warn!(
                    target: "volmesh::orchestrator",
                    code = err.code().as_str(),
                    error = %err,
                    "Mesh generation failed"
                );
                self.report.operation_log.push(format!("Failed: {err}"));
                Some(GenerationFailure::Descriptive {
                    code: err.code(),
                    message: err.to_string(),
                })
            }
            Err(err) => {
                warn!(
                    target: "volmesh::orchestrator",
                    "Meshing process terminated without producing a usable mesh"
                );
                debug!(target: "volmesh::orchestrator", error = %err, "Internal failure detail");
                self.report
                    .operation_log
                    .push("Failed: meshing process terminated".to_string());
                Some(GenerationFailure::Unclassified)
            }
        };
        GenerationOutcome {
            context: self.context,
            report: self.report,
            failure,
        }
    }

    fn run(&mut self) -> MeshGenResult<()> {
        check_mesh_dict(&self.dict)?;
        self.controller = StepController::from_dict(&self.dict)?;
        self.enforce_constraints = self
            .dict
            .get_or_default("enforceGeometryConstraints", false)?;

        // load the input surface and derive the active variant
        let surface_file: String = self
            .dict
            .get("surfaceFile")?
            .ok_or_else(|| MeshGenError::missing_keyword("surfaceFile"))?;
        let path = self.context.resolve(Path::new(&surface_file));
        let raw = TriSurf::load(&path)?;
        raw.check_closed()?;
        self.meta = Some(raw.meta_data(&path));
        self.log(format!(
            "Loaded surface {} ({} triangles)",
            path.display(),
            raw.triangles.len()
        ));

        let active = if raw.feature_edges.is_empty() {
            raw
        } else {
            // the feature-edge partition must land in the dictionary
            // before patch assignment or renaming consult it
            let annotated = PatchManipulator::new(&raw).surface_with_patches(&mut self.dict);
            self.log(format!(
                "Derived {} patches from feature edges",
                annotated.patches.len()
            ));
            annotated
        };

        // the index covers the modified surface when a modification is
        // declared, else the active surface
        self.modification = GeometryModification::from_dict(&self.dict)?;
        let mut index = match &self.modification {
            Some(modification) => {
                let modified = modification.modify_surface(&active);
                let index = SpatialIndex::new(&modified)?;
                self.modified_surface = Some(modified);
                self.log("Applied anisotropic geometry modification".to_string());
                index
            }
            None => SpatialIndex::new(&active)?,
        };
        index.create_decomposition(&self.dict)?;
        self.index = Some(index);
        self.surface = Some(active);

        for stage in &STAGES {
            if !self.controller.should_run(stage.name) {
                debug!(
                    target: "volmesh::orchestrator",
                    stage = stage.name,
                    "Stage skipped by resume policy"
                );
                self.report.stages_skipped.push(stage.name);
                self.log(format!("Skipped stage {} (resume policy)", stage.name));
                continue;
            }
            if let Some(guard) = stage.guard {
                if !guard(&self.dict) {
                    debug!(
                        target: "volmesh::orchestrator",
                        stage = stage.name,
                        "Stage not configured"
                    );
                    self.report.stages_skipped.push(stage.name);
                    self.log(format!("Skipped stage {} (not configured)", stage.name));
                    continue;
                }
            }
            let span = info_span!("stage", name = stage.name);
            let _enter = span.enter();
            (stage.run)(self)?;
            self.check_mesh_invariant(stage.name)?;
            self.report.stages_executed += 1;
            self.log(format!("Completed stage {}", stage.name));
        }

        // unconditional tail: renumber, then rename per configuration
        if self.mesh.is_empty() {
            return Err(MeshGenError::internal(
                "pipeline finished without producing any cells",
            ));
        }
        self.mesh.renumber();
        self.mesh.rename_patches(&self.dict)?;
        self.check_mesh_invariant("renumberAndRename")?;
        self.log("Renumbered mesh and renamed boundary patches".to_string());

        let meta = self
            .meta
            .take()
            .ok_or_else(|| MeshGenError::internal("surface metadata missing at commit"))?;
        let mesh = std::mem::take(&mut self.mesh);
        self.context.commit(mesh, meta);
        Ok(())
    }

    /// Every stage must hand back a topologically valid mesh.
    fn check_mesh_invariant(&self, stage: &'static str) -> MeshGenResult<()> {
        let report = self.mesh.validate_topology();
        if report.is_valid() {
            Ok(())
        } else {
            Err(MeshGenError::stage_failed(
                stage,
                format!(
                    "mesh left topologically invalid ({} errors, first: {})",
                    report.errors.len(),
                    report.errors.first().map(String::as_str).unwrap_or("none")
                ),
            ))
        }
    }

    fn log(&mut self, message: String) {
        self.report.operation_log.push(message);
    }

    fn stage_template_generation(&mut self) -> MeshGenResult<()> {
        let Some(index) = self.index.as_ref() else {
            return Err(MeshGenError::internal(
                "spatial index missing at template generation",
            ));
        };
        TemplateTessellator::new(index).create_mesh(&mut self.mesh)
    }

    fn stage_surface_topology(&mut self) -> MeshGenResult<()> {
        SurfaceMorpher::new().morph_mesh(&mut self.mesh)
    }

    fn stage_surface_projection(&mut self) -> MeshGenResult<()> {
        let Some(index) = self.index.as_ref() else {
            return Err(MeshGenError::internal(
                "spatial index missing at surface projection",
            ));
        };
        let mapper = SurfaceMapper::new(index);
        mapper.premap_vertices(&mut self.mesh)?;
        let moved = mapper.map_vertices_onto_surface(&mut self.mesh)?;
        debug!(target: "volmesh::orchestrator", moved, "Projected boundary");
        // the repair pass runs even when projection reports no movement
        SurfaceOptimizer::new(index).untangle_surface(&mut self.mesh)?;
        Ok(())
    }

    fn stage_patch_assignment(&mut self) -> MeshGenResult<()> {
        let Some(index) = self.index.as_ref() else {
            return Err(MeshGenError::internal(
                "spatial index missing at patch assignment",
            ));
        };
        EdgeExtractor::new(index).update_mesh_patches(&mut self.mesh)
    }

    fn stage_edge_extraction(&mut self) -> MeshGenResult<()> {
        let Some(index) = self.index.as_ref() else {
            return Err(MeshGenError::internal(
                "spatial index missing at edge extraction",
            ));
        };
        EdgeExtractor::new(index).map_edges_and_corners(&mut self.mesh)?;
        // surface optimisation and untangling always accompany extraction
        let optimizer = SurfaceOptimizer::new(index);
        optimizer.optimize_surface(&mut self.mesh)?;
        optimizer.untangle_surface(&mut self.mesh)?;
        Ok(())
    }

    fn stage_boundary_layer_generation(&mut self) -> MeshGenResult<()> {
        // `boundaryLayers` may exist with any shape; only a table can
        // carry layer requests
        let Some(section) = self.dict.sub_dict("boundaryLayers") else {
            debug!(
                target: "volmesh::orchestrator",
                "boundaryLayers present without layer specification"
            );
            return Ok(());
        };
        let generator = BoundaryLayerGenerator::new();
        // nLayers wins over patchBoundaryLayers when both are present
        let record = if section.found("nLayers") {
            let n_layers: i64 = section.get_or_default("nLayers", 0)?;
            if n_layers > 0 {
                generator.add_layer_for_all_patches(&mut self.mesh)?
            } else {
                // intentional: a non-positive count requests no layers
                debug!(target: "volmesh::orchestrator", n_layers, "No layers requested");
                LayerRecord::default()
            }
        } else if let Some(per_patch) = section.sub_dict("patchBoundaryLayers") {
            let names: Vec<String> = per_patch.keys().map(str::to_string).collect();
            generator.add_layer_for_patches(&mut self.mesh, &names)?
        } else {
            LayerRecord::default()
        };
        if !record.is_empty() {
            self.layers = Some(record);
        }
        Ok(())
    }

    /// Final optimisation, as an explicit bounded loop: the second pass
    /// happens only after the modification record is consumed, so the
    /// anisotropic correction cannot re-trigger itself.
    fn stage_mesh_optimisation(&mut self) -> MeshGenResult<()> {
        for _pass in 0..2 {
            {
                let Some(index) = self.index.as_ref() else {
                    return Err(MeshGenError::internal(
                        "spatial index missing at final optimisation",
                    ));
                };
                let mut surface_opt = SurfaceOptimizer::new(index);
                if self.enforce_constraints {
                    surface_opt.enforce_constraints();
                }
                surface_opt.optimize_surface(&mut self.mesh)?;
                surface_opt.untangle_surface(&mut self.mesh)?;
            }
            // the surface work above is the last use of the index in
            // this pass
            self.index = None;

            let mut optimizer = MeshOptimizer::new();
            if self.enforce_constraints {
                optimizer.constrain();
            }
            if let Some(layers) = &self.layers {
                optimizer.lock_points(&layers.inner_points());
            }
            optimizer.optimize_mesh(&mut self.mesh)?;
            optimizer.optimize_low_quality_faces(&mut self.mesh)?;
            optimizer.untangle_mesh(&mut self.mesh)?;
            self.mesh.clear_addressing();

            let Some(modification) = self.modification.take() else {
                break;
            };
            modification.revert_mesh(&mut self.mesh);
            self.modified_surface = None;
            self.log("Reverted geometry modification".to_string());

            // back-projection: a fresh, finer index over the original
            // surface re-maps the reverted boundary
            let Some(surface) = self.surface.as_ref() else {
                return Err(MeshGenError::internal(
                    "active surface missing at back-projection",
                ));
            };
            let mut rebuilt = SpatialIndex::new(surface)?;
            rebuilt.create_refined_decomposition(
                &self.dict,
                BACK_PROJECTION_MIN_LEVELS,
                BACK_PROJECTION_MAX_LEVELS,
            )?;
            SurfaceMapper::new(&rebuilt).map_vertices_onto_surface(&mut self.mesh)?;
            self.index = Some(rebuilt);
            self.log("Re-projected boundary onto the original surface".to_string());
        }
        Ok(())
    }

    fn stage_boundary_layer_refinement(&mut self) -> MeshGenResult<()> {
        let Some(record) = self.layers.take() else {
            // resuming past layer generation leaves no layer to refine
            debug!(
                target: "volmesh::orchestrator",
                "No recorded boundary layer to refine"
            );
            return Ok(());
        };
        let generator = BoundaryLayerGenerator::new();
        generator.refine_layers(&mut self.mesh, &record)?;

        // lock the layer against movement, then repair around it
        let locked = record.points_in_layer();
        let mut optimizer = MeshOptimizer::new();
        optimizer.lock_points(&locked);
        optimizer.untangle_mesh(&mut self.mesh)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::STAGE_SEQUENCE;
    use std::io::Write;

    #[test]
    fn test_stage_table_matches_sequence() {
        let names: Vec<&str> = STAGES.iter().map(|s| s.name).collect();
        assert_eq!(names, STAGE_SEQUENCE);
    }

    #[test]
    fn test_missing_surface_file_key_is_descriptive() {
        let dict = MeshDict::from_toml_str("maxCellSize = 0.5").unwrap();
        let outcome = VolumeMeshGenerator::new(dict, OutputContext::new(".")).generate();
        assert!(!outcome.is_success());
        assert!(!outcome.context.is_committed());
        match outcome.failure.unwrap() {
            GenerationFailure::Descriptive { code, message } => {
                assert_eq!(code, ErrorCode::MissingKeyword);
                assert!(message.contains("surfaceFile"));
            }
            GenerationFailure::Unclassified => panic!("expected a descriptive failure"),
        }
    }

    #[test]
    fn test_unreadable_surface_is_descriptive() {
        let dir = tempfile::tempdir().unwrap();
        let dict = MeshDict::from_toml_str(r#"surfaceFile = "missing.obj""#).unwrap();
        let outcome =
            VolumeMeshGenerator::new(dict, OutputContext::new(dir.path())).generate();
        assert!(!outcome.is_success());
        assert!(!outcome.context.is_committed());
        let failure = outcome.failure.unwrap();
        assert!(failure.is_descriptive());
        assert!(format!("{failure}").contains("missing.obj"));
    }

    #[test]
    fn test_open_surface_is_descriptive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.obj");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

        let dict = MeshDict::from_toml_str(r#"surfaceFile = "open.obj""#).unwrap();
        let outcome =
            VolumeMeshGenerator::new(dict, OutputContext::new(dir.path())).generate();
        assert!(!outcome.is_success());
        let failure = outcome.failure.unwrap();
        assert!(failure.is_descriptive());
        assert!(format!("{failure}").contains("open edges"));
    }
}
