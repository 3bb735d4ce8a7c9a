//! Staged volumetric mesh generation from closed triangulated surfaces.
//!
//! `volmesh` turns a closed 2-manifold surface and a meshing dictionary
//! into a topologically valid polyhedral volume mesh. The work happens in
//! a fixed sequence of named stages executed by a single generator:
//!
//! 1. `templateGeneration` - hexahedral template cells from the spatial
//!    index's coarse decomposition
//! 2. `surfaceTopology` - boundary simplification until each cell carries
//!    at most one boundary face
//! 3. `surfaceProjection` - pre-mapping, projection onto the true surface,
//!    boundary untangling
//! 4. `patchAssignment` - boundary faces reassigned into the surface's
//!    patches
//! 5. `edgeExtraction` - edge/corner vertices snapped to features, plus
//!    surface optimisation
//! 6. `boundaryLayerGeneration` - prism layers under all or named patches
//!    (only when configured)
//! 7. `meshOptimisation` - final surface and volume optimisation,
//!    anisotropic back-projection when configured
//! 8. `boundaryLayerRefinement` - layer grading and a layer-aware repair
//!    pass (only for a structured `boundaryLayers` section)
//!
//! An unconditional renumbering and patch-renaming tail follows. The
//! pipeline can resume from any named stage (`stepResume`); a failure in
//! any stage abandons the whole run and commits nothing to the output
//! context.
//!
//! # Quick start
//!
//! ```no_run
//! use volmesh::{MeshDict, OutputContext, VolumeMeshGenerator};
//!
//! let dict = MeshDict::from_toml_str(r#"
//!     surfaceFile = "geometry/part.obj"
//!     maxCellSize = 0.25
//! "#).unwrap();
//!
//! let outcome = VolumeMeshGenerator::new(dict, OutputContext::new(".")).generate();
//! match outcome.context.mesh() {
//!     Some(mesh) => println!("generated {} cells", mesh.n_cells()),
//!     None => eprintln!("{}", outcome.failure.unwrap()),
//! }
//! ```
//!
//! # Logging
//!
//! The library emits `tracing` events under `volmesh::*` targets; install
//! a subscriber (e.g. `tracing-subscriber` with
//! `RUST_LOG=volmesh=debug`) to see per-stage progress.

pub mod config;
pub mod controller;
pub mod edges;
pub mod error;
pub mod layers;
pub mod mapper;
pub mod mesh;
pub mod modification;
pub mod morph;
pub mod optimizer;
pub mod orchestrator;
pub mod output;
pub mod spatial;
pub mod surface;
pub mod surface_optimizer;
pub mod tessellation;

pub use config::{MeshDict, check_mesh_dict};
pub use controller::{STAGE_SEQUENCE, StepController};
pub use error::{ErrorCode, MeshGenError, MeshGenResult};
pub use layers::{BoundaryLayerGenerator, LayerRecord};
pub use mesh::{BoundaryPatch, Cell, Face, TopologyReport, VolumeMesh};
pub use modification::GeometryModification;
pub use orchestrator::{
    GenerationFailure, GenerationOutcome, GenerationReport, VolumeMeshGenerator,
};
pub use output::{CommittedOutput, OutputContext};
pub use spatial::{ClosestPoint, CoarseDecomposition, SpatialIndex};
pub use surface::{PatchManipulator, SurfacePatch, TriSurf, Triangle};
