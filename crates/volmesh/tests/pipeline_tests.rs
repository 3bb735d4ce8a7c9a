//! End-to-end tests for the staged mesh generation pipeline.
//!
//! These exercise the full generator from dictionary plus surface file to
//! the committed mesh: the skip policy, the boundary-layer gates, the
//! anisotropic round trip and the failure boundary.

use std::io::Write;
use std::path::{Path, PathBuf};

use nalgebra::Point3;
use volmesh::{
    GenerationFailure, GenerationOutcome, MeshDict, OutputContext, VolumeMesh,
    VolumeMeshGenerator,
};

/// Unit cube OBJ with one named group per face and no feature edges.
fn cube_obj() -> String {
    let mut s = String::new();
    for (x, y, z) in [
        (0.0, 0.0, 0.0),
        (1.0, 0.0, 0.0),
        (1.0, 1.0, 0.0),
        (0.0, 1.0, 0.0),
        (0.0, 0.0, 1.0),
        (1.0, 0.0, 1.0),
        (1.0, 1.0, 1.0),
        (0.0, 1.0, 1.0),
    ] {
        s.push_str(&format!("v {x} {y} {z}\n"));
    }
    let faces: [(&str, [[u32; 3]; 2]); 6] = [
        ("bottom", [[1, 3, 2], [1, 4, 3]]),
        ("top", [[5, 6, 7], [5, 7, 8]]),
        ("front", [[1, 2, 6], [1, 6, 5]]),
        ("back", [[3, 4, 8], [3, 8, 7]]),
        ("left", [[1, 5, 8], [1, 8, 4]]),
        ("right", [[2, 3, 7], [2, 7, 6]]),
    ];
    for (name, tris) in faces {
        s.push_str(&format!("g {name}\n"));
        for [a, b, c] in tris {
            s.push_str(&format!("f {a} {b} {c}\n"));
        }
    }
    s
}

/// Unit cube OBJ with a single implicit patch and the twelve geometric
/// edges declared as feature edges.
fn cube_obj_with_feature_edges() -> String {
    let mut s = String::new();
    for (x, y, z) in [
        (0.0, 0.0, 0.0),
        (1.0, 0.0, 0.0),
        (1.0, 1.0, 0.0),
        (0.0, 1.0, 0.0),
        (0.0, 0.0, 1.0),
        (1.0, 0.0, 1.0),
        (1.0, 1.0, 1.0),
        (0.0, 1.0, 1.0),
    ] {
        s.push_str(&format!("v {x} {y} {z}\n"));
    }
    for [a, b, c] in [
        [1, 3, 2],
        [1, 4, 3],
        [5, 6, 7],
        [5, 7, 8],
        [1, 2, 6],
        [1, 6, 5],
        [3, 4, 8],
        [3, 8, 7],
        [1, 5, 8],
        [1, 8, 4],
        [2, 3, 7],
        [2, 7, 6],
    ] {
        s.push_str(&format!("f {a} {b} {c}\n"));
    }
    for [a, b] in [
        [1, 2],
        [2, 3],
        [3, 4],
        [4, 1],
        [5, 6],
        [6, 7],
        [7, 8],
        [8, 5],
        [1, 5],
        [2, 6],
        [3, 7],
        [4, 8],
    ] {
        s.push_str(&format!("l {a} {b}\n"));
    }
    s
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

/// Run the generator over a cube surface written into a fresh run root.
fn generate(dict_toml: &str) -> GenerationOutcome {
    generate_with_surface(dict_toml, &cube_obj())
}

fn generate_with_surface(dict_toml: &str, surface: &str) -> GenerationOutcome {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "cube.obj", surface);
    let dict = MeshDict::from_toml_str(dict_toml).unwrap();
    VolumeMeshGenerator::new(dict, OutputContext::new(dir.path())).generate()
}

const BASE_DICT: &str = "surfaceFile = \"cube.obj\"\nmaxCellSize = 0.25\n";

fn committed_mesh(outcome: &GenerationOutcome) -> &VolumeMesh {
    assert!(
        outcome.is_success(),
        "generation failed: {:?}",
        outcome.failure
    );
    outcome.context.mesh().expect("successful run commits a mesh")
}

fn patch_names(mesh: &VolumeMesh) -> Vec<String> {
    mesh.patches.iter().map(|p| p.name.clone()).collect()
}

fn faces_in_patch(mesh: &VolumeMesh, name: &str) -> usize {
    let id = mesh
        .patches
        .iter()
        .position(|p| p.name == name)
        .unwrap_or_else(|| panic!("no patch named {name}")) as u32;
    mesh.boundary_faces()
        .filter(|(_, f)| f.patch == Some(id))
        .count()
}

#[test]
fn test_cube_end_to_end() {
    let outcome = generate(BASE_DICT);
    let mesh = committed_mesh(&outcome);

    let report = mesh.validate_topology();
    assert!(report.is_valid(), "{report}");
    assert!(!mesh.is_empty());

    // one patch per cube face, all occupied
    assert_eq!(mesh.patches.len(), 6);
    assert_eq!(mesh.occupied_patches().len(), 6);

    // the two layer stages are gated off, everything else ran
    assert_eq!(outcome.report.stages_executed, 6);
    assert_eq!(
        outcome.report.stages_skipped,
        vec!["boundaryLayerGeneration", "boundaryLayerRefinement"]
    );

    // source metadata is attached alongside the mesh
    let meta = outcome.context.meta_data().unwrap();
    assert_eq!(meta["nTriangles"], 12);
    assert!(meta["surfaceFile"].as_str().unwrap().ends_with("cube.obj"));
}

#[test]
fn test_absent_boundary_layers_section_is_skipped() {
    let base = generate(BASE_DICT);
    let base_mesh = committed_mesh(&base);
    assert!(
        base.report
            .stages_skipped
            .contains(&"boundaryLayerGeneration")
    );

    // a scalar boundaryLayers entry gates the generation stage on but
    // carries no layer request; the refinement stage needs a table and
    // stays off
    let scalar = generate(&format!("{BASE_DICT}boundaryLayers = 3\n"));
    let scalar_mesh = committed_mesh(&scalar);
    assert_eq!(scalar.report.stages_executed, 7);
    assert!(
        scalar
            .report
            .stages_skipped
            .contains(&"boundaryLayerRefinement")
    );

    assert_eq!(scalar_mesh.n_cells(), base_mesh.n_cells());
    assert_eq!(scalar_mesh.n_faces(), base_mesh.n_faces());
    assert_eq!(patch_names(scalar_mesh), patch_names(base_mesh));
}

#[test]
fn test_empty_boundary_layers_section_adds_nothing() {
    let base = generate(BASE_DICT);
    let base_mesh = committed_mesh(&base);

    let empty = generate(&format!("{BASE_DICT}[boundaryLayers]\n"));
    let empty_mesh = committed_mesh(&empty);

    // both layer stages run, neither alters the mesh
    assert_eq!(empty.report.stages_executed, 8);
    assert_eq!(empty_mesh.n_cells(), base_mesh.n_cells());
    assert_eq!(empty_mesh.n_faces(), base_mesh.n_faces());
    assert_eq!(patch_names(empty_mesh), patch_names(base_mesh));
}

#[test]
fn test_non_positive_layer_count_adds_nothing() {
    let base = generate(BASE_DICT);
    let base_mesh = committed_mesh(&base);

    let zero = generate(&format!("{BASE_DICT}[boundaryLayers]\nnLayers = 0\n"));
    let zero_mesh = committed_mesh(&zero);
    assert_eq!(zero_mesh.n_cells(), base_mesh.n_cells());
}

#[test]
fn test_global_layer_count_layers_every_patch() {
    let base = generate(BASE_DICT);
    let base_mesh = committed_mesh(&base);
    let boundary_faces = base_mesh.boundary_faces().count();

    let layered = generate(&format!("{BASE_DICT}[boundaryLayers]\nnLayers = 1\n"));
    let layered_mesh = committed_mesh(&layered);

    // one prism per boundary face, patch set unchanged
    assert_eq!(layered_mesh.n_cells(), base_mesh.n_cells() + boundary_faces);
    assert_eq!(patch_names(layered_mesh), patch_names(base_mesh));
    let report = layered_mesh.validate_topology();
    assert!(report.is_valid(), "{report}");
}

#[test]
fn test_global_layer_count_wins_over_per_patch_spec() {
    let both = generate(&format!(
        "{BASE_DICT}[boundaryLayers]\nnLayers = 1\n\n\
         [boundaryLayers.patchBoundaryLayers.top]\nnLayers = 4\n"
    ));
    let both_mesh = committed_mesh(&both);

    let global_only = generate(&format!("{BASE_DICT}[boundaryLayers]\nnLayers = 1\n"));
    let global_mesh = committed_mesh(&global_only);

    // the per-patch spec is never additionally applied
    assert_eq!(both_mesh.n_cells(), global_mesh.n_cells());
    assert_eq!(both_mesh.n_faces(), global_mesh.n_faces());
}

#[test]
fn test_non_positive_count_suppresses_per_patch_spec() {
    let base = generate(BASE_DICT);
    let base_mesh = committed_mesh(&base);

    // presence of nLayers decides the policy even when it requests
    // nothing; the per-patch table is ignored
    let outcome = generate(&format!(
        "{BASE_DICT}[boundaryLayers]\nnLayers = 0\n\n\
         [boundaryLayers.patchBoundaryLayers.top]\nnLayers = 1\n"
    ));
    let mesh = committed_mesh(&outcome);
    assert_eq!(mesh.n_cells(), base_mesh.n_cells());
}

#[test]
fn test_per_patch_layers_only_named_patches() {
    let base = generate(BASE_DICT);
    let base_mesh = committed_mesh(&base);
    let top_faces = faces_in_patch(base_mesh, "top");
    assert!(top_faces > 0);

    let layered = generate(&format!(
        "{BASE_DICT}[boundaryLayers.patchBoundaryLayers.top]\nnLayers = 1\n"
    ));
    let layered_mesh = committed_mesh(&layered);

    assert_eq!(layered_mesh.n_cells(), base_mesh.n_cells() + top_faces);
    let report = layered_mesh.validate_topology();
    assert!(report.is_valid(), "{report}");
}

#[test]
fn test_resume_from_first_stage_matches_full_run() {
    let full = generate(BASE_DICT);
    let resumed = generate(&format!(
        "{BASE_DICT}stepResume = \"templateGeneration\"\n"
    ));
    let full_mesh = committed_mesh(&full);
    let resumed_mesh = committed_mesh(&resumed);

    assert_eq!(full_mesh.n_cells(), resumed_mesh.n_cells());
    assert_eq!(full_mesh.n_faces(), resumed_mesh.n_faces());
    assert_eq!(full_mesh.n_points(), resumed_mesh.n_points());
    // identical inputs give bit-identical geometry
    for (a, b) in full_mesh.points.iter().zip(&resumed_mesh.points) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_full_run_is_deterministic() {
    let first = generate(BASE_DICT);
    let second = generate(BASE_DICT);
    let first_mesh = committed_mesh(&first);
    let second_mesh = committed_mesh(&second);
    assert_eq!(first_mesh.n_points(), second_mesh.n_points());
    for (a, b) in first_mesh.points.iter().zip(&second_mesh.points) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_resume_mid_sequence_without_state_commits_nothing() {
    // skipping template generation leaves no cells; the run terminates
    // with the generic (non-descriptive) diagnostic
    let outcome = generate(&format!("{BASE_DICT}stepResume = \"meshOptimisation\"\n"));
    assert!(!outcome.is_success());
    assert!(!outcome.context.is_committed());
    assert!(matches!(
        outcome.failure,
        Some(GenerationFailure::Unclassified)
    ));
}

#[test]
fn test_stage_failure_commits_nothing_and_is_descriptive() {
    // a cell size far larger than the cube leaves no template cells
    let outcome = generate("surfaceFile = \"cube.obj\"\nmaxCellSize = 40.0\n");
    assert!(!outcome.is_success());
    assert!(!outcome.context.is_committed());
    match outcome.failure.unwrap() {
        GenerationFailure::Descriptive { message, .. } => {
            assert!(message.contains("templateGeneration"));
        }
        GenerationFailure::Unclassified => panic!("expected a descriptive stage failure"),
    }
}

/// Distance from a point to the surface of the unit cube.
fn distance_to_unit_cube_surface(p: &Point3<f64>) -> f64 {
    let clamped = Point3::new(
        p.x.clamp(0.0, 1.0),
        p.y.clamp(0.0, 1.0),
        p.z.clamp(0.0, 1.0),
    );
    let outside = (p - clamped).norm();
    if outside > 0.0 {
        return outside;
    }
    [p.x, p.y, p.z]
        .iter()
        .map(|&c| c.min(1.0 - c))
        .fold(f64::INFINITY, f64::min)
}

#[test]
fn test_anisotropic_modification_round_trip() {
    let outcome = generate(&format!(
        "{BASE_DICT}[anisotropicSources.stretchZ]\n\
         axis = \"z\"\nrange = [0.25, 0.75]\nscale = 2.0\n"
    ));
    let mesh = committed_mesh(&outcome);
    let report = mesh.validate_topology();
    assert!(report.is_valid(), "{report}");
    assert_eq!(mesh.patches.len(), 6);

    // meshing happened in stretched space; after reversion and
    // back-projection the boundary sits on the original cube again
    let mut boundary = std::collections::HashSet::new();
    for (_, face) in mesh.boundary_faces() {
        boundary.extend(face.points.iter().copied());
    }
    for &p in &boundary {
        let d = distance_to_unit_cube_surface(&mesh.points[p as usize]);
        assert!(
            d < 0.06,
            "boundary point {p} is {d} away from the original surface"
        );
    }
}

#[test]
fn test_enforced_constraints_keep_boundary_on_surface() {
    let outcome = generate(&format!("{BASE_DICT}enforceGeometryConstraints = true\n"));
    let mesh = committed_mesh(&outcome);
    let report = mesh.validate_topology();
    assert!(report.is_valid(), "{report}");

    // constrained optimisation pins every boundary vertex to the surface
    let mut boundary = std::collections::HashSet::new();
    for (_, face) in mesh.boundary_faces() {
        boundary.extend(face.points.iter().copied());
    }
    for &p in &boundary {
        let d = distance_to_unit_cube_surface(&mesh.points[p as usize]);
        assert!(d < 1e-9, "boundary point {p} is {d} off the surface");
    }
}

#[test]
fn test_patch_derivation_from_feature_edges() {
    let outcome = generate_with_surface(BASE_DICT, &cube_obj_with_feature_edges());
    let mesh = committed_mesh(&outcome);

    // the six regions separated by feature edges become patches
    assert_eq!(mesh.patches.len(), 6);
    assert_eq!(mesh.occupied_patches().len(), 6);
    assert!(mesh.patches.iter().all(|p| p.name.starts_with("patch")));
    let report = mesh.validate_topology();
    assert!(report.is_valid(), "{report}");
}

#[test]
fn test_patch_renaming_tail() {
    let outcome = generate(&format!(
        "{BASE_DICT}[renameBoundary]\ndefaultType = \"wall\"\n\n\
         [renameBoundary.newPatchNames.top]\nnewName = \"lid\"\ntype = \"inlet\"\n"
    ));
    let mesh = committed_mesh(&outcome);

    let names = patch_names(mesh);
    assert!(names.contains(&"lid".to_string()));
    assert!(!names.contains(&"top".to_string()));
    let lid = mesh.patches.iter().find(|p| p.name == "lid").unwrap();
    assert_eq!(lid.patch_type, "inlet");
    // untouched patches pick up the default type
    let bottom = mesh.patches.iter().find(|p| p.name == "bottom").unwrap();
    assert_eq!(bottom.patch_type, "wall");
}

#[test]
fn test_unknown_resume_stage_is_configuration_error() {
    let outcome = generate(&format!("{BASE_DICT}stepResume = \"noSuchStage\"\n"));
    assert!(!outcome.is_success());
    assert!(!outcome.context.is_committed());
    let failure = outcome.failure.unwrap();
    assert!(failure.is_descriptive());
    assert!(format!("{failure}").contains("noSuchStage"));
}

#[test]
fn test_layer_refinement_runs_with_structured_section() {
    let outcome = generate(&format!("{BASE_DICT}[boundaryLayers]\nnLayers = 1\n"));
    assert!(outcome.is_success());
    // all eight stages ran, none skipped
    assert_eq!(outcome.report.stages_executed, 8);
    assert!(outcome.report.stages_skipped.is_empty());
}
