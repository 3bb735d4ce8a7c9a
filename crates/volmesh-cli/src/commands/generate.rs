//! volmesh generate command - run the staged pipeline.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde::Serialize;
use volmesh::{GenerationFailure, MeshDict, OutputContext, VolumeMeshGenerator};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct GenerateResult {
    dict: String,
    output: String,
    cells: usize,
    faces: usize,
    points: usize,
    stages_executed: usize,
    patches: Vec<PatchInfo>,
}

#[derive(Serialize)]
struct PatchInfo {
    name: String,
    #[serde(rename = "type")]
    patch_type: String,
    faces: usize,
}

pub fn run(
    dict_path: &Path,
    output_path: &Path,
    resume: Option<&str>,
    summary: bool,
    cli: &Cli,
) -> Result<()> {
    let mut dict = MeshDict::from_file(dict_path)
        .with_context(|| format!("Failed to load meshing dictionary from {:?}", dict_path))?;
    if let Some(stage) = resume {
        dict.set("stepResume", toml::Value::String(stage.to_string()));
    }

    // relative dictionary paths resolve next to the dictionary itself
    let root = dict_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let outcome = VolumeMeshGenerator::new(dict, OutputContext::new(root)).generate();

    match &outcome.failure {
        None => {}
        Some(failure @ GenerationFailure::Descriptive { .. }) => {
            bail!("mesh generation failed: {failure}");
        }
        Some(GenerationFailure::Unclassified) => {
            bail!("meshing process terminated without producing a usable mesh");
        }
    }

    let mut context = outcome.context;
    let committed = context
        .take_committed()
        .context("pipeline succeeded but committed no mesh")?;
    let mesh = &committed.mesh;

    output::write_boundary_obj(mesh, output_path)
        .with_context(|| format!("Failed to write mesh to {:?}", output_path))?;
    if summary {
        let summary_path = output_path.with_extension("json");
        std::fs::write(
            &summary_path,
            serde_json::to_string_pretty(&committed.meta_data)?,
        )
        .with_context(|| format!("Failed to write summary to {:?}", summary_path))?;
    }

    let counts = mesh.patch_face_counts();
    let result = GenerateResult {
        dict: dict_path.display().to_string(),
        output: output_path.display().to_string(),
        cells: mesh.n_cells(),
        faces: mesh.n_faces(),
        points: mesh.n_points(),
        stages_executed: outcome.report.stages_executed,
        patches: mesh
            .patches
            .iter()
            .zip(&counts)
            .map(|(p, &faces)| PatchInfo {
                name: p.name.clone(),
                patch_type: p.patch_type.clone(),
                faces,
            })
            .collect(),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Mesh Generation".bold().underline());
                println!("  {}: {}", "Dictionary".cyan(), result.dict);
                println!(
                    "  {}: {} cells, {} faces, {} points",
                    "Mesh".cyan(),
                    result.cells,
                    result.faces,
                    result.points
                );
                println!("  {}: {}", "Stages executed".cyan(), result.stages_executed);

                println!("\n{}", "Patches:".bold());
                for patch in &result.patches {
                    println!(
                        "  {} ({}): {} faces",
                        patch.name,
                        patch.patch_type,
                        patch.faces
                    );
                }

                println!("\n  {} {}", "Wrote".green(), result.output);
            }
        }
    }

    Ok(())
}
