//! volmesh check command - validate the dictionary and input surface.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use volmesh::{MeshDict, TriSurf, check_mesh_dict};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct CheckResult {
    dict: String,
    valid: bool,
    issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    surface: Option<serde_json::Value>,
}

pub fn run(dict_path: &Path, cli: &Cli) -> Result<()> {
    let dict = MeshDict::from_file(dict_path)
        .with_context(|| format!("Failed to load meshing dictionary from {:?}", dict_path))?;

    let mut issues = Vec::new();
    if let Err(e) = check_mesh_dict(&dict) {
        issues.push(e.to_string());
    }

    let mut surface = None;
    if issues.is_empty() {
        let surface_file: Option<String> = dict.get("surfaceFile").unwrap_or(None);
        if let Some(file) = surface_file {
            let root = dict_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let path = if Path::new(&file).is_absolute() {
                Path::new(&file).to_path_buf()
            } else {
                root.join(&file)
            };
            match TriSurf::load(&path) {
                Ok(surf) => {
                    if let Err(e) = surf.check_closed() {
                        issues.push(e.to_string());
                    }
                    surface = Some(surf.meta_data(&path));
                }
                Err(e) => issues.push(e.to_string()),
            }
        }
    }

    let result = CheckResult {
        dict: dict_path.display().to_string(),
        valid: issues.is_empty(),
        issues,
        surface,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Dictionary Check".bold().underline());
                println!("  {}: {}", "File".cyan(), result.dict);
                if result.valid {
                    println!("  {}: {}", "Status".cyan(), "Valid".green().bold());
                } else {
                    println!("  {}: {}", "Status".cyan(), "Issues found".red().bold());
                }

                if !result.issues.is_empty() {
                    println!("\n{}", "Issues:".bold());
                    for issue in &result.issues {
                        println!("  {} {}", "✗".red(), issue);
                    }
                }

                if let Some(meta) = &result.surface {
                    println!("\n{}", "Surface:".bold());
                    println!("  {}: {}", "Points".cyan(), meta["nPoints"]);
                    println!("  {}: {}", "Triangles".cyan(), meta["nTriangles"]);
                    println!("  {}: {}", "Feature edges".cyan(), meta["nFeatureEdges"]);
                }
            }
        }
    }

    if !result.valid {
        std::process::exit(1);
    }

    Ok(())
}
