//! volmesh stages command - show the stage sequence and skip policy.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use volmesh::{MeshDict, STAGE_SEQUENCE, StepController, check_mesh_dict};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct StageInfo {
    name: &'static str,
    runs: bool,
}

pub fn run(dict_path: Option<&Path>, cli: &Cli) -> Result<()> {
    let controller = match dict_path {
        Some(path) => {
            let dict = MeshDict::from_file(path)
                .with_context(|| format!("Failed to load meshing dictionary from {:?}", path))?;
            check_mesh_dict(&dict)?;
            StepController::from_dict(&dict)?
        }
        None => StepController::run_all(),
    };

    let stages: Vec<StageInfo> = STAGE_SEQUENCE
        .iter()
        .map(|&name| StageInfo {
            name,
            runs: controller.should_run(name),
        })
        .collect();

    match cli.format {
        OutputFormat::Json => {
            output::print(&stages, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Pipeline Stages".bold().underline());
                for stage in &stages {
                    if stage.runs {
                        println!("  {} {}", "✓".green(), stage.name);
                    } else {
                        println!("  {} {} {}", "-".yellow(), stage.name, "(skipped)".dimmed());
                    }
                }
                println!(
                    "\n  {}",
                    "Renumbering and patch renaming always run.".dimmed()
                );
            }
        }
    }

    Ok(())
}
