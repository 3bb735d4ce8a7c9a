//! volmesh: command-line driver for the staged volumetric mesh generator.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=volmesh=info` - Per-stage operation logging
//! - `RUST_LOG=volmesh=debug` - Detailed progress logging
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Generate a mesh with info logging
//! RUST_LOG=volmesh=info volmesh generate meshDict.toml -o mesh.obj
//!
//! # Resume the pipeline from a named stage
//! volmesh generate meshDict.toml -o mesh.obj --resume patchAssignment
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{check, generate, stages};

/// volmesh - staged volumetric mesh generation from closed surfaces.
///
/// Turn a closed triangulated surface and a meshing dictionary into a
/// volume mesh suitable for numerical simulation.
#[derive(Parser)]
#[command(name = "volmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a volume mesh from a meshing dictionary
    Generate {
        /// Meshing dictionary (TOML); relative paths resolve next to it
        dict: PathBuf,

        /// Output mesh file (boundary surface OBJ)
        #[arg(short, long)]
        output: PathBuf,

        /// Resume the pipeline from a named stage
        #[arg(long)]
        resume: Option<String>,

        /// Also write a JSON metadata summary next to the mesh
        #[arg(long)]
        summary: bool,
    },

    /// Validate a meshing dictionary and its input surface
    Check {
        /// Meshing dictionary (TOML)
        dict: PathBuf,
    },

    /// List the pipeline stages and which of them would run
    Stages {
        /// Optional dictionary; its stepResume marks skipped stages
        dict: Option<PathBuf>,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over the -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "volmesh=info",
            2 => "volmesh=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Generate {
            dict,
            output,
            resume,
            summary,
        } => generate::run(dict, output, resume.as_deref(), *summary, &cli),
        Commands::Check { dict } => check::run(dict, &cli),
        Commands::Stages { dict } => stages::run(dict.as_deref(), &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(gen_err) = e.downcast_ref::<volmesh::MeshGenError>() {
                eprintln!("{}: {}", "Error".red().bold(), gen_err);
                eprintln!("  {}: {}", "Code".cyan(), gen_err.code());
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
