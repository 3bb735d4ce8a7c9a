//! Output helpers shared by the subcommands.

use std::io::Write as _;
use std::path::Path;

use serde::Serialize;
use volmesh::VolumeMesh;

use crate::OutputFormat;

/// Print a serializable result for scripting; text rendering is handled
/// by each subcommand.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("failed to serialize output: {e}"),
        }
    }
}

/// Write the mesh boundary as an OBJ surface, one group per patch.
pub fn write_boundary_obj(mesh: &VolumeMesh, path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);
    writeln!(w, "# volmesh boundary surface")?;
    for p in &mesh.points {
        writeln!(w, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for (patch_id, patch) in mesh.patches.iter().enumerate() {
        let faces: Vec<_> = mesh
            .boundary_faces()
            .filter(|(_, f)| f.patch == Some(patch_id as u32))
            .collect();
        if faces.is_empty() {
            continue;
        }
        writeln!(w, "g {}", patch.name)?;
        for (_, face) in faces {
            let indices: Vec<String> =
                face.points.iter().map(|&p| (p + 1).to_string()).collect();
            writeln!(w, "f {}", indices.join(" "))?;
        }
    }
    w.flush()
}
