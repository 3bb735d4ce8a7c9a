//! Boundary morphing: simplify the template boundary so that every cell
//! contributes at most one boundary face.
//!
//! Cells with several boundary faces either get them merged into a single
//! polygonal face (when the faces form one edge-connected disc) or are
//! removed from the mesh (when they do not, e.g. a slab cell with two
//! opposite boundary faces). Removal can expose new multi-boundary cells,
//! so the pass sweeps until it reaches a fixed point. The mesh is
//! topologically valid again when the pass returns.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{MeshGenError, MeshGenResult};
use crate::mesh::{Cell, Face, VolumeMesh};

/// In-place boundary simplification of the template mesh.
pub struct SurfaceMorpher;

impl SurfaceMorpher {
    pub fn new() -> Self {
        Self
    }

    /// Morph until every cell has at most one boundary face.
    pub fn morph_mesh(&self, mesh: &mut VolumeMesh) -> MeshGenResult<()> {
        let mut merged_total = 0usize;
        let mut removed_total = 0usize;

        // each sweep either merges or removes at least one cell
        let max_sweeps = mesh.n_cells() + 1;
        for _ in 0..max_sweeps {
            let mut boundary_of: HashMap<u32, Vec<u32>> = HashMap::new();
            for (f, face) in mesh.boundary_faces() {
                boundary_of.entry(face.owner).or_default().push(f as u32);
            }

            let mut multi: Vec<(u32, Vec<u32>)> = boundary_of
                .into_iter()
                .filter(|(_, faces)| faces.len() > 1)
                .collect();
            if multi.is_empty() {
                if merged_total > 0 || removed_total > 0 {
                    info!(
                        target: "volmesh::morph",
                        merged = merged_total,
                        removed = removed_total,
                        "Morphed boundary"
                    );
                }
                return Ok(());
            }
            multi.sort_by_key(|&(cell, _)| cell);

            let mut drop_faces: Vec<bool> = vec![false; mesh.n_faces()];
            let mut drop_cells: Vec<bool> = vec![false; mesh.n_cells()];
            let mut merged_faces: Vec<Face> = Vec::new();

            for (cell, faces) in &multi {
                match Self::merged_outline(mesh, faces) {
                    Some(points) => {
                        let patch = mesh.faces[faces[0] as usize].patch;
                        for &f in faces {
                            drop_faces[f as usize] = true;
                        }
                        merged_faces.push(Face {
                            points,
                            owner: *cell,
                            neighbour: None,
                            patch,
                        });
                        merged_total += 1;
                    }
                    None => {
                        drop_cells[*cell as usize] = true;
                        removed_total += 1;
                    }
                }
            }

            Self::apply(mesh, &drop_faces, &drop_cells, merged_faces)?;
        }

        Err(MeshGenError::stage_failed(
            "surfaceTopology",
            "boundary morphing did not reach a fixed point",
        ))
    }

    /// Walk the union outline of a cell's boundary faces.
    ///
    /// Returns the merged polygon in winding order when the faces form a
    /// single edge-connected disc, `None` otherwise.
    fn merged_outline(mesh: &VolumeMesh, faces: &[u32]) -> Option<Vec<u32>> {
        // directed edges appearing without their reverse form the outline
        let mut directed: HashSet<(u32, u32)> = HashSet::new();
        for &f in faces {
            let pts = &mesh.faces[f as usize].points;
            for i in 0..pts.len() {
                let a = pts[i];
                let b = pts[(i + 1) % pts.len()];
                directed.insert((a, b));
            }
        }
        let mut next: HashMap<u32, u32> = HashMap::new();
        let mut outline_edges = 0usize;
        for &(a, b) in directed.iter() {
            if directed.contains(&(b, a)) {
                continue;
            }
            outline_edges += 1;
            // a point with two outgoing outline edges means the union is
            // not a disc
            if next.insert(a, b).is_some() {
                return None;
            }
        }
        if outline_edges < 3 {
            return None;
        }

        let start = *next.keys().min()?;
        let mut points = vec![start];
        let mut current = start;
        loop {
            let n = *next.get(&current)?;
            if n == start {
                break;
            }
            points.push(n);
            current = n;
            if points.len() > outline_edges {
                return None;
            }
        }
        // a single cycle visits every outline edge
        if points.len() != outline_edges {
            return None;
        }
        Some(points)
    }

    fn apply(
        mesh: &mut VolumeMesh,
        drop_faces: &[bool],
        drop_cells: &[bool],
        merged_faces: Vec<Face>,
    ) -> MeshGenResult<()> {
        // cell renumbering after removals
        let mut cell_map = vec![u32::MAX; mesh.n_cells()];
        let mut kept_cells = 0u32;
        for (c, map) in cell_map.iter_mut().enumerate() {
            if !drop_cells[c] {
                *map = kept_cells;
                kept_cells += 1;
            }
        }
        if kept_cells == 0 {
            return Err(MeshGenError::stage_failed(
                "surfaceTopology",
                "boundary morphing removed every cell",
            ));
        }

        let provisional = 0u32;
        let old_faces = std::mem::take(&mut mesh.faces);
        let mut new_faces: Vec<Face> = Vec::with_capacity(old_faces.len());

        for (f, mut face) in old_faces.into_iter().enumerate() {
            if drop_faces[f] {
                continue;
            }
            let owner_dropped = drop_cells[face.owner as usize];
            let neighbour_dropped = face
                .neighbour
                .is_some_and(|nb| drop_cells[nb as usize]);

            match (owner_dropped, neighbour_dropped) {
                (true, true) => continue,
                (true, false) => match face.neighbour {
                    Some(nb) => {
                        // the kept side becomes the owner of a new
                        // boundary face; rewind so the normal leaves it
                        face.owner = cell_map[nb as usize];
                        face.neighbour = None;
                        face.patch = Some(provisional);
                        face.points.reverse();
                        new_faces.push(face);
                    }
                    // boundary face of a dropped cell disappears
                    None => continue,
                },
                (false, true) => {
                    face.owner = cell_map[face.owner as usize];
                    face.neighbour = None;
                    face.patch = Some(provisional);
                    new_faces.push(face);
                }
                (false, false) => {
                    face.owner = cell_map[face.owner as usize];
                    face.neighbour = face.neighbour.map(|nb| cell_map[nb as usize]);
                    new_faces.push(face);
                }
            }
        }

        for mut face in merged_faces {
            if drop_cells[face.owner as usize] {
                continue;
            }
            face.owner = cell_map[face.owner as usize];
            new_faces.push(face);
        }

        mesh.faces = new_faces;
        mesh.cells = vec![Cell::default(); kept_cells as usize];
        for (f, face) in mesh.faces.iter().enumerate() {
            mesh.cells[face.owner as usize].faces.push(f as u32);
            if let Some(nb) = face.neighbour {
                mesh.cells[nb as usize].faces.push(f as u32);
            }
        }
        mesh.clear_addressing();

        debug!(
            target: "volmesh::morph",
            cells = mesh.n_cells(),
            faces = mesh.n_faces(),
            "Applied morph sweep"
        );
        Ok(())
    }
}

impl Default for SurfaceMorpher {
    fn default() -> Self {
        Self::new()
    }
}
