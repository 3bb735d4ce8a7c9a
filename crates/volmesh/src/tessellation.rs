//! Template generation: the initial volume mesh from the spatial index.
//!
//! Leaf boxes of the index's coarse decomposition whose centre lies inside
//! the surface become hexahedral template cells. Faces between two kept
//! boxes are internal; every other box face is a provisional boundary face
//! in the `defaultFaces` patch, to be reassigned by patch assignment.

use hashbrown::HashMap;
use rayon::prelude::*;
use tracing::info;

use crate::error::{MeshGenError, MeshGenResult};
use crate::mesh::{BoundaryPatch, Cell, Face, VolumeMesh};
use crate::spatial::SpatialIndex;

/// Name of the provisional patch boundary faces start in.
pub const PROVISIONAL_PATCH: &str = "defaultFaces";

/// Builds the template mesh from the coarse decomposition.
pub struct TemplateTessellator<'a> {
    index: &'a SpatialIndex,
}

impl<'a> TemplateTessellator<'a> {
    pub fn new(index: &'a SpatialIndex) -> Self {
        Self { index }
    }

    /// Fill `mesh` with the template cells.
    ///
    /// Precondition: the coarse decomposition is built. Postcondition: the
    /// mesh is non-empty and every boundary face carries the provisional
    /// patch.
    pub fn create_mesh(&self, mesh: &mut VolumeMesh) -> MeshGenResult<()> {
        let decomp = self.index.decomposition().ok_or_else(|| {
            MeshGenError::internal("coarse decomposition missing at template generation")
        })?;
        let [ni, nj, nk] = decomp.dims;
        let flat = |i: usize, j: usize, k: usize| (i * nj + j) * nk + k;

        // keep boxes whose centre the surface contains
        let boxes: Vec<(usize, usize, usize)> = (0..ni)
            .flat_map(|i| (0..nj).flat_map(move |j| (0..nk).map(move |k| (i, j, k))))
            .collect();
        let kept_flags: Vec<bool> = boxes
            .par_iter()
            .map(|&(i, j, k)| self.index.contains(&decomp.box_center(i, j, k)))
            .collect();

        let mut cell_of = vec![u32::MAX; ni * nj * nk];
        let mut n_cells = 0u32;
        for (idx, &(i, j, k)) in boxes.iter().enumerate() {
            if kept_flags[idx] {
                cell_of[flat(i, j, k)] = n_cells;
                n_cells += 1;
            }
        }
        if n_cells == 0 {
            return Err(MeshGenError::stage_failed(
                "templateGeneration",
                "no template cells inside the surface; check the surface \
                 orientation and maxCellSize",
            ));
        }

        mesh.points.clear();
        mesh.faces.clear();
        mesh.cells = vec![Cell::default(); n_cells as usize];
        mesh.patches = vec![BoundaryPatch::new(PROVISIONAL_PATCH)];

        let mut lattice: HashMap<(usize, usize, usize), u32> = HashMap::new();
        let mut point_id = |mesh: &mut VolumeMesh, i: usize, j: usize, k: usize| -> u32 {
            *lattice.entry((i, j, k)).or_insert_with(|| {
                mesh.points.push(decomp.lattice_point(i, j, k));
                (mesh.points.len() - 1) as u32
            })
        };

        // lattice offsets of the six box faces, wound outward
        type Quad = [(usize, usize, usize); 4];
        const MINUS_X: Quad = [(0, 0, 0), (0, 0, 1), (0, 1, 1), (0, 1, 0)];
        const PLUS_X: Quad = [(1, 0, 0), (1, 1, 0), (1, 1, 1), (1, 0, 1)];
        const MINUS_Y: Quad = [(0, 0, 0), (1, 0, 0), (1, 0, 1), (0, 0, 1)];
        const PLUS_Y: Quad = [(0, 1, 0), (0, 1, 1), (1, 1, 1), (1, 1, 0)];
        const MINUS_Z: Quad = [(0, 0, 0), (0, 1, 0), (1, 1, 0), (1, 0, 0)];
        const PLUS_Z: Quad = [(0, 0, 1), (1, 0, 1), (1, 1, 1), (0, 1, 1)];

        for (idx, &(i, j, k)) in boxes.iter().enumerate() {
            if !kept_flags[idx] {
                continue;
            }
            let cell = cell_of[flat(i, j, k)];

            // (delta, quad, owns_shared_face): positive directions own the
            // shared internal face, negative directions only emit boundary
            let neighbours: [((i64, i64, i64), Quad, bool); 6] = [
                ((1, 0, 0), PLUS_X, true),
                ((0, 1, 0), PLUS_Y, true),
                ((0, 0, 1), PLUS_Z, true),
                ((-1, 0, 0), MINUS_X, false),
                ((0, -1, 0), MINUS_Y, false),
                ((0, 0, -1), MINUS_Z, false),
            ];

            for ((di, dj, dk), quad, owns) in neighbours {
                let n_i = i as i64 + di;
                let n_j = j as i64 + dj;
                let n_k = k as i64 + dk;
                let neighbour_cell = if n_i >= 0
                    && n_j >= 0
                    && n_k >= 0
                    && (n_i as usize) < ni
                    && (n_j as usize) < nj
                    && (n_k as usize) < nk
                {
                    let c = cell_of[flat(n_i as usize, n_j as usize, n_k as usize)];
                    if c == u32::MAX { None } else { Some(c) }
                } else {
                    None
                };

                match neighbour_cell {
                    Some(other) => {
                        if owns {
                            let points = quad
                                .iter()
                                .map(|&(oi, oj, ok)| point_id(mesh, i + oi, j + oj, k + ok))
                                .collect();
                            let f = mesh.faces.len() as u32;
                            mesh.faces.push(Face {
                                points,
                                owner: cell,
                                neighbour: Some(other),
                                patch: None,
                            });
                            mesh.cells[cell as usize].faces.push(f);
                            mesh.cells[other as usize].faces.push(f);
                        }
                    }
                    None => {
                        let points = quad
                            .iter()
                            .map(|&(oi, oj, ok)| point_id(mesh, i + oi, j + oj, k + ok))
                            .collect();
                        let f = mesh.faces.len() as u32;
                        mesh.faces.push(Face {
                            points,
                            owner: cell,
                            neighbour: None,
                            patch: Some(0),
                        });
                        mesh.cells[cell as usize].faces.push(f);
                    }
                }
            }
        }

        mesh.clear_addressing();
        info!(
            target: "volmesh::tessellation",
            cells = mesh.n_cells(),
            faces = mesh.n_faces(),
            points = mesh.n_points(),
            "Generated template mesh"
        );
        Ok(())
    }
}
