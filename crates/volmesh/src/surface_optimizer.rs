//! Boundary surface optimisation and untangling.
//!
//! Smoothing keeps boundary vertices on the surface held by the spatial
//! index; the untangle pass is a local repair that moves the vertices of
//! degenerate or inverted boundary faces toward their neighbourhood and
//! re-projects them, without global remeshing.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::error::MeshGenResult;
use crate::mesh::VolumeMesh;
use crate::spatial::SpatialIndex;

const UNTANGLE_SWEEPS: usize = 5;

/// Constrained smoothing and repair of the mesh boundary.
pub struct SurfaceOptimizer<'a> {
    index: &'a SpatialIndex,
    enforce_constraints: bool,
    locked: HashSet<u32>,
}

impl<'a> SurfaceOptimizer<'a> {
    pub fn new(index: &'a SpatialIndex) -> Self {
        Self {
            index,
            enforce_constraints: false,
            locked: HashSet::new(),
        }
    }

    /// Keep boundary vertices exactly on the surface while smoothing.
    pub fn enforce_constraints(&mut self) {
        self.enforce_constraints = true;
    }

    /// Exclude points from movement.
    pub fn lock_points(&mut self, points: &[u32]) {
        self.locked.extend(points.iter().copied());
    }

    fn boundary_neighbours(mesh: &VolumeMesh) -> HashMap<u32, Vec<u32>> {
        let mut neighbours: HashMap<u32, HashSet<u32>> = HashMap::new();
        for (_, face) in mesh.boundary_faces() {
            let pts = &face.points;
            for i in 0..pts.len() {
                let a = pts[i];
                let b = pts[(i + 1) % pts.len()];
                neighbours.entry(a).or_default().insert(b);
                neighbours.entry(b).or_default().insert(a);
            }
        }
        neighbours
            .into_iter()
            .map(|(p, set)| {
                let mut v: Vec<u32> = set.into_iter().collect();
                v.sort_unstable();
                (p, v)
            })
            .collect()
    }

    /// Smooth the boundary, re-projecting onto the surface.
    ///
    /// Without constraint enforcement the projection is blended at half
    /// weight; with it, vertices land exactly on the surface.
    pub fn optimize_surface(&self, mesh: &mut VolumeMesh) -> MeshGenResult<()> {
        let neighbours = Self::boundary_neighbours(mesh);
        let mut order: Vec<u32> = neighbours.keys().copied().collect();
        order.sort_unstable();

        for _ in 0..2 {
            let mut updates: Vec<(u32, Point3<f64>)> = Vec::with_capacity(order.len());
            for &p in &order {
                if self.locked.contains(&p) {
                    continue;
                }
                let nbs = &neighbours[&p];
                let mut acc = Vector3::zeros();
                for &n in nbs {
                    acc += mesh.points[n as usize].coords;
                }
                let smoothed = Point3::from(
                    mesh.points[p as usize].coords * 0.5 + acc / nbs.len() as f64 * 0.5,
                );
                let projected = self.index.closest_point(&smoothed)?.point;
                let target = if self.enforce_constraints {
                    projected
                } else {
                    Point3::from(smoothed.coords * 0.5 + projected.coords * 0.5)
                };
                updates.push((p, target));
            }
            for (p, pos) in updates {
                mesh.points[p as usize] = pos;
            }
        }

        debug!(
            target: "volmesh::surface_optimizer",
            constrained = self.enforce_constraints,
            "Optimised boundary surface"
        );
        Ok(())
    }

    /// Whether a boundary face is degenerate or inverted.
    fn is_tangled(mesh: &VolumeMesh, face: usize) -> bool {
        let area_vec = mesh.face_area_vector(face);
        let area = area_vec.norm();
        let outward = mesh.face_centre(face)
            - mesh.cell_centre(mesh.faces[face].owner as usize);
        let scale = outward.norm().max(1e-30);
        if area < 1e-12 * scale * scale {
            return true;
        }
        area_vec.dot(&outward) <= 0.0
    }

    /// Repair degenerate and inverted boundary faces.
    ///
    /// Returns the number of faces still tangled after the bounded sweep
    /// budget. This pass always runs when invoked; it is never skipped
    /// based on whether earlier passes reported movement.
    pub fn untangle_surface(&self, mesh: &mut VolumeMesh) -> MeshGenResult<usize> {
        let neighbours = Self::boundary_neighbours(mesh);

        for _ in 0..UNTANGLE_SWEEPS {
            let tangled: Vec<usize> = mesh
                .boundary_faces()
                .map(|(f, _)| f)
                .filter(|&f| Self::is_tangled(mesh, f))
                .collect();
            if tangled.is_empty() {
                return Ok(0);
            }

            let mut moved: HashSet<u32> = HashSet::new();
            for f in tangled {
                let pts = mesh.faces[f].points.clone();
                for p in pts {
                    if self.locked.contains(&p) || !moved.insert(p) {
                        continue;
                    }
                    let Some(nbs) = neighbours.get(&p) else {
                        continue;
                    };
                    let mut acc = Vector3::zeros();
                    for &n in nbs {
                        acc += mesh.points[n as usize].coords;
                    }
                    let relaxed = Point3::from(
                        mesh.points[p as usize].coords * 0.25
                            + acc / nbs.len() as f64 * 0.75,
                    );
                    mesh.points[p as usize] = self.index.closest_point(&relaxed)?.point;
                }
            }
        }

        let remaining = mesh
            .boundary_faces()
            .map(|(f, _)| f)
            .filter(|&f| Self::is_tangled(mesh, f))
            .count();
        if remaining > 0 {
            info!(
                target: "volmesh::surface_optimizer",
                remaining,
                "Boundary faces still tangled after repair budget"
            );
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshDict;
    use crate::mapper::SurfaceMapper;
    use crate::morph::SurfaceMorpher;
    use crate::spatial::SpatialIndex;
    use crate::tessellation::TemplateTessellator;

    fn mapped_cube() -> (VolumeMesh, SpatialIndex) {
        let surf = crate::surface::fixtures::cube_surface();
        let mut index = SpatialIndex::new(&surf).unwrap();
        let dict = MeshDict::from_toml_str("maxCellSize = 0.25").unwrap();
        index.create_decomposition(&dict).unwrap();
        let mut mesh = VolumeMesh::new();
        TemplateTessellator::new(&index).create_mesh(&mut mesh).unwrap();
        SurfaceMorpher::new().morph_mesh(&mut mesh).unwrap();
        let mapper = SurfaceMapper::new(&index);
        mapper.premap_vertices(&mut mesh).unwrap();
        mapper.map_vertices_onto_surface(&mut mesh).unwrap();
        (mesh, index)
    }

    #[test]
    fn test_untangle_reports_clean_boundary() {
        let (mut mesh, index) = mapped_cube();
        let optimizer = SurfaceOptimizer::new(&index);
        let remaining = optimizer.untangle_surface(&mut mesh).unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_optimize_keeps_points_near_surface() {
        let (mut mesh, index) = mapped_cube();
        let mut optimizer = SurfaceOptimizer::new(&index);
        optimizer.enforce_constraints();
        optimizer.optimize_surface(&mut mesh).unwrap();
        let boundary_points = mesh.boundary_points().to_vec();
        for p in boundary_points {
            let d = index.closest_point(&mesh.points[p as usize]).unwrap().distance;
            assert!(d < 1e-9);
        }
    }

    #[test]
    fn test_locked_points_do_not_move() {
        let (mut mesh, index) = mapped_cube();
        let locked: Vec<u32> = mesh.boundary_points().to_vec();
        let before: Vec<_> = locked
            .iter()
            .map(|&p| mesh.points[p as usize])
            .collect();

        let mut optimizer = SurfaceOptimizer::new(&index);
        optimizer.lock_points(&locked);
        optimizer.optimize_surface(&mut mesh).unwrap();

        for (&p, prev) in locked.iter().zip(before) {
            assert_eq!(mesh.points[p as usize], prev);
        }
    }

    #[test]
    fn test_topology_untouched_by_optimisation() {
        let (mut mesh, index) = mapped_cube();
        let optimizer = SurfaceOptimizer::new(&index);
        optimizer.optimize_surface(&mut mesh).unwrap();
        optimizer.untangle_surface(&mut mesh).unwrap();
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
    }
}
