//! Surface mapping: place mesh boundary vertices onto the true surface.
//!
//! Two-phase: a pre-mapping pass gives every boundary vertex a consistent
//! initial placement (blend toward its boundary neighbourhood average),
//! then the projection pass moves each boundary vertex to its closest
//! point on the surface held by the spatial index.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::info;

use crate::error::MeshGenResult;
use crate::mesh::VolumeMesh;
use crate::spatial::SpatialIndex;

/// Maps the mesh boundary onto the indexed surface.
pub struct SurfaceMapper<'a> {
    index: &'a SpatialIndex,
}

impl<'a> SurfaceMapper<'a> {
    pub fn new(index: &'a SpatialIndex) -> Self {
        Self { index }
    }

    /// Neighbourhood map of the mesh boundary: point -> adjacent boundary
    /// points along boundary edges.
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

    /// Pre-map boundary vertices toward their neighbourhood average.
    pub fn premap_vertices(&self, mesh: &mut VolumeMesh) -> MeshGenResult<()> {
        let neighbours = Self::boundary_neighbours(mesh);
        let mut order: Vec<u32> = neighbours.keys().copied().collect();
        order.sort_unstable();

        let updates: Vec<(u32, Point3<f64>)> = order
            .iter()
            .map(|&p| {
                let nbs = &neighbours[&p];
                let mut acc = Vector3::zeros();
                for &n in nbs {
                    acc += mesh.points[n as usize].coords;
                }
                let average = acc / nbs.len() as f64;
                let blended = mesh.points[p as usize].coords * 0.5 + average * 0.5;
                (p, Point3::from(blended))
            })
            .collect();

        for (p, pos) in updates {
            mesh.points[p as usize] = pos;
        }
        Ok(())
    }

    /// Project every boundary vertex onto the surface. Returns the number
    /// of vertices that moved.
    pub fn map_vertices_onto_surface(&self, mesh: &mut VolumeMesh) -> MeshGenResult<usize> {
        let boundary: Vec<u32> = mesh.boundary_points().to_vec();
        let points = &mesh.points;
        let projected: Vec<MeshGenResult<Point3<f64>>> = boundary
            .par_iter()
            .map(|&p| Ok(self.index.closest_point(&points[p as usize])?.point))
            .collect();

        let tol = 1e-12;
        let mut moved = 0usize;
        for (&p, target) in boundary.iter().zip(projected) {
            let target = target?;
            if (target - mesh.points[p as usize]).norm() > tol {
                moved += 1;
            }
            mesh.points[p as usize] = target;
        }
        info!(
            target: "volmesh::mapper",
            boundary = boundary.len(),
            moved,
            "Projected boundary onto surface"
        );
        Ok(moved)
    }
}
