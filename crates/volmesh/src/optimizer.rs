//! Volume mesh optimisation: smoothing, low-quality repair, untangling.
//!
//! These passes run after the spatial index has been dropped, so they move
//! interior points only; boundary points stay where the surface stages
//! placed them. Locked points (boundary-layer interiors) never move
//! either. All passes are point movement only and leave addressing valid.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::error::MeshGenResult;
use crate::mesh::VolumeMesh;

const SMOOTHING_SWEEPS: usize = 2;
const UNTANGLE_SWEEPS: usize = 5;

/// Faces below this isoperimetric quality get an extra smoothing pass.
const QUALITY_THRESHOLD: f64 = 0.2;

/// Interior smoothing and repair of the volume mesh.
pub struct MeshOptimizer {
    locked: HashSet<u32>,
    constrained: bool,
}

impl MeshOptimizer {
    pub fn new() -> Self {
        Self {
            locked: HashSet::new(),
            constrained: false,
        }
    }

    /// Use the smaller relaxation factor of constrained optimisation.
    pub fn constrain(&mut self) {
        self.constrained = true;
    }

    /// Exclude points from movement.
    pub fn lock_points(&mut self, points: &[u32]) {
        self.locked.extend(points.iter().copied());
    }

    /// Point adjacency along the edges of every face.
    fn point_neighbours(mesh: &VolumeMesh) -> HashMap<u32, Vec<u32>> {
        let mut neighbours: HashMap<u32, HashSet<u32>> = HashMap::new();
        for face in &mesh.faces {
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

    /// Points this optimizer is allowed to move, sorted.
    fn movable_points(&self, mesh: &mut VolumeMesh) -> Vec<u32> {
        let boundary: HashSet<u32> = mesh.boundary_points().iter().copied().collect();
        (0..mesh.n_points() as u32)
            .filter(|p| !boundary.contains(p) && !self.locked.contains(p))
            .collect()
    }

    fn relax_toward_neighbours(
        mesh: &mut VolumeMesh,
        neighbours: &HashMap<u32, Vec<u32>>,
        points: &[u32],
        weight: f64,
    ) {
        let updates: Vec<(u32, Point3<f64>)> = points
            .iter()
            .filter_map(|&p| {
                let nbs = neighbours.get(&p)?;
                if nbs.is_empty() {
                    return None;
                }
                let mut acc = Vector3::zeros();
                for &n in nbs {
                    acc += mesh.points[n as usize].coords;
                }
                let average = acc / nbs.len() as f64;
                let blended =
                    mesh.points[p as usize].coords * (1.0 - weight) + average * weight;
                Some((p, Point3::from(blended)))
            })
            .collect();
        for (p, pos) in updates {
            mesh.points[p as usize] = pos;
        }
    }

    /// Laplacian smoothing of the mesh interior.
    pub fn optimize_mesh(&self, mesh: &mut VolumeMesh) -> MeshGenResult<()> {
        let movable = self.movable_points(mesh);
        if movable.is_empty() {
            return Ok(());
        }
        let neighbours = Self::point_neighbours(mesh);
        let weight = if self.constrained { 0.25 } else { 0.5 };
        for _ in 0..SMOOTHING_SWEEPS {
            Self::relax_toward_neighbours(mesh, &neighbours, &movable, weight);
        }
        debug!(
            target: "volmesh::optimizer",
            points = movable.len(),
            constrained = self.constrained,
            "Optimised mesh interior"
        );
        Ok(())
    }

    /// Isoperimetric shape quality: near 1 for round faces, near 0 for
    /// slivers.
    fn face_quality(mesh: &VolumeMesh, face: usize) -> f64 {
        let area = mesh.face_area_vector(face).norm();
        let pts = &mesh.faces[face].points;
        let mut perimeter = 0.0;
        for i in 0..pts.len() {
            let a = mesh.points[pts[i] as usize];
            let b = mesh.points[pts[(i + 1) % pts.len()] as usize];
            perimeter += (b - a).norm();
        }
        if perimeter <= 0.0 {
            return 0.0;
        }
        4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
    }

    /// Extra smoothing around low-quality faces. Returns how many faces
    /// fell below the quality threshold.
    pub fn optimize_low_quality_faces(&self, mesh: &mut VolumeMesh) -> MeshGenResult<usize> {
        let low: Vec<usize> = (0..mesh.n_faces())
            .filter(|&f| Self::face_quality(mesh, f) < QUALITY_THRESHOLD)
            .collect();
        if low.is_empty() {
            return Ok(0);
        }

        let movable: HashSet<u32> = self.movable_points(mesh).into_iter().collect();
        let mut points: Vec<u32> = low
            .iter()
            .flat_map(|&f| mesh.faces[f].points.iter().copied())
            .filter(|p| movable.contains(p))
            .collect();
        points.sort_unstable();
        points.dedup();

        let neighbours = Self::point_neighbours(mesh);
        Self::relax_toward_neighbours(mesh, &neighbours, &points, 0.75);

        debug!(
            target: "volmesh::optimizer",
            faces = low.len(),
            "Smoothed around low-quality faces"
        );
        Ok(low.len())
    }

    /// Whether a face is degenerate or points the wrong way relative to
    /// the cells it bounds.
    fn is_inverted(mesh: &VolumeMesh, face: usize) -> bool {
        let area_vec = mesh.face_area_vector(face);
        let owner = mesh.faces[face].owner as usize;
        let reference = match mesh.faces[face].neighbour {
            Some(nb) => mesh.cell_centre(nb as usize) - mesh.cell_centre(owner),
            None => mesh.face_centre(face) - mesh.cell_centre(owner),
        };
        let scale = reference.norm().max(1e-30);
        if area_vec.norm() < 1e-12 * scale * scale {
            return true;
        }
        area_vec.dot(&reference) <= 0.0
    }

    /// Repair inverted and degenerate faces by relaxing their interior
    /// points. Returns the number of faces still inverted after the sweep
    /// budget.
    pub fn untangle_mesh(&self, mesh: &mut VolumeMesh) -> MeshGenResult<usize> {
        let movable: HashSet<u32> = self.movable_points(mesh).into_iter().collect();
        let neighbours = Self::point_neighbours(mesh);

        for _ in 0..UNTANGLE_SWEEPS {
            let inverted: Vec<usize> = (0..mesh.n_faces())
                .filter(|&f| Self::is_inverted(mesh, f))
                .collect();
            if inverted.is_empty() {
                return Ok(0);
            }
            let mut points: Vec<u32> = inverted
                .iter()
                .flat_map(|&f| mesh.faces[f].points.iter().copied())
                .filter(|p| movable.contains(p))
                .collect();
            points.sort_unstable();
            points.dedup();
            if points.is_empty() {
                break;
            }
            Self::relax_toward_neighbours(mesh, &neighbours, &points, 0.75);
        }

        let remaining = (0..mesh.n_faces())
            .filter(|&f| Self::is_inverted(mesh, f))
            .count();
        if remaining > 0 {
            info!(
                target: "volmesh::optimizer",
                remaining,
                "Faces still inverted after repair budget"
            );
        }
        Ok(remaining)
    }
}

impl Default for MeshOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
