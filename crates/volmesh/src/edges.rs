//! Patch assignment and feature-edge extraction.
//!
//! Patch assignment reassigns the provisional boundary faces into patches
//! mirroring the indexed surface: each boundary face joins the patch of
//! the surface triangle closest to its centre. Edge extraction then
//! classifies boundary vertices by the patches around them and snaps
//! edge and corner vertices onto the surface's feature lines.

use hashbrown::{HashMap, HashSet};
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::info;

use crate::error::{MeshGenError, MeshGenResult};
use crate::mesh::{BoundaryPatch, VolumeMesh};
use crate::spatial::SpatialIndex;

/// Derives feature-respecting patches and edge vertices from the index.
pub struct EdgeExtractor<'a> {
    index: &'a SpatialIndex,
}

impl<'a> EdgeExtractor<'a> {
    pub fn new(index: &'a SpatialIndex) -> Self {
        Self { index }
    }

    /// Reassign every boundary face into the surface's patch set.
    pub fn update_mesh_patches(&self, mesh: &mut VolumeMesh) -> MeshGenResult<()> {
        let surf = self.index.surface();
        if surf.patches.is_empty() {
            return Err(MeshGenError::internal("indexed surface carries no patches"));
        }

        let boundary: Vec<usize> = mesh.boundary_faces().map(|(f, _)| f).collect();
        let centres: Vec<Point3<f64>> =
            boundary.iter().map(|&f| mesh.face_centre(f)).collect();
        let assigned: Vec<MeshGenResult<u32>> = centres
            .par_iter()
            .map(|c| {
                let hit = self.index.closest_point(c)?;
                Ok(surf.triangle_patch[hit.triangle])
            })
            .collect();

        mesh.patches = surf
            .patches
            .iter()
            .map(|p| BoundaryPatch::new(&p.name))
            .collect();
        for (&f, patch) in boundary.iter().zip(assigned) {
            mesh.faces[f].patch = Some(patch?);
        }

        info!(
            target: "volmesh::edges",
            patches = mesh.patches.len(),
            faces = boundary.len(),
            "Assigned boundary faces to surface patches"
        );
        Ok(())
    }

    /// Patch ids adjacent to each boundary point.
    fn point_patches(mesh: &VolumeMesh) -> HashMap<u32, HashSet<u32>> {
        let mut map: HashMap<u32, HashSet<u32>> = HashMap::new();
        for (_, face) in mesh.boundary_faces() {
            if let Some(patch) = face.patch {
                for &p in &face.points {
                    map.entry(p).or_default().insert(patch);
                }
            }
        }
        map
    }

    /// Snap edge vertices (on two patches) onto the surface feature lines
    /// and corner vertices (on three or more) onto feature junctions.
    ///
    /// Feature lines are the surface's declared feature edges when it has
    /// any, otherwise the edges separating surface patches. Returns
    /// `(edge_vertices, corner_vertices)` snapped.
    pub fn map_edges_and_corners(&self, mesh: &mut VolumeMesh) -> MeshGenResult<(usize, usize)> {
        let surf = self.index.surface();
        let segments: Vec<(Point3<f64>, Point3<f64>)> = if surf.feature_edges.is_empty() {
            self.index.inter_patch_edges()
        } else {
            surf.feature_edges
                .iter()
                .map(|&[a, b]| (surf.points[a as usize], surf.points[b as usize]))
                .collect()
        };
        if segments.is_empty() {
            return Ok((0, 0));
        }

        // junctions: segment endpoints used by three or more segments
        let junctions = Self::junction_points(&segments);

        let point_patches = Self::point_patches(mesh);
        let mut order: Vec<u32> = point_patches.keys().copied().collect();
        order.sort_unstable();

        let mut edge_count = 0usize;
        let mut corner_count = 0usize;
        for p in order {
            let n_patches = point_patches[&p].len();
            if n_patches < 2 {
                continue;
            }
            let pos = mesh.points[p as usize];
            if n_patches >= 3 && !junctions.is_empty() {
                let nearest = junctions
                    .iter()
                    .min_by(|a, b| (*a - pos).norm().total_cmp(&(*b - pos).norm()))
                    .copied();
                if let Some(j) = nearest {
                    mesh.points[p as usize] = j;
                    corner_count += 1;
                    continue;
                }
            }
            mesh.points[p as usize] = Self::closest_on_segments(&segments, &pos);
            edge_count += 1;
        }

        info!(
            target: "volmesh::edges",
            edges = edge_count,
            corners = corner_count,
            "Snapped edge and corner vertices"
        );
        Ok((edge_count, corner_count))
    }

    fn junction_points(segments: &[(Point3<f64>, Point3<f64>)]) -> Vec<Point3<f64>> {
        let quantize = |p: &Point3<f64>| -> (i64, i64, i64) {
            let s = 1e9;
            (
                (p.x * s).round() as i64,
                (p.y * s).round() as i64,
                (p.z * s).round() as i64,
            )
        };
        let mut use_count: HashMap<(i64, i64, i64), (Point3<f64>, u32)> = HashMap::new();
        for (a, b) in segments {
            for p in [a, b] {
                use_count
                    .entry(quantize(p))
                    .and_modify(|e| e.1 += 1)
                    .or_insert((*p, 1));
            }
        }
        let mut junctions: Vec<Point3<f64>> = use_count
            .into_values()
            .filter(|&(_, n)| n >= 3)
            .map(|(p, _)| p)
            .collect();
        junctions.sort_by(|a, b| {
            (a.x, a.y, a.z)
                .partial_cmp(&(b.x, b.y, b.z))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        junctions
    }

    fn closest_on_segments(
        segments: &[(Point3<f64>, Point3<f64>)],
        p: &Point3<f64>,
    ) -> Point3<f64> {
        let mut best = *p;
        let mut best_dist = f64::INFINITY;
        for (a, b) in segments {
            let ab = b - a;
            let len2 = ab.norm_squared();
            let t = if len2 > 0.0 {
                ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let candidate = a + ab * t;
            let d = (candidate - p).norm();
            if d < best_dist {
                best_dist = d;
                best = candidate;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshDict;
    use crate::mapper::SurfaceMapper;
    use crate::morph::SurfaceMorpher;
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
    fn test_patch_assignment_mirrors_surface_patches() {
        let (mut mesh, index) = mapped_cube();
        EdgeExtractor::new(&index).update_mesh_patches(&mut mesh).unwrap();

        assert_eq!(mesh.patches.len(), 6);
        let counts = mesh.patch_face_counts();
        assert!(counts.iter().all(|&n| n > 0), "empty patch: {counts:?}");
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
    }

    #[test]
    fn test_edge_snapping_moves_multi_patch_points_to_cube_edges() {
        let (mut mesh, index) = mapped_cube();
        let extractor = EdgeExtractor::new(&index);
        extractor.update_mesh_patches(&mut mesh).unwrap();
        let (edges, corners) = extractor.map_edges_and_corners(&mut mesh).unwrap();
        assert!(edges > 0);
        assert!(corners > 0);

        // every multi-patch vertex now sits on a cube edge: at least two
        // coordinates are 0 or 1
        for (p, patch_set) in EdgeExtractor::point_patches(&mesh) {
            if patch_set.len() < 2 {
                continue;
            }
            let pos = mesh.points[p as usize];
            let snapped = [pos.x, pos.y, pos.z]
                .iter()
                .filter(|&&c| c.abs() < 1e-9 || (c - 1.0).abs() < 1e-9)
                .count();
            assert!(snapped >= 2, "vertex {p} at {pos:?} is off the cube edges");
        }
    }

    #[test]
    fn test_no_segments_is_noop() {
        // single-patch sphere-less case: one patch, no feature edges and
        // no inter-patch edges
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nf 1 3 2\nf 1 2 4\nf 2 3 4\nf 1 4 3\n";
        let surf = crate::surface::TriSurf::parse(obj).unwrap();
        let index = SpatialIndex::new(&surf).unwrap();
        let mut mesh = crate::mesh::fixtures::two_cell_mesh();
        let moved = EdgeExtractor::new(&index).map_edges_and_corners(&mut mesh).unwrap();
        assert_eq!(moved, (0, 0));
    }
}
