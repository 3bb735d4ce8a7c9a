//! Spatial index over the input surface.
//!
//! A median-split AABB tree accelerates closest-point and ray queries
//! against the surface triangulation; a uniform coarse decomposition of
//! the surface bounding box supplies the leaf boxes the tessellation stage
//! turns into template cells.
//!
//! The index is built once over exactly one surface and is never mutated
//! in place. When a later pipeline stage needs an index over a different
//! surface (anisotropic back-projection), the owner drops this instance
//! and builds a replacement from scratch.

use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::config::MeshDict;
use crate::error::{MeshGenError, MeshGenResult};
use crate::surface::{TriSurf, Triangle};

const RAY_EPSILON: f64 = 1e-12;

/// Fixed parity-ray direction, chosen away from the coordinate axes so
/// axis-aligned geometry does not produce grazing hits.
fn parity_ray_direction() -> Vector3<f64> {
    Vector3::new(0.5410441, 0.4183063, 0.7302967).normalize()
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    fn from_triangle(tri: &Triangle) -> Self {
        let min = Point3::new(
            tri.a.x.min(tri.b.x).min(tri.c.x),
            tri.a.y.min(tri.b.y).min(tri.c.y),
            tri.a.z.min(tri.b.z).min(tri.c.z),
        );
        let max = Point3::new(
            tri.a.x.max(tri.b.x).max(tri.c.x),
            tri.a.y.max(tri.b.y).max(tri.c.y),
            tri.a.z.max(tri.b.z).max(tri.c.z),
        );
        Self { min, max }
    }

    fn expand(&self, epsilon: f64) -> Self {
        Self {
            min: Point3::new(
                self.min.x - epsilon,
                self.min.y - epsilon,
                self.min.z - epsilon,
            ),
            max: Point3::new(
                self.max.x + epsilon,
                self.max.y + epsilon,
                self.max.z + epsilon,
            ),
        }
    }

    fn union(&self, other: &Aabb) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// Squared distance from a point to the box (zero inside).
    fn distance_squared(&self, p: &Point3<f64>) -> f64 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        let dz = (self.min.z - p.z).max(0.0).max(p.z - self.max.z);
        dx * dx + dy * dy + dz * dz
    }

    /// Slab test; returns `(t_near, t_far)` when the ray hits the box.
    fn ray_intersect(&self, origin: &Point3<f64>, dir_inv: &Vector3<f64>) -> Option<(f64, f64)> {
        let t1 = (self.min.x - origin.x) * dir_inv.x;
        let t2 = (self.max.x - origin.x) * dir_inv.x;
        let t3 = (self.min.y - origin.y) * dir_inv.y;
        let t4 = (self.max.y - origin.y) * dir_inv.y;
        let t5 = (self.min.z - origin.z) * dir_inv.z;
        let t6 = (self.max.z - origin.z) * dir_inv.z;

        let t_min = t1.min(t2).max(t3.min(t4)).max(t5.min(t6));
        let t_max = t1.max(t2).min(t3.max(t4)).min(t5.max(t6));

        if t_max >= t_min && t_max >= 0.0 {
            Some((t_min.max(0.0), t_max))
        } else {
            None
        }
    }
}

#[derive(Debug)]
enum BvhNode {
    Leaf {
        aabb: Aabb,
        tri_idx: usize,
    },
    Internal {
        aabb: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn build(surf: &TriSurf, indices: &mut [usize], epsilon: f64) -> Option<Self> {
        if indices.is_empty() {
            return None;
        }
        if indices.len() == 1 {
            let idx = indices[0];
            return Some(BvhNode::Leaf {
                aabb: Aabb::from_triangle(&surf.triangle(idx)).expand(epsilon),
                tri_idx: idx,
            });
        }

        let mut combined = Aabb::from_triangle(&surf.triangle(indices[0]));
        for &idx in indices.iter().skip(1) {
            combined = combined.union(&Aabb::from_triangle(&surf.triangle(idx)));
        }
        let combined = combined.expand(epsilon);

        // split along the longest extent at the centroid median
        let extent = combined.max - combined.min;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        indices.sort_by(|&a, &b| {
            let ca = surf.triangle(a).centroid();
            let cb = surf.triangle(b).centroid();
            let va = match axis {
                0 => ca.x,
                1 => ca.y,
                _ => ca.z,
            };
            let vb = match axis {
                0 => cb.x,
                1 => cb.y,
                _ => cb.z,
            };
            va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mid = indices.len() / 2;
        let (left_indices, right_indices) = indices.split_at_mut(mid);

        let left = BvhNode::build(surf, left_indices, epsilon);
        let right = BvhNode::build(surf, right_indices, epsilon);

        match (left, right) {
            (Some(l), Some(r)) => Some(BvhNode::Internal {
                aabb: combined,
                left: Box::new(l),
                right: Box::new(r),
            }),
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }

    fn aabb(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { aabb, .. } => aabb,
            BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// Result of a closest-point query.
#[derive(Debug, Clone, Copy)]
pub struct ClosestPoint {
    pub point: Point3<f64>,
    pub triangle: usize,
    pub distance: f64,
}

/// Uniform leaf-box decomposition of the surface bounding box.
///
/// Boxes are cubes of edge `cell_size` on a lattice anchored at `origin`;
/// the lattice point `(i, j, k)` sits at `origin + cell_size * (i, j, k)`.
#[derive(Debug, Clone)]
pub struct CoarseDecomposition {
    pub origin: Point3<f64>,
    pub cell_size: f64,
    pub dims: [usize; 3],
}

impl CoarseDecomposition {
    /// Centre of box `(i, j, k)`.
    #[inline]
    pub fn box_center(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        Point3::new(
            self.origin.x + self.cell_size * (i as f64 + 0.5),
            self.origin.y + self.cell_size * (j as f64 + 0.5),
            self.origin.z + self.cell_size * (k as f64 + 0.5),
        )
    }

    /// Lattice point `(i, j, k)`.
    #[inline]
    pub fn lattice_point(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        Point3::new(
            self.origin.x + self.cell_size * i as f64,
            self.origin.y + self.cell_size * j as f64,
            self.origin.z + self.cell_size * k as f64,
        )
    }

    /// Total number of leaf boxes.
    pub fn box_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }
}

/// Bounding-volume hierarchy plus coarse decomposition over one surface.
#[derive(Debug)]
pub struct SpatialIndex {
    surface: TriSurf,
    root: Option<BvhNode>,
    bounds: Aabb,
    decomposition: Option<CoarseDecomposition>,
}

impl SpatialIndex {
    /// Build the index over a snapshot of `surf`.
    ///
    /// The decomposition is not built here; call
    /// [`SpatialIndex::create_decomposition`] before template generation.
    pub fn new(surf: &TriSurf) -> MeshGenResult<Self> {
        let (min, max) = surf
            .bounds()
            .ok_or_else(|| MeshGenError::surface_invalid("surface has no points"))?;
        let bounds = Aabb { min, max };

        let mut indices: Vec<usize> = (0..surf.triangles.len()).collect();
        let extent = max - min;
        let epsilon = extent.norm().max(1.0) * 1e-12;
        let root = BvhNode::build(surf, &mut indices, epsilon);

        Ok(Self {
            surface: surf.clone(),
            root,
            bounds,
            decomposition: None,
        })
    }

    /// Build the coarse decomposition from the dictionary's `maxCellSize`
    /// (default: a 32nd of the longest bounding-box extent).
    pub fn create_decomposition(&mut self, dict: &MeshDict) -> MeshGenResult<()> {
        let extent = self.bounds.max - self.bounds.min;
        let default_size = extent.x.max(extent.y).max(extent.z) / 32.0;
        let cell_size = dict.get_or_default("maxCellSize", default_size)?;
        self.create_decomposition_with_cell_size(cell_size)
    }

    /// Like [`SpatialIndex::create_decomposition`] with the leaf size
    /// bounded by a refinement-level window, for the back-projection index.
    pub fn create_refined_decomposition(
        &mut self,
        dict: &MeshDict,
        min_levels: u32,
        max_levels: u32,
    ) -> MeshGenResult<()> {
        let extent = self.bounds.max - self.bounds.min;
        let longest = extent.x.max(extent.y).max(extent.z);
        let default_size = longest / 32.0;
        let requested: f64 = dict.get_or_default("maxCellSize", default_size)?;
        let coarsest = longest / min_levels as f64;
        let finest = longest / max_levels as f64;
        self.create_decomposition_with_cell_size(requested.clamp(finest, coarsest))
    }

    fn create_decomposition_with_cell_size(&mut self, cell_size: f64) -> MeshGenResult<()> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(MeshGenError::malformed_section(
                "maxCellSize",
                format!("must be a positive number, got {cell_size}"),
            ));
        }
        let extent = self.bounds.max - self.bounds.min;
        // quarter-cell margin keeps box centres off the surface when the
        // extent is an exact multiple of the cell size
        let margin = cell_size * 0.25;
        let origin = Point3::new(
            self.bounds.min.x - margin,
            self.bounds.min.y - margin,
            self.bounds.min.z - margin,
        );
        let dims = [
            ((extent.x + 2.0 * margin) / cell_size).ceil() as usize,
            ((extent.y + 2.0 * margin) / cell_size).ceil() as usize,
            ((extent.z + 2.0 * margin) / cell_size).ceil() as usize,
        ];
        let decomposition = CoarseDecomposition {
            origin,
            cell_size,
            dims,
        };
        debug!(
            target: "volmesh::spatial",
            cell_size,
            boxes = decomposition.box_count(),
            "Built coarse decomposition"
        );
        self.decomposition = Some(decomposition);
        Ok(())
    }

    /// The coarse decomposition, if built.
    pub fn decomposition(&self) -> Option<&CoarseDecomposition> {
        self.decomposition.as_ref()
    }

    /// The indexed surface snapshot.
    pub fn surface(&self) -> &TriSurf {
        &self.surface
    }

    /// Closest point on the surface to `p`.
    pub fn closest_point(&self, p: &Point3<f64>) -> MeshGenResult<ClosestPoint> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| MeshGenError::internal("spatial index has no triangles"))?;
        let mut best = ClosestPoint {
            point: *p,
            triangle: usize::MAX,
            distance: f64::INFINITY,
        };
        self.closest_point_in(root, p, &mut best);
        debug_assert!(best.triangle != usize::MAX);
        Ok(best)
    }

    fn closest_point_in(&self, node: &BvhNode, p: &Point3<f64>, best: &mut ClosestPoint) {
        if node.aabb().distance_squared(p) >= best.distance * best.distance {
            return;
        }
        match node {
            BvhNode::Leaf { tri_idx, .. } => {
                let candidate = self.surface.triangle(*tri_idx).closest_point(p);
                let distance = (candidate - p).norm();
                if distance < best.distance {
                    *best = ClosestPoint {
                        point: candidate,
                        triangle: *tri_idx,
                        distance,
                    };
                }
            }
            BvhNode::Internal { left, right, .. } => {
                // nearer child first for tighter pruning
                let dl = left.aabb().distance_squared(p);
                let dr = right.aabb().distance_squared(p);
                if dl <= dr {
                    self.closest_point_in(left, p, best);
                    self.closest_point_in(right, p, best);
                } else {
                    self.closest_point_in(right, p, best);
                    self.closest_point_in(left, p, best);
                }
            }
        }
    }

    /// Whether `p` lies inside the closed surface (ray-crossing parity).
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        let Some(root) = self.root.as_ref() else {
            return false;
        };
        let direction = parity_ray_direction();
        let dir_inv = Vector3::new(
            1.0 / direction.x,
            1.0 / direction.y,
            1.0 / direction.z,
        );
        let mut hits = Vec::new();
        self.collect_ray_hits(root, p, &direction, &dir_inv, &mut hits);
        hits.sort_by(|a, b| a.total_cmp(b));

        let extent = (self.bounds.max - self.bounds.min).norm().max(1.0);
        let tol = extent * 1e-9;
        let mut crossings = 0usize;
        let mut last_t = f64::NEG_INFINITY;
        for t in hits {
            // coincident hits on shared triangle edges count once
            if t - last_t > tol {
                crossings += 1;
                last_t = t;
            }
        }
        crossings % 2 == 1
    }

    fn collect_ray_hits(
        &self,
        node: &BvhNode,
        origin: &Point3<f64>,
        direction: &Vector3<f64>,
        dir_inv: &Vector3<f64>,
        hits: &mut Vec<f64>,
    ) {
        if node.aabb().ray_intersect(origin, dir_inv).is_none() {
            return;
        }
        match node {
            BvhNode::Leaf { tri_idx, .. } => {
                if let Some(t) =
                    self.surface
                        .triangle(*tri_idx)
                        .ray_intersect(origin, direction, RAY_EPSILON)
                {
                    hits.push(t);
                }
            }
            BvhNode::Internal { left, right, .. } => {
                self.collect_ray_hits(left, origin, direction, dir_inv, hits);
                self.collect_ray_hits(right, origin, direction, dir_inv, hits);
            }
        }
    }

    /// Surface edges separating triangles of different patches, as point
    /// pairs. Feature-respecting boundary derivation uses these segments.
    pub fn inter_patch_edges(&self) -> Vec<(Point3<f64>, Point3<f64>)> {
        use hashbrown::HashMap;
        let mut edge_info: HashMap<(u32, u32), (u32, bool)> = HashMap::new();
        for (t, tri) in self.surface.triangles.iter().enumerate() {
            let patch = self.surface.triangle_patch[t];
            for k in 0..3 {
                let a = tri[k];
                let b = tri[(k + 1) % 3];
                let key = (a.min(b), a.max(b));
                match edge_info.get_mut(&key) {
                    None => {
                        edge_info.insert(key, (patch, false));
                    }
                    Some(entry) => {
                        if entry.0 != patch {
                            entry.1 = true;
                        }
                    }
                }
            }
        }
        edge_info
            .into_iter()
            .filter(|&(_, (_, split))| split)
            .map(|((a, b), _)| {
                (
                    self.surface.points[a as usize],
                    self.surface.points[b as usize],
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::TriSurf;

    fn cube_surface() -> TriSurf {
        crate::surface::fixtures::cube_surface()
    }

    #[test]
    fn test_closest_point_outside_cube() {
        let surf = cube_surface();
        let index = SpatialIndex::new(&surf).unwrap();
        let cp = index.closest_point(&Point3::new(0.5, 0.5, 2.0)).unwrap();
        assert!((cp.point - Point3::new(0.5, 0.5, 1.0)).norm() < 1e-10);
        assert!((cp.distance - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_closest_point_inside_cube() {
        let surf = cube_surface();
        let index = SpatialIndex::new(&surf).unwrap();
        let cp = index.closest_point(&Point3::new(0.5, 0.5, 0.9)).unwrap();
        assert!((cp.distance - 0.1).abs() < 1e-10);
    }

    #[test]
    fn test_containment_parity() {
        let surf = cube_surface();
        let index = SpatialIndex::new(&surf).unwrap();
        assert!(index.contains(&Point3::new(0.5, 0.5, 0.5)));
        assert!(index.contains(&Point3::new(0.1, 0.9, 0.2)));
        assert!(!index.contains(&Point3::new(1.5, 0.5, 0.5)));
        assert!(!index.contains(&Point3::new(-0.2, -0.2, -0.2)));
    }

    #[test]
    fn test_decomposition_covers_bounds() {
        let surf = cube_surface();
        let mut index = SpatialIndex::new(&surf).unwrap();
        let dict = crate::config::MeshDict::from_toml_str("maxCellSize = 0.25").unwrap();
        index.create_decomposition(&dict).unwrap();
        let d = index.decomposition().unwrap();
        assert_eq!(d.cell_size, 0.25);
        // 1.0 extent plus a quarter-cell margin on each side
        assert_eq!(d.dims, [5, 5, 5]);
        assert!(d.origin.x < 0.0);
    }

    #[test]
    fn test_inter_patch_edges_of_cube() {
        let surf = cube_surface();
        let index = SpatialIndex::new(&surf).unwrap();
        let edges = index.inter_patch_edges();
        // cube face patches meet along the 12 geometric edges; each is
        // split into surface edges between differently-patched triangles
        assert_eq!(edges.len(), 12);
    }
}
