//! Input surface geometry: loading, validation, and patch derivation.
//!
//! The geometry source is an immutable closed triangulated surface with
//! named boundary patches and an optional feature-edge set. The supported
//! on-disk form is an OBJ dialect:
//!
//! - `v x y z` - point
//! - `f a b c ...` - facet (fan-triangulated, 1-based indices, `a/t/n`
//!   forms accepted)
//! - `g name` - starts a new patch; subsequent facets belong to it
//! - `l a b` - feature edge between two points
//!
//! While the feature-edge set is non-empty, the active surface used by the
//! pipeline is the patch-annotated variant produced by
//! [`PatchManipulator`], not the raw one.

use std::path::Path;

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::config::MeshDict;
use crate::error::{MeshGenError, MeshGenResult};

/// A named subset of surface facets sharing a boundary role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfacePatch {
    pub name: String,
}

/// A triangle with concrete vertex positions.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub a: Point3<f64>,
    pub b: Point3<f64>,
    pub c: Point3<f64>,
}

impl Triangle {
    #[inline]
    pub fn new(a: Point3<f64>, b: Point3<f64>, c: Point3<f64>) -> Self {
        Self { a, b, c }
    }

    /// Unnormalized normal via the cross product (right-hand rule).
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.b - self.a).cross(&(self.c - self.a))
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::new(
            (self.a.x + self.b.x + self.c.x) / 3.0,
            (self.a.y + self.b.y + self.c.y) / 3.0,
            (self.a.z + self.b.z + self.c.z) / 3.0,
        )
    }

    /// Closest point on the triangle to `p`.
    ///
    /// Region classification against the vertex/edge/face Voronoi regions;
    /// degenerate triangles collapse to the closest vertex or edge.
    pub fn closest_point(&self, p: &Point3<f64>) -> Point3<f64> {
        let ab = self.b - self.a;
        let ac = self.c - self.a;
        let ap = p - self.a;

        let d1 = ab.dot(&ap);
        let d2 = ac.dot(&ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return self.a;
        }

        let bp = p - self.b;
        let d3 = ab.dot(&bp);
        let d4 = ac.dot(&bp);
        if d3 >= 0.0 && d4 <= d3 {
            return self.b;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return self.a + ab * v;
        }

        let cp = p - self.c;
        let d5 = ab.dot(&cp);
        let d6 = ac.dot(&cp);
        if d6 >= 0.0 && d5 <= d6 {
            return self.c;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return self.a + ac * w;
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return self.b + (self.c - self.b) * w;
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        self.a + ab * v + ac * w
    }

    /// Möller–Trumbore ray intersection; returns the ray parameter `t`.
    pub fn ray_intersect(
        &self,
        origin: &Point3<f64>,
        direction: &Vector3<f64>,
        epsilon: f64,
    ) -> Option<f64> {
        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;

        let h = direction.cross(&edge2);
        let det = edge1.dot(&h);
        if det.abs() < epsilon {
            return None;
        }

        let inv = 1.0 / det;
        let s = origin - self.a;
        let u = inv * s.dot(&h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(&edge1);
        let v = inv * direction.dot(&q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = inv * edge2.dot(&q);
        if t > epsilon { Some(t) } else { None }
    }
}

/// Immutable triangulated input surface.
#[derive(Debug, Clone)]
pub struct TriSurf {
    pub points: Vec<Point3<f64>>,
    /// Triangles as indices into `points`, CCW from outside.
    pub triangles: Vec<[u32; 3]>,
    /// Patch id per triangle, parallel to `triangles`.
    pub triangle_patch: Vec<u32>,
    pub patches: Vec<SurfacePatch>,
    /// Point-index pairs marking geometric discontinuities.
    pub feature_edges: Vec<[u32; 2]>,
}

impl TriSurf {
    /// Load a surface from an OBJ-dialect file.
    pub fn load(path: impl AsRef<Path>) -> MeshGenResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| MeshGenError::surface_read(path, e))?;
        let surf = Self::parse(&contents)
            .map_err(|details| MeshGenError::surface_parse(path, details))?;
        info!(
            target: "volmesh::surface",
            path = path.display().to_string(),
            points = surf.points.len(),
            triangles = surf.triangles.len(),
            patches = surf.patches.len(),
            feature_edges = surf.feature_edges.len(),
            "Loaded surface"
        );
        Ok(surf)
    }

    pub(crate) fn parse(contents: &str) -> Result<Self, String> {
        let mut points = Vec::new();
        let mut triangles = Vec::new();
        let mut triangle_patch = Vec::new();
        let mut patches: Vec<SurfacePatch> = Vec::new();
        let mut feature_edges = Vec::new();
        let mut current_patch: Option<u32> = None;

        let parse_index = |tok: &str, n_points: usize, line_no: usize| -> Result<u32, String> {
            let idx_part = tok.split('/').next().unwrap_or(tok);
            let idx: i64 = idx_part
                .parse()
                .map_err(|_| format!("line {line_no}: bad index '{tok}'"))?;
            let resolved = if idx < 0 {
                n_points as i64 + idx
            } else {
                idx - 1
            };
            if resolved < 0 || resolved as usize >= n_points {
                return Err(format!("line {line_no}: index {idx} out of range"));
            }
            Ok(resolved as u32)
        };

        for (line_no, line) in contents.lines().enumerate() {
            let line_no = line_no + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };
            match keyword {
                "v" => {
                    let coords: Vec<f64> = tokens
                        .take(3)
                        .map(|t| t.parse().map_err(|_| format!("line {line_no}: bad coordinate")))
                        .collect::<Result<_, _>>()?;
                    if coords.len() != 3 {
                        return Err(format!("line {line_no}: vertex needs 3 coordinates"));
                    }
                    points.push(Point3::new(coords[0], coords[1], coords[2]));
                }
                "f" => {
                    let idx: Vec<u32> = tokens
                        .map(|t| parse_index(t, points.len(), line_no))
                        .collect::<Result<_, _>>()?;
                    if idx.len() < 3 {
                        return Err(format!("line {line_no}: facet needs at least 3 vertices"));
                    }
                    let patch = match current_patch {
                        Some(p) => p,
                        None => {
                            patches.push(SurfacePatch {
                                name: "patch0".to_string(),
                            });
                            let p = (patches.len() - 1) as u32;
                            current_patch = Some(p);
                            p
                        }
                    };
                    // fan triangulation of polygonal facets
                    for i in 1..idx.len() - 1 {
                        triangles.push([idx[0], idx[i], idx[i + 1]]);
                        triangle_patch.push(patch);
                    }
                }
                "g" | "o" => {
                    let name = tokens
                        .next()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("patch{}", patches.len()));
                    let existing = patches.iter().position(|p| p.name == name);
                    let id = match existing {
                        Some(i) => i as u32,
                        None => {
                            patches.push(SurfacePatch { name });
                            (patches.len() - 1) as u32
                        }
                    };
                    current_patch = Some(id);
                }
                "l" => {
                    let idx: Vec<u32> = tokens
                        .map(|t| parse_index(t, points.len(), line_no))
                        .collect::<Result<_, _>>()?;
                    // polyline segments become individual feature edges
                    for pair in idx.windows(2) {
                        feature_edges.push([pair[0], pair[1]]);
                    }
                }
                // normals, texcoords, materials and smoothing groups are ignored
                "vn" | "vt" | "usemtl" | "mtllib" | "s" => {}
                _ => {}
            }
        }

        if triangles.is_empty() {
            return Err("surface has no facets".to_string());
        }

        Ok(Self {
            points,
            triangles,
            triangle_patch,
            patches,
            feature_edges,
        })
    }

    #[inline]
    pub fn triangle(&self, i: usize) -> Triangle {
        let [a, b, c] = self.triangles[i];
        Triangle::new(
            self.points[a as usize],
            self.points[b as usize],
            self.points[c as usize],
        )
    }

    /// Axis-aligned bounding box, or `None` for an empty surface.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.points.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Some((min, max))
    }

    /// Whether every edge is shared by exactly two triangles.
    pub fn is_closed(&self) -> bool {
        let mut edge_use: HashMap<(u32, u32), u32> = HashMap::new();
        for tri in &self.triangles {
            for k in 0..3 {
                let a = tri[k];
                let b = tri[(k + 1) % 3];
                let key = (a.min(b), a.max(b));
                *edge_use.entry(key).or_insert(0) += 1;
            }
        }
        edge_use.values().all(|&n| n == 2)
    }

    /// Verify the closed 2-manifold requirement, with a counted diagnostic.
    pub fn check_closed(&self) -> MeshGenResult<()> {
        let mut edge_use: HashMap<(u32, u32), u32> = HashMap::new();
        for tri in &self.triangles {
            for k in 0..3 {
                let a = tri[k];
                let b = tri[(k + 1) % 3];
                let key = (a.min(b), a.max(b));
                *edge_use.entry(key).or_insert(0) += 1;
            }
        }
        let open = edge_use.values().filter(|&&n| n == 1).count();
        let non_manifold = edge_use.values().filter(|&&n| n > 2).count();
        if open > 0 || non_manifold > 0 {
            return Err(MeshGenError::surface_invalid(format!(
                "{open} open edges, {non_manifold} non-manifold edges"
            )));
        }
        Ok(())
    }

    /// Geometric summary attached to the output context as metadata.
    pub fn meta_data(&self, source: &Path) -> serde_json::Value {
        let bounds = self.bounds().map(|(min, max)| {
            serde_json::json!({
                "min": [min.x, min.y, min.z],
                "max": [max.x, max.y, max.z],
            })
        });
        serde_json::json!({
            "surfaceFile": source.display().to_string(),
            "nPoints": self.points.len(),
            "nTriangles": self.triangles.len(),
            "patches": self.patches.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
            "nFeatureEdges": self.feature_edges.len(),
            "bounds": bounds,
        })
    }
}

/// Derives a patch-annotated surface variant from feature edges.
///
/// Triangles are partitioned by flood fill that never crosses a feature
/// edge; each region becomes a patch. The inferred patch names are written
/// back into the shared meshing dictionary so that patch assignment and
/// the renaming tail observe consistent names.
pub struct PatchManipulator<'a> {
    surf: &'a TriSurf,
}

impl<'a> PatchManipulator<'a> {
    pub fn new(surf: &'a TriSurf) -> Self {
        Self { surf }
    }

    /// Build the patch-annotated variant and record its patches in `dict`
    /// under `surfacePatches`.
    pub fn surface_with_patches(&self, dict: &mut MeshDict) -> TriSurf {
        let surf = self.surf;
        let feature: HashSet<(u32, u32)> = surf
            .feature_edges
            .iter()
            .map(|&[a, b]| (a.min(b), a.max(b)))
            .collect();

        // edge -> adjacent triangles
        let mut edge_tris: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
        for (t, tri) in surf.triangles.iter().enumerate() {
            for k in 0..3 {
                let a = tri[k];
                let b = tri[(k + 1) % 3];
                edge_tris
                    .entry((a.min(b), a.max(b)))
                    .or_default()
                    .push(t as u32);
            }
        }

        let n = surf.triangles.len();
        let mut region = vec![u32::MAX; n];
        let mut n_regions = 0u32;
        let mut stack = Vec::new();

        for seed in 0..n {
            if region[seed] != u32::MAX {
                continue;
            }
            region[seed] = n_regions;
            stack.push(seed as u32);
            while let Some(t) = stack.pop() {
                let tri = surf.triangles[t as usize];
                for k in 0..3 {
                    let a = tri[k];
                    let b = tri[(k + 1) % 3];
                    let key = (a.min(b), a.max(b));
                    if feature.contains(&key) {
                        continue;
                    }
                    if let Some(adjacent) = edge_tris.get(&key) {
                        for &other in adjacent {
                            if region[other as usize] == u32::MAX {
                                region[other as usize] = n_regions;
                                stack.push(other);
                            }
                        }
                    }
                }
            }
            n_regions += 1;
        }

        let patches: Vec<SurfacePatch> = (0..n_regions)
            .map(|i| SurfacePatch {
                name: format!("patch{i}"),
            })
            .collect();

        let mut patch_table = toml::Table::new();
        for p in &patches {
            patch_table.insert(p.name.clone(), toml::Value::String("patch".to_string()));
        }
        dict.set("surfacePatches", toml::Value::Table(patch_table));

        debug!(
            target: "volmesh::surface",
            regions = n_regions,
            "Derived patches from feature edges"
        );

        TriSurf {
            points: surf.points.clone(),
            triangles: surf.triangles.clone(),
            triangle_patch: region,
            patches,
            feature_edges: surf.feature_edges.clone(),
        }
    }
}
