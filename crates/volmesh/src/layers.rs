//! Boundary layer insertion and refinement.
//!
//! A layer is added by extruding prism cells inward from the boundary
//! faces of the target patches: every boundary point of those faces is
//! duplicated a fraction of the local edge length inward, the cells behind
//! the boundary shrink onto the duplicated points, and a prism cell fills
//! the gap between each boundary face and its inward copy. The boundary
//! faces themselves keep their patch assignment, so layer insertion leaves
//! the patch set unchanged.
//!
//! When only some patches are layered, the side strip along the rim of the
//! layered region becomes boundary faces of the neighbouring patch.

use hashbrown::{HashMap, HashSet};
use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{MeshGenError, MeshGenResult};
use crate::mesh::{Cell, Face, VolumeMesh};

/// Fraction of the local boundary edge length used as layer thickness.
const THICKNESS_FRACTION: f64 = 0.3;

/// Bookkeeping for inserted boundary layers.
///
/// Kept by the generator between layer generation and layer refinement;
/// refinement uses the point pairing to grade the layer and to lock the
/// layer points against later movement.
#[derive(Debug, Clone, Default)]
pub struct LayerRecord {
    /// Prism cell ids created by layer insertion.
    pub cells: Vec<u32>,
    /// `(boundary point, duplicated inner point)` pairs.
    pub point_pairs: Vec<(u32, u32)>,
}

impl LayerRecord {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All points lying within the layer, sorted.
    pub fn points_in_layer(&self) -> Vec<u32> {
        let mut points: Vec<u32> = self
            .point_pairs
            .iter()
            .flat_map(|&(s, i)| [s, i])
            .collect();
        points.sort_unstable();
        points.dedup();
        points
    }

    /// The duplicated inner points, sorted.
    pub fn inner_points(&self) -> Vec<u32> {
        let mut points: Vec<u32> = self.point_pairs.iter().map(|&(_, i)| i).collect();
        points.sort_unstable();
        points
    }
}

/// Inserts and refines boundary layers on the volume mesh.
pub struct BoundaryLayerGenerator;

impl BoundaryLayerGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Add one layer under every boundary patch.
    pub fn add_layer_for_all_patches(&self, mesh: &mut VolumeMesh) -> MeshGenResult<LayerRecord> {
        let targets: HashSet<u32> = (0..mesh.patches.len() as u32).collect();
        self.add_layer(mesh, &targets)
    }

    /// Add one layer under the named patches only.
    ///
    /// Names not present in the mesh are skipped with a warning.
    pub fn add_layer_for_patches(
        &self,
        mesh: &mut VolumeMesh,
        names: &[String],
    ) -> MeshGenResult<LayerRecord> {
        let mut targets = HashSet::new();
        for name in names {
            match mesh.patches.iter().position(|p| p.name == *name) {
                Some(i) => {
                    targets.insert(i as u32);
                }
                None => warn!(
                    target: "volmesh::layers",
                    patch = name.as_str(),
                    "Unknown patch named in patchBoundaryLayers; skipping"
                ),
            }
        }
        if targets.is_empty() {
            return Ok(LayerRecord::default());
        }
        self.add_layer(mesh, &targets)
    }

    fn add_layer(
        &self,
        mesh: &mut VolumeMesh,
        targets: &HashSet<u32>,
    ) -> MeshGenResult<LayerRecord> {
        let layered: Vec<usize> = mesh
            .boundary_faces()
            .filter(|(_, f)| f.patch.is_some_and(|p| targets.contains(&p)))
            .map(|(f, _)| f)
            .collect();
        if layered.is_empty() {
            return Ok(LayerRecord::default());
        }
        let layered_set: HashSet<usize> = layered.iter().copied().collect();

        // boundary-edge adjacency over the pre-insertion faces; the
        // manifold invariant guarantees exactly two faces per edge
        let mut edge_faces: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
        for (f, face) in mesh.boundary_faces() {
            for e in face.edges() {
                edge_faces.entry(e).or_default().push(f);
            }
        }

        // inward direction and local length scale per layer point
        let mut normals: HashMap<u32, Vector3<f64>> = HashMap::new();
        let mut lengths: HashMap<u32, (f64, usize)> = HashMap::new();
        for &f in &layered {
            let area = mesh.face_area_vector(f);
            let pts = mesh.faces[f].points.clone();
            for i in 0..pts.len() {
                let a = pts[i];
                let b = pts[(i + 1) % pts.len()];
                let len = (mesh.points[b as usize] - mesh.points[a as usize]).norm();
                for p in [a, b] {
                    *normals.entry(p).or_insert_with(Vector3::zeros) += area;
                    let entry = lengths.entry(p).or_insert((0.0, 0));
                    entry.0 += len;
                    entry.1 += 1;
                }
            }
        }

        // duplicate every layer point a fraction of the local edge length
        // inward; iteration is sorted so point ids are deterministic
        let mut order: Vec<u32> = normals.keys().copied().collect();
        order.sort_unstable();
        let mut dup: HashMap<u32, u32> = HashMap::new();
        let mut point_pairs = Vec::with_capacity(order.len());
        for p in order {
            let normal = normals[&p];
            let norm = normal.norm();
            if norm <= 0.0 {
                return Err(MeshGenError::stage_failed(
                    "boundaryLayerGeneration",
                    format!("degenerate boundary normal at point {p}"),
                ));
            }
            let (total, count) = lengths[&p];
            let thickness = THICKNESS_FRACTION * total / count as f64;
            let inner = mesh.points[p as usize] - normal / norm * thickness;
            mesh.points.push(inner);
            let id = (mesh.points.len() - 1) as u32;
            dup.insert(p, id);
            point_pairs.push((p, id));
        }

        // the cells behind the boundary shrink onto the duplicated points;
        // the layered boundary faces keep their original points
        for (f, face) in mesh.faces.iter_mut().enumerate() {
            if layered_set.contains(&f) {
                continue;
            }
            for p in &mut face.points {
                if let Some(&d) = dup.get(p) {
                    *p = d;
                }
            }
        }

        // one prism cell per layered face
        let first_cell = mesh.cells.len() as u32;
        let prism_of: HashMap<usize, u32> = layered
            .iter()
            .enumerate()
            .map(|(i, &f)| (f, first_cell + i as u32))
            .collect();
        let mut prisms: Vec<Cell> = vec![Cell::default(); layered.len()];

        for &f in &layered {
            let prism = prism_of[&f];
            let old_owner = mesh.faces[f].owner;
            let pts = mesh.faces[f].points.clone();

            // the inward copy separates the shrunk cell from the prism;
            // same winding as the boundary face, so its normal leaves the
            // old owner
            let inner_points: Vec<u32> = pts.iter().map(|p| dup[p]).collect();
            let inner_id = mesh.faces.len() as u32;
            mesh.faces.push(Face {
                points: inner_points,
                owner: old_owner,
                neighbour: Some(prism),
                patch: None,
            });
            let owner_faces = &mut mesh.cells[old_owner as usize].faces;
            let slot = owner_faces
                .iter()
                .position(|&x| x == f as u32)
                .ok_or_else(|| {
                    MeshGenError::internal(format!("face {f} missing from its owner cell"))
                })?;
            owner_faces[slot] = inner_id;

            mesh.faces[f].owner = prism;
            let prism_faces = &mut prisms[(prism - first_cell) as usize].faces;
            prism_faces.push(f as u32);
            prism_faces.push(inner_id);
        }

        // side faces: shared between neighbouring prisms, or boundary rim
        // faces toward an unlayered patch
        let mut processed: HashSet<(u32, u32)> = HashSet::new();
        for &f in &layered {
            let prism = prism_of[&f];
            let pts = mesh.faces[f].points.clone();
            for i in 0..pts.len() {
                let a = pts[i];
                let b = pts[(i + 1) % pts.len()];
                let key = (a.min(b), a.max(b));
                if !processed.insert(key) {
                    continue;
                }
                let adjacent = edge_faces.get(&key).ok_or_else(|| {
                    MeshGenError::internal(format!(
                        "boundary edge ({}, {}) has no adjacency record",
                        key.0, key.1
                    ))
                })?;
                if adjacent.len() != 2 {
                    return Err(MeshGenError::internal(format!(
                        "boundary edge ({}, {}) borders {} boundary faces",
                        key.0,
                        key.1,
                        adjacent.len()
                    )));
                }
                let other = if adjacent[0] == f {
                    adjacent[1]
                } else {
                    adjacent[0]
                };

                // wound so the normal points away from this prism
                let quad = vec![b, a, dup[&a], dup[&b]];
                let id = mesh.faces.len() as u32;
                match prism_of.get(&other) {
                    Some(&other_prism) => {
                        mesh.faces.push(Face {
                            points: quad,
                            owner: prism,
                            neighbour: Some(other_prism),
                            patch: None,
                        });
                        prisms[(prism - first_cell) as usize].faces.push(id);
                        prisms[(other_prism - first_cell) as usize].faces.push(id);
                    }
                    None => {
                        let patch = mesh.faces[other].patch;
                        mesh.faces.push(Face {
                            points: quad,
                            owner: prism,
                            neighbour: None,
                            patch,
                        });
                        prisms[(prism - first_cell) as usize].faces.push(id);
                    }
                }
            }
        }

        mesh.cells.extend(prisms);
        mesh.clear_addressing();

        let record = LayerRecord {
            cells: (first_cell..mesh.cells.len() as u32).collect(),
            point_pairs,
        };
        info!(
            target: "volmesh::layers",
            cells = record.cells.len(),
            points = record.point_pairs.len(),
            "Inserted boundary layer"
        );
        Ok(record)
    }

    /// Halve the layer thickness, biasing resolution toward the wall.
    ///
    /// Point movement only; addressing stays valid.
    pub fn refine_layers(&self, mesh: &mut VolumeMesh, record: &LayerRecord) -> MeshGenResult<()> {
        for &(surface, inner) in &record.point_pairs {
            let s = mesh.points[surface as usize];
            let i = mesh.points[inner as usize];
            mesh.points[inner as usize] = s + (i - s) * 0.5;
        }
        debug!(
            target: "volmesh::layers",
            points = record.point_pairs.len(),
            "Refined boundary layers"
        );
        Ok(())
    }
}

impl Default for BoundaryLayerGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshDict;
    use crate::edges::EdgeExtractor;
    use crate::mapper::SurfaceMapper;
    use crate::morph::SurfaceMorpher;
    use crate::spatial::SpatialIndex;
    use crate::tessellation::TemplateTessellator;

    fn patched_cube() -> VolumeMesh {
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
        EdgeExtractor::new(&index).update_mesh_patches(&mut mesh).unwrap();
        mesh
    }

    #[test]
    fn test_layer_for_all_patches_on_two_cell_fixture() {
        let mut mesh = crate::mesh::fixtures::two_cell_mesh();
        let record = BoundaryLayerGenerator::new()
            .add_layer_for_all_patches(&mut mesh)
            .unwrap();

        // one prism per boundary face
        assert_eq!(record.cells.len(), 10);
        assert_eq!(mesh.n_cells(), 12);
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.n_boundary_faces, 10);
    }

    #[test]
    fn test_layer_for_all_patches_on_cube() {
        let mut mesh = patched_cube();
        let boundary_before = mesh.boundary_faces().count();
        let cells_before = mesh.n_cells();
        let patch_names: Vec<String> =
            mesh.patches.iter().map(|p| p.name.clone()).collect();

        let record = BoundaryLayerGenerator::new()
            .add_layer_for_all_patches(&mut mesh)
            .unwrap();

        assert_eq!(record.cells.len(), boundary_before);
        assert_eq!(mesh.n_cells(), cells_before + boundary_before);
        // patch set unchanged by layer insertion
        assert_eq!(
            mesh.patches.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
            patch_names
        );
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
    }

    #[test]
    fn test_layer_for_single_patch() {
        let mut mesh = patched_cube();
        let cells_before = mesh.n_cells();
        let top = mesh
            .patches
            .iter()
            .position(|p| p.name == "top")
            .unwrap() as u32;
        let top_faces = mesh
            .boundary_faces()
            .filter(|(_, f)| f.patch == Some(top))
            .count();

        let record = BoundaryLayerGenerator::new()
            .add_layer_for_patches(&mut mesh, &["top".to_string()])
            .unwrap();

        assert_eq!(record.cells.len(), top_faces);
        assert_eq!(mesh.n_cells(), cells_before + top_faces);
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
    }

    #[test]
    fn test_unknown_patch_adds_nothing() {
        let mut mesh = patched_cube();
        let cells_before = mesh.n_cells();
        let record = BoundaryLayerGenerator::new()
            .add_layer_for_patches(&mut mesh, &["noSuchPatch".to_string()])
            .unwrap();
        assert!(record.is_empty());
        assert_eq!(mesh.n_cells(), cells_before);
    }

    #[test]
    fn test_refine_halves_layer_thickness() {
        let mut mesh = patched_cube();
        let generator = BoundaryLayerGenerator::new();
        let record = generator.add_layer_for_all_patches(&mut mesh).unwrap();

        let before: Vec<f64> = record
            .point_pairs
            .iter()
            .map(|&(s, i)| (mesh.points[i as usize] - mesh.points[s as usize]).norm())
            .collect();
        generator.refine_layers(&mut mesh, &record).unwrap();
        for (&(s, i), d) in record.point_pairs.iter().zip(before) {
            let after = (mesh.points[i as usize] - mesh.points[s as usize]).norm();
            assert!((after - d * 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_layer_record_point_sets() {
        let mut mesh = crate::mesh::fixtures::two_cell_mesh();
        let record = BoundaryLayerGenerator::new()
            .add_layer_for_all_patches(&mut mesh)
            .unwrap();
        let all = record.points_in_layer();
        let inner = record.inner_points();
        assert_eq!(all.len(), record.point_pairs.len() * 2);
        assert_eq!(inner.len(), record.point_pairs.len());
        assert!(inner.iter().all(|p| all.contains(p)));
    }
}
