//! The volume mesh: the single mutable artifact threaded through every
//! pipeline stage.
//!
//! The mesh is a polyhedral cell/face/point complex. Faces are polygons
//! wound so their normal points out of the owner cell; internal faces
//! reference a neighbour cell, boundary faces reference a boundary patch
//! instead. The structural invariant every stage must restore before
//! returning control: each internal face bounds exactly two cells and each
//! boundary face bounds exactly one cell and belongs to exactly one patch.
//!
//! Derived addressing (point→faces, cell→points, the boundary point set)
//! is computed on demand and must be explicitly invalidated with
//! [`VolumeMesh::clear_addressing`] after any topology change. Pure point
//! movement does not invalidate addressing.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::config::MeshDict;
use crate::error::MeshGenResult;

/// A polygonal mesh face.
#[derive(Debug, Clone)]
pub struct Face {
    /// Point indices, wound so the normal points out of the owner cell.
    pub points: Vec<u32>,
    /// The cell this face belongs to.
    pub owner: u32,
    /// The cell on the other side, for internal faces.
    pub neighbour: Option<u32>,
    /// Boundary patch id, for boundary faces.
    pub patch: Option<u32>,
}

impl Face {
    /// Whether this is a boundary face.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.neighbour.is_none()
    }

    /// Undirected edges of the face polygon.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            (a.min(b), a.max(b))
        })
    }
}

/// A polyhedral cell, defined by its faces.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub faces: Vec<u32>,
}

/// A named group of boundary faces sharing a boundary role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryPatch {
    pub name: String,
    pub patch_type: String,
}

impl BoundaryPatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patch_type: "patch".to_string(),
        }
    }
}

/// Result of a topology validation pass.
#[derive(Debug, Clone, Default)]
pub struct TopologyReport {
    pub errors: Vec<String>,
    pub n_internal_faces: usize,
    pub n_boundary_faces: usize,
}

impl TopologyReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for TopologyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Topology: {} internal faces, {} boundary faces",
            self.n_internal_faces, self.n_boundary_faces
        )?;
        if self.errors.is_empty() {
            writeln!(f, "  valid")?;
        } else {
            for e in &self.errors {
                writeln!(f, "  ERROR: {e}")?;
            }
        }
        Ok(())
    }
}

/// Polyhedral volume mesh with boundary-patch assignment.
#[derive(Debug, Default)]
pub struct VolumeMesh {
    pub points: Vec<Point3<f64>>,
    pub faces: Vec<Face>,
    pub cells: Vec<Cell>,
    pub patches: Vec<BoundaryPatch>,

    // demand-driven addressing, invalidated on topology change
    point_faces: Option<Vec<Vec<u32>>>,
    cell_points: Option<Vec<Vec<u32>>>,
    boundary_points: Option<Vec<u32>>,
}

impl VolumeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Boundary faces with their indices.
    pub fn boundary_faces(&self) -> impl Iterator<Item = (usize, &Face)> {
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_boundary())
    }

    /// Drop all demand-driven addressing. Must be called after any change
    /// to faces, cells, patch membership or the point list's length.
    pub fn clear_addressing(&mut self) {
        self.point_faces = None;
        self.cell_points = None;
        self.boundary_points = None;
    }

    /// Faces using each point. Computed on first use.
    pub fn point_faces(&mut self) -> &[Vec<u32>] {
        let faces = &self.faces;
        let n_points = self.points.len();
        self.point_faces.get_or_insert_with(|| {
            let mut pf = vec![Vec::new(); n_points];
            for (i, face) in faces.iter().enumerate() {
                for &p in &face.points {
                    pf[p as usize].push(i as u32);
                }
            }
            pf
        })
    }

    /// Unique points of each cell. Computed on first use.
    pub fn cell_points(&mut self) -> &[Vec<u32>] {
        let faces = &self.faces;
        let cells = &self.cells;
        self.cell_points.get_or_insert_with(|| {
            let mut cp: Vec<Vec<u32>> = vec![Vec::new(); cells.len()];
            for (c, cell) in cells.iter().enumerate() {
                let mut seen = HashSet::new();
                for &f in &cell.faces {
                    for &p in &faces[f as usize].points {
                        if seen.insert(p) {
                            cp[c].push(p);
                        }
                    }
                }
            }
            cp
        })
    }

    /// Sorted unique points lying on boundary faces. Computed on first use.
    pub fn boundary_points(&mut self) -> &[u32] {
        let faces = &self.faces;
        self.boundary_points.get_or_insert_with(|| {
            let mut set = HashSet::new();
            for face in faces.iter().filter(|f| f.is_boundary()) {
                for &p in &face.points {
                    set.insert(p);
                }
            }
            let mut v: Vec<u32> = set.into_iter().collect();
            v.sort_unstable();
            v
        })
    }

    /// Polygon centre (point average).
    pub fn face_centre(&self, face: usize) -> Point3<f64> {
        let pts = &self.faces[face].points;
        let mut acc = Vector3::zeros();
        for &p in pts {
            acc += self.points[p as usize].coords;
        }
        Point3::from(acc / pts.len() as f64)
    }

    /// Polygon area vector via Newell's method; points out of the owner.
    pub fn face_area_vector(&self, face: usize) -> Vector3<f64> {
        let pts = &self.faces[face].points;
        let mut n = Vector3::zeros();
        for i in 0..pts.len() {
            let a = self.points[pts[i] as usize];
            let b = self.points[pts[(i + 1) % pts.len()] as usize];
            n.x += (a.y - b.y) * (a.z + b.z);
            n.y += (a.z - b.z) * (a.x + b.x);
            n.z += (a.x - b.x) * (a.y + b.y);
        }
        n * 0.5
    }

    /// Cell centre: average of the cell's unique points.
    pub fn cell_centre(&self, cell: usize) -> Point3<f64> {
        let mut seen = HashSet::new();
        let mut acc = Vector3::zeros();
        let mut n = 0usize;
        for &f in &self.cells[cell].faces {
            for &p in &self.faces[f as usize].points {
                if seen.insert(p) {
                    acc += self.points[p as usize].coords;
                    n += 1;
                }
            }
        }
        Point3::from(acc / n.max(1) as f64)
    }

    /// Register a boundary patch, returning its id. Reuses an existing
    /// patch with the same name.
    pub fn add_patch(&mut self, name: &str) -> u32 {
        if let Some(i) = self.patches.iter().position(|p| p.name == name) {
            return i as u32;
        }
        self.patches.push(BoundaryPatch::new(name));
        (self.patches.len() - 1) as u32
    }

    /// Number of boundary faces per patch.
    pub fn patch_face_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.patches.len()];
        for (_, f) in self.boundary_faces() {
            if let Some(p) = f.patch {
                if let Some(c) = counts.get_mut(p as usize) {
                    *c += 1;
                }
            }
        }
        counts
    }

    /// Patches with at least one boundary face.
    pub fn occupied_patches(&self) -> Vec<&BoundaryPatch> {
        self.patch_face_counts()
            .iter()
            .zip(&self.patches)
            .filter(|&(&n, _)| n > 0)
            .map(|(_, p)| p)
            .collect()
    }

    /// Check the structural invariant of the mesh.
    pub fn validate_topology(&self) -> TopologyReport {
        let mut report = TopologyReport::default();

        let n_cells = self.cells.len() as u32;
        let n_points = self.points.len() as u32;

        for (i, face) in self.faces.iter().enumerate() {
            if face.points.len() < 3 {
                report.errors.push(format!("face {i} has fewer than 3 points"));
            }
            let mut seen = HashSet::new();
            for &p in &face.points {
                if p >= n_points {
                    report.errors.push(format!("face {i} references point {p} out of range"));
                }
                if !seen.insert(p) {
                    report.errors.push(format!("face {i} repeats point {p}"));
                }
            }
            if face.owner >= n_cells {
                report.errors.push(format!("face {i} owner out of range"));
                continue;
            }
            if !self.cells[face.owner as usize].faces.contains(&(i as u32)) {
                report
                    .errors
                    .push(format!("face {i} missing from owner cell {}", face.owner));
            }
            match (face.neighbour, face.patch) {
                (Some(nb), None) => {
                    report.n_internal_faces += 1;
                    if nb >= n_cells {
                        report.errors.push(format!("face {i} neighbour out of range"));
                    } else if !self.cells[nb as usize].faces.contains(&(i as u32)) {
                        report
                            .errors
                            .push(format!("face {i} missing from neighbour cell {nb}"));
                    }
                    if face.neighbour == Some(face.owner) {
                        report.errors.push(format!("face {i} owner equals neighbour"));
                    }
                }
                (None, Some(patch)) => {
                    report.n_boundary_faces += 1;
                    if patch as usize >= self.patches.len() {
                        report.errors.push(format!("face {i} patch out of range"));
                    }
                }
                (None, None) => {
                    report
                        .errors
                        .push(format!("boundary face {i} belongs to no patch"));
                }
                (Some(_), Some(_)) => {
                    report
                        .errors
                        .push(format!("internal face {i} carries a patch"));
                }
            }
        }

        for (c, cell) in self.cells.iter().enumerate() {
            if cell.faces.len() < 4 {
                report.errors.push(format!("cell {c} has fewer than 4 faces"));
            }
            for &f in &cell.faces {
                if f as usize >= self.faces.len() {
                    report.errors.push(format!("cell {c} references face {f} out of range"));
                    continue;
                }
                let face = &self.faces[f as usize];
                if face.owner != c as u32 && face.neighbour != Some(c as u32) {
                    report
                        .errors
                        .push(format!("cell {c} lists face {f} it does not bound"));
                }
            }
        }

        // boundary manifoldness: each boundary edge shared by exactly two
        // boundary faces
        let mut edge_count: HashMap<(u32, u32), u32> = HashMap::new();
        for (_, face) in self.boundary_faces() {
            for e in face.edges() {
                *edge_count.entry(e).or_insert(0) += 1;
            }
        }
        for (edge, count) in edge_count {
            if count != 2 {
                report.errors.push(format!(
                    "boundary edge ({}, {}) shared by {count} boundary faces",
                    edge.0, edge.1
                ));
            }
        }

        report
    }

    /// Renumber cells, points and faces for locality.
    ///
    /// Cells are ordered breadth-first through face adjacency, points by
    /// first touch in the new cell order; internal faces come first sorted
    /// by owner then neighbour, boundary faces follow grouped by patch.
    pub fn renumber(&mut self) {
        if self.cells.is_empty() {
            return;
        }
        let n_cells = self.cells.len();

        // breadth-first cell ordering over face adjacency
        let mut cell_order = vec![u32::MAX; n_cells];
        let mut next = 0u32;
        let mut queue = std::collections::VecDeque::new();
        for seed in 0..n_cells {
            if cell_order[seed] != u32::MAX {
                continue;
            }
            cell_order[seed] = next;
            next += 1;
            queue.push_back(seed);
            while let Some(c) = queue.pop_front() {
                for &f in &self.cells[c].faces {
                    let face = &self.faces[f as usize];
                    let other = if face.owner == c as u32 {
                        face.neighbour
                    } else {
                        Some(face.owner)
                    };
                    if let Some(o) = other {
                        if cell_order[o as usize] == u32::MAX {
                            cell_order[o as usize] = next;
                            next += 1;
                            queue.push_back(o as usize);
                        }
                    }
                }
            }
        }

        // remap owners/neighbours; keep owner the lower-numbered cell,
        // reversing the winding when the sides swap
        for face in &mut self.faces {
            let new_owner = cell_order[face.owner as usize];
            match face.neighbour {
                Some(nb) => {
                    let new_nb = cell_order[nb as usize];
                    if new_nb < new_owner {
                        face.owner = new_nb;
                        face.neighbour = Some(new_owner);
                        face.points.reverse();
                    } else {
                        face.owner = new_owner;
                        face.neighbour = Some(new_nb);
                    }
                }
                None => face.owner = new_owner,
            }
        }

        // face ordering: internal by (owner, neighbour), boundary by
        // (patch, owner)
        let mut face_order: Vec<u32> = (0..self.faces.len() as u32).collect();
        face_order.sort_by_key(|&f| {
            let face = &self.faces[f as usize];
            match (face.neighbour, face.patch) {
                (Some(nb), _) => (0u8, 0u32, face.owner, nb),
                (None, patch) => (1u8, patch.unwrap_or(u32::MAX), face.owner, 0),
            }
        });
        let mut new_faces: Vec<Face> = Vec::with_capacity(self.faces.len());
        for &old in &face_order {
            new_faces.push(self.faces[old as usize].clone());
        }
        self.faces = new_faces;

        // rebuild cells in the new order from the renumbered faces
        let mut new_cells = vec![Cell::default(); n_cells];
        for (f, face) in self.faces.iter().enumerate() {
            new_cells[face.owner as usize].faces.push(f as u32);
            if let Some(nb) = face.neighbour {
                new_cells[nb as usize].faces.push(f as u32);
            }
        }
        self.cells = new_cells;

        // point ordering by first touch over the new cell/face order
        let mut point_order = vec![u32::MAX; self.points.len()];
        let mut next_point = 0u32;
        for face in &self.faces {
            for &p in &face.points {
                if point_order[p as usize] == u32::MAX {
                    point_order[p as usize] = next_point;
                    next_point += 1;
                }
            }
        }
        // points never referenced keep a stable tail position
        for order in point_order.iter_mut() {
            if *order == u32::MAX {
                *order = next_point;
                next_point += 1;
            }
        }
        let mut new_points = vec![Point3::origin(); self.points.len()];
        for (old, &new) in point_order.iter().enumerate() {
            new_points[new as usize] = self.points[old];
        }
        self.points = new_points;
        for face in &mut self.faces {
            for p in &mut face.points {
                *p = point_order[*p as usize];
            }
        }

        self.clear_addressing();
        debug!(
            target: "volmesh::mesh",
            cells = self.cells.len(),
            faces = self.faces.len(),
            points = self.points.len(),
            "Renumbered mesh"
        );
    }

    /// Apply boundary renaming rules from the `renameBoundary` section.
    ///
    /// `newPatchNames.<old> = { newName = "...", type = "..." }` renames
    /// individual patches; `defaultType` retypes every patch the rules did
    /// not touch.
    pub fn rename_patches(&mut self, dict: &MeshDict) -> MeshGenResult<()> {
        let Some(rename) = dict.sub_dict("renameBoundary") else {
            return Ok(());
        };

        let default_type: Option<String> = rename.get("defaultType")?;
        let rules = rename.sub_dict("newPatchNames");

        let mut renamed = 0usize;
        for patch in &mut self.patches {
            let rule = rules.as_ref().and_then(|r| r.sub_dict(&patch.name));
            match rule {
                Some(rule) => {
                    if let Some(new_name) = rule.get::<String>("newName")? {
                        patch.name = new_name;
                    }
                    if let Some(new_type) = rule.get::<String>("type")? {
                        patch.patch_type = new_type;
                    }
                    renamed += 1;
                }
                None => {
                    if let Some(t) = &default_type {
                        patch.patch_type = t.clone();
                    }
                }
            }
        }

        if renamed > 0 {
            info!(
                target: "volmesh::mesh",
                renamed,
                "Renamed boundary patches"
            );
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::two_cell_mesh;
    use super::*;

    #[test]
    fn test_two_cell_fixture_is_valid() {
        let mesh = two_cell_mesh();
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.n_internal_faces, 1);
        assert_eq!(report.n_boundary_faces, 10);
    }

    #[test]
    fn test_addressing_caches() {
        let mut mesh = two_cell_mesh();
        assert_eq!(mesh.cell_points()[0].len(), 8);
        assert_eq!(mesh.cell_points()[1].len(), 8);
        // every point lies on the boundary of this small mesh
        assert_eq!(mesh.boundary_points().len(), 12);
        let pf = mesh.point_faces();
        assert!(pf.iter().all(|faces| !faces.is_empty()));
    }

    #[test]
    fn test_clear_addressing_recomputes() {
        let mut mesh = two_cell_mesh();
        let before = mesh.boundary_points().len();
        mesh.clear_addressing();
        assert_eq!(mesh.boundary_points().len(), before);
    }

    #[test]
    fn test_face_geometry() {
        let mesh = two_cell_mesh();
        // face 0 is the -x boundary quad of cell 0, unit area
        let area = mesh.face_area_vector(0).norm();
        assert!((area - 1.0).abs() < 1e-12);
        let centre = mesh.face_centre(0);
        assert!((centre - Point3::new(0.0, 0.5, 0.5)).norm() < 1e-12);
    }

    #[test]
    fn test_outward_winding_of_boundary_faces() {
        let mesh = two_cell_mesh();
        for (f, face) in mesh.boundary_faces() {
            let outward = mesh.face_centre(f) - mesh.cell_centre(face.owner as usize);
            let n = mesh.face_area_vector(f);
            assert!(
                n.dot(&outward) > 0.0,
                "boundary face {f} normal points into its owner"
            );
        }
    }

    #[test]
    fn test_missing_patch_detected() {
        let mut mesh = two_cell_mesh();
        // strip the patch from one boundary face
        let target = mesh
            .faces
            .iter()
            .position(|f| f.is_boundary())
            .expect("fixture has boundary faces");
        mesh.faces[target].patch = None;
        let report = mesh.validate_topology();
        assert!(!report.is_valid());
    }

    #[test]
    fn test_renumber_preserves_topology_and_geometry() {
        let mut mesh = two_cell_mesh();
        let volume_before: f64 = (0..mesh.n_cells())
            .map(|c| mesh.cell_centre(c).coords.norm())
            .sum();
        mesh.renumber();
        let report = mesh.validate_topology();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.n_internal_faces, 1);
        assert_eq!(report.n_boundary_faces, 10);
        // internal faces come first after renumbering
        assert!(mesh.faces[0].neighbour.is_some());
        let volume_after: f64 = (0..mesh.n_cells())
            .map(|c| mesh.cell_centre(c).coords.norm())
            .sum();
        assert!((volume_before - volume_after).abs() < 1e-12);
    }

    #[test]
    fn test_rename_patches() {
        let mut mesh = two_cell_mesh();
        let dict = MeshDict::from_toml_str(
            r#"
            surfaceFile = "unused.obj"

            [renameBoundary]
            defaultType = "wall"

            [renameBoundary.newPatchNames.defaultFaces]
            newName = "outerWall"
            type = "wall"
            "#,
        )
        .unwrap();
        mesh.rename_patches(&dict).unwrap();
        assert_eq!(mesh.patches[0].name, "outerWall");
        assert_eq!(mesh.patches[0].patch_type, "wall");
    }

    #[test]
    fn test_rename_without_section_is_noop() {
        let mut mesh = two_cell_mesh();
        let dict = MeshDict::new();
        mesh.rename_patches(&dict).unwrap();
        assert_eq!(mesh.patches[0].name, "defaultFaces");
    }
}
