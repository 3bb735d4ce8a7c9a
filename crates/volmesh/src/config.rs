//! The meshing dictionary: hierarchical configuration for the pipeline.
//!
//! The dictionary is a TOML document wrapped by typed accessors. Two
//! predicates matter to the pipeline and are deliberately distinct:
//! [`MeshDict::found`] reports that a key exists with *any* shape, while
//! [`MeshDict::is_dict`] additionally requires the value to be a nested
//! table. Boundary-layer generation is gated on the former, boundary-layer
//! refinement on the latter.
//!
//! # Example
//!
//! ```
//! use volmesh::config::MeshDict;
//!
//! let dict = MeshDict::from_toml_str(r#"
//!     surfaceFile = "geometry/part.obj"
//!     maxCellSize = 0.25
//!
//!     [boundaryLayers]
//!     nLayers = 2
//! "#).unwrap();
//!
//! assert!(dict.found("boundaryLayers"));
//! assert!(dict.is_dict("boundaryLayers"));
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use toml::Value;
use tracing::debug;

use crate::controller::STAGE_SEQUENCE;
use crate::error::{MeshGenError, MeshGenResult};

/// Hierarchical key/value meshing dictionary.
#[derive(Debug, Clone, Default)]
pub struct MeshDict {
    root: toml::Table,
}

impl MeshDict {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self {
            root: toml::Table::new(),
        }
    }

    /// Parse a dictionary from a TOML string.
    pub fn from_toml_str(s: &str) -> MeshGenResult<Self> {
        let root: toml::Table = toml::from_str(s)
            .map_err(|e| MeshGenError::malformed_section("<root>", e.to_string()))?;
        Ok(Self { root })
    }

    /// Load a dictionary from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MeshGenResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MeshGenError::config_read(path, e))?;
        let dict = Self::from_toml_str(&contents)?;
        debug!(
            target: "volmesh::config",
            path = path.display().to_string(),
            keys = dict.root.len(),
            "Loaded meshing dictionary"
        );
        Ok(dict)
    }

    /// Whether a key exists at the top level, with any shape.
    pub fn found(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    /// Whether a key exists and is a nested table.
    pub fn is_dict(&self, key: &str) -> bool {
        matches!(self.root.get(key), Some(Value::Table(_)))
    }

    /// Fetch a nested dictionary by key, if present as a table.
    pub fn sub_dict(&self, key: &str) -> Option<MeshDict> {
        match self.root.get(key) {
            Some(Value::Table(t)) => Some(MeshDict { root: t.clone() }),
            _ => None,
        }
    }

    /// Read a typed value by key. Absent keys yield `Ok(None)`; present
    /// keys of the wrong type are a malformed-section error.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> MeshGenResult<Option<T>> {
        match self.root.get(key) {
            None => Ok(None),
            Some(v) => v
                .clone()
                .try_into::<T>()
                .map(Some)
                .map_err(|e| MeshGenError::malformed_section(key, e.to_string())),
        }
    }

    /// Read a typed value, falling back to a default when absent.
    pub fn get_or_default<T: DeserializeOwned>(&self, key: &str, default: T) -> MeshGenResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Insert or replace a value. Used by patch derivation to write
    /// inferred patch definitions back into the shared configuration.
    pub fn set(&mut self, key: &str, value: Value) {
        self.root.insert(key.to_string(), value);
    }

    /// Top-level keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }

    /// Raw access to the underlying table.
    pub fn as_table(&self) -> &toml::Table {
        &self.root
    }
}

/// Validate the meshing dictionary before the pipeline starts.
///
/// This is the counterpart of the external validation collaborator in the
/// pipeline contract: every malformed or missing entry detected here is a
/// configuration error, surfaced before any geometric work is done.
pub fn check_mesh_dict(dict: &MeshDict) -> MeshGenResult<()> {
    if !dict.found("surfaceFile") {
        return Err(MeshGenError::missing_keyword("surfaceFile"));
    }
    let _: String = dict
        .get("surfaceFile")?
        .ok_or_else(|| MeshGenError::missing_keyword("surfaceFile"))?;

    if let Some(size) = dict.get::<f64>("maxCellSize")? {
        if !size.is_finite() || size <= 0.0 {
            return Err(MeshGenError::malformed_section(
                "maxCellSize",
                format!("must be a positive number, got {size}"),
            ));
        }
    }

    if dict.found("enforceGeometryConstraints") {
        let _: bool = dict.get_or_default("enforceGeometryConstraints", false)?;
    }

    if let Some(bnd) = dict.sub_dict("boundaryLayers") {
        if bnd.found("nLayers") {
            let _: i64 = bnd.get_or_default("nLayers", 0)?;
        }
        if bnd.found("patchBoundaryLayers") && !bnd.is_dict("patchBoundaryLayers") {
            return Err(MeshGenError::malformed_section(
                "boundaryLayers.patchBoundaryLayers",
                "must be a table of patch name -> layer spec",
            ));
        }
    }

    if dict.found("anisotropicSources") {
        check_anisotropic_sources(dict)?;
    }

    if let Some(rename) = dict.sub_dict("renameBoundary") {
        if rename.found("newPatchNames") && !rename.is_dict("newPatchNames") {
            return Err(MeshGenError::malformed_section(
                "renameBoundary.newPatchNames",
                "must be a table of old name -> { newName, type }",
            ));
        }
    }

    if let Some(resume) = dict.get::<String>("stepResume")? {
        if !STAGE_SEQUENCE.contains(&resume.as_str()) {
            return Err(MeshGenError::malformed_section(
                "stepResume",
                format!(
                    "unknown stage '{resume}'; expected one of {}",
                    STAGE_SEQUENCE.join(", ")
                ),
            ));
        }
    }

    Ok(())
}

fn check_anisotropic_sources(dict: &MeshDict) -> MeshGenResult<()> {
    let sources = dict.sub_dict("anisotropicSources").ok_or_else(|| {
        MeshGenError::malformed_section("anisotropicSources", "must be a table of named sources")
    })?;

    // per-axis interval lists, checked for overlap below
    let mut intervals: [Vec<(f64, f64)>; 3] = [Vec::new(), Vec::new(), Vec::new()];

    for name in sources.keys() {
        let src = sources.sub_dict(name).ok_or_else(|| {
            MeshGenError::malformed_section(
                format!("anisotropicSources.{name}"),
                "each source must be a table",
            )
        })?;

        let axis: String = src.get("axis")?.ok_or_else(|| {
            MeshGenError::malformed_section(
                format!("anisotropicSources.{name}"),
                "missing 'axis' (one of x, y, z)",
            )
        })?;
        let axis_idx = match axis.as_str() {
            "x" => 0,
            "y" => 1,
            "z" => 2,
            other => {
                return Err(MeshGenError::malformed_section(
                    format!("anisotropicSources.{name}"),
                    format!("axis must be x, y or z, got '{other}'"),
                ));
            }
        };

        let range: Vec<f64> = src.get("range")?.ok_or_else(|| {
            MeshGenError::malformed_section(
                format!("anisotropicSources.{name}"),
                "missing 'range' ([start, end])",
            )
        })?;
        if range.len() != 2 || range[0] >= range[1] {
            return Err(MeshGenError::malformed_section(
                format!("anisotropicSources.{name}"),
                "'range' must be [start, end] with start < end",
            ));
        }

        let scale: f64 = src.get("scale")?.ok_or_else(|| {
            MeshGenError::malformed_section(
                format!("anisotropicSources.{name}"),
                "missing 'scale'",
            )
        })?;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(MeshGenError::malformed_section(
                format!("anisotropicSources.{name}"),
                format!("'scale' must be positive, got {scale}"),
            ));
        }

        intervals[axis_idx].push((range[0], range[1]));
    }

    for list in &mut intervals {
        list.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in list.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(MeshGenError::malformed_section(
                    "anisotropicSources",
                    "scaling ranges on the same axis must not overlap",
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_vs_is_dict() {
        let dict = MeshDict::from_toml_str(
            r#"
            surfaceFile = "part.obj"
            scalarLayers = 3

            [boundaryLayers]
            nLayers = 2
            "#,
        )
        .unwrap();

        assert!(dict.found("boundaryLayers"));
        assert!(dict.is_dict("boundaryLayers"));
        assert!(dict.found("scalarLayers"));
        assert!(!dict.is_dict("scalarLayers"));
        assert!(!dict.found("anisotropicSources"));
    }

    #[test]
    fn test_missing_surface_file_rejected() {
        let dict = MeshDict::from_toml_str("maxCellSize = 0.5").unwrap();
        let err = check_mesh_dict(&dict).unwrap_err();
        assert!(format!("{err}").contains("surfaceFile"));
    }

    #[test]
    fn test_valid_dict_passes() {
        let dict = MeshDict::from_toml_str(
            r#"
            surfaceFile = "part.obj"
            maxCellSize = 0.25
            enforceGeometryConstraints = true

            [boundaryLayers.patchBoundaryLayers.inlet]
            nLayers = 1

            [anisotropicSources.stretchX]
            axis = "x"
            range = [0.0, 2.0]
            scale = 1.5

            [renameBoundary.newPatchNames.defaultFaces]
            newName = "walls"
            type = "wall"
            "#,
        )
        .unwrap();
        check_mesh_dict(&dict).unwrap();
    }

    #[test]
    fn test_overlapping_anisotropic_ranges_rejected() {
        let dict = MeshDict::from_toml_str(
            r#"
            surfaceFile = "part.obj"

            [anisotropicSources.a]
            axis = "x"
            range = [0.0, 2.0]
            scale = 1.5

            [anisotropicSources.b]
            axis = "x"
            range = [1.0, 3.0]
            scale = 2.0
            "#,
        )
        .unwrap();
        assert!(check_mesh_dict(&dict).is_err());
    }

    #[test]
    fn test_unknown_resume_stage_rejected() {
        let dict = MeshDict::from_toml_str(
            r#"
            surfaceFile = "part.obj"
            stepResume = "noSuchStage"
            "#,
        )
        .unwrap();
        assert!(check_mesh_dict(&dict).is_err());
    }

    #[test]
    fn test_known_resume_stage_accepted() {
        let dict = MeshDict::from_toml_str(
            r#"
            surfaceFile = "part.obj"
            stepResume = "meshOptimisation"
            "#,
        )
        .unwrap();
        check_mesh_dict(&dict).unwrap();
    }

    #[test]
    fn test_patch_write_back() {
        let mut dict = MeshDict::from_toml_str(r#"surfaceFile = "part.obj""#).unwrap();
        let mut patches = toml::Table::new();
        patches.insert("patch0".into(), toml::Value::String("patch".into()));
        dict.set("surfacePatches", toml::Value::Table(patches));

        assert!(dict.is_dict("surfacePatches"));
        let sub = dict.sub_dict("surfacePatches").unwrap();
        assert_eq!(
            sub.get::<String>("patch0").unwrap().as_deref(),
            Some("patch")
        );
    }
}
