//! Reversible anisotropic geometry modification.
//!
//! Declared `anisotropicSources` stretch coordinates along an axis inside
//! a half-open interval; meshing then happens in the transformed space and
//! the transform is inverted on the mesh points at final optimisation.
//! The forward and inverse maps are exact inverses up to floating-point
//! rounding, since no other stage is aware the mesh was ever transformed.
//!
//! Each per-axis map is piecewise linear and strictly monotonic: inside a
//! declared interval coordinates scale by the source's factor, outside
//! they shift by the accumulated length change of the intervals below.

use nalgebra::Point3;
use tracing::info;

use crate::config::MeshDict;
use crate::error::{MeshGenError, MeshGenResult};
use crate::mesh::VolumeMesh;
use crate::surface::TriSurf;

/// One declared scaling interval on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScalingInterval {
    start: f64,
    end: f64,
    scale: f64,
}

/// Records the coordinate transform applied before meshing and the data
/// needed to invert it afterwards.
#[derive(Debug, Clone)]
pub struct GeometryModification {
    /// Sorted, non-overlapping intervals per axis (x, y, z).
    axes: [Vec<ScalingInterval>; 3],
}

impl GeometryModification {
    /// Build the modification from `anisotropicSources`, or `None` when
    /// the section is absent.
    pub fn from_dict(dict: &MeshDict) -> MeshGenResult<Option<Self>> {
        let Some(sources) = dict.sub_dict("anisotropicSources") else {
            return Ok(None);
        };

        let mut axes: [Vec<ScalingInterval>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for name in sources.keys() {
            let src = sources.sub_dict(name).ok_or_else(|| {
                MeshGenError::malformed_section(
                    format!("anisotropicSources.{name}"),
                    "each source must be a table",
                )
            })?;
            let axis: String = src.get_or_default("axis", String::new())?;
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
            let range: Vec<f64> = src.get_or_default("range", Vec::new())?;
            let scale: f64 = src.get_or_default("scale", 0.0)?;
            if range.len() != 2 || range[0] >= range[1] || !(scale > 0.0) {
                return Err(MeshGenError::malformed_section(
                    format!("anisotropicSources.{name}"),
                    "need range = [start, end] with start < end and scale > 0",
                ));
            }
            axes[axis_idx].push(ScalingInterval {
                start: range[0],
                end: range[1],
                scale,
            });
        }

        for list in &mut axes {
            list.sort_by(|a, b| a.start.total_cmp(&b.start));
            for pair in list.windows(2) {
                if pair[1].start < pair[0].end {
                    return Err(MeshGenError::malformed_section(
                        "anisotropicSources",
                        "scaling ranges on the same axis must not overlap",
                    ));
                }
            }
        }

        let n: usize = axes.iter().map(Vec::len).sum();
        info!(target: "volmesh::modification", sources = n, "Recorded geometry modification");
        Ok(Some(Self { axes }))
    }

    fn map_coord(intervals: &[ScalingInterval], x: f64) -> f64 {
        let mut shift = 0.0;
        for iv in intervals {
            if x >= iv.end {
                shift += (iv.scale - 1.0) * (iv.end - iv.start);
            } else if x > iv.start {
                return iv.start + shift + (x - iv.start) * iv.scale;
            } else {
                break;
            }
        }
        x + shift
    }

    fn unmap_coord(intervals: &[ScalingInterval], y: f64) -> f64 {
        // interval images in transformed space, walked in the same order
        let mut shift = 0.0;
        for iv in intervals {
            let img_start = iv.start + shift;
            let img_end = img_start + (iv.end - iv.start) * iv.scale;
            if y >= img_end {
                shift += (iv.scale - 1.0) * (iv.end - iv.start);
            } else if y > img_start {
                return iv.start + (y - img_start) / iv.scale;
            } else {
                break;
            }
        }
        y - shift
    }

    /// Forward transform of a point into the meshing space.
    pub fn forward(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::new(
            Self::map_coord(&self.axes[0], p.x),
            Self::map_coord(&self.axes[1], p.y),
            Self::map_coord(&self.axes[2], p.z),
        )
    }

    /// Inverse transform back into the original space.
    pub fn inverse(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::new(
            Self::unmap_coord(&self.axes[0], p.x),
            Self::unmap_coord(&self.axes[1], p.y),
            Self::unmap_coord(&self.axes[2], p.z),
        )
    }

    /// Produce the transformed surface the spatial index is built over.
    pub fn modify_surface(&self, surf: &TriSurf) -> TriSurf {
        let mut modified = surf.clone();
        for p in &mut modified.points {
            *p = self.forward(p);
        }
        modified
    }

    /// Revert the transform on the mesh point coordinates.
    ///
    /// Point movement only: addressing stays valid.
    pub fn revert_mesh(&self, mesh: &mut VolumeMesh) {
        use rayon::prelude::*;
        mesh.points
            .par_iter_mut()
            .for_each(|p| *p = self.inverse(p));
        info!(
            target: "volmesh::modification",
            points = mesh.points.len(),
            "Reverted geometry modification"
        );
    }
}
