//! Output context: run-root path resolution and the commit barrier.
//!
//! The pipeline writes nothing observable until it succeeds: the mesh and
//! the metadata describing its source surface are committed to the context
//! in a single step at the very end of a successful run, so a failed run
//! leaves the context exactly as constructed. Persisting the committed
//! mesh to disk is the caller's concern.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::mesh::VolumeMesh;

/// The mesh and metadata committed by a successful pipeline run.
#[derive(Debug)]
pub struct CommittedOutput {
    pub mesh: VolumeMesh,
    /// Source surface path and geometric summary.
    pub meta_data: serde_json::Value,
}

/// Output target handed to the mesh generator.
#[derive(Debug)]
pub struct OutputContext {
    root: PathBuf,
    committed: Option<CommittedOutput>,
}

impl OutputContext {
    /// Context rooted at a run directory; relative paths from the meshing
    /// dictionary resolve under it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            committed: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a dictionary path against the run root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub(crate) fn commit(&mut self, mesh: VolumeMesh, meta_data: serde_json::Value) {
        info!(
            target: "volmesh::output",
            cells = mesh.n_cells(),
            faces = mesh.n_faces(),
            points = mesh.n_points(),
            "Committed mesh to output context"
        );
        self.committed = Some(CommittedOutput { mesh, meta_data });
    }

    /// Whether a successful run has committed a mesh.
    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// The committed mesh, if any.
    pub fn mesh(&self) -> Option<&VolumeMesh> {
        self.committed.as_ref().map(|c| &c.mesh)
    }

    /// Metadata describing the source surface, if committed.
    pub fn meta_data(&self) -> Option<&serde_json::Value> {
        self.committed.as_ref().map(|c| &c.meta_data)
    }

    /// Take the committed output, leaving the context empty.
    pub fn take_committed(&mut self) -> Option<CommittedOutput> {
        self.committed.take()
    }
}
