//! Error types for the mesh generation pipeline.
//!
//! Every fallible operation in this crate returns [`MeshGenResult`]. Errors
//! carry a machine-readable code in the format `VMESH-XXXX`:
//!
//! - `VMESH-1xxx`: configuration errors (missing keys, malformed sections)
//! - `VMESH-2xxx`: surface errors (reading, parsing, topology)
//! - `VMESH-3xxx`: stage failures (a pipeline stage could not produce a
//!   valid result)
//! - `VMESH-9xxx`: internal errors (resource-consistency violations;
//!   programming errors, not recoverable)
//!
//! The pipeline's failure boundary in
//! [`crate::orchestrator::VolumeMeshGenerator`] distinguishes the
//! descriptive categories (1xxx-3xxx, message preserved) from internal
//! errors (degraded to a generic diagnostic).

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mesh generation operations.
pub type MeshGenResult<T> = Result<T, MeshGenError>;

/// Machine-readable error codes for mesh generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Configuration errors (1xxx)
    /// VMESH-1001: Required keyword missing from the meshing dictionary
    MissingKeyword = 1001,
    /// VMESH-1002: Malformed dictionary section
    MalformedSection = 1002,
    /// VMESH-1003: Failed to read the meshing dictionary
    ConfigRead = 1003,

    // Surface errors (2xxx)
    /// VMESH-2001: Failed to read surface file
    SurfaceRead = 2001,
    /// VMESH-2002: Failed to parse surface file
    SurfaceParse = 2002,
    /// VMESH-2003: Surface is not a closed 2-manifold
    SurfaceInvalid = 2003,

    // Stage failures (3xxx)
    /// VMESH-3001: A pipeline stage failed
    StageFailed = 3001,

    // Internal errors (9xxx)
    /// VMESH-9001: Resource-consistency violation
    Internal = 9001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `VMESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingKeyword => "VMESH-1001",
            ErrorCode::MalformedSection => "VMESH-1002",
            ErrorCode::ConfigRead => "VMESH-1003",
            ErrorCode::SurfaceRead => "VMESH-2001",
            ErrorCode::SurfaceParse => "VMESH-2002",
            ErrorCode::SurfaceInvalid => "VMESH-2003",
            ErrorCode::StageFailed => "VMESH-3001",
            ErrorCode::Internal => "VMESH-9001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during mesh generation.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshGenError {
    /// A required keyword is missing from the meshing dictionary.
    #[error("keyword '{keyword}' is missing from the meshing dictionary")]
    #[diagnostic(
        code(volmesh::config::missing_keyword),
        help("Add '{keyword}' to the meshing dictionary and re-run.")
    )]
    MissingKeyword { keyword: String },

    /// A dictionary section has the wrong shape or an invalid value.
    #[error("malformed dictionary section '{section}': {details}")]
    #[diagnostic(
        code(volmesh::config::malformed),
        help("Check the section against the documented dictionary schema.")
    )]
    MalformedSection { section: String, details: String },

    /// Error reading the meshing dictionary file.
    #[error("failed to read meshing dictionary from {path}")]
    #[diagnostic(
        code(volmesh::config::read),
        help("Check that the dictionary file exists and is readable.")
    )]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error reading the surface file.
    #[error("failed to read surface from {path}")]
    #[diagnostic(
        code(volmesh::surface::read),
        help("Check that the file exists and is readable.")
    )]
    SurfaceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing the surface file.
    #[error("failed to parse surface from {path}: {details}")]
    #[diagnostic(
        code(volmesh::surface::parse),
        help("The file may be corrupted or not in the supported OBJ dialect.")
    )]
    SurfaceParse { path: PathBuf, details: String },

    /// The surface does not bound a volume.
    #[error("invalid input surface: {details}")]
    #[diagnostic(
        code(volmesh::surface::invalid),
        help("The input must be a closed 2-manifold triangulation.")
    )]
    SurfaceInvalid { details: String },

    /// A pipeline stage could not produce a valid result.
    #[error("stage '{stage}' failed: {details}")]
    #[diagnostic(
        code(volmesh::stage::failed),
        help("The partially built mesh has been abandoned; nothing was committed.")
    )]
    StageFailed {
        stage: &'static str,
        details: String,
    },

    /// A resource the pipeline relies on was absent or inconsistent.
    ///
    /// These are programming errors, not user errors; the generator reports
    /// them with a generic diagnostic.
    #[error("internal error: {details}")]
    #[diagnostic(code(volmesh::internal::resource))]
    Internal { details: String },
}

impl MeshGenError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshGenError::MissingKeyword { .. } => ErrorCode::MissingKeyword,
            MeshGenError::MalformedSection { .. } => ErrorCode::MalformedSection,
            MeshGenError::ConfigRead { .. } => ErrorCode::ConfigRead,
            MeshGenError::SurfaceRead { .. } => ErrorCode::SurfaceRead,
            MeshGenError::SurfaceParse { .. } => ErrorCode::SurfaceParse,
            MeshGenError::SurfaceInvalid { .. } => ErrorCode::SurfaceInvalid,
            MeshGenError::StageFailed { .. } => ErrorCode::StageFailed,
            MeshGenError::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Whether the error carries a user-actionable description.
    ///
    /// Internal errors are the one category that does not; the generator's
    /// failure boundary degrades them to a generic diagnostic.
    pub fn is_descriptive(&self) -> bool {
        !matches!(self, MeshGenError::Internal { .. })
    }

    // Constructor helpers for common error patterns

    /// Create a MissingKeyword error.
    pub fn missing_keyword(keyword: impl Into<String>) -> Self {
        MeshGenError::MissingKeyword {
            keyword: keyword.into(),
        }
    }

    /// Create a MalformedSection error.
    pub fn malformed_section(section: impl Into<String>, details: impl Into<String>) -> Self {
        MeshGenError::MalformedSection {
            section: section.into(),
            details: details.into(),
        }
    }

    /// Create a ConfigRead error.
    pub fn config_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshGenError::ConfigRead {
            path: path.into(),
            source,
        }
    }

    /// Create a SurfaceRead error.
    pub fn surface_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshGenError::SurfaceRead {
            path: path.into(),
            source,
        }
    }

    /// Create a SurfaceParse error.
    pub fn surface_parse(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        MeshGenError::SurfaceParse {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a SurfaceInvalid error.
    pub fn surface_invalid(details: impl Into<String>) -> Self {
        MeshGenError::SurfaceInvalid {
            details: details.into(),
        }
    }

    /// Create a StageFailed error.
    pub fn stage_failed(stage: &'static str, details: impl Into<String>) -> Self {
        MeshGenError::StageFailed {
            stage,
            details: details.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(details: impl Into<String>) -> Self {
        MeshGenError::Internal {
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MeshGenError::missing_keyword("surfaceFile");
        assert_eq!(err.code(), ErrorCode::MissingKeyword);
        assert_eq!(err.code().as_str(), "VMESH-1001");
    }

    #[test]
    fn test_descriptive_categories() {
        assert!(MeshGenError::stage_failed("templateGeneration", "empty mesh").is_descriptive());
        assert!(MeshGenError::surface_invalid("open surface").is_descriptive());
        assert!(!MeshGenError::internal("spatial index missing").is_descriptive());
    }

    #[test]
    fn test_error_display() {
        let err = MeshGenError::stage_failed("surfaceProjection", "no boundary points");
        let display = format!("{}", err);
        assert!(display.contains("surfaceProjection"));
        assert!(display.contains("no boundary points"));
    }
}
