//! Error types for signpost.
//!
//! This module defines all error types used throughout the library.
//!
//! Only construction-time problems are reported through [`TriangulationError`].
//! Mutations that fail for geometric or numerical reasons (a rejected edge
//! flip, a vertex removal that gets stuck) report failure through their
//! return values instead, so drivers can skip and continue.

use thiserror::Error;

/// Result type alias using [`TriangulationError`].
pub type Result<T> = std::result::Result<T, TriangulationError>;

/// Errors that can occur while building meshes and triangulations.
#[derive(Error, Debug)]
pub enum TriangulationError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// An edge has more than two incident faces.
    #[error("edge ({v0}, {v1}) has more than two incident faces")]
    NonManifoldEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
    },

    /// The input mesh is not a pure triangle mesh.
    #[error("intrinsic triangulation requires a triangle mesh as input")]
    NonTriangular,

    /// An edge-length table does not match the mesh it describes.
    #[error("edge length table has {got} entries, mesh has {expected} edges")]
    LengthMismatch {
        /// Number of entries supplied.
        got: usize,
        /// Number of edges in the mesh.
        expected: usize,
    },

    /// An edge length is zero, negative, or not finite.
    #[error("edge {edge} has non-positive length {length}")]
    InvalidEdgeLength {
        /// The edge index.
        edge: usize,
        /// The offending length.
        length: f64,
    },

    /// A surface point refers to a dead element or carries invalid coordinates.
    #[error("invalid surface point: {details}")]
    InvalidSurfacePoint {
        /// Description of the problem.
        details: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl TriangulationError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        TriangulationError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}
