//! # Signpost
//!
//! Intrinsic triangulations of surface meshes, with a signpost
//! correspondence back to the input surface.
//!
//! An *intrinsic triangulation* is a second triangulation of the same
//! surface as a fixed input mesh. Its connectivity and edge lengths evolve
//! independently — edges flip, vertices are inserted and removed — while
//! every intrinsic vertex stays traceable to a concrete point on the input.
//! Working intrinsically gives geometry processing algorithms high-quality
//! triangulations (Delaunay, bounded minimum angle) without ever moving a
//! vertex of the input in 3-D.
//!
//! ## Features
//!
//! - **Half-edge data structure**: O(1) adjacency queries, type-safe indices,
//!   local topology edits with handle recycling
//! - **Signpost correspondence**: per-half-edge polar directions, enough to
//!   trace any intrinsic edge across the input surface as a geodesic
//! - **Flip-to-Delaunay**: Lawson flipping to the intrinsic Delaunay
//!   triangulation
//! - **Delaunay refinement**: Chew-style second algorithm with minimum-angle
//!   and circumradius targets, honoring fixed/marked edges
//!
//! ## Quick Start
//!
//! ```
//! use signpost::prelude::*;
//! use nalgebra::Point3;
//!
//! // Two triangles over a unit square, described by positions.
//! let mesh: HalfEdgeMesh = build_from_triangles(&[[0, 1, 2], [0, 2, 3]], 4).unwrap();
//! let positions = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//!
//! let mut tri = SignpostTriangulation::from_positions(mesh, &positions).unwrap();
//!
//! // The square's diagonal is already Delaunay; nothing flips.
//! let stats = flip_to_delaunay(&mut tri);
//! assert_eq!(stats.n_flips, 0);
//!
//! // Refine until no face has circumradius above 0.4.
//! let options = RefineOptions::default()
//!     .with_angle_threshold_degrees(0.0)
//!     .with_circumradius_threshold(0.4);
//! let stats = delaunay_refine(&mut tri, &options);
//! assert!(tri.is_delaunay_all());
//!
//! // Every intrinsic vertex knows where it sits on the input surface.
//! for v in tri.mesh().vertex_ids() {
//!     let _location = tri.vertex_locations()[v.index()];
//! }
//! # let _ = stats;
//! ```
//!
//! ## Tracing
//!
//! Intrinsic edges are geodesics on the input surface. [`SignpostTriangulation::trace_halfedge`]
//! unfolds one into a sequence of input-surface points; [`SignpostTriangulation::trace_edges`]
//! does so for the whole triangulation in parallel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod error;
pub mod geometry;
pub mod intrinsic;
pub mod mesh;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use signpost::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Result, TriangulationError};
    pub use crate::geometry::SurfacePoint;
    pub use crate::intrinsic::refine::{
        delaunay_refine, delaunay_refine_with_progress, flip_to_delaunay, FlipStats,
        RefineOptions, RefineStats,
    };
    pub use crate::intrinsic::{IntrinsicTriangulation, SignpostTriangulation};
    pub use crate::mesh::{
        build_from_triangles, edge_lengths_from_positions, EdgeId, FaceId, HalfEdgeId,
        HalfEdgeMesh, MeshIndex, VertexId,
    };
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron_end_to_end() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![
            [0, 2, 1], // bottom
            [0, 1, 3], // front
            [1, 2, 3], // right
            [2, 0, 3], // left
        ];

        let mesh: HalfEdgeMesh = build_from_triangles(&faces, 4).unwrap();
        let lengths = edge_lengths_from_positions(&mesh, &vertices).unwrap();
        let mut tri = SignpostTriangulation::new(mesh, lengths).unwrap();

        let stats = flip_to_delaunay(&mut tri);
        assert!(tri.is_delaunay_all());

        // Closed mesh: no boundary vertex anywhere.
        for v in tri.mesh().vertex_ids() {
            assert!(!tri.mesh().is_boundary_vertex(v));
        }
        let _ = stats;
    }
}
