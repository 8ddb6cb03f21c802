//! Supporting algorithms for the intrinsic triangulation machinery.
//!
//! - **Dijkstra**: radius-limited shortest paths on the intrinsic edge graph
//! - **Tracing**: geodesic tracing by triangle unfolding

pub mod dijkstra;
pub mod trace;

pub use dijkstra::vertex_dijkstra_distance_within_radius;
pub use trace::{face_layout, trace_geodesic, TraceOptions, TraceResult};
