//! Intrinsic triangulations of a fixed input surface.
//!
//! An intrinsic triangulation is a second triangulation of the same surface
//! as an input mesh, whose connectivity and edge lengths evolve independently
//! while every vertex stays traceable to a concrete location on the input.
//! This module defines the mutation contract shared by intrinsic
//! triangulation variants ([`IntrinsicTriangulation`]), the mutation event
//! log the refinement drivers consume, and observer callback lists with
//! stable registration handles.
//!
//! The one concrete implementation is the signpost representation,
//! [`SignpostTriangulation`], after Sharp, Soliman & Crane, "Navigating
//! Intrinsic Triangulations" (SIGGRAPH 2019).
//!
//! # Example
//!
//! ```
//! use signpost::mesh::{build_from_triangles, HalfEdgeMesh};
//! use signpost::intrinsic::{IntrinsicTriangulation, SignpostTriangulation};
//! use signpost::intrinsic::refine::flip_to_delaunay;
//!
//! // A regular tetrahedron, described by connectivity and edge lengths alone.
//! let mesh: HalfEdgeMesh = build_from_triangles(&[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]], 4).unwrap();
//! let lengths = vec![1.0; mesh.edge_capacity()];
//! let mut tri = SignpostTriangulation::new(mesh, lengths).unwrap();
//!
//! // Already Delaunay: the driver performs no flips.
//! let stats = flip_to_delaunay(&mut tri);
//! assert_eq!(stats.n_flips, 0);
//! assert!((tri.min_angle_degrees() - 60.0).abs() < 1e-9);
//! ```

pub mod refine;
mod signpost;

pub use signpost::SignpostTriangulation;

use crate::geometry::{
    circumradius_from_lengths, corner_angle_from_lengths, triangle_area_from_lengths, SurfacePoint,
};
use crate::mesh::{EdgeId, FaceId, HalfEdgeId, HalfEdgeMesh, MeshIndex, VertexId};

/// The single numerical tolerance shared by the Delaunay test, flip
/// feasibility, and the refinement drivers' rechecks.
pub const DELAUNAY_EPS: f64 = 1e-6;

/// A record of one completed local mutation.
///
/// Mutators append events to an internal log as they go; drivers drain the
/// log after each top-level call ([`IntrinsicTriangulation::take_events`]).
/// Flips performed inside compound operations (vertex removal flips edges
/// down to degree three) appear in the log individually, so a driver observes
/// every flip regardless of what triggered it.
#[derive(Debug, Clone, Copy)]
pub enum MutationEvent<I: MeshIndex = u32> {
    /// An edge was flipped. The handle survives the flip; its endpoints are
    /// new.
    EdgeFlip {
        /// The flipped edge.
        edge: EdgeId<I>,
    },

    /// A vertex was inserted into a face interior (1-to-3 subdivision).
    FaceInsertion {
        /// The face that was subdivided (survives as one of the three parts).
        face: FaceId<I>,
        /// The new vertex.
        vertex: VertexId<I>,
    },

    /// An edge was split by a new vertex.
    EdgeSplit {
        /// The original edge; it survives as the tail half of the split.
        old_edge: EdgeId<I>,
        /// Half-edge from the new vertex toward the original head.
        he_front: HalfEdgeId<I>,
        /// Half-edge from the new vertex toward the original tail.
        he_back: HalfEdgeId<I>,
    },
}

/// Stable handle for a registered callback. Removing one callback never
/// disturbs the handles of others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

/// An ordered list of callbacks with stable removal.
///
/// Insertion returns a [`CallbackHandle`] that stays valid across later
/// insertions and removals; callbacks fire in insertion order.
pub struct CallbackList<F> {
    entries: Vec<(u64, F)>,
    next_id: u64,
}

impl<F> Default for CallbackList<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<F> CallbackList<F> {
    /// Register a callback, returning its removal handle.
    pub fn insert(&mut self, callback: F) -> CallbackHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        CallbackHandle(id)
    }

    /// Remove a previously registered callback. Returns false if the handle
    /// was already removed.
    pub fn remove(&mut self, handle: CallbackHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != handle.0);
        self.entries.len() != before
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over callbacks in registration order.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut F> {
        self.entries.iter_mut().map(|(_, f)| f)
    }
}

impl<F> std::fmt::Debug for CallbackList<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// The mutation contract of an intrinsic triangulation.
///
/// Implementations own an intrinsic mesh with per-edge lengths and a
/// correspondence map onto the input surface; the required methods expose
/// that state and the local mutations. Every Delaunay predicate and face
/// measure is provided on top of it, so the refinement drivers in
/// [`refine`] work against any implementation.
pub trait IntrinsicTriangulation<I: MeshIndex = u32> {
    // ==================== State ====================

    /// The intrinsic mesh.
    fn mesh(&self) -> &HalfEdgeMesh<I>;

    /// Intrinsic edge lengths, indexed by raw edge id
    /// (`mesh().edge_capacity()` entries).
    fn edge_lengths(&self) -> &[f64];

    /// The correspondence map: where each intrinsic vertex sits on the input
    /// surface, indexed by raw vertex id.
    fn vertex_locations(&self) -> &[SurfacePoint<I>];

    /// Whether `e` was explicitly marked unflippable/unsplittable.
    fn is_edge_marked(&self, e: EdgeId<I>) -> bool;

    /// Mark or unmark an edge. Marked edges are fixed: the refiner never
    /// flips them and splits them only at their midpoint.
    fn set_edge_marked(&mut self, e: EdgeId<I>, marked: bool);

    // ==================== Mutators ====================

    /// Flip `e` if it is not fixed and not intrinsically Delaunay. Returns
    /// whether a flip occurred.
    fn flip_edge_if_not_delaunay(&mut self, e: EdgeId<I>) -> bool;

    /// Flip `e` if it is not fixed and the union of its two triangles forms
    /// a strictly convex quadrilateral with slack `eps`. Returns whether a
    /// flip occurred.
    fn flip_edge_if_possible(&mut self, e: EdgeId<I>, eps: f64) -> bool;

    /// Insert a new vertex at a point on the intrinsic triangulation.
    /// Face points subdivide 1-to-3; edge points split the edge; vertex
    /// points return the existing vertex without mutating.
    fn insert_vertex(&mut self, p: SurfacePoint<I>) -> VertexId<I>;

    /// Insert the circumcenter of `f` (or, when a fixed edge blocks the way,
    /// the midpoint of that edge). Returns the new vertex.
    fn insert_circumcenter(&mut self, f: FaceId<I>) -> VertexId<I>;

    /// Insert the barycenter of `f`. Returns the new vertex.
    fn insert_barycenter(&mut self, f: FaceId<I>) -> VertexId<I>;

    /// Remove a previously inserted vertex, returning the face left behind.
    /// Returns `None` (leaving the mesh unchanged) if `v` is an original
    /// vertex or if no sequence of legal flips reduces it to degree three.
    fn remove_inserted_vertex(&mut self, v: VertexId<I>) -> Option<FaceId<I>>;

    /// Split the edge of `he` at parameter `t` in (0, 1) measured from the
    /// tail of `he`. Returns the half-edge with the new vertex as tail
    /// pointing in the same direction as `he`.
    fn split_edge(&mut self, he: HalfEdgeId<I>, t: f64) -> HalfEdgeId<I>;

    // ==================== Events ====================

    /// Drain the mutation event log: every mutation since the last call, in
    /// order.
    fn take_events(&mut self) -> Vec<MutationEvent<I>>;

    // ==================== Provided predicates ====================

    /// Length of an edge.
    #[inline]
    fn edge_length(&self, e: EdgeId<I>) -> f64 {
        self.edge_lengths()[e.index()]
    }

    /// Interior angle at the corner at the tail of `he` inside `he`'s face.
    fn corner_angle(&self, he: HalfEdgeId<I>) -> f64 {
        let mesh = self.mesh();
        debug_assert!(mesh.face_of(he).is_valid());
        let l_a = self.edge_length(mesh.edge_of(he));
        let l_b = self.edge_length(mesh.edge_of(mesh.prev(he)));
        let l_opp = self.edge_length(mesh.edge_of(mesh.next(he)));
        corner_angle_from_lengths(l_a, l_b, l_opp)
    }

    /// Cotan weight of an edge: half the sum of the cotangents of the one or
    /// two angles opposite it.
    fn edge_cotan_weight(&self, e: EdgeId<I>) -> f64 {
        let mesh = self.mesh();
        let (he, ht) = mesh.edge_halfedges(e);
        let mut weight = 0.0;
        for h in [he, ht] {
            if mesh.face_of(h).is_valid() {
                let opp_angle = self.corner_angle(mesh.prev(h));
                weight += 0.5 / opp_angle.tan();
            }
        }
        weight
    }

    /// Is this edge on the boundary or explicitly marked?
    fn is_fixed(&self, e: EdgeId<I>) -> bool {
        self.mesh().is_boundary_edge(e) || self.is_edge_marked(e)
    }

    /// Is this vertex on the boundary or incident to any fixed edge?
    fn is_on_fixed_edge(&self, v: VertexId<I>) -> bool {
        let mesh = self.mesh();
        if mesh.is_boundary_vertex(v) {
            return true;
        }
        mesh.vertex_edges(v).any(|e| self.is_fixed(e))
    }

    /// Is this edge intrinsically Delaunay? Fixed edges always are.
    fn is_delaunay(&self, e: EdgeId<I>) -> bool {
        self.is_fixed(e) || self.edge_cotan_weight(e) >= -DELAUNAY_EPS
    }

    /// Are all edges intrinsically Delaunay?
    fn is_delaunay_all(&self) -> bool {
        self.mesh().edge_ids().all(|e| self.is_delaunay(e))
    }

    /// The three edge lengths of a face, in canonical half-edge order.
    fn face_lengths(&self, f: FaceId<I>) -> [f64; 3] {
        let mesh = self.mesh();
        let [he0, he1, he2] = mesh.face_halfedge_triple(f);
        [
            self.edge_length(mesh.edge_of(he0)),
            self.edge_length(mesh.edge_of(he1)),
            self.edge_length(mesh.edge_of(he2)),
        ]
    }

    /// Intrinsic area of a face.
    fn face_area(&self, f: FaceId<I>) -> f64 {
        let [a, b, c] = self.face_lengths(f);
        triangle_area_from_lengths(a, b, c)
    }

    /// Intrinsic circumradius of a face.
    fn face_circumradius(&self, f: FaceId<I>) -> f64 {
        let [a, b, c] = self.face_lengths(f);
        circumradius_from_lengths(a, b, c)
    }

    /// Length of the shortest edge of a face.
    fn shortest_edge(&self, f: FaceId<I>) -> f64 {
        let [a, b, c] = self.face_lengths(f);
        a.min(b).min(c)
    }

    /// The smallest corner angle anywhere in the triangulation, in degrees.
    fn min_angle_degrees(&self) -> f64 {
        let mesh = self.mesh();
        let mut min_angle = f64::INFINITY;
        for f in mesh.face_ids() {
            for he in mesh.face_halfedges(f) {
                min_angle = min_angle.min(self.corner_angle(he));
            }
        }
        min_angle.to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_list_stable_handles() {
        let mut list: CallbackList<u32> = CallbackList::default();
        let h1 = list.insert(1);
        let h2 = list.insert(2);
        let h3 = list.insert(3);

        assert!(list.remove(h2));
        // h1 and h3 survive removal of h2.
        assert_eq!(list.len(), 2);
        assert!(list.remove(h1));
        assert!(list.remove(h3));
        assert!(list.is_empty());

        // Double removal reports false.
        assert!(!list.remove(h2));
    }

    #[test]
    fn test_callback_list_order() {
        let mut list: CallbackList<u32> = CallbackList::default();
        list.insert(10);
        let mid = list.insert(20);
        list.insert(30);
        list.remove(mid);

        let order: Vec<u32> = list.iter_mut().map(|v| *v).collect();
        assert_eq!(order, vec![10, 30]);
    }
}
