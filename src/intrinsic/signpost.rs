//! The signpost intrinsic triangulation.
//!
//! Implements the datastructure from
//! > "Navigating Intrinsic Triangulations". Sharp, Soliman, and Crane.
//! > SIGGRAPH 2019
//!
//! Alongside the intrinsic mesh and its edge lengths, every half-edge stores
//! the polar direction it leaves its tail vertex at (a *signpost*), and every
//! vertex stores its cone angle sum. Directions at a vertex `v` are measured
//! in the tangent frame of `v`'s location on the input surface:
//!
//! - original vertices use the input vertex's frame, zero at the reference
//!   half-edge chosen at construction;
//! - vertices inserted into a face use the canonical 2-D layout frame of the
//!   input face carrying them;
//! - vertices inserted on an edge use the frame whose zero points along the
//!   carrying input edge's canonical half-edge.
//!
//! Sharing one frame per vertex between the input and intrinsic
//! triangulations is what lets any intrinsic half-edge be traced across the
//! input surface as a geodesic, and any input point be relocated on the
//! intrinsic triangulation.

use std::f64::consts::{PI, TAU};

use nalgebra::{Point2, Vector2, Vector3};
use rayon::prelude::*;

use crate::algo::trace::{face_layout, trace_geodesic, TraceOptions, TraceResult};
use crate::error::{Result, TriangulationError};
use crate::geometry::{
    corner_angle_from_lengths, layout_triangle_vertex, normalize_barycentric,
    satisfies_triangle_inequality, SurfacePoint,
};
use crate::mesh::{EdgeId, FaceId, HalfEdgeId, HalfEdgeMesh, MeshIndex, VertexId};

use super::{CallbackHandle, CallbackList, IntrinsicTriangulation, MutationEvent, DELAUNAY_EPS};

type FlipCallback<I> = Box<dyn FnMut(EdgeId<I>)>;
type FaceInsertionCallback<I> = Box<dyn FnMut(FaceId<I>, VertexId<I>)>;
type EdgeSplitCallback<I> = Box<dyn FnMut(EdgeId<I>, HalfEdgeId<I>, HalfEdgeId<I>)>;

/// An intrinsic triangulation sitting atop a fixed input surface, with
/// signpost directions keeping the two in correspondence.
///
/// Constructed as an exact copy of the input; local mutations then evolve the
/// intrinsic connectivity and lengths while `vertex_locations` keeps every
/// intrinsic vertex traceable to a point on the input surface.
pub struct SignpostTriangulation<I: MeshIndex = u32> {
    // Fixed input surface.
    input_mesh: HalfEdgeMesh<I>,
    input_lengths: Vec<f64>,
    input_directions: Vec<f64>,
    input_angle_sums: Vec<f64>,

    // Mutable intrinsic state.
    mesh: HalfEdgeMesh<I>,
    edge_lengths: Vec<f64>,
    vertex_locations: Vec<SurfacePoint<I>>,
    marked_edges: Vec<bool>,
    n_marked: usize,
    edge_is_original: Vec<bool>,
    halfedge_directions: Vec<f64>,
    vertex_angle_sums: Vec<f64>,

    // Mutation log drained by drivers.
    events: Vec<MutationEvent<I>>,

    // Observer callbacks, fired after each mutation completes.
    edge_flip_callbacks: CallbackList<FlipCallback<I>>,
    face_insertion_callbacks: CallbackList<FaceInsertionCallback<I>>,
    edge_split_callbacks: CallbackList<EdgeSplitCallback<I>>,
}

impl<I: MeshIndex> std::fmt::Debug for SignpostTriangulation<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignpostTriangulation")
            .field("n_vertices", &self.mesh.num_vertices())
            .field("n_edges", &self.mesh.num_edges())
            .field("n_faces", &self.mesh.num_faces())
            .finish_non_exhaustive()
    }
}

// ==================== Construction ====================

impl<I: MeshIndex> SignpostTriangulation<I> {
    /// Build an intrinsic triangulation over `input_mesh` with the given
    /// per-edge lengths (indexed by raw edge id).
    ///
    /// The intrinsic triangulation starts as an exact copy of the input:
    /// same connectivity, same handle numbering, same lengths; every vertex
    /// located at its input counterpart.
    pub fn new(input_mesh: HalfEdgeMesh<I>, input_lengths: Vec<f64>) -> Result<Self> {
        if !input_mesh.is_triangular() || input_mesh.num_faces() == 0 {
            return Err(TriangulationError::NonTriangular);
        }
        if input_lengths.len() != input_mesh.edge_capacity() {
            return Err(TriangulationError::LengthMismatch {
                got: input_lengths.len(),
                expected: input_mesh.edge_capacity(),
            });
        }
        for e in input_mesh.edge_ids() {
            let len = input_lengths[e.index()];
            if !(len.is_finite() && len > 0.0) {
                return Err(TriangulationError::InvalidEdgeLength {
                    edge: e.index(),
                    length: len,
                });
            }
        }

        let (input_directions, input_angle_sums) =
            compute_signposts(&input_mesh, &input_lengths);

        let mesh = input_mesh.clone();
        let edge_lengths = input_lengths.clone();
        let vertex_locations = (0..mesh.vertex_capacity())
            .map(|i| SurfacePoint::Vertex(VertexId::new(i)))
            .collect();

        Ok(Self {
            halfedge_directions: input_directions.clone(),
            vertex_angle_sums: input_angle_sums.clone(),
            input_mesh,
            input_lengths,
            input_directions,
            input_angle_sums,
            marked_edges: vec![false; mesh.edge_capacity()],
            n_marked: 0,
            edge_is_original: vec![true; mesh.edge_capacity()],
            events: Vec::new(),
            edge_flip_callbacks: CallbackList::default(),
            face_insertion_callbacks: CallbackList::default(),
            edge_split_callbacks: CallbackList::default(),
            mesh,
            edge_lengths,
            vertex_locations,
        })
    }

    /// Build from an embedded mesh, deriving edge lengths from vertex
    /// positions.
    pub fn from_positions(
        input_mesh: HalfEdgeMesh<I>,
        positions: &[nalgebra::Point3<f64>],
    ) -> Result<Self> {
        let lengths = crate::mesh::edge_lengths_from_positions(&input_mesh, positions)?;
        Self::new(input_mesh, lengths)
    }

    // ==================== Accessors ====================

    /// The fixed input mesh.
    pub fn input_mesh(&self) -> &HalfEdgeMesh<I> {
        &self.input_mesh
    }

    /// The fixed input edge lengths.
    pub fn input_edge_lengths(&self) -> &[f64] {
        &self.input_lengths
    }

    /// Signpost direction of a half-edge, in the cone coordinates of its
    /// tail (radians in `[0, vertex_angle_sum)`).
    pub fn halfedge_direction(&self, he: HalfEdgeId<I>) -> f64 {
        self.halfedge_directions[he.index()]
    }

    /// Cone angle sum at a vertex.
    pub fn vertex_angle_sum(&self, v: VertexId<I>) -> f64 {
        self.vertex_angle_sums[v.index()]
    }

    /// Whether this edge has been untouched since construction.
    ///
    /// Original edges (and the halves of split original edges) lie along
    /// input edges, which lets correspondence queries skip tracing.
    pub fn edge_is_original(&self, e: EdgeId<I>) -> bool {
        self.edge_is_original[e.index()]
    }

    /// The marked-edge table, indexed by raw edge id.
    pub fn marked_edges(&self) -> &[bool] {
        &self.marked_edges
    }

    /// 2-D vector of a half-edge in the rescaled tangent plane of its tail:
    /// length is the edge length, polar angle is the signpost direction
    /// scaled by `2 pi / vertex_angle_sum`.
    pub fn halfedge_vector(&self, he: HalfEdgeId<I>) -> Vector2<f64> {
        let v = self.mesh.origin(he);
        let angle =
            self.halfedge_directions[he.index()] * TAU / self.vertex_angle_sums[v.index()];
        let len = self.edge_lengths[self.mesh.edge_of(he).index()];
        Vector2::new(angle.cos(), angle.sin()) * len
    }

    /// Map an angle into a vertex's cone coordinate range `[0, angle_sum)`.
    pub fn standardize_angle(&self, v: VertexId<I>, angle: f64) -> f64 {
        angle.rem_euclid(self.vertex_angle_sums[v.index()])
    }

    // ==================== Callbacks ====================

    /// Register a callback fired after every edge flip.
    pub fn on_edge_flip<F>(&mut self, callback: F) -> CallbackHandle
    where
        F: FnMut(EdgeId<I>) + 'static,
    {
        self.edge_flip_callbacks.insert(Box::new(callback))
    }

    /// Remove an edge-flip callback by handle.
    pub fn remove_edge_flip_callback(&mut self, handle: CallbackHandle) -> bool {
        self.edge_flip_callbacks.remove(handle)
    }

    /// Register a callback fired after every face insertion.
    pub fn on_face_insertion<F>(&mut self, callback: F) -> CallbackHandle
    where
        F: FnMut(FaceId<I>, VertexId<I>) + 'static,
    {
        self.face_insertion_callbacks.insert(Box::new(callback))
    }

    /// Remove a face-insertion callback by handle.
    pub fn remove_face_insertion_callback(&mut self, handle: CallbackHandle) -> bool {
        self.face_insertion_callbacks.remove(handle)
    }

    /// Register a callback fired after every edge split. Receives the
    /// original edge and the two half-edges leaving the new vertex.
    pub fn on_edge_split<F>(&mut self, callback: F) -> CallbackHandle
    where
        F: FnMut(EdgeId<I>, HalfEdgeId<I>, HalfEdgeId<I>) + 'static,
    {
        self.edge_split_callbacks.insert(Box::new(callback))
    }

    /// Remove an edge-split callback by handle.
    pub fn remove_edge_split_callback(&mut self, handle: CallbackHandle) -> bool {
        self.edge_split_callbacks.remove(handle)
    }

    // ==================== Correspondence queries ====================

    /// Trace an intrinsic half-edge across the input surface.
    ///
    /// Returns the start location, every input edge crossing in order, and a
    /// final point: the exact location of the head vertex when `trim_end` is
    /// set, the raw trace endpoint otherwise.
    pub fn trace_halfedge(&self, he: HalfEdgeId<I>, trim_end: bool) -> Vec<SurfacePoint<I>> {
        self.view().trace_halfedge(he, trim_end)
    }

    /// Trace every intrinsic edge across the input surface (in parallel).
    pub fn trace_edges(&self) -> Vec<(EdgeId<I>, Vec<SurfacePoint<I>>)> {
        let view = self.view();
        let ids: Vec<EdgeId<I>> = self.mesh.edge_ids().collect();
        ids.into_par_iter()
            .map(|e| {
                let he = view.mesh.halfedge_of_edge(e);
                (e, view.trace_halfedge(he, false))
            })
            .collect()
    }

    /// Given a point on the intrinsic triangulation, find the equivalent
    /// point on the input surface.
    pub fn equivalent_point_on_input(&self, p: SurfacePoint<I>) -> SurfacePoint<I> {
        let view = self.view();
        match p {
            SurfacePoint::Vertex(v) => self.vertex_locations[v.index()],
            SurfacePoint::Edge { edge, t } => {
                if self.edge_is_original[edge.index()] {
                    let he = self.mesh.halfedge_of_edge(edge);
                    let (input_edge, ta, tb) = view.input_edge_params(he);
                    SurfacePoint::Edge {
                        edge: input_edge,
                        t: ta + t * (tb - ta),
                    }
                } else {
                    let he = self.mesh.halfedge_of_edge(edge);
                    let tail = self.mesh.origin(he);
                    let len = t * self.edge_lengths[edge.index()];
                    let phi = self.halfedge_directions[he.index()];
                    view.trace_on_input(self.vertex_locations[tail.index()], phi, len)
                        .end_point
                }
            }
            SurfacePoint::Face { face, bary } => {
                let (corner, phi, len) = face_point_ray(
                    &self.mesh,
                    &self.edge_lengths,
                    &self.halfedge_directions,
                    &self.vertex_angle_sums,
                    face,
                    bary,
                );
                view.trace_on_input(self.vertex_locations[corner.index()], phi, len)
                    .end_point
            }
        }
    }

    /// Given a point on the input surface, find the equivalent point on the
    /// intrinsic triangulation.
    ///
    /// The inverse of the correspondence is never stored; it is reconstructed
    /// by tracing over the intrinsic metric from a shared original vertex.
    pub fn equivalent_point_on_intrinsic(&self, p: SurfacePoint<I>) -> SurfacePoint<I> {
        let view = self.view();
        match p {
            // Original vertices exist in both triangulations with the same id.
            SurfacePoint::Vertex(v) => SurfacePoint::Vertex(v),
            SurfacePoint::Edge { edge, t } => {
                let he = self.input_mesh.halfedge_of_edge(edge);
                let tail = self.input_mesh.origin(he);
                let len = t * self.input_lengths[edge.index()];
                let phi = self.input_directions[he.index()];
                view.trace_on_intrinsic_from_vertex(tail, phi, len).end_point
            }
            SurfacePoint::Face { face, bary } => {
                let (corner, phi, len) = face_point_ray(
                    &self.input_mesh,
                    &self.input_lengths,
                    &self.input_directions,
                    &self.input_angle_sums,
                    face,
                    bary,
                );
                view.trace_on_intrinsic_from_vertex(corner, phi, len).end_point
            }
        }
    }

    // ==================== Internal: shared read-only view ====================

    fn view(&self) -> SignpostView<'_, I> {
        SignpostView {
            mesh: &self.mesh,
            edge_lengths: &self.edge_lengths,
            vertex_locations: &self.vertex_locations,
            edge_is_original: &self.edge_is_original,
            halfedge_directions: &self.halfedge_directions,
            vertex_angle_sums: &self.vertex_angle_sums,
            input_mesh: &self.input_mesh,
            input_lengths: &self.input_lengths,
            input_directions: &self.input_directions,
            input_angle_sums: &self.input_angle_sums,
        }
    }

    // ==================== Internal: signpost maintenance ====================

    /// Recompute the direction of `he` from its clockwise neighbor around
    /// the tail vertex. The neighbor's face must be real.
    fn update_angle_from_cw_neighbor(&mut self, he: HalfEdgeId<I>) {
        let g = self.mesh.cw_around_origin(he);
        debug_assert!(self.mesh.face_of(g).is_valid());
        let v = self.mesh.origin(he);
        let angle = self.halfedge_directions[g.index()]
            + corner_angle_in(&self.mesh, &self.edge_lengths, g);
        let standardized = self.standardize_angle(v, angle);
        self.halfedge_directions[he.index()] = standardized;
    }

    /// Grow every attribute table to the mesh's current slot counts.
    /// Recycled slots keep stale values; mutators overwrite every slot they
    /// allocate.
    fn sync_tables(&mut self) {
        self.edge_lengths.resize(self.mesh.edge_capacity(), 0.0);
        self.marked_edges.resize(self.mesh.edge_capacity(), false);
        self.edge_is_original.resize(self.mesh.edge_capacity(), false);
        self.halfedge_directions
            .resize(self.mesh.halfedge_capacity(), 0.0);
        self.vertex_angle_sums.resize(self.mesh.vertex_capacity(), 0.0);
        self.vertex_locations.resize(
            self.mesh.vertex_capacity(),
            SurfacePoint::Vertex(VertexId::invalid()),
        );
    }

    fn fire_flip(&mut self, e: EdgeId<I>) {
        self.events.push(MutationEvent::EdgeFlip { edge: e });
        for cb in self.edge_flip_callbacks.iter_mut() {
            cb(e);
        }
    }

    fn fire_face_insertion(&mut self, f: FaceId<I>, v: VertexId<I>) {
        self.events
            .push(MutationEvent::FaceInsertion { face: f, vertex: v });
        for cb in self.face_insertion_callbacks.iter_mut() {
            cb(f, v);
        }
    }

    fn fire_edge_split(&mut self, e: EdgeId<I>, he_front: HalfEdgeId<I>, he_back: HalfEdgeId<I>) {
        self.events.push(MutationEvent::EdgeSplit {
            old_edge: e,
            he_front,
            he_back,
        });
        for cb in self.edge_split_callbacks.iter_mut() {
            cb(e, he_front, he_back);
        }
    }

    // ==================== Internal: flips ====================

    /// Lay the two triangles of `e` flat around it: tail at the origin, head
    /// on +x, the near apex above, the far apex below. Returns the apex
    /// positions and the length of the would-be flipped diagonal.
    fn layout_diamond(&self, e: EdgeId<I>) -> Option<(Point2<f64>, Point2<f64>, Point2<f64>, Point2<f64>, f64)> {
        let (he, ht) = self.mesh.edge_halfedges(e);
        if !self.mesh.face_of(he).is_valid() || !self.mesh.face_of(ht).is_valid() {
            return None;
        }
        let hn = self.mesh.next(he);
        let hp = self.mesh.prev(he);
        let tn = self.mesh.next(ht);
        let tp = self.mesh.prev(ht);

        let l = self.edge_lengths[e.index()];
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(l, 0.0);
        let c = layout_triangle_vertex(
            a,
            b,
            self.edge_lengths[self.mesh.edge_of(hn).index()],
            self.edge_lengths[self.mesh.edge_of(hp).index()],
        );
        let d = layout_triangle_vertex(
            b,
            a,
            self.edge_lengths[self.mesh.edge_of(tn).index()],
            self.edge_lengths[self.mesh.edge_of(tp).index()],
        );
        let new_len = (c - d).norm();
        if !new_len.is_finite() {
            return None;
        }
        Some((a, b, c, d, new_len))
    }

    fn flip_feasible(&self, e: EdgeId<I>, eps: f64) -> Option<f64> {
        let (he, ht) = self.mesh.edge_halfedges(e);
        if self.mesh.origin(he) == self.mesh.origin(ht) {
            return None; // self-edge: no diamond to speak of
        }
        let hn = self.mesh.next(he);
        let hp = self.mesh.prev(he);
        let tn = self.mesh.next(ht);
        let tp = self.mesh.prev(ht);

        let (a, b, c, d, new_len) = self.layout_diamond(e)?;
        let l_hn = self.edge_lengths[self.mesh.edge_of(hn).index()];
        let l_hp = self.edge_lengths[self.mesh.edge_of(hp).index()];
        let l_tn = self.edge_lengths[self.mesh.edge_of(tn).index()];
        let l_tp = self.edge_lengths[self.mesh.edge_of(tp).index()];

        let scale = self.edge_lengths[e.index()]
            .max(l_hn)
            .max(l_hp)
            .max(l_tn)
            .max(l_tp);

        // Both new triangles must be positively oriented (convex diamond)
        // and satisfy the strict triangle inequality.
        let area_tail = cross2(d - a, c - a);
        let area_head = cross2(c - b, d - b);
        let feasible = new_len > eps * scale
            && area_tail > eps * scale * scale
            && area_head > eps * scale * scale
            && satisfies_triangle_inequality(l_tn, new_len, l_hp, eps)
            && satisfies_triangle_inequality(l_tp, l_hn, new_len, eps);

        feasible.then_some(new_len)
    }

    /// Flip `e` with the given new diagonal length, rewriting the two
    /// signposts of the rotated edge from their still-valid neighbors.
    fn flip_edge_internal(&mut self, e: EdgeId<I>, new_len: f64) {
        self.mesh.flip_edge(e);
        self.edge_lengths[e.index()] = new_len;
        self.edge_is_original[e.index()] = false;

        let (he, ht) = self.mesh.edge_halfedges(e);
        self.update_angle_from_cw_neighbor(he);
        self.update_angle_from_cw_neighbor(ht);

        self.fire_flip(e);
    }

    /// Flip an edge, with the caller supplying the new geometric data
    /// instead of it being computed. Must be flippable. Experts only.
    pub fn flip_edge_manual(
        &mut self,
        e: EdgeId<I>,
        new_length: f64,
        forward_angle: f64,
        reverse_angle: f64,
        is_original: bool,
    ) {
        self.mesh.flip_edge(e);
        self.edge_lengths[e.index()] = new_length;
        self.edge_is_original[e.index()] = is_original;

        let (he, ht) = self.mesh.edge_halfedges(e);
        let v_fwd = self.mesh.origin(he);
        let v_rev = self.mesh.origin(ht);
        self.halfedge_directions[he.index()] = self.standardize_angle(v_fwd, forward_angle);
        self.halfedge_directions[ht.index()] = self.standardize_angle(v_rev, reverse_angle);

        self.fire_flip(e);
    }

    // ==================== Internal: insertion ====================

    fn insert_vertex_face(&mut self, f: FaceId<I>, bary: Vector3<f64>) -> VertexId<I> {
        let bary = normalize_barycentric(bary);
        let [he0, he1, he2] = self.mesh.face_halfedge_triple(f);
        let [v0, v1, v2] = self.mesh.face_triangle(f);
        let pts = face_layout(&self.mesh, &self.edge_lengths, f);
        let p = Point2::from(
            pts[0].coords * bary.x + pts[1].coords * bary.y + pts[2].coords * bary.z,
        );

        let r0 = (p - pts[0]).norm();
        let r1 = (p - pts[1]).norm();
        let r2 = (p - pts[2]).norm();

        // Directions of the three new spokes inside the old corner wedges.
        let alpha0 = ccw_angle(pts[1] - pts[0], p - pts[0]);
        let alpha1 = ccw_angle(pts[2] - pts[1], p - pts[1]);
        let alpha2 = ccw_angle(pts[0] - pts[2], p - pts[2]);
        let dir_a0 =
            self.standardize_angle(v0, self.halfedge_directions[he0.index()] + alpha0);
        let dir_a1 =
            self.standardize_angle(v1, self.halfedge_directions[he1.index()] + alpha1);
        let dir_a2 =
            self.standardize_angle(v2, self.halfedge_directions[he2.index()] + alpha2);

        // Locate the new vertex on the input surface by tracing the straight
        // path from the first corner.
        let trace = self
            .view()
            .trace_on_input(self.vertex_locations[v0.index()], dir_a0, r0);

        let m = self.mesh.insert_vertex_in_face_topo(f);
        self.sync_tables();

        // Spokes leaving the new vertex, clockwise: toward v0, v2, v1.
        let b0 = self.mesh.vertex(m).halfedge;
        let b2 = self.mesh.cw_around_origin(b0);
        let b1 = self.mesh.cw_around_origin(b2);

        for (bk, len) in [(b0, r0), (b1, r1), (b2, r2)] {
            let e = self.mesh.edge_of(bk);
            self.edge_lengths[e.index()] = len;
            self.edge_is_original[e.index()] = false;
            if self.marked_edges[e.index()] {
                // stale flag on a recycled slot
                self.marked_edges[e.index()] = false;
                self.n_marked -= 1;
            }
        }

        let (a0, a1, a2) = (self.mesh.twin(b0), self.mesh.twin(b1), self.mesh.twin(b2));
        self.halfedge_directions[a0.index()] = dir_a0;
        self.halfedge_directions[a1.index()] = dir_a1;
        self.halfedge_directions[a2.index()] = dir_a2;

        // Resolve the new vertex: location, flat cone, signposts seeded from
        // the reverse of the arriving trace direction.
        self.vertex_angle_sums[m.index()] = TAU;
        self.vertex_locations[m.index()] = trace.end_point;
        let back = self.view().input_direction_at(
            trace.end_point,
            trace.end_face,
            -trace.end_dir,
        );
        let seed = self.standardize_angle(m, back);
        self.halfedge_directions[b0.index()] = seed;
        let n1 = self.mesh.ccw_around_origin(b0);
        self.update_angle_from_cw_neighbor(n1);
        let n2 = self.mesh.ccw_around_origin(n1);
        self.update_angle_from_cw_neighbor(n2);

        self.fire_face_insertion(f, m);
        m
    }

    // ==================== Internal: removal ====================

    fn try_remove_inserted_vertex(&mut self, v: VertexId<I>) -> Option<FaceId<I>> {
        if self.mesh.is_dead_vertex(v) {
            return None;
        }
        // Original vertices are permanent.
        if self.vertex_locations[v.index()].is_vertex() {
            return None;
        }
        if self.mesh.is_boundary_vertex(v) {
            return None;
        }

        // Flip surrounding edges until only three spokes remain.
        let mut stuck_rounds = 0;
        while self.mesh.valence(v) > 3 {
            let spokes: Vec<EdgeId<I>> = self.mesh.vertex_edges(v).collect();
            let mut flipped = false;
            for e in spokes {
                if self.flip_edge_if_possible(e, DELAUNAY_EPS) {
                    flipped = true;
                    break;
                }
            }
            if !flipped {
                stuck_rounds += 1;
                if stuck_rounds > 1 {
                    return None; // numerically stuck; leave the vertex in place
                }
            } else {
                stuck_rounds = 0;
            }
        }

        Some(self.mesh.remove_degree3_vertex(v))
    }
}

// ==================== The mutation contract ====================

impl<I: MeshIndex> IntrinsicTriangulation<I> for SignpostTriangulation<I> {
    fn mesh(&self) -> &HalfEdgeMesh<I> {
        &self.mesh
    }

    fn edge_lengths(&self) -> &[f64] {
        &self.edge_lengths
    }

    fn vertex_locations(&self) -> &[SurfacePoint<I>] {
        &self.vertex_locations
    }

    fn is_edge_marked(&self, e: EdgeId<I>) -> bool {
        self.marked_edges[e.index()]
    }

    fn set_edge_marked(&mut self, e: EdgeId<I>, marked: bool) {
        let slot = &mut self.marked_edges[e.index()];
        if *slot != marked {
            *slot = marked;
            if marked {
                self.n_marked += 1;
            } else {
                self.n_marked -= 1;
            }
        }
    }

    fn flip_edge_if_not_delaunay(&mut self, e: EdgeId<I>) -> bool {
        if self.mesh.is_dead_edge(e) || self.is_fixed(e) || self.is_delaunay(e) {
            return false;
        }
        match self.flip_feasible(e, DELAUNAY_EPS) {
            Some(new_len) => {
                self.flip_edge_internal(e, new_len);
                true
            }
            None => false,
        }
    }

    fn flip_edge_if_possible(&mut self, e: EdgeId<I>, eps: f64) -> bool {
        if self.mesh.is_dead_edge(e) || self.is_fixed(e) {
            return false;
        }
        match self.flip_feasible(e, eps) {
            Some(new_len) => {
                self.flip_edge_internal(e, new_len);
                true
            }
            None => false,
        }
    }

    fn insert_vertex(&mut self, p: SurfacePoint<I>) -> VertexId<I> {
        match p {
            SurfacePoint::Vertex(v) => v,
            SurfacePoint::Edge { edge, t } => {
                let he = self.mesh.halfedge_of_edge(edge);
                let new_he = self.split_edge(he, t);
                self.mesh.origin(new_he)
            }
            SurfacePoint::Face { face, bary } => self.insert_vertex_face(face, bary),
        }
    }

    fn insert_circumcenter(&mut self, f: FaceId<I>) -> VertexId<I> {
        // Circumcenter in barycentric coordinates.
        let [he0, he1, he2] = self.mesh.face_halfedge_triple(f);
        let a = self.edge_lengths[self.mesh.edge_of(he1).index()];
        let b = self.edge_lengths[self.mesh.edge_of(he2).index()];
        let c = self.edge_lengths[self.mesh.edge_of(he0).index()];
        let (a2, b2, c2) = (a * a, b * b, c * c);
        let circumcenter = normalize_barycentric(Vector3::new(
            a2 * (b2 + c2 - a2),
            b2 * (c2 + a2 - b2),
            c2 * (a2 + b2 - c2),
        ));

        // Trace from the barycenter (have to trace from somewhere). Marked
        // edges act as barriers, as does the boundary.
        let barycenter = Vector3::repeat(1.0 / 3.0);
        let offset = circumcenter - barycenter;
        let pts = face_layout(&self.mesh, &self.edge_lengths, f);
        let dir: Vector2<f64> =
            pts[0].coords * offset.x + pts[1].coords * offset.y + pts[2].coords * offset.z;

        let options = TraceOptions {
            barrier_edges: (self.n_marked > 0).then_some(&self.marked_edges[..]),
            ..Default::default()
        };
        let result = trace_geodesic(&self.mesh, &self.edge_lengths, f, barycenter, dir, &options);

        // A blocking edge gets its midpoint inserted instead: splitting a
        // fixed edge at 0.5 is exactly the Chew-style fallback.
        let mut target = result.end_point;
        if let SurfacePoint::Edge { t, .. } = &mut target {
            *t = 0.5;
        }

        self.insert_vertex(target)
    }

    fn insert_barycenter(&mut self, f: FaceId<I>) -> VertexId<I> {
        self.insert_vertex(SurfacePoint::Face {
            face: f,
            bary: Vector3::repeat(1.0 / 3.0),
        })
    }

    fn remove_inserted_vertex(&mut self, v: VertexId<I>) -> Option<FaceId<I>> {
        self.try_remove_inserted_vertex(v)
    }

    fn split_edge(&mut self, he: HalfEdgeId<I>, t: f64) -> HalfEdgeId<I> {
        debug_assert!(t > 0.0 && t < 1.0, "split parameter must be interior");

        // Normalize to the interior side of the edge.
        let (he, t) = if self.mesh.is_boundary_halfedge(he) {
            (self.mesh.twin(he), 1.0 - t)
        } else {
            (he, t)
        };

        let e = self.mesh.edge_of(he);
        let l = self.edge_lengths[e.index()];
        let was_marked = self.marked_edges[e.index()];
        let was_original = self.edge_is_original[e.index()];
        let ht_old = self.mesh.twin(he);
        let a = self.mesh.origin(he);
        let interior = !self.mesh.is_boundary_halfedge(ht_old);

        // Geometry on the near side: distances from the split point to the
        // apex, and the signpost of the new spoke leaving the apex.
        let f0 = self.mesh.face_of(he);
        let pts0 = face_layout(&self.mesh, &self.edge_lengths, f0);
        let k0 = self
            .mesh
            .face_halfedge_triple(f0)
            .iter()
            .position(|&h| h == he)
            .unwrap();
        let pa = pts0[k0];
        let pb = pts0[(k0 + 1) % 3];
        let pc = pts0[(k0 + 2) % 3];
        let p_near = pa + (pb - pa) * t;
        let len_to_near_apex = (p_near - pc).norm();
        let hp = self.mesh.prev(he);
        let v_near = self.mesh.origin(hp);
        let dir_from_near_apex = self.standardize_angle(
            v_near,
            self.halfedge_directions[hp.index()] + ccw_angle(pa - pc, p_near - pc),
        );

        // Geometry on the far side, when there is one.
        let far = if interior {
            let f1 = self.mesh.face_of(ht_old);
            let pts1 = face_layout(&self.mesh, &self.edge_lengths, f1);
            let k1 = self
                .mesh
                .face_halfedge_triple(f1)
                .iter()
                .position(|&h| h == ht_old)
                .unwrap();
            let pb1 = pts1[k1];
            let pa1 = pts1[(k1 + 1) % 3];
            let pd = pts1[(k1 + 2) % 3];
            let p_far = pb1 + (pa1 - pb1) * (1.0 - t);
            let len_to_far_apex = (p_far - pd).norm();
            let tp = self.mesh.prev(ht_old);
            let v_far = self.mesh.origin(tp);
            let dir_from_far_apex = self.standardize_angle(
                v_far,
                self.halfedge_directions[tp.index()] + ccw_angle(pb1 - pd, p_far - pd),
            );
            Some((len_to_far_apex, dir_from_far_apex))
        } else {
            None
        };

        // The outgoing direction at the head vertex stays on the same ray.
        let dir_at_head = self.halfedge_directions[ht_old.index()];

        // Resolve the new vertex's input location before mutating.
        enum Resolved<I: MeshIndex> {
            Along {
                location: SurfacePoint<I>,
                seed_front: f64,
            },
            Traced {
                location: SurfacePoint<I>,
                back_angle: f64,
            },
        }
        let resolved = if was_original {
            let (input_edge, ta, tb) = self.view().input_edge_params(he);
            Resolved::Along {
                location: SurfacePoint::Edge {
                    edge: input_edge,
                    t: ta + t * (tb - ta),
                },
                seed_front: if tb > ta { 0.0 } else { PI },
            }
        } else {
            let phi = self.halfedge_directions[he.index()];
            let trace = self
                .view()
                .trace_on_input(self.vertex_locations[a.index()], phi, t * l);
            let back_angle = self.view().input_direction_at(
                trace.end_point,
                trace.end_face,
                -trace.end_dir,
            );
            Resolved::Traced {
                location: trace.end_point,
                back_angle,
            }
        };

        // Mutate and rebuild the attribute tables.
        let topo = self.mesh.split_edge_topo(he);
        let m = topo.new_vertex;
        let he_front = topo.he_front;
        let he_back = topo.he_back;
        self.sync_tables();

        self.edge_lengths[e.index()] = t * l;
        let e_front = self.mesh.edge_of(he_front);
        self.edge_lengths[e_front.index()] = (1.0 - t) * l;
        // Both halves inherit marking and originality.
        self.marked_edges[e_front.index()] = was_marked;
        if was_marked {
            self.n_marked += 1;
        }
        self.edge_is_original[e_front.index()] = was_original;

        let he_near = self.mesh.cw_around_origin(he_back); // toward the near apex
        let e_near = self.mesh.edge_of(he_near);
        self.edge_lengths[e_near.index()] = len_to_near_apex;
        self.edge_is_original[e_near.index()] = false;
        if self.marked_edges[e_near.index()] {
            self.marked_edges[e_near.index()] = false;
            self.n_marked -= 1;
        }
        let ht_near = self.mesh.twin(he_near);
        self.halfedge_directions[ht_near.index()] = dir_from_near_apex;

        if let Some((len_to_far_apex, dir_from_far_apex)) = far {
            let he_far = self.mesh.cw_around_origin(he_front);
            let e_far = self.mesh.edge_of(he_far);
            self.edge_lengths[e_far.index()] = len_to_far_apex;
            self.edge_is_original[e_far.index()] = false;
            if self.marked_edges[e_far.index()] {
                self.marked_edges[e_far.index()] = false;
                self.n_marked -= 1;
            }
            let ht_far = self.mesh.twin(he_far);
            self.halfedge_directions[ht_far.index()] = dir_from_far_apex;
        }

        let ht_front = self.mesh.twin(he_front);
        self.halfedge_directions[ht_front.index()] = dir_at_head;

        // Resolve the new vertex.
        self.vertex_angle_sums[m.index()] = if interior { TAU } else { PI };
        match resolved {
            Resolved::Along {
                location,
                seed_front,
            } => {
                self.vertex_locations[m.index()] = location;
                let seed = self.standardize_angle(m, seed_front);
                self.halfedge_directions[he_front.index()] = seed;
                let mut cur = he_front;
                for _ in 1..self.mesh.valence(m) {
                    cur = self.mesh.ccw_around_origin(cur);
                    self.update_angle_from_cw_neighbor(cur);
                }
            }
            Resolved::Traced {
                location,
                back_angle,
            } => {
                self.vertex_locations[m.index()] = location;
                let seed = self.standardize_angle(m, back_angle);
                self.halfedge_directions[he_back.index()] = seed;
                let mut cur = he_back;
                for _ in 1..self.mesh.valence(m) {
                    cur = self.mesh.ccw_around_origin(cur);
                    self.update_angle_from_cw_neighbor(cur);
                }
            }
        }

        self.fire_edge_split(e, he_front, he_back);
        he_front
    }

    fn take_events(&mut self) -> Vec<MutationEvent<I>> {
        std::mem::take(&mut self.events)
    }
}

// ==================== Read-only geometry view ====================

/// Borrowed, `Sync` view of the geometric state, shared by the
/// correspondence queries (and their parallel callers).
struct SignpostView<'a, I: MeshIndex> {
    mesh: &'a HalfEdgeMesh<I>,
    edge_lengths: &'a [f64],
    vertex_locations: &'a [SurfacePoint<I>],
    edge_is_original: &'a [bool],
    halfedge_directions: &'a [f64],
    vertex_angle_sums: &'a [f64],
    input_mesh: &'a HalfEdgeMesh<I>,
    input_lengths: &'a [f64],
    input_directions: &'a [f64],
    input_angle_sums: &'a [f64],
}

impl<'a, I: MeshIndex> SignpostView<'a, I> {
    /// Trace across the input surface, starting at an input-surface point,
    /// with `phi` expressed in that point's tangent frame.
    fn trace_on_input(
        &self,
        start: SurfacePoint<I>,
        phi: f64,
        len: f64,
    ) -> TraceResult<I> {
        let (face, bary, unit_dir) = match start {
            SurfacePoint::Vertex(v) => launch_from_vertex(
                self.input_mesh,
                self.input_lengths,
                self.input_directions,
                self.input_angle_sums,
                v,
                phi,
            ),
            SurfacePoint::Edge { edge, t } => {
                launch_from_edge(self.input_mesh, self.input_lengths, edge, t, phi)
            }
            SurfacePoint::Face { face, bary } => {
                (face, bary, Vector2::new(phi.cos(), phi.sin()))
            }
        };
        trace_geodesic(
            self.input_mesh,
            self.input_lengths,
            face,
            bary,
            unit_dir * len,
            &TraceOptions::default(),
        )
    }

    /// Trace across the intrinsic triangulation starting at one of its
    /// vertices, with `phi` in that vertex's cone coordinates.
    fn trace_on_intrinsic_from_vertex(
        &self,
        v: VertexId<I>,
        phi: f64,
        len: f64,
    ) -> TraceResult<I> {
        let (face, bary, unit_dir) = launch_from_vertex(
            self.mesh,
            self.edge_lengths,
            self.halfedge_directions,
            self.vertex_angle_sums,
            v,
            phi,
        );
        trace_geodesic(
            self.mesh,
            self.edge_lengths,
            face,
            bary,
            unit_dir * len,
            &TraceOptions::default(),
        )
    }

    /// Express a direction `d` (given in the canonical layout frame of
    /// `at_face` on the input mesh) as an angle in the tangent frame of
    /// `point`.
    fn input_direction_at(
        &self,
        point: SurfacePoint<I>,
        at_face: FaceId<I>,
        d: Vector2<f64>,
    ) -> f64 {
        match point {
            SurfacePoint::Face { .. } => d.y.atan2(d.x).rem_euclid(TAU),
            SurfacePoint::Edge { edge, .. } => {
                let he = self.input_mesh.halfedge_of_edge(edge);
                let canonical_dir = if self.input_mesh.face_of(he) == at_face {
                    layout_dir_of(self.input_mesh, self.input_lengths, he)
                } else {
                    -layout_dir_of(self.input_mesh, self.input_lengths, self.input_mesh.twin(he))
                };
                ccw_angle(canonical_dir, d)
            }
            SurfacePoint::Vertex(v) => {
                let he = self
                    .input_mesh
                    .vertex_halfedges(v)
                    .find(|&h| self.input_mesh.face_of(h) == at_face)
                    .expect("end face not incident to end vertex");
                let local = ccw_angle(
                    layout_dir_of(self.input_mesh, self.input_lengths, he),
                    d,
                );
                (self.input_directions[he.index()] + local)
                    .rem_euclid(self.input_angle_sums[v.index()])
            }
        }
    }

    /// The input edge an original intrinsic edge lies along, with the input
    /// parameters of its tail and head.
    fn input_edge_params(&self, he: HalfEdgeId<I>) -> (EdgeId<I>, f64, f64) {
        let a = self.mesh.origin(he);
        let b = self.mesh.dest(he);
        let loc_a = self.vertex_locations[a.index()];
        let loc_b = self.vertex_locations[b.index()];

        let input_edge = match (loc_a, loc_b) {
            (SurfacePoint::Edge { edge, .. }, _) => edge,
            (_, SurfacePoint::Edge { edge, .. }) => edge,
            (SurfacePoint::Vertex(ia), SurfacePoint::Vertex(ib)) => self
                .input_mesh
                .vertex_halfedges(ia)
                .find(|&h| self.input_mesh.dest(h) == ib)
                .map(|h| self.input_mesh.edge_of(h))
                .expect("original edge endpoints not adjacent on input"),
            _ => unreachable!("original edge endpoint located inside a face"),
        };

        let param = |loc: SurfacePoint<I>| -> f64 {
            match loc {
                SurfacePoint::Edge { t, .. } => t,
                SurfacePoint::Vertex(iv) => {
                    let he_in = self.input_mesh.halfedge_of_edge(input_edge);
                    if self.input_mesh.origin(he_in) == iv {
                        0.0
                    } else {
                        1.0
                    }
                }
                SurfacePoint::Face { .. } => unreachable!(),
            }
        };
        (input_edge, param(loc_a), param(loc_b))
    }

    /// Trace one intrinsic half-edge over the input surface.
    fn trace_halfedge(&self, he: HalfEdgeId<I>, trim_end: bool) -> Vec<SurfacePoint<I>> {
        let e = self.mesh.edge_of(he);
        let tail = self.mesh.origin(he);
        let head = self.mesh.dest(he);
        let loc_tail = self.vertex_locations[tail.index()];
        let loc_head = self.vertex_locations[head.index()];

        // Original edges run straight along an input edge.
        if self.edge_is_original[e.index()] {
            return vec![loc_tail, loc_head];
        }

        let phi = self.halfedge_directions[he.index()];
        let result = self.trace_on_input(loc_tail, phi, self.edge_lengths[e.index()]);

        let mut path = result.path_points;
        path[0] = loc_tail;
        if trim_end {
            path.push(loc_head);
        } else {
            path.push(result.end_point);
        }
        path
    }
}

// ==================== Free helpers ====================

#[inline]
fn cross2(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// CCW angle from `from` to `to`, in `[0, 2 pi)`.
#[inline]
fn ccw_angle(from: Vector2<f64>, to: Vector2<f64>) -> f64 {
    cross2(from, to).atan2(from.dot(&to)).rem_euclid(TAU)
}

#[inline]
fn rotate(v: Vector2<f64>, angle: f64) -> Vector2<f64> {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}

/// For a barycentric point inside a face, the corner to launch a trace from,
/// the launch angle in that corner's cone coordinates, and the distance.
fn face_point_ray<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    lengths: &[f64],
    directions: &[f64],
    angle_sums: &[f64],
    face: FaceId<I>,
    bary: Vector3<f64>,
) -> (VertexId<I>, f64, f64) {
    let bary = normalize_barycentric(bary);
    let he0 = mesh.face_halfedge_triple(face)[0];
    let corner = mesh.origin(he0);
    let pts = face_layout(mesh, lengths, face);
    let p = Point2::from(pts[0].coords * bary.x + pts[1].coords * bary.y + pts[2].coords * bary.z);
    let alpha = ccw_angle(pts[1] - pts[0], p - pts[0]);
    let phi = (directions[he0.index()] + alpha).rem_euclid(angle_sums[corner.index()]);
    (corner, phi, (p - pts[0]).norm())
}

/// Interior angle at the tail of `he` inside its face.
fn corner_angle_in<I: MeshIndex>(mesh: &HalfEdgeMesh<I>, lengths: &[f64], he: HalfEdgeId<I>) -> f64 {
    let l_a = lengths[mesh.edge_of(he).index()];
    let l_b = lengths[mesh.edge_of(mesh.prev(he)).index()];
    let l_opp = lengths[mesh.edge_of(mesh.next(he)).index()];
    corner_angle_from_lengths(l_a, l_b, l_opp)
}

/// Unit direction of `he` inside the canonical layout of its face.
fn layout_dir_of<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    lengths: &[f64],
    he: HalfEdgeId<I>,
) -> Vector2<f64> {
    let f = mesh.face_of(he);
    debug_assert!(f.is_valid());
    let triple = mesh.face_halfedge_triple(f);
    let pts = face_layout(mesh, lengths, f);
    let k = triple.iter().position(|&h| h == he).unwrap();
    (pts[(k + 1) % 3] - pts[k]).normalize()
}

/// Per-half-edge signpost directions and per-vertex cone angle sums for a
/// static mesh: an arbitrary outgoing half-edge gets angle zero at each
/// vertex (the clockwise-most interior one on the boundary) and corner
/// angles accumulate counter-clockwise.
fn compute_signposts<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    lengths: &[f64],
) -> (Vec<f64>, Vec<f64>) {
    let mut directions = vec![0.0; mesh.halfedge_capacity()];
    let mut sums = vec![0.0; mesh.vertex_capacity()];

    for v in mesh.vertex_ids() {
        let anchor = mesh.vertex(v).halfedge;
        if !anchor.is_valid() {
            continue;
        }
        let start = if mesh.is_boundary_vertex(v) {
            // The stored half-edge is the outgoing boundary one; the fan of
            // real faces starts just clockwise of the incoming boundary.
            mesh.twin(mesh.prev(anchor))
        } else {
            anchor
        };

        directions[start.index()] = 0.0;
        let mut acc = 0.0;
        let mut he = start;
        loop {
            acc += corner_angle_in(mesh, lengths, he);
            let next = mesh.ccw_around_origin(he);
            if next == start {
                break;
            }
            directions[next.index()] = acc;
            if mesh.is_boundary_halfedge(next) {
                break; // reached the far boundary direction
            }
            he = next;
        }
        sums[v.index()] = acc;
    }

    (directions, sums)
}

/// Turn an angle in a vertex's cone coordinates into a concrete ray: the
/// wedge (face) containing the angle, the barycentric corner position, and
/// the unit direction in that face's canonical layout.
fn launch_from_vertex<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    lengths: &[f64],
    directions: &[f64],
    angle_sums: &[f64],
    v: VertexId<I>,
    phi: f64,
) -> (FaceId<I>, Vector3<f64>, Vector2<f64>) {
    let sum = angle_sums[v.index()];
    let phi = phi.rem_euclid(sum);

    let mut chosen: Option<(HalfEdgeId<I>, f64)> = None;
    let mut fallback: Option<(HalfEdgeId<I>, f64, f64)> = None;
    for he in mesh.vertex_halfedges(v) {
        if !mesh.face_of(he).is_valid() {
            continue;
        }
        let corner = corner_angle_in(mesh, lengths, he);
        let delta = (phi - directions[he.index()]).rem_euclid(sum);
        if delta <= corner + 1e-9 {
            if chosen.map_or(true, |(_, d)| delta < d) {
                chosen = Some((he, delta.min(corner)));
            }
        }
        let overshoot = delta - corner;
        if fallback.map_or(true, |(_, _, o)| overshoot < o) {
            fallback = Some((he, corner, overshoot));
        }
    }

    let (he, local) = chosen.unwrap_or_else(|| {
        // Rounding pushed the angle into a gap between wedges; clamp onto
        // the nearest one.
        let (he, corner, _) = fallback.expect("vertex has no incident face");
        (he, corner)
    });

    let f = mesh.face_of(he);
    let triple = mesh.face_halfedge_triple(f);
    let pts = face_layout(mesh, lengths, f);
    let k = triple.iter().position(|&h| h == he).unwrap();
    let edge_dir = (pts[(k + 1) % 3] - pts[k]).normalize();
    let dir = rotate(edge_dir, local);

    let mut bary = Vector3::zeros();
    bary[k] = 1.0;
    (f, bary, dir)
}

/// Turn an angle in an edge point's tangent frame (zero along the edge's
/// canonical half-edge) into a concrete ray on the side the angle points to.
fn launch_from_edge<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    lengths: &[f64],
    e: EdgeId<I>,
    t: f64,
    phi: f64,
) -> (FaceId<I>, Vector3<f64>, Vector2<f64>) {
    let he = mesh.halfedge_of_edge(e);
    let phi = phi.rem_euclid(TAU);

    // Angles in (0, pi) point into the canonical half-edge's face; the rest
    // into the twin's (when it has one).
    let use_twin = phi > PI && !mesh.is_boundary_halfedge(mesh.twin(he));
    let (he_use, s) = if use_twin {
        (mesh.twin(he), 1.0 - t)
    } else {
        (he, t)
    };

    let f = mesh.face_of(he_use);
    let triple = mesh.face_halfedge_triple(f);
    let pts = face_layout(mesh, lengths, f);
    let k = triple.iter().position(|&h| h == he_use).unwrap();

    let along = (pts[(k + 1) % 3] - pts[k]).normalize();
    let canonical_dir = if use_twin { -along } else { along };
    let dir = rotate(canonical_dir, phi);

    let mut bary = Vector3::zeros();
    bary[k] = 1.0 - s;
    bary[(k + 1) % 3] = s;
    (f, bary, dir)
}
