//! Flip-to-Delaunay and Delaunay refinement drivers.
//!
//! Both drivers work against the [`IntrinsicTriangulation`] contract only,
//! so they run unchanged on any representation. They keep their work queues
//! consistent by draining the triangulation's mutation event log after every
//! mutating call: flips performed deep inside compound operations (vertex
//! removal, circumcenter insertion) surface as events and re-seed the queues
//! exactly like directly requested flips.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use crate::algo::vertex_dijkstra_distance_within_radius;
use crate::mesh::{EdgeId, FaceId, MeshIndex};

use super::{IntrinsicTriangulation, MutationEvent};

/// Numerical-drift escape hatch: after the queues drain, the refiner rescans
/// the whole mesh at most this many times before giving up.
const MAX_RECHECK_COUNT: usize = 5;

/// Statistics from [`flip_to_delaunay`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlipStats {
    /// Number of edge flips performed.
    pub n_flips: usize,
}

/// Statistics from [`delaunay_refine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RefineStats {
    /// Number of edge flips performed.
    pub n_flips: usize,
    /// Number of vertices inserted.
    pub n_insertions: usize,
}

/// Options for [`delaunay_refine`], in the usual builder style.
///
/// ```
/// use signpost::intrinsic::refine::RefineOptions;
///
/// let options = RefineOptions::default()
///     .with_angle_threshold_degrees(25.0)
///     .with_max_insertions(10_000);
/// ```
#[derive(Debug, Clone)]
pub struct RefineOptions {
    /// Faces with a corner angle below this threshold are refined (unless
    /// the corner is unimprovable). Thresholds up to 30 degrees terminate on
    /// meshes without small input cone angles.
    pub angle_threshold_degrees: f64,

    /// Faces with a circumradius above this threshold are refined.
    pub circumradius_threshold: f64,

    /// Hard cap on vertex insertions; the refiner stops once it is reached.
    pub max_insertions: usize,

    /// The neighborhood cleared of previously inserted vertices after an
    /// edge split extends this factor times the diametral-ball radius.
    pub ball_radius_factor: f64,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            angle_threshold_degrees: 25.0,
            circumradius_threshold: f64::INFINITY,
            max_insertions: usize::MAX,
            ball_radius_factor: 2.0,
        }
    }
}

impl RefineOptions {
    /// Set the minimum-angle target, in degrees.
    pub fn with_angle_threshold_degrees(mut self, degrees: f64) -> Self {
        self.angle_threshold_degrees = degrees;
        self
    }

    /// Set the maximum circumradius target.
    pub fn with_circumradius_threshold(mut self, radius: f64) -> Self {
        self.circumradius_threshold = radius;
        self
    }

    /// Cap the number of insertions.
    pub fn with_max_insertions(mut self, max: usize) -> Self {
        self.max_insertions = max;
        self
    }
}

/// Flip edges until every edge is intrinsically Delaunay.
///
/// Classic Lawson scheme: every edge starts queued; each successful flip
/// re-queues the four edges of the two new triangles. Terminates because each
/// flip strictly decreases the triangulation's Dirichlet energy on a fixed
/// vertex set.
pub fn flip_to_delaunay<I, T>(tri: &mut T) -> FlipStats
where
    I: MeshIndex,
    T: IntrinsicTriangulation<I>,
{
    let mut queue: VecDeque<EdgeId<I>> = VecDeque::new();
    let mut in_queue = vec![false; tri.mesh().edge_capacity()];
    for e in tri.mesh().edge_ids() {
        queue.push_back(e);
        in_queue[e.index()] = true;
    }

    let mut n_flips = 0;
    while let Some(e) = queue.pop_front() {
        if tri.mesh().is_dead_edge(e) {
            continue;
        }
        in_queue[e.index()] = false;

        if !tri.flip_edge_if_not_delaunay(e) {
            continue;
        }
        n_flips += 1;

        // The four surrounding edges may have stopped being Delaunay.
        let mesh = tri.mesh();
        let (he, ht) = mesh.edge_halfedges(e);
        let neighbors = [
            mesh.edge_of(mesh.next(he)),
            mesh.edge_of(mesh.prev(he)),
            mesh.edge_of(mesh.next(ht)),
            mesh.edge_of(mesh.prev(ht)),
        ];
        for ne in neighbors {
            if !in_queue[ne.index()] {
                queue.push_back(ne);
                in_queue[ne.index()] = true;
            }
        }
    }

    tri.take_events();
    FlipStats { n_flips }
}

/// Does this face violate the refinement criteria?
///
/// A small corner angle only counts when it can actually be improved: not at
/// a degree-one tip of the 1-ring, and not wedged between two fixed edges.
pub fn should_refine_face<I, T>(tri: &T, f: FaceId<I>, options: &RefineOptions) -> bool
where
    I: MeshIndex,
    T: IntrinsicTriangulation<I>,
{
    if tri.face_circumradius(f) > options.circumradius_threshold {
        return true;
    }

    let angle_thresh = options.angle_threshold_degrees.to_radians();
    let mesh = tri.mesh();
    for he in mesh.face_halfedges(f) {
        if tri.corner_angle(he) >= angle_thresh {
            continue;
        }
        // A degree-one tip: nothing can make this angle bigger.
        if mesh.next(mesh.next(he)) == mesh.twin(he) {
            continue;
        }
        // Both edges of the corner fixed: the wedge angle is an input
        // feature, not a defect.
        if tri.is_fixed(mesh.edge_of(he)) && tri.is_fixed(mesh.edge_of(mesh.prev(he))) {
            continue;
        }
        return true;
    }
    false
}

/// Max-heap entry for the refinement queue.
#[derive(Debug, Clone, Copy)]
struct RefineEntry<I: MeshIndex> {
    weight: f64,
    face: FaceId<I>,
}

impl<I: MeshIndex> PartialEq for RefineEntry<I> {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
    }
}

impl<I: MeshIndex> Eq for RefineEntry<I> {}

impl<I: MeshIndex> PartialOrd for RefineEntry<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<I: MeshIndex> Ord for RefineEntry<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .partial_cmp(&other.weight)
            .unwrap_or(Ordering::Equal)
    }
}

/// Queues and counters for one refinement run. The triangulation's event log
/// feeds this context after every mutation, replacing the reentrant
/// callbacks a driver would otherwise need.
struct RefineContext<I: MeshIndex> {
    delaunay_q: VecDeque<EdgeId<I>>,
    in_delaunay_q: Vec<bool>,
    refine_q: BinaryHeap<RefineEntry<I>>,
    splits: Vec<(crate::mesh::HalfEdgeId<I>, crate::mesh::HalfEdgeId<I>)>,
    n_flips: usize,
}

impl<I: MeshIndex> RefineContext<I> {
    fn new() -> Self {
        Self {
            delaunay_q: VecDeque::new(),
            in_delaunay_q: Vec::new(),
            refine_q: BinaryHeap::new(),
            splits: Vec::new(),
            n_flips: 0,
        }
    }

    fn enqueue_edge(&mut self, e: EdgeId<I>) {
        if self.in_delaunay_q.len() <= e.index() {
            self.in_delaunay_q.resize(e.index() + 1, false);
        }
        if !self.in_delaunay_q[e.index()] {
            self.delaunay_q.push_back(e);
            self.in_delaunay_q[e.index()] = true;
        }
    }

    /// Sorting weight: boundary-adjacent faces first (infinite weight), then
    /// by descending area.
    fn area_weight<T: IntrinsicTriangulation<I>>(tri: &T, f: FaceId<I>) -> f64 {
        if tri.mesh().face_edges(f).any(|e| tri.is_fixed(e)) {
            return f64::INFINITY;
        }
        tri.face_area(f)
    }

    fn maybe_queue_face<T: IntrinsicTriangulation<I>>(
        &mut self,
        tri: &T,
        f: FaceId<I>,
        options: &RefineOptions,
    ) {
        if !tri.mesh().is_dead_face(f) && should_refine_face(tri, f, options) {
            self.refine_q.push(RefineEntry {
                weight: Self::area_weight(tri, f),
                face: f,
            });
        }
    }

    /// Drain the triangulation's event log into the queues. Edge splits are
    /// recorded for the caller to post-process (nearby-vertex deletion).
    fn absorb_events<T: IntrinsicTriangulation<I>>(
        &mut self,
        tri: &mut T,
        options: &RefineOptions,
    ) {
        for event in tri.take_events() {
            match event {
                MutationEvent::EdgeFlip { edge } => {
                    self.n_flips += 1;
                    if tri.mesh().is_dead_edge(edge) {
                        continue;
                    }
                    let (he, ht) = tri.mesh().edge_halfedges(edge);
                    for f in [tri.mesh().face_of(he), tri.mesh().face_of(ht)] {
                        if f.is_valid() {
                            self.maybe_queue_face(tri, f, options);
                        }
                    }
                    let mesh = tri.mesh();
                    for ne in [
                        mesh.edge_of(mesh.next(he)),
                        mesh.edge_of(mesh.prev(he)),
                        mesh.edge_of(mesh.next(ht)),
                        mesh.edge_of(mesh.prev(ht)),
                    ] {
                        self.enqueue_edge(ne);
                    }
                }
                MutationEvent::EdgeSplit {
                    he_front, he_back, ..
                } => {
                    self.splits.push((he_front, he_back));
                }
                MutationEvent::FaceInsertion { .. } => {
                    // The caller enqueues the new vertex's 1-ring directly.
                }
            }
        }
    }

    /// After a split, delete previously inserted vertices inside the blown-up
    /// diametral ball of the new edge halves. Clearing them is what keeps
    /// midpoint insertions from colliding with earlier circumcenters.
    fn handle_pending_splits<T: IntrinsicTriangulation<I>>(
        &mut self,
        tri: &mut T,
        options: &RefineOptions,
    ) {
        while let Some((he_front, he_back)) = self.splits.pop() {
            let e_front = tri.mesh().edge_of(he_front);
            let e_back = tri.mesh().edge_of(he_back);
            if tri.mesh().is_dead_edge(e_front) || tri.mesh().is_dead_edge(e_back) {
                continue;
            }
            let ball_rad = tri.edge_length(e_front).max(tri.edge_length(e_back));
            let new_v = tri.mesh().origin(he_front);

            let nearby = vertex_dijkstra_distance_within_radius(
                tri.mesh(),
                tri.edge_lengths(),
                new_v,
                options.ball_radius_factor * ball_rad,
            );

            for (&u, _) in nearby.iter() {
                if u == new_v
                    || tri.mesh().is_dead_vertex(u)
                    || tri.is_on_fixed_edge(u)
                    || tri.vertex_locations()[u.index()].is_vertex()
                {
                    continue;
                }
                if let Some(f_replace) = tri.remove_inserted_vertex(u) {
                    // Removal flips internally; fold those in first.
                    self.absorb_events(tri, options);
                    if !tri.mesh().is_dead_face(f_replace) {
                        for e in tri.mesh().face_edges(f_replace).collect::<Vec<_>>() {
                            self.enqueue_edge(e);
                        }
                        self.maybe_queue_face(tri, f_replace, options);
                    }
                }
            }
        }
    }

    /// Flush the Delaunay queue.
    fn flip_all<T: IntrinsicTriangulation<I>>(&mut self, tri: &mut T, options: &RefineOptions) {
        while let Some(e) = self.delaunay_q.pop_front() {
            if e.index() < self.in_delaunay_q.len() {
                self.in_delaunay_q[e.index()] = false;
            }
            if tri.mesh().is_dead_edge(e) {
                continue;
            }
            tri.flip_edge_if_not_delaunay(e);
            self.absorb_events(tri, options);
        }
    }
}

/// Refine until every face passes the angle and circumradius targets.
///
/// Chew-style second algorithm on the intrinsic metric: repeatedly flip to
/// Delaunay, then insert the circumcenter of the worst face; circumcenters
/// blocked by a fixed edge become midpoint splits of that edge, and inserted
/// vertices crowding a fresh split get removed again.
pub fn delaunay_refine<I, T>(tri: &mut T, options: &RefineOptions) -> RefineStats
where
    I: MeshIndex,
    T: IntrinsicTriangulation<I>,
{
    delaunay_refine_with_progress(tri, options, |_| {})
}

/// [`delaunay_refine`], invoking `on_progress` with a running statistics
/// snapshot after every insertion. Refinement is open-ended (there is no
/// meaningful total), so the snapshot's growing counters are the signal.
///
/// ```no_run
/// # use signpost::prelude::*;
/// # let mesh: HalfEdgeMesh = build_from_triangles(&[[0, 1, 2]], 3).unwrap();
/// # let mut tri = SignpostTriangulation::new(mesh, vec![1.0; 3]).unwrap();
/// let options = RefineOptions::default().with_angle_threshold_degrees(25.0);
/// delaunay_refine_with_progress(&mut tri, &options, |stats| {
///     eprintln!("{} inserted, {} flips", stats.n_insertions, stats.n_flips);
/// });
/// ```
pub fn delaunay_refine_with_progress<I, T, F>(
    tri: &mut T,
    options: &RefineOptions,
    mut on_progress: F,
) -> RefineStats
where
    I: MeshIndex,
    T: IntrinsicTriangulation<I>,
    F: FnMut(&RefineStats),
{
    let mut ctx = RefineContext::new();
    let mut n_insertions = 0usize;
    let mut recheck_count = 0usize;

    // Stale events from before the call would double-count flips.
    tri.take_events();

    for e in tri.mesh().edge_ids().collect::<Vec<_>>() {
        ctx.enqueue_edge(e);
    }
    for f in tri.mesh().face_ids().collect::<Vec<_>>() {
        ctx.maybe_queue_face(tri, f, options);
    }

    loop {
        // First, flip everything to Delaunay.
        ctx.flip_all(tri, options);

        // Second, insert one circumcenter.
        if n_insertions >= options.max_insertions {
            break;
        }

        if let Some(entry) = ctx.refine_q.pop() {
            let f = entry.face;
            if tri.mesh().is_dead_face(f) {
                continue;
            }
            // Stale if the weight changed since queueing (the face was
            // re-queued with its current weight at that point), or if flips
            // already repaired it.
            if entry.weight != RefineContext::area_weight(tri, f)
                || !should_refine_face(tri, f, options)
            {
                continue;
            }

            let n_before = tri.mesh().num_vertices();
            let new_v = tri.insert_circumcenter(f);
            if tri.mesh().num_vertices() == n_before {
                // The circumcenter snapped onto an existing vertex; nothing
                // was inserted and requeueing would spin.
                tri.take_events();
                continue;
            }
            n_insertions += 1;
            on_progress(&RefineStats {
                n_flips: ctx.n_flips,
                n_insertions,
            });

            // Splits recorded by the insertion trigger the nearby-vertex
            // cleanup; everything else lands in the queues.
            ctx.absorb_events(tri, options);
            ctx.handle_pending_splits(tri, options);

            // The 1-ring of the new vertex may violate either criterion.
            if !tri.mesh().is_dead_vertex(new_v) {
                let ring_faces: Vec<FaceId<I>> = tri.mesh().vertex_faces(new_v).collect();
                for f in ring_faces {
                    ctx.maybe_queue_face(tri, f, options);
                    for e in tri.mesh().face_edges(f).collect::<Vec<_>>() {
                        ctx.enqueue_edge(e);
                    }
                }
            }
            continue;
        }

        // Queues drained: rescan for anything numerics let slip through.
        if recheck_count < MAX_RECHECK_COUNT {
            recheck_count += 1;
            let mut any_found = false;
            for f in tri.mesh().face_ids().collect::<Vec<_>>() {
                if should_refine_face(tri, f, options) {
                    ctx.refine_q.push(RefineEntry {
                        weight: RefineContext::area_weight(tri, f),
                        face: f,
                    });
                    any_found = true;
                }
            }
            for e in tri.mesh().edge_ids().collect::<Vec<_>>() {
                if !tri.is_delaunay(e) {
                    ctx.enqueue_edge(e);
                    any_found = true;
                }
            }
            if !any_found {
                break;
            }
        } else {
            break;
        }
    }

    tri.take_events();
    RefineStats {
        n_flips: ctx.n_flips,
        n_insertions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsic::SignpostTriangulation;
    use crate::mesh::build_from_triangles;
    use nalgebra::Point3;

    fn tetrahedron() -> SignpostTriangulation<u32> {
        let mesh =
            build_from_triangles(&[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]], 4).unwrap();
        let lengths = vec![1.0; mesh.edge_capacity()];
        SignpostTriangulation::new(mesh, lengths).unwrap()
    }

    fn unit_square() -> SignpostTriangulation<u32> {
        let mesh = build_from_triangles(&[[0, 1, 2], [0, 2, 3]], 4).unwrap();
        let positions = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        SignpostTriangulation::from_positions(mesh, &positions).unwrap()
    }

    /// Flat 2x1 strip of four triangles with the middle top vertex pulled
    /// down to make one needle triangle with improvable corners.
    fn strip_with_needle() -> SignpostTriangulation<u32> {
        let faces = [[0, 1, 3], [1, 4, 3], [1, 2, 4], [2, 5, 4]];
        let mesh = build_from_triangles(&faces, 6).unwrap();
        let positions = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.05, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        ];
        SignpostTriangulation::from_positions(mesh, &positions).unwrap()
    }

    #[test]
    fn test_tetrahedron_already_delaunay() {
        let mut tri = tetrahedron();
        let stats = flip_to_delaunay(&mut tri);
        assert_eq!(stats.n_flips, 0);
        assert!(tri.is_delaunay_all());
        assert!((tri.min_angle_degrees() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_square_diagonal_needs_no_flip() {
        let mut tri = unit_square();
        let stats = flip_to_delaunay(&mut tri);
        assert_eq!(stats.n_flips, 0);
    }

    #[test]
    fn test_flip_to_delaunay_fixes_skew_quad() {
        let mesh = build_from_triangles::<u32>(&[[0, 1, 2], [1, 0, 3]], 4).unwrap();
        let positions = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 0.2, 0.0),
            Point3::new(0.5, -0.2, 0.0),
        ];
        let mut tri = SignpostTriangulation::from_positions(mesh, &positions).unwrap();
        assert!(!tri.is_delaunay_all());

        let stats = flip_to_delaunay(&mut tri);
        assert_eq!(stats.n_flips, 1);
        assert!(tri.is_delaunay_all());

        // Idempotent: a second pass performs no flips.
        let again = flip_to_delaunay(&mut tri);
        assert_eq!(again.n_flips, 0);
    }

    #[test]
    fn test_refine_by_circumradius() {
        let mut tri = unit_square();
        let options = RefineOptions::default()
            .with_angle_threshold_degrees(0.0)
            .with_circumradius_threshold(0.3)
            .with_max_insertions(500);

        let stats = delaunay_refine(&mut tri, &options);

        assert!(stats.n_insertions > 0);
        assert!(stats.n_insertions <= 500);
        assert!(tri.is_delaunay_all());
        for f in tri.mesh().face_ids() {
            assert!(
                tri.face_circumradius(f) <= 0.3 + 1e-6,
                "face {:?} has circumradius {}",
                f,
                tri.face_circumradius(f)
            );
        }
    }

    #[test]
    fn test_refine_needle_to_min_angle() {
        let mut tri = strip_with_needle();
        assert!(tri.min_angle_degrees() < 5.0);

        let options = RefineOptions::default()
            .with_angle_threshold_degrees(25.0)
            .with_max_insertions(1000);
        let stats = delaunay_refine(&mut tri, &options);

        assert!(stats.n_insertions < 1000, "refinement did not converge");
        assert!(tri.is_delaunay_all());

        // Every remaining small corner is unimprovable by construction.
        let thresh = 25.0_f64.to_radians();
        for f in tri.mesh().face_ids() {
            for he in tri.mesh().face_halfedges(f) {
                let angle = tri.corner_angle(he);
                if angle < thresh - 1e-9 {
                    let mesh = tri.mesh();
                    let tip = mesh.next(mesh.next(he)) == mesh.twin(he);
                    let locked = tri.is_fixed(mesh.edge_of(he))
                        && tri.is_fixed(mesh.edge_of(mesh.prev(he)));
                    assert!(
                        tip || locked,
                        "improvable corner below threshold: {} degrees",
                        angle.to_degrees()
                    );
                }
            }
        }
    }

    #[test]
    fn test_refine_progress_snapshots() {
        let mut tri = unit_square();
        let options = RefineOptions::default()
            .with_angle_threshold_degrees(0.0)
            .with_circumradius_threshold(0.3)
            .with_max_insertions(500);

        let mut insertions_seen = Vec::new();
        let stats = delaunay_refine_with_progress(&mut tri, &options, |snapshot| {
            insertions_seen.push(snapshot.n_insertions);
        });

        // One snapshot per insertion, counting up.
        assert_eq!(insertions_seen.len(), stats.n_insertions);
        assert_eq!(
            insertions_seen,
            (1..=stats.n_insertions).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_refine_respects_max_insertions() {
        let mut tri = unit_square();
        let options = RefineOptions::default()
            .with_angle_threshold_degrees(0.0)
            .with_circumradius_threshold(0.05)
            .with_max_insertions(3);

        let stats = delaunay_refine(&mut tri, &options);
        assert_eq!(stats.n_insertions, 3);
    }

    #[test]
    fn test_refine_noop_on_good_mesh() {
        let mut tri = tetrahedron();
        let options = RefineOptions::default().with_angle_threshold_degrees(25.0);
        let stats = delaunay_refine(&mut tri, &options);
        assert_eq!(stats.n_insertions, 0);
        assert_eq!(stats.n_flips, 0);
        assert_eq!(tri.mesh().num_vertices(), 4);
    }
}
