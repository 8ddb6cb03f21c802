//! Geodesic tracing by triangle unfolding.
//!
//! A geodesic on a polyhedral surface is a straight line once the triangles
//! it crosses are unfolded into a common plane. The tracer walks a triangle
//! strip: it lays the start face out in 2-D, intersects the ray with the face
//! boundary, unfolds the neighboring triangle across the crossed edge into
//! the same plane, and repeats until the requested length is used up or a
//! barrier stops the walk.
//!
//! The tracer reads only connectivity and per-edge lengths, so the same
//! routine traces over an input surface and over an intrinsic triangulation
//! sitting on top of it.

use nalgebra::{Point2, Vector2, Vector3};

use crate::geometry::{
    barycentric_in_layout, clamp_barycentric, layout_triangle_vertex, SurfacePoint,
};
use crate::mesh::{FaceId, HalfEdgeId, HalfEdgeMesh, MeshIndex};

/// Relative tolerance for endpoint snapping and intersection bookkeeping.
const TRACE_EPS: f64 = 1e-9;

/// Options for [`trace_geodesic`].
#[derive(Debug, Clone, Default)]
pub struct TraceOptions<'a> {
    /// Edges the trace may not cross, indexed by raw edge id. Crossing one
    /// ends the trace at the crossing point. Boundary edges always stop the
    /// trace, whether or not they are marked here.
    pub barrier_edges: Option<&'a [bool]>,

    /// Cap on the number of face crossings, as an escape hatch against
    /// numerical drift. Zero means the default (10_000).
    pub max_iterations: usize,
}

/// Result of a geodesic trace.
#[derive(Debug, Clone)]
pub struct TraceResult<I: MeshIndex = u32> {
    /// Where the trace ended: a face point if the length ran out inside a
    /// face, an edge point if a barrier or boundary stopped it (or the
    /// endpoint snapped onto an edge), a vertex point if it snapped onto a
    /// vertex.
    pub end_point: SurfacePoint<I>,

    /// The start point followed by every edge crossing, in order. The end
    /// point is not included.
    pub path_points: Vec<SurfacePoint<I>>,

    /// True if the trace was stopped early by a barrier or boundary edge.
    pub hit_barrier: bool,

    /// Unused trace length (positive only when stopped early).
    pub length_remaining: f64,

    /// The face the trace was traversing when it ended. For an edge-point
    /// ending this is the face on the near side of the stopping edge.
    pub end_face: FaceId<I>,

    /// Unit direction of the ray at its end, expressed in the canonical
    /// layout frame of `end_face` (see [`face_layout`]).
    pub end_dir: Vector2<f64>,
}

/// Canonical 2-D layout of a triangular face: the tail of the face's
/// canonical half-edge at the origin, that half-edge along +x, the third
/// vertex in the upper half-plane. Returned positions are ordered to match
/// [`HalfEdgeMesh::face_halfedge_triple`].
pub fn face_layout<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    edge_lengths: &[f64],
    f: FaceId<I>,
) -> [Point2<f64>; 3] {
    let [he0, he1, he2] = mesh.face_halfedge_triple(f);
    let l0 = edge_lengths[mesh.edge_of(he0).index()];
    let l1 = edge_lengths[mesh.edge_of(he1).index()];
    let l2 = edge_lengths[mesh.edge_of(he2).index()];

    let p0 = Point2::new(0.0, 0.0);
    let p1 = Point2::new(l0, 0.0);
    let p2 = layout_triangle_vertex(p0, p1, l1, l2);
    [p0, p1, p2]
}

/// One face of the unfolding: each of the three half-edges paired with the
/// 2-D position of its tail in the shared plane.
struct UnfoldedFace<I: MeshIndex> {
    hes: [HalfEdgeId<I>; 3],
    pts: [Point2<f64>; 3],
}

impl<I: MeshIndex> UnfoldedFace<I> {
    fn initial(mesh: &HalfEdgeMesh<I>, edge_lengths: &[f64], f: FaceId<I>) -> Self {
        Self {
            hes: mesh.face_halfedge_triple(f),
            pts: face_layout(mesh, edge_lengths, f),
        }
    }

    /// Unfold the face across `crossed` (a half-edge of the previous face)
    /// into the same plane. `tail_pt`/`head_pt` are the plane positions of
    /// the crossed half-edge's endpoints.
    fn across(
        mesh: &HalfEdgeMesh<I>,
        edge_lengths: &[f64],
        crossed: HalfEdgeId<I>,
        tail_pt: Point2<f64>,
        head_pt: Point2<f64>,
    ) -> UnfoldedFace<I> {
        let entry = mesh.twin(crossed);
        let e_next = mesh.next(entry);
        let e_prev = mesh.prev(entry);

        // The entry half-edge runs head -> tail of the crossed one.
        let p_entry = head_pt;
        let p_next = tail_pt;
        let p_opp = layout_triangle_vertex(
            p_entry,
            p_next,
            edge_lengths[mesh.edge_of(e_next).index()],
            edge_lengths[mesh.edge_of(e_prev).index()],
        );

        UnfoldedFace {
            hes: [entry, e_next, e_prev],
            pts: [p_entry, p_next, p_opp],
        }
    }

    fn face(&self, mesh: &HalfEdgeMesh<I>) -> FaceId<I> {
        mesh.face_of(self.hes[0])
    }
}

/// Convert a 2-D point in an unfolded face to a snapped surface point.
fn snap_point_in_face<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    frame: &UnfoldedFace<I>,
    p: Point2<f64>,
    scale: f64,
) -> SurfacePoint<I> {
    let b = barycentric_in_layout(p, frame.pts[0], frame.pts[1], frame.pts[2]);
    let tol = TRACE_EPS * scale.max(1.0);

    let small = [b.x.abs() < tol, b.y.abs() < tol, b.z.abs() < tol];
    let n_small = small.iter().filter(|&&s| s).count();

    if n_small >= 2 {
        // At a vertex: the coordinate that is not small wins.
        let i = (0..3).find(|&i| !small[i]).unwrap_or(0);
        return SurfacePoint::Vertex(mesh.origin(frame.hes[i]));
    }
    if n_small == 1 {
        // On the edge opposite the small coordinate.
        let i = (0..3).find(|&i| small[i]).unwrap();
        let he = frame.hes[(i + 1) % 3];
        let b_tail = [b.x, b.y, b.z][(i + 1) % 3];
        let b_head = [b.x, b.y, b.z][(i + 2) % 3];
        let s = (b_head / (b_tail + b_head)).clamp(0.0, 1.0);
        return edge_point(mesh, he, s);
    }

    SurfacePoint::Face {
        face: frame.face(mesh),
        bary: clamp_barycentric(b),
    }
}

/// Edge point at parameter `s` along half-edge `he`, re-expressed against the
/// edge's canonical half-edge.
fn edge_point<I: MeshIndex>(mesh: &HalfEdgeMesh<I>, he: HalfEdgeId<I>, s: f64) -> SurfacePoint<I> {
    let e = mesh.edge_of(he);
    let t = if mesh.halfedge_of_edge(e) == he { s } else { 1.0 - s };
    SurfacePoint::Edge {
        edge: e,
        t: t.clamp(0.0, 1.0),
    }
}

#[inline]
fn cross2(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

#[inline]
fn rotate(v: Vector2<f64>, angle: f64) -> Vector2<f64> {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}

/// Re-express a direction from the shared unfolding plane in the canonical
/// layout frame of the unfolded face.
fn to_canonical_dir<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    edge_lengths: &[f64],
    frame: &UnfoldedFace<I>,
    d: Vector2<f64>,
) -> Vector2<f64> {
    let f = frame.face(mesh);
    let triple = mesh.face_halfedge_triple(f);
    let canonical = face_layout(mesh, edge_lengths, f);
    let k = triple
        .iter()
        .position(|&he| he == frame.hes[0])
        .expect("frame half-edge not in its face");

    let unfolded_vec = frame.pts[1] - frame.pts[0];
    let canonical_vec = canonical[(k + 1) % 3] - canonical[k];
    let angle = canonical_vec.y.atan2(canonical_vec.x) - unfolded_vec.y.atan2(unfolded_vec.x);
    rotate(d, angle)
}

/// Trace a geodesic across a triangulated surface.
///
/// The ray starts at barycentric position `start_bary` in `start_face` and
/// runs along `dir` (expressed in the face's canonical layout, see
/// [`face_layout`]) for distance `|dir|`.
pub fn trace_geodesic<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    edge_lengths: &[f64],
    start_face: FaceId<I>,
    start_bary: Vector3<f64>,
    dir: Vector2<f64>,
    options: &TraceOptions<'_>,
) -> TraceResult<I> {
    let total_len = dir.norm();
    let mut frame = UnfoldedFace::initial(mesh, edge_lengths, start_face);

    let start_pt_2d = Point2::from(
        frame.pts[0].coords * start_bary.x
            + frame.pts[1].coords * start_bary.y
            + frame.pts[2].coords * start_bary.z,
    );

    let mut path_points = vec![SurfacePoint::Face {
        face: start_face,
        bary: start_bary,
    }];

    if total_len <= 0.0 {
        let end_point = snap_point_in_face(mesh, &frame, start_pt_2d, 1.0);
        return TraceResult {
            end_point,
            path_points,
            hit_barrier: false,
            length_remaining: 0.0,
            end_face: start_face,
            end_dir: Vector2::x(),
        };
    }

    let d = dir / total_len;
    let scale = total_len;
    let max_iterations = if options.max_iterations == 0 {
        10_000
    } else {
        options.max_iterations
    };

    // Cumulative ray parameter; the ray is start + t * d for t in [0, total].
    let mut t_cur = 0.0;
    let mut entry_he: Option<HalfEdgeId<I>> = None;

    for _ in 0..max_iterations {
        // Find the first boundary crossing of the ray past t_cur.
        let mut best: Option<(usize, f64, f64)> = None; // (local he index, t, s)
        for i in 0..3 {
            if Some(frame.hes[i]) == entry_he {
                continue;
            }
            let a = frame.pts[i];
            let b = frame.pts[(i + 1) % 3];
            let seg = b - a;
            let denom = cross2(d, seg);
            if denom.abs() < 1e-14 * scale.max(1.0) {
                continue; // parallel
            }
            let t = cross2(a - start_pt_2d, seg) / denom;
            let s = cross2(a - start_pt_2d, d) / denom;
            if t <= t_cur + TRACE_EPS * scale {
                continue;
            }
            if !(-TRACE_EPS..=1.0 + TRACE_EPS).contains(&s) {
                continue;
            }
            if best.map_or(true, |(_, bt, _)| t < bt) {
                best = Some((i, t, s.clamp(0.0, 1.0)));
            }
        }

        let Some((i, t_hit, s_hit)) = best else {
            // Grazing along an edge or numerical trouble: finish in this face.
            let p_end = start_pt_2d + d * total_len;
            let end_point = snap_point_in_face(mesh, &frame, p_end, scale);
            let end_dir = to_canonical_dir(mesh, edge_lengths, &frame, d);
            return TraceResult {
                end_point,
                path_points,
                hit_barrier: false,
                length_remaining: 0.0,
                end_face: frame.face(mesh),
                end_dir,
            };
        };

        if t_hit >= total_len {
            // The length runs out inside this face.
            let p_end = start_pt_2d + d * total_len;
            let end_point = snap_point_in_face(mesh, &frame, p_end, scale);
            let end_dir = to_canonical_dir(mesh, edge_lengths, &frame, d);
            return TraceResult {
                end_point,
                path_points,
                hit_barrier: false,
                length_remaining: 0.0,
                end_face: frame.face(mesh),
                end_dir,
            };
        }

        let crossed = frame.hes[i];
        let crossing = edge_point(mesh, crossed, s_hit);
        let e = mesh.edge_of(crossed);

        let blocked = mesh.is_boundary_edge(e)
            || options
                .barrier_edges
                .map_or(false, |barrier| barrier[e.index()]);
        if blocked {
            let end_dir = to_canonical_dir(mesh, edge_lengths, &frame, d);
            return TraceResult {
                end_point: crossing,
                path_points,
                hit_barrier: true,
                length_remaining: total_len - t_hit,
                end_face: frame.face(mesh),
                end_dir,
            };
        }

        path_points.push(crossing);

        // Unfold the neighbor across the crossed edge and continue.
        let tail_pt = frame.pts[i];
        let head_pt = frame.pts[(i + 1) % 3];
        entry_he = Some(mesh.twin(crossed));
        frame = UnfoldedFace::across(mesh, edge_lengths, crossed, tail_pt, head_pt);
        t_cur = t_hit;
    }

    // Iteration cap: stop where we are, on the last recorded crossing.
    let end_point = *path_points.last().unwrap();
    let end_dir = to_canonical_dir(mesh, edge_lengths, &frame, d);
    TraceResult {
        end_point,
        path_points,
        hit_barrier: false,
        length_remaining: (total_len - t_cur).max(0.0),
        end_face: frame.face(mesh),
        end_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;
    use approx::assert_relative_eq;

    /// Unit square split along the diagonal 0-2, all in one plane:
    /// v0=(0,0), v1=(1,0), v2=(1,1), v3=(0,1).
    fn square() -> (HalfEdgeMesh<u32>, Vec<f64>) {
        let mesh = build_from_triangles(&[[0, 1, 2], [0, 2, 3]], 4).unwrap();
        let positions = [
            nalgebra::Point3::new(0.0, 0.0, 0.0),
            nalgebra::Point3::new(1.0, 0.0, 0.0),
            nalgebra::Point3::new(1.0, 1.0, 0.0),
            nalgebra::Point3::new(0.0, 1.0, 0.0),
        ];
        let lengths = crate::mesh::edge_lengths_from_positions(&mesh, &positions).unwrap();
        (mesh, lengths)
    }

    #[test]
    fn test_face_layout_matches_lengths() {
        let (mesh, lengths) = square();
        for f in mesh.face_ids() {
            let [p0, p1, p2] = face_layout(&mesh, &lengths, f);
            let [he0, he1, he2] = mesh.face_halfedge_triple(f);
            assert_relative_eq!(
                (p1 - p0).norm(),
                lengths[mesh.edge_of(he0).index()],
                epsilon = 1e-12
            );
            assert_relative_eq!(
                (p2 - p1).norm(),
                lengths[mesh.edge_of(he1).index()],
                epsilon = 1e-12
            );
            assert_relative_eq!(
                (p0 - p2).norm(),
                lengths[mesh.edge_of(he2).index()],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_trace_within_face() {
        let (mesh, lengths) = square();
        let f = mesh.face_ids().next().unwrap();
        let bary = Vector3::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);

        // A very short step stays a face point in the same face.
        let result = trace_geodesic(
            &mesh,
            &lengths,
            f,
            bary,
            Vector2::new(0.01, 0.0),
            &TraceOptions::default(),
        );
        match result.end_point {
            SurfacePoint::Face { face, .. } => assert_eq!(face, f),
            other => panic!("expected face point, got {:?}", other),
        }
        assert_eq!(result.path_points.len(), 1);
    }

    #[test]
    fn test_trace_crosses_diagonal() {
        let (mesh, lengths) = square();
        // Face 0 = (0,1,2); canonical layout puts v0 at origin, v1 at (1,0).
        let f = FaceId::new(0);
        let bary = Vector3::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);

        // Straight up from the centroid: leaves triangle (0,1,2) through the
        // diagonal 0-2 and lands in the second triangle.
        let result = trace_geodesic(
            &mesh,
            &lengths,
            f,
            bary,
            Vector2::new(-0.25, 0.35),
            &TraceOptions::default(),
        );
        assert!(!result.hit_barrier);
        assert_eq!(result.path_points.len(), 2, "one crossing expected");
        match result.path_points[1] {
            SurfacePoint::Edge { edge, .. } => {
                let (a, b) = mesh.edge_vertices(edge);
                let mut pair = [a.index(), b.index()];
                pair.sort_unstable();
                assert_eq!(pair, [0, 2]);
            }
            other => panic!("expected edge crossing, got {:?}", other),
        }
        match result.end_point {
            SurfacePoint::Face { face, .. } => assert_eq!(face, FaceId::new(1)),
            other => panic!("expected face point, got {:?}", other),
        }
    }

    #[test]
    fn test_trace_stops_at_boundary() {
        let (mesh, lengths) = square();
        let f = FaceId::new(0);
        let bary = Vector3::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);

        // Straight down: exits through the boundary edge 0-1.
        let result = trace_geodesic(
            &mesh,
            &lengths,
            f,
            bary,
            Vector2::new(0.0, -5.0),
            &TraceOptions::default(),
        );
        assert!(result.hit_barrier);
        assert!(result.length_remaining > 0.0);
        match result.end_point {
            SurfacePoint::Edge { edge, t } => {
                let (a, b) = mesh.edge_vertices(edge);
                let mut pair = [a.index(), b.index()];
                pair.sort_unstable();
                assert_eq!(pair, [0, 1]);
                assert!((0.0..=1.0).contains(&t));
            }
            other => panic!("expected edge point, got {:?}", other),
        }
    }

    #[test]
    fn test_trace_respects_barrier() {
        let (mesh, lengths) = square();
        let f = FaceId::new(0);
        let bary = Vector3::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);

        // Mark the interior diagonal as a barrier.
        let diag = mesh
            .edge_ids()
            .find(|&e| !mesh.is_boundary_edge(e))
            .unwrap();
        let mut barrier = vec![false; mesh.edge_capacity()];
        barrier[diag.index()] = true;

        let options = TraceOptions {
            barrier_edges: Some(&barrier),
            ..Default::default()
        };
        let result = trace_geodesic(&mesh, &lengths, f, bary, Vector2::new(-0.25, 0.35), &options);
        assert!(result.hit_barrier);
        match result.end_point {
            SurfacePoint::Edge { edge, .. } => assert_eq!(edge, diag),
            other => panic!("expected stop on barrier edge, got {:?}", other),
        }
    }

    #[test]
    fn test_trace_distance_preserved_across_flat_fold() {
        let (mesh, lengths) = square();
        let f = FaceId::new(0);

        // From the corner at v0 toward v2: length sqrt(2) ends at v2 exactly.
        let bary = Vector3::new(1.0, 0.0, 0.0);
        let dir = Vector2::new(2.0_f64.sqrt() / 2.0, 2.0_f64.sqrt() / 2.0) * 2.0_f64.sqrt();
        let result = trace_geodesic(&mesh, &lengths, f, bary, dir, &TraceOptions::default());
        match result.end_point {
            SurfacePoint::Vertex(v) => assert_eq!(v.index(), 2),
            SurfacePoint::Edge { edge, t } => {
                // Grazing along the diagonal is acceptable if it ends at its head.
                let (a, b) = mesh.edge_vertices(edge);
                let endpoint = if t > 0.5 { b } else { a };
                assert_eq!(endpoint.index(), 2);
            }
            other => panic!("expected to land on v2, got {:?}", other),
        }
    }
}
