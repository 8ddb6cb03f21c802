//! Geometric primitives on edge lengths, and surface-point locations.
//!
//! Everything here is a pure function of intrinsic data: triangles are known
//! only by their three side lengths, never by an embedding. These primitives
//! back the Delaunay predicates, the local layouts performed by mutations,
//! and the geodesic tracer.

use nalgebra::{Point2, Vector2, Vector3};

use crate::mesh::{EdgeId, FaceId, MeshIndex, VertexId};

/// A point on a triangle mesh, tagged by the dimension of the element
/// carrying it.
///
/// A `SurfacePoint` on the intrinsic triangulation and a `SurfacePoint` on
/// the input mesh are the same type; which mesh a point lives on is
/// determined by context (for example, vertex locations of an intrinsic
/// triangulation are always points on the input mesh).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfacePoint<I: MeshIndex = u32> {
    /// Exactly at a mesh vertex.
    Vertex(VertexId<I>),

    /// On an edge, at parameter `t` in [0, 1] measured from the tail of the
    /// edge's canonical half-edge.
    Edge {
        /// The edge carrying the point.
        edge: EdgeId<I>,
        /// Position along the canonical half-edge direction.
        t: f64,
    },

    /// Inside a face, in barycentric coordinates ordered to match the face's
    /// canonical half-edge cycle.
    Face {
        /// The face carrying the point.
        face: FaceId<I>,
        /// Barycentric coordinates, non-negative and summing to one.
        bary: Vector3<f64>,
    },
}

impl<I: MeshIndex> SurfacePoint<I> {
    /// Is this a vertex-type point?
    #[inline]
    pub fn is_vertex(&self) -> bool {
        matches!(self, SurfacePoint::Vertex(_))
    }

    /// Is this an edge-type point?
    #[inline]
    pub fn is_edge(&self) -> bool {
        matches!(self, SurfacePoint::Edge { .. })
    }

    /// Is this a face-type point?
    #[inline]
    pub fn is_face(&self) -> bool {
        matches!(self, SurfacePoint::Face { .. })
    }

    /// The vertex handle, if this is a vertex point.
    #[inline]
    pub fn as_vertex(&self) -> Option<VertexId<I>> {
        match self {
            SurfacePoint::Vertex(v) => Some(*v),
            _ => None,
        }
    }
}

/// Interior angle between the sides of lengths `l_a` and `l_b`, where the
/// side opposite the angle has length `l_opp`. Law of cosines, with the
/// cosine clamped so that near-degenerate triangles produce an angle instead
/// of NaN.
#[inline]
pub fn corner_angle_from_lengths(l_a: f64, l_b: f64, l_opp: f64) -> f64 {
    let q = (l_a * l_a + l_b * l_b - l_opp * l_opp) / (2.0 * l_a * l_b);
    q.clamp(-1.0, 1.0).acos()
}

/// Triangle area from side lengths.
///
/// Uses the numerically stable form of Heron's formula (Kahan), which keeps
/// its accuracy on needle triangles where the classical formula loses all
/// significant digits.
pub fn triangle_area_from_lengths(a: f64, b: f64, c: f64) -> f64 {
    // Sort so that a >= b >= c.
    let mut s = [a, b, c];
    s.sort_by(|x, y| y.partial_cmp(x).unwrap_or(std::cmp::Ordering::Equal));
    let [a, b, c] = s;

    let arg = (a + (b + c)) * (c - (a - b)) * (c + (a - b)) * (a + (b - c));
    0.25 * arg.max(0.0).sqrt()
}

/// Circumradius of a triangle from its side lengths: `abc / (4 A)`.
///
/// Returns infinity for degenerate (zero-area) triangles.
pub fn circumradius_from_lengths(a: f64, b: f64, c: f64) -> f64 {
    let area = triangle_area_from_lengths(a, b, c);
    if area <= 0.0 {
        return f64::INFINITY;
    }
    (a * b * c) / (4.0 * area)
}

/// Position of the third vertex `C` of a triangle laid out in the plane,
/// given the positions of `A` and `B` and the lengths of the remaining two
/// sides. `C` is placed on the counter-clockwise side of the segment `A -> B`.
pub fn layout_triangle_vertex(
    p_a: Point2<f64>,
    p_b: Point2<f64>,
    l_bc: f64,
    l_ca: f64,
) -> Point2<f64> {
    let ab = p_b - p_a;
    let l_ab = ab.norm();
    let dir = ab / l_ab;
    let perp = Vector2::new(-dir.y, dir.x);

    // Distance along and off the AB axis.
    let x = (l_ca * l_ca + l_ab * l_ab - l_bc * l_bc) / (2.0 * l_ab);
    let y2 = l_ca * l_ca - x * x;
    let y = y2.max(0.0).sqrt();

    p_a + dir * x + perp * y
}

/// Rescale a barycentric triple to sum to one. Negative components are
/// preserved: points outside a triangle (a circumcenter of an obtuse face,
/// say) have a meaningful barycentric description with negative entries.
#[inline]
pub fn normalize_barycentric(b: Vector3<f64>) -> Vector3<f64> {
    b / (b.x + b.y + b.z)
}

/// Clamp a barycentric triple onto the closed triangle and renormalize.
#[inline]
pub fn clamp_barycentric(b: Vector3<f64>) -> Vector3<f64> {
    normalize_barycentric(Vector3::new(b.x.max(0.0), b.y.max(0.0), b.z.max(0.0)))
}

/// Strict triangle inequality with a relative slack margin: every side must
/// be shorter than the sum of the other two by more than `slack` times the
/// longest side.
#[inline]
pub fn satisfies_triangle_inequality(a: f64, b: f64, c: f64, slack: f64) -> bool {
    let margin = slack * a.max(b).max(c);
    a + b > c + margin && b + c > a + margin && c + a > b + margin
}

/// Barycentric coordinates of a 2-D point with respect to a laid-out
/// triangle.
pub fn barycentric_in_layout(
    p: Point2<f64>,
    p0: Point2<f64>,
    p1: Point2<f64>,
    p2: Point2<f64>,
) -> Vector3<f64> {
    let v0 = p1 - p0;
    let v1 = p2 - p0;
    let v2 = p - p0;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Vector3::new(1.0 - v - w, v, w)
}
