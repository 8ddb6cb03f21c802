//! Dijkstra distances on the intrinsic edge graph.
//!
//! Computes shortest path distances along mesh edges using Dijkstra's
//! algorithm, pruned to a radius. This gives exact distances on the edge
//! graph, which approximates true geodesic distances on the surface; the
//! refinement driver uses it to find recently inserted vertices inside the
//! diametral ball of a split edge.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::mesh::{HalfEdgeMesh, MeshIndex, VertexId};

/// Entry in Dijkstra's priority queue.
#[derive(Debug, Clone)]
struct DijkstraEntry {
    /// The vertex index.
    vertex: usize,
    /// Distance from source.
    distance: f64,
}

impl DijkstraEntry {
    fn new(vertex: usize, distance: f64) -> Self {
        Self { vertex, distance }
    }
}

// Implement ordering for min-heap (BinaryHeap is a max-heap by default)
impl PartialEq for DijkstraEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for DijkstraEntry {}

impl PartialOrd for DijkstraEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DijkstraEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Compute edge-graph distances from `source` to every vertex within
/// `radius`, inclusive.
///
/// `edge_lengths` is indexed by raw [`EdgeId`](crate::mesh::EdgeId) value and
/// must cover `mesh.edge_capacity()` entries. The returned map contains the
/// source itself at distance zero.
pub fn vertex_dijkstra_distance_within_radius<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    edge_lengths: &[f64],
    source: VertexId<I>,
    radius: f64,
) -> HashMap<VertexId<I>, f64> {
    let mut found: HashMap<VertexId<I>, f64> = HashMap::new();
    if mesh.num_vertices() == 0 || mesh.is_dead_vertex(source) {
        return found;
    }

    let mut distances = vec![f64::INFINITY; mesh.vertex_capacity()];
    let mut heap = BinaryHeap::new();

    distances[source.index()] = 0.0;
    heap.push(DijkstraEntry::new(source.index(), 0.0));

    while let Some(entry) = heap.pop() {
        let u = entry.vertex;
        let dist_u = entry.distance;

        // Skip if this is a stale entry (we found a shorter path already)
        if dist_u > distances[u] {
            continue;
        }

        found.insert(VertexId::new(u), dist_u);

        // Relax all neighbors
        let u_vertex: VertexId<I> = VertexId::new(u);
        for he in mesh.vertex_halfedges(u_vertex) {
            let v = mesh.dest(he).index();
            let edge_len = edge_lengths[mesh.edge_of(he).index()];
            let new_dist = dist_u + edge_len;

            if new_dist <= radius && new_dist < distances[v] {
                distances[v] = new_dist;
                heap.push(DijkstraEntry::new(v, new_dist));
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;

    /// Flat n x n grid of unit squares, each cut into two triangles.
    fn grid_mesh(n: usize) -> (HalfEdgeMesh<u32>, Vec<f64>) {
        let mut faces = Vec::new();
        for j in 0..n {
            for i in 0..n {
                let v00 = j * (n + 1) + i;
                let v10 = v00 + 1;
                let v01 = v00 + (n + 1);
                let v11 = v01 + 1;
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            }
        }
        let mesh = build_from_triangles(&faces, (n + 1) * (n + 1)).unwrap();

        let mut lengths = vec![0.0; mesh.edge_capacity()];
        for e in mesh.edge_ids() {
            let (a, b) = mesh.edge_vertices(e);
            let (ai, aj) = (a.index() % (n + 1), a.index() / (n + 1));
            let (bi, bj) = (b.index() % (n + 1), b.index() / (n + 1));
            let (dx, dy) = (ai as f64 - bi as f64, aj as f64 - bj as f64);
            lengths[e.index()] = (dx * dx + dy * dy).sqrt();
        }
        (mesh, lengths)
    }

    #[test]
    fn test_source_at_distance_zero() {
        let (mesh, lengths) = grid_mesh(2);
        let found =
            vertex_dijkstra_distance_within_radius(&mesh, &lengths, VertexId::new(0), 1.0);
        assert_eq!(found[&VertexId::new(0)], 0.0);
    }

    #[test]
    fn test_radius_prunes() {
        let (mesh, lengths) = grid_mesh(3);
        let found =
            vertex_dijkstra_distance_within_radius(&mesh, &lengths, VertexId::new(0), 1.0);

        // Within radius 1: the source, its two axis neighbors at distance 1.
        assert!(found.contains_key(&VertexId::new(1)));
        assert!(found.contains_key(&VertexId::new(4)));
        // The far corner (3,3) is well outside.
        assert!(!found.contains_key(&VertexId::new(15)));
        for &d in found.values() {
            assert!(d <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn test_distances_are_shortest_paths() {
        let (mesh, lengths) = grid_mesh(2);
        let found = vertex_dijkstra_distance_within_radius(
            &mesh,
            &lengths,
            VertexId::new(0),
            10.0,
        );

        // All 9 vertices reachable.
        assert_eq!(found.len(), 9);
        // Vertex 2 at (2,0): two unit steps.
        assert!((found[&VertexId::new(2)] - 2.0).abs() < 1e-12);
        // Vertex 8 at (2,2): two diagonal steps.
        assert!((found[&VertexId::new(8)] - 2.0 * 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_triangle_inequality_along_edges() {
        let (mesh, lengths) = grid_mesh(3);
        let found = vertex_dijkstra_distance_within_radius(
            &mesh,
            &lengths,
            VertexId::new(5),
            100.0,
        );

        for (&v, &d_v) in &found {
            for he in mesh.vertex_halfedges(v) {
                let u = mesh.dest(he);
                let edge_len = lengths[mesh.edge_of(he).index()];
                let d_u = found[&u];
                assert!(
                    (d_v - d_u).abs() <= edge_len + 1e-10,
                    "Triangle inequality violated: |{} - {}| > {}",
                    d_v,
                    d_u,
                    edge_len
                );
            }
        }
    }
}
