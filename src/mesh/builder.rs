//! Mesh construction utilities.
//!
//! This module provides functions for building half-edge meshes from triangle
//! index lists as commonly found in mesh file formats. The mesh itself is
//! purely combinatorial; a helper is provided to derive per-edge lengths from
//! vertex positions for callers who have an embedding.

use std::collections::HashMap;

use nalgebra::Point3;

use super::halfedge::{Edge, Face, HalfEdge, HalfEdgeMesh};
use super::index::{EdgeId, FaceId, HalfEdgeId, MeshIndex, VertexId};
use crate::error::{Result, TriangulationError};

/// Build a half-edge mesh from triangle faces.
///
/// # Arguments
/// * `faces` - List of triangle faces, each as [v0, v1, v2] indices
/// * `num_vertices` - Total number of vertices referenced by the faces
///
/// # Returns
/// A half-edge mesh, or an error if the input is empty, references an invalid
/// vertex, contains a degenerate face, or is not edge-manifold.
///
/// # Example
/// ```
/// use signpost::mesh::{build_from_triangles, HalfEdgeMesh};
///
/// let mesh: HalfEdgeMesh = build_from_triangles(&[[0, 1, 2], [0, 2, 3]], 4).unwrap();
/// assert_eq!(mesh.num_vertices(), 4);
/// assert_eq!(mesh.num_edges(), 5);
/// assert_eq!(mesh.num_faces(), 2);
/// ```
pub fn build_from_triangles<I: MeshIndex>(
    faces: &[[usize; 3]],
    num_vertices: usize,
) -> Result<HalfEdgeMesh<I>> {
    if faces.is_empty() {
        return Err(TriangulationError::EmptyMesh);
    }

    // Validate vertex indices
    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= num_vertices {
                return Err(TriangulationError::InvalidVertexIndex { face: fi, vertex: vi });
            }
        }
        // Check for degenerate faces
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(TriangulationError::DegenerateFace { face: fi });
        }
    }

    let mut mesh = HalfEdgeMesh::<I>::new();
    mesh.vertices.resize_with(num_vertices, Default::default);
    mesh.n_vertices = num_vertices;

    // Map from directed edge (v0, v1) to half-edge ID
    let mut edge_map: HashMap<(usize, usize), HalfEdgeId<I>> = HashMap::new();

    // First pass: create all half-edges and faces
    for face in faces {
        let v0 = face[0];
        let v1 = face[1];
        let v2 = face[2];

        let he0 = HalfEdgeId::<I>::new(mesh.halfedges.len());
        let he1 = HalfEdgeId::<I>::new(mesh.halfedges.len() + 1);
        let he2 = HalfEdgeId::<I>::new(mesh.halfedges.len() + 2);

        for _ in 0..3 {
            mesh.halfedges.push(HalfEdge::new());
        }

        let face_id = FaceId::<I>::new(mesh.faces.len());
        mesh.faces.push(Face::new(he0));

        // Set up half-edge connectivity within the face
        let triple = [(he0, v0, he1, he2), (he1, v1, he2, he0), (he2, v2, he0, he1)];
        for (he, v, next, prev) in triple {
            let h = mesh.halfedge_mut(he);
            h.origin = VertexId::new(v);
            h.next = next;
            h.prev = prev;
            h.face = face_id;
        }

        // Set vertex half-edges (will be overwritten for shared vertices)
        mesh.vertex_mut(VertexId::new(v0)).halfedge = he0;
        mesh.vertex_mut(VertexId::new(v1)).halfedge = he1;
        mesh.vertex_mut(VertexId::new(v2)).halfedge = he2;

        // Record edges for twin linking; a duplicated directed edge means two
        // identically-oriented faces share it, which is non-manifold.
        for (a, b, he) in [(v0, v1, he0), (v1, v2, he1), (v2, v0, he2)] {
            if edge_map.insert((a, b), he).is_some() {
                return Err(TriangulationError::NonManifoldEdge { v0: a, v1: b });
            }
        }
    }

    mesh.n_halfedges = mesh.halfedges.len();
    mesh.n_faces = mesh.faces.len();

    // Second pass: link twins and create edge records
    let mut sorted_pairs: Vec<(&(usize, usize), &HalfEdgeId<I>)> = edge_map.iter().collect();
    sorted_pairs.sort_by_key(|(_, he)| he.index());
    for (&(v0, v1), &he) in sorted_pairs {
        if mesh.twin(he).is_valid() {
            continue; // already linked from the other side
        }
        let edge_id = EdgeId::<I>::new(mesh.edges.len());
        mesh.edges.push(Edge::new(he));
        if let Some(&twin) = edge_map.get(&(v1, v0)) {
            mesh.halfedge_mut(he).twin = twin;
            mesh.halfedge_mut(he).edge = edge_id;
            mesh.halfedge_mut(twin).twin = he;
            mesh.halfedge_mut(twin).edge = edge_id;
        } else {
            // Boundary edge - create boundary half-edge
            let boundary_he = HalfEdgeId::<I>::new(mesh.halfedges.len());
            mesh.halfedges.push(HalfEdge::new());
            mesh.n_halfedges += 1;

            mesh.halfedge_mut(he).twin = boundary_he;
            mesh.halfedge_mut(he).edge = edge_id;
            let bhe = mesh.halfedge_mut(boundary_he);
            bhe.origin = VertexId::new(v1);
            bhe.twin = he;
            bhe.edge = edge_id;
            // Face stays invalid (boundary)
        }
    }
    mesh.n_edges = mesh.edges.len();

    // Third pass: link boundary half-edges into loops
    link_boundary_loops(&mut mesh);

    // Fourth pass: ensure boundary vertices point to boundary half-edges
    fix_boundary_vertex_halfedges(&mut mesh);

    Ok(mesh)
}

/// Link boundary half-edges into proper loops.
fn link_boundary_loops<I: MeshIndex>(mesh: &mut HalfEdgeMesh<I>) {
    let boundary_hes: Vec<HalfEdgeId<I>> = mesh
        .halfedge_ids()
        .filter(|&he| mesh.is_boundary_halfedge(he))
        .collect();

    // Group by origin vertex for quick lookup
    let mut outgoing: HashMap<usize, HalfEdgeId<I>> = HashMap::new();
    for he in &boundary_hes {
        let origin = mesh.origin(*he).index();
        outgoing.insert(origin, *he);
    }

    // Link next/prev for boundary half-edges
    for &he in &boundary_hes {
        // The next boundary half-edge starts where this one ends
        let dest = mesh.dest(he).index();
        if let Some(&next_he) = outgoing.get(&dest) {
            mesh.halfedge_mut(he).next = next_he;
            mesh.halfedge_mut(next_he).prev = he;
        }
    }
}

/// Ensure boundary vertices point to a boundary half-edge.
fn fix_boundary_vertex_halfedges<I: MeshIndex>(mesh: &mut HalfEdgeMesh<I>) {
    for vid in mesh.vertex_ids().collect::<Vec<_>>() {
        let start_he = mesh.vertex(vid).halfedge;
        if !start_he.is_valid() {
            continue;
        }

        // Walk around the vertex to find a boundary half-edge.
        // Uses the same iteration pattern as VertexHalfEdgeIter: twin -> next.
        let mut he = start_he;
        loop {
            if mesh.is_boundary_halfedge(he) {
                mesh.vertex_mut(vid).halfedge = he;
                break;
            }
            he = mesh.next(mesh.twin(he));
            if he == start_he {
                break;
            }
        }
    }
}

/// Derive a per-edge length table from vertex positions.
///
/// The result is indexed by raw [`EdgeId`] value and sized to
/// `mesh.edge_capacity()`, ready to hand to an intrinsic triangulation.
///
/// # Errors
/// Returns [`TriangulationError::InvalidEdgeLength`] if any edge has
/// coincident endpoints or non-finite coordinates.
pub fn edge_lengths_from_positions<I: MeshIndex>(
    mesh: &HalfEdgeMesh<I>,
    positions: &[Point3<f64>],
) -> Result<Vec<f64>> {
    let mut lengths = vec![0.0; mesh.edge_capacity()];
    for e in mesh.edge_ids() {
        let (v0, v1) = mesh.edge_vertices(e);
        let len = (positions[v1.index()] - positions[v0.index()]).norm();
        if !(len.is_finite() && len > 0.0) {
            return Err(TriangulationError::InvalidEdgeLength {
                edge: e.index(),
                length: len,
            });
        }
        lengths[e.index()] = len;
    }
    Ok(lengths)
}
