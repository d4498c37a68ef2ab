//! Marching cubes isosurface extraction.
//!
//! The per-case triangulation is derived from the cube faces instead of a
//! hand-typed lookup table: on every face the iso-contour segments are found
//! from the four corner states, chained into closed loops around the cube,
//! and each loop is fanned into triangles. Ambiguous faces always separate the
//! two inside corners, so neighbouring cubes agree on the shared face and the
//! surface has no cracks. Triangles are wound so their normals point from the
//! inside (values above the level) to the outside.

use crate::mesh::{Mesh, normal};

use ndarray::ArrayView3;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarchingCubesError {
    #[error("Volume {0:?} is too small for marching cubes, need at least 2 samples per axis")]
    GridTooSmall((usize, usize, usize)),

    #[error("Surface level {level} must be within the volume data range [{min}, {max}]")]
    LevelOutOfRange { level: f64, min: f64, max: f64 },

    #[error("No surface found at level {0}")]
    NoSurface(f64),

    #[error("Degenerate triangle produced in cube ({0}, {1}, {2})")]
    DegenerateTriangle(usize, usize, usize),
}

/// Corner offsets, Bourke numbering.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Corner pairs for the 12 cube edges.
const EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Faces as corner cycles, counter-clockwise seen from outside the cube.
const FACES: [[usize; 4]; 6] = [
    [0, 3, 2, 1],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [3, 7, 6, 2],
    [0, 4, 7, 3],
    [1, 2, 6, 5],
];

/// Edge crossed by side `s` of each face, i.e. between `FACES[f][s]` and `FACES[f][s + 1]`.
const FACE_EDGES: [[usize; 4]; 6] = [
    [3, 2, 1, 0],
    [4, 5, 6, 7],
    [0, 9, 4, 8],
    [11, 6, 10, 2],
    [8, 7, 11, 3],
    [1, 10, 5, 9],
];

/// Triangles (as cube edge indices) for each of the 256 inside/outside cases.
static CASES: LazyLock<Vec<Vec<[usize; 3]>>> =
    LazyLock::new(|| (0..256).map(triangulate_case).collect());

/// Triangulate one corner configuration; bit `c` set means corner `c` is inside.
fn triangulate_case(case: usize) -> Vec<[usize; 3]> {
    let inside = |corner: usize| case & (1 << corner) != 0;

    // Directed contour segments: entry point -> exit point on each face.
    let mut next: [Option<usize>; 12] = [None; 12];
    for (face, edges) in FACES.iter().zip(FACE_EDGES.iter()) {
        let mut crossings: Vec<(usize, bool)> = Vec::with_capacity(4);
        for side in 0..4 {
            let (a, b) = (face[side], face[(side + 1) % 4]);
            if inside(a) != inside(b) {
                crossings.push((edges[side], inside(b)));
            }
        }
        // Crossings alternate entry/exit; pairing each entry with the exit
        // that follows it isolates the inside corners on ambiguous faces.
        let count = crossings.len();
        for (index, &(edge, is_entry)) in crossings.iter().enumerate() {
            if is_entry {
                next[edge] = Some(crossings[(index + 1) % count].0);
            }
        }
    }

    let mut triangles = Vec::new();
    let mut visited = [false; 12];
    for start in 0..12 {
        if visited[start] || next[start].is_none() {
            continue;
        }

        let mut contour = Vec::with_capacity(12);
        let mut edge = start;
        while !visited[edge] {
            visited[edge] = true;
            contour.push(edge);
            match next[edge] {
                Some(following) => edge = following,
                None => break,
            }
        }

        for i in 1..contour.len().saturating_sub(1) {
            triangles.push([contour[0], contour[i], contour[i + 1]]);
        }
    }

    triangles
}

/// Grid edge key: start sample plus the axis the edge runs along.
type EdgeKey = (usize, usize, usize, usize);

fn grid_edge(x: usize, y: usize, z: usize, edge: usize) -> EdgeKey {
    let [a, b] = EDGES[edge];
    let (pa, pb) = (CORNERS[a], CORNERS[b]);
    let axis = (0..3).find(|&axis| pa[axis] != pb[axis]).unwrap_or(0);
    let start = if pa[axis] < pb[axis] { pa } else { pb };
    (x + start[0], y + start[1], z + start[2], axis)
}

/// Extract the iso-surface of `field` at `level`.
///
/// Vertex coordinates are sample indices scaled by `spacing`, so the output is
/// in physical units before any affine is applied.
pub fn marching_cubes(
    field: ArrayView3<f64>,
    level: f64,
    spacing: (f64, f64, f64),
) -> Result<Mesh, MarchingCubesError> {
    let (nx, ny, nz) = field.dim();
    if nx < 2 || ny < 2 || nz < 2 {
        return Err(MarchingCubesError::GridTooSmall((nx, ny, nz)));
    }

    let min = field.iter().copied().fold(f64::INFINITY, f64::min);
    let max = field.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(min <= level && level <= max) {
        return Err(MarchingCubesError::LevelOutOfRange { level, min, max });
    }

    let spacing = [spacing.0, spacing.1, spacing.2];
    let min_area = f64::EPSILON * spacing.iter().fold(0.0f64, |acc, s| acc.max(s * s));
    let mut vertices: Vec<[f64; 3]> = Vec::new();
    let mut faces: Vec<[usize; 3]> = Vec::new();
    let mut vertex_ids: HashMap<EdgeKey, usize> = HashMap::new();

    for x in 0..nx - 1 {
        for y in 0..ny - 1 {
            for z in 0..nz - 1 {
                let mut case = 0usize;
                for (corner, offset) in CORNERS.iter().enumerate() {
                    if field[[x + offset[0], y + offset[1], z + offset[2]]] > level {
                        case |= 1 << corner;
                    }
                }
                if case == 0 || case == 255 {
                    continue;
                }

                for triangle in &CASES[case] {
                    let mut face = [0usize; 3];
                    for (slot, &edge) in face.iter_mut().zip(triangle) {
                        let key = grid_edge(x, y, z, edge);
                        *slot = *vertex_ids.entry(key).or_insert_with(|| {
                            vertices.push(edge_vertex(&field, key, level, spacing));
                            vertices.len() - 1
                        });
                    }

                    let n = normal(vertices[face[0]], vertices[face[1]], vertices[face[2]]);
                    let area = 0.5 * (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
                    if area <= min_area {
                        return Err(MarchingCubesError::DegenerateTriangle(x, y, z));
                    }
                    faces.push(face);
                }
            }
        }
    }

    if faces.is_empty() {
        return Err(MarchingCubesError::NoSurface(level));
    }

    Ok(Mesh::new(vertices, faces))
}

/// Linear interpolation of the level crossing along a grid edge.
fn edge_vertex(field: &ArrayView3<f64>, key: EdgeKey, level: f64, spacing: [f64; 3]) -> [f64; 3] {
    let (x, y, z, axis) = key;
    let mut end = [x, y, z];
    end[axis] += 1;

    let v0 = field[[x, y, z]];
    let v1 = field[[end[0], end[1], end[2]]];
    let t = if v1 == v0 { 0.5 } else { (level - v0) / (v1 - v0) };

    let mut position = [x as f64, y as f64, z as f64];
    position[axis] += t;
    [
        position[0] * spacing[0],
        position[1] * spacing[1],
        position[2] * spacing[2],
    ]
}
