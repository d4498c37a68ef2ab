//! Quadric error mesh decimation (Garland & Heckbert edge collapse).

use crate::mesh::{Mesh, normal};

use log::debug;
use nalgebra::{Matrix3, Vector3};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecimationError {
    #[error("Cannot decimate an empty mesh")]
    EmptyMesh,

    #[error("Target face count must be positive")]
    ZeroTarget,

    #[error("Face {face} references vertex {vertex}, but the mesh has {count} vertices")]
    InvalidFace {
        face: usize,
        vertex: usize,
        count: usize,
    },
}

/// Symmetric 4x4 error quadric stored as its upper triangle.
#[derive(Clone, Copy, Debug, Default)]
struct Quadric([f64; 10]);

impl Quadric {
    /// Quadric of the plane `ax + by + cz + d = 0`, scaled by `weight`.
    fn from_plane(a: f64, b: f64, c: f64, d: f64, weight: f64) -> Self {
        Self([
            a * a * weight,
            a * b * weight,
            a * c * weight,
            a * d * weight,
            b * b * weight,
            b * c * weight,
            b * d * weight,
            c * c * weight,
            c * d * weight,
            d * d * weight,
        ])
    }

    fn add(&mut self, other: &Quadric) {
        for (value, extra) in self.0.iter_mut().zip(other.0) {
            *value += extra;
        }
    }

    fn sum(&self, other: &Quadric) -> Quadric {
        let mut total = *self;
        total.add(other);
        total
    }

    fn error(&self, p: [f64; 3]) -> f64 {
        let q = &self.0;
        let [x, y, z] = p;
        q[0] * x * x
            + 2.0 * q[1] * x * y
            + 2.0 * q[2] * x * z
            + 2.0 * q[3] * x
            + q[4] * y * y
            + 2.0 * q[5] * y * z
            + 2.0 * q[6] * y
            + q[7] * z * z
            + 2.0 * q[8] * z
            + q[9]
    }

    /// Point minimising the error, when the quadric is well conditioned.
    fn optimum(&self) -> Option<[f64; 3]> {
        let q = &self.0;
        let a = Matrix3::new(q[0], q[1], q[2], q[1], q[4], q[5], q[2], q[5], q[7]);
        if a.determinant().abs() < 1e-12 {
            return None;
        }
        let v = a.try_inverse()? * Vector3::new(-q[3], -q[6], -q[8]);
        v.iter().all(|c| c.is_finite()).then(|| [v.x, v.y, v.z])
    }
}

/// Heap entry; lower cost pops first, ties broken by vertex ids.
#[derive(Clone, Copy, Debug)]
struct Collapse {
    cost: f64,
    keep: usize,
    remove: usize,
    keep_version: u32,
    remove_version: u32,
    position: [f64; 3],
}

impl PartialEq for Collapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collapse {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.keep.cmp(&self.keep))
            .then_with(|| other.remove.cmp(&self.remove))
    }
}

struct Decimator {
    positions: Vec<[f64; 3]>,
    quadrics: Vec<Quadric>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    vertex_alive: Vec<bool>,
    versions: Vec<u32>,
    alive_faces: usize,
}

impl Decimator {
    fn new(mesh: &Mesh) -> Self {
        let count = mesh.vertices.len();
        let mut quadrics = vec![Quadric::default(); count];
        let mut vertex_faces = vec![Vec::new(); count];

        for (index, face) in mesh.faces.iter().enumerate() {
            let [p0, p1, p2] = face.map(|v| mesh.vertices[v]);
            let n = normal(p0, p1, p2);
            let length = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            if length > 0.0 {
                let (a, b, c) = (n[0] / length, n[1] / length, n[2] / length);
                let d = -(a * p0[0] + b * p0[1] + c * p0[2]);
                let plane = Quadric::from_plane(a, b, c, d, 0.5 * length);
                for &v in face {
                    quadrics[v].add(&plane);
                }
            }
            for &v in face {
                vertex_faces[v].push(index);
            }
        }

        Self {
            positions: mesh.vertices.clone(),
            quadrics,
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.faces.len()],
            vertex_faces,
            vertex_alive: vec![true; count],
            versions: vec![0; count],
            alive_faces: mesh.faces.len(),
        }
    }

    fn neighbours(&self, vertex: usize) -> HashSet<usize> {
        self.vertex_faces[vertex]
            .iter()
            .filter(|&&f| self.face_alive[f])
            .flat_map(|&f| self.faces[f])
            .filter(|&v| v != vertex)
            .collect()
    }

    fn candidate(&self, a: usize, b: usize) -> Collapse {
        let (keep, remove) = if a < b { (a, b) } else { (b, a) };
        let quadric = self.quadrics[keep].sum(&self.quadrics[remove]);
        let (pa, pb) = (self.positions[keep], self.positions[remove]);
        let midpoint = [
            (pa[0] + pb[0]) / 2.0,
            (pa[1] + pb[1]) / 2.0,
            (pa[2] + pb[2]) / 2.0,
        ];

        let position = quadric.optimum().unwrap_or_else(|| {
            [pa, pb, midpoint]
                .into_iter()
                .min_by(|x, y| quadric.error(*x).total_cmp(&quadric.error(*y)))
                .unwrap_or(midpoint)
        });

        Collapse {
            cost: quadric.error(position).max(0.0),
            keep,
            remove,
            keep_version: self.versions[keep],
            remove_version: self.versions[remove],
            position,
        }
    }

    fn is_current(&self, collapse: &Collapse) -> bool {
        self.vertex_alive[collapse.keep]
            && self.vertex_alive[collapse.remove]
            && self.versions[collapse.keep] == collapse.keep_version
            && self.versions[collapse.remove] == collapse.remove_version
    }

    /// Link condition: the two vertices may only share the vertices opposite
    /// their common edge, otherwise the collapse pinches the surface.
    fn keeps_manifold(&self, keep: usize, remove: usize) -> bool {
        let shared_faces = self.vertex_faces[keep]
            .iter()
            .filter(|&&f| self.face_alive[f] && self.faces[f].contains(&remove))
            .count();
        if shared_faces == 0 {
            return false;
        }
        let common = self
            .neighbours(keep)
            .intersection(&self.neighbours(remove))
            .count();
        common <= shared_faces
    }

    /// Reject collapses that would flip or flatten a surviving face.
    fn keeps_orientation(&self, keep: usize, remove: usize, position: [f64; 3]) -> bool {
        for &vertex in &[keep, remove] {
            for &f in &self.vertex_faces[vertex] {
                let face = self.faces[f];
                if !self.face_alive[f] || (face.contains(&keep) && face.contains(&remove)) {
                    continue;
                }
                let before = face.map(|v| self.positions[v]);
                let after = face.map(|v| {
                    if v == vertex { position } else { self.positions[v] }
                });
                let n0 = normal(before[0], before[1], before[2]);
                let n1 = normal(after[0], after[1], after[2]);
                let dot = n0[0] * n1[0] + n0[1] * n1[1] + n0[2] * n1[2];
                if dot <= 0.0 {
                    return false;
                }
            }
        }
        true
    }

    fn collapse(&mut self, collapse: &Collapse) {
        let Collapse {
            keep,
            remove,
            position,
            ..
        } = *collapse;

        self.positions[keep] = position;
        let removed_quadric = self.quadrics[remove];
        self.quadrics[keep].add(&removed_quadric);
        self.vertex_alive[remove] = false;

        let moved = std::mem::take(&mut self.vertex_faces[remove]);
        for f in moved {
            if !self.face_alive[f] {
                continue;
            }
            if self.faces[f].contains(&keep) {
                self.face_alive[f] = false;
                self.alive_faces -= 1;
            } else {
                for v in &mut self.faces[f] {
                    if *v == remove {
                        *v = keep;
                    }
                }
                self.vertex_faces[keep].push(f);
            }
        }

        let alive = &self.face_alive;
        self.vertex_faces[keep].retain(|&f| alive[f]);
        self.versions[keep] += 1;
        self.versions[remove] += 1;
    }

    fn into_mesh(self) -> Mesh {
        let mut remap = vec![usize::MAX; self.positions.len()];
        let mut vertices = Vec::new();
        let mut faces = Vec::with_capacity(self.alive_faces);

        for (face, _) in self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, alive)| **alive)
        {
            let mut mapped = [0usize; 3];
            for (slot, &v) in mapped.iter_mut().zip(face) {
                if remap[v] == usize::MAX {
                    remap[v] = vertices.len();
                    vertices.push(self.positions[v]);
                }
                *slot = remap[v];
            }
            faces.push(mapped);
        }

        Mesh::new(vertices, faces)
    }
}

/// Collapse edges in order of increasing quadric error until at most
/// `target_faces` faces remain or no valid collapse is left.
///
/// The result never has more faces than the input.
pub fn decimate(mesh: &Mesh, target_faces: usize) -> Result<Mesh, DecimationError> {
    if mesh.faces.is_empty() {
        return Err(DecimationError::EmptyMesh);
    }
    if target_faces == 0 {
        return Err(DecimationError::ZeroTarget);
    }
    for (face, indices) in mesh.faces.iter().enumerate() {
        if let Some(&vertex) = indices.iter().find(|&&v| v >= mesh.vertices.len()) {
            return Err(DecimationError::InvalidFace {
                face,
                vertex,
                count: mesh.vertices.len(),
            });
        }
    }
    if mesh.faces.len() <= target_faces {
        return Ok(mesh.clone());
    }

    let mut decimator = Decimator::new(mesh);
    let mut heap = BinaryHeap::new();
    let mut seen = HashSet::new();
    for face in &mesh.faces {
        for (a, b) in [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])] {
            if a != b && seen.insert((a.min(b), a.max(b))) {
                heap.push(decimator.candidate(a, b));
            }
        }
    }

    while decimator.alive_faces > target_faces {
        let Some(collapse) = heap.pop() else {
            break;
        };
        if !decimator.is_current(&collapse)
            || !decimator.keeps_manifold(collapse.keep, collapse.remove)
            || !decimator.keeps_orientation(collapse.keep, collapse.remove, collapse.position)
        {
            continue;
        }

        decimator.collapse(&collapse);
        for neighbour in decimator.neighbours(collapse.keep) {
            heap.push(decimator.candidate(collapse.keep, neighbour));
        }
    }

    let decimated = decimator.into_mesh();
    debug!(
        "Decimated mesh from {} to {} faces (target {target_faces})",
        mesh.face_count(),
        decimated.face_count()
    );
    Ok(decimated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marching_cubes::marching_cubes;
    use ndarray::Array3;

    fn sphere_mesh(dim: usize, radius: f64) -> Mesh {
        let c = (dim as f64 - 1.0) / 2.0;
        let field = Array3::from_shape_fn((dim, dim, dim), |(i, j, k)| {
            let d2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2);
            if d2 <= radius * radius { 1.0 } else { 0.0 }
        });
        marching_cubes(field.view(), 0.5, (1.0, 1.0, 1.0)).unwrap()
    }

    #[test]
    fn halves_a_closed_surface() {
        let mesh = sphere_mesh(20, 7.0);
        let target = mesh.face_count() / 2;
        let decimated = decimate(&mesh, target).unwrap();

        assert!(decimated.face_count() <= target);
        assert!(decimated.face_count() > 0);
        assert!(decimated.vertex_count() < mesh.vertex_count());
        assert_eq!(decimated.boundary_edge_count(), 0);
    }

    #[test]
    fn never_increases_face_count() {
        let mesh = sphere_mesh(12, 4.0);
        for factor in [0.9, 0.5, 0.1] {
            let target = ((mesh.face_count() as f64) * factor) as usize;
            let decimated = decimate(&mesh, target.max(1)).unwrap();
            assert!(decimated.face_count() <= mesh.face_count());
        }
    }

    #[test]
    fn shape_stays_within_original_extent() {
        let mesh = sphere_mesh(20, 7.0);
        let decimated = decimate(&mesh, mesh.face_count() / 2).unwrap();
        let (lo, hi) = mesh.bounds().unwrap();
        let (dlo, dhi) = decimated.bounds().unwrap();
        for axis in 0..3 {
            assert!(dlo[axis] >= lo[axis] - 1.0);
            assert!(dhi[axis] <= hi[axis] + 1.0);
        }
    }

    #[test]
    fn target_above_face_count_returns_copy() {
        let mesh = sphere_mesh(8, 2.0);
        let decimated = decimate(&mesh, mesh.face_count() + 10).unwrap();
        assert_eq!(decimated, mesh);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(matches!(
            decimate(&Mesh::default(), 10),
            Err(DecimationError::EmptyMesh)
        ));
        let broken = Mesh::new(vec![[0.0; 3]; 2], vec![[0, 1, 2]]);
        assert!(matches!(
            decimate(&broken, 1),
            Err(DecimationError::InvalidFace { vertex: 2, .. })
        ));
        let mesh = sphere_mesh(8, 2.0);
        assert!(matches!(decimate(&mesh, 0), Err(DecimationError::ZeroTarget)));
    }
}
