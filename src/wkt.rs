//! Well-known-text encoders for region geometry.
//!
//! Coordinates are always written as `x y z` with six decimal places.

use crate::mesh::Mesh;
use crate::statistics::{BoundingBox, Point3D};

use std::fmt::Write;

fn push_coordinate(out: &mut String, [x, y, z]: [f64; 3]) {
    // Writing into a String cannot fail.
    let _ = write!(out, "{x:.6} {y:.6} {z:.6}");
}

/// `((p0, p1, ..., p0))`: a closed ring wrapped as a polygon.
fn push_ring(out: &mut String, points: &[[f64; 3]]) {
    out.push_str("((");
    for (index, &point) in points.iter().chain(points.first()).enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        push_coordinate(out, point);
    }
    out.push_str("))");
}

fn polyhedral_surface<'a>(rings: impl IntoIterator<Item = &'a [[f64; 3]]>) -> String {
    let mut out = String::from("POLYHEDRALSURFACE Z (");
    let mut first = true;
    for ring in rings {
        if ring.is_empty() {
            continue;
        }
        if !first {
            out.push_str(", ");
        }
        push_ring(&mut out, ring);
        first = false;
    }
    out.push(')');
    out
}

pub fn point_z(point: &Point3D) -> String {
    let mut out = String::from("POINT Z(");
    push_coordinate(&mut out, point.to_array());
    out.push(')');
    out
}

/// The six faces of an axis-aligned box, each a closed 5-point ring.
///
/// Always six rings, even when the box is flat or a single point.
pub fn bounding_box_surface((min, max): &BoundingBox) -> String {
    let corner = |x: f64, y: f64, z: f64| [x, y, z];
    let faces: [[[f64; 3]; 4]; 6] = [
        // z = min, z = max
        [
            corner(min.x, min.y, min.z),
            corner(max.x, min.y, min.z),
            corner(max.x, max.y, min.z),
            corner(min.x, max.y, min.z),
        ],
        [
            corner(min.x, min.y, max.z),
            corner(max.x, min.y, max.z),
            corner(max.x, max.y, max.z),
            corner(min.x, max.y, max.z),
        ],
        // y = min, y = max
        [
            corner(min.x, min.y, min.z),
            corner(max.x, min.y, min.z),
            corner(max.x, min.y, max.z),
            corner(min.x, min.y, max.z),
        ],
        [
            corner(min.x, max.y, min.z),
            corner(max.x, max.y, min.z),
            corner(max.x, max.y, max.z),
            corner(min.x, max.y, max.z),
        ],
        // x = min, x = max
        [
            corner(min.x, min.y, min.z),
            corner(min.x, max.y, min.z),
            corner(min.x, max.y, max.z),
            corner(min.x, min.y, max.z),
        ],
        [
            corner(max.x, min.y, min.z),
            corner(max.x, max.y, min.z),
            corner(max.x, max.y, max.z),
            corner(max.x, min.y, max.z),
        ],
    ];
    polyhedral_surface(faces.iter().map(|face| face.as_slice()))
}

/// One ring per mesh face, vertices in face order.
pub fn mesh_to_polyhedral_surface(mesh: &Mesh) -> String {
    let rings: Vec<Vec<[f64; 3]>> = mesh
        .faces
        .iter()
        .map(|face| face.iter().map(|&index| mesh.vertices[index]).collect())
        .collect();
    polyhedral_surface(rings.iter().map(Vec::as_slice))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_count(wkt: &str) -> usize {
        wkt.matches("((").count()
    }

    #[test]
    fn single_triangle_formatting() {
        let mesh = Mesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        );
        assert_eq!(
            mesh_to_polyhedral_surface(&mesh),
            "POLYHEDRALSURFACE Z (((0.000000 0.000000 0.000000, 1.000000 0.000000 0.000000, \
             0.000000 1.000000 0.000000, 0.000000 0.000000 0.000000)))"
        );
    }

    #[test]
    fn faces_are_comma_joined() {
        let mesh = Mesh::new(
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec![[0, 1, 2], [0, 1, 3]],
        );
        let wkt = mesh_to_polyhedral_surface(&mesh);
        assert_eq!(ring_count(&wkt), 2);
        assert!(wkt.contains(")), (("));
    }

    #[test]
    fn point_has_six_decimals() {
        assert_eq!(
            point_z(&Point3D::new(1.0, 1.5, -2.25)),
            "POINT Z(1.000000 1.500000 -2.250000)"
        );
    }

    #[test]
    fn box_always_has_six_closed_rings() {
        for (lo, hi) in [
            (Point3D::new(1.0, 1.0, 1.0), Point3D::new(1.0, 2.0, 2.0)),
            (Point3D::new(3.0, 3.0, 3.0), Point3D::new(3.0, 3.0, 3.0)),
            (Point3D::new(-10.0, 0.0, 5.0), Point3D::new(10.0, 20.0, 50.0)),
        ] {
            let wkt = bounding_box_surface(&(lo, hi));
            assert!(wkt.starts_with("POLYHEDRALSURFACE Z ("));
            assert_eq!(ring_count(&wkt), 6);

            let body = &wkt["POLYHEDRALSURFACE Z (".len()..wkt.len() - 1];
            for ring in body.split("), (") {
                let ring = ring.trim_matches(|c| c == '(' || c == ')');
                let points: Vec<&str> = ring.split(", ").collect();
                assert_eq!(points.len(), 5);
                assert_eq!(points[0], points[4]);
            }
        }
    }

    #[test]
    fn empty_mesh_gives_empty_surface() {
        assert_eq!(
            mesh_to_polyhedral_surface(&Mesh::default()),
            "POLYHEDRALSURFACE Z ()"
        );
    }
}
