//! Triangle-soup oracle: segment intersection against the world surfaces.

use nalgebra::Vector3;

use crate::bounding_box::BoundingBox;

/// One oriented surface triangle, tagged with the solid it bounds.
/// The outward normal follows the counter-clockwise vertex winding.
#[derive(Debug, Clone)]
pub struct Triangle {
    pub vertices: [Vector3<f64>; 3],
    pub normal: Vector3<f64>,
    pub solid_id: u32,
}

impl Triangle {
    pub fn new(vertices: [Vector3<f64>; 3], solid_id: u32) -> Triangle {
        let normal = (vertices[1] - vertices[0])
            .cross(&(vertices[2] - vertices[0]))
            .normalize();
        Triangle {
            vertices,
            normal,
            solid_id,
        }
    }
}

/// Intersection of a line segment with one triangle.
#[derive(Debug, Clone, Copy)]
pub struct SegmentHit {
    /// Fractional position along the segment, in [0, 1].
    pub s: f64,
    pub normal: Vector3<f64>,
    pub solid_id: u32,
}

/// All surface triangles of the simulated world.
///
/// Deliberately a plain triangle soup with a linear intersection scan;
/// segments handed in by the integrator are at most one sample distance
/// long, so candidate counts stay small.
#[derive(Debug, Default)]
pub struct TriangleMesh {
    triangles: Vec<Triangle>,
    bbox: Option<BoundingBox>,
}

impl TriangleMesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn add_triangle(&mut self, tri: Triangle) {
        match &mut self.bbox {
            Some(bb) => {
                for v in &tri.vertices {
                    bb.include(v);
                }
            }
            None => self.bbox = BoundingBox::from_points(tri.vertices.iter()),
        }
        self.triangles.push(tri);
    }

    /// Add the twelve triangles of an axis-aligned box with outward normals.
    pub fn add_box(&mut self, lower: Vector3<f64>, upper: Vector3<f64>, solid_id: u32) {
        let (l, u) = (lower, upper);
        let corner = |mask: u8| {
            Vector3::new(
                if mask & 1 != 0 { u.x } else { l.x },
                if mask & 2 != 0 { u.y } else { l.y },
                if mask & 4 != 0 { u.z } else { l.z },
            )
        };
        // two CCW-wound triangles per face, viewed from outside
        const FACES: [[u8; 4]; 6] = [
            [0, 4, 6, 2], // x = lo
            [1, 3, 7, 5], // x = hi
            [0, 1, 5, 4], // y = lo
            [2, 6, 7, 3], // y = hi
            [0, 2, 3, 1], // z = lo
            [4, 5, 7, 6], // z = hi
        ];
        for face in FACES {
            let q: Vec<Vector3<f64>> = face.iter().map(|&m| corner(m)).collect();
            self.add_triangle(Triangle::new([q[0], q[1], q[2]], solid_id));
            self.add_triangle(Triangle::new([q[0], q[2], q[3]], solid_id));
        }
    }

    /// Intersections of the segment p1 -> p2 with all triangles,
    /// in no particular order.
    pub fn segment_hits(&self, p1: Vector3<f64>, p2: Vector3<f64>) -> Vec<SegmentHit> {
        let dir = p2 - p1;
        let mut hits = Vec::new();
        for tri in &self.triangles {
            if let Some(s) = segment_triangle_intersection(&p1, &dir, tri) {
                hits.push(SegmentHit {
                    s,
                    normal: tri.normal,
                    solid_id: tri.solid_id,
                });
            }
        }
        hits
    }
}

/// Moeller-Trumbore, parameterised over the segment: returns s in [0, 1]
/// or None if the segment misses the triangle (or lies in its plane).
fn segment_triangle_intersection(
    origin: &Vector3<f64>,
    dir: &Vector3<f64>,
    tri: &Triangle,
) -> Option<f64> {
    const EPS: f64 = 1e-14;
    let edge1 = tri.vertices[1] - tri.vertices[0];
    let edge2 = tri.vertices[2] - tri.vertices[0];
    let pvec = dir.cross(&edge2);
    let det = edge1.dot(&pvec);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - tri.vertices[0];
    let u = tvec.dot(&pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(&edge1);
    let v = dir.dot(&qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let s = edge2.dot(&qvec) * inv_det;
    if (0.0..=1.0).contains(&s) {
        Some(s)
    } else {
        None
    }
}
