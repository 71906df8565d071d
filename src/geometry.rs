//! Solids, materials and the geometry service: segment collision tests
//! and point-containment queries against the triangulated world.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mesh::{Triangle, TriangleMesh};

/// Id of the default solid filling the world outside all meshes.
pub const DEFAULT_SOLID_ID: u32 = 1;

/// Surface and bulk properties of a wall material.
///
/// The tracking core treats this as an opaque bundle handed to the hit
/// handler; only construction-time validation happens here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Real part of the Fermi pseudo-potential [neV].
    pub fermi_real: f64,
    /// Imaginary part of the Fermi pseudo-potential [neV].
    pub fermi_imag: f64,
    /// Probability of Lambertian diffuse reflection per bounce.
    pub diff_prob: f64,
    /// Probability of a spin flip per bounce.
    pub spin_flip_prob: f64,
    /// RMS surface roughness [m] for micro-roughness reflection.
    pub rms_roughness: f64,
    /// Roughness correlation length [m].
    pub correl_length: f64,
    /// Loss probability per bounce.
    pub loss_per_bounce: f64,
    /// Elastic scattering mean free path in the bulk [m].
    pub mfp_elastic: f64,
}

impl Material {
    /// Perfectly transparent material for the default solid.
    pub fn vacuum() -> Material {
        Material {
            name: "vacuum".into(),
            ..Material::default()
        }
    }

    /// Validate the parameter combination.
    pub fn validated(self) -> Result<Material> {
        if self.diff_prob != 0.0 && (self.rms_roughness != 0.0 || self.correl_length != 0.0) {
            return Err(Error::Geometry(format!(
                "material {}: both a Lambert reflection probability and \
                 micro-roughness parameters are set; pick one reflection model",
                self.name
            )));
        }
        Ok(self)
    }
}

/// One solid of the geometry. The id doubles as the overlap priority:
/// where solids overlap, the one with the highest id owns the bulk.
#[derive(Debug, Clone, PartialEq)]
pub struct Solid {
    pub id: u32,
    pub name: String,
    pub material: Material,
    /// Half-open time intervals [a, b) during which the solid is
    /// transparent, as if absent (moving shutters, gated chambers).
    pub ignore_times: Vec<(f64, f64)>,
}

impl Solid {
    pub fn new(id: u32, name: &str, material: Material) -> Solid {
        Solid {
            id,
            name: name.to_string(),
            material,
            ignore_times: Vec::new(),
        }
    }

    /// The vacuum-filled default solid present everywhere.
    pub fn default_solid() -> Solid {
        Solid::new(DEFAULT_SOLID_ID, "default solid", Material::vacuum())
    }

    pub fn is_ignored(&self, t: f64) -> bool {
        self.ignore_times.iter().any(|&(a, b)| t >= a && t < b)
    }
}

/// One candidate surface crossing on a tested segment.
#[derive(Debug, Clone, Copy)]
pub struct CollisionRecord {
    /// Fractional position along the segment, in [0, 1].
    pub s: f64,
    pub solid_id: u32,
    /// Outward unit normal of the crossed surface.
    pub normal: Vector3<f64>,
    /// The crossing time falls inside an ignore interval of the solid;
    /// the collision resolver records but does not react to it.
    pub ignored: bool,
}

/// The triangulated world plus the solid table.
pub struct Geometry {
    default_solid: Solid,
    solids: Vec<Solid>,
    mesh: TriangleMesh,
}

impl Geometry {
    pub fn new(default_solid: Solid) -> Geometry {
        Geometry {
            default_solid,
            solids: Vec::new(),
            mesh: TriangleMesh::default(),
        }
    }

    /// Register a solid together with its surface triangles.
    /// Solid ids have to be unique.
    pub fn add_solid(
        &mut self,
        solid: Solid,
        triangles: impl IntoIterator<Item = [Vector3<f64>; 3]>,
    ) -> Result<()> {
        if solid.id == self.default_solid.id
            || self.solids.iter().any(|s| s.id == solid.id)
        {
            return Err(Error::Geometry(format!(
                "duplicate solid id {} ('{}'); ids have to be unique",
                solid.id, solid.name
            )));
        }
        for vertices in triangles {
            self.mesh.add_triangle(Triangle::new(vertices, solid.id));
        }
        self.solids.push(solid);
        Ok(())
    }

    /// Register a solid shaped as an axis-aligned box.
    pub fn add_box_solid(
        &mut self,
        solid: Solid,
        lower: Vector3<f64>,
        upper: Vector3<f64>,
    ) -> Result<()> {
        let id = solid.id;
        self.add_solid(solid, [])?;
        self.mesh.add_box(lower, upper, id);
        Ok(())
    }

    pub fn default_solid(&self) -> &Solid {
        &self.default_solid
    }

    /// Look up a solid by id; the default solid is always known.
    pub fn solid(&self, id: u32) -> Option<&Solid> {
        if id == self.default_solid.id {
            return Some(&self.default_solid);
        }
        self.solids.iter().find(|s| s.id == id)
    }

    /// Whether a point lies within the world bounding box. A world with
    /// no surfaces is unbounded.
    pub fn in_bounds(&self, p: &Vector3<f64>) -> bool {
        match self.mesh.bounding_box() {
            Some(bb) => bb.contains(p),
            None => true,
        }
    }

    /// Ordered collision records for the segment p1 -> p2 traversed
    /// between times t1 and t2. Stable order: s ascending, ties broken
    /// by solid id ascending.
    pub fn collisions(
        &self,
        t1: f64,
        p1: Vector3<f64>,
        t2: f64,
        p2: Vector3<f64>,
    ) -> Vec<CollisionRecord> {
        let mut records: Vec<CollisionRecord> = self
            .mesh
            .segment_hits(p1, p2)
            .into_iter()
            .map(|hit| {
                let t_hit = t1 + (t2 - t1) * hit.s;
                let ignored = self
                    .solid(hit.solid_id)
                    .map(|s| s.is_ignored(t_hit))
                    .unwrap_or(false);
                CollisionRecord {
                    s: hit.s,
                    solid_id: hit.solid_id,
                    normal: hit.normal,
                    ignored,
                }
            })
            .collect();
        records.sort_by(|a, b| {
            a.s.total_cmp(&b.s).then(a.solid_id.cmp(&b.solid_id))
        });
        records
    }

    /// Ids of the solids containing the point at time t, ascending; the
    /// default solid is always included, ignored solids never are.
    ///
    /// Containment is decided by parity: a vertical ray from the point to
    /// below the world bounding box crosses the solid's surface an odd
    /// number of times iff the point is inside.
    pub fn solids_at(&self, t: f64, p: Vector3<f64>) -> Vec<u32> {
        let mut inside = vec![self.default_solid.id];
        if let Some(bb) = self.mesh.bounding_box() {
            let below = Vector3::new(p.x, p.y, bb.lower.z - 1e-3);
            let mut crossings: Vec<u32> =
                self.mesh.segment_hits(p, below).iter().map(|h| h.solid_id).collect();
            crossings.sort_unstable();
            for chunk in crossings.chunk_by(|a, b| a == b) {
                if chunk.len() % 2 == 1 {
                    let solid = self.solid(chunk[0]);
                    if solid.map(|s| !s.is_ignored(t)).unwrap_or(false) {
                        inside.push(chunk[0]);
                    }
                }
            }
        }
        inside.sort_unstable();
        inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_geometry() -> Geometry {
        let mut geom = Geometry::new(Solid::default_solid());
        geom.add_box_solid(
            Solid::new(2, "box", Material::vacuum()),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
        )
        .unwrap();
        geom
    }

    #[test]
    fn test_duplicate_solid_id_rejected() {
        let mut geom = unit_box_geometry();
        let err = geom.add_box_solid(
            Solid::new(2, "again", Material::vacuum()),
            Vector3::new(2.0, 2.0, 2.0),
            Vector3::new(3.0, 3.0, 3.0),
        );
        assert!(err.is_err());
        assert!(format!("{}", err.unwrap_err()).contains("unique"));
    }

    #[test]
    fn test_material_model_conflict_rejected() {
        let m = Material {
            name: "steel".into(),
            diff_prob: 0.1,
            rms_roughness: 1e-9,
            ..Material::default()
        };
        assert!(m.validated().is_err());
    }

    #[test]
    fn test_collisions_ordered_by_s() {
        let geom = unit_box_geometry();
        let records = geom.collisions(
            0.0,
            Vector3::new(-1.0, 0.3, 0.6),
            1.0,
            Vector3::new(2.0, 0.3, 0.6),
        );
        assert_eq!(records.len(), 2);
        assert!(records[0].s < records[1].s);
        assert!((records[0].s - 1.0 / 3.0).abs() < 1e-12);
        assert!((records[1].s - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ignore_interval_tags_records() {
        let mut geom = Geometry::new(Solid::default_solid());
        let mut solid = Solid::new(2, "shutter", Material::vacuum());
        solid.ignore_times.push((0.0, 10.0));
        geom.add_box_solid(solid, Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0))
            .unwrap();
        let records = geom.collisions(
            5.0,
            Vector3::new(-1.0, 0.3, 0.6),
            5.1,
            Vector3::new(0.5, 0.3, 0.6),
        );
        assert_eq!(records.len(), 1);
        assert!(records[0].ignored);
        // half-open interval: at t = 10 the solid is back
        let records = geom.collisions(
            10.0,
            Vector3::new(-1.0, 0.3, 0.6),
            10.1,
            Vector3::new(0.5, 0.3, 0.6),
        );
        assert!(!records[0].ignored);
    }

    #[test]
    fn test_containment_inside_and_outside() {
        let geom = unit_box_geometry();
        assert_eq!(geom.solids_at(0.0, Vector3::new(0.5, 0.3, 0.6)), vec![1, 2]);
        assert_eq!(geom.solids_at(0.0, Vector3::new(5.0, 5.0, 5.0)), vec![1]);
    }

    #[test]
    fn test_containment_skips_ignored_solid() {
        let mut geom = Geometry::new(Solid::default_solid());
        let mut solid = Solid::new(2, "shutter", Material::vacuum());
        solid.ignore_times.push((0.0, 10.0));
        geom.add_box_solid(solid, Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(geom.solids_at(5.0, Vector3::new(0.5, 0.3, 0.6)), vec![1]);
        assert_eq!(geom.solids_at(10.0, Vector3::new(0.5, 0.3, 0.6)), vec![1, 2]);
    }

    #[test]
    fn test_empty_world_is_unbounded() {
        let geom = Geometry::new(Solid::default_solid());
        assert!(geom.in_bounds(&Vector3::new(1e9, -1e9, 0.0)));
        assert_eq!(geom.solids_at(0.0, Vector3::new(0.0, 0.0, 0.0)), vec![1]);
    }

    #[test]
    fn test_nested_boxes_priority_set() {
        let mut geom = unit_box_geometry();
        geom.add_box_solid(
            Solid::new(5, "inner", Material::vacuum()),
            Vector3::new(0.25, 0.25, 0.25),
            Vector3::new(0.75, 0.75, 0.75),
        )
        .unwrap();
        // outside the inner box but inside the outer one
        let inside = geom.solids_at(0.0, Vector3::new(0.5, 0.1, 0.6));
        assert_eq!(inside, vec![1, 2]);
        let nested = geom.solids_at(0.0, Vector3::new(0.5, 0.45, 0.5));
        assert_eq!(nested, vec![1, 2, 5]);
    }
}
