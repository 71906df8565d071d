//! Built-in species constants and stock reaction behaviors.
//!
//! Real surface physics (Fermi-potential refraction, micro-roughness,
//! Lambert reflection) plugs in through [`ParticleBehavior`]; the stock
//! behaviors here cover transport studies and the test scenarios.

use std::sync::Arc;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::Rng;

use crate::constants::{
    ELEMENTARY_CHARGE, M_ELECTRON, M_NEUTRON, M_PROTON, MU_NEUTRON,
};
use crate::geometry::Solid;
use crate::particle::{
    HitResult, Particle, ParticleBehavior, Segment, SpeciesInfo, StepResult,
};

pub const NEUTRON: SpeciesInfo = SpeciesInfo {
    name: "neutron",
    charge: 0.0,
    mass: M_NEUTRON,
    moment: MU_NEUTRON,
};

pub const PROTON: SpeciesInfo = SpeciesInfo {
    name: "proton",
    charge: ELEMENTARY_CHARGE,
    mass: M_PROTON,
    moment: 0.0,
};

pub const ELECTRON: SpeciesInfo = SpeciesInfo {
    name: "electron",
    charge: -ELEMENTARY_CHARGE,
    mass: M_ELECTRON,
    moment: 0.0,
};

/// Endpoint of the proton recoil spectrum in free neutron decay [eV].
const PROTON_RECOIL_MAX_EV: f64 = 750.0;

/// Endpoint of the beta spectrum in free neutron decay [eV].
const BETA_ENDPOINT_EV: f64 = 782e3;

/// Passes through every boundary and never interacts.
pub struct Ballistic;

impl ParticleBehavior for Ballistic {
    fn on_hit(
        &self,
        _seg: &mut Segment,
        _normal: &Vector3<f64>,
        _leaving: &Solid,
        _entering: &Solid,
        _pol: &mut i8,
        _n_spinflip: &mut u32,
        _rng: &mut StdRng,
    ) -> HitResult {
        HitResult::Transmit { changed: false }
    }

    fn on_step(&self, _seg: &mut Segment, _current: &Solid, _rng: &mut StdRng) -> StepResult {
        StepResult::Unchanged
    }
}

/// Perfect mirror: reverses the normal velocity component at the wall.
/// Dices a spin flip with the entered material's per-bounce probability.
pub struct SpecularReflector;

impl ParticleBehavior for SpecularReflector {
    fn on_hit(
        &self,
        seg: &mut Segment,
        normal: &Vector3<f64>,
        _leaving: &Solid,
        entering: &Solid,
        pol: &mut i8,
        n_spinflip: &mut u32,
        rng: &mut StdRng,
    ) -> HitResult {
        // the segment start is within tolerance of the wall; bounce there
        let v1 = Vector3::new(seg.y1[3], seg.y1[4], seg.y1[5]);
        let v2 = v1 - 2.0 * v1.dot(normal) * *normal;
        seg.t2 = seg.t1;
        seg.y2 = seg.y1;
        seg.y2[3] = v2.x;
        seg.y2[4] = v2.y;
        seg.y2[5] = v2.z;

        let p = entering.material.spin_flip_prob;
        if *pol != 0 && p > 0.0 && rng.gen::<f64>() < p {
            *pol = -*pol;
            *n_spinflip += 1;
        }
        HitResult::Reflect
    }

    fn on_step(&self, _seg: &mut Segment, _current: &Solid, _rng: &mut StdRng) -> StepResult {
        StepResult::Unchanged
    }
}

/// Perfect absorber: the particle stops at every wall it reaches.
pub struct AbsorbAll;

impl ParticleBehavior for AbsorbAll {
    fn on_hit(
        &self,
        seg: &mut Segment,
        _normal: &Vector3<f64>,
        _leaving: &Solid,
        _entering: &Solid,
        _pol: &mut i8,
        _n_spinflip: &mut u32,
        _rng: &mut StdRng,
    ) -> HitResult {
        seg.t2 = seg.t1;
        seg.y2 = seg.y1;
        HitResult::Absorb
    }

    fn on_step(&self, _seg: &mut Segment, _current: &Solid, _rng: &mut StdRng) -> StepResult {
        StepResult::Unchanged
    }
}

/// Free-neutron behavior: ballistic transport plus beta decay into a
/// proton/electron pair with isotropically diced momenta.
pub struct NeutronDecay;

fn isotropic_direction(rng: &mut StdRng) -> Vector3<f64> {
    let cos_theta: f64 = rng.gen_range(-1.0..=1.0);
    let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

fn speed_from_ekin_ev(species: &SpeciesInfo, ekin_ev: f64) -> f64 {
    let joules = ekin_ev * ELEMENTARY_CHARGE;
    let gamma = 1.0 + joules / (species.mass * crate::constants::C_0 * crate::constants::C_0);
    crate::constants::C_0 * (1.0 - 1.0 / (gamma * gamma)).sqrt()
}

impl ParticleBehavior for NeutronDecay {
    fn on_hit(
        &self,
        _seg: &mut Segment,
        _normal: &Vector3<f64>,
        _leaving: &Solid,
        _entering: &Solid,
        _pol: &mut i8,
        _n_spinflip: &mut u32,
        _rng: &mut StdRng,
    ) -> HitResult {
        HitResult::Transmit { changed: false }
    }

    fn on_step(&self, _seg: &mut Segment, _current: &Solid, _rng: &mut StdRng) -> StepResult {
        StepResult::Unchanged
    }

    fn decay(&self, parent: &Particle, rng: &mut StdRng) -> Vec<Particle> {
        let mut secondaries = Vec::with_capacity(2);
        for (species, e_max) in [(PROTON, PROTON_RECOIL_MAX_EV), (ELECTRON, BETA_ENDPOINT_EV)] {
            let dir = isotropic_direction(rng);
            let speed = speed_from_ekin_ev(&species, rng.gen_range(0.0..e_max));
            let v = speed * dir;
            let y = [
                parent.y_end[0],
                parent.y_end[1],
                parent.y_end[2],
                v.x,
                v.y,
                v.z,
            ];
            secondaries.push(Particle::new(
                species,
                parent.number,
                parent.t_end,
                y,
                0,
                f64::INFINITY,
                parent.max_traj,
                Arc::new(Ballistic),
            ));
        }
        secondaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_specular_reflection_reverses_normal_component() {
        let mut seg = Segment {
            t1: 1.0,
            y1: [0.1, 0.2, 0.3, 3.0, -1.0, 2.0],
            t2: 1.1,
            y2: [0.2, 0.2, 0.3, 3.0, -1.0, 2.0],
        };
        let normal = Vector3::new(1.0, 0.0, 0.0);
        let wall = Solid::new(2, "wall", crate::geometry::Material::vacuum());
        let vacuum = Solid::default_solid();
        let mut pol = 0i8;
        let mut flips = 0u32;
        let mut rng = StdRng::seed_from_u64(1);
        let result = SpecularReflector.on_hit(
            &mut seg, &normal, &vacuum, &wall, &mut pol, &mut flips, &mut rng,
        );
        assert_eq!(result, HitResult::Reflect);
        assert_eq!(seg.t2, seg.t1);
        assert_eq!(&seg.y2[3..], &[-3.0, -1.0, 2.0]);
    }

    #[test]
    fn test_spin_flip_certain_when_probability_one() {
        let mut material = crate::geometry::Material::vacuum();
        material.spin_flip_prob = 1.0;
        let wall = Solid::new(2, "flipper", material);
        let vacuum = Solid::default_solid();
        let mut seg = Segment {
            t1: 0.0,
            y1: [0.0; 6],
            t2: 0.1,
            y2: [0.0; 6],
        };
        let mut pol = 1i8;
        let mut flips = 0u32;
        let mut rng = StdRng::seed_from_u64(7);
        SpecularReflector.on_hit(
            &mut seg,
            &Vector3::new(0.0, 0.0, 1.0),
            &vacuum,
            &wall,
            &mut pol,
            &mut flips,
            &mut rng,
        );
        assert_eq!(pol, -1);
        assert_eq!(flips, 1);
    }

    #[test]
    fn test_neutron_decay_appends_proton_and_electron() {
        let parent = Particle::new(
            NEUTRON,
            3,
            10.0,
            [1.0, 2.0, 3.0, 0.0, 0.0, 0.0],
            1,
            880.0,
            1e9,
            Arc::new(NeutronDecay),
        );
        let mut rng = StdRng::seed_from_u64(42);
        let secondaries = NeutronDecay.decay(&parent, &mut rng);
        assert_eq!(secondaries.len(), 2);
        assert_eq!(secondaries[0].species.name, "proton");
        assert_eq!(secondaries[1].species.name, "electron");
        for s in &secondaries {
            assert_eq!(s.t_start, 10.0);
            assert_eq!(&s.y_start[0..3], &[1.0, 2.0, 3.0]);
            let v = crate::particle::velocity(&s.y_start).norm();
            assert!(v > 0.0 && v < crate::constants::C_0);
        }
    }

    #[test]
    fn test_isotropic_direction_is_unit() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let d = isotropic_direction(&mut rng);
            assert!((d.norm() - 1.0).abs() < 1e-12);
        }
    }
}
