//! Composite field provider summing an ordered set of sources.

use std::sync::Arc;

use crate::field::{BFieldValue, EFieldValue, FieldSource};

/// Owns the configured field sources and exposes the two summed-field
/// queries the equations of motion need. Immutable after construction and
/// freely shareable across particle tasks.
#[derive(Clone, Default)]
pub struct FieldManager {
    sources: Vec<Arc<dyn FieldSource>>,
}

impl FieldManager {
    pub fn new(sources: Vec<Arc<dyn FieldSource>>) -> FieldManager {
        FieldManager { sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Summed magnetic field, component derivatives, |B| and grad |B|.
    pub fn b_field(&self, x: f64, y: f64, z: f64, t: f64) -> BFieldValue {
        let mut b = BFieldValue::default();
        for source in &self.sources {
            source.add_b_field(x, y, z, t, &mut b);
        }
        b.update_magnitude();
        b
    }

    /// Summed electric potential, field and field derivatives.
    pub fn e_field(&self, x: f64, y: f64, z: f64, t: f64) -> EFieldValue {
        let mut e = EFieldValue::default();
        for source in &self.sources {
            source.add_e_field(x, y, z, t, &mut e);
        }
        e
    }
}
