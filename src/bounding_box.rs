use nalgebra::Vector3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lower: Vector3<f64>,
    pub upper: Vector3<f64>,
}

impl BoundingBox {
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>) -> Self {
        BoundingBox { lower, upper }
    }

    /// Smallest box around a set of points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut bb = BoundingBox::new(first, first);
        for p in iter {
            bb.include(p);
        }
        Some(bb)
    }

    pub fn include(&mut self, p: &Vector3<f64>) {
        for i in 0..3 {
            self.lower[i] = self.lower[i].min(p[i]);
            self.upper[i] = self.upper[i].max(p[i]);
        }
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.lower[i] && p[i] <= self.upper[i])
    }

    pub fn center(&self) -> Vector3<f64> {
        0.5 * (self.lower + self.upper)
    }

    pub fn width(&self) -> Vector3<f64> {
        self.upper - self.lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_and_contains() {
        let pts = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 2.0, -1.0),
            Vector3::new(-0.5, 0.5, 3.0),
        ];
        let bb = BoundingBox::from_points(pts.iter()).unwrap();
        assert_eq!(bb.lower, Vector3::new(-0.5, 0.0, -1.0));
        assert_eq!(bb.upper, Vector3::new(1.0, 2.0, 3.0));
        assert!(bb.contains(&Vector3::new(0.5, 1.0, 1.0)));
        assert!(!bb.contains(&Vector3::new(2.0, 1.0, 1.0)));
    }

    #[test]
    fn test_center_and_width() {
        let bb = BoundingBox::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 4.0, 6.0));
        assert_eq!(bb.center(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(bb.width(), Vector3::new(2.0, 4.0, 6.0));
    }
}
