//! Affine pixel-coordinate transforms.
//!
//! Geometry correction moves pixels through a horizontal shear, an offset that
//! keeps sheared content in positive columns, an anisotropic scale and finally
//! an optional crop translation. Everything that carries coordinates (the disk
//! ellipse, annotated areas) must go through the same composed transform.

use nalgebra::{Matrix3, Point2};

use crate::ellipse::Ellipse;
use crate::regression::{fit_ellipse, RegressionError};

/// Number of boundary samples used when pushing an ellipse through a transform
pub const ELLIPSE_TRANSFORM_SAMPLES: usize = 32;

/// 2D affine transform stored as a homogeneous 3x3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelTransform {
    matrix: Matrix3<f64>,
}

impl Default for PixelTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PixelTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Horizontal shear `x' = x + shear * y`.
    pub fn shear_x(shear: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, shear, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0),
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            matrix: Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Composition applying `self` first, then `next`.
    pub fn then(&self, next: &PixelTransform) -> PixelTransform {
        PixelTransform {
            matrix: next.matrix * self.matrix,
        }
    }

    pub fn apply(&self, point: &Point2<f64>) -> Point2<f64> {
        self.matrix.transform_point(point)
    }

    pub fn apply_xy(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.apply(&Point2::new(x, y));
        (p.x, p.y)
    }

    /// True when the transform is exactly a translation.
    pub fn is_translation(&self) -> bool {
        let m = &self.matrix;
        m[(0, 0)] == 1.0 && m[(0, 1)] == 0.0 && m[(1, 0)] == 0.0 && m[(1, 1)] == 1.0
    }

    /// Maps an ellipse through the transform.
    ///
    /// Affine maps send ellipses to ellipses; translations are applied exactly
    /// and any other transform samples [`ELLIPSE_TRANSFORM_SAMPLES`] boundary
    /// points, maps them and runs the regression again.
    ///
    /// # Errors
    /// Propagates the `RegressionError` of the refit.
    pub fn apply_to_ellipse(&self, ellipse: &Ellipse) -> Result<Ellipse, RegressionError> {
        if self.is_translation() {
            return Ok(ellipse.translate(self.matrix[(0, 2)], self.matrix[(1, 2)]));
        }
        let mapped: Vec<Point2<f64>> = ellipse
            .sample_boundary(ELLIPSE_TRANSFORM_SAMPLES)
            .iter()
            .map(|p| self.apply(p))
            .collect();
        fit_ellipse(&mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_composition_order() {
        let t = PixelTransform::shear_x(0.5)
            .then(&PixelTransform::translation(10.0, 0.0))
            .then(&PixelTransform::scale(2.0, 1.0));
        let (x, y) = t.apply_xy(4.0, 2.0);
        // shear: (5, 2) -> translate: (15, 2) -> scale: (30, 2)
        assert_relative_eq!(x, 30.0);
        assert_relative_eq!(y, 2.0);
    }

    #[test]
    fn test_translation_of_ellipse_is_exact() {
        let e = Ellipse::new(Point2::new(5.0, 5.0), 3.0, 2.0, 0.1).unwrap();
        let moved = PixelTransform::translation(-2.0, 4.0)
            .apply_to_ellipse(&e)
            .unwrap();
        assert_eq!(moved.center(), Point2::new(3.0, 9.0));
        assert_eq!(moved.semi_axes(), (3.0, 2.0));
    }

    #[test]
    fn test_shear_removes_tilt() {
        // A tilted ellipse obtained by shearing a circle
        let circle = Ellipse::circle(Point2::new(100.0, 100.0), 40.0).unwrap();
        let tilted = PixelTransform::shear_x(0.3)
            .apply_to_ellipse(&circle)
            .unwrap();
        assert!(tilted.tilt_angle().abs() > 0.1);

        let shear = (-tilted.tilt_angle()).tan();
        let corrected = PixelTransform::shear_x(shear)
            .apply_to_ellipse(&tilted)
            .unwrap();
        assert_relative_eq!(corrected.tilt_angle(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(corrected.radius(), 40.0, epsilon = 1e-6);
    }

    #[test]
    fn test_scale_changes_ratio() {
        let e = Ellipse::new(Point2::new(50.0, 50.0), 40.0, 20.0, 0.0).unwrap();
        assert_relative_eq!(e.xy_ratio(), 2.0, epsilon = 1e-9);
        let fixed = PixelTransform::scale(0.5, 1.0).apply_to_ellipse(&e).unwrap();
        assert_relative_eq!(fixed.xy_ratio(), 1.0, epsilon = 1e-6);
    }
}
