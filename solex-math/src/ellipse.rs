//! Ellipse model of the projected solar disk.
//!
//! An ellipse is stored in geometric form: center, semi-axes and the rotation
//! of the `a` axis from the +x image axis (radians). The implicit conic form
//! `A x² + B xy + C y² + D x + E y + F = 0` is derived on demand and drives the
//! shear/ratio quantities used by geometry correction.

use nalgebra::Point2;
use std::f64::consts::{FRAC_PI_2, PI};

use crate::regression::RegressionError;

/// Conic coefficients of `A x² + B xy + C y² + D x + E y + F = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl ConicCoefficients {
    /// Discriminant `B² - 4AC`; strictly negative for ellipses.
    pub fn discriminant(&self) -> f64 {
        self.b * self.b - 4.0 * self.a * self.c
    }

    /// Converts the conic into geometric ellipse parameters.
    ///
    /// # Errors
    /// * `RegressionError::NotAnEllipse` - discriminant is not negative (parabola/hyperbola)
    /// * `RegressionError::Degenerate` - the conic is a point or an imaginary ellipse
    pub fn to_ellipse(&self) -> Result<Ellipse, RegressionError> {
        let discriminant = self.discriminant();
        if !discriminant.is_finite() || discriminant >= 0.0 {
            return Err(RegressionError::NotAnEllipse { discriminant });
        }

        // Orient the conic so that A and C are positive
        let sign = if self.a + self.c < 0.0 { -1.0 } else { 1.0 };
        let (a, b, c, d, e, f) = (
            self.a * sign,
            self.b * sign,
            self.c * sign,
            self.d * sign,
            self.e * sign,
            self.f * sign,
        );

        let det = 4.0 * a * c - b * b;
        let cx = (b * e - 2.0 * c * d) / det;
        let cy = (b * d - 2.0 * a * e) / det;

        // Conic value at the center
        let f0 = f + (d * cx + e * cy) / 2.0;
        if f0 >= 0.0 || !f0.is_finite() {
            return Err(RegressionError::Degenerate);
        }

        // Centered quadratic form normalized to `A' u² + B' uv + C' v² = 1`
        let an = a / -f0;
        let bn = b / -f0;
        let cn = c / -f0;

        let mean = (an + cn) / 2.0;
        let spread = (((an - cn) / 2.0).powi(2) + (bn / 2.0).powi(2)).sqrt();
        let lambda_a = mean + spread;
        let lambda_b = mean - spread;
        if lambda_b <= 0.0 {
            return Err(RegressionError::Degenerate);
        }

        // The largest eigenvalue belongs to the minor axis direction; report the
        // major axis as `a`.
        let rotation = if spread <= mean * 1e-12 {
            0.0
        } else {
            normalize_half_turn(0.5 * bn.atan2(an - cn) + FRAC_PI_2)
        };
        Ellipse::new(
            Point2::new(cx, cy),
            1.0 / lambda_b.sqrt(),
            1.0 / lambda_a.sqrt(),
            rotation,
        )
    }
}

/// Maps an axis orientation into `(-pi/2, pi/2]`.
fn normalize_half_turn(angle: f64) -> f64 {
    let mut angle = angle;
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}

/// Fitted boundary of the solar disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    center: Point2<f64>,
    a: f64,
    b: f64,
    rotation: f64,
}

impl Ellipse {
    /// Create an ellipse from its geometric parameters.
    ///
    /// # Arguments
    /// * `center` - Center in pixel coordinates
    /// * `a` - Semi-axis along the rotated x direction
    /// * `b` - Semi-axis along the rotated y direction
    /// * `rotation` - Rotation of the `a` axis in radians
    ///
    /// # Errors
    /// Returns `RegressionError::InvalidSemiAxes` unless both semi-axes are
    /// finite and strictly positive.
    pub fn new(center: Point2<f64>, a: f64, b: f64, rotation: f64) -> Result<Self, RegressionError> {
        if !(a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0) {
            return Err(RegressionError::InvalidSemiAxes { a, b });
        }
        Ok(Self {
            center,
            a,
            b,
            rotation,
        })
    }

    /// Circle of the given radius.
    pub fn circle(center: Point2<f64>, radius: f64) -> Result<Self, RegressionError> {
        Self::new(center, radius, radius, 0.0)
    }

    pub fn center(&self) -> Point2<f64> {
        self.center
    }

    /// Semi-axes `(a, b)`.
    pub fn semi_axes(&self) -> (f64, f64) {
        (self.a, self.b)
    }

    pub fn rotation_angle(&self) -> f64 {
        self.rotation
    }

    /// Mean of both semi-axes, used as "the" disk radius.
    pub fn radius(&self) -> f64 {
        (self.a + self.b) / 2.0
    }

    /// Returns true if the pixel coordinate lies inside or on the boundary.
    pub fn is_within(&self, x: f64, y: f64) -> bool {
        let (sin, cos) = self.rotation.sin_cos();
        let dx = x - self.center.x;
        let dy = y - self.center.y;
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        (u / self.a).powi(2) + (v / self.b).powi(2) <= 1.0
    }

    /// Returns true when `|a - b| / max(a, b) <= epsilon`.
    pub fn is_almost_circle(&self, epsilon: f64) -> bool {
        (self.a - self.b).abs() / self.a.max(self.b) <= epsilon
    }

    /// Parametric boundary point for parameter `theta` (radians).
    pub fn to_cartesian(&self, theta: f64) -> Point2<f64> {
        let (sin_r, cos_r) = self.rotation.sin_cos();
        let (sin_t, cos_t) = theta.sin_cos();
        let u = self.a * cos_t;
        let v = self.b * sin_t;
        Point2::new(
            self.center.x + u * cos_r - v * sin_r,
            self.center.y + u * sin_r + v * cos_r,
        )
    }

    /// `count` boundary points evenly spaced in the parametric angle.
    pub fn sample_boundary(&self, count: usize) -> Vec<Point2<f64>> {
        (0..count)
            .map(|i| self.to_cartesian(std::f64::consts::TAU * i as f64 / count as f64))
            .collect()
    }

    /// Implicit conic form of this ellipse.
    pub fn conic(&self) -> ConicCoefficients {
        let (sin, cos) = self.rotation.sin_cos();
        let ia = 1.0 / (self.a * self.a);
        let ib = 1.0 / (self.b * self.b);
        let a = cos * cos * ia + sin * sin * ib;
        let b = 2.0 * sin * cos * (ia - ib);
        let c = sin * sin * ia + cos * cos * ib;
        let (x0, y0) = (self.center.x, self.center.y);
        ConicCoefficients {
            a,
            b,
            c,
            d: -2.0 * a * x0 - b * y0,
            e: -b * x0 - 2.0 * c * y0,
            f: a * x0 * x0 + b * x0 * y0 + c * y0 * y0 - 1.0,
        }
    }

    /// Scan tilt of the disk in radians.
    ///
    /// This is the angle `theta` for which the horizontal shear `x' = x + tan(-theta) y`
    /// turns the ellipse into an axis-aligned one. A circle has tilt 0.
    pub fn tilt_angle(&self) -> f64 {
        let conic = self.conic();
        (-conic.b / (2.0 * conic.a)).atan()
    }

    /// Ratio of horizontal to vertical half-extent once the tilt shear is removed.
    ///
    /// Horizontal shear preserves the vertical extent and the area, which gives the
    /// closed form `sqrt(C' / A)` with `C' = C - B²/4A`.
    pub fn xy_ratio(&self) -> f64 {
        let conic = self.conic();
        let c_prime = conic.c - conic.b * conic.b / (4.0 * conic.a);
        (c_prime / conic.a).sqrt()
    }

    /// Same ellipse moved by `(dx, dy)`.
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            center: Point2::new(self.center.x + dx, self.center.y + dy),
            ..*self
        }
    }
}
