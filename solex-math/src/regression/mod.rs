//! Least-squares ellipse regression on disk edge samples.
//!
//! Points are first normalized (centroid at the origin, unit mean distance) so
//! that the design matrix stays well conditioned for multi-thousand pixel
//! frames. Five or more points solve the general conic with the rotation and
//! translation invariant constraint `A + C = 1`; three or four points solve an
//! algebraic circle, which is all such a sparse set can determine.

use nalgebra::{DMatrix, DVector, Point2};
use thiserror::Error;

use crate::ellipse::{ConicCoefficients, Ellipse};

/// Minimum number of samples for a general conic fit
pub const MIN_CONIC_POINTS: usize = 5;

/// Minimum number of samples for the circle fallback
pub const MIN_CIRCLE_POINTS: usize = 3;

/// Relative singular value below which the design matrix is considered rank deficient
const RANK_TOLERANCE: f64 = 1e-10;

/// Errors that can occur while fitting an ellipse
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("Too few points for ellipse regression: expected at least {expected}, got {got}")]
    TooFewPoints { expected: usize, got: usize },

    #[error("Degenerate point set, no unique conic fits the samples")]
    Degenerate,

    #[error("Fitted conic is not an ellipse (discriminant {discriminant})")]
    NotAnEllipse { discriminant: f64 },

    #[error("Invalid semi-axes a={a}, b={b}: both must be finite and positive")]
    InvalidSemiAxes { a: f64, b: f64 },
}

/// Centroid and scale used to condition the regression.
struct Normalization {
    mean_x: f64,
    mean_y: f64,
    scale: f64,
}

impl Normalization {
    fn of(points: &[Point2<f64>]) -> Result<Self, RegressionError> {
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
        let mean_distance = points
            .iter()
            .map(|p| ((p.x - mean_x).powi(2) + (p.y - mean_y).powi(2)).sqrt())
            .sum::<f64>()
            / n;

        if !mean_distance.is_finite() || mean_distance <= f64::EPSILON {
            return Err(RegressionError::Degenerate);
        }

        Ok(Self {
            mean_x,
            mean_y,
            scale: mean_distance,
        })
    }

    fn apply(&self, p: &Point2<f64>) -> (f64, f64) {
        ((p.x - self.mean_x) / self.scale, (p.y - self.mean_y) / self.scale)
    }

    fn restore(&self, ellipse: &Ellipse) -> Result<Ellipse, RegressionError> {
        let (a, b) = ellipse.semi_axes();
        let c = ellipse.center();
        Ellipse::new(
            Point2::new(c.x * self.scale + self.mean_x, c.y * self.scale + self.mean_y),
            a * self.scale,
            b * self.scale,
            ellipse.rotation_angle(),
        )
    }
}

/// Fit an ellipse to disk edge samples.
///
/// # Arguments
/// * `points` - Samples believed to lie approximately on the disk boundary
///
/// # Returns
/// The best-fit ellipse in the coordinate system of the samples.
///
/// # Errors
/// * `RegressionError::TooFewPoints` - Fewer than [`MIN_CIRCLE_POINTS`] samples
/// * `RegressionError::Degenerate` - Collinear or coincident samples
/// * `RegressionError::NotAnEllipse` - The best conic is a parabola or hyperbola
pub fn fit_ellipse(points: &[Point2<f64>]) -> Result<Ellipse, RegressionError> {
    if points.len() < MIN_CIRCLE_POINTS {
        return Err(RegressionError::TooFewPoints {
            expected: MIN_CONIC_POINTS,
            got: points.len(),
        });
    }

    let normalization = Normalization::of(points)?;
    let normalized: Vec<(f64, f64)> = points.iter().map(|p| normalization.apply(p)).collect();

    let conic = if points.len() < MIN_CONIC_POINTS {
        fit_circle_conic(&normalized)?
    } else {
        fit_general_conic(&normalized)?
    };

    normalization.restore(&conic.to_ellipse()?)
}

/// Solves `A(x² - y²) + Bxy + Dx + Ey + F = -y²`, i.e. the conic with `C = 1 - A`.
fn fit_general_conic(points: &[(f64, f64)]) -> Result<ConicCoefficients, RegressionError> {
    let design = DMatrix::from_fn(points.len(), 5, |row, col| {
        let (x, y) = points[row];
        match col {
            0 => x * x - y * y,
            1 => x * y,
            2 => x,
            3 => y,
            _ => 1.0,
        }
    });
    let rhs = DVector::from_fn(points.len(), |row, _| {
        let (_, y) = points[row];
        -y * y
    });

    let solution = solve_least_squares(design, rhs)?;
    Ok(ConicCoefficients {
        a: solution[0],
        b: solution[1],
        c: 1.0 - solution[0],
        d: solution[2],
        e: solution[3],
        f: solution[4],
    })
}

/// Algebraic circle fit `x² + y² + Dx + Ey + F = 0`.
fn fit_circle_conic(points: &[(f64, f64)]) -> Result<ConicCoefficients, RegressionError> {
    let design = DMatrix::from_fn(points.len(), 3, |row, col| {
        let (x, y) = points[row];
        match col {
            0 => x,
            1 => y,
            _ => 1.0,
        }
    });
    let rhs = DVector::from_fn(points.len(), |row, _| {
        let (x, y) = points[row];
        -(x * x + y * y)
    });

    let solution = solve_least_squares(design, rhs)?;
    Ok(ConicCoefficients {
        a: 1.0,
        b: 0.0,
        c: 1.0,
        d: solution[0],
        e: solution[1],
        f: solution[2],
    })
}

fn solve_least_squares(
    design: DMatrix<f64>,
    rhs: DVector<f64>,
) -> Result<DVector<f64>, RegressionError> {
    let svd = design.svd(true, true);
    let max_singular = svd.singular_values.max();
    let min_singular = svd.singular_values.min();
    if !(max_singular > 0.0) || min_singular <= max_singular * RANK_TOLERANCE {
        return Err(RegressionError::Degenerate);
    }

    svd.solve(&rhs, max_singular * RANK_TOLERANCE)
        .map_err(|_| RegressionError::Degenerate)
}
