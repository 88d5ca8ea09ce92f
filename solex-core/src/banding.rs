//! Banding reduction
//!
//! Horizontal bands come from transversalium lines and uneven slit
//! illumination: a whole row of the reconstructed disk is slightly brighter or
//! darker than its neighbours. Each pass compares the mean of a row inside the
//! disk with the mean over a window of `width` surrounding rows and rescales
//! the disk pixels of that row towards the window mean. Sky pixels are left
//! untouched.

use ndarray::{Array2, Axis};
use rayon::prelude::*;

use solex_math::Ellipse;

use crate::error::ProcessingError;
use crate::events::{Broadcaster, InterruptFlag, ProcessingEvent};
use crate::image::MAX_PIXEL_VALUE;
use crate::params::BandingParams;

const TASK: &str = "Banding reduction";

/// Runs `params.passes` banding passes in place.
///
/// Progress is reported as `(i + 1) / passes` after pass `i`. With zero
/// passes the buffer is not touched.
///
/// # Errors
/// `ProcessingError::Interrupted` if the interrupt flag is raised between
/// passes or rows; the buffer may then hold a partially corrected pass.
pub fn reduce_banding(
    data: &mut Array2<f32>,
    ellipse: &Ellipse,
    params: &BandingParams,
    broadcaster: &dyn Broadcaster,
    interrupt: &InterruptFlag,
) -> Result<(), ProcessingError> {
    broadcaster.broadcast(ProcessingEvent::progress(0.0, TASK));
    let passes = params.passes;
    for i in 0..passes {
        interrupt.check()?;
        banding_pass(data, params.width, ellipse, interrupt)?;
        broadcaster.broadcast(ProcessingEvent::progress(
            (i + 1) as f64 / passes as f64,
            TASK,
        ));
    }
    Ok(())
}

/// Horizontal extent `[x_min, x_max]` of the disk on row `y`, if the row crosses it.
fn disk_span(ellipse: &Ellipse, y: usize, width: usize) -> Option<(usize, usize)> {
    let yf = y as f64;
    let mut first = None;
    let mut last = None;
    for x in 0..width {
        if ellipse.is_within(x as f64, yf) {
            if first.is_none() {
                first = Some(x);
            }
            last = Some(x);
        }
    }
    first.zip(last)
}

/// Mean value of the disk pixels of each row.
fn row_averages(data: &Array2<f32>, spans: &[Option<(usize, usize)>]) -> Vec<Option<f64>> {
    data.axis_iter(Axis(0))
        .into_par_iter()
        .zip(spans.par_iter())
        .map(|(row, span)| {
            span.map(|(x0, x1)| {
                let sum: f64 = (x0..=x1).map(|x| row[x] as f64).sum();
                sum / (x1 - x0 + 1) as f64
            })
        })
        .collect()
}

/// Mean of the defined row averages within `width` rows centered on each row.
fn band_averages(rows: &[Option<f64>], width: usize) -> Vec<Option<f64>> {
    let half = width / 2;
    (0..rows.len())
        .map(|y| {
            rows[y]?;
            let start = y.saturating_sub(half);
            let end = (y + half).min(rows.len() - 1);
            let (sum, count) = rows[start..=end]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

fn banding_pass(
    data: &mut Array2<f32>,
    width: usize,
    ellipse: &Ellipse,
    interrupt: &InterruptFlag,
) -> Result<(), ProcessingError> {
    let image_width = data.ncols();
    let spans: Vec<_> = (0..data.nrows())
        .into_par_iter()
        .map(|y| disk_span(ellipse, y, image_width))
        .collect();
    let rows = row_averages(data, &spans);
    let bands = band_averages(&rows, width.max(1));

    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(y, mut row)| {
            interrupt.check()?;
            let (Some((x0, x1)), Some(row_avg), Some(band_avg)) = (spans[y], rows[y], bands[y])
            else {
                return Ok(());
            };
            if row_avg <= 0.0 {
                return Ok(());
            }
            let factor = (band_avg / row_avg) as f32;
            for x in x0..=x1 {
                if ellipse.is_within(x as f64, y as f64) {
                    row[x] = (row[x] * factor).min(MAX_PIXEL_VALUE);
                }
            }
            Ok::<(), ProcessingError>(())
        })
}
