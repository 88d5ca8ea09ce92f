//! Contrast limited adaptive histogram equalization
//!
//! The image is split into a grid of tiles. Each tile gets its own
//! equalization curve built from a clipped histogram, and every pixel is
//! mapped through the bilinear blend of the curves of the four closest tile
//! centers so that tile borders stay invisible.

use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::error::InvalidParameter;
use crate::image::{min_max, MonoImage, MAX_PIXEL_VALUE};
use crate::resample::lerp;
use crate::stretching::StretchingStrategy;

pub const DEFAULT_TILES: usize = 8;
pub const DEFAULT_BINS: usize = 64;
pub const DEFAULT_CLIP: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaheStrategy {
    tiles: usize,
    bins: usize,
    clip: f64,
}

impl Default for ClaheStrategy {
    fn default() -> Self {
        Self {
            tiles: DEFAULT_TILES,
            bins: DEFAULT_BINS,
            clip: DEFAULT_CLIP,
        }
    }
}

impl ClaheStrategy {
    /// # Arguments
    /// * `tiles` - Number of tiles along each axis
    /// * `bins` - Histogram bins per tile
    /// * `clip` - Clip limit as a multiple of the mean bin count
    ///
    /// # Errors
    /// `InvalidParameter` if `tiles == 0`, `bins < 2` or `clip < 1`.
    pub fn new(tiles: usize, bins: usize, clip: f64) -> Result<Self, InvalidParameter> {
        if tiles == 0 {
            return Err(InvalidParameter::new("tiles", tiles as f64, "must be >= 1"));
        }
        if bins < 2 {
            return Err(InvalidParameter::new("bins", bins as f64, "must be >= 2"));
        }
        if !(clip >= 1.0 && clip.is_finite()) {
            return Err(InvalidParameter::new("clip", clip, "must be >= 1"));
        }
        Ok(Self { tiles, bins, clip })
    }
}

/// Tile grid laid over one axis; never more tiles than pixels.
#[derive(Debug, Clone, Copy)]
struct TileAxis {
    count: usize,
    extent: f64,
}

impl TileAxis {
    fn new(len: usize, tiles: usize) -> Self {
        let count = tiles.min(len).max(1);
        Self {
            count,
            extent: len as f64 / count as f64,
        }
    }

    fn bounds(&self, tile: usize) -> (usize, usize) {
        let start = (tile as f64 * self.extent).round() as usize;
        let end = ((tile + 1) as f64 * self.extent).round() as usize;
        (start, end)
    }

    /// Neighbouring tiles and interpolation weight for a pixel coordinate.
    fn locate(&self, pos: usize) -> (usize, usize, f64) {
        let f = (pos as f64 + 0.5) / self.extent - 0.5;
        if f <= 0.0 {
            return (0, 0, 0.0);
        }
        let lo = (f.floor() as usize).min(self.count - 1);
        let hi = (lo + 1).min(self.count - 1);
        (lo, hi, (f - lo as f64).clamp(0.0, 1.0))
    }
}

/// Clips a histogram at `limit` and spreads the excess over every bin.
fn clip_histogram(hist: &mut [f64], limit: f64) {
    let mut excess = 0.0;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let share = excess / hist.len() as f64;
    hist.iter_mut().for_each(|c| *c += share);
}

/// Normalized cumulative distribution; the last entry is 1.
fn cumulative(hist: &[f64]) -> Vec<f64> {
    let total: f64 = hist.iter().sum();
    let mut acc = 0.0;
    hist.iter()
        .map(|c| {
            acc += c;
            if total > 0.0 {
                acc / total
            } else {
                0.0
            }
        })
        .collect()
}

impl ClaheStrategy {
    fn equalize(&self, data: &mut Array2<f32>) {
        let Some((min, max)) = min_max(data.iter().copied()) else {
            return;
        };
        let range = max - min;
        if range <= 0.0 || !range.is_finite() {
            return;
        }
        let (height, width) = data.dim();
        let xs = TileAxis::new(width, self.tiles);
        let ys = TileAxis::new(height, self.tiles);
        let bins = self.bins;
        let bin_of = |v: f32| -> usize {
            let t = ((v - min) / range).clamp(0.0, 1.0);
            ((t * bins as f32) as usize).min(bins - 1)
        };

        let source = data.view();
        let luts: Vec<Vec<f64>> = (0..ys.count * xs.count)
            .into_par_iter()
            .map(|tile| {
                let (y0, y1) = ys.bounds(tile / xs.count);
                let (x0, x1) = xs.bounds(tile % xs.count);
                let mut hist = vec![0.0f64; bins];
                for y in y0..y1 {
                    for x in x0..x1 {
                        hist[bin_of(source[[y, x]])] += 1.0;
                    }
                }
                let pixels = ((y1 - y0) * (x1 - x0)) as f64;
                let limit = (self.clip * pixels / bins as f64).max(1.0);
                clip_histogram(&mut hist, limit);
                cumulative(&hist)
            })
            .collect();

        let mut output = Array2::<f32>::zeros((height, width));
        output
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(y, mut row)| {
                let (ty0, ty1, wy) = ys.locate(y);
                for (x, out) in row.iter_mut().enumerate() {
                    let (tx0, tx1, wx) = xs.locate(x);
                    let bin = bin_of(source[[y, x]]);
                    let lut = |ty: usize, tx: usize| luts[ty * xs.count + tx][bin];
                    let top = lerp(lut(ty0, tx0), lut(ty0, tx1), wx);
                    let bottom = lerp(lut(ty1, tx0), lut(ty1, tx1), wx);
                    *out = (lerp(top, bottom, wy) * MAX_PIXEL_VALUE as f64) as f32;
                }
            });
        *data = output;
    }
}

impl StretchingStrategy for ClaheStrategy {
    fn stretch(&self, image: &mut MonoImage) {
        self.equalize(image.data_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_parameters() {
        assert!(ClaheStrategy::new(0, 64, 1.0).is_err());
        assert!(ClaheStrategy::new(8, 1, 1.0).is_err());
        assert!(ClaheStrategy::new(8, 64, 0.5).is_err());
        assert!(ClaheStrategy::new(1, 2, 1.0).is_ok());
    }

    #[test]
    fn test_single_tile_is_monotonic_and_spans_range() {
        let data = Array2::from_shape_fn((16, 16), |(y, x)| 1000.0 + (x + 16 * y) as f32 * 0.5);
        let mut image = MonoImage::new(data.clone());
        ClaheStrategy::new(1, 32, 1.0).unwrap().stretch(&mut image);

        let out = image.data();
        assert_relative_eq!(out[[15, 15]], MAX_PIXEL_VALUE, epsilon = 1e-2);
        assert!(out[[0, 0]] < MAX_PIXEL_VALUE / 4.0);
        let mut pairs: Vec<(f32, f32)> = data.iter().copied().zip(out.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_flat_image_is_untouched() {
        let mut image = MonoImage::from_vec(4, 4, vec![123.0; 16]).unwrap();
        ClaheStrategy::default().stretch(&mut image);
        assert!(image.data().iter().all(|&v| v == 123.0));
    }

    #[test]
    fn test_output_range_with_more_tiles_than_pixels() {
        let data = Array2::from_shape_fn((5, 3), |(y, x)| ((x * 7 + y * 13) % 11) as f32 * 100.0);
        let mut image = MonoImage::new(data);
        ClaheStrategy::default().stretch(&mut image);
        assert!(image.data().iter().all(|&v| (0.0..=MAX_PIXEL_VALUE).contains(&v)));
    }

    #[test]
    fn test_clip_redistributes_excess() {
        let mut hist = vec![10.0, 0.0, 0.0, 2.0];
        clip_histogram(&mut hist, 4.0);
        assert_eq!(hist, vec![5.5, 1.5, 1.5, 3.5]);
        assert_eq!(hist.iter().sum::<f64>(), 12.0);
    }

    #[test]
    fn test_tile_location() {
        let axis = TileAxis::new(80, 8);
        assert_eq!(axis.locate(0), (0, 0, 0.0));
        assert_eq!(axis.locate(79).0, 7);
        let (lo, hi, w) = axis.locate(10);
        assert_eq!((lo, hi), (0, 1));
        assert_relative_eq!(w, 0.55, epsilon = 1e-9);
    }
}
