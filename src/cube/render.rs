//! False-color rendering.
//!
//! Three bands are mapped to red, green and blue. Each channel is linearly
//! stretched from its own min/max to `0..=255`.

use super::HyperspectralCube;
use crate::error::{AppResult, SnapError};
use image::{Rgb, RgbImage};
use ndarray::{ArrayView2, Axis};
use std::path::Path;

/// Bands used for the red, green and blue channels by default.
pub const DEFAULT_RGB_BANDS: [usize; 3] = [29, 19, 9];

/// Render `cube` to an 8-bit RGB image using `bands` as (R, G, B).
pub fn false_color(cube: &HyperspectralCube, bands: [usize; 3]) -> AppResult<RgbImage> {
    let (rows, cols, total) = cube.shape();
    if let Some(&band) = bands.iter().find(|&&b| b >= total) {
        return Err(SnapError::BandOutOfRange { band, bands: total });
    }

    let width = u32::try_from(cols)
        .map_err(|_| SnapError::Configuration(format!("{cols} columns exceed image limits")))?;
    let height = u32::try_from(rows)
        .map_err(|_| SnapError::Configuration(format!("{rows} rows exceed image limits")))?;

    let planes = bands.map(|b| cube.data().index_axis(Axis(2), b));
    let ranges = [
        value_range(&planes[0]),
        value_range(&planes[1]),
        value_range(&planes[2]),
    ];

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let (r, c) = (y as usize, x as usize);
        Rgb([
            stretch(planes[0][[r, c]], ranges[0]),
            stretch(planes[1][[r, c]], ranges[1]),
            stretch(planes[2][[r, c]], ranges[2]),
        ])
    }))
}

/// Render and save as PNG.
pub fn save_false_color(cube: &HyperspectralCube, bands: [usize; 3], path: &Path) -> AppResult<()> {
    false_color(cube, bands)?.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

fn value_range(plane: &ArrayView2<'_, f64>) -> (f64, f64) {
    plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn stretch(value: f64, (lo, hi): (f64, f64)) -> u8 {
    if !value.is_finite() || hi <= lo {
        return 0;
    }
    (((value - lo) / (hi - lo)) * 255.0).round().clamp(0.0, 255.0) as u8
}
