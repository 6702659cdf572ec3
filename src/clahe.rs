//! Contrast limited adaptive histogram equalization (CLAHE) for float slices.
//!
//! The slice is split into contextual regions of `kernel_size` pixels. Each
//! region gets a clipped histogram whose cumulative distribution becomes a
//! grey-level mapping; every pixel is mapped through the four nearest region
//! mappings and the results are blended bilinearly. Output lies in `[0, 1]`.

use crate::{config::ClaheParams, preprocess::min_max};

use ndarray::{Array2, ArrayView2, s};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaheError {
    #[error("Invalid CLAHE parameters: {0}")]
    InvalidParameters(String),

    #[error("Image contains non-finite values")]
    NonFinite,
}

/// Equalize `image` with the given parameters.
///
/// Intensities are first stretched to the image's own `[min, max]`, so the
/// input range does not matter. A constant image maps to zeros.
pub fn equalize_adapthist(
    image: ArrayView2<'_, f32>,
    params: &ClaheParams,
) -> Result<Array2<f32>, ClaheError> {
    if params.nbins < 2 {
        return Err(ClaheError::InvalidParameters(format!(
            "nbins must be at least 2, got {}",
            params.nbins
        )));
    }
    if !(params.clip_limit > 0.0) {
        return Err(ClaheError::InvalidParameters(format!(
            "clip limit must be positive, got {}",
            params.clip_limit
        )));
    }
    if matches!(params.kernel_size, Some((0, _)) | Some((_, 0))) {
        return Err(ClaheError::InvalidParameters(
            "kernel size must be positive".to_string(),
        ));
    }

    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Ok(Array2::zeros((rows, cols)));
    }
    if image.iter().any(|v| !v.is_finite()) {
        return Err(ClaheError::NonFinite);
    }

    let (min, max) = min_max(&image);
    if !(max > min) {
        return Ok(Array2::zeros((rows, cols)));
    }

    let nbins = params.nbins;
    let scale = nbins as f32 / (max - min);
    let bins = image.mapv(|v| (((v - min) * scale) as usize).min(nbins - 1));

    let (kr, kc) = params.kernel_size.unwrap_or((rows / 8, cols / 8));
    let (kr, kc) = (kr.clamp(1, rows), kc.clamp(1, cols));
    let clip_count = ((params.clip_limit * (kr * kc) as f32) as u32).max(1);

    let tiles_r = rows.div_ceil(kr);
    let tiles_c = cols.div_ceil(kc);

    let mut mappings = Vec::with_capacity(tiles_r * tiles_c);
    for tr in 0..tiles_r {
        for tc in 0..tiles_c {
            let region = bins.slice(s![
                tr * kr..((tr + 1) * kr).min(rows),
                tc * kc..((tc + 1) * kc).min(cols)
            ]);
            mappings.push(region_mapping(region, nbins, clip_count));
        }
    }
    let mapping = |tr: usize, tc: usize, bin: usize| mappings[tr * tiles_c + tc][bin];

    let out = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let (r0, r1, wr) = neighbours(r, kr, tiles_r);
        let (c0, c1, wc) = neighbours(c, kc, tiles_c);
        let bin = bins[[r, c]];

        let top = mapping(r0, c0, bin).mul_add(1.0 - wc, mapping(r0, c1, bin) * wc);
        let bottom = mapping(r1, c0, bin).mul_add(1.0 - wc, mapping(r1, c1, bin) * wc);
        top.mul_add(1.0 - wr, bottom * wr).clamp(0.0, 1.0)
    });

    Ok(out)
}

/// Two nearest region centres along one axis and the weight of the second.
#[inline]
fn neighbours(index: usize, kernel: usize, tiles: usize) -> (usize, usize, f32) {
    let position = (index as f32 + 0.5) / kernel as f32 - 0.5;
    let first = (position.max(0.0).floor() as usize).min(tiles - 1);
    let second = (first + 1).min(tiles - 1);
    let weight = if first == second {
        0.0
    } else {
        (position - first as f32).clamp(0.0, 1.0)
    };
    (first, second, weight)
}

/// Clipped cumulative histogram of a region, scaled to `[0, 1]`.
fn region_mapping(region: ArrayView2<'_, usize>, nbins: usize, clip_count: u32) -> Vec<f32> {
    let mut hist = vec![0u32; nbins];
    for &bin in region.iter() {
        hist[bin] += 1;
    }
    clip_histogram(&mut hist, clip_count);

    let total: u32 = hist.iter().sum();
    if total == 0 {
        return vec![0.0; nbins];
    }
    let mut cumulative = 0u32;
    hist.iter()
        .map(|&count| {
            cumulative += count;
            cumulative as f32 / total as f32
        })
        .collect()
}

/// Cap every bin at `limit` and spread the excess evenly over all bins.
fn clip_histogram(hist: &mut [u32], limit: u32) {
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    if excess == 0 {
        return;
    }

    let nbins = hist.len() as u32;
    let per_bin = excess / nbins;
    let residual = (excess % nbins) as usize;
    for (index, count) in hist.iter_mut().enumerate() {
        *count += per_bin + u32::from(index < residual);
    }
}
