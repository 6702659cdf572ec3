//! Slice preparation for the ROI predictor.
//!
//! Every slice is resampled to a fixed square frame and min-max normalized
//! into `[0, 1]`. A constant slice has no intensity range to normalize by and
//! becomes an all-zero slice.

use crate::{enums::Interpolation, interpolator::Interpolator, volume::Volume};

use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Target size {0} is outside 1..={max}", max = u16::MAX)]
    InvalidTargetSize(usize),

    #[error("Volume has no slices")]
    EmptyVolume,

    #[error("Slice {0} contains non-finite intensities")]
    NonFinite(usize),
}

/// Resize a single slice to `size x size`.
pub fn resize_slice(
    slice: ArrayView2<'_, f32>,
    size: usize,
    interpolation: Interpolation,
) -> Array2<f32> {
    Interpolator::resize(&slice, size, size, interpolation)
}

/// Min-max normalize a slice into `[0, 1]`; constant slices become zeros.
pub fn min_max_normalize(slice: ArrayView2<'_, f32>) -> Array2<f32> {
    let (min, max) = min_max(&slice);
    if !(max > min) {
        return Array2::zeros(slice.raw_dim());
    }
    let range = max - min;
    slice.mapv(|v| (v - min) / range)
}

/// Smallest and largest value of a slice. Empty slices report `(0, 0)`.
pub fn min_max(slice: &ArrayView2<'_, f32>) -> (f32, f32) {
    let mut iter = slice.iter().copied();
    let Some(first) = iter.next() else {
        return (0.0, 0.0);
    };
    iter.fold((first, first), |(min, max), v| (min.min(v), max.max(v)))
}

/// Resize every slice to the target frame and normalize it.
pub fn preprocess_volume(volume: &Volume, target_size: usize) -> Result<Volume, PreprocessError> {
    // Frames must fit the 16-bit DICOM Rows/Columns attributes
    if target_size == 0 || target_size > usize::from(u16::MAX) {
        return Err(PreprocessError::InvalidTargetSize(target_size));
    }
    if volume.is_empty() {
        return Err(PreprocessError::EmptyVolume);
    }

    let mut out = Array3::<f32>::zeros((volume.len(), target_size, target_size));
    for (index, slice) in volume.data().axis_iter(Axis(0)).enumerate() {
        if slice.iter().any(|v| !v.is_finite()) {
            return Err(PreprocessError::NonFinite(index));
        }
        let resized = resize_slice(slice, target_size, Interpolation::Bilinear);
        out.slice_mut(s![index, .., ..])
            .assign(&min_max_normalize(resized.view()));
    }

    Ok(volume.with_data(out))
}

/// Resize a stack of label masks with nearest-neighbour sampling so label
/// values survive unchanged.
pub fn preprocess_labels(labels: &Array3<f32>, target_size: usize) -> Array3<f32> {
    let mut out = Array3::<f32>::zeros((labels.dim().0, target_size, target_size));
    for (index, label) in labels.axis_iter(Axis(0)).enumerate() {
        out.slice_mut(s![index, .., ..])
            .assign(&resize_slice(label, target_size, Interpolation::NearestNeighbor));
    }
    out
}
