//! Region-adaptive enhancement.
//!
//! Each slice is split into a focused part (the ROI, zero elsewhere) and an
//! unfocused part (everything but the ROI). Only the focused part is
//! equalized; the two are then recombined, so pixels outside the ROI come out
//! bit-identical to the input.

use crate::{
    clahe::{ClaheError, equalize_adapthist},
    config::{ClaheParams, RaclaheConfig},
    enums::EqualizationRegion,
    roi::{BoundingBoxMask, Roi},
    volume::Volume,
};

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip, s};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnhancementError {
    #[error("Got {rois} ROIs for {slices} slices")]
    RoiCountMismatch { rois: usize, slices: usize },

    #[error("Slice {slice}: ROI {roi:?} lies outside the {width}x{height} frame")]
    RoiOutOfBounds {
        slice: usize,
        roi: Roi,
        width: usize,
        height: usize,
    },

    #[error("Slice {slice}: {source}")]
    Equalization {
        slice: usize,
        #[source]
        source: ClaheError,
    },
}

/// A slice split along its ROI
#[derive(Debug, Clone)]
pub struct SplitSlice {
    pub mask: BoundingBoxMask,
    /// Slice with every pixel outside the ROI set to zero
    pub focused: Array2<f32>,
    /// Slice with every pixel inside the ROI set to zero
    pub unfocused: Array2<f32>,
}

/// Enhanced volume plus the per-slice masks and boxes it was built from.
#[derive(Debug, Clone)]
pub struct EnhancementResult {
    pub volume: Volume,
    pub masks: Vec<BoundingBoxMask>,
    pub rois: Vec<Roi>,
}

#[derive(Debug)]
pub enum EnhancementOutcome {
    Enhanced(EnhancementResult),
    /// Some slice failed; `result.volume` is the untouched input volume.
    Fallback {
        result: EnhancementResult,
        reason: EnhancementError,
    },
}

impl EnhancementOutcome {
    pub fn is_enhanced(&self) -> bool {
        matches!(self, Self::Enhanced(_))
    }

    pub fn result(&self) -> &EnhancementResult {
        match self {
            Self::Enhanced(result) | Self::Fallback { result, .. } => result,
        }
    }

    pub fn into_result(self) -> EnhancementResult {
        match self {
            Self::Enhanced(result) | Self::Fallback { result, .. } => result,
        }
    }
}

pub fn split_slice(slice: ArrayView2<'_, f32>, roi: Roi) -> SplitSlice {
    let (width, height) = slice.dim();
    let mask = BoundingBoxMask::new(roi, width, height);

    let mut focused = slice.to_owned();
    let mut unfocused = slice.to_owned();
    Zip::from(&mut focused)
        .and(&mut unfocused)
        .and(mask.view())
        .for_each(|f, u, &m| {
            if m == 1 {
                *u = 0.0;
            } else {
                *f = 0.0;
            }
        });

    SplitSlice {
        mask,
        focused,
        unfocused,
    }
}

/// Equalize the ROI of one slice and recombine it with the rest.
///
/// The equalized focused part is masked again before the sum: equalization
/// maps the zeroed border to non-zero grey levels.
pub fn enhance_slice(
    slice: ArrayView2<'_, f32>,
    roi: Roi,
    params: &ClaheParams,
    region: EqualizationRegion,
) -> Result<Array2<f32>, ClaheError> {
    let SplitSlice {
        mask,
        focused,
        unfocused,
    } = split_slice(slice, roi);
    let roi = mask.roi();

    let equalized = match region {
        EqualizationRegion::Padded => equalize_adapthist(focused.view(), params)?,
        EqualizationRegion::Cropped => {
            let mut equalized = Array2::zeros(focused.raw_dim());
            if !roi.is_empty() {
                let window = s![roi.xmin..roi.xmax, roi.ymin..roi.ymax];
                let crop = equalize_adapthist(focused.slice(window), params)?;
                equalized.slice_mut(window).assign(&crop);
            }
            equalized
        }
    };

    let mut recombined = unfocused;
    Zip::from(&mut recombined)
        .and(&equalized)
        .and(mask.view())
        .for_each(|out, &eq, &m| {
            if m == 1 {
                *out += eq;
            }
        });
    Ok(recombined)
}

/// Enhance every slice of `volume` inside its ROI.
///
/// Slices are processed in parallel but judged together: if any slice fails
/// the whole volume falls back to the unmodified input and the failure is
/// logged with the patient identifier.
pub fn enhance_volume(
    volume: &Volume,
    rois: &[Roi],
    config: &RaclaheConfig,
    patient: &str,
) -> EnhancementOutcome {
    let (slices, width, height) = volume.dim();
    let masks: Vec<BoundingBoxMask> = rois
        .iter()
        .map(|&roi| BoundingBoxMask::new(roi, width, height))
        .collect();

    let fallback = |reason: EnhancementError| {
        tracing::error!(patient, "enhancement failed, keeping unenhanced volume: {reason}");
        EnhancementOutcome::Fallback {
            result: EnhancementResult {
                volume: volume.clone(),
                masks: masks.clone(),
                rois: rois.to_vec(),
            },
            reason,
        }
    };

    if rois.len() != slices {
        return fallback(EnhancementError::RoiCountMismatch {
            rois: rois.len(),
            slices,
        });
    }

    let enhanced: Result<Vec<Array2<f32>>, EnhancementError> = (0..slices)
        .into_par_iter()
        .map(|index| {
            let roi = rois[index];
            if !roi.is_within(width, height) {
                return Err(EnhancementError::RoiOutOfBounds {
                    slice: index,
                    roi,
                    width,
                    height,
                });
            }
            let slice = volume.data().index_axis(Axis(0), index);
            enhance_slice(slice, roi, &config.clahe, config.equalization_region)
                .map_err(|source| EnhancementError::Equalization { slice: index, source })
        })
        .collect();

    match enhanced {
        Ok(enhanced) => {
            let mut data = Array3::<f32>::zeros((slices, width, height));
            for (index, slice) in enhanced.iter().enumerate() {
                data.slice_mut(s![index, .., ..]).assign(slice);
            }
            tracing::debug!(patient, slices, "volume enhanced");
            EnhancementOutcome::Enhanced(EnhancementResult {
                volume: volume.with_data(data),
                masks,
                rois: rois.to_vec(),
            })
        }
        Err(reason) => fallback(reason),
    }
}
