use crate::{config::RaclaheConfig, roi::Roi, volume::Volume};

use ndarray::{Array2, ArrayView2, Axis};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("Failed to load predictor weights from {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Predictor returned a {actual:?} map for a {expected:?} slice")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Segmentation model that locates the region of interest of a slice.
///
/// Implementations receive one preprocessed single-channel slice at the
/// target resolution and return a foreground probability map of the same
/// shape. A predictor is built once and shared by reference across volumes.
pub trait RoiPredictor: Send + Sync {
    /// Returns the backend identifier (e.g. "onnx")
    fn name(&self) -> &'static str;

    fn predict(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<f32>, PredictorError>;
}

/// How a slice's ROI was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiSource {
    Predicted,
    /// Nothing survived thresholding; full frame used
    EmptyForeground,
    /// The predictor errored; full frame used
    PredictorFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiInference {
    pub roi: Roi,
    pub source: RoiSource,
}

impl RoiInference {
    pub fn is_fallback(&self) -> bool {
        self.source != RoiSource::Predicted
    }
}

/// Locate the ROI of one slice, falling back to the full frame when the
/// predictor fails or finds no foreground.
pub fn infer_roi<P: RoiPredictor + ?Sized>(
    predictor: &P,
    slice: ArrayView2<'_, f32>,
    threshold: f32,
    margin: usize,
) -> Result<RoiInference, PredictorError> {
    let (width, height) = slice.dim();
    let probabilities = predictor.predict(slice)?;
    if probabilities.dim() != (width, height) {
        return Err(PredictorError::ShapeMismatch {
            expected: (width, height),
            actual: probabilities.dim(),
        });
    }

    Ok(
        match Roi::from_probability_map(probabilities.view(), threshold, margin) {
            Some(roi) => RoiInference {
                roi,
                source: RoiSource::Predicted,
            },
            None => RoiInference {
                roi: Roi::full_frame(width, height),
                source: RoiSource::EmptyForeground,
            },
        },
    )
}

/// Run ROI inference on every slice, in ascending slice order.
///
/// Each slice falls back on its own: a failing slice gets the full-frame box
/// and its neighbours are unaffected.
pub fn infer_rois<P: RoiPredictor + ?Sized>(
    predictor: &P,
    volume: &Volume,
    config: &RaclaheConfig,
    patient: &str,
) -> Vec<RoiInference> {
    volume
        .data()
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(index, slice)| {
            let (width, height) = slice.dim();
            infer_roi(predictor, slice, config.threshold, config.roi_margin).unwrap_or_else(|err| {
                tracing::warn!(
                    patient,
                    slice = index,
                    predictor = predictor.name(),
                    "ROI prediction failed, using full frame: {err}"
                );
                RoiInference {
                    roi: Roi::full_frame(width, height),
                    source: RoiSource::PredictorFailed,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, s};

    /// Marks a fixed square on even slices, errors on slice index 3.
    struct PatternPredictor;

    impl RoiPredictor for PatternPredictor {
        fn name(&self) -> &'static str {
            "pattern"
        }

        fn predict(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<f32>, PredictorError> {
            // The slice index is encoded in the first pixel
            let index = slice[[0, 0]] as usize;
            if index == 3 {
                return Err(PredictorError::Inference("boom".into()));
            }
            let mut map = Array2::zeros(slice.raw_dim());
            if index % 2 == 0 {
                map.slice_mut(s![4..8, 2..6]).fill(1.0);
            }
            Ok(map)
        }
    }

    struct WrongShapePredictor;

    impl RoiPredictor for WrongShapePredictor {
        fn name(&self) -> &'static str {
            "wrong-shape"
        }

        fn predict(&self, _slice: ArrayView2<'_, f32>) -> Result<Array2<f32>, PredictorError> {
            Ok(Array2::ones((3, 3)))
        }
    }

    #[test]
    fn fallback_is_applied_per_slice() {
        let data = Array3::from_shape_fn((5, 16, 12), |(z, _, _)| z as f32);
        let volume = Volume::new(data);
        let rois = infer_rois(&PatternPredictor, &volume, &RaclaheConfig::default(), "p1");

        assert_eq!(rois.len(), 5);
        assert_eq!(rois[0].roi, Roi::new(4, 7, 2, 5));
        assert_eq!(rois[0].source, RoiSource::Predicted);
        assert_eq!(rois[1].roi, Roi::full_frame(16, 12));
        assert_eq!(rois[1].source, RoiSource::EmptyForeground);
        assert_eq!(rois[2].source, RoiSource::Predicted);
        assert_eq!(rois[3].roi, Roi::full_frame(16, 12));
        assert_eq!(rois[3].source, RoiSource::PredictorFailed);
        assert_eq!(rois[4].roi, Roi::new(4, 7, 2, 5));
    }

    #[test]
    fn mismatched_probability_map_is_an_error() {
        let slice = Array2::<f32>::zeros((8, 8));
        let result = infer_roi(&WrongShapePredictor, slice.view(), 0.35, 0);
        assert!(matches!(result, Err(PredictorError::ShapeMismatch { .. })));
    }
}
