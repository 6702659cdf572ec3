//! ONNX Runtime backed ROI predictor.
//!
//! The model is a single-output U-Net exported to ONNX. It takes an NHWC
//! tensor `[1, S, S, 1]` of a normalized slice and returns a sigmoid
//! foreground probability map of the same spatial size (`[1, S, S, 1]` or
//! `[1, S, S]`).

use crate::predictor::{PredictorError, RoiPredictor};

use ndarray::{Array2, ArrayView2};
use ort::{session::Session, value::TensorRef};
use std::{path::Path, sync::Mutex};

pub struct OnnxRoiPredictor {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxRoiPredictor {
    /// Load the model weights once; the predictor is then shared across volumes.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PredictorError> {
        let path = path.as_ref();
        let load_error = |e: ort::Error| PredictorError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(load_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PredictorError::Load {
                path: path.to_path_buf(),
                message: "model declares no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PredictorError::Load {
                path: path.to_path_buf(),
                message: "model declares no outputs".to_string(),
            })?;

        tracing::info!(
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            "loaded ONNX ROI model"
        );
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl RoiPredictor for OnnxRoiPredictor {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn predict(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<f32>, PredictorError> {
        let (rows, cols) = slice.dim();
        let input = slice.as_standard_layout();
        let data = input
            .as_slice()
            .ok_or_else(|| PredictorError::Inference("slice is not contiguous".to_string()))?;
        let dims = vec![1_i64, rows as i64, cols as i64, 1];
        let tensor = TensorRef::from_array_view((dims, data))
            .map_err(|e| PredictorError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PredictorError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| PredictorError::Inference(e.to_string()))?;

        let (shape, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictorError::Inference(e.to_string()))?;
        if values.len() != rows * cols {
            let spatial: Vec<i64> = shape.iter().copied().filter(|&d| d != 1).collect();
            let actual = match spatial.as_slice() {
                [r, c] => (*r as usize, *c as usize),
                _ => (values.len(), 1),
            };
            return Err(PredictorError::ShapeMismatch {
                expected: (rows, cols),
                actual,
            });
        }

        Array2::from_shape_vec((rows, cols), values.to_vec())
            .map_err(|e| PredictorError::Inference(e.to_string()))
    }
}
