//! # RACLAHE library
//!
//! This crate serves a high-level API for region-adaptive contrast
//! enhancement of CT and MRI volumes.
//!
//! Contrast limited adaptive histogram equalization (CLAHE) is applied only
//! inside a rectangular region of interest (ROI) per slice, found by a
//! segmentation model. Everything outside the ROI is left exactly as it was.
//! The enhanced volume is written back in the format it came in: a DICOM
//! series keeps the metadata of its source files, a NIfTI image keeps its
//! spacing, origin and direction.
//!
//! Volumes are loaded from a patient directory holding either exactly one
//! NIfTI file or the ".dcm" files of a single series. Per volume the
//! pipeline:
//!  - puts the slice axis first (transposing once if needed)
//!  - resizes every slice to a square frame and min-max normalizes it
//!  - asks a [`RoiPredictor`] for a probability map per slice and derives a
//!    bounding box, falling back to the full frame per slice
//!  - equalizes the ROI and recombines it with the untouched remainder; if any
//!    slice fails the whole volume stays unenhanced
//!  - serializes the result as DICOM, else NIfTI, else a raw `.npy` array
//!
//!  Slices are enhanced in parallel using rayon. The ROI model is loaded once
//!  and shared by reference; an ONNX Runtime backend is available behind the
//!  `onnx` feature.
//!
//! # Examples
//!
//! ## Enhancing one patient
//!
//! Load a patient directory and enhance it with a model exported to ONNX.
//! The per-slice boxes come back as a [`MetadataRecord`].
//!
//! ```no_run
//! # #[cfg(feature = "onnx")]
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! # use raclahe::{RaclaheConfig, SortBy, VolumeLoader};
//! # use raclahe::{onnx_predictor::OnnxRoiPredictor, pipeline::process_patient};
//! # use std::path::Path;
//! let predictor = OnnxRoiPredictor::from_file("weights/unet.onnx")?;
//! let source = VolumeLoader::load_patient_directory("input/patient_001", SortBy::FileName)?;
//! let report = process_patient(
//!     "patient_001",
//!     &predictor,
//!     &source,
//!     Path::new("output"),
//!     &RaclaheConfig::default(),
//! )?;
//! println!("{}", report.metadata.to_json_pretty()?);
//! # Ok(())
//! # }
//! ```

pub mod clahe;
pub mod config;
pub mod dicom_writer;
pub mod enhancer;
pub mod enums;
mod interpolator;
pub mod metadata;
pub mod nifti_io;
#[cfg(feature = "onnx")]
pub mod onnx_predictor;
pub mod pipeline;
pub mod predictor;
pub mod preprocess;
pub mod preview;
pub mod roi;
pub mod serializer;
pub mod volume;
pub mod volume_loader;

pub use config::{ClaheParams, RaclaheConfig};
pub use enhancer::{EnhancementOutcome, enhance_volume};
pub use enums::{EqualizationRegion, Interpolation, SerializationTier, SortBy};
pub use metadata::MetadataRecord;
pub use pipeline::{ProcessingReport, RaclaheError, process_patient};
pub use predictor::{PredictorError, RoiInference, RoiPredictor};
pub use roi::{BoundingBoxMask, Roi};
pub use serializer::{SerializationOutcome, serialize_volume};
pub use volume::{ImageGeometry, SourceImageContext, SourceVolume, Volume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
