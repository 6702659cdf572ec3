//! Per-patient RACLAHE pipeline.

use crate::{
    config::RaclaheConfig,
    enums::SortBy,
    enhancer::{EnhancementOutcome, enhance_volume},
    metadata::MetadataRecord,
    predictor::{RoiInference, RoiPredictor, infer_rois},
    preprocess::{PreprocessError, preprocess_volume},
    preview::save_previews,
    roi::Roi,
    serializer::{SerializationError, SerializationOutcome, serialize_volume},
    volume::SourceVolume,
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaclaheError {
    #[error("Patient {patient}: could not read input: {source}")]
    Input {
        patient: String,
        #[source]
        source: VolumeLoaderError,
    },

    #[error("Patient {patient}: preprocessing failed: {source}")]
    Preprocess {
        patient: String,
        #[source]
        source: PreprocessError,
    },

    #[error("Patient {patient}: {source}")]
    Serialization {
        patient: String,
        #[source]
        source: SerializationError,
    },
}

/// What happened to one patient's volume.
#[derive(Debug)]
pub struct ProcessingReport {
    pub metadata: MetadataRecord,
    pub inferences: Vec<RoiInference>,
    pub enhancement: EnhancementOutcome,
    pub serialization: SerializationOutcome,
}

impl ProcessingReport {
    pub fn is_enhanced(&self) -> bool {
        self.enhancement.is_enhanced()
    }

    /// Number of slices whose box is the full-frame fallback
    pub fn fallback_slices(&self) -> usize {
        self.inferences.iter().filter(|i| i.is_fallback()).count()
    }
}

/// Run the whole pipeline on one patient's volume.
///
/// The volume is orientation-normalized and preprocessed, an ROI is inferred
/// for every slice, the ROIs are enhanced and the result is serialized under
/// `<output_dir>/RACLAHE OUTPUT/<patient>/`. ROI and enhancement failures
/// degrade; only preprocessing and running out of output tiers are errors.
pub fn process_patient<P: RoiPredictor + ?Sized>(
    patient: &str,
    predictor: &P,
    source: &SourceVolume,
    output_dir: &Path,
    config: &RaclaheConfig,
) -> Result<ProcessingReport, RaclaheError> {
    let normalized = source.volume.clone().normalize_orientation();
    let preprocessed = preprocess_volume(&normalized, config.target_size).map_err(|source| {
        RaclaheError::Preprocess {
            patient: patient.to_string(),
            source,
        }
    })?;
    tracing::debug!(
        patient,
        dim = ?preprocessed.dim(),
        transposed = preprocessed.is_transposed(),
        "preprocessed volume"
    );

    let inferences = infer_rois(predictor, &preprocessed, config, patient);
    let rois: Vec<Roi> = inferences.iter().map(|inference| inference.roi).collect();

    let enhancement = enhance_volume(&preprocessed, &rois, config, patient);
    let enhanced = &enhancement.result().volume;

    let serialization =
        serialize_volume(enhanced, &source.context, patient, output_dir).map_err(|source| {
            RaclaheError::Serialization {
                patient: patient.to_string(),
                source,
            }
        })?;

    if config.save_previews {
        if let Err(err) = save_previews(enhanced, &rois, &serialization.directory, patient) {
            tracing::warn!(patient, "could not write previews: {err}");
        }
    }

    let metadata = MetadataRecord::from_rois(patient, &rois);
    tracing::info!(
        patient,
        slices = metadata.len(),
        enhanced = enhancement.is_enhanced(),
        tier = serialization.tier.as_str(),
        "patient processed"
    );

    Ok(ProcessingReport {
        metadata,
        inferences,
        enhancement,
        serialization,
    })
}

/// Load a patient directory and run [`process_patient`] on it.
pub fn process_patient_directory<P: RoiPredictor + ?Sized>(
    patient: &str,
    predictor: &P,
    patient_dir: &Path,
    output_dir: &Path,
    config: &RaclaheConfig,
    sort_by: SortBy,
) -> Result<ProcessingReport, RaclaheError> {
    let source = VolumeLoader::load_patient_directory(patient_dir, sort_by).map_err(|source| {
        RaclaheError::Input {
            patient: patient.to_string(),
            source,
        }
    })?;
    process_patient(patient, predictor, &source, output_dir, config)
}
