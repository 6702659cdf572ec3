//! Persisting an enhanced volume.
//!
//! The tiers to try are planned up front from the source context: a DICOM
//! round-trip is only attempted when the volume still lines up slice for
//! file with its source series. Each failed tier is logged and recorded, and
//! the next one is tried; only running out of tiers is an error.

use crate::{
    dicom_writer::{DicomWriteError, write_dicom_series},
    enums::SerializationTier,
    nifti_io::{NiftiIoError, write_nifti},
    volume::{ImageGeometry, SourceImageContext, Volume},
};

use ndarray::Array3;
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Name of the directory created under the output directory.
pub const OUTPUT_DIR_NAME: &str = "RACLAHE OUTPUT";

#[derive(Debug, Error)]
pub enum TierError {
    #[error(transparent)]
    Dicom(#[from] DicomWriteError),

    #[error(transparent)]
    Nifti(#[from] NiftiIoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Could not create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Every serialization tier failed: {}", summarize(.attempts))]
    Exhausted { attempts: Vec<FailedAttempt> },
}

fn summarize(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.tier.as_str(), a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug)]
pub struct FailedAttempt {
    pub tier: SerializationTier,
    pub error: TierError,
}

/// The tier that persisted the volume, where it went and what failed first.
#[derive(Debug)]
pub struct SerializationOutcome {
    pub tier: SerializationTier,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub failed: Vec<FailedAttempt>,
}

impl SerializationOutcome {
    /// True when the first planned tier succeeded.
    pub fn is_preferred(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Output directory of one patient.
pub fn patient_output_dir(output_dir: &Path, patient: &str) -> PathBuf {
    output_dir.join(OUTPUT_DIR_NAME).join(patient)
}

/// Tiers to try, in order, for a volume coming from `context`.
pub fn plan_tiers(volume: &Volume, context: &SourceImageContext) -> Vec<SerializationTier> {
    let dicom_applicable = context
        .dicom_files()
        .is_some_and(|files| !volume.is_transposed() && files.len() == volume.len());

    let mut tiers = Vec::with_capacity(3);
    if dicom_applicable {
        tiers.push(SerializationTier::DicomSeries);
    }
    tiers.extend([SerializationTier::Nifti, SerializationTier::RawArray]);
    tiers
}

/// Persist `volume` under `<output_dir>/RACLAHE OUTPUT/<patient>/`.
pub fn serialize_volume(
    volume: &Volume,
    context: &SourceImageContext,
    patient: &str,
    output_dir: &Path,
) -> Result<SerializationOutcome, SerializationError> {
    let directory = patient_output_dir(output_dir, patient);
    fs::create_dir_all(&directory).map_err(|source| SerializationError::OutputDirectory {
        path: directory.clone(),
        source,
    })?;

    let mut failed = Vec::new();
    for tier in plan_tiers(volume, context) {
        match write_tier(tier, volume, context, patient, &directory) {
            Ok(files) => {
                tracing::info!(
                    patient,
                    tier = tier.as_str(),
                    files = files.len(),
                    "volume serialized"
                );
                return Ok(SerializationOutcome {
                    tier,
                    directory,
                    files,
                    failed,
                });
            }
            Err(error) => {
                tracing::warn!(patient, tier = tier.as_str(), "serialization tier failed: {error}");
                failed.push(FailedAttempt { tier, error });
            }
        }
    }

    tracing::error!(patient, "all serialization tiers failed");
    Err(SerializationError::Exhausted { attempts: failed })
}

fn write_tier(
    tier: SerializationTier,
    volume: &Volume,
    context: &SourceImageContext,
    patient: &str,
    directory: &Path,
) -> Result<Vec<PathBuf>, TierError> {
    match tier {
        SerializationTier::DicomSeries => {
            let files = context.dicom_files().unwrap_or_default();
            if let Some(source) = context.directory() {
                tracing::debug!(patient, source = %source.display(), "writing DICOM series");
            }
            Ok(write_dicom_series(files, volume, directory)?)
        }
        SerializationTier::Nifti => {
            let path = directory.join(format!("{patient}.nii.gz"));
            let (data, geometry) = source_aligned(volume, context.geometry());
            write_nifti(&path, &data, &geometry)?;
            Ok(vec![path])
        }
        SerializationTier::RawArray => {
            let path = directory.join(format!("{patient}.npy"));
            write_npy(&path, volume.data())?;
            Ok(vec![path])
        }
    }
}

/// Undo the orientation transpose and scale the source spacing to the
/// resolution the volume is written at.
pub fn source_aligned(volume: &Volume, geometry: &ImageGeometry) -> (Array3<f32>, ImageGeometry) {
    let data = if volume.is_transposed() {
        volume
            .data()
            .view()
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .into_owned()
    } else {
        volume.data().clone()
    };

    let (s0, s1, s2) = volume.source_dim();
    let (d0, d1, d2) = data.dim();
    let mut geometry = geometry.clone();
    // Array axis k is geometry axis 2 - k
    for (axis, (source, output)) in [(2, (s0, d0)), (1, (s1, d1)), (0, (s2, d2))] {
        if output > 0 {
            geometry.spacing[axis] *= source as f64 / output as f64;
        }
    }
    (data, geometry)
}

/// Write a little-endian `f32` array in NumPy `.npy` format, version 1.0.
pub fn write_npy(path: &Path, data: &Array3<f32>) -> std::io::Result<()> {
    let (d0, d1, d2) = data.dim();
    let mut header =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({d0}, {d1}, {d2}), }}");
    // magic (6) + version (2) + header length (2) + header + newline, padded to 64
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat(unpadded.next_multiple_of(64) - unpadded));
    header.push('\n');

    let mut writer = BufWriter::new(fs::File::create(path)?);
    writer.write_all(b"\x93NUMPY\x01\x00")?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for v in data.as_standard_layout().iter() {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dicom_context(files: usize) -> SourceImageContext {
        SourceImageContext::DicomSeries {
            directory: PathBuf::from("in"),
            files: (0..files).map(|i| PathBuf::from(format!("in/{i}.dcm"))).collect(),
            geometry: ImageGeometry::default(),
        }
    }

    #[test]
    fn plans_dicom_only_when_files_match_slices() {
        let volume = Volume::new(Array3::zeros((3, 8, 8))).normalize_orientation();
        assert_eq!(
            plan_tiers(&volume, &dicom_context(3)),
            [
                SerializationTier::DicomSeries,
                SerializationTier::Nifti,
                SerializationTier::RawArray
            ]
        );
        assert_eq!(
            plan_tiers(&volume, &dicom_context(4)),
            [SerializationTier::Nifti, SerializationTier::RawArray]
        );
        let image = SourceImageContext::Image {
            geometry: ImageGeometry::default(),
        };
        assert_eq!(plan_tiers(&volume, &image)[0], SerializationTier::Nifti);
    }

    #[test]
    fn transposed_volume_skips_dicom() {
        let volume = Volume::new(Array3::zeros((8, 8, 8))).normalize_orientation();
        assert!(volume.is_transposed());
        assert_eq!(plan_tiers(&volume, &dicom_context(8))[0], SerializationTier::Nifti);
    }

    #[test]
    fn failed_dicom_tier_falls_through_to_nifti() {
        let dir = tempdir().unwrap();
        let volume = Volume::new(Array3::from_elem((2, 4, 4), 0.5)).normalize_orientation();
        // Matching count, but the files do not exist
        let outcome = serialize_volume(&volume, &dicom_context(2), "p1", dir.path()).unwrap();
        assert_eq!(outcome.tier, SerializationTier::Nifti);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].tier, SerializationTier::DicomSeries);
        assert!(!outcome.is_preferred());
        assert!(dir.path().join("RACLAHE OUTPUT/p1/p1.nii.gz").is_file());
        assert!(!dir.path().join("RACLAHE OUTPUT/p1/image_1.dcm").exists());
    }

    #[test]
    fn aligned_geometry_undoes_transpose_and_scales_spacing() {
        let source = Volume::new(Array3::zeros((64, 32, 4))).normalize_orientation();
        // Enhanced at a 16x16 target: (4, 32, 64) -> (4, 16, 16)
        let enhanced = source.with_data(Array3::zeros((4, 16, 16)));
        let geometry = ImageGeometry {
            spacing: [1.0, 2.0, 3.0],
            ..ImageGeometry::default()
        };
        let (data, aligned) = source_aligned(&enhanced, &geometry);
        assert_eq!(data.dim(), (16, 16, 4));
        assert_eq!(aligned.spacing, [1.0, 4.0, 12.0]);
    }

    #[test]
    fn npy_header_is_aligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.npy");
        write_npy(&path, &Array3::from_elem((2, 3, 4), 1.5)).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..6], b"\x93NUMPY");
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes.len(), 10 + header_len + 24 * 4);
        assert_eq!(&bytes[10 + header_len..10 + header_len + 4], &1.5f32.to_le_bytes());
    }
}
