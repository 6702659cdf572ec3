//! DICOM series round-trip writer.
//!
//! Slice `i` of the enhanced volume is written next to the metadata of the
//! `i`-th source file, with its intensities mapped back into the value range
//! and pixel format of the source slice.

use crate::{preprocess::min_max, volume::Volume};

use dicom::{
    core::{DataElement, PrimitiveValue, VR, dicom_value},
    object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
    transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN,
};
use dicom_dictionary_std::{StandardDataDictionary, tags};
use ndarray::{Array2, ArrayView2, Axis, s};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DicomWriteError {
    #[error("{files} source files for {slices} slices")]
    SliceCountMismatch { files: usize, slices: usize },

    #[error("{rows}x{cols} frames do not fit the 16-bit Rows/Columns attributes")]
    FrameTooLarge { rows: usize, cols: usize },

    #[error("Volume was transposed; its slices no longer match the source files")]
    Transposed,

    #[error("{path}: unsupported pixel format ({bits_allocated} bits allocated)")]
    UnsupportedPixelFormat { path: PathBuf, bits_allocated: u16 },

    #[error("{path}: missing attribute {name}")]
    MissingAttribute { path: PathBuf, name: &'static str },

    #[error("{path}: could not decode source pixels: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Could not build file meta group: {0}")]
    Meta(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM read error: {0}")]
    Read(#[from] dicom::object::ReadError),

    #[error("DICOM write error: {0}")]
    Write(#[from] dicom::object::WriteError),
}

/// Stored pixel layout of a source slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub signed: bool,
}

impl PixelFormat {
    fn from_object(
        path: &Path,
        object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<Self, DicomWriteError> {
        let read_u16 = |tag| object.element(tag).ok().and_then(|e| e.to_int::<u16>().ok());

        let bits_allocated =
            read_u16(tags::BITS_ALLOCATED).ok_or_else(|| DicomWriteError::MissingAttribute {
                path: path.to_path_buf(),
                name: "BitsAllocated",
            })?;
        if !matches!(bits_allocated, 8 | 16 | 32) {
            return Err(DicomWriteError::UnsupportedPixelFormat {
                path: path.to_path_buf(),
                bits_allocated,
            });
        }
        let bits_stored = read_u16(tags::BITS_STORED)
            .filter(|&bits| bits > 0 && bits <= bits_allocated)
            .unwrap_or(bits_allocated);
        let signed = read_u16(tags::PIXEL_REPRESENTATION) == Some(1);

        Ok(Self {
            bits_allocated,
            bits_stored,
            signed,
        })
    }

    /// Smallest and largest representable stored value.
    pub fn value_range(&self) -> (f64, f64) {
        let bits = i32::from(self.bits_stored);
        if self.signed {
            (-(2f64.powi(bits - 1)), 2f64.powi(bits - 1) - 1.0)
        } else {
            (0.0, 2f64.powi(bits) - 1.0)
        }
    }

    /// Round, clamp and serialize a slice as little-endian pixel data.
    pub fn encode(&self, slice: ArrayView2<'_, f32>) -> Vec<u8> {
        let (low, high) = self.value_range();
        let bytes_per_pixel = usize::from(self.bits_allocated / 8);
        let mut bytes = Vec::with_capacity(slice.len() * bytes_per_pixel);

        for &v in slice.iter() {
            let v = f64::from(v).round().clamp(low, high);
            match (self.bits_allocated, self.signed) {
                (8, false) => bytes.push(v as u8),
                (8, true) => bytes.extend_from_slice(&(v as i8).to_le_bytes()),
                (16, false) => bytes.extend_from_slice(&(v as u16).to_le_bytes()),
                (16, true) => bytes.extend_from_slice(&(v as i16).to_le_bytes()),
                (_, false) => bytes.extend_from_slice(&(v as u32).to_le_bytes()),
                (_, true) => bytes.extend_from_slice(&(v as i32).to_le_bytes()),
            }
        }
        // Pixel data must have an even length
        if bytes.len() % 2 == 1 {
            bytes.push(0);
        }
        bytes
    }

    fn vr(&self) -> VR {
        if self.bits_allocated > 8 { VR::OW } else { VR::OB }
    }
}

/// Map `slice` linearly from its own `[min, max]` onto `target`.
///
/// The local minimum lands on `target.0` and the local maximum on `target.1`.
/// A constant slice maps to `target.0`.
pub fn rescale_to_range(slice: ArrayView2<'_, f32>, target: (f32, f32)) -> Array2<f32> {
    let (min, max) = min_max(&slice);
    let (low, high) = target;
    if !(max > min) {
        return Array2::from_elem(slice.raw_dim(), low);
    }
    let scale = (high - low) / (max - min);
    slice.mapv(|v| (v - min).mul_add(scale, low))
}

/// Write `volume` as a DICOM series into `output_dir`, one `image_<n>.dcm`
/// per slice, pairing slice `i` with `source_files[i]`.
///
/// Files written before a failure are removed again.
pub fn write_dicom_series(
    source_files: &[PathBuf],
    volume: &Volume,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, DicomWriteError> {
    if volume.is_transposed() {
        return Err(DicomWriteError::Transposed);
    }
    if source_files.len() != volume.len() {
        return Err(DicomWriteError::SliceCountMismatch {
            files: source_files.len(),
            slices: volume.len(),
        });
    }
    let (_, rows, cols) = volume.dim();
    frame_size(rows, cols)?;

    fs::create_dir_all(output_dir)?;
    let mut written = Vec::with_capacity(source_files.len());
    for (index, (source, slice)) in source_files
        .iter()
        .zip(volume.data().axis_iter(Axis(0)))
        .enumerate()
    {
        let path = output_dir.join(format!("image_{}.dcm", index + 1));
        if let Err(err) = write_slice(source, slice, index, &path) {
            remove_files(written.iter().chain(std::iter::once(&path)));
            return Err(err);
        }
        written.push(path);
    }

    Ok(written)
}

/// Rows and Columns as stored in the `US` attributes
fn frame_size(rows: usize, cols: usize) -> Result<(u16, u16), DicomWriteError> {
    match (u16::try_from(rows), u16::try_from(cols)) {
        (Ok(r), Ok(c)) => Ok((r, c)),
        _ => Err(DicomWriteError::FrameTooLarge { rows, cols }),
    }
}

fn write_slice(
    source_path: &Path,
    slice: ArrayView2<'_, f32>,
    index: usize,
    path: &Path,
) -> Result<(), DicomWriteError> {
    let source = open_file(source_path)?;
    let format = PixelFormat::from_object(source_path, &source)?;
    let original = decode_stored_values(source_path, &source)?;
    let (original_min, original_max) = min_max(&original.view());

    let rescaled = rescale_to_range(slice, (original_min, original_max));
    let pixel_bytes = format.encode(rescaled.view());

    let mut object = InMemDicomObject::new_empty();
    for element in source.iter() {
        let tag = element.header().tag;
        // Odd groups are private; group 2 is the file meta group
        if tag.group() % 2 == 1 || tag.group() == 0x0002 || tag == tags::PIXEL_DATA {
            continue;
        }
        object.put(element.clone());
    }

    let (rows, cols) = slice.dim();
    let (source_rows, source_cols) = original.dim();
    let (stored_rows, stored_cols) = frame_size(rows, cols)?;
    let sop_instance_uid = generate_uid();

    object.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(stored_rows)));
    object.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(stored_cols)));
    if let Some(spacing) = source
        .element(tags::PIXEL_SPACING)
        .ok()
        .and_then(|e| e.to_multi_float64().ok())
        .filter(|s| s.len() >= 2)
    {
        let row_spacing = spacing[0] * source_rows as f64 / rows as f64;
        let col_spacing = spacing[1] * source_cols as f64 / cols as f64;
        object.put(DataElement::new(
            tags::PIXEL_SPACING,
            VR::DS,
            dicom_value!(Strs, [format_ds(row_spacing), format_ds(col_spacing)]),
        ));
    }
    object.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance_uid.as_str()),
    ));
    object.put(DataElement::new(
        tags::INSTANCE_NUMBER,
        VR::IS,
        PrimitiveValue::from((index + 1).to_string()),
    ));
    object.put(DataElement::new(
        tags::PIXEL_DATA,
        format.vr(),
        PrimitiveValue::from(pixel_bytes),
    ));

    let sop_class_uid = source
        .meta()
        .media_storage_sop_class_uid()
        .trim_end_matches('\0')
        .to_string();
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid(sop_class_uid)
        .media_storage_sop_instance_uid(sop_instance_uid)
        .build()
        .map_err(|e| DicomWriteError::Meta(e.to_string()))?;

    let mut file_object =
        FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for element in object {
        file_object.put(element);
    }
    file_object.write_to_file(path)?;

    tracing::trace!(path = %path.display(), original_min, original_max, "wrote DICOM slice");
    Ok(())
}

/// Stored values of the first frame, without modality or VOI LUT.
fn decode_stored_values(
    path: &Path,
    object: &FileDicomObject<InMemDicomObject>,
) -> Result<Array2<f32>, DicomWriteError> {
    let decode_error = |message: String| DicomWriteError::Decode {
        path: path.to_path_buf(),
        message,
    };
    let pixel_data = object.decode_pixel_data().map_err(|e| decode_error(e.to_string()))?;
    let options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::None)
        .with_voi_lut(VoiLutOption::Identity);
    let array = pixel_data
        .to_ndarray_with_options::<f32>(&options)
        .map_err(|e| decode_error(e.to_string()))?;
    Ok(array.slice_move(s![0, .., .., 0]))
}

/// Random UUID-derived UID under the `2.25` root.
fn generate_uid() -> String {
    format!("2.25.{}", rand::random::<u128>())
}

/// Decimal string short enough for the DS value representation.
fn format_ds(value: f64) -> String {
    let mut text = format!("{value:.6}");
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    text.truncate(16);
    text
}

fn remove_files<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        if path.exists() {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), "could not remove partial output: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rescale_hits_both_endpoints() {
        let slice = array![[0.2_f32, 0.5], [0.9, 0.3]];
        let out = rescale_to_range(slice.view(), (-1024.0, 3071.0));
        assert!((out[[0, 0]] + 1024.0).abs() < 1e-3);
        assert!((out[[1, 0]] - 3071.0).abs() < 1e-3);
        assert!(out.iter().all(|&v| (-1024.0..=3071.0).contains(&v)));
    }

    #[test]
    fn encoded_endpoints_are_within_one_step() {
        let slice = array![[0.0_f32, 0.25], [0.75, 1.0]];
        let format = PixelFormat {
            bits_allocated: 16,
            bits_stored: 12,
            signed: false,
        };
        let bytes = format.encode(rescale_to_range(slice.view(), (17.0, 4000.0)).view());
        let values: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values.len(), 4);
        assert!(values[0].abs_diff(17) <= 1);
        assert!(values[3].abs_diff(4000) <= 1);
    }

    #[test]
    fn constant_slice_maps_to_lower_bound() {
        let slice = Array2::from_elem((3, 3), 0.4_f32);
        let out = rescale_to_range(slice.view(), (100.0, 200.0));
        assert!(out.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn values_clamp_to_bits_stored() {
        let format = PixelFormat {
            bits_allocated: 16,
            bits_stored: 12,
            signed: true,
        };
        assert_eq!(format.value_range(), (-2048.0, 2047.0));
        let bytes = format.encode(array![[-5000.0_f32, 5000.0]].view());
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), -2048);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 2047);
    }

    #[test]
    fn eight_bit_data_is_padded_to_even_length() {
        let format = PixelFormat {
            bits_allocated: 8,
            bits_stored: 8,
            signed: false,
        };
        let bytes = format.encode(array![[1.0_f32, 2.0, 255.4]].view());
        assert_eq!(bytes, vec![1, 2, 255, 0]);
        assert_eq!(format.vr(), VR::OB);
    }

    #[test]
    fn ds_strings_fit_the_value_representation() {
        assert_eq!(format_ds(0.5), "0.5");
        assert_eq!(format_ds(2.0), "2");
        assert!(format_ds(123_456_789.123_456).len() <= 16);
    }

    #[test]
    fn refuses_mismatched_slice_count() {
        let volume = Volume::new(ndarray::Array3::zeros((3, 4, 4)));
        let dir = tempfile::tempdir().unwrap();
        let result = write_dicom_series(&[PathBuf::from("a.dcm")], &volume, dir.path());
        assert!(matches!(
            result,
            Err(DicomWriteError::SliceCountMismatch { files: 1, slices: 3 })
        ));
    }

    #[test]
    fn refuses_frames_wider_than_sixteen_bits() {
        let volume = Volume::new(ndarray::Array3::zeros((1, 2, 70_000)));
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("series");
        let result = write_dicom_series(&[PathBuf::from("a.dcm")], &volume, &output);
        assert!(matches!(
            result,
            Err(DicomWriteError::FrameTooLarge {
                rows: 2,
                cols: 70_000
            })
        ));
        assert!(!output.exists());
    }

    #[test]
    fn frame_size_accepts_the_sixteen_bit_limit() {
        assert_eq!(frame_size(512, 65_535).unwrap(), (512, 65_535));
        assert!(frame_size(65_536, 1).is_err());
    }
}
