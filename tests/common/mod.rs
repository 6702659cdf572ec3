#![allow(dead_code)]

use dicom::core::{DataElement, PrimitiveValue, Tag, VR, dicom_value};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use ndarray::{Array2, ArrayView2, s};
use raclahe::{PredictorError, RoiPredictor};
use std::path::{Path, PathBuf};

pub const SERIES_UID: &str = "1.2.826.0.1.3680043.2.1125.1";
pub const PRIVATE_CREATOR: Tag = Tag(0x0009, 0x0010);
pub const PRIVATE_VALUE: Tag = Tag(0x0009, 0x1001);

/// Reports a square wherever the slice is bright at the square's centre,
/// nothing elsewhere.
pub struct SquarePredictor {
    pub rows: std::ops::Range<usize>,
    pub cols: std::ops::Range<usize>,
}

impl RoiPredictor for SquarePredictor {
    fn name(&self) -> &'static str {
        "square"
    }

    fn predict(&self, slice: ArrayView2<'_, f32>) -> Result<Array2<f32>, PredictorError> {
        let mut map = Array2::zeros(slice.raw_dim());
        let centre = [
            (self.rows.start + self.rows.end) / 2,
            (self.cols.start + self.cols.end) / 2,
        ];
        if slice[centre] > 0.7 {
            map.slice_mut(s![self.rows.clone(), self.cols.clone()]).fill(1.0);
        }
        Ok(map)
    }
}

pub struct FailingPredictor;

impl RoiPredictor for FailingPredictor {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn predict(&self, _slice: ArrayView2<'_, f32>) -> Result<Array2<f32>, PredictorError> {
        Err(PredictorError::Inference("model unavailable".to_string()))
    }
}

/// Stored value of pixel `(r, c)` in slice `index` of the synthetic series
pub fn stored_value(index: usize, r: usize, c: usize, cols: usize) -> u16 {
    (100 * (index + 1) + r * cols + c) as u16
}

/// Write a 12-bit CT series, one file per slice, named `slice_<NN>.dcm`.
pub fn write_ct_series(dir: &Path, slices: usize, rows: usize, cols: usize) -> Vec<PathBuf> {
    (0..slices)
        .map(|index| {
            let sop_instance_uid = format!("{SERIES_UID}.{}", index + 1);
            let pixels: Vec<u8> = (0..rows * cols)
                .flat_map(|i| stored_value(index, i / cols, i % cols, cols).to_le_bytes())
                .collect();

            let object = InMemDicomObject::from_element_iter([
                DataElement::new(
                    tags::SOP_CLASS_UID,
                    VR::UI,
                    PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
                ),
                DataElement::new(
                    tags::SOP_INSTANCE_UID,
                    VR::UI,
                    PrimitiveValue::from(sop_instance_uid.as_str()),
                ),
                DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
                DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Doe^Jane")),
                DataElement::new(
                    tags::SERIES_INSTANCE_UID,
                    VR::UI,
                    PrimitiveValue::from(SERIES_UID),
                ),
                DataElement::new(
                    tags::INSTANCE_NUMBER,
                    VR::IS,
                    PrimitiveValue::from((index + 1).to_string()),
                ),
                DataElement::new(
                    tags::IMAGE_POSITION_PATIENT,
                    VR::DS,
                    dicom_value!(Strs, [
                        "-10".to_string(),
                        "-20".to_string(),
                        format!("{}", index as f64 * 2.5)
                    ]),
                ),
                DataElement::new(
                    tags::IMAGE_ORIENTATION_PATIENT,
                    VR::DS,
                    dicom_value!(Strs, [
                        "1".to_string(),
                        "0".to_string(),
                        "0".to_string(),
                        "0".to_string(),
                        "1".to_string(),
                        "0".to_string()
                    ]),
                ),
                DataElement::new(
                    tags::PIXEL_SPACING,
                    VR::DS,
                    dicom_value!(Strs, ["0.5".to_string(), "0.75".to_string()]),
                ),
                DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
                DataElement::new(
                    tags::PHOTOMETRIC_INTERPRETATION,
                    VR::CS,
                    PrimitiveValue::from("MONOCHROME2"),
                ),
                DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows as u16)),
                DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(cols as u16)),
                DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(12_u16)),
                DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(11_u16)),
                DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
                DataElement::new(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::from("40")),
                DataElement::new(tags::WINDOW_WIDTH, VR::DS, PrimitiveValue::from("400")),
                DataElement::new(PRIVATE_CREATOR, VR::LO, PrimitiveValue::from("ACME")),
                DataElement::new(PRIVATE_VALUE, VR::LO, PrimitiveValue::from("secret")),
                DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(pixels)),
            ]);

            let file = object
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                        .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                        .media_storage_sop_instance_uid(sop_instance_uid.as_str()),
                )
                .unwrap();
            let path = dir.join(format!("slice_{:02}.dcm", index + 1));
            file.write_to_file(&path).unwrap();
            path
        })
        .collect()
}
