use crate::{
    enums::SortBy,
    nifti_io::{NiftiIoError, read_nifti},
    volume::{ImageGeometry, SourceImageContext, SourceVolume, Volume},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM or NIfTI images found")]
    NoValidImages,

    #[error("Directory mixes DICOM and NIfTI files")]
    MixedFormats,

    #[error("Found {0} NIfTI files, expected exactly one")]
    MultipleNifti(usize),

    #[error("Directory holds {0} DICOM series, expected exactly one")]
    MultipleSeries(usize),

    #[error("Could not decode pixel data of {0}")]
    UndecodableImage(PathBuf),

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] NiftiIoError),
}

/// Files of a patient directory, grouped by format
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub dicom: Vec<PathBuf>,
    pub nifti: Vec<PathBuf>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load the single image held by a patient directory.
    ///
    /// The directory must contain either exactly one NIfTI file or a non-empty
    /// set of DICOM files from one series.
    ///
    /// # Errors
    ///
    /// Returns an input format error for empty directories, mixed formats,
    /// several NIfTI files or several series.
    pub fn load_patient_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<SourceVolume, VolumeLoaderError> {
        let path = path.as_ref();
        let listing = Self::list_directory(path)?;

        match (listing.dicom.is_empty(), listing.nifti.len()) {
            (false, n) if n > 0 => Err(VolumeLoaderError::MixedFormats),
            (true, 0) => Err(VolumeLoaderError::NoValidImages),
            (true, 1) => Self::load_nifti(&listing.nifti[0]),
            (true, n) => Err(VolumeLoaderError::MultipleNifti(n)),
            (false, _) => Self::load_from_file_paths(path, &listing.dicom, sort_by),
        }
    }

    /// Sorted `.dcm` and `.nii`/`.nii.gz` files of a directory
    pub fn list_directory(path: impl AsRef<Path>) -> Result<DirectoryListing, VolumeLoaderError> {
        let mut listing = DirectoryListing::default();
        for entry in fs::read_dir(path.as_ref())? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.ends_with(".nii") || name.ends_with(".nii.gz") {
                listing.nifti.push(path);
            } else if path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            {
                listing.dicom.push(path);
            }
        }
        listing.dicom.sort();
        listing.nifti.sort();
        Ok(listing)
    }

    pub fn load_nifti(path: impl AsRef<Path>) -> Result<SourceVolume, VolumeLoaderError> {
        let (data, geometry) = read_nifti(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), dim = ?data.dim(), "loaded NIfTI volume");
        Ok(SourceVolume {
            volume: Volume::new(data),
            context: SourceImageContext::Image { geometry },
        })
    }

    /// Load a DICOM series from file paths.
    ///
    /// # Errors
    ///
    /// Returns error if no images decode, the files span several series or
    /// dimensions are inconsistent
    pub fn load_from_file_paths(
        directory: &Path,
        paths: &[PathBuf],
        sort_by: SortBy,
    ) -> Result<SourceVolume, VolumeLoaderError> {
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let objects = paths
            .iter()
            .map(|path| open_file(path).map(|object| (path.clone(), object)))
            .collect::<Result<Vec<_>, _>>()?;

        let series: BTreeSet<String> = objects
            .iter()
            .filter_map(|(_, object)| Self::element_str(object, tags::SERIES_INSTANCE_UID))
            .collect();
        if series.len() > 1 {
            return Err(VolumeLoaderError::MultipleSeries(series.len()));
        }

        let mut images_with_order = objects
            .iter()
            .map(|(path, object)| {
                let image = Self::decode_image(object)
                    .ok_or_else(|| VolumeLoaderError::UndecodableImage(path.clone()))?;
                let order = Self::get_sort_order(path, object, sort_by);
                Ok((order, path.clone(), image))
            })
            .collect::<Result<Vec<_>, VolumeLoaderError>>()?;

        Self::sort_images(&mut images_with_order, sort_by);

        let files: Vec<PathBuf> = images_with_order
            .iter()
            .map(|(_, path, _)| path.clone())
            .collect();
        let images: Vec<Array2<f32>> = images_with_order
            .into_iter()
            .map(|(_, _, image)| image)
            .collect();

        Self::validate_dimensions(&images)?;
        let volume_array = Self::build_volume_array(&images);

        let ordered: Vec<&FileDicomObject<InMemDicomObject>> = files
            .iter()
            .filter_map(|file| {
                objects
                    .iter()
                    .find(|(path, _)| path == file)
                    .map(|(_, object)| object)
            })
            .collect();
        let geometry = Self::get_geometry(&ordered);

        tracing::debug!(
            directory = %directory.display(),
            slices = files.len(),
            "loaded DICOM series"
        );

        Ok(SourceVolume {
            volume: Volume::new(volume_array),
            context: SourceImageContext::DicomSeries {
                directory: directory.to_path_buf(),
                files,
                geometry,
            },
        })
    }

    fn get_sort_order(
        path: &Path,
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> SortKey {
        match sort_by {
            SortBy::FileName => SortKey::Name(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            SortBy::ImagePositionPatient => SortKey::Number(
                Self::element_floats(dicom_object, tags::IMAGE_POSITION_PATIENT)
                    .and_then(|pos| pos.get(2).copied()),
            ),
            SortBy::TablePosition => SortKey::Number(
                Self::element_floats(dicom_object, tags::TABLE_POSITION)
                    .and_then(|pos| pos.first().copied()),
            ),
            SortBy::InstanceNumber => SortKey::Number(
                dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()
                    .and_then(|e| e.to_int::<i32>().ok())
                    .map(f64::from),
            ),
            SortBy::None => SortKey::Number(Some(0.0)),
        }
    }

    /// Decode the first frame with the modality LUT applied and no VOI LUT.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_images(images_with_order: &mut [(SortKey, PathBuf, Array2<f32>)], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            images_with_order
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            images_with_order.reverse();
        }
    }

    fn validate_dimensions(images: &[Array2<f32>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images.first().ok_or(VolumeLoaderError::NoValidImages)?.dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<f32>]) -> Array3<f32> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// Spacing, origin and direction of an ordered series.
    ///
    /// The slice spacing is the distance between the first two image
    /// positions, then SliceThickness, then 1.
    fn get_geometry(ordered: &[&FileDicomObject<InMemDicomObject>]) -> ImageGeometry {
        let mut geometry = ImageGeometry::default();
        let Some(first) = ordered.first() else {
            return geometry;
        };

        if let Some(pixel_spacing) =
            Self::element_floats(first, tags::PIXEL_SPACING).filter(|s| s.len() >= 2)
        {
            // PixelSpacing is (row spacing, column spacing)
            geometry.spacing[0] = pixel_spacing[1];
            geometry.spacing[1] = pixel_spacing[0];
        }

        let position =
            Self::element_floats(first, tags::IMAGE_POSITION_PATIENT).filter(|p| p.len() == 3);
        if let Some(position) = &position {
            geometry.origin = [position[0], position[1], position[2]];
        }

        if let Some(cosines) =
            Self::element_floats(first, tags::IMAGE_ORIENTATION_PATIENT).filter(|o| o.len() == 6)
        {
            let row = [cosines[0], cosines[1], cosines[2]];
            let col = [cosines[3], cosines[4], cosines[5]];
            let normal = [
                row[1] * col[2] - row[2] * col[1],
                row[2] * col[0] - row[0] * col[2],
                row[0] * col[1] - row[1] * col[0],
            ];
            for axis in 0..3 {
                geometry.direction[axis] = [row[axis], col[axis], normal[axis]];
            }
        }

        let next_position = ordered
            .get(1)
            .and_then(|next| Self::element_floats(next, tags::IMAGE_POSITION_PATIENT))
            .filter(|p| p.len() == 3);
        let slice_spacing = match (position, next_position) {
            (Some(a), Some(b)) => Some(
                ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2) + (b[2] - a[2]).powi(2)).sqrt(),
            ),
            _ => None,
        }
        .filter(|d| *d > 1e-6)
        .or_else(|| {
            first
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|e| e.to_float64().ok())
                .filter(|d| *d > 0.0)
        });
        if let Some(slice_spacing) = slice_spacing {
            geometry.spacing[2] = slice_spacing;
        }

        geometry
    }

    fn element_floats(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: dicom::core::Tag,
    ) -> Option<Vec<f64>> {
        dicom_object.element(tag).ok()?.to_multi_float64().ok()
    }

    fn element_str(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: dicom::core::Tag,
    ) -> Option<String> {
        dicom_object
            .element(tag)
            .ok()?
            .to_str()
            .ok()
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
    }
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum SortKey {
    Name(String),
    Number(Option<f64>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_directory_is_an_input_error() {
        let dir = tempdir().unwrap();
        let result = VolumeLoader::load_patient_directory(dir.path(), SortBy::default());
        assert!(matches!(result, Err(VolumeLoaderError::NoValidImages)));
    }

    #[test]
    fn mixed_formats_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.dcm"), b"").unwrap();
        fs::write(dir.path().join("b.nii.gz"), b"").unwrap();
        let result = VolumeLoader::load_patient_directory(dir.path(), SortBy::default());
        assert!(matches!(result, Err(VolumeLoaderError::MixedFormats)));
    }

    #[test]
    fn several_nifti_files_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.nii"), b"").unwrap();
        fs::write(dir.path().join("b.nii.gz"), b"").unwrap();
        let result = VolumeLoader::load_patient_directory(dir.path(), SortBy::default());
        assert!(matches!(result, Err(VolumeLoaderError::MultipleNifti(2))));
    }

    #[test]
    fn listing_sorts_and_ignores_other_files() {
        let dir = tempdir().unwrap();
        for name in ["b.dcm", "a.DCM", "notes.txt", "c.dcm"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let listing = VolumeLoader::list_directory(dir.path()).unwrap();
        let names: Vec<_> = listing
            .dicom
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.DCM", "b.dcm", "c.dcm"]);
        assert!(listing.nifti.is_empty());
    }
}
