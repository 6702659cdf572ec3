use crate::{preprocess::min_max, roi::Roi, volume::Volume};

use image::{ImageBuffer, ImageError, Luma};
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

pub type PreviewImage = ImageBuffer<Luma<u8>, Vec<u8>>;

/// Render a slice as an 8-bit greyscale image stretched to its own range.
pub fn slice_to_image(slice: &ArrayView2<'_, f32>) -> Option<PreviewImage> {
    let (height, width) = slice.dim();
    let (min, max) = min_max(slice);
    let range = if max > min { max - min } else { 1.0 };
    let pixel_data: Vec<u8> = slice
        .iter()
        .map(|&v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}

/// Draw the one-pixel outline of `roi` in white.
///
/// `x` runs along image rows and `y` along columns, as in the volume.
pub fn outline_roi(image: &mut PreviewImage, roi: Roi) {
    let (width, height) = image.dimensions();
    let roi = roi.clamped(height as usize, width as usize);
    if roi.is_empty() {
        return;
    }
    let (x_last, y_last) = (roi.xmax - 1, roi.ymax - 1);
    for y in roi.ymin..roi.ymax {
        image.put_pixel(y as u32, roi.xmin as u32, Luma([255]));
        image.put_pixel(y as u32, x_last as u32, Luma([255]));
    }
    for x in roi.xmin..roi.xmax {
        image.put_pixel(roi.ymin as u32, x as u32, Luma([255]));
        image.put_pixel(y_last as u32, x as u32, Luma([255]));
    }
}

/// Write `<patient>_slice_<NN>.png` for every slice, with its ROI outlined.
pub fn save_previews(
    volume: &Volume,
    rois: &[Roi],
    directory: &Path,
    patient: &str,
) -> Result<Vec<PathBuf>, ImageError> {
    let slices: Vec<_> = volume.data().axis_iter(Axis(0)).collect();
    slices
        .into_par_iter()
        .enumerate()
        .filter_map(|(index, slice)| {
            let mut image = slice_to_image(&slice)?;
            if let Some(&roi) = rois.get(index) {
                outline_roi(&mut image, roi);
            }
            Some((index, image))
        })
        .map(|(index, image)| {
            let path = directory.join(format!("{patient}_slice_{index:02}.png"));
            image.save(&path)?;
            Ok(path)
        })
        .collect()
}
