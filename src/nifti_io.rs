use crate::volume::ImageGeometry;

use ndarray::{Array3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions, writer::WriterOptions};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NiftiIoError {
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Expected a 3D NIfTI volume, found {0} dimensions")]
    NotThreeDimensional(usize),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Read a NIfTI file into a slice-major `[z, y, x]` array and its geometry.
///
/// Trailing singleton dimensions (e.g. a one-frame time axis) are dropped.
/// The affine comes from the sform, else the qform, else pixdim alone, and
/// is converted from RAS to the LPS convention of [`ImageGeometry`].
pub fn read_nifti(path: impl AsRef<Path>) -> Result<(Array3<f32>, ImageGeometry), NiftiIoError> {
    let obj = ReaderOptions::new().read_file(path.as_ref())?;
    let geometry = geometry_from_header(obj.header());

    let mut volume = obj.into_volume().into_ndarray::<f32>()?;
    while volume.ndim() > 3 && volume.shape()[volume.ndim() - 1] == 1 {
        let last = volume.ndim() - 1;
        volume = volume.index_axis_move(Axis(last), 0);
    }
    if volume.ndim() != 3 {
        return Err(NiftiIoError::NotThreeDimensional(volume.ndim()));
    }

    // NIfTI indexes [x, y, z]; slices come first here
    let data = volume
        .into_dimensionality::<Ix3>()?
        .permuted_axes([2, 1, 0])
        .as_standard_layout()
        .into_owned();

    Ok((data, geometry))
}

/// Write a slice-major `[z, y, x]` array as NIfTI, gzip-compressed when the
/// path ends in `.gz`.
pub fn write_nifti(
    path: impl AsRef<Path>,
    data: &Array3<f32>,
    geometry: &ImageGeometry,
) -> Result<(), NiftiIoError> {
    let header = header_from_geometry(geometry);
    let array = data.view().permuted_axes([2, 1, 0]).as_standard_layout().into_owned();

    WriterOptions::new(path.as_ref())
        .reference_header(&header)
        .write_nifti(&array)?;
    Ok(())
}

fn geometry_from_header(header: &NiftiHeader) -> ImageGeometry {
    let affine = if header.sform_code > 0 {
        [header.srow_x, header.srow_y, header.srow_z]
    } else if header.qform_code > 0 {
        qform_affine(header)
    } else {
        let [_, dx, dy, dz, ..] = header.pixdim;
        [
            [dx, 0.0, 0.0, 0.0],
            [0.0, dy, 0.0, 0.0],
            [0.0, 0.0, dz, 0.0],
        ]
    };

    // RAS -> LPS
    let mut m = [[0.0_f64; 4]; 3];
    for (row, values) in affine.iter().enumerate() {
        let sign = if row < 2 { -1.0 } else { 1.0 };
        for (col, &v) in values.iter().enumerate() {
            m[row][col] = sign * v as f64;
        }
    }

    let mut geometry = ImageGeometry {
        origin: [m[0][3], m[1][3], m[2][3]],
        ..ImageGeometry::default()
    };
    for axis in 0..3 {
        let column = [m[0][axis], m[1][axis], m[2][axis]];
        let norm = column.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 1e-9 {
            geometry.spacing[axis] = norm;
            for row in 0..3 {
                geometry.direction[row][axis] = column[row] / norm;
            }
        }
    }
    geometry
}

fn qform_affine(header: &NiftiHeader) -> [[f32; 4]; 3] {
    let (b, c, d) = (header.quatern_b, header.quatern_c, header.quatern_d);
    let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
    let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] };

    let dx = header.pixdim[1];
    let dy = header.pixdim[2];
    let dz = header.pixdim[3] * qfac;

    [
        [
            (a * a + b * b - c * c - d * d) * dx,
            (2.0 * b * c - 2.0 * a * d) * dy,
            (2.0 * b * d + 2.0 * a * c) * dz,
            header.quatern_x,
        ],
        [
            (2.0 * b * c + 2.0 * a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            (2.0 * c * d - 2.0 * a * b) * dz,
            header.quatern_y,
        ],
        [
            (2.0 * b * d - 2.0 * a * c) * dx,
            (2.0 * c * d + 2.0 * a * b) * dy,
            (a * a + d * d - c * c - b * b) * dz,
            header.quatern_z,
        ],
    ]
}

fn header_from_geometry(geometry: &ImageGeometry) -> NiftiHeader {
    let mut rows = [[0.0_f32; 4]; 3];
    for (row, values) in rows.iter_mut().enumerate() {
        // LPS -> RAS
        let sign = if row < 2 { -1.0 } else { 1.0 };
        for axis in 0..3 {
            values[axis] = (sign * geometry.direction[row][axis] * geometry.spacing[axis]) as f32;
        }
        values[3] = (sign * geometry.origin[row]) as f32;
    }

    let mut pixdim = [1.0_f32; 8];
    for axis in 0..3 {
        pixdim[axis + 1] = geometry.spacing[axis] as f32;
    }

    NiftiHeader {
        pixdim,
        srow_x: rows[0],
        srow_y: rows[1],
        srow_z: rows[2],
        sform_code: 1,
        qform_code: 0,
        // millimetres
        xyzt_units: 2,
        ..NiftiHeader::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_voxels_and_geometry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volume.nii.gz");

        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let geometry = ImageGeometry {
            spacing: [0.5, 0.75, 3.0],
            origin: [-12.0, 30.5, 7.0],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        };
        write_nifti(&path, &data, &geometry).unwrap();

        let (read, read_geometry) = read_nifti(&path).unwrap();
        assert_eq!(read, data);
        for axis in 0..3 {
            assert!((read_geometry.spacing[axis] - geometry.spacing[axis]).abs() < 1e-5);
            assert!((read_geometry.origin[axis] - geometry.origin[axis]).abs() < 1e-4);
            assert!((read_geometry.direction[axis][axis] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn pixdim_only_header_yields_axis_aligned_geometry() {
        let header = NiftiHeader {
            pixdim: [1.0, 2.0, 2.0, 5.0, 1.0, 1.0, 1.0, 1.0],
            sform_code: 0,
            qform_code: 0,
            ..NiftiHeader::default()
        };
        let geometry = geometry_from_header(&header);
        assert_eq!(geometry.spacing, [2.0, 2.0, 5.0]);
        // x and y flip sign going from RAS to LPS
        assert_eq!(geometry.direction[0][0], -1.0);
        assert_eq!(geometry.direction[1][1], -1.0);
        assert_eq!(geometry.direction[2][2], 1.0);
    }
}
