use crate::enums::Interpolation;

use ndarray::{Array2, ArrayView2};

pub(crate) struct Interpolator;

impl Interpolator {
    /// Resample a slice to `(rows, cols)`.
    ///
    /// Uses pixel-center alignment: output pixel `(y, x)` samples the source
    /// at `((y + 0.5) * in / out - 0.5, (x + 0.5) * in / out - 0.5)`.
    pub(crate) fn resize(
        slice: &ArrayView2<f32>,
        rows: usize,
        cols: usize,
        interpolation: Interpolation,
    ) -> Array2<f32> {
        let (slice_height, slice_width) = slice.dim();
        if slice_height == 0 || slice_width == 0 {
            return Array2::zeros((rows, cols));
        }
        if (slice_height, slice_width) == (rows, cols) {
            return slice.to_owned();
        }

        let scale_y = slice_height as f32 / rows as f32;
        let scale_x = slice_width as f32 / cols as f32;

        match interpolation {
            Interpolation::Bilinear => Array2::from_shape_fn((rows, cols), |(y, x)| {
                let src_y = (y as f32 + 0.5) * scale_y - 0.5;
                let src_x = (x as f32 + 0.5) * scale_x - 0.5;

                // Clamp to valid range
                let src_y = src_y.max(0.0).min((slice_height - 1) as f32);
                let src_x = src_x.max(0.0).min((slice_width - 1) as f32);

                Self::bilinear_interpolate(slice, src_y, src_x)
            }),
            Interpolation::NearestNeighbor => Array2::from_shape_fn((rows, cols), |(y, x)| {
                let src_y = ((y as f32 * scale_y) as usize).min(slice_height - 1);
                let src_x = ((x as f32 * scale_x) as usize).min(slice_width - 1);
                slice[[src_y, src_x]]
            }),
        }
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }
}
