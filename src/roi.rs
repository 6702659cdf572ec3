use ndarray::{Array2, ArrayView2, s};

/// Rectangular region of interest in slice-local coordinates.
///
/// `x` indexes the first slice axis and `y` the second. The box covers the
/// half-open rectangle `[xmin, xmax) x [ymin, ymax)`; a full-frame box of a
/// `W x H` slice is `(0, W, 0, H)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
}

impl Roi {
    pub fn new(xmin: usize, xmax: usize, ymin: usize, ymax: usize) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    pub fn full_frame(width: usize, height: usize) -> Self {
        Self::new(0, width, 0, height)
    }

    /// Force `0 <= xmin <= xmax <= width` and `0 <= ymin <= ymax <= height`.
    pub fn clamped(self, width: usize, height: usize) -> Self {
        let xmax = self.xmax.min(width);
        let ymax = self.ymax.min(height);
        Self {
            xmin: self.xmin.min(xmax),
            xmax,
            ymin: self.ymin.min(ymax),
            ymax,
        }
    }

    pub fn is_within(&self, width: usize, height: usize) -> bool {
        self.xmin <= self.xmax
            && self.xmax <= width
            && self.ymin <= self.ymax
            && self.ymax <= height
    }

    pub fn is_full_frame(&self, width: usize, height: usize) -> bool {
        *self == Self::full_frame(width, height)
    }

    /// True when the box covers no pixel.
    pub fn is_empty(&self) -> bool {
        self.xmin >= self.xmax || self.ymin >= self.ymax
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        (self.xmin..self.xmax).contains(&x) && (self.ymin..self.ymax).contains(&y)
    }

    pub fn width(&self) -> usize {
        self.xmax.saturating_sub(self.xmin)
    }

    pub fn height(&self) -> usize {
        self.ymax.saturating_sub(self.ymin)
    }

    /// Bounding box of the pixels of a probability map at or above
    /// `threshold`, grown by `margin` and clamped to the map.
    ///
    /// Returns `None` when no pixel survives thresholding.
    pub fn from_probability_map(
        probabilities: ArrayView2<'_, f32>,
        threshold: f32,
        margin: usize,
    ) -> Option<Self> {
        Self::bounding_box(probabilities, margin, |p| p >= threshold && p > 0.0)
    }

    /// Bounding box of the non-zero pixels of a label annotation, grown by
    /// `margin` and clamped to the mask.
    pub fn from_label_mask(labels: ArrayView2<'_, f32>, margin: usize) -> Option<Self> {
        Self::bounding_box(labels, margin, |v| v > 0.0)
    }

    fn bounding_box(
        values: ArrayView2<'_, f32>,
        margin: usize,
        is_foreground: impl Fn(f32) -> bool,
    ) -> Option<Self> {
        let (width, height) = values.dim();
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for ((x, y), &v) in values.indexed_iter() {
            if !is_foreground(v) {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, x, y, y),
                Some((xmin, xmax, ymin, ymax)) => {
                    (xmin.min(x), xmax.max(x), ymin.min(y), ymax.max(y))
                }
            });
        }
        let (xmin, xmax, ymin, ymax) = bounds?;
        Some(
            Self::new(
                xmin.saturating_sub(margin),
                xmax.saturating_add(margin),
                ymin.saturating_sub(margin),
                ymax.saturating_add(margin),
            )
            .clamped(width, height),
        )
    }
}

/// Binary mask of a slice: 1 inside the ROI, 0 elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBoxMask {
    roi: Roi,
    mask: Array2<u8>,
}

impl BoundingBoxMask {
    /// Build the mask of `roi` for a `width x height` slice. The ROI is
    /// clamped to the slice first.
    pub fn new(roi: Roi, width: usize, height: usize) -> Self {
        let roi = roi.clamped(width, height);
        let mut mask = Array2::<u8>::zeros((width, height));
        mask.slice_mut(s![roi.xmin..roi.xmax, roi.ymin..roi.ymax]).fill(1);
        Self { roi, mask }
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.mask.view()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn is_set(&self, x: usize, y: usize) -> bool {
        self.mask.get((x, y)).is_some_and(|&v| v == 1)
    }

    /// Number of pixels inside the ROI
    pub fn count(&self) -> usize {
        self.roi.width() * self.roi.height()
    }
}
