use ndarray::Array3;
use std::path::{Path, PathBuf};

/// Physical placement of a volume.
///
/// All three arrays are in index-axis order (column, row, slice) and use the
/// DICOM patient coordinate convention (LPS).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// Row-major matrix whose columns are the directions of the index axes
    pub direction: [[f64; 3]; 3],
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

/// Where a volume came from, kept for round-trip metadata only.
#[derive(Debug, Clone)]
pub enum SourceImageContext {
    /// One file per slice, in the order the slices were loaded
    DicomSeries {
        directory: PathBuf,
        files: Vec<PathBuf>,
        geometry: ImageGeometry,
    },
    /// A single volumetric image (NIfTI or an in-memory array)
    Image { geometry: ImageGeometry },
}

impl SourceImageContext {
    pub fn geometry(&self) -> &ImageGeometry {
        match self {
            Self::DicomSeries { geometry, .. } | Self::Image { geometry } => geometry,
        }
    }

    /// Ordered source files of a DICOM series, if the volume came from one.
    pub fn dicom_files(&self) -> Option<&[PathBuf]> {
        match self {
            Self::DicomSeries { files, .. } => Some(files),
            Self::Image { .. } => None,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        match self {
            Self::DicomSeries { directory, .. } => Some(directory),
            Self::Image { .. } => None,
        }
    }
}

/// A freshly read volume together with its source context
#[derive(Debug, Clone)]
pub struct SourceVolume {
    pub volume: Volume,
    pub context: SourceImageContext,
}

/// Slice-major intensity volume `[slice, row, col]`.
///
/// Besides the voxels a volume remembers the shape it was read with and
/// whether orientation normalization transposed it, so writers can map the
/// processed array back onto the source geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    source_dim: (usize, usize, usize),
    normalized: bool,
    transposed: bool,
}

impl Volume {
    pub fn new(data: Array3<f32>) -> Self {
        let source_dim = data.dim();
        Self {
            data,
            source_dim,
            normalized: false,
            transposed: false,
        }
    }

    /// Get the dimensions of the volume (slices, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of slices along the slice axis
    pub fn len(&self) -> usize {
        self.data.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Shape of the array as it was read from the source
    pub fn source_dim(&self) -> (usize, usize, usize) {
        self.source_dim
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// Whether normalization swapped the first and last axes
    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    /// Replace the voxels while keeping provenance.
    pub fn with_data(&self, data: Array3<f32>) -> Self {
        Self {
            data,
            source_dim: self.source_dim,
            normalized: self.normalized,
            transposed: self.transposed,
        }
    }

    /// Make the slice axis the smallest dimension.
    ///
    /// If the first axis is not strictly smaller than the other two the axes
    /// are transposed to (2, 1, 0), once. A volume that went through this
    /// before is returned as is, which makes the operation idempotent for
    /// every shape.
    pub fn normalize_orientation(mut self) -> Self {
        if self.normalized {
            return self;
        }
        if !Self::has_leading_slice_axis(self.data.dim()) {
            tracing::debug!(dim = ?self.data.dim(), "transposing to put the slice axis first");
            self.data = self
                .data
                .permuted_axes([2, 1, 0])
                .as_standard_layout()
                .into_owned();
            self.transposed = true;
        }
        self.normalized = true;
        self
    }

    fn has_leading_slice_axis(dim: (usize, usize, usize)) -> bool {
        dim.0 < dim.1 && dim.0 < dim.2
    }
}
