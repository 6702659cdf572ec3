/// Order in which the files of a DICOM series become slices.
///
/// The round-trip writer pairs slice `i` with the `i`-th file of the loaded
/// order, so whatever order is chosen here is also the order the enhanced
/// series is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    FileName,
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Resampling kernel used when resizing a slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Intensity images
    #[default]
    Bilinear,
    /// Label and annotation arrays
    NearestNeighbor,
}

/// Which pixels the histogram equalization statistics are computed over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EqualizationRegion {
    /// Equalize the whole zero-padded focused slice. Compatible with the
    /// established RACLAHE output; the zero border biases the histograms.
    #[default]
    Padded,
    /// Equalize a tight crop of the ROI and paste it back.
    Cropped,
}

/// Output format of a persisted volume, in ladder order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerializationTier {
    DicomSeries,
    Nifti,
    RawArray,
}

impl SerializationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DicomSeries => "dicom",
            Self::Nifti => "nifti",
            Self::RawArray => "raw",
        }
    }
}
