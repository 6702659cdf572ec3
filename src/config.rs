use crate::enums::EqualizationRegion;

/// Side length of the square frame the ROI predictor is trained on.
pub const DEFAULT_TARGET_SIZE: usize = 256;
/// Probability below which a predicted pixel is treated as background.
pub const DEFAULT_THRESHOLD: f32 = 0.35;

/// Contrast limited adaptive histogram equalization parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ClaheParams {
    /// Contextual region size (rows, cols). `None` uses 1/8 of each dimension.
    pub kernel_size: Option<(usize, usize)>,
    /// Clip limit as a fraction of the contextual region's pixel count.
    pub clip_limit: f32,
    /// Number of histogram bins.
    pub nbins: usize,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            kernel_size: None,
            clip_limit: 0.01,
            nbins: 256,
        }
    }
}

/// Tunables for one RACLAHE run
#[derive(Debug, Clone, PartialEq)]
pub struct RaclaheConfig {
    pub target_size: usize,
    pub threshold: f32,
    /// Pixels added on every side of a derived bounding box before clamping.
    pub roi_margin: usize,
    pub equalization_region: EqualizationRegion,
    pub clahe: ClaheParams,
    /// Write a PNG per enhanced slice next to the serialized volume.
    pub save_previews: bool,
}

impl Default for RaclaheConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            threshold: DEFAULT_THRESHOLD,
            roi_margin: 0,
            equalization_region: EqualizationRegion::default(),
            clahe: ClaheParams::default(),
            save_previews: false,
        }
    }
}
