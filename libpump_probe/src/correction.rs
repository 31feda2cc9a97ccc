use ndarray::{Array1, Array3, Axis};
use std::fmt::Debug;
use std::sync::Arc;

use super::config::RansacSettings;
use super::dark_frame::DarkFrame;
use super::error::{CorrectionError, RoiError};
use super::regression::{fit_line_ransac, LinearFit, RansacParams};
use super::roi::RegionOfInterest;

/// Images of one partition with their beam intensities, row `i` of both belonging to one shot
#[derive(Debug, Clone, PartialEq)]
pub struct ShotStack {
    pub images: Array3<f64>,
    pub beam_intensity: Array1<f64>,
}

impl ShotStack {
    pub fn new(images: Array3<f64>, beam_intensity: Array1<f64>) -> Self {
        Self {
            images,
            beam_intensity,
        }
    }

    pub fn n_shots(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.n_shots() == 0
    }

    /// Frame shape as (rows, cols)
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.images.dim();
        (h, w)
    }

    /// Per-shot summed intensity, optionally restricted to an ROI
    pub fn summed_intensity(
        &self,
        roi: Option<&RegionOfInterest>,
    ) -> Result<Array1<f64>, RoiError> {
        let view = match roi {
            Some(roi) => roi.slice_stack(self.images.view())?,
            None => self.images.view(),
        };
        Ok(view
            .outer_iter()
            .map(|frame| frame.sum())
            .collect::<Array1<f64>>())
    }

    /// Keep the shots whose mask entry is true
    pub fn retain(self, mask: &[bool]) -> Self {
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &m)| m)
            .map(|(i, _)| i)
            .collect();
        if keep.len() == self.n_shots() {
            return self;
        }
        Self {
            images: self.images.select(Axis(0), &keep),
            beam_intensity: self.beam_intensity.select(Axis(0), &keep),
        }
    }

    fn check(&self, stage: &str) -> Result<(), CorrectionError> {
        if self.n_shots() == self.beam_intensity.len() {
            Ok(())
        } else {
            Err(CorrectionError::LengthMismatch {
                stage: stage.to_string(),
                images: self.n_shots(),
                beam: self.beam_intensity.len(),
            })
        }
    }
}

/// One per-shot correction. A stage may rescale images or drop shots, but never
/// changes the frame shape.
pub trait CorrectionStage: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// True if the stage needs the dark frame reference
    fn uses_dark_frame(&self) -> bool {
        false
    }

    fn apply(&self, stack: ShotStack) -> Result<ShotStack, CorrectionError>;
}

/// Subtract the dark frame from every image and floor the result at zero
#[derive(Debug, Clone)]
pub struct DarkSubtract {
    dark: Option<Arc<DarkFrame>>,
}

impl DarkSubtract {
    pub fn new(dark: Option<Arc<DarkFrame>>) -> Self {
        Self { dark }
    }
}

impl CorrectionStage for DarkSubtract {
    fn name(&self) -> &'static str {
        "dark_subtract"
    }

    fn uses_dark_frame(&self) -> bool {
        true
    }

    fn apply(&self, mut stack: ShotStack) -> Result<ShotStack, CorrectionError> {
        stack.check(self.name())?;
        let dark = self.dark.as_ref().ok_or(CorrectionError::MissingDarkFrame)?;
        if dark.shape() != stack.frame_shape() {
            return Err(CorrectionError::DarkShapeMismatch {
                dark: dark.shape(),
                image: stack.frame_shape(),
            });
        }
        for mut frame in stack.images.outer_iter_mut() {
            frame -= &dark.frame;
            frame.mapv_inplace(|v| v.max(0.0));
        }
        Ok(stack)
    }
}

/// Scale every image by mean(beam) / beam_i
#[derive(Debug, Clone, Default)]
pub struct QbpmNormalize;

impl CorrectionStage for QbpmNormalize {
    fn name(&self) -> &'static str {
        "qbpm_normalize"
    }

    fn apply(&self, stack: ShotStack) -> Result<ShotStack, CorrectionError> {
        stack.check(self.name())?;
        let valid: Vec<bool> = stack
            .beam_intensity
            .iter()
            .map(|q| q.is_finite() && *q > 0.0)
            .collect();
        let n_invalid = valid.iter().filter(|&&v| !v).count();
        if n_invalid > 0 {
            log::debug!("QbpmNormalize dropped {n_invalid} shots without beam intensity");
        }
        let mut stack = stack.retain(&valid);
        let Some(mean) = stack.beam_intensity.mean() else {
            return Ok(stack);
        };
        for (mut frame, q) in stack
            .images
            .outer_iter_mut()
            .zip(stack.beam_intensity.iter())
        {
            frame *= mean / q;
        }
        Ok(stack)
    }
}

/// Scale every image to the mean total intensity of the stack
#[derive(Debug, Clone, Default)]
pub struct BrightnessEqualize;

impl CorrectionStage for BrightnessEqualize {
    fn name(&self) -> &'static str {
        "brightness_equalize"
    }

    fn apply(&self, mut stack: ShotStack) -> Result<ShotStack, CorrectionError> {
        stack.check(self.name())?;
        let totals = stack.images.sum_axis(Axis(2)).sum_axis(Axis(1));
        let mean = match totals.mean() {
            Some(m) if m != 0.0 && m.is_finite() => m,
            _ => return Ok(stack),
        };
        for (mut frame, total) in stack.images.outer_iter_mut().zip(totals.iter()) {
            // a blank frame stays blank
            if *total != 0.0 {
                frame *= mean / total;
            }
        }
        Ok(stack)
    }
}

/// Keep the shots that agree with a RANSAC line of summed intensity against beam intensity
#[derive(Debug, Clone)]
pub struct RansacOutlierFilter {
    roi: Option<RegionOfInterest>,
    params: RansacParams,
}

impl RansacOutlierFilter {
    pub fn new(settings: &RansacSettings) -> Self {
        Self {
            roi: settings.roi,
            params: RansacParams {
                residual_threshold: settings.residual_threshold,
                min_samples: settings.min_samples,
                max_trials: settings.max_trials,
                seed: settings.seed,
            },
        }
    }
}

impl CorrectionStage for RansacOutlierFilter {
    fn name(&self) -> &'static str {
        "ransac_outlier_filter"
    }

    fn apply(&self, stack: ShotStack) -> Result<ShotStack, CorrectionError> {
        stack.check(self.name())?;
        if stack.n_shots() < self.params.min_samples.max(2) {
            return Ok(stack);
        }
        let intensity = stack
            .summed_intensity(self.roi.as_ref())
            .map_err(|source| CorrectionError::Roi {
                stage: self.name().to_string(),
                source,
            })?
            .to_vec();
        let x = stack.beam_intensity.to_vec();
        let Some(fit) = fit_line_ransac(&x, &intensity, &self.params) else {
            log::debug!("RANSAC found no valid model; keeping all shots");
            return Ok(stack);
        };
        log::debug!(
            "RANSAC kept {} of {} shots",
            fit.n_inliers(),
            stack.n_shots()
        );
        Ok(stack.retain(&fit.inliers))
    }
}

/// Keep the shots inside a ±sigma band around the least squares line of summed
/// intensity against beam intensity
#[derive(Debug, Clone)]
pub struct LinearConfidenceBandFilter {
    sigma: f64,
}

impl LinearConfidenceBandFilter {
    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }
}

impl CorrectionStage for LinearConfidenceBandFilter {
    fn name(&self) -> &'static str {
        "linear_confidence_band_filter"
    }

    fn apply(&self, stack: ShotStack) -> Result<ShotStack, CorrectionError> {
        stack.check(self.name())?;
        let intensity = stack
            .summed_intensity(None)
            .map_err(|source| CorrectionError::Roi {
                stage: self.name().to_string(),
                source,
            })?
            .to_vec();
        let x = stack.beam_intensity.to_vec();
        let Some(fit) = LinearFit::fit(&x, &intensity) else {
            return Ok(stack);
        };
        let mask = fit.within_band(&x, &intensity, self.sigma);
        Ok(stack.retain(&mask))
    }
}

/// Shift the stack so its minimum pixel is exactly zero
#[derive(Debug, Clone, Default)]
pub struct PositivityShift;

impl CorrectionStage for PositivityShift {
    fn name(&self) -> &'static str {
        "positivity_shift"
    }

    fn apply(&self, mut stack: ShotStack) -> Result<ShotStack, CorrectionError> {
        stack.check(self.name())?;
        if stack.images.is_empty() {
            return Ok(stack);
        }
        let min = stack.images.iter().copied().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            stack.images.mapv_inplace(|v| v - min);
        }
        Ok(stack)
    }
}
