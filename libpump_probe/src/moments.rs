use ndarray::{Array1, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::aggregator::ScanSeries;
use super::config::Config;
use super::error::MomentError;
use super::gaussian::fit_gaussian;
use super::roi::RegionOfInterest;

/// How the centroid of an ROI frame is estimated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidEstimator {
    /// Intensity-weighted mean of pixel coordinates
    #[default]
    Weighted,
    /// Peak of a Gaussian fitted to the row- and column-summed profiles
    Gaussian,
}

/// Intensity and centroid of one frame, in ROI-local pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMoments {
    pub intensity: f64,
    pub com_x: f64,
    pub com_y: f64,
}

impl FrameMoments {
    /// Mean pixel value and intensity-weighted centroid. The centroid is NaN when the
    /// frame sums to zero.
    pub fn weighted(frame: ArrayView2<f64>) -> Self {
        let total = frame.sum();
        let intensity = frame.mean().unwrap_or(f64::NAN);
        if total == 0.0 {
            return Self {
                intensity,
                com_x: f64::NAN,
                com_y: f64::NAN,
            };
        }
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for ((row, col), v) in frame.indexed_iter() {
            sum_x += col as f64 * v;
            sum_y += row as f64 * v;
        }
        Self {
            intensity,
            com_x: sum_x / total,
            com_y: sum_y / total,
        }
    }

    /// Gaussian fits of the column profile (for x) and the row profile (for y). The
    /// intensity is the geometric mean of the two amplitudes; anything whose fit fails
    /// is NaN.
    pub fn gaussian(frame: ArrayView2<f64>) -> Self {
        let x_profile = frame.sum_axis(Axis(0)).to_vec();
        let y_profile = frame.sum_axis(Axis(1)).to_vec();
        let fit_x = fit_gaussian(&x_profile);
        let fit_y = fit_gaussian(&y_profile);
        let intensity = match (fit_x, fit_y) {
            (Some(fx), Some(fy)) => (fx.amplitude * fy.amplitude).sqrt(),
            _ => f64::NAN,
        };
        Self {
            intensity,
            com_x: fit_x.map_or(f64::NAN, |f| f.center),
            com_y: fit_y.map_or(f64::NAN, |f| f.center),
        }
    }
}

/// Per-step intensity and centroid of one partition
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMoments {
    pub intensity: Array1<f64>,
    pub com_x: Array1<f64>,
    pub com_y: Array1<f64>,
}

impl PartitionMoments {
    fn from_frames(frames: Vec<FrameMoments>) -> Self {
        Self {
            intensity: frames.iter().map(|m| m.intensity).collect(),
            com_x: frames.iter().map(|m| m.com_x).collect(),
            com_y: frames.iter().map(|m| m.com_y).collect(),
        }
    }

    /// Intensity as a ratio to the first surviving step, centroid as an offset from it.
    ///
    /// A partition missing from the leading steps is NaN there, so each series is anchored
    /// at its own first finite value. A series with no finite value stays NaN.
    fn normalized(&self) -> Self {
        Self {
            intensity: anchored(&self.intensity, |v, anchor| v / anchor),
            com_x: anchored(&self.com_x, |v, anchor| v - anchor),
            com_y: anchored(&self.com_y, |v, anchor| v - anchor),
        }
    }
}

fn anchored(series: &Array1<f64>, relative: impl Fn(f64, f64) -> f64) -> Array1<f64> {
    match series.iter().position(|v| v.is_finite()) {
        Some(index) => {
            if index > 0 {
                log::warn!("First {index} steps have no value; anchoring at step {index}");
            }
            let anchor = series[index];
            series.mapv(|v| relative(v, anchor))
        }
        None => series.clone(),
    }
}

/// Raw per-frame moments over a scan
#[derive(Debug, Clone, PartialEq)]
pub struct MomentSeries {
    pub delay: Array1<f64>,
    pub pon: PartitionMoments,
    pub poff: PartitionMoments,
}

impl MomentSeries {
    /// Anchor every series at its first surviving step. An empty series has no anchor
    /// and is an error.
    pub fn normalize(&self) -> Result<NormalizedMoments, MomentError> {
        let n = self.delay.len();
        let lengths = [
            self.pon.intensity.len(),
            self.pon.com_x.len(),
            self.pon.com_y.len(),
            self.poff.intensity.len(),
            self.poff.com_x.len(),
            self.poff.com_y.len(),
        ];
        if n == 0 || lengths.iter().any(|&len| len == 0) {
            return Err(MomentError::EmptySeries);
        }
        if lengths.iter().any(|&len| len != n) {
            return Err(MomentError::LengthMismatch {
                delays: n,
                found: lengths.to_vec(),
            });
        }
        Ok(NormalizedMoments {
            delay: self.delay.clone(),
            pon: self.pon.normalized(),
            poff: self.poff.normalized(),
        })
    }
}

/// Intensity ratios and centroid offsets in pixels, relative to the first delay
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMoments {
    pub delay: Array1<f64>,
    pub pon: PartitionMoments,
    pub poff: PartitionMoments,
}

impl NormalizedMoments {
    /// Convert the centroid offsets to reciprocal space
    pub fn to_table(&self, geometry: &DetectorGeometry) -> MomentTable {
        let rows = (0..self.delay.len())
            .map(|i| MomentRow {
                delay: self.delay[i],
                pon_intensity: self.pon.intensity[i],
                poff_intensity: self.poff.intensity[i],
                pon_com_x: geometry.delta_q(self.pon.com_x[i]),
                pon_com_y: geometry.delta_q(self.pon.com_y[i]),
                poff_com_x: geometry.delta_q(self.poff.com_x[i]),
                poff_com_y: geometry.delta_q(self.poff.com_y[i]),
            })
            .collect();
        MomentTable { rows }
    }
}

/// Converts pixel displacements on the detector to momentum transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorGeometry {
    /// meters
    pub pixel_size: f64,
    /// meters
    pub sample_detector_distance: f64,
    /// Angstrom
    pub wavelength: f64,
}

impl DetectorGeometry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pixel_size: config.pixel_size,
            sample_detector_distance: config.sample_detector_distance,
            wavelength: config.wavelength(),
        }
    }

    /// Momentum transfer per pixel of displacement, in inverse Angstrom
    pub fn q_per_pixel(&self) -> f64 {
        4.0 * PI / self.wavelength * self.pixel_size.atan2(self.sample_detector_distance)
    }

    pub fn delta_q(&self, pixels: f64) -> f64 {
        pixels * self.q_per_pixel()
    }
}

/// One scan step of the moment table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentRow {
    pub delay: f64,
    pub pon_intensity: f64,
    pub poff_intensity: f64,
    pub pon_com_x: f64,
    pub pon_com_y: f64,
    pub poff_com_x: f64,
    pub poff_com_y: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MomentTable {
    pub rows: Vec<MomentRow>,
}

/// Extracts intensity and centroid series inside a fixed ROI
#[derive(Debug, Clone)]
pub struct RoiMomentExtractor {
    roi: RegionOfInterest,
    estimator: CentroidEstimator,
    geometry: DetectorGeometry,
}

impl RoiMomentExtractor {
    pub fn new(
        roi: RegionOfInterest,
        estimator: CentroidEstimator,
        geometry: DetectorGeometry,
    ) -> Result<Self, MomentError> {
        roi.validate()?;
        Ok(Self {
            roi,
            estimator,
            geometry,
        })
    }

    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    fn frame_moments(&self, frames: ArrayView3<f64>) -> Result<PartitionMoments, MomentError> {
        let roi_frames = self.roi.slice_stack(frames)?;
        let moments = roi_frames
            .outer_iter()
            .map(|frame| match self.estimator {
                CentroidEstimator::Weighted => FrameMoments::weighted(frame),
                CentroidEstimator::Gaussian => FrameMoments::gaussian(frame),
            })
            .collect();
        Ok(PartitionMoments::from_frames(moments))
    }

    /// Per-frame moments of both partitions
    pub fn extract(
        &self,
        delay: ArrayView1<f64>,
        pon: ArrayView3<f64>,
        poff: ArrayView3<f64>,
    ) -> Result<MomentSeries, MomentError> {
        if pon.dim() != poff.dim() || pon.len_of(Axis(0)) != delay.len() {
            return Err(MomentError::ShapeMismatch {
                pon: pon.dim(),
                poff: poff.dim(),
                delays: delay.len(),
            });
        }
        if delay.is_empty() {
            return Err(MomentError::EmptySeries);
        }
        Ok(MomentSeries {
            delay: delay.to_owned(),
            pon: self.frame_moments(pon)?,
            poff: self.frame_moments(poff)?,
        })
    }

    /// Normalized moment table of a stacked scan
    pub fn analyze(&self, series: &ScanSeries) -> Result<MomentTable, MomentError> {
        let moments = self.extract(series.delay.view(), series.pon.view(), series.poff.view())?;
        log::info!(
            "Extracted {} moment rows for pipeline '{}'",
            moments.delay.len(),
            series.pipeline
        );
        Ok(moments.normalize()?.to_table(&self.geometry))
    }
}
