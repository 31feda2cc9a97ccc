use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{DARK_DIRECTORY, DARK_FILE_NAME, WAVELENGTH_COEFFICIENT};
use super::error::ConfigError;
use super::moments::CentroidEstimator;
use super::roi::RegionOfInterest;

/// Experimental hutch; selects the detector and beam-monitor groups in a shot file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hutch {
    Eh1,
    Eh2,
}

impl Hutch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eh1 => "eh1",
            Self::Eh2 => "eh2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detector {
    Jungfrau1,
    Jungfrau2,
}

impl Detector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jungfrau1 => "jungfrau1",
            Self::Jungfrau2 => "jungfrau2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Xray {
    #[serde(rename = "SX")]
    Soft,
    #[serde(rename = "HX")]
    Hard,
}

impl Xray {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "SX",
            Self::Hard => "HX",
        }
    }
}

/// Pump laser repetition rate as recorded by the timing system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hertz {
    #[serde(rename = "0HZ")]
    Zero,
    #[serde(rename = "10HZ")]
    Ten,
    #[serde(rename = "15HZ")]
    Fifteen,
    #[serde(rename = "20HZ")]
    Twenty,
    #[serde(rename = "30HZ")]
    Thirty,
    #[serde(rename = "60HZ")]
    Sixty,
}

impl Hertz {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "0HZ",
            Self::Ten => "10HZ",
            Self::Fifteen => "15HZ",
            Self::Twenty => "20HZ",
            Self::Thirty => "30HZ",
            Self::Sixty => "60HZ",
        }
    }
}

/// Settings for the RANSAC outlier filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacSettings {
    /// Sum intensities inside this window instead of over the whole frame
    pub roi: Option<RegionOfInterest>,
    /// Inlier tolerance; None means the median absolute deviation of the intensities
    pub residual_threshold: Option<f64>,
    pub min_samples: usize,
    pub max_trials: usize,
    pub seed: u64,
}

impl Default for RansacSettings {
    fn default() -> Self {
        Self {
            roi: None,
            residual_threshold: None,
            min_samples: 2,
            max_trials: 100,
            seed: 42,
        }
    }
}

/// One correction stage as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    DarkSubtract,
    QbpmNormalize,
    BrightnessEqualize,
    RansacOutlierFilter(RansacSettings),
    LinearConfidenceBandFilter { sigma: f64 },
    PositivityShift,
}

/// A named, ordered list of correction stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn new(name: &str, stages: Vec<StageConfig>) -> Self {
        Self {
            name: name.to_string(),
            stages,
        }
    }

    /// The three pipelines the beamline runs by default
    pub fn defaults() -> Vec<Self> {
        let ransac = StageConfig::RansacOutlierFilter(RansacSettings::default());
        vec![
            Self::new(
                "normalize_images_by_qbpm",
                vec![
                    StageConfig::DarkSubtract,
                    ransac.clone(),
                    StageConfig::QbpmNormalize,
                ],
            ),
            Self::new(
                "equalize_intensities",
                vec![
                    StageConfig::DarkSubtract,
                    ransac.clone(),
                    StageConfig::BrightnessEqualize,
                ],
            ),
            Self::new("no_normalize", vec![StageConfig::DarkSubtract, ransac]),
        ]
    }
}

/// Structure representing the application configuration. Contains pathing, detector geometry
/// and the correction pipelines to evaluate.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub load_dir: PathBuf,
    pub save_dir: PathBuf,
    pub dark_path: Option<PathBuf>,
    pub run_number: i32,
    pub scan_number: i32,
    pub hutch: Hutch,
    pub detector: Detector,
    pub xray: Xray,
    pub pump_setting: Hertz,
    /// Sample to detector distance in meters
    pub sample_detector_distance: f64,
    /// Detector pixel size in meters
    pub pixel_size: f64,
    /// Beam energy in keV
    pub beam_energy: f64,
    pub n_threads: i32,
    pub pipelines: Vec<PipelineConfig>,
    pub roi: Option<RegionOfInterest>,
    pub centroid_estimator: CentroidEstimator,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            load_dir: PathBuf::from("None"),
            save_dir: PathBuf::from("None"),
            dark_path: None,
            run_number: 0,
            scan_number: 1,
            hutch: Hutch::Eh1,
            detector: Detector::Jungfrau2,
            xray: Xray::Hard,
            pump_setting: Hertz::Fifteen,
            sample_detector_distance: 1.3,
            pixel_size: 7.5e-5,
            beam_energy: 10.0,
            n_threads: 1,
            pipelines: PipelineConfig::defaults(),
            roi: None,
            centroid_estimator: CentroidEstimator::Weighted,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration as YAML
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        std::fs::write(config_path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get the directory holding the shot files of the configured run and scan
    pub fn get_scan_directory(&self) -> PathBuf {
        self.load_dir
            .join(format!("run={:0>3}", self.run_number))
            .join(format!("scan={:0>3}", self.scan_number))
    }

    /// Get the dark frame reference; defaults to save_dir/DARK/dark.h5
    pub fn get_dark_path(&self) -> PathBuf {
        match &self.dark_path {
            Some(path) => path.clone(),
            None => self.save_dir.join(DARK_DIRECTORY).join(DARK_FILE_NAME),
        }
    }

    /// Base name shared by all outputs of this run and scan
    pub fn get_output_base(&self) -> String {
        format!(
            "run={:0>4}_scan={:0>4}",
            self.run_number, self.scan_number
        )
    }

    /// Get the path to the stacked hdf5 file of a pipeline
    pub fn get_hdf_file_name(&self, pipeline: &str) -> Result<PathBuf, ConfigError> {
        self.get_output_file(&format!("{}_{pipeline}.h5", self.get_output_base()))
    }

    /// Get the path to a single-array hdf5 file (pon, poff, ...) of a pipeline
    pub fn get_array_file_name(&self, pipeline: &str, key: &str) -> Result<PathBuf, ConfigError> {
        self.get_output_file(&format!("{}_{pipeline}_{key}.h5", self.get_output_base()))
    }

    /// Get the path to the moment table of a pipeline
    pub fn get_table_file_name(&self, pipeline: &str) -> Result<PathBuf, ConfigError> {
        self.get_output_file(&format!("{}_{pipeline}.csv", self.get_output_base()))
    }

    fn get_output_file(&self, file_name: &str) -> Result<PathBuf, ConfigError> {
        if self.save_dir.exists() {
            Ok(self.save_dir.join(file_name))
        } else {
            Err(ConfigError::BadFilePath(self.save_dir.clone()))
        }
    }

    /// Metadata column holding the pump flag. None when the pump is off (0 Hz),
    /// since such files carry no rate column at all.
    pub fn pump_column(&self) -> Option<String> {
        match self.pump_setting {
            Hertz::Zero => None,
            rate => Some(format!(
                "timestamp_info.RATE_{}_{}",
                self.xray.as_str(),
                rate.as_str()
            )),
        }
    }

    pub fn image_group_path(&self) -> String {
        format!(
            "detector/{}/{}/image",
            self.hutch.as_str(),
            self.detector.as_str()
        )
    }

    pub fn qbpm_group_path(&self) -> String {
        format!("qbpm/{}/qbpm1", self.hutch.as_str())
    }

    /// X-ray wavelength in Angstrom
    pub fn wavelength(&self) -> f64 {
        WAVELENGTH_COEFFICIENT / self.beam_energy
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip_keeps_pipelines() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.pipelines, config.pipelines);
        assert_eq!(parsed.pump_setting, Hertz::Fifteen);
    }

    #[test]
    fn test_stage_yaml_format() {
        let yaml = "
- stage: dark_subtract
- stage: ransac_outlier_filter
  max_trials: 500
- stage: linear_confidence_band_filter
  sigma: 2.5
";
        let stages: Vec<StageConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(stages[0], StageConfig::DarkSubtract);
        match &stages[1] {
            StageConfig::RansacOutlierFilter(settings) => {
                assert_eq!(settings.max_trials, 500);
                assert_eq!(settings.min_samples, 2);
            }
            other => panic!("unexpected stage {other:?}"),
        }
        assert_eq!(
            stages[2],
            StageConfig::LinearConfidenceBandFilter { sigma: 2.5 }
        );
    }

    #[test]
    fn test_pump_column() {
        let mut config = Config::default();
        assert_eq!(
            config.pump_column().as_deref(),
            Some("timestamp_info.RATE_HX_15HZ")
        );
        config.pump_setting = Hertz::Zero;
        assert!(config.pump_column().is_none());
    }

    #[test]
    fn test_paths() {
        let config = Config {
            load_dir: PathBuf::from("/data"),
            run_number: 7,
            scan_number: 2,
            ..Default::default()
        };
        assert_eq!(
            config.get_scan_directory(),
            PathBuf::from("/data/run=007/scan=002")
        );
        assert_eq!(config.get_output_base(), "run=0007_scan=0002");
        assert_eq!(
            config.get_dark_path(),
            PathBuf::from("None").join("DARK").join("dark.h5")
        );
    }

    #[test]
    fn test_wavelength() {
        let config = Config {
            beam_energy: 12.398419843320025,
            ..Default::default()
        };
        assert!((config.wavelength() - 1.0).abs() < 1e-12);
    }
}
