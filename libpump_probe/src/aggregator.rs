use ndarray::{Array1, Array2, Array3, Axis};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::Config;
use super::constants::{SHOT_FILE_EXTENSION, SHOT_FILE_PREFIX};
use super::correction::ShotStack;
use super::dark_frame::DarkFrame;
use super::error::{AggregatorError, LoaderError};
use super::loader::{Hdf5ShotLoader, ShotLoader};
use super::pipeline::Pipeline;
use super::shot::{PumpState, ShotBundle};

/// One shot file of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotFile {
    pub index: usize,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Parse the acquisition index out of a `p<index>.h5` file name
pub fn parse_file_index(path: &Path) -> Option<usize> {
    if path.extension()?.to_str()? != SHOT_FILE_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix(SHOT_FILE_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List the shot files of a scan directory in acquisition order.
///
/// The order comes from the index in the file name, not from a lexicographic sort, so
/// `p10.h5` comes after `p9.h5`. Files that do not follow the naming scheme are ignored.
pub fn list_shot_files(scan_dir: &Path) -> Result<Vec<ShotFile>, AggregatorError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(scan_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match parse_file_index(&path) {
            Some(index) => {
                let size_bytes = path.metadata()?.len();
                files.push(ShotFile {
                    index,
                    path,
                    size_bytes,
                });
            }
            None => log::debug!("Ignoring {}; not a shot file", path.display()),
        }
    }
    if files.is_empty() {
        return Err(AggregatorError::NoMatchingFiles(scan_dir.to_path_buf()));
    }
    files.sort_by_key(|f| f.index);
    Ok(files)
}

/// Mean of the shots that survived a pipeline for one partition of one step
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedFrame {
    pub frame: Array2<f64>,
    pub mean_beam_intensity: f64,
    pub n_shots: usize,
}

impl ReducedFrame {
    /// None when no shots are left
    pub fn reduce(stack: &ShotStack) -> Option<Self> {
        let frame = stack.images.mean_axis(Axis(0))?;
        Some(Self {
            frame,
            mean_beam_intensity: stack.beam_intensity.mean()?,
            n_shots: stack.n_shots(),
        })
    }
}

/// What one pipeline made of one shot file
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub file_index: usize,
    pub delay: f64,
    pub pon: Option<ReducedFrame>,
    pub poff: Option<ReducedFrame>,
}

impl StepResult {
    pub fn is_empty(&self) -> bool {
        self.pon.is_none() && self.poff.is_none()
    }

    fn frame_shape(&self) -> Option<(usize, usize)> {
        self.pon
            .as_ref()
            .or(self.poff.as_ref())
            .map(|r| r.frame.dim())
    }
}

/// A scan step that kept no shots, or could not be stacked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DroppedStep {
    pub file_index: usize,
    pub delay: f64,
}

/// The stacked result of one pipeline over a whole scan.
///
/// Steps are in acquisition order. A step that kept only one partition has a NaN frame and
/// NaN beam intensity for the other one.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSeries {
    pub pipeline: String,
    pub delay: Array1<f64>,
    pub pon: Array3<f64>,
    pub poff: Array3<f64>,
    pub pon_qbpm: Array1<f64>,
    pub poff_qbpm: Array1<f64>,
    pub dropped: Vec<DroppedStep>,
}

impl ScanSeries {
    /// Stack the per-file results of a pipeline
    pub fn from_steps(pipeline: &str, steps: Vec<StepResult>) -> Result<Self, AggregatorError> {
        let mut dropped = Vec::new();
        let mut kept: Vec<StepResult> = Vec::with_capacity(steps.len());
        let mut shape: Option<(usize, usize)> = None;
        for step in steps {
            let Some(step_shape) = step.frame_shape() else {
                log::info!(
                    "Pipeline '{pipeline}' kept no shots from file {} (delay {})",
                    step.file_index,
                    step.delay
                );
                dropped.push(DroppedStep {
                    file_index: step.file_index,
                    delay: step.delay,
                });
                continue;
            };
            match shape {
                None => shape = Some(step_shape),
                Some(expected) if expected != step_shape => {
                    log::warn!(
                        "File {} has frames of shape {step_shape:?} but the scan has {expected:?}; skipping it",
                        step.file_index
                    );
                    dropped.push(DroppedStep {
                        file_index: step.file_index,
                        delay: step.delay,
                    });
                    continue;
                }
                Some(_) => (),
            }
            kept.push(step);
        }

        let Some((height, width)) = shape else {
            return Err(AggregatorError::NothingToSave(pipeline.to_string()));
        };
        let n_steps = kept.len();
        let mut series = Self {
            pipeline: pipeline.to_string(),
            delay: Array1::zeros(n_steps),
            pon: Array3::from_elem((n_steps, height, width), f64::NAN),
            poff: Array3::from_elem((n_steps, height, width), f64::NAN),
            pon_qbpm: Array1::from_elem(n_steps, f64::NAN),
            poff_qbpm: Array1::from_elem(n_steps, f64::NAN),
            dropped,
        };
        for (row, step) in kept.into_iter().enumerate() {
            series.delay[row] = step.delay;
            if let Some(pon) = step.pon {
                series.pon.index_axis_mut(Axis(0), row).assign(&pon.frame);
                series.pon_qbpm[row] = pon.mean_beam_intensity;
            }
            if let Some(poff) = step.poff {
                series.poff.index_axis_mut(Axis(0), row).assign(&poff.frame);
                series.poff_qbpm[row] = poff.mean_beam_intensity;
            }
        }
        Ok(series)
    }

    pub fn n_steps(&self) -> usize {
        self.delay.len()
    }

    /// Frame shape as (rows, cols)
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.pon.dim();
        (h, w)
    }

    /// Delays of the steps that did not make it into the stack
    pub fn dropped_delays(&self) -> Vec<f64> {
        self.dropped.iter().map(|d| d.delay).collect()
    }

    /// Pump-on and pump-off frames summed over all steps. Missing (NaN) frames count as zero.
    pub fn summed_images(&self) -> (Array2<f64>, Array2<f64>) {
        let sum = |stack: &Array3<f64>| {
            stack
                .mapv(|v| if v.is_nan() { 0.0 } else { v })
                .sum_axis(Axis(0))
        };
        (sum(&self.pon), sum(&self.poff))
    }

    /// Per-step `max(pon - poff, 0)`; NaN where either frame is missing
    pub fn pump_difference(&self) -> Array3<f64> {
        let mut diff = &self.pon - &self.poff;
        diff.mapv_inplace(|v| if v.is_nan() { v } else { v.max(0.0) });
        diff
    }
}

/// Drives the loader and the correction pipelines over every file of a scan
#[derive(Debug)]
pub struct ScanAggregator {
    loader: Box<dyn ShotLoader>,
    pipelines: Vec<Pipeline>,
    files: Vec<ShotFile>,
}

impl ScanAggregator {
    /// Create the aggregator for the run and scan of the configuration, reading HDF5 shot files
    pub fn new(config: &Config, dark: Option<Arc<DarkFrame>>) -> Result<Self, AggregatorError> {
        let pipelines = Pipeline::from_configs(&config.pipelines, dark)?;
        Self::with_loader(
            Box::new(Hdf5ShotLoader::new(config)),
            pipelines,
            &config.get_scan_directory(),
        )
    }

    pub fn with_loader(
        loader: Box<dyn ShotLoader>,
        pipelines: Vec<Pipeline>,
        scan_dir: &Path,
    ) -> Result<Self, AggregatorError> {
        if pipelines.is_empty() {
            return Err(AggregatorError::NoPipelines);
        }
        let files = list_shot_files(scan_dir)?;
        log::info!(
            "Found {} shot files in {} with total size {}",
            files.len(),
            scan_dir.display(),
            human_bytes::human_bytes(files.iter().map(|f| f.size_bytes).sum::<u64>() as f64)
        );
        Ok(Self {
            loader,
            pipelines,
            files,
        })
    }

    pub fn files(&self) -> &[ShotFile] {
        &self.files
    }

    pub fn n_files(&self) -> usize {
        self.files.len()
    }

    pub fn get_total_data_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    /// Load one file and run every pipeline over both of its partitions.
    ///
    /// Returns one result per pipeline, in pipeline order. A pipeline that fails on this
    /// file gets an empty result, so the step is reported as dropped for that pipeline only.
    pub fn process_file(&self, file: &ShotFile) -> Result<Vec<StepResult>, LoaderError> {
        let bundle = self.loader.load(&file.path)?;
        Ok(self
            .pipelines
            .iter()
            .map(|pipeline| self.reduce_bundle(pipeline, file, &bundle))
            .collect())
    }

    fn reduce_bundle(
        &self,
        pipeline: &Pipeline,
        file: &ShotFile,
        bundle: &ShotBundle,
    ) -> StepResult {
        let mut result = StepResult {
            file_index: file.index,
            delay: bundle.delay,
            pon: None,
            poff: None,
        };
        for partition in bundle.partitions.iter() {
            let stack = ShotStack::new(
                partition.images.clone(),
                partition.beam_intensity.clone(),
            );
            let reduced = match pipeline.apply(stack) {
                Ok(corrected) => ReducedFrame::reduce(&corrected),
                Err(e) => {
                    log::warn!(
                        "Skipping {} partition of {}: {e}",
                        partition.state.as_str(),
                        file.path.display()
                    );
                    return StepResult {
                        pon: None,
                        poff: None,
                        ..result
                    };
                }
            };
            match partition.state {
                PumpState::On => result.pon = reduced,
                PumpState::Off => result.poff = reduced,
            }
        }
        result
    }

    /// Process the file at `position` in acquisition order. Any loader failure skips the
    /// file and is logged with its path.
    pub fn process_position(&self, position: usize) -> Option<Vec<StepResult>> {
        let file = self.files.get(position)?;
        match self.process_file(file) {
            Ok(steps) => Some(steps),
            Err(e) if e.is_skippable() => {
                log::warn!("Skipping {}: {e}", file.path.display());
                None
            }
            Err(e) => {
                log::error!("Skipping unreadable file {}: {e}", file.path.display());
                None
            }
        }
    }

    /// Stack the per-file outcomes, given in acquisition order, into one series per
    /// pipeline. A pipeline that kept no step at all is left out with a warning; fails only
    /// if every pipeline came up empty.
    pub fn assemble(
        &self,
        outcomes: Vec<Option<Vec<StepResult>>>,
    ) -> Result<Vec<ScanSeries>, AggregatorError> {
        let mut per_pipeline: Vec<Vec<StepResult>> = vec![Vec::new(); self.pipelines.len()];
        for steps in outcomes.into_iter().flatten() {
            for (list, step) in per_pipeline.iter_mut().zip(steps) {
                list.push(step);
            }
        }

        let mut series = Vec::with_capacity(self.pipelines.len());
        let mut first_empty: Option<AggregatorError> = None;
        for (pipeline, steps) in self.pipelines.iter().zip(per_pipeline) {
            match ScanSeries::from_steps(pipeline.name(), steps) {
                Ok(s) => series.push(s),
                Err(e @ AggregatorError::NothingToSave(_)) => {
                    log::warn!("{e}; no output is written for it");
                    first_empty.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match (series.is_empty(), first_empty) {
            (true, Some(e)) => Err(e),
            _ => Ok(series),
        }
    }

    /// Process every file in order on the calling thread
    pub fn scan(&self) -> Result<Vec<ScanSeries>, AggregatorError> {
        let outcomes = (0..self.files.len())
            .map(|position| self.process_position(position))
            .collect();
        self.assemble(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, StageConfig};
    use crate::test_utils::{write_shot_file, SyntheticShotFile};
    use ndarray::array;

    #[test]
    fn test_parse_file_index() {
        assert_eq!(parse_file_index(Path::new("/a/p0012.h5")), Some(12));
        assert_eq!(parse_file_index(Path::new("p7.h5")), Some(7));
        assert_eq!(parse_file_index(Path::new("p0012.npz")), None);
        assert_eq!(parse_file_index(Path::new("dark.h5")), None);
        assert_eq!(parse_file_index(Path::new("p.h5")), None);
        assert_eq!(parse_file_index(Path::new("p12b.h5")), None);
    }

    #[test]
    fn test_files_are_ordered_by_index() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["p10.h5", "p9.h5", "p0001.h5", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = list_shot_files(dir.path()).unwrap();
        let indices: Vec<usize> = files.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 9, 10]);

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_shot_files(empty.path()),
            Err(AggregatorError::NoMatchingFiles(_))
        ));
    }

    fn reduced(value: f64) -> ReducedFrame {
        ReducedFrame {
            frame: Array2::from_elem((2, 2), value),
            mean_beam_intensity: value,
            n_shots: 1,
        }
    }

    #[test]
    fn test_single_partition_step_is_nan_filled() {
        let steps = vec![
            StepResult {
                file_index: 1,
                delay: 0.0,
                pon: Some(reduced(1.0)),
                poff: Some(reduced(2.0)),
            },
            StepResult {
                file_index: 2,
                delay: 1.0,
                pon: None,
                poff: None,
            },
            StepResult {
                file_index: 3,
                delay: 2.0,
                pon: Some(reduced(5.0)),
                poff: None,
            },
        ];
        let series = ScanSeries::from_steps("p", steps).unwrap();
        assert_eq!(series.delay, array![0.0, 2.0]);
        assert_eq!(series.dropped_delays(), vec![1.0]);
        assert_eq!(series.dropped[0].file_index, 2);
        assert!(series.poff[[1, 0, 0]].is_nan());
        assert!(series.poff_qbpm[1].is_nan());
        assert_eq!(series.pon[[1, 1, 1]], 5.0);

        let (pon_sum, poff_sum) = series.summed_images();
        assert_eq!(pon_sum[[0, 0]], 6.0);
        assert_eq!(poff_sum[[0, 0]], 2.0);
        let diff = series.pump_difference();
        assert_eq!(diff[[0, 0, 0]], 0.0);
        assert!(diff[[1, 0, 0]].is_nan());
    }

    #[test]
    fn test_nothing_to_save() {
        let steps = vec![StepResult {
            file_index: 1,
            delay: 0.0,
            pon: None,
            poff: None,
        }];
        assert!(matches!(
            ScanSeries::from_steps("empty", steps),
            Err(AggregatorError::NothingToSave(name)) if name == "empty"
        ));
    }

    #[test]
    fn test_mismatched_frame_is_skipped() {
        let mut odd = reduced(1.0);
        odd.frame = Array2::zeros((3, 3));
        let steps = vec![
            StepResult {
                file_index: 1,
                delay: 0.0,
                pon: Some(reduced(1.0)),
                poff: None,
            },
            StepResult {
                file_index: 2,
                delay: 1.0,
                pon: Some(odd),
                poff: None,
            },
        ];
        let series = ScanSeries::from_steps("p", steps).unwrap();
        assert_eq!(series.n_steps(), 1);
        assert_eq!(series.dropped_delays(), vec![1.0]);
    }

    /// Three files at delays 0, 1, 2 with 4 pump-on and 4 pump-off 10x10 shots each
    fn write_scan(scan_dir: &Path, config: &Config) {
        std::fs::create_dir_all(scan_dir).unwrap();
        for (i, delay) in [0.0, 1.0, 2.0].into_iter().enumerate() {
            let shot = SyntheticShotFile::uniform(8, 10, 10, delay)
                .with_beam_totals(&[2.0, 2.0, 4.0, 4.0, 2.0, 2.0, 4.0, 4.0]);
            write_shot_file(&scan_dir.join(format!("p{:04}.h5", i + 1)), &shot, config);
        }
    }

    fn dark_qbpm_pipeline() -> Vec<PipelineConfig> {
        vec![PipelineConfig::new(
            "standard",
            vec![StageConfig::DarkSubtract, StageConfig::QbpmNormalize],
        )]
    }

    #[test]
    fn test_end_to_end_scan() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            load_dir: dir.path().to_path_buf(),
            pipelines: dark_qbpm_pipeline(),
            ..Default::default()
        };
        write_scan(&config.get_scan_directory(), &config);

        let dark = Arc::new(DarkFrame::new(Array2::from_elem((10, 10), 0.5)));
        let aggregator = ScanAggregator::new(&config, Some(dark)).unwrap();
        let series = aggregator.scan().unwrap();
        assert_eq!(series.len(), 1);
        let series = &series[0];
        assert_eq!(series.pipeline, "standard");
        assert_eq!(series.pon.dim(), (3, 10, 10));
        assert_eq!(series.poff.dim(), (3, 10, 10));
        assert_eq!(series.delay, array![0.0, 1.0, 2.0]);
        assert!(series.dropped.is_empty());
        // pon shots have beam 2, 4, 2, 4: mean(q)/q is 1.5 or 0.75, averaging to 1.125
        assert!((series.pon[[0, 4, 4]] - 0.5 * 1.125).abs() < 1e-12);
        assert!((series.pon_qbpm[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_silent_shrink_reports_dropped_delay() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            load_dir: dir.path().to_path_buf(),
            pipelines: dark_qbpm_pipeline(),
            ..Default::default()
        };
        let scan_dir = config.get_scan_directory();
        write_scan(&scan_dir, &config);
        // the delay = 1 file loses every shot to a dead beam monitor
        let dead = SyntheticShotFile::uniform(8, 10, 10, 1.0).with_beam_totals(&[0.0; 8]);
        write_shot_file(&scan_dir.join("p0002.h5"), &dead, &config);

        let dark = Arc::new(DarkFrame::new(Array2::zeros((10, 10))));
        let series = ScanAggregator::new(&config, Some(dark))
            .unwrap()
            .scan()
            .unwrap()
            .remove(0);
        assert_eq!(series.n_steps(), 2);
        assert_eq!(series.delay, array![0.0, 2.0]);
        assert_eq!(
            series.dropped,
            vec![DroppedStep {
                file_index: 2,
                delay: 1.0
            }]
        );
    }

    #[test]
    fn test_broken_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            load_dir: dir.path().to_path_buf(),
            pipelines: vec![PipelineConfig::new("raw", vec![])],
            ..Default::default()
        };
        let scan_dir = config.get_scan_directory();
        write_scan(&scan_dir, &config);
        hdf5::File::create(scan_dir.join("p0002.h5"))
            .unwrap()
            .create_group("metadata")
            .unwrap();

        let aggregator = ScanAggregator::new(&config, None).unwrap();
        assert!(aggregator.process_position(1).is_none());
        let series = aggregator.scan().unwrap().remove(0);
        assert_eq!(series.delay, array![0.0, 2.0]);
        assert!(series.dropped.is_empty());
    }

    #[test]
    fn test_missing_dark_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            load_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(matches!(
            ScanAggregator::new(&config, None),
            Err(AggregatorError::PipelineError(_))
        ));
    }

    #[test]
    fn test_missing_dark_keeps_pipelines_without_dark_subtract() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            load_dir: dir.path().to_path_buf(),
            pipelines: vec![
                PipelineConfig::new("raw", vec![]),
                PipelineConfig::new("standard", vec![StageConfig::DarkSubtract]),
            ],
            ..Default::default()
        };
        write_scan(&config.get_scan_directory(), &config);

        let aggregator = ScanAggregator::new(&config, None).unwrap();
        assert_eq!(aggregator.pipeline_names(), vec!["raw"]);
        let series = aggregator.scan().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].pipeline, "raw");
        assert_eq!(series[0].delay, array![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_empty_pipeline_does_not_block_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            load_dir: dir.path().to_path_buf(),
            pipelines: vec![
                PipelineConfig::new("raw", vec![]),
                PipelineConfig::new("qbpm", vec![StageConfig::QbpmNormalize]),
            ],
            ..Default::default()
        };
        let scan_dir = config.get_scan_directory();
        std::fs::create_dir_all(&scan_dir).unwrap();
        // a dead beam monitor empties every step of the qbpm pipeline
        for i in 0..2 {
            let shot = SyntheticShotFile::uniform(4, 3, 3, i as f64).with_beam_totals(&[0.0; 4]);
            write_shot_file(&scan_dir.join(format!("p{}.h5", i + 1)), &shot, &config);
        }

        let aggregator = ScanAggregator::new(&config, None).unwrap();
        let series = aggregator.scan().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].pipeline, "raw");
        assert_eq!(series[0].n_steps(), 2);

        let all_empty = ScanAggregator::with_loader(
            Box::new(Hdf5ShotLoader::new(&config)),
            Pipeline::from_configs(&config.pipelines[1..], None).unwrap(),
            &scan_dir,
        )
        .unwrap();
        assert!(matches!(
            all_empty.scan(),
            Err(AggregatorError::NothingToSave(name)) if name == "qbpm"
        ));
    }
}
