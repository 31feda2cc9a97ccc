//! Synthetic shot files for loader, aggregator and process tests.

use hdf5::{File, Group};
use ndarray::{Array1, Array2, Array3};
use std::path::Path;

use crate::config::Config;
use crate::constants::QBPM_CHANNELS;

/// Everything that goes into one synthetic shot file
#[derive(Debug, Clone)]
pub(crate) struct SyntheticShotFile {
    pub image_timestamps: Vec<i64>,
    pub images: Array3<f32>,
    pub qbpm_timestamps: Vec<i64>,
    /// Samples of one reading; every channel gets the same waveform
    pub qbpm_samples: Vec<Vec<f32>>,
    pub metadata_timestamps: Vec<i64>,
    pub pump_flags: Vec<u8>,
    pub write_pump_column: bool,
    pub delay: f64,
    pub delay_field: Option<&'static str>,
}

impl SyntheticShotFile {
    /// `n` shots of `height x width` ones, timestamps from 100, alternating pump flags
    pub fn uniform(n: usize, height: usize, width: usize, delay: f64) -> Self {
        let timestamps: Vec<i64> = (0..n as i64).map(|i| 100 + i).collect();
        Self {
            image_timestamps: timestamps.clone(),
            images: Array3::ones((n, height, width)),
            qbpm_timestamps: timestamps.clone(),
            qbpm_samples: vec![vec![1.0; 3]; n],
            metadata_timestamps: timestamps,
            pump_flags: (0..n).map(|i| (i % 2 == 0) as u8).collect(),
            write_pump_column: true,
            delay,
            delay_field: Some("th_value"),
        }
    }

    /// Give every reading a waveform whose four-channel sum equals `totals[i]`
    pub fn with_beam_totals(mut self, totals: &[f32]) -> Self {
        self.qbpm_samples = totals
            .iter()
            .map(|t| vec![t / QBPM_CHANNELS as f32])
            .collect();
        self
    }
}

fn create_nested(file: &File, path: &str) -> Group {
    let mut parts = path.split('/');
    let first = parts.next().unwrap();
    let mut group = match file.group(first) {
        Ok(g) => g,
        Err(_) => file.create_group(first).unwrap(),
    };
    for part in parts {
        group = match group.group(part) {
            Ok(g) => g,
            Err(_) => group.create_group(part).unwrap(),
        };
    }
    group
}

/// Write a shot file in the layout the HDF5 loader expects
pub(crate) fn write_shot_file(path: &Path, shot: &SyntheticShotFile, config: &Config) {
    let file = File::create(path).unwrap();

    let metadata = create_nested(&file, "metadata");
    metadata
        .new_dataset_builder()
        .with_data(&Array1::from(shot.metadata_timestamps.clone()))
        .create("index")
        .unwrap();
    if let Some(field) = shot.delay_field {
        let delays = Array1::from_elem(shot.metadata_timestamps.len(), shot.delay);
        metadata
            .new_dataset_builder()
            .with_data(&delays)
            .create(field)
            .unwrap();
    }
    if shot.write_pump_column {
        let column = config
            .pump_column()
            .unwrap_or_else(|| "timestamp_info.RATE_HX_0HZ".to_string());
        metadata
            .new_dataset_builder()
            .with_data(&Array1::from(shot.pump_flags.clone()))
            .create(column.as_str())
            .unwrap();
    }

    let image_group = create_nested(&file, &config.image_group_path());
    image_group
        .new_dataset_builder()
        .with_data(&Array1::from(shot.image_timestamps.clone()))
        .create("block0_items")
        .unwrap();
    image_group
        .new_dataset_builder()
        .with_data(&shot.images)
        .create("block0_values")
        .unwrap();

    let n_samples = shot.qbpm_samples.first().map_or(1, |s| s.len());
    let waveform = Array2::from_shape_fn((shot.qbpm_samples.len(), n_samples), |(i, j)| {
        shot.qbpm_samples[i][j]
    });
    for channel in 1..=QBPM_CHANNELS {
        let channel_group = create_nested(
            &file,
            &format!("{}/waveforms.ch{channel}", config.qbpm_group_path()),
        );
        if channel == 1 {
            channel_group
                .new_dataset_builder()
                .with_data(&Array1::from(shot.qbpm_timestamps.clone()))
                .create("axis1")
                .unwrap();
        }
        channel_group
            .new_dataset_builder()
            .with_data(&waveform)
            .create("block0_values")
            .unwrap();
    }
}
