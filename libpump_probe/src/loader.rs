use fxhash::FxHashMap;
use hdf5::File;
use ndarray::{Array1, Array3, Axis};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use super::config::Config;
use super::constants::{
    DELAY_FIELDS, IMAGE_INDEX_NAME, IMAGE_VALUES_NAME, METADATA_GROUP, METADATA_INDEX,
    QBPM_CHANNELS, QBPM_INDEX_NAME,
};
use super::error::LoaderError;
use super::shot::{ShotBundle, ShotTable};

/// Anything that can turn one raw shot file into a pump-on/pump-off bundle.
///
/// The aggregator only talks to this trait, so other raw formats can be plugged in
/// without touching the scan logic.
pub trait ShotLoader: Send + Sync + Debug {
    fn load(&self, path: &Path) -> Result<ShotBundle, LoaderError>;
}

/// Row positions of one exposure in each of the three timestamped sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedRow {
    pub timestamp: i64,
    pub image: usize,
    pub qbpm: usize,
    pub metadata: usize,
}

/// Inner join of the image, beam monitor and metadata indices on timestamp.
///
/// Output follows the image order. A timestamp missing from any source is dropped;
/// for duplicated timestamps the first occurrence wins.
pub fn inner_join(image_ts: &[i64], qbpm_ts: &[i64], metadata_ts: &[i64]) -> Vec<JoinedRow> {
    let qbpm_rows = first_occurrence_map(qbpm_ts);
    let metadata_rows = first_occurrence_map(metadata_ts);
    let image_rows = first_occurrence_map(image_ts);

    image_ts
        .iter()
        .enumerate()
        .filter(|(row, ts)| image_rows.get(*ts) == Some(row))
        .filter_map(|(row, ts)| {
            let qbpm = *qbpm_rows.get(ts)?;
            let metadata = *metadata_rows.get(ts)?;
            Some(JoinedRow {
                timestamp: *ts,
                image: row,
                qbpm,
                metadata,
            })
        })
        .collect()
}

fn first_occurrence_map(timestamps: &[i64]) -> FxHashMap<i64, usize> {
    let mut map = FxHashMap::default();
    for (row, ts) in timestamps.iter().enumerate() {
        map.entry(*ts).or_insert(row);
    }
    map
}

/// Reads the beamline HDF5 shot files.
///
/// Layout (per shot file):
/// ```text
/// metadata - index, th_value | delay_value, timestamp_info.RATE_<xray>_<rate>
/// detector/<hutch>/<detector>/image - block0_items (timestamps), block0_values (N x H x W)
/// qbpm/<hutch>/qbpm1/waveforms.ch[1-4] - axis1 (timestamps, ch1 only), block0_values (M x samples)
/// ```
#[derive(Debug, Clone)]
pub struct Hdf5ShotLoader {
    image_group: String,
    qbpm_group: String,
    pump_column: Option<String>,
}

impl Hdf5ShotLoader {
    /// Create the loader from the experiment configuration
    pub fn new(config: &Config) -> Self {
        Self {
            image_group: config.image_group_path(),
            qbpm_group: config.qbpm_group_path(),
            pump_column: config.pump_column(),
        }
    }

    /// Read and join one shot file, returning the joined shots and the scan delay
    pub fn read_table(&self, path: &Path) -> Result<(ShotTable, f64), LoaderError> {
        if !path.exists() {
            return Err(LoaderError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        for key in [METADATA_GROUP, "detector", "qbpm"] {
            if file.group(key).is_err() {
                return Err(missing_key(path, key));
            }
        }

        let metadata_ts = read_index(&file, path, METADATA_INDEX)?;
        let delay = read_delay(&file, path);
        let pump_flags = match &self.pump_column {
            Some(column) => {
                let key = format!("{METADATA_GROUP}/{column}");
                let flags = file
                    .dataset(&key)
                    .map_err(|_| missing_key(path, &key))?
                    .read_1d::<u8>()?;
                check_length(path, &key, flags.len(), metadata_ts.len())?;
                Some(flags)
            }
            None => None,
        };

        let image_index_key = format!("{}/{}", self.image_group, IMAGE_INDEX_NAME);
        let image_values_key = format!("{}/{}", self.image_group, IMAGE_VALUES_NAME);
        let image_ts = read_index(&file, path, &image_index_key)?;
        let images = file
            .dataset(&image_values_key)
            .map_err(|_| missing_key(path, &image_values_key))?
            .read::<f32, ndarray::Ix3>()?;
        check_length(path, &image_values_key, images.len_of(Axis(0)), image_ts.len())?;

        let qbpm_index_key = format!("{}/{}", self.qbpm_group, QBPM_INDEX_NAME);
        let qbpm_ts = read_index(&file, path, &qbpm_index_key)?;
        let qbpm = self.read_beam_intensity(&file, path, qbpm_ts.len())?;

        let rows = inner_join(&image_ts, &qbpm_ts, &metadata_ts);
        log::debug!(
            "{}: {} images, {} qbpm readings, {} metadata rows -> {} joined shots",
            path.display(),
            image_ts.len(),
            qbpm_ts.len(),
            metadata_ts.len(),
            rows.len()
        );

        let image_rows: Vec<usize> = rows.iter().map(|r| r.image).collect();
        // Negative pixels are detector noise; floor before any correction runs
        let joined_images: Array3<f64> = images
            .select(Axis(0), &image_rows)
            .mapv(|v| (v as f64).max(0.0));
        let beam_intensity: Array1<f64> = rows.iter().map(|r| qbpm[r.qbpm]).collect();
        let pump_state: Vec<bool> = match &pump_flags {
            Some(flags) => rows.iter().map(|r| flags[r.metadata] != 0).collect(),
            None => vec![false; rows.len()],
        };

        let table = ShotTable {
            timestamps: rows.iter().map(|r| r.timestamp).collect(),
            images: joined_images,
            beam_intensity,
            pump_state,
        };
        Ok((table, delay))
    }

    /// Sum the four waveform channels over their samples, one value per timestamp
    fn read_beam_intensity(
        &self,
        file: &File,
        path: &Path,
        n_readings: usize,
    ) -> Result<Array1<f64>, LoaderError> {
        let mut total = Array1::<f64>::zeros(n_readings);
        for channel in 1..=QBPM_CHANNELS {
            let key = format!("{}/waveforms.ch{channel}/{IMAGE_VALUES_NAME}", self.qbpm_group);
            let waveform = file
                .dataset(&key)
                .map_err(|_| missing_key(path, &key))?
                .read_2d::<f32>()?;
            if waveform.nrows() != n_readings {
                return Err(LoaderError::WaveformMismatch {
                    path: path.to_path_buf(),
                    found: waveform.nrows(),
                    expected: n_readings,
                });
            }
            total += &waveform.mapv(|v| v as f64).sum_axis(Axis(1));
        }
        Ok(total)
    }
}

impl ShotLoader for Hdf5ShotLoader {
    fn load(&self, path: &Path) -> Result<ShotBundle, LoaderError> {
        let (table, delay) = self.read_table(path)?;
        Ok(table.into_bundle(delay))
    }
}

fn missing_key(path: &Path, key: &str) -> LoaderError {
    LoaderError::MissingKey {
        path: PathBuf::from(path),
        key: key.to_string(),
    }
}

fn check_length(path: &Path, key: &str, values: usize, index: usize) -> Result<(), LoaderError> {
    if values == index {
        Ok(())
    } else {
        Err(LoaderError::ShapeMismatch {
            path: path.to_path_buf(),
            key: key.to_string(),
            values,
            index,
        })
    }
}

fn read_index(file: &File, path: &Path, key: &str) -> Result<Vec<i64>, LoaderError> {
    Ok(file
        .dataset(key)
        .map_err(|_| missing_key(path, key))?
        .read_1d::<i64>()?
        .to_vec())
}

/// First value of the preferred delay field, NaN if the file has none
fn read_delay(file: &File, path: &Path) -> f64 {
    for field in DELAY_FIELDS {
        let key = format!("{METADATA_GROUP}/{field}");
        if let Ok(dataset) = file.dataset(&key) {
            match dataset.read_1d::<f64>() {
                Ok(values) if !values.is_empty() => return values[0],
                Ok(_) => log::warn!("{} has an empty '{field}' field", path.display()),
                Err(e) => log::warn!("Could not read '{field}' from {}: {e}", path.display()),
            }
        }
    }
    log::warn!(
        "Neither {} exists in the metadata of {}; delay set to NaN",
        DELAY_FIELDS.join(" nor "),
        path.display()
    );
    f64::NAN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Hertz;
    use crate::shot::PumpState;
    use crate::test_utils::{write_shot_file, SyntheticShotFile};

    #[test]
    fn test_inner_join_counts_intersection() {
        let image_ts = [1, 2, 3, 4, 5, 6, 7, 8];
        let qbpm_ts = [2, 3, 4, 5, 6, 9, 10];
        let meta_ts = [0, 3, 4, 5, 6, 7, 8, 9];
        let rows = inner_join(&image_ts, &qbpm_ts, &meta_ts);
        let joined: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(joined, vec![3, 4, 5, 6]);
        assert_eq!(rows[0].image, 2);
        assert_eq!(rows[0].qbpm, 1);
        assert_eq!(rows[0].metadata, 1);
    }

    #[test]
    fn test_inner_join_keeps_first_duplicate() {
        let rows = inner_join(&[5, 5, 6], &[6, 5], &[5, 6, 6]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].image, 0);
        assert_eq!(rows[1].metadata, 1);
    }

    #[test]
    fn test_load_joins_and_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p0001.h5");
        let mut shot = SyntheticShotFile::uniform(6, 4, 4, 2.5);
        // qbpm misses timestamp 105, metadata misses 100
        shot.qbpm_timestamps = vec![100, 101, 102, 103, 104];
        shot.qbpm_samples = vec![vec![1.0; 3]; 5];
        shot.metadata_timestamps = vec![101, 102, 103, 104, 105];
        shot.pump_flags = vec![1, 0, 1, 0, 1];
        let config = crate::config::Config::default();
        write_shot_file(&path, &shot, &config);

        let loader = Hdf5ShotLoader::new(&config);
        let (table, delay) = loader.read_table(&path).unwrap();
        assert_eq!(table.timestamps, vec![101, 102, 103, 104]);
        assert_eq!(delay, 2.5);
        // 4 channels x 3 samples of 1.0
        assert!(table.beam_intensity.iter().all(|&q| q == 12.0));

        let bundle = table.into_bundle(delay);
        let pon = bundle.partition(PumpState::On).unwrap().n_shots();
        let poff = bundle.partition(PumpState::Off).unwrap().n_shots();
        assert_eq!(pon + poff, 4);
        assert_eq!(pon, 2);
    }

    #[test]
    fn test_zero_hertz_skips_rate_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p0001.h5");
        let mut shot = SyntheticShotFile::uniform(5, 3, 3, 0.0);
        shot.write_pump_column = false;
        let config = crate::config::Config {
            pump_setting: Hertz::Zero,
            ..Default::default()
        };
        write_shot_file(&path, &shot, &config);

        let bundle = Hdf5ShotLoader::new(&config).load(&path).unwrap();
        assert!(bundle.partition(PumpState::On).is_none());
        assert_eq!(bundle.partition(PumpState::Off).unwrap().n_shots(), 5);
    }

    #[test]
    fn test_negative_pixels_are_floored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p0001.h5");
        let mut shot = SyntheticShotFile::uniform(2, 2, 2, 0.0);
        shot.images.fill(-3.0);
        let config = crate::config::Config::default();
        write_shot_file(&path, &shot, &config);

        let (table, _) = Hdf5ShotLoader::new(&config).read_table(&path).unwrap();
        assert!(table.images.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_delay_fallback_and_nan() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::Config::default();
        let loader = Hdf5ShotLoader::new(&config);

        let fallback = dir.path().join("p0001.h5");
        let mut shot = SyntheticShotFile::uniform(2, 2, 2, 4.0);
        shot.delay_field = Some("delay_value");
        write_shot_file(&fallback, &shot, &config);
        assert_eq!(loader.load(&fallback).unwrap().delay, 4.0);

        let missing = dir.path().join("p0002.h5");
        shot.delay_field = None;
        write_shot_file(&missing, &shot, &config);
        assert!(loader.load(&missing).unwrap().delay.is_nan());
    }

    #[test]
    fn test_missing_file_and_group() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::Config::default();
        let loader = Hdf5ShotLoader::new(&config);

        let err = loader.load(&dir.path().join("p0009.h5")).unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(_)));
        assert!(err.is_skippable());

        let path = dir.path().join("p0001.h5");
        let file = hdf5::File::create(&path).unwrap();
        file.create_group("metadata").unwrap();
        drop(file);
        match loader.load(&path).unwrap_err() {
            LoaderError::MissingKey { key, .. } => assert_eq!(key, "detector"),
            other => panic!("unexpected error {other}"),
        }
    }
}
