use hdf5::types::VarLenUnicode;
use hdf5::File;
use ndarray::{Array1, Array3, Ix1, Ix3};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::aggregator::{DroppedStep, ScanSeries};
use super::constants::{
    ARRAY_DATASET_NAME, DELAY_NAME, DROPPED_DELAY_NAME, DROPPED_INDEX_NAME, FORMAT_VERSION,
    POFF_NAME, POFF_QBPM_NAME, PON_NAME, PON_QBPM_NAME,
};
use super::error::HDF5WriterError;

const VERSION_ATTR: &str = "version";
const PIPELINE_ATTR: &str = "pipeline";
const AXES_ATTR: &str = "axes";

/// A simple struct which wraps around the hdf5-rust library.
///
/// Writes the stacked series of one pipeline. Layout:
/// ```text
/// run=0001_scan=0001_<pipeline>.h5 - version, pipeline
/// |---- delay(dset) [S]
/// |---- pon(dset) [S, H, W]
/// |---- poff(dset) [S, H, W]
/// |---- pon_qbpm(dset) [S]
/// |---- poff_qbpm(dset) [S]
/// |---- dropped_file_index(dset) [D], only if steps were dropped
/// |---- dropped_delay(dset) [D], only if steps were dropped
/// ```
#[derive(Debug)]
pub struct HDFWriter {
    file_handle: File,
    path: PathBuf,
}

fn string_attr(value: &str) -> Result<VarLenUnicode, HDF5WriterError> {
    VarLenUnicode::from_str(value).map_err(|e| HDF5WriterError::StringError(e.to_string()))
}

impl HDFWriter {
    /// Create the writer, opening a file at path and tagging it with the format version
    pub fn new(path: &Path) -> Result<Self, HDF5WriterError> {
        let file_handle = File::create(path)?;
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        file_handle
            .new_attr::<VarLenUnicode>()
            .create(VERSION_ATTR)?
            .write_scalar(&string_attr(&version)?)?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
        })
    }

    /// Write every array of the series as a named dataset
    pub fn write_series(&self, series: &ScanSeries) -> Result<(), HDF5WriterError> {
        self.file_handle
            .new_attr::<VarLenUnicode>()
            .create(PIPELINE_ATTR)?
            .write_scalar(&string_attr(&series.pipeline)?)?;
        self.file_handle
            .new_dataset_builder()
            .with_data(&series.delay)
            .create(DELAY_NAME)?;
        self.file_handle
            .new_dataset_builder()
            .with_data(&series.pon)
            .create(PON_NAME)?;
        self.file_handle
            .new_dataset_builder()
            .with_data(&series.poff)
            .create(POFF_NAME)?;
        self.file_handle
            .new_dataset_builder()
            .with_data(&series.pon_qbpm)
            .create(PON_QBPM_NAME)?;
        self.file_handle
            .new_dataset_builder()
            .with_data(&series.poff_qbpm)
            .create(POFF_QBPM_NAME)?;

        if !series.dropped.is_empty() {
            let indices: Array1<u64> = series
                .dropped
                .iter()
                .map(|d| d.file_index as u64)
                .collect();
            let delays: Array1<f64> = series.dropped.iter().map(|d| d.delay).collect();
            self.file_handle
                .new_dataset_builder()
                .with_data(&indices)
                .create(DROPPED_INDEX_NAME)?;
            self.file_handle
                .new_dataset_builder()
                .with_data(&delays)
                .create(DROPPED_DELAY_NAME)?;
        }

        let (height, width) = series.frame_shape();
        log::info!(
            "Wrote {} steps of {height}x{width} frames for pipeline '{}' to {}",
            series.n_steps(),
            series.pipeline,
            self.path.display()
        );
        Ok(())
    }

    /// Write a single `[step, row, col]` stack as one dataset with axes reordered to
    /// `[row, col, step]`
    pub fn write_array(path: &Path, data: &Array3<f64>) -> Result<(), HDF5WriterError> {
        let file_handle = File::create(path)?;
        let reordered = data.view().permuted_axes([1, 2, 0]);
        let reordered = reordered.as_standard_layout();
        let dataset = file_handle
            .new_dataset_builder()
            .with_data(&reordered)
            .create(ARRAY_DATASET_NAME)?;
        dataset
            .new_attr::<VarLenUnicode>()
            .create(AXES_ATTR)?
            .write_scalar(&string_attr("row,col,step")?)?;
        Ok(())
    }
}

impl ScanSeries {
    /// Read a series written by [`HDFWriter::write_series`].
    ///
    /// `delay`, `pon` and `poff` are required; the beam intensities are NaN and the dropped
    /// list is empty when absent.
    pub fn read(path: &Path) -> Result<Self, HDF5WriterError> {
        if !path.exists() {
            return Err(HDF5WriterError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let required = |key: &str| {
            file.dataset(key).map_err(|_| HDF5WriterError::SchemaError {
                path: path.to_path_buf(),
                key: key.to_string(),
            })
        };
        let delay = required(DELAY_NAME)?.read::<f64, Ix1>()?;
        let pon = required(PON_NAME)?.read::<f64, Ix3>()?;
        let poff = required(POFF_NAME)?.read::<f64, Ix3>()?;

        let optional = |key: &str| -> Result<Array1<f64>, HDF5WriterError> {
            match file.dataset(key) {
                Ok(dataset) => Ok(dataset.read::<f64, Ix1>()?),
                Err(_) => Ok(Array1::from_elem(delay.len(), f64::NAN)),
            }
        };
        let pon_qbpm = optional(PON_QBPM_NAME)?;
        let poff_qbpm = optional(POFF_QBPM_NAME)?;

        let dropped = match (
            file.dataset(DROPPED_INDEX_NAME),
            file.dataset(DROPPED_DELAY_NAME),
        ) {
            (Ok(indices), Ok(delays)) => {
                let indices = indices.read_1d::<u64>()?;
                let delays = delays.read_1d::<f64>()?;
                indices
                    .iter()
                    .zip(delays.iter())
                    .map(|(&file_index, &delay)| DroppedStep {
                        file_index: file_index as usize,
                        delay,
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let pipeline = match file.attr(PIPELINE_ATTR) {
            Ok(attr) => attr.read_scalar::<VarLenUnicode>()?.as_str().to_string(),
            Err(_) => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        };

        Ok(Self {
            pipeline,
            delay,
            pon,
            poff,
            pon_qbpm,
            poff_qbpm,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn series() -> ScanSeries {
        ScanSeries {
            pipeline: "standard".to_string(),
            delay: array![0.0, 1.0],
            pon: Array::from_shape_fn((2, 3, 4), |(s, r, c)| (100 * s + 10 * r + c) as f64),
            poff: Array3::from_elem((2, 3, 4), f64::NAN),
            pon_qbpm: array![1.0, 2.0],
            poff_qbpm: array![f64::NAN, f64::NAN],
            dropped: vec![DroppedStep {
                file_index: 4,
                delay: 0.5,
            }],
        }
    }

    #[test]
    fn test_series_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.h5");
        let original = series();
        HDFWriter::new(&path).unwrap().write_series(&original).unwrap();

        let read = ScanSeries::read(&path).unwrap();
        assert_eq!(read.pipeline, "standard");
        assert_eq!(read.delay, original.delay);
        assert_eq!(read.pon, original.pon);
        assert!(read.poff.iter().all(|v| v.is_nan()));
        assert_eq!(read.dropped, original.dropped);

        let file = File::open(&path).unwrap();
        let version = file
            .attr("version")
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap();
        assert!(version.as_str().ends_with(":1.0"));
    }

    #[test]
    fn test_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.h5");
        let file = File::create(&path).unwrap();
        file.new_dataset_builder()
            .with_data(&array![0.0, 1.0])
            .create("delay")
            .unwrap();
        drop(file);
        match ScanSeries::read(&path).unwrap_err() {
            HDF5WriterError::SchemaError { key, .. } => assert_eq!(key, "pon"),
            other => panic!("unexpected error {other}"),
        }
        assert!(matches!(
            ScanSeries::read(&dir.path().join("missing.h5")),
            Err(HDF5WriterError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_array_axes_are_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pon.h5");
        let original = series();
        HDFWriter::write_array(&path, &original.pon).unwrap();

        let data = File::open(&path)
            .unwrap()
            .dataset("data")
            .unwrap()
            .read::<f64, Ix3>()
            .unwrap();
        assert_eq!(data.dim(), (3, 4, 2));
        assert_eq!(data[[2, 1, 1]], original.pon[[1, 2, 1]]);
    }
}
