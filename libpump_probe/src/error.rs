use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Could not open shot file because file {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("Required key '{key}' not found in shot file {path:?}")]
    MissingKey { path: PathBuf, key: String },
    #[error("Shot file {path:?} has {values} entries in '{key}' but {index} timestamps")]
    ShapeMismatch {
        path: PathBuf,
        key: String,
        values: usize,
        index: usize,
    },
    #[error("Shot file {path:?} has a waveform channel with {found} rows; expected {expected}")]
    WaveformMismatch {
        path: PathBuf,
        found: usize,
        expected: usize,
    },
    #[error("Loader failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
}

impl LoaderError {
    /// True for the failures a scan is allowed to step over
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MissingKey { .. })
    }
}

#[derive(Debug, Error)]
pub enum DarkFrameError {
    #[error("Dark frame file {0:?} does not contain a 'dark' dataset")]
    MissingDataset(PathBuf),
    #[error("Dark frame must be 2D or 3D, found {0} dimensions")]
    BadDimension(usize),
    #[error("Dark frame stack in {0:?} is empty")]
    EmptyStack(PathBuf),
    #[error("Dark frame failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
}

#[derive(Debug, Clone, Error)]
pub enum CorrectionError {
    #[error("DarkSubtract requires a dark frame reference, but none was loaded")]
    MissingDarkFrame,
    #[error("Dark frame has shape {dark:?} but images have shape {image:?}")]
    DarkShapeMismatch {
        dark: (usize, usize),
        image: (usize, usize),
    },
    #[error("Stage '{stage}' received {images} images but {beam} beam intensities")]
    LengthMismatch {
        stage: String,
        images: usize,
        beam: usize,
    },
    #[error("Stage '{stage}' failed due to ROI error: {source}")]
    Roi {
        stage: String,
        #[source]
        source: RoiError,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline '{pipeline}' failed in stage '{stage}': {source}")]
    StageFailed {
        pipeline: String,
        stage: String,
        #[source]
        source: CorrectionError,
    },
    #[error("Pipeline '{0}' uses DarkSubtract but no dark frame is available")]
    DarkFrameRequired(String),
    #[error("Two pipelines share the name '{0}'")]
    DuplicateName(String),
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Aggregator failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Aggregator could not find any shot files in the scan directory {0:?}")]
    NoMatchingFiles(PathBuf),
    #[error("Aggregator failed due to pipeline error: {0}")]
    PipelineError(#[from] PipelineError),
    #[error("Aggregator failed due to loader error: {0}")]
    LoaderError(#[from] LoaderError),
    #[error("Nothing to save: pipeline '{0}' kept no scan steps")]
    NothingToSave(String),
    #[error("Aggregator was not configured with any pipelines")]
    NoPipelines,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoiError {
    #[error("ROI ({x1}, {y1}, {x2}, {y2}) is inverted or empty; need x1 < x2 and y1 < y2")]
    Inverted { x1: usize, y1: usize, x2: usize, y2: usize },
    #[error("ROI reaching ({x2}, {y2}) does not fit in a {width}x{height} frame")]
    OutOfBounds {
        x2: usize,
        y2: usize,
        width: usize,
        height: usize,
    },
}

#[derive(Debug, Error)]
pub enum MomentError {
    #[error("Moment extraction needs at least one scan step; the series is empty")]
    EmptySeries,
    #[error("Moment extraction failed due to ROI error: {0}")]
    RoiError(#[from] RoiError),
    #[error("Moment series lengths {found:?} do not match {delays} delays")]
    LengthMismatch { delays: usize, found: Vec<usize> },
    #[error("Stacks disagree in shape: pon {pon:?} poff {poff:?} with {delays} delays")]
    ShapeMismatch {
        pon: (usize, usize, usize),
        poff: (usize, usize, usize),
        delays: usize,
    },
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Scan archive {path:?} is missing required key '{key}'")]
    SchemaError { path: PathBuf, key: String },
    #[error("Could not open scan archive because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("HDF5Writer could not encode string attribute: {0}")]
    StringError(String),
}

#[derive(Debug, Error)]
pub enum TableWriterError {
    #[error("TableWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("TableWriter failed due to CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Aggregator error: {0}")]
    AggregatorError(#[from] AggregatorError),
    #[error("Processor failed due to DarkFrame error: {0}")]
    DarkFrameError(#[from] DarkFrameError),
    #[error("Processor failed due to HDF5Writer error: {0}")]
    HDFError(#[from] HDF5WriterError),
    #[error("Processor failed due to TableWriter error: {0}")]
    TableError(#[from] TableWriterError),
    #[error("Processor failed due to Moment error: {0}")]
    MomentError(#[from] MomentError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor could not join worker {0}")]
    WorkerPanicked(usize),
    #[error("Processor requires at least one worker thread, got {0}")]
    BadThreadCount(i32),
    #[error("Processor needs an ROI to analyze, but none was configured")]
    NoRoi,
}
