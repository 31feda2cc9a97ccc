use hdf5::File;
use ndarray::{Array2, Axis, Ix2, Ix3};
use std::path::Path;

use super::constants::DARK_DATASET_NAME;
use super::error::DarkFrameError;

/// Per-pixel detector background, averaged from dark exposures
#[derive(Debug, Clone, PartialEq)]
pub struct DarkFrame {
    pub frame: Array2<f64>,
}

impl DarkFrame {
    pub fn new(frame: Array2<f64>) -> Self {
        Self { frame }
    }

    /// Read the `dark` dataset of an HDF5 file. A 3D dataset is a stack of dark
    /// exposures and is averaged over its first axis.
    pub fn read(path: &Path) -> Result<Self, DarkFrameError> {
        let file = File::open(path)?;
        let dataset = file
            .dataset(DARK_DATASET_NAME)
            .map_err(|_| DarkFrameError::MissingDataset(path.to_path_buf()))?;
        let frame = match dataset.ndim() {
            2 => dataset.read::<f64, Ix2>()?,
            3 => {
                let stack = dataset.read::<f64, Ix3>()?;
                stack
                    .mean_axis(Axis(0))
                    .ok_or_else(|| DarkFrameError::EmptyStack(path.to_path_buf()))?
            }
            ndim => return Err(DarkFrameError::BadDimension(ndim)),
        };
        log::info!(
            "Loaded {}x{} dark frame from {}",
            frame.nrows(),
            frame.ncols(),
            path.display()
        );
        Ok(Self { frame })
    }

    /// Like [`DarkFrame::read`], but a missing file is not an error
    pub fn load_optional(path: &Path) -> Result<Option<Self>, DarkFrameError> {
        if !path.exists() {
            log::warn!(
                "No dark frame found at {}; pipelines using DarkSubtract cannot run",
                path.display()
            );
            return Ok(None);
        }
        Self::read(path).map(Some)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.frame.dim()
    }

    /// Write the frame to a new file, in the layout [`DarkFrame::read`] expects
    pub fn write(&self, path: &Path) -> Result<(), DarkFrameError> {
        let file = File::create(path)?;
        file.new_dataset_builder()
            .with_data(&self.frame)
            .create(DARK_DATASET_NAME)?;
        Ok(())
    }
}
