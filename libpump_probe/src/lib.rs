//! # pump_probe
//!
//! pump_probe reduces time-resolved pump-probe X-ray scattering scans, written in Rust. A
//! scan is a directory of per-delay shot files recorded at an XFEL beamline. Each shot
//! file holds detector images, beam monitor (QBPM) waveforms and per-shot metadata. The
//! shots of every delay step are joined on their timestamps, split into laser-on (pon)
//! and laser-off (poff) shots, corrected and averaged. The averages are then stacked along
//! the delay axis and written in the HDF5 format.
//!
//! ## Installation
//!
//! Currently the only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running pump_probe, HDF5 must be installed. Typically this will be
//! installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If a newer version was installed to a
//! custom location, write the following snippet into the file `.cargo/config.toml` in the
//! repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./pump_probe_cli` from the top
//! level repository. See the `pump_probe_cli` README for its usage.
//!
//! ## Configuration
//!
//! - load_dir: Directory containing the `run=NNN/scan=NNN` tree of shot files
//! - save_dir: Directory to which the reduced files are written. Created if missing.
//! - dark_path (Optional): Dark frame reference. If null, `save_dir/DARK/dark.h5` is used.
//! A missing dark file is only an error for pipelines that subtract it.
//! - run_number, scan_number: Select the scan directory and name the outputs
//! - hutch, detector, xray, pump_setting: Select the groups and the pump flag column read
//! from a shot file. With a `0HZ` pump setting every shot is laser-off.
//! - sample_detector_distance, pixel_size, beam_energy: Detector geometry used to convert
//! pixel centroids to momentum transfer
//! - n_threads: The number of parallel worker threads to divide the shot files amongst.
//! Only the threads that would do work are created. Must be at least 1.
//! - pipelines: Named, ordered lists of correction stages. Each pipeline yields its own
//! stacked output.
//! - roi (Optional): If set, the ROI moment table of every pipeline is written as well
//! - centroid_estimator: `weighted` or `gaussian`
//!
//! The YAML format of a configuration file is as follows (pipelines shortened):
//!
//! ```yml
//! load_dir: /data/raw
//! save_dir: /data/reduced
//! dark_path: null
//! run_number: 1
//! scan_number: 1
//! hutch: eh1
//! detector: jungfrau2
//! xray: HX
//! pump_setting: 15HZ
//! sample_detector_distance: 1.3
//! pixel_size: 7.5e-5
//! beam_energy: 10.0
//! n_threads: 4
//! pipelines:
//! - name: normalize_images_by_qbpm
//!   stages:
//!   - stage: dark_subtract
//!   - stage: ransac_outlier_filter
//!     max_trials: 100
//!   - stage: qbpm_normalize
//! roi:
//!   x1: 100
//!   y1: 100
//!   x2: 200
//!   y2: 200
//! centroid_estimator: weighted
//! ```
//!
//! Stages run in the order they are listed.
//!
//! ## Output
//!
//! For every pipeline three HDF5 files and optionally one CSV table are written to
//! `save_dir`, named `run=NNNN_scan=NNNN_<pipeline>[_pon|_poff].h5` and
//! `run=NNNN_scan=NNNN_<pipeline>.csv`.
//!
//! ### HDF5 Data Format
//!
//! ```text
//! run=0001_scan=0001_<pipeline>.h5 - version, pipeline
//! |---- delay(dset) [S]
//! |---- pon(dset) [S, H, W]
//! |---- poff(dset) [S, H, W]
//! |---- pon_qbpm(dset) [S]
//! |---- poff_qbpm(dset) [S]
//! |---- dropped_file_index(dset), dropped_delay(dset) [D]
//!
//! run=0001_scan=0001_<pipeline>_pon.h5
//! |---- data(dset) [H, W, S] - axes
//! ```
//!
//! A step with no laser-on (or laser-off) shots is NaN-filled in that array. Steps for which
//! the pipeline left no shots at all are listed in the dropped datasets instead of being
//! stacked.
pub mod aggregator;
pub mod config;
pub mod constants;
pub mod correction;
pub mod dark_frame;
pub mod error;
pub mod gaussian;
pub mod hdf_writer;
pub mod loader;
pub mod moments;
pub mod pipeline;
pub mod process;
pub mod regression;
pub mod roi;
pub mod shot;
pub mod table_writer;
pub mod worker_status;

#[cfg(test)]
pub(crate) mod test_utils;
