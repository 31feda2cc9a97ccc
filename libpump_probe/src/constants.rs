// hc in keV * Angstrom
pub const WAVELENGTH_COEFFICIENT: f64 = 12.398419843320025;

// Shot file layout
pub const METADATA_GROUP: &str = "metadata";
pub const METADATA_INDEX: &str = "metadata/index";
pub const IMAGE_INDEX_NAME: &str = "block0_items";
pub const IMAGE_VALUES_NAME: &str = "block0_values";
pub const QBPM_INDEX_NAME: &str = "waveforms.ch1/axis1";
pub const QBPM_CHANNELS: usize = 4;
/// Delay fields in order of preference
pub const DELAY_FIELDS: [&str; 2] = ["th_value", "delay_value"];
pub const SHOT_FILE_PREFIX: &str = "p";
pub const SHOT_FILE_EXTENSION: &str = "h5";

// Dark frame reference
pub const DARK_DIRECTORY: &str = "DARK";
pub const DARK_FILE_NAME: &str = "dark.h5";
pub const DARK_DATASET_NAME: &str = "dark";

// Scan archive layout
pub const DELAY_NAME: &str = "delay";
pub const PON_NAME: &str = "pon";
pub const POFF_NAME: &str = "poff";
pub const PON_QBPM_NAME: &str = "pon_qbpm";
pub const POFF_QBPM_NAME: &str = "poff_qbpm";
pub const DROPPED_INDEX_NAME: &str = "dropped_file_index";
pub const DROPPED_DELAY_NAME: &str = "dropped_delay";
pub const ARRAY_DATASET_NAME: &str = "data";
/// This is the version of the output format
pub const FORMAT_VERSION: &str = "1.0";
