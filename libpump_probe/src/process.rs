use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::aggregator::{ScanAggregator, ScanSeries, StepResult};
use super::config::Config;
use super::constants::{POFF_NAME, PON_NAME};
use super::dark_frame::DarkFrame;
use super::error::ProcessorError;
use super::hdf_writer::HDFWriter;
use super::moments::{DetectorGeometry, MomentTable, RoiMomentExtractor};
use super::table_writer::write_moment_table;
use super::worker_status::{BarColor, WorkerStatus};

/// Outcome of one file, tagged with its position in acquisition order
pub type FileOutcome = (usize, Option<Vec<StepResult>>);

/// Deal `n_files` file positions round-robin to at most `n_threads` workers.
/// Workers that would get nothing are not created.
pub fn create_subsets(n_files: usize, n_threads: usize) -> Vec<Vec<usize>> {
    let mut subsets: Vec<Vec<usize>> = vec![Vec::new(); n_threads.max(1)];
    let n_subsets = subsets.len();

    for position in 0..n_files {
        subsets[position % n_subsets].push(position)
    }

    subsets.retain(|subset| !subset.is_empty());
    subsets
}

/// Process a subset of file positions, reporting progress after every file
pub fn process_subset(
    aggregator: &ScanAggregator,
    subset: &[usize],
    scan_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<FileOutcome>, ProcessorError> {
    tx.send(WorkerStatus::new(0.0, scan_number, worker_id, BarColor::CYAN))?;
    let mut outcomes = Vec::with_capacity(subset.len());
    for (done, position) in subset.iter().enumerate() {
        outcomes.push((*position, aggregator.process_position(*position)));
        tx.send(WorkerStatus::new(
            (done + 1) as f32 / subset.len() as f32,
            scan_number,
            worker_id,
            BarColor::CYAN,
        ))?;
    }
    tx.send(WorkerStatus::new(1.0, scan_number, worker_id, BarColor::GREEN))?;
    Ok(outcomes)
}

/// Reduce every file of the scan on `n_threads` workers and stack the results.
///
/// Outcomes are put back in acquisition order before stacking, so the result does not
/// depend on the number of workers.
pub fn reduce_scan(
    aggregator: Arc<ScanAggregator>,
    n_threads: usize,
    scan_number: i32,
    tx: &Sender<WorkerStatus>,
) -> Result<Vec<ScanSeries>, ProcessorError> {
    let subsets = create_subsets(aggregator.n_files(), n_threads);
    log::info!(
        "Reducing {} files on {} workers",
        aggregator.n_files(),
        subsets.len()
    );

    let mut workers = Vec::with_capacity(subsets.len());
    for (worker_id, subset) in subsets.into_iter().enumerate() {
        let aggregator = aggregator.clone();
        let tx = tx.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(&aggregator, &subset, scan_number, &tx, worker_id)
        }));
    }

    let mut outcomes: Vec<FileOutcome> = Vec::with_capacity(aggregator.n_files());
    for (worker_id, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(result) => outcomes.extend(result?),
            Err(_) => return Err(ProcessorError::WorkerPanicked(worker_id)),
        }
    }
    outcomes.sort_by_key(|(position, _)| *position);

    Ok(aggregator.assemble(outcomes.into_iter().map(|(_, o)| o).collect())?)
}

/// Write the named-mapping file and the per-array files of one series
pub fn write_series_outputs(
    config: &Config,
    series: &ScanSeries,
) -> Result<Vec<PathBuf>, ProcessorError> {
    let hdf_path = config.get_hdf_file_name(&series.pipeline)?;
    HDFWriter::new(&hdf_path)?.write_series(series)?;

    let pon_path = config.get_array_file_name(&series.pipeline, PON_NAME)?;
    HDFWriter::write_array(&pon_path, &series.pon)?;
    let poff_path = config.get_array_file_name(&series.pipeline, POFF_NAME)?;
    HDFWriter::write_array(&poff_path, &series.poff)?;

    if !series.dropped.is_empty() {
        log::warn!(
            "Pipeline '{}' dropped {} steps at delays {:?}",
            series.pipeline,
            series.dropped.len(),
            series.dropped_delays()
        );
    }
    Ok(vec![hdf_path, pon_path, poff_path])
}

fn moment_extractor(config: &Config) -> Result<RoiMomentExtractor, ProcessorError> {
    let roi = config.roi.ok_or(ProcessorError::NoRoi)?;
    Ok(RoiMomentExtractor::new(
        roi,
        config.centroid_estimator,
        DetectorGeometry::from_config(config),
    )?)
}

/// Extract the ROI moments of a series and write them as CSV
pub fn write_moment_outputs(
    config: &Config,
    series: &ScanSeries,
) -> Result<MomentTable, ProcessorError> {
    let table = moment_extractor(config)?.analyze(series)?;
    write_moment_table(&config.get_table_file_name(&series.pipeline)?, &table)?;
    Ok(table)
}

/// The main loop of the reduction.
///
/// Loads the dark frame, reduces the scan with every configured pipeline and writes the
/// results. If an ROI is configured the moment tables are written as well.
pub fn process(
    config: &Config,
    tx: &Sender<WorkerStatus>,
) -> Result<Vec<ScanSeries>, ProcessorError> {
    if !config.is_n_threads_valid() {
        return Err(ProcessorError::BadThreadCount(config.n_threads));
    }
    if !config.save_dir.exists() {
        std::fs::create_dir_all(&config.save_dir)?;
    }

    let dark = DarkFrame::load_optional(&config.get_dark_path())?.map(Arc::new);
    let aggregator = Arc::new(ScanAggregator::new(config, dark)?);
    log::info!(
        "Total scan size: {}",
        human_bytes::human_bytes(aggregator.get_total_data_size() as f64)
    );

    let series = reduce_scan(aggregator, config.n_threads as usize, config.scan_number, tx)?;

    for s in series.iter() {
        write_series_outputs(config, s)?;
        if config.roi.is_some() {
            write_moment_outputs(config, s)?;
        }
    }
    Ok(series)
}

/// Re-run the moment extraction on the series files already written for every configured
/// pipeline. Pipelines without a series file (skipped or empty during the reduction) are
/// left out with a warning.
pub fn analyze(config: &Config) -> Result<Vec<MomentTable>, ProcessorError> {
    let extractor = moment_extractor(config)?;
    let mut tables = Vec::with_capacity(config.pipelines.len());
    for pipeline in config.pipelines.iter() {
        let path = config.get_hdf_file_name(&pipeline.name)?;
        if !path.exists() {
            log::warn!(
                "No series file for pipeline '{}' at {}; skipping it",
                pipeline.name,
                path.display()
            );
            continue;
        }
        log::info!("Analyzing {}...", path.display());
        let series = ScanSeries::read(&path)?;
        let table = extractor.analyze(&series)?;
        write_moment_table(&config.get_table_file_name(&pipeline.name)?, &table)?;
        tables.push(table);
    }
    Ok(tables)
}
