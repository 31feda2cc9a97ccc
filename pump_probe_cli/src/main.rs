use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libpump_probe::config::Config;
use libpump_probe::process::{analyze, process};
use libpump_probe::worker_status::{BarColor, WorkerStatus};

const BAR_LENGTH: u64 = 100;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "Worker {prefix}: [{bar:40.cyan/blue}] {pos}%",
        BarColor::GREEN => "Worker {prefix}: [{bar:40.green/blue}] {pos}%",
    };
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn update_bar(bars: &[ProgressBar], status: &WorkerStatus) {
    if let Some(bar) = bars.get(status.worker_id) {
        bar.set_style(bar_style(&status.color));
        bar.set_position((status.progress * BAR_LENGTH as f32) as u64);
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("pump_probe_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("analyze").about("Extract ROI moments from already reduced series"),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Load Path: {}", config.load_dir.to_string_lossy());
    log::info!("Save Path: {}", config.save_dir.to_string_lossy());
    log::info!("Dark Path: {}", config.get_dark_path().to_string_lossy());
    log::info!("Run: {} Scan: {}", config.run_number, config.scan_number);
    log::info!(
        "Pipelines: {}",
        config
            .pipelines
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if let Some(("analyze", _)) = matches.subcommand() {
        match analyze(&config) {
            Ok(tables) => log::info!("Wrote {} moment tables.", tables.len()),
            Err(e) => log::error!("Analysis failed with error: {e}"),
        }
        log::info!("Done.");
        return;
    }

    // Setup the progress bars, one per worker
    let bars: Vec<ProgressBar> = (0..config.n_threads.max(1))
        .map(|id| {
            let bar = pb_manager.add(ProgressBar::new(BAR_LENGTH));
            bar.set_prefix(id.to_string());
            bar.set_style(bar_style(&BarColor::CYAN));
            bar
        })
        .collect();

    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || process(&config, &tx));

    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(500)) {
            Ok(status) => update_bar(&bars, &status),
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(series) => log::info!("Successfully reduced {} pipelines!", series.len()),
            Err(e) => log::error!("Reduction failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join reduction task!"),
    }

    for bar in bars.iter() {
        bar.finish();
    }

    log::info!("Done.");
}
