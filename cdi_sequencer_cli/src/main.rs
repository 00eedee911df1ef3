//! # cdi_sequencer_cli
//!
//! Part of the cdi_sequencer crate family.
//!
//! Command line interface for planning and launching CDI reconstructions.
//!
//! ## Use
//!
//! ```bash
//! cdi_sequencer_cli -p config_rec new       # write a template configuration
//! cdi_sequencer_cli -p config_rec check     # validate a configuration
//! cdi_sequencer_cli -p config_rec plan      # print the iteration plan
//! cdi_sequencer_cli -p config_rec convert -o config_rec_new
//! cdi_sequencer_cli -p job.yaml job -o job.pbs
//! cdi_sequencer_cli -p config_rec run --exp-dir ./experiment --engine "python -m cohere_engine"
//! ```
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use libcdi_sequencer::config::ReconstructionConfig;
use libcdi_sequencer::convert::convert_file;
use libcdi_sequencer::engine::{estimate_job_memory, format_memory, CommandEngine, MemoryMethod};
use libcdi_sequencer::error::ConfigError;
use libcdi_sequencer::job_script::JobConfig;
use libcdi_sequencer::process::{build_request, plan_reconstruction, process};

const DEFAULT_ENGINE: &str = "python -m cohere_engine";

/// Rank of this process within an MPI job, if launched by mpiexec
fn mpi_rank() -> Option<String> {
    ["PMI_RANK", "OMPI_COMM_WORLD_RANK", "PMIX_RANK"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
}

fn init_logging(pb_manager: &MultiProgress, verbose: bool, log_dir: Option<&Path>) {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];
    if let Some(dir) = log_dir {
        let name = match mpi_rank() {
            Some(rank) => format!("cdi_sequencer_{rank}.log"),
            None => String::from("cdi_sequencer.log"),
        };
        match File::create(dir.join(name)) {
            Ok(file) => loggers.push(simplelog::WriteLogger::new(
                level,
                simplelog::Config::default(),
                file,
            )),
            Err(e) => eprintln!("Could not create log file in {}: {e}", dir.display()),
        }
    }
    let logger = simplelog::CombinedLogger::new(loggers);

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");
    log::set_max_level(level);
}

fn make_template_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = ReconstructionConfig::template()?;
    std::fs::write(path, text)?;
    Ok(())
}

fn load_config(path: &Path) -> Option<ReconstructionConfig> {
    log::info!("Loading config from {}...", path.to_string_lossy());
    match ReconstructionConfig::read_config_file(path) {
        Ok(c) => {
            log::info!("Config successfully loaded.");
            Some(c)
        }
        Err(e) => {
            log::error!("{e}");
            None
        }
    }
}

fn check_config(path: &Path) -> bool {
    let Some(config) = load_config(path) else {
        return false;
    };
    match plan_reconstruction(&config) {
        Ok(schedule) => {
            log::info!("Algorithm sequence: {}", schedule.sequence);
            log::info!("Reconstructions: {}", config.reconstructions);
            if let Some(ga) = schedule.genetic.as_ref() {
                log::info!("GA generations: {}", ga.generations);
            }
            log::info!("Configuration is valid.");
            true
        }
        Err(e) => {
            log::error!("{e}");
            false
        }
    }
}

fn print_plan(path: &Path, matches: &ArgMatches) -> bool {
    let Some(config) = load_config(path) else {
        return false;
    };
    let schedule = match plan_reconstruction(&config) {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            return false;
        }
    };
    for line in schedule.summary() {
        println!("{line}");
    }
    if let Some(voxels) = matches.get_one::<usize>("voxels") {
        let bytes = estimate_job_memory(
            *voxels,
            MemoryMethod::for_config(&config),
            config.is_pc_in_use(),
        );
        println!("Estimated memory per reconstruction: {}", format_memory(bytes));
    }
    true
}

fn convert(path: &Path, matches: &ArgMatches) -> bool {
    let output = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf());
    match convert_file(path, &output) {
        Ok(report) if report.is_unchanged() => {
            log::info!("Configuration is already up to date.");
            true
        }
        Ok(report) => {
            for (old, new) in report.renamed.iter() {
                log::info!("Renamed {old} to {new}");
            }
            if let Some(sequence) = report.sequence.as_ref() {
                log::info!("Algorithm sequence is now {sequence}");
            }
            log::info!("Wrote converted configuration to {}", output.display());
            true
        }
        Err(e) => {
            log::error!("{e}");
            false
        }
    }
}

fn write_job(path: &Path, matches: &ArgMatches) -> bool {
    let job = match JobConfig::read_config_file(path) {
        Ok(j) => j,
        Err(e) => {
            log::error!("{e}");
            return false;
        }
    };
    let result = match matches.get_one::<String>("output") {
        Some(output) => job.write_script(Path::new(output)),
        None => job.render().map(|script| print!("{script}")).map_err(ConfigError::from),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            log::error!("{e}");
            false
        }
    }
}

fn run(path: &Path, matches: &ArgMatches, pb_manager: &MultiProgress) -> bool {
    let Some(config) = load_config(path) else {
        return false;
    };
    let experiment_dir = matches
        .get_one::<String>("exp-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let engine_line = matches
        .get_one::<String>("engine")
        .map(String::as_str)
        .unwrap_or(DEFAULT_ENGINE);
    let Some(engine) = CommandEngine::from_command_line(engine_line) else {
        log::error!("Engine command is empty");
        return false;
    };
    let request = match build_request(
        &config,
        path,
        &experiment_dir,
        matches.get_one::<String>("continue-dir").map(PathBuf::from),
        matches.get_one::<String>("model").map(PathBuf::from),
    ) {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            return false;
        }
    };
    log::info!("Experiment directory: {}", experiment_dir.display());
    log::info!("Data file: {}", request.data_path.display());
    log::info!("Backend: {}", request.backend);

    // Setup the progress spinner
    let pb = pb_manager.add(ProgressBar::new_spinner());
    pb.enable_steady_tick(Duration::from_millis(100));
    let (tx, rx) = channel();
    // Spawn the task!
    let handle = std::thread::spawn(move || process(&config, &request, &engine, &tx));

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(status) => pb.set_message(status.message),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if handle.is_finished() {
            break;
        }
    }
    pb.finish_and_clear();

    match handle.join() {
        Ok(Ok(())) => {
            log::info!("Successfully ran reconstruction!");
            true
        }
        Ok(Err(e)) => {
            log::error!("Reconstruction failed with error: {e}");
            false
        }
        Err(_) => {
            log::error!("Failed to join reconstruction task!");
            false
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("cdi_sequencer_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template reconstruction configuration"))
        .subcommand(Command::new("check").about("Validate a reconstruction configuration"))
        .subcommand(
            Command::new("plan")
                .about("Print the iteration plan of a reconstruction configuration")
                .arg(
                    Arg::new("voxels")
                        .long("voxels")
                        .value_parser(clap::value_parser!(usize))
                        .help("Number of data voxels, used to estimate memory"),
                ),
        )
        .subcommand(
            Command::new("convert")
                .about("Convert a configuration written for an older version")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Where to write the converted file; defaults to the input"),
                ),
        )
        .subcommand(
            Command::new("job")
                .about("Render a PBS job script from a job yaml file")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Where to write the script; printed when omitted"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run a reconstruction with the external engine")
                .arg(Arg::new("exp-dir").long("exp-dir").help("Experiment directory"))
                .arg(
                    Arg::new("engine")
                        .long("engine")
                        .help("Engine command line, e.g. \"python -m cohere_engine\""),
                )
                .arg(
                    Arg::new("continue-dir")
                        .long("continue-dir")
                        .help("Directory of results to continue from"),
                )
                .arg(Arg::new("model").long("model").help("Trained model file"))
                .arg(
                    Arg::new("log-dir")
                        .long("log-dir")
                        .help("Directory for a per-rank log file"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .get_matches();

    let log_dir = matches
        .subcommand_matches("run")
        .and_then(|m| m.get_one::<String>("log-dir"))
        .map(PathBuf::from);

    // Initialize feedback
    let pb_manager = MultiProgress::new();
    init_logging(&pb_manager, matches.get_flag("verbose"), log_dir.as_deref());

    // Parse the cli
    let path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    let success = match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                path.to_string_lossy()
            );
            match make_template_config(&path) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("{e}");
                    false
                }
            }
        }
        Some(("check", _)) => check_config(&path),
        Some(("plan", sub)) => print_plan(&path, sub),
        Some(("convert", sub)) => convert(&path, sub),
        Some(("job", sub)) => write_job(&path, sub),
        Some(("run", sub)) => run(&path, sub, &pb_manager),
        _ => {
            log::error!("No command given.");
            false
        }
    };

    if !success {
        std::process::exit(1);
    }
    log::info!("Done.");
}
