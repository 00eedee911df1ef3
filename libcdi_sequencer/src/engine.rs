use std::ffi::OsString;
use std::fmt::Display;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;

use super::config::ReconstructionConfig;
use super::constants::{
    BYTES_PER_MB, GA_FAST_BYTES_PER_VOXEL, GA_FAST_CONSTANT_MB, PLAIN_BYTES_PER_VOXEL,
    PLAIN_CONSTANT_MB, POPULOUS_BYTES_PER_VOXEL, POPULOUS_CONSTANT_MB,
};
use super::error::EngineError;

/// Array library the external engine computes with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Numpy,
    Cupy,
    Torch,
}

impl Backend {
    /// Name passed to the engine
    pub fn lib_name(&self) -> &'static str {
        match self {
            Self::Numpy => "np",
            Self::Cupy => "cp",
            Self::Torch => "torch",
        }
    }

    /// Pick the backend from the `processing` and `device` keys.
    ///
    /// `auto` selects cupy when devices are configured and numpy otherwise. Cupy is not
    /// available on macOS.
    pub fn from_processing(processing: &str, device: Option<&[i64]>) -> Result<Self, EngineError> {
        let has_device = device.is_some_and(|ids| !ids.is_empty() && ids != [-1]);
        match processing {
            "auto" if has_device && !cfg!(target_os = "macos") => Ok(Self::Cupy),
            "auto" => Ok(Self::Numpy),
            "cp" if cfg!(target_os = "macos") => Err(EngineError::UnknownBackend(String::from(
                "cp (not supported on macOS)",
            ))),
            "cp" if !has_device => Err(EngineError::NoDevice),
            other => other.parse::<Self>(),
        }
    }
}

impl FromStr for Backend {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "np" => Ok(Self::Numpy),
            "cp" => Ok(Self::Cupy),
            "torch" => Ok(Self::Torch),
            other => Err(EngineError::UnknownBackend(other.to_string())),
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lib_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One reconstruction in one process
    Single,
    /// Several reconstructions, or a GA, spread over MPI ranks
    Multi,
}

impl RunMode {
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Single => "--single",
            Self::Multi => "--multi",
        }
    }

    pub fn for_config(config: &ReconstructionConfig) -> Self {
        if config.reconstructions > 1 || config.ga.is_active() {
            Self::Multi
        } else {
            Self::Single
        }
    }
}

/// Everything the external engine needs to run one reconstruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionRequest {
    pub backend: Backend,
    pub config_path: PathBuf,
    pub data_path: PathBuf,
    pub experiment_dir: PathBuf,
    pub continue_dir: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub mode: RunMode,
}

impl ReconstructionRequest {
    /// Check the paths the engine will read from
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.data_path.is_file() {
            return Err(EngineError::MissingDataFile(self.data_path.clone()));
        }
        if !self.experiment_dir.is_dir() {
            return Err(EngineError::MissingExperiment(self.experiment_dir.clone()));
        }
        if let Some(dir) = self.continue_dir.as_ref() {
            if !dir.is_dir() {
                return Err(EngineError::MissingExperiment(dir.clone()));
            }
        }
        if let Some(model) = self.model_path.as_ref() {
            if !model.is_file() {
                return Err(EngineError::MissingDataFile(model.clone()));
            }
        }
        Ok(())
    }

    /// Command line arguments for the engine entry point
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--lib".into(),
            self.backend.lib_name().into(),
            "--config".into(),
            self.config_path.clone().into(),
            "--data".into(),
            self.data_path.clone().into(),
            "--exp-dir".into(),
            self.experiment_dir.clone().into(),
        ];
        if let Some(dir) = self.continue_dir.as_ref() {
            args.push("--continue-dir".into());
            args.push(dir.clone().into());
        }
        if let Some(model) = self.model_path.as_ref() {
            args.push("--model".into());
            args.push(model.clone().into());
        }
        args.push(self.mode.flag().into());
        args
    }
}

/// Something that can run a reconstruction to completion
pub trait ReconstructionEngine {
    fn reconstruct(&self, request: &ReconstructionRequest) -> Result<(), EngineError>;
}

/// Runs the engine as an external program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEngine {
    program: String,
    leading_args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            leading_args: Vec::new(),
        }
    }

    /// Build from a whitespace separated command line such as `python -m engine`
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self {
            program: program.to_string(),
            leading_args: words.map(String::from).collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn command(&self, request: &ReconstructionRequest) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args).args(request.to_args());
        command
    }
}

impl ReconstructionEngine for CommandEngine {
    fn reconstruct(&self, request: &ReconstructionRequest) -> Result<(), EngineError> {
        request.validate()?;
        log::info!(
            "Launching {} with backend {} in {:?} mode",
            self.program,
            request.backend,
            request.mode
        );
        let status = self
            .command(request)
            .status()
            .map_err(|source| EngineError::LaunchError {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(EngineError::ExitStatus(code)),
            None => Err(EngineError::Terminated),
        }
    }
}

/// How reconstructions share memory on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMethod {
    /// Independent reconstructions
    Plain,
    /// GA with one rank per reconstruction
    GaFast,
    /// GA that keeps the population in one process
    Populous,
}

impl MemoryMethod {
    pub fn for_config(config: &ReconstructionConfig) -> Self {
        match (config.ga.is_active(), config.ga.ga_fast.unwrap_or(false)) {
            (true, true) => Self::GaFast,
            (true, false) => Self::Populous,
            (false, _) => Self::Plain,
        }
    }

    fn model(&self) -> (f64, f64) {
        match self {
            Self::Plain => (PLAIN_BYTES_PER_VOXEL, PLAIN_CONSTANT_MB),
            Self::GaFast => (GA_FAST_BYTES_PER_VOXEL, GA_FAST_CONSTANT_MB),
            Self::Populous => (POPULOUS_BYTES_PER_VOXEL, POPULOUS_CONSTANT_MB),
        }
    }
}

/// Estimated memory, in bytes, of one reconstruction over `voxels` data points
pub fn estimate_job_memory(voxels: usize, method: MemoryMethod, pc_in_use: bool) -> f64 {
    let (per_voxel, constant_mb) = method.model();
    let bytes = voxels as f64 * per_voxel + constant_mb * BYTES_PER_MB;
    if pc_in_use {
        bytes * 2.0
    } else {
        bytes
    }
}

pub fn format_memory(bytes: f64) -> String {
    human_bytes::human_bytes(bytes)
}
