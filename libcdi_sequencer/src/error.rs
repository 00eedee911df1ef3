use std::path::PathBuf;
use thiserror::Error;

use super::run_status::RunStatus;
use super::trigger::Feature;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("Syntax error in algorithm sequence at position {position}: {reason} (found '{found}')")]
    SyntaxError {
        position: usize,
        found: String,
        reason: &'static str,
    },
    #[error("Unknown algorithm '{name}' at position {position} in algorithm sequence")]
    UnknownAlgorithm { position: usize, name: String },
    #[error("Repeat count at position {0} in algorithm sequence must be at least 1")]
    ZeroRepeat(usize),
    #[error("Repeat count '{found}' at position {position} in algorithm sequence does not fit in an integer")]
    CountOverflow { position: usize, found: String },
    #[error("Algorithm sequence expands to more iterations than can be represented")]
    TooManyIterations,
    #[error("Algorithm sequence expands to {total} iterations; at most {limit} are allowed")]
    IterationLimit { total: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("Trigger has {0} values; expected 1 to 3")]
    BadArity(usize),
    #[error("Trigger has interval {0}; the interval must be greater than 0")]
    BadInterval(i64),
    #[error("Trigger stops at iteration {stop} before it starts at iteration {start}")]
    StopBeforeStart { start: i64, stop: i64 },
    #[error("Trigger offset {offset} reaches before the first of {total} iterations")]
    OffsetBeforeRun { offset: i64, total: usize },
    #[error("Trigger value {0} does not fit in an iteration index")]
    OutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValueError {
    #[error("Line {line}: expected 'key = value', found '{text}'")]
    MissingAssignment { line: usize, text: String },
    #[error("Line {line}: key '{key}' has no value")]
    EmptyValue { line: usize, key: String },
    #[error("Line {line}: unterminated string in value of '{key}'")]
    UnterminatedString { line: usize, key: String },
    #[error("Line {line}: unbalanced brackets in value of '{key}'")]
    UnbalancedBrackets { line: usize, key: String },
    #[error("Line {line}: lists may not be nested in value of '{key}'")]
    NestedList { line: usize, key: String },
    #[error("Line {line}: key '{key}' is defined more than once")]
    DuplicateKey { line: usize, key: String },
    #[error("Key '{key}' has the wrong type; expected {expected}")]
    WrongType { key: String, expected: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneticError {
    #[error("Number of GA generations must be greater than 1, found {0}")]
    TooFewGenerations(usize),
    #[error("GA requires at least 2 reconstructions, found {0}")]
    TooFewReconstructions(usize),
    #[error("At least two reconstructions should be left after culling; starting with {reconstructions} but ga_cullings adds to {culled}")]
    OverCulled {
        reconstructions: usize,
        culled: usize,
    },
    #[error("Unknown GA metric '{0}'")]
    UnknownMetric(String),
    #[error("Unknown GA breed mode '{0}'")]
    UnknownBreedMode(String),
    #[error("Generation {generation} is out of range for a GA run of {generations} generations")]
    GenerationOutOfRange {
        generation: usize,
        generations: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config failed to parse a value: {0}")]
    ValueError(#[from] ConfigValueError),
    #[error("Config has an invalid algorithm sequence: {0}")]
    SequenceError(#[from] SequenceError),
    #[error("Config has an invalid job setup: {0}")]
    JobScriptError(#[from] JobScriptError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan failed due to algorithm sequence error: {0}")]
    SequenceError(#[from] SequenceError),
    #[error("Plan failed due to error in {0} trigger: {1}")]
    TriggerError(Feature, #[source] TriggerError),
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Converter failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Converter could not read legacy algorithm sequence at position {position}: {reason}")]
    LegacySequence {
        position: usize,
        reason: &'static str,
    },
    #[error("Converter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine could not find the data file {0:?}")]
    MissingDataFile(PathBuf),
    #[error("Engine could not find the experiment directory {0:?}")]
    MissingExperiment(PathBuf),
    #[error("Engine was given an unknown backend '{0}'; expected auto, np, cp or torch")]
    UnknownBackend(String),
    #[error("Engine cannot use cupy processing without a configured device")]
    NoDevice,
    #[error("Engine failed to launch '{program}': {source}")]
    LaunchError {
        program: String,
        source: std::io::Error,
    },
    #[error("Engine process exited with status {0}")]
    ExitStatus(i32),
    #[error("Engine process was terminated by a signal")]
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobScriptError {
    #[error("Job script requires at least one node and one rank per node")]
    NoRanks,
    #[error("Job script walltime '{0}' is not in HH:MM:SS form")]
    BadWalltime(String),
    #[error("Job script requires a wrapper command")]
    NoCommand,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Plan error: {0}")]
    PlanError(#[from] PlanError),
    #[error("Processor failed due to GA error: {0}")]
    GeneticError(#[from] GeneticError),
    #[error("Processor failed due to Engine error: {0}")]
    EngineError(#[from] EngineError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<RunStatus>),
}
