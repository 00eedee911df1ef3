/// Key holding the algorithm sequence expression
pub const ALGORITHM_SEQUENCE_KEY: &str = "algorithm_sequence";

/// Default sequence used by template configurations
pub const DEFAULT_ALGORITHM_SEQUENCE: &str = "1*(20*ER+80*HIO)+20*ER";

/// Substring marking a partial coherence algorithm in a sequence expression
pub const PC_ALGORITHM_MARKER: &str = "pc";

/// Both comment markers accepted by the configuration reader
pub const COMMENT_MARKERS: [&str; 2] = ["//", "#"];

/// Memory model of a single reconstruction, in bytes per voxel and a constant in MB
pub const PLAIN_BYTES_PER_VOXEL: f64 = 170.0;
pub const PLAIN_CONSTANT_MB: f64 = 100.0;
pub const GA_FAST_BYTES_PER_VOXEL: f64 = 184.0;
pub const GA_FAST_CONSTANT_MB: f64 = 428.0;
pub const POPULOUS_BYTES_PER_VOXEL: f64 = 250.0;
pub const POPULOUS_CONSTANT_MB: f64 = 0.0;

pub const BYTES_PER_MB: f64 = 1_000_000.0;

/// Upper bound on the number of iterations of one run
pub const MAX_ITERATIONS: usize = 10_000_000;
