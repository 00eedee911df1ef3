//! # cdi_sequencer
//!
//! cdi_sequencer plans and launches coherent diffraction imaging (CDI) phase retrieval
//! runs. The numerical work (the projection algorithms, partial coherence, shrink-wrap and
//! the FFTs) is done by an external reconstruction engine. This crate owns what has to be
//! decided before that engine starts: which algorithm runs at each iteration, and which
//! features (twin removal, shrink-wrap, phase constraint, partial coherence, low-pass
//! filtering, averaging, progress reports) are applied at that iteration.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installing the tool chain.
//!
//! To build and install the CLI use `cargo install --path ./cdi_sequencer_cli` from the top
//! level of the repository. To use the CLI see the `cdi_sequencer_cli` crate documentation.
//!
//! ## Algorithm sequences
//!
//! The `algorithm_sequence` key holds a small expression language:
//!
//! ```text
//! sequence   := term ('+' term)*
//! term       := (integer '*')? atom
//! atom       := ALGONAME | '(' sequence ')'
//! ```
//!
//! where `ALGONAME` is one of `ER`, `ERpc`, `HIO` or `HIOpc`. For example
//! `3* (20*ER + 180*HIO) + 20*ER` runs 20 ER and 180 HIO iterations three times and then
//! 20 more ER iterations, 620 iterations in total.
//!
//! ## Triggers
//!
//! Each feature is switched on by a trigger key holding one to three integers:
//!
//! - `[s]`: only at iteration `s`
//! - `[s, i]`: at `s`, `s + i`, `s + 2i`, ... until the end of the run
//! - `[s, i, e]`: as above, but not after iteration `e`
//!
//! A negative `s` or `e` counts back from the end of the run, so `average_trigger = [-65, 1]`
//! averages over the last 65 iterations. A key that is absent (or commented out) switches
//! the feature off.
//!
//! | Feature           | Key                      |
//! |-------------------|--------------------------|
//! | twin              | `twin_trigger`           |
//! | shrink-wrap       | `shrink_wrap_trigger`    |
//! | phase constraint  | `phc_trigger`            |
//! | partial coherence | `pc_interval`            |
//! | low-pass filter   | `lowpass_filter_trigger` |
//! | average           | `average_trigger`        |
//! | progress          | `progress_trigger`       |
//!
//! A plain integer `pc_interval` starts at the first `ERpc`/`HIOpc` iteration.
//!
//! ## Genetic algorithm
//!
//! When `ga_generations` is set the reconstruction runs as a genetic algorithm. The twin,
//! phase constraint and low-pass filter features only apply in the first generation, and
//! partial coherence only from generation `ga_gen_pc_start` on.
//!
//! ## Configuration
//!
//! Configuration files use `key = value` lines with `//` or `#` comments, for example
//!
//! ```text
//! reconstructions = 1
//! algorithm_sequence = "3* (20*ER + 180*HIO) + 20*ER"
//! hio_beta = .9
//! twin_trigger = [2]
//! shrink_wrap_trigger = [10, 1]
//! // pc_interval = 50
//! progress_trigger = [0, 20]
//! ```
//!
//! Files ending in `.yml` or `.yaml` are read as YAML with the same keys. Configurations
//! written for older versions can be brought up to date with the [`convert`] module.
pub mod algorithm;
pub mod config;
pub mod config_file;
pub mod constants;
pub mod convert;
pub mod engine;
pub mod error;
pub mod genetic;
pub mod job_script;
pub mod plan;
pub mod process;
pub mod run_status;
pub mod sequence;
pub mod trigger;
