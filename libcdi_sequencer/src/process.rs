use fxhash::FxHasher64;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::config::ReconstructionConfig;
use super::engine::{Backend, ReconstructionEngine, ReconstructionRequest, RunMode};
use super::error::{PlanError, ProcessorError};
use super::genetic::GeneticPlan;
use super::plan::{build_generation_plans, IterationPlan, RunContext};
use super::run_status::{RunStage, RunStatus};
use super::sequence::SequenceNode;
use super::trigger::{Feature, TriggerSet};

/// Everything derived from a configuration before the engine starts
#[derive(Debug, Clone)]
pub struct Schedule {
    pub sequence: SequenceNode,
    pub triggers: TriggerSet,
    pub genetic: Option<GeneticPlan>,
    /// One plan, or one plan per GA generation
    pub plans: Vec<IterationPlan>,
}

impl Schedule {
    /// Combined fingerprint of every plan
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        for plan in self.plans.iter() {
            hasher.write_u64(plan.fingerprint());
        }
        hasher.finish()
    }

    /// Human readable description of each plan
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("Algorithm sequence: {}", self.sequence)];
        for plan in self.plans.iter() {
            let header = match plan.context() {
                RunContext::Single => String::from("Plan"),
                RunContext::Genetic { generation, .. } => format!("Generation {generation}"),
            };
            lines.push(format!(
                "{header}: {} iterations, fingerprint {:016x}",
                plan.len(),
                plan.fingerprint()
            ));
            let runs: Vec<String> = plan
                .algorithm_runs()
                .iter()
                .map(|(token, count)| format!("{count}*{token}"))
                .collect();
            lines.push(format!("  algorithms: {}", runs.join(" ")));
            for feature in Feature::ALL {
                let iterations = plan.iterations_with(feature);
                if let (Some(first), Some(last)) = (iterations.first(), iterations.last()) {
                    lines.push(format!(
                        "  {feature}: {} iterations from {first} to {last}",
                        iterations.len()
                    ));
                }
            }
        }
        lines
    }
}

/// Parse, validate and expand a configuration into its schedule.
///
/// Every rank of an MPI job calls this on the same configuration and logs the fingerprint,
/// so the logs show whether all ranks agree on the plan.
pub fn plan_reconstruction(config: &ReconstructionConfig) -> Result<Schedule, ProcessorError> {
    let sequence = config.sequence().map_err(PlanError::from)?;
    let triggers = config.triggers(&sequence)?;
    let genetic = config.genetic(config.reconstructions)?;

    let plans = match genetic.as_ref() {
        Some(ga) => {
            for generation in 0..ga.generations {
                log::debug!(
                    "Generation {generation}: population {}, metric {}, breed mode {}",
                    ga.population(generation)?,
                    ga.metric(generation)?,
                    ga.breed_mode(generation)?
                );
            }
            build_generation_plans(&sequence, &triggers, ga)?
        }
        None => vec![IterationPlan::build(
            &sequence,
            &triggers,
            RunContext::Single,
        )?],
    };

    let schedule = Schedule {
        sequence,
        triggers,
        genetic,
        plans,
    };
    log::info!(
        "Planned {} iterations in {} plan(s), fingerprint {:016x}",
        schedule.plans.iter().map(|p| p.len()).sum::<usize>(),
        schedule.plans.len(),
        schedule.fingerprint()
    );
    Ok(schedule)
}

/// Default data file of an experiment: `data_dir` from the configuration or `phasing_data`
pub fn default_data_path(config: &ReconstructionConfig, experiment_dir: &Path) -> PathBuf {
    let data_dir = config
        .extra
        .get("data_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| experiment_dir.join("phasing_data"));
    data_dir.join("data.tif")
}

/// Assemble the engine request for a configuration
pub fn build_request(
    config: &ReconstructionConfig,
    config_path: &Path,
    experiment_dir: &Path,
    continue_dir: Option<PathBuf>,
    model_path: Option<PathBuf>,
) -> Result<ReconstructionRequest, ProcessorError> {
    let backend = Backend::from_processing(&config.processing, config.device.as_deref())?;
    Ok(ReconstructionRequest {
        backend,
        config_path: config_path.to_path_buf(),
        data_path: default_data_path(config, experiment_dir),
        experiment_dir: experiment_dir.to_path_buf(),
        continue_dir,
        model_path,
        mode: RunMode::for_config(config),
    })
}

/// The main entry point of a reconstruction run.
///
/// Plans first so a bad configuration fails before the engine is launched, then hands the
/// request to the engine. Progress is reported through `tx`.
pub fn process<E: ReconstructionEngine>(
    config: &ReconstructionConfig,
    request: &ReconstructionRequest,
    engine: &E,
    tx: &Sender<RunStatus>,
) -> Result<(), ProcessorError> {
    tx.send(RunStatus::new(RunStage::Planning, None, "Planning"))?;
    let schedule = plan_reconstruction(config)?;
    let fingerprint = Some(schedule.fingerprint());

    tx.send(RunStatus::new(
        RunStage::Running,
        fingerprint,
        &format!("Running {}", request.backend),
    ))?;
    engine.reconstruct(request)?;

    tx.send(RunStatus::new(RunStage::Finished, fingerprint, "Done"))?;
    log::info!("Reconstruction finished.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::cell::Cell;
    use std::sync::mpsc::channel;

    struct RecordingEngine {
        calls: Cell<usize>,
        fail: bool,
    }

    impl ReconstructionEngine for RecordingEngine {
        fn reconstruct(&self, _request: &ReconstructionRequest) -> Result<(), EngineError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(EngineError::ExitStatus(3))
            } else {
                Ok(())
            }
        }
    }

    fn request() -> ReconstructionRequest {
        ReconstructionRequest {
            backend: Backend::Numpy,
            config_path: PathBuf::from("conf/config_rec"),
            data_path: PathBuf::from("phasing_data/data.tif"),
            experiment_dir: PathBuf::from("."),
            continue_dir: None,
            model_path: None,
            mode: RunMode::Single,
        }
    }

    #[test]
    fn test_plan_single() {
        let config = ReconstructionConfig {
            algorithm_sequence: String::from("3* (20*ER + 180*HIO) + 20*ER"),
            ..ReconstructionConfig::template_config()
        };
        let schedule = plan_reconstruction(&config).unwrap();
        assert!(schedule.genetic.is_none());
        assert_eq!(schedule.plans.len(), 1);
        assert_eq!(schedule.plans[0].len(), 620);
        let summary = schedule.summary();
        assert!(summary[0].contains("3*(20*ER+180*HIO)+20*ER"));
        assert!(summary.iter().any(|l| l.contains("twin: 1 iterations from 2 to 2")));

        let bare = plan_reconstruction(&ReconstructionConfig::default()).unwrap();
        assert!(bare.summary().iter().all(|l| !l.contains("twin")));
    }

    #[test]
    fn test_plan_genetic() {
        let mut config = ReconstructionConfig {
            reconstructions: 6,
            ..ReconstructionConfig::template_config()
        };
        config.ga.ga_generations = Some(3);
        config.ga.ga_cullings = Some(vec![2, 1]);
        let schedule = plan_reconstruction(&config).unwrap();
        assert_eq!(schedule.plans.len(), 3);
        assert_eq!(schedule.plans[0].iterations_with(Feature::Twin), vec![2]);
        assert!(schedule.plans[2].iterations_with(Feature::Twin).is_empty());
        assert_eq!(
            schedule.fingerprint(),
            plan_reconstruction(&config).unwrap().fingerprint()
        );
    }

    #[test]
    fn test_plan_errors() {
        let config = ReconstructionConfig {
            algorithm_sequence: String::from("5*XYZ"),
            ..Default::default()
        };
        assert!(matches!(
            plan_reconstruction(&config),
            Err(ProcessorError::PlanError(PlanError::SequenceError(_)))
        ));

        let mut over_culled = ReconstructionConfig {
            reconstructions: 3,
            ..Default::default()
        };
        over_culled.ga.ga_generations = Some(2);
        over_culled.ga.ga_cullings = Some(vec![2]);
        assert!(matches!(
            plan_reconstruction(&over_culled),
            Err(ProcessorError::GeneticError(_))
        ));
    }

    #[test]
    fn test_process_reports_progress() {
        let (tx, rx) = channel();
        let engine = RecordingEngine {
            calls: Cell::new(0),
            fail: false,
        };
        process(&ReconstructionConfig::default(), &request(), &engine, &tx).unwrap();
        assert_eq!(engine.calls.get(), 1);
        let stages: Vec<RunStage> = rx.try_iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![RunStage::Planning, RunStage::Running, RunStage::Finished]
        );
    }

    #[test]
    fn test_bad_plan_never_reaches_engine() {
        let (tx, _rx) = channel();
        let engine = RecordingEngine {
            calls: Cell::new(0),
            fail: false,
        };
        let config = ReconstructionConfig {
            algorithm_sequence: String::from("(3*ER"),
            ..Default::default()
        };
        assert!(process(&config, &request(), &engine, &tx).is_err());
        assert_eq!(engine.calls.get(), 0);
    }

    #[test]
    fn test_engine_failure() {
        let (tx, _rx) = channel();
        let engine = RecordingEngine {
            calls: Cell::new(0),
            fail: true,
        };
        let result = process(&ReconstructionConfig::default(), &request(), &engine, &tx);
        assert!(matches!(
            result,
            Err(ProcessorError::EngineError(EngineError::ExitStatus(3)))
        ));
    }

    #[test]
    fn test_default_data_path() {
        let config = ReconstructionConfig::default();
        assert_eq!(
            default_data_path(&config, Path::new("/exp")),
            PathBuf::from("/exp/phasing_data/data.tif")
        );
    }
}
