//! Expansion of an algorithm sequence and its triggers into a per-iteration plan.
//!
//! The plan is derived without any shared state: the same sequence, triggers and run
//! context always produce the same plan, which is what lets every rank of an MPI job
//! derive it independently. [`IterationPlan::fingerprint`] gives ranks a cheap value to
//! log and compare.
use fxhash::FxHasher64;
use ndarray::Array2;
use serde::Serialize;
use std::hash::{Hash, Hasher};

use super::algorithm::{AlgorithmToken, Operation};
use super::error::PlanError;
use super::genetic::GeneticPlan;
use super::sequence::SequenceNode;
use super::trigger::{Feature, FeatureSet, TriggerSet};

/// Where in a run the plan is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunContext {
    /// A plain (non-GA) reconstruction
    Single,
    /// One generation of a GA reconstruction
    Genetic {
        generation: usize,
        pc_start_generation: usize,
    },
}

impl RunContext {
    /// Features switched off by the GA composition rules in this context
    fn suppressed(&self) -> FeatureSet {
        match *self {
            Self::Single => FeatureSet::new(),
            Self::Genetic {
                generation,
                pc_start_generation,
            } => {
                let mut suppressed: FeatureSet = Feature::ALL
                    .iter()
                    .copied()
                    .filter(|f| generation > 0 && f.is_first_generation_only())
                    .collect();
                if generation < pc_start_generation {
                    suppressed.insert(Feature::Pc);
                }
                suppressed
            }
        }
    }

    fn partial_coherence_allowed(&self) -> bool {
        match *self {
            Self::Single => true,
            Self::Genetic {
                generation,
                pc_start_generation,
            } => generation >= pc_start_generation,
        }
    }
}

/// One iteration of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationStep {
    pub iteration: usize,
    pub algorithm: AlgorithmToken,
    pub projection: Operation,
    pub modulus: Operation,
    /// Features whose trigger fires at this iteration
    pub features: FeatureSet,
    /// Restore full resolution data after the low-pass filter finished
    pub reset_resolution: bool,
}

impl IterationStep {
    /// Every operation run at this iteration, in execution order
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops = vec![Operation::Next];
        if self.features.contains(Feature::LowpassFilter) {
            ops.push(Operation::LowpassFilterOperation);
        }
        if self.reset_resolution {
            ops.push(Operation::ResetResolution);
        }
        if self.features.contains(Feature::ShrinkWrap) {
            ops.push(Operation::ShrinkWrapOperation);
        }
        if self.features.contains(Feature::Phc) {
            ops.push(Operation::PhcOperation);
        }
        ops.push(Operation::ToReciprocalSpace);
        if self.features.contains(Feature::Pc) && self.modulus == Operation::PcModulus {
            ops.push(Operation::PcOperation);
        }
        ops.push(self.modulus);
        ops.push(Operation::ToDirectSpace);
        ops.push(self.projection);
        if self.features.contains(Feature::Twin) {
            ops.push(Operation::TwinOperation);
        }
        if self.features.contains(Feature::Average) {
            ops.push(Operation::AverageOperation);
        }
        if self.features.contains(Feature::Progress) {
            ops.push(Operation::ProgressOperation);
        }
        ops
    }
}

/// The immutable, fully expanded schedule of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationPlan {
    context: RunContext,
    steps: Vec<IterationStep>,
}

impl IterationPlan {
    /// Expand `sequence` and evaluate every trigger of `triggers` at each iteration.
    ///
    /// All configured triggers are validated against the run length, including ones the
    /// run context switches off, so a bad trigger fails every generation alike.
    pub fn build(
        sequence: &SequenceNode,
        triggers: &TriggerSet,
        context: RunContext,
    ) -> Result<Self, PlanError> {
        let algorithms = sequence.expand()?;
        let total = algorithms.len();
        let resolved = triggers
            .resolve(total)
            .map_err(|(feature, e)| PlanError::TriggerError(feature, e))?;

        let mut suppressed = context.suppressed();
        if !sequence.contains_partial_coherence() {
            suppressed.insert(Feature::Pc);
        }
        let pc_allowed = context.partial_coherence_allowed();

        let reset_at = if suppressed.contains(Feature::LowpassFilter) {
            None
        } else {
            resolved
                .get(Feature::LowpassFilter)
                .and_then(|trigger| trigger.last_active())
                .map(|last| last + 1)
                .filter(|next| *next < total)
        };

        let steps = algorithms
            .into_iter()
            .enumerate()
            .map(|(iteration, token)| {
                let algorithm = if pc_allowed {
                    token
                } else {
                    token.without_partial_coherence()
                };
                let (projection, modulus) = algorithm.operations();
                let features: FeatureSet = resolved
                    .active_features(iteration)
                    .iter()
                    .filter(|f| !suppressed.contains(*f))
                    .collect();
                IterationStep {
                    iteration,
                    algorithm,
                    projection,
                    modulus,
                    features,
                    reset_resolution: reset_at == Some(iteration),
                }
            })
            .collect();

        Ok(Self { context, steps })
    }

    pub fn context(&self) -> RunContext {
        self.context
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[IterationStep] {
        &self.steps
    }

    pub fn step(&self, iteration: usize) -> Option<&IterationStep> {
        self.steps.get(iteration)
    }

    /// Iterations at which a feature fires
    pub fn iterations_with(&self, feature: Feature) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|s| s.features.contains(feature))
            .map(|s| s.iteration)
            .collect()
    }

    /// Consecutive runs of the same algorithm, e.g. 20 ER followed by 180 HIO
    pub fn algorithm_runs(&self) -> Vec<(AlgorithmToken, usize)> {
        let mut runs: Vec<(AlgorithmToken, usize)> = Vec::new();
        for step in self.steps.iter() {
            match runs.last_mut() {
                Some((token, count)) if *token == step.algorithm => *count += 1,
                _ => runs.push((step.algorithm, 1)),
            }
        }
        runs
    }

    /// Operation by iteration matrix; `flow[[op.index(), i]]` is set when `op` runs at `i`
    pub fn flow(&self) -> Array2<bool> {
        let mut flow = Array2::from_elem((Operation::ALL.len(), self.steps.len()), false);
        for step in self.steps.iter() {
            for op in step.operations() {
                flow[[op.index(), step.iteration]] = true;
            }
        }
        flow
    }

    /// Deterministic hash of the plan content, identical on every rank that built it
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        self.steps.len().hash(&mut hasher);
        for step in self.steps.iter() {
            step.algorithm.name().hash(&mut hasher);
            for feature in step.features.iter() {
                feature.index().hash(&mut hasher);
            }
            step.reset_resolution.hash(&mut hasher);
            // separates the feature lists of neighbouring steps
            usize::MAX.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Build one plan per GA generation
pub fn build_generation_plans(
    sequence: &SequenceNode,
    triggers: &TriggerSet,
    genetic: &GeneticPlan,
) -> Result<Vec<IterationPlan>, PlanError> {
    (0..genetic.generations)
        .map(|generation| {
            let context = RunContext::Genetic {
                generation,
                pc_start_generation: genetic.pc_start_generation,
            };
            log::debug!("Building plan for GA generation {generation}");
            IterationPlan::build(sequence, triggers, context)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genetic::GeneticConfig;
    use crate::sequence::parse_sequence;
    use crate::trigger::TriggerSpec;

    fn trigger(values: &[i64]) -> TriggerSpec {
        TriggerSpec::from_values(values).unwrap()
    }

    #[test]
    fn test_plan_pairs_algorithms_and_features() {
        let sequence = parse_sequence("3* (20*ER + 180*HIO) + 20*ER").unwrap();
        let triggers = TriggerSet::new()
            .with(Feature::ShrinkWrap, trigger(&[1, 1]))
            .with(Feature::Twin, trigger(&[2]))
            .with(Feature::Progress, trigger(&[0, 20]));
        let plan = IterationPlan::build(&sequence, &triggers, RunContext::Single).unwrap();
        assert_eq!(plan.len(), 620);
        assert_eq!(plan.iterations_with(Feature::Twin), vec![2]);
        assert_eq!(plan.iterations_with(Feature::ShrinkWrap).len(), 619);
        assert_eq!(plan.iterations_with(Feature::Progress).len(), 31);

        let first = plan.step(0).unwrap();
        assert_eq!(first.algorithm, AlgorithmToken::ER);
        assert_eq!(
            first.operations(),
            vec![
                Operation::Next,
                Operation::ToReciprocalSpace,
                Operation::Modulus,
                Operation::ToDirectSpace,
                Operation::Er,
                Operation::ProgressOperation,
            ]
        );
        let hio = plan.step(20).unwrap();
        assert_eq!(hio.projection, Operation::Hio);
        assert!(hio.features.contains(Feature::ShrinkWrap));
        assert!(hio.features.contains(Feature::Progress));

        assert_eq!(
            plan.algorithm_runs(),
            vec![
                (AlgorithmToken::ER, 20),
                (AlgorithmToken::HIO, 180),
                (AlgorithmToken::ER, 20),
                (AlgorithmToken::HIO, 180),
                (AlgorithmToken::ER, 20),
                (AlgorithmToken::HIO, 180),
                (AlgorithmToken::ER, 20),
            ]
        );
    }

    #[test]
    fn test_negative_start_resolved_against_plan_length() {
        let sequence = parse_sequence("1000*ER").unwrap();
        let triggers = TriggerSet::new().with(Feature::Average, trigger(&[-65, 1]));
        let plan = IterationPlan::build(&sequence, &triggers, RunContext::Single).unwrap();
        assert_eq!(
            plan.iterations_with(Feature::Average),
            (935..1000).collect::<Vec<usize>>()
        );
    }

    #[test]
    fn test_absent_triggers_never_fire() {
        let sequence = parse_sequence("50*HIO").unwrap();
        let plan = IterationPlan::build(&sequence, &TriggerSet::new(), RunContext::Single).unwrap();
        assert!(plan.steps().iter().all(|s| s.features.is_empty()));
    }

    #[test]
    fn test_twin_only_in_first_generation() {
        let sequence = parse_sequence("20*ER+80*HIO").unwrap();
        let triggers = TriggerSet::new()
            .with(Feature::Twin, trigger(&[2]))
            .with(Feature::Phc, trigger(&[0, 1, 50]))
            .with(Feature::LowpassFilter, trigger(&[0, 1, 40]))
            .with(Feature::ShrinkWrap, trigger(&[1, 1]));
        let ga = GeneticConfig {
            ga_generations: Some(3),
            ..Default::default()
        }
        .resolve(4, 0.1, 1.0)
        .unwrap()
        .unwrap();
        let plans = build_generation_plans(&sequence, &triggers, &ga).unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].iterations_with(Feature::Twin), vec![2]);
        assert_eq!(plans[0].iterations_with(Feature::Phc).len(), 51);
        assert_eq!(plans[0].step(41).map(|s| s.reset_resolution), Some(true));
        for plan in &plans[1..] {
            assert!(plan.iterations_with(Feature::Twin).is_empty());
            assert!(plan.iterations_with(Feature::Phc).is_empty());
            assert!(plan.iterations_with(Feature::LowpassFilter).is_empty());
            assert!(plan.steps().iter().all(|s| !s.reset_resolution));
            assert_eq!(plan.iterations_with(Feature::ShrinkWrap).len(), 99);
        }
        assert_eq!(plans[1].steps(), plans[2].steps());
    }

    #[test]
    fn test_partial_coherence_generation_start() {
        let sequence = parse_sequence("10*ER+10*HIOpc").unwrap();
        let triggers = TriggerSet::new().with(Feature::Pc, trigger(&[10, 5]));
        let early = IterationPlan::build(
            &sequence,
            &triggers,
            RunContext::Genetic {
                generation: 0,
                pc_start_generation: 1,
            },
        )
        .unwrap();
        assert!(early.iterations_with(Feature::Pc).is_empty());
        assert_eq!(early.step(15).unwrap().modulus, Operation::Modulus);

        let late = IterationPlan::build(
            &sequence,
            &triggers,
            RunContext::Genetic {
                generation: 1,
                pc_start_generation: 1,
            },
        )
        .unwrap();
        assert_eq!(late.iterations_with(Feature::Pc), vec![10, 15]);
        let step = late.step(15).unwrap();
        assert_eq!(step.algorithm, AlgorithmToken::HIOpc);
        assert!(step.operations().contains(&Operation::PcOperation));
        assert!(!late.step(16).unwrap().operations().contains(&Operation::PcOperation));
    }

    #[test]
    fn test_pc_requires_pc_algorithm() {
        let sequence = parse_sequence("40*HIO").unwrap();
        let triggers = TriggerSet::new().with(Feature::Pc, trigger(&[0, 10]));
        let plan = IterationPlan::build(&sequence, &triggers, RunContext::Single).unwrap();
        assert!(plan.iterations_with(Feature::Pc).is_empty());
    }

    #[test]
    fn test_invalid_trigger_names_feature() {
        let sequence = parse_sequence("10*ER").unwrap();
        let triggers = TriggerSet::new().with(Feature::Twin, trigger(&[-20]));
        match IterationPlan::build(&sequence, &triggers, RunContext::Single) {
            Err(PlanError::TriggerError(feature, _)) => assert_eq!(feature, Feature::Twin),
            other => panic!("unexpected result {other:?}"),
        }
        // Suppressed features are still validated
        let late = RunContext::Genetic {
            generation: 2,
            pc_start_generation: 0,
        };
        assert!(IterationPlan::build(&sequence, &triggers, late).is_err());
    }

    #[test]
    fn test_flow_matrix() {
        let sequence = parse_sequence("2*ER+HIO").unwrap();
        let triggers = TriggerSet::new().with(Feature::ShrinkWrap, trigger(&[1, 1]));
        let plan = IterationPlan::build(&sequence, &triggers, RunContext::Single).unwrap();
        let flow = plan.flow();
        assert_eq!(flow.dim(), (Operation::ALL.len(), 3));
        assert!(flow[[Operation::Next.index(), 0]]);
        assert!(!flow[[Operation::ShrinkWrapOperation.index(), 0]]);
        assert!(flow[[Operation::ShrinkWrapOperation.index(), 1]]);
        assert!(flow[[Operation::Er.index(), 1]]);
        assert!(flow[[Operation::Hio.index(), 2]]);
        assert!(!flow[[Operation::Er.index(), 2]]);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let sequence = parse_sequence("3*(20*ER+180*HIO)+20*ER").unwrap();
        let triggers = TriggerSet::new().with(Feature::Twin, trigger(&[2]));
        let a = IterationPlan::build(&sequence, &triggers, RunContext::Single).unwrap();
        let b = IterationPlan::build(
            &parse_sequence("3 * ( 20*ER + 180*HIO ) + 20*ER").unwrap(),
            &triggers,
            RunContext::Single,
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = IterationPlan::build(
            &sequence,
            &TriggerSet::new().with(Feature::Twin, trigger(&[3])),
            RunContext::Single,
        )
        .unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
