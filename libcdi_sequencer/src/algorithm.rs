use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::constants::PC_ALGORITHM_MARKER;
use super::error::SequenceError;

/// The per-iteration operations understood by the reconstruction engine.
///
/// The declaration order is the order in which the engine executes the operations
/// within a single iteration, so sorting a set of operations gives the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Next,
    LowpassFilterOperation,
    ResetResolution,
    ShrinkWrapOperation,
    PhcOperation,
    ToReciprocalSpace,
    PcOperation,
    PcModulus,
    Modulus,
    ToDirectSpace,
    Er,
    Hio,
    TwinOperation,
    AverageOperation,
    ProgressOperation,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Next,
        Operation::LowpassFilterOperation,
        Operation::ResetResolution,
        Operation::ShrinkWrapOperation,
        Operation::PhcOperation,
        Operation::ToReciprocalSpace,
        Operation::PcOperation,
        Operation::PcModulus,
        Operation::Modulus,
        Operation::ToDirectSpace,
        Operation::Er,
        Operation::Hio,
        Operation::TwinOperation,
        Operation::AverageOperation,
        Operation::ProgressOperation,
    ];

    /// Row of this operation in a flow matrix
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Name used by the engine for this operation
    pub fn name(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::LowpassFilterOperation => "lowpass_filter_operation",
            Self::ResetResolution => "reset_resolution",
            Self::ShrinkWrapOperation => "shrink_wrap_operation",
            Self::PhcOperation => "phc_operation",
            Self::ToReciprocalSpace => "to_reciprocal_space",
            Self::PcOperation => "pc_operation",
            Self::PcModulus => "pc_modulus",
            Self::Modulus => "modulus",
            Self::ToDirectSpace => "to_direct_space",
            Self::Er => "er",
            Self::Hio => "hio",
            Self::TwinOperation => "twin_operation",
            Self::AverageOperation => "average_operation",
            Self::ProgressOperation => "progress_operation",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A leaf algorithm of the algorithm sequence language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmToken {
    ER,
    ERpc,
    HIO,
    HIOpc,
}

impl AlgorithmToken {
    pub const ALL: [AlgorithmToken; 4] = [Self::ER, Self::ERpc, Self::HIO, Self::HIOpc];

    /// The (projection, modulus) operation pair run by this algorithm
    pub fn operations(&self) -> (Operation, Operation) {
        match self {
            Self::ER => (Operation::Er, Operation::Modulus),
            Self::ERpc => (Operation::Er, Operation::PcModulus),
            Self::HIO => (Operation::Hio, Operation::Modulus),
            Self::HIOpc => (Operation::Hio, Operation::PcModulus),
        }
    }

    pub fn is_partial_coherence(&self) -> bool {
        self.name().ends_with(PC_ALGORITHM_MARKER)
    }

    /// The same projection without partial coherence
    pub fn without_partial_coherence(&self) -> Self {
        match self {
            Self::ERpc => Self::ER,
            Self::HIOpc => Self::HIO,
            other => *other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ER => "ER",
            Self::ERpc => "ERpc",
            Self::HIO => "HIO",
            Self::HIOpc => "HIOpc",
        }
    }
}

impl Display for AlgorithmToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AlgorithmToken {
    type Err = SequenceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|token| token.name() == s)
            .copied()
            .ok_or_else(|| SequenceError::UnknownAlgorithm {
                position: 0,
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_names_are_case_sensitive() {
        assert_eq!("ERpc".parse::<AlgorithmToken>(), Ok(AlgorithmToken::ERpc));
        assert!("er".parse::<AlgorithmToken>().is_err());
        assert!("HIOPC".parse::<AlgorithmToken>().is_err());
    }

    #[test]
    fn test_operation_pairs() {
        assert_eq!(
            AlgorithmToken::ERpc.operations(),
            (Operation::Er, Operation::PcModulus)
        );
        assert_eq!(
            AlgorithmToken::HIO.operations(),
            (Operation::Hio, Operation::Modulus)
        );
        assert_eq!(
            AlgorithmToken::HIOpc.without_partial_coherence(),
            AlgorithmToken::HIO
        );
    }

    #[test]
    fn test_operation_index_matches_order() {
        for (idx, op) in Operation::ALL.iter().enumerate() {
            assert_eq!(op.index(), idx);
        }
        assert!(Operation::ToReciprocalSpace < Operation::Modulus);
        assert!(Operation::Modulus < Operation::ToDirectSpace);
    }
}
