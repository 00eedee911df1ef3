use bit_set::BitSet;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::Display;

use super::error::TriggerError;

/// Features of a reconstruction that are switched on by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Twin,
    ShrinkWrap,
    Phc,
    Pc,
    LowpassFilter,
    Average,
    Progress,
}

impl Feature {
    pub const COUNT: usize = 7;
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Twin,
        Feature::ShrinkWrap,
        Feature::Phc,
        Feature::Pc,
        Feature::LowpassFilter,
        Feature::Average,
        Feature::Progress,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Configuration key carrying the trigger of this feature
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Twin => "twin_trigger",
            Self::ShrinkWrap => "shrink_wrap_trigger",
            Self::Phc => "phc_trigger",
            Self::Pc => "pc_interval",
            Self::LowpassFilter => "lowpass_filter_trigger",
            Self::Average => "average_trigger",
            Self::Progress => "progress_trigger",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Twin => "twin",
            Self::ShrinkWrap => "shrink_wrap",
            Self::Phc => "phc",
            Self::Pc => "pc",
            Self::LowpassFilter => "lowpass_filter",
            Self::Average => "average",
            Self::Progress => "progress",
        }
    }

    /// Features that a GA run only applies in its first generation
    pub fn is_first_generation_only(&self) -> bool {
        matches!(self, Self::Twin | Self::Phc | Self::LowpassFilter)
    }

    fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set of features, stored as a bit set indexed by [`Feature::index`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet {
    bits: BitSet,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: Feature) -> bool {
        self.bits.insert(feature.index())
    }

    pub fn remove(&mut self, feature: Feature) -> bool {
        self.bits.remove(feature.index())
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.bits.contains(feature.index())
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Features in declaration order
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.bits.iter().filter_map(Feature::from_index)
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        let mut set = Self::new();
        for feature in iter {
            set.insert(feature);
        }
        set
    }
}

impl Serialize for FeatureSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// An unresolved trigger: `[start]`, `[start, interval]` or `[start, interval, stop]`.
///
/// Negative `start` and `stop` count back from the end of the run and are only resolved
/// once the number of iterations is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub start: i64,
    pub interval: Option<i64>,
    pub stop: Option<i64>,
}

impl TriggerSpec {
    /// Build a trigger from the 1 to 3 integers of a trigger key
    pub fn from_values(values: &[i64]) -> Result<Self, TriggerError> {
        let spec = match *values {
            [start] => Self {
                start,
                interval: None,
                stop: None,
            },
            [start, interval] => Self {
                start,
                interval: Some(interval),
                stop: None,
            },
            [start, interval, stop] => Self {
                start,
                interval: Some(interval),
                stop: Some(stop),
            },
            _ => return Err(TriggerError::BadArity(values.len())),
        };
        if let Some(interval) = spec.interval {
            if interval <= 0 {
                return Err(TriggerError::BadInterval(interval));
            }
        }
        Ok(spec)
    }

    pub fn values(&self) -> Vec<i64> {
        [Some(self.start), self.interval, self.stop]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Resolve against the total number of iterations of the run
    pub fn resolve(&self, total: usize) -> Result<ResolvedTrigger, TriggerError> {
        let start = resolve_offset(self.start, total)?;
        let stop = match self.stop {
            Some(stop) => {
                let resolved = resolve_offset(stop, total)?;
                if resolved < start {
                    return Err(TriggerError::StopBeforeStart {
                        start: start as i64,
                        stop: resolved as i64,
                    });
                }
                Some(resolved)
            }
            None => None,
        };
        let interval = match self.interval {
            Some(interval) if interval <= 0 => return Err(TriggerError::BadInterval(interval)),
            Some(interval) => Some(
                usize::try_from(interval).map_err(|_| TriggerError::OutOfRange(interval))?,
            ),
            None => None,
        };
        Ok(ResolvedTrigger {
            start,
            interval,
            stop,
            total,
        })
    }
}

fn resolve_offset(value: i64, total: usize) -> Result<usize, TriggerError> {
    if value >= 0 {
        return usize::try_from(value).map_err(|_| TriggerError::OutOfRange(value));
    }
    usize::try_from(value.unsigned_abs())
        .ok()
        .and_then(|back| total.checked_sub(back))
        .ok_or(TriggerError::OffsetBeforeRun {
            offset: value,
            total,
        })
}

impl Display for TriggerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values: Vec<String> = self.values().iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", values.join(", "))
    }
}

/// A trigger resolved to absolute iteration indices of a run of `total` iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTrigger {
    start: usize,
    interval: Option<usize>,
    stop: Option<usize>,
    total: usize,
}

impl ResolvedTrigger {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn is_active(&self, iteration: usize) -> bool {
        if iteration >= self.total || iteration < self.start {
            return false;
        }
        match self.interval {
            None => iteration == self.start,
            Some(interval) => {
                (iteration - self.start) % interval == 0
                    && self.stop.map_or(true, |stop| iteration <= stop)
            }
        }
    }

    /// The last active iteration, if the trigger fires at all and ends within the run
    pub fn last_active(&self) -> Option<usize> {
        if self.start >= self.total {
            return None;
        }
        match (self.interval, self.stop) {
            (None, _) => Some(self.start),
            (Some(interval), Some(stop)) => {
                let end = stop.min(self.total - 1);
                Some(self.start + ((end - self.start) / interval) * interval)
            }
            (Some(_), None) => None,
        }
    }

    pub fn active_iterations(&self) -> impl Iterator<Item = usize> + '_ {
        (self.start..self.total).filter(|i| self.is_active(*i))
    }
}

/// The configured trigger of every feature; an absent entry disables the feature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSet {
    specs: [Option<TriggerSpec>; Feature::COUNT],
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, feature: Feature, spec: TriggerSpec) -> Self {
        self.set(feature, spec);
        self
    }

    pub fn set(&mut self, feature: Feature, spec: TriggerSpec) {
        self.specs[feature.index()] = Some(spec);
    }

    pub fn remove(&mut self, feature: Feature) -> Option<TriggerSpec> {
        self.specs[feature.index()].take()
    }

    pub fn get(&self, feature: Feature) -> Option<&TriggerSpec> {
        self.specs[feature.index()].as_ref()
    }

    pub fn configured(&self) -> impl Iterator<Item = (Feature, &TriggerSpec)> {
        Feature::ALL
            .iter()
            .filter_map(|f| self.get(*f).map(|spec| (*f, spec)))
    }

    /// Resolve every configured trigger once for a run of `total` iterations
    pub fn resolve(&self, total: usize) -> Result<ResolvedTriggers, (Feature, TriggerError)> {
        let mut resolved = ResolvedTriggers::default();
        for (feature, spec) in self.configured() {
            resolved.triggers[feature.index()] =
                Some(spec.resolve(total).map_err(|e| (feature, e))?);
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTriggers {
    triggers: [Option<ResolvedTrigger>; Feature::COUNT],
}

impl ResolvedTriggers {
    pub fn get(&self, feature: Feature) -> Option<&ResolvedTrigger> {
        self.triggers[feature.index()].as_ref()
    }

    /// Absent triggers are never active
    pub fn is_active(&self, feature: Feature, iteration: usize) -> bool {
        self.get(feature)
            .map_or(false, |trigger| trigger.is_active(iteration))
    }

    pub fn active_features(&self, iteration: usize) -> FeatureSet {
        Feature::ALL
            .iter()
            .copied()
            .filter(|f| self.is_active(*f, iteration))
            .collect()
    }
}
