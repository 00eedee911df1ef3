use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use super::error::GeneticError;

/// Metric used to rank the reconstructions of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Chi,
    Sharpness,
    SummedPhase,
    Area,
}

impl Metric {
    /// For `summed_phase` and `area` a larger value ranks higher; for the others a smaller one does
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Self::SummedPhase | Self::Area)
    }

    /// Order two metric values from best to worst
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        if self.higher_is_better() {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Rank (id, value) pairs best first. Ties keep their input order
    pub fn rank<T: Clone>(&self, results: &[(T, f64)]) -> Vec<(T, f64)> {
        let mut ranked = results.to_vec();
        ranked.sort_by(|a, b| self.compare(a.1, b.1));
        ranked
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chi => "chi",
            Self::Sharpness => "sharpness",
            Self::SummedPhase => "summed_phase",
            Self::Area => "area",
        }
    }
}

impl FromStr for Metric {
    type Err = GeneticError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chi" => Ok(Self::Chi),
            "sharpness" => Ok(Self::Sharpness),
            "summed_phase" => Ok(Self::SummedPhase),
            "area" => Ok(Self::Area),
            _ => Err(GeneticError::UnknownMetric(s.to_string())),
        }
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How the alpha reconstruction is bred into the others between generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreedMode {
    None,
    SqrtAb,
    SqrtAbPa,
    SqrtAbRecip,
    SqrtAbPaRecip,
    Dsqrt,
    PixelSwitch,
    BPa,
    TwoAbAB,
    TwoABPa,
    AvgAb,
    AvgAbPa,
}

impl BreedMode {
    const NAMES: [(&'static str, BreedMode); 12] = [
        ("none", BreedMode::None),
        ("sqrt_ab", BreedMode::SqrtAb),
        ("sqrt_ab_pa", BreedMode::SqrtAbPa),
        ("sqrt_ab_recip", BreedMode::SqrtAbRecip),
        ("sqrt_ab_pa_recip", BreedMode::SqrtAbPaRecip),
        ("dsqrt", BreedMode::Dsqrt),
        ("pixel_switch", BreedMode::PixelSwitch),
        ("b_pa", BreedMode::BPa),
        ("2ab_a_b", BreedMode::TwoAbAB),
        ("2a_b_pa", BreedMode::TwoABPa),
        ("avg_ab", BreedMode::AvgAb),
        ("avg_ab_pa", BreedMode::AvgAbPa),
    ];

    pub fn name(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, mode)| mode == self)
            .map_or("none", |(name, _)| name)
    }
}

impl FromStr for BreedMode {
    type Err = GeneticError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, mode)| *mode)
            .ok_or_else(|| GeneticError::UnknownBreedMode(s.to_string()))
    }
}

impl Display for BreedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The GA keys of a reconstruction configuration, as written in the file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_generations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_fast: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_metrics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_breed_modes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_cullings: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_sw_thresholds: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_sw_gauss_sigmas: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_lowpass_filter_sigmas: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga_gen_pc_start: Option<usize>,
}

/// Pad a per-generation list to `generations` entries by repeating its last entry
fn per_generation<T: Clone>(values: &[T], default: T, generations: usize) -> Vec<T> {
    let fill = values.last().cloned().unwrap_or(default);
    let mut padded: Vec<T> = values.iter().take(generations).cloned().collect();
    padded.resize(generations, fill);
    padded
}

impl GeneticConfig {
    /// GA mode is on when a generation count is configured
    pub fn is_active(&self) -> bool {
        self.ga_generations.is_some()
    }

    /// Validate the GA keys and resolve their per-generation values.
    ///
    /// `reconstructions` is the number of reconstructions that start the first generation
    /// (the number of ranks in an MPI run). Shrink-wrap defaults fill the threshold and
    /// sigma lists when they are not configured. Returns None when GA mode is off.
    pub fn resolve(
        &self,
        reconstructions: usize,
        shrink_wrap_threshold: f64,
        shrink_wrap_gauss_sigma: f64,
    ) -> Result<Option<GeneticPlan>, GeneticError> {
        let generations = match self.ga_generations {
            Some(g) if g < 2 => return Err(GeneticError::TooFewGenerations(g)),
            Some(g) => g,
            None => return Ok(None),
        };
        if reconstructions < 2 {
            return Err(GeneticError::TooFewReconstructions(reconstructions));
        }

        let metrics = self
            .ga_metrics
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|m| m.parse::<Metric>())
            .collect::<Result<Vec<Metric>, GeneticError>>()?;
        let breed_modes = self
            .ga_breed_modes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|m| m.parse::<BreedMode>())
            .collect::<Result<Vec<BreedMode>, GeneticError>>()?;

        // Missing entries cull nothing
        let cullings: Vec<usize> = (0..generations)
            .map(|g| {
                self.ga_cullings
                    .as_ref()
                    .and_then(|list| list.get(g).copied())
                    .unwrap_or(0)
            })
            .collect();
        let culled: usize = cullings.iter().sum();
        if reconstructions < culled + 2 {
            return Err(GeneticError::OverCulled {
                reconstructions,
                culled,
            });
        }
        let mut survivors = Vec::with_capacity(generations);
        let mut alive = reconstructions;
        for cull in cullings.iter() {
            alive -= cull;
            survivors.push(alive);
        }

        let lowpass_sigmas = self.ga_lowpass_filter_sigmas.clone().unwrap_or_default();

        Ok(Some(GeneticPlan {
            generations,
            reconstructions,
            fast: self.ga_fast.unwrap_or(false),
            metrics: per_generation(&metrics, Metric::Chi, generations),
            breed_modes: per_generation(&breed_modes, BreedMode::SqrtAb, generations),
            survivors,
            sw_thresholds: per_generation(
                self.ga_sw_thresholds.as_deref().unwrap_or_default(),
                shrink_wrap_threshold,
                generations,
            ),
            sw_gauss_sigmas: per_generation(
                self.ga_sw_gauss_sigmas.as_deref().unwrap_or_default(),
                shrink_wrap_gauss_sigma,
                generations,
            ),
            low_resolution_generations: lowpass_sigmas.len().min(generations),
            lowpass_filter_sigmas: lowpass_sigmas,
            pc_start_generation: self.ga_gen_pc_start.unwrap_or(0),
        }))
    }
}

/// Validated GA setup with one entry per generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneticPlan {
    pub generations: usize,
    pub reconstructions: usize,
    pub fast: bool,
    pub metrics: Vec<Metric>,
    pub breed_modes: Vec<BreedMode>,
    /// Reconstructions left after culling at the end of each generation
    pub survivors: Vec<usize>,
    pub sw_thresholds: Vec<f64>,
    pub sw_gauss_sigmas: Vec<f64>,
    pub lowpass_filter_sigmas: Vec<f64>,
    /// Generations whose data is low-pass filtered before phasing
    pub low_resolution_generations: usize,
    pub pc_start_generation: usize,
}

impl GeneticPlan {
    fn check(&self, generation: usize) -> Result<(), GeneticError> {
        if generation >= self.generations {
            return Err(GeneticError::GenerationOutOfRange {
                generation,
                generations: self.generations,
            });
        }
        Ok(())
    }

    pub fn metric(&self, generation: usize) -> Result<Metric, GeneticError> {
        self.check(generation)?;
        Ok(self.metrics[generation])
    }

    pub fn breed_mode(&self, generation: usize) -> Result<BreedMode, GeneticError> {
        self.check(generation)?;
        Ok(self.breed_modes[generation])
    }

    /// Number of reconstructions that run in a generation
    pub fn population(&self, generation: usize) -> Result<usize, GeneticError> {
        self.check(generation)?;
        if generation == 0 {
            Ok(self.reconstructions)
        } else {
            Ok(self.survivors[generation - 1])
        }
    }

    /// Sigma of the low-pass filter applied to the data of a generation, if any
    pub fn data_lowpass_sigma(&self, generation: usize) -> Result<Option<f64>, GeneticError> {
        self.check(generation)?;
        if generation < self.low_resolution_generations {
            Ok(self.lowpass_filter_sigmas.get(generation).copied())
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(generations: usize) -> GeneticConfig {
        GeneticConfig {
            ga_generations: Some(generations),
            ..Default::default()
        }
    }

    #[test]
    fn test_inactive_without_generations() {
        let plan = GeneticConfig::default().resolve(10, 0.1, 1.0).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_defaults_fill_every_generation() {
        let plan = config(3).resolve(8, 0.1, 1.0).unwrap().unwrap();
        assert_eq!(plan.metrics, vec![Metric::Chi; 3]);
        assert_eq!(plan.breed_modes, vec![BreedMode::SqrtAb; 3]);
        assert_eq!(plan.survivors, vec![8, 8, 8]);
        assert_eq!(plan.sw_thresholds, vec![0.1; 3]);
        assert_eq!(plan.sw_gauss_sigmas, vec![1.0; 3]);
        assert_eq!(plan.low_resolution_generations, 0);
        assert_eq!(plan.pc_start_generation, 0);
    }

    #[test]
    fn test_lists_padded_with_last_entry() {
        let mut ga = config(4);
        ga.ga_metrics = Some(vec!["chi".into(), "area".into()]);
        ga.ga_breed_modes = Some(vec!["pixel_switch".into()]);
        ga.ga_cullings = Some(vec![2, 1]);
        ga.ga_lowpass_filter_sigmas = Some(vec![2.0, 1.5]);
        let plan = ga.resolve(10, 0.1, 1.0).unwrap().unwrap();
        assert_eq!(
            plan.metrics,
            vec![Metric::Chi, Metric::Area, Metric::Area, Metric::Area]
        );
        assert_eq!(plan.breed_modes, vec![BreedMode::PixelSwitch; 4]);
        assert_eq!(plan.survivors, vec![8, 7, 7, 7]);
        assert_eq!(plan.population(0).unwrap(), 10);
        assert_eq!(plan.population(2).unwrap(), 7);
        assert_eq!(plan.data_lowpass_sigma(1).unwrap(), Some(1.5));
        assert_eq!(plan.data_lowpass_sigma(2).unwrap(), None);
        assert!(plan.metric(4).is_err());
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            config(1).resolve(10, 0.1, 1.0),
            Err(GeneticError::TooFewGenerations(1))
        );
        assert_eq!(
            config(3).resolve(1, 0.1, 1.0),
            Err(GeneticError::TooFewReconstructions(1))
        );
        let mut ga = config(3);
        ga.ga_cullings = Some(vec![4, 3]);
        assert_eq!(
            ga.resolve(8, 0.1, 1.0),
            Err(GeneticError::OverCulled {
                reconstructions: 8,
                culled: 7
            })
        );
        ga.ga_cullings = Some(vec![3, 3]);
        assert!(ga.resolve(8, 0.1, 1.0).is_ok());
        let mut bad_metric = config(2);
        bad_metric.ga_metrics = Some(vec!["entropy".into()]);
        assert_eq!(
            bad_metric.resolve(4, 0.1, 1.0),
            Err(GeneticError::UnknownMetric("entropy".into()))
        );
    }

    #[test]
    fn test_metric_ranking() {
        let results = vec![(0usize, 0.3), (1, 0.1), (2, 0.2)];
        let by_chi: Vec<usize> = Metric::Chi.rank(&results).iter().map(|r| r.0).collect();
        assert_eq!(by_chi, vec![1, 2, 0]);
        let by_area: Vec<usize> = Metric::Area.rank(&results).iter().map(|r| r.0).collect();
        assert_eq!(by_area, vec![0, 2, 1]);
    }

    #[test]
    fn test_breed_mode_names() {
        for name in ["none", "sqrt_ab", "2ab_a_b", "avg_ab_pa"] {
            assert_eq!(name.parse::<BreedMode>().unwrap().name(), name);
        }
        assert!("sqrt".parse::<BreedMode>().is_err());
    }
}
