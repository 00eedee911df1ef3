use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::config_file::ConfigMap;
use super::constants::DEFAULT_ALGORITHM_SEQUENCE;
use super::error::{ConfigError, GeneticError, PlanError, SequenceError};
use super::genetic::{GeneticConfig, GeneticPlan};
use super::sequence::{parse_sequence, SequenceNode};
use super::trigger::{Feature, TriggerSet, TriggerSpec};

/// `pc_interval` is either a plain interval or a full trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PcInterval {
    Interval(i64),
    Trigger(Vec<i64>),
}

/// Structure representing a reconstruction configuration.
///
/// Read from the line-oriented configuration format or from YAML. Keys the sequencer does
/// not know are kept in `extra` and passed through untouched. A trigger key missing from
/// the file leaves its feature switched off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub algorithm_sequence: String,
    pub reconstructions: usize,
    pub processing: String,
    pub device: Option<Vec<i64>>,
    pub hio_beta: f64,
    pub initial_support_area: Vec<f64>,
    pub init_guess: Option<String>,
    pub save_dir: Option<PathBuf>,

    pub twin_trigger: Option<Vec<i64>>,
    pub twin_halves: Option<Vec<i64>>,

    pub shrink_wrap_trigger: Option<Vec<i64>>,
    pub shrink_wrap_type: String,
    pub shrink_wrap_threshold: f64,
    pub shrink_wrap_gauss_sigma: f64,

    #[serde(alias = "phm_trigger")]
    pub phc_trigger: Option<Vec<i64>>,
    #[serde(alias = "phm_phase_min")]
    pub phc_phase_min: f64,
    #[serde(alias = "phm_phase_max")]
    pub phc_phase_max: f64,

    pub pc_interval: Option<PcInterval>,
    pub pc_type: String,
    #[serde(rename = "pc_LUCY_iterations")]
    pub pc_lucy_iterations: usize,
    pub pc_normalize: bool,
    #[serde(rename = "pc_LUCY_kernel")]
    pub pc_lucy_kernel: Option<Vec<i64>>,

    pub lowpass_filter_trigger: Option<Vec<i64>>,
    pub lowpass_filter_range: Option<Vec<f64>>,

    pub average_trigger: Option<Vec<i64>>,
    pub progress_trigger: Option<Vec<i64>>,

    #[serde(flatten)]
    pub ga: GeneticConfig,

    /// Keys owned by the external engine
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            algorithm_sequence: String::from(DEFAULT_ALGORITHM_SEQUENCE),
            reconstructions: 1,
            processing: String::from("auto"),
            device: None,
            hio_beta: 0.9,
            initial_support_area: vec![0.5, 0.5, 0.5],
            init_guess: None,
            save_dir: None,
            twin_trigger: None,
            twin_halves: None,
            shrink_wrap_trigger: None,
            shrink_wrap_type: String::from("GAUSS"),
            shrink_wrap_threshold: 0.1,
            shrink_wrap_gauss_sigma: 1.0,
            phc_trigger: None,
            phc_phase_min: -1.57,
            phc_phase_max: 1.57,
            pc_interval: None,
            pc_type: String::from("LUCY"),
            pc_lucy_iterations: 20,
            pc_normalize: true,
            pc_lucy_kernel: None,
            lowpass_filter_trigger: None,
            lowpass_filter_range: None,
            average_trigger: None,
            progress_trigger: None,
            ga: GeneticConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

/// Optional keys listed, switched off, at the end of a template configuration
const TEMPLATE_OPTIONAL_KEYS: &str = "\
// save_dir = \"/path/to/dir/to/save/results\"
// init_guess = \"random\"
// device = [0, 1]
// ga_generations = 3
// ga_metrics = [\"chi\", \"sharpness\"]
// ga_breed_modes = [\"sqrt_ab\"]
// ga_cullings = [2, 1]
// ga_sw_thresholds = [0.15, 0.1]
// ga_sw_gauss_sigmas = [1.1, 1.0]
// ga_lowpass_filter_sigmas = [2.0, 1.5]
// ga_gen_pc_start = 3
// twin_halves = [0, 0]
// phc_trigger = [0, 1, 320]
// pc_interval = 50
// pc_LUCY_kernel = [16, 16, 16]
// lowpass_filter_trigger = [0, 1, 320]
// lowpass_filter_range = [0.7]
// average_trigger = [-60, 1]
";

impl ReconstructionConfig {
    /// Read the configuration from a file.
    ///
    /// Files ending in `.yml` or `.yaml` are read as YAML, anything else as the
    /// line-oriented `key = value` format.
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let is_yaml = matches!(
            config_path.extension().and_then(|ext| ext.to_str()),
            Some("yml") | Some("yaml")
        );
        let config = if is_yaml {
            let yaml_str = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str::<Self>(&yaml_str)?
        } else {
            Self::from_config_map(&ConfigMap::read(config_path)?)?
        };
        config.report_extra_keys();
        Ok(config)
    }

    pub fn from_config_map(map: &ConfigMap) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_value::<Self>(map.to_yaml_value())?)
    }

    /// Convert to the line-oriented form. Absent optional keys are left out
    pub fn to_config_map(&self) -> Result<ConfigMap, ConfigError> {
        let value = serde_yaml::to_value(self)?;
        Ok(ConfigMap::from_yaml_value(&value)?)
    }

    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        self.to_config_map()?.write(config_path)
    }

    /// Configuration written by [`ReconstructionConfig::template`]: the defaults with twin,
    /// shrink-wrap and progress switched on
    pub fn template_config() -> Self {
        Self {
            twin_trigger: Some(vec![2]),
            shrink_wrap_trigger: Some(vec![10, 1]),
            progress_trigger: Some(vec![0, 20]),
            ..Self::default()
        }
    }

    /// Text of a template configuration followed by commented out optional keys
    pub fn template() -> Result<String, ConfigError> {
        let active = Self::template_config().to_config_map()?;
        Ok(format!("{active}\n{TEMPLATE_OPTIONAL_KEYS}"))
    }

    fn report_extra_keys(&self) {
        for key in self.extra.keys() {
            log::debug!("Key '{key}' is not used by the sequencer and is passed to the engine");
        }
    }

    pub fn sequence(&self) -> Result<SequenceNode, SequenceError> {
        parse_sequence(&self.algorithm_sequence)
    }

    fn trigger_value(&self, feature: Feature) -> Option<&[i64]> {
        match feature {
            Feature::Twin => self.twin_trigger.as_deref(),
            Feature::ShrinkWrap => self.shrink_wrap_trigger.as_deref(),
            Feature::Phc => self.phc_trigger.as_deref(),
            Feature::LowpassFilter => self.lowpass_filter_trigger.as_deref(),
            Feature::Average => self.average_trigger.as_deref(),
            Feature::Progress => self.progress_trigger.as_deref(),
            Feature::Pc => match self.pc_interval.as_ref() {
                Some(PcInterval::Trigger(values)) => Some(values.as_slice()),
                _ => None,
            },
        }
    }

    /// Collect the configured triggers of every feature.
    ///
    /// A scalar `pc_interval` starts at the first partial coherence algorithm of
    /// `sequence`; it is dropped when the sequence has none.
    pub fn triggers(&self, sequence: &SequenceNode) -> Result<TriggerSet, PlanError> {
        let mut triggers = TriggerSet::new();
        for feature in Feature::ALL {
            if let Some(values) = self.trigger_value(feature) {
                let spec = TriggerSpec::from_values(values)
                    .map_err(|e| PlanError::TriggerError(feature, e))?;
                triggers.set(feature, spec);
            }
        }

        if let Some(PcInterval::Interval(interval)) = self.pc_interval {
            match sequence.first_partial_coherence()? {
                Some(first_pc) => {
                    let spec = TriggerSpec::from_values(&[first_pc as i64, interval])
                        .map_err(|e| PlanError::TriggerError(Feature::Pc, e))?;
                    triggers.set(Feature::Pc, spec);
                }
                None => log::warn!(
                    "pc_interval is set but {sequence} has no partial coherence algorithm; ignoring it"
                ),
            }
        }
        Ok(triggers)
    }

    /// Resolve the GA keys for a run of `ranks` reconstructions; None when GA is off
    pub fn genetic(&self, ranks: usize) -> Result<Option<GeneticPlan>, GeneticError> {
        self.ga.resolve(
            ranks,
            self.shrink_wrap_threshold,
            self.shrink_wrap_gauss_sigma,
        )
    }

    /// Partial coherence is in use when a pc algorithm appears and an interval is set
    pub fn is_pc_in_use(&self) -> bool {
        self.pc_interval.is_some()
            && self
                .sequence()
                .map(|seq| seq.contains_partial_coherence())
                .unwrap_or(false)
    }
}
