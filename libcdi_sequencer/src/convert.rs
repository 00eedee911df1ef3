//! Conversion of configurations written for older versions of the reconstruction tools.
use std::path::Path;

use super::algorithm::AlgorithmToken;
use super::config::ReconstructionConfig;
use super::config_file::{ConfigMap, ConfigValue};
use super::constants::ALGORITHM_SEQUENCE_KEY;
use super::error::{ConfigError, ConvertError};
use super::sequence::SequenceNode;

/// Old key names and their current replacements
pub const LEGACY_KEY_RENAMES: [(&str, &str); 23] = [
    ("samples", "reconstructions"),
    ("beta", "hio_beta"),
    ("amp_support_trigger", "shrink_wrap_trigger"),
    ("support_type", "shrink_wrap_type"),
    ("support_threshold", "shrink_wrap_threshold"),
    ("support_sigma", "shrink_wrap_gauss_sigma"),
    ("support_area", "initial_support_area"),
    ("pcdi_trigger", "pc_interval"),
    ("pc_trigger", "pc_interval"),
    ("partial_coherence_type", "pc_type"),
    ("partial_coherence_iteration_num", "pc_LUCY_iterations"),
    ("partial_coherence_normalize", "pc_normalize"),
    ("partial_coherence_roi", "pc_LUCY_kernel"),
    ("phase_min", "phc_phase_min"),
    ("phase_max", "phc_phase_max"),
    ("phase_support_trigger", "phc_trigger"),
    ("resolution_trigger", "lowpass_filter_trigger"),
    ("iter_res_det_range", "lowpass_filter_range"),
    ("generations", "ga_generations"),
    ("ga_support_thresholds", "ga_sw_thresholds"),
    ("ga_support_sigmas", "ga_sw_gauss_sigmas"),
    ("ga_low_resolution_sigmas", "ga_lowpass_filter_sigmas"),
    ("gen_pcdi_start", "ga_gen_pc_start"),
];

/// What a conversion changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub renamed: Vec<(String, String)>,
    pub sequence: Option<String>,
    pub pc_interval: Option<i64>,
}

impl ConversionReport {
    pub fn is_unchanged(&self) -> bool {
        self.renamed.is_empty() && self.sequence.is_none() && self.pc_interval.is_none()
    }
}

fn legacy_error(position: usize, reason: &'static str) -> ConvertError {
    ConvertError::LegacySequence { position, reason }
}

fn positive_count(value: &ConfigValue, position: usize) -> Result<usize, ConvertError> {
    match value.as_int() {
        Some(count) if count > 0 => Ok(count as usize),
        _ => Err(legacy_error(position, "repeat and iteration counts must be positive integers")),
    }
}

/// Read one `("ALG", iterations)` pair into a repeated leaf
fn legacy_step(value: &ConfigValue, position: usize) -> Result<(AlgorithmToken, usize), ConvertError> {
    match value.as_list() {
        Some([name, iterations]) => {
            let token = name
                .as_str()
                .and_then(|n| n.parse::<AlgorithmToken>().ok())
                .ok_or_else(|| legacy_error(position, "unknown algorithm name"))?;
            Ok((token, positive_count(iterations, position)?))
        }
        _ => Err(legacy_error(position, "expected an (algorithm, iterations) pair")),
    }
}

/// Read one `(repeat, (alg, n), (alg, n), ...)` group
fn legacy_group(value: &ConfigValue, position: usize) -> Result<SequenceNode, ConvertError> {
    let items = value
        .as_list()
        .ok_or_else(|| legacy_error(position, "expected a tuple"))?;
    match items {
        [repeat, step] => {
            let repeat = positive_count(repeat, position)?;
            let (token, iterations) = legacy_step(step, position)?;
            let count = repeat
                .checked_mul(iterations)
                .ok_or_else(|| legacy_error(position, "iteration count is too large"))?;
            Ok(SequenceNode::Repeat {
                count,
                body: vec![SequenceNode::Leaf(token)],
            })
        }
        [repeat, steps @ ..] if steps.len() > 1 => {
            let repeat = positive_count(repeat, position)?;
            let children = steps
                .iter()
                .map(|step| {
                    let (token, count) = legacy_step(step, position)?;
                    Ok(SequenceNode::Repeat {
                        count,
                        body: vec![SequenceNode::Leaf(token)],
                    })
                })
                .collect::<Result<Vec<SequenceNode>, ConvertError>>()?;
            Ok(SequenceNode::Repeat {
                count: repeat,
                body: vec![SequenceNode::Concat(children)],
            })
        }
        _ => Err(legacy_error(position, "a group needs a repeat count and at least one step")),
    }
}

/// Rewrite the nested tuple form of an algorithm sequence,
/// e.g. `((3,("ER",20),("HIO",180)),(1,("ER",20)))` becomes `3*(20*ER+180*HIO)+20*ER`
pub fn convert_legacy_sequence(value: &ConfigValue) -> Result<SequenceNode, ConvertError> {
    let groups = value
        .as_list()
        .ok_or_else(|| legacy_error(0, "expected a tuple of groups"))?;
    let mut nodes = groups
        .iter()
        .enumerate()
        .map(|(position, group)| legacy_group(group, position))
        .collect::<Result<Vec<SequenceNode>, ConvertError>>()?;
    match nodes.len() {
        0 => Err(legacy_error(0, "the sequence is empty")),
        1 => Ok(nodes.remove(0)),
        _ => Ok(SequenceNode::Concat(nodes)),
    }
}

/// Legacy sequences are either a bare tuple or a quoted string holding one
fn legacy_sequence_value(value: &ConfigValue) -> Result<Option<ConfigValue>, ConvertError> {
    match value {
        ConfigValue::List(..) => Ok(Some(value.clone())),
        ConfigValue::Str(text) if text.trim_start().starts_with('(') => {
            let reparsed = ConfigMap::parse_legacy(&format!("{ALGORITHM_SEQUENCE_KEY} = {text}"))
                .map_err(ConfigError::from)?;
            Ok(reparsed.get(ALGORITHM_SEQUENCE_KEY).cloned())
        }
        _ => Ok(None),
    }
}

/// Bring a configuration map up to date in place
pub fn convert_map(map: &mut ConfigMap) -> Result<ConversionReport, ConvertError> {
    let mut report = ConversionReport::default();
    for (old, new) in LEGACY_KEY_RENAMES {
        if map.rename(old, new) {
            log::debug!("Renamed legacy key {old} to {new}");
            report.renamed.push((old.to_string(), new.to_string()));
        }
    }

    let legacy = match map.get(ALGORITHM_SEQUENCE_KEY) {
        Some(value) => legacy_sequence_value(value)?,
        None => None,
    };
    if let Some(legacy) = legacy {
        let sequence = convert_legacy_sequence(&legacy)?.to_string();
        log::info!("Rewrote legacy algorithm sequence as {sequence}");
        map.insert(ALGORITHM_SEQUENCE_KEY, ConfigValue::Str(sequence.clone()));
        report.sequence = Some(sequence);
    }

    let interval = match map.get("pc_interval").and_then(|v| v.as_list()) {
        Some(values) => match values.get(1).and_then(|v| v.as_int()) {
            Some(interval) => Some(interval),
            None => {
                log::warn!("pc_interval list has no interval entry and is left unchanged");
                None
            }
        },
        None => None,
    };
    if let Some(interval) = interval {
        map.insert("pc_interval", ConfigValue::Int(interval));
        report.pc_interval = Some(interval);
    }

    Ok(report)
}

/// Convert a configuration file; the result is checked by reading it as a reconstruction
/// configuration before it is written to `output`
pub fn convert_file(input: &Path, output: &Path) -> Result<ConversionReport, ConvertError> {
    let mut map = ConfigMap::read_legacy(input)?;
    let report = convert_map(&mut map)?;
    let config = ReconstructionConfig::from_config_map(&map)?;
    config.sequence().map_err(ConfigError::from)?;
    map.write(output)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::parse_sequence;
    use indoc::indoc;

    #[test]
    fn test_rewrite_tuple_sequence() {
        let map = ConfigMap::parse_legacy(
            r#"algorithm_sequence = ((3, ("ER", 20), ("HIO", 180)), (1, ("ER", 20)))"#,
        )
        .unwrap();
        let node = convert_legacy_sequence(map.get(ALGORITHM_SEQUENCE_KEY).unwrap()).unwrap();
        assert_eq!(node.to_string(), "3*(20*ER+180*HIO)+20*ER");
        assert_eq!(node, parse_sequence("3*(20*ER+180*HIO)+20*ER").unwrap());
    }

    #[test]
    fn test_single_step_group_multiplies_counts() {
        let map = ConfigMap::parse_legacy(r#"algorithm_sequence = ((2, ("HIO", 50)),)"#).unwrap();
        let node = convert_legacy_sequence(map.get(ALGORITHM_SEQUENCE_KEY).unwrap()).unwrap();
        assert_eq!(node.to_string(), "100*HIO");
    }

    #[test]
    fn test_bad_legacy_sequence() {
        let map =
            ConfigMap::parse_legacy(r#"algorithm_sequence = ((1, ("ER", 20)), (1, ("XYZ", 5)))"#)
                .unwrap();
        let result = convert_legacy_sequence(map.get(ALGORITHM_SEQUENCE_KEY).unwrap());
        assert!(matches!(
            result,
            Err(ConvertError::LegacySequence { position: 1, .. })
        ));
    }

    #[test]
    fn test_convert_map() {
        let mut map = ConfigMap::parse_legacy(indoc! {r#"
            samples = 5
            beta = .9
            amp_support_trigger = [1, 1]
            algorithm_sequence = "((3, ('ER', 20), ('HIO', 180)), (1, ('ER', 20)))"
            pcdi_trigger = [50, 50]
            generations = 3
        "#})
        .unwrap();
        let report = convert_map(&mut map).unwrap();
        assert_eq!(report.renamed.len(), 5);
        assert_eq!(report.sequence.as_deref(), Some("3*(20*ER+180*HIO)+20*ER"));
        assert_eq!(report.pc_interval, Some(50));
        assert_eq!(map.get("reconstructions"), Some(&ConfigValue::Int(5)));
        assert_eq!(map.get("pc_interval"), Some(&ConfigValue::Int(50)));
        assert!(!map.contains_key("samples"));
        assert!(map.contains_key("ga_generations"));
    }

    #[test]
    fn test_current_config_is_unchanged() {
        let mut map = ConfigMap::parse(indoc! {r#"
            reconstructions = 5
            algorithm_sequence = "3*(20*ER+180*HIO)+20*ER"
            pc_interval = 50
        "#})
        .unwrap();
        let before = map.clone();
        let report = convert_map(&mut map).unwrap();
        assert!(report.is_unchanged());
        assert_eq!(map, before);
    }

    #[test]
    fn test_convert_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("config_rec_old");
        let output = dir.path().join("config_rec");
        std::fs::write(
            &input,
            indoc! {r#"
                samples = 2
                algorithm_sequence = ((1, ("ER", 10), ("HIOpc", 40)),)
                pc_trigger = [10, 5]
            "#},
        )
        .unwrap();
        convert_file(&input, &output).unwrap();
        let config = ReconstructionConfig::read_config_file(&output).unwrap();
        assert_eq!(config.reconstructions, 2);
        assert_eq!(config.algorithm_sequence, "1*(10*ER+40*HIOpc)");
        assert_eq!(config.sequence().unwrap().total_iterations(), Ok(50));
    }
}
