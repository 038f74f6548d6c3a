mod defaults;

use crate::cli::DesignArgs;
use crate::error::{CliError, Result};
use defaults::DefaultsConfig;
use serde::Deserialize;
use sharkpp::engine::config as core_config;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialCorrectionConfig {
    enabled: Option<bool>,
    pair_threshold: Option<f64>,
    min_difference: Option<f64>,
    triple_threshold: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialBoundConfig {
    target_epsilon: Option<f64>,
    parallelism: Option<usize>,
    queue_capacity: Option<usize>,
    internal_batch_ratio: Option<f64>,
    soundness_tolerance: Option<f64>,
    looseness_tolerance: Option<f64>,
    preminimize: Option<bool>,
    correction: Option<PartialCorrectionConfig>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSearchConfig {
    num_sequences: Option<usize>,
    confs_per_batch: Option<usize>,
    max_simultaneous_mutations: Option<usize>,
    stability_threshold: Option<f64>,
    partial_sample_size: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialPrecomputeConfig {
    enabled: Option<bool>,
    timeout_secs: Option<u64>,
    poll_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialDesignConfig {
    bound: Option<PartialBoundConfig>,
    search: Option<PartialSearchConfig>,
    precompute: Option<PartialPrecomputeConfig>,
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value)))
}

impl PartialDesignConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Layers the CLI flags over the file values, and the file values over the defaults.
    pub fn merge_with_cli(
        mut self,
        args: &DesignArgs,
        threads: Option<usize>,
    ) -> Result<core_config::DesignConfig> {
        self.apply_set_values(&args.set_values)?;
        let defaults = DefaultsConfig::default();

        let bound = self.bound.take().unwrap_or_default();
        let search = self.search.take().unwrap_or_default();
        let precompute = self.precompute.take().unwrap_or_default();
        let correction = bound.correction.unwrap_or_default();

        let mut bound_builder = core_config::BoundConfigBuilder::new()
            .target_epsilon(
                args.epsilon
                    .or(bound.target_epsilon)
                    .unwrap_or(defaults.target_epsilon),
            )
            .internal_batch_ratio(
                bound
                    .internal_batch_ratio
                    .unwrap_or(defaults.internal_batch_ratio),
            )
            .soundness_tolerance(
                bound
                    .soundness_tolerance
                    .unwrap_or(defaults.soundness_tolerance),
            )
            .looseness_tolerance(
                bound
                    .looseness_tolerance
                    .unwrap_or(defaults.looseness_tolerance),
            )
            .preminimize(bound.preminimize.unwrap_or(defaults.preminimize))
            .correction(core_config::CorrectionConfig {
                enabled: correction.enabled.unwrap_or(defaults.corrections_enabled),
                pair_threshold: correction
                    .pair_threshold
                    .unwrap_or(defaults.pair_threshold),
                min_difference: correction
                    .min_difference
                    .unwrap_or(defaults.min_difference),
                triple_threshold: correction
                    .triple_threshold
                    .unwrap_or(defaults.triple_threshold),
            });
        if let Some(parallelism) = threads.or(bound.parallelism) {
            bound_builder = bound_builder.parallelism(parallelism);
        }
        if let Some(capacity) = bound.queue_capacity {
            bound_builder = bound_builder.queue_capacity(capacity);
        }
        let bound_config = bound_builder
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        core_config::DesignConfigBuilder::new()
            .bound(bound_config)
            .num_sequences(
                args.num_sequences
                    .or(search.num_sequences)
                    .unwrap_or(defaults.num_sequences),
            )
            .confs_per_batch(
                args.confs_per_batch
                    .or(search.confs_per_batch)
                    .unwrap_or(defaults.confs_per_batch),
            )
            .max_simultaneous_mutations(args.max_mutations.or(search.max_simultaneous_mutations))
            .stability_threshold(args.stability_threshold.or(search.stability_threshold))
            .partial_sample_size(
                search
                    .partial_sample_size
                    .unwrap_or(defaults.partial_sample_size),
            )
            .precompute_flexible(
                args.precompute_flexible
                    || precompute.enabled.unwrap_or(defaults.precompute_flexible),
            )
            .precompute_timeout(Duration::from_secs(
                precompute
                    .timeout_secs
                    .unwrap_or(defaults.precompute_timeout_secs),
            ))
            .precompute_poll(Duration::from_millis(
                precompute.poll_ms.unwrap_or(defaults.precompute_poll_ms),
            ))
            .build()
            .map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "bound.target-epsilon" => {
                    self.bound.get_or_insert_with(Default::default).target_epsilon =
                        Some(parse_value(key, value_str, "float")?);
                }
                "bound.parallelism" => {
                    self.bound.get_or_insert_with(Default::default).parallelism =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "bound.internal-batch-ratio" => {
                    self.bound.get_or_insert_with(Default::default).internal_batch_ratio =
                        Some(parse_value(key, value_str, "float")?);
                }
                "bound.preminimize" => {
                    self.bound.get_or_insert_with(Default::default).preminimize =
                        Some(parse_value(key, value_str, "boolean")?);
                }
                "bound.correction.enabled" => {
                    self.bound
                        .get_or_insert_with(Default::default)
                        .correction
                        .get_or_insert_with(Default::default)
                        .enabled = Some(parse_value(key, value_str, "boolean")?);
                }
                "search.num-sequences" => {
                    self.search
                        .get_or_insert_with(Default::default)
                        .num_sequences = Some(parse_value(key, value_str, "integer")?);
                }
                "search.confs-per-batch" => {
                    self.search
                        .get_or_insert_with(Default::default)
                        .confs_per_batch = Some(parse_value(key, value_str, "integer")?);
                }
                "search.max-simultaneous-mutations" => {
                    self.search
                        .get_or_insert_with(Default::default)
                        .max_simultaneous_mutations =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "search.stability-threshold" => {
                    self.search
                        .get_or_insert_with(Default::default)
                        .stability_threshold = Some(parse_value(key, value_str, "float")?);
                }
                "search.partial-sample-size" => {
                    self.search
                        .get_or_insert_with(Default::default)
                        .partial_sample_size = Some(parse_value(key, value_str, "integer")?);
                }
                "precompute.enabled" => {
                    self.precompute
                        .get_or_insert_with(Default::default)
                        .enabled = Some(parse_value(key, value_str, "boolean")?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
