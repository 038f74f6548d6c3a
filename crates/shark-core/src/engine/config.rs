use crate::core::math::Weight;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Thresholds of the triple-correction search run after each leaf minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionConfig {
    pub enabled: bool,
    /// A pair qualifies when its gap is within this distance of the largest pair gap.
    pub pair_threshold: f64,
    /// A pair always qualifies when its gap is at least this large.
    pub min_difference: f64,
    /// Minimum `rigid - lower` spread of a triple before it is worth minimizing.
    pub triple_threshold: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pair_threshold: 0.1,
            min_difference: 0.9,
            triple_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundConfig {
    pub target_epsilon: f64,
    pub parallelism: usize,
    pub queue_capacity: usize,
    /// Scales the internal-node batch size against the leaf batch size.
    pub internal_batch_ratio: f64,
    /// Slack allowed when checking a minimized energy against its lower bound (kcal/mol).
    pub soundness_tolerance: f64,
    /// Largest tolerated increase of epsilon between two phases.
    pub looseness_tolerance: f64,
    pub stability_threshold: Option<Weight>,
    pub correction: CorrectionConfig,
    pub preminimize: bool,
}

#[derive(Default)]
pub struct BoundConfigBuilder {
    target_epsilon: Option<f64>,
    parallelism: Option<usize>,
    queue_capacity: Option<usize>,
    internal_batch_ratio: Option<f64>,
    soundness_tolerance: Option<f64>,
    looseness_tolerance: Option<f64>,
    stability_threshold: Option<Weight>,
    correction: Option<CorrectionConfig>,
    preminimize: bool,
}

impl BoundConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_epsilon(mut self, epsilon: f64) -> Self {
        self.target_epsilon = Some(epsilon);
        self
    }
    pub fn parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
    pub fn internal_batch_ratio(mut self, ratio: f64) -> Self {
        self.internal_batch_ratio = Some(ratio);
        self
    }
    pub fn soundness_tolerance(mut self, tolerance: f64) -> Self {
        self.soundness_tolerance = Some(tolerance);
        self
    }
    pub fn looseness_tolerance(mut self, tolerance: f64) -> Self {
        self.looseness_tolerance = Some(tolerance);
        self
    }
    pub fn stability_threshold(mut self, threshold: Option<Weight>) -> Self {
        self.stability_threshold = threshold;
        self
    }
    pub fn correction(mut self, correction: CorrectionConfig) -> Self {
        self.correction = Some(correction);
        self
    }
    pub fn preminimize(mut self, enabled: bool) -> Self {
        self.preminimize = enabled;
        self
    }

    pub fn build(self) -> Result<BoundConfig, ConfigError> {
        let target_epsilon = self
            .target_epsilon
            .ok_or(ConfigError::MissingParameter("target_epsilon"))?;
        if !(target_epsilon > 0.0 && target_epsilon < 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "target_epsilon",
                reason: format!("must be in (0, 1), got {}", target_epsilon),
            });
        }
        let parallelism = self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        if parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                name: "parallelism",
                reason: "at least one worker thread is required".to_string(),
            });
        }
        let internal_batch_ratio = self.internal_batch_ratio.unwrap_or(0.1);
        if internal_batch_ratio <= 0.0 || internal_batch_ratio.is_nan() {
            return Err(ConfigError::InvalidValue {
                name: "internal_batch_ratio",
                reason: format!("must be positive, got {}", internal_batch_ratio),
            });
        }
        Ok(BoundConfig {
            target_epsilon,
            parallelism,
            queue_capacity: self.queue_capacity.unwrap_or(parallelism * 4),
            internal_batch_ratio,
            soundness_tolerance: self.soundness_tolerance.unwrap_or(1e-6),
            looseness_tolerance: self.looseness_tolerance.unwrap_or(0.01),
            stability_threshold: self.stability_threshold,
            correction: self.correction.unwrap_or_default(),
            preminimize: self.preminimize,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignConfig {
    pub bound: BoundConfig,
    pub num_sequences: usize,
    pub confs_per_batch: usize,
    pub max_simultaneous_mutations: Option<usize>,
    /// Free-energy margin (kcal/mol) a half may lose against the wild type before it is
    /// considered unstable.
    pub stability_threshold: Option<f64>,
    pub partial_sample_size: usize,
    pub precompute_flexible: bool,
    pub precompute_timeout: Duration,
    pub precompute_poll: Duration,
}

#[derive(Default)]
pub struct DesignConfigBuilder {
    bound: Option<BoundConfig>,
    num_sequences: Option<usize>,
    confs_per_batch: Option<usize>,
    max_simultaneous_mutations: Option<usize>,
    stability_threshold: Option<f64>,
    partial_sample_size: Option<usize>,
    precompute_flexible: bool,
    precompute_timeout: Option<Duration>,
    precompute_poll: Option<Duration>,
}

impl DesignConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(mut self, bound: BoundConfig) -> Self {
        self.bound = Some(bound);
        self
    }
    pub fn num_sequences(mut self, n: usize) -> Self {
        self.num_sequences = Some(n);
        self
    }
    pub fn confs_per_batch(mut self, n: usize) -> Self {
        self.confs_per_batch = Some(n);
        self
    }
    pub fn max_simultaneous_mutations(mut self, n: Option<usize>) -> Self {
        self.max_simultaneous_mutations = n;
        self
    }
    pub fn stability_threshold(mut self, threshold: Option<f64>) -> Self {
        self.stability_threshold = threshold;
        self
    }
    pub fn partial_sample_size(mut self, n: usize) -> Self {
        self.partial_sample_size = Some(n);
        self
    }
    pub fn precompute_flexible(mut self, enabled: bool) -> Self {
        self.precompute_flexible = enabled;
        self
    }
    pub fn precompute_timeout(mut self, timeout: Duration) -> Self {
        self.precompute_timeout = Some(timeout);
        self
    }
    pub fn precompute_poll(mut self, poll: Duration) -> Self {
        self.precompute_poll = Some(poll);
        self
    }

    pub fn build(self) -> Result<DesignConfig, ConfigError> {
        let num_sequences = self
            .num_sequences
            .ok_or(ConfigError::MissingParameter("num_sequences"))?;
        if num_sequences == 0 {
            return Err(ConfigError::InvalidValue {
                name: "num_sequences",
                reason: "at least one sequence must be requested".to_string(),
            });
        }
        let confs_per_batch = self.confs_per_batch.unwrap_or(8);
        if confs_per_batch == 0 {
            return Err(ConfigError::InvalidValue {
                name: "confs_per_batch",
                reason: "batches must do some work".to_string(),
            });
        }
        Ok(DesignConfig {
            bound: self.bound.ok_or(ConfigError::MissingParameter("bound"))?,
            num_sequences,
            confs_per_batch,
            max_simultaneous_mutations: self.max_simultaneous_mutations,
            stability_threshold: self.stability_threshold,
            partial_sample_size: self.partial_sample_size.unwrap_or(1000).max(1),
            precompute_flexible: self.precompute_flexible,
            precompute_timeout: self.precompute_timeout.unwrap_or(Duration::from_secs(60)),
            precompute_poll: self.precompute_poll.unwrap_or(Duration::from_millis(500)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_builder_requires_target_epsilon() {
        assert_eq!(
            BoundConfigBuilder::new().build(),
            Err(ConfigError::MissingParameter("target_epsilon"))
        );
    }

    #[test]
    fn bound_builder_rejects_epsilon_outside_unit_interval() {
        for eps in [0.0, 1.0, -0.5, f64::NAN] {
            let result = BoundConfigBuilder::new().target_epsilon(eps).build();
            assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        }
    }

    #[test]
    fn bound_builder_fills_defaults() {
        let config = BoundConfigBuilder::new()
            .target_epsilon(0.1)
            .parallelism(3)
            .build()
            .unwrap();
        assert_eq!(config.parallelism, 3);
        assert_eq!(config.queue_capacity, 12);
        assert_eq!(config.internal_batch_ratio, 0.1);
        assert_eq!(config.looseness_tolerance, 0.01);
        assert!(config.correction.enabled);
        assert!(config.stability_threshold.is_none());
    }

    #[test]
    fn design_builder_requires_bound_and_count() {
        assert_eq!(
            DesignConfigBuilder::new().num_sequences(2).build(),
            Err(ConfigError::MissingParameter("bound"))
        );
        assert_eq!(
            DesignConfigBuilder::new().build(),
            Err(ConfigError::MissingParameter("num_sequences"))
        );
    }

    #[test]
    fn design_builder_fills_defaults() {
        let bound = BoundConfigBuilder::new().target_epsilon(0.5).build().unwrap();
        let config = DesignConfigBuilder::new()
            .bound(bound)
            .num_sequences(4)
            .build()
            .unwrap();
        assert_eq!(config.confs_per_batch, 8);
        assert_eq!(config.partial_sample_size, 1000);
        assert_eq!(config.precompute_timeout, Duration::from_secs(60));
        assert_eq!(config.max_simultaneous_mutations, None);
    }
}
