pub struct DefaultsConfig {
    pub target_epsilon: f64,
    pub internal_batch_ratio: f64,
    pub soundness_tolerance: f64,
    pub looseness_tolerance: f64,
    pub preminimize: bool,
    pub corrections_enabled: bool,
    pub pair_threshold: f64,
    pub min_difference: f64,
    pub triple_threshold: f64,
    pub num_sequences: usize,
    pub confs_per_batch: usize,
    pub partial_sample_size: usize,
    pub precompute_flexible: bool,
    pub precompute_timeout_secs: u64,
    pub precompute_poll_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            target_epsilon: 0.68,
            internal_batch_ratio: 0.1,
            soundness_tolerance: 1e-6,
            looseness_tolerance: 0.01,
            preminimize: false,
            corrections_enabled: true,
            pair_threshold: 0.1,
            min_difference: 0.9,
            triple_threshold: 0.3,
            num_sequences: 5,
            confs_per_batch: 8,
            partial_sample_size: 1000,
            precompute_flexible: false,
            precompute_timeout_secs: 60,
            precompute_poll_ms: 500,
        }
    }
}
