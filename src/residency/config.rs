// src/residency/config.rs
//! Tunable knobs for the residency policy, built the way the teacher's
//! `AssetManagerConfig` / `ResourceConfig` are: plain data with a `Default`
//! impl and a fluent builder.

/// Default hard budget: 512 MiB, matching the teacher's
/// `ResourceConfig::max_texture_bytes` default.
pub const DEFAULT_IMAGE_BUDGET: u64 = 512 * 1024 * 1024;

/// Default soft per-iteration budget: 64 MiB.
pub const DEFAULT_IMAGE_BUDGET_PER_ITERATION: u64 = 64 * 1024 * 1024;

/// Default fence slack — the "within three" backpressure window.
pub const DEFAULT_FENCE_SLACK: u32 = 3;

/// Residency manager configuration.
#[derive(Debug, Clone)]
pub struct ResidencyConfig {
    /// Hard total budget, in bytes, across all resident assets.
    /// `PERSISTENT`-priority residents may push total consumption above
    /// this; the policy never evicts them to enforce it.
    pub image_budget: u64,
    /// Soft per-iteration budget, in bytes: the policy stops activating new
    /// assets in a single `iterate` call once activations alone would
    /// exceed this, even if the hard budget has room left.
    pub image_budget_per_iteration: u64,
    /// Maximum gap, in completed fence signals, `iterate` tolerates between
    /// the last timestamp it handed out and the fence's `completed()` count
    /// before skipping dispatch (`BackpressureSkip`).
    pub fence_slack: u32,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        ResidencyConfig {
            image_budget: DEFAULT_IMAGE_BUDGET,
            image_budget_per_iteration: DEFAULT_IMAGE_BUDGET_PER_ITERATION,
            fence_slack: DEFAULT_FENCE_SLACK,
        }
    }
}

impl ResidencyConfig {
    pub fn builder() -> ResidencyConfigBuilder {
        ResidencyConfigBuilder::default()
    }
}

/// Fluent builder for `ResidencyConfig`, mirroring the teacher's
/// `AssetManagerBuilder`.
#[derive(Debug, Clone, Default)]
pub struct ResidencyConfigBuilder {
    config: OptionalConfig,
}

#[derive(Debug, Clone, Default)]
struct OptionalConfig {
    image_budget: Option<u64>,
    image_budget_per_iteration: Option<u64>,
    fence_slack: Option<u32>,
}

impl ResidencyConfigBuilder {
    pub fn image_budget(mut self, bytes: u64) -> Self {
        self.config.image_budget = Some(bytes);
        self
    }

    pub fn image_budget_per_iteration(mut self, bytes: u64) -> Self {
        self.config.image_budget_per_iteration = Some(bytes);
        self
    }

    pub fn fence_slack(mut self, slack: u32) -> Self {
        self.config.fence_slack = Some(slack);
        self
    }

    pub fn build(self) -> ResidencyConfig {
        let defaults = ResidencyConfig::default();
        ResidencyConfig {
            image_budget: self.config.image_budget.unwrap_or(defaults.image_budget),
            image_budget_per_iteration: self
                .config
                .image_budget_per_iteration
                .unwrap_or(defaults.image_budget_per_iteration),
            fence_slack: self.config.fence_slack.unwrap_or(defaults.fence_slack),
        }
    }
}
