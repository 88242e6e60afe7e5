use std::time::Duration;

use crate::error::{Error, Result};
use crate::load_balancing::host_filter::FilterChain;

/// Base node selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyKind {
    /// Rotates over all up nodes, regardless of their datacenter.
    RoundRobin,
    /// Rotates over up nodes of the local datacenter, optionally falling back to a limited
    /// number of nodes from each remote datacenter.
    DcAware {
        local_dc: String,
        used_hosts_per_remote_dc: usize,
        allow_remote_dcs_for_local_cl: bool,
    },
}

impl Default for PolicyKind {
    fn default() -> Self {
        PolicyKind::RoundRobin
    }
}

impl PolicyKind {
    pub fn dc_aware(
        local_dc: impl Into<String>,
        used_hosts_per_remote_dc: usize,
        allow_remote_dcs_for_local_cl: bool,
    ) -> Self {
        PolicyKind::DcAware {
            local_dc: local_dc.into(),
            used_hosts_per_remote_dc,
            allow_remote_dcs_for_local_cl,
        }
    }
}

/// Latency-aware routing settings. Nodes whose average latency exceeds the best average in the
/// cluster times `exclusion_threshold` are moved to the back of their tier.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyAwarenessConfig {
    exclusion_threshold: f64,
    scale: Duration,
    retry_period: Duration,
    update_rate: Duration,
    min_measured: u64,
}

impl Default for LatencyAwarenessConfig {
    fn default() -> Self {
        LatencyAwarenessConfig {
            exclusion_threshold: 2.0,
            scale: Duration::from_millis(100),
            retry_period: Duration::from_secs(10),
            update_rate: Duration::from_millis(100),
            min_measured: 50,
        }
    }
}

impl LatencyAwarenessConfig {
    /// How much worse than the fastest node a node needs to be to get penalized.
    #[must_use]
    pub fn with_exclusion_threshold(mut self, exclusion_threshold: f64) -> Self {
        self.exclusion_threshold = exclusion_threshold;
        self
    }

    /// Weight given to older latencies when computing the average. The longer since the last
    /// measurement, the less the previous average matters.
    #[must_use]
    pub fn with_scale(mut self, scale: Duration) -> Self {
        self.scale = scale;
        self
    }

    /// Time after which a penalized node is tried again, even if it still looks slow.
    #[must_use]
    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    /// How often the cluster-wide minimum average is recomputed.
    #[must_use]
    pub fn with_update_rate(mut self, update_rate: Duration) -> Self {
        self.update_rate = update_rate;
        self
    }

    /// Number of measurements needed before a node's average is trusted.
    #[must_use]
    pub fn with_min_measured(mut self, min_measured: u64) -> Self {
        self.min_measured = min_measured;
        self
    }

    #[inline]
    pub fn exclusion_threshold(&self) -> f64 {
        self.exclusion_threshold
    }

    #[inline]
    pub fn scale(&self) -> Duration {
        self.scale
    }

    #[inline]
    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }

    #[inline]
    pub fn update_rate(&self) -> Duration {
        self.update_rate
    }

    #[inline]
    pub fn min_measured(&self) -> u64 {
        self.min_measured
    }

    fn validate(&self) -> Result<()> {
        if !self.exclusion_threshold.is_finite() || self.exclusion_threshold < 1.0 {
            return Err(Error::Configuration(format!(
                "Latency exclusion threshold must be a finite number >= 1.0, got: {}",
                self.exclusion_threshold
            )));
        }

        if self.scale.is_zero() {
            return Err(Error::Configuration(
                "Latency scale must be greater than zero".into(),
            ));
        }

        if self.update_rate.is_zero() {
            return Err(Error::Configuration(
                "Latency update rate must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Validated load balancing configuration.
#[derive(Debug, Clone)]
pub struct LoadBalancingConfig {
    pub(crate) policy: PolicyKind,
    pub(crate) token_aware: bool,
    pub(crate) shuffle_replicas: bool,
    pub(crate) latency_awareness: Option<LatencyAwarenessConfig>,
    pub(crate) filter_chain: FilterChain,
}

impl LoadBalancingConfig {
    #[inline]
    pub fn policy(&self) -> &PolicyKind {
        &self.policy
    }

    #[inline]
    pub fn token_aware(&self) -> bool {
        self.token_aware
    }

    #[inline]
    pub fn latency_awareness(&self) -> Option<&LatencyAwarenessConfig> {
        self.latency_awareness.as_ref()
    }

    #[inline]
    pub fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        LoadBalancingConfig {
            policy: Default::default(),
            token_aware: true,
            shuffle_replicas: false,
            latency_awareness: None,
            filter_chain: Default::default(),
        }
    }
}

/// Builder for [`LoadBalancingConfig`]. Host filters accept IP addresses (matching any port) or
/// socket addresses; an empty set disables given rule.
#[derive(Debug, Clone)]
pub struct LoadBalancingConfigBuilder {
    policy: PolicyKind,
    token_aware: bool,
    shuffle_replicas: bool,
    latency_awareness: Option<LatencyAwarenessConfig>,
    host_whitelist: Vec<String>,
    host_blacklist: Vec<String>,
    datacenter_whitelist: Vec<String>,
    datacenter_blacklist: Vec<String>,
}

impl Default for LoadBalancingConfigBuilder {
    fn default() -> Self {
        LoadBalancingConfigBuilder {
            policy: Default::default(),
            token_aware: true,
            shuffle_replicas: false,
            latency_awareness: None,
            host_whitelist: vec![],
            host_blacklist: vec![],
            datacenter_whitelist: vec![],
            datacenter_blacklist: vec![],
        }
    }
}

impl LoadBalancingConfigBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets base node selection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Enables or disables preferring replicas of the routing key. Enabled by default.
    #[must_use]
    pub fn with_token_aware(mut self, token_aware: bool) -> Self {
        self.token_aware = token_aware;
        self
    }

    /// Randomizes replica order instead of trying the primary replica first.
    #[must_use]
    pub fn with_shuffle_replicas(mut self, shuffle_replicas: bool) -> Self {
        self.shuffle_replicas = shuffle_replicas;
        self
    }

    /// Enables latency-aware routing.
    #[must_use]
    pub fn with_latency_awareness(mut self, latency_awareness: LatencyAwarenessConfig) -> Self {
        self.latency_awareness = Some(latency_awareness);
        self
    }

    #[must_use]
    pub fn with_host_whitelist<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_whitelist = hosts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_host_blacklist<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_blacklist = hosts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_datacenter_whitelist<I, S>(mut self, datacenters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datacenter_whitelist = datacenters.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_datacenter_blacklist<I, S>(mut self, datacenters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datacenter_blacklist = datacenters.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the configuration. All errors are reported here, never at query time.
    pub fn build(self) -> Result<LoadBalancingConfig> {
        if let PolicyKind::DcAware { local_dc, .. } = &self.policy {
            if local_dc.trim().is_empty() {
                return Err(Error::Configuration(
                    "Local datacenter name cannot be empty".into(),
                ));
            }
        }

        if let Some(latency_awareness) = &self.latency_awareness {
            latency_awareness.validate()?;
        }

        let filter_chain = FilterChain::new(
            &self.host_whitelist,
            &self.host_blacklist,
            self.datacenter_whitelist,
            self.datacenter_blacklist,
        )?;

        Ok(LoadBalancingConfig {
            policy: self.policy,
            token_aware: self.token_aware,
            shuffle_replicas: self.shuffle_replicas,
            latency_awareness: self.latency_awareness,
            filter_chain,
        })
    }
}
