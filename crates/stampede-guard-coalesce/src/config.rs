//! Configuration for the coalescer.

/// Configuration for a [`Coalescer`](crate::Coalescer).
#[derive(Debug, Clone, Default)]
pub struct CoalesceConfig {
    /// Optional name for metrics/tracing.
    #[cfg_attr(not(any(feature = "metrics", feature = "tracing")), allow(dead_code))]
    pub(crate) name: Option<String>,
}

impl CoalesceConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for more configuration options.
    pub fn builder() -> CoalesceConfigBuilder {
        CoalesceConfigBuilder::default()
    }
}

/// Builder for coalescer configuration.
#[derive(Debug, Clone, Default)]
pub struct CoalesceConfigBuilder {
    name: Option<String>,
}

impl CoalesceConfigBuilder {
    /// Set a name for this coalescer (for metrics/tracing).
    ///
    /// # Example
    ///
    /// ```rust
    /// use stampede_guard_coalesce::CoalesceConfig;
    ///
    /// let config = CoalesceConfig::builder().name("user-lookup").build();
    /// # let _ = config;
    /// ```
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CoalesceConfig {
        CoalesceConfig { name: self.name }
    }
}
