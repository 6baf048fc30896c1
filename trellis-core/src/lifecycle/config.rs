//! Coordinator configuration.

/// Tunables for a [`Coordinator`](super::Coordinator).
///
/// ```rust
/// use trellis_core::lifecycle::CoordinatorConfig;
///
/// let config = CoordinatorConfig::default().with_detached_grace_ticks(3);
/// assert_eq!(config.detached_grace_ticks, Some(3));
/// assert!(config.isolate_hook_panics);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Dispose a wrapper automatically once it has been detached for this many
    /// consecutive observation ticks after having been mounted.
    ///
    /// `None` keeps detached wrappers alive until `unmount()` is called, so
    /// they can be reattached at any time.
    pub detached_grace_ticks: Option<u32>,

    /// Catch panics raised by lifecycle hooks, log them and keep dispatching.
    ///
    /// Turning this off lets hook panics unwind into the caller, which is
    /// useful when debugging a single hook but can leave a teardown half done.
    pub isolate_hook_panics: bool,
}

impl CoordinatorConfig {
    /// Set [`detached_grace_ticks`](CoordinatorConfig::detached_grace_ticks).
    pub fn with_detached_grace_ticks(mut self, ticks: u32) -> Self {
        self.detached_grace_ticks = Some(ticks);
        self
    }

    /// Set [`isolate_hook_panics`](CoordinatorConfig::isolate_hook_panics).
    pub fn with_hook_isolation(mut self, isolate: bool) -> Self {
        self.isolate_hook_panics = isolate;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            detached_grace_ticks: None,
            isolate_hook_panics: true,
        }
    }
}
