//! Static configuration for the product-config controller.

use tracing::warn;

use crate::settings::DEFAULT_MIN_FETCH_INTERVAL_SECONDS;

/// Configuration values fixed for the lifetime of one controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Account identifier used to namespace persisted snapshots.
    pub account_id: String,
    /// Device/installation identity; `None` leaves the controller a
    /// disabled shell until `rebind` supplies one.
    pub identity: Option<String>,
    /// Baseline minimum fetch interval applied before any caller override
    /// or server-assigned policy, in seconds.
    pub default_min_fetch_interval_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            identity: None,
            default_min_fetch_interval_seconds: DEFAULT_MIN_FETCH_INTERVAL_SECONDS,
        }
    }
}

impl ControllerConfig {
    /// Applies safety limits to the configuration.
    ///
    /// A zero interval would disable throttling entirely, so it falls back
    /// to the default constant. Empty identities are normalised to `None`
    /// so the no-identity shell behaviour has a single representation.
    pub(crate) fn sanitise(mut self) -> Self {
        if self.default_min_fetch_interval_seconds == 0 {
            warn!(
                "minimum fetch interval must be positive; using default {}s",
                DEFAULT_MIN_FETCH_INTERVAL_SECONDS
            );
            self.default_min_fetch_interval_seconds = DEFAULT_MIN_FETCH_INTERVAL_SECONDS;
        }
        if self
            .identity
            .as_ref()
            .is_some_and(|identity| identity.is_empty())
        {
            warn!("empty identity supplied; controller will stay disabled until rebound");
            self.identity = None;
        }
        self
    }
}
