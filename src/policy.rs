//! Tunable recovery policy.
//!
//! Every threshold the coordinator uses is a named default here rather than a
//! literal in the logic. The values were tuned empirically for mobile links and
//! can be overridden per deployment.
//!
//! # Defaults
//!
//! - **Global debounce**: 1200 ms for normal-lane reasons, 150 ms for fast lane
//! - **Fast-lane source cap**: per-reason debounce capped at 800 ms
//! - **Merge window**: 400 ms
//! - **Fallback grace delay**: 3 s after a soft foreground success
//! - **Fallback cooldown**: 15 s between two hard fallbacks
//! - **Fallback probe timeout**: 2 s
//!
//! # Environment
//!
//! [`RecoveryPolicy::from_env`] reads `TUNNEL_RECOVERY_<NAME>_MS` for each
//! field (for example `TUNNEL_RECOVERY_MERGE_WINDOW_MS`).

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::types::{Lane, RecoveryReason};

/// Default global debounce for normal-lane reasons (1200 ms).
const DEFAULT_GLOBAL_DEBOUNCE_MS: u64 = 1_200;

/// Default global debounce for fast-lane reasons (150 ms).
const DEFAULT_FAST_LANE_GLOBAL_DEBOUNCE_MS: u64 = 150;

/// Default cap applied to a fast-lane reason's own debounce (800 ms).
const DEFAULT_FAST_LANE_SOURCE_DEBOUNCE_CAP_MS: u64 = 800;

/// Default merge window while idle (400 ms).
const DEFAULT_MERGE_WINDOW_MS: u64 = 400;

/// Default grace delay before a hard fallback is evaluated (3 s).
const DEFAULT_FALLBACK_GRACE_DELAY_MS: u64 = 3_000;

/// Default minimum spacing between two hard fallbacks (15 s).
const DEFAULT_FALLBACK_COOLDOWN_MS: u64 = 15_000;

/// Default timeout for the fallback connectivity probe (2 s).
const DEFAULT_FALLBACK_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Errors from loading or validating a policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// An environment variable held something other than whole milliseconds.
    #[error("invalid value for {var}: {value:?} (expected milliseconds)")]
    InvalidEnvValue { var: String, value: String },

    /// A duration that must be positive was zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// The fast lane must not be slower than the normal lane.
    #[error("fast-lane global debounce ({fast:?}) exceeds normal global debounce ({normal:?})")]
    FastLaneSlowerThanNormal { fast: Duration, normal: Duration },
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Thresholds for debouncing, merging and fallback escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Minimum spacing between accepted normal-lane requests.
    pub global_debounce: Duration,

    /// Minimum spacing between accepted fast-lane requests.
    ///
    /// Kept roughly an order of magnitude tighter than `global_debounce`.
    pub fast_lane_global_debounce: Duration,

    /// Upper bound on a fast-lane reason's own debounce.
    pub fast_lane_source_debounce_cap: Duration,

    /// How long an idle coordinator keeps merging before dispatching.
    pub merge_window: Duration,

    /// Delay between a soft foreground success and its fallback check.
    pub fallback_grace_delay: Duration,

    /// Minimum spacing between two hard fallbacks.
    pub fallback_cooldown: Duration,

    /// Timeout handed to the engine's connectivity probe.
    pub fallback_probe_timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryPolicy {
    /// Creates a policy with the default thresholds.
    pub fn new() -> Self {
        RecoveryPolicy {
            global_debounce: Duration::from_millis(DEFAULT_GLOBAL_DEBOUNCE_MS),
            fast_lane_global_debounce: Duration::from_millis(DEFAULT_FAST_LANE_GLOBAL_DEBOUNCE_MS),
            fast_lane_source_debounce_cap: Duration::from_millis(
                DEFAULT_FAST_LANE_SOURCE_DEBOUNCE_CAP_MS,
            ),
            merge_window: Duration::from_millis(DEFAULT_MERGE_WINDOW_MS),
            fallback_grace_delay: Duration::from_millis(DEFAULT_FALLBACK_GRACE_DELAY_MS),
            fallback_cooldown: Duration::from_millis(DEFAULT_FALLBACK_COOLDOWN_MS),
            fallback_probe_timeout: Duration::from_millis(DEFAULT_FALLBACK_PROBE_TIMEOUT_MS),
        }
    }

    /// Creates a policy from environment variables, keeping defaults for
    /// anything unset or unparseable.
    ///
    /// If the overrides combine into a policy that fails [`validate`](Self::validate),
    /// a warning is logged and the defaults are used instead.
    pub fn from_env() -> Self {
        Self::from_lookup_or_default(|var| std::env::var(var).ok())
    }

    fn from_lookup_or_default(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let policy = Self::from_lookup(lookup, |err| {
            warn!(error = %err, "Ignoring invalid recovery policy override");
        });
        match policy.validate() {
            Ok(()) => policy,
            Err(err) => {
                warn!(error = %err, "Recovery policy overrides rejected, using defaults");
                Self::new()
            }
        }
    }

    /// Like [`from_env`](Self::from_env) but rejects invalid values.
    pub fn try_from_env() -> Result<Self> {
        let mut first_error = None;
        let policy = Self::from_lookup(
            |var| std::env::var(var).ok(),
            |err| {
                first_error.get_or_insert(err);
            },
        );
        match first_error {
            Some(err) => Err(err),
            None => {
                policy.validate()?;
                Ok(policy)
            }
        }
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        mut on_error: impl FnMut(PolicyError),
    ) -> Self {
        let mut read = |name: &str, default: Duration| -> Duration {
            let var = format!("TUNNEL_RECOVERY_{name}_MS");
            match lookup(&var) {
                None => default,
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(ms) => Duration::from_millis(ms),
                    Err(_) => {
                        on_error(PolicyError::InvalidEnvValue { var, value });
                        default
                    }
                },
            }
        };

        let defaults = Self::new();
        RecoveryPolicy {
            global_debounce: read("GLOBAL_DEBOUNCE", defaults.global_debounce),
            fast_lane_global_debounce: read(
                "FAST_LANE_GLOBAL_DEBOUNCE",
                defaults.fast_lane_global_debounce,
            ),
            fast_lane_source_debounce_cap: read(
                "FAST_LANE_SOURCE_DEBOUNCE_CAP",
                defaults.fast_lane_source_debounce_cap,
            ),
            merge_window: read("MERGE_WINDOW", defaults.merge_window),
            fallback_grace_delay: read("FALLBACK_GRACE_DELAY", defaults.fallback_grace_delay),
            fallback_cooldown: read("FALLBACK_COOLDOWN", defaults.fallback_cooldown),
            fallback_probe_timeout: read(
                "FALLBACK_PROBE_TIMEOUT",
                defaults.fallback_probe_timeout,
            ),
        }
    }

    /// Checks the policy for values the coordinator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.merge_window.is_zero() {
            return Err(PolicyError::ZeroDuration {
                field: "merge_window",
            });
        }
        if self.fallback_probe_timeout.is_zero() {
            return Err(PolicyError::ZeroDuration {
                field: "fallback_probe_timeout",
            });
        }
        if self.fast_lane_global_debounce > self.global_debounce {
            return Err(PolicyError::FastLaneSlowerThanNormal {
                fast: self.fast_lane_global_debounce,
                normal: self.global_debounce,
            });
        }
        Ok(())
    }

    /// Sets the normal-lane global debounce.
    pub fn with_global_debounce(mut self, value: Duration) -> Self {
        self.global_debounce = value;
        self
    }

    /// Sets the fast-lane global debounce.
    pub fn with_fast_lane_global_debounce(mut self, value: Duration) -> Self {
        self.fast_lane_global_debounce = value;
        self
    }

    /// Sets the cap on a fast-lane reason's own debounce.
    pub fn with_fast_lane_source_debounce_cap(mut self, value: Duration) -> Self {
        self.fast_lane_source_debounce_cap = value;
        self
    }

    /// Sets the merge window.
    pub fn with_merge_window(mut self, value: Duration) -> Self {
        self.merge_window = value;
        self
    }

    /// Sets the fallback grace delay.
    pub fn with_fallback_grace_delay(mut self, value: Duration) -> Self {
        self.fallback_grace_delay = value;
        self
    }

    /// Sets the fallback cooldown.
    pub fn with_fallback_cooldown(mut self, value: Duration) -> Self {
        self.fallback_cooldown = value;
        self
    }

    /// Sets the timeout handed to the fallback probe.
    pub fn with_fallback_probe_timeout(mut self, value: Duration) -> Self {
        self.fallback_probe_timeout = value;
        self
    }

    /// Global debounce that applies to a lane.
    pub fn global_debounce_for(&self, lane: Lane) -> Duration {
        match lane {
            Lane::Fast => self.fast_lane_global_debounce,
            Lane::Normal => self.global_debounce,
        }
    }

    /// Per-reason debounce after applying the fast-lane cap.
    pub fn source_debounce_for(&self, reason: RecoveryReason) -> Duration {
        match reason.lane() {
            Lane::Fast => reason
                .source_debounce()
                .min(self.fast_lane_source_debounce_cap),
            Lane::Normal => reason.source_debounce(),
        }
    }
}
