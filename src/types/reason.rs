//! Recovery reason classification.
//!
//! Hosts report connectivity trouble with free-form trigger strings
//! (`"networkTypeChanged:wifi->cellular"`, `"doze exit"`, `"app_foreground"`).
//! The classifier folds every such string into a closed [`RecoveryReason`],
//! which carries the policy attached to that cause: its merge priority, its
//! own cooldown, and whether it rides the fast lane.
//!
//! # Priority Levels
//!
//! | reason | priority | source debounce | lane |
//! |---|---|---|---|
//! | `NetworkTypeChanged` | 100 | 3 s | fast |
//! | `DozeExit` | 90 | 3 s | fast |
//! | `NetworkValidated` | 80 | 3 s | normal |
//! | `VpnHealth` | 70 | 30 s | normal |
//! | `AppForeground` | 50 | 1.5 s | fast |
//! | `ScreenOn` | 50 | 1.5 s | fast |
//! | `Unknown` | 10 | 3 s | normal |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Debounce lane a reason belongs to.
///
/// Fast-lane reasons are user-visible transitions where slow response is a
/// visible defect, so their cooldowns are relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Fast,
    Normal,
}

impl Lane {
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Fast => "fast",
            Lane::Normal => "normal",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified cause of a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryReason {
    /// The underlying link type changed (wifi <-> cellular, new transport).
    NetworkTypeChanged,
    /// The device left doze / deep idle.
    DozeExit,
    /// The OS validated the link (e.g. captive portal cleared).
    NetworkValidated,
    /// Periodic tunnel health probe reported trouble.
    VpnHealth,
    /// The app returned to the foreground.
    AppForeground,
    /// The screen turned on.
    ScreenOn,
    /// Anything the classifier did not recognise.
    Unknown,
}

/// Priority-ordered checklist used by [`classify`]; first match wins.
const CHECKLIST: &[(RecoveryReason, &[&str])] = &[
    (
        RecoveryReason::NetworkTypeChanged,
        &["networktype", "networkchanged", "linkchanged", "transport"],
    ),
    (RecoveryReason::DozeExit, &["doze", "idleexit", "deviceidle"]),
    (RecoveryReason::NetworkValidated, &["validated", "captive"]),
    (RecoveryReason::VpnHealth, &["health", "heartbeat"]),
    (RecoveryReason::AppForeground, &["foreground", "appresume"]),
    (RecoveryReason::ScreenOn, &["screenon", "userpresent"]),
];

impl RecoveryReason {
    /// All reasons, in descending priority order.
    pub const ALL: [RecoveryReason; 7] = [
        RecoveryReason::NetworkTypeChanged,
        RecoveryReason::DozeExit,
        RecoveryReason::NetworkValidated,
        RecoveryReason::VpnHealth,
        RecoveryReason::AppForeground,
        RecoveryReason::ScreenOn,
        RecoveryReason::Unknown,
    ];

    /// Merge priority. Higher wins in the tie-break rule.
    pub fn priority(self) -> u32 {
        match self {
            RecoveryReason::NetworkTypeChanged => 100,
            RecoveryReason::DozeExit => 90,
            RecoveryReason::NetworkValidated => 80,
            RecoveryReason::VpnHealth => 70,
            RecoveryReason::AppForeground => 50,
            RecoveryReason::ScreenOn => 50,
            RecoveryReason::Unknown => 10,
        }
    }

    /// Minimum spacing between two accepted requests of this reason.
    ///
    /// Fast-lane reasons may have this capped further by the policy.
    pub fn source_debounce(self) -> Duration {
        match self {
            RecoveryReason::VpnHealth => Duration::from_millis(30_000),
            RecoveryReason::AppForeground | RecoveryReason::ScreenOn => {
                Duration::from_millis(1_500)
            }
            RecoveryReason::NetworkTypeChanged
            | RecoveryReason::DozeExit
            | RecoveryReason::NetworkValidated
            | RecoveryReason::Unknown => Duration::from_millis(3_000),
        }
    }

    pub fn lane(self) -> Lane {
        match self {
            RecoveryReason::NetworkTypeChanged
            | RecoveryReason::DozeExit
            | RecoveryReason::AppForeground
            | RecoveryReason::ScreenOn => Lane::Fast,
            RecoveryReason::NetworkValidated | RecoveryReason::VpnHealth | RecoveryReason::Unknown => {
                Lane::Normal
            }
        }
    }

    pub fn is_fast_lane(self) -> bool {
        self.lane() == Lane::Fast
    }

    /// Stable key used for per-reason bookkeeping and log fields.
    pub fn key(self) -> &'static str {
        match self {
            RecoveryReason::NetworkTypeChanged => "network_type_changed",
            RecoveryReason::DozeExit => "doze_exit",
            RecoveryReason::NetworkValidated => "network_validated",
            RecoveryReason::VpnHealth => "vpn_health",
            RecoveryReason::AppForeground => "app_foreground",
            RecoveryReason::ScreenOn => "screen_on",
            RecoveryReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Classifies a raw trigger string.
///
/// Matching is case-insensitive and ignores whitespace, dashes and
/// underscores, so `"Screen-On"`, `"screenOn"` and `"SCREEN_ON"` all classify
/// the same.
/// Never fails: anything unrecognised is [`RecoveryReason::Unknown`].
///
/// # Examples
///
/// ```
/// use tunnel_recovery::types::{RecoveryReason, classify};
///
/// assert_eq!(
///     classify("networkTypeChanged:wifi->cellular"),
///     RecoveryReason::NetworkTypeChanged
/// );
/// assert_eq!(classify("  App Foreground "), RecoveryReason::AppForeground);
/// assert_eq!(classify(""), RecoveryReason::Unknown);
/// ```
pub fn classify(raw: &str) -> RecoveryReason {
    let normalized = normalize(raw);
    if normalized.is_empty() {
        return RecoveryReason::Unknown;
    }

    CHECKLIST
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| normalized.contains(needle)))
        .map(|(reason, _)| *reason)
        .unwrap_or(RecoveryReason::Unknown)
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
