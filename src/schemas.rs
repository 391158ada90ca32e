use doc_for::*;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::common::USEC_IN_MSEC;

// ----------------
// Configuration file types
// ----------------
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[doc_impl]
pub struct DamperSettings {
    /// Relative value at or below which an isolated motion event is zeroed out.
    #[serde(default = "default_cancel_value")]
    #[validate(minimum = 0)]
    pub cancel_value: i64,
    /// Accumulated jitter distance after which small motion counts as intentional.
    #[serde(default = "default_delta_threshold")]
    #[validate(minimum = 1)]
    pub delta_threshold: i64,
    /// Window, in ms, within which `delta_threshold` must be reached to keep cancelling.
    #[serde(default = "default_threshold_timeout_ms")]
    #[validate(minimum = 1)]
    pub threshold_timeout_ms: i64,
    /// Time, in ms, passthrough persists after the last large motion (settle time).
    #[serde(default = "default_decay_time_ms")]
    #[validate(minimum = 0)]
    pub decay_time_ms: i64,
    /// Maximum time, in ms, between clicks of a double-click.
    #[serde(default = "default_double_click_wait_time_ms")]
    #[validate(minimum = 1)]
    #[validate(maximum = 10000)]
    pub double_click_wait_time_ms: i64,
    /// Pointer travel, in counts, that breaks the freeze started by a button press.
    #[serde(default = "default_freeze_break_distance")]
    #[validate(minimum = 0)]
    pub freeze_break_distance: i64,
    /// Fraction applied to motion while a button is held after the freeze broke.
    #[serde(default = "default_motion_reduction_fraction")]
    #[validate(exclusive_minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub motion_reduction_fraction: f64,
    /// Multiplier applied to `freeze_break_distance`, e.g. for high DPI mice.
    #[serde(default = "default_threshold_scale")]
    #[validate(exclusive_minimum = 0.0)]
    pub threshold_scale: f64,
    /// Log every filter state transition.
    #[serde(default)]
    pub verbose: bool,
    /// Only filter pointer devices whose name matches. All of them when absent.
    #[serde(with = "serde_regex", default, skip_serializing_if = "Option::is_none")]
    pub device_name_regex: Option<regex::Regex>,
}

impl Default for DamperSettings {
    fn default() -> Self {
        Self {
            cancel_value: default_cancel_value(),
            delta_threshold: default_delta_threshold(),
            threshold_timeout_ms: default_threshold_timeout_ms(),
            decay_time_ms: default_decay_time_ms(),
            double_click_wait_time_ms: default_double_click_wait_time_ms(),
            freeze_break_distance: default_freeze_break_distance(),
            motion_reduction_fraction: default_motion_reduction_fraction(),
            threshold_scale: default_threshold_scale(),
            verbose: false,
            device_name_regex: None,
        }
    }
}

fn default_cancel_value() -> i64 {
    2
}

fn default_delta_threshold() -> i64 {
    20
}

fn default_threshold_timeout_ms() -> i64 {
    500
}

fn default_decay_time_ms() -> i64 {
    100
}

fn default_double_click_wait_time_ms() -> i64 {
    400
}

fn default_freeze_break_distance() -> i64 {
    100
}

fn default_motion_reduction_fraction() -> f64 {
    0.5
}

fn default_threshold_scale() -> f64 {
    1.0
}

// ----------------
// Resolved types, in the units the filter works with
// ----------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisDamperConfig {
    pub cancel_value: i64,
    pub delta_threshold: i64,
    /// Microseconds.
    pub threshold_timeout: u64,
    /// Microseconds.
    pub decay_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreezeConfig {
    /// Microseconds.
    pub double_click_wait_time: u64,
    /// Already scaled by `threshold_scale`.
    pub freeze_break_distance: f64,
    pub motion_reduction_fraction: f64,
}

/// Immutable filter configuration, built once and shared by reference with
/// every device filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub damper: AxisDamperConfig,
    pub freeze: FreezeConfig,
    pub verbose: bool,
}

impl FilterConfig {
    /// Converts already validated settings. Negative values were rejected by
    /// validation, the casts only change units.
    pub fn from_settings(settings: &DamperSettings) -> Self {
        let ms = |v: i64| (v.max(0) as u64).saturating_mul(USEC_IN_MSEC);
        Self {
            damper: AxisDamperConfig {
                cancel_value: settings.cancel_value,
                delta_threshold: settings.delta_threshold,
                threshold_timeout: ms(settings.threshold_timeout_ms),
                decay_time: ms(settings.decay_time_ms),
            },
            freeze: FreezeConfig {
                double_click_wait_time: ms(settings.double_click_wait_time_ms),
                freeze_break_distance: settings.freeze_break_distance as f64
                    * settings.threshold_scale,
                motion_reduction_fraction: settings.motion_reduction_fraction,
            },
            verbose: settings.verbose,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::from_settings(&DamperSettings::default())
    }
}
