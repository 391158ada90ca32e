use log::info;
use strum_macros::Display;

use crate::common::{reduce, Channel, Event};
use crate::error::FilterError;
use crate::schemas::FreezeConfig;

/// Button state shared by both axes of a device.
///
/// While `freeze_active`, `freeze_start_time` is the timestamp of the press that
/// started the freeze and never 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonFreezeState {
    pub button_down: bool,
    pub freeze_active: bool,
    pub freeze_start_time: u64,
    pub freeze_accum_distance: (i64, i64),
    /// A second press arrived while the first one's freeze was still running.
    pub second_press: bool,
}

impl ButtonFreezeState {
    /// Clears everything, button included.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clears the freeze but keeps tracking the physical button.
    fn end_freeze(&mut self) {
        *self = Self {
            button_down: self.button_down,
            ..Self::default()
        };
    }

    fn start_freeze(&mut self, now: u64) {
        *self = Self {
            button_down: true,
            freeze_active: true,
            // Never 0 while frozen, even for an event stamped at time 0.
            freeze_start_time: now.max(1),
            ..Self::default()
        };
    }

    fn distance(&self) -> f64 {
        let (dx, dy) = self.freeze_accum_distance;
        (dx as f64).hypot(dy as f64)
    }
}

/// What the coordinator decided for one motion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeOutcome {
    /// Drag motion with the button held: emit this reduced event.
    Emit(Event),
    /// Frozen: the event is discarded, nothing is emitted for it.
    Eat,
    /// The freeze just broke, the axis damper takes this event.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FreezeTransition {
    FirstPress,
    SecondPress,
    ReleaseReset,
    ReleaseKeepFreeze,
    FrozenMotion,
    FreezeBroken,
    ReducedMotion,
}

/// Holds the pointer still right after a button press so a click, or the two
/// clicks of a double-click, land where the press happened. Motion breaks the
/// freeze once it travels far enough or the double-click window runs out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonFreezeCoordinator;

impl ButtonFreezeCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Tracks presses and releases. Returns false for events it does not
    /// handle; a consumed button event is emitted unchanged by the caller.
    pub fn handle_button(
        &self,
        event: &Event,
        state: &mut ButtonFreezeState,
        config: &FreezeConfig,
        verbose: bool,
    ) -> bool {
        if !event.channel.is_button() {
            return false;
        }
        let now = event.timestamp;

        match event.value {
            1 => {
                if state.freeze_active && !self.window_expired(state, config, now) {
                    state.button_down = true;
                    state.second_press = true;
                    self.trace(verbose, event.channel, FreezeTransition::SecondPress, now, state);
                } else {
                    state.start_freeze(now);
                    self.trace(verbose, event.channel, FreezeTransition::FirstPress, now, state);
                }
                true
            }
            0 => {
                state.button_down = false;
                if self.window_expired(state, config, now) || state.second_press {
                    state.reset();
                    self.trace(verbose, event.channel, FreezeTransition::ReleaseReset, now, state);
                } else {
                    self.trace(
                        verbose,
                        event.channel,
                        FreezeTransition::ReleaseKeepFreeze,
                        now,
                        state,
                    );
                }
                true
            }
            _ => false,
        }
    }

    /// Decides over one axis event while a button is down or a freeze runs.
    pub fn handle_motion(
        &self,
        event: &Event,
        state: &mut ButtonFreezeState,
        config: &FreezeConfig,
        verbose: bool,
    ) -> Result<FreezeOutcome, FilterError> {
        let now = event.timestamp;
        let reduced = reduce(event.value, config.motion_reduction_fraction);

        if state.freeze_active {
            let (dx, dy) = &mut state.freeze_accum_distance;
            let component = match event.channel {
                Channel::AxisX => dx,
                Channel::AxisY => dy,
                other => {
                    return Err(FilterError::Invariant(format!(
                        "{other} routed to freeze motion handling"
                    )))
                }
            };
            *component = component.checked_add(i64::from(reduced)).ok_or_else(|| {
                FilterError::Invariant(format!("freeze distance overflow at {now}us"))
            })?;

            let within_time =
                now.saturating_sub(state.freeze_start_time) < config.double_click_wait_time;
            if state.distance() > config.freeze_break_distance || !within_time {
                self.trace(verbose, event.channel, FreezeTransition::FreezeBroken, now, state);
                state.end_freeze();
                return Ok(FreezeOutcome::Release);
            }

            self.trace(verbose, event.channel, FreezeTransition::FrozenMotion, now, state);
            return Ok(FreezeOutcome::Eat);
        }

        if state.button_down {
            self.trace(verbose, event.channel, FreezeTransition::ReducedMotion, now, state);
            return Ok(FreezeOutcome::Emit(event.with_value(reduced)));
        }

        // Not frozen and no button held: nothing to modulate.
        Ok(FreezeOutcome::Release)
    }

    fn window_expired(&self, state: &ButtonFreezeState, config: &FreezeConfig, now: u64) -> bool {
        now.saturating_sub(state.freeze_start_time) > config.double_click_wait_time
    }

    fn trace(
        &self,
        verbose: bool,
        channel: Channel,
        transition: FreezeTransition,
        now: u64,
        state: &ButtonFreezeState,
    ) {
        if verbose {
            info!(
                "[{}] {} @{}us down={} frozen={} deltas={:?} distance={:.1}",
                channel,
                transition,
                now,
                state.button_down,
                state.freeze_active,
                state.freeze_accum_distance,
                state.distance()
            );
        }
    }
}
