use log::info;
use strum_macros::Display;

use crate::common::{Channel, Event};
use crate::error::FilterError;
use crate::schemas::AxisDamperConfig;

/// Per-axis jitter cancellation state.
///
/// `accumulation_start_time == 0` means no accumulation window is open, and
/// while `passthrough_active` both the accumulator and the window start stay 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisDamperState {
    pub accumulator: i64,
    pub accumulation_start_time: u64,
    pub decay_time: u64,
    pub passthrough_active: bool,
}

impl AxisDamperState {
    fn reset_accumulation(&mut self) {
        self.accumulator = 0;
        self.accumulation_start_time = 0;
    }

    fn start_passthrough(&mut self, now: u64) {
        self.reset_accumulation();
        self.passthrough_active = true;
        self.decay_time = now;
    }

    fn end_passthrough(&mut self) {
        self.reset_accumulation();
        self.passthrough_active = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AxisTransition {
    ContinuePassthrough,
    EndPassthrough,
    LargeDelta,
    Accumulate,
    TimeoutDiscard,
    ThresholdReached,
}

/// Jitter damper for one relative axis.
///
/// Small deltas are swallowed into an accumulator and replaced by zero-valued
/// events. Once enough motion accumulates inside the timeout, or a single delta
/// is large, the axis switches to passthrough until it stays quiet for the decay
/// time.
#[derive(Debug, Clone, Copy)]
pub struct AxisDamper {
    channel: Channel,
}

impl AxisDamper {
    pub fn new(channel: Channel) -> Self {
        debug_assert!(channel.is_axis(), "{channel} is not a motion axis");
        Self { channel }
    }

    pub fn transform(
        &self,
        event: Event,
        state: &mut AxisDamperState,
        config: &AxisDamperConfig,
        verbose: bool,
    ) -> Result<Option<Event>, FilterError> {
        let now = event.timestamp;

        if state.passthrough_active {
            if now.saturating_sub(state.decay_time) < config.decay_time {
                state.decay_time = now;
                self.trace(verbose, AxisTransition::ContinuePassthrough, now, state);
                return Ok(Some(event));
            }
            state.end_passthrough();
            self.trace(verbose, AxisTransition::EndPassthrough, now, state);
        }

        let magnitude = i64::from(event.value).abs();
        if magnitude > config.cancel_value {
            state.start_passthrough(now);
            self.trace(verbose, AxisTransition::LargeDelta, now, state);
            return Ok(Some(event));
        }

        let within_time = now.saturating_sub(state.accumulation_start_time) < config.threshold_timeout;
        let within_move = state.accumulator.unsigned_abs() < config.delta_threshold.unsigned_abs();

        if state.accumulator == 0 || (within_time && within_move) {
            if state.accumulation_start_time == 0 {
                // 0 marks "no window", a window opened at time 0 starts at 1us.
                state.accumulation_start_time = now.max(1);
            }
            state.accumulator = state
                .accumulator
                .checked_add(i64::from(event.value))
                .ok_or_else(|| {
                    FilterError::Invariant(format!(
                        "{} accumulator overflow at {now}us",
                        self.channel
                    ))
                })?;
            self.trace(verbose, AxisTransition::Accumulate, now, state);
            return Ok(Some(event.with_value(0)));
        }

        if !within_time && within_move {
            state.reset_accumulation();
            self.trace(verbose, AxisTransition::TimeoutDiscard, now, state);
            return Ok(Some(event.with_value(0)));
        }

        state.start_passthrough(now);
        self.trace(verbose, AxisTransition::ThresholdReached, now, state);
        Ok(Some(event))
    }

    fn trace(&self, verbose: bool, transition: AxisTransition, now: u64, state: &AxisDamperState) {
        if verbose {
            info!(
                "[{}] {} @{}us acc={} passthrough={}",
                self.channel, transition, now, state.accumulator, state.passthrough_active
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::USEC_IN_MSEC;

    const T0: u64 = 1_000_000_000;

    fn config() -> AxisDamperConfig {
        AxisDamperConfig {
            cancel_value: 4,
            delta_threshold: 20,
            threshold_timeout: 500 * USEC_IN_MSEC,
            decay_time: 100 * USEC_IN_MSEC,
        }
    }

    fn x(value: i32, ms: u64) -> Event {
        Event::new(Channel::AxisX, value, T0 + ms * USEC_IN_MSEC)
    }

    fn run(damper: &AxisDamper, state: &mut AxisDamperState, event: Event) -> Event {
        damper
            .transform(event, state, &config(), false)
            .unwrap()
            .expect("axis damper always emits")
    }

    #[test]
    fn test_large_delta_passes_unchanged() {
        let damper = AxisDamper::new(Channel::AxisX);
        for value in [5, -5, 100, i32::MIN] {
            let mut state = AxisDamperState::default();
            let event = x(value, 0);
            assert_eq!(run(&damper, &mut state, event), event);
            assert!(state.passthrough_active);
            assert_eq!(state.decay_time, event.timestamp);
            assert_eq!(state.accumulator, 0);
            assert_eq!(state.accumulation_start_time, 0);
        }
    }

    #[test]
    fn test_cancel_value_is_inclusive() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        let out = run(&damper, &mut state, x(-4, 0));
        assert_eq!(out.value, 0);
        assert_eq!(state.accumulator, -4);
        assert!(!state.passthrough_active);
    }

    #[test]
    fn test_jitter_is_zeroed_and_accumulated() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        let mut running = 0;
        for (i, value) in [1, -2, 3, 1, -1].into_iter().enumerate() {
            let event = x(value, i as u64 * 10);
            let out = run(&damper, &mut state, event);
            running += i64::from(value);
            assert_eq!(out.value, 0);
            assert_eq!(out.timestamp, event.timestamp);
            assert_eq!(out.code, event.code);
            assert_eq!(state.accumulator, running);
        }
        assert_eq!(state.accumulation_start_time, T0);
    }

    #[test]
    fn test_three_small_deltas() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        let outputs: Vec<i32> = [0, 10, 20]
            .into_iter()
            .map(|ms| run(&damper, &mut state, x(1, ms)).value)
            .collect();
        assert_eq!(outputs, vec![0, 0, 0]);
        assert_eq!(state.accumulator, 3);
    }

    #[test]
    fn test_threshold_breakout() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        // Five deltas of 4 fill the accumulator up to the threshold, each zeroed.
        for i in 0..5 {
            assert_eq!(run(&damper, &mut state, x(4, i * 10)).value, 0);
        }
        assert_eq!(state.accumulator, 20);

        // The next one finds the threshold reached and goes through as is.
        let event = x(3, 50);
        assert_eq!(run(&damper, &mut state, event), event);
        assert!(state.passthrough_active);
        assert_eq!(state.accumulator, 0);

        // Small motion keeps flowing while it arrives within the decay time.
        for ms in [100, 190, 280] {
            let event = x(1, ms);
            assert_eq!(run(&damper, &mut state, event), event);
            assert_eq!(state.decay_time, event.timestamp);
        }

        // Quiet for the full decay time: passthrough ends, and the same event
        // is judged as fresh jitter.
        let out = run(&damper, &mut state, x(1, 380));
        assert_eq!(out.value, 0);
        assert!(!state.passthrough_active);
        assert_eq!(state.accumulator, 1);
        assert_eq!(state.accumulation_start_time, T0 + 380 * USEC_IN_MSEC);
    }

    #[test]
    fn test_passthrough_end_falls_through_to_large_delta() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        run(&damper, &mut state, x(10, 0));
        let event = x(10, 500);
        assert_eq!(run(&damper, &mut state, event), event);
        assert!(state.passthrough_active);
        assert_eq!(state.decay_time, event.timestamp);
    }

    #[test]
    fn test_timeout_discards_accumulation() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        run(&damper, &mut state, x(2, 0));
        run(&damper, &mut state, x(2, 100));
        assert_eq!(state.accumulator, 4);

        // Exactly at the timeout the window is already closed.
        let event = x(1, 500);
        let out = run(&damper, &mut state, event);
        assert_eq!(out.value, 0);
        assert_eq!(out.timestamp, event.timestamp);
        assert_eq!(state.accumulator, 0);
        assert_eq!(state.accumulation_start_time, 0);
        assert!(!state.passthrough_active);

        // A new window opens with the next delta.
        run(&damper, &mut state, x(1, 510));
        assert_eq!(state.accumulator, 1);
        assert_eq!(state.accumulation_start_time, T0 + 510 * USEC_IN_MSEC);
    }

    #[test]
    fn test_threshold_after_timeout_still_breaks_out() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        for i in 0..5 {
            run(&damper, &mut state, x(-4, i));
        }
        assert_eq!(state.accumulator, -20);
        let event = x(-1, 900);
        assert_eq!(run(&damper, &mut state, event), event);
        assert!(state.passthrough_active);
    }

    #[test]
    fn test_cancelled_out_accumulator_counts_as_empty() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        run(&damper, &mut state, x(3, 0));
        run(&damper, &mut state, x(-3, 10));
        assert_eq!(state.accumulator, 0);
        // Past the timeout, but an empty accumulator keeps accumulating in the
        // window opened by the first delta.
        let out = run(&damper, &mut state, x(2, 700));
        assert_eq!(out.value, 0);
        assert_eq!(state.accumulator, 2);
        assert_eq!(state.accumulation_start_time, T0);
    }

    #[test]
    fn test_zero_decay_never_extends_passthrough() {
        let damper = AxisDamper::new(Channel::AxisY);
        let mut state = AxisDamperState::default();
        let config = AxisDamperConfig {
            decay_time: 0,
            ..config()
        };
        let big = Event::new(Channel::AxisY, 9, T0);
        damper.transform(big, &mut state, &config, false).unwrap();
        let small = Event::new(Channel::AxisY, 1, T0);
        let out = damper
            .transform(small, &mut state, &config, false)
            .unwrap()
            .unwrap();
        assert_eq!(out.value, 0);
        assert_eq!(out.channel, Channel::AxisY);
    }

    #[test]
    fn test_window_opened_at_time_zero_is_tracked() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState::default();
        let event = Event::new(Channel::AxisX, 1, 0);
        damper
            .transform(event, &mut state, &config(), false)
            .unwrap();
        assert_eq!(state.accumulator, 1);
        assert_eq!(state.accumulation_start_time, 1);

        // The window opened at 0 still times out.
        let late = Event::new(Channel::AxisX, 1, 500 * USEC_IN_MSEC + 1);
        damper.transform(late, &mut state, &config(), false).unwrap();
        assert_eq!(state.accumulator, 0);
        assert_eq!(state.accumulation_start_time, 0);
    }

    #[test]
    fn test_accumulator_overflow_is_reported() {
        let damper = AxisDamper::new(Channel::AxisX);
        let mut state = AxisDamperState {
            accumulator: i64::MAX - 1,
            accumulation_start_time: T0,
            ..Default::default()
        };
        let config = AxisDamperConfig {
            delta_threshold: i64::MAX,
            ..config()
        };
        let err = damper
            .transform(x(2, 1), &mut state, &config, false)
            .unwrap_err();
        assert!(matches!(err, FilterError::Invariant(_)));
    }
}
