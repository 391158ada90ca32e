use std::collections::VecDeque;
use std::fmt;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::common::{Channel, Event};
use crate::damper::{AxisDamper, AxisDamperState};
use crate::error::FilterError;
use crate::freeze::{ButtonFreezeCoordinator, ButtonFreezeState, FreezeOutcome};
use crate::schemas::FilterConfig;

/// Ordered supply of decoded input events for one device.
pub trait EventSource {
    /// Blocks until the next event is available. `Ok(None)` ends the stream,
    /// either because the device is gone for good or `stop` was cancelled.
    fn next_event(&mut self, stop: &CancellationToken) -> Result<Option<Event>, FilterError>;
}

/// Order preserving destination of filtered events.
pub trait EventSink {
    fn emit(&mut self, event: &Event) -> Result<(), FilterError>;

    /// Accepted events the sink could not deliver downstream.
    fn dropped(&self) -> u64 {
        0
    }
}

impl EventSource for VecDeque<Event> {
    fn next_event(&mut self, stop: &CancellationToken) -> Result<Option<Event>, FilterError> {
        if stop.is_cancelled() {
            return Ok(None);
        }
        Ok(self.pop_front())
    }
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: &Event) -> Result<(), FilterError> {
        self.push(*event);
        Ok(())
    }
}

/// Everything one device filter mutates, owned by its pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub x: AxisDamperState,
    pub y: AxisDamperState,
    pub buttons: ButtonFreezeState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub events_in: u64,
    pub events_out: u64,
    /// Jitter deltas replaced by a zero-valued event.
    pub zero_ticks: u64,
    /// Drag motion emitted with a reduced value.
    pub reduced: u64,
    /// Motion swallowed by a freeze, nothing emitted.
    pub eaten: u64,
    pub timestamp_regressions: u64,
    /// Emitted, but not deliverable by the sink (see `EventSink::dropped`).
    pub undeliverable: u64,
}

impl fmt::Display for FilterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={} out={} zeroed={} reduced={} eaten={}",
            self.events_in, self.events_out, self.zero_ticks, self.reduced, self.eaten
        )?;
        if self.timestamp_regressions > 0 {
            write!(f, " timestamp_regressions={}", self.timestamp_regressions)?;
        }
        if self.undeliverable > 0 {
            write!(f, " undeliverable={}", self.undeliverable)?;
        }
        Ok(())
    }
}

/// Per-device dispatcher: button events go to the freeze coordinator, axis
/// events to the coordinator while a button is involved and to their axis
/// damper otherwise, anything else passes through untouched.
pub struct DeviceFilterPipeline {
    config: FilterConfig,
    coordinator: ButtonFreezeCoordinator,
    damper_x: AxisDamper,
    damper_y: AxisDamper,
    state: DeviceState,
    stats: FilterStats,
    last_timestamp: u64,
}

impl DeviceFilterPipeline {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            config: *config,
            coordinator: ButtonFreezeCoordinator::new(),
            damper_x: AxisDamper::new(Channel::AxisX),
            damper_y: AxisDamper::new(Channel::AxisY),
            state: DeviceState::default(),
            stats: FilterStats::default(),
            last_timestamp: 0,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Transforms a single event. `Ok(None)` is the freeze "eat" case and the
    /// only way an input event produces no output.
    pub fn process(&mut self, event: Event) -> Result<Option<Event>, FilterError> {
        self.stats.events_in += 1;
        self.check_order(&event);

        let verbose = self.config.verbose;
        let channel = event.channel;

        if channel.is_button()
            && self.coordinator.handle_button(
                &event,
                &mut self.state.buttons,
                &self.config.freeze,
                verbose,
            )
        {
            return Ok(Some(event));
        }

        if !channel.is_axis() {
            return Ok(Some(event));
        }

        let buttons = &self.state.buttons;
        if buttons.button_down || buttons.freeze_active {
            match self.coordinator.handle_motion(
                &event,
                &mut self.state.buttons,
                &self.config.freeze,
                verbose,
            )? {
                FreezeOutcome::Emit(reduced) => {
                    self.stats.reduced += 1;
                    return Ok(Some(reduced));
                }
                FreezeOutcome::Eat => {
                    self.stats.eaten += 1;
                    return Ok(None);
                }
                FreezeOutcome::Release => {}
            }
        }

        let (damper, state) = match channel {
            Channel::AxisX => (&self.damper_x, &mut self.state.x),
            Channel::AxisY => (&self.damper_y, &mut self.state.y),
            other => {
                return Err(FilterError::Invariant(format!(
                    "no axis damper for {other}"
                )))
            }
        };
        let output = damper.transform(event, state, &self.config.damper, verbose)?;
        if matches!(output, Some(out) if out.value == 0 && event.value != 0) {
            self.stats.zero_ticks += 1;
        }
        Ok(output)
    }

    /// Drives the filter until the source ends or `stop` is cancelled.
    pub fn run<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        stop: &CancellationToken,
    ) -> Result<FilterStats, FilterError>
    where
        S: EventSource + ?Sized,
        K: EventSink + ?Sized,
    {
        while let Some(event) = source.next_event(stop)? {
            if let Some(output) = self.process(event)? {
                sink.emit(&output)?;
                self.stats.events_out += 1;
            }
        }
        self.stats.undeliverable = sink.dropped();
        if self.config.verbose {
            info!("Filter loop ended: {}", self.stats);
        }
        Ok(self.stats)
    }

    fn check_order(&mut self, event: &Event) {
        if event.timestamp < self.last_timestamp {
            self.stats.timestamp_regressions += 1;
            if self.stats.timestamp_regressions == 1 {
                warn!(
                    "Device timestamps went backwards ({}us < {}us), elapsed times clamp to 0",
                    event.timestamp, self.last_timestamp
                );
            }
            return;
        }
        self.last_timestamp = event.timestamp;
    }
}
