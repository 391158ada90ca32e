use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::{Display, EnumString};

pub const USEC_IN_MSEC: u64 = 1_000;
pub const USEC_IN_SEC: u64 = USEC_IN_MSEC * 1_000;

//--------------------------------------------------------------
define_channels! {
    axis {
        AxisX => REL_X, "Horizontal relative motion",
        AxisY => REL_Y, "Vertical relative motion",
    }
    button {
        ButtonPrimary => BTN_LEFT,
        ButtonSecondary => BTN_RIGHT,
        ButtonMiddle => BTN_MIDDLE,
    }
}

//--------------------------------------------------------------
/// One decoded input event. Raw evdev type and code travel along so that
/// events on `Channel::Other` are re-emitted exactly as they were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub channel: Channel,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
    /// Microseconds, as reported by the device.
    pub timestamp: u64,
}

impl Event {
    /// Builds an event for one of the filtered channels.
    pub fn new(channel: Channel, value: i32, timestamp: u64) -> Self {
        let event_type = channel.event_type().map(|t| t.0).unwrap_or_default();
        let code = if channel.is_other() { 0 } else { channel.into() };
        Self {
            channel,
            event_type,
            code,
            value,
            timestamp,
        }
    }

    pub fn from_raw(event_type: u16, code: u16, value: i32, timestamp: u64) -> Self {
        Self {
            channel: Channel::from_code(event_type, code),
            event_type,
            code,
            value,
            timestamp,
        }
    }

    /// Same event (channel, codes, timestamp) carrying another value.
    pub fn with_value(&self, value: i32) -> Self {
        Self { value, ..*self }
    }

    pub fn is_sync_report(&self) -> bool {
        self.event_type == evdev::EventType::SYNCHRONIZATION.0
            && self.code == evdev::SynchronizationCode::SYN_REPORT.0
    }
}

impl From<evdev::InputEvent> for Event {
    fn from(event: evdev::InputEvent) -> Self {
        Event::from_raw(
            event.event_type().0,
            event.code(),
            event.value(),
            timestamp_usec(event.timestamp()),
        )
    }
}

impl From<&Event> for evdev::InputEvent {
    fn from(event: &Event) -> Self {
        evdev::InputEvent::new(event.event_type, event.code, event.value)
    }
}

pub fn timestamp_usec(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Shrinks a relative delta by `fraction` and biases the magnitude by one, so any
/// non-zero input stays non-zero: `sign(v) * (floor(|v| * fraction) + 1)`.
pub fn reduce(value: i32, fraction: f64) -> i32 {
    if value == 0 {
        return 0;
    }
    let magnitude = (f64::from(value.unsigned_abs()) * fraction).floor() as i64 + 1;
    let magnitude = magnitude.min(i64::from(i32::MAX)) as i32;
    magnitude * value.signum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_from_evdev() {
        use evdev::{EventType, InputEvent, KeyCode, RelativeAxisCode};

        let event = InputEvent::new(EventType::RELATIVE.0, RelativeAxisCode::REL_X.0, 3);
        assert_eq!(Channel::from(event), Channel::AxisX);

        let event = InputEvent::new(EventType::RELATIVE.0, RelativeAxisCode::REL_Y.0, -3);
        assert_eq!(Channel::from(event), Channel::AxisY);

        let event = InputEvent::new(EventType::KEY.0, KeyCode::BTN_MIDDLE.0, 1);
        assert_eq!(Channel::from(event), Channel::ButtonMiddle);
    }

    #[test]
    fn test_unfiltered_codes_are_other() {
        use evdev::{EventType, InputEvent, KeyCode, RelativeAxisCode};

        let wheel = InputEvent::new(EventType::RELATIVE.0, RelativeAxisCode::REL_WHEEL.0, -1);
        assert_eq!(Channel::from(wheel), Channel::Other);

        let side = InputEvent::new(EventType::KEY.0, KeyCode::BTN_SIDE.0, 1);
        assert_eq!(Channel::from(side), Channel::Other);

        let syn = InputEvent::new(EventType::SYNCHRONIZATION.0, 0, 0);
        assert_eq!(Channel::from(syn), Channel::Other);
        assert!(Event::from(syn).is_sync_report());
    }

    #[test]
    fn test_channel_codes() {
        use evdev::{KeyCode, RelativeAxisCode};

        assert_eq!(u16::from(Channel::AxisX), RelativeAxisCode::REL_X.0);
        assert_eq!(u16::from(Channel::ButtonSecondary), KeyCode::BTN_RIGHT.0);

        let event = Event::new(Channel::AxisY, -2, 42);
        assert_eq!(event.event_type, evdev::EventType::RELATIVE.0);
        assert_eq!(event.code, RelativeAxisCode::REL_Y.0);
        assert_eq!(
            Event::from_raw(event.event_type, event.code, -2, 42),
            event
        );
    }

    #[test]
    fn test_channel_groups() {
        for channel in [Channel::AxisX, Channel::AxisY] {
            assert!(channel.is_axis() && !channel.is_button());
        }
        for channel in [
            Channel::ButtonPrimary,
            Channel::ButtonSecondary,
            Channel::ButtonMiddle,
        ] {
            assert!(channel.is_button() && !channel.is_axis());
        }
        assert!(Channel::default().is_other());
        assert_eq!(Channel::AxisX.to_string(), "AXIS_X");
        assert_eq!(
            "BUTTON_PRIMARY".parse::<Channel>().unwrap(),
            Channel::ButtonPrimary
        );
    }

    #[test]
    fn test_with_value_keeps_identity() {
        let event = Event::new(Channel::AxisX, 7, 1_000);
        let zeroed = event.with_value(0);
        assert_eq!(zeroed.value, 0);
        assert_eq!(zeroed.timestamp, 1_000);
        assert_eq!(zeroed.code, event.code);
        assert_eq!(zeroed.channel, Channel::AxisX);
    }

    #[test]
    fn test_timestamp_usec() {
        let t = UNIX_EPOCH + std::time::Duration::new(12, 345_678_000);
        assert_eq!(timestamp_usec(t), 12 * USEC_IN_SEC + 345_678);
        assert_eq!(timestamp_usec(UNIX_EPOCH), 0);
    }

    #[test]
    fn test_reduce() {
        assert_eq!(reduce(0, 0.5), 0);
        assert_eq!(reduce(10, 0.5), 6);
        assert_eq!(reduce(-10, 0.5), -6);
        assert_eq!(reduce(1, 0.1), 1);
        assert_eq!(reduce(-1, 0.1), -1);
        assert_eq!(reduce(3, 0.25), 1);
        // Full fraction is a +1 biased pass-through of magnitude.
        assert_eq!(reduce(4, 1.0), 5);
        assert_eq!(reduce(-4, 1.0), -5);
        assert_eq!(reduce(i32::MIN, 1.0), -i32::MAX);
    }
}
