/// Macro to generate the Channel enum and its evdev code conversions.
#[macro_export]
macro_rules! define_channels {
    (
        axis {
            $( $axis_variant:ident => $axis_code:ident $(, $axis_doc:literal)? ),* $(,)?
        }
        button {
            $( $btn_variant:ident => $btn_code:ident $(, $btn_doc:literal)? ),* $(,)?
        }
    ) => {
        /// Input channels the filter distinguishes, flat and abstracting from evdev
        /// type/code pairs. Everything the filter does not transform is `Other`.
        #[derive(Debug, PartialEq, EnumString, Display, Clone, Default, Copy, Hash, Eq)]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
        pub enum Channel {
            $(
                $(#[doc = $axis_doc])?
                $axis_variant,
            )*
            $(
                $(#[doc = $btn_doc])?
                $btn_variant,
            )*
            #[default]
            Other,
        }

        impl Channel {
            pub fn is_other(&self) -> bool {
                *self == Self::Other
            }

            pub fn is_axis(&self) -> bool {
                matches!(
                    self,
                    $( Channel::$axis_variant )|*
                )
            }

            pub fn is_button(&self) -> bool {
                matches!(
                    self,
                    $( Channel::$btn_variant )|*
                )
            }

            /// Evdev event type carried by this channel. `Other` has no fixed type.
            pub fn event_type(&self) -> Option<evdev::EventType> {
                if self.is_axis() {
                    Some(evdev::EventType::RELATIVE)
                } else if self.is_button() {
                    Some(evdev::EventType::KEY)
                } else {
                    None
                }
            }

            pub fn from_code(event_type: u16, code: u16) -> Self {
                type OsRelCode = evdev::RelativeAxisCode;
                type OsKeyCode = evdev::KeyCode;

                match evdev::EventType(event_type) {
                    evdev::EventType::RELATIVE => match code {
                        $(
                            c if c == OsRelCode::$axis_code.0 => Channel::$axis_variant,
                        )*
                        _ => Channel::Other,
                    },
                    evdev::EventType::KEY => match code {
                        $(
                            c if c == OsKeyCode::$btn_code.0 => Channel::$btn_variant,
                        )*
                        _ => Channel::Other,
                    },
                    _ => Channel::Other,
                }
            }
        }

        impl From<evdev::InputEvent> for Channel {
            fn from(event: evdev::InputEvent) -> Self {
                Channel::from_code(event.event_type().0, event.code())
            }
        }

        impl From<Channel> for u16 {
            fn from(channel: Channel) -> Self {
                type OsRelCode = evdev::RelativeAxisCode;
                type OsKeyCode = evdev::KeyCode;

                match channel {
                    $(
                        Channel::$axis_variant => OsRelCode::$axis_code.0,
                    )*
                    $(
                        Channel::$btn_variant => OsKeyCode::$btn_code.0,
                    )*
                    Channel::Other => {
                        log::warn!("Channel OTHER has no evdev code of its own, using 0.");
                        0
                    }
                }
            }
        }
    };
}
