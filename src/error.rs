use thiserror::Error;

/// Failures of a single device filter. None of them is retried by the filter
/// itself; each one ends the filter of the device it happened on.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Malformed or out-of-range option value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Opening, grabbing or cloning the device failed.
    #[error("device setup failed for {device}: {source}")]
    DeviceSetup {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the physical device failed (removed, permission lost).
    #[error("event source failed: {0}")]
    Source(#[source] std::io::Error),

    /// Writing to the replacement device failed.
    #[error("event sink failed: {0}")]
    Sink(#[source] std::io::Error),

    /// Internal logic fault, should be unreachable.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}
