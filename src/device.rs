use anyhow::{bail, Context, Result};
use evdev::uinput::VirtualDevice;
use evdev::{Device, EventType, KeyCode, RelativeAxisCode, UinputAbsSetup};
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::common::Event;
use crate::error::FilterError;
use crate::pipeline::{DeviceFilterPipeline, EventSink, EventSource, FilterStats};
use crate::schemas::FilterConfig;

/// Appended to the name of every replacement device, which also keeps the
/// program from picking up its own output devices.
pub const REPLACEMENT_NAME_SUFFIX: &str = " (damped)";

const MAX_IDLE_SLEEP_MILLIS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub path: PathBuf,
}

pub fn replacement_name(device_name: &str) -> String {
    format!("{device_name}{REPLACEMENT_NAME_SUFFIX}")
}

pub fn is_replacement_name(device_name: &str) -> bool {
    device_name.ends_with(REPLACEMENT_NAME_SUFFIX)
}

/// A pointer has a primary button and relative horizontal motion.
fn is_pointer_like(device: &Device) -> bool {
    let has_left = device
        .supported_keys()
        .is_some_and(|keys| keys.contains(KeyCode::BTN_LEFT));
    let has_rel_x = device
        .supported_relative_axes()
        .is_some_and(|axes| axes.contains(RelativeAxisCode::REL_X));
    has_left && has_rel_x
}

/// Pointer-like devices, minus our own replacement devices, optionally
/// narrowed down by name.
pub fn enumerate_pointer_devices(name_regex: Option<&regex::Regex>) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = evdev::enumerate()
        .filter(|(_, device)| is_pointer_like(device))
        .map(|(path, device)| DeviceInfo {
            name: device.name().unwrap_or("Unknown").to_string(),
            path,
        })
        .filter(|info| !is_replacement_name(&info.name))
        .filter(|info| name_regex.map_or(true, |re| re.is_match(&info.name)))
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

//------------------------------------------------------
/// Reads one physical device, exclusively when grabbed.
pub struct EvdevSource {
    device_name: String,
    stream: evdev::EventStream,
    pending: VecDeque<Event>,
    sleep_millis: u64,
}

impl EvdevSource {
    pub fn open(path: &Path) -> Result<Self, FilterError> {
        let setup_error = |source| FilterError::DeviceSetup {
            device: path.display().to_string(),
            source,
        };
        let device = Device::open(path).map_err(setup_error)?;
        let device_name = device.name().unwrap_or("Unknown").to_string();
        let stream = device.into_event_stream().map_err(setup_error)?;
        Ok(Self {
            device_name,
            stream,
            pending: VecDeque::new(),
            sleep_millis: 0,
        })
    }

    /// Takes the device away from every other reader until dropped.
    pub fn grab(&mut self) -> Result<(), FilterError> {
        self.stream
            .device_mut()
            .grab()
            .map_err(|source| FilterError::DeviceSetup {
                device: self.device_name.clone(),
                source,
            })
    }

    pub fn device(&self) -> &Device {
        self.stream.device()
    }

    pub fn name(&self) -> &str {
        &self.device_name
    }
}

impl EventSource for EvdevSource {
    fn next_event(&mut self, stop: &CancellationToken) -> Result<Option<Event>, FilterError> {
        loop {
            if stop.is_cancelled() {
                return Ok(None);
            }
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            // The stream is non-blocking, so WouldBlock is handled by hand.
            match self.stream.device_mut().fetch_events() {
                Ok(events) => {
                    self.sleep_millis = 0;
                    self.pending.extend(events.map(Event::from));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if self.sleep_millis < MAX_IDLE_SLEEP_MILLIS {
                        self.sleep_millis += 1;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(self.sleep_millis));
                }
                Err(e) => return Err(FilterError::Source(e)),
            }
        }
    }
}

//------------------------------------------------------
/// Collects the events of one report for the replacement device. Events of a
/// type the replacement does not declare would be discarded by the kernel, so
/// they are counted here instead.
#[derive(Debug, Default)]
struct ReportBuffer {
    declared: Vec<EventType>,
    pending: Vec<evdev::InputEvent>,
    dropped: u64,
}

impl ReportBuffer {
    fn new(declared: Vec<EventType>) -> Self {
        Self {
            declared,
            ..Self::default()
        }
    }

    /// Returns the finished report once the source's SYN_REPORT arrives.
    fn push(&mut self, event: &Event) -> Option<Vec<evdev::InputEvent>> {
        if event.is_sync_report() {
            return Some(std::mem::take(&mut self.pending));
        }
        if event.event_type == EventType::SYNCHRONIZATION.0 {
            // SYN_DROPPED and friends describe the source device only.
            return None;
        }
        if !self.declared.contains(&EventType(event.event_type)) {
            self.dropped += 1;
            if self.dropped == 1 {
                warn!(
                    "Replacement device can not carry event type {} (code {}), dropping such events",
                    event.event_type, event.code
                );
            }
            return None;
        }
        self.pending.push(event.into());
        None
    }
}

/// Virtual replacement for a physical pointer. Events are written per report,
/// when the source's SYN_REPORT arrives.
pub struct UinputSink {
    device: VirtualDevice,
    buffer: ReportBuffer,
}

impl UinputSink {
    /// Clones the key, relative and absolute axis, misc and switch
    /// capabilities of `source`.
    pub fn replacing(source: &Device) -> Result<Self, FilterError> {
        let name = replacement_name(source.name().unwrap_or("Unknown"));
        let setup_error = |source| FilterError::DeviceSetup {
            device: name.clone(),
            source,
        };

        let mut declared = Vec::new();
        let mut builder = VirtualDevice::builder()
            .map_err(setup_error)?
            .name(&name)
            .input_id(source.input_id());
        if let Some(keys) = source.supported_keys() {
            builder = builder.with_keys(keys).map_err(setup_error)?;
            declared.push(EventType::KEY);
        }
        if let Some(axes) = source.supported_relative_axes() {
            builder = builder.with_relative_axes(axes).map_err(setup_error)?;
            declared.push(EventType::RELATIVE);
        }
        if source.supported_absolute_axes().is_some() {
            for (axis, info) in source.get_absinfo().map_err(setup_error)? {
                builder = builder
                    .with_absolute_axis(&UinputAbsSetup::new(axis, info))
                    .map_err(setup_error)?;
            }
            declared.push(EventType::ABSOLUTE);
        }
        if let Some(misc) = source.misc_properties() {
            builder = builder.with_msc(misc).map_err(setup_error)?;
            declared.push(EventType::MISC);
        }
        if let Some(switches) = source.supported_switches() {
            builder = builder.with_switches(switches).map_err(setup_error)?;
            declared.push(EventType::SWITCH);
        }

        Ok(Self {
            device: builder.build().map_err(setup_error)?,
            buffer: ReportBuffer::new(declared),
        })
    }
}

impl EventSink for UinputSink {
    fn emit(&mut self, event: &Event) -> Result<(), FilterError> {
        match self.buffer.push(event) {
            // `VirtualDevice::emit` closes the batch with its own SYN_REPORT.
            Some(report) => self.device.emit(&report).map_err(FilterError::Sink),
            None => Ok(()),
        }
    }

    fn dropped(&self) -> u64 {
        self.buffer.dropped
    }
}

//------------------------------------------------------
type FilterOutcome = std::result::Result<FilterStats, FilterError>;

struct RunningFilter {
    name: String,
    handle: task::JoinHandle<FilterOutcome>,
}

/// Runs one blocking filter task per device.
pub struct DeviceFilterManager {
    config: FilterConfig,
    filters: HashMap<PathBuf, RunningFilter>,
    stop_token: CancellationToken,
}

impl DeviceFilterManager {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            filters: HashMap::new(),
            stop_token: CancellationToken::new(),
        }
    }

    pub fn start(&mut self, device: &DeviceInfo) {
        let path = device.path.clone();
        let config = self.config;
        let stop_token = self.stop_token.child_token();

        let handle = task::spawn_blocking(move || -> FilterOutcome {
            let mut source = EvdevSource::open(&path)?;
            let mut sink = UinputSink::replacing(source.device())?;
            source.grab()?;
            info!("Filtering {} @ {}", source.name(), path.display());

            let mut pipeline = DeviceFilterPipeline::new(&config);
            pipeline.run(&mut source, &mut sink, &stop_token)
        });

        self.filters.insert(
            device.path.clone(),
            RunningFilter {
                name: device.name.clone(),
                handle,
            },
        );
    }

    pub fn running_count(&self) -> usize {
        self.filters
            .values()
            .filter(|filter| !filter.handle.is_finished())
            .count()
    }

    /// Collects filters that ended on their own (device removed, I/O error).
    pub async fn reap_finished(&mut self) -> usize {
        let finished: Vec<PathBuf> = self
            .filters
            .iter()
            .filter(|(_, filter)| filter.handle.is_finished())
            .map(|(path, _)| path.clone())
            .collect();

        for path in &finished {
            if let Some(filter) = self.filters.remove(path) {
                Self::report(path, filter).await;
            }
        }
        finished.len()
    }

    /// Cancels every filter and waits for them to release their devices.
    pub async fn stop(&mut self) {
        self.stop_token.cancel();
        for (path, filter) in self.filters.drain().collect::<Vec<_>>() {
            Self::report(&path, filter).await;
        }
    }

    async fn report(path: &Path, filter: RunningFilter) {
        match filter.handle.await {
            Ok(Ok(stats)) => info!("Filter for {} stopped: {}", filter.name, stats),
            Ok(Err(e)) => error!("Filter for {} @ {} failed: {}", filter.name, path.display(), e),
            Err(e) => error!("Filter task for {} did not complete: {}", filter.name, e),
        }
    }
}

impl Drop for DeviceFilterManager {
    fn drop(&mut self) {
        // Blocking filter tasks only end on cancellation or device loss.
        self.stop_token.cancel();
    }
}

//------------------------------------------------------
#[derive(Debug, Clone)]
struct MonitoredEvent {
    device_name: String,
    event: Event,
}

/// Prints decoded events of matching devices without grabbing them.
pub async fn monitor(name_regex: &regex::Regex, debug: bool) -> Result<()> {
    let matched = enumerate_pointer_devices(Some(name_regex));
    if matched.is_empty() {
        bail!("No pointer devices found matching '{}'", name_regex);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<MonitoredEvent>();
    let stop_token = CancellationToken::new();
    let mut handles = Vec::new();

    println!("Monitoring pointer devices:");
    for device in &matched {
        println!("  - {} @ {}", device.name, device.path.display());
        let mut source = EvdevSource::open(&device.path)
            .with_context(|| format!("Failed to open {}", device.path.display()))?;
        let sender = tx.clone();
        let stop = stop_token.child_token();
        let device_name = device.name.clone();

        handles.push(task::spawn_blocking(move || loop {
            match source.next_event(&stop) {
                Ok(Some(event)) => {
                    let monitored = MonitoredEvent {
                        device_name: device_name.clone(),
                        event,
                    };
                    if sender.send(monitored).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("Stopped monitoring {device_name}: {e}");
                    return;
                }
            }
        }));
    }
    drop(tx);

    println!("Press Ctrl+C to stop monitoring...");

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(MonitoredEvent { device_name, event }) = received else { break };
                if event.channel.is_other() {
                    if debug && !event.is_sync_report() {
                        debug!(
                            "[{}] type={} code={} value={}",
                            device_name, event.event_type, event.code, event.value
                        );
                    }
                    continue;
                }
                info!("[{}] {} = {} @{}us", device_name, event.channel, event.value, event.timestamp);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stop_token.cancel();
    join_monitor_tasks(handles).await;
    Ok(())
}

/// Waits for every monitor task, returns how many of them failed.
async fn join_monitor_tasks(handles: Vec<task::JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Monitor task did not complete: {e}");
            failed += 1;
        }
    }
    failed
}
