use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use log::{error, info, warn};

use crate::config::ConfigManager;
use crate::device::{enumerate_pointer_devices, monitor, DeviceFilterManager};
use crate::schemas::FilterConfig;

const DEVICE_CHECK_INTERVAL_MILLIS: u64 = 500;

#[derive(Subcommand, Clone)]
pub enum AuxDriverTask {
    /// List pointer devices that would be filtered.
    EnumMice,
    /// Print events of matching pointer devices without filtering them.
    MonitorMouse { name_regex: Option<String> },
    /// Load the configuration file and report problems.
    ValidateConfig,
    /// Write a configuration file holding every option at its default.
    WriteDefaultConfig,
}

fn sanitize_cfg_file_path(cfg_file_path: &Path) -> Result<()> {
    if !cfg_file_path.exists() {
        let e = format!(
            "Configuration file is not found at {}, current dir is {}.\n\
            Please specify proper location of the configuration file via -c command line option, \n\
            or create one with the write-default-config subcommand.\n\
            ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~",
            cfg_file_path.to_str().unwrap_or("Empty file path..."),
            std::env::current_dir()?
                .to_str()
                .unwrap_or("Unknown current working dir...")
        );
        log::error!("{e}");

        if cfg_file_path.is_relative() {
            log::warn!(
                "NB: You have specified relative config file path, it is resolved against \
                the current directory. Use -c <full path to your config> when started from elsewhere."
            );
        }
        bail!("Config file not found.");
    }
    Ok(())
}

fn load_filter_config(config_manager: &mut ConfigManager, verbose: bool) -> Result<FilterConfig> {
    config_manager.load()?;
    Ok(config_manager.resolve(verbose)?)
}

pub async fn run_aux_task(aux_task: &AuxDriverTask, cfg_file_path: &Path, debug: bool) -> Result<()> {
    match aux_task {
        AuxDriverTask::EnumMice => {
            info!("Available pointer devices:");
            for device in enumerate_pointer_devices(None) {
                info!("> {} @ {}", device.name, device.path.display());
            }
        }
        AuxDriverTask::MonitorMouse { name_regex } => {
            let name_regex = regex::Regex::new(name_regex.as_deref().unwrap_or(".*"))?;
            monitor(&name_regex, debug).await?;
        }
        AuxDriverTask::ValidateConfig => {
            sanitize_cfg_file_path(cfg_file_path)?;
            let mut config_manager = ConfigManager::new(cfg_file_path, debug);
            config_manager.load()?;
            let errors = config_manager.validate();
            if errors.is_empty() {
                info!("Configuration is valid.");
            } else {
                error!("Configuration errors:");
                for error in errors {
                    error!("> {}", error);
                }
                bail!("Configuration validation failed");
            }
        }
        AuxDriverTask::WriteDefaultConfig => {
            ConfigManager::new(cfg_file_path, debug).write_default()?;
            info!("Default configuration written to {}", cfg_file_path.display());
        }
    }
    Ok(())
}

fn watch_config_file(cfg_file_path: &Path) -> Result<tokio::sync::mpsc::Receiver<()>> {
    use notify_debouncer_full::{new_debouncer, DebounceEventResult};

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let mut debouncer = new_debouncer(
        std::time::Duration::from_millis(500),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in events {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = tx.blocking_send(());
                        break;
                    }
                }
            }
            Err(e) => error!("Config file watch error: {:?}", e),
        },
    )?;

    debouncer.watch(
        cfg_file_path,
        notify_debouncer_full::notify::RecursiveMode::NonRecursive,
    )?;

    // Lives for the rest of the process.
    std::mem::forget(debouncer);

    Ok(rx)
}

async fn terminate_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

fn start_filters(config_manager: &ConfigManager, config: FilterConfig) -> Result<DeviceFilterManager> {
    let name_regex = config_manager.get_settings().device_name_regex.as_ref();
    let devices = enumerate_pointer_devices(name_regex);
    if devices.is_empty() {
        match name_regex {
            Some(re) => bail!("No pointer devices found matching '{re}'"),
            None => bail!("No pointer devices found (try enum-mice, check permissions)"),
        }
    }

    let mut manager = DeviceFilterManager::new(config);
    for device in &devices {
        manager.start(device);
    }
    info!("Started filters for {} device(s)", devices.len());
    Ok(manager)
}

pub async fn run_damper(
    cfg_file_path: &Path,
    no_hot_reload: bool,
    debug: bool,
    verbose: bool,
) -> Result<()> {
    sanitize_cfg_file_path(cfg_file_path)?;

    let mut config_watcher = if !no_hot_reload {
        Some(watch_config_file(cfg_file_path)?)
    } else {
        None
    };

    let mut config_manager = ConfigManager::new(cfg_file_path, debug);

    'damper_restart: loop {
        if debug {
            log::debug!("Loading configuration.");
        }
        let config = load_filter_config(&mut config_manager, verbose)?;
        if config.verbose {
            info!("Verbose filter diagnostics enabled.");
        }

        let mut manager = start_filters(&config_manager, config)?;

        if !no_hot_reload {
            info!(
                "{} {}.",
                "Hot-reload on configuration file change is active"
                    .magenta()
                    .bold(),
                "(disable with --no-hot-reload)"
            );
        }

        info!("{}", "Press Ctrl+C to stop.".green().bold());
        info!("{}", "=".repeat(50));

        let mut device_check =
            tokio::time::interval(std::time::Duration::from_millis(DEVICE_CHECK_INTERVAL_MILLIS));

        'current_run: loop {
            #[rustfmt::skip]
            tokio::select! {
                _ = device_check.tick() => {
                    if manager.reap_finished().await > 0 && manager.running_count() == 0 {
                        error!("No device filter is running anymore.");
                        bail!("All device filters ended.");
                    }
                }
                _ = async {
                    match config_watcher.as_mut() {
                        Some(rx) => { let _ = rx.recv().await; }
                        None => std::future::pending().await,
                    };
                } => {
                    let mut candidate = ConfigManager::new(cfg_file_path, debug);
                    if let Err(e) = load_filter_config(&mut candidate, verbose) {
                        log::error!("\n---\n!!! Configuration load failed while trying to hot-reload.");
                        log::error!("The error was: \n {:?} \n", e);
                        log::warn!("Running with previous (valid) configuration.");
                        continue 'current_run;
                    }

                    info!("Configuration validated. Stopping filters to restart with new configuration.");
                    manager.stop().await;
                    continue 'damper_restart;
                }
                result = terminate_signal() => {
                    info!("Termination requested. Releasing devices.");
                    manager.stop().await;
                    info!("Cleanup complete.");
                    return result;
                }
            }
        }
    }
}

pub fn check_linux_system_requirements() -> Result<()> {
    if !Path::new("/dev/uinput").exists() {
        error!("/dev/uinput not found. Replacement devices can not be created.");
        error!("Run: sudo modprobe uinput");
    }

    if !nix::unistd::Uid::current().is_root() {
        let groups = nix::unistd::getgroups()?;
        let input_gid = nix::unistd::Group::from_name("input")?.map(|g| g.gid);

        if let Some(gid) = input_gid {
            if !groups.contains(&gid) {
                warn!("Warning: Current user not in 'input' group");
                warn!("Run: sudo usermod -a -G input $USER");
                warn!("Then logout and login again");
            }
        }
    }

    Ok(())
}
