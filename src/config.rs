use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use serde_yaml::Value as YamlValue;
use std::fs;
use std::path::{Path, PathBuf};
use yaml_merge_keys::merge_keys_serde;

use crate::error::FilterError;
use crate::schemas::*;

pub const APP_VERSION_STR: &str = "1.2";
pub const CONFIG_VERSION_STR: &str = APP_VERSION_STR;
pub const APP_DEFAULT_CONFIG_FILE: &str = "conf/mousedamper.yaml";
pub const APP_AUTHORS: &str = "Michael Webster";
pub const APP_NAME: &str = "mousedamper";
pub const APP_COMMAND_NAME: &str = "mousedamper";
pub const APP_LONG_NAME: &str = "Mouse Damper, jitter and click-drift filter";
pub const APP_ABOUT: &str = "Prevents unintended mouse movements during clicks";
pub const APP_LONG_ABOUT: &str = "Grabs every pointer device, damps small involuntary \
    motion and holds the pointer still while a button is pressed, re-emitting the result \
    through a virtual replacement device.";
pub const APP_DEFAULT_NO_HOT_RELOAD: &str = "false";
pub const APP_DEFAULT_MAX_LOG_LEVEL: &str = "info";

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub damper: DamperSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            damper: DamperSettings::default(),
            created_by: Some(APP_LONG_NAME.to_string()),
            created_date: Some(Utc::now()),
            last_modified: Some(Utc::now()),
        }
    }
}

//------------------------------------------------------
#[derive(Debug)]
pub struct ConfigManager {
    cfg_file_path: PathBuf,
    config: Config,
    debug: bool,
}

impl ConfigManager {
    /// The file does not need to exist yet, `load` reports a missing file.
    pub fn new(cfg_file_path: &Path, debug: bool) -> Self {
        Self {
            cfg_file_path: cfg_file_path.to_path_buf(),
            config: Config::default(),
            debug,
        }
    }

    pub fn load(&mut self) -> Result<()> {
        log::info!("Loading config from {}", self.cfg_file_path.display());

        if !self.cfg_file_path.exists() {
            log::error!("Config file is not found at {:?}", self.cfg_file_path);
            bail!("Config file not found.");
        }

        let content = fs::read_to_string(&self.cfg_file_path).context("Failed to read config file")?;
        self.config = Self::parse(&content)?;

        if self.debug {
            log::debug!("Loaded settings: {:?}", self.config.damper);
        }
        Ok(())
    }

    pub fn parse(content: &str) -> Result<Config> {
        let raw_yaml: YamlValue =
            serde_yaml::from_str(content).context("Initial YAML parse failed")?;

        // An empty file is a valid config with every option at its default.
        if raw_yaml.is_null() {
            return Ok(Config::default());
        }

        let yaml_keys_merged = merge_keys_serde(raw_yaml)
            .map_err(|e| anyhow::anyhow!("Failed merge YAML keys: {e}"))?;

        let final_yaml_str = serde_yaml::to_string(&yaml_keys_merged)?;
        match serde_yaml::from_str(&final_yaml_str) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::error!("{e:?}");
                if let Some(location) = e.location() {
                    Self::print_config_read_error_context(
                        &final_yaml_str,
                        location.line().saturating_sub(5),
                        7,
                    );
                }
                bail!(e);
            }
        }
    }

    fn print_config_read_error_context(src: &str, line0: usize, after: usize) {
        let start = line0;
        let end = line0.saturating_add(after);
        log::error!(" ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~ ");
        log::error!("... Context around erroneous config snippet: \n");
        for (i, line) in src.lines().enumerate() {
            if i < start {
                continue;
            } else if i > end {
                break;
            }
            log::error!("{:>6} | {}", i + 1, line);
        }
        log::error!(" ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~ ");
    }

    /// Writes a config file holding every option at its default value.
    pub fn write_default(&mut self) -> Result<()> {
        if self.cfg_file_path.exists() {
            bail!(
                "Refusing to overwrite existing config file {}",
                self.cfg_file_path.display()
            );
        }
        if let Some(parent) = self.cfg_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        self.config = Config::default();
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        let last_modified = Utc::now();
        self.config.last_modified = Some(last_modified);

        let yaml = serde_yaml::to_string(&self.config)?;

        let header = format!(
            "# {APP_NAME} Configuration File\n\
             # Version: {CONFIG_VERSION_STR}\n\
             # Last modified: {last_modified}\n\n"
        );

        fs::write(&self.cfg_file_path, header + &yaml).context("Failed to write config file")?;
        Ok(())
    }

    /// Range and consistency problems of the loaded settings, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let settings = &self.config.damper;
        let mut errors = Vec::new();

        if let Err(e) = settings.validate() {
            errors.push(format!("Out of range option value(s): {e}"));
        }

        if settings.cancel_value >= settings.delta_threshold {
            errors.push(format!(
                "cancel_value ({}) must be below delta_threshold ({}), \
                otherwise a single jitter event already counts as intentional motion",
                settings.cancel_value, settings.delta_threshold
            ));
        }

        errors
    }

    /// Validated runtime configuration. `verbose_override` turns on per-transition
    /// diagnostics regardless of the file setting.
    pub fn resolve(&self, verbose_override: bool) -> std::result::Result<FilterConfig, FilterError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(FilterError::Config(errors.join("; ")));
        }
        let mut config = FilterConfig::from_settings(&self.config.damper);
        config.verbose |= verbose_override;
        Ok(config)
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_settings(&self) -> &DamperSettings {
        &self.config.damper
    }
}
