//! Local CLI settings.
//!
//! Settings live in `~/.mediascribe/config.toml` and supply defaults for the
//! global `--api-url` and `--output` flags. The flags, and the
//! `MEDIASCRIBE_API_URL` environment variable, always win.

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

/// Server used when neither a flag nor a setting names one.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Store a setting
    Set {
        #[arg(value_enum)]
        key: ConfigKey,
        value: String,
    },

    /// Remove a setting, falling back to the built-in default
    Unset {
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Show the stored settings
    Show,

    /// Print the settings file location
    Path,
}

/// A setting name as written on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Base URL of the mediascribe server
    ApiUrl,
    /// Default output format (table, json, yaml)
    Output,
}

/// Settings stored on disk.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFormat>,
}

impl CliConfig {
    /// Settings from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Settings from `path`; a missing file means no settings.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Parse and store one setting.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        match key {
            ConfigKey::ApiUrl => {
                let url = reqwest::Url::parse(value)
                    .with_context(|| format!("'{}' is not a valid URL", value))?;
                if !matches!(url.scheme(), "http" | "https") {
                    anyhow::bail!("api-url must be an http or https URL, got '{}'", value);
                }
                self.api_url = Some(value.trim_end_matches('/').to_string());
            }
            ConfigKey::Output => {
                let format = OutputFormat::from_str(value, true)
                    .map_err(|_| anyhow::anyhow!("output must be one of table, json, yaml; got '{}'", value))?;
                self.output = Some(format);
            }
        }
        Ok(())
    }

    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::ApiUrl => self.api_url = None,
            ConfigKey::Output => self.output = None,
        }
    }
}

/// `~/.mediascribe/config.toml`
fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".mediascribe").join("config.toml"))
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = CliConfig::load_from(&path)?;
            cfg.set(key, &value)?;
            cfg.save_to(&path)?;
            report(&cfg, format, "Setting saved")?;
        }

        ConfigCommands::Unset { key } => {
            let mut cfg = CliConfig::load_from(&path)?;
            cfg.unset(key);
            cfg.save_to(&path)?;
            report(&cfg, format, "Setting removed")?;
        }

        ConfigCommands::Show => {
            let cfg = CliConfig::load_from(&path)?;
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    output::print_detail(
                        "api-url",
                        cfg.api_url
                            .as_deref()
                            .unwrap_or(&format!("{} (default)", DEFAULT_API_URL)),
                    );
                    let output_format = match cfg.output {
                        Some(chosen) => format!("{:?}", chosen).to_lowercase(),
                        None => "table (default)".to_string(),
                    };
                    output::print_detail("output", &output_format);
                }
                _ => output::print_item(&cfg, format)?,
            }
        }

        ConfigCommands::Path => println!("{}", path.display()),
    }

    Ok(())
}

fn report(cfg: &CliConfig, format: OutputFormat, message: &str) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_success(message);
            Ok(())
        }
        _ => output::print_item(cfg, format),
    }
}
