//! Configuration file management for cadence.
//!
//! Provides a TOML-based config file at `~/.config/cadence/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use cadence_core::PipelineConfig;
use cadence_core::generator::{
    AnthropicGenerator, ClaudeCliGenerator, GeneratorRegistry, TextGenerator,
};
use cadence_db::config::DbConfig;

/// Providers the `[generator]` section may name.
pub const PROVIDERS: &[&str] = &["claude-cli", "anthropic"];

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub generator: GeneratorSection,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    /// Adapter used for model identifiers without a `provider/` prefix.
    pub provider: String,
    /// Path to the `claude` binary.
    pub binary: String,
    /// Environment variable holding the Anthropic API key.
    pub api_key_env: String,
    /// Overrides `pipeline.default_model` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            provider: "claude-cli".to_string(),
            binary: "claude".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            default_model: None,
        }
    }
}

impl GeneratorSection {
    /// Register both adapters and route bare model names to `provider`.
    pub fn build(&self) -> Result<Arc<dyn TextGenerator>> {
        let mut registry = GeneratorRegistry::new();
        registry.register(Arc::new(ClaudeCliGenerator::with_binary(&self.binary)));
        registry.register(Arc::new(AnthropicGenerator::from_env(&self.api_key_env)));
        if !registry.set_default(&self.provider) {
            bail!(
                "unknown generator provider {:?} (expected one of: {})",
                self.provider,
                PROVIDERS.join(", ")
            );
        }
        Ok(Arc::new(registry))
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the cadence config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/cadence` or `~/.config/cadence`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("cadence");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("cadence")
}

/// Return the path to the cadence config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Set permissions to 0600 (owner read/write only) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CadenceConfig {
    pub db_config: DbConfig,
    pub generator: GeneratorSection,
    pub pipeline: PipelineConfig,
}

impl CadenceConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `CADENCE_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Generator provider: `CADENCE_GENERATOR` env > `config_file.generator.provider` > `claude-cli`
    /// - Pipeline tuning: config file > defaults
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = match load_config() {
            Ok(cfg) => Some(cfg),
            Err(e) if config_path().exists() => return Err(e),
            Err(_) => None,
        };
        Self::from_parts(cli_db_url, file_config)
    }

    fn from_parts(cli_db_url: Option<&str>, file_config: Option<ConfigFile>) -> Result<Self> {
        let ConfigFile {
            database,
            mut generator,
            mut pipeline,
        } = file_config.unwrap_or_default();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("CADENCE_DATABASE_URL") {
            url
        } else if !database.url.is_empty() {
            database.url
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        if let Ok(provider) = std::env::var("CADENCE_GENERATOR") {
            generator.provider = provider;
        }
        if !PROVIDERS.contains(&generator.provider.as_str()) {
            bail!(
                "unknown generator provider {:?} (expected one of: {})",
                generator.provider,
                PROVIDERS.join(", ")
            );
        }
        if let Some(model) = &generator.default_model {
            pipeline.default_model = model.clone();
        }

        Ok(Self {
            db_config: DbConfig::new(db_url),
            generator,
            pipeline,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
