use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::home_dir::resolve_home_dir;

/// Client configuration: typed global sections plus one untyped entry per
/// module, deserialized later by the module that owns it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Client-wide settings.
    pub client: ClientConfig,
    /// Per-subsystem log routing; `None` means built-in defaults.
    pub logging: Option<LoggingConfig>,
    /// Extra `<module>.yaml` files to fold into `modules`.
    #[serde(default)]
    pub modules_dir: Option<String>,
    /// Raw module sections keyed by module name.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base directory for caches and relative log paths; normalized on load.
    #[serde(default)]
    pub home_dir: String,
    /// Email of the signed-in account (used by host binaries).
    #[serde(default)]
    pub account_email: Option<String>,
    /// Display name of the signed-in account.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Subsystem name to log section. `"default"` catches every target without
/// its own entry.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    /// `trace` .. `error`, or `off`.
    pub console_level: String,
    /// Relative paths resolve against `client.home_dir`; empty disables the file.
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Console at `info`, rotated file at `debug` under the home directory.
pub fn default_logging_config() -> LoggingConfig {
    let section = Section {
        console_level: "info".into(),
        file: "logs/tabshare.log".into(),
        file_level: "debug".into(),
        max_backups: Some(3),
        max_size_mb: Some(50),
    };
    HashMap::from([("default".to_string(), section)])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            logging: Some(default_logging_config()),
            modules_dir: None,
            modules: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Layers defaults, the YAML file and `APP__` environment variables, in
    /// that order. Also normalizes `client.home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            client: ClientConfig::default(),
            logging: None,
            modules_dir: None,
            modules: HashMap::new(),
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // APP__CLIENT__HOME_DIR=/tmp/x maps to client.home_dir
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment.extract().with_context(|| {
            format!("Failed to load config from {}", config_path.as_ref().display())
        })?;

        normalize_home_dir_inplace(&mut config.client)
            .context("Failed to resolve client.home_dir")?;

        if let Some(dir) = config.modules_dir.clone() {
            merge_module_files(&mut config.modules, dir)?;
        }

        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_layered(path);
        }
        let mut config = Self::default();
        normalize_home_dir_inplace(&mut config.client)
            .context("Failed to resolve client.home_dir (defaults)")?;
        Ok(config)
    }

    /// Effective configuration as YAML, for `--print-config`.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Config is not representable as YAML")
    }

    /// Typed view of one module's configuration; missing entries yield the default.
    pub fn module_config<T>(&self, module_name: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.modules.get(module_name) {
            Some(raw) => serde_json::from_value(raw.clone())
                .with_context(|| format!("Invalid config for module '{module_name}'")),
            None => Ok(T::default()),
        }
    }

    /// Apply overrides from command line arguments. An overridden home dir is
    /// normalized like one coming from the file.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) -> Result<()> {
        if let Some(home) = &args.home_dir {
            self.client.home_dir = home.clone();
            normalize_home_dir_inplace(&mut self.client)
                .context("Failed to resolve --home-dir")?;
        }

        let sections = self.logging.get_or_insert_with(default_logging_config);
        let level = match args.verbose {
            0 => return Ok(()),
            1 => "debug",
            _ => "trace",
        };
        if let Some(section) = sections.get_mut("default") {
            section.console_level = level.to_string();
        }
        Ok(())
    }
}

/// Command line arguments relevant to configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub home_dir: Option<String>,
    pub verbose: u8,
}

const HOME_SUBDIR: &str = ".tabshare";

/// Normalize `client.home_dir` and store the absolute path back.
fn normalize_home_dir_inplace(client: &mut ClientConfig) -> Result<()> {
    let opt = if client.home_dir.trim().is_empty() {
        None
    } else {
        Some(client.home_dir.clone())
    };

    let resolved: PathBuf =
        resolve_home_dir(opt, HOME_SUBDIR, true).context("home_dir normalization failed")?;

    client.home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}

/// Each `*.yaml`/`*.yml` file in `dir` becomes the section named by its stem,
/// replacing any inline section of the same name.
fn merge_module_files(
    sections: &mut HashMap<String, serde_json::Value>,
    dir: impl AsRef<Path>,
) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list modules_dir {}", dir.display()))?
    {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let Some(module) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !is_yaml {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: serde_yaml::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?;
        sections.insert(module.to_string(), serde_json::to_value(value)?);
    }
    Ok(())
}
