//! Configuration for phaseflow, read from `.phaseflow/phaseflow.toml`.
//!
//! Settings are layered file → environment → CLI. Every section has defaults,
//! so a missing file or a partial one is fine.
//!
//! # Configuration File Format
//!
//! ```toml
//! [storage]
//! root = ".phaseflow/state"
//! lock_dir = ".phaseflow/locks"
//!
//! [locks]
//! timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! file = ".phaseflow/logs/phaseflow.log"
//!
//! [templates]
//! dir = ".phaseflow/templates"
//! ```
//!
//! Environment overrides: `PHASEFLOW_STORAGE_ROOT`, `PHASEFLOW_LOCK_TIMEOUT_MS`,
//! `PHASEFLOW_LOG_LEVEL`, `PHASEFLOW_LOG_FORMAT`.

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::{LogFormat, LoggingConfig};

pub const CONFIG_DIR: &str = ".phaseflow";
pub const CONFIG_FILE: &str = "phaseflow.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    /// Root of the document tree, relative to the project directory.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Directory for cross-process lock files. Unset disables file locks.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: Option<PathBuf>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("state")
}

fn default_lock_dir() -> Option<PathBuf> {
    Some(PathBuf::from(CONFIG_DIR).join("locks"))
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            lock_dir: default_lock_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocksSection {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for LocksSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`. Unknown values fall back to `pretty` with a warning.
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    LogFormat::Pretty.to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplatesSection {
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("templates")
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
        }
    }
}

/// Parsed `phaseflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseflowToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub locks: LocksSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub templates: TemplatesSection,
}

impl PhaseflowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phaseflow.toml")
    }

    /// Load `<dir>/phaseflow.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize phaseflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `PHASEFLOW_*` environment overrides.
    pub fn apply_env(&mut self) -> Vec<String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Returns warnings for values that
    /// could not be used.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(root) = lookup("PHASEFLOW_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(timeout) = lookup("PHASEFLOW_LOCK_TIMEOUT_MS") {
            match timeout.trim().parse() {
                Ok(ms) => self.locks.timeout_ms = ms,
                Err(_) => warnings.push(format!(
                    "Ignoring PHASEFLOW_LOCK_TIMEOUT_MS='{}': not a number of milliseconds",
                    timeout
                )),
            }
        }
        if let Some(level) = lookup("PHASEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PHASEFLOW_LOG_FORMAT") {
            self.logging.format = format;
        }
        warnings
    }

    pub fn log_format(&self) -> LogFormat {
        self.logging.format.parse().unwrap_or_default()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.locks.timeout_ms == 0 {
            warnings.push(
                "locks.timeout_ms is 0: every contended lock will time out immediately"
                    .to_string(),
            );
        }
        if self.logging.format.parse::<LogFormat>().is_err() {
            warnings.push(format!(
                "Invalid logging.format '{}': should be 'pretty' or 'json'",
                self.logging.format
            ));
        }
        if self.logging.level.trim().is_empty() {
            warnings.push("logging.level is empty".to_string());
        }
        if self.storage.root.as_os_str().is_empty() {
            warnings.push("storage.root is empty".to_string());
        }

        warnings
    }
}

/// Runtime configuration: the parsed file with paths resolved against the
/// project directory and CLI overrides applied.
#[derive(Debug, Clone)]
pub struct PhaseflowConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: PhaseflowToml,
    /// Problems found while layering the configuration.
    pub warnings: Vec<String>,
}

impl PhaseflowConfig {
    /// Load file and environment layers for a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = PhaseflowToml::load_or_default(&config_dir)?;
        let mut warnings = toml.apply_env();
        warnings.extend(toml.validate());

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            warnings,
        })
    }

    /// Apply CLI overrides on top of file and environment.
    pub fn with_cli_args(
        project_dir: PathBuf,
        log_level: Option<String>,
        lock_timeout_ms: Option<u64>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        if let Some(level) = log_level {
            config.toml.logging.level = level;
        }
        if let Some(ms) = lock_timeout_ms {
            config.toml.locks.timeout_ms = ms;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn storage_root(&self) -> PathBuf {
        self.resolve(&self.toml.storage.root)
    }

    pub fn lock_dir(&self) -> Option<PathBuf> {
        self.toml.storage.lock_dir.as_deref().map(|d| self.resolve(d))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.locks.timeout_ms)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.resolve(&self.toml.templates.dir)
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.toml.logging.level.clone(),
            format: self.toml.log_format(),
            file: self.toml.logging.file.as_deref().map(|f| self.resolve(f)),
        }
    }

    /// Template files (`*.json`, `*.yaml`, `*.yml`) in the templates directory, sorted.
    pub fn template_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.templates_dir();
        let mut files = Vec::new();
        for ext in ["json", "yaml", "yml"] {
            let pattern = dir.join(format!("*.{}", ext));
            let pattern = pattern.to_string_lossy();
            for entry in glob(&pattern).context("Failed to read glob pattern")? {
                files.push(entry.context("Failed to read template directory entry")?);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Find a template file by id (file stem) or by path.
    pub fn find_template(&self, name: &str) -> Result<PathBuf> {
        let direct = PathBuf::from(name);
        if direct.is_file() {
            return Ok(direct);
        }
        self.template_files()?
            .into_iter()
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(name))
            .with_context(|| {
                format!(
                    "No template '{}' in {}",
                    name,
                    self.templates_dir().display()
                )
            })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = PhaseflowToml::default();
        assert_eq!(config.locks.timeout_ms, 5000);
        assert_eq!(config.storage.root, PathBuf::from(".phaseflow/state"));
        assert_eq!(config.log_format(), LogFormat::Pretty);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = PhaseflowToml::parse(
            r#"
[locks]
timeout_ms = 250

[logging]
format = "json"
"#,
        )
        .unwrap();
        assert_eq!(config.locks.timeout_ms, 250);
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.templates.dir, PathBuf::from(".phaseflow/templates"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = PhaseflowToml::parse("[locks\ntimeout_ms = ").unwrap_err();
        assert!(err.to_string().contains("Failed to parse phaseflow.toml"));
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = PhaseflowToml::default();
        config.locks.timeout_ms = 0;
        config.logging.format = "xml".to_string();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("xml"));
        assert_eq!(config.log_format(), LogFormat::Pretty);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PHASEFLOW_STORAGE_ROOT", "/var/lib/phaseflow"),
            ("PHASEFLOW_LOCK_TIMEOUT_MS", "soon"),
            ("PHASEFLOW_LOG_LEVEL", "debug"),
        ]);
        let mut config = PhaseflowToml::default();
        let warnings = config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.root, PathBuf::from("/var/lib/phaseflow"));
        assert_eq!(config.locks.timeout_ms, 5000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = PhaseflowToml::default();
        config.logging.file = Some(PathBuf::from("logs/pf.log"));
        config.save(&path).unwrap();
        assert_eq!(PhaseflowToml::load(&path).unwrap(), config);
    }

    #[test]
    fn test_runtime_config_resolves_paths_and_cli_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("PHASEFLOW_LOCK_TIMEOUT_MS") };
        unsafe { std::env::remove_var("PHASEFLOW_STORAGE_ROOT") };

        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[locks]\ntimeout_ms = 1200\n",
        )
        .unwrap();

        let config = PhaseflowConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(1200));
        assert!(config.storage_root().starts_with(&config.project_dir));

        let config = PhaseflowConfig::with_cli_args(
            dir.path().to_path_buf(),
            Some("trace".to_string()),
            Some(10),
        )
        .unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(10));
        assert_eq!(config.logging().level, "trace");
    }

    #[test]
    fn test_env_timeout_override_applies() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        unsafe { std::env::set_var("PHASEFLOW_LOCK_TIMEOUT_MS", "42") };
        let config = PhaseflowConfig::new(dir.path().to_path_buf());
        unsafe { std::env::remove_var("PHASEFLOW_LOCK_TIMEOUT_MS") };
        assert_eq!(config.unwrap().toml.locks.timeout_ms, 42);
    }

    #[test]
    fn test_template_discovery() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        let templates = dir.path().join(".phaseflow/templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("feature.json"), "{}").unwrap();
        std::fs::write(templates.join("bug.yaml"), "id: bug").unwrap();
        std::fs::write(templates.join("README.md"), "").unwrap();

        let config = PhaseflowConfig::new(dir.path().to_path_buf()).unwrap();
        let files = config.template_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(config.find_template("feature").unwrap().ends_with("feature.json"));
        assert!(config.find_template("missing").is_err());
    }
}
