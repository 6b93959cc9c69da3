//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `chatflow.toml`, `config.toml`
//! - `yaml-config`: `chatflow.yaml`, `chatflow.yml`
//!
//! # Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic overrides ([`ConfigLoader::merge`])
//! 3. Profile-specific file (`chatflow.{profile}.toml`)
//! 4. Main file (`chatflow.toml`)
//! 5. Environment variables (`CHATFLOW_*`)
//!
//! # Environment Variable Mapping
//!
//! `__` separates nesting levels:
//!
//! - `CHATFLOW_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `CHATFLOW_QUEUE__CONSUMERS=8` → `queue.consumers = 8`
//! - `CHATFLOW_DISPATCH__INPUT_BOT=dev` → `dispatch.input_bot = "dev"`
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/chatflow.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::ChatflowConfig;

const ENV_PREFIX: &str = "CHATFLOW_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Test,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            "test" => Self::Test,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CHATFLOW_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("CHATFLOW_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Explicit file; disables the search.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges configuration values programmatically.
    pub fn merge(mut self, config: ChatflowConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and extracts the configuration.
    pub fn load(self) -> ConfigResult<ChatflowConfig> {
        let profile = self.profile.clone();
        let config: ChatflowConfig = self.build_figment()?.extract()?;
        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            platforms = config.platforms.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(ChatflowConfig::default()))
            .merge(std::mem::take(&mut self.figment));

        figment = match &self.config_file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.clone()));
                }
                let format = FileFormat::of_path(path).ok_or_else(|| {
                    ConfigError::ParseError(format!(
                        "unsupported or disabled configuration format: {}",
                        path.display()
                    ))
                })?;
                info!(path = %path.display(), "Loading configuration file");
                format.merge(figment, path)
            }
            None => self.discover(figment),
        };

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }
        Ok(figment)
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("chatflow")))
            .collect()
    }

    /// Merges, per enabled format, the first base file on the search path
    /// together with the profile files seen before it.
    fn discover(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;
        for format in FileFormat::ENABLED {
            let (merged, hit) = self.discover_format(figment, &search_paths, *format);
            figment = merged;
            found |= hit;
        }
        if !found {
            warn!(paths = ?search_paths, "No configuration file found, using defaults");
        }
        figment
    }

    fn discover_format(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        format: FileFormat,
    ) -> (Figment, bool) {
        for dir in search_paths {
            for (stem, ext) in format.file_names() {
                let profiled = dir.join(format!("{stem}.{}.{ext}", self.profile));
                if profiled.exists() {
                    debug!(path = %profiled.display(), profile = %self.profile, "Merging profile configuration");
                    figment = format.merge(figment, &profiled);
                }
                let base = dir.join(format!("{stem}.{ext}"));
                if base.exists() {
                    info!(path = %base.display(), "Loading configuration file");
                    return (format.merge(figment, &base), true);
                }
            }
        }
        (figment, false)
    }
}

/// File formats compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl FileFormat {
    const ENABLED: &'static [FileFormat] = &[
        #[cfg(feature = "toml-config")]
        FileFormat::Toml,
        #[cfg(feature = "yaml-config")]
        FileFormat::Yaml,
    ];

    /// Candidate `(stem, extension)` pairs in lookup order.
    fn file_names(self) -> &'static [(&'static str, &'static str)] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &[("chatflow", "toml"), ("config", "toml")],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &[("chatflow", "yaml"), ("chatflow", "yml")],
        }
    }

    fn of_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.file_names().iter().any(|(_, e)| *e == ext))
    }

    fn merge(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(figment::providers::Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(figment::providers::Yaml::file(path)),
        }
    }
}


/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<ChatflowConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus the environment.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ChatflowConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::{LogLevel, PlatformKind};

    #[test]
    fn test_defaults_without_sources() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new()
            .search_path(dir.path())
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.queue.capacity, 1000);
        assert_eq!(config.dispatch.cancel_keyword, "cancel");
        assert!(config.platforms.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_is_overridden_by_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("chatflow.toml")).unwrap();
        writeln!(
            base,
            r#"
[logging]
level = "debug"

[[platforms]]
id = "main"
kind = "slack"
token = "xoxb-1"
"#
        )
        .unwrap();
        let mut profile = std::fs::File::create(dir.path().join("chatflow.test.toml")).unwrap();
        writeln!(profile, "[queue]\nconsumers = 2\n\n[logging]\nlevel = \"warn\"").unwrap();

        let config = ConfigLoader::new()
            .profile("test")
            .search_path(dir.path())
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.queue.consumers, 2);
        assert_eq!(config.platforms[0].kind, PlatformKind::Slack);
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_format_of_path() {
        assert_eq!(FileFormat::of_path(Path::new("a/chatflow.toml")), Some(FileFormat::Toml));
        assert_eq!(FileFormat::of_path(Path::new("chatflow.ini")), None);
        assert_eq!(FileFormat::of_path(Path::new("chatflow")), None);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("TEST"), Profile::Test);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }
}
