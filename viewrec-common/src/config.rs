//! Configuration loading and root folder resolution
//!
//! Root folder resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`VIEWREC_ROOT_FOLDER`, then `VIEWREC_ROOT`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never stops startup: a warning is
//! logged and compiled defaults are used.

use crate::models::ContentKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "VIEWREC_ROOT_FOLDER";
/// Shorter alias for [`ROOT_FOLDER_ENV`]
pub const ROOT_ENV: &str = "VIEWREC_ROOT";
/// Environment variable naming an explicit TOML config file
pub const CONFIG_FILE_ENV: &str = "VIEWREC_CONFIG";
/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "viewrec.db";
/// Longest dwell threshold a config may ask for (one day)
pub const MAX_DWELL_SECS: f64 = 86_400.0;

/// Engagement tracking options
///
/// Every field has a default, so a TOML `[engagement]` section may name any
/// subset of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Continuous dwell required before an image view counts (seconds)
    pub min_dwell_image_secs: f64,
    /// Continuous dwell required before a media view counts (seconds)
    pub min_dwell_media_secs: f64,
    /// Fraction of the element that must be visible to count as engaged
    pub visibility_threshold_ratio: f64,
    /// Margin applied to the viewport, as a fraction of the element
    ///
    /// Positive values grow the viewport (lowering the effective threshold),
    /// negative values shrink it.
    pub root_margin: Option<f64>,
    /// Track elements as soon as they are registered
    pub auto_track: bool,
    /// Only track image content the viewer is already entitled to
    pub require_entitlement: bool,
    /// Upper bound on each ledger round-trip (milliseconds)
    pub ledger_timeout_ms: u64,
    /// History length used when the caller asks for 0 entries
    pub default_history_limit: usize,
    /// Hard cap on history length
    pub max_history_limit: usize,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            min_dwell_image_secs: 3.0,
            min_dwell_media_secs: 10.0,
            visibility_threshold_ratio: 0.5,
            root_margin: None,
            auto_track: true,
            require_entitlement: true,
            ledger_timeout_ms: 5000,
            default_history_limit: 20,
            max_history_limit: 100,
        }
    }
}

impl EngagementConfig {
    /// Dwell threshold for a content kind
    pub fn min_dwell(&self, kind: ContentKind) -> Duration {
        let secs = match kind {
            ContentKind::Image => self.min_dwell_image_secs,
            ContentKind::Media => self.min_dwell_media_secs,
        };
        crate::time::secs_f64_to_duration(secs)
    }

    /// Timeout applied to each ledger call
    pub fn ledger_timeout(&self) -> Duration {
        crate::time::millis_to_duration(self.ledger_timeout_ms)
    }

    /// Clamp a requested history length into `1..=max_history_limit`
    ///
    /// 0 means "use the default".
    pub fn history_limit(&self, requested: usize) -> usize {
        let limit = if requested == 0 {
            self.default_history_limit
        } else {
            requested
        };
        limit.clamp(1, self.max_history_limit.max(1))
    }

    /// Reject configurations the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.visibility_threshold_ratio) {
            return Err(Error::Config(format!(
                "visibility_threshold_ratio must be within [0, 1], got {}",
                self.visibility_threshold_ratio
            )));
        }
        for (name, secs) in [
            ("min_dwell_image_secs", self.min_dwell_image_secs),
            ("min_dwell_media_secs", self.min_dwell_media_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, secs
                )));
            }
            if secs > MAX_DWELL_SECS {
                return Err(Error::Config(format!(
                    "{} must be at most {} seconds, got {}",
                    name, MAX_DWELL_SECS, secs
                )));
            }
        }
        if let Some(margin) = self.root_margin {
            if !(-1.0..=1.0).contains(&margin) {
                return Err(Error::Config(format!(
                    "root_margin must be within [-1, 1], got {}",
                    margin
                )));
            }
        }
        if self.ledger_timeout_ms == 0 {
            return Err(Error::Config("ledger_timeout_ms must be positive".to_string()));
        }
        if self.max_history_limit == 0 || self.default_history_limit > self.max_history_limit {
            return Err(Error::Config(format!(
                "history limits invalid: default {} / max {}",
                self.default_history_limit, self.max_history_limit
            )));
        }
        Ok(())
    }
}

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub port: Option<u16>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engagement: EngagementConfig,
}

impl TomlConfig {
    /// Parse a config file; the engagement section is validated
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.engagement.validate()?;
        Ok(config)
    }

    /// Load the config file if one can be found, otherwise defaults
    ///
    /// Lookup order: explicit path, `VIEWREC_CONFIG`, platform config file.
    /// The outcome is logged immediately, so call this after tracing is up;
    /// before that, use [`TomlConfig::locate_and_load`] and log the
    /// returned [`ConfigLoad`] once a subscriber exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let (config, outcome) = Self::locate_and_load(explicit);
        outcome.log();
        config
    }

    /// Same lookup as [`TomlConfig::load_or_default`], without logging
    pub fn locate_and_load(explicit: Option<&Path>) -> (Self, ConfigLoad) {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
            .or_else(default_config_file);

        match path {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => (config, ConfigLoad::Loaded(path)),
                Err(e) => (
                    Self::default(),
                    ConfigLoad::Rejected {
                        path,
                        reason: e.to_string(),
                    },
                ),
            },
            Some(path) => (Self::default(), ConfigLoad::Missing(path)),
            None => (Self::default(), ConfigLoad::NoLocation),
        }
    }
}

/// How [`TomlConfig::locate_and_load`] arrived at its result
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigLoad {
    /// File parsed and validated
    Loaded(PathBuf),
    /// No file at the looked-up path; defaults used
    Missing(PathBuf),
    /// File present but unreadable or invalid; defaults used
    Rejected { path: PathBuf, reason: String },
    /// No config directory on this platform; defaults used
    NoLocation,
}

impl ConfigLoad {
    /// True when compiled defaults replaced a file that was present
    pub fn is_fallback(&self) -> bool {
        matches!(self, ConfigLoad::Rejected { .. })
    }

    pub fn log(&self) {
        match self {
            ConfigLoad::Loaded(path) => debug!("Loaded config file: {}", path.display()),
            ConfigLoad::Missing(path) => {
                debug!("No config file at {}, using defaults", path.display())
            }
            ConfigLoad::Rejected { path, reason } => {
                warn!("Ignoring config file {}: {}", path.display(), reason)
            }
            ConfigLoad::NoLocation => debug!("No config directory, using defaults"),
        }
    }
}

/// Platform config file location (`<config_dir>/viewrec/config.toml`)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("viewrec").join("config.toml"))
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/viewrec (or /var/lib/viewrec for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("viewrec"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/viewrec"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("viewrec"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/viewrec"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("viewrec"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\viewrec"))
    } else {
        PathBuf::from("./viewrec_data")
    }
}

/// Resolves the root folder for a module
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml: Option<TomlConfig>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml: None,
        }
    }

    /// Highest-priority override from the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Use an already-loaded TOML config instead of reading the platform file
    pub fn with_toml(mut self, toml: TomlConfig) -> Self {
        self.toml = Some(toml);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.is_empty() {
                    debug!(module = %self.module_name, "Root folder from {}", var);
                    return PathBuf::from(path);
                }
            }
        }

        let toml_root = match &self.toml {
            Some(toml) => toml.root_folder.clone(),
            None => TomlConfig::load_or_default(None).root_folder,
        };
        if let Some(path) = toml_root {
            debug!(module = %self.module_name, "Root folder from config file");
            return path;
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and derives paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            warn!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engagement_defaults() {
        let config = EngagementConfig::default();
        assert_eq!(config.min_dwell(ContentKind::Image), Duration::from_secs(3));
        assert_eq!(config.min_dwell(ContentKind::Media), Duration::from_secs(10));
        assert_eq!(config.visibility_threshold_ratio, 0.5);
        assert!(config.root_margin.is_none());
        assert!(config.auto_track);
        assert!(config.require_entitlement);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_history_limit_clamping() {
        let config = EngagementConfig::default();
        assert_eq!(config.history_limit(0), 20);
        assert_eq!(config.history_limit(5), 5);
        assert_eq!(config.history_limit(10_000), 100);
    }

    #[test]
    fn test_validate_rejects_out_of_range_ratio() {
        let config = EngagementConfig {
            visibility_threshold_ratio: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_negative_dwell() {
        let config = EngagementConfig {
            min_dwell_media_secs: -2.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_dwell() {
        let config = EngagementConfig {
            min_dwell_image_secs: 1e20,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_min_dwell_huge_value_saturates() {
        // Unvalidated configs must not panic on conversion
        let config = EngagementConfig {
            min_dwell_image_secs: 1e20,
            ..Default::default()
        };
        assert_eq!(config.min_dwell(ContentKind::Image), Duration::MAX);
    }

    #[test]
    fn test_validate_rejects_inverted_history_limits() {
        let config = EngagementConfig {
            default_history_limit: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_engagement_section_keeps_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [engagement]
            min_dwell_image_secs = 1.5
            auto_track = false
            "#,
        )
        .unwrap();

        assert_eq!(config.engagement.min_dwell_image_secs, 1.5);
        assert!(!config.engagement.auto_track);
        assert_eq!(config.engagement.min_dwell_media_secs, 10.0);
        assert_eq!(config.logging.level, "info");
        assert!(config.root_folder.is_none());
    }
}
