//! Configuration model and config file resolution
//!
//! Bootstrap configuration is a single TOML file. Only values are consumed by
//! the pipeline; every field has a built-in default so a missing file never
//! stops a run on its own.
//!
//! # Config File Resolution Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `DLIT_CONFIG` environment variable
//! 3. `./dlit.toml` in the working directory
//! 4. Compiled defaults (fallback)
//!
//! An explicitly named file (priorities 1 and 2) must exist. The implicit
//! working-directory file may be absent, in which case defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DLIT_CONFIG";

/// Config file looked up in the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "dlit.toml";

/// Method used to infill missing floor areas and site areas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfillMethod {
    /// Stratum mean of the observed values
    #[default]
    Mean,
    /// Ordinary least squares on the configured covariates
    Regression,
    /// Least squares with negative predictions clamped to zero
    #[serde(alias = "regression_no_negative")]
    RegressionNoNegatives,
}

impl InfillMethod {
    /// Methods which fit a linear model
    pub fn is_regression(&self) -> bool {
        matches!(self, Self::Regression | Self::RegressionNoNegatives)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Regression => "regression",
            Self::RegressionNoNegatives => "regression_no_negatives",
        }
    }
}

impl fmt::Display for InfillMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder all outputs are written to
    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Input file locations
    #[serde(default)]
    pub inputs: InputPaths,

    /// Validation and infill settings
    #[serde(default)]
    pub infill: InfillConfig,

    /// Disaggregation settings
    #[serde(default)]
    pub land_use: LandUseConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            output_folder: default_output_folder(),
            logging: LoggingConfig::default(),
            inputs: InputPaths::default(),
            infill: InfillConfig::default(),
            land_use: LandUseConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Locations of the CSV inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub dlog_records: PathBuf,
    pub valid_codes: PathBuf,
    pub out_of_date_codes: PathBuf,
    pub incomplete_codes: PathBuf,
    pub known_invalid_codes: PathBuf,
    pub msoa_weights: PathBuf,
    pub luc_sic_conversion: PathBuf,
    pub msoa_dwellings: PathBuf,
    pub msoa_traveller_types: PathBuf,
    /// Floor space per full-time job by land-use code; jobs are not reported without it
    pub employment_density: Option<PathBuf>,
}

impl Default for InputPaths {
    fn default() -> Self {
        let base = PathBuf::from("inputs");
        Self {
            dlog_records: base.join("dlog_records.csv"),
            valid_codes: base.join("valid_land_use_codes.csv"),
            out_of_date_codes: base.join("out_of_date_land_use_codes.csv"),
            incomplete_codes: base.join("incomplete_land_use_codes.csv"),
            known_invalid_codes: base.join("known_invalid_land_use_codes.csv"),
            msoa_weights: base.join("site_msoa_weights.csv"),
            luc_sic_conversion: base.join("luc_sic_conversion.csv"),
            msoa_dwellings: base.join("msoa_dwellings.csv"),
            msoa_traveller_types: base.join("msoa_traveller_types.csv"),
            employment_density: None,
        }
    }
}

/// Validation and infill settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InfillConfig {
    /// Estimator used for floor area and site area gaps
    #[serde(default)]
    pub gfa_infill_method: InfillMethod,

    /// Whether unresolved codes are offered to the manual-resolution worksheet
    #[serde(default)]
    pub user_infill: bool,

    /// Worksheet read and written by manual resolution
    #[serde(default)]
    pub user_input_path: Option<PathBuf>,
}

/// Disaggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandUseConfig {
    /// Factor applied to existing-use volumes
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 1.0 (full demolition assumed)
    #[serde(default = "default_demolition_dampener")]
    pub demolition_dampener: f64,

    /// Inclusive year range for the build-out profile output
    #[serde(default)]
    pub build_out_years: Option<YearRange>,
}

impl Default for LandUseConfig {
    fn default() -> Self {
        Self {
            demolition_dampener: default_demolition_dampener(),
            build_out_years: None,
        }
    }
}

/// Inclusive range of calendar years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_demolition_dampener() -> f64 {
    1.0
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks that cannot be expressed through serde
    pub fn validate(&self) -> Result<()> {
        let dampener = self.land_use.demolition_dampener;
        if !dampener.is_finite() || !(0.0..=1.0).contains(&dampener) {
            return Err(Error::Config(format!(
                "demolition_dampener must be within [0, 1], got {}",
                dampener
            )));
        }

        if let Some(range) = self.land_use.build_out_years {
            if range.start > range.end {
                return Err(Error::Config(format!(
                    "build_out_years start ({}) is after end ({})",
                    range.start, range.end
                )));
            }
        }

        if self.infill.user_infill && self.infill.user_input_path.is_none() {
            return Err(Error::Config(
                "user_infill is enabled but user_input_path is not set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no explicit file was named and the working-directory
/// default does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Working directory
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    // Priority 4: Compiled defaults
    None
}

/// Load configuration following the resolution priority
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let content = std::fs::read_to_string(&path)?;
            let config = TomlConfig::from_toml_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => {
            warn!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write configuration to a TOML file atomically
///
/// Writes to a sibling temp file first, then renames over the target.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
