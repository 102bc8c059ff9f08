use crate::error::{PvsiteError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default published random forest model
pub const DEFAULT_INFERENCE_URL: &str =
    "https://artifactory.vgt.vito.be/artifactory/auxdata-public/photovoltaic/random_forest.onnx";

/// Default ONNX runtime archive made available to UDFs on the backend
pub const DEFAULT_DEPENDENCIES_URL: &str =
    "https://artifactory.vgt.vito.be/artifactory/auxdata-public/openeo/onnx_dependencies_1.16.3.zip";

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided via CLI argument
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Update the value if the new source has higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() > self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }
}

/// Credentials for the openEO backend.
///
/// Only read from the environment so that secrets never end up in `pvsite.toml`.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A ready-made bearer token, e.g. `oidc/egi/<access token>`
    Bearer(String),
    /// HTTP basic credentials exchanged against `/credentials/basic`
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer(_) => write!(f, "Bearer(***)"),
            Credentials::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
        }
    }
}

/// Layered configuration for pvsite
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub backend_url: ConfigValue<String>,
    pub shapefile: ConfigValue<PathBuf>,
    pub lclu_dir: ConfigValue<PathBuf>,
    pub s2_dir: ConfigValue<PathBuf>,
    pub aux_dir: ConfigValue<PathBuf>,
    pub years: ConfigValue<Vec<i32>>,
    pub min_patch_size: ConfigValue<f64>,
    pub lclu_buffer: ConfigValue<f64>,
    pub max_cloud_cover: ConfigValue<u8>,
    pub temporal_statistics: ConfigValue<bool>,
    pub session_cache_capacity: ConfigValue<usize>,
    pub udf: ConfigValue<Option<String>>,
    pub inference_url: ConfigValue<String>,
    pub dependencies_url: ConfigValue<String>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub credentials: Option<Credentials>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        Self {
            backend_url: ConfigValue::new("https://openeo.cloud".to_string(), ConfigSource::Default),
            shapefile: ConfigValue::new(
                PathBuf::from("germany_photovoltaic.shp"),
                ConfigSource::Default,
            ),
            lclu_dir: ConfigValue::new(PathBuf::from("data/lclu"), ConfigSource::Default),
            s2_dir: ConfigValue::new(PathBuf::from("data/s2/patches"), ConfigSource::Default),
            aux_dir: ConfigValue::new(PathBuf::from("aux_files"), ConfigSource::Default),
            years: ConfigValue::new(vec![2022], ConfigSource::Default),
            min_patch_size: ConfigValue::new(5120.0, ConfigSource::Default),
            lclu_buffer: ConfigValue::new(20.0, ConfigSource::Default),
            max_cloud_cover: ConfigValue::new(65, ConfigSource::Default),
            temporal_statistics: ConfigValue::new(true, ConfigSource::Default),
            session_cache_capacity: ConfigValue::new(6, ConfigSource::Default),
            udf: ConfigValue::new(None, ConfigSource::Default),
            inference_url: ConfigValue::new(
                DEFAULT_INFERENCE_URL.to_string(),
                ConfigSource::Default,
            ),
            dependencies_url: ConfigValue::new(
                DEFAULT_DEPENDENCIES_URL.to_string(),
                ConfigSource::Default,
            ),
            poll_interval_secs: ConfigValue::new(30, ConfigSource::Default),
            credentials: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| PvsiteError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| PvsiteError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        let source = ConfigSource::File;
        if let Some(v) = file_config.backend_url {
            self.backend_url.update(v, source);
        }
        if let Some(v) = file_config.shapefile {
            self.shapefile.update(v, source);
        }
        if let Some(v) = file_config.lclu_dir {
            self.lclu_dir.update(v, source);
        }
        if let Some(v) = file_config.s2_dir {
            self.s2_dir.update(v, source);
        }
        if let Some(v) = file_config.aux_dir {
            self.aux_dir.update(v, source);
        }
        if let Some(v) = file_config.years {
            self.years.update(v, source);
        }
        if let Some(v) = file_config.min_patch_size {
            self.min_patch_size.update(v, source);
        }
        if let Some(v) = file_config.lclu_buffer {
            self.lclu_buffer.update(v, source);
        }
        if let Some(v) = file_config.max_cloud_cover {
            self.max_cloud_cover.update(v, source);
        }
        if let Some(v) = file_config.temporal_statistics {
            self.temporal_statistics.update(v, source);
        }
        if let Some(v) = file_config.session_cache_capacity {
            self.session_cache_capacity.update(v, source);
        }
        if let Some(v) = file_config.udf {
            self.udf.update(Some(v), source);
        }
        if let Some(v) = file_config.inference_url {
            self.inference_url.update(v, source);
        }
        if let Some(v) = file_config.dependencies_url {
            self.dependencies_url.update(v, source);
        }
        if let Some(v) = file_config.poll_interval_secs {
            self.poll_interval_secs.update(v, source);
        }

        self.validate()?;
        Ok(self)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        let source = ConfigSource::Environment;

        if let Ok(url) = env::var("PVSITE_BACKEND_URL") {
            self.backend_url.update(url, source);
        }

        if let Ok(path) = env::var("PVSITE_SHAPEFILE") {
            self.shapefile.update(PathBuf::from(path), source);
        }

        if let Ok(path) = env::var("PVSITE_LCLU_DIR") {
            self.lclu_dir.update(PathBuf::from(path), source);
        }

        if let Ok(path) = env::var("PVSITE_S2_DIR") {
            self.s2_dir.update(PathBuf::from(path), source);
        }

        if let Ok(path) = env::var("PVSITE_AUX_DIR") {
            self.aux_dir.update(PathBuf::from(path), source);
        }

        if let Ok(years_str) = env::var("PVSITE_YEARS") {
            match parse_years(&years_str) {
                Ok(years) => self.years.update(years, source),
                Err(_) => tracing::warn!(
                    "Invalid PVSITE_YEARS value '{}': expected comma separated years",
                    years_str
                ),
            }
        }

        if let Ok(size_str) = env::var("PVSITE_MIN_PATCH_SIZE") {
            match size_str.parse::<f64>() {
                Ok(size) if size > 0.0 => self.min_patch_size.update(size, source),
                _ => tracing::warn!(
                    "Invalid PVSITE_MIN_PATCH_SIZE value '{}': expected positive number of meters",
                    size_str
                ),
            }
        }

        if let Ok(cc_str) = env::var("PVSITE_MAX_CLOUD_COVER") {
            match cc_str.parse::<u8>() {
                Ok(cc) if cc <= 100 => self.max_cloud_cover.update(cc, source),
                _ => tracing::warn!(
                    "Invalid PVSITE_MAX_CLOUD_COVER value '{}': expected percentage 0-100",
                    cc_str
                ),
            }
        }

        if let Ok(udf) = env::var("PVSITE_UDF") {
            self.udf.update(Some(udf), source);
        }

        if let Ok(url) = env::var("PVSITE_INFERENCE_URL") {
            self.inference_url.update(url, source);
        }

        if let Ok(token) = env::var("PVSITE_TOKEN") {
            self.credentials = Some(Credentials::Bearer(token));
        } else if let (Ok(username), Ok(password)) =
            (env::var("PVSITE_USERNAME"), env::var("PVSITE_PASSWORD"))
        {
            self.credentials = Some(Credentials::Basic { username, password });
        }

        self
    }

    /// Update configuration from CLI arguments
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        let source = ConfigSource::Cli;

        if let Some(url) = overrides.backend_url {
            self.backend_url.update(url, source);
        }

        if let Some(path) = overrides.shapefile {
            self.shapefile.update(path, source);
        }

        if let Some(years) = overrides.years {
            self.years.update(years, source);
        }

        if let Some(size) = overrides.min_patch_size {
            self.min_patch_size.update(size, source);
        }

        if let Some(udf) = overrides.udf {
            self.udf.update(Some(udf), source);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.years.value.is_empty() {
            return Err(PvsiteError::ConfigInvalid {
                key: "years".to_string(),
                reason: "At least one year is required".to_string(),
            });
        }
        if !(self.min_patch_size.value > 0.0) {
            return Err(PvsiteError::ConfigInvalid {
                key: "min_patch_size".to_string(),
                reason: format!("Expected a positive size, got {}", self.min_patch_size.value),
            });
        }
        if self.max_cloud_cover.value > 100 {
            return Err(PvsiteError::ConfigInvalid {
                key: "max_cloud_cover".to_string(),
                reason: format!("Expected a percentage, got {}", self.max_cloud_cover.value),
            });
        }
        if self.session_cache_capacity.value == 0 {
            return Err(PvsiteError::ConfigInvalid {
                key: "session_cache_capacity".to_string(),
                reason: "Capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Path of the valid-index memo file
    pub fn valid_index_path(&self) -> PathBuf {
        self.aux_dir.value.join("LCLU_valid_idx.txt")
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> BTreeMap<String, (String, ConfigSource)> {
        let mut map = BTreeMap::new();

        map.insert(
            "backend_url".to_string(),
            (self.backend_url.value.clone(), self.backend_url.source),
        );
        map.insert(
            "shapefile".to_string(),
            (self.shapefile.value.display().to_string(), self.shapefile.source),
        );
        map.insert(
            "lclu_dir".to_string(),
            (self.lclu_dir.value.display().to_string(), self.lclu_dir.source),
        );
        map.insert(
            "s2_dir".to_string(),
            (self.s2_dir.value.display().to_string(), self.s2_dir.source),
        );
        map.insert(
            "aux_dir".to_string(),
            (self.aux_dir.value.display().to_string(), self.aux_dir.source),
        );
        map.insert(
            "years".to_string(),
            (
                self.years.value.iter().map(i32::to_string).collect::<Vec<_>>().join(","),
                self.years.source,
            ),
        );
        map.insert(
            "min_patch_size".to_string(),
            (format!("{} m", self.min_patch_size.value), self.min_patch_size.source),
        );
        map.insert(
            "max_cloud_cover".to_string(),
            (format!("{}%", self.max_cloud_cover.value), self.max_cloud_cover.source),
        );
        map.insert(
            "udf".to_string(),
            (self.udf.value.clone().unwrap_or_else(|| "(unset)".to_string()), self.udf.source),
        );
        map.insert(
            "inference_url".to_string(),
            (self.inference_url.value.clone(), self.inference_url.source),
        );

        map
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
struct FileConfig {
    backend_url: Option<String>,
    shapefile: Option<PathBuf>,
    lclu_dir: Option<PathBuf>,
    s2_dir: Option<PathBuf>,
    aux_dir: Option<PathBuf>,
    years: Option<Vec<i32>>,
    min_patch_size: Option<f64>,
    lclu_buffer: Option<f64>,
    max_cloud_cover: Option<u8>,
    temporal_statistics: Option<bool>,
    session_cache_capacity: Option<usize>,
    udf: Option<String>,
    inference_url: Option<String>,
    dependencies_url: Option<String>,
    poll_interval_secs: Option<u64>,
}

/// CLI configuration overrides
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub backend_url: Option<String>,
    pub shapefile: Option<PathBuf>,
    pub years: Option<Vec<i32>>,
    pub min_patch_size: Option<f64>,
    pub udf: Option<String>,
}

/// Parse a comma separated list of years
pub fn parse_years(s: &str) -> Result<Vec<i32>> {
    let years = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i32>().map_err(|_| PvsiteError::ConfigInvalid {
                key: "years".to_string(),
                reason: format!("Invalid year: {}", part),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if years.is_empty() {
        return Err(PvsiteError::ConfigInvalid {
            key: "years".to_string(),
            reason: "At least one year is required".to_string(),
        });
    }

    Ok(years)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LayeredConfig::with_defaults();
        assert_eq!(config.backend_url.value, "https://openeo.cloud");
        assert_eq!(config.backend_url.source, ConfigSource::Default);
        assert_eq!(config.years.value, vec![2022]);
        assert_eq!(config.min_patch_size.value, 5120.0);
        assert_eq!(config.max_cloud_cover.value, 65);
        assert_eq!(config.session_cache_capacity.value, 6);
        assert!(config.udf.value.is_none());
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_config_precedence() {
        let mut value = ConfigValue::new(100, ConfigSource::Default);

        value.update(200, ConfigSource::File);
        assert_eq!(value.value, 200);
        assert_eq!(value.source, ConfigSource::File);

        value.update(300, ConfigSource::Environment);
        assert_eq!(value.value, 300);

        value.update(400, ConfigSource::Cli);
        assert_eq!(value.value, 400);
        assert_eq!(value.source, ConfigSource::Cli);

        // Lower precedence should not override
        value.update(500, ConfigSource::File);
        assert_eq!(value.value, 400);
        assert_eq!(value.source, ConfigSource::Cli);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
backend_url = "https://openeo.dataspace.copernicus.eu/openeo/1.2"
years = [2021, 2022]
min_patch_size = 2560.0
s2_dir = "/data/s2"
udf = "udf_rf_onnx.py"
"#
        )
        .unwrap();

        let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

        assert_eq!(config.backend_url.value, "https://openeo.dataspace.copernicus.eu/openeo/1.2");
        assert_eq!(config.backend_url.source, ConfigSource::File);
        assert_eq!(config.years.value, vec![2021, 2022]);
        assert_eq!(config.min_patch_size.value, 2560.0);
        assert_eq!(config.s2_dir.value, PathBuf::from("/data/s2"));
        assert_eq!(config.udf.value.as_deref(), Some("udf_rf_onnx.py"));
        assert_eq!(config.lclu_dir.source, ConfigSource::Default);
    }

    #[test]
    fn test_file_rejects_empty_years() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "years = []").unwrap();

        let result = LayeredConfig::with_defaults().load_from_file(file.path());
        assert!(matches!(result, Err(PvsiteError::ConfigInvalid { ref key, .. }) if key == "years"));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = LayeredConfig::with_defaults();

        config.update_from_cli(CliConfigOverrides {
            years: Some(vec![2020]),
            min_patch_size: Some(1280.0),
            ..Default::default()
        });

        assert_eq!(config.years.value, vec![2020]);
        assert_eq!(config.years.source, ConfigSource::Cli);
        assert_eq!(config.min_patch_size.value, 1280.0);
        assert_eq!(config.backend_url.source, ConfigSource::Default);
    }

    #[test]
    fn test_parse_years() {
        assert_eq!(parse_years("2022").unwrap(), vec![2022]);
        assert_eq!(parse_years("2021, 2022,").unwrap(), vec![2021, 2022]);
        assert!(parse_years("twenty").is_err());
        assert!(parse_years(" , ").is_err());
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let creds = Credentials::Basic {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_inspection_map() {
        let config = LayeredConfig::with_defaults();
        let map = config.to_inspection_map();

        let (years, source) = &map["years"];
        assert_eq!(years, "2022");
        assert_eq!(*source, ConfigSource::Default);
        assert_eq!(map["udf"].0, "(unset)");
    }
}
