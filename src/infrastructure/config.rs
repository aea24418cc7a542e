// Service configuration loaded from config/analysis and RTA_ environment overrides
use crate::domain::channels::AxisId;
use crate::engine::anomaly::DEFAULT_CONTAMINATION;
use crate::engine::clustering::{DEFAULT_CLUSTERS, DEFAULT_SEED};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

const DEFAULT_SAMPLE_LIMIT: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("analysis axis must be positive")]
    ZeroAxis,
    #[error("contamination {0} must lie in (0, 1)")]
    Contamination(f64),
    #[error("cluster count must be positive")]
    ZeroClusters,
    #[error("sample limit must be positive or \"unlimited\"")]
    ZeroSampleLimit,
    #[error("unrecognized sample limit {0:?}")]
    SampleLimitKeyword(String),
    #[error("source kind is influx but no [influx] section is configured")]
    MissingInflux,
}

/// Row cap for the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSampleLimit")]
pub enum SampleLimit {
    Rows(usize),
    Unlimited,
}

impl SampleLimit {
    pub fn rows(self) -> Option<usize> {
        match self {
            SampleLimit::Rows(n) => Some(n),
            SampleLimit::Unlimited => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSampleLimit {
    Rows(u64),
    Keyword(String),
}

impl TryFrom<RawSampleLimit> for SampleLimit {
    type Error = ConfigError;

    fn try_from(raw: RawSampleLimit) -> Result<Self, Self::Error> {
        match raw {
            RawSampleLimit::Rows(n) => Ok(SampleLimit::Rows(n as usize)),
            RawSampleLimit::Keyword(word) if word.eq_ignore_ascii_case("unlimited") => {
                Ok(SampleLimit::Unlimited)
            }
            // environment overrides arrive as strings
            RawSampleLimit::Keyword(word) => word
                .trim()
                .parse::<usize>()
                .map(SampleLimit::Rows)
                .map_err(|_| ConfigError::SampleLimitKeyword(word)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub axis: u32,
    pub sample_limit: SampleLimit,
    pub contamination: f64,
    pub clusters: usize,
    pub seed: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            axis: 1,
            sample_limit: SampleLimit::Rows(DEFAULT_SAMPLE_LIMIT),
            contamination: DEFAULT_CONTAMINATION,
            clusters: DEFAULT_CLUSTERS,
            seed: DEFAULT_SEED,
        }
    }
}

impl AnalysisSettings {
    /// The configured focus axis; `validate` guarantees it is positive.
    pub fn axis(&self) -> Option<AxisId> {
        AxisId::new(self.axis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axis == 0 {
            return Err(ConfigError::ZeroAxis);
        }
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(ConfigError::Contamination(self.contamination));
        }
        if self.clusters == 0 {
            return Err(ConfigError::ZeroClusters);
        }
        if self.sample_limit == SampleLimit::Rows(0) {
            return Err(ConfigError::ZeroSampleLimit);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Synthetic,
    Influx,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Robot instances in generated traces.
    pub robots: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            robots: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
}

fn default_measurement() -> String {
    "trace_data".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub source: SourceSettings,
    pub influx: Option<InfluxSettings>,
    #[serde(default)]
    pub server: ServerSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;
        if self.source.kind == SourceKind::Influx && self.influx.is_none() {
            return Err(ConfigError::MissingInflux);
        }
        Ok(())
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/analysis").required(false))
        .add_source(
            config::Environment::with_prefix("RTA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    settings_from(builder)
}

fn settings_from(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> anyhow::Result<Settings> {
    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> anyhow::Result<Settings> {
        settings_from(
            config::Config::builder()
                .add_source(config::File::from_str(toml, config::FileFormat::Toml)),
        )
    }

    #[test]
    fn test_prepare_query() {
        let mut vars = HashMap::new();
        vars.insert("measurement".to_string(), "trace_data".to_string());
        vars.insert("limit".to_string(), "500".to_string());

        let query = "SELECT * FROM ${measurement} LIMIT ${limit}";
        let result = prepare_query(query, &vars);

        assert_eq!(result, "SELECT * FROM trace_data LIMIT 500");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.analysis.axis, 1);
        assert_eq!(settings.analysis.sample_limit.rows(), Some(1000));
        assert_eq!(settings.analysis.clusters, 5);
        assert_eq!(settings.analysis.seed, 42);
        assert_eq!(settings.source.kind, SourceKind::Synthetic);
        assert_eq!(settings.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_full_config() {
        let settings = from_toml(
            r#"
            [analysis]
            axis = 3
            sample_limit = "unlimited"
            contamination = 0.05
            clusters = 4
            seed = 7

            [source]
            kind = "influx"

            [influx]
            host = "http://localhost:8086"
            token = "secret"
            database = "robot_db"
            retention_policy = "autogen"
            "#,
        )
        .unwrap();

        assert_eq!(settings.analysis.axis().map(AxisId::get), Some(3));
        assert_eq!(settings.analysis.sample_limit, SampleLimit::Unlimited);
        assert_eq!(settings.source.kind, SourceKind::Influx);
        assert_eq!(settings.influx.unwrap().measurement, "trace_data");
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            ("[analysis]\naxis = 0", ConfigError::ZeroAxis),
            ("[analysis]\ncontamination = 1.0", ConfigError::Contamination(1.0)),
            ("[analysis]\nclusters = 0", ConfigError::ZeroClusters),
            ("[analysis]\nsample_limit = 0", ConfigError::ZeroSampleLimit),
            ("[source]\nkind = \"influx\"", ConfigError::MissingInflux),
        ];
        for (toml, expected) in cases {
            let err = from_toml(toml).unwrap_err();
            assert_eq!(err.downcast_ref::<ConfigError>(), Some(&expected), "{toml}");
        }
    }

    #[test]
    fn test_contamination_accepts_open_unit_interval() {
        let settings = from_toml("[analysis]\ncontamination = 0.7").unwrap();
        assert_eq!(settings.analysis.contamination, 0.7);
        let err = from_toml("[analysis]\ncontamination = 0.0").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::Contamination(0.0))
        );
    }

    #[test]
    fn test_sample_limit_from_string() {
        let limit = SampleLimit::try_from(RawSampleLimit::Keyword("250".to_string())).unwrap();
        assert_eq!(limit, SampleLimit::Rows(250));
        assert!(SampleLimit::try_from(RawSampleLimit::Keyword("lots".to_string())).is_err());
    }
}
