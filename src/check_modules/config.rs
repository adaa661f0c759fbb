use crate::alerting::threshold::{
    parse_time_period, ExcludeTime, Operator, Severity, Threshold, ThresholdError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CACHE_DIR_ENV: &str = "SENSU_CACHE_DIR";
pub const LOG_FILE_ENV: &str = "SENSU_ASSET_LOG_FILE_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON from config file at {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config file format {0:?}, expected .toml or .json")]
    UnsupportedFormat(PathBuf),
    #[error("Invalid threshold #{index}: {source}")]
    InvalidThreshold {
        index: usize,
        #[source]
        source: ThresholdError,
    },
    #[error("Invalid threshold override '{0}', expected <ID>,<Y|N>[,<warn>[,<crit>[,<team>[,<Minor|Major|Crit>]]]]")]
    InvalidOverride(String),
    #[error("Check name is required")]
    MissingCheckName,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeTimeConfig {
    pub days_of_week: Option<Vec<String>>,
    pub start_time: String,
    pub end_time: String,
}

/// A threshold as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub id: Option<String>,
    pub warn_threshold: Option<f64>,
    pub crit_threshold: Option<f64>,
    pub operator: Option<String>,
    pub min_severity: Option<String>,
    pub team: Option<String>,
    pub ignore: bool,
    pub warn_occurrences: Option<u32>,
    pub crit_occurrences: Option<u32>,
    pub warn_time_seconds: Option<u64>,
    pub crit_time_seconds: Option<u64>,
    /// `<n>m` or `<n>h`; only used when `warn_time_seconds` is absent.
    pub warn_time_period: Option<String>,
    pub crit_time_period: Option<String>,
    pub exclude_times: Vec<ExcludeTimeConfig>,
    pub metadata: HashMap<String, String>,
}

fn resolve_seconds(seconds: Option<u64>, period: Option<&str>) -> Result<Option<u64>, ThresholdError> {
    match (seconds, period) {
        (Some(seconds), _) => Ok(Some(seconds)),
        (None, Some(period)) => parse_time_period(period).map(Some),
        (None, None) => Ok(None),
    }
}

impl TryFrom<ThresholdConfig> for Threshold {
    type Error = ThresholdError;

    fn try_from(config: ThresholdConfig) -> Result<Self, Self::Error> {
        let exclude_times = config
            .exclude_times
            .iter()
            .map(|window| {
                ExcludeTime::parse(
                    window.days_of_week.as_deref(),
                    &window.start_time,
                    &window.end_time,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Threshold {
            id: config.id.filter(|id| !id.is_empty()),
            warn_bound: config.warn_threshold,
            crit_bound: config.crit_threshold,
            operator: config
                .operator
                .as_deref()
                .map(str::parse::<Operator>)
                .transpose()?
                .unwrap_or_default(),
            min_severity: config
                .min_severity
                .as_deref()
                .map(str::parse::<Severity>)
                .transpose()?
                .unwrap_or_default(),
            team: config.team.filter(|team| !team.is_empty()),
            ignore: config.ignore,
            warn_time_seconds: resolve_seconds(config.warn_time_seconds, config.warn_time_period.as_deref())?,
            crit_time_seconds: resolve_seconds(config.crit_time_seconds, config.crit_time_period.as_deref())?,
            warn_occurrences: config.warn_occurrences,
            crit_occurrences: config.crit_occurrences,
            exclude_times,
            metadata: config.metadata,
        })
    }
}

/// Parses a `<ID>,<Y|N>[,<warn>[,<crit>[,<team>[,<Minor|Major|Crit>]]]]` override.
/// `Y` marks the id as ignored.
pub fn parse_threshold_override(value: &str) -> Result<Threshold, ConfigError> {
    let invalid = || ConfigError::InvalidOverride(value.to_string());
    let fields: Vec<&str> = value.split(',').collect();
    if !(2..=6).contains(&fields.len()) || fields.iter().any(|f| f.is_empty()) {
        return Err(invalid());
    }

    let ignore = match fields[1] {
        "Y" => true,
        "N" => false,
        _ => return Err(invalid()),
    };
    let bound = |index: usize| -> Result<Option<f64>, ConfigError> {
        fields
            .get(index)
            .map(|field| {
                field
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|bound| bound.is_finite())
                    .ok_or_else(invalid)
            })
            .transpose()
    };
    let min_severity: Severity = match fields.get(5) {
        Some(&("Minor" | "Major" | "Crit")) => fields[5].parse().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
        None => Severity::default(),
    };

    Ok(Threshold {
        id: Some(fields[0].to_string()),
        ignore,
        warn_bound: bound(2)?,
        crit_bound: bound(3)?,
        team: fields.get(4).map(|team| team.to_string()),
        min_severity,
        ..Default::default()
    })
}

/// Config file contents. Every field is optional; a bare list is read as `thresholds`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PartialCheckConfig {
    pub check_name: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub thresholds: Vec<ThresholdConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonConfig {
    Thresholds(Vec<ThresholdConfig>),
    Full(PartialCheckConfig),
}

impl PartialCheckConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            }),
            Some("json") => {
                let parsed: JsonConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(match parsed {
                    JsonConfig::Thresholds(thresholds) => PartialCheckConfig {
                        thresholds,
                        ..Default::default()
                    },
                    JsonConfig::Full(config) => config,
                })
            }
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Values supplied on the command line. They take precedence over everything else.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub check_name: Option<String>,
    pub cache_dir: Option<PathBuf>,
    /// Placed ahead of the file thresholds.
    pub default_threshold: Option<Threshold>,
    /// Placed after the file thresholds.
    pub threshold_overrides: Vec<Threshold>,
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub check_name: String,
    pub cache_dir: PathBuf,
    pub thresholds: Vec<Threshold>,
}

impl CheckConfig {
    /// Layers the optional config file, the environment and the CLI.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> Result<Self, ConfigError> {
        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path) if path.exists() => {
                info!(path = ?path, "Loading check config.");
                PartialCheckConfig::from_file(path)?
            }
            Some(path) => {
                debug!(path = ?path, "Config file not found, using defaults.");
                PartialCheckConfig::default()
            }
            None => PartialCheckConfig::default(),
        };

        // 2. Load from environment variables
        let env_cache_dir = std::env::var_os(CACHE_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        // 3. Merge: CLI overrides environment overrides file
        Self::merge(file_config, env_cache_dir, cli)
    }

    fn merge(
        file_config: PartialCheckConfig,
        env_cache_dir: Option<PathBuf>,
        cli: CliOverrides,
    ) -> Result<Self, ConfigError> {
        let check_name = cli
            .check_name
            .or(file_config.check_name)
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingCheckName)?;
        let cache_dir = cli
            .cache_dir
            .or(env_cache_dir)
            .or(file_config.cache_dir)
            .unwrap_or_else(default_cache_root);

        let mut thresholds: Vec<Threshold> = cli.default_threshold.into_iter().collect();
        for (index, config) in file_config.thresholds.into_iter().enumerate() {
            let threshold = Threshold::try_from(config)
                .map_err(|source| ConfigError::InvalidThreshold { index, source })?;
            thresholds.push(threshold);
        }
        thresholds.extend(cli.threshold_overrides);

        debug!(
            check_name = %check_name,
            cache_dir = ?cache_dir,
            thresholds = thresholds.len(),
            "Resolved check config."
        );
        Ok(Self {
            check_name,
            cache_dir,
            thresholds,
        })
    }
}

/// Platform location of the agent cache when nothing else is configured.
pub fn default_cache_root() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\sensu\cache\sensu-agent")
    } else if cfg!(target_os = "macos") {
        PathBuf::from("/tmp/sensu-agent")
    } else {
        PathBuf::from("/var/cache/sensu/sensu-agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(check_name: &str) -> CliOverrides {
        CliOverrides {
            check_name: Some(check_name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_threshold_config_conversion() {
        let config = ThresholdConfig {
            id: Some("/var".into()),
            warn_threshold: Some(80.0),
            crit_threshold: Some(90.0),
            operator: Some(">".into()),
            min_severity: Some("Major".into()),
            warn_time_period: Some("5m".into()),
            crit_time_seconds: Some(30),
            crit_time_period: Some("1h".into()),
            exclude_times: vec![ExcludeTimeConfig {
                days_of_week: Some(vec!["Saturday".into(), "Sunday".into()]),
                start_time: "00:00".into(),
                end_time: "06:00".into(),
            }],
            ..Default::default()
        };
        let threshold = Threshold::try_from(config).unwrap();
        assert_eq!(threshold.operator, Operator::Greater);
        assert_eq!(threshold.min_severity, Severity::Major);
        assert_eq!(threshold.warn_time_seconds, Some(300));
        assert_eq!(threshold.crit_time_seconds, Some(30));
        assert_eq!(threshold.exclude_times.len(), 1);
        assert!(threshold.is_advanced());
    }

    #[test]
    fn test_threshold_config_rejects_bad_values() {
        let bad_operator = ThresholdConfig {
            operator: Some("=>".into()),
            ..Default::default()
        };
        assert!(Threshold::try_from(bad_operator).is_err());

        let bad_severity = ThresholdConfig {
            min_severity: Some("Urgent".into()),
            ..Default::default()
        };
        assert!(Threshold::try_from(bad_severity).is_err());

        let bad_period = ThresholdConfig {
            warn_time_period: Some("10s".into()),
            ..Default::default()
        };
        assert_eq!(
            Threshold::try_from(bad_period).unwrap_err(),
            ThresholdError::InvalidTimePeriod("10s".into())
        );
    }

    #[test]
    fn test_parse_threshold_override() {
        let full = parse_threshold_override("/var,N,80,90,Storage,Crit").unwrap();
        assert_eq!(full.id.as_deref(), Some("/var"));
        assert!(!full.ignore);
        assert_eq!(full.warn_bound, Some(80.0));
        assert_eq!(full.crit_bound, Some(90.0));
        assert_eq!(full.team.as_deref(), Some("Storage"));
        assert_eq!(full.min_severity, Severity::Critical);

        let fractional = parse_threshold_override("/var,N,80.5,92.25").unwrap();
        assert_eq!(fractional.warn_bound, Some(80.5));
        assert_eq!(fractional.crit_bound, Some(92.25));

        let ignored = parse_threshold_override("/boot,Y").unwrap();
        assert!(ignored.ignore);
        assert_eq!(ignored.warn_bound, None);

        for bad in ["/var", "/var,X", "/var,N,eighty", "/var,N,inf", "/var,N,NaN", "/var,N,80,90,Team,Urgent", ",N", "/var,N,,90"] {
            assert!(parse_threshold_override(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_load_toml_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("check.toml");
        fs::write(
            &path,
            r#"
check_name = "LinuxFilesystem"
cache_dir = "/srv/cache"

[[thresholds]]
id = "/var"
warn_threshold = 80.0
warn_occurrences = 3

[[thresholds]]
crit_threshold = 95.0
metadata = { alert_type = "%" }
"#,
        )
        .unwrap();

        let config = PartialCheckConfig::from_file(&path).unwrap();
        assert_eq!(config.check_name.as_deref(), Some("LinuxFilesystem"));
        assert_eq!(config.thresholds.len(), 2);
        assert_eq!(config.thresholds[1].metadata["alert_type"], "%");
    }

    #[test]
    fn test_load_json_threshold_list() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("filesystems.json");
        fs::write(
            &path,
            r#"[{"id": "/home", "ignore": false, "warn_threshold": 70, "crit_time_period": "2h"}]"#,
        )
        .unwrap();

        let config = PartialCheckConfig::from_file(&path).unwrap();
        assert!(config.check_name.is_none());
        assert_eq!(config.thresholds[0].warn_threshold, Some(70.0));
        assert_eq!(config.thresholds[0].crit_time_period.as_deref(), Some("2h"));
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("check.yaml");
        fs::write(&path, "thresholds: []").unwrap();
        assert!(matches!(
            PartialCheckConfig::from_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_merge_precedence() {
        let file = PartialCheckConfig {
            check_name: Some("from_file".into()),
            cache_dir: Some("/file".into()),
            thresholds: vec![ThresholdConfig {
                id: Some("/var".into()),
                warn_threshold: Some(50.0),
                ..Default::default()
            }],
        };
        let overrides = CliOverrides {
            default_threshold: Some(Threshold {
                warn_bound: Some(95.0),
                ..Default::default()
            }),
            threshold_overrides: vec![parse_threshold_override("/boot,Y").unwrap()],
            ..Default::default()
        };

        let config = CheckConfig::merge(file, Some("/env".into()), overrides).unwrap();
        assert_eq!(config.check_name, "from_file");
        assert_eq!(config.cache_dir, PathBuf::from("/env"));
        let ids: Vec<_> = config.thresholds.iter().map(|t| t.id.as_deref()).collect();
        assert_eq!(ids, vec![None, Some("/var"), Some("/boot")]);

        let mut cli_wins = cli("from_cli");
        cli_wins.cache_dir = Some("/cli".into());
        let config = CheckConfig::merge(PartialCheckConfig::default(), Some("/env".into()), cli_wins).unwrap();
        assert_eq!(config.check_name, "from_cli");
        assert_eq!(config.cache_dir, PathBuf::from("/cli"));

        let config = CheckConfig::merge(PartialCheckConfig::default(), None, cli("x")).unwrap();
        assert_eq!(config.cache_dir, default_cache_root());
    }

    #[test]
    fn test_missing_check_name() {
        assert!(matches!(
            CheckConfig::merge(PartialCheckConfig::default(), None, CliOverrides::default()),
            Err(ConfigError::MissingCheckName)
        ));
    }

    #[test]
    fn test_invalid_file_threshold_reports_index() {
        let file = PartialCheckConfig {
            thresholds: vec![
                ThresholdConfig::default(),
                ThresholdConfig {
                    operator: Some("~".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        match CheckConfig::merge(file, None, cli("x")) {
            Err(ConfigError::InvalidThreshold { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
