use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the server.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "routeserver".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where stored objects (networks, tables, grids) are read from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Root directory. Objects live at `<root>/<organization>/<object_id>`.
    pub root: PathBuf,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
        }
    }
}

/// Sizing of the background task pool.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct TaskConfig {
    /// Number of background tasks that execute at the same time.
    ///
    /// This is kept small so that long running computations do not starve request handling.
    ///
    /// Defaults to `4`.
    pub worker_threads: usize,

    /// The maximum number of tasks that are queued or running at any point in time.
    ///
    /// Further submissions are rejected until some tasks finish. A value of `None` indicates
    /// no limit.
    ///
    /// Defaults to `100`.
    pub max_pending_tasks: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_pending_tasks: Some(100),
        }
    }
}

/// Default throttling of progress events.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ProgressConfig {
    /// Upper bound for the number of step events a single task emits.
    ///
    /// Defaults to `100`.
    pub max_events: u64,

    /// Minimum time between two step events of the same task.
    ///
    /// Defaults to `100ms`.
    #[serde(with = "humantime_serde")]
    pub min_time_between_events: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_events: 100,
            min_time_between_events: Duration::from_millis(100),
        }
    }
}

/// Capacities of the in-memory routing data caches.
///
/// These hold very large objects, so capacities are counted in entries rather than bytes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Number of transport networks kept in memory. Defaults to `2`.
    pub networks: usize,
    /// Number of egress tables kept in memory. Defaults to `2`.
    pub egress_tables: usize,
    /// Number of opportunity grids kept in memory. Defaults to `4`.
    pub grids: usize,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        Self {
            networks: 2,
            egress_tables: 2,
            grids: 4,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Location of the object store.
    pub object_store: ObjectStoreConfig,

    /// Background task pool.
    pub tasks: TaskConfig,

    /// Progress event throttling.
    pub progress: ProgressConfig,

    /// In-memory cache capacities.
    pub caches: CacheConfigs,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:7070".to_owned(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            object_store: ObjectStoreConfig::default(),
            tasks: TaskConfig::default(),
            progress: ProgressConfig::default(),
            caches: CacheConfigs::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Config =
            serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        if config.tasks.worker_threads == 0 {
            anyhow::bail!("tasks.worker_threads must be at least 1");
        }
        Ok(config)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.tasks.worker_threads, 4);
        assert_eq!(cfg.tasks.max_pending_tasks, Some(100));
        assert_eq!(cfg.progress.max_events, 100);
        assert_eq!(
            cfg.progress.min_time_between_events,
            Duration::from_millis(100)
        );
        assert_eq!(cfg.caches, CacheConfigs::default());
    }

    #[test]
    fn test_partial_sections() {
        // Setting one value must not reset its siblings to zero.
        let yaml = r#"
            caches:
              grids: 8
            progress:
              min_time_between_events: 1s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.grids, 8);
        assert_eq!(cfg.caches.networks, 2);
        assert_eq!(cfg.caches.egress_tables, 2);
        assert_eq!(cfg.progress.min_time_between_events, Duration::from_secs(1));
        assert_eq!(cfg.progress.max_events, 100);
    }

    #[test]
    fn test_unbounded_pending_tasks() {
        let yaml = r#"
            tasks:
              max_pending_tasks: null
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.tasks.max_pending_tasks, None);
        assert_eq!(cfg.tasks.worker_threads, 4);
    }

    #[test]
    fn test_zero_workers() {
        let yaml = r#"
            tasks:
              worker_threads: 0
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_log_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: chatty
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_cache: 12
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
