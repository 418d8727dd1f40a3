//! Operator configuration
//!
//! [`OperatorConfig`] is built from defaults plus `with_*` overrides, or
//! from parsed command-line arguments via [`OperatorConfig::from_args`].

use std::time::Duration;

use clap::{value_parser, Arg, ArgMatches, Command};
use gingersnap_reconcile::{Client, ConflictPolicy};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Unknown `--apply-conflict-policy`
    #[error("invalid apply conflict policy: {0}")]
    ConflictPolicy(String),

    /// Unknown `--log-format`
    #[error("invalid log format '{0}', expected 'text' or 'json'")]
    LogFormat(String),

    /// Non-positive attempt timeout
    #[error("attempt timeout must be at least one second")]
    ZeroTimeout,

    /// Backoff base exceeds its cap
    #[error("backoff base {base:?} exceeds maximum {max:?}")]
    Backoff {
        /// Initial delay
        base: Duration,
        /// Delay cap
        max: Duration,
    },
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::LogFormat(s.to_string())),
        }
    }
}

/// Container images of the managed workloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Images {
    /// Infinispan server
    pub infinispan: String,
    /// Redis server
    pub redis: String,
    /// Db-syncer
    pub db_syncer: String,
}

impl Images {
    const INFINISPAN: &'static str = "quay.io/infinispan/server:14.0";
    const REDIS: &'static str = "docker.io/library/redis:7.0";
    const DB_SYNCER: &'static str = "quay.io/gingersnap/db-syncer:latest";
}

impl Default for Images {
    fn default() -> Self {
        Self {
            infinispan: Self::INFINISPAN.to_string(),
            redis: Self::REDIS.to_string(),
            db_syncer: Self::DB_SYNCER.to_string(),
        }
    }
}

/// Per-key exponential backoff for failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base: Duration,
    /// Delay cap
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
        }
    }
}

/// Operator configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch, `None` for all namespaces
    pub watch_namespace: Option<String>,
    /// Server-side apply field manager
    pub field_manager: String,
    /// What apply does on field ownership conflicts
    pub conflict_policy: ConflictPolicy,
    /// Upper bound for one reconciliation attempt
    pub attempt_timeout: Duration,
    /// Failure backoff
    pub backoff: BackoffConfig,
    /// Log output format
    pub log_format: LogFormat,
    /// Workload images
    pub images: Images,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            field_manager: Client::DEFAULT_FIELD_MANAGER.to_string(),
            conflict_policy: ConflictPolicy::Fail,
            attempt_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            log_format: LogFormat::Text,
            images: Images::default(),
        }
    }
}

impl OperatorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch a single namespace
    #[inline]
    #[must_use]
    pub fn with_watch_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.watch_namespace = Some(namespace.into());
        self
    }

    /// With field manager and conflict policy
    #[inline]
    #[must_use]
    pub fn with_field_manager(mut self, manager: impl Into<String>, policy: ConflictPolicy) -> Self {
        self.field_manager = manager.into();
        self.conflict_policy = policy;
        self
    }

    /// With attempt timeout
    #[inline]
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// With failure backoff
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// With workload images
    #[inline]
    #[must_use]
    pub fn with_images(mut self, images: Images) -> Self {
        self.images = images;
        self
    }

    /// Arguments understood by [`OperatorConfig::from_args`]
    #[must_use]
    pub fn args() -> Vec<Arg> {
        vec![
            Arg::new("namespace")
                .long("namespace")
                .env("GINGERSNAP_WATCH_NAMESPACE")
                .help("Only watch resources in this namespace"),
            Arg::new("field-manager")
                .long("field-manager")
                .default_value(Client::DEFAULT_FIELD_MANAGER)
                .help("Field manager used for server-side apply"),
            Arg::new("apply-conflict-policy")
                .long("apply-conflict-policy")
                .default_value("fail")
                .value_parser(["fail", "force"])
                .help("Whether apply fails or takes ownership on field conflicts"),
            Arg::new("attempt-timeout-secs")
                .long("attempt-timeout-secs")
                .default_value("30")
                .value_parser(value_parser!(u64))
                .help("Deadline for a single reconciliation attempt"),
            Arg::new("backoff-base-ms")
                .long("backoff-base-ms")
                .default_value("500")
                .value_parser(value_parser!(u64))
                .help("Requeue delay after the first failed attempt"),
            Arg::new("backoff-max-secs")
                .long("backoff-max-secs")
                .default_value("300")
                .value_parser(value_parser!(u64))
                .help("Maximum requeue delay after failed attempts"),
            Arg::new("log-format")
                .long("log-format")
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
            Arg::new("infinispan-image")
                .long("infinispan-image")
                .default_value(Images::INFINISPAN)
                .help("Infinispan server image"),
            Arg::new("redis-image")
                .long("redis-image")
                .default_value(Images::REDIS)
                .help("Redis server image"),
            Arg::new("db-syncer-image")
                .long("db-syncer-image")
                .default_value(Images::DB_SYNCER)
                .help("Db-syncer image"),
        ]
    }

    /// Register the configuration arguments on `command`
    #[must_use]
    pub fn augment(command: Command) -> Command {
        command.args(Self::args())
    }

    /// Build the configuration from parsed arguments
    ///
    /// # Errors
    /// Returns `ConfigError` for values that parse but make no sense.
    pub fn from_args(matches: &ArgMatches) -> Result<Self, ConfigError> {
        let string = |id: &str| matches.get_one::<String>(id).cloned();
        let number = |id: &str| matches.get_one::<u64>(id).copied();
        let defaults = Self::default();

        let conflict_policy = match string("apply-conflict-policy") {
            Some(policy) => policy.parse().map_err(ConfigError::ConflictPolicy)?,
            None => defaults.conflict_policy,
        };
        let log_format = match string("log-format") {
            Some(format) => format.parse()?,
            None => defaults.log_format,
        };

        let attempt_timeout = number("attempt-timeout-secs").map_or(defaults.attempt_timeout, Duration::from_secs);
        if attempt_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        let backoff = BackoffConfig {
            base: number("backoff-base-ms").map_or(defaults.backoff.base, Duration::from_millis),
            max: number("backoff-max-secs").map_or(defaults.backoff.max, Duration::from_secs),
        };
        if backoff.base > backoff.max {
            return Err(ConfigError::Backoff {
                base: backoff.base,
                max: backoff.max,
            });
        }

        Ok(Self {
            watch_namespace: string("namespace").filter(|ns| !ns.is_empty()),
            field_manager: string("field-manager").unwrap_or(defaults.field_manager),
            conflict_policy,
            attempt_timeout,
            backoff,
            log_format,
            images: Images {
                infinispan: string("infinispan-image").unwrap_or(defaults.images.infinispan),
                redis: string("redis-image").unwrap_or(defaults.images.redis),
                db_syncer: string("db-syncer-image").unwrap_or(defaults.images.db_syncer),
            },
        })
    }
}
