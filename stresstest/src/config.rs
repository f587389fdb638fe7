//! Configuration for the stresstest.
//!
//! Configuration is loaded from the following sources, in order of precedence (highest first):
//!
//! 1. Environment variables (prefixed with `GS__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested structures, for example
//! `GS__SESSION__CATALOG=hive` or `GS__QUERIES__WEIGHTS__SHORT=0`.
//!
//! The equivalent YAML file looks like this:
//!
//! ```yaml
//! remote: http://localhost:8080
//! users: 20
//! duration: 5m
//!
//! session:
//!   dialect: trino
//!   catalog: hive
//!   client_tags: [adhoc]
//!
//! queries:
//!   short: ["show tables"]
//!   weights:
//!     long: 4
//!     short: 1
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "GS__";

/// Top-level stresstest configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the query engine or gateway, e.g. `http://localhost:8080`.
    ///
    /// The statement endpoint is resolved relative to this URL, as are server-relative
    /// continuation URIs.
    pub remote: String,

    /// How long the load test runs.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Number of simulated users, each running poll cycles sequentially.
    pub users: usize,

    /// Fixed pause between two poll cycles of the same user.
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,

    /// Seed for the query generators. A random seed is used if absent.
    pub seed: Option<u64>,

    /// Total number of GET attempts for one continuation URI while the engine answers with `5xx`.
    pub max_fetch_attempts: usize,

    /// Transport-level timeout for every single HTTP request. Unbounded if absent.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Client identity and the headers sent with every submission.
    pub session: Session,

    /// The queries that simulated users submit.
    pub queries: Queries,

    /// Optional Sentry reporting of errors.
    pub sentry: Option<SentryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "http://localhost:8080".to_owned(),
            duration: Duration::from_secs(60),
            users: 1,
            wait_time: Duration::from_secs(1),
            seed: None,
            max_fetch_attempts: 3,
            request_timeout: None,
            session: Session::default(),
            queries: Queries::default(),
            sentry: None,
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

/// The header dialect spoken by the engine.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `X-Trino-*` headers.
    #[default]
    Trino,
    /// `X-Presto-*` headers.
    Presto,
}

impl Dialect {
    /// The product name used in header names, e.g. `Trino` in `X-Trino-User`.
    pub fn header_prefix(self) -> &'static str {
        match self {
            Dialect::Trino => "X-Trino",
            Dialect::Presto => "X-Presto",
        }
    }

    fn default_source(self) -> &'static str {
        match self {
            Dialect::Trino => "trino-cli",
            Dialect::Presto => "presto-cli",
        }
    }

    fn default_user_agent(self) -> &'static str {
        match self {
            Dialect::Trino => "StatementClientV1/387",
            Dialect::Presto => "StatementClientV1/339",
        }
    }
}

/// Session properties of the simulated client.
///
/// These are constants per deployment and are sent verbatim as headers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Session {
    pub dialect: Dialect,
    pub user: String,
    /// Defaults to `trino-cli` or `presto-cli` depending on the dialect.
    pub source: Option<String>,
    /// Defaults to the CLI user agent of the dialect.
    pub user_agent: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub time_zone: String,
    pub language: String,
    pub client_tags: Vec<String>,
    /// Only sent by the Presto dialect, e.g. `PATH,PARAMETRIC_DATETIME`.
    pub client_capabilities: Option<String>,
    /// Additional headers, sent as-is.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            user: "stresstest".to_owned(),
            source: None,
            user_agent: None,
            catalog: Some("hive".to_owned()),
            schema: Some("default".to_owned()),
            time_zone: "America/New_York".to_owned(),
            language: "en".to_owned(),
            client_tags: Vec::new(),
            client_capabilities: None,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl Session {
    /// The `Source` header value, falling back to the dialect's CLI name.
    pub fn source(&self) -> &str {
        self.source
            .as_deref()
            .unwrap_or(self.dialect.default_source())
    }

    /// The `User-Agent` header value, falling back to the dialect's CLI user agent.
    pub fn user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .unwrap_or(self.dialect.default_user_agent())
    }
}

/// The queries submitted by simulated users.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Queries {
    /// Cheap metadata queries, one is picked uniformly at random.
    pub short: Vec<String>,
    /// A template for expensive scan queries.
    pub long: LongQuery,
    /// Relative frequency of long and short queries.
    pub weights: QueryWeights,
}

impl Default for Queries {
    fn default() -> Self {
        Self {
            short: vec!["show tables".to_owned(), "show schemas".to_owned()],
            long: LongQuery::default(),
            weights: QueryWeights::default(),
        }
    }
}

/// Template of a long-running query.
///
/// The placeholders `{selection}`, `{source1}` and `{source2}` are substituted with a random
/// selection and two distinct random data sources. A template without placeholders is submitted
/// verbatim.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LongQuery {
    pub template: String,
    pub selections: Vec<String>,
    pub data_sources: Vec<String>,
}

impl Default for LongQuery {
    fn default() -> Self {
        Self {
            template: "select distinct {selection} from activity \
                where data_source in ('{source1}', '{source2}')"
                .to_owned(),
            selections: vec!["source_activity_name".to_owned(), "master_id".to_owned()],
            data_sources: ["map", "map_tt", "task", "task_tt", "web", "web_tt"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Relative weights of the query kinds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryWeights {
    pub long: u32,
    pub short: u32,
}

impl Default for QueryWeights {
    fn default() -> Self {
        Self { long: 4, short: 1 }
    }
}

/// Sentry reporting.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SentryConfig {
    pub dsn: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
}

fn default_sample_rate() -> f32 {
    1.0
}
