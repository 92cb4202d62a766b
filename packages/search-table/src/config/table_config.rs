//! Table configuration
//!
//! Options use the dotted names of the store definition (`bulk.actions`,
//! `flush.interval`, ...). A config can be read from a flat option map (the
//! shape host annotations arrive in) or from YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::error::{ConfigError, ConfigResult};
use crate::domain::models::{SemanticType, TableDefinition};
use crate::domain::schema::validate_overrides;

pub const OPT_INDEX_NAME: &str = "index.name";
pub const OPT_PAYLOAD_INDEX_OF_INDEX_NAME: &str = "payload.index.of.index.name";
pub const OPT_INDEX_ALIAS: &str = "index.alias";
pub const OPT_NUMBER_OF_SHARDS: &str = "index.number.of.shards";
pub const OPT_NUMBER_OF_REPLICAS: &str = "index.number.of.replicas";
pub const OPT_BULK_ACTIONS: &str = "bulk.actions";
pub const OPT_BULK_SIZE: &str = "bulk.size";
pub const OPT_CONCURRENT_REQUESTS: &str = "concurrent.requests";
pub const OPT_FLUSH_INTERVAL: &str = "flush.interval";
pub const OPT_BACKOFF_POLICY: &str = "backoff.policy";
pub const OPT_BACKOFF_RETRY_NO: &str = "backoff.policy.retry.no";
pub const OPT_BACKOFF_WAIT_TIME: &str = "backoff.policy.wait.time";
pub const OPT_HOSTNAME: &str = "hostname";
pub const OPT_PORT: &str = "port";
pub const OPT_SCHEME: &str = "scheme";
pub const OPT_MEMBER_LIST: &str = "elasticsearch.member.list";
pub const OPT_USERNAME: &str = "username";
pub const OPT_PASSWORD: &str = "password";
pub const OPT_SSL_ENABLED: &str = "ssl.enabled";
pub const OPT_TRUST_STORE_PATH: &str = "trust.store.path";
pub const OPT_CONNECTION_TIMEOUT: &str = "connection.timeout";
pub const OPT_SOCKET_TIMEOUT: &str = "socket.timeout";

/// Flat-map prefix of a per-attribute type override (`type.mapping.price = scaled_float`)
pub const TYPE_MAPPING_PREFIX: &str = "type.mapping.";

pub const KNOWN_OPTIONS: &[&str] = &[
    OPT_INDEX_NAME,
    OPT_PAYLOAD_INDEX_OF_INDEX_NAME,
    OPT_INDEX_ALIAS,
    OPT_NUMBER_OF_SHARDS,
    OPT_NUMBER_OF_REPLICAS,
    OPT_BULK_ACTIONS,
    OPT_BULK_SIZE,
    OPT_CONCURRENT_REQUESTS,
    OPT_FLUSH_INTERVAL,
    OPT_BACKOFF_POLICY,
    OPT_BACKOFF_RETRY_NO,
    OPT_BACKOFF_WAIT_TIME,
    OPT_HOSTNAME,
    OPT_PORT,
    OPT_SCHEME,
    OPT_MEMBER_LIST,
    OPT_USERNAME,
    OPT_PASSWORD,
    OPT_SSL_ENABLED,
    OPT_TRUST_STORE_PATH,
    OPT_CONNECTION_TIMEOUT,
    OPT_SOCKET_TIMEOUT,
];

/// Retry policy name as configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackoffPolicyKind {
    ConstantBackoff,
    ExponentialBackoff,
    Disable,
}

impl BackoffPolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffPolicyKind::ConstantBackoff => "constantBackoff",
            BackoffPolicyKind::ExponentialBackoff => "exponentialBackoff",
            BackoffPolicyKind::Disable => "disable",
        }
    }
}

impl FromStr for BackoffPolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("constantBackoff") {
            Ok(BackoffPolicyKind::ConstantBackoff)
        } else if s.eq_ignore_ascii_case("exponentialBackoff") {
            Ok(BackoffPolicyKind::ExponentialBackoff)
        } else if s.eq_ignore_ascii_case("disable") {
            Ok(BackoffPolicyKind::Disable)
        } else {
            Err(ConfigError::UnknownBackoffPolicy(s.to_string()))
        }
    }
}

impl TryFrom<String> for BackoffPolicyKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackoffPolicyKind> for String {
    fn from(kind: BackoffPolicyKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for BackoffPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Table configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    /// Fixed target index (defaults to the table id)
    #[serde(rename = "index.name", skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,

    /// Record position holding the target index name (-1 = disabled)
    #[serde(rename = "payload.index.of.index.name")]
    pub payload_index_of_index_name: i64,

    /// Alias attached when an index is created
    #[serde(rename = "index.alias", skip_serializing_if = "Option::is_none")]
    pub index_alias: Option<String>,

    #[serde(rename = "index.number.of.shards")]
    pub number_of_shards: u32,

    #[serde(rename = "index.number.of.replicas")]
    pub number_of_replicas: u32,

    /// Operation count that triggers a dispatch (<= 0 disables)
    #[serde(rename = "bulk.actions")]
    pub bulk_actions: i64,

    /// Payload size in MB that triggers a dispatch (<= 0 disables)
    #[serde(rename = "bulk.size")]
    pub bulk_size_mb: i64,

    /// Dispatches allowed in flight (0 = one at a time)
    #[serde(rename = "concurrent.requests")]
    pub concurrent_requests: usize,

    /// Max batch age in seconds (0 disables)
    #[serde(rename = "flush.interval")]
    pub flush_interval_secs: u64,

    #[serde(rename = "backoff.policy")]
    pub backoff_policy: BackoffPolicyKind,

    #[serde(rename = "backoff.policy.retry.no")]
    pub backoff_retry_no: u32,

    /// Base retry delay in seconds
    #[serde(rename = "backoff.policy.wait.time")]
    pub backoff_wait_time_secs: u64,

    /// Attribute name → backend field type
    #[serde(rename = "type.mappings", skip_serializing_if = "BTreeMap::is_empty")]
    pub type_mappings: BTreeMap<String, String>,

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Connection
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    pub hostname: String,

    pub port: u16,

    pub scheme: String,

    /// Comma separated host urls; replaces hostname/port/scheme when set
    #[serde(rename = "elasticsearch.member.list", skip_serializing_if = "Option::is_none")]
    pub member_list: Option<String>,

    pub username: String,

    pub password: String,

    #[serde(rename = "ssl.enabled")]
    pub ssl_enabled: bool,

    /// PEM encoded trust material
    #[serde(rename = "trust.store.path", skip_serializing_if = "Option::is_none")]
    pub trust_store_path: Option<PathBuf>,

    /// Milliseconds
    #[serde(rename = "connection.timeout")]
    pub connection_timeout_ms: u64,

    /// Milliseconds
    #[serde(rename = "socket.timeout")]
    pub socket_timeout_ms: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            index_name: None,
            payload_index_of_index_name: -1,
            index_alias: None,
            number_of_shards: 3,
            number_of_replicas: 2,
            bulk_actions: 1,
            bulk_size_mb: 1,
            concurrent_requests: 0,
            flush_interval_secs: 10,
            backoff_policy: BackoffPolicyKind::ConstantBackoff,
            backoff_retry_no: 3,
            backoff_wait_time_secs: 1,
            type_mappings: BTreeMap::new(),
            hostname: "localhost".to_string(),
            port: 9200,
            scheme: "http".to_string(),
            member_list: None,
            username: "elastic".to_string(),
            password: "changeme".to_string(),
            ssl_enabled: false,
            trust_store_path: None,
            connection_timeout_ms: 5_000,
            socket_timeout_ms: 60_000,
        }
    }
}

impl TableConfig {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Loading
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Build from flat `option = value` pairs; unset options keep defaults
    pub fn from_options<I, K, V>(options: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.set_option(key.as_ref().trim(), value.as_ref().trim())?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply one option; empty values leave optional settings unset
    pub fn set_option(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        if let Some(attribute) = key.strip_prefix(TYPE_MAPPING_PREFIX) {
            if attribute.is_empty() || value.is_empty() {
                return Err(ConfigError::invalid_value(key, value, "a field type"));
            }
            self.type_mappings
                .insert(attribute.to_string(), value.to_string());
            return Ok(());
        }

        match key {
            OPT_INDEX_NAME => self.index_name = non_empty(value),
            OPT_PAYLOAD_INDEX_OF_INDEX_NAME => {
                self.payload_index_of_index_name = parse(key, value, "an integer")?
            }
            OPT_INDEX_ALIAS => self.index_alias = non_empty(value),
            OPT_NUMBER_OF_SHARDS => self.number_of_shards = parse(key, value, "a positive integer")?,
            OPT_NUMBER_OF_REPLICAS => {
                self.number_of_replicas = parse(key, value, "a non-negative integer")?
            }
            OPT_BULK_ACTIONS => self.bulk_actions = parse(key, value, "an integer")?,
            OPT_BULK_SIZE => self.bulk_size_mb = parse(key, value, "an integer (MB)")?,
            OPT_CONCURRENT_REQUESTS => {
                self.concurrent_requests = parse(key, value, "a non-negative integer")?
            }
            OPT_FLUSH_INTERVAL => {
                self.flush_interval_secs = parse(key, value, "a number of seconds")?
            }
            OPT_BACKOFF_POLICY => self.backoff_policy = value.parse()?,
            OPT_BACKOFF_RETRY_NO => {
                self.backoff_retry_no = parse(key, value, "a non-negative integer")?
            }
            OPT_BACKOFF_WAIT_TIME => {
                self.backoff_wait_time_secs = parse(key, value, "a number of seconds")?
            }
            OPT_HOSTNAME => self.hostname = value.to_string(),
            OPT_PORT => self.port = parse(key, value, "a port number")?,
            OPT_SCHEME => self.scheme = value.to_string(),
            OPT_MEMBER_LIST => self.member_list = non_empty(value),
            OPT_USERNAME => self.username = value.to_string(),
            OPT_PASSWORD => self.password = value.to_string(),
            OPT_SSL_ENABLED => self.ssl_enabled = parse(key, value, "true or false")?,
            OPT_TRUST_STORE_PATH => self.trust_store_path = non_empty(value).map(PathBuf::from),
            OPT_CONNECTION_TIMEOUT => {
                self.connection_timeout_ms = parse(key, value, "milliseconds")?
            }
            OPT_SOCKET_TIMEOUT => self.socket_timeout_ms = parse(key, value, "milliseconds")?,
            unknown => {
                return Err(ConfigError::unknown_option_with_suggestion(
                    unknown,
                    KNOWN_OPTIONS,
                ))
            }
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Builder helpers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    pub fn payload_index_of_index_name(mut self, position: usize) -> Self {
        self.payload_index_of_index_name = position as i64;
        self
    }

    pub fn index_alias(mut self, alias: impl Into<String>) -> Self {
        self.index_alias = Some(alias.into());
        self
    }

    pub fn bulk_actions(mut self, actions: i64) -> Self {
        self.bulk_actions = actions;
        self
    }

    pub fn bulk_size_mb(mut self, mb: i64) -> Self {
        self.bulk_size_mb = mb;
        self
    }

    pub fn concurrent_requests(mut self, requests: usize) -> Self {
        self.concurrent_requests = requests;
        self
    }

    pub fn flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    pub fn backoff(mut self, kind: BackoffPolicyKind, retries: u32, wait_secs: u64) -> Self {
        self.backoff_policy = kind;
        self.backoff_retry_no = retries;
        self.backoff_wait_time_secs = wait_secs;
        self
    }

    pub fn type_mapping(mut self, attribute: impl Into<String>, field_type: impl Into<String>) -> Self {
        self.type_mappings.insert(attribute.into(), field_type.into());
        self
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Derived settings
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn bulk_actions_threshold(&self) -> Option<usize> {
        (self.bulk_actions > 0).then_some(self.bulk_actions as usize)
    }

    pub fn bulk_size_bytes(&self) -> Option<usize> {
        (self.bulk_size_mb > 0).then(|| (self.bulk_size_mb as usize).saturating_mul(1024 * 1024))
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }

    /// Dispatch permits; `concurrent.requests = 0` still allows one
    pub fn max_in_flight(&self) -> usize {
        self.concurrent_requests.max(1)
    }

    pub fn payload_index_position(&self) -> Option<usize> {
        (self.payload_index_of_index_name >= 0).then_some(self.payload_index_of_index_name as usize)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Validation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Validate option ranges and combinations
    pub fn validate(&self) -> ConfigResult<()> {
        if self.number_of_shards < 1 || self.number_of_shards > 1024 {
            return Err(ConfigError::range_with_hint(
                OPT_NUMBER_OF_SHARDS,
                self.number_of_shards,
                1,
                1024,
                "An index needs at least one primary shard",
            ));
        }

        if self.number_of_replicas > 64 {
            return Err(ConfigError::range_with_hint(
                OPT_NUMBER_OF_REPLICAS,
                self.number_of_replicas,
                0,
                64,
                "Replica count must be reasonable",
            ));
        }

        if self.payload_index_of_index_name < -1 {
            return Err(ConfigError::range_with_hint(
                OPT_PAYLOAD_INDEX_OF_INDEX_NAME,
                self.payload_index_of_index_name,
                -1,
                i64::MAX,
                "Use -1 to disable payload index routing",
            ));
        }

        if self.concurrent_requests > 256 {
            return Err(ConfigError::range_with_hint(
                OPT_CONCURRENT_REQUESTS,
                self.concurrent_requests,
                0,
                256,
                "Concurrent requests must be reasonable (0 = one at a time)",
            ));
        }

        if self.backoff_retry_no > 100 {
            return Err(ConfigError::range_with_hint(
                OPT_BACKOFF_RETRY_NO,
                self.backoff_retry_no,
                0,
                100,
                "Retry count must be reasonable",
            ));
        }

        if self.index_name.is_some() && self.payload_index_position().is_some() {
            return Err(ConfigError::Conflict {
                first: OPT_INDEX_NAME.to_string(),
                second: OPT_PAYLOAD_INDEX_OF_INDEX_NAME.to_string(),
                hint: "A table routes either to a fixed index or by record payload".to_string(),
            });
        }

        if self.ssl_enabled && self.trust_store_path.is_none() {
            return Err(ConfigError::Missing {
                option: OPT_TRUST_STORE_PATH.to_string(),
                reason: "a trust store is required when ssl.enabled is true".to_string(),
            });
        }

        if self.connection_timeout_ms == 0 || self.socket_timeout_ms == 0 {
            return Err(ConfigError::Custom(format!(
                "'{}' and '{}' must be greater than zero",
                OPT_CONNECTION_TIMEOUT, OPT_SOCKET_TIMEOUT
            )));
        }

        Ok(())
    }

    /// Validate options that refer to the table's attributes
    pub fn validate_for(&self, definition: &TableDefinition) -> ConfigResult<()> {
        validate_overrides(&definition.schema, &self.type_mappings)?;

        if let Some(position) = self.payload_index_position() {
            match definition.schema.get(position) {
                None => {
                    return Err(ConfigError::range_with_hint(
                        OPT_PAYLOAD_INDEX_OF_INDEX_NAME,
                        position,
                        0,
                        definition.schema.len().saturating_sub(1),
                        "Position must point at a table attribute",
                    ))
                }
                Some(attribute) if attribute.semantic_type != SemanticType::String => {
                    return Err(ConfigError::invalid_value(
                        OPT_PAYLOAD_INDEX_OF_INDEX_NAME,
                        position.to_string(),
                        format!(
                            "a string attribute, but '{}' is {}",
                            attribute.name, attribute.semantic_type
                        ),
                    ))
                }
                Some(_) => {}
            }
        }

        for key in &definition.primary_keys {
            if !definition.schema.contains(key) {
                return Err(ConfigError::UnknownAttribute {
                    option: "primary key".to_string(),
                    attribute: key.clone(),
                });
            }
        }

        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse<T: FromStr>(option: &str, value: &str, expected: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid_value(option, value, expected))
}
