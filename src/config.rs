//! Runtime configuration.
//!
//! [`ConsumerConfig`] is a plain struct handed to [`ConsumerApp::new`].
//! Reading it from the environment is a separate, optional step:
//!
//! ```ignore
//! let config = ConsumerConfig::from_env()?;          // reads .env + process env
//! let config = ConsumerConfig::default()             // or build it directly
//!     .with_default_group("task-worker")
//!     .with_max_batch_size(20);
//! ```
//!
//! [`ConsumerApp::new`]: crate::ConsumerApp::new

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::subscription::Subscription;
use crate::transport::Credentials;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_LEASE_RENEWAL_DURATION: Duration = Duration::from_secs(300);

/// Environment variable names read by [`ConsumerConfig::from_env`].
pub mod env {
    pub const DEFAULT_SUBSCRIPTION_NAME: &str = "DEFAULT_SUBSCRIPTION_NAME";
    pub const MAX_MESSAGE_COUNT: &str = "MAX_MESSAGE_COUNT";
    pub const MAX_WAIT_TIME: &str = "MAX_WAIT_TIME";
    pub const MAX_LOCK_RENEWAL_DURATION: &str = "MAX_LOCK_RENEWAL_DURATION";
    pub const HANDLER_TIMEOUT: &str = "HANDLER_TIMEOUT";
    pub const SUBSCRIBER_FILTER: &str = "SUBSCRIBER_FILTER";
    pub const SERVICE_BUS_CONNECTION_STRING: &str = "SERVICE_BUS_CONNECTION_STRING";
    pub const SERVICE_BUS_NAMESPACE: &str = "SERVICE_BUS_NAMESPACE";
    pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
    pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
    pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";
    pub const AZURE_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
}

/// App-wide defaults and connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Group used by subscriptions that do not name one.
    pub default_group: Option<String>,
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
    pub max_lease_renewal_duration: Duration,
    /// Default per-message handler timeout. `None` lets a handler run until
    /// the broker's lease gives up on it.
    pub handler_timeout: Option<Duration>,
    /// Used by `run` when it is not given a filter.
    pub filter: Option<SubscriptionFilter>,
    pub connection: ConnectionSettings,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            default_group: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
            max_lease_renewal_duration: DEFAULT_MAX_LEASE_RENEWAL_DURATION,
            handler_timeout: None,
            filter: None,
            connection: ConnectionSettings::default(),
        }
    }
}

impl ConsumerConfig {
    /// Load `.env` (with the `dotenv` feature) and read the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        #[cfg(feature = "dotenv")]
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Unset, empty and zero values
    /// fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            default_group: get(env::DEFAULT_SUBSCRIPTION_NAME),
            max_batch_size: parse_count(env::MAX_MESSAGE_COUNT, get(env::MAX_MESSAGE_COUNT))?
                .unwrap_or(defaults.max_batch_size),
            max_wait_time: parse_seconds(env::MAX_WAIT_TIME, get(env::MAX_WAIT_TIME))?
                .unwrap_or(defaults.max_wait_time),
            max_lease_renewal_duration: parse_seconds(
                env::MAX_LOCK_RENEWAL_DURATION,
                get(env::MAX_LOCK_RENEWAL_DURATION),
            )?
            .unwrap_or(defaults.max_lease_renewal_duration),
            handler_timeout: parse_seconds(env::HANDLER_TIMEOUT, get(env::HANDLER_TIMEOUT))?,
            filter: get(env::SUBSCRIBER_FILTER)
                .map(|v| v.parse::<SubscriptionFilter>())
                .transpose()?,
            connection: ConnectionSettings {
                connection_string: get(env::SERVICE_BUS_CONNECTION_STRING),
                namespace: get(env::SERVICE_BUS_NAMESPACE),
                client_id: get(env::AZURE_CLIENT_ID),
                tenant_id: get(env::AZURE_TENANT_ID),
                authority_host: get(env::AZURE_AUTHORITY_HOST),
                federated_token_file: get(env::AZURE_FEDERATED_TOKEN_FILE),
            },
        })
    }

    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = Some(group.into());
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = wait;
        self
    }

    pub fn with_max_lease_renewal_duration(mut self, duration: Duration) -> Self {
        self.max_lease_renewal_duration = duration;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn with_filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }
}

/// Broker connection settings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub connection_string: Option<String>,
    pub namespace: Option<String>,
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub authority_host: Option<String>,
    pub federated_token_file: Option<String>,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("namespace", &self.namespace)
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("authority_host", &self.authority_host)
            .field("federated_token_file", &self.federated_token_file)
            .finish()
    }
}

impl ConnectionSettings {
    /// Workload identity wins when all of its values are present; otherwise
    /// the connection string; otherwise nothing.
    pub fn credentials(&self) -> Credentials {
        if let (Some(client_id), Some(tenant_id), Some(authority_host), Some(token_file)) = (
            &self.client_id,
            &self.tenant_id,
            &self.authority_host,
            &self.federated_token_file,
        ) {
            return Credentials::WorkloadIdentity {
                namespace: self.namespace.clone().unwrap_or_default(),
                client_id: client_id.clone(),
                tenant_id: tenant_id.clone(),
                authority_host: authority_host.clone(),
                token_file: token_file.clone(),
            };
        }

        match &self.connection_string {
            Some(conn) => Credentials::ConnectionString(conn.clone()),
            None => Credentials::None,
        }
    }
}

/// Set of `"<stream>|<group>"` keys selecting which subscriptions run.
///
/// ```
/// use topic_consumer::SubscriptionFilter;
///
/// let filter: SubscriptionFilter = "task-created|g1, task-updated|g1".parse().unwrap();
/// assert!(filter.matches("task-created", "g1"));
/// assert!(!filter.matches("task-created", "g2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    keys: HashSet<String>,
}

impl SubscriptionFilter {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, stream: &str, group: &str) -> bool {
        self.keys.contains(&format!("{}|{}", stream, group))
    }

    pub fn allows(&self, subscription: &Subscription) -> bool {
        self.matches(subscription.stream_id(), subscription.group_id())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromStr for SubscriptionFilter {
    type Err = ConfigError;

    /// Comma-separated `stream|group` entries; blanks are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut keys = HashSet::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('|') {
                Some((stream, group))
                    if !stream.trim().is_empty()
                        && !group.trim().is_empty()
                        && !group.contains('|') =>
                {
                    keys.insert(format!("{}|{}", stream.trim(), group.trim()));
                }
                _ => return Err(ConfigError::InvalidFilter(entry.to_string())),
            }
        }
        Ok(Self { keys })
    }
}

// Zero counts as unset, so the default applies.
fn parse_count(key: &str, value: Option<String>) -> Result<Option<usize>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<usize>() {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(invalid(key, &value, &e.to_string())),
    }
}

// Whole seconds; zero counts as unset.
fn parse_seconds(key: &str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(e) => Err(invalid(key, &value, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
