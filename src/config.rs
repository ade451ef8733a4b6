use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host-name fragment carried by managed serverless bootstrap endpoints.
const SERVERLESS_HOST_MARKER: &str = "kafka-serverless";

/// Cluster connection settings for the reconciliation client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Bootstrap endpoints, tried in order
    pub bootstrap_servers: Vec<String>,

    /// Client ID sent in every request header
    pub client_id: Option<String>,

    /// Per-request timeout, also bounds the create-then-poll loops
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Delay before the first poll of a poll-to-converge loop
    #[serde(with = "duration_millis")]
    pub poll_delay: Duration,

    /// Interval between polls of a poll-to-converge loop
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// TLS settings; `None` means plaintext
    pub tls: Option<TlsConfig>,

    /// SASL settings; `None` means no authentication
    pub sasl: Option<SaslConfig>,

    /// Treat failed teardown alterations as success
    pub force_delete: bool,
}

/// TLS configuration for broker connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA certificate PEM data
    pub ca_cert: Option<String>,

    /// CA certificate PEM file; read when set
    pub ca_cert_file: Option<PathBuf>,

    /// Client certificate PEM data (for mTLS)
    pub client_cert: Option<String>,

    /// Client private key PEM data (for mTLS)
    pub client_key: Option<String>,

    /// Server name for SNI and certificate verification
    pub server_name: Option<String>,

    /// Skip certificate verification (insecure, dev only)
    pub insecure_skip_verify: bool,
}

/// SASL mechanisms with built-in support
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SaslMechanismKind {
    #[serde(rename = "PLAIN", alias = "plain")]
    Plain,
    #[serde(rename = "SCRAM-SHA-256", alias = "scram-sha256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512", alias = "scram-sha512")]
    ScramSha512,
}

/// SASL username/password credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct SaslConfig {
    pub mechanism: SaslMechanismKind,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            client_id: None,
            timeout: Duration::from_secs(120),
            poll_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            tls: None,
            sasl: None,
            force_delete: false,
        }
    }
}

impl ClusterConfig {
    /// Create a configuration for the given bootstrap endpoints
    pub fn new<I, S>(bootstrap_servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bootstrap_servers: bootstrap_servers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_polling(mut self, delay: Duration, interval: Duration) -> Self {
        self.poll_delay = delay;
        self.poll_interval = interval;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_sasl(mut self, sasl: SaslConfig) -> Self {
        self.sasl = Some(sasl);
        self
    }

    pub fn with_force_delete(mut self, force_delete: bool) -> Self {
        self.force_delete = force_delete;
        self
    }

    /// Load a configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: ClusterConfig =
            toml::from_str(&content).map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(ClientError::InvalidConfig(
                "bootstrap_servers cannot be empty".to_string(),
            ));
        }

        if let Some(bad) = self.bootstrap_servers.iter().find(|s| !s.contains(':')) {
            return Err(ClientError::InvalidConfig(format!(
                "bootstrap server '{}' must be host:port",
                bad
            )));
        }

        if self.timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        if let Some(sasl) = &self.sasl {
            if sasl.username.is_empty() {
                return Err(ClientError::InvalidConfig(
                    "sasl.username cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Whether the bootstrap endpoints point at a managed serverless cluster,
    /// which rejects alterations of `cleanup.policy`.
    pub fn is_serverless(&self) -> bool {
        self.bootstrap_servers
            .iter()
            .any(|server| server.contains(SERVERLESS_HOST_MARKER))
    }

    /// Client ID sent to brokers
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("kafka-reconcile")
    }
}

impl TlsConfig {
    /// Check if this configuration requires client certificates
    pub fn requires_client_cert(&self) -> bool {
        self.client_cert.is_some() || self.client_key.is_some()
    }

    /// CA PEM text, read from `ca_cert_file` when a path is provided.
    pub fn ca_pem(&self) -> Result<Option<String>> {
        if let Some(path) = &self.ca_cert_file {
            let pem = std::fs::read_to_string(path).map_err(|e| {
                ClientError::Tls(format!("Cannot read CA file {}: {}", path.display(), e))
            })?;
            return Ok(Some(pem));
        }
        Ok(self.ca_cert.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(ClientError::InvalidConfig(
                "client_cert and client_key must be set together".to_string(),
            ));
        }
        if self.ca_cert.is_some() && self.ca_cert_file.is_some() {
            return Err(ClientError::InvalidConfig(
                "set only one of ca_cert and ca_cert_file".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
