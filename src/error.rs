use kafka_protocol::error::ResponseError;
use thiserror::Error;

/// Result type alias for reconciliation client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Broker error codes this client branches on.
pub mod codes {
    pub const NONE: i16 = 0;
    pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
    pub const UNSUPPORTED_VERSION: i16 = 35;
    pub const TOPIC_ALREADY_EXISTS: i16 = 36;
    pub const INVALID_PARTITIONS: i16 = 37;
    pub const INVALID_REPLICATION_FACTOR: i16 = 38;
    pub const NOT_CONTROLLER: i16 = 41;
    pub const INVALID_REQUEST: i16 = 42;
    pub const SECURITY_DISABLED: i16 = 54;
    pub const SASL_AUTHENTICATION_FAILED: i16 = 58;
    pub const RESOURCE_NOT_FOUND: i16 = 91;
}

/// Errors that can occur in the reconciliation client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every bootstrap endpoint refused us
    #[error("No brokers available, tried: {}", attempted.join(", "))]
    NoBrokersAvailable { attempted: Vec<String> },

    /// Metadata did not name a usable controller
    #[error("Controller unavailable: {0}")]
    ControllerUnavailable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TLS setup failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// SASL handshake or authentication failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Frame could not be encoded or decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Neither side can agree on a request version
    #[error("Unsupported version for {api}: broker supports {broker_min}..={broker_max}, client supports {client_min}..={client_max}")]
    UnsupportedVersion {
        api: String,
        broker_min: i16,
        broker_max: i16,
        client_min: i16,
        client_max: i16,
    },

    /// Non-zero error code reported by the broker
    #[error("Broker error {code} ({name}): {message}")]
    Broker {
        code: i16,
        name: String,
        message: String,
    },

    /// Network timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A poll-to-converge loop ran out of time
    #[error("Timed out after {timeout_ms}ms waiting for {resource} to become visible")]
    ReconcileTimeout { resource: String, timeout_ms: u64 },

    /// Topic does not exist
    #[error("Topic not found: {topic}")]
    TopicMissing { topic: String },

    /// No ACL matches the identity
    #[error("ACL not found: {acl}")]
    AclMissing { acl: String },

    /// Quota entity has no entries
    #[error("Quota not found: {entity}")]
    QuotaMissing { entity: String },

    /// User has no SCRAM credentials for the mechanism
    #[error("SCRAM credential not found: {user}")]
    UserScramCredentialMissing { user: String },

    /// Unrecognised ACL enum string
    #[error("Invalid ACL {field}: '{value}'")]
    InvalidAcl { field: &'static str, value: String },

    /// Partitions of a topic disagree on replica count
    #[error("Inconsistent replication on topic {topic}: {detail}")]
    InconsistentReplication { topic: String, detail: String },

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Internal client error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout { timeout_ms: 0 }
    }
}

impl ClientError {
    /// Build a broker error from a response error code, or `None` when the
    /// code signals success.
    pub fn from_code(code: i16, message: Option<&str>) -> Option<Self> {
        if code == codes::NONE {
            return None;
        }
        let name = ResponseError::try_from_code(code)
            .map(|e| format!("{:?}", e))
            .unwrap_or_else(|| "Unknown".to_string());
        let message = match message {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => ResponseError::try_from_code(code)
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("error code {}", code)),
        };
        Some(ClientError::Broker {
            code,
            name,
            message,
        })
    }

    /// Turn a response error code into `Err` when non-zero.
    pub fn check(code: i16, message: Option<&str>) -> Result<()> {
        match Self::from_code(code, message) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Broker error code, if this error came from a response.
    pub fn code(&self) -> Option<i16> {
        match self {
            ClientError::Broker { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the error means "the resource does not exist".
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            ClientError::TopicMissing { .. }
                | ClientError::AclMissing { .. }
                | ClientError::QuotaMissing { .. }
                | ClientError::UserScramCredentialMissing { .. }
        )
    }

    /// Get the error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::Connection(_) | ClientError::NoBrokersAvailable { .. } => "connection",
            ClientError::ControllerUnavailable(_) => "controller",
            ClientError::InvalidConfig(_) => "configuration",
            ClientError::Tls(_) => "tls",
            ClientError::Authentication(_) => "authentication",
            ClientError::Protocol(_) | ClientError::UnsupportedVersion { .. } => "protocol",
            ClientError::Broker { .. } => "broker",
            ClientError::Timeout { .. } | ClientError::ReconcileTimeout { .. } => "timeout",
            ClientError::TopicMissing { .. }
            | ClientError::AclMissing { .. }
            | ClientError::QuotaMissing { .. }
            | ClientError::UserScramCredentialMissing { .. } => "not_found",
            ClientError::InvalidAcl { .. } => "validation",
            ClientError::InconsistentReplication { .. } => "consistency",
            ClientError::InvalidOperation(_) => "invalid_operation",
            ClientError::Internal(_) => "internal",
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Connection(_)
            | ClientError::NoBrokersAvailable { .. }
            | ClientError::ControllerUnavailable(_)
            | ClientError::Timeout { .. } => true,

            ClientError::Broker { code, .. } => *code == codes::NOT_CONTROLLER,

            _ => false,
        }
    }
}

/// Outcome of a read against the cluster: the resource is there or it is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// Folds missing-resource errors into [`Lookup::NotFound`].
pub trait ResultExt<T> {
    fn found(self) -> Result<Lookup<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn found(self) -> Result<Lookup<T>> {
        match self {
            Ok(value) => Ok(Lookup::Found(value)),
            Err(err) if err.is_missing() => Ok(Lookup::NotFound),
            Err(err) => Err(err),
        }
    }
}
