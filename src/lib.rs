//! Control-plane client that reconciles Kafka topics, ACLs, client quotas and
//! SCRAM credentials against a declared state.

pub mod acl;
pub mod client;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod lazy;
pub mod poll;
pub mod quota;
pub mod security;
pub mod topic;
pub mod types;

pub use acl::{AclClient, AclSnapshot, CacheMetrics};
pub use client::KafkaClient;
pub use config::{ClusterConfig, SaslConfig, SaslMechanismKind, TlsConfig};
pub use connection::{ClusterMetadata, ConnectionManager, TcpTransport, Transport};
pub use credential::CredentialClient;
pub use error::{ClientError, Lookup, Result, ResultExt};
pub use lazy::{InitStatus, LazyClient};
pub use quota::QuotaClient;
pub use topic::TopicClient;
pub use types::{
    AclBinding, AclEntry, AclOperation, AclPatternType, AclPermissionType, AclResource,
    AclResourceType, AclSpec, Quota, QuotaEntityType, QuotaOp, ResourceAcls, ScramCredentialInfo,
    ScramMechanism, Topic, UserScramCredential, UserScramCredentials,
};
