use crate::error::{ClientError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Separator used in resource identity strings.
pub const ID_SEPARATOR: char = '|';

// ============================================================================
// Protocol enums
// ============================================================================

/// Defines a protocol enum with its wire code and Kafka spelling.
///
/// Parsing is case-insensitive and ignores `_`/`-`, so `CLUSTER_ACTION`,
/// `cluster-action` and `ClusterAction` all resolve to the same variant.
macro_rules! kafka_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($variant:ident = $code:literal => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire code of this value.
            pub fn code(self) -> i8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Value for a wire code, `None` for codes this client does not model.
            pub fn from_code(code: i8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ClientError;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = normalize(s);
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| normalize(v.as_str()) == wanted)
                    .ok_or_else(|| ClientError::InvalidAcl {
                        field: $field,
                        value: s.to_string(),
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

kafka_enum! {
    /// Operation an ACL grants or denies
    AclOperation, "operation" {
        Any = 1 => "Any",
        All = 2 => "All",
        Read = 3 => "Read",
        Write = 4 => "Write",
        Create = 5 => "Create",
        Delete = 6 => "Delete",
        Alter = 7 => "Alter",
        Describe = 8 => "Describe",
        ClusterAction = 9 => "ClusterAction",
        DescribeConfigs = 10 => "DescribeConfigs",
        AlterConfigs = 11 => "AlterConfigs",
        IdempotentWrite = 12 => "IdempotentWrite",
        CreateTokens = 13 => "CreateTokens",
        DescribeTokens = 14 => "DescribeTokens",
    }
}

kafka_enum! {
    /// Whether an ACL allows or denies its operation
    AclPermissionType, "permission_type" {
        Any = 1 => "Any",
        Deny = 2 => "Deny",
        Allow = 3 => "Allow",
    }
}

kafka_enum! {
    /// Kind of resource an ACL is bound to
    AclResourceType, "resource_type" {
        Any = 1 => "Any",
        Topic = 2 => "Topic",
        Group = 3 => "Group",
        Cluster = 4 => "Cluster",
        TransactionalId = 5 => "TransactionalID",
        DelegationToken = 6 => "DelegationToken",
        User = 7 => "User",
    }
}

kafka_enum! {
    /// How an ACL resource name is matched
    AclPatternType, "pattern_type_filter" {
        Any = 1 => "Any",
        Match = 2 => "Match",
        Literal = 3 => "Literal",
        Prefixed = 4 => "Prefixed",
    }
}

impl AclResourceType {
    /// Resource types covered by a full ACL scan.
    pub const SCANNED: [AclResourceType; 4] = [
        AclResourceType::Topic,
        AclResourceType::Group,
        AclResourceType::Cluster,
        AclResourceType::TransactionalId,
    ];
}

// ============================================================================
// Topics
// ============================================================================

/// A topic as declared by the caller or read back from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    /// Explicitly set configuration; `None` values inherit the broker default
    #[serde(default)]
    pub config: BTreeMap<String, Option<String>>,
}

impl Topic {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), Some(value.into()));
        self
    }

    pub fn id(&self) -> &str {
        &self.name
    }

    /// Config entries with a concrete value
    pub fn set_config(&self) -> impl Iterator<Item = (&str, &str)> {
        self.config
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }
}

// ============================================================================
// ACLs
// ============================================================================

/// An ACL as submitted by a caller, with enum fields still in text form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclSpec {
    pub principal: String,
    pub host: String,
    pub operation: String,
    pub permission_type: String,
    pub resource_type: String,
    pub resource_name: String,
    pub pattern_type_filter: String,
}

impl AclSpec {
    /// Resolve every enum field, naming the first one that is not recognised.
    pub fn to_binding(&self) -> Result<AclBinding> {
        Ok(AclBinding {
            resource: AclResource {
                resource_type: self.resource_type.parse()?,
                name: self.resource_name.clone(),
                pattern_type: self.pattern_type_filter.parse()?,
            },
            entry: AclEntry {
                principal: self.principal.clone(),
                host: self.host.clone(),
                operation: self.operation.parse()?,
                permission_type: self.permission_type.parse()?,
            },
        })
    }
}

/// Resource pattern an ACL is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclResource {
    pub resource_type: AclResourceType,
    pub name: String,
    pub pattern_type: AclPatternType,
}

/// Principal/host/operation/permission part of an ACL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub principal: String,
    pub host: String,
    pub operation: AclOperation,
    pub permission_type: AclPermissionType,
}

/// A fully resolved ACL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclBinding {
    pub resource: AclResource,
    pub entry: AclEntry,
}

/// ACLs bound to one resource pattern, as returned by DescribeAcls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAcls {
    pub resource: AclResource,
    pub acls: Vec<AclEntry>,
}

impl AclBinding {
    /// `principal|host|operation|permission|resource_type|resource_name|pattern_type`
    pub fn id(&self) -> String {
        [
            self.entry.principal.as_str(),
            self.entry.host.as_str(),
            self.entry.operation.as_str(),
            self.entry.permission_type.as_str(),
            self.resource.resource_type.as_str(),
            self.resource.name.as_str(),
            self.resource.pattern_type.as_str(),
        ]
        .join("|")
    }
}

impl fmt::Display for AclBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for AclBinding {
    type Err = ClientError;

    /// Parse an identity string produced by [`AclBinding::id`].
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(ID_SEPARATOR).collect();
        let [principal, host, operation, permission, resource_type, name, pattern] =
            parts.as_slice()
        else {
            return Err(ClientError::InvalidAcl {
                field: "id",
                value: s.to_string(),
            });
        };
        AclSpec {
            principal: principal.to_string(),
            host: host.to_string(),
            operation: operation.to_string(),
            permission_type: permission.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: name.to_string(),
            pattern_type_filter: pattern.to_string(),
        }
        .to_binding()
    }
}

// ============================================================================
// Quotas
// ============================================================================

/// Entity kinds a client quota can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaEntityType {
    User,
    ClientId,
    Ip,
}

impl QuotaEntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaEntityType::User => "user",
            QuotaEntityType::ClientId => "client-id",
            QuotaEntityType::Ip => "ip",
        }
    }
}

impl fmt::Display for QuotaEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaEntityType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(QuotaEntityType::User),
            "client-id" => Ok(QuotaEntityType::ClientId),
            "ip" => Ok(QuotaEntityType::Ip),
            other => Err(ClientError::InvalidConfig(format!(
                "unknown quota entity type '{}'",
                other
            ))),
        }
    }
}

impl Serialize for QuotaEntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QuotaEntityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One key of a quota alteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaOp {
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub remove: bool,
}

/// A named bucket of client quota limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub entity_type: QuotaEntityType,
    /// Empty for the default entity of `entity_type`
    pub entity_name: String,
    pub ops: Vec<QuotaOp>,
}

impl Quota {
    pub fn new(entity_type: QuotaEntityType, entity_name: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_name: entity_name.into(),
            ops: Vec::new(),
        }
    }

    pub fn with_limit(mut self, key: impl Into<String>, value: f64) -> Self {
        self.ops.push(QuotaOp {
            key: key.into(),
            value,
            remove: false,
        });
        self
    }

    /// `entity_name|entity_type`
    pub fn id(&self) -> String {
        quota_id(&self.entity_name, self.entity_type)
    }

    /// Same entity with every key marked for removal
    pub fn removal(&self) -> Quota {
        Quota {
            entity_type: self.entity_type,
            entity_name: self.entity_name.clone(),
            ops: self
                .ops
                .iter()
                .map(|op| QuotaOp {
                    key: op.key.clone(),
                    value: op.value,
                    remove: true,
                })
                .collect(),
        }
    }

    /// Value currently set for `key`
    pub fn limit(&self, key: &str) -> Option<f64> {
        self.ops
            .iter()
            .find(|op| op.key == key && !op.remove)
            .map(|op| op.value)
    }
}

pub fn quota_id(entity_name: &str, entity_type: QuotaEntityType) -> String {
    format!("{}{}{}", entity_name, ID_SEPARATOR, entity_type)
}

// ============================================================================
// SCRAM credentials
// ============================================================================

/// SCRAM hash mechanisms supported by Kafka
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramMechanism {
    Sha256,
    Sha512,
}

impl ScramMechanism {
    pub fn code(self) -> i8 {
        match self {
            ScramMechanism::Sha256 => 1,
            ScramMechanism::Sha512 => 2,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            1 => Some(ScramMechanism::Sha256),
            2 => Some(ScramMechanism::Sha512),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
            ScramMechanism::Sha512 => "SCRAM-SHA-512",
        }
    }
}

impl fmt::Display for ScramMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScramMechanism {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SCRAM-SHA-256" => Ok(ScramMechanism::Sha256),
            "SCRAM-SHA-512" => Ok(ScramMechanism::Sha512),
            _ => Err(ClientError::InvalidConfig(format!(
                "unknown SCRAM mechanism '{}'",
                s
            ))),
        }
    }
}

impl Serialize for ScramMechanism {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ScramMechanism {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A SCRAM credential to upsert; the password is write-only
#[derive(Clone, Serialize, Deserialize)]
pub struct UserScramCredential {
    pub username: String,
    pub mechanism: ScramMechanism,
    pub iterations: i32,
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for UserScramCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserScramCredential")
            .field("username", &self.username)
            .field("mechanism", &self.mechanism)
            .field("iterations", &self.iterations)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl UserScramCredential {
    /// `username|mechanism`
    pub fn id(&self) -> String {
        scram_id(&self.username, self.mechanism)
    }
}

/// What the cluster reports back about a user's SCRAM credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScramCredentialInfo {
    pub mechanism: ScramMechanism,
    pub iterations: i32,
}

/// All SCRAM credentials of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScramCredentials {
    pub username: String,
    pub credentials: Vec<ScramCredentialInfo>,
}

impl UserScramCredentials {
    pub fn mechanism(&self, mechanism: ScramMechanism) -> Option<&ScramCredentialInfo> {
        self.credentials.iter().find(|c| c.mechanism == mechanism)
    }
}

pub fn scram_id(username: &str, mechanism: ScramMechanism) -> String {
    format!("{}{}{}", username, ID_SEPARATOR, mechanism)
}
