//! In-process Kafka broker speaking the real wire protocol, for integration
//! tests. It is its own controller and keeps all cluster state in memory.

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{
    alter_client_quotas_response, alter_configs_response::AlterConfigsResourceResponse,
    alter_user_scram_credentials_response::AlterUserScramCredentialsResult,
    api_versions_response::ApiVersion, create_acls_response::AclCreationResult,
    create_partitions_response::CreatePartitionsTopicResult,
    create_topics_response::CreatableTopicResult,
    delete_acls_response::{DeleteAclsFilterResult, DeleteAclsMatchingAcl},
    delete_topics_response::DeletableTopicResult,
    describe_acls_response::{AclDescription, DescribeAclsResource},
    describe_client_quotas_response,
    describe_configs_response::{DescribeConfigsResourceResult, DescribeConfigsResult},
    describe_user_scram_credentials_response::{CredentialInfo, DescribeUserScramCredentialsResult},
    metadata_response::{MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic},
    AlterClientQuotasRequest, AlterClientQuotasResponse, AlterConfigsRequest, AlterConfigsResponse,
    AlterUserScramCredentialsRequest, AlterUserScramCredentialsResponse, ApiVersionsRequest,
    ApiVersionsResponse, BrokerId, CreateAclsRequest, CreateAclsResponse, CreatePartitionsRequest,
    CreatePartitionsResponse, CreateTopicsRequest, CreateTopicsResponse, DeleteAclsRequest,
    DeleteAclsResponse, DeleteTopicsRequest, DeleteTopicsResponse, DescribeAclsRequest,
    DescribeAclsResponse, DescribeClientQuotasRequest, DescribeClientQuotasResponse,
    DescribeConfigsRequest, DescribeConfigsResponse, DescribeUserScramCredentialsRequest,
    DescribeUserScramCredentialsResponse, MetadataRequest, MetadataResponse, RequestHeader,
    ResponseHeader, TopicName,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use kafka_reconcile::ClusterConfig;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const NONE: i16 = 0;
pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
pub const LEADER_NOT_AVAILABLE: i16 = 5;
pub const TOPIC_ALREADY_EXISTS: i16 = 36;
pub const INVALID_PARTITIONS: i16 = 37;
pub const INVALID_REPLICATION_FACTOR: i16 = 38;
pub const INVALID_REQUEST: i16 = 42;
pub const RESOURCE_NOT_FOUND: i16 = 91;

const NODE_ID: i32 = 1;
const CONFIG_SOURCE_TOPIC: i8 = 1;
const MATCH_DEFAULT: i8 = 1;
const CONFIG_SOURCE_DEFAULT: i8 = 5;
const QUOTA_KEYS: &[&str] = &[
    "producer_byte_rate",
    "consumer_byte_rate",
    "request_percentage",
    "controller_mutation_rate",
    "connection_creation_rate",
];

#[derive(Debug, Clone, PartialEq)]
pub struct MockTopic {
    /// Replica ids per partition
    pub partitions: Vec<Vec<i32>>,
    pub configs: BTreeMap<String, String>,
}

/// One stored ACL, as raw protocol codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockAcl {
    pub resource_type: i8,
    pub resource_name: String,
    pub pattern_type: i8,
    pub principal: String,
    pub host: String,
    pub operation: i8,
    pub permission_type: i8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockScram {
    pub mechanism: i8,
    pub iterations: i32,
    pub salt: Bytes,
    pub salted_password: Bytes,
}

#[derive(Debug, Default)]
pub struct ClusterState {
    pub topics: BTreeMap<String, MockTopic>,
    pub acls: Vec<MockAcl>,
    /// (entity type, entity name or `None` for the default entity) -> key -> value
    pub quotas: BTreeMap<(String, Option<String>), BTreeMap<String, f64>>,
    pub scram: BTreeMap<String, Vec<MockScram>>,
    /// Requests received, by API key
    pub requests: HashMap<i16, usize>,
    /// Number of upcoming DescribeClientQuotas calls that report nothing
    pub quota_visibility_lag: usize,
    /// Error code returned for every AlterClientQuotas entry, when set
    pub quota_alter_error: Option<i16>,
    /// Advertised controller when it is not this broker: (node id, host, port)
    pub foreign_controller: Option<(i32, String, i32)>,
    /// Lowered max versions advertised by ApiVersions, by API key
    pub max_versions: HashMap<i16, i16>,
    /// Error code reported on an existing topic in Metadata responses
    pub topic_metadata_error: Option<(String, i16)>,
}

pub struct MockKafkaBroker {
    addr: String,
    state: Arc<Mutex<ClusterState>>,
    task: JoinHandle<()>,
}

impl Drop for MockKafkaBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockKafkaBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let addr = format!("127.0.0.1:{}", local.port());
        let state = Arc::new(Mutex::new(ClusterState::default()));

        let task = {
            let state = Arc::clone(&state);
            let port = local.port() as i32;
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = Arc::clone(&state);
                    tokio::spawn(serve_connection(stream, state, port));
                }
            })
        };

        MockKafkaBroker { addr, state, task }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// Client configuration pointed at this broker, with fast polling
    pub fn config(&self) -> ClusterConfig {
        ClusterConfig::new([self.addr()])
            .with_client_id("integration-test")
            .with_timeout(Duration::from_secs(2))
            .with_polling(Duration::from_millis(5), Duration::from_millis(10))
    }

    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock()
    }

    /// Requests of this type received so far
    pub fn requests<R: Request>(&self) -> usize {
        self.state.lock().requests.get(&R::KEY).copied().unwrap_or(0)
    }

    pub fn add_topic(&self, name: &str, replicas_per_partition: &[usize]) {
        let partitions = replicas_per_partition
            .iter()
            .map(|count| (1..=*count as i32).collect())
            .collect();
        self.state.lock().topics.insert(
            name.to_string(),
            MockTopic {
                partitions,
                configs: BTreeMap::new(),
            },
        );
    }
}

async fn serve_connection(mut stream: TcpStream, state: Arc<Mutex<ClusterState>>, port: i32) {
    loop {
        let size = match stream.read_i32().await {
            Ok(size) => size,
            Err(_) => return,
        };
        let mut payload = vec![0u8; size as usize];
        if stream.read_exact(&mut payload).await.is_err() {
            return;
        }

        let payload = Bytes::from(payload);
        let key = i16::from_be_bytes([payload[0], payload[1]]);
        let version = i16::from_be_bytes([payload[2], payload[3]]);
        *state.lock().requests.entry(key).or_insert(0) += 1;

        let frame = dispatch(key, version, payload, &state, port);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn decode<R: Decodable + HeaderVersion>(mut payload: Bytes, version: i16) -> (i32, R) {
    let header = RequestHeader::decode(&mut payload, R::header_version(version)).unwrap();
    let request = R::decode(&mut payload, version).unwrap();
    (header.correlation_id, request)
}

fn encode<T: Encodable + HeaderVersion>(correlation_id: i32, version: i16, response: &T) -> BytesMut {
    let mut frame = BytesMut::new();
    frame.put_i32(0);
    ResponseHeader::default()
        .with_correlation_id(correlation_id)
        .encode(&mut frame, T::header_version(version))
        .unwrap();
    response.encode(&mut frame, version).unwrap();
    let size = (frame.len() - 4) as i32;
    frame[..4].copy_from_slice(&size.to_be_bytes());
    frame
}

macro_rules! route {
    ($key:expr, $version:expr, $payload:expr, $state:expr, {
        $($request:ty => $handler:expr),+ $(,)?
    }) => {
        match $key {
            $(
                k if k == <$request>::KEY => {
                    let (correlation_id, request) = decode::<$request>($payload, $version);
                    let response = $handler(request, $version, &mut *$state.lock());
                    encode(correlation_id, $version, &response)
                }
            )+
            other => panic!("mock broker cannot handle api key {}", other),
        }
    };
}

fn dispatch(key: i16, version: i16, payload: Bytes, state: &Mutex<ClusterState>, port: i32) -> BytesMut {
    route!(key, version, payload, state, {
        ApiVersionsRequest => |_, _, s: &mut ClusterState| api_versions(s),
        MetadataRequest => |r, _, s: &mut ClusterState| metadata(r, s, port),
        CreateTopicsRequest => create_topics,
        DeleteTopicsRequest => delete_topics,
        CreatePartitionsRequest => create_partitions,
        DescribeConfigsRequest => describe_configs,
        AlterConfigsRequest => alter_configs,
        CreateAclsRequest => create_acls,
        DeleteAclsRequest => delete_acls,
        DescribeAclsRequest => describe_acls,
        AlterClientQuotasRequest => alter_client_quotas,
        DescribeClientQuotasRequest => describe_client_quotas,
        AlterUserScramCredentialsRequest => alter_scram,
        DescribeUserScramCredentialsRequest => describe_scram,
    })
}

fn api_versions(state: &ClusterState) -> ApiVersionsResponse {
    let supported = [
        (ApiVersionsRequest::KEY, 3),
        (MetadataRequest::KEY, 12),
        (CreateTopicsRequest::KEY, 7),
        (DeleteTopicsRequest::KEY, 6),
        (CreatePartitionsRequest::KEY, 3),
        (DescribeConfigsRequest::KEY, 4),
        (AlterConfigsRequest::KEY, 2),
        (CreateAclsRequest::KEY, 3),
        (DeleteAclsRequest::KEY, 3),
        (DescribeAclsRequest::KEY, 3),
        (AlterClientQuotasRequest::KEY, 1),
        (DescribeClientQuotasRequest::KEY, 1),
        (AlterUserScramCredentialsRequest::KEY, 0),
        (DescribeUserScramCredentialsRequest::KEY, 0),
    ];
    ApiVersionsResponse::default().with_api_keys(
        supported
            .iter()
            .map(|(key, max)| {
                let max = state.max_versions.get(key).copied().unwrap_or(*max);
                ApiVersion::default()
                    .with_api_key(*key)
                    .with_min_version(0)
                    .with_max_version(max)
            })
            .collect(),
    )
}

fn str_bytes(s: &str) -> StrBytes {
    StrBytes::from_string(s.to_string())
}

fn topic_name(s: &str) -> TopicName {
    TopicName(str_bytes(s))
}

fn metadata(request: MetadataRequest, state: &mut ClusterState, port: i32) -> MetadataResponse {
    let mut brokers = vec![MetadataResponseBroker::default()
        .with_node_id(BrokerId(NODE_ID))
        .with_host(str_bytes("127.0.0.1"))
        .with_port(port)];
    let mut controller_id = NODE_ID;
    if let Some((node_id, host, port)) = &state.foreign_controller {
        brokers.push(
            MetadataResponseBroker::default()
                .with_node_id(BrokerId(*node_id))
                .with_host(str_bytes(host))
                .with_port(*port),
        );
        controller_id = *node_id;
    }

    let topic_error = |name: &str| match &state.topic_metadata_error {
        Some((topic, code)) if topic == name => *code,
        _ => NONE,
    };
    let describe = |name: &str, topic: Option<&MockTopic>| match topic {
        Some(topic) => MetadataResponseTopic::default()
            .with_name(Some(topic_name(name)))
            .with_error_code(topic_error(name))
            .with_partitions(
                topic
                    .partitions
                    .iter()
                    .enumerate()
                    .map(|(index, replicas)| {
                        let replicas: Vec<BrokerId> = replicas.iter().map(|r| BrokerId(*r)).collect();
                        MetadataResponsePartition::default()
                            .with_partition_index(index as i32)
                            .with_leader_id(replicas.first().copied().unwrap_or(BrokerId(-1)))
                            .with_isr_nodes(replicas.clone())
                            .with_replica_nodes(replicas)
                    })
                    .collect(),
            ),
        None => MetadataResponseTopic::default()
            .with_name(Some(topic_name(name)))
            .with_error_code(UNKNOWN_TOPIC_OR_PARTITION),
    };

    let topics = match request.topics {
        None => state
            .topics
            .iter()
            .map(|(name, topic)| describe(name, Some(topic)))
            .collect(),
        Some(wanted) => wanted
            .iter()
            .filter_map(|t| t.name.as_ref())
            .map(|name| describe(name.0.as_str(), state.topics.get(name.0.as_str())))
            .collect(),
    };

    MetadataResponse::default()
        .with_brokers(brokers)
        .with_controller_id(BrokerId(controller_id))
        .with_topics(topics)
}

fn create_topics(request: CreateTopicsRequest, _: i16, state: &mut ClusterState) -> CreateTopicsResponse {
    let results = request
        .topics
        .into_iter()
        .map(|topic| {
            let name = topic.name.0.to_string();
            let error = if state.topics.contains_key(&name) {
                Some((TOPIC_ALREADY_EXISTS, format!("Topic '{}' already exists.", name)))
            } else if topic.num_partitions <= 0 {
                Some((INVALID_PARTITIONS, "Number of partitions must be larger than 0.".to_string()))
            } else if topic.replication_factor <= 0 || topic.replication_factor > 3 {
                Some((INVALID_REPLICATION_FACTOR, "Replication factor must be 1..=3.".to_string()))
            } else {
                None
            };

            let result = CreatableTopicResult::default().with_name(topic.name.clone());
            match error {
                Some((code, message)) => result
                    .with_error_code(code)
                    .with_error_message(Some(str_bytes(&message))),
                None => {
                    let replicas: Vec<i32> = (1..=topic.replication_factor as i32).collect();
                    state.topics.insert(
                        name,
                        MockTopic {
                            partitions: vec![replicas; topic.num_partitions as usize],
                            configs: topic
                                .configs
                                .iter()
                                .filter_map(|c| {
                                    c.value.as_ref().map(|v| (c.name.to_string(), v.to_string()))
                                })
                                .collect(),
                        },
                    );
                    result
                }
            }
        })
        .collect();
    CreateTopicsResponse::default().with_topics(results)
}

fn delete_topics(request: DeleteTopicsRequest, version: i16, state: &mut ClusterState) -> DeleteTopicsResponse {
    let names: Vec<TopicName> = if version >= 6 {
        request.topics.into_iter().filter_map(|t| t.name).collect()
    } else {
        request.topic_names
    };

    let results = names
        .into_iter()
        .map(|name| {
            let code = match state.topics.remove(name.0.as_str()) {
                Some(_) => NONE,
                None => UNKNOWN_TOPIC_OR_PARTITION,
            };
            DeletableTopicResult::default()
                .with_name(Some(name))
                .with_error_code(code)
        })
        .collect();
    DeleteTopicsResponse::default().with_responses(results)
}

fn create_partitions(
    request: CreatePartitionsRequest,
    _: i16,
    state: &mut ClusterState,
) -> CreatePartitionsResponse {
    let results = request
        .topics
        .into_iter()
        .map(|topic| {
            let result = CreatePartitionsTopicResult::default().with_name(topic.name.clone());
            match state.topics.get_mut(topic.name.0.as_str()) {
                None => result.with_error_code(UNKNOWN_TOPIC_OR_PARTITION),
                Some(existing) if topic.count as usize <= existing.partitions.len() => result
                    .with_error_code(INVALID_PARTITIONS)
                    .with_error_message(Some(str_bytes(&format!(
                        "Topic currently has {} partitions, which is higher than the requested {}.",
                        existing.partitions.len(),
                        topic.count
                    )))),
                Some(existing) => {
                    let replicas = existing.partitions[0].clone();
                    existing.partitions.resize(topic.count as usize, replicas);
                    result
                }
            }
        })
        .collect();
    CreatePartitionsResponse::default().with_results(results)
}

fn describe_configs(
    request: DescribeConfigsRequest,
    version: i16,
    state: &mut ClusterState,
) -> DescribeConfigsResponse {
    // v0 reports defaults through `is_default`; later versions only carry
    // `config_source`.
    let entry = |name: &str, value: &str, source: i8| {
        let entry = DescribeConfigsResourceResult::default()
            .with_name(str_bytes(name))
            .with_value(Some(str_bytes(value)));
        if version == 0 {
            entry.with_is_default(source == CONFIG_SOURCE_DEFAULT)
        } else {
            entry.with_config_source(source)
        }
    };

    let results = request
        .resources
        .into_iter()
        .map(|resource| {
            let result = DescribeConfigsResult::default()
                .with_resource_type(resource.resource_type)
                .with_resource_name(resource.resource_name.clone());
            match state.topics.get(resource.resource_name.as_str()) {
                None => result.with_error_code(UNKNOWN_TOPIC_OR_PARTITION),
                Some(topic) => {
                    let mut configs: Vec<DescribeConfigsResourceResult> = topic
                        .configs
                        .iter()
                        .map(|(name, value)| entry(name, value, CONFIG_SOURCE_TOPIC))
                        .collect();
                    configs.push(entry("segment.bytes", "1073741824", CONFIG_SOURCE_DEFAULT));
                    result.with_configs(configs)
                }
            }
        })
        .collect();
    DescribeConfigsResponse::default().with_results(results)
}

fn alter_configs(request: AlterConfigsRequest, _: i16, state: &mut ClusterState) -> AlterConfigsResponse {
    let responses = request
        .resources
        .into_iter()
        .map(|resource| {
            let response = AlterConfigsResourceResponse::default()
                .with_resource_type(resource.resource_type)
                .with_resource_name(resource.resource_name.clone());
            match state.topics.get_mut(resource.resource_name.as_str()) {
                None => response.with_error_code(UNKNOWN_TOPIC_OR_PARTITION),
                Some(topic) => {
                    topic.configs = resource
                        .configs
                        .iter()
                        .filter_map(|c| c.value.as_ref().map(|v| (c.name.to_string(), v.to_string())))
                        .collect();
                    response
                }
            }
        })
        .collect();
    AlterConfigsResponse::default().with_responses(responses)
}

fn create_acls(request: CreateAclsRequest, _: i16, state: &mut ClusterState) -> CreateAclsResponse {
    let results = request
        .creations
        .into_iter()
        .map(|c| {
            let acl = MockAcl {
                resource_type: c.resource_type,
                resource_name: c.resource_name.to_string(),
                pattern_type: c.resource_pattern_type,
                principal: c.principal.to_string(),
                host: c.host.to_string(),
                operation: c.operation,
                permission_type: c.permission_type,
            };
            if !state.acls.contains(&acl) {
                state.acls.push(acl);
            }
            AclCreationResult::default()
        })
        .collect();
    CreateAclsResponse::default().with_results(results)
}

fn delete_acls(request: DeleteAclsRequest, _: i16, state: &mut ClusterState) -> DeleteAclsResponse {
    let results = request
        .filters
        .into_iter()
        .map(|f| {
            let is_match = |acl: &MockAcl| {
                acl.resource_type == f.resource_type_filter
                    && f.resource_name_filter.as_ref().map_or(true, |n| n.as_str() == acl.resource_name)
                    && acl.pattern_type == f.pattern_type_filter
                    && f.principal_filter.as_ref().map_or(true, |p| p.as_str() == acl.principal)
                    && f.host_filter.as_ref().map_or(true, |h| h.as_str() == acl.host)
                    && acl.operation == f.operation
                    && acl.permission_type == f.permission_type
            };

            let (removed, kept): (Vec<MockAcl>, Vec<MockAcl>) =
                std::mem::take(&mut state.acls).into_iter().partition(|acl| is_match(acl));
            state.acls = kept;

            DeleteAclsFilterResult::default().with_matching_acls(
                removed
                    .into_iter()
                    .map(|acl| {
                        DeleteAclsMatchingAcl::default()
                            .with_resource_type(acl.resource_type)
                            .with_resource_name(str_bytes(&acl.resource_name))
                            .with_pattern_type(acl.pattern_type)
                            .with_principal(str_bytes(&acl.principal))
                            .with_host(str_bytes(&acl.host))
                            .with_operation(acl.operation)
                            .with_permission_type(acl.permission_type)
                    })
                    .collect(),
            )
        })
        .collect();
    DeleteAclsResponse::default().with_filter_results(results)
}

fn describe_acls(request: DescribeAclsRequest, _: i16, state: &mut ClusterState) -> DescribeAclsResponse {
    let mut grouped: BTreeMap<(i8, String, i8), Vec<AclDescription>> = BTreeMap::new();
    for acl in state
        .acls
        .iter()
        .filter(|acl| acl.resource_type == request.resource_type_filter)
    {
        grouped
            .entry((acl.resource_type, acl.resource_name.clone(), acl.pattern_type))
            .or_default()
            .push(
                AclDescription::default()
                    .with_principal(str_bytes(&acl.principal))
                    .with_host(str_bytes(&acl.host))
                    .with_operation(acl.operation)
                    .with_permission_type(acl.permission_type),
            );
    }

    DescribeAclsResponse::default().with_resources(
        grouped
            .into_iter()
            .map(|((resource_type, name, pattern_type), acls)| {
                DescribeAclsResource::default()
                    .with_resource_type(resource_type)
                    .with_resource_name(str_bytes(&name))
                    .with_pattern_type(pattern_type)
                    .with_acls(acls)
            })
            .collect(),
    )
}

fn alter_client_quotas(
    request: AlterClientQuotasRequest,
    _: i16,
    state: &mut ClusterState,
) -> AlterClientQuotasResponse {
    use alter_client_quotas_response::{EntityData, EntryData};

    let entries = request
        .entries
        .into_iter()
        .map(|entry| {
            let entity: Vec<EntityData> = entry
                .entity
                .iter()
                .map(|e| {
                    EntityData::default()
                        .with_entity_type(e.entity_type.clone())
                        .with_entity_name(e.entity_name.clone())
                })
                .collect();
            let result = EntryData::default().with_entity(entity);

            if let Some(code) = state.quota_alter_error {
                return result
                    .with_error_code(code)
                    .with_error_message(Some(str_bytes("quota alteration rejected")));
            }
            if let Some(op) = entry.ops.iter().find(|op| !QUOTA_KEYS.contains(&op.key.as_str())) {
                return result
                    .with_error_code(INVALID_REQUEST)
                    .with_error_message(Some(str_bytes(&format!("Invalid configuration key {}", op.key.as_str()))));
            }
            if request.validate_only {
                return result;
            }

            let Some(component) = entry.entity.first() else {
                return result.with_error_code(INVALID_REQUEST);
            };
            let key = (
                component.entity_type.to_string(),
                component.entity_name.as_ref().map(|n| n.to_string()),
            );
            let values = state.quotas.entry(key.clone()).or_default();
            for op in &entry.ops {
                if op.remove {
                    values.remove(op.key.as_str());
                } else {
                    values.insert(op.key.to_string(), op.value);
                }
            }
            if values.is_empty() {
                state.quotas.remove(&key);
            }
            result
        })
        .collect();
    AlterClientQuotasResponse::default().with_entries(entries)
}

fn describe_client_quotas(
    request: DescribeClientQuotasRequest,
    _: i16,
    state: &mut ClusterState,
) -> DescribeClientQuotasResponse {
    use describe_client_quotas_response::{EntityData, EntryData, ValueData};

    if request
        .components
        .iter()
        .any(|c| c.match_type == MATCH_DEFAULT && c._match.is_some())
    {
        return DescribeClientQuotasResponse::default()
            .with_error_code(INVALID_REQUEST)
            .with_error_message(Some(str_bytes("A default match cannot carry a match string")));
    }

    if state.quota_visibility_lag > 0 {
        state.quota_visibility_lag -= 1;
        return DescribeClientQuotasResponse::default().with_entries(Some(vec![]));
    }

    let mut entries = Vec::new();
    for component in &request.components {
        let key = (
            component.entity_type.to_string(),
            component._match.as_ref().map(|m| m.to_string()),
        );
        if let Some(values) = state.quotas.get(&key) {
            entries.push(
                EntryData::default()
                    .with_entity(vec![EntityData::default()
                        .with_entity_type(component.entity_type.clone())
                        .with_entity_name(component._match.clone())])
                    .with_values(
                        values
                            .iter()
                            .map(|(k, v)| ValueData::default().with_key(str_bytes(k)).with_value(*v))
                            .collect(),
                    ),
            );
        }
    }
    DescribeClientQuotasResponse::default().with_entries(Some(entries))
}

fn alter_scram(
    request: AlterUserScramCredentialsRequest,
    _: i16,
    state: &mut ClusterState,
) -> AlterUserScramCredentialsResponse {
    let mut results = Vec::new();

    for deletion in request.deletions {
        let user = deletion.name.to_string();
        let credentials = state.scram.entry(user.clone()).or_default();
        let before = credentials.len();
        credentials.retain(|c| c.mechanism != deletion.mechanism);
        let removed = credentials.len() < before;
        if credentials.is_empty() {
            state.scram.remove(&user);
        }

        let result = AlterUserScramCredentialsResult::default().with_user(deletion.name);
        results.push(if removed {
            result
        } else {
            result
                .with_error_code(RESOURCE_NOT_FOUND)
                .with_error_message(Some(str_bytes(
                    "Attempt to delete a user credential that does not exist",
                )))
        });
    }

    for upsertion in request.upsertions {
        let credentials = state.scram.entry(upsertion.name.to_string()).or_default();
        credentials.retain(|c| c.mechanism != upsertion.mechanism);
        credentials.push(MockScram {
            mechanism: upsertion.mechanism,
            iterations: upsertion.iterations,
            salt: upsertion.salt.clone(),
            salted_password: upsertion.salted_password.clone(),
        });
        results.push(AlterUserScramCredentialsResult::default().with_user(upsertion.name));
    }

    AlterUserScramCredentialsResponse::default().with_results(results)
}

fn describe_scram(
    request: DescribeUserScramCredentialsRequest,
    _: i16,
    state: &mut ClusterState,
) -> DescribeUserScramCredentialsResponse {
    let results = request
        .users
        .unwrap_or_default()
        .into_iter()
        .map(|user| {
            let result = DescribeUserScramCredentialsResult::default().with_user(user.name.clone());
            match state.scram.get(user.name.as_str()) {
                Some(credentials) => result.with_credential_infos(
                    credentials
                        .iter()
                        .map(|c| {
                            CredentialInfo::default()
                                .with_mechanism(c.mechanism)
                                .with_iterations(c.iterations)
                        })
                        .collect(),
                ),
                None => result
                    .with_error_code(RESOURCE_NOT_FOUND)
                    .with_error_message(Some(str_bytes(
                        "Attempt to describe a user credential that does not exist",
                    ))),
            }
        })
        .collect();
    DescribeUserScramCredentialsResponse::default().with_results(results)
}
