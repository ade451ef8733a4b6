use crate::{
    config::ClusterConfig,
    error::{codes, ClientError, Result},
    security::{self, SaslAuthenticator, SaslStep},
};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_protocol::{
    messages::{
        metadata_request::MetadataRequestTopic, AlterClientQuotasRequest, AlterConfigsRequest,
        AlterUserScramCredentialsRequest, ApiVersionsRequest, ApiVersionsResponse, BrokerId,
        CreateAclsRequest, CreatePartitionsRequest, CreateTopicsRequest, DeleteAclsRequest,
        DeleteTopicsRequest, DescribeAclsRequest, DescribeClientQuotasRequest,
        DescribeConfigsRequest, DescribeUserScramCredentialsRequest, MetadataRequest,
        MetadataResponse, RequestHeader, ResponseHeader, SaslAuthenticateRequest,
        SaslHandshakeRequest, TopicName,
    },
    protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes},
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{Mutex, RwLock},
    time::timeout,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, instrument, warn};

/// Upper bound on a single response frame.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Highest ApiVersions version we try first.
const API_VERSIONS_MAX: i16 = 3;

/// Byte stream a broker connection runs over (plain TCP, TLS, or an in-memory pipe in tests)
pub trait BrokerIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> BrokerIo for T {}

/// Request types this client sends, with the version range it can encode.
pub trait AdminRequest: Request {
    const NAME: &'static str;
    const CLIENT_MIN: i16;
    const CLIENT_MAX: i16;
}

macro_rules! admin_requests {
    ($($request:ty => $name:literal, $min:literal..=$max:literal;)+) => {
        $(
            impl AdminRequest for $request {
                const NAME: &'static str = $name;
                const CLIENT_MIN: i16 = $min;
                const CLIENT_MAX: i16 = $max;
            }
        )+
    };
}

admin_requests! {
    MetadataRequest => "Metadata", 1..=12;
    CreateTopicsRequest => "CreateTopics", 0..=5;
    DeleteTopicsRequest => "DeleteTopics", 0..=6;
    CreatePartitionsRequest => "CreatePartitions", 0..=3;
    DescribeConfigsRequest => "DescribeConfigs", 0..=4;
    AlterConfigsRequest => "AlterConfigs", 0..=2;
    CreateAclsRequest => "CreateAcls", 1..=3;
    DeleteAclsRequest => "DeleteAcls", 1..=3;
    DescribeAclsRequest => "DescribeAcls", 1..=3;
    AlterClientQuotasRequest => "AlterClientQuotas", 0..=1;
    DescribeClientQuotasRequest => "DescribeClientQuotas", 0..=1;
    AlterUserScramCredentialsRequest => "AlterUserScramCredentials", 0..=0;
    DescribeUserScramCredentialsRequest => "DescribeUserScramCredentials", 0..=0;
    SaslHandshakeRequest => "SaslHandshake", 1..=1;
    SaslAuthenticateRequest => "SaslAuthenticate", 0..=2;
}

/// Pick the request version to use: the client's highest version the broker
/// also accepts.
pub fn negotiate_version(
    api: &str,
    client: (i16, i16),
    broker: Option<(i16, i16)>,
) -> Result<i16> {
    let (client_min, client_max) = client;
    let unsupported = |broker_min, broker_max| ClientError::UnsupportedVersion {
        api: api.to_string(),
        broker_min,
        broker_max,
        client_min,
        client_max,
    };

    let (broker_min, broker_max) = broker.ok_or_else(|| unsupported(-1, -1))?;
    let version = client_max.min(broker_max);
    if version < client_min || version < broker_min {
        return Err(unsupported(broker_min, broker_max));
    }
    Ok(version)
}

// ============================================================================
// Broker connection
// ============================================================================

/// One framed connection to a broker.
///
/// Requests are serialised over the stream: the mutex keeps exactly one
/// request in flight, so responses always arrive in send order.
pub struct BrokerConnection {
    addr: String,
    client_id: StrBytes,
    request_timeout: Duration,
    stream: Mutex<Box<dyn BrokerIo>>,
    correlation_id: AtomicI32,
    api_versions: HashMap<i16, (i16, i16)>,
}

impl fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("addr", &self.addr)
            .field("api_versions", &self.api_versions.len())
            .finish_non_exhaustive()
    }
}

impl BrokerConnection {
    /// Negotiate API versions (and authenticate, when configured) over an
    /// already connected stream.
    pub async fn establish(
        addr: impl Into<String>,
        io: Box<dyn BrokerIo>,
        client_id: &str,
        request_timeout: Duration,
        sasl: Option<&dyn SaslAuthenticator>,
    ) -> Result<Self> {
        let mut connection = Self {
            addr: addr.into(),
            client_id: StrBytes::from_string(client_id.to_string()),
            request_timeout,
            stream: Mutex::new(io),
            correlation_id: AtomicI32::new(0),
            api_versions: HashMap::new(),
        };

        let versions = connection.fetch_api_versions().await?;
        connection.api_versions = versions
            .api_keys
            .iter()
            .map(|k| (k.api_key, (k.min_version, k.max_version)))
            .collect();
        debug!(
            broker = %connection.addr,
            apis = connection.api_versions.len(),
            "Negotiated API versions"
        );

        if let Some(authenticator) = sasl {
            connection.authenticate(authenticator).await?;
        }

        Ok(connection)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Broker-advertised version range for an API key
    pub fn broker_versions(&self, api_key: i16) -> Option<(i16, i16)> {
        self.api_versions.get(&api_key).copied()
    }

    /// Version that would be used for `R` on this connection
    pub fn version_for<R: AdminRequest>(&self) -> Result<i16> {
        negotiate_version(
            R::NAME,
            (R::CLIENT_MIN, R::CLIENT_MAX),
            self.broker_versions(R::KEY),
        )
    }

    /// Send a request at the negotiated version and decode the typed response
    pub async fn send<R: AdminRequest>(&self, request: R) -> Result<R::Response> {
        let version = self.version_for::<R>()?;
        self.send_version(&request, version).await
    }

    /// Send a request at an explicit version
    pub async fn send_version<R: AdminRequest>(
        &self,
        request: &R,
        version: i16,
    ) -> Result<R::Response> {
        let mut body = self.round_trip(request, version).await?;
        R::Response::decode(&mut body, version).map_err(|e| {
            ClientError::Protocol(format!("Failed to decode {} v{} response: {}", R::NAME, version, e))
        })
    }

    async fn fetch_api_versions(&self) -> Result<ApiVersionsResponse> {
        let request = ApiVersionsRequest::default()
            .with_client_software_name(StrBytes::from_static_str("kafka-reconcile"))
            .with_client_software_version(StrBytes::from_static_str(env!("CARGO_PKG_VERSION")));

        let mut version = API_VERSIONS_MAX;
        let mut body = self.round_trip(&request, version).await?;

        // Brokers answer an unknown ApiVersions version with a v0 body.
        if peek_error_code(&body) == Some(codes::UNSUPPORTED_VERSION) {
            debug!(broker = %self.addr, "ApiVersions v{} unsupported, retrying v0", version);
            version = 0;
            body = self
                .round_trip(&ApiVersionsRequest::default(), version)
                .await?;
        }

        let response = ApiVersionsResponse::decode(&mut body, version).map_err(|e| {
            ClientError::Protocol(format!("Failed to decode ApiVersions response: {}", e))
        })?;
        ClientError::check(response.error_code, None)?;
        Ok(response)
    }

    #[instrument(skip(self, authenticator), fields(broker = %self.addr))]
    async fn authenticate(&self, authenticator: &dyn SaslAuthenticator) -> Result<()> {
        let mechanism = authenticator.mechanism().to_string();
        let handshake = self
            .send(SaslHandshakeRequest::default().with_mechanism(StrBytes::from_string(mechanism.clone())))
            .await?;
        if handshake.error_code != codes::NONE {
            let offered: Vec<String> = handshake.mechanisms.iter().map(|m| m.to_string()).collect();
            return Err(ClientError::Authentication(format!(
                "Mechanism {} not enabled, broker offers [{}]",
                mechanism,
                offered.join(", ")
            )));
        }

        let mut session = authenticator.session();
        let mut challenge: Option<Bytes> = None;
        loop {
            match session.step(challenge.as_deref())? {
                SaslStep::Respond(bytes) => {
                    let response = self
                        .send(SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(bytes)))
                        .await?;
                    if response.error_code != codes::NONE {
                        let message = response
                            .error_message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("error code {}", response.error_code));
                        return Err(ClientError::Authentication(message));
                    }
                    challenge = Some(response.auth_bytes);
                }
                SaslStep::Done => break,
            }
        }

        info!("Authenticated with SASL/{}", mechanism);
        Ok(())
    }

    /// Write one request frame and read back the matching response body.
    async fn round_trip<R: Request>(&self, request: &R, version: i16) -> Result<Bytes> {
        let correlation_id = self.correlation_id.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader::default()
            .with_request_api_key(R::KEY)
            .with_request_api_version(version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        let mut frame = BytesMut::new();
        frame.put_i32(0);
        header
            .encode(&mut frame, R::header_version(version))
            .map_err(|e| ClientError::Protocol(format!("Failed to encode request header: {}", e)))?;
        request.encode(&mut frame, version).map_err(|e| {
            ClientError::Protocol(format!("Failed to encode request (key {} v{}): {}", R::KEY, version, e))
        })?;
        let size = (frame.len() - 4) as i32;
        frame[..4].copy_from_slice(&size.to_be_bytes());

        let exchange = async {
            let mut stream = self.stream.lock().await;
            stream.write_all(&frame).await?;
            stream.flush().await?;

            let size = stream.read_i32().await?;
            if size < 0 || size as usize > MAX_FRAME_SIZE {
                return Err(ClientError::Protocol(format!("Invalid frame size {}", size)));
            }
            let mut payload = vec![0u8; size as usize];
            stream.read_exact(&mut payload).await?;
            Ok::<_, ClientError>(Bytes::from(payload))
        };

        let mut payload = timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            })??;

        let response_header =
            ResponseHeader::decode(&mut payload, R::Response::header_version(version)).map_err(
                |e| ClientError::Protocol(format!("Failed to decode response header: {}", e)),
            )?;
        if response_header.correlation_id != correlation_id {
            return Err(ClientError::Protocol(format!(
                "Correlation id mismatch: sent {}, received {}",
                correlation_id, response_header.correlation_id
            )));
        }

        Ok(payload)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Opens authenticated broker connections
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn connect(&self, addr: &str) -> Result<BrokerConnection>;
}

/// TCP transport with optional TLS and SASL
pub struct TcpTransport {
    client_id: String,
    request_timeout: Duration,
    tls: Option<TlsConnector>,
    server_name: Option<String>,
    sasl: Option<Arc<dyn SaslAuthenticator>>,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("client_id", &self.client_id)
            .field("tls", &self.tls.is_some())
            .field("sasl", &self.sasl)
            .finish()
    }
}

impl TcpTransport {
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let tls = match &config.tls {
            Some(tls_config) => {
                let rustls_config = security::build_tls_config(tls_config)?;
                Some(TlsConnector::from(Arc::new(rustls_config)))
            }
            None => None,
        };

        Ok(Self {
            client_id: config.client_id().to_string(),
            request_timeout: config.timeout,
            tls,
            server_name: config.tls.as_ref().and_then(|t| t.server_name.clone()),
            sasl: config.sasl.as_ref().map(security::authenticator_for),
        })
    }

    /// Replace the SASL mechanism, e.g. with a custom challenge/response scheme
    pub fn with_authenticator(mut self, authenticator: Arc<dyn SaslAuthenticator>) -> Self {
        self.sasl = Some(authenticator);
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[instrument(skip(self))]
    async fn connect(&self, addr: &str) -> Result<BrokerConnection> {
        let tcp = timeout(self.request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            })?
            .map_err(|e| ClientError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true)?;

        let io: Box<dyn BrokerIo> = match &self.tls {
            Some(connector) => {
                let host = self
                    .server_name
                    .clone()
                    .unwrap_or_else(|| host_of(addr).to_string());
                let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                    .map_err(|e| ClientError::Tls(format!("Invalid server name '{}': {}", host, e)))?;
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ClientError::Tls(format!("TLS handshake with {} failed: {}", addr, e)))?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };

        BrokerConnection::establish(
            addr,
            io,
            &self.client_id,
            self.request_timeout,
            self.sasl.as_deref(),
        )
        .await
    }
}

fn host_of(addr: &str) -> &str {
    addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr)
}

// ============================================================================
// Cluster metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl BrokerInfo {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub index: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub error_code: i16,
    pub is_internal: bool,
    pub partitions: Vec<PartitionInfo>,
}

/// Typed view of a Metadata response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub brokers: Vec<BrokerInfo>,
    pub controller_id: i32,
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    /// Entry for `name`, whatever its error code
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }

    pub fn controller(&self) -> Option<&BrokerInfo> {
        self.brokers.iter().find(|b| b.node_id == self.controller_id)
    }
}

impl From<MetadataResponse> for ClusterMetadata {
    fn from(response: MetadataResponse) -> Self {
        let brokers = response
            .brokers
            .iter()
            .map(|b| BrokerInfo {
                node_id: b.node_id.0,
                host: b.host.to_string(),
                port: b.port,
                rack: b.rack.as_ref().map(|r| r.to_string()),
            })
            .collect();

        let topics = response
            .topics
            .iter()
            .filter_map(|t| {
                let name = t.name.as_ref()?;
                Some(TopicMetadata {
                    name: name.0.to_string(),
                    error_code: t.error_code,
                    is_internal: t.is_internal,
                    partitions: t
                        .partitions
                        .iter()
                        .map(|p| PartitionInfo {
                            index: p.partition_index,
                            leader: p.leader_id.0,
                            replicas: p.replica_nodes.iter().map(|r: &BrokerId| r.0).collect(),
                            isr: p.isr_nodes.iter().map(|r: &BrokerId| r.0).collect(),
                        })
                        .collect(),
                })
            })
            .collect();

        ClusterMetadata {
            brokers,
            controller_id: response.controller_id.0,
            topics,
        }
    }
}

// ============================================================================
// Connection manager
// ============================================================================

/// Produces broker connections for the resource clients.
///
/// Connections are pooled by address. The controller is looked up through a
/// Metadata request on every call; only the socket to it is reused.
pub struct ConnectionManager {
    config: Arc<ClusterConfig>,
    transport: Arc<dyn Transport>,
    pool: RwLock<HashMap<String, Arc<BrokerConnection>>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("bootstrap_servers", &self.config.bootstrap_servers)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Build a manager using the TCP transport described by `config`
    pub fn new(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let transport = TcpTransport::from_config(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClusterConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            pool: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Connect to the first reachable bootstrap endpoint, in configured order
    #[instrument(skip(self))]
    pub async fn open_available_broker(&self) -> Result<Arc<BrokerConnection>> {
        let mut attempted = Vec::with_capacity(self.config.bootstrap_servers.len());
        for addr in &self.config.bootstrap_servers {
            attempted.push(addr.clone());
            match self.connection(addr).await {
                Ok(connection) => return Ok(connection),
                Err(e) => warn!(broker = %addr, error = %e, "Bootstrap broker unavailable"),
            }
        }
        Err(ClientError::NoBrokersAvailable { attempted })
    }

    /// Fetch cluster metadata; `None` lists every topic
    #[instrument(skip(self))]
    pub async fn metadata(&self, topics: Option<&[&str]>) -> Result<ClusterMetadata> {
        let broker = self.open_available_broker().await?;
        let version = broker.version_for::<MetadataRequest>()?;

        let mut request = MetadataRequest::default().with_topics(topics.map(|names| {
            names
                .iter()
                .map(|name| {
                    MetadataRequestTopic::default()
                        .with_name(Some(TopicName(StrBytes::from_string(name.to_string()))))
                })
                .collect()
        }));
        if version >= 4 {
            request = request.with_allow_auto_topic_creation(false);
        }

        let response = self
            .exchange(&broker, broker.send_version(&request, version))
            .await?;
        Ok(ClusterMetadata::from(response))
    }

    /// Find the current controller and return a connection to it
    #[instrument(skip(self))]
    pub async fn resolve_controller(&self) -> Result<Arc<BrokerConnection>> {
        let no_topics: &[&str] = &[];
        let metadata = self.metadata(Some(no_topics)).await?;
        let controller = metadata.controller().ok_or_else(|| {
            ClientError::ControllerUnavailable(format!(
                "controller id {} not among {} advertised brokers",
                metadata.controller_id,
                metadata.brokers.len()
            ))
        })?;
        debug!(controller = controller.node_id, addr = %controller.addr(), "Resolved controller");
        self.connection(&controller.addr()).await
    }

    /// Send a request to the current controller
    pub async fn send_to_controller<R: AdminRequest>(&self, request: R) -> Result<R::Response> {
        self.send_to_controller_with(|_| request).await
    }

    /// Send a request to the current controller, building it for the
    /// negotiated version (for requests whose shape changes across versions)
    pub async fn send_to_controller_with<R, F>(&self, build: F) -> Result<R::Response>
    where
        R: AdminRequest,
        F: FnOnce(i16) -> R,
    {
        let controller = self.resolve_controller().await?;
        let version = controller.version_for::<R>()?;
        let request = build(version);
        self.exchange(&controller, controller.send_version(&request, version))
            .await
    }

    /// Send a request to any reachable bootstrap broker
    pub async fn send_to_any<R: AdminRequest>(&self, request: R) -> Result<R::Response> {
        let broker = self.open_available_broker().await?;
        self.exchange(&broker, broker.send(request)).await
    }

    /// Number of pooled connections
    pub async fn pooled(&self) -> usize {
        self.pool.read().await.len()
    }

    async fn connection(&self, addr: &str) -> Result<Arc<BrokerConnection>> {
        if let Some(existing) = self.pool.read().await.get(addr) {
            return Ok(Arc::clone(existing));
        }

        let connection = Arc::new(self.transport.connect(addr).await?);
        let mut pool = self.pool.write().await;
        let entry = pool
            .entry(addr.to_string())
            .or_insert_with(|| Arc::clone(&connection));
        info!(broker = %addr, "Connected to broker");
        Ok(Arc::clone(entry))
    }

    /// Await a request on `connection`, evicting it when the stream failed.
    async fn exchange<T>(
        &self,
        connection: &Arc<BrokerConnection>,
        request: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = request.await;
        if let Err(e) = &result {
            if matches!(
                e,
                ClientError::Connection(_) | ClientError::Timeout { .. } | ClientError::Protocol(_)
            ) {
                warn!(broker = %connection.addr(), error = %e, "Evicting broken connection");
                let mut pool = self.pool.write().await;
                if pool
                    .get(connection.addr())
                    .map(|c| Arc::ptr_eq(c, connection))
                    .unwrap_or(false)
                {
                    pool.remove(connection.addr());
                }
            }
        }
        result
    }
}

/// Leading error code of a response body, without consuming it.
pub(crate) fn peek_error_code(body: &Bytes) -> Option<i16> {
    let mut copy = body.clone();
    (copy.remaining() >= 2).then(|| copy.get_i16())
}
