use crate::{
    acl::AclClient,
    config::ClusterConfig,
    connection::{ConnectionManager, Transport},
    credential::CredentialClient,
    error::Result,
    quota::QuotaClient,
    topic::TopicClient,
};
use std::sync::Arc;
use tracing::info;

/// One connection manager shared by every resource client
#[derive(Debug)]
pub struct KafkaClient {
    connections: Arc<ConnectionManager>,
    topics: TopicClient,
    acls: AclClient,
    quotas: QuotaClient,
    credentials: CredentialClient,
}

impl KafkaClient {
    /// Connect with the TCP transport described by `config`.
    ///
    /// Fails unless at least one bootstrap broker accepts a connection.
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        let connections = Arc::new(ConnectionManager::new(config)?);
        Self::open(connections).await
    }

    /// Connect through a caller-supplied transport
    pub async fn connect_with_transport(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let connections = Arc::new(ConnectionManager::with_transport(config, transport));
        Self::open(connections).await
    }

    async fn open(connections: Arc<ConnectionManager>) -> Result<Self> {
        let broker = connections.open_available_broker().await?;
        info!(broker = %broker.addr(), "Kafka client ready");
        Ok(Self::from_connections(connections))
    }

    /// Wrap an existing connection manager without contacting the cluster
    pub fn from_connections(connections: Arc<ConnectionManager>) -> Self {
        Self {
            topics: TopicClient::new(Arc::clone(&connections)),
            acls: AclClient::new(Arc::clone(&connections)),
            quotas: QuotaClient::new(Arc::clone(&connections)),
            credentials: CredentialClient::new(Arc::clone(&connections)),
            connections,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn config(&self) -> &ClusterConfig {
        self.connections.config()
    }

    pub fn topics(&self) -> &TopicClient {
        &self.topics
    }

    pub fn acls(&self) -> &AclClient {
        &self.acls
    }

    pub fn quotas(&self) -> &QuotaClient {
        &self.quotas
    }

    pub fn credentials(&self) -> &CredentialClient {
        &self.credentials
    }
}
