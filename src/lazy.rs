//! Client that connects on first use.
//!
//! Initialization runs at most once at a time: callers arriving while an
//! attempt is in flight await that same attempt and see its outcome. A
//! failed attempt is not cached; the next caller starts a new one.

use crate::{
    acl::AclSnapshot,
    client::KafkaClient,
    config::ClusterConfig,
    connection::Transport,
    error::{ClientError, Lookup, Result, ResultExt},
    types::{
        AclBinding, AclSpec, Quota, QuotaEntityType, ScramMechanism, Topic, UserScramCredential,
        UserScramCredentials,
    },
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, warn};

type InitAttempt = Shared<BoxFuture<'static, Result<Arc<KafkaClient>>>>;

enum InitState {
    Uninitialized,
    Initializing { generation: u64, attempt: InitAttempt },
    Ready(Arc<KafkaClient>),
    Failed(ClientError),
}

/// Observable initialization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

pub struct LazyClient {
    config: ClusterConfig,
    transport: Option<Arc<dyn Transport>>,
    state: Mutex<InitState>,
    attempts: AtomicU64,
}

impl std::fmt::Debug for LazyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyClient")
            .field("bootstrap_servers", &self.config.bootstrap_servers)
            .field("status", &self.status())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl LazyClient {
    /// Nothing is contacted until the first operation
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            transport: None,
            state: Mutex::new(InitState::Uninitialized),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn with_transport(config: ClusterConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new(config)
        }
    }

    pub fn status(&self) -> InitStatus {
        match &*self.state.lock() {
            InitState::Uninitialized => InitStatus::Uninitialized,
            InitState::Initializing { .. } => InitStatus::Initializing,
            InitState::Ready(_) => InitStatus::Ready,
            InitState::Failed(_) => InitStatus::Failed,
        }
    }

    /// Error of the most recent failed attempt, if the client is failed
    pub fn last_error(&self) -> Option<ClientError> {
        match &*self.state.lock() {
            InitState::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Number of initialization attempts started so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The connected client, initializing it if needed
    pub async fn client(&self) -> Result<Arc<KafkaClient>> {
        let (generation, attempt) = {
            let mut state = self.state.lock();
            match &*state {
                InitState::Ready(client) => return Ok(Arc::clone(client)),
                InitState::Initializing { generation, attempt } => (*generation, attempt.clone()),
                InitState::Uninitialized | InitState::Failed(_) => {
                    let generation = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let attempt = self.start_attempt();
                    debug!(generation, "Starting client initialization");
                    *state = InitState::Initializing {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let outcome = attempt.await;

        let mut state = self.state.lock();
        if matches!(&*state, InitState::Initializing { generation: current, .. } if *current == generation)
        {
            *state = match &outcome {
                Ok(client) => InitState::Ready(Arc::clone(client)),
                Err(e) => {
                    warn!(generation, error = %e, "Client initialization failed");
                    InitState::Failed(e.clone())
                }
            };
        }
        outcome
    }

    fn start_attempt(&self) -> InitAttempt {
        let config = self.config.clone();
        let transport = self.transport.clone();
        async move {
            let client = match transport {
                Some(transport) => KafkaClient::connect_with_transport(config, transport).await?,
                None => KafkaClient::connect(config).await?,
            };
            Ok(Arc::new(client))
        }
        .boxed()
        .shared()
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    pub async fn create_topic(&self, topic: &Topic) -> Result<()> {
        self.client().await?.topics().create(topic).await
    }

    pub async fn read_topic(&self, name: &str) -> Result<Lookup<Topic>> {
        self.client().await?.topics().read(name).await.found()
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.client().await?.topics().list().await
    }

    pub async fn update_topic(&self, topic: &Topic) -> Result<()> {
        self.client().await?.topics().update(topic).await
    }

    pub async fn add_partitions(&self, topic: &Topic) -> Result<()> {
        self.client().await?.topics().add_partitions(topic).await
    }

    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        self.client().await?.topics().delete(name).await
    }

    // ------------------------------------------------------------------
    // ACLs
    // ------------------------------------------------------------------

    pub async fn create_acl(&self, acl: &AclSpec) -> Result<AclBinding> {
        // Reject bad enum text before connecting.
        let binding = acl.to_binding()?;
        self.client().await?.acls().create_binding(&binding).await?;
        Ok(binding)
    }

    pub async fn read_acl(&self, binding: &AclBinding) -> Result<Lookup<AclBinding>> {
        self.client().await?.acls().read(binding).await.found()
    }

    pub async fn list_acls(&self) -> Result<AclSnapshot> {
        self.client().await?.acls().list().await
    }

    pub async fn acls_for_resource(&self, name: &str) -> Result<Vec<AclBinding>> {
        self.client().await?.acls().acls_for_resource(name).await
    }

    pub async fn delete_acl(&self, acl: &AclSpec) -> Result<()> {
        let binding = acl.to_binding()?;
        self.client().await?.acls().delete_binding(&binding).await
    }

    // ------------------------------------------------------------------
    // Quotas
    // ------------------------------------------------------------------

    pub async fn alter_quota(&self, quota: &Quota, validate_only: bool) -> Result<()> {
        self.client().await?.quotas().alter(quota, validate_only).await
    }

    pub async fn create_quota(&self, quota: &Quota) -> Result<Quota> {
        self.client().await?.quotas().create(quota).await
    }

    pub async fn read_quota(
        &self,
        entity_type: QuotaEntityType,
        entity_name: &str,
    ) -> Result<Lookup<Quota>> {
        self.client()
            .await?
            .quotas()
            .describe(entity_type, entity_name)
            .await
            .found()
    }

    pub async fn delete_quota(&self, entity_type: QuotaEntityType, entity_name: &str) -> Result<()> {
        self.client()
            .await?
            .quotas()
            .delete(entity_type, entity_name)
            .await
    }

    // ------------------------------------------------------------------
    // SCRAM credentials
    // ------------------------------------------------------------------

    pub async fn upsert_credential(&self, credential: &UserScramCredential) -> Result<()> {
        self.client().await?.credentials().upsert(credential).await
    }

    pub async fn read_credentials(&self, username: &str) -> Result<Lookup<UserScramCredentials>> {
        self.client()
            .await?
            .credentials()
            .describe(username)
            .await
            .found()
    }

    pub async fn delete_credential(&self, username: &str, mechanism: ScramMechanism) -> Result<()> {
        self.client()
            .await?
            .credentials()
            .delete(username, mechanism)
            .await
    }
}
