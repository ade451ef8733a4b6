use crate::{
    connection::{ClusterMetadata, ConnectionManager, TopicMetadata},
    error::{codes, ClientError, Result},
    poll::{poll_until, Convergence, PollSchedule},
    types::Topic,
};
use kafka_protocol::{
    messages::{
        alter_configs_request::{AlterConfigsResource, AlterableConfig},
        create_partitions_request::CreatePartitionsTopic,
        create_topics_request::{CreatableTopic, CreateableTopicConfig},
        delete_topics_request::DeleteTopicState,
        describe_configs_request::DescribeConfigsResource,
        describe_configs_response::DescribeConfigsResourceResult,
        AlterConfigsRequest, CreatePartitionsRequest, CreateTopicsRequest, DeleteTopicsRequest,
        DescribeConfigsRequest, TopicName,
    },
    protocol::StrBytes,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, instrument};

/// ConfigResource type code for topics
const RESOURCE_TYPE_TOPIC: i8 = 2;

/// DescribeConfigs source: set on the topic itself
const CONFIG_SOURCE_TOPIC: i8 = 1;

/// DescribeConfigs source: not reported (v0 responses)
const CONFIG_SOURCE_UNKNOWN: i8 = -1;

/// Config key a serverless cluster refuses to alter
pub const CLEANUP_POLICY: &str = "cleanup.policy";

/// Create, read, alter and delete topics
#[derive(Debug, Clone)]
pub struct TopicClient {
    connections: Arc<ConnectionManager>,
}

impl TopicClient {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    fn timeout_ms(&self) -> i32 {
        i32::try_from(self.connections.config().timeout.as_millis()).unwrap_or(i32::MAX)
    }

    /// Create the topic and wait until it shows up in metadata
    #[instrument(skip(self, topic), fields(topic = %topic.name))]
    pub async fn create(&self, topic: &Topic) -> Result<()> {
        let creatable = CreatableTopic::default()
            .with_name(topic_name(&topic.name))
            .with_num_partitions(topic.partitions)
            .with_replication_factor(topic.replication_factor)
            .with_configs(
                topic
                    .set_config()
                    .map(|(key, value)| {
                        CreateableTopicConfig::default()
                            .with_name(StrBytes::from_string(key.to_string()))
                            .with_value(Some(StrBytes::from_string(value.to_string())))
                    })
                    .collect(),
            );

        let request = CreateTopicsRequest::default()
            .with_topics(vec![creatable])
            .with_timeout_ms(self.timeout_ms());

        let response = self.connections.send_to_controller(request).await?;
        for result in &response.topics {
            ClientError::check(result.error_code, result.error_message.as_deref())?;
        }

        info!(
            partitions = topic.partitions,
            replication_factor = topic.replication_factor,
            "Topic created"
        );

        self.wait_until_visible(&topic.name).await
    }

    async fn wait_until_visible(&self, name: &str) -> Result<()> {
        let schedule = PollSchedule::from_config(self.connections.config());
        let resource = format!("topic {}", name);
        poll_until(&resource, schedule, move || async move {
            let metadata = self.connections.metadata(None).await?;
            Ok(match metadata.topic(name) {
                Some(t) if t.error_code == codes::NONE => Convergence::Done(()),
                _ => Convergence::Pending,
            })
        })
        .await
    }

    /// Read a topic back from the cluster.
    ///
    /// Fails with [`ClientError::TopicMissing`] when the topic is not listed.
    #[instrument(skip(self))]
    pub async fn read(&self, name: &str) -> Result<Topic> {
        let metadata = self.connections.metadata(None).await?;
        let topic = listed(&metadata, name)?;

        let replication_factor = replication_factor(topic)?;
        let config = self.describe_config(name).await?;
        debug!(
            partitions = topic.partitions.len(),
            replication_factor,
            config_entries = config.len(),
            "Read topic"
        );

        Ok(Topic {
            name: name.to_string(),
            partitions: topic.partitions.len() as i32,
            replication_factor,
            config,
        })
    }

    /// Names of every topic in the cluster
    pub async fn list(&self) -> Result<Vec<String>> {
        let ClusterMetadata { topics, .. } = self.connections.metadata(None).await?;
        let mut names: Vec<String> = topics
            .into_iter()
            .filter(|t| t.error_code != codes::UNKNOWN_TOPIC_OR_PARTITION)
            .map(|t| t.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Bring an existing topic to the desired state: grow partitions when
    /// asked, then replace its configuration.
    #[instrument(skip(self, topic), fields(topic = %topic.name))]
    pub async fn update(&self, topic: &Topic) -> Result<()> {
        let metadata = self.connections.metadata(None).await?;
        let current = listed(&metadata, &topic.name)?;

        let current_replication = replication_factor(current)?;
        if current_replication != topic.replication_factor {
            return Err(ClientError::InvalidOperation(format!(
                "replication factor of topic {} is {} and cannot be changed to {}",
                topic.name, current_replication, topic.replication_factor
            )));
        }

        let current_partitions = current.partitions.len() as i32;
        if topic.partitions < current_partitions {
            return Err(ClientError::InvalidOperation(format!(
                "topic {} has {} partitions and cannot shrink to {}",
                topic.name, current_partitions, topic.partitions
            )));
        }
        if topic.partitions > current_partitions {
            self.add_partitions(topic).await?;
        }

        self.alter_config(topic).await
    }

    /// Replace the topic configuration with `topic.config`
    pub async fn alter_config(&self, topic: &Topic) -> Result<()> {
        let config = outgoing_config(topic, self.connections.config().is_serverless());

        let resource = AlterConfigsResource::default()
            .with_resource_type(RESOURCE_TYPE_TOPIC)
            .with_resource_name(StrBytes::from_string(topic.name.clone()))
            .with_configs(
                config
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_ref().map(|value| {
                            AlterableConfig::default()
                                .with_name(StrBytes::from_string(key.clone()))
                                .with_value(Some(StrBytes::from_string(value.clone())))
                        })
                    })
                    .collect(),
            );

        let response = self
            .connections
            .send_to_controller(AlterConfigsRequest::default().with_resources(vec![resource]))
            .await?;
        for result in &response.responses {
            check_topic_error(&topic.name, result.error_code, result.error_message.as_deref())?;
        }

        info!(topic = %topic.name, entries = config.len(), "Topic config updated");
        Ok(())
    }

    /// Raise the partition count to `topic.partitions`.
    ///
    /// A count that does not exceed the current one is rejected by the broker.
    #[instrument(skip(self, topic), fields(topic = %topic.name))]
    pub async fn add_partitions(&self, topic: &Topic) -> Result<()> {
        let request = CreatePartitionsRequest::default()
            .with_topics(vec![CreatePartitionsTopic::default()
                .with_name(topic_name(&topic.name))
                .with_count(topic.partitions)
                .with_assignments(None)])
            .with_timeout_ms(self.timeout_ms());

        let response = self.connections.send_to_controller(request).await?;
        for result in &response.results {
            check_topic_error(&topic.name, result.error_code, result.error_message.as_deref())?;
        }

        info!(partitions = topic.partitions, "Partitions added");
        Ok(())
    }

    /// Delete a topic; every per-topic result must report no error
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let timeout_ms = self.timeout_ms();
        let response = self
            .connections
            .send_to_controller_with(|version| {
                let request = DeleteTopicsRequest::default().with_timeout_ms(timeout_ms);
                if version >= 6 {
                    request.with_topics(vec![DeleteTopicState::default().with_name(Some(topic_name(name)))])
                } else {
                    request.with_topic_names(vec![topic_name(name)])
                }
            })
            .await?;

        for result in &response.responses {
            check_topic_error(name, result.error_code, result.error_message.as_deref())?;
        }

        info!("Topic deleted");
        Ok(())
    }

    async fn describe_config(&self, name: &str) -> Result<BTreeMap<String, Option<String>>> {
        let resource = DescribeConfigsResource::default()
            .with_resource_type(RESOURCE_TYPE_TOPIC)
            .with_resource_name(StrBytes::from_string(name.to_string()))
            .with_configuration_keys(None);

        let response = self
            .connections
            .send_to_controller(DescribeConfigsRequest::default().with_resources(vec![resource]))
            .await?;

        let mut config = BTreeMap::new();
        for result in &response.results {
            check_topic_error(name, result.error_code, result.error_message.as_deref())?;
            config.extend(
                result
                    .configs
                    .iter()
                    .filter(|entry| is_topic_override(entry))
                    .map(|entry| (entry.name.to_string(), entry.value.as_ref().map(|v| v.to_string()))),
            );
        }
        Ok(config)
    }
}

fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}

/// Metadata of a listed topic. Only an absent name means the topic is
/// missing; any other topic-level error code is surfaced as is.
fn listed<'a>(metadata: &'a ClusterMetadata, name: &str) -> Result<&'a TopicMetadata> {
    let topic = metadata
        .topic(name)
        .ok_or_else(|| ClientError::TopicMissing {
            topic: name.to_string(),
        })?;
    check_topic_error(name, topic.error_code, None)?;
    Ok(topic)
}

fn check_topic_error(topic: &str, code: i16, message: Option<&str>) -> Result<()> {
    if code == codes::UNKNOWN_TOPIC_OR_PARTITION {
        return Err(ClientError::TopicMissing {
            topic: topic.to_string(),
        });
    }
    ClientError::check(code, message)
}

/// Config entry set explicitly on the topic, as opposed to inherited from a
/// broker or cluster default.
fn is_topic_override(entry: &DescribeConfigsResourceResult) -> bool {
    match entry.config_source {
        CONFIG_SOURCE_TOPIC => true,
        CONFIG_SOURCE_UNKNOWN => !entry.is_default,
        _ => false,
    }
}

/// Replication factor shared by every partition of the topic
pub fn replication_factor(topic: &TopicMetadata) -> Result<i16> {
    let mut counts = topic.partitions.iter().map(|p| p.replicas.len());
    let first = counts.next().ok_or_else(|| ClientError::InconsistentReplication {
        topic: topic.name.clone(),
        detail: "topic has no partitions".to_string(),
    })?;

    if let Some(partition) = topic
        .partitions
        .iter()
        .find(|p| p.replicas.len() != first)
    {
        return Err(ClientError::InconsistentReplication {
            topic: topic.name.clone(),
            detail: format!(
                "partition {} has {} replicas, expected {}",
                partition.index,
                partition.replicas.len(),
                first
            ),
        });
    }

    i16::try_from(first).map_err(|_| ClientError::InconsistentReplication {
        topic: topic.name.clone(),
        detail: format!("{} replicas exceeds the protocol range", first),
    })
}

/// Configuration sent on alter; serverless clusters reject `cleanup.policy`.
/// The caller's map is never modified.
pub fn outgoing_config(topic: &Topic, serverless: bool) -> BTreeMap<String, Option<String>> {
    let mut config = topic.config.clone();
    if serverless && config.remove(CLEANUP_POLICY).is_some() {
        debug!(topic = %topic.name, "Dropping {} for serverless cluster", CLEANUP_POLICY);
    }
    config
}
