use crate::{
    connection::ConnectionManager,
    error::{ClientError, Result},
    poll::{poll_until, Convergence, PollSchedule},
    types::{quota_id, Quota, QuotaEntityType, QuotaOp},
};
use kafka_protocol::{
    messages::{
        alter_client_quotas_request::{EntityData, EntryData, OpData},
        describe_client_quotas_request::ComponentData,
        AlterClientQuotasRequest, DescribeClientQuotasRequest,
    },
    protocol::StrBytes,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// DescribeClientQuotas match types
const MATCH_EXACT: i8 = 0;
const MATCH_DEFAULT: i8 = 1;

/// Set, read and remove client quotas
#[derive(Debug, Clone)]
pub struct QuotaClient {
    connections: Arc<ConnectionManager>,
}

impl QuotaClient {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Apply the quota's operations to its entity.
    ///
    /// With `validate_only` the broker checks the alteration without applying
    /// it. The first entry reporting an error stops processing.
    #[instrument(skip(self, quota), fields(quota = %quota.id()))]
    pub async fn alter(&self, quota: &Quota, validate_only: bool) -> Result<()> {
        let entry = EntryData::default()
            .with_entity(vec![EntityData::default()
                .with_entity_type(StrBytes::from_static_str(quota.entity_type.as_str()))
                .with_entity_name(entity_name_of(&quota.entity_name))])
            .with_ops(
                quota
                    .ops
                    .iter()
                    .map(|op| {
                        OpData::default()
                            .with_key(StrBytes::from_string(op.key.clone()))
                            .with_value(op.value)
                            .with_remove(op.remove)
                    })
                    .collect(),
            );

        let request = AlterClientQuotasRequest::default()
            .with_entries(vec![entry])
            .with_validate_only(validate_only);

        let response = self.connections.send_to_controller(request).await?;
        for entry in &response.entries {
            ClientError::check(entry.error_code, entry.error_message.as_deref())?;
        }

        debug!(ops = quota.ops.len(), validate_only, "Quota altered");
        Ok(())
    }

    /// Read the quota of one entity with a strict exact-match filter.
    ///
    /// Fails with [`ClientError::QuotaMissing`] when no entry comes back.
    #[instrument(skip(self))]
    pub async fn describe(&self, entity_type: QuotaEntityType, entity_name: &str) -> Result<Quota> {
        let request = DescribeClientQuotasRequest::default()
            .with_components(vec![component(entity_type, entity_name)])
            .with_strict(true);

        let response = self.connections.send_to_controller(request).await?;
        ClientError::check(response.error_code, response.error_message.as_deref())?;

        let entries = response.entries.unwrap_or_default();
        if entries.is_empty() {
            return Err(ClientError::QuotaMissing {
                entity: quota_id(entity_name, entity_type),
            });
        }

        let mut quota = Quota::new(entity_type, entity_name);
        quota.ops = entries
            .iter()
            .flat_map(|entry| entry.values.iter())
            .map(|value| QuotaOp {
                key: value.key.to_string(),
                value: value.value,
                remove: false,
            })
            .collect();
        quota.ops.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(quota)
    }

    /// Apply the quota, then poll until it is readable.
    ///
    /// A quota that stays missing past the configured timeout fails with
    /// [`ClientError::ReconcileTimeout`].
    #[instrument(skip(self, quota), fields(quota = %quota.id()))]
    pub async fn create(&self, quota: &Quota) -> Result<Quota> {
        self.alter(quota, false).await?;

        let schedule = PollSchedule::from_config(self.connections.config());
        let resource = format!("quota {}", quota.id());
        let created = poll_until(&resource, schedule, move || async move {
            match self.describe(quota.entity_type, &quota.entity_name).await {
                Ok(current) => Ok(Convergence::Done(current)),
                Err(ClientError::QuotaMissing { .. }) => Ok(Convergence::Pending),
                Err(e) => Err(e),
            }
        })
        .await?;

        info!(keys = created.ops.len(), "Quota created");
        Ok(created)
    }

    /// Remove every key currently set on the entity.
    ///
    /// Under `force_delete` an alteration failure is logged and reported as
    /// success.
    #[instrument(skip(self))]
    pub async fn delete(&self, entity_type: QuotaEntityType, entity_name: &str) -> Result<()> {
        let current = self.describe(entity_type, entity_name).await?;

        match self.alter(&current.removal(), false).await {
            Ok(()) => {
                info!(keys = current.ops.len(), "Quota deleted");
                Ok(())
            }
            Err(e) if self.connections.config().force_delete => {
                warn!(quota = %current.id(), error = %e, "Quota removal failed, forcing delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Describe filter for one entity. The default entity is matched by type
/// with no match string.
fn component(entity_type: QuotaEntityType, entity_name: &str) -> ComponentData {
    let mut component = ComponentData::default()
        .with_entity_type(StrBytes::from_static_str(entity_type.as_str()));
    component.match_type = if entity_name.is_empty() {
        MATCH_DEFAULT
    } else {
        MATCH_EXACT
    };
    component._match = entity_name_of(entity_name);
    component
}

fn entity_name_of(name: &str) -> Option<StrBytes> {
    if name.is_empty() {
        None
    } else {
        Some(StrBytes::from_string(name.to_string()))
    }
}
