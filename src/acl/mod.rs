//! ACL client and its cached view of every ACL in the cluster.

mod cache;

pub use cache::{AclCache, AclSnapshot, CacheMetrics};

use crate::{
    connection::ConnectionManager,
    error::{ClientError, Result},
    types::{
        AclBinding, AclEntry, AclOperation, AclPatternType, AclPermissionType, AclResource,
        AclResourceType, AclSpec, ResourceAcls,
    },
};
use kafka_protocol::{
    messages::{
        create_acls_request::AclCreation, delete_acls_request::DeleteAclsFilter,
        CreateAclsRequest, DeleteAclsRequest, DescribeAclsRequest, DescribeAclsResponse,
    },
    protocol::StrBytes,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Create, delete and list ACLs
#[derive(Debug)]
pub struct AclClient {
    connections: Arc<ConnectionManager>,
    cache: AclCache,
}

impl AclClient {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            cache: AclCache::new(),
        }
    }

    /// Create an ACL from caller text; enum fields are validated before
    /// anything is sent.
    pub async fn create(&self, acl: &AclSpec) -> Result<AclBinding> {
        let binding = acl.to_binding()?;
        self.create_binding(&binding).await?;
        Ok(binding)
    }

    #[instrument(skip(self, binding), fields(acl = %binding))]
    pub async fn create_binding(&self, binding: &AclBinding) -> Result<()> {
        let creation = AclCreation::default()
            .with_resource_type(binding.resource.resource_type.code())
            .with_resource_name(StrBytes::from_string(binding.resource.name.clone()))
            .with_resource_pattern_type(binding.resource.pattern_type.code())
            .with_principal(StrBytes::from_string(binding.entry.principal.clone()))
            .with_host(StrBytes::from_string(binding.entry.host.clone()))
            .with_operation(binding.entry.operation.code())
            .with_permission_type(binding.entry.permission_type.code());

        let response = self
            .connections
            .send_to_controller(CreateAclsRequest::default().with_creations(vec![creation]))
            .await?;
        for result in &response.results {
            ClientError::check(result.error_code, result.error_message.as_deref())?;
        }

        self.cache.invalidate().await;
        info!("ACL created");
        Ok(())
    }

    /// Delete an ACL from caller text
    pub async fn delete(&self, acl: &AclSpec) -> Result<()> {
        let binding = acl.to_binding()?;
        self.delete_binding(&binding).await
    }

    /// Delete exactly this ACL. Fails with [`ClientError::AclMissing`] when
    /// the filter matched nothing.
    #[instrument(skip(self, binding), fields(acl = %binding))]
    pub async fn delete_binding(&self, binding: &AclBinding) -> Result<()> {
        let filter = DeleteAclsFilter::default()
            .with_resource_type_filter(binding.resource.resource_type.code())
            .with_resource_name_filter(Some(StrBytes::from_string(binding.resource.name.clone())))
            .with_pattern_type_filter(binding.resource.pattern_type.code())
            .with_principal_filter(Some(StrBytes::from_string(binding.entry.principal.clone())))
            .with_host_filter(Some(StrBytes::from_string(binding.entry.host.clone())))
            .with_operation(binding.entry.operation.code())
            .with_permission_type(binding.entry.permission_type.code());

        let response = self
            .connections
            .send_to_controller(DeleteAclsRequest::default().with_filters(vec![filter]))
            .await?;

        let mut deleted = 0;
        for result in &response.filter_results {
            ClientError::check(result.error_code, result.error_message.as_deref())?;
            for matching in &result.matching_acls {
                ClientError::check(matching.error_code, matching.error_message.as_deref())?;
                deleted += 1;
            }
        }

        if deleted == 0 {
            return Err(ClientError::AclMissing { acl: binding.id() });
        }

        self.cache.invalidate().await;
        info!(deleted, "ACL deleted");
        Ok(())
    }

    /// Every ACL in the cluster, served from the cache when it is valid
    pub async fn list(&self) -> Result<AclSnapshot> {
        self.cache.get_or_fill(|| self.scan()).await
    }

    /// Drop the cached snapshot
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Look the ACL up in the (possibly cached) full list.
    ///
    /// Fails with [`ClientError::AclMissing`] when no ACL on the resource
    /// matches every field.
    pub async fn read(&self, binding: &AclBinding) -> Result<AclBinding> {
        let snapshot = self.list().await?;
        let on_resource: Vec<&ResourceAcls> = snapshot
            .iter()
            .filter(|r| r.resource.name == binding.resource.name)
            .collect();

        if on_resource.iter().all(|r| r.acls.is_empty()) {
            debug!(resource = %binding.resource.name, "No ACLs on resource");
            return Err(ClientError::AclMissing { acl: binding.id() });
        }

        on_resource
            .iter()
            .filter(|r| r.resource == binding.resource)
            .flat_map(|r| r.acls.iter())
            .find(|entry| **entry == binding.entry)
            .map(|_| binding.clone())
            .ok_or_else(|| ClientError::AclMissing { acl: binding.id() })
    }

    /// Every ACL bound to a resource with this name
    pub async fn acls_for_resource(&self, name: &str) -> Result<Vec<AclBinding>> {
        let snapshot = self.list().await?;
        Ok(snapshot
            .iter()
            .filter(|r| r.resource.name == name)
            .flat_map(|r| {
                r.acls.iter().map(move |entry| AclBinding {
                    resource: r.resource.clone(),
                    entry: entry.clone(),
                })
            })
            .collect())
    }

    /// One DescribeAcls per scanned resource type, with every other filter
    /// field set to match anything.
    #[instrument(skip(self))]
    async fn scan(&self) -> Result<Vec<ResourceAcls>> {
        let mut all = Vec::new();
        for resource_type in AclResourceType::SCANNED {
            let request = DescribeAclsRequest::default()
                .with_resource_type_filter(resource_type.code())
                .with_resource_name_filter(None)
                .with_pattern_type_filter(AclPatternType::Any.code())
                .with_principal_filter(None)
                .with_host_filter(None)
                .with_operation(AclOperation::Any.code())
                .with_permission_type(AclPermissionType::Any.code());

            let response = self.connections.send_to_controller(request).await?;
            ClientError::check(response.error_code, response.error_message.as_deref())?;
            let resources = resources_from(response);
            debug!(%resource_type, resources = resources.len(), "Described ACLs");
            all.extend(resources);
        }
        Ok(all)
    }
}

fn resources_from(response: DescribeAclsResponse) -> Vec<ResourceAcls> {
    response
        .resources
        .into_iter()
        .filter_map(|resource| {
            let (Some(resource_type), Some(pattern_type)) = (
                AclResourceType::from_code(resource.resource_type),
                AclPatternType::from_code(resource.pattern_type),
            ) else {
                warn!(
                    resource_type = resource.resource_type,
                    pattern_type = resource.pattern_type,
                    "Skipping ACL resource with unknown codes"
                );
                return None;
            };

            let acls = resource
                .acls
                .iter()
                .filter_map(|acl| {
                    Some(AclEntry {
                        principal: acl.principal.to_string(),
                        host: acl.host.to_string(),
                        operation: AclOperation::from_code(acl.operation)?,
                        permission_type: AclPermissionType::from_code(acl.permission_type)?,
                    })
                })
                .collect();

            Some(ResourceAcls {
                resource: AclResource {
                    resource_type,
                    name: resource.resource_name.to_string(),
                    pattern_type,
                },
                acls,
            })
        })
        .collect()
}
