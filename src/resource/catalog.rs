//! Provider Catalog
//!
//! Caches the `GET /providers` listing: which resource types exist under
//! each namespace, and which api-versions they accept.

use super::model::{build_provider_map, ProviderMap, ResourceTypeDescriptor};
use super::resolver;
use crate::azure::client::ArmClient;
use crate::error::{ArmError, ArmResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError};

type ProviderMapFuture = Shared<BoxFuture<'static, ArmResult<Arc<ProviderMap>>>>;

/// Session-wide cache of the provider map.
///
/// The first caller starts the fetch; callers arriving before it completes
/// await the same shared future. Failed fetches are not kept.
pub struct ProviderCatalog {
    client: ArmClient,
    map: Mutex<Option<ProviderMapFuture>>,
}

impl ProviderCatalog {
    pub fn new(client: ArmClient) -> Self {
        Self {
            client,
            map: Mutex::new(None),
        }
    }

    /// The client used for the provider listing
    pub fn client(&self) -> &ArmClient {
        &self.client
    }

    /// Get the provider map, fetching it on first use
    pub async fn get_provider_map(&self) -> ArmResult<Arc<ProviderMap>> {
        let pending = {
            let mut slot = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let client = self.client.clone();
                    let pending = async move {
                        tracing::info!("Loading provider catalog");
                        let listing = client.get("/providers", None).await?;
                        let map = build_provider_map(&listing)?;
                        tracing::info!("Loaded {} provider namespaces", map.len());
                        Ok(Arc::new(map))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        if let Err(err) = &result {
            tracing::warn!("Provider catalog fetch failed: {}", err);
            let mut slot = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
                *slot = None;
            }
        }

        result
    }

    /// All namespaces, lower-cased, in lexicographic order
    pub async fn get_namespaces(&self) -> ArmResult<Vec<String>> {
        Ok(self.get_provider_map().await?.keys().cloned().collect())
    }

    /// Top-level resource types of a namespace
    pub async fn get_resource_types_for_namespace(
        &self,
        namespace: &str,
    ) -> ArmResult<Vec<ResourceTypeDescriptor>> {
        let map = self.get_provider_map().await?;
        Ok(map
            .get(&namespace.to_lowercase())
            .map(|types| types.iter().filter(|t| t.is_top_level()).cloned().collect())
            .unwrap_or_default())
    }

    /// Immediate child type segments registered under a resource's own type
    pub async fn get_child_resource_types(&self, resource_id: &str) -> ArmResult<Vec<String>> {
        let (namespace, own_type) = resolver::resource_type_path(resource_id)?;
        let map = self.get_provider_map().await?;

        Ok(map
            .get(&namespace.to_lowercase())
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| resolver::child_type_segment(&own_type, &t.resource_type))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// api-version for a resource: `defaultApiVersion`, else the newest listed
    pub async fn get_api_version(&self, resource_id: &str) -> ArmResult<String> {
        let (namespace, resource_type) = resolver::provider_and_type(resource_id)?;
        let map = self.get_provider_map().await?;

        let unresolved = || {
            ArmError::resolution(format!("an apiVersion for resource {}", resource_id))
        };

        map.get(&namespace.to_lowercase())
            .and_then(|types| {
                types
                    .iter()
                    .find(|t| t.resource_type.eq_ignore_ascii_case(&resource_type))
            })
            .and_then(|t| t.api_version())
            .map(str::to_string)
            .ok_or_else(unresolved)
    }

    /// Drop the cached map so the next call re-fetches
    pub fn cleanup(&self) {
        let mut slot = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            tracing::info!("Provider catalog invalidated");
        }
    }
}
