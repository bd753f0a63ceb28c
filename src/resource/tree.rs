//! Tree Expansion Engine
//!
//! Produces the children of a tree node on demand:
//!
//! ```text
//! Root
//! ├── Providers
//! │   └── Namespace ── ProviderResourceType ── Resource ...
//! └── Subscriptions
//!     └── Subscription ── ResourceGroup ── ResourceGroupResourceType ── Resource
//!                                                                       └── SubResourceType ── Resource ...
//! ```

use super::catalog::ProviderCatalog;
use super::model::{ArmResource, ResourceTypeDescriptor};
use super::resolver;
use crate::azure::client::{ArmClient, DEFAULT_API_VERSION};
use crate::config::DEFAULT_PORTAL_URL;
use crate::error::{ArmError, ArmResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Portal base URL and tenant, inherited from the subscription downwards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalContext {
    pub portal_url: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceNode {
    pub namespace: String,
    pub url: Option<String>,
    /// Top-level types, fetched with the namespace list
    pub resource_types: Vec<ResourceTypeDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResourceTypeNode {
    /// `{namespace}/{resourceType}`
    pub id: String,
    pub resource_type: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionNode {
    /// `/subscriptions/{subscriptionId}`
    pub id: String,
    pub display_name: String,
    pub url: Option<String>,
    pub portal: PortalContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGroupNode {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub portal: PortalContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGroupResourceTypeNode {
    /// `{resourceGroupId}/providers/{type}`
    pub id: String,
    pub resource_type: String,
    pub url: Option<String>,
    pub portal: PortalContext,
    /// Resources of this type, already fetched with the group listing
    pub resources: Vec<ArmResource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub kind: Option<String>,
    pub url: Option<String>,
    pub portal: PortalContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubResourceTypeNode {
    /// `{parentResourceId}/{childType}`
    pub id: String,
    pub child_type: String,
    pub url: Option<String>,
    pub api_version: String,
    pub portal: PortalContext,
}

/// A node of the resource tree
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Root,
    SignIn,
    Providers { url: Option<String>, filtered: bool },
    Subscriptions { url: Option<String> },
    Namespace(NamespaceNode),
    ProviderResourceType(ProviderResourceTypeNode),
    Subscription(SubscriptionNode),
    ResourceGroup(ResourceGroupNode),
    ResourceGroupResourceType(ResourceGroupResourceTypeNode),
    Resource(ResourceNode),
    ResourceWithSecrets(ResourceNode),
    SubResourceType(SubResourceTypeNode),
}

/// Kind of a tree node, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    SignIn,
    Providers,
    Subscriptions,
    Namespace,
    ProviderResourceType,
    Subscription,
    ResourceGroup,
    ResourceGroupResourceType,
    Resource,
    ResourceWithSecrets,
    SubResourceType,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Root => "Root",
            Self::SignIn => "SignInToAzure",
            Self::Providers => "Providers",
            Self::Subscriptions => "Subscriptions",
            Self::Namespace => "ProviderNamespace",
            Self::ProviderResourceType => "ProviderResourceType",
            Self::Subscription => "Subscription",
            Self::ResourceGroup => "ResourceGroup",
            Self::ResourceGroupResourceType => "ResourceGroupResourceType",
            Self::Resource => "Resource",
            Self::ResourceWithSecrets => "ResourceWithSecrets",
            Self::SubResourceType => "SubResourceType",
        };
        f.write_str(name)
    }
}

impl TreeNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Root => NodeKind::Root,
            Self::SignIn => NodeKind::SignIn,
            Self::Providers { .. } => NodeKind::Providers,
            Self::Subscriptions { .. } => NodeKind::Subscriptions,
            Self::Namespace(_) => NodeKind::Namespace,
            Self::ProviderResourceType(_) => NodeKind::ProviderResourceType,
            Self::Subscription(_) => NodeKind::Subscription,
            Self::ResourceGroup(_) => NodeKind::ResourceGroup,
            Self::ResourceGroupResourceType(_) => NodeKind::ResourceGroupResourceType,
            Self::Resource(_) => NodeKind::Resource,
            Self::ResourceWithSecrets(_) => NodeKind::ResourceWithSecrets,
            Self::SubResourceType(_) => NodeKind::SubResourceType,
        }
    }

    /// Display label
    pub fn label(&self) -> String {
        match self {
            Self::Root => "Azure".to_string(),
            Self::SignIn => "Sign in to Azure...".to_string(),
            Self::Providers { .. } => "Providers".to_string(),
            Self::Subscriptions { .. } => "Subscriptions".to_string(),
            Self::Namespace(n) => n.namespace.clone(),
            Self::ProviderResourceType(n) => n.resource_type.clone(),
            Self::Subscription(n) => n.display_name.clone(),
            Self::ResourceGroup(n) => n.name.clone(),
            Self::ResourceGroupResourceType(n) => {
                format!("{} ({})", n.resource_type, n.resources.len())
            }
            Self::Resource(n) | Self::ResourceWithSecrets(n) => n.name.clone(),
            Self::SubResourceType(n) => n.child_type.clone(),
        }
    }

    /// Secondary text shown next to the label
    pub fn description(&self) -> Option<String> {
        match self {
            Self::Providers { filtered: true, .. } => Some("(filtered)".to_string()),
            Self::Resource(n) | Self::ResourceWithSecrets(n) => n.location.clone(),
            _ => None,
        }
    }

    /// Opaque identifier: a resource ID, a namespace, or a listing path
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::Root | Self::SignIn | Self::Providers { .. } | Self::Subscriptions { .. } => None,
            Self::Namespace(n) => Some(&n.namespace),
            Self::ProviderResourceType(n) => Some(&n.id),
            Self::Subscription(n) => Some(&n.id),
            Self::ResourceGroup(n) => Some(&n.id),
            Self::ResourceGroupResourceType(n) => Some(&n.id),
            Self::Resource(n) | Self::ResourceWithSecrets(n) => Some(&n.id),
            Self::SubResourceType(n) => Some(&n.id),
        }
    }

    /// Pre-resolved ARM URL for this node
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Root | Self::SignIn => None,
            Self::Providers { url, .. } | Self::Subscriptions { url } => url.as_deref(),
            Self::Namespace(n) => n.url.as_deref(),
            Self::ProviderResourceType(n) => n.url.as_deref(),
            Self::Subscription(n) => n.url.as_deref(),
            Self::ResourceGroup(n) => n.url.as_deref(),
            Self::ResourceGroupResourceType(n) => n.url.as_deref(),
            Self::Resource(n) | Self::ResourceWithSecrets(n) => n.url.as_deref(),
            Self::SubResourceType(n) => n.url.as_deref(),
        }
    }

    pub fn portal(&self) -> Option<&PortalContext> {
        match self {
            Self::Subscription(n) => Some(&n.portal),
            Self::ResourceGroup(n) => Some(&n.portal),
            Self::ResourceGroupResourceType(n) => Some(&n.portal),
            Self::Resource(n) | Self::ResourceWithSecrets(n) => Some(&n.portal),
            Self::SubResourceType(n) => Some(&n.portal),
            _ => None,
        }
    }

    /// `{portalUrl}/#@{tenantId}/resource{nodeId}`
    pub fn portal_link(&self) -> Option<String> {
        let portal = self.portal()?;
        let base = portal.portal_url.as_deref()?;
        let tenant = portal.tenant_id.as_deref()?;
        let id = self.node_id()?;
        Some(format!("{}/#@{}/resource{}", base.trim_end_matches('/'), tenant, id))
    }

    /// ARM resource ID for nodes that represent a single resource
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Self::Resource(n) | Self::ResourceWithSecrets(n) => Some(&n.id),
            _ => None,
        }
    }

    /// Whether the node can have children
    pub fn is_expandable(&self) -> bool {
        !matches!(self, Self::SignIn)
    }
}

/// Insert keeping ascending label order; later equal labels go after earlier ones.
/// Nodes repeating an identifier already present are dropped.
fn insert_sorted(nodes: &mut Vec<TreeNode>, node: TreeNode) {
    if let Some(id) = node.node_id() {
        if nodes.iter().any(|n| n.node_id() == Some(id)) {
            return;
        }
    }

    let label = node.label();
    let index = nodes
        .iter()
        .position(|n| n.label() > label)
        .unwrap_or(nodes.len());
    nodes.insert(index, node);
}

/// Expands tree nodes using the provider catalog and the ARM client
pub struct TreeExplorer {
    client: ArmClient,
    catalog: Arc<ProviderCatalog>,
    provider_filter: RwLock<Vec<String>>,
}

impl TreeExplorer {
    pub fn new(catalog: Arc<ProviderCatalog>, provider_filter: Vec<String>) -> Self {
        Self {
            client: catalog.client().clone(),
            catalog,
            provider_filter: RwLock::new(provider_filter),
        }
    }

    /// Replace the namespace allow-list (empty shows everything)
    pub fn set_provider_filter(&self, namespaces: Vec<String>) {
        *self
            .provider_filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = namespaces;
    }

    pub fn provider_filter(&self) -> Vec<String> {
        self.provider_filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn namespace_selected(filter: &[String], namespace: &str) -> bool {
        filter.is_empty() || filter.iter().any(|ns| ns.eq_ignore_ascii_case(namespace))
    }

    /// Drop cached catalog data; the next expansion re-fetches
    pub fn refresh(&self) {
        self.catalog.cleanup();
    }

    fn url(&self, path: &str, api_version: &str) -> Option<String> {
        self.client.resource_url(path, api_version).ok()
    }

    /// Children of `parent`, sorted by label
    pub async fn expand(&self, parent: &TreeNode) -> ArmResult<Vec<TreeNode>> {
        tracing::debug!("Expanding {} {}", parent.kind(), parent.label());

        let mut result = Vec::new();

        match parent {
            TreeNode::Root => {
                if !self.client.identity().is_signed_in().await {
                    result.push(TreeNode::SignIn);
                    return Ok(result);
                }

                result.push(TreeNode::Providers {
                    url: self.url("/providers", DEFAULT_API_VERSION),
                    filtered: !self.provider_filter().is_empty(),
                });
                result.push(TreeNode::Subscriptions {
                    url: self.url("/subscriptions", DEFAULT_API_VERSION),
                });
            }

            TreeNode::SignIn => {}

            TreeNode::Providers { .. } => {
                let filter = self.provider_filter();
                for namespace in self.catalog.get_namespaces().await? {
                    if !Self::namespace_selected(&filter, &namespace) {
                        continue;
                    }
                    let node = NamespaceNode {
                        url: self.url(&format!("/providers/{}", namespace), DEFAULT_API_VERSION),
                        resource_types: self
                            .catalog
                            .get_resource_types_for_namespace(&namespace)
                            .await?,
                        namespace,
                    };
                    insert_sorted(&mut result, TreeNode::Namespace(node));
                }
            }

            TreeNode::Namespace(parent) => {
                for descriptor in &parent.resource_types {
                    let node = ProviderResourceTypeNode {
                        id: format!("{}/{}", parent.namespace, descriptor.resource_type),
                        resource_type: descriptor.resource_type.clone(),
                        url: self.url(
                            &format!("/providers/{}", parent.namespace),
                            DEFAULT_API_VERSION,
                        ),
                    };
                    insert_sorted(&mut result, TreeNode::ProviderResourceType(node));
                }
            }

            TreeNode::ProviderResourceType(parent) => {
                let listing = self.client.query_graph(&parent.id).await?;
                for value in &listing {
                    let resource = ArmResource::from_value(value)?;
                    let portal = PortalContext {
                        portal_url: Some(DEFAULT_PORTAL_URL.to_string()),
                        tenant_id: resource.tenant_id.clone(),
                    };
                    let node = self.resource_node(&resource, portal).await;
                    insert_sorted(&mut result, node);
                }
            }

            TreeNode::Subscriptions { .. } => {
                let identity = self.client.identity();
                if !identity.is_signed_in().await {
                    return Err(ArmError::AuthRequired(
                        "Sign in to list subscriptions.".to_string(),
                    ));
                }

                for subscription in identity.get_subscriptions().await? {
                    let id = format!("/subscriptions/{}", subscription.subscription_id);
                    let node = SubscriptionNode {
                        url: self.url(&id, DEFAULT_API_VERSION),
                        id,
                        display_name: subscription.display_name,
                        portal: PortalContext {
                            portal_url: Some(subscription.portal_url),
                            tenant_id: subscription.tenant_id,
                        },
                    };
                    insert_sorted(&mut result, TreeNode::Subscription(node));
                }
            }

            TreeNode::Subscription(parent) => {
                let listing = self
                    .client
                    .get(&format!("{}/resourcegroups", parent.id), None)
                    .await?;
                for group in ArmResource::list_from(&listing)? {
                    let node = ResourceGroupNode {
                        url: self.url(&group.id, DEFAULT_API_VERSION),
                        id: group.id,
                        name: group.name,
                        portal: parent.portal.clone(),
                    };
                    insert_sorted(&mut result, TreeNode::ResourceGroup(node));
                }
            }

            TreeNode::ResourceGroup(parent) => {
                let listing = self
                    .client
                    .get(&format!("{}/resources", parent.id), None)
                    .await?;

                let mut by_type: BTreeMap<String, Vec<ArmResource>> = BTreeMap::new();
                for resource in ArmResource::list_from(&listing)? {
                    by_type
                        .entry(resource.resource_type.clone())
                        .or_default()
                        .push(resource);
                }

                for (resource_type, resources) in by_type {
                    let api_version = match resources.first() {
                        Some(first) => self.api_version_or_default(&first.id).await,
                        None => DEFAULT_API_VERSION.to_string(),
                    };
                    let id = format!("{}/providers/{}", parent.id, resource_type);
                    let node = ResourceGroupResourceTypeNode {
                        url: self.url(&id, &api_version),
                        id,
                        resource_type,
                        portal: parent.portal.clone(),
                        resources,
                    };
                    insert_sorted(&mut result, TreeNode::ResourceGroupResourceType(node));
                }
            }

            TreeNode::ResourceGroupResourceType(parent) => {
                for resource in &parent.resources {
                    let node = self.resource_node(resource, parent.portal.clone()).await;
                    insert_sorted(&mut result, node);
                }
            }

            TreeNode::Resource(parent) | TreeNode::ResourceWithSecrets(parent) => {
                let child_types = self.catalog.get_child_resource_types(&parent.id).await?;
                if child_types.is_empty() {
                    return Ok(result);
                }

                let api_version = self.catalog.get_api_version(&parent.id).await?;
                for child_type in child_types {
                    let id = format!("{}/{}", parent.id, child_type);
                    let node = SubResourceTypeNode {
                        url: self.url(&id, &api_version),
                        id,
                        child_type,
                        api_version: api_version.clone(),
                        portal: parent.portal.clone(),
                    };
                    insert_sorted(&mut result, TreeNode::SubResourceType(node));
                }
            }

            TreeNode::SubResourceType(parent) => {
                let resources = match self.client.get(&parent.id, Some(&parent.api_version)).await {
                    Ok(listing) => ArmResource::list_from(&listing),
                    Err(err) => Err(err),
                };

                match resources {
                    Ok(resources) => {
                        for resource in &resources {
                            let node = self.resource_node(resource, parent.portal.clone()).await;
                            insert_sorted(&mut result, node);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Failed to load subresources of {}. {}", parent.id, err);
                    }
                }
            }
        }

        Ok(result)
    }

    async fn api_version_or_default(&self, resource_id: &str) -> String {
        match self.catalog.get_api_version(resource_id).await {
            Ok(version) => version,
            Err(err) => {
                tracing::debug!("No catalog api-version for {}: {}", resource_id, err);
                DEFAULT_API_VERSION.to_string()
            }
        }
    }

    /// Resource node, flagged when the type carries secrets
    async fn resource_node(&self, resource: &ArmResource, portal: PortalContext) -> TreeNode {
        let url = match self.catalog.get_api_version(&resource.id).await {
            Ok(version) => self.url(&resource.id, &version),
            Err(err) => {
                tracing::debug!("No URL for {}: {}", resource.id, err);
                None
            }
        };

        let node = ResourceNode {
            id: resource.id.clone(),
            name: resource.name.clone(),
            location: resource.location.clone(),
            kind: resource.kind.clone(),
            url,
            portal,
        };

        if resolver::is_secret_bearing(&resource.id) {
            TreeNode::ResourceWithSecrets(node)
        } else {
            TreeNode::Resource(node)
        }
    }
}
