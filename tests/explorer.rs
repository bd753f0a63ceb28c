//! Integration tests for the provider catalog and tree expansion
//!
//! ARM is mocked with wiremock; the provider listing is served from
//! `/providers` like the real endpoint.

use serde_json::{json, Value};
use std::sync::Arc;
use tarm::azure::auth::StaticIdentity;
use tarm::azure::client::ArmClient;
use tarm::azure::subscriptions::Subscription;
use tarm::config::Config;
use tarm::error::ArmError;
use tarm::resource::tree::{
    NodeKind, PortalContext, ResourceGroupNode, ResourceNode, SubResourceTypeNode,
    SubscriptionNode,
};
use tarm::resource::{ProviderCatalog, TreeExplorer, TreeNode};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RG: &str = "/subscriptions/s/resourceGroups/rg";
const VAULT: &str = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv1";

fn keyvault_provider() -> Value {
    json!({
        "namespace": "Microsoft.KeyVault",
        "resourceTypes": [
            {
                "resourceType": "vaults",
                "apiVersions": ["2023-07-01", "2022-07-01"],
                "defaultApiVersion": "2022-07-01"
            },
            { "resourceType": "vaults/secrets", "apiVersions": ["2023-02-01"] },
            { "resourceType": "vaults/keys", "apiVersions": ["2023-02-01"] },
            { "resourceType": "vaults/keys/versions", "apiVersions": ["2023-02-01"] },
            { "resourceType": "operations", "apiVersions": ["2023-02-01"] }
        ]
    })
}

fn storage_provider() -> Value {
    json!({
        "namespace": "Microsoft.Storage",
        "resourceTypes": [
            { "resourceType": "storageAccounts", "apiVersions": ["2023-01-01", "2022-09-01"] }
        ]
    })
}

/// Serve the provider listing as two pages
async fn mount_providers(server: &MockServer, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path("/providers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [keyvault_provider()],
            "nextLink": format!("{}/providers-page2", server.uri())
        })))
        .expect(expected_fetches)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/providers-page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [storage_provider()]
        })))
        .expect(expected_fetches)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> ArmClient {
    let config = Config {
        endpoint: Some(server.uri()),
        ..Default::default()
    };
    let identity = StaticIdentity::new("test-token").with_subscriptions(vec![Subscription {
        subscription_id: "s".to_string(),
        display_name: "Dev".to_string(),
        tenant_id: Some("t1".to_string()),
        portal_url: "https://portal.azure.com".to_string(),
    }]);
    ArmClient::new(Arc::new(identity), &config).unwrap()
}

fn explorer_for(server: &MockServer, filter: Vec<String>) -> TreeExplorer {
    let catalog = Arc::new(ProviderCatalog::new(client_for(server)));
    TreeExplorer::new(catalog, filter)
}

fn labels(nodes: &[TreeNode]) -> Vec<String> {
    nodes.iter().map(TreeNode::label).collect()
}

/// Provider catalog behaviour
mod catalog_tests {
    use super::*;

    /// Concurrent and repeated callers share one fetch sequence
    #[tokio::test]
    async fn test_provider_map_is_fetched_once() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;

        let catalog = ProviderCatalog::new(client_for(&server));
        let (a, b, c) = tokio::join!(
            catalog.get_provider_map(),
            catalog.get_provider_map(),
            catalog.get_namespaces()
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.len(), 2);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.unwrap(), vec!["microsoft.keyvault", "microsoft.storage"]);

        let again = catalog.get_provider_map().await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
    }

    /// cleanup forces a new fetch
    #[tokio::test]
    async fn test_cleanup_refetches() {
        let server = MockServer::start().await;
        mount_providers(&server, 2).await;

        let catalog = ProviderCatalog::new(client_for(&server));
        catalog.get_provider_map().await.unwrap();
        catalog.cleanup();
        catalog.get_provider_map().await.unwrap();
    }

    /// A failed fetch is not cached
    #[tokio::test]
    async fn test_failed_fetch_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/providers"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/providers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [storage_provider()]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = ProviderCatalog::new(client_for(&server));
        assert_eq!(catalog.get_provider_map().await.unwrap_err().status(), Some(500));
        assert_eq!(catalog.get_namespaces().await.unwrap(), vec!["microsoft.storage"]);
    }

    /// defaultApiVersion wins, else the first listed version
    #[tokio::test]
    async fn test_get_api_version() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;
        let catalog = ProviderCatalog::new(client_for(&server));

        assert_eq!(catalog.get_api_version(VAULT).await.unwrap(), "2022-07-01");
        assert_eq!(
            catalog
                .get_api_version(&format!("{}/providers/microsoft.storage/STORAGEACCOUNTS/foo", RG))
                .await
                .unwrap(),
            "2023-01-01"
        );

        assert!(matches!(
            catalog.get_api_version(RG).await,
            Err(ArmError::MalformedResourceId(_))
        ));
        assert!(matches!(
            catalog
                .get_api_version(&format!("{}/providers/Microsoft.Web/sites/app", RG))
                .await,
            Err(ArmError::Resolution(_))
        ));
    }

    /// Child types are trimmed to their immediate segment
    #[tokio::test]
    async fn test_child_resource_types() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;
        let catalog = ProviderCatalog::new(client_for(&server));

        let mut children = catalog.get_child_resource_types(VAULT).await.unwrap();
        children.sort();
        assert_eq!(children, vec!["keys", "secrets"]);

        let nested = catalog
            .get_child_resource_types(&format!("{}/keys/k1", VAULT))
            .await
            .unwrap();
        assert_eq!(nested, vec!["versions"]);
    }

    /// Only top-level types are listed per namespace
    #[tokio::test]
    async fn test_resource_types_for_namespace() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;
        let catalog = ProviderCatalog::new(client_for(&server));

        let types: Vec<String> = catalog
            .get_resource_types_for_namespace("Microsoft.KeyVault")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.resource_type)
            .collect();
        assert_eq!(types, vec!["vaults", "operations"]);
        assert!(catalog
            .get_resource_types_for_namespace("Microsoft.Nothing")
            .await
            .unwrap()
            .is_empty());
    }
}

/// Tree expansion behaviour
mod tree_tests {
    use super::*;

    /// Root shows Providers and Subscriptions for a signed-in identity
    #[tokio::test]
    async fn test_root_children() {
        let server = MockServer::start().await;
        let explorer = explorer_for(&server, Vec::new());

        let children = explorer.expand(&TreeNode::Root).await.unwrap();
        assert_eq!(labels(&children), vec!["Providers", "Subscriptions"]);
        assert_eq!(children[0].description(), None);

        let filtered = explorer_for(&server, vec!["Microsoft.Storage".to_string()]);
        let children = filtered.expand(&TreeNode::Root).await.unwrap();
        assert_eq!(children[0].description().as_deref(), Some("(filtered)"));
    }

    /// Providers honours the namespace filter
    #[tokio::test]
    async fn test_providers_filtered() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;

        let explorer = explorer_for(&server, vec!["Microsoft.Storage".to_string()]);
        let providers = TreeNode::Providers { url: None, filtered: true };
        let namespaces = explorer.expand(&providers).await.unwrap();
        assert_eq!(labels(&namespaces), vec!["microsoft.storage"]);

        let types = explorer.expand(&namespaces[0]).await.unwrap();
        assert_eq!(labels(&types), vec!["storageAccounts"]);
        assert_eq!(types[0].node_id(), Some("microsoft.storage/storageAccounts"));
        assert_eq!(types[0].kind(), NodeKind::ProviderResourceType);
    }

    /// Subscriptions come from the identity and carry portal context
    #[tokio::test]
    async fn test_subscriptions() {
        let server = MockServer::start().await;
        let explorer = explorer_for(&server, Vec::new());

        let subscriptions = explorer
            .expand(&TreeNode::Subscriptions { url: None })
            .await
            .unwrap();
        assert_eq!(labels(&subscriptions), vec!["Dev"]);
        assert_eq!(subscriptions[0].node_id(), Some("/subscriptions/s"));
        assert_eq!(
            subscriptions[0].portal_link().as_deref(),
            Some("https://portal.azure.com/#@t1/resource/subscriptions/s")
        );
    }

    /// Resource groups are listed sorted, inheriting the portal context
    #[tokio::test]
    async fn test_subscription_children() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/s/resourcegroups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "id": "/subscriptions/s/resourceGroups/zeta", "name": "zeta" },
                    { "id": "/subscriptions/s/resourceGroups/alpha", "name": "alpha" },
                    { "id": "/subscriptions/s/resourceGroups/alpha", "name": "alpha" }
                ]
            })))
            .mount(&server)
            .await;

        let explorer = explorer_for(&server, Vec::new());
        let subscription = TreeNode::Subscription(SubscriptionNode {
            id: "/subscriptions/s".to_string(),
            display_name: "Dev".to_string(),
            url: None,
            portal: PortalContext {
                portal_url: Some("https://portal.azure.com".to_string()),
                tenant_id: Some("t1".to_string()),
            },
        });

        let groups = explorer.expand(&subscription).await.unwrap();
        assert_eq!(labels(&groups), vec!["alpha", "zeta"]);
        assert_eq!(groups[0].kind(), NodeKind::ResourceGroup);
        assert_eq!(
            groups[0].portal_link().as_deref(),
            Some("https://portal.azure.com/#@t1/resource/subscriptions/s/resourceGroups/alpha")
        );
    }

    /// Two storage accounts become one type node with sorted children
    #[tokio::test]
    async fn test_resource_group_groups_by_type() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(format!("{}/resources", RG)))
            .and(query_param("api-version", "2023-07-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": format!("{}/providers/Microsoft.Storage/storageAccounts/foo", RG),
                        "name": "foo",
                        "type": "Microsoft.Storage/storageAccounts",
                        "location": "westeurope"
                    },
                    {
                        "id": format!("{}/providers/Microsoft.Storage/storageAccounts/bar", RG),
                        "name": "bar",
                        "type": "Microsoft.Storage/storageAccounts",
                        "location": "westeurope"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let explorer = explorer_for(&server, Vec::new());
        let group = TreeNode::ResourceGroup(ResourceGroupNode {
            id: RG.to_string(),
            name: "rg".to_string(),
            url: None,
            portal: PortalContext::default(),
        });

        let types = explorer.expand(&group).await.unwrap();
        assert_eq!(labels(&types), vec!["Microsoft.Storage/storageAccounts (2)"]);
        assert!(types[0].url().unwrap().contains("api-version=2023-01-01"));

        let accounts = explorer.expand(&types[0]).await.unwrap();
        assert_eq!(labels(&accounts), vec!["bar", "foo"]);
        assert!(accounts
            .iter()
            .all(|n| n.kind() == NodeKind::ResourceWithSecrets));
        assert_eq!(accounts[0].description().as_deref(), Some("westeurope"));
        assert_eq!(
            accounts[0].url(),
            Some(
                format!(
                    "{}{}/providers/Microsoft.Storage/storageAccounts/bar?api-version=2023-01-01",
                    server.uri(),
                    RG
                )
                .as_str()
            )
        );
    }

    /// A resource of an unknown type still gets a node, without URL
    #[tokio::test]
    async fn test_unresolvable_type_has_no_url() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(format!("{}/resources", RG)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": format!("{}/providers/Contoso.Widgets/widgets/w1", RG),
                    "name": "w1",
                    "type": "Contoso.Widgets/widgets"
                }]
            })))
            .mount(&server)
            .await;

        let explorer = explorer_for(&server, Vec::new());
        let group = TreeNode::ResourceGroup(ResourceGroupNode {
            id: RG.to_string(),
            name: "rg".to_string(),
            url: None,
            portal: PortalContext::default(),
        });

        let types = explorer.expand(&group).await.unwrap();
        let widgets = explorer.expand(&types[0]).await.unwrap();
        assert_eq!(labels(&widgets), vec!["w1"]);
        assert_eq!(widgets[0].kind(), NodeKind::Resource);
        assert_eq!(widgets[0].url(), None);
    }

    /// Resources list their child types; a failing child listing is empty
    #[tokio::test]
    async fn test_resource_children_and_failing_sub_resources() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(format!("{}/secrets", VAULT)))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": "Forbidden", "message": "no access" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{}/keys", VAULT)))
            .and(query_param("api-version", "2022-07-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": format!("{}/keys/k1", VAULT),
                    "name": "k1",
                    "type": "Microsoft.KeyVault/vaults/keys"
                }]
            })))
            .mount(&server)
            .await;

        let explorer = explorer_for(&server, Vec::new());
        let vault = TreeNode::Resource(ResourceNode {
            id: VAULT.to_string(),
            name: "kv1".to_string(),
            location: None,
            kind: None,
            url: None,
            portal: PortalContext::default(),
        });

        let child_types = explorer.expand(&vault).await.unwrap();
        assert_eq!(labels(&child_types), vec!["keys", "secrets"]);
        assert_eq!(child_types[0].node_id(), Some(format!("{}/keys", VAULT).as_str()));

        let keys = explorer.expand(&child_types[0]).await.unwrap();
        assert_eq!(labels(&keys), vec!["k1"]);
        assert_eq!(keys[0].kind(), NodeKind::ResourceWithSecrets);

        let secrets = explorer.expand(&child_types[1]).await.unwrap();
        assert!(secrets.is_empty());
    }

    /// Errors outside sub-resource listings reach the caller
    #[tokio::test]
    async fn test_resource_group_error_propagates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("{}/resources", RG)))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let explorer = explorer_for(&server, Vec::new());
        let group = TreeNode::ResourceGroup(ResourceGroupNode {
            id: RG.to_string(),
            name: "rg".to_string(),
            url: None,
            portal: PortalContext::default(),
        });

        let err = explorer.expand(&group).await.unwrap_err();
        assert_eq!(err.status(), Some(500));

        let sub_resources = TreeNode::SubResourceType(SubResourceTypeNode {
            id: format!("{}/nothing", VAULT),
            child_type: "nothing".to_string(),
            url: None,
            api_version: "2022-07-01".to_string(),
            portal: PortalContext::default(),
        });
        assert!(explorer.expand(&sub_resources).await.unwrap().is_empty());
    }

    /// Graph matches become resource nodes with the public portal
    #[tokio::test]
    async fn test_provider_resource_type_uses_graph() {
        let server = MockServer::start().await;
        mount_providers(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": VAULT,
                    "name": "kv1",
                    "type": "microsoft.keyvault/vaults",
                    "tenantId": "t9"
                }]
            })))
            .mount(&server)
            .await;

        let explorer = explorer_for(&server, Vec::new());
        let namespaces = explorer
            .expand(&TreeNode::Providers { url: None, filtered: false })
            .await
            .unwrap();
        let keyvault = namespaces
            .iter()
            .find(|n| n.label() == "microsoft.keyvault")
            .unwrap();
        let types = explorer.expand(keyvault).await.unwrap();
        assert_eq!(labels(&types), vec!["operations", "vaults"]);

        let vaults = explorer.expand(&types[1]).await.unwrap();
        assert_eq!(labels(&vaults), vec!["kv1"]);
        assert_eq!(
            vaults[0].portal_link().as_deref(),
            Some(format!("https://portal.azure.com/#@t9/resource{}", VAULT).as_str())
        );
    }
}
