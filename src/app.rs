//! Application State
//!
//! Session state shared by the one-shot commands and the interactive browser:
//! the ARM client, the provider catalog, the tree explorer, open documents,
//! and the navigation path through the tree.

use crate::azure::client::ArmClient;
use crate::command::CommandQueue;
use crate::config::Config;
use crate::error::{format_arm_error, ArmError};
use crate::resource::document::{document_uri, pretty_json, DocumentStore, WriteConfirmer};
use crate::resource::{resolver, template, ProviderCatalog, TreeExplorer, TreeNode};
use crate::shell;
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

static ROOT: TreeNode = TreeNode::Root;

/// Documents the browser keeps open; older ones are dropped on `show`
pub const OPEN_DOCUMENT_LIMIT: usize = 16;

fn subscription_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^/subscriptions/([^/]+)").expect("valid regex"))
}

/// One line describing a node: label, description, kind
pub fn describe_node(node: &TreeNode) -> String {
    match node.description() {
        Some(description) => format!("{}  {}  [{}]", node.label(), description, node.kind()),
        None => format!("{}  [{}]", node.label(), node.kind()),
    }
}

/// Pick a node by index, label (exact, then case-insensitive), or identifier
pub fn select<'a>(nodes: &'a [TreeNode], selector: &str) -> Option<&'a TreeNode> {
    if let Ok(index) = selector.parse::<usize>() {
        return nodes.get(index);
    }
    nodes
        .iter()
        .find(|n| n.label() == selector)
        .or_else(|| nodes.iter().find(|n| n.label().eq_ignore_ascii_case(selector)))
        .or_else(|| nodes.iter().find(|n| n.node_id() == Some(selector)))
}

/// Render `node` and its descendants down to `depth` levels.
///
/// A failing subtree becomes a single `!` line; siblings keep rendering.
pub fn render_tree<'a>(
    explorer: &'a TreeExplorer,
    node: TreeNode,
    depth: usize,
    indent: usize,
    lines: &'a mut Vec<String>,
) -> BoxFuture<'a, ()> {
    async move {
        lines.push(format!("{}{}", "  ".repeat(indent), describe_node(&node)));
        if depth == 0 || !node.is_expandable() {
            return;
        }

        match explorer.expand(&node).await {
            Ok(children) => {
                for child in children {
                    render_tree(explorer, child, depth - 1, indent + 1, &mut *lines).await;
                }
            }
            Err(err) => {
                tracing::warn!("Failed to expand {}: {}", node.label(), err);
                lines.push(format!(
                    "{}! {}",
                    "  ".repeat(indent + 1),
                    format_arm_error(&err)
                ));
            }
        }
    }
    .boxed()
}

/// What a command acts on: a listed node, or a bare resource ID
#[derive(Debug, Clone)]
pub enum Target {
    Node(TreeNode),
    Id(String),
}

impl Target {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Node(node) => node.node_id(),
            Self::Id(id) => Some(id),
        }
    }

    fn require_id(&self) -> Result<String, String> {
        self.id()
            .map(str::to_string)
            .ok_or_else(|| "This node has no resource ID".to_string())
    }
}

/// Main application state
pub struct App {
    pub config: Config,
    pub client: ArmClient,
    pub catalog: Arc<ProviderCatalog>,
    pub explorer: Arc<TreeExplorer>,
    pub documents: Arc<DocumentStore>,
    pub queue: CommandQueue,

    /// Path from the root to the current node
    pub navigation_stack: Vec<TreeNode>,
    /// Children of the current node, once listed
    pub children: Option<Vec<TreeNode>>,

    /// URIs of shown documents, most recent first
    recent_documents: VecDeque<String>,
    open_document_limit: usize,
}

impl App {
    /// Must be called inside a tokio runtime (spawns the command worker)
    pub fn new(client: ArmClient, config: Config) -> Self {
        let catalog = Arc::new(ProviderCatalog::new(client.clone()));
        let explorer = Arc::new(TreeExplorer::new(
            catalog.clone(),
            config.provider_filter.clone(),
        ));
        let documents = Arc::new(DocumentStore::new(catalog.clone()));

        Self {
            config,
            client,
            catalog,
            explorer,
            documents,
            queue: CommandQueue::new(),
            navigation_stack: vec![TreeNode::Root],
            children: None,
            recent_documents: VecDeque::new(),
            open_document_limit: OPEN_DOCUMENT_LIMIT,
        }
    }

    pub fn with_open_document_limit(mut self, limit: usize) -> Self {
        self.open_document_limit = limit.max(1);
        self
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    pub fn current(&self) -> &TreeNode {
        self.navigation_stack.last().unwrap_or(&ROOT)
    }

    pub fn get_breadcrumb(&self) -> Vec<String> {
        self.navigation_stack.iter().map(TreeNode::label).collect()
    }

    /// Children of the current node, expanded on first use
    pub async fn list(&mut self) -> Result<Vec<TreeNode>, String> {
        if let Some(children) = &self.children {
            return Ok(children.clone());
        }

        let explorer = self.explorer.clone();
        let node = self.current().clone();
        let context = format!("Error loading {}", node.label());
        let children = self
            .queue
            .run(context, async move { explorer.expand(&node).await })
            .await?;

        self.children = Some(children.clone());
        Ok(children)
    }

    /// Descend into a child of the current node
    pub async fn enter(&mut self, selector: &str) -> Result<(), String> {
        let children = self.list().await?;
        let node = select(&children, selector)
            .cloned()
            .ok_or_else(|| format!("No node '{}' here", selector))?;

        if !node.is_expandable() {
            return Err(format!("{} has no children", node.label()));
        }

        self.navigation_stack.push(node);
        self.children = None;
        Ok(())
    }

    /// Descend along a path of selectors from the current node
    pub async fn walk(&mut self, path: &[String]) -> Result<(), String> {
        for selector in path {
            self.enter(selector).await?;
        }
        Ok(())
    }

    pub fn navigate_back(&mut self) -> bool {
        if self.navigation_stack.len() <= 1 {
            return false;
        }
        self.navigation_stack.pop();
        self.children = None;
        true
    }

    pub fn navigate_root(&mut self) {
        self.navigation_stack.truncate(1);
        self.children = None;
    }

    /// Resolve a command argument: nothing means the current node, a leading
    /// `/` a resource ID, anything else a child of the current node
    pub async fn resolve_target(&mut self, arg: Option<&str>) -> Result<Target, String> {
        match arg {
            None => Ok(Target::Node(self.current().clone())),
            Some(id) if id.starts_with('/') => Ok(Target::Id(id.to_string())),
            Some(selector) => {
                let children = self.list().await?;
                select(&children, selector)
                    .cloned()
                    .map(Target::Node)
                    .ok_or_else(|| format!("No node '{}' here", selector))
            }
        }
    }

    /// Drop cached catalog data and listings
    pub fn refresh(&mut self) {
        self.explorer.refresh();
        self.children = None;
    }

    // =========================================================================
    // Resource commands
    // =========================================================================

    /// Open a resource document and return its JSON text
    pub async fn show(&mut self, resource_id: &str) -> Result<String, String> {
        let documents = self.documents.clone();
        let id = resource_id.to_string();
        let text = self
            .queue
            .run("Error showing ARM resource", async move {
                documents.open(&id).await
            })
            .await?;

        self.track_document(document_uri(resource_id));
        Ok(text)
    }

    /// Mark a document as most recently shown and close the ones past the limit
    fn track_document(&mut self, uri: String) {
        self.recent_documents
            .retain(|open| !open.eq_ignore_ascii_case(&uri));
        self.recent_documents.push_front(uri);
        self.recent_documents.truncate(self.open_document_limit);

        let keep: Vec<String> = self.recent_documents.iter().cloned().collect();
        for closed in self.documents.sweep(&keep) {
            tracing::debug!("Dropped least recently shown document {}", closed);
        }
    }

    /// Write edited JSON back; returns the committed text
    pub async fn apply(
        &self,
        resource_id: &str,
        text: String,
        confirmer: Arc<dyn WriteConfirmer>,
    ) -> Result<String, String> {
        let documents = self.documents.clone();
        let id = resource_id.to_string();
        self.queue
            .run("Error applying changes", async move {
                let uri = document_uri(&id);
                if documents.read(&uri).is_ok() {
                    documents.write(&uri, &text, confirmer.as_ref()).await
                } else {
                    let committed = documents.apply_edit(&id, &text, confirmer.as_ref()).await?;
                    pretty_json(&committed)
                }
            })
            .await
    }

    pub async fn api_version(&self, resource_id: &str) -> Result<String, String> {
        let catalog = self.catalog.clone();
        let id = resource_id.to_string();
        self.queue
            .run("Error resolving api-version", async move {
                catalog.get_api_version(&id).await
            })
            .await
    }

    /// ARM URL of a target, pre-resolved for tree nodes
    pub async fn resource_url(&self, target: &Target) -> Result<String, String> {
        if let Target::Node(node) = target {
            if let Some(url) = node.url() {
                return Ok(url.to_string());
            }
        }

        let id = target.require_id()?;
        let catalog = self.catalog.clone();
        let client = self.client.clone();
        self.queue
            .run("Error copying URL", async move {
                let api_version = catalog.get_api_version(&id).await?;
                client.resource_url(&id, &api_version)
            })
            .await
    }

    /// Portal deep link, using the subscription's portal and tenant for bare IDs
    pub async fn portal_link(&self, target: &Target) -> Result<String, String> {
        if let Target::Node(node) = target {
            if let Some(link) = node.portal_link() {
                return Ok(link);
            }
        }

        let id = target.require_id()?;
        let client = self.client.clone();
        self.queue
            .run("Error opening in portal", async move {
                let subscription_id = subscription_regex()
                    .captures(&id)
                    .map(|c| c[1].to_string())
                    .ok_or_else(|| ArmError::MalformedResourceId(id.clone()))?;

                let subscription = client
                    .identity()
                    .get_subscriptions()
                    .await?
                    .into_iter()
                    .find(|s| s.subscription_id.eq_ignore_ascii_case(&subscription_id))
                    .ok_or_else(|| ArmError::resolution(format!("subscription {}", subscription_id)))?;

                let tenant = subscription
                    .tenant_id
                    .ok_or_else(|| ArmError::resolution(format!("the tenant of {}", subscription_id)))?;

                Ok(format!(
                    "{}/#@{}/resource{}",
                    subscription.portal_url.trim_end_matches('/'),
                    tenant,
                    id
                ))
            })
            .await
    }

    pub async fn token(&self) -> Result<String, String> {
        let client = self.client.clone();
        self.queue
            .run("Error getting token", async move { client.get_token().await })
            .await
    }

    /// Export a deployment template: printed, written as JSON, or decompiled to Bicep
    pub async fn export(
        &self,
        resource_id: &str,
        output: Option<PathBuf>,
        bicep: bool,
        force: bool,
    ) -> Result<String, String> {
        let catalog = self.catalog.clone();
        let id = resource_id.to_string();
        self.queue
            .run("Error exporting template", async move {
                let exported = template::export_template(&catalog, &id).await?;

                if bicep {
                    let target = output.unwrap_or_else(|| {
                        PathBuf::from(format!("{}.bicep", resolver::resource_name(&id)))
                    });
                    let written = template::decompile_to_bicep(
                        shell::AZ,
                        &exported,
                        &std::env::temp_dir(),
                        &target,
                        force,
                    )
                    .await?;
                    return Ok(format!("Wrote {}", written.display()));
                }

                let text = pretty_json(&exported)?;
                match output {
                    Some(path) => {
                        if path.exists() && !force {
                            return Err(ArmError::Io(format!(
                                "{} already exists (use --force to overwrite)",
                                path.display()
                            )));
                        }
                        tokio::fs::write(&path, text).await?;
                        Ok(format!("Wrote {}", path.display()))
                    }
                    None => Ok(text),
                }
            })
            .await
    }

    // =========================================================================
    // Session commands
    // =========================================================================

    pub async fn namespaces(&self) -> Result<Vec<String>, String> {
        let catalog = self.catalog.clone();
        self.queue
            .run("Error loading providers", async move {
                catalog.get_namespaces().await
            })
            .await
    }

    /// Replace the provider filter and persist it
    pub async fn set_provider_filter(&mut self, selected: Vec<String>) -> Result<(), String> {
        let all = self.namespaces().await?;
        let mut selected: Vec<String> = selected.iter().map(|ns| ns.to_lowercase()).collect();
        selected.sort();
        selected.dedup();

        if let Some(unknown) = selected.iter().find(|ns| !all.contains(ns)) {
            return Err(format!("Unknown provider namespace {}", unknown));
        }

        self.config
            .set_provider_filter(selected, &all)
            .map_err(|e| format!("Error saving provider filter. {}", e))?;
        self.explorer
            .set_provider_filter(self.config.provider_filter.clone());
        self.children = None;
        Ok(())
    }

    pub fn clear_provider_filter(&mut self) -> Result<(), String> {
        self.config
            .set_provider_filter(Vec::new(), &[])
            .map_err(|e| format!("Error saving provider filter. {}", e))?;
        self.explorer.set_provider_filter(Vec::new());
        self.children = None;
        Ok(())
    }

    pub async fn sign_in(&mut self) -> Result<bool, String> {
        let client = self.client.clone();
        let signed_in = self
            .queue
            .run("Error signing in", async move {
                client.identity().sign_in().await
            })
            .await?;
        self.navigate_root();
        Ok(signed_in)
    }
}
