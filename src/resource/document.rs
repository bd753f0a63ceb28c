//! Resource Document Sync
//!
//! Keeps the JSON documents of opened resources, keyed by `arm:{resourceId}.json`,
//! and writes edits back through PATCH/PUT.

use super::catalog::ProviderCatalog;
use crate::azure::client::{ArmClient, WriteMethod};
use crate::error::{ArmError, ArmResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

const URI_PREFIX: &str = "arm:";
const URI_SUFFIX: &str = ".json";

/// `arm:{resourceId}.json`
pub fn document_uri(resource_id: &str) -> String {
    format!("{}{}{}", URI_PREFIX, resource_id, URI_SUFFIX)
}

/// Serialize with a 3-space indent
pub fn pretty_json(value: &Value) -> ArmResult<String> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"   "));
    value
        .serialize(&mut serializer)
        .map_err(|e| ArmError::InvalidJson(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| ArmError::InvalidJson(e.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenDocument {
    pub resource_id: String,
    pub bytes: Vec<u8>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl OpenDocument {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStat {
    pub size: usize,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

/// Where and how an edit is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub resource_id: String,
    pub method: WriteMethod,
}

/// Asks the user where to write an edited document.
///
/// Returning `None` cancels the write.
#[async_trait]
pub trait WriteConfirmer: Send + Sync {
    async fn confirm(&self, resource_id: &str) -> Option<WriteTarget>;
}

/// Confirms without asking: a fixed method, to the edited resource or a fixed path
#[derive(Debug, Clone)]
pub struct AutoConfirm {
    method: WriteMethod,
    resource_id: Option<String>,
}

impl AutoConfirm {
    pub fn new(method: WriteMethod) -> Self {
        Self {
            method,
            resource_id: None,
        }
    }

    /// Write to `resource_id` instead of the edited resource
    pub fn to(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

#[async_trait]
impl WriteConfirmer for AutoConfirm {
    async fn confirm(&self, resource_id: &str) -> Option<WriteTarget> {
        Some(WriteTarget {
            resource_id: self
                .resource_id
                .clone()
                .unwrap_or_else(|| resource_id.to_string()),
            method: self.method,
        })
    }
}

/// Open resource documents
pub struct DocumentStore {
    client: ArmClient,
    catalog: Arc<ProviderCatalog>,
    documents: Mutex<HashMap<String, OpenDocument>>,
    changes: broadcast::Sender<String>,
}

impl DocumentStore {
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            client: catalog.client().clone(),
            catalog,
            documents: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Change notifications, carrying the document URI
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    fn notify(&self, uri: String) {
        tracing::debug!("Document changed: {}", uri);
        // No subscribers is fine
        let _ = self.changes.send(uri);
    }

    /// Fetch a resource and (re)load its document
    pub async fn open(&self, resource_id: &str) -> ArmResult<String> {
        let api_version = self.catalog.get_api_version(resource_id).await?;
        let body = self.client.get(resource_id, Some(&api_version)).await?;
        let text = pretty_json(&body)?;

        let uri = document_uri(resource_id);
        let now = Utc::now();
        {
            let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
            let ctime = documents.get(&uri).map_or(now, |d| d.ctime);
            documents.insert(
                uri.clone(),
                OpenDocument {
                    resource_id: resource_id.to_string(),
                    bytes: text.clone().into_bytes(),
                    ctime,
                    mtime: now,
                },
            );
        }
        self.notify(uri);

        Ok(text)
    }

    /// Write edited JSON back to ARM.
    ///
    /// Returns the committed body: the server's response, or the submitted
    /// JSON when the response is empty.
    pub async fn apply_edit(
        &self,
        resource_id: &str,
        text: &str,
        confirmer: &dyn WriteConfirmer,
    ) -> ArmResult<Value> {
        let body: Value =
            serde_json::from_str(text).map_err(|e| ArmError::InvalidJson(e.to_string()))?;

        let target = confirmer
            .confirm(resource_id)
            .await
            .ok_or(ArmError::UserCancelled)?;

        let api_version = self.catalog.get_api_version(&target.resource_id).await?;
        tracing::info!(
            "Applying {} to {} (api-version {})",
            target.method,
            target.resource_id,
            api_version
        );
        let response = self
            .client
            .apply(target.method, &target.resource_id, &body, &api_version)
            .await?;

        let committed = if response.is_null() { body } else { response };
        let committed_text = pretty_json(&committed)?;

        let uri = document_uri(resource_id);
        let updated = {
            let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
            match documents.get_mut(&uri) {
                Some(document) => {
                    document.bytes = committed_text.into_bytes();
                    document.mtime = Utc::now();
                    true
                }
                None => false,
            }
        };
        if updated {
            self.notify(uri);
        }

        Ok(committed)
    }

    /// Save hook: write the document's new text back, unless unchanged
    pub async fn write(
        &self,
        uri: &str,
        text: &str,
        confirmer: &dyn WriteConfirmer,
    ) -> ArmResult<String> {
        let (resource_id, unchanged) = {
            let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
            let document = documents
                .get(uri)
                .ok_or_else(|| ArmError::DocumentNotLoaded(uri.to_string()))?;
            (document.resource_id.clone(), document.bytes == text.as_bytes())
        };

        if unchanged {
            tracing::debug!("{} unchanged, nothing to write", uri);
            return Ok(text.to_string());
        }

        let committed = self.apply_edit(&resource_id, text, confirmer).await?;
        pretty_json(&committed)
    }

    pub fn read(&self, uri: &str) -> ArmResult<String> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents
            .get(uri)
            .map(OpenDocument::text)
            .ok_or_else(|| ArmError::DocumentNotLoaded(uri.to_string()))
    }

    pub fn stat(&self, uri: &str) -> ArmResult<DocumentStat> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents
            .get(uri)
            .map(|d| DocumentStat {
                size: d.bytes.len(),
                ctime: d.ctime,
                mtime: d.mtime,
            })
            .ok_or_else(|| ArmError::DocumentNotLoaded(uri.to_string()))
    }

    /// Tracked URIs, sorted
    pub fn open_uris(&self) -> Vec<String> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let mut uris: Vec<String> = documents.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Forget documents the host no longer has open (URIs compared case-insensitively).
    /// Returns the removed URIs.
    pub fn sweep(&self, host_open: &[String]) -> Vec<String> {
        let keep: HashSet<String> = host_open.iter().map(|u| u.to_lowercase()).collect();

        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<String> = documents
            .keys()
            .filter(|uri| !keep.contains(&uri.to_lowercase()))
            .cloned()
            .collect();

        for uri in &stale {
            documents.remove(uri);
            tracing::debug!("Closed document {}", uri);
        }
        stale
    }
}
