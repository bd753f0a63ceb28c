//! ARM Client
//!
//! Main client for interacting with Azure Resource Manager, combining
//! authentication and HTTP functionality. Normalizes ARM's response shapes
//! (`{value, nextLink}`, bare objects, Resource Graph `{data, $skipToken}`)
//! and recovers from stale api-versions.

use super::auth::{Identity, ARM_SCOPE};
use super::http::ArmHttpClient;
use super::subscriptions::Subscription;
use crate::config::{pinned_api_version, Config};
use crate::error::{ArmError, ArmResult};
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use url::Url;

/// api-version used when nothing better is known
pub const DEFAULT_API_VERSION: &str = "2023-07-01";

/// api-version of the Resource Graph query endpoint
pub const RESOURCE_GRAPH_API_VERSION: &str = "2022-10-01";

/// Upper bound on requests issued by one paginated query
pub const MAX_PAGES: usize = 100;

/// Error code ARM returns when a resource type does not support the requested api-version
const NO_REGISTERED_PROVIDER: &str = "NoRegisteredProviderFound";

fn supported_versions_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)The supported api-versions are '([^']+)'").expect("valid regex")
    })
}

/// HTTP method used to write a resource back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Patch,
    Put,
}

impl WriteMethod {
    pub fn as_method(self) -> Method {
        match self {
            Self::Patch => Method::PATCH,
            Self::Put => Method::PUT,
        }
    }
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch => f.write_str("PATCH"),
            Self::Put => f.write_str("PUT"),
        }
    }
}

impl FromStr for WriteMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PATCH" => Ok(Self::Patch),
            "PUT" => Ok(Self::Put),
            other => Err(format!("unsupported method '{}', expected PATCH or PUT", other)),
        }
    }
}

/// Pick a replacement api-version from a `NoRegisteredProviderFound` error.
///
/// ARM lists supported versions oldest-first; the last one is taken.
pub fn supported_api_version(error: &ArmError) -> Option<String> {
    if error.status() != Some(400) {
        return None;
    }
    if error.arm_error_code().as_deref() != Some(NO_REGISTERED_PROVIDER) {
        return None;
    }

    let message = error.arm_error_message()?;
    let captures = supported_versions_regex().captures(&message)?;
    captures[1]
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .last()
        .map(str::to_string)
}

/// Main ARM client
#[derive(Clone)]
pub struct ArmClient {
    identity: Arc<dyn Identity>,
    http: ArmHttpClient,
    endpoint: String,
    api_version_overrides: BTreeMap<String, String>,
    strict_pagination: bool,
}

impl ArmClient {
    /// Create a new ARM client
    pub fn new(identity: Arc<dyn Identity>, config: &Config) -> ArmResult<Self> {
        Ok(Self {
            identity,
            http: ArmHttpClient::new()?,
            endpoint: config.effective_endpoint(),
            api_version_overrides: config.api_version_overrides.clone(),
            strict_pagination: config.strict_pagination,
        })
    }

    /// The identity this client authenticates with
    pub fn identity(&self) -> &Arc<dyn Identity> {
        &self.identity
    }

    /// Get the current access token
    pub async fn get_token(&self) -> ArmResult<String> {
        self.identity.get_token(&[ARM_SCOPE]).await
    }

    /// api-version for a path: configured override, then the caller's, then the default
    pub fn effective_api_version(&self, path: &str, requested: Option<&str>) -> String {
        if let Some((fragment, version)) = pinned_api_version(&self.api_version_overrides, path) {
            tracing::info!(
                "Using api-version {} for {} (configured for '{}')",
                version,
                path,
                fragment
            );
            return version.to_string();
        }

        requested.unwrap_or(DEFAULT_API_VERSION).to_string()
    }

    /// Build `{endpoint}{path}?api-version={version}`
    pub fn resource_url(&self, path: &str, api_version: &str) -> ArmResult<String> {
        let mut url = Url::parse(&format!("{}{}", self.endpoint, path))
            .map_err(|e| ArmError::MalformedResourceId(format!("{} ({})", path, e)))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url.into())
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> ArmResult<Value> {
        let token = self.get_token().await?;
        self.http.send(method, url, &token, body).await
    }

    /// GET a path, following `nextLink` pages.
    ///
    /// Returns the `value` array (all pages appended) when the response has
    /// one, otherwise the raw payload. A stale api-version on the first
    /// request is retried once with the newest version ARM says it supports.
    pub async fn get(&self, path: &str, api_version: Option<&str>) -> ArmResult<Value> {
        let version = self.effective_api_version(path, api_version);
        let mut url = self.resource_url(path, &version)?;
        let mut items: Option<Vec<Value>> = None;

        for _ in 0..MAX_PAGES {
            let page = match self.send(Method::GET, &url, None).await {
                Ok(page) => page,
                Err(err) if items.is_none() => {
                    let Some(fallback) = supported_api_version(&err) else {
                        return Err(err);
                    };
                    tracing::info!(
                        "api-version {} rejected for {}, retrying with {}",
                        version,
                        path,
                        fallback
                    );
                    url = self.resource_url(path, &fallback)?;
                    self.send(Method::GET, &url, None).await?
                }
                Err(err) => return Err(err),
            };

            let next_link = page
                .get("nextLink")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            match items.as_mut() {
                None => {
                    let first = match page {
                        Value::Object(mut map) if map.contains_key("value") => {
                            map.remove("value").unwrap_or(Value::Null)
                        }
                        other => other,
                    };
                    match first {
                        Value::Array(first) => items = Some(first),
                        other => {
                            if next_link.is_some() {
                                tracing::warn!(
                                    "Ignoring nextLink of non-list response for {}",
                                    path
                                );
                            }
                            return Ok(other);
                        }
                    }
                }
                Some(items) => {
                    if let Some(Value::Array(more)) = page.get("value") {
                        items.extend(more.iter().cloned());
                    }
                }
            }

            match next_link {
                Some(next) => url = next,
                None => return Ok(Value::Array(items.unwrap_or_default())),
            }
        }

        self.pagination_capped(path)?;
        Ok(Value::Array(items.unwrap_or_default()))
    }

    /// Run `resources | where type == "{type}"` against Resource Graph
    pub async fn query_graph(&self, resource_type: &str) -> ArmResult<Vec<Value>> {
        let url = self.resource_url(
            "/providers/Microsoft.ResourceGraph/resources",
            RESOURCE_GRAPH_API_VERSION,
        )?;
        let query = format!("resources | where type == \"{}\"", resource_type.to_lowercase());

        let mut result = Vec::new();
        let mut skip_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut options = serde_json::Map::new();
            if let Some(token) = skip_token.take() {
                options.insert("$skipToken".to_string(), Value::String(token));
            }
            let body = json!({ "query": query, "options": options });

            let response = self.send(Method::POST, &url, Some(&body)).await?;

            if let Some(Value::Array(data)) = response.get("data") {
                result.extend(data.iter().cloned());
            }

            skip_token = response
                .get("$skipToken")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            if skip_token.is_none() {
                return Ok(result);
            }
        }

        self.pagination_capped(&query)?;
        Ok(result)
    }

    /// Write a resource with PATCH or PUT.
    ///
    /// A stale api-version is retried once with the version suggested by ARM.
    pub async fn apply(
        &self,
        method: WriteMethod,
        resource_id: &str,
        body: &Value,
        api_version: &str,
    ) -> ArmResult<Value> {
        let version = self.effective_api_version(resource_id, Some(api_version));
        let url = self.resource_url(resource_id, &version)?;

        match self.send(method.as_method(), &url, Some(body)).await {
            Ok(response) => Ok(response),
            Err(err) => {
                let Some(fallback) = supported_api_version(&err) else {
                    return Err(err);
                };
                tracing::info!(
                    "api-version {} rejected for {} {}, retrying with {}",
                    version,
                    method,
                    resource_id,
                    fallback
                );
                let url = self.resource_url(resource_id, &fallback)?;
                self.send(method.as_method(), &url, Some(body)).await
            }
        }
    }

    /// List subscriptions through ARM (for identities that cannot enumerate them)
    pub async fn list_subscriptions(&self) -> ArmResult<Vec<Subscription>> {
        let response = self.get("/subscriptions", Some("2022-12-01")).await?;
        Ok(response
            .as_array()
            .map(|arr| arr.iter().filter_map(Subscription::from_arm).collect())
            .unwrap_or_default())
    }

    fn pagination_capped(&self, what: &str) -> ArmResult<()> {
        if self.strict_pagination {
            return Err(ArmError::PaginationExhausted(MAX_PAGES));
        }
        tracing::warn!(
            "Stopped paging {} after {} requests, results are partial",
            what,
            MAX_PAGES
        );
        Ok(())
    }
}
