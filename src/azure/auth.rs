//! Azure Authentication
//!
//! Identity providers supply bearer tokens and the subscription list.
//! Tokens come either from the Azure CLI or from a pre-issued token.

use super::client::ArmClient;
use super::subscriptions::Subscription;
use crate::config::Config;
use crate::error::{ArmError, ArmResult};
use crate::shell;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};

/// Default scope for ARM access
pub const ARM_SCOPE: &str = "https://management.core.windows.net/user_impersonation";

/// Environment variable holding a pre-issued bearer token
pub const TOKEN_ENV_VAR: &str = "TARM_ACCESS_TOKEN";

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Source of credentials and subscriptions
#[async_trait]
pub trait Identity: Send + Sync {
    /// Get a bearer token for the given scopes
    async fn get_token(&self, scopes: &[&str]) -> ArmResult<String>;

    /// Subscriptions the signed-in identity can access
    async fn get_subscriptions(&self) -> ArmResult<Vec<Subscription>>;

    /// Whether a session is available
    async fn is_signed_in(&self) -> bool;

    /// Start an interactive sign-in, returning whether it succeeded
    async fn sign_in(&self) -> ArmResult<bool>;
}

/// Identity backed by a fixed bearer token.
///
/// A bearer token cannot enumerate subscriptions, so they are either given
/// up front or listed through ARM on first use.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    token: String,
    subscriptions: Arc<OnceCell<Vec<Subscription>>>,
    lookup: Option<Config>,
}

impl StaticIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            subscriptions: Arc::new(OnceCell::new()),
            lookup: None,
        }
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<Subscription>) -> Self {
        self.subscriptions = Arc::new(OnceCell::from(subscriptions));
        self
    }

    /// List subscriptions through the ARM endpoint of `config` when first asked
    pub fn with_subscription_lookup(mut self, config: &Config) -> Self {
        self.lookup = Some(config.clone());
        self
    }

    /// Read the token from `TARM_ACCESS_TOKEN`
    pub fn from_env() -> Option<Self> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|t| Self::new(t.trim()))
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    async fn get_token(&self, _scopes: &[&str]) -> ArmResult<String> {
        Ok(self.token.clone())
    }

    async fn get_subscriptions(&self) -> ArmResult<Vec<Subscription>> {
        let subscriptions = self
            .subscriptions
            .get_or_try_init(|| async {
                let Some(config) = self.lookup.as_ref() else {
                    return Ok(Vec::new());
                };
                tracing::debug!("Listing subscriptions for bearer token");
                ArmClient::new(Arc::new(StaticIdentity::new(self.token.clone())), config)?
                    .list_subscriptions()
                    .await
            })
            .await?;
        Ok(subscriptions.clone())
    }

    async fn is_signed_in(&self) -> bool {
        true
    }

    async fn sign_in(&self) -> ArmResult<bool> {
        Ok(true)
    }
}

#[derive(Clone)]
struct CachedToken {
    scope: String,
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    /// Check if this cached token is still valid for a scope
    fn is_valid_for(&self, scope: &str) -> bool {
        self.scope == scope && Instant::now() < self.expires_at
    }
}

/// Identity backed by the Azure CLI (`az login`)
#[derive(Clone)]
pub struct AzCliIdentity {
    program: String,
    tenant_id: Option<String>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl AzCliIdentity {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self {
            program: shell::AZ.to_string(),
            tenant_id,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Use a different executable (tests, custom installs)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn az_json(&self, args: &[&str]) -> ArmResult<Value> {
        let output = shell::run_capture(&self.program, args).await?;
        if !output.success {
            let message = output.stderr.trim();
            if message.contains("az login") {
                return Err(ArmError::AuthRequired(
                    "Run 'az login' or use the sign-in command.".to_string(),
                ));
            }
            return Err(ArmError::external_tool(&self.program, message));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| ArmError::external_tool(&self.program, e.to_string()))
    }
}

/// Turn a user_impersonation scope into the `--scope` form az expects
fn az_scope(scope: &str) -> String {
    match scope.strip_suffix("/user_impersonation") {
        Some(resource) => format!("{}/.default", resource),
        None => scope.to_string(),
    }
}

/// Token lifetime from `az account get-access-token` output
fn token_ttl(value: &Value) -> Duration {
    let expires_on = value
        .get("expires_on")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())));

    match expires_on {
        Some(epoch) => {
            let remaining = epoch - chrono::Utc::now().timestamp();
            if remaining > 0 {
                Duration::from_secs(remaining as u64)
            } else {
                Duration::ZERO
            }
        }
        None => DEFAULT_TOKEN_TTL,
    }
}

#[async_trait]
impl Identity for AzCliIdentity {
    /// Get an access token for API calls
    /// Security: Checks token expiry before returning cached token
    async fn get_token(&self, scopes: &[&str]) -> ArmResult<String> {
        let scope = az_scope(scopes.first().copied().unwrap_or(ARM_SCOPE));

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid_for(&scope) {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let mut args = vec!["account", "get-access-token", "--scope", scope.as_str()];
        if let Some(tenant) = self.tenant_id.as_deref() {
            args.extend(["--tenant", tenant]);
        }
        args.extend(["--output", "json"]);

        let response = self.az_json(&args).await?;
        let token = response
            .get("accessToken")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ArmError::external_tool(&self.program, "no accessToken in output"))?
            .to_string();

        let ttl = token_ttl(&response).saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                scope,
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            });
        }

        tracing::debug!("New token cached, expires in ~{} minutes", ttl.as_secs() / 60);

        Ok(token)
    }

    async fn get_subscriptions(&self) -> ArmResult<Vec<Subscription>> {
        let response = self.az_json(&["account", "list", "--output", "json"]).await?;

        let subscriptions: Vec<Subscription> = response
            .as_array()
            .map(|accounts| {
                accounts
                    .iter()
                    .filter(|a| Subscription::az_account_enabled(a))
                    .filter(|a| {
                        self.tenant_id.as_deref().map_or(true, |tenant| {
                            a.get("tenantId").and_then(|v| v.as_str()) == Some(tenant)
                        })
                    })
                    .filter_map(Subscription::from_az_account)
                    .collect()
            })
            .unwrap_or_default();

        if subscriptions.is_empty() {
            return Err(ArmError::AuthRequired(
                "No subscriptions available for the signed-in account.".to_string(),
            ));
        }

        Ok(subscriptions)
    }

    async fn is_signed_in(&self) -> bool {
        match shell::run_capture(&self.program, &["account", "show", "--output", "json"]).await {
            Ok(output) => output.success,
            Err(e) => {
                tracing::warn!("Could not query az account: {}", e);
                false
            }
        }
    }

    async fn sign_in(&self) -> ArmResult<bool> {
        let mut args = vec!["login"];
        if let Some(tenant) = self.tenant_id.as_deref() {
            args.extend(["--tenant", tenant]);
        }
        let ok = shell::run_interactive(&self.program, &args).await?;
        if ok {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_az_scope() {
        assert_eq!(az_scope(ARM_SCOPE), "https://management.core.windows.net/.default");
        assert_eq!(az_scope("api://x/.default"), "api://x/.default");
    }

    #[test]
    fn test_token_ttl_from_epoch() {
        let in_an_hour = chrono::Utc::now().timestamp() + 3600;
        let ttl = token_ttl(&json!({ "expires_on": in_an_hour }));
        assert!(ttl > Duration::from_secs(3500));

        let as_string = token_ttl(&json!({ "expires_on": in_an_hour.to_string() }));
        assert!(as_string > Duration::from_secs(3500));
    }

    #[test]
    fn test_token_ttl_defaults_and_expired() {
        assert_eq!(token_ttl(&json!({})), DEFAULT_TOKEN_TTL);
        assert_eq!(token_ttl(&json!({ "expires_on": 1 })), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_static_identity() {
        let identity = StaticIdentity::new("abc");
        assert!(identity.is_signed_in().await);
        assert_eq!(identity.get_token(&[ARM_SCOPE]).await.unwrap(), "abc");
        assert!(identity.get_subscriptions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_az_identity_without_cli_is_signed_out() {
        let identity = AzCliIdentity::new(None).with_program("tarm-definitely-not-installed");
        assert!(!identity.is_signed_in().await);
        assert!(identity.get_token(&[ARM_SCOPE]).await.is_err());
    }
}
