//! Azure Subscriptions
//!
//! Subscription records as reported by the identity provider or by ARM.

use crate::config::DEFAULT_PORTAL_URL;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: String,
    pub display_name: String,
    pub tenant_id: Option<String>,
    pub portal_url: String,
}

impl Subscription {
    /// Build from an `az account list` entry
    pub fn from_az_account(value: &Value) -> Option<Self> {
        let subscription_id = value.get("id")?.as_str()?.to_string();
        let display_name = value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&subscription_id)
            .to_string();
        let tenant_id = value
            .get("tenantId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let portal_url = portal_for_cloud(
            value
                .get("environmentName")
                .and_then(|v| v.as_str())
                .unwrap_or("AzureCloud"),
        );

        Some(Self {
            subscription_id,
            display_name,
            tenant_id,
            portal_url: portal_url.to_string(),
        })
    }

    /// Build from an ARM `GET /subscriptions` entry
    pub fn from_arm(value: &Value) -> Option<Self> {
        let subscription_id = value.get("subscriptionId")?.as_str()?.to_string();
        let display_name = value
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or(&subscription_id)
            .to_string();
        let tenant_id = value
            .get("tenantId")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Some(Self {
            subscription_id,
            display_name,
            tenant_id,
            portal_url: DEFAULT_PORTAL_URL.to_string(),
        })
    }

    /// Whether `az account list` reports this subscription as usable
    pub fn az_account_enabled(value: &Value) -> bool {
        value
            .get("state")
            .and_then(|v| v.as_str())
            .map(|s| s == "Enabled")
            .unwrap_or(true)
    }
}

/// Portal base URL for an Azure cloud name
fn portal_for_cloud(environment: &str) -> &'static str {
    match environment {
        "AzureChinaCloud" => "https://portal.azure.cn",
        "AzureUSGovernment" => "https://portal.azure.us",
        _ => DEFAULT_PORTAL_URL,
    }
}
