//! Deployment template export
//!
//! Wraps a resource body in an ARM deployment template, optionally
//! decompiled to Bicep with `az bicep decompile`.

use super::catalog::ProviderCatalog;
use super::document::pretty_json;
use crate::error::{ArmError, ArmResult};
use crate::shell;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub const DEPLOYMENT_TEMPLATE_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#";

/// Properties ARM returns that a template must not carry
const READ_ONLY_PROPERTIES: &[&str] = &["id", "systemData"];

/// Wrap a resource body in a deployment template
pub fn deployment_template(body: &Value, api_version: &str) -> Value {
    let mut resource = body.clone();
    if let Value::Object(map) = &mut resource {
        for key in READ_ONLY_PROPERTIES {
            map.remove(*key);
        }
        map.insert("apiVersion".to_string(), Value::String(api_version.to_string()));
    }

    json!({
        "$schema": DEPLOYMENT_TEMPLATE_SCHEMA,
        "resources": [resource],
    })
}

/// Fetch a resource and build its deployment template
pub async fn export_template(catalog: &ProviderCatalog, resource_id: &str) -> ArmResult<Value> {
    let api_version = catalog.get_api_version(resource_id).await?;
    let body = catalog.client().get(resource_id, Some(&api_version)).await?;
    Ok(deployment_template(&body, &api_version))
}

/// Decompile a template to Bicep and move the result to `target`.
///
/// The template is staged as a uniquely named JSON file in `dir`, which is
/// removed afterwards whatever the outcome.
pub async fn decompile_to_bicep(
    program: &str,
    template: &Value,
    dir: &Path,
    target: &Path,
    force: bool,
) -> ArmResult<PathBuf> {
    if target.exists() && !force {
        return Err(ArmError::Io(format!(
            "{} already exists (use --force to overwrite)",
            target.display()
        )));
    }

    let staged = dir.join(format!("tarm-{}.json", uuid::Uuid::new_v4()));
    tokio::fs::write(&staged, pretty_json(template)?).await?;

    let decompiled = shell::decompile_bicep(program, &staged).await;

    if let Err(err) = tokio::fs::remove_file(&staged).await {
        tracing::warn!("Failed to remove {}: {}", staged.display(), err);
    }

    let produced = decompiled?;
    if tokio::fs::rename(&produced, target).await.is_err() {
        tokio::fs::copy(&produced, target).await?;
        tokio::fs::remove_file(&produced).await?;
    }

    tracing::info!("Wrote {}", target.display());
    Ok(target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_template_strips_read_only() {
        let body = json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/foo",
            "name": "foo",
            "type": "Microsoft.Storage/storageAccounts",
            "systemData": { "createdBy": "someone" },
            "properties": { "accessTier": "Hot" }
        });

        let template = deployment_template(&body, "2023-01-01");
        assert_eq!(template["$schema"], DEPLOYMENT_TEMPLATE_SCHEMA);

        let resource = &template["resources"][0];
        assert!(resource.get("id").is_none());
        assert!(resource.get("systemData").is_none());
        assert_eq!(resource["apiVersion"], "2023-01-01");
        assert_eq!(resource["properties"]["accessTier"], "Hot");
    }

    #[tokio::test]
    async fn test_decompile_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bicep");
        std::fs::write(&target, "keep me").unwrap();

        let err = decompile_to_bicep("az", &json!({}), dir.path(), &target, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Io(_)));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn test_decompile_failure_removes_staged_json() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bicep");

        let err = decompile_to_bicep(
            "tarm-definitely-not-installed",
            &json!({}),
            dir.path(),
            &target,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArmError::ExternalTool { .. }));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
        assert!(!target.exists());
    }
}
