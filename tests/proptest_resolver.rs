//! Property-based tests using proptest
//!
//! These tests verify resource ID parsing, child type matching and error
//! formatting using randomized inputs.

use proptest::prelude::*;
use tarm::error::{format_arm_error, ArmError};
use tarm::resource::resolver::{
    child_type_segment, is_secret_bearing, provider_and_type, resource_name, resource_type_path,
};

/// Generate a provider namespace like `Microsoft.Storage`
fn arb_namespace() -> impl Strategy<Value = String> {
    ("[A-Z][a-z]{2,10}", "[A-Z][A-Za-z]{2,12}").prop_map(|(a, b)| format!("{}.{}", a, b))
}

/// Generate a resource type or instance name segment
fn arb_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9-]{0,15}"
}

/// Generate `(type, name)` pairs for a nested resource
fn arb_type_chain() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec((arb_segment(), arb_segment()), 1..4)
}

fn build_id(namespace: &str, chain: &[(String, String)]) -> String {
    let mut id = format!("/subscriptions/sub-1/resourceGroups/rg/providers/{}", namespace);
    for (resource_type, name) in chain {
        id.push('/');
        id.push_str(resource_type);
        id.push('/');
        id.push_str(name);
    }
    id
}

proptest! {
    /// The type path is every other segment after the namespace
    #[test]
    fn test_type_path_of_nested_ids(namespace in arb_namespace(), chain in arb_type_chain()) {
        let id = build_id(&namespace, &chain);
        let expected: Vec<&str> = chain.iter().map(|(t, _)| t.as_str()).collect();

        let (ns, type_path) = resource_type_path(&id).unwrap();
        prop_assert_eq!(ns, namespace);
        prop_assert_eq!(type_path, expected.join("/"));
    }

    /// provider_and_type always picks the first type after the namespace
    #[test]
    fn test_provider_and_type_first_match(namespace in arb_namespace(), chain in arb_type_chain()) {
        let id = build_id(&namespace, &chain);

        let (ns, resource_type) = provider_and_type(&id).unwrap();
        prop_assert_eq!(ns, namespace);
        prop_assert_eq!(resource_type, chain[0].0.clone());
    }

    /// IDs without a providers segment are malformed
    #[test]
    fn test_ids_without_providers_are_malformed(segments in prop::collection::vec(arb_segment(), 0..6)) {
        prop_assume!(!segments.iter().any(|s| s.eq_ignore_ascii_case("providers")));
        let id = format!("/{}", segments.join("/"));

        prop_assert!(matches!(provider_and_type(&id), Err(ArmError::MalformedResourceId(_))));
        prop_assert!(matches!(resource_type_path(&id), Err(ArmError::MalformedResourceId(_))));
    }

    /// A type directly below another is its child, deeper ones are not
    #[test]
    fn test_child_type_segment(parent in arb_segment(), child in arb_segment(), grandchild in arb_segment()) {
        let candidate = format!("{}/{}", parent, child);
        prop_assert_eq!(child_type_segment(&parent, &candidate), Some(child.as_str()));
        prop_assert_eq!(
            child_type_segment(&parent.to_uppercase(), &candidate),
            Some(child.as_str())
        );

        let deeper = format!("{}/{}/{}", parent, child, grandchild);
        prop_assert_eq!(child_type_segment(&parent, &deeper), None);
        prop_assert_eq!(child_type_segment(&candidate, &deeper), Some(grandchild.as_str()));
    }

    /// The name is the last segment
    #[test]
    fn test_resource_name(namespace in arb_namespace(), chain in arb_type_chain()) {
        let id = build_id(&namespace, &chain);
        prop_assert_eq!(resource_name(&id), chain.last().unwrap().1.as_str());
    }

    /// Secret detection ignores case
    #[test]
    fn test_secret_bearing_case_insensitive(name in arb_segment(), upper in any::<bool>()) {
        let id = format!(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/{}",
            name
        );
        let id = if upper { id.to_uppercase() } else { id };
        prop_assert!(is_secret_bearing(&id));
        let child = format!("{}/blobServices/default", id);
        prop_assert!(!is_secret_bearing(&child));
    }

    /// Formatting never panics and keeps the error text
    #[test]
    fn test_format_arm_error_any_body(body in ".{0,400}", status in 400u16..600) {
        let err = ArmError::Http {
            method: "GET".to_string(),
            url: "https://management.azure.com/x".to_string(),
            status,
            body,
        };
        let text = format_arm_error(&err);
        prop_assert!(text.starts_with(&err.to_string()));
    }
}
