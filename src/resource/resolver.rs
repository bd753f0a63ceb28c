//! Resource ID parsing
//!
//! Resource IDs are never stored parsed; every lookup re-parses the string.

use crate::error::{ArmError, ArmResult};
use regex::Regex;
use std::sync::OnceLock;

const PROVIDERS_SEGMENT: &str = "/providers/";

fn provider_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/providers/([^/]+)/([^/]+)/").expect("valid regex"))
}

/// Resource types whose instances expose keys or connection strings
const SECRET_BEARING_PATTERNS: &[&str] = &[
    r"/providers/microsoft\.insights/components/([^/]+)$",
    r"/providers/microsoft\.cognitiveservices/accounts/([^/]+)$",
    r"/providers/microsoft\.maps/accounts/([^/]+)$",
    r"/providers/microsoft\.cache/redis/([^/]+)$",
    r"/providers/microsoft\.search/searchservices/([^/]+)$",
    r"/providers/microsoft\.signalrservice/signalr/([^/]+)$",
    r"/providers/microsoft\.documentdb/databaseaccounts/([^/]+)$",
    r"/providers/microsoft\.eventgrid/topics/([^/]+)$",
    r"/providers/microsoft\.eventhub/namespaces/([^/]+)$",
    r"/providers/microsoft\.keyvault/vaults/([^/]+)/(keys|secrets)/([^/]+)$",
    r"/providers/microsoft\.servicebus/namespaces/([^/]+)$",
    r"/providers/microsoft\.storage/storageaccounts/([^/]+)$",
];

fn secret_bearing_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        SECRET_BEARING_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).expect("valid regex"))
            .collect()
    })
}

/// `(namespace, type)` from the first `/providers/{ns}/{type}/` segment
pub fn provider_and_type(resource_id: &str) -> ArmResult<(String, String)> {
    let captures = provider_type_regex()
        .captures(resource_id)
        .ok_or_else(|| ArmError::MalformedResourceId(resource_id.to_string()))?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// `(namespace, type path)` of a possibly nested resource.
///
/// `/providers/NS/A/name1/B/name2` has the type path `A/B`: segments after the
/// namespace alternate between type and instance name.
pub fn resource_type_path(resource_id: &str) -> ArmResult<(String, String)> {
    let malformed = || ArmError::MalformedResourceId(resource_id.to_string());

    let start = resource_id
        .to_ascii_lowercase()
        .find(PROVIDERS_SEGMENT)
        .ok_or_else(malformed)?;
    let rest = &resource_id[start + PROVIDERS_SEGMENT.len()..];

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let namespace = segments.next().ok_or_else(malformed)?;

    let type_path = segments
        .step_by(2)
        .collect::<Vec<_>>()
        .join("/");
    if type_path.is_empty() {
        return Err(malformed());
    }

    Ok((namespace.to_string(), type_path))
}

/// Immediate child segment of `candidate` under `own_type`, if it is one.
///
/// `vaults/keys/versions` is a child of `vaults/keys` (`versions`), but not
/// of `vaults`.
pub fn child_type_segment<'a>(own_type: &str, candidate: &'a str) -> Option<&'a str> {
    let head = candidate.get(..own_type.len())?;
    let tail = candidate.get(own_type.len()..)?.strip_prefix('/')?;
    (head.eq_ignore_ascii_case(own_type) && !tail.is_empty() && !tail.contains('/'))
        .then_some(tail)
}

/// Last path segment of a resource ID
pub fn resource_name(resource_id: &str) -> &str {
    resource_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(resource_id)
}

/// Whether the resource type carries keys/secrets
pub fn is_secret_bearing(resource_id: &str) -> bool {
    secret_bearing_regexes().iter().any(|re| re.is_match(resource_id))
}
