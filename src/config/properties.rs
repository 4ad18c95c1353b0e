//! Property registry
//!
//! Every property the framework understands is declared here with its
//! section, type and default. Values are validated on read and on write.

use crate::error::{Error, Result};

/// Sentinel for `billing/quota_project`: never send a quota project header.
pub const QUOTA_PROJECT_LEGACY: &str = "LEGACY";
/// Sentinel for `billing/quota_project`: bill the resource project (`core/project`).
pub const QUOTA_PROJECT_CURRENT: &str = "CURRENT_PROJECT";

/// Section whose property names are free-form API names.
pub const ENDPOINT_OVERRIDES_SECTION: &str = "api_endpoint_overrides";

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Bool,
    Int,
    Choice(&'static [&'static str]),
    /// Filesystem path; `~` and `$VAR` are expanded on read.
    Path,
    ProjectId,
    Url,
}

/// Declaration of a single property.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDef {
    pub section: &'static str,
    pub name: &'static str,
    pub kind: PropertyKind,
    pub default: Option<&'static str>,
    pub help: &'static str,
}

pub const VERBOSITIES: &[&str] = &["debug", "info", "warning", "error", "critical", "none"];

/// All statically known properties.
pub static PROPERTIES: &[PropertyDef] = &[
    PropertyDef {
        section: "core",
        name: "project",
        kind: PropertyKind::ProjectId,
        default: None,
        help: "Project ID of the Cloud Platform project to operate on by default.",
    },
    PropertyDef {
        section: "core",
        name: "account",
        kind: PropertyKind::String,
        default: None,
        help: "Account used for authorization.",
    },
    PropertyDef {
        section: "core",
        name: "disable_prompts",
        kind: PropertyKind::Bool,
        default: Some("false"),
        help: "If true, the default answer is assumed for every prompt.",
    },
    PropertyDef {
        section: "core",
        name: "user_output_enabled",
        kind: PropertyKind::Bool,
        default: Some("true"),
        help: "If false, command output and status messages are suppressed.",
    },
    PropertyDef {
        section: "core",
        name: "verbosity",
        kind: PropertyKind::Choice(VERBOSITIES),
        default: Some("warning"),
        help: "Default logging verbosity.",
    },
    PropertyDef {
        section: "core",
        name: "log_http",
        kind: PropertyKind::Bool,
        default: Some("false"),
        help: "If true, log HTTP requests and responses.",
    },
    PropertyDef {
        section: "core",
        name: "log_file",
        kind: PropertyKind::Bool,
        default: Some("false"),
        help: "If true, also write logs to a file under the config directory.",
    },
    PropertyDef {
        section: "core",
        name: "http_timeout",
        kind: PropertyKind::Int,
        default: Some("300"),
        help: "Per-request HTTP timeout in seconds.",
    },
    PropertyDef {
        section: "compute",
        name: "zone",
        kind: PropertyKind::String,
        default: None,
        help: "Default zone for zonal Compute Engine resources.",
    },
    PropertyDef {
        section: "compute",
        name: "region",
        kind: PropertyKind::String,
        default: None,
        help: "Default region for regional Compute Engine resources.",
    },
    PropertyDef {
        section: "billing",
        name: "quota_project",
        kind: PropertyKind::String,
        default: None,
        help: "Project billed for API quota: LEGACY, CURRENT_PROJECT or a project ID.",
    },
    PropertyDef {
        section: "auth",
        name: "access_token_file",
        kind: PropertyKind::Path,
        default: None,
        help: "File containing an access token to use instead of stored credentials.",
    },
    PropertyDef {
        section: "auth",
        name: "disable_credentials",
        kind: PropertyKind::Bool,
        default: Some("false"),
        help: "If true, requests are sent without an Authorization header.",
    },
    PropertyDef {
        section: "spanner",
        name: "instance",
        kind: PropertyKind::String,
        default: None,
        help: "Default Cloud Spanner instance.",
    },
    PropertyDef {
        section: "dataproc",
        name: "region",
        kind: PropertyKind::String,
        default: None,
        help: "Default Dataproc region.",
    },
];

/// Split `section/name` (or bare `name`, meaning `core/name`).
pub fn split_property_path(path: &str) -> (String, String) {
    match path.split_once('/') {
        Some((section, name)) => (section.to_string(), name.to_string()),
        None => ("core".to_string(), path.to_string()),
    }
}

/// Look up a property declaration. Endpoint overrides are synthesized for any API name.
pub fn lookup(section: &str, name: &str) -> Option<PropertyDef> {
    if section == ENDPOINT_OVERRIDES_SECTION && !name.is_empty() {
        return Some(PropertyDef {
            section: ENDPOINT_OVERRIDES_SECTION,
            name: "*",
            kind: PropertyKind::Url,
            default: None,
            help: "Overrides the API endpoint for one service.",
        });
    }
    PROPERTIES
        .iter()
        .find(|p| p.section == section && p.name == name)
        .copied()
}

/// Like [`lookup`] but reports unknown properties as errors.
pub fn require_def(section: &str, name: &str) -> Result<PropertyDef> {
    lookup(section, name).ok_or_else(|| Error::InvalidProperty {
        property: format!("{section}/{name}"),
        reason: "unknown property".to_string(),
    })
}

/// Environment variable that overrides a property.
pub fn env_var_name(section: &str, name: &str) -> String {
    format!("CLOUDSDK_{}_{}", section.to_uppercase(), name.to_uppercase())
}

/// Parse a boolean property value.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Validate a Cloud project ID.
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens.
/// Must start with a letter and cannot end with a hyphen.
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    let mut chars = project.chars();

    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    if project.ends_with('-') {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Normalize a value being read back. Project IDs are only format-checked
/// when written; a flag or environment value passes through as given.
pub fn normalize_read(def: &PropertyDef, section: &str, name: &str, value: &str) -> Result<String> {
    if def.kind == PropertyKind::ProjectId {
        let value = value.trim();
        if !validate_project_id(value) {
            tracing::debug!("{}/{} value [{}] is not a valid project ID, using it as given", section, name, value);
        }
        return Ok(value.to_string());
    }
    validate(def, section, name, value)
}

/// Validate and normalize a value for the given property.
pub fn validate(def: &PropertyDef, section: &str, name: &str, value: &str) -> Result<String> {
    let invalid = |reason: String| Error::InvalidProperty {
        property: format!("{section}/{name}"),
        reason,
    };
    let value = value.trim();
    match def.kind {
        PropertyKind::String => Ok(value.to_string()),
        PropertyKind::Bool => parse_bool(value)
            .map(|b| b.to_string())
            .ok_or_else(|| invalid(format!("[{value}] is not a valid boolean"))),
        PropertyKind::Int => value
            .parse::<i64>()
            .map(|i| i.to_string())
            .map_err(|_| invalid(format!("[{value}] is not an integer"))),
        PropertyKind::Choice(choices) => {
            let lowered = value.to_lowercase();
            if choices.contains(&lowered.as_str()) {
                Ok(lowered)
            } else {
                Err(invalid(format!(
                    "[{value}] is not one of [{}]",
                    choices.join(", ")
                )))
            }
        }
        PropertyKind::Path => shellexpand::full(value)
            .map(|expanded| expanded.into_owned())
            .map_err(|e| invalid(e.to_string())),
        PropertyKind::ProjectId => {
            if validate_project_id(value) {
                Ok(value.to_string())
            } else {
                Err(invalid(format!(
                    "[{value}] is not a valid project ID. Project IDs are 6-30 lowercase \
                     letters, digits or hyphens, start with a letter and do not end with a hyphen"
                )))
            }
        }
        PropertyKind::Url => {
            let parsed = url::Url::parse(value).map_err(|e| invalid(e.to_string()))?;
            let mut normalized = parsed.to_string();
            if !normalized.ends_with('/') {
                normalized.push('/');
            }
            Ok(normalized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_overrides() {
        assert!(lookup("core", "project").is_some());
        assert!(lookup("core", "nope").is_none());
        let over = lookup("api_endpoint_overrides", "compute").unwrap();
        assert_eq!(over.kind, PropertyKind::Url);
    }

    #[test]
    fn test_split_property_path() {
        assert_eq!(split_property_path("compute/zone"), ("compute".into(), "zone".into()));
        assert_eq!(split_property_path("project"), ("core".into(), "project".into()));
    }

    #[test]
    fn test_project_id_validation() {
        assert!(validate_project_id("my-project-123"));
        assert!(validate_project_id("aaaaa1"));
        assert!(!validate_project_id("short"));
        assert!(!validate_project_id("0cannotstartwithnumber"));
        assert!(!validate_project_id("cannotendwithhyphen-"));
        assert!(!validate_project_id("Upper-Case-Project"));
        assert!(!validate_project_id(&"a".repeat(31)));
    }

    #[test]
    fn test_project_read_passes_through() {
        let def = lookup("core", "project").unwrap();
        assert_eq!(normalize_read(&def, "core", "project", " p ").unwrap(), "p");
        assert!(validate(&def, "core", "project", "p").is_err());
        let def = lookup("core", "verbosity").unwrap();
        assert!(normalize_read(&def, "core", "verbosity", "loud").is_err());
    }

    #[test]
    fn test_validate_normalizes() {
        let def = lookup("core", "disable_prompts").unwrap();
        assert_eq!(validate(&def, "core", "disable_prompts", "YES").unwrap(), "true");
        let def = lookup("core", "verbosity").unwrap();
        assert_eq!(validate(&def, "core", "verbosity", "DEBUG").unwrap(), "debug");
        assert!(validate(&def, "core", "verbosity", "loud").is_err());
        let def = lookup("api_endpoint_overrides", "compute").unwrap();
        assert_eq!(
            validate(&def, "api_endpoint_overrides", "compute", "http://localhost:8080/compute/v1").unwrap(),
            "http://localhost:8080/compute/v1/"
        );
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("core", "project"), "CLOUDSDK_CORE_PROJECT");
        assert_eq!(env_var_name("billing", "quota_project"), "CLOUDSDK_BILLING_QUOTA_PROJECT");
    }
}
