//! IAM policy helpers
//!
//! Policy documents, binding edits and the read-modify-write flow shared
//! by every `*-iam-policy*` command.
//!
//! # Module Structure
//!
//! - [`file`] - Loading policy files for `set-iam-policy`
//! - [`service`] - The `GetIamPolicy`/`SetIamPolicy` seam and the RMW flows

pub mod file;
pub mod service;

pub use file::{parse_policy_file, PolicyFile};
pub use service::{add_binding, remove_binding, set_from_file, IamPolicyService, IamStyle, RestIamService};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Member prefixes accepted by `--member`.
const MEMBER_PREFIXES: &[&str] = &[
    "user:",
    "serviceAccount:",
    "group:",
    "domain:",
    "principal:",
    "principalSet:",
    "deleted:",
    "projectOwner:",
    "projectEditor:",
    "projectViewer:",
];

/// Members that carry no prefix.
const SPECIAL_MEMBERS: &[&str] = &["allUsers", "allAuthenticatedUsers"];

/// One role and its members.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

/// An IAM policy. Fields the framework does not interpret are kept in
/// `extra` so that a read-modify-write never drops them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_configs: Vec<Value>,
    /// Base64 of the server's opaque etag bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Policy {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Internal(format!("Failed to decode IAM policy: {e}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::Internal(format!("Failed to encode IAM policy: {e}")))
    }

    /// Add `member` to the first unconditional binding for `role`, creating
    /// the binding at the end when none exists. Returns false when the
    /// member was already bound.
    pub fn add_binding(&mut self, member: &str, role: &str) -> bool {
        match self
            .bindings
            .iter_mut()
            .find(|b| b.role == role && b.condition.is_none())
        {
            Some(binding) => {
                if binding.members.iter().any(|m| m == member) {
                    return false;
                }
                binding.members.push(member.to_string());
            }
            None => self.bindings.push(Binding {
                role: role.to_string(),
                members: vec![member.to_string()],
                condition: None,
            }),
        }
        true
    }

    /// Remove `member` from every unconditional binding for `role`. Bindings
    /// left without members are dropped.
    pub fn remove_binding(&mut self, member: &str, role: &str) -> Result<()> {
        let mut found = false;
        for binding in self
            .bindings
            .iter_mut()
            .filter(|b| b.role == role && b.condition.is_none())
        {
            let before = binding.members.len();
            binding.members.retain(|m| m != member);
            found |= binding.members.len() != before;
        }
        if !found {
            return Err(Error::BindingNotFound);
        }
        self.bindings.retain(|b| !b.members.is_empty());
        Ok(())
    }
}

/// Check the form of a `--member` value.
pub fn validate_member(member: &str) -> Result<()> {
    if SPECIAL_MEMBERS.contains(&member) {
        return Ok(());
    }
    let valid = MEMBER_PREFIXES
        .iter()
        .any(|prefix| member.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty()));
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_argument(
            "--member",
            member,
            format!(
                "Member must be one of allUsers, allAuthenticatedUsers or start with {}; got [{member}].",
                MEMBER_PREFIXES.join(", ")
            ),
        ))
    }
}

/// Check the form of a `--role` value.
pub fn validate_role(role: &str) -> Result<()> {
    let valid = role.starts_with("roles/")
        || ((role.starts_with("projects/") || role.starts_with("organizations/"))
            && role.contains("/roles/"));
    if valid && !role.ends_with('/') {
        Ok(())
    } else {
        Err(Error::invalid_argument(
            "--role",
            role,
            "Role must be of the form roles/NAME or projects/ID/roles/NAME.",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> Policy {
        Policy::from_value(json!({
            "bindings": [{"role": "roles/owner", "members": ["user:a@x"]}],
            "etag": "abc",
            "version": 1,
            "kind": "storage#policy"
        }))
        .unwrap()
    }

    #[test]
    fn test_add_to_existing_binding() {
        let mut p = policy();
        assert!(p.add_binding("user:b@x", "roles/owner"));
        assert_eq!(p.bindings[0].members, vec!["user:a@x", "user:b@x"]);
        assert!(!p.add_binding("user:b@x", "roles/owner"));
        assert_eq!(p.bindings[0].members.len(), 2);
    }

    #[test]
    fn test_add_creates_binding_at_end() {
        let mut p = policy();
        p.add_binding("group:g@x", "roles/viewer");
        assert_eq!(p.bindings.len(), 2);
        assert_eq!(p.bindings[1].role, "roles/viewer");
    }

    #[test]
    fn test_remove_drops_empty_binding() {
        let mut p = policy();
        p.remove_binding("user:a@x", "roles/owner").unwrap();
        assert!(p.bindings.is_empty());
        assert!(matches!(
            p.remove_binding("user:a@x", "roles/owner"),
            Err(Error::BindingNotFound)
        ));
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let p = policy();
        let value = p.to_value().unwrap();
        assert_eq!(value["kind"], "storage#policy");
        assert_eq!(value["etag"], "abc");
        assert!(value.get("auditConfigs").is_none());
    }

    #[test]
    fn test_member_validation() {
        assert!(validate_member("user:a@example.com").is_ok());
        assert!(validate_member("serviceAccount:sa@p.iam.gserviceaccount.com").is_ok());
        assert!(validate_member("allUsers").is_ok());
        assert!(validate_member("a@example.com").is_err());
        assert!(validate_member("user:").is_err());
    }

    #[test]
    fn test_role_validation() {
        assert!(validate_role("roles/owner").is_ok());
        assert!(validate_role("projects/p/roles/custom").is_ok());
        assert!(validate_role("owner").is_err());
        assert!(validate_role("roles/").is_err());
    }
}
