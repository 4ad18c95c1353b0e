//! IAM read-modify-write
//!
//! Every resource with `GetIamPolicy`/`SetIamPolicy` plugs in through
//! [`IamPolicyService`]. The flows here read the policy, edit it and write
//! it back carrying the etag that was read, so a concurrent change makes
//! the write fail with a conflict instead of being overwritten.

use super::{file::PolicyFile, validate_member, validate_role, Policy};
use crate::console::Console;
use crate::error::{Error, Result};
use crate::gcp::client::ApiClient;
use crate::resource::ResourceRef;
use async_trait::async_trait;
use serde_json::json;

/// Policy access for one resource.
#[async_trait]
pub trait IamPolicyService: Send + Sync {
    async fn get_policy(&self) -> Result<Policy>;

    async fn set_policy(&self, policy: &Policy, update_mask: Option<&str>) -> Result<Policy>;

    /// `<kind> [<name>]`, used in status lines and hints.
    fn describe(&self) -> String;
}

/// Wire conventions of the IAM endpoints of each API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IamStyle {
    /// `GET <self>/getIamPolicy`, `POST <self>/setIamPolicy {policy}`.
    Compute,
    /// `POST <self>:getIamPolicy {}`, `POST <self>:setIamPolicy {policy, updateMask}`.
    ResourceManager,
    /// `GET <self>/iam`, `PUT <self>/iam <policy>`.
    Storage,
}

/// [`IamPolicyService`] over the REST endpoints of a resource.
pub struct RestIamService {
    client: ApiClient,
    resource: ResourceRef,
    kind: String,
    style: IamStyle,
}

impl RestIamService {
    pub fn new(client: ApiClient, resource: ResourceRef, kind: impl Into<String>, style: IamStyle) -> Self {
        Self {
            client,
            resource,
            kind: kind.into(),
            style,
        }
    }
}

#[async_trait]
impl IamPolicyService for RestIamService {
    async fn get_policy(&self) -> Result<Policy> {
        let link = self.resource.self_link();
        let value = match self.style {
            IamStyle::Compute => self.client.get(&format!("{link}/getIamPolicy")).await?,
            IamStyle::ResourceManager => {
                self.client
                    .post(&format!("{link}:getIamPolicy"), Some(json!({})))
                    .await?
            }
            IamStyle::Storage => self.client.get(&format!("{link}/iam")).await?,
        };
        Policy::from_value(value)
    }

    async fn set_policy(&self, policy: &Policy, update_mask: Option<&str>) -> Result<Policy> {
        let link = self.resource.self_link();
        let body = policy.to_value()?;
        let value = match self.style {
            IamStyle::Compute => {
                self.client
                    .post(&format!("{link}/setIamPolicy"), Some(json!({ "policy": body })))
                    .await?
            }
            IamStyle::ResourceManager => {
                let mut request = json!({ "policy": body });
                if let Some(mask) = update_mask {
                    request["updateMask"] = json!(mask);
                }
                self.client
                    .post(&format!("{link}:setIamPolicy"), Some(request))
                    .await?
            }
            IamStyle::Storage => self.client.put(&format!("{link}/iam"), body).await?,
        };
        Policy::from_value(value)
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.kind, self.resource.name())
    }
}

fn conflict_hint(service: &dyn IamPolicyService, err: Error) -> Error {
    match err {
        Error::Conflict { message } => Error::Conflict {
            message: format!(
                "{message}\nThe IAM policy of {} was changed concurrently. Re-read it with \
                 get-iam-policy and try again.",
                service.describe()
            ),
        },
        other => other,
    }
}

async fn write_back(
    service: &dyn IamPolicyService,
    policy: &Policy,
    update_mask: Option<&str>,
    console: &Console,
) -> Result<Policy> {
    let updated = service
        .set_policy(policy, update_mask)
        .await
        .map_err(|e| conflict_hint(service, e))?;
    console.status(&format!("Updated IAM policy for {}.", service.describe()))?;
    Ok(updated)
}

/// `add-iam-policy-binding`.
pub async fn add_binding(
    service: &dyn IamPolicyService,
    member: &str,
    role: &str,
    console: &Console,
) -> Result<Policy> {
    validate_member(member)?;
    validate_role(role)?;
    let mut policy = service.get_policy().await?;
    tracing::debug!("Adding {} to {} on {} (etag {:?})", member, role, service.describe(), policy.etag);
    policy.add_binding(member, role);
    write_back(service, &policy, None, console).await
}

/// `remove-iam-policy-binding`.
pub async fn remove_binding(
    service: &dyn IamPolicyService,
    member: &str,
    role: &str,
    console: &Console,
) -> Result<Policy> {
    validate_member(member)?;
    validate_role(role)?;
    let mut policy = service.get_policy().await?;
    tracing::debug!("Removing {} from {} on {} (etag {:?})", member, role, service.describe(), policy.etag);
    policy.remove_binding(member, role)?;
    write_back(service, &policy, None, console).await
}

/// `set-iam-policy`.
pub async fn set_from_file(
    service: &dyn IamPolicyService,
    file: &PolicyFile,
    console: &Console,
) -> Result<Policy> {
    write_back(service, &file.policy, Some(&file.update_mask), console).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use serde_json::json;
    use std::sync::Mutex;

    struct InMemory {
        policy: Mutex<Policy>,
        sets: Mutex<Vec<(Policy, Option<String>)>>,
        fail_with_conflict: bool,
    }

    impl InMemory {
        fn new(policy: serde_json::Value) -> Self {
            Self {
                policy: Mutex::new(Policy::from_value(policy).unwrap()),
                sets: Mutex::new(Vec::new()),
                fail_with_conflict: false,
            }
        }
    }

    #[async_trait]
    impl IamPolicyService for InMemory {
        async fn get_policy(&self) -> Result<Policy> {
            Ok(self.policy.lock().unwrap().clone())
        }

        async fn set_policy(&self, policy: &Policy, update_mask: Option<&str>) -> Result<Policy> {
            self.sets
                .lock()
                .unwrap()
                .push((policy.clone(), update_mask.map(str::to_string)));
            if self.fail_with_conflict {
                let http = HttpError::from_response(412, "https://x", "");
                return Err(Error::Conflict { message: http.to_string() });
            }
            *self.policy.lock().unwrap() = policy.clone();
            Ok(policy.clone())
        }

        fn describe(&self) -> String {
            "project [p]".to_string()
        }
    }

    #[tokio::test]
    async fn test_add_binding_preserves_etag() {
        let service = InMemory::new(json!({
            "bindings": [{"role": "roles/owner", "members": ["user:a@x"]}],
            "etag": "abc"
        }));
        let (console, captured) = Console::captured("", false);
        let updated = add_binding(&service, "user:b@x", "roles/owner", &console).await.unwrap();

        let sets = service.sets.lock().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].0.etag.as_deref(), Some("abc"));
        assert_eq!(sets[0].0.bindings[0].members, vec!["user:a@x", "user:b@x"]);
        assert_eq!(updated, sets[0].0);
        assert!(captured.err.contents().contains("Updated IAM policy for project [p]."));
    }

    #[tokio::test]
    async fn test_remove_missing_binding_does_not_write() {
        let service = InMemory::new(json!({"bindings": [], "etag": "abc"}));
        let (console, _) = Console::captured("", false);
        let err = remove_binding(&service, "user:b@x", "roles/owner", &console).await.unwrap_err();
        assert!(matches!(err, Error::BindingNotFound));
        assert!(service.sets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_carries_reread_hint() {
        let mut service = InMemory::new(json!({"etag": "abc"}));
        service.fail_with_conflict = true;
        let (console, _) = Console::captured("", false);
        let err = add_binding(&service, "user:b@x", "roles/owner", &console).await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(message.contains("project [p]"));
        assert!(message.contains("get-iam-policy"));
        assert_eq!(service.sets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_member_rejected_before_read() {
        let service = InMemory::new(json!({}));
        let (console, _) = Console::captured("", false);
        let err = add_binding(&service, "b@x", "roles/owner", &console).await.unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn test_set_from_file_sends_mask() {
        let service = InMemory::new(json!({}));
        let (console, _) = Console::captured("", false);
        let file = PolicyFile {
            policy: Policy::from_value(json!({"bindings": [], "etag": "YWJj"})).unwrap(),
            update_mask: "bindings,etag".to_string(),
        };
        set_from_file(&service, &file, &console).await.unwrap();
        assert_eq!(service.sets.lock().unwrap()[0].1.as_deref(), Some("bindings,etag"));
    }
}
