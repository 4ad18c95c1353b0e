//! Policy files for `set-iam-policy`

use super::Policy;
use crate::console::prompt::PromptContinue;
use crate::console::Console;
use crate::error::{Error, Result};
use base64::Engine;
use serde_json::Value;
use std::path::Path;

/// A parsed policy file.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyFile {
    pub policy: Policy,
    /// Top-level fields present in the file, sorted and comma-joined.
    pub update_mask: String,
}

/// Load a YAML or JSON policy. A file without an `etag` can silently
/// overwrite concurrent changes, so the user is asked first.
pub async fn parse_policy_file(path: &Path, console: &Console) -> Result<PolicyFile> {
    let shown = path.display();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::BadFile(format!("Failed to load YAML from [{shown}]: {e}")))?;
    let malformed = || {
        Error::BadFile(format!(
            "Policy file [{shown}] is not a properly formatted YAML or JSON policy file."
        ))
    };

    // JSON is a subset of YAML.
    let document: Value = serde_yaml::from_str(&content).map_err(|_| malformed())?;
    let Value::Object(fields) = &document else {
        return Err(malformed());
    };
    let mut keys: Vec<&str> = fields.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let update_mask = keys.join(",");

    let policy: Policy = serde_json::from_value(document.clone()).map_err(|_| malformed())?;

    match &policy.etag {
        Some(etag) => {
            base64::engine::general_purpose::STANDARD
                .decode(etag)
                .map_err(|_| {
                    Error::BadFile(format!(
                        "The etag of policy file [{shown}] is not properly formatted. The etag \
                         should be a base64-encoded string."
                    ))
                })?;
        }
        None => {
            console.prompt_continue(
                &PromptContinue::new(
                    "The specified policy does not contain an \"etag\" field identifying a \
                     specific version to replace. Changing a policy without an \"etag\" can \
                     overwrite concurrent policy changes.",
                )
                .prompt_string("Replace existing policy")
                .cancel_on_no(),
            )
            .await?;
        }
    }

    tracing::debug!("Loaded policy file {} (mask {})", shown, update_mask);
    Ok(PolicyFile {
        policy,
        update_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_json_policy_with_mask() {
        let file = write(r#"{"bindings":[{"role":"roles/viewer","members":["user:a@x"]}],"etag":"YWJjZA==","version":1}"#);
        let (console, _) = Console::captured("", false);
        let parsed = parse_policy_file(file.path(), &console).await.unwrap();
        assert_eq!(parsed.update_mask, "bindings,etag,version");
        assert_eq!(parsed.policy.etag.as_deref(), Some("YWJjZA=="));
        assert_eq!(parsed.policy.bindings[0].members, vec!["user:a@x"]);
    }

    #[tokio::test]
    async fn test_yaml_policy() {
        let file = write("bindings:\n- role: roles/viewer\n  members:\n  - user:a@x\netag: YWJjZA==\n");
        let (console, _) = Console::captured("", false);
        let parsed = parse_policy_file(file.path(), &console).await.unwrap();
        assert_eq!(parsed.update_mask, "bindings,etag");
    }

    #[tokio::test]
    async fn test_malformed_file() {
        for content in ["bad", "NOT YAML OR JSON", "[1, 2]", "bindings: 3"] {
            let file = write(content);
            let (console, _) = Console::captured("", false);
            let err = parse_policy_file(file.path(), &console).await.unwrap_err();
            assert!(matches!(err, Error::BadFile(_)));
            assert!(err
                .to_string()
                .contains("is not a properly formatted YAML or JSON policy file."));
        }
    }

    #[tokio::test]
    async fn test_bad_etag() {
        let file = write(r#"{"bindings": [], "etag": "ua000"}"#);
        let (console, _) = Console::captured("", false);
        let err = parse_policy_file(file.path(), &console).await.unwrap_err();
        assert!(err.to_string().contains("is not properly formatted"));
    }

    #[tokio::test]
    async fn test_missing_etag_prompts() {
        let file = write(r#"{"bindings": []}"#);
        let (console, captured) = Console::captured("y\n", true);
        parse_policy_file(file.path(), &console).await.unwrap();
        assert!(captured.err.contents().contains("Replace existing policy (Y/n)?"));

        let (console, _) = Console::captured("n\n", true);
        let err = parse_policy_file(file.path(), &console).await.unwrap_err();
        assert!(matches!(err, Error::OperationCancelled(_)));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (console, _) = Console::captured("", false);
        let err = parse_policy_file(Path::new("/nonexistent/policy.json"), &console).await.unwrap_err();
        assert!(err.to_string().contains("Failed to load YAML from"));
    }
}
