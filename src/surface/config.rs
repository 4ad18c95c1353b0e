//! `config` commands: properties and named configurations

use crate::cli::{ArgDef, ArgType, Command, CommandNode, CommandOutput, Namespace, ReleaseTrack};
use crate::config::named::{NamedConfigurations, Scope};
use crate::config::properties::{self, PropertyKind, PROPERTIES};
use crate::console::prompt::PromptContinue;
use crate::context::AppContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

/// `section/name` of every declared property starting with `prefix`.
fn complete_property(prefix: &str, _parsed: &Namespace) -> Vec<String> {
    PROPERTIES
        .iter()
        .map(|p| format!("{}/{}", p.section, p.name))
        .filter(|path| path.starts_with(prefix))
        .collect()
}

fn property_arg() -> ArgDef {
    ArgDef::positional("property")
        .metavar("SECTION/PROPERTY")
        .help("Property to operate on, such as core/project. A bare name means the core section.")
        .completer(complete_property)
}

fn installation_flag() -> ArgDef {
    ArgDef::flag("installation")
        .switch()
        .help("Operate on the installation-wide properties file instead of the active configuration.")
}

fn property_path(args: &Namespace) -> Result<(String, String)> {
    let raw = args
        .get_str("property")
        .ok_or_else(|| Error::Internal("property was not parsed".to_string()))?;
    let (section, name) = properties::split_property_path(raw);
    properties::require_def(&section, &name)?;
    Ok((section, name))
}

fn scope(args: &Namespace) -> Scope {
    if args.get_bool("installation") {
        Scope::Installation
    } else {
        Scope::User
    }
}

fn store(ctx: &AppContext) -> NamedConfigurations {
    NamedConfigurations::new(ctx.config.paths().clone())
}

/// Run a configuration update on the blocking pool. Updates wait on the
/// config directory lock and write files synchronously.
async fn update<T, F>(store: NamedConfigurations, f: F) -> Result<T>
where
    F: FnOnce(&NamedConfigurations) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| Error::Internal(format!("Configuration update stopped: {e}")))?
}

// =========================================================================
// Properties
// =========================================================================

struct ListProperties;

#[async_trait]
impl Command for ListProperties {
    async fn run(&self, ctx: &AppContext, _args: &Namespace) -> Result<CommandOutput> {
        let effective = serde_json::to_value(ctx.config.effective())
            .map_err(|e| Error::Internal(format!("Failed to render properties: {e}")))?;
        ctx.console.status(&format!(
            "Your active configuration is: [{}]",
            ctx.config.active_name()
        ))?;
        Ok(CommandOutput::Resource(effective))
    }
}

struct GetProperty;

#[async_trait]
impl Command for GetProperty {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![property_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let (section, name) = property_path(args)?;
        match ctx.config.get(&section, &name)? {
            Some(value) => ctx.console.out_line(&value)?,
            None => ctx.console.status("(unset)")?,
        }
        Ok(CommandOutput::None)
    }
}

struct SetProperty;

#[async_trait]
impl Command for SetProperty {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![
            property_arg(),
            ArgDef::positional("value").help("Value to assign to the property."),
            installation_flag(),
        ]
    }

    /// `VALUE` takes the type of the chosen property.
    fn dynamic_args(&self, parsed: &Namespace) -> Result<Vec<ArgDef>> {
        let Some(raw) = parsed.get_str("property") else {
            return Ok(Vec::new());
        };
        let (section, name) = properties::split_property_path(raw);
        let Some(def) = properties::lookup(&section, &name) else {
            return Ok(Vec::new());
        };
        let kind = match def.kind {
            PropertyKind::Bool => ArgType::Bool,
            PropertyKind::Int => ArgType::int(),
            PropertyKind::Choice(choices) => ArgType::choice(choices.iter().copied()),
            PropertyKind::Path => ArgType::FilePath,
            _ => return Ok(Vec::new()),
        };
        Ok(vec![ArgDef::positional("value")
            .kind(kind)
            .help(def.help)])
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let (section, name) = property_path(args)?;
        let value = args
            .get("value")
            .map(|v| ArgType::String.format(v))
            .ok_or_else(|| Error::Internal("value was not parsed".to_string()))?;
        let scope = scope(args);
        let active = ctx.config.active_name().to_string();
        let stored = {
            let (section, name) = (section.clone(), name.clone());
            update(store(ctx), move |s| s.set_property(scope, &active, &section, &name, &value)).await?
        };
        tracing::debug!("Stored {}/{} = {}", section, name, stored);
        let target = match scope {
            Scope::User => format!("configuration [{}]", ctx.config.active_name()),
            Scope::Installation => "installation properties".to_string(),
        };
        ctx.console.status(&format!("Updated property [{section}/{name}] in {target}."))?;
        Ok(CommandOutput::None)
    }
}

struct UnsetProperty;

#[async_trait]
impl Command for UnsetProperty {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![property_arg(), installation_flag()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let (section, name) = property_path(args)?;
        let scope = scope(args);
        let active = ctx.config.active_name().to_string();
        let removed = {
            let (section, name) = (section.clone(), name.clone());
            update(store(ctx), move |s| s.unset_property(scope, &active, &section, &name)).await?
        };
        if removed {
            ctx.console.status(&format!("Unset property [{section}/{name}]."))?;
        } else {
            ctx.console.warn(&format!("Property [{section}/{name}] is not set."))?;
        }
        Ok(CommandOutput::None)
    }
}

// =========================================================================
// Named configurations
// =========================================================================

fn configuration_name(args: &Namespace) -> Result<&str> {
    args.get_str("configuration_name")
        .ok_or_else(|| Error::Internal("configuration name was not parsed".to_string()))
}

fn name_arg(help: &str) -> ArgDef {
    ArgDef::positional("configuration-name").metavar("NAME").help(help)
}

struct CreateConfiguration;

#[async_trait]
impl Command for CreateConfiguration {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![
            name_arg("Name of the configuration to create."),
            ArgDef::flag("no-activate")
                .switch()
                .help("Do not activate the configuration after creating it."),
        ]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let name = configuration_name(args)?;
        let activate = !args.get_bool("no_activate");
        let owned = name.to_string();
        update(store(ctx), move |s| s.create(&owned, activate)).await?;
        ctx.console.status(&format!("Created [{name}]."))?;
        if activate {
            ctx.console.status(&format!("Activated [{name}]."))?;
        }
        Ok(CommandOutput::None)
    }
}

struct ActivateConfiguration;

#[async_trait]
impl Command for ActivateConfiguration {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![name_arg("Name of the configuration to activate.")]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let name = configuration_name(args)?;
        let owned = name.to_string();
        update(store(ctx), move |s| s.activate(&owned)).await?;
        ctx.console.status(&format!("Activated [{name}]."))?;
        Ok(CommandOutput::None)
    }
}

struct ListConfigurations;

#[async_trait]
impl Command for ListConfigurations {
    fn default_format(&self) -> Option<&str> {
        Some("table(name, is_active, properties.core.account, properties.core.project, properties.compute.zone:label=COMPUTE_DEFAULT_ZONE)")
    }

    async fn run(&self, ctx: &AppContext, _args: &Namespace) -> Result<CommandOutput> {
        let rows: Vec<Result<Value>> = store(ctx)
            .list()?
            .into_iter()
            .map(|info| {
                Ok(json!({
                    "name": info.name,
                    "is_active": info.is_active,
                    "properties": info.properties.sections(),
                }))
            })
            .collect();
        Ok(CommandOutput::Stream(stream::iter(rows).boxed()))
    }
}

struct DeleteConfiguration;

#[async_trait]
impl Command for DeleteConfiguration {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![name_arg("Name of the configuration to delete.")]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let name = configuration_name(args)?;
        ctx.console.prompt_continue(
            &PromptContinue::new(format!("The configuration [{name}] will be deleted.")).cancel_on_no(),
        )
        .await?;
        let owned = name.to_string();
        update(store(ctx), move |s| s.delete(&owned)).await?;
        ctx.console.status(&format!("Deleted [{name}]."))?;
        Ok(CommandOutput::None)
    }
}

pub fn group() -> CommandNode {
    CommandNode::group("config", "View and edit properties and named configurations.")
        .child(CommandNode::leaf("list", "List properties of the active configuration.", ListProperties))
        .child(CommandNode::leaf("get", "Print the value of a property.", GetProperty))
        .child(CommandNode::leaf("set", "Set a property.", SetProperty))
        .child(CommandNode::leaf("unset", "Unset a property.", UnsetProperty))
        .child(
            CommandNode::group("configurations", "Manage the set of named configurations.")
                .child(CommandNode::leaf("create", "Create a new named configuration.", CreateConfiguration))
                .child(CommandNode::leaf("activate", "Activate an existing named configuration.", ActivateConfiguration))
                .child(CommandNode::leaf("list", "List existing named configurations.", ListConfigurations))
                .child(CommandNode::leaf("delete", "Delete a named configuration.", DeleteConfiguration)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ArgValue;

    #[test]
    fn test_property_completion() {
        let found = complete_property("compute/", &Namespace::new());
        assert!(found.contains(&"compute/zone".to_string()));
        assert!(found.iter().all(|p| p.starts_with("compute/")));
    }

    #[tokio::test]
    async fn test_update_runs_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let named = NamedConfigurations::new(crate::config::ConfigPaths::new(dir.path()));
        // Hold the lock so the update has to wait on it.
        let held = crate::config::named::lock(&crate::config::ConfigPaths::new(dir.path())).unwrap();
        let pending = tokio::spawn(update(named.clone(), |s| s.create("work", false)));
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(!pending.is_finished());
        drop(held);
        pending.await.unwrap().unwrap();
        assert!(named.list().unwrap().iter().any(|c| c.name == "work"));
    }

    #[test]
    fn test_value_is_retyped_from_property() {
        let mut parsed = Namespace::new();
        parsed.set("property", vec![ArgValue::String("core/disable_prompts".to_string())]);
        let defs = SetProperty.dynamic_args(&parsed).unwrap();
        assert_eq!(defs[0].kind, ArgType::Bool);

        parsed.set("property", vec![ArgValue::String("core/verbosity".to_string())]);
        let defs = SetProperty.dynamic_args(&parsed).unwrap();
        assert!(defs[0].kind.choices().unwrap().contains(&"debug".to_string()));

        parsed.set("property", vec![ArgValue::String("project".to_string())]);
        assert!(SetProperty.dynamic_args(&parsed).unwrap().is_empty());
    }
}
