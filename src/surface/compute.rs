//! Compute Engine commands

use super::iam::{with_iam, IamTarget};
use super::timeout_flag;
use crate::cli::{
    ArgDef, ArgType, Command, CommandNode, CommandOutput, Namespace, PendingOperation, ReleaseTrack,
    ResourceArgSpec,
};
use crate::console::prompt::PromptContinue;
use crate::console::scoped::online_edit;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::iam::IamStyle;
use crate::operations::{ComputePoller, OperationRef, Waiter};
use crate::parallel::{run_bounded, DEFAULT_THREADS};
use crate::resource::{ListRequest, ResourceRef};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

const INSTANCES: &str = "compute.instances";

const INSTANCE_IAM: IamTarget = IamTarget {
    collection: INSTANCES,
    kind: "instance",
    style: IamStyle::Compute,
    attributes: &[("zone", "Zone of the instance.")],
};

fn instance_arg() -> ResourceArgSpec {
    ResourceArgSpec::new(
        INSTANCES,
        ArgDef::positional("instance").help("Name or URL of the instance."),
    )
    .attribute("zone", "Zone of the instance.")
}

/// A Compute operation returned by a mutating call, to be waited on.
fn pending(ctx: &AppContext, args: &Namespace, operation: Value, fetch_target: bool) -> Result<CommandOutput> {
    let reference = OperationRef::from_compute(&operation)?;
    let poller = ComputePoller::new(ctx.client()?);
    Ok(CommandOutput::Operation(PendingOperation {
        operation,
        reference,
        poller: Box::new(if fetch_target { poller.fetching_target() } else { poller }),
        timeout: ctx.operation_timeout(args.get_duration("timeout")),
        print_result: fetch_target,
    }))
}

// =========================================================================
// instances
// =========================================================================

struct ListInstances;

#[async_trait]
impl Command for ListInstances {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![ArgDef::flag("zones")
            .kind(ArgType::List(','))
            .metavar("ZONE,[ZONE,...]")
            .help("Only list instances in these zones.")]
    }

    fn default_format(&self) -> Option<&str> {
        Some("table(name, zone.basename(), machineType.basename(), status)")
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let project = ctx.project()?;
        let base = ctx.base_url("compute")?;
        let zones = args.get_list("zones");

        if zones.is_empty() {
            let request = ListRequest::compute_aggregated(
                format!("{base}projects/{project}/aggregated/instances"),
                "instances",
            );
            return Ok(CommandOutput::Stream(ctx.list(request)?));
        }

        let mut streams = Vec::with_capacity(zones.len());
        for zone in zones {
            let request = ListRequest::compute(format!("{base}projects/{project}/zones/{zone}/instances"));
            streams.push(ctx.list(request)?);
        }
        Ok(CommandOutput::Stream(stream::iter(streams).flatten().boxed()))
    }
}

struct DescribeInstance;

#[async_trait]
impl Command for DescribeInstance {
    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![instance_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let instance = args.resource("instance")?;
        Ok(CommandOutput::Resource(ctx.client()?.get(instance.self_link()).await?))
    }
}

struct DeleteInstances;

#[async_trait]
impl Command for DeleteInstances {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![
            ArgDef::flag("threads")
                .kind(ArgType::int_at_least(1))
                .default_value(&DEFAULT_THREADS.to_string())
                .help("Number of instances deleted concurrently."),
            timeout_flag(),
        ]
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        let mut spec = instance_arg();
        spec.positional = spec.positional.repeated().help("Names or URLs of the instances to delete.");
        vec![spec]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let instances = args.resources("instance").to_vec();
        let listing: Vec<String> = instances
            .iter()
            .map(|r| format!(" - [{}] in [{}]", r.name(), r.get("zone").unwrap_or_default()))
            .collect();
        ctx.console.prompt_continue(
            &PromptContinue::new(format!(
                "The following instances will be deleted. Any attached disks configured to be \
                 auto-deleted will be deleted unless they are attached to any other instances.\n{}",
                listing.join("\n")
            ))
            .cancel_on_no(),
        )
        .await?;

        let threads = args
            .get_int("threads")
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_THREADS);
        let client = ctx.client()?;
        let console = ctx.console.clone();
        let timeout = ctx.operation_timeout(args.get_duration("timeout"));
        let run_async = ctx.run_async;
        let total = instances.len();
        tracing::info!("Deleting {} instance(s) with {} worker(s)", total, threads);

        let results = run_bounded(instances, threads, &ctx.cancel, move |instance: ResourceRef| {
            let client = client.clone();
            let console = console.clone();
            async move {
                let operation = client.delete(instance.self_link()).await?;
                let reference = OperationRef::from_compute(&operation)?;
                if run_async {
                    console.status(&format!(
                        "Delete in progress for [{}]. Check operation [{}] for status.",
                        instance.self_link(),
                        reference.name
                    ))?;
                    return Ok(());
                }
                Waiter::new(timeout)
                    .wait(&ComputePoller::new(client), &reference, Some(operation), &console)
                    .await?;
                console.status(&format!("Deleted [{}].", instance.self_link()))?;
                Ok(())
            }
        })
        .await;

        let mut failures = Vec::new();
        for done in results {
            match done.result {
                Ok(()) => {}
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) => failures.push(format!(" - [{}]: {e}", done.item.name())),
            }
        }
        if failures.is_empty() {
            return Ok(CommandOutput::None);
        }
        failures.sort();
        Err(Error::Operation(format!(
            "Failed to delete {} of {} instance(s):\n{}",
            failures.len(),
            total,
            failures.join("\n")
        )))
    }
}

/// `start` and `stop`: POST to `<instance>/<verb>` and wait.
struct InstanceAction {
    verb: &'static str,
}

#[async_trait]
impl Command for InstanceAction {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![timeout_flag()]
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![instance_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let instance = args.resource("instance")?;
        tracing::info!("{} {}", self.verb, instance);
        let operation = ctx
            .client()?
            .post(&format!("{}/{}", instance.self_link(), self.verb), None)
            .await?;
        pending(ctx, args, operation, false)
    }
}

struct EditInstance;

#[async_trait]
impl Command for EditInstance {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![timeout_flag()]
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![instance_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let instance = args.resource("instance")?;
        let client = ctx.client()?;
        let current = client.get(instance.self_link()).await?;
        let original = serde_yaml::to_string(&current)
            .map_err(|e| Error::Internal(format!("Failed to render instance as YAML: {e}")))?;

        let edited = online_edit(&ctx.console, ctx.editor.as_ref(), &original)?;
        let updated: Value = serde_yaml::from_str(&edited)
            .map_err(|e| Error::BadFile(format!("The edited resource is not valid YAML: {e}")))?;
        if !updated.is_object() {
            return Err(Error::BadFile("The edited resource must be a YAML mapping.".to_string()));
        }

        let operation = client.put(instance.self_link(), updated).await?;
        pending(ctx, args, operation, true)
    }
}

// =========================================================================
// operations
// =========================================================================

struct WaitOperation;

#[async_trait]
impl Command for WaitOperation {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![timeout_flag()]
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![ResourceArgSpec::new(
            "compute.zoneOperations",
            ArgDef::positional("operation").help("Name or URL of the zonal operation."),
        )
        .attribute("zone", "Zone of the operation.")]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let operation_ref = args.resource("operation")?;
        let client = ctx.client()?;
        let operation = client.get(operation_ref.self_link()).await?;
        let reference = OperationRef::from_compute(&operation)?;
        Ok(CommandOutput::Operation(PendingOperation {
            operation,
            reference,
            poller: Box::new(ComputePoller::new(client)),
            timeout: ctx.operation_timeout(args.get_duration("timeout")),
            print_result: false,
        }))
    }
}

pub fn group() -> CommandNode {
    let instances = CommandNode::group("instances", "Read and manipulate Compute Engine virtual machine instances.")
        .child(CommandNode::leaf("list", "List Compute Engine virtual machine instances.", ListInstances))
        .child(CommandNode::leaf("describe", "Describe a virtual machine instance.", DescribeInstance))
        .child(CommandNode::leaf("delete", "Delete Compute Engine virtual machine instances.", DeleteInstances))
        .child(CommandNode::leaf("start", "Start a stopped virtual machine instance.", InstanceAction { verb: "start" }))
        .child(CommandNode::leaf("stop", "Stop a virtual machine instance.", InstanceAction { verb: "stop" }))
        .child(
            CommandNode::leaf("edit", "Edit a virtual machine instance in an editor.", EditInstance)
                .tracks(&[ReleaseTrack::Alpha, ReleaseTrack::Beta]),
        );

    CommandNode::group("compute", "Create and manipulate Compute Engine resources.")
        .child(with_iam(instances, INSTANCE_IAM))
        .child(
            CommandNode::group("operations", "Read and manipulate Compute Engine operations.")
                .child(CommandNode::leaf("wait", "Wait for a zonal operation to complete.", WaitOperation)),
        )
}
