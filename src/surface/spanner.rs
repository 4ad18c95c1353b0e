//! Cloud Spanner commands

use super::timeout_flag;
use crate::cli::{ArgDef, Command, CommandNode, CommandOutput, Namespace, PendingOperation, ReleaseTrack, ResourceArgSpec};
use crate::context::AppContext;
use crate::error::Result;
use crate::operations::{LroPoller, OperationRef};
use async_trait::async_trait;
use serde_json::json;

struct CreateDatabase;

#[async_trait]
impl Command for CreateDatabase {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![
            ArgDef::flag("ddl")
                .repeated()
                .metavar("STATEMENT")
                .help("DDL statement to run inside the newly created database. Repeat for several statements."),
            timeout_flag(),
        ]
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![ResourceArgSpec::new(
            "spanner.projects.instances.databases",
            ArgDef::positional("database").help("ID or URL of the database to create."),
        )
        .attribute_flag(
            "instancesId",
            ArgDef::flag("instance").help("Cloud Spanner instance of the database."),
        )]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let database = args.resource("database")?;
        let name = database.name();
        let instance = ctx.registry.create(
            "spanner.projects.instances",
            &[
                ("projectsId", database.get("projectsId").unwrap_or_default()),
                ("instancesId", database.get("instancesId").unwrap_or_default()),
            ],
        )?;

        let body = json!({
            "createStatement": format!("CREATE DATABASE `{name}`"),
            "extraStatements": args.get_strings("ddl"),
        });
        let client = ctx.client()?;
        let operation = client
            .post(&format!("{}/databases", instance.self_link()), Some(body))
            .await?;
        let reference = OperationRef::from_lro(&operation, &ctx.base_url("spanner")?)?;

        Ok(CommandOutput::Operation(PendingOperation {
            operation,
            reference,
            poller: Box::new(LroPoller::new(client).returning_response()),
            timeout: ctx.operation_timeout(args.get_duration("timeout")),
            print_result: true,
        }))
    }
}

pub fn group() -> CommandNode {
    CommandNode::group("spanner", "Command groups for Cloud Spanner.").child(
        CommandNode::group("databases", "Manage Cloud Spanner databases.")
            .child(CommandNode::leaf("create", "Create a Cloud Spanner database.", CreateDatabase)),
    )
}
