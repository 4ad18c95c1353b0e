//! Resource Manager project commands

use super::iam::{with_iam, IamTarget};
use crate::cli::{ArgDef, Command, CommandNode, CommandOutput, Namespace, ResourceArgSpec};
use crate::context::AppContext;
use crate::error::Result;
use crate::iam::IamStyle;
use crate::resource::ListRequest;
use async_trait::async_trait;

const PROJECTS: &str = "cloudresourcemanager.projects";

const PROJECT_IAM: IamTarget = IamTarget {
    collection: PROJECTS,
    kind: "project",
    style: IamStyle::ResourceManager,
    attributes: &[],
};

struct ListProjects;

#[async_trait]
impl Command for ListProjects {
    fn default_format(&self) -> Option<&str> {
        Some("table(projectId:sort=1, name, projectNumber)")
    }

    async fn run(&self, ctx: &AppContext, _args: &Namespace) -> Result<CommandOutput> {
        let base = ctx.base_url("cloudresourcemanager")?;
        let request = ListRequest::new(format!("{base}projects"), "projects");
        Ok(CommandOutput::Stream(ctx.list(request)?))
    }
}

struct DescribeProject;

#[async_trait]
impl Command for DescribeProject {
    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![ResourceArgSpec::new(
            PROJECTS,
            ArgDef::positional("project-id")
                .dest("project_id")
                .help("ID for the project to describe."),
        )]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let project = args.resource("project_id")?;
        Ok(CommandOutput::Resource(ctx.client()?.get(project.self_link()).await?))
    }
}

/// Project APIs bill the project being operated on, never a quota project.
fn skip_quota_project(ctx: &mut AppContext, _args: &Namespace) -> Result<()> {
    ctx.disable_quota_project();
    Ok(())
}

pub fn group() -> CommandNode {
    let projects = CommandNode::group("projects", "Create and manage project access policies.")
        .filter(skip_quota_project)
        .child(CommandNode::leaf("list", "List projects accessible by the active account.", ListProjects))
        .child(CommandNode::leaf("describe", "Show metadata for a project.", DescribeProject));
    with_iam(projects, PROJECT_IAM)
}
