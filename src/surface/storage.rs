//! Cloud Storage commands

use super::iam::{with_iam, IamTarget};
use crate::cli::{ArgDef, Command, CommandNode, CommandOutput, Namespace, ResourceArgSpec};
use crate::console::prompt::PromptContinue;
use crate::context::AppContext;
use crate::error::Result;
use crate::iam::IamStyle;
use crate::resource::ListRequest;
use async_trait::async_trait;

const BUCKETS: &str = "storage.buckets";

const BUCKET_IAM: IamTarget = IamTarget {
    collection: BUCKETS,
    kind: "bucket",
    style: IamStyle::Storage,
    attributes: &[],
};

fn bucket_arg() -> ResourceArgSpec {
    ResourceArgSpec::new(
        BUCKETS,
        ArgDef::positional("url").help("The bucket, as gs://BUCKET or a bucket name."),
    )
}

struct ListBuckets;

#[async_trait]
impl Command for ListBuckets {
    fn default_format(&self) -> Option<&str> {
        Some("table(name, location, storageClass, timeCreated.date('%Y-%m-%d'):label=CREATED)")
    }

    async fn run(&self, ctx: &AppContext, _args: &Namespace) -> Result<CommandOutput> {
        let project = ctx.project()?;
        let base = ctx.base_url("storage")?;
        let request = ListRequest::new(format!("{base}b"), "items").query("project", project);
        Ok(CommandOutput::Stream(ctx.list(request)?))
    }
}

struct DescribeBucket;

#[async_trait]
impl Command for DescribeBucket {
    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![bucket_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let bucket = args.resource("url")?;
        Ok(CommandOutput::Resource(ctx.client()?.get(bucket.self_link()).await?))
    }
}

struct DeleteBucket;

#[async_trait]
impl Command for DeleteBucket {
    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![bucket_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let bucket = args.resource("url")?;
        let shown = bucket.gs_url().unwrap_or_else(|| bucket.name().to_string());
        ctx.console.prompt_continue(
            &PromptContinue::new(format!("Bucket [{shown}] will be deleted.")).cancel_on_no(),
        )
        .await?;
        ctx.client()?.delete(bucket.self_link()).await?;
        ctx.console.status(&format!("Deleted bucket [{shown}]."))?;
        Ok(CommandOutput::None)
    }
}

pub fn group() -> CommandNode {
    let buckets = CommandNode::group("buckets", "Manage Cloud Storage buckets.")
        .child(CommandNode::leaf("list", "List Cloud Storage buckets.", ListBuckets))
        .child(CommandNode::leaf("describe", "Describe a Cloud Storage bucket.", DescribeBucket))
        .child(CommandNode::leaf("delete", "Delete a Cloud Storage bucket.", DeleteBucket));

    CommandNode::group("storage", "Create and manage Cloud Storage buckets and objects.")
        .child(with_iam(buckets, BUCKET_IAM))
}
