//! IAM policy commands shared by every resource type
//!
//! `get-iam-policy`, `add-iam-policy-binding`, `remove-iam-policy-binding`
//! and `set-iam-policy` differ between resource types only in the
//! collection, the flags that complete a reference and the wire style,
//! all carried by an [`IamTarget`].

use crate::cli::{ArgDef, ArgType, Command, CommandNode, CommandOutput, Namespace, ReleaseTrack, ResourceArgSpec};
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::iam::{self, IamStyle, RestIamService};
use async_trait::async_trait;

/// A resource type with an IAM policy.
#[derive(Debug, Clone, Copy)]
pub struct IamTarget {
    pub collection: &'static str,
    /// Noun used in help and status lines (`instance`, `bucket`).
    pub kind: &'static str,
    pub style: IamStyle,
    /// Template parameters settable by flags, with their help.
    pub attributes: &'static [(&'static str, &'static str)],
}

impl IamTarget {
    fn resource_arg(&self) -> ResourceArgSpec {
        let positional = ArgDef::positional(self.kind)
            .dest("resource")
            .help(&format!("The {} whose IAM policy to use.", self.kind));
        self.attributes
            .iter()
            .fold(ResourceArgSpec::new(self.collection, positional), |spec, (param, help)| {
                spec.attribute(param, help)
            })
    }

    fn service(&self, ctx: &AppContext, args: &Namespace) -> Result<RestIamService> {
        Ok(RestIamService::new(
            ctx.client()?,
            args.resource("resource")?.clone(),
            self.kind,
            self.style,
        ))
    }
}

fn binding_args() -> Vec<ArgDef> {
    vec![
        ArgDef::flag("member")
            .required()
            .metavar("PRINCIPAL")
            .help("The principal to bind, such as user:alice@example.com."),
        ArgDef::flag("role")
            .required()
            .metavar("ROLE")
            .help("Role name, such as roles/viewer."),
    ]
}

struct GetIamPolicy(IamTarget);

#[async_trait]
impl Command for GetIamPolicy {
    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![self.0.resource_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let service = self.0.service(ctx, args)?;
        let policy = iam::IamPolicyService::get_policy(&service).await?;
        Ok(CommandOutput::Resource(policy.to_value()?))
    }
}

struct AddIamPolicyBinding(IamTarget);

#[async_trait]
impl Command for AddIamPolicyBinding {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        binding_args()
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![self.0.resource_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let (member, role) = member_and_role(args)?;
        let service = self.0.service(ctx, args)?;
        let policy = iam::add_binding(&service, member, role, &ctx.console).await?;
        Ok(CommandOutput::Resource(policy.to_value()?))
    }
}

struct RemoveIamPolicyBinding(IamTarget);

#[async_trait]
impl Command for RemoveIamPolicyBinding {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        binding_args()
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![self.0.resource_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let (member, role) = member_and_role(args)?;
        let service = self.0.service(ctx, args)?;
        let policy = iam::remove_binding(&service, member, role, &ctx.console).await?;
        Ok(CommandOutput::Resource(policy.to_value()?))
    }
}

struct SetIamPolicy(IamTarget);

#[async_trait]
impl Command for SetIamPolicy {
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        vec![ArgDef::positional("policy-file")
            .dest("policy_file")
            .kind(ArgType::FilePath)
            .help("JSON or YAML file with the IAM policy.")]
    }

    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        vec![self.0.resource_arg()]
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
        let path = args
            .get_path("policy_file")
            .ok_or_else(|| Error::Internal("policy file was not parsed".to_string()))?;
        let file = iam::parse_policy_file(path, &ctx.console).await?;
        let service = self.0.service(ctx, args)?;
        let policy = iam::set_from_file(&service, &file, &ctx.console).await?;
        Ok(CommandOutput::Resource(policy.to_value()?))
    }
}

fn member_and_role(args: &Namespace) -> Result<(&str, &str)> {
    let member = args
        .get_str("member")
        .ok_or_else(|| Error::Usage("argument --member: must be specified.".to_string()))?;
    let role = args
        .get_str("role")
        .ok_or_else(|| Error::Usage("argument --role: must be specified.".to_string()))?;
    Ok((member, role))
}

/// The four IAM leaves for `target`.
pub fn commands(target: IamTarget) -> Vec<CommandNode> {
    let kind = target.kind;
    vec![
        CommandNode::leaf(
            "get-iam-policy",
            &format!("Get the IAM policy for a {kind}."),
            GetIamPolicy(target),
        ),
        CommandNode::leaf(
            "add-iam-policy-binding",
            &format!("Add an IAM policy binding to a {kind}."),
            AddIamPolicyBinding(target),
        ),
        CommandNode::leaf(
            "remove-iam-policy-binding",
            &format!("Remove an IAM policy binding from a {kind}."),
            RemoveIamPolicyBinding(target),
        ),
        CommandNode::leaf(
            "set-iam-policy",
            &format!("Set the IAM policy for a {kind}."),
            SetIamPolicy(target),
        ),
    ]
}

/// Add the IAM leaves to a group.
pub fn with_iam(group: CommandNode, target: IamTarget) -> CommandNode {
    commands(target).into_iter().fold(group, CommandNode::child)
}
