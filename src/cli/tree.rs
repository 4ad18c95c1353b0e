//! Command tree
//!
//! A node is either a [`Group`] of children or a [`Leaf`] wrapping a
//! [`Command`]. The tree is built once at startup and never mutated.
//! Visibility is gated by release track: a node is reachable under a track
//! only if it and every ancestor support that track.

use super::args::{ArgDef, Namespace, ResourceArgSpec};
use crate::context::AppContext;
use crate::error::Result;
use crate::operations::{OperationPoller, OperationRef};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Release track of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReleaseTrack {
    Alpha,
    Beta,
    Ga,
}

impl ReleaseTrack {
    pub const ALL: [ReleaseTrack; 3] = [Self::Alpha, Self::Beta, Self::Ga];

    /// Path token selecting the track; GA has none.
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Alpha => Some("alpha"),
            Self::Beta => Some("beta"),
            Self::Ga => None,
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            _ => None,
        }
    }
}

impl fmt::Display for ReleaseTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Ga => "ga",
        })
    }
}

/// Attributes shared by groups and leaves.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub help: String,
    pub category: Option<String>,
    pub hidden: bool,
    /// Warning printed before a deprecated command runs.
    pub deprecated: Option<String>,
    pub tracks: Vec<ReleaseTrack>,
}

impl NodeInfo {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            category: None,
            hidden: false,
            deprecated: None,
            tracks: ReleaseTrack::ALL.to_vec(),
        }
    }

    pub fn supports(&self, track: ReleaseTrack) -> bool {
        self.tracks.contains(&track)
    }
}

/// A long-running operation handed back by a command.
pub struct PendingOperation {
    /// The operation as returned by the mutating call.
    pub operation: Value,
    pub reference: OperationRef,
    pub poller: Box<dyn OperationPoller>,
    pub timeout: Duration,
    /// Print the poller's result after success.
    pub print_result: bool,
}

/// What a command returns to the dispatcher.
pub enum CommandOutput {
    /// One resource, formatted as `yaml` unless the command says otherwise.
    Resource(Value),
    /// A lazy list run through filter, sort, limit and format.
    Stream(BoxStream<'static, Result<Value>>),
    /// Waited on unless `--async` is given.
    Operation(PendingOperation),
    /// Nothing to print.
    None,
}

impl fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(v) => f.debug_tuple("Resource").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Operation(op) => f.debug_tuple("Operation").field(&op.reference).finish(),
            Self::None => f.write_str("None"),
        }
    }
}

/// A leaf command.
#[async_trait]
pub trait Command: Send + Sync {
    /// Flags and positionals for `track`.
    fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
        Vec::new()
    }

    /// Resource arguments, parsed into references before `run`.
    fn resource_args(&self) -> Vec<ResourceArgSpec> {
        Vec::new()
    }

    /// Second pass: arguments that depend on values parsed in the first one.
    /// A definition whose dest matches an existing one replaces it.
    fn dynamic_args(&self, _parsed: &Namespace) -> Result<Vec<ArgDef>> {
        Ok(Vec::new())
    }

    /// `--format` used when the user gives none.
    fn default_format(&self) -> Option<&str> {
        None
    }

    async fn run(&self, ctx: &AppContext, args: &Namespace) -> Result<CommandOutput>;
}

/// Hook a group runs, top-down, before any descendant command.
pub trait GroupFilter: Send + Sync {
    fn filter(&self, ctx: &mut AppContext, args: &Namespace) -> Result<()>;
}

impl<F> GroupFilter for F
where
    F: Fn(&mut AppContext, &Namespace) -> Result<()> + Send + Sync,
{
    fn filter(&self, ctx: &mut AppContext, args: &Namespace) -> Result<()> {
        self(ctx, args)
    }
}

pub struct Group {
    pub info: NodeInfo,
    /// Flags visible to every descendant.
    pub args: Vec<ArgDef>,
    pub children: Vec<CommandNode>,
    pub filter: Option<Arc<dyn GroupFilter>>,
}

pub struct Leaf {
    pub info: NodeInfo,
    pub command: Arc<dyn Command>,
}

/// A node of the command tree.
pub enum CommandNode {
    Group(Group),
    Leaf(Leaf),
}

impl CommandNode {
    pub fn group(name: &str, help: &str) -> Self {
        Self::Group(Group {
            info: NodeInfo::new(name, help),
            args: Vec::new(),
            children: Vec::new(),
            filter: None,
        })
    }

    pub fn leaf(name: &str, help: &str, command: impl Command + 'static) -> Self {
        Self::Leaf(Leaf {
            info: NodeInfo::new(name, help),
            command: Arc::new(command),
        })
    }

    pub fn info(&self) -> &NodeInfo {
        match self {
            Self::Group(g) => &g.info,
            Self::Leaf(l) => &l.info,
        }
    }

    fn info_mut(&mut self) -> &mut NodeInfo {
        match self {
            Self::Group(g) => &mut g.info,
            Self::Leaf(l) => &mut l.info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    /// Add a child (groups only).
    pub fn child(mut self, child: CommandNode) -> Self {
        if let Self::Group(g) = &mut self {
            g.children.push(child);
        }
        self
    }

    /// Add a flag visible to every descendant (groups only).
    pub fn arg(mut self, arg: ArgDef) -> Self {
        if let Self::Group(g) = &mut self {
            g.args.push(arg);
        }
        self
    }

    pub fn filter(mut self, filter: impl GroupFilter + 'static) -> Self {
        if let Self::Group(g) = &mut self {
            g.filter = Some(Arc::new(filter));
        }
        self
    }

    pub fn tracks(mut self, tracks: &[ReleaseTrack]) -> Self {
        self.info_mut().tracks = tracks.to_vec();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.info_mut().hidden = true;
        self
    }

    pub fn deprecated(mut self, message: &str) -> Self {
        self.info_mut().deprecated = Some(message.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.info_mut().category = Some(category.to_string());
        self
    }

    /// Children reachable under `track`.
    pub fn visible_children(&self, track: ReleaseTrack) -> impl Iterator<Item = &CommandNode> {
        let children: &[CommandNode] = match self {
            Self::Group(g) => &g.children,
            Self::Leaf(_) => &[],
        };
        children.iter().filter(move |c| c.info().supports(track))
    }

    pub fn find_child(&self, name: &str, track: ReleaseTrack) -> Option<&CommandNode> {
        self.visible_children(track).find(|c| c.name() == name)
    }

    /// Every leaf path reachable under `track`.
    pub fn leaf_paths(&self, track: ReleaseTrack) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        collect_paths(self, track, &mut Vec::new(), &mut paths);
        paths
    }
}

fn collect_paths(node: &CommandNode, track: ReleaseTrack, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    for child in node.visible_children(track) {
        prefix.push(child.name().to_string());
        match child {
            CommandNode::Leaf(_) => out.push(prefix.clone()),
            CommandNode::Group(_) => collect_paths(child, track, prefix, out),
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Command for Noop {
        async fn run(&self, _ctx: &AppContext, _args: &Namespace) -> Result<CommandOutput> {
            Ok(CommandOutput::None)
        }
    }

    fn tree() -> CommandNode {
        CommandNode::group("gcmd", "root").child(
            CommandNode::group("compute", "Compute Engine")
                .child(CommandNode::leaf("list", "List", Noop))
                .child(CommandNode::leaf("edit", "Edit", Noop).tracks(&[ReleaseTrack::Alpha, ReleaseTrack::Beta])),
        )
    }

    #[test]
    fn test_track_gating() {
        let root = tree();
        let compute = root.find_child("compute", ReleaseTrack::Ga).unwrap();
        assert!(compute.find_child("list", ReleaseTrack::Ga).is_some());
        assert!(compute.find_child("edit", ReleaseTrack::Ga).is_none());
        assert!(compute.find_child("edit", ReleaseTrack::Beta).is_some());
    }

    #[test]
    fn test_ancestor_tracks_gate_descendants() {
        let root = CommandNode::group("gcmd", "root").child(
            CommandNode::group("preview", "Preview")
                .tracks(&[ReleaseTrack::Alpha])
                .child(CommandNode::leaf("run", "Run", Noop)),
        );
        assert!(root.leaf_paths(ReleaseTrack::Ga).is_empty());
        assert_eq!(root.leaf_paths(ReleaseTrack::Alpha), vec![vec!["preview".to_string(), "run".to_string()]]);
    }

    #[test]
    fn test_track_tokens() {
        assert_eq!(ReleaseTrack::from_token("beta"), Some(ReleaseTrack::Beta));
        assert_eq!(ReleaseTrack::from_token("ga"), None);
        assert_eq!(ReleaseTrack::Ga.prefix(), None);
    }
}
