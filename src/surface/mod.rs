//! The shipped command tree
//!
//! # Module Structure
//!
//! - `config` - properties and named configurations
//! - `compute` - instances and zonal operations
//! - `storage` - buckets
//! - `projects` - Resource Manager projects
//! - `spanner` - databases
//! - `iam` - policy commands shared by the resource groups above

mod compute;
mod config;
mod iam;
mod projects;
mod spanner;
mod storage;

use crate::cli::{ArgDef, ArgType, CommandNode};

/// `--timeout` of every command that waits on an operation.
pub(crate) fn timeout_flag() -> ArgDef {
    ArgDef::flag("timeout")
        .kind(ArgType::Duration)
        .default_value("30m")
        .help("Maximum time to wait for the operation, such as 90s or 1h.")
}

/// Root of the command tree.
pub fn root() -> CommandNode {
    CommandNode::group(crate::TOOL_NAME, "Manage Google Cloud resources from the command line.")
        .child(config::group())
        .child(compute::group())
        .child(storage::group())
        .child(projects::group())
        .child(spanner::group())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_leaf_is_reachable() {
        let paths: Vec<String> = root()
            .leaf_paths(crate::cli::ReleaseTrack::Ga)
            .into_iter()
            .map(|p| p.join(" "))
            .collect();
        for expected in [
            "config set",
            "config configurations activate",
            "compute instances delete",
            "compute instances add-iam-policy-binding",
            "storage buckets delete",
            "projects get-iam-policy",
            "spanner databases create",
        ] {
            assert!(
                paths.iter().any(|p| p == expected),
                "missing {expected} in {paths:?}"
            );
        }
    }
}
