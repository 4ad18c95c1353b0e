//! Leaf argument parsing
//!
//! The flags and positionals visible at a leaf are flattened into one
//! `clap::Command`. clap only splits the command line; every value is
//! kept as a raw string and typed afterwards by its [`ArgType`], so the
//! same value grammar applies whether a value came from the command line
//! or from a default.

use super::args::{ArgDef, ArgType, ArgValue, Namespace};
use crate::config::Environment;
use crate::error::{Error, Result};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, ColorChoice};
use std::collections::{BTreeMap, HashSet};

/// Id of the built-in help switch.
pub const HELP_ID: &str = "__help";

/// Flags inherited by every command, added once at the root.
pub fn global_args() -> Vec<ArgDef> {
    vec![
        ArgDef::flag("project")
            .metavar("PROJECT_ID")
            .help("Google Cloud project ID to use for this invocation."),
        ArgDef::flag("account")
            .metavar("ACCOUNT")
            .help("Google Cloud user account to use for invocation."),
        ArgDef::flag("configuration")
            .metavar("CONFIGURATION")
            .help("Named configuration to use for this invocation."),
        ArgDef::flag("verbosity")
            .kind(ArgType::choice(crate::config::properties::VERBOSITIES.iter().copied()))
            .help("Override the default verbosity for this command."),
        ArgDef::flag("format").help("Set the format for printing command output resources."),
        ArgDef::flag("filter")
            .metavar("EXPRESSION")
            .help("Apply a Boolean filter EXPRESSION to each resource item to be listed."),
        ArgDef::flag("limit")
            .kind(ArgType::int_at_least(1))
            .help("Maximum number of resources to list."),
        ArgDef::flag("page-size")
            .kind(ArgType::int_at_least(1))
            .help("Some services group resource list output into pages."),
        ArgDef::flag("sort-by")
            .repeated()
            .metavar("FIELD")
            .help("Comma-separated list of resource field key names to sort by. Prefix a field with ~ for descending order."),
        ArgDef::flag("quiet")
            .short('q')
            .switch()
            .help("Disable all interactive prompts when running commands."),
        ArgDef::flag("no-user-output-enabled")
            .switch()
            .help("Do not print user intended output to the console."),
        ArgDef::flag("uri")
            .switch()
            .help("Print a list of resource URIs instead of the default output."),
        ArgDef::flag("async")
            .dest("run_async")
            .switch()
            .help("Return immediately, without waiting for the operation in progress to complete."),
        ArgDef::flag("log-http")
            .switch()
            .help("Log all HTTP server requests and responses to stderr."),
    ]
}

/// Whether `def` consumes the following token when written as `--flag value`.
pub fn takes_value(def: &ArgDef) -> bool {
    def.is_flag() && def.kind != ArgType::Bool
}

/// Merge argument lists. A later definition with the same dest replaces the
/// earlier one; two definitions of the same dest within one list is a bug.
pub fn merge_args(base: Vec<ArgDef>, overrides: Vec<ArgDef>) -> Result<Vec<ArgDef>> {
    let mut seen = HashSet::new();
    for def in &base {
        if !seen.insert(def.dest.clone()) {
            return Err(Error::Internal(format!(
                "argument dest [{}] is declared more than once",
                def.dest
            )));
        }
    }
    let mut merged = base;
    for def in overrides {
        match merged.iter_mut().find(|d| d.dest == def.dest) {
            Some(existing) => *existing = def,
            None => merged.push(def),
        }
    }
    Ok(merged)
}

/// Build the `clap::Command` for a leaf.
pub fn build_command(bin_name: &str, about: &str, defs: &[ArgDef]) -> clap::Command {
    let mut command = clap::Command::new(bin_name.to_string())
        .bin_name(bin_name.to_string())
        .about(about.to_string())
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .disable_help_subcommand(true)
        .color(ColorChoice::Never)
        .arg(
            Arg::new(HELP_ID)
                .long("help")
                .short('h')
                .action(ArgAction::SetTrue)
                .help("Print help."),
        );

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for def in defs {
        command = command.arg(to_clap(def));
        if let Some(group) = &def.mutex_group {
            groups.entry(group.clone()).or_default().push(def.dest.clone());
        }
    }
    for (name, members) in groups {
        command = command.group(ArgGroup::new(name).args(members).multiple(false));
    }
    command
}

fn to_clap(def: &ArgDef) -> Arg {
    let mut arg = Arg::new(def.dest.clone())
        .help(def.help.clone())
        .hide(def.hidden);

    if def.is_flag() {
        arg = arg.long(def.long().to_string());
        if let Some(short) = def.short {
            arg = arg.short(short);
        }
    }

    if def.is_flag() && def.kind == ArgType::Bool {
        return arg.action(ArgAction::SetTrue);
    }

    arg = arg
        .value_parser(clap::value_parser!(String))
        .value_name(
            def.metavar
                .clone()
                .unwrap_or_else(|| def.long().to_uppercase().replace('-', "_")),
        )
        .required(def.required && def.default.is_none());

    if def.is_flag() {
        arg.allow_hyphen_values(true)
            .num_args(1)
            .action(if def.repeated { ArgAction::Append } else { ArgAction::Set })
    } else if def.repeated {
        arg.num_args(1..).action(ArgAction::Append)
    } else {
        arg.num_args(1).action(ArgAction::Set)
    }
}

/// First line of a clap error, without clap's `error: ` prefix.
pub fn usage_error(err: clap::Error) -> Error {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    let message = line.strip_prefix("error: ").unwrap_or(line).to_string();
    Error::Usage(message)
}

/// Split `tokens` against `command`. Lenient mode ignores errors so that a
/// first pass can read what it needs before dynamic arguments exist.
pub fn split(command: clap::Command, tokens: &[String], lenient: bool) -> Result<ArgMatches> {
    if lenient {
        command
            .ignore_errors(true)
            .try_get_matches_from(tokens)
            .map_err(usage_error)
    } else {
        command.try_get_matches_from(tokens).map_err(usage_error)
    }
}

pub fn help_requested(matches: &ArgMatches) -> bool {
    matches!(matches.try_get_one::<bool>(HELP_ID), Ok(Some(true)))
}

/// Type the raw values of `matches` into a namespace. Values that fail to
/// parse are errors unless `lenient`, in which case they are skipped.
pub fn fill_namespace(
    defs: &[ArgDef],
    matches: &ArgMatches,
    env: &Environment,
    lenient: bool,
) -> Result<Namespace> {
    let mut ns = Namespace::new();
    for def in defs {
        let from_command_line = matches.value_source(&def.dest) == Some(ValueSource::CommandLine);

        if def.is_flag() && def.kind == ArgType::Bool {
            let on = from_command_line
                && matches!(matches.try_get_one::<bool>(&def.dest), Ok(Some(true)));
            if on {
                ns.set(&def.dest, vec![ArgValue::Bool(true)]);
            } else {
                ns.set_default(&def.dest, ArgValue::Bool(false));
            }
            continue;
        }

        let raw: Vec<String> = if from_command_line {
            matches
                .try_get_many::<String>(&def.dest)
                .ok()
                .flatten()
                .map(|values| values.cloned().collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        if !raw.is_empty() {
            let mut values = Vec::with_capacity(raw.len());
            for value in &raw {
                match def.kind.parse(&def.name, value, env) {
                    Ok(parsed) => values.push(parsed),
                    Err(_) if lenient => {}
                    Err(e) => return Err(e),
                }
            }
            if !values.is_empty() {
                ns.set(&def.dest, values);
            }
        } else if let Some(default) = &def.default {
            match def.kind.parse(&def.name, default, env) {
                Ok(parsed) => ns.set_default(&def.dest, parsed),
                Err(_) if lenient => {}
                Err(e) => {
                    return Err(Error::Internal(format!(
                        "default of {} does not parse: {e}",
                        def.name
                    )))
                }
            }
        }
    }
    Ok(ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn defs() -> Vec<ArgDef> {
        let mut defs = global_args();
        defs.push(ArgDef::positional("instance").repeated());
        defs.push(ArgDef::flag("zone"));
        defs.push(ArgDef::flag("member").repeated());
        defs.push(ArgDef::flag("threads").kind(ArgType::int_at_least(1)).default_value("4"));
        defs
    }

    fn parse(line: &str) -> Result<Namespace> {
        let defs = defs();
        let matches = split(build_command("gcmd test", "", &defs), &tokens(line), false)?;
        fill_namespace(&defs, &matches, &Environment::default(), false)
    }

    #[test]
    fn test_values_are_typed() {
        let ns = parse("a b --zone us-east1-b --limit 3 --quiet").unwrap();
        assert_eq!(ns.get_strings("instance"), vec!["a", "b"]);
        assert_eq!(ns.get_str("zone"), Some("us-east1-b"));
        assert_eq!(ns.get_int("limit"), Some(3));
        assert!(ns.get_bool("quiet"));
        assert!(!ns.get_bool("uri"));
        assert_eq!(ns.get_int("threads"), Some(4));
        assert!(!ns.is_specified("threads"));
    }

    #[test]
    fn test_repeated_flags_keep_order() {
        let ns = parse("i --member user:b@x --member=user:a@x").unwrap();
        assert_eq!(ns.get_strings("member"), vec!["user:b@x", "user:a@x"]);
    }

    #[test]
    fn test_bad_value_is_usage_error() {
        let err = parse("i --limit 0").unwrap_err();
        assert!(err.is_usage());
        assert!(err.to_string().starts_with("argument --limit:"));
    }

    #[test]
    fn test_unknown_flag_and_missing_positional() {
        let err = parse("i --bogus").unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(err.to_string().contains("--bogus"));

        let err = parse("--zone z").unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_hyphen_values_for_flags() {
        let ns = parse("i --filter -name:x").unwrap();
        assert_eq!(ns.get_str("filter"), Some("-name:x"));
    }

    #[test]
    fn test_merge_replaces_by_dest() {
        let base = vec![ArgDef::positional("value")];
        let merged = merge_args(base, vec![ArgDef::positional("value").kind(ArgType::Bool)]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, ArgType::Bool);

        let duplicated = vec![ArgDef::flag("zone"), ArgDef::flag("zone")];
        assert!(matches!(merge_args(duplicated, vec![]), Err(Error::Internal(_))));
    }

    #[test]
    fn test_mutex_group() {
        let defs = vec![
            ArgDef::flag("role").mutex("who"),
            ArgDef::flag("all").switch().mutex("who"),
        ];
        let err = split(build_command("gcmd t", "", &defs), &tokens("--role r --all"), false).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_lenient_pass_skips_unknown() {
        let defs = vec![ArgDef::positional("property")];
        let matches = split(build_command("gcmd t", "", &defs), &tokens("core/project extra"), true).unwrap();
        let ns = fill_namespace(&defs, &matches, &Environment::default(), true).unwrap();
        assert_eq!(ns.get_str("property"), Some("core/project"));
    }

    #[test]
    fn test_help_switch() {
        let matches = split(build_command("gcmd t", "", &[]), &tokens("-h"), false).unwrap();
        assert!(help_requested(&matches));
    }
}
