//! Dispatcher
//!
//! Runs one command line end to end:
//!
//! 1. Walk the command tree along the leading tokens, picking the release
//!    track from the first one.
//! 2. Split the remaining tokens against every flag visible at the leaf,
//!    in two passes so that dynamic arguments can depend on the first.
//! 3. Load the effective configuration and parse resource arguments.
//! 4. Run ancestor group filters top-down, then the leaf.
//! 5. Send the result through the output pipeline or the operation waiter.
//!
//! Errors are returned as a [`Failure`] carrying the command path; only
//! the binary turns them into exit codes.

use super::args::{ArgDef, Namespace};
use super::parser::{self, global_args, merge_args, takes_value};
use super::tree::{CommandNode, Group, Leaf, ReleaseTrack};
use crate::config::{Config, ConfigPaths, Environment};
use crate::console::scoped::{editor_command, Editor, ExternalEditor};
use crate::console::Console;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::gcp::auth::{token_source_for, AccountStore, FileAccountStore, TokenSource};
use crate::gcp::http::{default_transport, HttpSend};
use crate::operations::Waiter;
use crate::output::{self, OutputOptions, DEFAULT_SINGLE_FORMAT};
use crate::parallel::CancelFlag;
use crate::resource::{ParseContext, Registry};
use crate::TOOL_NAME;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default `core/http_timeout`, in seconds.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

// =========================================================================
// Services
// =========================================================================

/// Where credentials come from.
pub enum Credentials {
    /// Resolved per invocation from `auth/*` and `core/account`.
    FromConfig(Arc<dyn AccountStore>),
    /// A fixed source; `None` sends no `Authorization` header.
    Fixed(Option<Arc<dyn TokenSource>>),
}

/// Process-wide collaborators, constructed once at entry.
pub struct Services {
    pub console: Console,
    pub env: Environment,
    pub paths: ConfigPaths,
    /// Transport below the header stage. `None` builds the default chain
    /// from `core/http_timeout` and `--log-http`.
    pub transport: Option<Arc<dyn HttpSend>>,
    pub credentials: Credentials,
    pub editor: Arc<dyn Editor>,
    pub registry: Registry,
    pub cancel: CancelFlag,
}

impl Services {
    /// Services over the real process environment.
    pub fn from_process() -> Result<Self> {
        let env = Environment::from_process();
        let paths = ConfigPaths::discover(&env);
        Ok(Self {
            console: Console::stdio(),
            credentials: Credentials::FromConfig(Arc::new(FileAccountStore::new(&paths))),
            editor: Arc::new(ExternalEditor::new(editor_command(&env))),
            registry: Registry::builtin()?,
            transport: None,
            cancel: CancelFlag::new(),
            env,
            paths,
        })
    }
}

// =========================================================================
// Failure reporting
// =========================================================================

/// An error together with the command it came from.
#[derive(Debug)]
pub struct Failure {
    pub error: Error,
    /// Dotted command path, `gcmd.compute.instances.list`.
    pub command_path: String,
    /// `--verbosity=debug` was in effect.
    pub verbose: bool,
}

impl Failure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }

    /// Print `ERROR: (<path>) <message>` and return the exit code.
    pub fn report(&self, console: &Console) -> i32 {
        tracing::debug!("{} failed: {:?}", self.command_path, self.error);
        let mut lines = vec![format!("ERROR: ({}) {}", self.command_path, self.error)];
        if self.error.is_internal() {
            lines.push(format!(
                "This is a bug in {TOOL_NAME}. Please file a bug report including the command \
                 line and the output of --verbosity=debug."
            ));
        }
        if self.verbose || self.error.is_internal() {
            lines.push(format!("Details: {:?}", self.error));
        }
        let text = lines.join("\n");
        if let Err(e) = console.err_line(&text) {
            tracing::error!("{} ({})", text, e);
        }
        self.exit_code()
    }
}

/// Value of `--name VALUE` or `--name=VALUE` in raw arguments, last one wins.
pub fn scan_flag(argv: &[String], name: &str) -> Option<String> {
    let long = format!("--{name}");
    let mut found = None;
    let mut tokens = argv.iter();
    while let Some(token) = tokens.next() {
        if token == "--" {
            break;
        }
        if token == &long {
            found = tokens.next().cloned();
        } else if let Some(value) = token.strip_prefix(&long).and_then(|r| r.strip_prefix('=')) {
            found = Some(value.to_string());
        }
    }
    found
}

/// Whether a switch appears in raw arguments.
pub fn scan_switch(argv: &[String], name: &str) -> bool {
    let long = format!("--{name}");
    argv.iter().take_while(|t| *t != "--").any(|t| t == &long)
}

// =========================================================================
// Tree walk
// =========================================================================

/// Result of walking the command tree along the leading tokens.
struct Walk<'a> {
    track: ReleaseTrack,
    /// Nodes from the root to where the walk stopped.
    nodes: Vec<&'a CommandNode>,
    /// Tokens left for the argument parser.
    rest: Vec<String>,
    help: bool,
    /// First token that named no child of the group it was given to.
    unknown: Option<String>,
}

impl<'a> Walk<'a> {
    fn node(&self) -> &'a CommandNode {
        self.nodes[self.nodes.len() - 1]
    }

    /// Command names below the root, with the track token first.
    fn path(&self) -> Vec<String> {
        self.track
            .prefix()
            .map(str::to_string)
            .into_iter()
            .chain(self.nodes.iter().skip(1).map(|n| n.name().to_string()))
            .collect()
    }

    fn dotted(&self) -> String {
        std::iter::once(TOOL_NAME.to_string())
            .chain(self.path())
            .collect::<Vec<_>>()
            .join(".")
    }

    fn spaced(&self) -> String {
        std::iter::once(TOOL_NAME.to_string())
            .chain(self.path())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn groups(&self) -> impl Iterator<Item = &'a Group> + '_ {
        self.nodes.iter().filter_map(|n| match n {
            CommandNode::Group(g) => Some(g),
            CommandNode::Leaf(_) => None,
        })
    }
}

/// Flag spellings that consume the next token.
fn value_flag_names(defs: &[ArgDef]) -> HashSet<String> {
    let mut names = HashSet::new();
    for def in defs.iter().filter(|d| takes_value(d)) {
        names.insert(def.name.clone());
        if let Some(short) = def.short {
            names.insert(format!("-{short}"));
        }
    }
    names
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current.push(substitution.min(previous[j + 1] + 1).min(current[j] + 1));
        }
        previous = current;
    }
    previous[b.len()]
}

/// Children of `group` whose names are close to `token`.
fn suggestions(group: &CommandNode, token: &str, track: ReleaseTrack) -> Vec<String> {
    let threshold = (token.len() / 3).max(2);
    let mut scored: Vec<(usize, String)> = group
        .visible_children(track)
        .filter(|c| !c.info().hidden)
        .filter_map(|c| {
            let name = c.name();
            let distance = edit_distance(token, name);
            (distance <= threshold || name.starts_with(token)).then(|| (distance, name.to_string()))
        })
        .collect();
    scored.sort();
    scored.into_iter().map(|(_, name)| name).take(3).collect()
}

// =========================================================================
// Dispatcher
// =========================================================================

pub struct Dispatcher {
    root: CommandNode,
    services: Services,
}

impl Dispatcher {
    pub fn new(root: CommandNode, services: Services) -> Self {
        Self { root, services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn root(&self) -> &CommandNode {
        &self.root
    }

    /// Run a command line (without the program name) and return the exit code.
    pub async fn run(&self, argv: &[String]) -> i32 {
        match self.execute(argv).await {
            Ok(()) => crate::error::EXIT_OK,
            Err(failure) => failure.report(&self.services.console),
        }
    }

    /// Run a command line, returning the failure instead of reporting it.
    pub async fn execute(&self, argv: &[String]) -> std::result::Result<(), Failure> {
        let walk = self.walk(argv);
        let command_path = walk.dotted();
        let verbose = scan_flag(argv, "verbosity")
            .or_else(|| self.services.env.get("CLOUDSDK_CORE_VERBOSITY").map(str::to_string))
            .is_some_and(|v| v == "debug");

        let started = Instant::now();
        tracing::info!("Dispatching {}", command_path);
        let result = self.dispatch(walk).await;
        tracing::info!(
            "{} finished in {:?} ({})",
            command_path,
            started.elapsed(),
            if result.is_ok() { "ok" } else { "failed" }
        );
        result.map_err(|error| Failure {
            error,
            command_path,
            verbose,
        })
    }

    fn walk(&self, tokens: &[String]) -> Walk<'_> {
        let mut walk = Walk {
            track: ReleaseTrack::Ga,
            nodes: vec![&self.root],
            rest: Vec::new(),
            help: false,
            unknown: None,
        };
        let mut value_flags = value_flag_names(&global_args());
        if let CommandNode::Group(root) = &self.root {
            value_flags.extend(value_flag_names(&root.args));
        }

        let mut index = 0;
        while index < tokens.len() {
            let token = &tokens[index];
            index += 1;

            if token == "--" {
                walk.rest.extend(tokens[index - 1..].iter().cloned());
                break;
            }
            if token.starts_with('-') && token.len() > 1 {
                if token == "--help" || token == "-h" {
                    walk.help = true;
                }
                walk.rest.push(token.clone());
                if !token.contains('=') && value_flags.contains(token.as_str()) {
                    if let Some(value) = tokens.get(index) {
                        walk.rest.push(value.clone());
                        index += 1;
                    }
                }
                continue;
            }

            let node = walk.node();
            if matches!(node, CommandNode::Leaf(_)) || walk.unknown.is_some() {
                walk.rest.push(token.clone());
                continue;
            }
            if walk.nodes.len() == 1 && walk.track == ReleaseTrack::Ga {
                if let Some(track) = ReleaseTrack::from_token(token) {
                    walk.track = track;
                    continue;
                }
            }
            match node.find_child(token, walk.track) {
                Some(child) => {
                    if let CommandNode::Group(group) = child {
                        value_flags.extend(value_flag_names(&group.args));
                    }
                    walk.nodes.push(child);
                }
                None => {
                    walk.unknown = Some(token.clone());
                    walk.rest.push(token.clone());
                }
            }
        }
        walk
    }

    /// Every argument visible at `leaf`.
    fn leaf_args(&self, walk: &Walk<'_>, leaf: &Leaf) -> Result<Vec<ArgDef>> {
        let mut defs = global_args();
        for group in walk.groups() {
            defs.extend(group.args.iter().cloned());
        }
        let mut attribute_flags = HashSet::new();
        for spec in leaf.command.resource_args() {
            defs.push(spec.positional.clone());
            for (_, flag) in &spec.attributes {
                if attribute_flags.insert(flag.dest.clone()) {
                    defs.push(flag.clone());
                }
            }
        }
        defs.extend(leaf.command.args(walk.track));
        merge_args(defs, Vec::new())
    }

    fn group_help(&self, walk: &Walk<'_>) -> String {
        let node = walk.node();
        let mut text = format!("Usage: {} COMMAND [FLAGS]\n\n{}\n", walk.spaced(), node.info().help);
        let mut sections: BTreeMap<String, Vec<(&str, &str)>> = BTreeMap::new();
        for child in node.visible_children(walk.track).filter(|c| !c.info().hidden) {
            let heading = match (&child.info().category, child) {
                (Some(category), _) => format!("{category} commands"),
                (None, CommandNode::Group(_)) => "Groups".to_string(),
                (None, CommandNode::Leaf(_)) => "Commands".to_string(),
            };
            sections
                .entry(heading)
                .or_default()
                .push((child.name(), child.info().help.as_str()));
        }
        for (heading, entries) in sections {
            let width = entries.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
            text.push_str(&format!("\n{heading}:\n"));
            for (name, help) in entries {
                text.push_str(&format!("  {name:<width$}  {help}\n"));
            }
        }
        text
    }

    fn command_expected(&self, walk: &Walk<'_>) -> Error {
        let names: Vec<&str> = walk
            .node()
            .visible_children(walk.track)
            .filter(|c| !c.info().hidden)
            .map(|c| c.name())
            .collect();
        Error::Usage(format!(
            "Command name argument expected.\n\nAvailable commands for {}:\n  {}",
            walk.spaced(),
            names.join("\n  ")
        ))
    }

    async fn dispatch(&self, walk: Walk<'_>) -> Result<()> {
        let console = &self.services.console;

        if let Some(token) = &walk.unknown {
            let mut message = format!("Invalid choice: '{token}'.");
            let close = suggestions(walk.node(), token, walk.track);
            if !close.is_empty() {
                message.push_str("\nMaybe you meant:");
                for name in close {
                    message.push_str(&format!("\n  {} {}", walk.spaced(), name));
                }
            }
            return Err(Error::Usage(message));
        }

        let leaf = match walk.node() {
            CommandNode::Group(_) if walk.help => return console.write_out(&self.group_help(&walk)),
            CommandNode::Group(_) => return Err(self.command_expected(&walk)),
            CommandNode::Leaf(leaf) => leaf,
        };
        let command = leaf.command.clone();
        let env = &self.services.env;

        // First pass: enough to compute dynamic arguments and honor --help.
        let mut defs = self.leaf_args(&walk, leaf)?;
        let first = parser::split(
            parser::build_command(&walk.spaced(), &leaf.info.help, &defs),
            &walk.rest,
            true,
        )?;
        if parser::help_requested(&first) {
            let help = parser::build_command(&walk.spaced(), &leaf.info.help, &defs).render_help();
            return console.write_out(&help.to_string());
        }
        let partial = parser::fill_namespace(&defs, &first, env, true)?;
        let dynamic = command.dynamic_args(&partial)?;
        if !dynamic.is_empty() {
            tracing::debug!("{} dynamic argument(s) for {}", dynamic.len(), walk.dotted());
            defs = merge_args(defs, dynamic)?;
        }

        // Second pass: strict.
        let matches = parser::split(
            parser::build_command(&walk.spaced(), &leaf.info.help, &defs),
            &walk.rest,
            false,
        )?;
        let mut args = parser::fill_namespace(&defs, &matches, env, false)?;

        let config = self.load_config(&args)?;

        let mut console = console.clone();
        console.set_quiet(args.get_bool("quiet") || config.get_bool("core", "disable_prompts")?);
        console.set_user_output_enabled(
            !args.get_bool("no_user_output_enabled") && config.get_bool("core", "user_output_enabled")?,
        );

        let registry = self
            .services
            .registry
            .clone()
            .with_overrides(config.endpoint_overrides());
        self.parse_resources(leaf, &registry, &config, &mut args)?;

        let transport = match &self.services.transport {
            Some(transport) => transport.clone(),
            None => {
                let seconds = config
                    .get_int("core", "http_timeout")?
                    .and_then(|s| u64::try_from(s).ok())
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
                default_transport(Duration::from_secs(seconds), config.get_bool("core", "log_http")?)?
            }
        };
        let tokens = match &self.services.credentials {
            Credentials::FromConfig(store) => token_source_for(&config, store.as_ref())?,
            Credentials::Fixed(tokens) => tokens.clone(),
        };

        let output = OutputOptions::new(
            args.get_str("format"),
            command.default_format().unwrap_or(DEFAULT_SINGLE_FORMAT),
            args.get_str("filter"),
            &args.get_strings("sort_by"),
            args.get_int("limit").and_then(|n| usize::try_from(n).ok()),
            args.get_bool("uri"),
        )?;

        let mut ctx = AppContext::new(
            config,
            registry,
            console,
            walk.track,
            walk.path(),
            output,
            self.services.editor.clone(),
            transport,
            tokens,
        );
        ctx.page_size = args.get_int("page_size").and_then(|n| usize::try_from(n).ok());
        ctx.run_async = args.get_bool("run_async");
        ctx.cancel = self.services.cancel.clone();

        for group in walk.groups() {
            if let Some(filter) = &group.filter {
                tracing::debug!("Running filter of group {}", group.info.name);
                filter.filter(&mut ctx, &args)?;
            }
        }

        for node in &walk.nodes {
            if let Some(message) = &node.info().deprecated {
                let warning = if message.is_empty() {
                    "This command is deprecated.".to_string()
                } else {
                    format!("This command is deprecated. {message}")
                };
                ctx.console.warn(&warning)?;
            }
        }

        let result = command.run(&ctx, &args).await?;
        tracing::debug!("{} returned {:?}", walk.dotted(), result);
        handle_output(&ctx, result).await
    }

    fn load_config(&self, args: &Namespace) -> Result<Config> {
        let mut config = Config::load(
            self.services.paths.clone(),
            self.services.env.clone(),
            args.get_str("configuration"),
        )?;
        for (dest, section, name) in [
            ("project", "core", "project"),
            ("account", "core", "account"),
            ("verbosity", "core", "verbosity"),
        ] {
            if let Some(value) = args.get_str(dest) {
                config.set_flag(section, name, value);
            }
        }
        if args.get_bool("log_http") {
            config.set_flag("core", "log_http", "true");
        }
        Ok(config)
    }

    fn parse_resources(
        &self,
        leaf: &Leaf,
        registry: &Registry,
        config: &Config,
        args: &mut Namespace,
    ) -> Result<()> {
        for spec in leaf.command.resource_args() {
            let identifiers = args.get_strings(&spec.positional.dest);
            if identifiers.is_empty() {
                continue;
            }
            let mut ctx = ParseContext::new(config);
            for (param, flag) in &spec.attributes {
                if let Some(value) = args.get_str(&flag.dest) {
                    ctx = ctx.with(param, value);
                }
            }
            let mut refs = Vec::with_capacity(identifiers.len());
            for identifier in &identifiers {
                let reference = registry.parse(&spec.collection, identifier, &ctx)?;
                tracing::debug!("Parsed {} as {}", identifier, reference.self_link());
                refs.push(reference);
            }
            args.set_resources(&spec.positional.dest, refs);
        }
        Ok(())
    }

    // =====================================================================
    // Completion
    // =====================================================================

    /// Candidates for the last of `tokens`, which may be empty.
    pub fn complete(&self, tokens: &[String]) -> Vec<String> {
        let (prefix, head) = match tokens.split_last() {
            Some((last, head)) => (last.as_str(), head),
            None => ("", tokens),
        };
        let walk = self.walk(head);
        if walk.unknown.is_some() {
            return Vec::new();
        }

        let defs = match walk.node() {
            CommandNode::Leaf(leaf) => self.leaf_args(&walk, leaf).unwrap_or_default(),
            CommandNode::Group(_) => {
                let mut defs = global_args();
                for group in walk.groups() {
                    defs.extend(group.args.iter().cloned());
                }
                defs
            }
        };

        if let Some(previous) = head.last() {
            if let Some(def) = defs.iter().find(|d| takes_value(d) && &d.name == previous) {
                return value_candidates(def, prefix);
            }
        }
        if let Some((flag, value)) = prefix.split_once('=') {
            return defs
                .iter()
                .find(|d| takes_value(d) && d.name == flag)
                .map(|def| {
                    value_candidates(def, value)
                        .into_iter()
                        .map(|v| format!("{flag}={v}"))
                        .collect()
                })
                .unwrap_or_default();
        }
        if prefix.starts_with('-') {
            let mut flags: Vec<String> = defs
                .iter()
                .filter(|d| d.is_flag() && !d.hidden && d.name.starts_with(prefix))
                .map(|d| d.name.clone())
                .collect();
            flags.sort();
            return flags;
        }

        match walk.node() {
            CommandNode::Group(_) => {
                let mut names: Vec<String> = walk
                    .node()
                    .visible_children(walk.track)
                    .filter(|c| !c.info().hidden && c.name().starts_with(prefix))
                    .map(|c| c.name().to_string())
                    .collect();
                if walk.nodes.len() == 1 && walk.track == ReleaseTrack::Ga {
                    names.extend(
                        ["alpha", "beta"]
                            .iter()
                            .filter(|t| t.starts_with(prefix))
                            .map(|t| t.to_string()),
                    );
                }
                names
            }
            CommandNode::Leaf(_) => {
                let value_flags = value_flag_names(&defs);
                let mut given = 0;
                let mut skip = false;
                for token in &walk.rest {
                    if std::mem::take(&mut skip) {
                        continue;
                    }
                    if token.starts_with('-') {
                        skip = !token.contains('=') && value_flags.contains(token.as_str());
                    } else {
                        given += 1;
                    }
                }
                let positionals: Vec<&ArgDef> = defs.iter().filter(|d| !d.is_flag()).collect();
                let def = positionals
                    .get(given)
                    .or_else(|| positionals.last().filter(|d| d.repeated));
                def.map(|d| value_candidates(d, prefix)).unwrap_or_default()
            }
        }
    }
}

fn value_candidates(def: &ArgDef, prefix: &str) -> Vec<String> {
    if let Some(choices) = def.kind.choices() {
        return choices
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect();
    }
    match &def.completer {
        Some(completer) => completer.complete(prefix, &Namespace::new()),
        None => Vec::new(),
    }
}

/// Route a command's result to the waiter or the output pipeline.
async fn handle_output(ctx: &AppContext, result: super::tree::CommandOutput) -> Result<()> {
    use super::tree::CommandOutput;

    match result {
        CommandOutput::None => Ok(()),
        CommandOutput::Resource(value) => output::print_single(&value, &ctx.output, &ctx.console),
        CommandOutput::Stream(stream) => output::print_stream(stream, &ctx.output, &ctx.console)
            .await
            .map(|_| ()),
        CommandOutput::Operation(pending) if ctx.run_async => {
            ctx.console.status(&format!(
                "Check operation [{}] for status.",
                pending.reference.name
            ))?;
            output::print_single(&pending.operation, &ctx.output, &ctx.console)
        }
        CommandOutput::Operation(pending) => {
            let result = Waiter::new(pending.timeout)
                .wait(
                    pending.poller.as_ref(),
                    &pending.reference,
                    Some(pending.operation),
                    &ctx.console,
                )
                .await?;
            if pending.print_result && !result.is_null() {
                output::print_single(&result, &ctx.output, &ctx.console)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::ArgType;
    use crate::cli::tree::{Command, CommandOutput};
    use crate::console::Captured;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the namespace it ran with.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Option<Namespace>>>,
    }

    #[async_trait]
    impl Command for Recorder {
        fn args(&self, _track: ReleaseTrack) -> Vec<ArgDef> {
            vec![
                ArgDef::positional("name"),
                ArgDef::flag("color").kind(ArgType::choice(["red", "blue"])),
            ]
        }

        async fn run(&self, _ctx: &AppContext, args: &Namespace) -> Result<CommandOutput> {
            *self.seen.lock().unwrap() = Some(args.clone());
            Ok(CommandOutput::Resource(json!({"name": args.get_str("name")})))
        }
    }

    fn dispatcher(recorder: Recorder, input: &str) -> (Dispatcher, Captured, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (console, captured) = Console::captured(input, false);
        let services = Services {
            console,
            env: Environment::default(),
            paths: ConfigPaths::new(dir.path()),
            transport: None,
            credentials: Credentials::Fixed(None),
            editor: Arc::new(ExternalEditor::new("true")),
            registry: Registry::builtin().unwrap(),
            cancel: CancelFlag::new(),
        };
        let root = CommandNode::group(TOOL_NAME, "Test tool").child(
            CommandNode::group("things", "Manage things")
                .child(CommandNode::leaf("show", "Show a thing", recorder))
                .child(CommandNode::leaf("old", "Old", Recorder::default()).deprecated("Use show."))
                .child(
                    CommandNode::leaf("preview", "Preview", Recorder::default())
                        .tracks(&[ReleaseTrack::Alpha]),
                ),
        );
        (Dispatcher::new(root, services), captured, dir)
    }

    fn argv(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn test_runs_leaf_and_formats() {
        let recorder = Recorder::default();
        let (d, captured, _dir) = dispatcher(recorder.clone(), "");
        let code = d.run(&argv("things show widget --color red --format json")).await;
        assert_eq!(code, 0);
        assert_eq!(captured.out.contents(), "{\n  \"name\": \"widget\"\n}\n");
        let seen = recorder.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get_str("color"), Some("red"));
    }

    #[tokio::test]
    async fn test_global_flags_before_path() {
        let recorder = Recorder::default();
        let (d, _, _dir) = dispatcher(recorder.clone(), "");
        d.execute(&argv("--project my-project things show w")).await.unwrap();
        let seen = recorder.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get_str("project"), Some("my-project"));
    }

    #[tokio::test]
    async fn test_unknown_command_suggests() {
        let (d, captured, _dir) = dispatcher(Recorder::default(), "");
        let failure = d.execute(&argv("things shwo")).await.unwrap_err();
        assert_eq!(failure.exit_code(), 2);
        assert_eq!(failure.command_path, "gcmd.things");
        let message = failure.error.to_string();
        assert!(message.contains("Invalid choice: 'shwo'."));
        assert!(message.contains("gcmd things show"));

        assert_eq!(d.run(&argv("things shwo")).await, 2);
        assert!(captured.err.contents().starts_with("ERROR: (gcmd.things) Invalid choice"));
    }

    #[tokio::test]
    async fn test_group_without_command() {
        let (d, _, _dir) = dispatcher(Recorder::default(), "");
        let failure = d.execute(&argv("things")).await.unwrap_err();
        assert!(failure.error.to_string().starts_with("Command name argument expected."));
        assert_eq!(failure.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_group_help() {
        let (d, captured, _dir) = dispatcher(Recorder::default(), "");
        d.execute(&argv("things --help")).await.unwrap();
        let out = captured.out.contents();
        assert!(out.contains("Usage: gcmd things COMMAND"));
        assert!(out.contains("show"));
        assert!(!out.contains("preview"));
    }

    #[tokio::test]
    async fn test_bad_choice_is_usage() {
        let (d, _, _dir) = dispatcher(Recorder::default(), "");
        let failure = d.execute(&argv("things show w --color green")).await.unwrap_err();
        assert_eq!(failure.exit_code(), 2);
        assert!(failure.error.to_string().starts_with("argument --color: Invalid choice"));
    }

    #[tokio::test]
    async fn test_release_track_gating() {
        let (d, _, _dir) = dispatcher(Recorder::default(), "");
        assert!(d.execute(&argv("things preview x")).await.is_err());
        d.execute(&argv("alpha things preview x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_deprecated_warning() {
        let (d, captured, _dir) = dispatcher(Recorder::default(), "");
        d.execute(&argv("things old x")).await.unwrap();
        assert!(captured
            .err
            .contents()
            .contains("WARNING: This command is deprecated. Use show."));
    }

    #[test]
    fn test_completion() {
        let (d, _, _dir) = dispatcher(Recorder::default(), "");
        assert_eq!(d.complete(&argv("th")), vec!["things"]);
        assert_eq!(d.complete(&["things".to_string(), "s".to_string()]), vec!["show"]);
        let colors = d.complete(&["things".into(), "show".into(), "w".into(), "--color".into(), "b".into()]);
        assert_eq!(colors, vec!["blue"]);
        let flags = d.complete(&["things".into(), "show".into(), "--col".into()]);
        assert_eq!(flags, vec!["--color"]);
        let verbosity = d.complete(&["--verbosity=d".into()]);
        assert_eq!(verbosity, vec!["--verbosity=debug"]);
    }

    #[test]
    fn test_scan_flag() {
        let args = argv("--verbosity debug things --verbosity=info -- --verbosity=none");
        assert_eq!(scan_flag(&args, "verbosity").as_deref(), Some("info"));
        assert!(scan_switch(&argv("a --log-http"), "log-http"));
        assert!(!scan_switch(&argv("a -- --log-http"), "log-http"));
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("shwo", "show"), 2);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("list", "list"), 0);
    }
}
