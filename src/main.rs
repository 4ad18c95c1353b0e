use gcmd::cli::dispatcher::{scan_flag, scan_switch};
use gcmd::cli::{Dispatcher, Failure, Services};
use gcmd::config::{Config, ConfigPaths, Environment};
use gcmd::error::{Error, EXIT_FAILURE, EXIT_INTERRUPTED};
use gcmd::{surface, TOOL_NAME, VERSION};
use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::prelude::*;

/// Hidden entry point used by shell completion scripts.
const COMPLETE_COMMAND: &str = "__complete";

/// Stderr level for a `core/verbosity` value.
fn stderr_level(verbosity: &str) -> LevelFilter {
    match verbosity {
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "error" | "critical" => LevelFilter::ERROR,
        "none" => LevelFilter::OFF,
        _ => LevelFilter::WARN,
    }
}

fn open_log_file(paths: &ConfigPaths) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let dir = paths.logs_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Could not create log directory [{}]", dir.display()))?;
    let appender = tracing_appender::rolling::never(&dir, format!("{TOOL_NAME}.log"));
    Ok(tracing_appender::non_blocking(appender))
}

fn setup_logging(argv: &[String], env: &Environment, paths: &ConfigPaths) -> Option<WorkerGuard> {
    // A broken properties file is reported by the dispatcher; logging just
    // falls back to the defaults.
    let config = Config::load(paths.clone(), env.clone(), scan_flag(argv, "configuration").as_deref()).ok();
    let property = |name: &str| config.as_ref().and_then(|c| c.get("core", name).ok().flatten());

    let verbosity = scan_flag(argv, "verbosity")
        .or_else(|| property("verbosity"))
        .unwrap_or_else(|| "warning".to_string())
        .to_lowercase();
    let flag = |name: &str| config.as_ref().is_some_and(|c| c.get_bool("core", name).unwrap_or(false));
    let log_http = scan_switch(argv, "log-http") || flag("log_http");
    let log_file = flag("log_file");

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_filter(stderr_level(&verbosity));

    let mut guard = None;
    let file_layer = if log_file || log_http {
        match open_log_file(paths) {
            Ok((writer, worker)) => {
                guard = Some(worker);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_filter(LevelFilter::DEBUG),
                )
            }
            Err(e) => {
                eprintln!("WARNING: {e:#}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry().with(stderr_layer).with(file_layer).init();
    tracing::info!("{} {} started", TOOL_NAME, VERSION);
    guard
}

#[tokio::main]
async fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let services = match Services::from_process() {
        Ok(services) => services,
        Err(e) => {
            eprintln!("ERROR: ({TOOL_NAME}) {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };
    let log_guard = setup_logging(&argv, &services.env, &services.paths);

    if argv.first().map(String::as_str) == Some("--version") {
        println!("{TOOL_NAME} {VERSION}");
        return;
    }

    let cancel = services.cancel.clone();
    let console = services.console.clone();
    let dispatcher = Dispatcher::new(surface::root(), services);

    if argv.first().map(String::as_str) == Some(COMPLETE_COMMAND) {
        for candidate in dispatcher.complete(&argv[1..]) {
            println!("{candidate}");
        }
        return;
    }

    let code = tokio::select! {
        code = dispatcher.run(&argv) => code,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            let failure = Failure {
                error: Error::Interrupted,
                command_path: TOOL_NAME.to_string(),
                verbose: false,
            };
            failure.report(&console);
            EXIT_INTERRUPTED
        }
    };
    // exit() skips destructors; flush the file log first.
    drop(log_guard);
    std::process::exit(code);
}
