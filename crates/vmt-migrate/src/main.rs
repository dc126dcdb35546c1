//! vmt-migrate - upgrade every stale snapshot in a state dump
//!
//! Loads a JSON dump into an in-memory store, files one upgrade request per
//! snapshot not written at the canonical schema version, and runs the async
//! upgrade workers until each request is terminal.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vmt_engine::{Controller, EngineConfig};
use vmt_store::InMemoryStore;

mod run;
mod state;

use run::RunOptions;
use state::StateDump;

fn cli() -> Command {
    Command::new("vmt-migrate")
        .version(vmt_engine::VERSION)
        .about("Upgrade template snapshots to the canonical schema version")
        .arg(
            Arg::new("state")
                .long("state")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON state dump to load"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("Engine config file (TOML)"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_parser(value_parser!(usize))
                .help("Upgrade workers, overriding the config"),
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .help("Only upgrade snapshots in this namespace"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .default_value("300")
                .value_parser(value_parser!(u64))
                .help("Seconds to wait for all requests"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("VMT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn engine_config(matches: &ArgMatches) -> Result<EngineConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config = config.with_upgrade_workers(*workers);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = engine_config(&matches)?;
    let store = Arc::new(InMemoryStore::new());
    let controller = Controller::new(store.clone(), config)?;

    let Some(path) = matches.get_one::<PathBuf>("state") else {
        bail!("--state is required");
    };
    StateDump::read(path)?
        .seed(&store, controller.decoder())
        .await?;

    let options = RunOptions {
        namespace: matches.get_one::<String>("namespace").cloned(),
        timeout: Duration::from_secs(matches.get_one::<u64>("timeout").copied().unwrap_or(300)),
        ..RunOptions::default()
    };
    let report = run::run(&controller, &options).await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    if report.failed > 0 {
        bail!("{} snapshot upgrades failed", report.failed);
    }
    Ok(())
}
