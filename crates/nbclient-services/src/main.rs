//! `nbctl`: command-line client for a notebook server

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use nbclient_services::contents::{ContentType, GetOptions};
use nbclient_services::{
    ClientConfig, ContentsManager, DefaultSession, RestDrive, RunningSessions, ServerSettings,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("nbctl")
        .version(nbclient_services::VERSION)
        .about("Inspect and control a notebook server")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .help("Server base URL"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .global(true)
                .help("API token"),
        )
        .subcommand(
            Command::new("ls")
                .about("List a directory")
                .arg(Arg::new("path").default_value("")),
        )
        .subcommand(
            Command::new("cat")
                .about("Print a file")
                .arg(Arg::new("path").required(true)),
        )
        .subcommand(Command::new("sessions").about("List running sessions"))
        .subcommand(Command::new("specs").about("List kernel specs"))
        .subcommand(
            Command::new("shutdown")
                .about("Shut a session down by id")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(
            Command::new("stop")
                .about("Shut down the session bound to a path")
                .arg(Arg::new("path").required(true)),
        )
}

fn load_config(matches: &ArgMatches) -> Result<ClientConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => ClientConfig::default(),
    }
    .with_env_overrides();

    if let Some(url) = matches.get_one::<String>("base-url") {
        config = config.with_base_url(url.clone());
    }
    if let Some(token) = matches.get_one::<String>("token") {
        config = config.with_token(token.clone());
    }
    Ok(config)
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("missing argument '{name}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let settings = ServerSettings::from_config(&config)?;
    let registry = RunningSessions::new();

    match matches.subcommand() {
        Some(("ls", args)) => {
            let contents = ContentsManager::new(Arc::new(RestDrive::new(
                RestDrive::DEFAULT_NAME,
                settings,
            )));
            let model = contents.get(required(args, "path")?, &GetOptions::default()).await?;
            match model.children() {
                Some(children) => {
                    for child in children {
                        let marker = if child.kind == ContentType::Directory { "/" } else { "" };
                        println!("{}{}", child.path, marker);
                    }
                }
                None => println!("{}", model.path),
            }
        }
        Some(("cat", args)) => {
            let contents = ContentsManager::new(Arc::new(RestDrive::new(
                RestDrive::DEFAULT_NAME,
                settings,
            )));
            let model = contents.get(required(args, "path")?, &GetOptions::default()).await?;
            match model.content {
                Some(serde_json::Value::String(text)) => print!("{text}"),
                Some(other) => println!("{}", serde_json::to_string_pretty(&other)?),
                None => {}
            }
        }
        Some(("sessions", _)) => {
            for model in DefaultSession::list_running(&settings, &registry).await? {
                println!(
                    "{}\t{}\t{}\t{} ({})",
                    model.id, model.kind, model.path, model.kernel.name, model.kernel.id
                );
            }
        }
        Some(("specs", _)) => {
            let specs = nbclient_services::kernel::get_specs(&settings).await?;
            for (name, spec) in &specs.kernelspecs {
                let marker = if *name == specs.default { "*" } else { " " };
                println!("{marker} {name}\t{}\t{}", spec.display_name, spec.language);
            }
        }
        Some(("shutdown", args)) => {
            let id = required(args, "id")?;
            DefaultSession::shutdown_by_id(&settings, &registry, id).await?;
            println!("shut down {id}");
        }
        Some(("stop", args)) => {
            let path = required(args, "path")?;
            let model = DefaultSession::find_by_path(&settings, &registry, path).await?;
            DefaultSession::shutdown_by_id(&settings, &registry, &model.id).await?;
            println!("shut down {} ({path})", model.id);
        }
        Some((other, _)) => anyhow::bail!("unknown command {other}"),
        None => anyhow::bail!("no command given"),
    }

    registry.clear();
    Ok(())
}
