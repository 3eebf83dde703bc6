#![forbid(unsafe_code)]

use clap::{command, Arg, ArgAction};
use color_eyre::eyre::{Result, WrapErr};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::Command;

mod commands;

use pipedeck::catalog::PipelineCatalog;
use pipedeck::gateway::http::HttpGateway;
use pipedeck::log::*;

const DEFAULT_SERVER: &str = "http://localhost:5000";

#[tokio::main]
async fn main() -> Result<()> {
    // Command configuration
    let matches = command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vv.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all output. Overridden by -v.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .help("Base URL of the pipeline server. Defaults to $PIPEDECK_SERVER_URL, then http://localhost:5000."),
        )
        .arg(
            Arg::new("catalog")
                .long("catalog")
                .help("Path to a YAML pipeline catalog. Defaults to the built-in catalog."),
        )
        .subcommand(
            command!("status")
                .about("Show pipeline statuses.")
                .arg(Arg::new("pipeline").help("Only show this pipeline.")),
        )
        .subcommand(
            command!("start")
                .about("Start a pipeline.")
                .arg(
                    Arg::new("pipeline")
                        .required(true)
                        .help("The pipeline to start."),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .help("Skip the confirmation prompt.")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("follow")
                        .short('f')
                        .long("follow")
                        .help("Keep watching until the pipeline finishes.")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(command!("watch").about("Live dashboard of all pipelines."))
        .get_matches();

    // Set up logging
    let logging_config = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::new(
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ))
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .compact();

    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose") as usize;
    let logging_config = if quiet && verbose == 0 {
        logging_config.with_max_level(LevelFilter::ERROR)
    } else if verbose > 0 {
        let level = match verbose {
            1 => LevelFilter::WARN,
            2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        logging_config.with_max_level(level)
    } else {
        logging_config.with_max_level(LevelFilter::ERROR)
    };

    let subscriber = logging_config.finish();
    subscriber.init();

    install_color_eyre()?;

    let server = matches
        .get_one::<String>("server")
        .cloned()
        .or_else(|| std::env::var("PIPEDECK_SERVER_URL").ok())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let catalog = match matches.get_one::<String>("catalog") {
        Some(path) => load_catalog(path).await?,
        None => PipelineCatalog::default(),
    };

    let gateway = HttpGateway::new(server.clone())?;

    // Run the commands
    match matches.subcommand() {
        Some((subcommand, submatches)) => {
            let ctx = commands::CliContext::new(gateway, catalog, server, submatches);
            debug!(
                "matched subcommand {} with matches: {:?}",
                &subcommand,
                &submatches.ids().map(|id| id.as_str()).collect::<Vec<_>>()
            );
            match subcommand {
                "status" => commands::status::StatusCommand::new().run(&ctx).await?,
                "start" => commands::start::StartCommand::new().run(&ctx).await?,
                "watch" => commands::watch::WatchCommand::new().run(&ctx).await?,
                name => {
                    return Err(commands::CommandErrors::InvalidSubcommand(name.to_string()).into())
                }
            }
        }
        None => return Err(commands::CommandErrors::NoSubcommandProvided.into()),
    }
    Ok(())
}

async fn load_catalog(path: &str) -> Result<PipelineCatalog> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .wrap_err("Failed reading catalog file")?;
    serde_yaml::from_str(raw.as_str()).wrap_err("deserializing pipeline catalog")
}
