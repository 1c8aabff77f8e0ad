use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{error::ErrorKind, Arg, Command};
use pipeline::{config::DEFAULT_OUTPUT, PipelineConfig, RunOutcome, Supervisor};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn cli() -> Command {
    Command::new("detect_track")
        .about("Decode an H.264 stream, detect and track objects, and write an annotated MP4")
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("H264 FILE")
                .help("Elementary H.264 stream to process"),
        )
        .arg(
            Arg::new("pipeline")
                .long("pipeline")
                .value_name("FILE")
                .help("YAML or JSON topology to use instead of the built-in one"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("FILE")
                .default_value(DEFAULT_OUTPUT)
                .help("Container file to write"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .help("Give up with an error if the stream has not ended by then"),
        )
}

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "detect_track=info,pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            -1
        }
    };
    process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let matches = match cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return Ok(-1);
        }
    };

    // `input` is required, so clap has already rejected its absence.
    let Some(input) = matches.get_one::<String>("input") else {
        return Ok(-1);
    };
    let output = matches
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or(DEFAULT_OUTPUT);

    let framework = pipeline::init();

    let config = match matches.get_one::<String>("pipeline") {
        Some(path) => {
            let mut config = PipelineConfig::from_path(path)
                .with_context(|| format!("Failed to load pipeline file '{}'", path))?;
            config.substitute("input", input);
            config.substitute("output", output);
            config
        }
        None => PipelineConfig::detect_and_track(PathBuf::from(input), PathBuf::from(output)),
    };

    let mut graph = framework
        .build(&config)
        .context("Failed to create pipeline")?;
    println!("Using file: {}", input);

    let mut supervisor = Supervisor::new();
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        supervisor = supervisor.with_deadline(Duration::from_secs(*secs));
    }

    info!("Now playing: {}", input);
    let outcome = supervisor
        .drive(&mut graph)
        .context("Unable to set the pipeline to the playing state")?;
    match &outcome {
        RunOutcome::Completed { .. } => info!("End of stream, output written to {}", output),
        RunOutcome::Failed { origin, message, .. } => {
            warn!(origin = %origin, "Pipeline stopped on error: {}", message)
        }
    }

    info!("Deleting pipeline");
    drop(graph);
    framework.deinit();
    Ok(0)
}
