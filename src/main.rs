use std::process;

use tessera::{
    DataError,
    cascade::{self, rule_for},
    config::{self, CascadeArgs, Command, DemoArgs, LoadError, Settings},
    demo,
    telemetry::{self, TelemetryError},
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Data(#[from] DataError),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Demo(DemoArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Demo(args) => run_demo(settings, args).await,
        Command::Cascade(args) => run_cascade(args),
    }
}

async fn run_demo(settings: Settings, args: DemoArgs) -> Result<(), AppError> {
    info!(
        target = "tessera::demo",
        latency_ms = args.latency_ms,
        seed_records = args.seed_records,
        max_entries = settings.cache.max_entries,
        "Starting demo"
    );
    let report = demo::run(&settings.cache, &args).await?;
    report.log();
    Ok(())
}

fn run_cascade(args: CascadeArgs) -> Result<(), AppError> {
    let lines = match args.category {
        Some(category) => rule_for(category)
            .targets
            .iter()
            .map(|target| format!("{category} -> {target}"))
            .collect(),
        None => cascade::describe(),
    };
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
