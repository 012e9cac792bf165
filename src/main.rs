use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrape_coordinator::{
    config::Config,
    context::AppContext,
    engine::ProcessEngineFactory,
    job_scheduling::{
        CoordinatorService, Job, RecurrencePlanner, ScriptRef, load_definitions,
    },
    observability, web,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "scrape-coordinator")]
#[command(version)]
#[command(about = "Schedules scraping jobs across a fixed pool of page workers")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Number of workers (overrides config file)
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Run a single script once on a single worker, without planning or listener
    #[arg(long, value_name = "FILE")]
    script_debug: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) {
    let log_filter = if cli.log_level == "trace" {
        format!("scrape_coordinator={},tower_http=trace", cli.log_level)
    } else {
        format!("scrape_coordinator={}", cli.log_level)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting scrape coordinator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(workers) = cli.workers {
        config.coordinator.workers = workers;
    }
    if cli.script_debug.is_some() {
        info!("Script debug mode: using a single worker");
        config.coordinator.workers = 1;
    }
    config.validate()?;

    let context = AppContext::initialize(config)?;
    let factory = ProcessEngineFactory::new(&context.config.engine);

    let planner = match &cli.script_debug {
        Some(_) => None,
        None => {
            let definitions = load_definitions(&context.config.jobs.directory)?;
            Some(RecurrencePlanner::new(
                definitions,
                context.config.coordinator.planning_window,
                context.config.coordinator.max_occurrences_per_cycle,
            ))
        }
    };

    let service = CoordinatorService::new(&context, &factory, planner);
    let handle = service.handle();
    let cancellation_token = CancellationToken::new();

    tokio::spawn(observability::report_on_quiescence(
        handle.subscribe(),
        cancellation_token.clone(),
    ));

    if let Some(script) = &cli.script_debug {
        let job_id = handle.submit(Job::new(ScriptRef::File(script.clone())))?;
        info!("Submitted {} as job {}", script.display(), job_id);
    } else if context.config.listener.enabled {
        let listener_config = context.config.listener.clone();
        let listener_handle = handle.clone();
        let listener_token = cancellation_token.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(&listener_config, listener_handle, listener_token).await {
                error!("Job listener failed: {}", e);
            }
        });
    }

    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                shutdown_token.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    service.run(cancellation_token).await
}
