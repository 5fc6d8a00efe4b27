//! LandOS - hypothesis-driven property intelligence over a spatial Postgres store.

use anyhow::Context;
use landos::cli::{load_conversation, Cli, Command};
use landos::config::{display_connection_string, Config};
use landos::db::{self, ConnectionPool, MockPool};
use landos::error::LandosError;
use landos::explore::ExplorePipeline;
use landos::llm::create_client;
use landos::server::{self, AppState};
use landos::{logging, safety};
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    // Pick up DATABASE_URL and API keys from .env before clap reads the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    if let Err(e) = run(cli) {
        let category = e
            .downcast_ref::<LandosError>()
            .map(LandosError::category)
            .unwrap_or("Error");
        error!("{}: {:#}", category, e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cli.apply_overrides(&mut config)?;

    if let Command::Validate { sql } = &cli.command {
        print_verdict(sql);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(run_async(cli, config))
}

async fn run_async(cli: Cli, config: Config) -> anyhow::Result<()> {
    let pool = open_pool(&cli, &config).await?;
    let llm = create_client(&config.llm).context("creating reasoning-service client")?;
    let pipeline = ExplorePipeline::new(Arc::clone(&pool), llm, &config.explore);

    let result = match cli.command {
        Command::Explore {
            question,
            conversation,
        } => explore(&pipeline, &question, conversation.as_deref()).await,
        Command::Serve { .. } => {
            let state = AppState {
                pipeline,
                pool: Arc::clone(&pool),
            };
            let bind_addr = config.server.bind_addr();
            server::serve(state, &bind_addr)
                .await
                .with_context(|| format!("serving on {bind_addr}"))
        }
        Command::Validate { .. } => Ok(()),
    };

    pool.close().await;
    info!("Pool closed");
    result
}

async fn open_pool(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn ConnectionPool>> {
    if cli.mock_db {
        info!("Using in-memory mock store");
        return Ok(Arc::new(MockPool::with_capacity(
            config.database.max_connections as usize,
        )));
    }

    let conn_str = config.database.connection_string()?;
    info!(store = %display_connection_string(&conn_str), "Connecting to spatial store");
    db::connect(&config.database)
        .await
        .context("connecting to spatial store")
}

async fn explore(
    pipeline: &ExplorePipeline,
    question: &str,
    conversation_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let conversation = load_conversation(question, conversation_file)?;
    let response = pipeline.run(&conversation).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn print_verdict(sql: &str) {
    match safety::validate(sql) {
        Ok(vetted) => {
            println!("OK: statement accepted");
            for table in &vetted.unrecognized_tables {
                println!("note: '{table}' is not a known spatial table");
            }
        }
        Err(rejection) => println!("REJECTED: {rejection}"),
    }
}
