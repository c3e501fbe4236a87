//! param-mapper - command line front end for the mapping service
//!
//! Each invocation runs one operation against the configured store and prints the
//! result as JSON. Faults are printed as the API error body and exit non-zero.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use traffic_param_mapper::{
    error::ErrorReporter,
    error_recovery::{ResilientExecutor, TracingListener},
    logging::init_logging,
    IdGenerator, InMemoryStore, MapperConfig, MappingService, MappingStore, RedisStore, Result,
    Triplet,
};

/// Map traffic triplets to short codes and back
#[derive(Parser, Debug)]
#[command(name = "param-mapper")]
#[command(about = "Resilient triplet to short-code mapping backed by Redis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Redis connection URL
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// TOML configuration file; environment variables are used when absent
    #[arg(long, global = true, env = "PARAM_MAPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Use an in-process store instead of Redis. The store starts empty on every run,
    /// so codes issued by one invocation do not resolve in the next
    #[arg(long, global = true)]
    memory: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the code for a triplet, issuing one if needed
    Code(TripletArgs),
    /// Print the affiliate redirect target for a triplet, issuing a code if needed
    Redirect(TripletArgs),
    /// Issue a new code for a triplet
    Refresh(TripletArgs),
    /// Print the triplet a code was issued for
    Resolve {
        /// Code to resolve
        code: String,
    },
    /// Report store connectivity and breaker state
    Health,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct TripletArgs {
    #[arg(long)]
    keyword: String,
    #[arg(long)]
    src: String,
    #[arg(long)]
    creative: String,
}

impl From<TripletArgs> for Triplet {
    fn from(args: TripletArgs) -> Self {
        Triplet::new(args.keyword, args.src, args.creative)
    }
}

fn load_config(cli: &Cli) -> Result<MapperConfig> {
    let mut config = match &cli.config {
        Some(path) => MapperConfig::from_file(path)?,
        None => MapperConfig::from_env()?,
    };

    if let Some(url) = &cli.redis_url {
        config.redis.url = url.clone();
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

async fn build_store(memory: bool, config: &MapperConfig) -> Result<Arc<dyn MappingStore>> {
    if memory {
        info!("Using in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let store =
        RedisStore::with_prefix(&config.redis.url, config.redis.key_prefix.as_deref()).await?;
    Ok(Arc::new(store))
}

async fn build_service(memory: bool, config: &MapperConfig) -> Result<MappingService> {
    let store = build_store(memory, config).await?;
    let executor = Arc::new(ResilientExecutor::new("mapping_store", config.resilience()));
    executor.add_listener(Arc::new(TracingListener)).await;
    Ok(MappingService::with_executor(store, executor, IdGenerator::new()))
}

async fn run(cli: Cli, config: &MapperConfig) -> Result<serde_json::Value> {
    let output = match cli.command {
        Command::Config => serde_json::Value::String(config.to_toml()?),
        Command::Code(args) => {
            let service = build_service(cli.memory, config).await?;
            let code = service.get_or_create_code(&args.into()).await?;
            serde_json::json!({ "code": code })
        }
        Command::Redirect(args) => {
            let service = build_service(cli.memory, config).await?;
            let code = service.get_or_create_code(&args.into()).await?;
            let target = config.redirect_url(&code)?;
            info!(code = %code, "Redirecting to {}", target);
            serde_json::json!({ "code": code, "redirect_url": target.as_str() })
        }
        Command::Refresh(args) => {
            let service = build_service(cli.memory, config).await?;
            let code = service.refresh_code(&args.into()).await?;
            serde_json::json!({ "message": "Code refreshed successfully", "code": code })
        }
        Command::Resolve { code } => {
            let service = build_service(cli.memory, config).await?;
            serde_json::to_value(service.resolve_code(&code).await?)?
        }
        Command::Health => {
            let service = build_service(cli.memory, config).await?;
            serde_json::to_value(service.health().await)?
        }
    };

    Ok(output)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", ErrorReporter::format_api_error(&e, false));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    debug!(?config, "Configuration loaded");

    let production = config.environment.is_production();
    match run(cli, &config).await {
        Ok(serde_json::Value::String(text)) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", ErrorReporter::format_api_error(&e, production));
            ExitCode::FAILURE
        }
    }
}
