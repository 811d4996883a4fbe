#![allow(clippy::field_reassign_with_default)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_research_orchestrator::client::is_usable_content;
use rust_research_orchestrator::{
    Config, ConfigOverrides, RankingPolicy, ResearchOrchestrator, ResearchRequest, Server,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rust-research-orchestrator")]
#[command(about = "Multi-source scholarly research with ranked results and cited synthesis")]
#[command(version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("VERGEN_BUILD_TIMESTAMP"), ")"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Override server port
    #[arg(long)]
    port: Option<u16>,

    /// Override server host
    #[arg(long)]
    host: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Set environment profile (development, production)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Ranking policy (per_source, global)
    #[arg(long, global = true)]
    ranking_policy: Option<RankingPolicy>,

    /// Generate JSON schema for configuration
    #[arg(long)]
    generate_schema: bool,

    /// Print the default configuration as TOML
    #[arg(long)]
    print_config: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Answer one research question and print the results
    Query {
        /// Research question
        question: String,
        /// Results per source
        #[arg(short = 'n', long, default_value = "3")]
        max_results: u32,
        /// Skip synthesis and only collect papers
        #[arg(long)]
        no_synthesis: bool,
    },
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn run_query(config: &Config, question: String, max_results: u32, synthesize: bool) -> Result<()> {
    let orchestrator = ResearchOrchestrator::from_config(config)?;
    let request = ResearchRequest {
        query: question,
        max_results,
        ..ResearchRequest::default()
    };

    let payload = if synthesize {
        orchestrator.run(&request).await?
    } else {
        orchestrator.collect(&request.query, request.max_results).await?
    };

    println!(
        "Found {} papers from {} sources",
        payload.summary.total,
        payload.summary.sources.len()
    );

    let optimized = &payload.optimized_query;
    println!("\nOptimized search terms ({:?}):", payload.optimization.method);
    println!("   Keywords: {}", optimized.keywords.join(", "));
    println!("   Target year: {}", optimized.preferred_year);
    if !optimized.disease_terms.is_empty() {
        println!("   Disease terms: {}", optimized.disease_terms.join(", "));
    }
    if !optimized.intervention_terms.is_empty() {
        println!("   Intervention terms: {}", optimized.intervention_terms.join(", "));
    }

    if let Some(synthesis) = &payload.synthesis {
        println!("\nResearch synthesis:\n{synthesis}");
    }

    println!("\nRaw data sources:");
    for (source, content) in &payload.raw_results {
        if is_usable_content(content) {
            println!("\n=== {} Results ===\n{}", source.as_str().to_uppercase(), content);
        } else {
            println!("\n{}: {}", source.display_name(), content.trim());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_schema {
        let schema = Config::generate_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }
    if cli.print_config {
        println!("{}", Config::generate_example_config()?);
        return Ok(());
    }

    let overrides = ConfigOverrides {
        server_port: cli.port,
        server_host: cli.host,
        log_level: cli.log_level.or_else(|| {
            if cli.verbose {
                Some("debug".to_string())
            } else {
                None
            }
        }),
        profile: cli.profile,
        ranking_policy: cli.ranking_policy,
    };

    let config = Config::load_with_overrides(cli.config.as_deref(), &overrides)?;
    init_tracing(&config, cli.verbose)?;

    let safe_config = config.safe_for_logging();
    info!(
        "Loaded configuration: profile={}, schema_version={}",
        safe_config.profile, safe_config.schema_version
    );
    debug!("Configuration details: {:#?}", safe_config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Query {
            question,
            max_results,
            no_synthesis,
        } => run_query(&config, question, max_results, !no_synthesis).await,
        Commands::Serve => {
            let server = Server::new(config);
            match server.run().await {
                Ok(()) => {
                    info!("Server shutdown completed successfully");
                    Ok(())
                }
                Err(e) => {
                    error!("Server error: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}
