use breachline::cli;
use breachline::config;
use breachline::errors::BreachlineError;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match (cli.quiet, cli.verbose) {
        (true, 0) => "warn",
        (_, 0) => "info",
        (_, 1) => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let quiet = cli.quiet;
    let result = match cli.command {
        cli::Commands::Catalog(args) => cli::catalog::handle_catalog(args, quiet).await,
        cli::Commands::Exploit(args) => cli::exploit::handle_exploit(args, quiet).await,
        cli::Commands::Batch(args) => cli::batch::handle_batch(args, quiet).await,
        cli::Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            let classification = e.classify();
            eprintln!("Error: {}", e);
            tracing::debug!(error_type = classification.error_type, retryable = classification.retryable, "Command failed");
            if classification.retryable {
                eprintln!("Retrying may succeed.");
            }
            let exit_code = match &e {
                BreachlineError::Config(_) | BreachlineError::Yaml(_) => 2,
                BreachlineError::CatalogUnavailable(_) | BreachlineError::CatalogMalformed(_) => 3,
                BreachlineError::LaunchFailed(_) => 4,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), BreachlineError> {
    let path = std::path::PathBuf::from(&args.config);
    let _config = config::parse_config(&path).await?;
    println!(
        "Configuration is valid: {} (breachline {}, built {}{})",
        args.config,
        env!("CARGO_PKG_VERSION"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        option_env!("GIT_HASH").map(|h| format!(", {}", h)).unwrap_or_default(),
    );
    Ok(())
}
