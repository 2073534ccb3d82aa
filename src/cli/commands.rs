use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "breachline", version, about = "Exploitation orchestration console")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the catalog of vulnerable services from the last scan
    Catalog(CatalogArgs),
    /// Launch and monitor an exploitation session against one service
    Exploit(ExploitArgs),
    /// Run exploitation across several services
    Batch(BatchArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

/// Options shared by every command that talks to a catalog or backend.
#[derive(Args, Clone, Debug, Default)]
pub struct RuntimeArgs {
    /// YAML configuration file (defaults to ./breachline.yaml when present)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Catalog JSON file written by the scan flow
    #[arg(long, conflicts_with = "catalog_url")]
    pub catalog: Option<String>,

    /// Fetch the catalog from the scanning service instead of a file
    #[arg(long)]
    pub catalog_url: Option<String>,

    /// Exploitation backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Base URL of the HTTP exploitation backend
    #[arg(long)]
    pub base_url: Option<String>,

    /// Log poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Seed for the simulated backend
    #[arg(long)]
    pub seed: Option<u64>,

    /// Success probability for the simulated backend (0.0-1.0)
    #[arg(long)]
    pub success_rate: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendArg {
    Http,
    Simulated,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Sequential,
    Parallel,
}

#[derive(Args, Clone, Debug)]
pub struct CatalogArgs {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ExploitArgs {
    /// Target service as address:port
    pub target: String,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Open a prompt for sending commands into the session
    #[arg(short, long)]
    pub interactive: bool,

    /// Command to send once the session is running (repeatable)
    #[arg(long = "command", value_name = "COMMAND")]
    pub commands: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct BatchArgs {
    /// Services as address:port (omit with --all)
    pub targets: Vec<String>,

    /// Run every service in the catalog
    #[arg(long, conflicts_with = "targets")]
    pub all: bool,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Execution mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Concurrent units in parallel mode
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// Delay between sequential units in milliseconds
    #[arg(long)]
    pub stagger_ms: Option<u64>,

    /// Stop and fail a unit still running after this many seconds
    #[arg(long)]
    pub unit_timeout_secs: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Path to YAML config file
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_parallel() {
        let cli = Cli::try_parse_from([
            "breachline", "batch", "10.0.0.1:21", "10.0.0.2:80", "--mode", "parallel", "--max-threads", "2",
        ]).unwrap();
        match cli.command {
            Commands::Batch(args) => {
                assert_eq!(args.targets.len(), 2);
                assert_eq!(args.mode, Some(ModeArg::Parallel));
                assert_eq!(args.max_threads, Some(2));
            }
            _ => panic!("expected batch command"),
        }
    }

    #[test]
    fn test_batch_all_conflicts_with_targets() {
        assert!(Cli::try_parse_from(["breachline", "batch", "--all", "10.0.0.1:21"]).is_err());
    }

    #[test]
    fn test_exploit_repeatable_commands() {
        let cli = Cli::try_parse_from([
            "breachline", "-vv", "exploit", "10.0.0.1:21", "--command", "id", "--command", "whoami",
        ]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Exploit(args) => assert_eq!(args.commands, vec!["id", "whoami"]),
            _ => panic!("expected exploit command"),
        }
    }
}
