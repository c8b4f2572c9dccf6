//! tandem CLI - run scripts and SQL against one in-memory dataset.

mod colors;
mod repl;
mod run;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tandem_core::{BusyPolicy, EngineKind, SandboxConfig};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Run scripts and SQL queries against one in-memory dataset")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Sandbox configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Abort a run after this many milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Queue runs behind an in-flight run instead of rejecting them
    #[arg(long, global = true)]
    queue: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one snippet and print its output
    Run {
        /// Dataset file (JSON rows or a generated project payload)
        data: PathBuf,

        /// Engine to run on: script or sql
        #[arg(short, long, default_value = "script")]
        mode: EngineKind,

        /// Code to run
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,

        /// Read the code from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the dataset schema
    Schema {
        /// Dataset file (JSON rows or a generated project payload)
        data: PathBuf,
    },

    /// Start an interactive session
    Repl {
        /// Dataset file (JSON rows or a generated project payload)
        data: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref(), cli.timeout_ms, cli.queue)?;

    match cli.command {
        Commands::Run {
            data,
            mode,
            code,
            file,
        } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read code from {}", path.display()))?,
                (None, None) => anyhow::bail!("either --code or --file is required"),
            };
            run::execute(&data, mode, &code, config).await?;
        }

        Commands::Schema { data } => run::schema(&data)?,

        Commands::Repl { data } => repl::execute(&data, config).await?,
    }

    Ok(())
}

/// Config file first, then command-line overrides.
fn load_config(
    path: Option<&Path>,
    timeout_ms: Option<u64>,
    queue: bool,
) -> anyhow::Result<SandboxConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            SandboxConfig::from_json(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SandboxConfig::default(),
    };

    if let Some(ms) = timeout_ms {
        config = config.with_run_timeout(Duration::from_millis(ms));
    }
    if queue {
        config = config.with_busy_policy(BusyPolicy::Queue);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let args = ["tandem", "run", "data.json", "--mode", "sql", "--code", "SELECT 1"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run { mode, code, .. } => {
                assert_eq!(mode, EngineKind::Relational);
                assert_eq!(code.as_deref(), Some("SELECT 1"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_requires_code_or_file() {
        assert!(Cli::try_parse_from(["tandem", "run", "data.json"]).is_err());
        assert!(
            Cli::try_parse_from(["tandem", "run", "data.json", "-c", "x", "-f", "y.rhai"]).is_err()
        );
    }

    #[test]
    fn test_overrides_apply_on_top_of_defaults() {
        let config = load_config(None, Some(250), true).unwrap();
        assert_eq!(config.run_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.busy_policy, BusyPolicy::Queue);

        let config = load_config(None, None, false).unwrap();
        assert_eq!(config, SandboxConfig::default());
    }
}
