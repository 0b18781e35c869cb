//! `sideline` command-line interface.
//!
//! ```text
//! sideline clamp reasons.json --max-chips 3
//! sideline fetch projections/week/3 --config sideline.yaml --repeat 4
//! sideline config --config sideline.yaml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "sideline", version, about = "Reason clamping and guarded Workers API calls")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clamp a JSON array of reasons to the display budget
    Clamp {
        /// Input file, or '-' for stdin
        #[arg(default_value = "-")]
        input: String,

        /// Maximum chips to keep
        #[arg(long)]
        max_chips: Option<usize>,

        /// Maximum absolute sum of kept effects
        #[arg(long)]
        max_abs_total: Option<f64>,

        /// Use the extended (4.0) budget
        #[arg(long, conflicts_with = "max_abs_total")]
        extended: bool,
    },

    /// GET a Workers API path through the guarded client
    Fetch {
        /// Path relative to upstream.base_url
        path: String,

        /// Config file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Issue this many identical requests concurrently
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },

    /// Print the effective configuration
    Config {
        /// Config file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sideline=debug,sideline_runtime=debug,sideline_core=debug"
    } else {
        "sideline=info,sideline_runtime=info,sideline_core=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = match cli.command {
        Command::Clamp {
            input,
            max_chips,
            max_abs_total,
            extended,
        } => {
            let source = commands::read_input(&input)?;
            let options = commands::clamp_options(max_chips, max_abs_total, extended);
            commands::clamp(&source, &options)?
        }
        Command::Fetch {
            path,
            config,
            repeat,
        } => {
            let config = commands::load_config(config.as_deref())?;
            commands::fetch(config, &path, repeat).await?
        }
        Command::Config { config } => {
            let config = commands::load_config(config.as_deref())?;
            serde_yaml::to_string(&config)?
        }
    };

    println!("{}", output.trim_end());
    Ok(())
}
