use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_exchange::{Config, Daemon};

/// fleetx - command and telemetry exchange for remote vehicle ground control
#[derive(Parser)]
#[command(name = "fleetx", version, about)]
struct Cli {
    /// Config file to use instead of ~/.config/fleetx/config.toml
    #[arg(short, long, env = "FLEETX_CONFIG")]
    config: Option<PathBuf>,

    /// Port of the remote UI endpoint
    #[arg(long)]
    port: Option<u16>,

    /// Address of the remote UI endpoint
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Don't serve the remote UI endpoint
    #[arg(long)]
    no_api: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration
    Config {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Print the config file path
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,fleet_exchange=info",
        1 => "info,fleet_exchange=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_from(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(bind) = cli.bind {
        config.api.bind = bind;
    }
    if cli.no_api {
        config.api.enabled = false;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Config { json } => print_config(&config, json),
            Command::ConfigPath => {
                match fleet_exchange::config::config_file_path() {
                    Some(path) => println!("{}", path.display()),
                    None => anyhow::bail!("no home directory to derive the config path from"),
                }
                Ok(())
            }
        };
    }

    tracing::debug!(?config, "loaded configuration");
    tracing::info!(
        api = config.api.enabled,
        addr = %config.api.addr(),
        "starting fleet exchange"
    );

    Daemon::new(config).run().await?;

    Ok(())
}

fn print_config(config: &Config, json: bool) -> anyhow::Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config)?
    } else {
        toml::to_string_pretty(config)?
    };
    println!("{rendered}");
    Ok(())
}
