mod commands;
mod unlinked;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Stage-based cloud provisioning engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Azure,
    Aws,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a compute instance (mock mode, no cloud calls)
    Provision {
        /// Cloud provider
        #[arg(short, long, value_enum)]
        provider: ProviderKind,
        /// Compute instance name
        #[arg(short, long)]
        name: String,
        /// Region or location (provider default when omitted)
        #[arg(short, long, env = "STRATUS_REGION")]
        region: Option<String>,
        /// Number of data disks to attach besides the boot disk
        #[arg(long, default_value = "1")]
        data_disks: u32,
        /// Persist resource records to <DIR>/.stratus/store.json
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Print the effective engine configuration
    Config,
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            println!("stratus {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Config => commands::config::handle(),
        Commands::Provision {
            provider,
            name,
            region,
            data_disks,
            state_dir,
        } => {
            let (config, _) = stratus_config::load_effective()?;
            let options = commands::provision::ProvisionOptions {
                provider,
                name,
                region,
                data_disks,
                state_dir,
            };
            commands::provision::handle(options, &config).await
        }
    }
}
