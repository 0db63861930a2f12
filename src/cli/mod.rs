//! # Command Line Interface
//!
//! `credential-rotator` runs the rotation daemon by default. The remaining
//! subcommands are one-shot operator tools against the same secrets backend.

pub mod output;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::config::{Config, LogFormat};
use crate::lifecycle::{state_key, PersistedMachineState};
use crate::observability::init_logging;
use crate::secrets::{CaSubject, SecretStore};
use crate::startup::{connect_secret_store, run_daemon, Backend};

#[derive(Parser, Debug)]
#[command(name = "credential-rotator")]
#[command(about = "DFSP credential lifecycle engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Secrets backend
    #[arg(long, value_enum, default_value_t = Backend::Vault, global = true)]
    pub backend: Backend,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format, overrides ROTATOR_LOG_FORMAT
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the rotation daemon (default)
    Run,

    /// Check secrets backend health
    Health,

    /// Certificate authority management
    Ca {
        #[command(subcommand)]
        command: CaCommands,
    },

    /// Certificate signing requests
    Csr {
        #[command(subcommand)]
        command: CsrCommands,
    },

    /// Persisted machine state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CaCommands {
    /// Replace the root CA with a freshly generated one
    Init {
        #[arg(long)]
        common_name: String,

        /// Validity, e.g. "87600h"
        #[arg(long)]
        ttl: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CsrCommands {
    /// Sign a PEM-encoded CSR with the client role
    Sign { file: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Print the persisted snapshot of a machine, private key redacted
    Show { machine: String },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging, cli.verbose)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, cli.backend).await?,
        Commands::Health => {
            let store = connect_secret_store(&config, cli.backend).await?;
            handle_health(store.as_ref()).await?
        }
        Commands::Ca { command } => {
            let store = connect_secret_store(&config, cli.backend).await?;
            handle_ca_command(command, store.as_ref()).await?
        }
        Commands::Csr { command } => {
            let store = connect_secret_store(&config, cli.backend).await?;
            handle_csr_command(command, store.as_ref()).await?
        }
        Commands::State { command } => {
            let store = connect_secret_store(&config, cli.backend).await?;
            handle_state_command(command, store.as_ref(), &config.rotation.state_namespace)
                .await?
        }
    }

    Ok(())
}

async fn handle_health(store: &dyn SecretStore) -> anyhow::Result<()> {
    let health = store.health_check().await;
    output::print_fields(&[
        ("healthy", health.is_healthy().to_string()),
        ("initialized", health.initialized.to_string()),
        ("sealed", health.sealed.to_string()),
        ("standby", health.standby.to_string()),
        ("version", health.version.clone().unwrap_or_else(|| "-".to_string())),
        ("error", health.error.clone().unwrap_or_else(|| "-".to_string())),
    ]);

    if !health.is_healthy() {
        bail!("secrets backend is not healthy");
    }
    Ok(())
}

async fn handle_ca_command(command: CaCommands, store: &dyn SecretStore) -> anyhow::Result<()> {
    match command {
        CaCommands::Init { common_name, ttl } => {
            let ca = store.create_certificate_authority(&CaSubject { common_name, ttl }).await?;
            print!("{}", ca.certificate);
            if !ca.certificate.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

async fn handle_csr_command(command: CsrCommands, store: &dyn SecretStore) -> anyhow::Result<()> {
    match command {
        CsrCommands::Sign { file } => {
            let csr = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read CSR from {}", file.display()))?;
            let signed = store.sign_certificate_request(&csr).await?;
            output::print_json(&signed)?;
        }
    }
    Ok(())
}

async fn handle_state_command(
    command: StateCommands,
    store: &dyn SecretStore,
    namespace: &str,
) -> anyhow::Result<()> {
    match command {
        StateCommands::Show { machine } => {
            let state = load_persisted_state(store, namespace, &machine).await?;
            output::print_json(&state.redacted())?;
        }
    }
    Ok(())
}

/// Read and decode a machine snapshot.
pub async fn load_persisted_state(
    store: &dyn SecretStore,
    namespace: &str,
    machine: &str,
) -> anyhow::Result<PersistedMachineState> {
    let key = state_key(namespace, machine);
    let Some(value) = store.read_secret(&key).await? else {
        bail!("no persisted state for '{}' at {}", machine, key);
    };
    serde_json::from_value(value).with_context(|| format!("Unreadable state at {}", key))
}
