//! Tenant Mux operator CLI
//!
//! Inspects tenant settings and the virtual identity encoding without a
//! running host.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tenant_mux::engine::identity::{decode_user, extract_tenant_id, is_virtual};
use tenant_mux::engine::{IdentityProbe, StatusReport};
use tenant_mux::{MultiplexerSettings, OpenAIClientFactory, TenantMultiplexer};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tenant-mux")]
#[command(about = "Tenant Mux CLI - Inspect tenant settings and virtual identities")]
#[command(version = "1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML, JSON or YAML)
    #[arg(short, long, env = "TENANT_MUX_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configured tenants
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode a real user id for a tenant
    Encode {
        tenant_id: String,
        real_user_id: String,
    },

    /// Decode a virtual user id
    Decode { value: String },

    /// Load and validate the settings
    CheckConfig,
}

fn settings_path(cli: &Cli) -> Option<PathBuf> {
    cli.config
        .as_deref()
        .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
}

fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = settings_path(&cli);
    debug!("Settings path: {:?}", path);

    match &cli.command {
        Commands::Status { json } => {
            let settings = MultiplexerSettings::load(path.as_deref())
                .context("Failed to load settings")?;
            let mux = TenantMultiplexer::new(settings, Arc::new(OpenAIClientFactory::default()));
            let report = StatusReport::collect(&mux);
            if *json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render());
            }
        }

        Commands::Encode {
            tenant_id,
            real_user_id,
        } => {
            let probe = IdentityProbe::run(tenant_id, real_user_id)
                .with_context(|| format!("Cannot encode for tenant '{}'", tenant_id))?;
            print!("{}", probe.render());
        }

        Commands::Decode { value } => {
            if is_virtual(value) {
                println!("{} {}", "Tenant:".bold(), extract_tenant_id(value).cyan());
                println!("{} {}", "Real id:".bold(), decode_user(value));
            } else {
                println!("{} is not a virtual identity", value.yellow());
            }
        }

        Commands::CheckConfig => {
            let settings = MultiplexerSettings::load(path.as_deref())
                .context("Failed to load settings")?;
            let problems = settings.validate();
            println!(
                "{} {} tenant(s), channel virtualization {}",
                "Loaded".green(),
                settings.tenants.len(),
                if settings.virtualize_channels { "on" } else { "off" }
            );
            if problems.is_empty() {
                println!("{}", "No problems found".green());
            } else {
                for problem in &problems {
                    warn!("{}", problem);
                    println!("  {} {}", "✗".red(), problem);
                }
                anyhow::bail!("{} problem(s) found", problems.len());
            }
        }
    }

    Ok(())
}
