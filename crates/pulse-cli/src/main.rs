//! # pulse
//!
//! Command-line client: log in, inspect the session, and watch live prices
//! over the shared push channel.

#![deny(unsafe_code)]

mod format;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pulse_auth::{Credentials, RegistrationDetails};
use pulse_client::PulseContext;
use pulse_core::ConsumerId;
use pulse_stream::ConnectionState;
use tracing::{info, warn};

/// Pulse market data client.
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about = "Pulse market data client")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level filter (overrides `logging.level`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and persist the session.
    Login {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "PULSE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and log in.
    Register {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Account password.
        #[arg(long, env = "PULSE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },
    /// End the session locally and on the server.
    Logout,
    /// Show the logged-in user.
    Whoami,
    /// Stream live prices until interrupted.
    Watch {
        /// Ticker symbols.
        #[arg(required = true)]
        tickers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .settings
        .clone()
        .unwrap_or_else(pulse_settings::settings_path);
    let settings = pulse_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    pulse_core::logging::init_subscriber(&level);

    let ctx = PulseContext::from_settings(settings).context("Failed to build client")?;
    let result = run(&ctx, cli.command).await;
    ctx.shutdown().await;
    result
}

async fn run(ctx: &PulseContext, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let session = ctx
                .sessions()
                .login(&Credentials::new(email, password))
                .await
                .context("Login failed")?;
            println!("logged in as {} ({})", session.user_id, session.tier);
        }
        Command::Register {
            email,
            password,
            name,
        } => {
            let details = RegistrationDetails {
                email,
                password,
                display_name: name,
            };
            let session = ctx
                .sessions()
                .register(&details)
                .await
                .context("Registration failed")?;
            println!("registered {} ({})", session.user_id, session.tier);
        }
        Command::Logout => {
            if ctx.sessions().current().is_none() {
                println!("not logged in");
                return Ok(());
            }
            ctx.sessions().logout().await;
            println!("logged out");
        }
        Command::Whoami => {
            if ctx.sessions().current().is_none() {
                bail!("not logged in (run `pulse login`)");
            }
            let user = ctx
                .sessions()
                .current_user()
                .await
                .context("Failed to fetch current user")?;
            println!("{}", format::profile(&user));
        }
        Command::Watch { tickers } => watch(ctx, &tickers).await?,
    }
    Ok(())
}

async fn watch(ctx: &PulseContext, tickers: &[String]) -> Result<()> {
    let multiplexer = ctx.multiplexer();
    let mut handle = multiplexer
        .subscribe(ConsumerId::generate(), tickers)
        .context("Invalid ticker")?;
    let mut status = multiplexer.status();
    info!(tickers = ?handle.tickers(), "watching");

    loop {
        tokio::select! {
            delivery = handle.recv() => match delivery {
                Some(delivery) => println!("{}", format::delivery(&delivery)),
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                eprintln!("{}", format::snapshot(&snapshot));
                if snapshot.state == ConnectionState::Offline {
                    warn!("push channel offline; retrying is manual");
                    if ctx.sessions().current().is_none() {
                        bail!("session expired (run `pulse login`)");
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
