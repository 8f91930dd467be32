mod cli;
mod commands;
mod context;

use clap::Parser;
use tracing::{info, warn};

use cli::{Args, Command};
use context::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duet=info,duet_chat=info,duet_session=info,duet_backend=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        // GIF search needs no account
        Command::Gifs(command) => commands::gifs(command).await,
        command => run(command).await,
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    let ctx = Context::from_env().await?;
    let result = match command {
        Command::Register {
            email,
            password,
            username,
            gender,
        } => commands::register(&ctx, email, password, username, &gender).await,
        Command::Login { email, password } => commands::login(&ctx, &email, &password).await,
        Command::Logout => commands::logout(&ctx).await,
        Command::Whoami => commands::whoami(&ctx).await,
        Command::Pair(command) => commands::pair(&ctx, command).await,
        Command::Chat(command) => commands::chat(&ctx, command).await,
        Command::Milestones => commands::milestones(&ctx).await,
        Command::Telemetry(command) => commands::telemetry(&ctx, command).await,
        Command::Gifs(command) => commands::gifs(command).await,
    };
    // Partial changes of a failed command are kept too
    ctx.persist().await?;
    result
}

pub(crate) async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, stopping..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping..."),
                }
            }
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, stopping...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, stopping...");
    }
}
