//! The `palaver` command: serves the HTTP API or chats in the terminal.

#[macro_use]
extern crate tracing;

mod chat;
mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    let default_level = match command {
        Command::Serve => "info",
        // Keep the terminal for the conversation.
        Command::Chat => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let state = match cli.config.build_state() {
        Ok(state) => state,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Serve => {
            if let Err(err) = serve(cli.config.listen, state).await {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
        Command::Chat => chat::run(state).await,
    }
    ExitCode::SUCCESS
}

async fn serve(
    addr: std::net::SocketAddr,
    state: palaver::AppState,
) -> std::io::Result<()> {
    let router = palaver::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
}
