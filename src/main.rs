use std::process::ExitCode;

use clap::Parser;

mod auth;
mod batch;
mod cli;
mod client;
mod commands;
mod config;
mod format;
mod logging;
mod payload;
mod prompts;

use cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.run().await {
        Ok(status) => status.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
