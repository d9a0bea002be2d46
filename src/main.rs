//! chunkd daemon entry point
//!
//! ```bash
//! chunkd --root /srv/files
//! chunkd --listen 127.0.0.1:12345 --chunk-size 4096 -v
//! chunkd --config /etc/chunkd.toml
//! ```

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkd::{Cli, Server};

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_directive())),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    }
}

fn run(cli: &Cli) -> chunkd::Result<()> {
    let config = cli.server_config()?;
    tracing::info!("Serving files from {}", config.root.display());

    let mut server = Server::new(config)?;
    server.run()?;
    Ok(())
}
