use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use respcache::aof;
use respcache::config::{Args, Config};
use respcache::database::Engine;
use respcache::logging;
use respcache::server::Server;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log_level);
    info!(
        bind = %config.bind,
        port = config.port,
        databases = config.databases,
        append_only = config.append_only,
        "starting respcache"
    );

    let mut engine = Engine::new(config.databases as usize);

    if config.append_only {
        if let Err(e) = aof::load(&engine, &config.append_filename).await {
            error!(error = %e, kind = %e.kind_label(), path = %config.append_filename, "failed to load append only file");
            return ExitCode::FAILURE;
        }
        if let Err(e) = aof::start(&mut engine, &config.append_filename) {
            error!(error = %e, kind = %e.kind_label(), path = %config.append_filename, "failed to open append only file for writing");
            return ExitCode::FAILURE;
        }
    }

    let server = Server::new(Arc::new(engine));
    match server.run(&config.bind, config.port).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}
