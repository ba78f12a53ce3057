//! The TCP accept loop: binds the listener, spawns one task per accepted
//! connection, and waits for a shutdown signal to drain everything cleanly.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::database::Engine;
use crate::handler::RespHandler;

pub struct Server {
    handler: Arc<RespHandler>,
}

impl Server {
    pub fn new(engine: Arc<Engine>) -> Self {
        Server {
            handler: Arc::new(RespHandler::new(engine)),
        }
    }

    /// Binds `bind:port` and serves connections until a shutdown signal
    /// arrives, then drains in-flight connections before returning.
    pub async fn run(self, bind: &str, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind((bind, port)).await?;
        info!(%bind, port, "server listening");

        let mut tasks = JoinSet::new();
        let mut shutdown = Box::pin(wait_for_shutdown_signal());

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let handler = self.handler.clone();
                            tasks.spawn(async move { handler.handle(stream, addr).await });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Dropping the listener unblocks any further `accept`, matching the
        // "close listener -> accept loop exits" shutdown sequence; we've
        // already left the loop above so this just releases the port.
        drop(listener);

        self.handler.close().await;

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "connection task panicked");
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");

    tokio::select! {
        _ = hangup.recv() => {}
        _ = quit.recv() => {}
        _ = terminate.recv() => {}
        _ = interrupt.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
