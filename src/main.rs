use clap::Parser;
use tokio::sync::oneshot;

use cgcontrol::{config::ServerConfig, controller::ServerCommand, start_backend};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let config = ServerConfig::parse();
    let backend = start_backend(&config).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down, saving current show");

    let (done_tx, done_rx) = oneshot::channel();
    if backend
        .command_tx
        .send(ServerCommand::Shutdown { done: done_tx })
        .await
        .is_ok()
    {
        let _ = done_rx.await;
    }
    Ok(())
}
