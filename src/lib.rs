use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    config::{Paths, ServerConfig},
    controller::{ServerCommand, ShowController},
    render::{HeadlessRenderer, RenderEvent},
    server::Server,
};

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod model;
pub mod protocol;
pub mod render;
pub mod server;
pub mod show;

pub struct BackendHandle {
    pub command_tx: mpsc::Sender<ServerCommand>,
    pub local_addr: std::net::SocketAddr,
}

/// Wires the controller and the TCP server together and spawns both. The
/// returned handle carries the bound address (useful with port 0) and the
/// command channel for shutdown.
pub async fn start_backend(config: &ServerConfig) -> anyhow::Result<BackendHandle> {
    let (command_tx, command_rx) = mpsc::channel::<ServerCommand>(32);
    let (render_tx, render_rx) = mpsc::unbounded_channel::<RenderEvent>();

    let paths = Paths::init(&config.data_dir)?;
    let renderer = Arc::new(HeadlessRenderer::new(render_tx));
    let controller = ShowController::new(paths, renderer, command_rx, render_rx);

    let server = Server::bind(
        &format!("{}:{}", config.bind, config.port),
        command_tx.clone(),
    )
    .await?;
    let local_addr = server.local_addr()?;

    tokio::spawn(controller.run());
    tokio::spawn(server.run());

    Ok(BackendHandle {
        command_tx,
        local_addr,
    })
}
