use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use uuid::Uuid;

use crate::{controller::ServerCommand, protocol};

/// Accepts control connections and hands each one a pair of tasks. The set
/// of live connections itself is owned by the controller, which learns
/// about lifecycle through `Connected`/`Disconnected` commands.
pub struct Server {
    listener: TcpListener,
    command_tx: mpsc::Sender<ServerCommand>,
}

impl Server {
    pub async fn bind(addr: &str, command_tx: mpsc::Sender<ServerCommand>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            command_tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    log::info!("accepted control connection from {}", peer);
                    tokio::spawn(handle_connection(socket, self.command_tx.clone()));
                }
                Err(e) => {
                    // A persistent failure (e.g. fd exhaustion) would
                    // otherwise spin this loop hot.
                    log::error!("accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, command_tx: mpsc::Sender<ServerCommand>) {
    let conn = Uuid::new_v4();
    let (reader, mut writer) = socket.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    if command_tx
        .send(ServerCommand::Connected {
            conn,
            outbound: outbound_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    // Each connection drains its own outbound queue, so a stalled peer only
    // stalls itself and never the broadcast loop.
    let writer_task = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                log::info!("client {} write failed: {}", conn, e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match protocol::decode_line(&line) {
                    Ok(envelope) => {
                        if command_tx
                            .send(ServerCommand::Request { conn, envelope })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // The bad line is dropped; the stream keeps going.
                    Err(e) => log::warn!("client {}: dropping line: {}", conn, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::info!("client {} read failed: {}", conn, e);
                break;
            }
        }
    }

    let _ = command_tx.send(ServerCommand::Disconnected { conn }).await;
    writer_task.abort();
}
